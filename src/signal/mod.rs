//! Signal algebra: the typed observations the decision engine matches against.
//!
//! A [`Signal`] is a tagged variant, not an inheritance hierarchy — each kind
//! carries exactly the payload relevant to it. [`Condition`] mirrors the same
//! shape so a condition's expected type is known at config-validation time,
//! not guessed at request time.

use serde::{Deserialize, Serialize};

mod complexity;
mod use_case;

pub use complexity::ComplexityComputer;
pub use use_case::UseCaseComputer;

/// Which kind of signal a [`Signal`] or [`Condition`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Complexity,
    UseCase,
}

/// A runtime observation derived from request content.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Complexity { score: f64 },
    UseCase { label: String },
}

impl Signal {
    pub fn signal_type(&self) -> SignalType {
        match self {
            Signal::Complexity { .. } => SignalType::Complexity,
            Signal::UseCase { .. } => SignalType::UseCase,
        }
    }
}

/// Comparison operator over a signal's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Lt,
}

/// A single atomic predicate over one signal type.
///
/// `Gt`/`Lt` are only meaningful for [`Condition::Complexity`] — they are
/// rejected for [`Condition::UseCase`] at config load time, never at request
/// time (see [`Condition::validate`]).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Condition {
    Complexity { operator: Operator, score: f64 },
    UseCase { operator: Operator, label: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ConditionError {
    #[error("operator {operator:?} is not valid for a use_case condition (only eq/neq are)")]
    InvalidOperatorForUseCase { operator: Operator },
}

impl Condition {
    pub fn signal_type(&self) -> SignalType {
        match self {
            Condition::Complexity { .. } => SignalType::Complexity,
            Condition::UseCase { .. } => SignalType::UseCase,
        }
    }

    pub fn operator(&self) -> Operator {
        match self {
            Condition::Complexity { operator, .. } => *operator,
            Condition::UseCase { operator, .. } => *operator,
        }
    }

    /// Reject operator/signal-type combinations that can never be satisfiable.
    pub fn validate(&self) -> Result<(), ConditionError> {
        if let Condition::UseCase { operator, .. } = self {
            if matches!(operator, Operator::Gt | Operator::Lt) {
                return Err(ConditionError::InvalidOperatorForUseCase { operator: *operator });
            }
        }
        Ok(())
    }
}

/// Does `condition` hold against `signal`?
///
/// This compares the *runtime* signal's type to the condition's expected
/// type by matching on both tagged enums together: a condition can only
/// match a signal of the same variant, so a `Complexity` condition paired
/// with a `UseCase` signal (or vice versa) simply falls through to `false`
/// rather than comparing unrelated fields.
pub fn operator_applies(condition: &Condition, signal: &Signal) -> bool {
    match (condition, signal) {
        (Condition::Complexity { operator, score }, Signal::Complexity { score: observed }) => {
            match operator {
                Operator::Eq => observed == score,
                Operator::Neq => observed != score,
                Operator::Gt => observed > score,
                Operator::Lt => observed < score,
            }
        }
        (Condition::UseCase { operator, label }, Signal::UseCase { label: observed }) => {
            match operator {
                Operator::Eq => observed == label,
                Operator::Neq => observed != label,
                // Unreachable once config validation has run; treated as a
                // non-match rather than panicking on a malformed condition.
                Operator::Gt | Operator::Lt => false,
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complexity_gt_matches_when_score_exceeds_threshold() {
        let cond = Condition::Complexity { operator: Operator::Gt, score: 7.0 };
        assert!(operator_applies(&cond, &Signal::Complexity { score: 9.0 }));
        assert!(!operator_applies(&cond, &Signal::Complexity { score: 7.0 }));
        assert!(!operator_applies(&cond, &Signal::Complexity { score: 3.0 }));
    }

    #[test]
    fn complexity_eq_is_exact() {
        let cond = Condition::Complexity { operator: Operator::Eq, score: 5.0 };
        assert!(operator_applies(&cond, &Signal::Complexity { score: 5.0 }));
        assert!(!operator_applies(&cond, &Signal::Complexity { score: 5.0001 }));
    }

    #[test]
    fn use_case_eq_matches_canonical_label() {
        let cond = Condition::UseCase { operator: Operator::Eq, label: "code_generation".into() };
        assert!(operator_applies(&cond, &Signal::UseCase { label: "code_generation".into() }));
        assert!(!operator_applies(&cond, &Signal::UseCase { label: "chat".into() }));
    }

    #[test]
    fn mismatched_signal_type_never_matches() {
        let cond = Condition::Complexity { operator: Operator::Gt, score: 1.0 };
        assert!(!operator_applies(&cond, &Signal::UseCase { label: "anything".into() }));

        let cond = Condition::UseCase { operator: Operator::Eq, label: "chat".into() };
        assert!(!operator_applies(&cond, &Signal::Complexity { score: 1.0 }));
    }

    #[test]
    fn use_case_gt_lt_rejected_at_validation() {
        let cond = Condition::UseCase { operator: Operator::Gt, label: "chat".into() };
        assert!(cond.validate().is_err());

        let cond = Condition::UseCase { operator: Operator::Eq, label: "chat".into() };
        assert!(cond.validate().is_ok());
    }
}
