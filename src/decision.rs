//! Decision engine: evaluates configured rule sets against an emitted signal
//! set and selects the best-matching decision.
//!
//! The algebra is deliberately shallow — one level of AND/OR with no nesting.
//! Confidence is a transparency metric (fraction of matched rules), not a
//! probabilistic quantity.

use crate::config::{DecisionConfig, RuleOperator};
use crate::signal::{operator_applies, Condition, Signal};

/// A single matched condition, kept for observability (logging).
#[derive(Debug, Clone)]
pub struct MatchedRule {
    pub signal_type: crate::signal::SignalType,
    pub operator: crate::signal::Operator,
}

/// The outcome of evaluating the configured decisions against a signal set.
#[derive(Debug, Clone)]
pub struct DecisionResult {
    pub decision_name: String,
    pub model_ref: String,
    pub confidence: f64,
    pub matched_rules: Vec<MatchedRule>,
}

/// Evaluate every `decision` against `signals` in declaration order and
/// return the highest-confidence passing decision, if any.
///
/// Ties are broken by declaration order: a later decision only replaces the
/// current best if its confidence is *strictly* greater.
pub fn evaluate(decisions: &[DecisionConfig], signals: &[Signal]) -> Option<DecisionResult> {
    let mut best: Option<DecisionResult> = None;

    for decision in decisions {
        let k = decision.rules.len();
        let matched: Vec<&Condition> = decision
            .rules
            .iter()
            .filter(|rule| signals.iter().any(|s| operator_applies(rule, s)))
            .collect();
        let m = matched.len();

        let passes = match decision.operator {
            RuleOperator::And => m == k,
            RuleOperator::Or => m > 0,
        };
        if !passes {
            continue;
        }

        let confidence = if k == 0 { 0.0 } else { m as f64 / k as f64 };

        let is_new_best = match &best {
            Some(current) => confidence > current.confidence,
            None => true,
        };
        if is_new_best {
            best = Some(DecisionResult {
                decision_name: decision.name.clone(),
                model_ref: decision.model_ref.clone(),
                confidence,
                matched_rules: matched
                    .iter()
                    .map(|c| MatchedRule { signal_type: c.signal_type(), operator: c.operator() })
                    .collect(),
            });
        }
    }

    best
}
