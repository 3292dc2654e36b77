//! Configuration types for the semantic router.
//!
//! Config is loaded once at startup from a TOML file and validated before the
//! server opens any ports. It is treated as immutable for the lifetime of the
//! process — there is no hot-reload, unlike a config that only gates routing
//! policy rather than model/decision identity.
//!
//! # Example
//! ```toml
//! [gateway]
//! upstream_base = "http://localhost:8000"
//! port          = 8080
//!
//! [[router.models]]
//! name       = "default-local"
//! endpoint   = "http://localhost:11434"
//! model_type = "local"
//! is_default = true
//!
//! [[router.models]]
//! name          = "gpt-large"
//! endpoint      = "https://api.openai.com"
//! access_key_env = "OPENAI_API_KEY"
//! model_type    = "openai"
//!
//! [[router.signals]]
//! type                  = "complexity"
//! classifier_path       = "/models/complexity.gguf"
//! confidence_threshold  = 0.9
//!
//! [[router.decisions]]
//! name      = "big"
//! model_ref = "gpt-large"
//! operator  = "and"
//! rules     = [{ signal = "complexity", operator = "gt", score = 7.0 }]
//! ```

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::signal::Condition;

/// Which wire protocol an upstream [`Model`] speaks.
///
/// Only these two are supported — this core performs no schema translation.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    #[default]
    OpenAI,
    Local,
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::OpenAI => "openai",
            Self::Local => "local",
        })
    }
}

/// An upstream endpoint descriptor.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Model {
    /// Logical name, unique within `router.models`. Referenced by
    /// [`DecisionConfig::model_ref`].
    pub name: String,

    /// Base URL; the inbound `path_and_query` is joined onto this.
    pub endpoint: String,

    /// Literal access key, forwarded unchanged (this core does not inject it
    /// into outbound requests — pass-through is the documented contract).
    #[serde(default)]
    pub access_key: String,

    /// Environment variable to resolve the access key from instead of the
    /// literal field, resolved once at config-load time. Keeps secrets out
    /// of the committed config file; overrides `access_key` when set.
    #[serde(default)]
    pub access_key_env: Option<String>,

    #[serde(default)]
    pub model_type: ModelType,

    /// Exactly one [`Model`] in `router.models` must set this.
    #[serde(default)]
    pub is_default: bool,

    /// Filesystem path to a local model file, when `model_type = "local"`
    /// and the endpoint serves more than one model.
    #[serde(default)]
    pub local_path: Option<String>,
}

impl Model {
    /// Resolve the effective access key: `access_key_env` if set and
    /// present in the environment, else the literal `access_key`.
    pub fn access_key(&self) -> String {
        self.access_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .unwrap_or_else(|| self.access_key.clone())
    }
}

/// How to produce one [`crate::signal::Signal`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalConfig {
    Complexity {
        classifier_path: String,
        confidence_threshold: f64,
    },
    UseCase {
        classifier_path: String,
        confidence_threshold: f64,
        labels: Vec<String>,
    },
}

impl SignalConfig {
    pub fn signal_type(&self) -> crate::signal::SignalType {
        match self {
            Self::Complexity { .. } => crate::signal::SignalType::Complexity,
            Self::UseCase { .. } => crate::signal::SignalType::UseCase,
        }
    }

    pub fn classifier_path(&self) -> &str {
        match self {
            Self::Complexity { classifier_path, .. } | Self::UseCase { classifier_path, .. } => classifier_path,
        }
    }

    pub fn confidence_threshold(&self) -> f64 {
        match self {
            Self::Complexity { confidence_threshold, .. } | Self::UseCase { confidence_threshold, .. } => {
                *confidence_threshold
            }
        }
    }
}

/// Rule-combination operator for a [`DecisionConfig`].
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    #[default]
    And,
    Or,
}

/// A named binding from a rule set to an upstream [`Model`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DecisionConfig {
    pub name: String,
    pub model_ref: String,
    #[serde(default)]
    pub rules: Vec<Condition>,
    #[serde(default)]
    pub operator: RuleOperator,
}

/// The process-wide, read-mostly routing configuration consumed by C2/C3.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RouterConfig {
    #[serde(default)]
    pub models: Vec<Model>,
    /// Evaluation order is declaration order — see [`crate::decision::evaluate`].
    #[serde(default)]
    pub decisions: Vec<DecisionConfig>,
    #[serde(default)]
    pub signals: Vec<SignalConfig>,
}

impl RouterConfig {
    pub fn model(&self, name: &str) -> Option<&Model> {
        self.models.iter().find(|m| m.name == name)
    }

    pub fn default_model(&self) -> Option<&Model> {
        self.models.iter().find(|m| m.is_default)
    }
}

/// Top-level configuration, loaded once at startup and treated as immutable.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub router: RouterConfig,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&content).context("parsing config TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let model_names: HashSet<&str> = self.router.models.iter().map(|m| m.name.as_str()).collect();

        let default_count = self.router.models.iter().filter(|m| m.is_default).count();
        anyhow::ensure!(
            default_count == 1,
            "exactly one [[router.models]] entry must set is_default = true, found {default_count}"
        );

        for decision in &self.router.decisions {
            anyhow::ensure!(
                model_names.contains(decision.model_ref.as_str()),
                "decision `{}` references unknown model `{}`",
                decision.name,
                decision.model_ref
            );
            anyhow::ensure!(
                !decision.rules.is_empty() || decision.operator == RuleOperator::And,
                "decision `{}` has an empty rule list under `or`, which can never match — use `and` for a fallback decision",
                decision.name
            );
            for rule in &decision.rules {
                rule.validate()
                    .with_context(|| format!("decision `{}`", decision.name))?;
            }
        }

        for signal in &self.router.signals {
            let threshold = signal.confidence_threshold();
            anyhow::ensure!(
                (0.0..=1.0).contains(&threshold),
                "confidence_threshold must be within [0, 1] for classifier `{}`, got {threshold}",
                signal.classifier_path()
            );
            if let SignalConfig::UseCase { labels, classifier_path, .. } = signal {
                anyhow::ensure!(
                    !labels.is_empty(),
                    "use_case signal at `{classifier_path}` must have a non-empty label list"
                );
            }
        }

        Ok(())
    }
}

/// Core gateway settings — spec.md §6's `Config` fields plus two
/// compatibility toggles for documented quirks of the original
/// implementation (see the design notes in `SPEC_FULL.md`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Fallback upstream base when there is no decision and no default
    /// model endpoint is otherwise resolvable.
    pub upstream_base: String,

    #[serde(default = "defaults::port")]
    pub port: u16,

    #[serde(default)]
    pub secure: bool,

    /// Seconds. Bounds the total upstream operation (connect + response).
    #[serde(default = "defaults::request_timeout")]
    pub request_timeout: f64,

    /// When true (the default, matching the original implementation), a
    /// request body that fails to parse answers `500` instead of `400`.
    #[serde(default = "defaults::legacy_parse_status")]
    pub legacy_parse_status: bool,

    /// When true, the upstream response body is fully buffered before being
    /// returned to the client, matching the original implementation. When
    /// false (the default), the body is streamed through as it arrives.
    #[serde(default)]
    pub buffer_upstream_body: bool,
}

mod defaults {
    pub fn port() -> u16 {
        8080
    }
    pub fn request_timeout() -> f64 {
        30.0
    }
    pub fn legacy_parse_status() -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Operator;

    fn minimal_config() -> Config {
        toml::from_str(
            r#"
            [gateway]
            upstream_base = "http://localhost:8000"

            [[router.models]]
            name = "default-local"
            endpoint = "http://localhost:11434"
            model_type = "local"
            is_default = true

            [[router.models]]
            name = "gpt-large"
            endpoint = "https://api.openai.com"
            model_type = "openai"
            "#,
        )
        .expect("minimal config should parse")
    }

    #[test]
    fn gateway_defaults_are_applied_when_section_is_minimal() {
        let config = minimal_config();
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.gateway.request_timeout, 30.0);
        assert!(config.gateway.legacy_parse_status);
        assert!(!config.gateway.buffer_upstream_body);
    }

    #[test]
    fn validation_requires_exactly_one_default_model() {
        let mut config = minimal_config();
        config.router.models.clear();
        assert!(config.validate().is_err());

        config = minimal_config();
        for m in &mut config.router.models {
            m.is_default = true;
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_decision_with_unknown_model_ref() {
        let mut config = minimal_config();
        config.router.decisions.push(DecisionConfig {
            name: "bad".into(),
            model_ref: "no-such-model".into(),
            rules: vec![],
            operator: RuleOperator::And,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_empty_rules_under_or() {
        let mut config = minimal_config();
        config.router.decisions.push(DecisionConfig {
            name: "dead-weight".into(),
            model_ref: "gpt-large".into(),
            rules: vec![],
            operator: RuleOperator::Or,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_use_case_signal_with_no_labels() {
        let mut config = minimal_config();
        config.router.signals.push(SignalConfig::UseCase {
            classifier_path: "/models/use_case.gguf".into(),
            confidence_threshold: 0.8,
            labels: vec![],
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_out_of_range_confidence_threshold() {
        let mut config = minimal_config();
        config.router.signals.push(SignalConfig::Complexity {
            classifier_path: "/models/complexity.gguf".into(),
            confidence_threshold: 1.5,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_gt_operator_on_use_case_condition() {
        let mut config = minimal_config();
        config.router.decisions.push(DecisionConfig {
            name: "bad-condition".into(),
            model_ref: "gpt-large".into(),
            rules: vec![Condition::UseCase { operator: Operator::Gt, label: "chat".into() }],
            operator: RuleOperator::And,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn model_access_key_prefers_env_var_when_set() {
        std::env::set_var("SEMANTIC_ROUTER_TEST_KEY", "from-env");
        let model = Model {
            name: "m".into(),
            endpoint: "http://x".into(),
            access_key: "literal".into(),
            access_key_env: Some("SEMANTIC_ROUTER_TEST_KEY".into()),
            model_type: ModelType::OpenAI,
            is_default: false,
            local_path: None,
        };
        assert_eq!(model.access_key(), "from-env");
        std::env::remove_var("SEMANTIC_ROUTER_TEST_KEY");
    }

    #[test]
    fn model_access_key_falls_back_to_literal() {
        let model = Model {
            name: "m".into(),
            endpoint: "http://x".into(),
            access_key: "literal".into(),
            access_key_env: None,
            model_type: ModelType::OpenAI,
            is_default: false,
            local_path: None,
        };
        assert_eq!(model.access_key(), "literal");
    }

    #[test]
    fn resolve_default_model() {
        let config = minimal_config();
        assert_eq!(config.router.default_model().unwrap().name, "default-local");
    }
}
