//! Use-case signal computer (C2): asks the classifier to pick one label from
//! a configured set, then normalizes / fuzzy-matches its answer against that
//! set.

use crate::classifier::Completion;
use crate::config::SignalConfig;
use crate::error::ClassifierError;
use crate::signal::Signal;

const PUNCTUATION: [char; 6] = ['.', ',', ';', ':', '!', '?'];

/// Longest-common-subsequence-style similarity cutoff below which a fuzzy
/// match is rejected in favor of the raw completion text.
const FUZZY_CUTOFF: f64 = 0.6;

/// Stop at the first newline — the prompt asks for a single label line, and
/// without this the backend would keep generating past it, corrupting the
/// exact-match normalization below with trailing text.
const STOP_TOKENS: [&str; 1] = ["\n"];

pub struct UseCaseComputer;

impl UseCaseComputer {
    pub async fn compute(
        completion: &dyn Completion,
        config: &SignalConfig,
        user_content: &str,
        non_user_content: &[String],
    ) -> Result<Option<Signal>, ClassifierError> {
        let SignalConfig::UseCase { classifier_path, confidence_threshold, labels } = config else {
            return Err(ClassifierError::Config("UseCaseComputer given a non-use_case SignalConfig".into()));
        };
        if labels.is_empty() {
            return Err(ClassifierError::Config("use_case signal has no configured labels".into()));
        }

        let max_tokens = labels.iter().map(|l| l.len()).max().unwrap_or(0) as u32 + 10;
        let prompt = build_prompt(labels, user_content, non_user_content);
        let stop_tokens: Vec<String> = STOP_TOKENS.iter().map(|s| s.to_string()).collect();
        let output = completion.complete(classifier_path, &prompt, max_tokens, 0.0, &stop_tokens).await?;

        let (label, confidence) = resolve_label(&output.text, labels);
        if confidence < *confidence_threshold {
            return Ok(None);
        }
        Ok(Some(Signal::UseCase { label }))
    }
}

fn build_prompt(labels: &[String], user_content: &str, non_user_content: &[String]) -> String {
    let mut prompt = String::from("Classify the following request into exactly one of these use cases:\n");
    for label in labels {
        prompt.push_str("- ");
        prompt.push_str(label);
        prompt.push('\n');
    }
    prompt.push_str("\nRespond with only the matching label.\n\nRequest:\n");
    prompt.push_str(user_content);
    for extra in non_user_content {
        prompt.push('\n');
        prompt.push_str(extra);
    }
    prompt
}

/// Normalize to lowercase with surrounding punctuation stripped.
fn normalize(s: &str) -> String {
    s.trim().trim_matches(|c| PUNCTUATION.contains(&c)).to_lowercase()
}

/// Resolve the classifier's raw completion to a canonical label.
///
/// 1. Exact normalized match against a configured label → that label, 0.95.
/// 2. Else the closest fuzzy match (cutoff 0.6) → that label, 0.70.
/// 3. Else the raw trimmed completion text → 0.40.
fn resolve_label(raw: &str, labels: &[String]) -> (String, f64) {
    let normalized_completion = normalize(raw);

    for label in labels {
        if normalize(label) == normalized_completion {
            return (label.clone(), 0.95);
        }
    }

    let best = labels
        .iter()
        .map(|label| (label, strsim::normalized_levenshtein(&normalized_completion, &normalize(label))))
        .max_by(|a, b| a.1.total_cmp(&b.1));

    if let Some((label, similarity)) = best {
        if similarity >= FUZZY_CUTOFF {
            return (label.clone(), 0.70);
        }
    }

    (raw.trim().to_string(), 0.40)
}
