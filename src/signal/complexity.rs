//! Complexity signal computer (C2): asks the classifier for a 0–10 score.

use crate::classifier::Completion;
use crate::config::SignalConfig;
use crate::error::ClassifierError;
use crate::signal::Signal;

const PROMPT_PREAMBLE: &str = "Rate the complexity of the following request on a scale from 0 to 10, \
where 0 is trivial and 10 is extremely complex. Respond with only the number.";

const MAX_TOKENS: u32 = 8;

/// Stop the completion at the first newline — the prompt asks for a single
/// number, and without this the backend would run on to `max_tokens`,
/// dragging trailing text into the score parse below.
const STOP_TOKENS: [&str; 1] = ["\n"];

pub struct ComplexityComputer;

impl ComplexityComputer {
    /// Compute a [`Signal::Complexity`], or `None` if the classifier's
    /// confidence falls below the configured threshold.
    pub async fn compute(
        completion: &dyn Completion,
        config: &SignalConfig,
        user_content: &str,
        non_user_content: &[String],
    ) -> Result<Option<Signal>, ClassifierError> {
        let SignalConfig::Complexity { classifier_path, confidence_threshold } = config else {
            return Err(ClassifierError::Config("ComplexityComputer given a non-complexity SignalConfig".into()));
        };

        let prompt = build_prompt(user_content, non_user_content);
        let stop_tokens: Vec<String> = STOP_TOKENS.iter().map(|s| s.to_string()).collect();
        let output = completion.complete(classifier_path, &prompt, MAX_TOKENS, 0.0, &stop_tokens).await?;
        let (score, confidence) = parse_score(&output.text)?;

        if confidence < *confidence_threshold {
            return Ok(None);
        }
        Ok(Some(Signal::Complexity { score }))
    }
}

fn build_prompt(user_content: &str, non_user_content: &[String]) -> String {
    let mut prompt = String::from(PROMPT_PREAMBLE);
    prompt.push_str("\n\nRequest:\n");
    prompt.push_str(user_content);
    for extra in non_user_content {
        prompt.push('\n');
        prompt.push_str(extra);
    }
    prompt
}

/// Scan whitespace-separated tokens (stripping a trailing comma from each)
/// for the first one that parses as a number, clamp it to `[0.0, 10.0]`.
/// Confidence is `0.95` when the whole trimmed completion is exactly that
/// number, else `0.60` (the model said more than just the number).
fn parse_score(text: &str) -> Result<(f64, f64), ClassifierError> {
    let trimmed = text.trim();
    let (candidate, value) = trimmed
        .split_whitespace()
        .map(|tok| tok.trim_end_matches(','))
        .find_map(|tok| tok.parse::<f64>().ok().map(|v| (tok, v)))
        .ok_or_else(|| ClassifierError::Parse(format!("no numeric token in completion: {text:?}")))?;

    let confidence = if trimmed == candidate { 0.95 } else { 0.60 };
    Ok((value.clamp(0.0, 10.0), confidence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::StubCompletion;

    #[tokio::test]
    async fn emits_signal_when_confidence_meets_threshold() {
        let completion = StubCompletion::new("9");
        let config =
            SignalConfig::Complexity { classifier_path: "/models/c.gguf".into(), confidence_threshold: 0.9 };
        let signal = ComplexityComputer::compute(&completion, &config, "write a compiler", &[])
            .await
            .unwrap()
            .expect("exact numeric completion has confidence 0.95");
        assert_eq!(signal, Signal::Complexity { score: 9.0 });
    }

    #[tokio::test]
    async fn omits_signal_when_confidence_below_threshold() {
        // "around 9 or so" isn't an exact number -> confidence 0.60.
        let completion = StubCompletion::new("around 9 or so");
        let config =
            SignalConfig::Complexity { classifier_path: "/models/c.gguf".into(), confidence_threshold: 0.9 };
        let signal = ComplexityComputer::compute(&completion, &config, "x", &[]).await.unwrap();
        assert!(signal.is_none());
    }

    #[test]
    fn parse_score_scans_past_a_leading_non_numeric_token() {
        // The model prefixed its answer instead of replying with just the
        // number; the first numeric token ("9") is still found and used.
        let (score, confidence) = parse_score("Score: 9").unwrap();
        assert_eq!(score, 9.0);
        assert_eq!(confidence, 0.60);
    }

    #[test]
    fn parse_score_clamps_to_range() {
        assert_eq!(parse_score("15").unwrap().0, 10.0);
        assert_eq!(parse_score("-3").unwrap().0, 0.0);
    }

    #[test]
    fn parse_score_strips_trailing_comma() {
        let (score, confidence) = parse_score("7,").unwrap();
        assert_eq!(score, 7.0);
        // "7," != "7" so the exact-match confidence bonus does not apply.
        assert_eq!(confidence, 0.60);
    }

    #[test]
    fn parse_score_fails_with_no_numeric_token() {
        assert!(parse_score("I cannot rate this").is_err());
    }

    #[test]
    fn parse_score_high_confidence_for_bare_number() {
        let (_, confidence) = parse_score("7").unwrap();
        assert_eq!(confidence, 0.95);
    }

    /// Records the `stop_tokens` it was called with instead of completing.
    struct RecordingCompletion {
        seen_stop_tokens: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Completion for RecordingCompletion {
        async fn complete(
            &self,
            _model_path: &str,
            _prompt: &str,
            _max_tokens: u32,
            _temperature: f32,
            stop_tokens: &[String],
        ) -> Result<crate::classifier::CompletionOutput, ClassifierError> {
            *self.seen_stop_tokens.lock().unwrap() = stop_tokens.to_vec();
            Ok(crate::classifier::CompletionOutput {
                text: "9".into(),
                finish_reason: crate::classifier::FinishReason::Stop,
            })
        }
    }

    #[tokio::test]
    async fn compute_passes_newline_stop_token_to_the_classifier() {
        let completion = RecordingCompletion { seen_stop_tokens: std::sync::Mutex::new(Vec::new()) };
        let config =
            SignalConfig::Complexity { classifier_path: "/models/c.gguf".into(), confidence_threshold: 0.9 };
        ComplexityComputer::compute(&completion, &config, "x", &[]).await.unwrap();
        assert_eq!(*completion.seen_stop_tokens.lock().unwrap(), vec!["\n".to_string()]);
    }
}
