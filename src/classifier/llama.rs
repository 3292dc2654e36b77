//! `llama-cpp-2`-backed [`Completion`] implementation.
//!
//! Loads GGUF model files from disk and runs deterministic (greedy, temperature
//! 0) decoding. One [`LlamaHandle`] per loaded model, held behind the shared
//! [`ClassifierRegistry`] so repeated calls against the same path reuse the
//! loaded weights and context machinery.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;

use super::{ClassifierRegistry, Completion, CompletionOutput, FinishReason};
use crate::error::ClassifierError;

/// Context length used for every classifier load, per spec: small prompts,
/// short completions, no need for a larger window.
const N_CTX: u32 = 2048;

/// Holds one loaded model plus its own `llama-cpp-2` backend handle.
///
/// A backend per model (rather than one shared backend) keeps the registry's
/// eviction story simple: dropping the `Arc<LlamaHandle>` releases both the
/// context machinery and the backend together.
pub struct LlamaHandle {
    backend: LlamaBackend,
    model: LlamaModel,
    n_threads: i32,
}

// SAFETY: LlamaModel and LlamaBackend are Send+Sync in llama-cpp-2; the
// context they hand out is not, but we never let a LlamaContext escape a
// single blocking call.
unsafe impl Send for LlamaHandle {}
unsafe impl Sync for LlamaHandle {}

impl LlamaHandle {
    fn load(path: &Path) -> Result<Self, ClassifierError> {
        let backend = LlamaBackend::init()
            .map_err(|e| ClassifierError::Unavailable(format!("backend init: {e}")))?;
        let model_params = LlamaModelParams::default();
        let model = LlamaModel::load_from_file(&backend, path, &model_params)
            .map_err(|e| ClassifierError::Unavailable(format!("loading {}: {e}", path.display())))?;
        let n_threads = num_cpus::get().clamp(1, 16) as i32;
        Ok(Self { backend, model, n_threads })
    }

    fn create_context(&self) -> Result<LlamaContext<'_>, ClassifierError> {
        let params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(N_CTX))
            .with_n_threads(self.n_threads)
            .with_n_threads_batch(self.n_threads);
        self.model
            .new_context(&self.backend, params)
            .map_err(|e| ClassifierError::Inference(format!("context: {e}")))
    }

    fn tokenize(&self, text: &str) -> Result<Vec<LlamaToken>, ClassifierError> {
        self.model
            .str_to_token(text, AddBos::Always)
            .map_err(|e| ClassifierError::Inference(format!("tokenize: {e}")))
    }

    fn detokenize(&self, tokens: &[LlamaToken]) -> Result<String, ClassifierError> {
        let mut decoder = encoding_rs::UTF_8.new_decoder();
        let mut out = String::new();
        for &token in tokens {
            let piece = self
                .model
                .token_to_piece(token, &mut decoder, false, None)
                .map_err(|e| ClassifierError::Inference(format!("detokenize: {e}")))?;
            out.push_str(&piece);
        }
        Ok(out)
    }

    /// Deterministic (temperature 0, greedy) generation up to `max_tokens`.
    fn generate(&self, prompt: &str, max_tokens: u32) -> Result<CompletionOutput, ClassifierError> {
        let tokens = self.tokenize(prompt)?;
        let mut ctx = self.create_context()?;
        let mut batch = LlamaBatch::new(tokens.len().max(1), 1);
        add_sequence(&mut batch, &tokens)?;
        decode(&mut ctx, &mut batch)?;

        // Deterministic decoding: zero temperature collapses sampling to
        // argmax, mirroring the spec's `temperature=0` contract.
        let mut sampler =
            LlamaSampler::chain_simple([LlamaSampler::top_p(1.0, 1), LlamaSampler::temp(0.0), LlamaSampler::dist(42)]);
        sampler.accept_many(tokens.iter().copied());

        let mut generated = Vec::new();
        let mut pos = tokens.len() as i32;
        let mut finish_reason = FinishReason::MaxTokens;

        for _ in 0..max_tokens {
            let token = sampler.sample(&ctx, -1);
            sampler.accept(token);
            if self.model.is_eog_token(token) {
                finish_reason = FinishReason::Stop;
                break;
            }
            generated.push(token);
            batch.clear();
            add_single(&mut batch, token, pos)?;
            decode(&mut ctx, &mut batch)?;
            pos += 1;
        }

        let text = self.detokenize(&generated)?;
        Ok(CompletionOutput { text, finish_reason })
    }
}

fn add_sequence(batch: &mut LlamaBatch, tokens: &[LlamaToken]) -> Result<(), ClassifierError> {
    let n = tokens.len();
    for (i, &token) in tokens.iter().enumerate() {
        let logits = i == n.saturating_sub(1);
        batch
            .add(token, i as i32, &[0], logits)
            .map_err(|e| ClassifierError::Inference(format!("batch: {e}")))?;
    }
    Ok(())
}

fn add_single(batch: &mut LlamaBatch, token: LlamaToken, pos: i32) -> Result<(), ClassifierError> {
    batch
        .add(token, pos, &[0], true)
        .map_err(|e| ClassifierError::Inference(format!("batch: {e}")))
}

fn decode(ctx: &mut LlamaContext<'_>, batch: &mut LlamaBatch) -> Result<(), ClassifierError> {
    ctx.decode(batch).map_err(|e| ClassifierError::Inference(format!("decode: {e}")))
}

/// Production [`Completion`] implementation backed by `llama-cpp-2`.
pub struct LlamaCompletion {
    registry: ClassifierRegistry<LlamaHandle>,
}

impl LlamaCompletion {
    /// `capacity` is the bounded-LRU size for loaded model handles (spec
    /// default: 2).
    pub fn new(capacity: usize) -> Self {
        Self { registry: ClassifierRegistry::new(capacity) }
    }
}

#[async_trait]
impl Completion for LlamaCompletion {
    async fn complete(
        &self,
        model_path: &str,
        prompt: &str,
        max_tokens: u32,
        _temperature: f32,
        stop_tokens: &[String],
    ) -> Result<CompletionOutput, ClassifierError> {
        let path = PathBuf::from(model_path);
        let handle = self.registry.get_or_load(&path, || LlamaHandle::load(&path)).await?;

        let prompt = prompt.to_string();
        let stop_tokens = stop_tokens.to_vec();
        let mut output = tokio::task::spawn_blocking(move || handle.generate(&prompt, max_tokens))
            .await
            .map_err(|e| ClassifierError::Inference(format!("inference task panicked: {e}")))??;

        if let Some(cut) = first_stop_index(&output.text, &stop_tokens) {
            output.text.truncate(cut);
            output.finish_reason = FinishReason::Stop;
        }

        if output.text.trim().is_empty() {
            return Err(ClassifierError::Inference("completion returned no text".into()));
        }
        Ok(output)
    }
}

fn first_stop_index(text: &str, stop_tokens: &[String]) -> Option<usize> {
    stop_tokens
        .iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s.as_str()))
        .min()
}
