//! Classifier runtime (C1): an injected text-completion capability.
//!
//! The decision pipeline never talks to an inference engine directly — it
//! goes through the [`Completion`] trait. The production implementation
//! ([`llama::LlamaCompletion`]) wraps a local GGUF model via `llama-cpp-2`;
//! [`StubCompletion`] is a deterministic test double. This replaces
//! source-level monkey-patching with an ordinary trait object.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::ClassifierError;

#[cfg(feature = "local-inference")]
pub mod llama;

/// How generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Hit an end-of-generation token or a configured stop string.
    Stop,
    /// Hit `max_tokens` without stopping naturally.
    MaxTokens,
}

/// Raw output of one completion call.
#[derive(Debug, Clone)]
pub struct CompletionOutput {
    pub text: String,
    pub finish_reason: FinishReason,
}

/// `complete(model_path, prompt, max_tokens, temperature, stop_tokens) -> {text, finish_reason}`.
///
/// Models are content-addressed by filesystem path; implementations are
/// expected to cache loaded model handles internally (see
/// [`ClassifierRegistry`]) rather than reload on every call.
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(
        &self,
        model_path: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
        stop_tokens: &[String],
    ) -> Result<CompletionOutput, ClassifierError>;
}

/// Bounded-LRU registry of loaded model handles, keyed by canonicalized path.
///
/// Capacity is small (spec default 2) since a deployment only runs a
/// handful of distinct classifier models. Loading is serialized per path —
/// two concurrent requests for the same not-yet-loaded path load it once —
/// while completions against already-loaded, distinct paths proceed without
/// contending on a shared lock.
pub struct ClassifierRegistry<H> {
    capacity: usize,
    state: Mutex<RegistryState<H>>,
    loads: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

struct RegistryState<H> {
    handles: HashMap<PathBuf, Arc<H>>,
    /// Least-recently-used at the front, most-recently-used at the back.
    order: VecDeque<PathBuf>,
}

impl<H> ClassifierRegistry<H> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(RegistryState { handles: HashMap::new(), order: VecDeque::new() }),
            loads: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached handle for `path`, loading it with `load` on a
    /// cache miss. On overflow, evicts the least-recently-used handle
    /// (freeing its backing resource) before `load` is even called, so the
    /// registry never holds more than `capacity` loaded handles at once.
    pub async fn get_or_load<F, E>(&self, path: &Path, load: F) -> Result<Arc<H>, E>
    where
        F: FnOnce() -> Result<H, E>,
    {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        if let Some(handle) = self.touch(&canonical).await {
            return Ok(handle);
        }

        // Serialize loads of the same path; a concurrent loader for a
        // different path is unaffected since each path gets its own lock.
        let load_lock = {
            let mut loads = self.loads.lock().await;
            loads.entry(canonical.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        let _guard = load_lock.lock().await;

        // Another task may have loaded it while we waited for the lock.
        if let Some(handle) = self.touch(&canonical).await {
            return Ok(handle);
        }

        // Evict the LRU entry before loading the replacement, so the old
        // handle's backing resource is freed before the new one is
        // acquired — never holding capacity+1 loaded models at once.
        {
            let mut state = self.state.lock().await;
            if state.order.len() >= self.capacity {
                if let Some(evicted) = state.order.pop_front() {
                    state.handles.remove(&evicted);
                }
            }
        }

        let handle = Arc::new(load()?);
        let mut state = self.state.lock().await;
        state.handles.insert(canonical.clone(), handle.clone());
        state.order.push_back(canonical);
        Ok(handle)
    }

    async fn touch(&self, path: &Path) -> Option<Arc<H>> {
        let mut state = self.state.lock().await;
        let handle = state.handles.get(path).cloned()?;
        state.order.retain(|p| p != path);
        state.order.push_back(path.to_path_buf());
        Some(handle)
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.state.lock().await.handles.len()
    }
}

/// Deterministic test double for [`Completion`].
///
/// Returns a canned response looked up by exact prompt match, falling back
/// to a default when the prompt isn't in the table. Used throughout the
/// signal-computer and decision-engine test suites instead of loading a
/// real model.
pub struct StubCompletion {
    responses: HashMap<String, String>,
    default: String,
}

impl StubCompletion {
    pub fn new(default: impl Into<String>) -> Self {
        Self { responses: HashMap::new(), default: default.into() }
    }

    pub fn with_response(mut self, prompt_contains: impl Into<String>, response: impl Into<String>) -> Self {
        self.responses.insert(prompt_contains.into(), response.into());
        self
    }
}

#[async_trait]
impl Completion for StubCompletion {
    async fn complete(
        &self,
        _model_path: &str,
        prompt: &str,
        _max_tokens: u32,
        _temperature: f32,
        _stop_tokens: &[String],
    ) -> Result<CompletionOutput, ClassifierError> {
        let text = self
            .responses
            .iter()
            .find(|(k, _)| prompt.contains(k.as_str()))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| self.default.clone());
        if text.is_empty() {
            return Err(ClassifierError::Inference("stub completion returned no text".into()));
        }
        Ok(CompletionOutput { text, finish_reason: FinishReason::Stop })
    }
}
