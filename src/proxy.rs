//! Proxy core (C5): the single catch-all HTTP route and the per-request
//! pipeline that ties parsing, signal computation, decision selection, and
//! upstream forwarding together.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, Uri};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt as _;

use crate::classifier::Completion;
use crate::config::{Config, SignalConfig};
use crate::decision;
use crate::error::{RequestError, UpstreamError};
use crate::request::{self, ExtractedContent};
use crate::signal::{ComplexityComputer, Signal, UseCaseComputer};

/// Shared state behind every request task: immutable config, the injected
/// classifier capability, and a pair of HTTP clients — one with the
/// configured request timeout (non-streaming), one without (streaming,
/// where the timeout is instead applied only to the initial connect).
pub struct AppState {
    pub config: Arc<Config>,
    pub completion: Arc<dyn Completion>,
    pub client: reqwest::Client,
    pub stream_client: reqwest::Client,
}

impl AppState {
    pub fn new(config: Arc<Config>, completion: Arc<dyn Completion>) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs_f64(config.gateway.request_timeout);
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let stream_client = reqwest::Client::builder().build()?;
        Ok(Self { config, completion, client, stream_client })
    }
}

/// The single catch-all route: any method, any path.
pub async fn fallback_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    tracing::info!(method = %method, path = %uri, size = body.len(), "request received");

    match handle_request(&state, method, uri, headers, body).await {
        Ok(response) => response,
        Err(PipelineError::Request(e)) => e.into_response(state.config.gateway.legacy_parse_status),
        Err(PipelineError::Upstream(e)) => e.into_response(),
    }
}

enum PipelineError {
    Request(RequestError),
    Upstream(UpstreamError),
}

impl From<RequestError> for PipelineError {
    fn from(e: RequestError) -> Self {
        Self::Request(e)
    }
}

impl From<UpstreamError> for PipelineError {
    fn from(e: UpstreamError) -> Self {
        Self::Upstream(e)
    }
}

async fn handle_request(
    state: &AppState,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, PipelineError> {
    let extracted = request::parse_and_extract(&body)?;

    let signals = compute_signals(state, &extracted).await;
    let decision = decision::evaluate(&state.config.router.decisions, &signals);

    let target = resolve_target(&state.config, decision.as_ref());
    if let Some(result) = &decision {
        tracing::info!(
            decision = %result.decision_name,
            confidence = result.confidence,
            matched_rules = result.matched_rules.len(),
            "decision selected"
        );
    }
    tracing::info!(target = %target.endpoint, "upstream target resolved");

    let path_and_query = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let url = join_url(&target.endpoint, path_and_query);
    let outbound_headers = build_outbound_headers(&headers, &url)?;

    forward(state, &method, &url, outbound_headers, body).await
}

/// Fan out C2 signal computation across all configured [`SignalConfig`]s and
/// join before decision selection. A classifier-level fault degrades the
/// affected signal to "omitted"; the pipeline continues regardless.
async fn compute_signals(state: &AppState, extracted: &ExtractedContent) -> Vec<Signal> {
    let user_content = extracted.user_content.as_deref().unwrap_or_default();
    if extracted.user_content.is_none() {
        tracing::warn!("request has no extractable user content; routing on non-user content alone");
    }

    let futures = state.config.router.signals.iter().map(|signal_config| {
        let completion = state.completion.as_ref();
        async move {
            let result = match signal_config {
                SignalConfig::Complexity { .. } => {
                    ComplexityComputer::compute(completion, signal_config, user_content, &extracted.non_user_content)
                        .await
                }
                SignalConfig::UseCase { .. } => {
                    UseCaseComputer::compute(completion, signal_config, user_content, &extracted.non_user_content)
                        .await
                }
            };
            match result {
                Ok(Some(signal)) => {
                    tracing::debug!(signal_type = ?signal_config.signal_type(), "signal computed");
                    Some(signal)
                }
                Ok(None) => None,
                Err(error) => {
                    tracing::warn!(signal_type = ?signal_config.signal_type(), %error, "signal omitted");
                    None
                }
            }
        }
    });

    futures_util::future::join_all(futures).await.into_iter().flatten().collect()
}

fn resolve_target<'a>(config: &'a Config, decision: Option<&decision::DecisionResult>) -> TargetModel<'a> {
    if let Some(decision) = decision {
        if let Some(model) = config.router.model(&decision.model_ref) {
            return TargetModel { endpoint: &model.endpoint };
        }
    }
    if let Some(model) = config.router.default_model() {
        return TargetModel { endpoint: &model.endpoint };
    }
    TargetModel { endpoint: &config.gateway.upstream_base }
}

struct TargetModel<'a> {
    endpoint: &'a str,
}

fn join_url(endpoint: &str, path_and_query: &str) -> String {
    format!("{}{}", endpoint.trim_end_matches('/'), path_and_query)
}

/// Copy inbound headers verbatim except `Host`, which is overwritten with
/// the target's authority.
fn build_outbound_headers(inbound: &HeaderMap, target_url: &str) -> Result<HeaderMap, PipelineError> {
    let parsed = reqwest::Url::parse(target_url)
        .map_err(|e| RequestError::BadRequest(format!("invalid upstream URL: {e}")))?;
    let authority = match parsed.port() {
        Some(port) => format!("{}:{port}", parsed.host_str().unwrap_or_default()),
        None => parsed.host_str().unwrap_or_default().to_string(),
    };

    let mut headers = inbound.clone();
    headers.remove(axum::http::header::HOST);
    headers.insert(
        axum::http::header::HOST,
        HeaderValue::from_str(&authority)
            .map_err(|e| RequestError::BadRequest(format!("invalid host header: {e}")))?,
    );
    Ok(headers)
}

async fn forward(
    state: &AppState,
    method: &Method,
    url: &str,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, PipelineError> {
    let timeout = Duration::from_secs_f64(state.config.gateway.request_timeout);

    if state.config.gateway.buffer_upstream_body {
        let send = state.client.request(method.clone(), url).headers(headers).body(body).send();
        let response = tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| UpstreamError::Timeout(timeout))?
            .map_err(|e| UpstreamError::Connect(e.to_string()))?;

        let status = response.status();
        tracing::info!(status = status.as_u16(), "upstream responded");
        let response_headers = response.headers().clone();
        let bytes = tokio::time::timeout(timeout, response.bytes())
            .await
            .map_err(|_| UpstreamError::Timeout(timeout))?
            .map_err(|e| UpstreamError::Connect(e.to_string()))?;

        let mut builder = Response::builder().status(status);
        if let Some(h) = builder.headers_mut() {
            *h = response_headers;
        }
        Ok(builder.body(Body::from(bytes)).expect("upstream status/headers are always valid"))
    } else {
        let send = state.stream_client.request(method.clone(), url).headers(headers).body(body).send();
        let response = tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| UpstreamError::Timeout(timeout))?
            .map_err(|e| UpstreamError::Connect(e.to_string()))?;

        let status = response.status();
        tracing::info!(status = status.as_u16(), "upstream responded");
        let response_headers = response.headers().clone();
        let stream = response.bytes_stream().map(|r| r.map_err(std::io::Error::other));

        let mut builder = Response::builder().status(status);
        if let Some(h) = builder.headers_mut() {
            *h = response_headers;
        }
        Ok(builder.body(Body::from_stream(stream)).expect("upstream status/headers are always valid"))
    }
}
