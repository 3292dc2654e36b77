//! Error taxonomy for the request pipeline.
//!
//! Two families exist, matching the split in the original design: faults
//! that reach the client ([`RequestError`], [`UpstreamError`]) and faults
//! that are swallowed internally with the affected signal simply omitted
//! ([`ClassifierError`]). Only the first family implements an HTTP mapping;
//! the second is logged at the call site and never reaches axum.

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::Response;

/// C4 (request parser) faults. Both variants answer the client identically
/// today — `500` by default, `"Bad Gateway"` body — a known quirk of the
/// original implementation preserved here; see [`crate::config::GatewayConfig::legacy_parse_status`].
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unsupported payload shape")]
    UnsupportedPayload,
}

impl RequestError {
    pub fn into_response(self, legacy_parse_status: bool) -> Response {
        tracing::warn!(error = %self, "request parse failure");
        let status = if legacy_parse_status { StatusCode::INTERNAL_SERVER_ERROR } else { StatusCode::BAD_REQUEST };
        bad_gateway_body(status)
    }
}

/// C5 (proxy core) upstream faults: connect, read, or timeout.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream connect/read error: {0}")]
    Connect(String),
    #[error("upstream request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl UpstreamError {
    pub fn into_response(self) -> Response {
        tracing::warn!(error = %self, "upstream request failed");
        bad_gateway_body(StatusCode::BAD_GATEWAY)
    }
}

fn bad_gateway_body(status: StatusCode) -> Response {
    Response::builder()
        .status(status)
        .header(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from("Bad Gateway"))
        .expect("static response is always well-formed")
}

/// C1/C2 faults: classifier loading and signal computation. Never surfaced
/// to the client — the affected signal is omitted and the pipeline
/// continues (see `SPEC_FULL.md`'s C1/C2 sections).
#[derive(Debug, thiserror::Error, Clone)]
pub enum ClassifierError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),
    #[error("inference error: {0}")]
    Inference(String),
    #[error("failed to parse classifier output: {0}")]
    Parse(String),
    #[error("classifier misconfigured: {0}")]
    Config(String),
}
