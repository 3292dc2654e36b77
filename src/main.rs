use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use tracing::info;

mod classifier;
mod config;
mod decision;
mod error;
mod proxy;
mod request;
mod request_id;
mod signal;

pub use config::Config;

const CLASSIFIER_CACHE_CAPACITY: usize = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "semantic_router=info,tower_http=warn".into()),
        )
        .init();

    let config_path = std::env::var("SEMANTIC_ROUTER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/semantic-router/config.toml"));

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(port = config.gateway.port, "semantic-router starting");

    let config = Arc::new(config);
    let completion = build_completion();
    let state = Arc::new(proxy::AppState::new(Arc::clone(&config), completion)?);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.gateway.port).parse()?;
    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let trace_layer = tower_http::trace::TraceLayer::new_for_http()
        .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
        .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO));

    let app = axum::Router::new()
        .fallback(proxy::fallback_handler)
        .with_state(state)
        .layer(tower_http::catch_panic::CatchPanicLayer::new())
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(trace_layer);

    tokio::select! {
        result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()) => {
            result.context("server error")?;
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}

#[cfg(feature = "local-inference")]
fn build_completion() -> Arc<dyn classifier::Completion> {
    Arc::new(classifier::llama::LlamaCompletion::new(CLASSIFIER_CACHE_CAPACITY))
}

#[cfg(not(feature = "local-inference"))]
fn build_completion() -> Arc<dyn classifier::Completion> {
    Arc::new(classifier::StubCompletion::new(""))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
