use std::sync::Arc;

use anyhow::Result;
use axum::{
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use storywatch_common::Config;

mod rest;

pub struct AppState {
    pub config: Config,
}

/// `LOG_LEVEL` wins over `RUST_LOG`; `LOG_FORMAT=json` for structured output.
fn init_logging() -> Result<()> {
    let filter = match std::env::var("LOG_LEVEL") {
        Ok(level) if !level.trim().is_empty() => EnvFilter::try_new(level.trim())?,
        _ => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt()
            .json()
            .with_current_span(true)
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let config = Config::from_env()?;
    config.log_redacted();

    let addr = format!("{}:{}", config.web_host, config.web_port);
    let state = Arc::new(AppState { config });

    let app = Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/health", get(rest::health))
        .route("/fetch", post(rest::fetch))
        .route("/fetch/all", post(rest::fetch_all))
        .with_state(state)
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        // Method and path only; request bodies never reach the logs.
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        );

    info!("Story metrics trigger listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
