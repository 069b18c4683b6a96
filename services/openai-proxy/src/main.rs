//! Sourcegraph OpenAI proxy
//!
//! Single-binary Rust service that:
//! 1. Exposes an OpenAI-compatible chat-completions API
//! 2. Services requests through Sourcegraph's streaming completions endpoint
//! 3. Rotates a pool of session cookies on rate limits and auth failures
//! 4. Re-emits the upstream stream as OpenAI SSE chunks or one aggregate

mod auth;
mod config;
mod error;
mod metrics;
mod openai;
mod registry;
mod relay;
mod tokenizer;
mod translate;

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use axum::routing::{get, post};
use common::Secret;
use futures_util::StreamExt;
use metrics_exporter_prometheus::PrometheusHandle;
use sourcegraph::{CompletionTransport, HttpTransport};
use sourcegraph_pool::CredentialPool;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::openai::{ChatCompletionRequest, ModelList};
use crate::relay::{Relay, RequestPlan};

/// Upper bound on draining in-flight requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    relay: Arc<Relay>,
    pool: Arc<CredentialPool>,
    pub(crate) api_secrets: Arc<Vec<Secret<String>>>,
    prometheus: PrometheusHandle,
    started_at: Instant,
    requests_total: Arc<AtomicU64>,
}

/// Build the axum router with all routes and shared state.
///
/// The `/v1/*` routes sit behind the API-secret middleware; `/health` and
/// `/metrics` are open. A concurrency limit layer enforces
/// `max_connections` across everything.
fn build_router(state: AppState, max_connections: usize) -> Router {
    let api = Router::new()
        .route("/v1/chat/completions", post(chat_completions_handler))
        .route("/v1/models", get(models_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_secret,
        ));

    Router::new()
        .merge(api)
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting sourcegraph-openai-proxy");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        upstream = %config.upstream.base_url,
        cookies = config.cookies.len(),
        api_secrets = config.api_secrets.len(),
        models = registry::list().count(),
        "configuration loaded"
    );

    let pool = Arc::new(CredentialPool::new(config.cookies.clone()));
    let transport: Arc<dyn CompletionTransport> = Arc::new(
        HttpTransport::new(
            config.upstream.base_url.clone(),
            config.upstream_timeout(),
            config.upstream.proxy_url.as_deref(),
        )
        .context("failed to build upstream transport")?,
    );
    let relay = Arc::new(Relay::new(pool.clone(), transport, config.cooldown()));

    let state = AppState {
        relay,
        pool,
        api_secrets: Arc::new(config.api_secrets),
        prometheus: prometheus_handle,
        started_at: Instant::now(),
        requests_total: Arc::new(AtomicU64::new(0)),
    };

    let app = build_router(state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;

    info!(addr = %listen_addr, "accepting requests");

    // Graceful shutdown with drain timeout enforcement:
    // 1. shutdown_signal() fires on SIGTERM/SIGINT
    // 2. axum stops accepting new connections and drains in-flight requests
    // 3. DRAIN_TIMEOUT bounds the drain so a slow stream cannot block exit
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// `POST /v1/chat/completions` — streaming or aggregated per the request's
/// `stream` flag.
async fn chat_completions_handler(
    State(state): State<AppState>,
    axum::Json(request): axum::Json<ChatCompletionRequest>,
) -> Response {
    let started = Instant::now();
    state.requests_total.fetch_add(1, Ordering::Relaxed);

    let plan = match RequestPlan::from_request(&request) {
        Ok(plan) => plan,
        Err(err) => {
            metrics::record_request(
                err.status().as_u16(),
                "chat_completions",
                started.elapsed().as_secs_f64(),
            );
            return err.into_response();
        }
    };

    if request.stream {
        // The relay feeds serialized payloads into the channel; failures after
        // the response has committed arrive as in-stream error events.
        let (tx, rx) = mpsc::channel::<String>(32);
        let relay = state.relay.clone();
        tokio::spawn(async move {
            relay.stream(plan, tx).await;
        });
        metrics::record_request(200, "chat_completions", started.elapsed().as_secs_f64());
        let stream =
            ReceiverStream::new(rx).map(|data| Ok::<_, Infallible>(Event::default().data(data)));
        Sse::new(stream).into_response()
    } else {
        match state.relay.complete(&plan).await {
            Ok(response) => {
                metrics::record_request(200, "chat_completions", started.elapsed().as_secs_f64());
                axum::Json(response).into_response()
            }
            Err(err) => {
                metrics::record_request(
                    err.status().as_u16(),
                    "chat_completions",
                    started.elapsed().as_secs_f64(),
                );
                err.into_response()
            }
        }
    }
}

/// `GET /v1/models` — the static registry as an OpenAI model list.
async fn models_handler() -> axum::Json<ModelList> {
    axum::Json(ModelList::from_names(registry::list().map(String::from)))
}

/// Health endpoint: pool status, uptime, requests served. Returns 200 while
/// at least one cookie is usable, 503 otherwise.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let pool_status = state.pool.status().await;
    let status_code = if pool_status["status"] == "unhealthy" {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    } else {
        axum::http::StatusCode::OK
    };

    let body = serde_json::json!({
        "status": pool_status["status"],
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "requests_served": state.requests_total.load(Ordering::Relaxed),
        "pool": pool_status,
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint — returns metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
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
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use sourcegraph::{CompletionPayload, EventStream, StreamEvent};
    use std::future::Future;
    use std::pin::Pin;
    use tower::ServiceExt;

    /// Transport that replays the same scripted events on every call.
    struct FixedTransport {
        events: Vec<StreamEvent>,
    }

    impl CompletionTransport for FixedTransport {
        fn open_stream<'a>(
            &'a self,
            _payload: &'a CompletionPayload,
            _cookie: &'a str,
        ) -> Pin<Box<dyn Future<Output = sourcegraph::Result<EventStream>> + Send + 'a>> {
            let events = self.events.clone();
            Box::pin(async move {
                let stream = futures_util::stream::iter(events.into_iter().map(Ok));
                Ok(Box::pin(stream) as EventStream)
            })
        }
    }

    fn ev(data: &str) -> StreamEvent {
        StreamEvent {
            status: 200,
            data: data.to_string(),
        }
    }

    /// Create a PrometheusHandle for tests without installing a global
    /// recorder — only one global recorder can exist per process.
    fn test_prometheus_handle() -> PrometheusHandle {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        recorder.handle()
    }

    fn test_state(events: Vec<StreamEvent>, api_secrets: Vec<Secret<String>>) -> AppState {
        let pool = Arc::new(CredentialPool::new(vec![Secret::new(
            "sgp_test_cookie_0001".to_string(),
        )]));
        let transport: Arc<dyn CompletionTransport> = Arc::new(FixedTransport { events });
        let relay = Arc::new(Relay::new(
            pool.clone(),
            transport,
            Duration::from_secs(600),
        ));
        AppState {
            relay,
            pool,
            api_secrets: Arc::new(api_secrets),
            prometheus: test_prometheus_handle(),
            started_at: Instant::now(),
            requests_total: Arc::new(AtomicU64::new(0)),
        }
    }

    fn completion_events() -> Vec<StreamEvent> {
        vec![
            ev(r#"{"deltaText":"Hel"}"#),
            ev(r#"{"deltaText":"lo"}"#),
            ev(r#"{"stopReason":"end_turn"}"#),
        ]
    }

    fn chat_request(model: &str, stream: bool) -> Request<Body> {
        let body = serde_json::json!({
            "model": model,
            "messages": [{"role": "user", "content": "hi"}],
            "stream": stream,
        });
        Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        String::from_utf8_lossy(&bytes).to_string()
    }

    #[tokio::test]
    async fn health_reports_pool_status() {
        let app = build_router(test_state(vec![], vec![]), 16);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["pool"]["cookies_total"], 1);
    }

    #[tokio::test]
    async fn models_lists_the_registry() {
        let app = build_router(test_state(vec![], vec![]), 16);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/models")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["object"], "list");
        assert_eq!(body["data"].as_array().unwrap().len(), 12);
    }

    #[tokio::test]
    async fn chat_completion_aggregates_stream() {
        let app = build_router(test_state(completion_events(), vec![]), 16);
        let response = app.oneshot(chat_request("gpt-4o", false)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["object"], "chat.completion");
        assert_eq!(body["choices"][0]["message"]["content"], "Hello");
        assert_eq!(body["choices"][0]["finish_reason"], "stop");
        assert!(body["usage"]["total_tokens"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn chat_completion_streams_sse() {
        let app = build_router(test_state(completion_events(), vec![]), 16);
        let response = app.oneshot(chat_request("gpt-4o", true)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("text/event-stream"), "{content_type}");

        let body = body_string(response).await;
        assert!(body.contains(r#""object":"chat.completion.chunk""#), "{body}");
        assert!(body.contains("Hel"));
        assert!(body.contains(r#""finish_reason":"stop""#));
        assert!(body.contains("[DONE]"));
    }

    #[tokio::test]
    async fn unknown_model_is_rejected_with_envelope() {
        let app = build_router(test_state(vec![], vec![]), 16);
        let response = app
            .oneshot(chat_request("claude-9000", false))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["error"]["code"], "model_not_found");
    }

    #[tokio::test]
    async fn api_secret_required_when_configured() {
        let state = test_state(vec![], vec![Secret::new("s3cret".to_string())]);
        let app = build_router(state, 16);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/models")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["error"]["code"], "invalid_authorization");
    }

    #[tokio::test]
    async fn api_secret_accepted_as_bearer() {
        let state = test_state(vec![], vec![Secret::new("s3cret".to_string())]);
        let app = build_router(state, 16);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/models")
                    .header("authorization", "Bearer s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_is_open_even_with_secret_configured() {
        let state = test_state(vec![], vec![Secret::new("s3cret".to_string())]);
        let app = build_router(state, 16);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_text() {
        let app = build_router(test_state(vec![], vec![]), 16);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("text/plain"));
    }
}
