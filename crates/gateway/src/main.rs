//! ChunkForge API Gateway
//!
//! HTTP surface of the pipeline.
//! Handles:
//! - Bucket ingestion into per-method collections
//! - Similarity query and retrieval-augmented chat
//! - Collection listing, health and readiness
//! - Observability (logging, metrics, request ids)

mod handlers;
mod middleware;
mod state;

use anyhow::Context;
use axum::{
    http::Request,
    routing::{get, post},
    Router,
};
use chunkforge_common::{
    config::{AppConfig, ObservabilityConfig},
    metrics::{self, EMBEDDING_BUCKETS, INGESTION_BUCKETS, LATENCY_BUCKETS},
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, warn, Span};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("failed to load configuration")?;
    init_tracing(&config.observability);

    info!("Starting ChunkForge API Gateway v{}", chunkforge_common::VERSION);

    init_metrics(&config.observability)?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;

    let state = AppState::from_config(config)?;
    info!(
        embedding_model = %state.config.embedding.model,
        vector_store = %state.config.vector_store.url,
        "Pipeline ready"
    );

    let app = create_router(state)?;

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.json_logging {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    info!(service = %config.service_name, level = %config.log_level, "Tracing initialized");
}

/// Root span of every HTTP request, tagged with the configured service name
fn request_span<B>(service: &str, request: &Request<B>) -> Span {
    info_span!(
        "request",
        service = %service,
        method = %request.method(),
        uri = %request.uri(),
    )
}

fn init_metrics(config: &ObservabilityConfig) -> anyhow::Result<()> {
    if config.metrics_port == 0 {
        warn!("Metrics exporter disabled");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], config.metrics_port)))
        .set_buckets_for_metric(Matcher::Full(metrics::EMBEDDING_DURATION.to_string()), EMBEDDING_BUCKETS)?
        .set_buckets_for_metric(Matcher::Full(metrics::INGESTION_DURATION.to_string()), INGESTION_BUCKETS)?
        .set_buckets_for_metric(Matcher::Full(metrics::REQUEST_DURATION.to_string()), LATENCY_BUCKETS)?
        .set_buckets_for_metric(Matcher::Full(metrics::QUERY_DURATION.to_string()), LATENCY_BUCKETS)?
        .install()
        .context("failed to install Prometheus exporter")?;

    metrics::register_metrics();
    info!(port = config.metrics_port, "Metrics exporter listening");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> chunkforge_common::Result<Router> {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let timeout = TimeoutLayer::new(state.config.request_timeout());
    let rate_limit = state.config.rate_limit.clone();
    let service_name = state.config.observability.service_name.clone();
    let trace = TraceLayer::new_for_http()
        .make_span_with(move |request: &Request<axum::body::Body>| request_span(&service_name, request));

    let mut router = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .route("/process-bucket", post(handlers::ingest::process_bucket))
        .route("/process-gcs", post(handlers::ingest::process_bucket))
        .route("/query", post(handlers::search::query))
        .route("/chat", post(handlers::search::chat))
        .route("/collections", get(handlers::search::list_collections))
        .route_layer(axum::middleware::from_fn(middleware::metrics::track_requests))
        .with_state(state);

    if rate_limit.enabled {
        let limiter = middleware::rate_limit::create_rate_limiter(&rate_limit)?;
        router = router.layer(axum::middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit::rate_limit_middleware,
        ));
    }

    Ok(router
        .layer(timeout)
        .layer(trace)
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        extract::Path,
        http::{Request, StatusCode},
        Json,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn fake_bucket() -> String {
        let app = Router::new()
            .route(
                "/storage/v1/b/{bucket}/o",
                get(|| async {
                    Json(json!({
                        "items": [
                            {"name": "notes/cats.txt"},
                            {"name": "notes/rockets.txt"},
                            {"name": "notes/cover.jpg"}
                        ]
                    }))
                }),
            )
            .route(
                "/storage/v1/b/{bucket}/o/{object}",
                get(|Path((_, object)): Path<(String, String)>| async move {
                    match object.as_str() {
                        "notes/cats.txt" => "Cats purr and chase mice around the house.",
                        _ => "Rockets burn fuel to reach orbit around the earth.",
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn test_config(gcs_endpoint: String) -> AppConfig {
        let mut config = AppConfig::default();
        config.embedding.provider = "mock".to_string();
        config.embedding.dimension = 128;
        config.vector_store.provider = "memory".to_string();
        config.generation.provider = "echo".to_string();
        config.storage.gcs_endpoint = gcs_endpoint;
        config
    }

    fn app(config: AppConfig) -> Router {
        create_router(AppState::from_config(config).unwrap()).unwrap()
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(test_config("http://127.0.0.1:1".to_string()));
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "rag_pipeline");

        let (status, body) = send(&app, "GET", "/ready", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
    }

    #[tokio::test]
    async fn test_ingest_then_query_and_chat() {
        let app = app(test_config(fake_bucket().await));

        let (status, body) = send(
            &app,
            "POST",
            "/process-bucket",
            Some(json!({"bucket_name": "library", "folder_path": "notes/"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["status"], "success");
        assert_eq!(body["method"], "char-split");
        assert_eq!(body["chunking"]["total_files"], 2);
        assert_eq!(body["chunking"]["total_chunks"], 2);
        assert_eq!(body["embedding"]["collection_name"], "char-split-collection");
        assert_eq!(body["embedding"]["total_inserted"], 2);

        let (status, body) = send(
            &app,
            "POST",
            "/query",
            Some(json!({"query": "cats purr", "n_results": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["results"]["documents"].as_array().unwrap().len(), 1);
        assert_eq!(body["results"]["metadatas"][0]["source"], "cats");
        assert_eq!(body["results"]["metadatas"][0]["bucket"], "library");

        let (status, body) = send(&app, "POST", "/chat", Some(json!({"query": "what purrs?"}))).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["context_chunks_count"], 2);
        assert!(body["response"].as_str().unwrap().starts_with("[echo]"));

        let (status, body) = send(&app, "GET", "/collections", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["collections"][0]["name"], "char-split-collection");
    }

    #[tokio::test]
    async fn test_query_before_ingestion_is_not_found() {
        let app = app(test_config("http://127.0.0.1:1".to_string()));
        let (status, _) = send(
            &app,
            "POST",
            "/query",
            Some(json!({"query": "anything", "method": "semantic-split"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rejects_bad_requests() {
        let app = app(test_config("http://127.0.0.1:1".to_string()));

        let (status, _) = send(&app, "POST", "/query", Some(json!({"query": ""}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "POST",
            "/query",
            Some(json!({"query": "hello", "method": "word-split"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "POST",
            "/chat",
            Some(json!({"query": "hello", "n_results": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_process_gcs_alias() {
        let app = app(test_config(fake_bucket().await));

        let (status, body) = send(
            &app,
            "POST",
            "/process-gcs",
            Some(json!({"bucket_name": "library", "folder_path": "notes/", "method": "recursive-split"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["embedding"]["collection_name"], "recursive-split-collection");
        assert_eq!(body["chunking"]["processed_files"], 2);
    }

    #[tokio::test]
    async fn test_n_results_bounded_by_configured_max() {
        let app = app(test_config(fake_bucket().await));
        let (status, _) = send(
            &app,
            "POST",
            "/process-bucket",
            Some(json!({"bucket_name": "library", "folder_path": "notes/"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            &app,
            "POST",
            "/query",
            Some(json!({"query": "cats", "n_results": 150})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut config = test_config(fake_bucket().await);
        config.search.max_results = 200;
        let app = self::app(config);
        let (status, _) = send(
            &app,
            "POST",
            "/process-bucket",
            Some(json!({"bucket_name": "library", "folder_path": "notes/"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &app,
            "POST",
            "/query",
            Some(json!({"query": "cats", "n_results": 150})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["results"]["documents"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_request_span_carries_service_name() {
        #[derive(Clone, Default)]
        struct Capture(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

        impl std::io::Write for Capture {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let request = Request::builder().uri("/query").body(()).unwrap();
        tracing::subscriber::with_default(subscriber, || {
            let span = request_span("docs_pipeline", &request);
            let _entered = span.enter();
            info!("handled");
        });

        let output = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("service=docs_pipeline"), "{}", output);
        assert!(output.contains("uri=/query"), "{}", output);
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_over_burst() {
        let mut config = test_config("http://127.0.0.1:1".to_string());
        config.rate_limit.enabled = true;
        config.rate_limit.requests_per_second = 1;
        config.rate_limit.burst = 1;
        let app = app(config);

        let (status, _) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }
}
