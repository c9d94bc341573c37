pub mod auth;
pub mod config;
pub mod error;
pub mod eval_routes;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod store;
pub mod tenant;

use std::process;
use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::routing::{get, patch, post, put};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use self::config::{ServiceConfig, StorageBackend};
use self::error::ApiError;
use self::eval_routes::{handle_evaluate_all, handle_evaluate_one};
use self::metrics::{handle_metrics, track_metrics};
use self::routes::{
    handle_delete_flag, handle_delete_segment, handle_get_definitions, handle_health,
    handle_put_flag, handle_put_segment, handle_sync_env, handle_sync_flag, handle_update_flag,
};
use self::state::AppState;
use self::store::memory::MemoryBackend;
use self::store::sled_store::SledBackend;

/// Maximum concurrent in-flight evaluation requests; excess load is shed
/// with a 429 rather than queued without bound.
const EVAL_MAX_CONCURRENT_REQUESTS: usize = 256;

const MAX_BODY_BYTES: usize = 256 * 1024;

const REQUEST_TIMEOUT_SECONDS: u64 = 10;

/// Build the full service router over shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(&state.config.cors.origins);

    let eval_routes = Router::new()
        .route("/evaluate", post(handle_evaluate_all))
        .route("/evaluate/{flag_id}", post(handle_evaluate_one))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_eval_overload))
                .load_shed()
                .concurrency_limit(EVAL_MAX_CONCURRENT_REQUESTS),
        );

    let api_routes = Router::new()
        .route("/definitions", get(handle_get_definitions))
        .route("/flags", put(handle_put_flag))
        .route(
            "/flags/{flag_id}",
            patch(handle_update_flag).delete(handle_delete_flag),
        )
        .route(
            "/segments/{segment_id}",
            put(handle_put_segment).delete(handle_delete_segment),
        )
        .route("/sync", post(handle_sync_env))
        .route("/sync/{flag_id}", post(handle_sync_flag));

    Router::new()
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .merge(eval_routes)
        .nest("/api", api_routes)
        .layer(axum::middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(Duration::from_secs(REQUEST_TIMEOUT_SECONDS)))
        .layer(CompressionLayer::new())
        .with_state(state)
}

async fn handle_eval_overload(err: tower::BoxError) -> ApiError {
    if err.is::<tower::load_shed::error::Overloaded>() {
        ApiError::RateLimited
    } else {
        ApiError::Internal(err.to_string())
    }
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Run the server until a shutdown signal arrives.
pub async fn run_serve(config: ServiceConfig) {
    let backend: Arc<dyn store::DocumentBackend> = match config.server.storage {
        StorageBackend::Sled => match SledBackend::open(&config.server.data_dir) {
            Ok(backend) => Arc::new(backend),
            Err(e) => {
                tracing::error!(data_dir = %config.server.data_dir, error = %e, "failed to open storage");
                process::exit(1);
            }
        },
        StorageBackend::Memory => Arc::new(MemoryBackend::new()),
    };

    if config.auth.eval_tokens.is_empty() && config.auth.admin_tokens.is_empty() {
        tracing::warn!("no tokens configured, serving both surfaces unauthenticated");
    }

    let addr = format!("{}:{}", config.server.hostname, config.server.port);
    let state = Arc::new(AppState::new(config, backend));
    let app = create_router(state);

    tracing::info!(%addr, "flagstone listening");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind");
            process::exit(1);
        }
    };

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");

        #[cfg(unix)]
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }

        #[cfg(not(unix))]
        ctrl_c.await.ok();

        tracing::info!("shutdown signal received, finishing in-flight requests");
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!(error = %e, "server error");
        process::exit(1);
    }

    tracing::info!("server stopped");
}
