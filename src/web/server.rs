use super::api::{get_usage, health_check, AppState};
use super::interceptor::access_interceptor;
use crate::config::WebConfig;
use axum::{middleware, routing::get, Router};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// API routes behind the access interceptor, plus an unmetered health check.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/api/usage/:instance", get(get_usage))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            access_interceptor,
        ))
        .with_state(state);

    Router::new()
        .route("/health", get(health_check))
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` is cancelled.
pub async fn run_server(
    state: AppState,
    web_config: WebConfig,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&web_config.listen).await?;
    tracing::info!("Web server listening on {}", web_config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!("Web server shutting down gracefully");
        })
        .await?;

    Ok(())
}
