//! REST API server for the job runtime

pub mod jobs;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use jobs::JobService;

/// Create the REST API application router around an existing service
pub fn create_app_with_service(service: Arc<JobService>) -> Router {
    Router::new()
        .route("/up", get(health_check))
        .nest("/jobs", jobs::routes())
        .layer(Extension(service))
        .layer(TraceLayer::new_for_http())
}

/// Health check handler
async fn health_check() -> &'static str {
    "OK"
}

/// Serve the API until `shutdown` resolves.
pub async fn serve<F>(addr: SocketAddr, service: Arc<JobService>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_app_with_service(service);

    info!("Starting REST API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
