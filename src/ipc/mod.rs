pub mod handlers;

use anyhow::Result;
use axum::{
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::lifecycle::LifecycleCoordinator;
use handlers::{connector, definition, extension, instance};

/// IPC Server State
#[derive(Clone)]
pub struct IPCServer {
    pub coordinator: Arc<LifecycleCoordinator>,
    pub listen_addr: String,
    /// 프로세스 종료 신호. 요청별 토큰은 여기서 파생된다.
    pub shutdown: CancellationToken,
}

impl IPCServer {
    pub fn new(
        coordinator: Arc<LifecycleCoordinator>,
        listen_addr: &str,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            coordinator,
            listen_addr: listen_addr.to_string(),
            shutdown,
        }
    }

    /// 요청 하나 동안 유효한 취소 토큰
    pub fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/plugins/definitions", get(definition::list_definitions))
            .route(
                "/api/connectors",
                get(connector::list_connectors).post(connector::create_connector),
            )
            .route(
                "/api/connector/:id",
                patch(connector::update_connector).delete(connector::delete_connector),
            )
            .route(
                "/api/extensions",
                get(extension::list_extensions).post(extension::create_extension),
            )
            .route(
                "/api/extension/:id",
                patch(extension::update_extension).delete(extension::delete_extension),
            )
            .route("/api/extension/:id/toggle", post(extension::toggle_extension))
            .route("/api/instances", get(instance::list_instances))
            .route("/api/instance/:id", get(instance::get_instance))
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    pub async fn start(self) -> Result<()> {
        tracing::info!("IPC HTTP server starting on {}", self.listen_addr);

        let router = self.router();
        let listener = tokio::net::TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("IPC listening on http://{}", self.listen_addr);

        let shutdown = self.shutdown.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        tracing::info!("IPC server stopped");
        Ok(())
    }
}
