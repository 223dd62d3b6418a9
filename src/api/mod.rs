//! HTTP API server for the hearth gateway

pub mod health;
pub mod preferences;
pub mod sessions;
pub mod websocket;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::session::SessionManager;
use crate::settings::SettingsStore;
use crate::Result;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub manager: SessionManager,
    pub settings: Arc<SettingsStore>,
}

/// API errors rendered as `{"error": {"code", "message"}}`
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<crate::Error> for ApiError {
    fn from(e: crate::Error) -> Self {
        match e {
            crate::Error::SessionNotFound(_) => Self::NotFound(e.to_string()),
            crate::Error::RoomBusy(_) => Self::Conflict(e.to_string()),
            crate::Error::InvalidInput(_) | crate::Error::Serialization(_) => Self::BadRequest(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "room_busy", msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    manager: SessionManager,
    settings: Arc<SettingsStore>,
    port: u16,
    static_dir: Option<PathBuf>,
}

impl ApiServerBuilder {
    #[must_use]
    pub const fn new(manager: SessionManager, settings: Arc<SettingsStore>) -> Self {
        Self {
            manager,
            settings,
            port: 18800,
            static_dir: None,
        }
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Serve a room dashboard from this directory
    #[must_use]
    pub fn static_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.static_dir = dir;
        self
    }

    #[must_use]
    pub fn build(self) -> ApiServer {
        ApiServer {
            state: Arc::new(ApiState {
                manager: self.manager,
                settings: self.settings,
            }),
            port: self.port,
            static_dir: self.static_dir,
        }
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
    static_dir: Option<PathBuf>,
}

impl ApiServer {
    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .nest("/api/sessions", sessions::router(self.state.clone()))
            .nest("/api/rooms", sessions::rooms_router(self.state.clone()))
            .nest("/api/settings", preferences::router(self.state.clone()))
            .nest("/ws", websocket::router(self.state.clone()))
            .merge(health::router(self.state.clone()));

        if let Some(static_dir) = &self.static_dir {
            let index_file = static_dir.join("index.html");
            let serve_dir = ServeDir::new(static_dir).not_found_service(ServeFile::new(&index_file));
            router = router.fallback_service(serve_dir);
            tracing::info!(path = %static_dir.display(), "serving static files");
        }

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_status() {
        let status = |e: crate::Error| ApiError::from(e).into_response().status();

        assert_eq!(status(crate::Error::RoomBusy("den".into())), StatusCode::CONFLICT);
        assert_eq!(status(crate::Error::SessionNotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(crate::Error::InvalidInput("empty".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(crate::Error::Config("bad".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
