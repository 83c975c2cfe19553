//! Built-in applications.
//!
//! Each application is an axum [`Router`] adapted to the pool's handler
//! contract. Applications are looked up by name when a worker loads its
//! handler, so an unknown name surfaces as a handler-load failure.

use axum::body::Bytes;
use axum::http::{Method, StatusCode, Uri};
use axum::routing::get;
use axum::{Json, Router};
use drover_pool::{from_service, BoxError, HandlerFactory, ServiceHandler};
use serde_json::{json, Value};

/// Names accepted by [`AppFactory`].
pub const APPS: &[&str] = &["info", "echo"];

/// Build the router registered under `name`.
pub fn router(name: &str) -> Option<Router> {
    match name {
        "info" => Some(info()),
        "echo" => Some(echo()),
        _ => None,
    }
}

/// Loads the named application once per worker.
#[derive(Debug, Clone)]
pub struct AppFactory {
    name: String,
}

impl AppFactory {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl HandlerFactory for AppFactory {
    type Handler = ServiceHandler<Router>;

    fn load(&self) -> Result<Self::Handler, BoxError> {
        let router = router(&self.name).ok_or_else(|| {
            format!(
                "unknown application '{}' (available: {})",
                self.name,
                APPS.join(", ")
            )
        })?;
        Ok(from_service(router))
    }
}

/// Service description, health endpoint and JSON errors for unknown routes.
fn info() -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .fallback(not_found_handler)
}

/// Describes the service and the worker thread that answered.
async fn index_handler() -> Json<Value> {
    Json(json!({
        "service": "drover",
        "version": env!("CARGO_PKG_VERSION"),
        "pid": std::process::id(),
        "worker": std::thread::current().name(),
    }))
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn not_found_handler() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "detail": "Not Found" })))
}

/// Echoes every request back as JSON.
fn echo() -> Router {
    Router::new().fallback(echo_handler)
}

async fn echo_handler(method: Method, uri: Uri, body: Bytes) -> Json<Value> {
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "body": String::from_utf8_lossy(&body),
    }))
}
