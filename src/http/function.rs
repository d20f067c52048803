//! The user function hosted by the server.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::Request,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use uuid::Uuid;

/// Error a function returns to signal a failed (but not fatal) invocation.
pub type FunctionError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A single call of the hosted function.
#[derive(Debug)]
pub struct Invocation {
    pub id: Uuid,
    pub request: Request<Body>,
}

impl Invocation {
    pub fn new(id: Uuid, request: Request<Body>) -> Self {
        Self { id, request }
    }
}

/// A function the host invokes once per HTTP request.
///
/// Panics escape to the crash handling machinery; `Err` becomes a 500.
#[async_trait]
pub trait Function: Send + Sync + 'static {
    async fn invoke(&self, invocation: Invocation) -> Result<Response, FunctionError>;
}

/// Echoes the request back as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

#[async_trait]
impl Function for Echo {
    async fn invoke(&self, invocation: Invocation) -> Result<Response, FunctionError> {
        let (parts, body) = invocation.request.into_parts();
        let bytes = axum::body::to_bytes(body, 1024 * 1024).await?;

        Ok(Json(json!({
            "invocation_id": invocation.id,
            "method": parts.method.as_str(),
            "path": parts.uri.path(),
            "body": String::from_utf8_lossy(&bytes),
        }))
        .into_response())
    }
}
