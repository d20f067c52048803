//! Responses the host writes on its own behalf.
//!
//! # Design Decisions
//! - Every host-generated failure carries `x-function-status`
//! - Error details in the body are opt-out (`crash.expose_error_details`)

use axum::{
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use crate::lifecycle::FatalError;

/// Header telling the caller why the host, not the function, answered.
pub const FUNCTION_STATUS_HEADER: &str = "x-function-status";

/// Why the host produced the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionStatus {
    /// The process is going down.
    Crash,
    /// The function returned an error.
    Error,
}

impl FunctionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionStatus::Crash => "crash",
            FunctionStatus::Error => "error",
        }
    }
}

fn failure(status: FunctionStatus, message: &str, expose_details: bool) -> Response {
    let body = if expose_details {
        format!("{}\n", message)
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
            .canonical_reason()
            .unwrap_or("Internal Server Error")
            .to_string()
    };
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [
            (
                HeaderName::from_static(FUNCTION_STATUS_HEADER),
                HeaderValue::from_static(status.as_str()),
            ),
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            ),
        ],
        body,
    )
        .into_response()
}

/// 500 describing a fatal condition.
pub fn crash_response(error: &FatalError, expose_details: bool) -> Response {
    failure(FunctionStatus::Crash, error.message(), expose_details)
}

/// 500 for a function that returned an error.
pub fn error_response(message: &str, expose_details: bool) -> Response {
    failure(FunctionStatus::Error, message, expose_details)
}
