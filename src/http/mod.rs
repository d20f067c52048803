//! HTTP invocation subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, timeout + trace layers)
//!     → request.rs (invocation ID)
//!     → LatestResponse::begin (crash responder can reach this request)
//!     → function.rs (user function, spawned)
//!     → response.rs (function result, error or crash response)
//!     → Send to client
//! ```

pub mod function;
pub mod request;
pub mod response;
pub mod server;

pub use function::{Echo, Function, FunctionError, Invocation};
pub use request::X_REQUEST_ID;
pub use response::FUNCTION_STATUS_HEADER;
pub use server::InvocationServer;
