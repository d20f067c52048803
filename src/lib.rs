//! Function host with crash and termination handling.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::HostConfig;
pub use http::InvocationServer;
pub use lifecycle::{Condition, ErrorHandlerRegistry};
