//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Invocations and fatal conditions produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Invocation ID flows through request and crash logs
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
