//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Fatal conditions (registry.rs):
//!     panic / watched-task failure / exit / SIGINT / SIGTERM
//!     → FatalReporter (reporter.rs) → dispatcher
//!     → custom handlers → finalize
//!
//! Crash finalize (crash.rs):
//!     CrashReport → 500 to the latest invocation (latest.rs) → exit callback
//!
//! Signal finalize (shutdown.rs):
//!     ServerHandle::close → drain in-flight → exit 0
//! ```
//!
//! # Design Decisions
//! - Crash exits use a reserved code, never 0, 1 or 101
//! - Termination is single-assignment (termination.rs)
//! - A repeated SIGINT/SIGTERM exits at once with `128 + signo`
//! - Shutdown has timeout: close resolves after the drain deadline

pub mod condition;
pub mod crash;
pub mod fatal;
pub mod latest;
pub mod registry;
pub mod reporter;
pub mod shutdown;
pub mod signals;
pub mod termination;

pub use condition::{Condition, FatalEvent, UnknownCondition};
pub use crash::{CrashError, CrashReport, CrashResponder, ExitCallback, HttpCrashResponder};
pub use fatal::FatalError;
pub use latest::{InFlight, LatestResponse, PendingResponse};
pub use registry::{
    ErrorHandlerRegistry, FanOutError, HandlerError, HandlerFailure, RegistryError, RegistryOptions,
};
pub use reporter::FatalReporter;
pub use shutdown::{ServerControl, ServerHandle, Shutdown};
pub use termination::{ProcessTerminator, TerminationPhase, TerminationState, Terminator};
