//! OS signal handling.
//!
//! # Responsibilities
//! - Listen for SIGINT and SIGTERM
//! - Translate them into fatal events for the dispatcher
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Every delivery goes to the sink; the registry decides whether a repeat
//!   forces an immediate exit

use tokio::task::JoinHandle;

use crate::lifecycle::condition::FatalEvent;

/// Receives each signal delivery. Returning `false` stops the listener.
pub type SignalSink = Box<dyn Fn(FatalEvent) -> bool + Send + 'static>;

/// Install SIGINT/SIGTERM listeners and forward each delivery to `sink`.
///
/// Must be called from within a Tokio runtime.
#[cfg(unix)]
pub fn spawn_signal_listeners(sink: SignalSink) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                Some(()) = sigint.recv() => FatalEvent::Interrupt,
                Some(()) = sigterm.recv() => FatalEvent::Terminate,
                else => break,
            };
            if !sink(event) {
                break;
            }
        }
    }))
}

#[cfg(not(unix))]
pub fn spawn_signal_listeners(sink: SignalSink) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !sink(FatalEvent::Interrupt) {
                break;
            }
        }
    }))
}
