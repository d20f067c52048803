//! Single-assignment termination state and the process exit seam.

use std::sync::atomic::{AtomicU8, Ordering};

/// Phase of the process-wide shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TerminationPhase {
    Running = 0,
    Terminating = 1,
    Terminated = 2,
}

impl TerminationPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TerminationPhase::Running,
            1 => TerminationPhase::Terminating,
            _ => TerminationPhase::Terminated,
        }
    }
}

/// Running → Terminating → Terminated, each transition taken at most once.
///
/// Only the first terminal event wins `try_begin`; every later one is a no-op,
/// so two reaction chains never run side by side.
#[derive(Debug)]
pub struct TerminationState {
    phase: AtomicU8,
}

impl TerminationState {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(TerminationPhase::Running as u8),
        }
    }

    pub fn phase(&self) -> TerminationPhase {
        TerminationPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Claim the shutdown. Returns `false` if another chain already owns it.
    pub fn try_begin(&self) -> bool {
        self.phase
            .compare_exchange(
                TerminationPhase::Running as u8,
                TerminationPhase::Terminating as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Mark the reaction chain as finished.
    pub fn complete(&self) {
        self.phase
            .store(TerminationPhase::Terminated as u8, Ordering::SeqCst);
    }
}

impl Default for TerminationState {
    fn default() -> Self {
        Self::new()
    }
}

/// Ends the process with a given exit code.
///
/// The production implementation never returns; test doubles record the code.
pub trait Terminator: Send + Sync {
    fn terminate(&self, code: i32);
}

/// Exits the real process via [`std::process::exit`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessTerminator;

impl Terminator for ProcessTerminator {
    fn terminate(&self, code: i32) {
        tracing::info!(exit_code = code, "Terminating process");
        std::process::exit(code);
    }
}
