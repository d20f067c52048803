//! Fatal conditions the host reacts to.

use std::fmt;
use std::str::FromStr;

use crate::lifecycle::FatalError;

/// One of the five terminal or signal conditions the registry dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    /// A panic escaped all handlers.
    UncaughtException,
    /// A watched asynchronous task failed with nobody to handle it.
    UnhandledRejection,
    /// The process is exiting with an explicit code.
    ProcessExit,
    /// SIGINT (Ctrl+C).
    Interrupt,
    /// SIGTERM.
    Terminate,
}

impl Condition {
    /// Every recognized condition, in dispatch-table order.
    pub const ALL: [Condition; 5] = [
        Condition::UncaughtException,
        Condition::UnhandledRejection,
        Condition::ProcessExit,
        Condition::Interrupt,
        Condition::Terminate,
    ];

    /// Canonical name used in logs, metrics labels and config.
    pub fn name(&self) -> &'static str {
        match self {
            Condition::UncaughtException => "uncaughtException",
            Condition::UnhandledRejection => "unhandledRejection",
            Condition::ProcessExit => "exit",
            Condition::Interrupt => "SIGINT",
            Condition::Terminate => "SIGTERM",
        }
    }

    /// Whether the finalize action for this condition is a crash response.
    pub fn is_crash(&self) -> bool {
        matches!(self, Condition::UncaughtException | Condition::UnhandledRejection)
    }

    /// Exit status for a signal-forced exit (`128 + signo`), if this
    /// condition is a signal.
    pub fn signal_exit_code(&self) -> Option<i32> {
        match self {
            Condition::Interrupt => Some(130),
            Condition::Terminate => Some(143),
            _ => None,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unrecognized condition name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown condition `{0}`")]
pub struct UnknownCondition(pub String);

impl FromStr for Condition {
    type Err = UnknownCondition;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Condition::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| UnknownCondition(s.to_string()))
    }
}

/// A delivered occurrence of a condition, with its payload.
#[derive(Debug, Clone)]
pub enum FatalEvent {
    UncaughtException(FatalError),
    UnhandledRejection(FatalError),
    ProcessExit(i32),
    Interrupt,
    Terminate,
}

impl FatalEvent {
    /// The condition this event fires.
    pub fn condition(&self) -> Condition {
        match self {
            FatalEvent::UncaughtException(_) => Condition::UncaughtException,
            FatalEvent::UnhandledRejection(_) => Condition::UnhandledRejection,
            FatalEvent::ProcessExit(_) => Condition::ProcessExit,
            FatalEvent::Interrupt => Condition::Interrupt,
            FatalEvent::Terminate => Condition::Terminate,
        }
    }
}
