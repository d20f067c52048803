//! The error value carried by crash conditions.

use std::any::Any;
use std::fmt;

/// Describes a fault that is about to take the process down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalError {
    message: String,
    location: Option<String>,
}

impl FatalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
        }
    }

    /// Attach the source location the fault was raised at.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Build from a panic payload as handed to a panic hook or `catch_unwind`.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        Self::new(panic_message(payload))
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for FatalError {}

/// Extract the human readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}
