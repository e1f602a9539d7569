use serde::{Deserialize, Serialize};
use std::fmt;

/// Single structured error shape used across both refmark crates.
///
/// Errors carry a stable SCREAMING_SNAKE `code` so callers (and the app
/// shell) can branch on failure class without parsing messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub retryable: bool,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

/// Warning-level signal for conditions that must not abort the operation.
///
/// The main producer is best-effort persistence: a failed storage write
/// keeps the in-memory highlight set authoritative for the session and
/// surfaces as a `StoreWarning` in the mutation outcome instead of an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreWarning {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

impl StoreWarning {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}
