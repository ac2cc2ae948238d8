use std::fmt;

use serde::{Deserialize, Serialize};

use crate::generation::types::TargetId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenErrorKind {
    MalformedRequest,
    Timeout,
    Transport,
    Overloaded,
    RetryBudgetExhausted,
    UnrepairableOutput,
    SchemaValidationFailed,
    Cancelled,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenError {
    pub kind: GenErrorKind,
    pub message: String,
    pub retryable: bool,
    pub target: Option<TargetId>,
    pub raw_text: Option<String>,
    pub diagnostics: Vec<String>,
    pub cause: Option<Box<GenError>>,
}

impl GenError {
    pub fn new(kind: GenErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: matches!(
                kind,
                GenErrorKind::Timeout | GenErrorKind::Transport | GenErrorKind::Overloaded
            ),
            target: None,
            raw_text: None,
            diagnostics: Vec::new(),
            cause: None,
        }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_raw_text(mut self, raw_text: impl Into<String>) -> Self {
        self.raw_text = Some(raw_text.into());
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Vec<String>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_cause(mut self, cause: GenError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

impl fmt::Display for GenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.target, &self.cause) {
            (Some(target), Some(cause)) => {
                write!(f, "{} (target={}): {}", self.message, target, cause)
            }
            (Some(target), None) => write!(f, "{} (target={})", self.message, target),
            (None, Some(cause)) => write!(f, "{}: {}", self.message, cause),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for GenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

pub fn malformed_request(message: impl Into<String>) -> GenError {
    GenError::new(GenErrorKind::MalformedRequest, message).with_retryable(false)
}

pub fn cancelled(message: impl Into<String>) -> GenError {
    GenError::new(GenErrorKind::Cancelled, message).with_retryable(false)
}

pub fn internal_error(message: impl Into<String>) -> GenError {
    GenError::new(GenErrorKind::Internal, message).with_retryable(false)
}
