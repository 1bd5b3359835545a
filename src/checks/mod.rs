//! Check handlers: the things a step's `check` block can verify against the
//! context or the target, without mutating either (besides the retry loop
//! that drives polling checks, which lives in the orchestrator).

pub mod expected_error;
pub mod http_checks;
pub mod json_checks;
pub mod resource_checks;
pub mod variable_checks;

use crate::context::ContextError;
use crate::errors::ErrorCode;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckError {
    /// The check ran but the assertion did not hold — this is a normal,
    /// expected outcome the orchestrator's retry loop acts on.
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("missing required parameter '{0}'")]
    MissingParam(&'static str),
    #[error("invalid parameter '{0}': {1}")]
    InvalidParam(&'static str, String),
}

impl CheckError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Failed(_) => ErrorCode::CHECK_FAILED,
            Self::Context(e) => e.code(),
            Self::Http(_) => ErrorCode::HTTP_ERROR,
            Self::MissingParam(_) | Self::InvalidParam(_, _) => ErrorCode::INVALID_CHECK,
        }
    }

    /// True for outcomes the orchestrator's check-retry loop should keep
    /// polling on; false for hard failures (bad params, network errors)
    /// that should fail the step outright.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

pub(crate) fn required_str<'a>(params: &'a Value, field: &'static str) -> Result<&'a str, CheckError> {
    params
        .get(field)
        .and_then(Value::as_str)
        .ok_or(CheckError::MissingParam(field))
}

pub(crate) fn optional_str<'a>(params: &'a Value, field: &'static str) -> Option<&'a str> {
    params.get(field).and_then(Value::as_str)
}
