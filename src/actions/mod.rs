//! Action handlers: the things a step's `action` block can actually do to
//! the target or to the local environment.

pub mod authenticate;
pub mod check_target_availability;
pub mod ensure_resource_exists;
pub mod execute_local_commands;
pub mod generate_data;
pub mod http_request;
pub mod manual_action;
pub mod wait;

use crate::context::{auth::AuthError, ContextError};
use crate::errors::ErrorCode;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),
    #[error("missing required parameter '{0}'")]
    MissingParam(&'static str),
    #[error("invalid parameter '{0}': {1}")]
    InvalidParam(&'static str, String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("local command failed: {0}")]
    Command(String),
    #[error("manual action cancelled")]
    ManualCancelled,
    #[error("manual action timed out after {0:?}")]
    ManualTimedOut(std::time::Duration),
    #[error("target unavailable: {0}")]
    TargetUnavailable(String),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
}

impl ActionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Context(e) => e.code(),
            Self::Http(_) => ErrorCode::HTTP_ERROR,
            Self::Auth(e) => match e {
                AuthError::NoUserContext => ErrorCode::NO_USER_CONTEXT,
                AuthError::NoCredentialResolvers => ErrorCode::NO_CREDENTIAL_RESOLVERS,
                AuthError::CredentialNotFound(_) => ErrorCode::CREDENTIAL_NOT_FOUND,
            },
            Self::MissingParam(_) | Self::InvalidParam(_, _) => ErrorCode::INVALID_ACTION,
            Self::Io(_) => ErrorCode::FILE_ERROR,
            Self::Command(_) => ErrorCode::FILE_ERROR,
            Self::ManualCancelled => ErrorCode::MANUAL_CANCELLED,
            Self::ManualTimedOut(_) => ErrorCode::MANUAL_TIMED_OUT,
            Self::TargetUnavailable(_) => ErrorCode::RESOURCE_UNAVAILABLE,
            Self::AuthenticationFailed(_) => ErrorCode::AUTHENTICATION_FAILED,
        }
    }
}

/// Reads a required string field out of an action/check's flattened params.
pub(crate) fn required_str<'a>(
    params: &'a Value,
    field: &'static str,
) -> Result<&'a str, ActionError> {
    params
        .get(field)
        .and_then(Value::as_str)
        .ok_or(ActionError::MissingParam(field))
}

pub(crate) fn optional_str<'a>(params: &'a Value, field: &'static str) -> Option<&'a str> {
    params.get(field).and_then(Value::as_str)
}

pub(crate) fn optional_u64(params: &Value, field: &'static str) -> Option<u64> {
    params.get(field).and_then(Value::as_u64)
}
