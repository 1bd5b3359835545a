//! Structured error codes for the runner.
//!
//! Every error surfaced by context resolution, handler dispatch, or the
//! orchestrator carries a numeric `ErrorCode` in addition to its message, so
//! that `expected_error` checks and external tooling can match on error kind
//! rather than parsing message text.
//!
//! | Range | Category |
//! |-------|----------|
//! | E1xxx | Parse / validation |
//! | E2xxx | Context |
//! | E3xxx | Handler dispatch |
//! | E4xxx | Network / IO |
//! | E5xxx | Authentication |
//! | E6xxx | Assertion |
//! | E7xxx | Interaction |
//! | E8xxx | Resource control |
//! | E9xxx | Internal |

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(u16);

impl ErrorCode {
    // E1xxx: parse / validation
    pub const INVALID_DSL_VERSION: Self = Self(1001);
    pub const MISSING_REQUIRED_FIELD: Self = Self(1002);
    pub const INVALID_ACTION: Self = Self(1003);
    pub const INVALID_CHECK: Self = Self(1004);
    pub const UNCLOSED_SUBSTITUTION: Self = Self(1005);
    pub const UNKNOWN_FUNCTION: Self = Self(1006);
    pub const INVALID_PLAN_FORMAT: Self = Self(1007);
    pub const DUPLICATE_CONTEXT_ID: Self = Self(1008);

    // E2xxx: context
    pub const PATH_NOT_FOUND: Self = Self(2001);
    pub const TYPE_MISMATCH: Self = Self(2002);
    pub const PATH_CONFLICT: Self = Self(2003);

    // E3xxx: handler dispatch
    pub const UNKNOWN_HANDLER: Self = Self(3001);
    pub const HANDLER_ALREADY_REGISTERED: Self = Self(3002);
    pub const EXTRACTION_PATH_NOT_FOUND: Self = Self(3003);
    pub const EXTRACTION_HEADER_NOT_FOUND: Self = Self(3004);
    pub const EXTRACTION_NO_MATCH: Self = Self(3005);
    pub const EXTRACTION_INVALID_PATTERN: Self = Self(3006);
    pub const EXTRACTION_INVALID_SOURCE: Self = Self(3007);

    // E4xxx: network / IO
    pub const HTTP_ERROR: Self = Self(4001);
    pub const NETWORK_ERROR: Self = Self(4002);
    pub const TCP_DIAL_ERROR: Self = Self(4003);
    pub const FILE_ERROR: Self = Self(4004);

    // E5xxx: authentication
    pub const AUTHENTICATION_FAILED: Self = Self(5001);
    pub const NO_USER_CONTEXT: Self = Self(5002);
    pub const NO_CREDENTIAL_RESOLVERS: Self = Self(5003);
    pub const CREDENTIAL_NOT_FOUND: Self = Self(5004);

    // E6xxx: assertion
    pub const CHECK_FAILED: Self = Self(6001);
    pub const EXPECTED_ERROR_NOT_MET: Self = Self(6002);

    // E7xxx: interaction
    pub const MANUAL_CANCELLED: Self = Self(7001);
    pub const MANUAL_TIMED_OUT: Self = Self(7002);

    // E8xxx: resource control
    pub const RESOURCE_UNAVAILABLE: Self = Self(8001);
    pub const RESOURCE_NOT_FOUND: Self = Self(8002);
    pub const STEP_LIMIT_EXCEEDED: Self = Self(8003);
    pub const RETRY_LIMIT_EXCEEDED: Self = Self(8004);

    // E9xxx: internal
    pub const INTERNAL_ERROR: Self = Self(9001);

    pub fn code(&self) -> u16 {
        self.0
    }

    pub fn formatted(&self) -> String {
        format!("E{:04}", self.0)
    }

    pub fn category(&self) -> ErrorCategory {
        match self.0 / 1000 {
            1 => ErrorCategory::Parse,
            2 => ErrorCategory::Context,
            3 => ErrorCategory::Dispatch,
            4 => ErrorCategory::NetworkIo,
            5 => ErrorCategory::Authentication,
            6 => ErrorCategory::Assertion,
            7 => ErrorCategory::Interaction,
            8 => ErrorCategory::ResourceControl,
            _ => ErrorCategory::Internal,
        }
    }

    /// Symbolic name matched by `expected_error.error_type_matches`.
    pub fn symbolic(&self) -> &'static str {
        match self.0 {
            1001 => "InvalidDSLVersion",
            1002 => "MissingRequiredField",
            1003 => "InvalidAction",
            1004 => "InvalidCheck",
            1005 => "UnclosedSubstitution",
            1006 => "UnknownFunction",
            1007 => "InvalidPlanFormat",
            1008 => "DuplicateContextId",
            2001 => "PathNotFound",
            2002 => "TypeMismatch",
            2003 => "PathConflict",
            3001 => "UnknownHandler",
            3002 => "HandlerAlreadyRegistered",
            3003 => "ExtractionPathNotFound",
            3004 => "ExtractionHeaderNotFound",
            3005 => "ExtractionNoMatch",
            3006 => "ExtractionInvalidPattern",
            3007 => "ExtractionInvalidSource",
            4001 => "HttpError",
            4002 => "NetworkError",
            4003 => "TCPDialError",
            4004 => "FileError",
            5001 => "AuthenticationFailed",
            5002 => "NoUserContext",
            5003 => "NoCredentialResolvers",
            5004 => "CredentialNotFound",
            6001 => "CheckFailed",
            6002 => "ExpectedErrorNotMet",
            7001 => "ManualCancelled",
            7002 => "ManualTimedOut",
            8001 => "ResourceUnavailable",
            8002 => "ResourceNotFound",
            8003 => "StepLimitExceeded",
            8004 => "RetryLimitExceeded",
            _ => "InternalError",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.formatted())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Parse,
    Context,
    Dispatch,
    NetworkIo,
    Authentication,
    Assertion,
    Interaction,
    ResourceControl,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Parse => "parse/validation",
            Self::Context => "context",
            Self::Dispatch => "handler dispatch",
            Self::NetworkIo => "network/io",
            Self::Authentication => "authentication",
            Self::Assertion => "assertion",
            Self::Interaction => "interaction",
            Self::ResourceControl => "resource control",
            Self::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// Extra detail attached to a [`StructuredError`].
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub step_id: Option<String>,
    pub path: Option<String>,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

#[derive(Debug)]
pub struct StructuredError {
    pub code: ErrorCode,
    pub message: String,
    pub context: Option<ErrorContext>,
}

impl StructuredError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_step_id(mut self, step_id: impl Into<String>) -> Self {
        let ctx = self.context.get_or_insert_with(ErrorContext::default);
        ctx.step_id = Some(step_id.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let ctx = self.context.get_or_insert_with(ErrorContext::default);
        ctx.path = Some(path.into());
        self
    }

    pub fn user_message(&self) -> String {
        let mut msg = format!("[{}] {}", self.code, self.message);
        if let Some(ctx) = &self.context {
            if let Some(step_id) = &ctx.step_id {
                msg.push_str(&format!(" (step: {})", step_id));
            }
            if let Some(path) = &ctx.path {
                msg.push_str(&format!(" (path: {})", path));
            }
            if let (Some(expected), Some(actual)) = (&ctx.expected, &ctx.actual) {
                msg.push_str(&format!(" [expected: {}, actual: {}]", expected, actual));
            }
        }
        msg
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for StructuredError {}

/// Snapshot captured on handler failure, used by the `expected_error` check
/// and exposed to the context at `_last_error_context`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LastErrorContext {
    pub message: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub error_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed_error: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_e_prefix_and_four_digits() {
        assert_eq!(ErrorCode::PATH_NOT_FOUND.formatted(), "E2001");
        assert_eq!(ErrorCode::HTTP_ERROR.formatted(), "E4001");
    }

    #[test]
    fn categorizes_by_leading_digit() {
        assert_eq!(ErrorCode::INVALID_DSL_VERSION.category(), ErrorCategory::Parse);
        assert_eq!(ErrorCode::CHECK_FAILED.category(), ErrorCategory::Assertion);
        assert_eq!(ErrorCode::MANUAL_CANCELLED.category(), ErrorCategory::Interaction);
    }

    #[test]
    fn structured_error_renders_context() {
        let err = StructuredError::new(ErrorCode::PATH_NOT_FOUND, "no such path")
            .with_step_id("get_token")
            .with_path("variables.token.value");

        let msg = err.user_message();
        assert!(msg.contains("E2001"));
        assert!(msg.contains("get_token"));
        assert!(msg.contains("variables.token.value"));
    }

    #[test]
    fn symbolic_names_round_trip_known_codes() {
        assert_eq!(ErrorCode::UNKNOWN_HANDLER.symbolic(), "UnknownHandler");
        assert_eq!(ErrorCode::RESOURCE_UNAVAILABLE.symbolic(), "ResourceUnavailable");
    }
}
