//! `expected_error`: asserts that the previous action failed, and that its
//! recorded error matches an expected symbolic type or status code — used
//! for PoCs whose success criterion IS that the target rejected a request.

use super::{optional_str, CheckError};
use crate::context::Context;
use crate::registries::CheckHandler;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

pub struct ExpectedError;

#[async_trait]
impl CheckHandler for ExpectedError {
    fn check_type(&self) -> &'static str {
        "expected_error"
    }

    async fn check(&self, ctx: &mut Context, params: &Value) -> Result<(), CheckError> {
        let error_context = ctx.resolve("_last_error_context").cloned();
        let Ok(error_context) = error_context else {
            return Err(CheckError::Failed(
                "expected the previous step to fail, but no error was recorded".to_string(),
            ));
        };

        if let Some(pattern) = optional_str(params, "error_type_matches") {
            let error_type = error_context
                .get("error_type")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let re = Regex::new(pattern)
                .map_err(|e| CheckError::InvalidParam("error_type_matches", e.to_string()))?;
            if !re.is_match(error_type) {
                return Err(CheckError::Failed(format!(
                    "error type '{error_type}' does not match pattern '{pattern}'"
                )));
            }
        }

        if let Some(pattern) = optional_str(params, "status_matches") {
            let actual_status = ctx
                .resolve("last_status_code")
                .ok()
                .and_then(Value::as_u64)
                .map(|s| s.to_string())
                .unwrap_or_default();
            let re = Regex::new(pattern)
                .map_err(|e| CheckError::InvalidParam("status_matches", e.to_string()))?;
            if !re.is_match(&actual_status) {
                return Err(CheckError::Failed(format!(
                    "error status '{actual_status}' does not match pattern '{pattern}'"
                )));
            }
        }

        if let Some(needle) = optional_str(params, "message_contains") {
            let message = error_context.get("message").and_then(Value::as_str).unwrap_or_default();
            if !message.contains(needle) {
                return Err(CheckError::Failed(format!(
                    "error message '{message}' does not contain '{needle}'"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fails_when_no_error_was_recorded() {
        let mut ctx = Context::new();
        assert!(ExpectedError.check(&mut ctx, &json!({})).await.is_err());
    }

    #[tokio::test]
    async fn matches_recorded_error_type_by_regex() {
        let mut ctx = Context::new();
        ctx.set(
            "_last_error_context",
            json!({"message": "nope", "timestamp": "", "error_type": "HttpError", "status_code": 403}),
        )
        .unwrap();
        ctx.set("last_status_code", json!(403)).unwrap();
        ExpectedError
            .check(&mut ctx, &json!({"error_type_matches": "^Http.*", "status_matches": "^403$"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn message_contains_checks_the_recorded_error_message() {
        let mut ctx = Context::new();
        ctx.set(
            "_last_error_context",
            json!({"message": "connection refused", "timestamp": "", "error_type": "HttpError"}),
        )
        .unwrap();
        ExpectedError
            .check(&mut ctx, &json!({"message_contains": "refused"}))
            .await
            .unwrap();
        assert!(ExpectedError
            .check(&mut ctx, &json!({"message_contains": "timeout"}))
            .await
            .is_err());
    }
}
