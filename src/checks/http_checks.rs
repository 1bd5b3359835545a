//! Checks against the most recent HTTP response, read back from the
//! context's reserved `last_http_response`/`last_status_code` paths.

use super::{optional_str, CheckError};
use crate::context::Context;
use crate::registries::CheckHandler;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

/// Parses `expected_status` into an inclusive set of acceptable codes: a
/// bare int, a range string `"M-N"`, a comma list `"A,B"`, or an array of
/// any of those. Absence means "any 2xx".
fn status_matches(expected: Option<&Value>, actual: u16) -> bool {
    let Some(expected) = expected else {
        return (200..300).contains(&actual);
    };
    match expected {
        Value::Number(n) => n.as_u64() == Some(actual as u64),
        Value::String(s) => s.split(',').any(|part| status_part_matches(part.trim(), actual)),
        Value::Array(items) => items.iter().any(|item| status_matches(Some(item), actual)),
        _ => false,
    }
}

fn status_part_matches(part: &str, actual: u16) -> bool {
    if let Some((lo, hi)) = part.split_once('-') {
        if let (Ok(lo), Ok(hi)) = (lo.trim().parse::<u16>(), hi.trim().parse::<u16>()) {
            return (lo..=hi).contains(&actual);
        }
    }
    part.parse::<u16>() == Ok(actual)
}

pub struct HttpResponseStatus;

#[async_trait]
impl CheckHandler for HttpResponseStatus {
    fn check_type(&self) -> &'static str {
        "http_response_status"
    }

    async fn check(&self, ctx: &mut Context, params: &Value) -> Result<(), CheckError> {
        let actual = ctx
            .resolve("last_status_code")
            .ok()
            .and_then(Value::as_u64)
            .unwrap_or(0) as u16;

        if status_matches(params.get("expected_status"), actual) {
            Ok(())
        } else {
            Err(CheckError::Failed(format!(
                "expected status {:?}, got {actual}",
                params.get("expected_status")
            )))
        }
    }
}

pub struct HttpResponseBody;

#[async_trait]
impl CheckHandler for HttpResponseBody {
    fn check_type(&self) -> &'static str {
        "http_response_body"
    }

    async fn check(&self, ctx: &mut Context, params: &Value) -> Result<(), CheckError> {
        let body = ctx
            .resolve("last_http_response.body")
            .cloned()
            .unwrap_or(Value::Null);
        let body_text = body.as_str().unwrap_or_default();

        if let Some(needle) = params.get("contains") {
            let needles: Vec<&str> = match needle {
                Value::String(s) => vec![s.as_str()],
                Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
                _ => return Err(CheckError::InvalidParam("contains", "must be a string or array of strings".into())),
            };
            return if needles.iter().all(|n| body_text.contains(n)) {
                Ok(())
            } else {
                Err(CheckError::Failed(format!("body does not contain all of {needles:?}")))
            };
        }

        if let Some(expected) = optional_str(params, "equals") {
            return if body_text == expected {
                Ok(())
            } else {
                Err(CheckError::Failed(format!("body '{body_text}' != expected '{expected}'")))
            };
        }

        if let Some(pattern) = optional_str(params, "regex") {
            let re = Regex::new(pattern).map_err(|e| CheckError::InvalidParam("regex", e.to_string()))?;
            return if re.is_match(body_text) {
                Ok(())
            } else {
                Err(CheckError::Failed(format!("body does not match regex '{pattern}'")))
            };
        }

        if let Some(path) = params.get("json_path").and_then(Value::as_str) {
            let body_json = ctx
                .resolve("last_http_response.body_json")
                .cloned()
                .unwrap_or(Value::Null);
            let found = body_json.pointer(&json_pointer(path));
            return found
                .map(|_| ())
                .ok_or_else(|| CheckError::Failed(format!("json_path '{path}' not found in body")));
        }

        Err(CheckError::MissingParam("contains|equals|regex|json_path"))
    }
}

pub struct HttpResponseHeader;

#[async_trait]
impl CheckHandler for HttpResponseHeader {
    fn check_type(&self) -> &'static str {
        "http_response_header"
    }

    async fn check(&self, ctx: &mut Context, params: &Value) -> Result<(), CheckError> {
        let header_name = super::required_str(params, "header_name")?;
        let headers = ctx
            .resolve("last_http_response.headers")
            .cloned()
            .unwrap_or(Value::Null);

        let actual = headers.as_object().and_then(|map| {
            map.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(header_name))
                .map(|(_, v)| v.clone())
        });

        if actual.is_none() {
            if let Some("") = optional_str(params, "equals") {
                return Ok(());
            }
            return Err(CheckError::Failed(format!("header '{header_name}' not present")));
        }
        let actual_text = actual.as_ref().and_then(Value::as_str).unwrap_or_default();

        if let Some(needle) = optional_str(params, "contains") {
            return if actual_text.contains(needle) {
                Ok(())
            } else {
                Err(CheckError::Failed(format!("header '{header_name}'='{actual_text}' does not contain '{needle}'")))
            };
        }
        if let Some(expected) = optional_str(params, "equals") {
            return if actual_text == expected {
                Ok(())
            } else {
                Err(CheckError::Failed(format!("header '{header_name}'='{actual_text}' != '{expected}'")))
            };
        }
        if let Some(pattern) = optional_str(params, "regex") {
            let re = Regex::new(pattern).map_err(|e| CheckError::InvalidParam("regex", e.to_string()))?;
            return if re.is_match(actual_text) {
                Ok(())
            } else {
                Err(CheckError::Failed(format!("header '{header_name}'='{actual_text}' does not match '{pattern}'")))
            };
        }

        Err(CheckError::MissingParam("contains|equals|regex"))
    }
}

fn json_pointer(path: &str) -> String {
    let clean = path.strip_prefix("$.").unwrap_or(path);
    if clean.starts_with('/') {
        clean.to_string()
    } else {
        format!("/{}", clean.replace('.', "/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn status_check_defaults_to_any_2xx() {
        let mut ctx = Context::new();
        ctx.set("last_status_code", json!(204)).unwrap();
        HttpResponseStatus.check(&mut ctx, &json!({})).await.unwrap();
    }

    #[tokio::test]
    async fn status_check_accepts_a_range_string() {
        let mut ctx = Context::new();
        ctx.set("last_status_code", json!(404)).unwrap();
        HttpResponseStatus
            .check(&mut ctx, &json!({"expected_status": "400-499"}))
            .await
            .unwrap();
        ctx.set("last_status_code", json!(500)).unwrap();
        assert!(HttpResponseStatus
            .check(&mut ctx, &json!({"expected_status": "400-499"}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn body_check_requires_exactly_one_criterion() {
        let mut ctx = Context::new();
        ctx.set("last_http_response.body", json!("hello world")).unwrap();
        HttpResponseBody
            .check(&mut ctx, &json!({"contains": "world"}))
            .await
            .unwrap();
        assert!(HttpResponseBody.check(&mut ctx, &json!({})).await.is_err());
    }

    #[tokio::test]
    async fn header_check_is_case_insensitive_and_supports_missing_as_empty() {
        let mut ctx = Context::new();
        ctx.set("last_http_response.headers", json!({"Content-Type": "application/json"})).unwrap();
        HttpResponseHeader
            .check(&mut ctx, &json!({"header_name": "content-type", "contains": "json"}))
            .await
            .unwrap();
        HttpResponseHeader
            .check(&mut ctx, &json!({"header_name": "x-missing", "equals": ""}))
            .await
            .unwrap();
    }
}
