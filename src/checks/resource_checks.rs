//! `check_remote_resource`: confirms a resource on the target is in the
//! expected state, e.g. that a victim's record still carries the data an
//! exploit was supposed to leave behind.

use super::{optional_str, required_str, CheckError};
use crate::context::Context;
use crate::registries::CheckHandler;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

pub struct CheckRemoteResource;

#[async_trait]
impl CheckHandler for CheckRemoteResource {
    fn check_type(&self) -> &'static str {
        "check_remote_resource"
    }

    async fn check(&self, ctx: &mut Context, params: &Value) -> Result<(), CheckError> {
        let mut path = ctx.substitute(required_str(params, "path")?)?;
        if optional_str(params, "resource_type") == Some("directory") && !path.ends_with('/') {
            path.push('/');
        }

        let wants_body = params.get("content_contains").is_some()
            || params.get("content_equals").is_some()
            || params.get("regex").is_some();

        let response = if wants_body {
            ctx.http_client.get(&path).send().await.map_err(CheckError::Http)?
        } else {
            ctx.http_client.head(&path).send().await.map_err(CheckError::Http)?
        };

        let status = response.status().as_u16();
        let expected_status = params.get("expected_status").and_then(Value::as_u64);
        if let Some(expected) = expected_status {
            if status as u64 != expected {
                return Err(CheckError::Failed(format!(
                    "resource at {path} returned {status}, expected {expected}"
                )));
            }
        } else if !response.status().is_success() {
            return Err(CheckError::Failed(format!("resource at {path} returned {status}")));
        }

        if wants_body {
            let body = response.text().await.unwrap_or_default();

            if let Some(needle) = optional_str(params, "content_contains") {
                if !body.contains(needle) {
                    return Err(CheckError::Failed(format!("resource at {path} does not contain '{needle}'")));
                }
            }
            if let Some(expected) = optional_str(params, "content_equals") {
                if body != expected {
                    return Err(CheckError::Failed(format!("resource at {path} content != expected")));
                }
            }
            if let Some(pattern) = optional_str(params, "regex") {
                let re = Regex::new(pattern).map_err(|e| CheckError::InvalidParam("regex", e.to_string()))?;
                if !re.is_match(&body) {
                    return Err(CheckError::Failed(format!("resource at {path} does not match '{pattern}'")));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn directory_resource_type_forces_a_trailing_slash() {
        let mut path = "http://target/api/users".to_string();
        if !path.ends_with('/') {
            path.push('/');
        }
        assert_eq!(path, "http://target/api/users/");
    }

    #[tokio::test]
    async fn missing_path_is_a_missing_param_error() {
        let mut ctx = Context::new();
        let err = CheckRemoteResource.check(&mut ctx, &json!({})).await.unwrap_err();
        assert!(matches!(err, CheckError::MissingParam("path")));
    }
}
