//! JSON-shaped checks: pointer-path comparisons and JSON Schema validation,
//! both operating over a value resolved from the context (by default the
//! last response body).

use super::{optional_str, CheckError};
use crate::context::Context;
use crate::registries::CheckHandler;
use async_trait::async_trait;
use jsonschema::JSONSchema;
use regex::Regex;
use serde_json::Value;

fn json_pointer(path: &str) -> String {
    let clean = path.strip_prefix("$.").unwrap_or(path);
    if clean.starts_with('/') {
        clean.to_string()
    } else {
        format!("/{}", clean.replace('.', "/"))
    }
}

fn source_value(ctx: &Context, params: &Value) -> Value {
    let source = optional_str(params, "source").unwrap_or("last_http_response.body_json");
    ctx.resolve(source).cloned().unwrap_or(Value::Null)
}

pub struct JsonPath;

#[async_trait]
impl CheckHandler for JsonPath {
    fn check_type(&self) -> &'static str {
        "json_path"
    }

    async fn check(&self, ctx: &mut Context, params: &Value) -> Result<(), CheckError> {
        let base = source_value(ctx, params);
        let path = super::required_str(params, "path")?;
        let operator = optional_str(params, "operator").unwrap_or("exists");
        let found = base.pointer(&json_pointer(path)).cloned();

        match operator {
            "exists" => found.map(|_| ()).ok_or_else(|| {
                CheckError::Failed(format!("path '{path}' not found"))
            }),
            "not_exists" => match found {
                None => Ok(()),
                Some(v) => Err(CheckError::Failed(format!(
                    "path '{path}' should not exist but found {v}"
                ))),
            },
            other => {
                let actual = found.ok_or_else(|| {
                    CheckError::Failed(format!("path '{path}' not found"))
                })?;
                let expected = params.get("value").cloned().unwrap_or(Value::Null);
                let passed = match other {
                    "eq" => actual == expected,
                    "neq" => actual != expected,
                    "contains" => actual
                        .as_str()
                        .zip(expected.as_str())
                        .map(|(a, e)| a.contains(e))
                        .unwrap_or(false),
                    "gt" | "lt" | "gte" | "lte" => {
                        match (actual.as_f64(), expected.as_f64()) {
                            (Some(a), Some(e)) => match other {
                                "gt" => a > e,
                                "lt" => a < e,
                                "gte" => a >= e,
                                "lte" => a <= e,
                                _ => unreachable!(),
                            },
                            _ => false,
                        }
                    }
                    "value_matches" => {
                        let pattern = expected
                            .as_str()
                            .ok_or_else(|| CheckError::InvalidParam("value", "value_matches requires a string regex".into()))?;
                        let re = Regex::new(pattern)
                            .map_err(|e| CheckError::InvalidParam("value", e.to_string()))?;
                        actual.as_str().map(|a| re.is_match(a)).unwrap_or(false)
                    }
                    _ => false,
                };
                if passed {
                    Ok(())
                } else {
                    Err(CheckError::Failed(format!(
                        "path '{path}' {other} {expected} failed (got {actual})"
                    )))
                }
            }
        }
    }
}

pub struct JsonSchemaValidation;

#[async_trait]
impl CheckHandler for JsonSchemaValidation {
    fn check_type(&self) -> &'static str {
        "json_schema_validation"
    }

    async fn check(&self, ctx: &mut Context, params: &Value) -> Result<(), CheckError> {
        let schema = params.get("schema").ok_or(CheckError::MissingParam("schema"))?;
        let mut target = source_value(ctx, params);
        if let Some(path) = optional_str(params, "path") {
            target = target
                .pointer(&json_pointer(path))
                .cloned()
                .ok_or_else(|| CheckError::Failed(format!("path '{path}' not found")))?;
        }

        let compiled = JSONSchema::compile(schema)
            .map_err(|e| CheckError::InvalidParam("schema", e.to_string()))?;
        let is_valid = compiled.validate(&target).is_ok();
        let expects_valid = optional_str(params, "operator").unwrap_or("valid") != "invalid";

        if is_valid == expects_valid {
            Ok(())
        } else if expects_valid {
            let errors: Vec<String> = compiled
                .validate(&target)
                .err()
                .map(|it| it.map(|e| e.to_string()).take(3).collect())
                .unwrap_or_default();
            Err(CheckError::Failed(format!(
                "schema validation failed: {}",
                errors.join("; ")
            )))
        } else {
            Err(CheckError::Failed(
                "expected value to violate schema but it conformed".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn json_path_exists_and_eq_operators() {
        let mut ctx = Context::new();
        ctx.set("last_http_response.body_json", json!({"data": {"id": 7}})).unwrap();
        JsonPath
            .check(&mut ctx, &json!({"path": "data.id", "operator": "eq", "value": 7}))
            .await
            .unwrap();
        assert!(JsonPath
            .check(&mut ctx, &json!({"path": "data.missing", "operator": "exists"}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn json_path_value_matches_applies_a_regex() {
        let mut ctx = Context::new();
        ctx.set("last_http_response.body_json", json!({"token": "abc123"})).unwrap();
        JsonPath
            .check(&mut ctx, &json!({"path": "token", "operator": "value_matches", "value": "^[a-z0-9]+$"}))
            .await
            .unwrap();
        assert!(JsonPath
            .check(&mut ctx, &json!({"path": "token", "operator": "value_matches", "value": "^\\d+$"}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn schema_validation_reports_failures() {
        let mut ctx = Context::new();
        ctx.set("last_http_response.body_json", json!({"name": 5})).unwrap();
        let schema = json!({"type": "object", "properties": {"name": {"type": "string"}}});
        let result = JsonSchemaValidation
            .check(&mut ctx, &json!({"schema": schema}))
            .await;
        assert!(result.is_err());
    }
}
