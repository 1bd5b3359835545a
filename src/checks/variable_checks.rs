//! Checks over arbitrary context paths, independent of any HTTP response —
//! used for asserting on state produced by `generate_data`, `extract`, or
//! prior checks.

use super::{required_str, CheckError};
use crate::context::Context;
use crate::registries::CheckHandler;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

fn resolve_path(ctx: &Context, params: &Value) -> Result<Value, CheckError> {
    let path = required_str(params, "path")?;
    Ok(ctx.resolve(path).cloned().unwrap_or(Value::Null))
}

fn as_text(value: &Value) -> String {
    crate::functions::stringify(value)
}

pub struct VariableEquals;

#[async_trait]
impl CheckHandler for VariableEquals {
    fn check_type(&self) -> &'static str {
        "variable_equals"
    }

    async fn check(&self, ctx: &mut Context, params: &Value) -> Result<(), CheckError> {
        let actual = resolve_path(ctx, params)?;
        let expected = params.get("value").cloned().unwrap_or(Value::Null);
        if actual == expected {
            Ok(())
        } else {
            Err(CheckError::Failed(format!(
                "expected {expected}, got {actual}"
            )))
        }
    }
}

pub struct VariableContains;

#[async_trait]
impl CheckHandler for VariableContains {
    fn check_type(&self) -> &'static str {
        "variable_contains"
    }

    async fn check(&self, ctx: &mut Context, params: &Value) -> Result<(), CheckError> {
        let actual = resolve_path(ctx, params)?;
        let needle = params.get("value").ok_or(CheckError::MissingParam("value"))?;

        let found = match &actual {
            Value::String(s) => needle.as_str().map(|n| s.contains(n)).unwrap_or(false),
            Value::Array(items) => items.contains(needle),
            Value::Object(map) => {
                let needle_str = needle.as_str();
                map.keys().any(|k| Some(k.as_str()) == needle_str) || map.values().any(|v| v == needle)
            }
            _ => false,
        };

        if found {
            Ok(())
        } else {
            Err(CheckError::Failed(format!(
                "expected '{actual}' to contain '{needle}'"
            )))
        }
    }
}

pub struct VariableRegex;

#[async_trait]
impl CheckHandler for VariableRegex {
    fn check_type(&self) -> &'static str {
        "variable_regex"
    }

    async fn check(&self, ctx: &mut Context, params: &Value) -> Result<(), CheckError> {
        let actual = resolve_path(ctx, params)?;
        let pattern = required_str(params, "regex")?;
        let re = Regex::new(pattern)
            .map_err(|e| CheckError::InvalidParam("regex", e.to_string()))?;
        let text = as_text(&actual);
        if re.is_match(&text) {
            Ok(())
        } else {
            Err(CheckError::Failed(format!(
                "'{text}' does not match pattern '{pattern}'"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn equals_compares_the_full_json_value() {
        let mut ctx = Context::new();
        ctx.set("variables.x.value", json!(42)).unwrap();
        VariableEquals
            .check(&mut ctx, &json!({"path": "variables.x.value", "value": 42}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn contains_matches_string_substrings() {
        let mut ctx = Context::new();
        ctx.set("variables.x.value", Value::String("hello world".into())).unwrap();
        VariableContains
            .check(&mut ctx, &json!({"path": "variables.x.value", "value": "world"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn contains_checks_array_membership_not_stringified_substring() {
        let mut ctx = Context::new();
        ctx.set("variables.x.value", json!(["alice", "bob"])).unwrap();
        VariableContains
            .check(&mut ctx, &json!({"path": "variables.x.value", "value": "bob"}))
            .await
            .unwrap();
        assert!(VariableContains
            .check(&mut ctx, &json!({"path": "variables.x.value", "value": "ali"}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn contains_checks_object_keys_and_values() {
        let mut ctx = Context::new();
        ctx.set("variables.x.value", json!({"role": "admin"})).unwrap();
        VariableContains
            .check(&mut ctx, &json!({"path": "variables.x.value", "value": "role"}))
            .await
            .unwrap();
        VariableContains
            .check(&mut ctx, &json!({"path": "variables.x.value", "value": "admin"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn regex_rejects_non_matching_values() {
        let mut ctx = Context::new();
        ctx.set("variables.x.value", Value::String("abc".into())).unwrap();
        assert!(VariableRegex
            .check(&mut ctx, &json!({"path": "variables.x.value", "regex": "^\\d+$"}))
            .await
            .is_err());
    }
}
