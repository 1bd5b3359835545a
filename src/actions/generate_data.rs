//! The `generate_data` action: produces a synthetic value (random string,
//! number, UUID, email, IP, date, array, or object) and binds it to a
//! variable, without touching the target.

use super::{required_str, ActionError};
use crate::context::Context;
use crate::registries::ActionHandler;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use regex::Regex;
use serde_json::{Map, Value};
use uuid::Uuid;

pub struct GenerateDataAction;

#[async_trait]
impl ActionHandler for GenerateDataAction {
    fn action_type(&self) -> &'static str {
        "generate_data"
    }

    async fn execute(&self, ctx: &mut Context, params: &Value) -> Result<Value, ActionError> {
        let target_variable = required_str(params, "target_variable")?;
        let parameters = params
            .get("parameters")
            .ok_or(ActionError::MissingParam("parameters"))?;

        let value = generate_value(ctx, parameters)?;
        ctx.set_variable(target_variable, value.clone())?;
        Ok(value)
    }
}

fn generate_value(ctx: &Context, parameters: &Value) -> Result<Value, ActionError> {
    let data_type = parameters
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ActionError::MissingParam("parameters.type"))?;

    match data_type {
        "string" => generate_string(ctx, parameters),
        "number" | "integer" => generate_number(parameters),
        "boolean" | "bool" => generate_boolean(parameters),
        "uuid" => Ok(Value::String(Uuid::new_v4().to_string())),
        "email" => generate_email(parameters),
        "ip" => generate_ip(parameters),
        "date" => generate_date(parameters),
        "array" => generate_array(ctx, parameters),
        "object" => generate_object(ctx, parameters),
        other => Err(ActionError::InvalidParam(
            "parameters.type",
            format!("unsupported generator type '{other}'"),
        )),
    }
}

fn generate_string(ctx: &Context, parameters: &Value) -> Result<Value, ActionError> {
    if let Some(literal) = parameters.get("value").and_then(Value::as_str) {
        return Ok(Value::String(ctx.substitute(literal)?));
    }
    if let Some(pattern) = parameters.get("pattern").and_then(Value::as_str) {
        return Ok(Value::String(expand_pattern(pattern)));
    }
    let length = parameters.get("length").and_then(Value::as_u64).unwrap_or(16) as usize;
    let charset = parameters
        .get("charset")
        .and_then(Value::as_str)
        .unwrap_or("abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789");
    Ok(Value::String(random_from_charset(charset, length)))
}

fn char_class(name: &str) -> Option<&'static str> {
    Some(match name {
        "alpha" => "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ",
        "lower" => "abcdefghijklmnopqrstuvwxyz",
        "upper" => "ABCDEFGHIJKLMNOPQRSTUVWXYZ",
        "digit" => "0123456789",
        "alnum" => "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789",
        "hex" => "0123456789abcdef",
        "symbol" => "!@#$%^&*()-_=+[]{};:,.<>?/",
        "whitespace" => " \t",
        _ => return None,
    })
}

/// Expands `{class}` / `{class*N}` placeholders and `[m-n]` numeric ranges
/// within a pattern string.
fn expand_pattern(pattern: &str) -> String {
    let class_re = Regex::new(r"\{(\w+)(?:\*(\d+))?\}").expect("static pattern compiles");
    let range_re = Regex::new(r"\[(-?\d+)-(-?\d+)\]").expect("static pattern compiles");
    let mut rng = rand::thread_rng();

    let after_classes = class_re.replace_all(pattern, |caps: &regex::Captures| {
        let class_name = &caps[1];
        let count: usize = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(1);
        match char_class(class_name) {
            Some(charset) => random_from_charset(charset, count),
            None => caps[0].to_string(),
        }
    });

    range_re
        .replace_all(&after_classes, |caps: &regex::Captures| {
            let min: i64 = caps[1].parse().unwrap_or(0);
            let max: i64 = caps[2].parse().unwrap_or(min);
            if max < min {
                return caps[0].to_string();
            }
            rng.gen_range(min..=max).to_string()
        })
        .into_owned()
}

fn random_from_charset(charset: &str, count: usize) -> String {
    let chars: Vec<char> = charset.chars().collect();
    if chars.is_empty() {
        return String::new();
    }
    let mut rng = rand::thread_rng();
    (0..count).map(|_| chars[rng.gen_range(0..chars.len())]).collect()
}

fn generate_number(parameters: &Value) -> Result<Value, ActionError> {
    let min = parameters.get("min").and_then(Value::as_i64).unwrap_or(0);
    let max = parameters.get("max").and_then(Value::as_i64).unwrap_or(i32::MAX as i64);
    if max < min {
        return Err(ActionError::InvalidParam(
            "parameters.max",
            format!("max ({max}) < min ({min})"),
        ));
    }
    Ok(Value::from(rand::thread_rng().gen_range(min..=max)))
}

fn generate_boolean(parameters: &Value) -> Result<Value, ActionError> {
    if let Some(fixed) = parameters.get("value").and_then(Value::as_bool) {
        return Ok(Value::Bool(fixed));
    }
    Ok(Value::Bool(rand::thread_rng().gen_bool(0.5)))
}

fn generate_email(parameters: &Value) -> Result<Value, ActionError> {
    let domain = parameters.get("domain").and_then(Value::as_str).unwrap_or("example.com");
    let username = random_from_charset("abcdefghijklmnopqrstuvwxyz0123456789", 10);
    Ok(Value::String(format!("{username}@{domain}")))
}

fn generate_ip(parameters: &Value) -> Result<Value, ActionError> {
    let mut rng = rand::thread_rng();
    let ipv6 = parameters.get("ipv6").and_then(Value::as_bool).unwrap_or(false);
    if ipv6 {
        let groups: Vec<String> = (0..8).map(|_| format!("{:x}", rng.gen_range(0..0xffffu32))).collect();
        Ok(Value::String(groups.join(":")))
    } else {
        let octets: Vec<String> = (0..4).map(|_| rng.gen_range(0..=255u8).to_string()).collect();
        Ok(Value::String(octets.join(".")))
    }
}

fn generate_date(parameters: &Value) -> Result<Value, ActionError> {
    let min = parse_date_bound(parameters.get("min"))?
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).expect("epoch is always valid"));
    let max = parse_date_bound(parameters.get("max"))?.unwrap_or_else(Utc::now);
    if max < min {
        return Err(ActionError::InvalidParam("parameters.max", "max date precedes min date".into()));
    }
    let span = (max.timestamp() - min.timestamp()).max(0);
    let offset = if span == 0 { 0 } else { rand::thread_rng().gen_range(0..=span) };
    let when = min + chrono::Duration::seconds(offset);

    let format = parameters.get("format").and_then(Value::as_str).unwrap_or("rfc3339");
    Ok(Value::String(match format {
        "rfc3339" | "iso8601" => when.to_rfc3339(),
        "date" => when.format("%Y-%m-%d").to_string(),
        custom => when.format(custom).to_string(),
    }))
}

fn parse_date_bound(value: Option<&Value>) -> Result<Option<DateTime<Utc>>, ActionError> {
    let Some(value) = value.and_then(Value::as_str) else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(value)
        .map(|dt| Some(dt.with_timezone(&Utc)))
        .map_err(|e| ActionError::InvalidParam("parameters.min/max", format!("'{value}': {e}")))
}

fn generate_array(ctx: &Context, parameters: &Value) -> Result<Value, ActionError> {
    let size = parameters.get("size").and_then(Value::as_u64).unwrap_or(1);
    let item_type = parameters
        .get("item_type")
        .and_then(Value::as_str)
        .ok_or(ActionError::MissingParam("parameters.item_type"))?;
    let mut item_params = parameters.get("item_params").cloned().unwrap_or_else(|| Value::Object(Map::new()));
    if let Some(map) = item_params.as_object_mut() {
        map.insert("type".to_string(), Value::String(item_type.to_string()));
    }

    let mut items = Vec::with_capacity(size as usize);
    for _ in 0..size {
        items.push(generate_value(ctx, &item_params)?);
    }
    Ok(Value::Array(items))
}

fn generate_object(ctx: &Context, parameters: &Value) -> Result<Value, ActionError> {
    let properties = parameters
        .get("properties")
        .and_then(Value::as_object)
        .ok_or(ActionError::MissingParam("parameters.properties"))?;

    let mut out = Map::new();
    for (name, schema) in properties {
        out.insert(name.clone(), generate_value(ctx, schema)?);
    }
    Ok(Value::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn uuid_type_binds_a_fresh_uuid() {
        let mut ctx = Context::new();
        GenerateDataAction
            .execute(
                &mut ctx,
                &json!({"target_variable": "id", "parameters": {"type": "uuid"}}),
            )
            .await
            .unwrap();
        let stored = ctx.resolve("variables.id.value").unwrap();
        assert!(Uuid::parse_str(stored.as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn number_type_respects_bounds() {
        let mut ctx = Context::new();
        let result = GenerateDataAction
            .execute(
                &mut ctx,
                &json!({"target_variable": "n", "parameters": {"type": "number", "min": 5, "max": 5}}),
            )
            .await
            .unwrap();
        assert_eq!(result, json!(5));
    }

    #[tokio::test]
    async fn email_type_uses_the_declared_domain() {
        let mut ctx = Context::new();
        let result = GenerateDataAction
            .execute(
                &mut ctx,
                &json!({"target_variable": "e", "parameters": {"type": "email", "domain": "test.local"}}),
            )
            .await
            .unwrap();
        assert!(result.as_str().unwrap().ends_with("@test.local"));
    }

    #[test]
    fn pattern_expands_classes_and_ranges() {
        let expanded = expand_pattern("user-{digit*4}-[10-10]");
        assert!(expanded.starts_with("user-"));
        assert!(expanded.ends_with("-10"));
    }

    #[tokio::test]
    async fn array_type_generates_the_requested_size() {
        let mut ctx = Context::new();
        let result = GenerateDataAction
            .execute(
                &mut ctx,
                &json!({
                    "target_variable": "arr",
                    "parameters": {"type": "array", "size": 3, "item_type": "number", "item_params": {"min": 1, "max": 1}},
                }),
            )
            .await
            .unwrap();
        assert_eq!(result, json!([1, 1, 1]));
    }
}
