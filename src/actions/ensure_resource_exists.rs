//! The `ensure_resource_exists` action: probes whether a declared resource
//! is already present on the target and, if not, creates it so the exploit
//! scenario has something concrete to attack.

use super::{optional_str, required_str, ActionError};
use crate::context::Context;
use crate::registries::ActionHandler;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};

pub struct EnsureResourceExistsAction;

#[async_trait]
impl ActionHandler for EnsureResourceExistsAction {
    fn action_type(&self) -> &'static str {
        "ensure_resource_exists"
    }

    async fn execute(&self, ctx: &mut Context, params: &Value) -> Result<Value, ActionError> {
        let resource_id = required_str(params, "resource")?.to_string();
        let user_context = optional_str(params, "user_context").map(str::to_string);
        let target_variable = required_str(params, "target_variable")?;
        let parameters = params
            .get("parameters")
            .ok_or(ActionError::MissingParam("parameters"))?;

        let resource_type = ctx
            .resolve(&format!("resources.{resource_id}.type"))
            .ok()
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let check_endpoint = ctx.substitute(required_str(parameters, "check_endpoint")?)?;
        let check_method = parse_method(optional_str(parameters, "check_method").unwrap_or("GET"))?;

        let mut check_builder = ctx.http_client.request(check_method, &check_endpoint);
        if let Some(headers) = parameters.get("check_headers").and_then(Value::as_object) {
            for (name, value) in headers {
                if let Some(value_str) = value.as_str() {
                    check_builder = check_builder.header(name, ctx.substitute(value_str)?);
                }
            }
        }
        if let Some(body) = parameters.get("check_body") {
            check_builder = attach_body(ctx, check_builder, body)?;
        }

        let check_response = check_builder.send().await?;
        let check_status = check_response.status().as_u16();
        let check_body: Value = check_response.json().await.unwrap_or(Value::Null);
        let exists = (200..300).contains(&check_status);

        let mut created = false;
        let mut create_status: Option<u16> = None;
        let mut create_body_out: Option<Value> = None;

        if !exists {
            if let Some(create_endpoint) = optional_str(parameters, "create_endpoint") {
                let create_endpoint = ctx.substitute(create_endpoint)?;
                let create_method = parse_method(optional_str(parameters, "create_method").unwrap_or("POST"))?;

                let mut create_builder = ctx.http_client.request(create_method, &create_endpoint);
                if let Some(headers) = parameters.get("create_headers").and_then(Value::as_object) {
                    for (name, value) in headers {
                        if let Some(value_str) = value.as_str() {
                            create_builder = create_builder.header(name, ctx.substitute(value_str)?);
                        }
                    }
                }
                if let Some(body) = parameters.get("create_body") {
                    create_builder = attach_body(ctx, create_builder, body)?;
                }

                let create_response = create_builder.send().await?;
                let status = create_response.status().as_u16();
                create_status = Some(status);
                created = (200..300).contains(&status);
                create_body_out = Some(create_response.json().await.unwrap_or(Value::Null));
            }
        }

        if exists || created {
            let identifier = if exists { check_body.clone() } else { create_body_out.clone().unwrap_or(Value::Null) };
            ctx.set(&format!("resources.{resource_id}.identifier"), identifier)?;
        }

        let record = json!({
            "resource_type": resource_type,
            "resource_id": resource_id,
            "user_context": user_context,
            "exists": exists,
            "created": created,
            "check_status": check_status,
            "check_body": check_body,
            "create_status": create_status,
            "create_body": create_body_out,
        });

        ctx.set_variable(target_variable, record.clone())?;
        Ok(record)
    }
}

fn parse_method(raw: &str) -> Result<Method, ActionError> {
    Method::from_bytes(raw.as_bytes()).map_err(|e| ActionError::InvalidParam("method", e.to_string()))
}

/// Attaches a request body, auto-detecting its content type: JSON objects/
/// arrays go through as JSON; string bodies are inspected for `{`/`[` (JSON),
/// `&`/`=` (form-encoded), else sent as `text/plain`.
fn attach_body(ctx: &Context, builder: reqwest::RequestBuilder, body: &Value) -> Result<reqwest::RequestBuilder, ActionError> {
    match body {
        Value::String(s) => {
            let substituted = ctx.substitute(s)?;
            let trimmed = substituted.trim_start();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                let parsed: Value = serde_json::from_str(&substituted)
                    .map_err(|e| ActionError::InvalidParam("create_body", e.to_string()))?;
                Ok(builder.json(&parsed))
            } else if substituted.contains('&') && substituted.contains('=') {
                Ok(builder
                    .header("Content-Type", "application/x-www-form-urlencoded")
                    .body(substituted))
            } else {
                Ok(builder.header("Content-Type", "text/plain").body(substituted))
            }
        }
        other => Ok(builder.json(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_method_rejects_invalid_tokens() {
        assert!(parse_method("NOT A METHOD").is_err());
        assert!(parse_method("PATCH").is_ok());
    }
}
