//! The `http_request` action: builds and sends one HTTP request against the
//! target, then stores the response under the context's reserved
//! `last_http_response`/`last_status_code` paths.

use super::{optional_str, required_str, ActionError};
use crate::context::{auth::apply_authentication, Context};
use crate::registries::ActionHandler;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::time::Instant;

pub struct HttpRequestAction;

#[async_trait]
impl ActionHandler for HttpRequestAction {
    fn action_type(&self) -> &'static str {
        "http_request"
    }

    async fn execute(&self, ctx: &mut Context, params: &Value) -> Result<Value, ActionError> {
        let request = params
            .get("request")
            .ok_or(ActionError::MissingParam("request"))?;

        if let Some(user) = optional_str(params, "authentication_context") {
            ctx.active_user = Some(ctx.substitute(user)?);
        }

        let method_str = optional_str(request, "method").unwrap_or("GET").to_string();
        let url_str = required_str(request, "url")?;

        let method = Method::from_bytes(method_str.as_bytes())
            .map_err(|e| ActionError::InvalidParam("method", e.to_string()))?;
        let url = ctx.substitute(url_str)?;

        let mut builder = ctx.http_client.request(method.clone(), &url);
        let body_type = optional_str(request, "body_type");

        if let Some(Value::Object(query)) = request.get("query_params") {
            let mut pairs: Vec<(String, String)> = Vec::with_capacity(query.len());
            for (key, value) in query {
                let value_str = match value {
                    Value::String(s) => ctx.substitute(s)?,
                    other => other.to_string(),
                };
                pairs.push((key.clone(), value_str));
            }
            builder = builder.query(&pairs);
        }

        builder = match body_type {
            Some("multipart") => attach_multipart(ctx, request, builder).await?,
            Some("form") => {
                let mut pairs: Vec<(String, String)> = Vec::new();
                if let Some(Value::Object(body)) = request.get("body") {
                    for (key, value) in body {
                        pairs.push((key.clone(), ctx.substitute(&crate::functions::stringify(value))?));
                    }
                }
                builder.form(&pairs)
            }
            _ => match request.get("body") {
                Some(body) => builder.json(&substitute_value(ctx, body)?),
                None => builder,
            },
        };

        if let Some(default_content_type) = match body_type {
            Some("json") => Some("application/json"),
            Some("form") => Some("application/x-www-form-urlencoded"),
            _ => None,
        } {
            let has_content_type = request
                .get("headers")
                .and_then(Value::as_object)
                .map(|h| h.keys().any(|k| k.eq_ignore_ascii_case("content-type")))
                .unwrap_or(false);
            if !has_content_type {
                builder = builder.header("Content-Type", default_content_type);
            }
        }

        if let Some(Value::Object(headers)) = request.get("headers") {
            for (name, value) in headers {
                if let Some(value_str) = value.as_str() {
                    builder = builder.header(name, ctx.substitute(value_str)?);
                }
            }
        }

        if ctx.active_user.is_some() {
            builder = apply_authentication(ctx, builder, None)?;
        }

        let has_user_agent = request
            .get("headers")
            .and_then(Value::as_object)
            .map(|h| h.keys().any(|k| k.eq_ignore_ascii_case("user-agent")))
            .unwrap_or(false);
        if !has_user_agent {
            builder = builder.header("User-Agent", "VPR-PoCRunner/1.0");
        }
        let has_accept = request
            .get("headers")
            .and_then(Value::as_object)
            .map(|h| h.keys().any(|k| k.eq_ignore_ascii_case("accept")))
            .unwrap_or(false);
        if !has_accept {
            builder = builder.header("Accept", "*/*");
        }

        let started = Instant::now();
        let result = builder.send().await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                let mut header_map = Map::new();
                for (name, value) in response.headers() {
                    if let Ok(value_str) = value.to_str() {
                        header_map.insert(name.as_str().to_string(), Value::String(value_str.to_string()));
                    }
                }
                let raw_body = response.text().await.unwrap_or_default();
                let body_json: Value = serde_json::from_str(&raw_body).unwrap_or(Value::Null);
                let content_length = raw_body.len() as u64;

                let snapshot = json!({
                    "status_code": status,
                    "headers": Value::Object(header_map),
                    "body": raw_body,
                    "body_json": body_json,
                    "response_time_ms": response_time_ms,
                    "content_length": content_length,
                    "method": method_str,
                    "url": url,
                });

                ctx.set("last_http_response", snapshot.clone())?;
                ctx.set("last_status_code", Value::from(status))?;
                Ok(snapshot)
            }
            Err(err) => {
                let last_error = crate::errors::LastErrorContext {
                    message: err.to_string(),
                    timestamp: "".to_string(),
                    status_code: err.status().map(|s| s.as_u16()),
                    error_type: crate::errors::ErrorCode::HTTP_ERROR.symbolic().to_string(),
                    response_body: None,
                    source: Some("http_request".to_string()),
                    parsed_error: None,
                };
                let _ = ctx.set(
                    "_last_error_context",
                    serde_json::to_value(&last_error).unwrap_or(Value::Null),
                );
                let _ = ctx.set("last_error", Value::String(err.to_string()));
                Err(ActionError::Http(err))
            }
        }
    }
}

async fn attach_multipart(
    ctx: &Context,
    request: &Value,
    builder: reqwest::RequestBuilder,
) -> Result<reqwest::RequestBuilder, ActionError> {
    let mut form = reqwest::multipart::Form::new();
    let multipart = request.get("multipart");

    if let Some(files) = multipart.and_then(|m| m.get("files")).and_then(Value::as_array) {
        for file in files {
            let parameter_name = ctx.substitute(required_str(file, "parameter_name")?)?;
            let local_path = ctx.substitute(required_str(file, "local_path")?)?;
            let filename = match optional_str(file, "filename") {
                Some(name) => ctx.substitute(name)?,
                None => local_path.clone(),
            };
            let bytes = tokio::fs::read(&local_path)
                .await
                .map_err(|e| ActionError::InvalidParam("multipart.files.local_path", format!("{local_path}: {e}")))?;
            let part = reqwest::multipart::Part::bytes(bytes).file_name(filename);
            form = form.part(parameter_name, part);
        }
    }

    if let Some(Value::Object(data)) = multipart.and_then(|m| m.get("data")) {
        for (key, value) in data {
            let value_str = ctx.substitute(&crate::functions::stringify(value))?;
            form = form.text(key.clone(), value_str);
        }
    }

    Ok(builder.multipart(form))
}

fn substitute_value(ctx: &Context, value: &Value) -> Result<Value, ActionError> {
    Ok(match value {
        Value::String(s) => Value::String(ctx.substitute(s)?),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(substitute_value(ctx, item)?);
            }
            Value::Array(out)
        }
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, item) in map {
                out.insert(key.clone(), substitute_value(ctx, item)?);
            }
            Value::Object(out)
        }
        other => other.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_value_recurses_into_nested_structures() {
        let mut ctx = Context::new();
        ctx.set("variables.token.value", Value::String("abc".into())).unwrap();
        let body = json!({"auth": "Bearer {{variables.token.value}}", "nested": {"x": ["{{variables.token.value}}"]}});
        let out = substitute_value(&ctx, &body).unwrap();
        assert_eq!(out["auth"], "Bearer abc");
        assert_eq!(out["nested"]["x"][0], "abc");
    }
}
