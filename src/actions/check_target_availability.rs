//! The `check_target_availability` action: probes a target and fails the
//! step if it does not answer at all, rather than letting a connection
//! refusal surface confusingly deep inside the exploit scenario. Any HTTP
//! response — including a 4xx/5xx status — counts as "available"; only a
//! transport-level failure (refused connection, DNS failure, timeout) does
//! not.

use super::{optional_str, optional_u64, ActionError};
use crate::context::Context;
use crate::registries::ActionHandler;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

pub struct CheckTargetAvailabilityAction;

#[async_trait]
impl ActionHandler for CheckTargetAvailabilityAction {
    fn action_type(&self) -> &'static str {
        "check_target_availability"
    }

    async fn execute(&self, ctx: &mut Context, params: &Value) -> Result<Value, ActionError> {
        let timeout = Duration::from_millis(optional_u64(params, "timeout_ms").unwrap_or(5000));
        let parameters = params.get("parameters").cloned().unwrap_or(Value::Null);

        let url = match optional_str(params, "url") {
            Some(url) => Some(ctx.substitute(url)?),
            None => None,
        };
        let host = optional_str(&parameters, "host").map(str::to_string);
        let port = optional_str(&parameters, "port")
            .map(str::to_string)
            .or_else(|| parameters.get("port").and_then(Value::as_u64).map(|p| p.to_string()));

        let check_type = optional_str(params, "check_type")
            .map(str::to_string)
            .unwrap_or_else(|| match &url {
                Some(u) if u.starts_with("https://") => "https".to_string(),
                Some(_) => "http".to_string(),
                None => "tcp".to_string(),
            });

        let result = match check_type.as_str() {
            "http" | "https" | "web" => {
                let target_url = url.clone().ok_or(ActionError::MissingParam("url"))?;
                let response = ctx
                    .http_client
                    .head(&target_url)
                    .timeout(timeout)
                    .send()
                    .await
                    .map_err(|e| ActionError::TargetUnavailable(format!("{target_url}: {e}")))?;
                json!({"available": true, "status_code": response.status().as_u16(), "check_type": check_type})
            }
            "tcp" | "socket" => {
                let host = host
                    .or_else(|| {
                        url.as_ref()
                            .and_then(|u| u.split("://").nth(1))
                            .and_then(|rest| rest.split(['/', ':']).next())
                            .map(str::to_string)
                    })
                    .ok_or(ActionError::MissingParam("host"))?;
                let port = port.ok_or(ActionError::MissingParam("port"))?;
                let addr = format!("{host}:{port}");
                tokio::time::timeout(timeout, tokio::net::TcpStream::connect(&addr))
                    .await
                    .map_err(|_| ActionError::TargetUnavailable(format!("{addr}: timed out")))?
                    .map_err(|e| ActionError::TargetUnavailable(format!("{addr}: {e}")))?;
                json!({"available": true, "check_type": check_type, "address": addr})
            }
            other => {
                return Err(ActionError::InvalidParam(
                    "check_type",
                    format!("unsupported check_type '{other}'"),
                ))
            }
        };

        if let Some(target_variable) = optional_str(params, "target_variable") {
            ctx.set_variable(target_variable, result.clone())?;
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn tcp_check_requires_host_and_port() {
        let mut ctx = Context::new();
        let err = CheckTargetAvailabilityAction
            .execute(&mut ctx, &json!({"check_type": "tcp", "parameters": {}}))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::MissingParam("host")));
    }
}
