//! The `wait` action: pauses the scenario for a fixed duration, e.g. to let
//! an async job finish processing before the next step probes its result.

use super::{required_str, ActionError};
use crate::context::Context;
use crate::registries::ActionHandler;
use crate::util::parse_duration_ms;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

pub struct WaitAction;

#[async_trait]
impl ActionHandler for WaitAction {
    fn action_type(&self) -> &'static str {
        "wait"
    }

    async fn execute(&self, ctx: &mut Context, params: &Value) -> Result<Value, ActionError> {
        let timeout = ctx.substitute(required_str(params, "timeout")?)?;
        let duration_ms = parse_duration_ms(&timeout)
            .ok_or_else(|| ActionError::InvalidParam("timeout", format!("'{timeout}' is not a duration")))?;

        let started = Instant::now();
        tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        let elapsed = started.elapsed().as_millis() as u64;

        Ok(json!({"duration": timeout, "duration_ms": elapsed}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn waits_for_the_requested_duration() {
        let mut ctx = Context::new();
        let result = WaitAction
            .execute(&mut ctx, &json!({"timeout": "20ms"}))
            .await
            .unwrap();
        assert!(result["duration_ms"].as_u64().unwrap() >= 20);
        assert_eq!(result["duration"], "20ms");
    }

    #[tokio::test]
    async fn requires_a_duration() {
        let mut ctx = Context::new();
        assert!(WaitAction.execute(&mut ctx, &json!({})).await.is_err());
    }

    #[tokio::test]
    async fn rejects_an_unparseable_timeout() {
        let mut ctx = Context::new();
        assert!(WaitAction
            .execute(&mut ctx, &json!({"timeout": "soon"}))
            .await
            .is_err());
    }
}
