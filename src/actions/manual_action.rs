//! The `manual_action` action: surfaces a description to the operator and
//! waits for a line of input, for steps that need a human in the loop (e.g.
//! "click the link in the email you just triggered and paste the token").
//! Only `y`/`yes` (case-insensitive) confirms; anything else cancels.

use super::{optional_str, required_str, ActionError};
use crate::context::Context;
use crate::registries::ActionHandler;
use crate::util::parse_duration_ms;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};

pub struct ManualAction;

#[async_trait]
impl ActionHandler for ManualAction {
    fn action_type(&self) -> &'static str {
        "manual_action"
    }

    async fn execute(&self, ctx: &mut Context, params: &Value) -> Result<Value, ActionError> {
        let description = ctx.substitute(required_str(params, "description")?)?;
        println!("--- manual action required ---\n{description}");
        println!("confirm? [y/N]:");

        let mut reader = BufReader::new(tokio::io::stdin());
        let mut line = String::new();

        let read = reader.read_line(&mut line);
        let timeout_ms = match optional_str(params, "timeout") {
            Some(timeout) => Some(
                parse_duration_ms(&ctx.substitute(timeout)?)
                    .ok_or_else(|| ActionError::InvalidParam("timeout", format!("'{timeout}' is not a duration")))?,
            ),
            None => None,
        };
        let response = match timeout_ms {
            Some(timeout_ms) => tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), read)
                .await
                .map_err(|_| ActionError::ManualTimedOut(std::time::Duration::from_millis(timeout_ms)))?,
            None => read.await,
        };
        response?;

        let trimmed = line.trim().to_string();
        let confirmed = trimmed.eq_ignore_ascii_case("y") || trimmed.eq_ignore_ascii_case("yes");
        if !confirmed {
            return Err(ActionError::ManualCancelled);
        }

        Ok(json!({"input": trimmed, "confirmed": true}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_y_or_yes_confirm() {
        for input in ["y", "Y", "yes", "YES"] {
            assert!(input.eq_ignore_ascii_case("y") || input.eq_ignore_ascii_case("yes"));
        }
        for input in ["n", "no", "cancel", ""] {
            assert!(!(input.eq_ignore_ascii_case("y") || input.eq_ignore_ascii_case("yes")));
        }
    }
}
