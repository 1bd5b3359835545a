//! The `execute_local_commands` action: shells out to local tooling (curl,
//! sqlmap, a scripted exploit helper, ...) the target itself cannot reach.

use super::{optional_str, ActionError};
use crate::context::Context;
use crate::registries::ActionHandler;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

pub struct ExecuteLocalCommandsAction;

#[async_trait]
impl ActionHandler for ExecuteLocalCommandsAction {
    fn action_type(&self) -> &'static str {
        "execute_local_commands"
    }

    async fn execute(&self, ctx: &mut Context, params: &Value) -> Result<Value, ActionError> {
        let commands = params
            .get("commands")
            .and_then(Value::as_array)
            .ok_or(ActionError::MissingParam("commands"))?;

        let mut outputs = Vec::with_capacity(commands.len());
        for entry in commands {
            let raw = entry
                .as_str()
                .ok_or_else(|| ActionError::InvalidParam("commands", "entries must be strings".into()))?;
            let command_line = ctx.substitute(raw)?;

            let output = Command::new("sh")
                .arg("-c")
                .arg(&command_line)
                .output()
                .await?;

            let exit_code = output.status.code().unwrap_or(-1);
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

            if !output.status.success() && optional_str(params, "on_failure").unwrap_or("fail") == "fail" {
                return Err(ActionError::Command(format!(
                    "command '{command_line}' exited with {exit_code}: {stderr}"
                )));
            }

            outputs.push(json!({
                "command": command_line,
                "exit_code": exit_code,
                "stdout": stdout,
                "stderr": stderr,
            }));
        }

        if let Some(target_variable) = optional_str(params, "target_variable") {
            ctx.set_variable(target_variable, Value::Array(outputs.clone()))?;
        }

        Ok(Value::Array(outputs))
    }
}
