//! The PoC document model: metadata, context declaration, the four phase
//! step lists, and the polymorphic step shape (action / check / loop).

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SUPPORTED_DSL_VERSION: &str = "1.0";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Poc {
    pub metadata: Metadata,
    #[serde(default)]
    pub context: ContextDeclaration,
    #[serde(default)]
    pub setup: Vec<StepDef>,
    pub exploit_scenario: ExploitScenario,
    #[serde(default)]
    pub assertions: Vec<StepDef>,
    #[serde(default)]
    pub verification: Vec<StepDef>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Metadata {
    pub id: String,
    pub title: String,
    pub dsl_version: String,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub cwe: Option<String>,
    #[serde(default)]
    pub target_app: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ContextDeclaration {
    #[serde(default)]
    pub users: Vec<UserDecl>,
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
    #[serde(default)]
    pub environment: Vec<EnvironmentDecl>,
    #[serde(default)]
    pub files: Vec<FileDecl>,
    #[serde(default)]
    pub variables: Vec<VariableDecl>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserDecl {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub credentials_ref: Option<String>,
    #[serde(default)]
    pub credentials: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResourceDecl {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub identifier: Value,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnvironmentDecl {
    pub id: String,
    pub value: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileDecl {
    pub id: String,
    pub local_path: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VariableDecl {
    pub id: String,
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExploitScenario {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub setup: Vec<StepDef>,
    pub steps: Vec<StepDef>,
    #[serde(default)]
    pub teardown: Vec<StepDef>,
}

/// A step is exactly one of `action`, `check`, or `loop`; `dsl` is the
/// always-required human-readable description. Each of the three kinds
/// gets its own typed struct rather than one denormalized field bag; the
/// `type`-specific parameters inside each stay as a flattened JSON value,
/// parsed by the handler that claims that `type`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StepDef {
    pub dsl: String,
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default)]
    pub manual: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<CheckDef>,
    #[serde(rename = "loop", default, skip_serializing_if = "Option::is_none")]
    pub loop_: Option<LoopDef>,
}

impl StepDef {
    /// Number of kinds present; validation rejects anything but 1.
    pub fn kind_count(&self) -> usize {
        [self.action.is_some(), self.check.is_some(), self.loop_.is_some()]
            .into_iter()
            .filter(|b| *b)
            .count()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActionDef {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(flatten)]
    pub params: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CheckDef {
    #[serde(rename = "type")]
    pub check_type: String,
    #[serde(flatten)]
    pub params: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoopDef {
    pub over: String,
    pub variable_name: String,
    pub steps: Vec<StepDef>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResponseAction {
    #[serde(rename = "type")]
    pub extractor_type: String,
    pub target_variable: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(flatten)]
    pub params: Value,
}

// ---------------------------------------------------------------------
// Run results
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StepRunResult {
    pub dsl: String,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub skipped: bool,
}

impl StepRunResult {
    pub fn passed(dsl: impl Into<String>, duration_ms: u64, output: Option<Value>) -> Self {
        Self {
            dsl: dsl.into(),
            success: true,
            duration_ms,
            output,
            error: None,
            skipped: false,
        }
    }

    pub fn failed(dsl: impl Into<String>, duration_ms: u64, error: impl Into<String>) -> Self {
        Self {
            dsl: dsl.into(),
            success: false,
            duration_ms,
            output: None,
            error: Some(error.into()),
            skipped: false,
        }
    }

    pub fn skipped(dsl: impl Into<String>) -> Self {
        Self {
            dsl: dsl.into(),
            success: true,
            duration_ms: 0,
            output: None,
            error: None,
            skipped: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub step_results: Vec<StepRunResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub success: bool,
    pub poc_id: String,
    pub start: String,
    pub end: String,
    pub duration_ms: u64,
    pub phase_results: Vec<PhaseResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_def_counts_exactly_one_kind() {
        let step: StepDef = serde_json::from_value(serde_json::json!({
            "dsl": "wait a bit",
            "action": {"type": "wait", "timeout": "1s"}
        }))
        .unwrap();
        assert_eq!(step.kind_count(), 1);
    }

    #[test]
    fn step_def_rejects_zero_and_multiple_kinds_at_validation_time() {
        let step: StepDef = serde_json::from_value(serde_json::json!({"dsl": "no-op"})).unwrap();
        assert_eq!(step.kind_count(), 0);
    }

    #[test]
    fn action_params_are_flattened_into_a_json_object() {
        let action: ActionDef = serde_json::from_value(serde_json::json!({
            "type": "http_request",
            "request": {"method": "GET", "url": "http://h"}
        }))
        .unwrap();
        assert_eq!(action.action_type, "http_request");
        assert!(action.params.get("request").is_some());
    }
}
