//! The step runner: walks a PoC's fixed phase sequence, dispatching each
//! step through the action/check/loop machinery and assembling the
//! per-phase, per-step result tree.
//!
//! Execution is single-threaded and sequential by design (see the crate's
//! concurrency model): this module never spawns a task of its own, it only
//! awaits the I/O the handlers themselves perform.

use crate::checks::CheckError;
use crate::context::Context;
use crate::errors::{ErrorCode, LastErrorContext};
use crate::extractors::{self, ExtractError};
use crate::protocol::{
    ActionDef, CheckDef, LoopDef, PhaseResult, Poc, ResponseAction, RunReport, StepDef,
    StepRunResult,
};
use crate::registries::{
    default_actions, default_checks, default_extractors, ActionRegistry, CheckRegistry,
    ExtractorRegistry,
};
use crate::retry::{run_action_with_retries, run_check_with_retries, ActionRetryPolicy, CheckRetryPolicy};
use chrono::Utc;
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, instrument};

pub struct Orchestrator {
    actions: ActionRegistry,
    checks: CheckRegistry,
    extractors: ExtractorRegistry,
    stop_on_failure: bool,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self {
            actions: default_actions(),
            checks: default_checks(),
            extractors: default_extractors(),
            stop_on_failure: true,
        }
    }

    pub fn with_registries(
        actions: ActionRegistry,
        checks: CheckRegistry,
        extractors: ExtractorRegistry,
    ) -> Self {
        Self {
            actions,
            checks,
            extractors,
            stop_on_failure: true,
        }
    }

    pub fn with_stop_on_failure(mut self, stop_on_failure: bool) -> Self {
        self.stop_on_failure = stop_on_failure;
        self
    }

    /// Runs the fixed phase sequence against `ctx`, which the caller has
    /// already seeded from the PoC's context declaration.
    #[instrument(skip(self, poc, ctx), fields(poc_id = %poc.metadata.id))]
    pub async fn run(&self, poc: &Poc, mut ctx: Context) -> RunReport {
        let run_started = Utc::now();
        let mut phase_results = Vec::new();
        let mut halted = false;

        let phases: [(&str, &[StepDef], bool); 6] = [
            ("setup", &poc.setup, false),
            ("exploit_scenario.setup", &poc.exploit_scenario.setup, false),
            ("exploit_scenario.steps", &poc.exploit_scenario.steps, false),
            ("exploit_scenario.teardown", &poc.exploit_scenario.teardown, true),
            ("assertions", &poc.assertions, false),
            ("verification", &poc.verification, false),
        ];

        for (name, steps, always_run) in phases {
            let is_teardown = name == "exploit_scenario.teardown";
            if !always_run && halted && self.stop_on_failure {
                continue;
            }

            info!(phase = name, "entering phase");
            let phase_started = Instant::now();
            // Teardown always runs to completion; its step failures are
            // logged but never halt the run (see error propagation policy).
            let phase_stop_on_failure = self.stop_on_failure && !is_teardown;
            let (step_results, phase_success) =
                self.run_steps(steps, &mut ctx, phase_stop_on_failure).await;
            let duration_ms = phase_started.elapsed().as_millis() as u64;

            if !phase_success && !is_teardown {
                halted = true;
            }

            phase_results.push(PhaseResult {
                name: name.to_string(),
                success: phase_success || is_teardown,
                duration_ms,
                step_results,
            });
        }

        let run_ended = Utc::now();
        let success = phase_results
            .iter()
            .filter(|p| p.name != "exploit_scenario.teardown")
            .all(|p| p.success);
        let error = if success {
            None
        } else {
            phase_results
                .iter()
                .flat_map(|p| &p.step_results)
                .find(|s| !s.success)
                .and_then(|s| s.error.clone())
        };

        RunReport {
            success,
            poc_id: poc.metadata.id.clone(),
            start: run_started.to_rfc3339(),
            end: run_ended.to_rfc3339(),
            duration_ms: (run_ended - run_started).num_milliseconds().max(0) as u64,
            phase_results,
            error,
        }
    }

    /// Runs a step list to completion (or until a failure halts it, when
    /// `stop_on_failure` is set), returning every step's result in order and
    /// whether the whole list succeeded.
    fn run_steps<'a>(
        &'a self,
        steps: &'a [StepDef],
        ctx: &'a mut Context,
        stop_on_failure: bool,
    ) -> Pin<Box<dyn Future<Output = (Vec<StepRunResult>, bool)> + 'a>> {
        Box::pin(async move {
            let mut results = Vec::new();
            let mut success = true;

            for step in steps {
                if let Some(condition) = &step.condition {
                    match ctx.evaluate_condition(condition) {
                        Ok(true) => {}
                        Ok(false) => {
                            results.push(StepRunResult::skipped(step.dsl.clone()));
                            continue;
                        }
                        Err(e) => {
                            results.push(StepRunResult::failed(step.dsl.clone(), 0, e.to_string()));
                            success = false;
                            if stop_on_failure {
                                break;
                            }
                            continue;
                        }
                    }
                }

                if step.manual && !self.confirm_manual_gate(ctx, &step.dsl).await {
                    results.push(StepRunResult::failed(
                        step.dsl.clone(),
                        0,
                        "manual confirmation was declined".to_string(),
                    ));
                    success = false;
                    if stop_on_failure {
                        break;
                    }
                    continue;
                }

                if let Some(loop_def) = &step.loop_ {
                    let (loop_results, loop_success) =
                        self.run_loop(loop_def, ctx, stop_on_failure).await;
                    let halted_inside = stop_on_failure && !loop_success;
                    results.extend(loop_results);
                    if !loop_success {
                        success = false;
                    }
                    if halted_inside {
                        break;
                    }
                    continue;
                }

                let started = Instant::now();
                if let Some(action_def) = &step.action {
                    let (result, ok) = self.run_action_step(action_def, &step.dsl, ctx, started).await;
                    results.push(result);
                    if !ok {
                        success = false;
                        if stop_on_failure {
                            break;
                        }
                    }
                    continue;
                }

                if let Some(check_def) = &step.check {
                    let (result, ok) = self.run_check_step(check_def, &step.dsl, ctx, started).await;
                    results.push(result);
                    if !ok {
                        success = false;
                        if stop_on_failure {
                            break;
                        }
                    }
                    continue;
                }

                // Validated PoCs never reach this; defend only against
                // direct library use of an unvalidated document.
                results.push(StepRunResult::failed(
                    step.dsl.clone(),
                    0,
                    "step has none of action, check, or loop".to_string(),
                ));
                success = false;
                if stop_on_failure {
                    break;
                }
            }

            (results, success)
        })
    }

    async fn confirm_manual_gate(&self, ctx: &Context, dsl: &str) -> bool {
        let message = ctx.substitute(dsl).unwrap_or_else(|_| dsl.to_string());
        println!("--- manual confirmation required ---\n{message}\nconfirm? [y/N]:");

        let mut reader = BufReader::new(tokio::io::stdin());
        let mut line = String::new();
        if reader.read_line(&mut line).await.is_err() {
            return false;
        }
        let trimmed = line.trim().to_ascii_lowercase();
        trimmed == "y" || trimmed == "yes"
    }

    async fn run_loop(
        &self,
        loop_def: &LoopDef,
        ctx: &Context,
        stop_on_failure: bool,
    ) -> (Vec<StepRunResult>, bool) {
        let items: Vec<(Value, Value)> = match ctx.resolve(&loop_def.over) {
            Ok(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| (item.clone(), Value::from(i as u64)))
                .collect(),
            Ok(Value::Object(map)) => map
                .keys()
                .map(|key| (Value::String(key.clone()), Value::String(key.clone())))
                .collect(),
            Ok(other) => vec![(other.clone(), Value::Null)],
            Err(e) => {
                return (
                    vec![StepRunResult::failed(
                        format!("loop over '{}'", loop_def.over),
                        0,
                        e.to_string(),
                    )],
                    false,
                )
            }
        };

        let mut all_results = Vec::new();
        let mut all_ok = true;
        for (item, current_id) in items {
            let mut child = ctx.child_for_loop(&loop_def.variable_name, item, current_id);
            let (results, ok) = self.run_steps(&loop_def.steps, &mut child, stop_on_failure).await;
            all_results.extend(results);
            if !ok {
                all_ok = false;
                if stop_on_failure {
                    break;
                }
            }
        }
        (all_results, all_ok)
    }

    async fn run_action_step(
        &self,
        action_def: &ActionDef,
        dsl: &str,
        ctx: &mut Context,
        started: Instant,
    ) -> (StepRunResult, bool) {
        let handler = match self.actions.get(&action_def.action_type) {
            Ok(h) => h,
            Err(e) => {
                capture_error_context(ctx, ErrorCode::UNKNOWN_HANDLER, e.to_string(), &action_def.action_type);
                return (
                    StepRunResult::failed(dsl.to_string(), 0, e.to_string()),
                    false,
                );
            }
        };

        let policy = ActionRetryPolicy::from_params(&action_def.params);
        let outcome = run_action_with_retries(&policy, dsl, || handler.execute(ctx, &action_def.params)).await;

        match outcome {
            Ok(value) => {
                if let Err(e) = self.apply_response_actions(ctx, &action_def.params, &value).await {
                    capture_error_context(ctx, e.code(), e.to_string(), &action_def.action_type);
                    let duration_ms = started.elapsed().as_millis() as u64;
                    return (StepRunResult::failed(dsl.to_string(), duration_ms, e.to_string()), false);
                }
                let duration_ms = started.elapsed().as_millis() as u64;
                (StepRunResult::passed(dsl.to_string(), duration_ms, Some(value)), true)
            }
            Err(e) => {
                capture_error_context(ctx, e.code(), e.to_string(), &action_def.action_type);
                let duration_ms = started.elapsed().as_millis() as u64;
                (StepRunResult::failed(dsl.to_string(), duration_ms, e.to_string()), false)
            }
        }
    }

    async fn apply_response_actions(
        &self,
        ctx: &mut Context,
        action_params: &Value,
        action_result: &Value,
    ) -> Result<(), ExtractError> {
        let Some(entries) = action_params.get("response_actions").and_then(Value::as_array) else {
            return Ok(());
        };

        for entry in entries {
            let response_action: ResponseAction = serde_json::from_value(entry.clone())
                .map_err(|e| ExtractError::InvalidSource(e.to_string()))?;

            let source_path = response_action
                .source
                .clone()
                .unwrap_or_else(|| extractors::default_source_path(&response_action.extractor_type).to_string());
            let source = ctx
                .resolve(&source_path)
                .cloned()
                .unwrap_or_else(|_| action_result.clone());

            let handler = self
                .extractors
                .get(&response_action.extractor_type)
                .map_err(|e| ExtractError::InvalidSource(e.to_string()))?;
            let value = handler.extract(ctx, &source, &response_action)?;
            let _ = ctx.set_variable(&response_action.target_variable, value);
        }
        Ok(())
    }

    async fn run_check_step(
        &self,
        check_def: &CheckDef,
        dsl: &str,
        ctx: &mut Context,
        started: Instant,
    ) -> (StepRunResult, bool) {
        let handler = match self.checks.get(&check_def.check_type) {
            Ok(h) => h,
            Err(e) => {
                capture_error_context(ctx, ErrorCode::UNKNOWN_HANDLER, e.to_string(), &check_def.check_type);
                return (
                    StepRunResult::failed(dsl.to_string(), 0, e.to_string()),
                    false,
                );
            }
        };

        let policy = CheckRetryPolicy::from_params(&check_def.params);
        let outcome = run_check_with_retries(
            &policy,
            dsl,
            CheckError::is_retryable,
            || handler.check(ctx, &check_def.params),
        )
        .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => (StepRunResult::passed(dsl.to_string(), duration_ms, None), true),
            Err(e) => {
                capture_error_context(ctx, e.code(), e.to_string(), &check_def.check_type);
                (StepRunResult::failed(dsl.to_string(), duration_ms, e.to_string()), false)
            }
        }
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

const RESPONSE_BODY_CAPTURE_LIMIT: usize = 10 * 1024;

/// Snapshots `_last_error_context`/`last_error` after any handler failure,
/// pulling status/body from `last_http_response` when the failure followed
/// an HTTP round-trip.
fn capture_error_context(ctx: &mut Context, code: ErrorCode, message: String, source: &str) {
    let status_code = ctx
        .resolve("last_status_code")
        .ok()
        .and_then(Value::as_u64)
        .map(|n| n as u16);

    let response_body = ctx
        .resolve("last_http_response.body")
        .ok()
        .and_then(Value::as_str)
        .map(truncate_response_body);

    let parsed_error = response_body
        .as_deref()
        .and_then(|body| serde_json::from_str::<Value>(body).ok())
        .and_then(extract_known_error_fields);

    let last_error = LastErrorContext {
        message: message.clone(),
        timestamp: Utc::now().to_rfc3339(),
        status_code,
        error_type: code.symbolic().to_string(),
        response_body,
        source: Some(source.to_string()),
        parsed_error,
    };

    if let Ok(value) = serde_json::to_value(&last_error) {
        let _ = ctx.set("_last_error_context", value);
    }
    let _ = ctx.set("last_error", Value::String(message));
}

fn truncate_response_body(body: &str) -> String {
    if body.len() <= RESPONSE_BODY_CAPTURE_LIMIT {
        return body.to_string();
    }
    let mut end = RESPONSE_BODY_CAPTURE_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated]", &body[..end])
}

fn extract_known_error_fields(body: Value) -> Option<Value> {
    let mut out = Map::new();
    for key in ["error", "message", "code", "type", "reason"] {
        if let Some(field) = body.get(key) {
            out.insert(key.to_string(), field.clone());
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(Value::Object(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ExploitScenario, Metadata};
    use serde_json::json;

    fn minimal_poc(steps: Vec<StepDef>) -> Poc {
        Poc {
            metadata: Metadata {
                id: "poc-1".to_string(),
                title: "test".to_string(),
                dsl_version: "1.0".to_string(),
                severity: None,
                tags: vec![],
                cwe: None,
                target_app: None,
            },
            context: Default::default(),
            setup: vec![],
            exploit_scenario: ExploitScenario {
                name: None,
                setup: vec![],
                steps,
                teardown: vec![],
            },
            assertions: vec![],
            verification: vec![],
        }
    }

    fn wait_step(dsl: &str, ms: u64) -> StepDef {
        StepDef {
            dsl: dsl.to_string(),
            condition: None,
            manual: false,
            step: None,
            action: Some(ActionDef {
                action_type: "wait".to_string(),
                params: json!({"timeout": format!("{ms}ms")}),
            }),
            check: None,
            loop_: None,
        }
    }

    #[tokio::test]
    async fn runs_a_simple_action_step_to_success() {
        let poc = minimal_poc(vec![wait_step("wait a bit", 1)]);
        let orchestrator = Orchestrator::new();
        let report = orchestrator.run(&poc, Context::new()).await;
        assert!(report.success);
        let steps_phase = report
            .phase_results
            .iter()
            .find(|p| p.name == "exploit_scenario.steps")
            .unwrap();
        assert_eq!(steps_phase.step_results.len(), 1);
        assert!(steps_phase.step_results[0].success);
    }

    #[tokio::test]
    async fn skips_a_step_whose_condition_is_false() {
        let mut step = wait_step("conditionally skipped", 1);
        step.condition = Some("false".to_string());
        let poc = minimal_poc(vec![step]);
        let orchestrator = Orchestrator::new();
        let report = orchestrator.run(&poc, Context::new()).await;
        assert!(report.success);
        let steps_phase = &report.phase_results[2];
        assert!(steps_phase.step_results[0].skipped);
    }

    #[tokio::test]
    async fn a_failing_action_halts_the_phase_when_stop_on_failure() {
        let failing = StepDef {
            dsl: "missing duration".to_string(),
            condition: None,
            manual: false,
            step: None,
            action: Some(ActionDef {
                action_type: "wait".to_string(),
                params: json!({}),
            }),
            check: None,
            loop_: None,
        };
        let poc = minimal_poc(vec![failing, wait_step("never reached", 1)]);
        let orchestrator = Orchestrator::new();
        let report = orchestrator.run(&poc, Context::new()).await;
        assert!(!report.success);
        let steps_phase = &report.phase_results[2];
        assert_eq!(steps_phase.step_results.len(), 1);
    }

    #[tokio::test]
    async fn teardown_failure_does_not_flip_overall_success() {
        let failing_teardown = StepDef {
            dsl: "teardown fails".to_string(),
            condition: None,
            manual: false,
            step: None,
            action: Some(ActionDef {
                action_type: "wait".to_string(),
                params: json!({}),
            }),
            check: None,
            loop_: None,
        };
        let mut poc = minimal_poc(vec![wait_step("ok", 1)]);
        poc.exploit_scenario.teardown = vec![failing_teardown];
        let orchestrator = Orchestrator::new();
        let report = orchestrator.run(&poc, Context::new()).await;
        assert!(report.success);
        let teardown_phase = report
            .phase_results
            .iter()
            .find(|p| p.name == "exploit_scenario.teardown")
            .unwrap();
        assert!(teardown_phase.success);
    }

    #[tokio::test]
    async fn loop_runs_once_per_item_and_binds_the_loop_variable() {
        let mut ctx = Context::new();
        ctx.set("variables.ids.value", json!(["a", "b", "c"])).unwrap();

        let inner = StepDef {
            dsl: "check loop var".to_string(),
            condition: None,
            manual: false,
            step: None,
            action: None,
            check: Some(CheckDef {
                check_type: "variable_regex".to_string(),
                params: json!({"path": "loop.item", "regex": "^[abc]$"}),
            }),
            loop_: None,
        };
        let loop_step = StepDef {
            dsl: "loop over ids".to_string(),
            condition: None,
            manual: false,
            step: None,
            action: None,
            check: None,
            loop_: Some(LoopDef {
                over: "variables.ids.value".to_string(),
                variable_name: "item".to_string(),
                steps: vec![inner],
            }),
        };

        let poc = minimal_poc(vec![loop_step]);
        let orchestrator = Orchestrator::new();
        let report = orchestrator.run(&poc, ctx).await;
        assert!(report.success);
        let steps_phase = &report.phase_results[2];
        assert_eq!(steps_phase.step_results.len(), 3);
    }
}
