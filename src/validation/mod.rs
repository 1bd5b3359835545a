//! Validates a parsed PoC document before execution: DSL version, non-empty
//! phases, unique context-entry IDs, and exactly-one-kind-per-step.
//!
//! Validation happens once, up front — the orchestrator assumes a
//! validated document and does not re-check any of this.

use crate::protocol::{ContextDeclaration, Poc, StepDef, SUPPORTED_DSL_VERSION};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unsupported dsl_version '{0}', this runner supports '{1}'")]
    UnsupportedDslVersion(String, String),
    #[error("exploit_scenario.steps must not be empty")]
    EmptyScenarioSteps,
    #[error("assertions must not be empty")]
    EmptyAssertions,
    #[error("step has {0} of action/check/loop set, expected exactly 1: {1}")]
    AmbiguousStepKind(usize, String),
    #[error("step has an empty dsl description")]
    EmptyStepDsl,
    #[error("duplicate context id '{0}'")]
    DuplicateContextId(String),
    #[error("file entry '{0}' has an empty local_path")]
    EmptyFileLocalPath(String),
    #[error("loop step's `over` expression must not be empty")]
    EmptyLoopOver,
    #[error("loop step's `variable_name` must not be empty")]
    EmptyLoopVariableName,
}

pub fn validate_poc(poc: &Poc) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if poc.metadata.dsl_version != SUPPORTED_DSL_VERSION {
        errors.push(ValidationError::UnsupportedDslVersion(
            poc.metadata.dsl_version.clone(),
            SUPPORTED_DSL_VERSION.to_string(),
        ));
    }

    if poc.exploit_scenario.steps.is_empty() {
        errors.push(ValidationError::EmptyScenarioSteps);
    }

    if poc.assertions.is_empty() {
        errors.push(ValidationError::EmptyAssertions);
    }

    validate_context_ids(&poc.context, &mut errors);

    for steps in [
        &poc.setup,
        &poc.exploit_scenario.setup,
        &poc.exploit_scenario.steps,
        &poc.exploit_scenario.teardown,
        &poc.assertions,
        &poc.verification,
    ] {
        validate_steps(steps, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_context_ids(context: &ContextDeclaration, errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();
    let ids = context
        .users
        .iter()
        .map(|u| &u.id)
        .chain(context.resources.iter().map(|r| &r.id))
        .chain(context.environment.iter().map(|e| &e.id))
        .chain(context.files.iter().map(|f| &f.id))
        .chain(context.variables.iter().map(|v| &v.id));

    for id in ids {
        if !seen.insert(id.clone()) {
            errors.push(ValidationError::DuplicateContextId(id.clone()));
        }
    }

    for file in &context.files {
        if file.local_path.trim().is_empty() {
            errors.push(ValidationError::EmptyFileLocalPath(file.id.clone()));
        }
    }
}

fn validate_steps(steps: &[StepDef], errors: &mut Vec<ValidationError>) {
    for step in steps {
        if step.dsl.trim().is_empty() {
            errors.push(ValidationError::EmptyStepDsl);
        }

        let kind_count = step.kind_count();
        if kind_count != 1 {
            errors.push(ValidationError::AmbiguousStepKind(kind_count, step.dsl.clone()));
        }

        if let Some(loop_def) = &step.loop_ {
            if loop_def.over.trim().is_empty() {
                errors.push(ValidationError::EmptyLoopOver);
            }
            if loop_def.variable_name.trim().is_empty() {
                errors.push(ValidationError::EmptyLoopVariableName);
            }
            validate_steps(&loop_def.steps, errors);
        }
    }
}

/// Counts every step across every phase, including nested loop bodies, for
/// the size-limit check run alongside validation.
pub fn count_steps(poc: &Poc) -> usize {
    fn count(steps: &[StepDef]) -> usize {
        steps
            .iter()
            .map(|s| 1 + s.loop_.as_ref().map(|l| count(&l.steps)).unwrap_or(0))
            .sum()
    }
    count(&poc.setup)
        + count(&poc.exploit_scenario.setup)
        + count(&poc.exploit_scenario.steps)
        + count(&poc.exploit_scenario.teardown)
        + count(&poc.assertions)
        + count(&poc.verification)
}

/// Sums each action/check step's configured retry budget, for the
/// total-retry-budget check run alongside validation.
pub fn count_total_retries(poc: &Poc) -> u32 {
    fn retries_of(params: &serde_json::Value, field: &str) -> u32 {
        params.get(field).and_then(serde_json::Value::as_u64).unwrap_or(0) as u32
    }
    fn count(steps: &[StepDef]) -> u32 {
        steps
            .iter()
            .map(|s| {
                let own = s
                    .action
                    .as_ref()
                    .map(|a| retries_of(&a.params, "retries"))
                    .or_else(|| s.check.as_ref().map(|c| retries_of(&c.params, "max_attempts")))
                    .unwrap_or(0);
                let nested = s.loop_.as_ref().map(|l| count(&l.steps)).unwrap_or(0);
                own + nested
            })
            .sum()
    }
    count(&poc.setup)
        + count(&poc.exploit_scenario.setup)
        + count(&poc.exploit_scenario.steps)
        + count(&poc.exploit_scenario.teardown)
        + count(&poc.assertions)
        + count(&poc.verification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ActionDef, ExploitScenario, Metadata};
    use serde_json::json;

    fn action_step(dsl: &str) -> StepDef {
        StepDef {
            dsl: dsl.to_string(),
            condition: None,
            manual: false,
            step: None,
            action: Some(ActionDef {
                action_type: "wait".to_string(),
                params: json!({"timeout": "1ms"}),
            }),
            check: None,
            loop_: None,
        }
    }

    fn minimal_poc() -> Poc {
        Poc {
            metadata: Metadata {
                id: "poc-1".to_string(),
                title: "t".to_string(),
                dsl_version: SUPPORTED_DSL_VERSION.to_string(),
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
                steps: vec![action_step("do a thing")],
                teardown: vec![],
            },
            assertions: vec![action_step("assert a thing")],
            verification: vec![],
        }
    }

    #[test]
    fn a_minimal_valid_poc_passes() {
        assert!(validate_poc(&minimal_poc()).is_ok());
    }

    #[test]
    fn rejects_an_unsupported_dsl_version() {
        let mut poc = minimal_poc();
        poc.metadata.dsl_version = "2.0".to_string();
        let errors = validate_poc(&poc).unwrap_err();
        assert!(matches!(errors[0], ValidationError::UnsupportedDslVersion(..)));
    }

    #[test]
    fn rejects_an_empty_scenario() {
        let mut poc = minimal_poc();
        poc.exploit_scenario.steps.clear();
        let errors = validate_poc(&poc).unwrap_err();
        assert!(errors.contains(&ValidationError::EmptyScenarioSteps));
    }

    #[test]
    fn rejects_empty_assertions() {
        let mut poc = minimal_poc();
        poc.assertions.clear();
        let errors = validate_poc(&poc).unwrap_err();
        assert!(errors.contains(&ValidationError::EmptyAssertions));
    }

    #[test]
    fn rejects_a_step_with_no_kind() {
        let mut poc = minimal_poc();
        poc.exploit_scenario.steps[0].action = None;
        let errors = validate_poc(&poc).unwrap_err();
        assert!(matches!(errors[0], ValidationError::AmbiguousStepKind(0, _)));
    }

    #[test]
    fn rejects_a_step_with_both_action_and_check() {
        use crate::protocol::CheckDef;
        let mut poc = minimal_poc();
        poc.exploit_scenario.steps[0].check = Some(CheckDef {
            check_type: "variable_equals".to_string(),
            params: json!({"path": "x", "value": 1}),
        });
        let errors = validate_poc(&poc).unwrap_err();
        assert!(matches!(errors[0], ValidationError::AmbiguousStepKind(2, _)));
    }

    #[test]
    fn rejects_duplicate_context_ids_across_categories() {
        use crate::protocol::{EnvironmentDecl, UserDecl};
        let mut poc = minimal_poc();
        poc.context.users.push(UserDecl {
            id: "shared".to_string(),
            description: None,
            credentials_ref: None,
            credentials: None,
        });
        poc.context.environment.push(EnvironmentDecl {
            id: "shared".to_string(),
            value: json!("x"),
        });
        let errors = validate_poc(&poc).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicateContextId("shared".to_string())));
    }

    #[test]
    fn count_steps_includes_nested_loop_bodies() {
        use crate::protocol::LoopDef;
        let mut poc = minimal_poc();
        poc.exploit_scenario.steps.push(StepDef {
            dsl: "loop".to_string(),
            condition: None,
            manual: false,
            step: None,
            action: None,
            check: None,
            loop_: Some(LoopDef {
                over: "variables.items.value".to_string(),
                variable_name: "item".to_string(),
                steps: vec![action_step("inner a"), action_step("inner b")],
            }),
        });
        assert_eq!(count_steps(&poc), 5);
    }
}
