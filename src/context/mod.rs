//! The execution context: variable store, template substitution, and the
//! authentication state shared by every handler in a PoC run.

pub mod auth;

use crate::functions::{self, FunctionError};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use auth::{CredentialResolver, InlineCredentialResolver};

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("path not found: {0}")]
    PathNotFound(String),
    #[error("type mismatch navigating: {0}")]
    TypeMismatch(String),
    #[error("cannot write through scalar value at: {0}")]
    PathConflict(String),
    #[error("unclosed '{{{{' in template")]
    UnclosedSubstitution,
    #[error("function call failed: {0}")]
    Function(#[from] FunctionError),
}

impl ContextError {
    pub fn code(&self) -> crate::errors::ErrorCode {
        use crate::errors::ErrorCode;
        match self {
            Self::PathNotFound(_) => ErrorCode::PATH_NOT_FOUND,
            Self::TypeMismatch(_) => ErrorCode::TYPE_MISMATCH,
            Self::PathConflict(_) => ErrorCode::PATH_CONFLICT,
            Self::UnclosedSubstitution => ErrorCode::UNCLOSED_SUBSTITUTION,
            Self::Function(_) => ErrorCode::UNKNOWN_FUNCTION,
        }
    }
}

/// Runtime state for a single PoC execution.
///
/// The variable store is a `serde_json::Value::Object` tree addressed by
/// dotted paths (`environment.target_url.value`, `variables.token.value`,
/// ...). It is confined to a single executing task; nothing in this crate
/// spawns a task to mutate it concurrently.
pub struct Context {
    store: Value,
    pub active_user: Option<String>,
    credential_resolvers: Arc<Vec<Box<dyn CredentialResolver>>>,
    pub http_client: reqwest::Client,
}

impl Context {
    pub fn new() -> Self {
        let mut root = Map::new();
        for key in ["users", "resources", "environment", "files", "variables"] {
            root.insert(key.to_string(), Value::Object(Map::new()));
        }
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .expect("default HTTP client configuration is always valid");

        Self {
            store: Value::Object(root),
            active_user: None,
            credential_resolvers: Arc::new(vec![Box::new(InlineCredentialResolver)]),
            http_client,
        }
    }

    pub fn with_resolvers(mut self, resolvers: Vec<Box<dyn CredentialResolver>>) -> Self {
        self.credential_resolvers = Arc::new(resolvers);
        self
    }

    pub fn resolvers(&self) -> &[Box<dyn CredentialResolver>] {
        &self.credential_resolvers
    }

    /// Resolves a dotted path against the variable store.
    pub fn resolve(&self, path: &str) -> Result<&Value, ContextError> {
        let mut current = &self.store;
        for segment in path.split('.') {
            match current {
                Value::Object(map) => {
                    current = map
                        .get(segment)
                        .ok_or_else(|| ContextError::PathNotFound(path.to_string()))?;
                }
                _ => return Err(ContextError::TypeMismatch(path.to_string())),
            }
        }
        Ok(current)
    }

    pub fn resolve_or(&self, path: &str, default: Value) -> Value {
        self.resolve(path).cloned().unwrap_or(default)
    }

    /// Writes `value` at `path`, creating intermediate mapping nodes along
    /// the way. Fails only when an intermediate segment already holds a
    /// non-mapping, non-null value.
    pub fn set(&mut self, path: &str, value: Value) -> Result<(), ContextError> {
        let segments: Vec<&str> = path.split('.').collect();
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| ContextError::PathConflict(path.to_string()))?;

        let mut current = &mut self.store;
        for segment in parents {
            if current.is_null() {
                *current = Value::Object(Map::new());
            }
            let map = current
                .as_object_mut()
                .ok_or_else(|| ContextError::PathConflict(path.to_string()))?;
            current = map.entry(segment.to_string()).or_insert(Value::Null);
        }

        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        let map = current
            .as_object_mut()
            .ok_or_else(|| ContextError::PathConflict(path.to_string()))?;
        map.insert(last.to_string(), value);
        Ok(())
    }

    /// Stores a variable record `{id, value}` at `variables.<id>`, the shape
    /// every extractor and `generate_data` write through.
    pub fn set_variable(&mut self, id: &str, value: Value) -> Result<(), ContextError> {
        self.set(
            &format!("variables.{id}"),
            serde_json::json!({"id": id, "value": value}),
        )
    }

    fn stringify(v: &Value) -> String {
        functions::stringify(v)
    }

    /// Scans `input` for `{{ ... }}` markers (non-nested: the first `}}`
    /// terminates) and replaces each with its resolved or computed value.
    pub fn substitute(&self, input: &str) -> Result<String, ContextError> {
        let mut out = String::new();
        let mut rest = input;
        loop {
            match rest.find("{{") {
                None => {
                    out.push_str(rest);
                    break;
                }
                Some(start) => {
                    out.push_str(&rest[..start]);
                    let after_open = &rest[start + 2..];
                    let end = after_open
                        .find("}}")
                        .ok_or(ContextError::UnclosedSubstitution)?;
                    let inner = after_open[..end].trim();
                    out.push_str(&self.substitute_token(inner)?);
                    rest = &after_open[end + 2..];
                }
            }
        }
        Ok(out)
    }

    fn substitute_token(&self, token: &str) -> Result<String, ContextError> {
        if let Some((name, args_str)) = parse_call(token) {
            let mut args = Vec::new();
            for raw in split_args(args_str) {
                args.push(self.resolve_arg(&raw)?);
            }
            let value = functions::call(name, &args)?;
            Ok(Self::stringify(&value))
        } else {
            Ok(Self::stringify(self.resolve(token)?))
        }
    }

    fn resolve_arg(&self, arg: &str) -> Result<Value, ContextError> {
        let trimmed = arg.trim();
        if trimmed.starts_with("{{") {
            Ok(Value::String(self.substitute(trimmed)?))
        } else if let Some(path) = trimmed.strip_prefix("context.") {
            Ok(self.resolve(path)?.clone())
        } else {
            Ok(Value::String(strip_quotes(trimmed)))
        }
    }

    /// Evaluates a step's `if` expression. Empty ⇒ true; `true`/`false`
    /// literals; `lhs == rhs` / `lhs != rhs` string comparisons after
    /// substitution; any other non-empty, non-`"0"`/`"false"` result ⇒ true.
    pub fn evaluate_condition(&self, expr: &str) -> Result<bool, ContextError> {
        let substituted = self.substitute(expr)?;
        let trimmed = substituted.trim();
        if trimmed.is_empty() || trimmed == "true" {
            return Ok(true);
        }
        if trimmed == "false" {
            return Ok(false);
        }
        if let Some(idx) = trimmed.rfind("==") {
            let (lhs, rhs) = (&trimmed[..idx], &trimmed[idx + 2..]);
            return Ok(lhs.trim() == rhs.trim());
        }
        if let Some(idx) = trimmed.rfind("!=") {
            let (lhs, rhs) = (&trimmed[..idx], &trimmed[idx + 2..]);
            return Ok(lhs.trim() != rhs.trim());
        }
        Ok(trimmed != "0")
    }

    /// Creates a child context for one loop iteration: the variable store is
    /// shallow-copied and `loop.<variable_name>`/`loop.current_id` are bound.
    /// Writes inside the loop body do not propagate back to the parent.
    pub fn child_for_loop(&self, variable_name: &str, item: Value, current_id: Value) -> Context {
        let mut child = Context {
            store: self.store.clone(),
            active_user: self.active_user.clone(),
            credential_resolvers: Arc::clone(&self.credential_resolvers),
            http_client: self.http_client.clone(),
        };
        let _ = child.set(&format!("loop.{variable_name}"), item);
        let _ = child.set("loop.current_id", current_id);
        child
    }

    pub fn store(&self) -> &Value {
        &self.store
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_call(token: &str) -> Option<(&str, &str)> {
    let open = token.find('(')?;
    if !token.ends_with(')') {
        return None;
    }
    let name = &token[..open];
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    Some((name, &token[open + 1..token.len() - 1]))
}

/// Splits comma-separated call arguments, respecting `(...)` nesting and
/// `{{ ... }}` spans so neither contributes a false split point.
fn split_args(s: &str) -> Vec<String> {
    let mut args = Vec::new();
    if s.trim().is_empty() {
        return args;
    }

    let chars: Vec<char> = s.chars().collect();
    let mut paren_depth = 0i32;
    let mut brace_depth = 0i32;
    let mut current = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '{' && chars.get(i + 1) == Some(&'{') {
            brace_depth += 1;
            current.push(c);
            current.push(chars[i + 1]);
            i += 2;
            continue;
        }
        if c == '}' && chars.get(i + 1) == Some(&'}') {
            brace_depth -= 1;
            current.push(c);
            current.push(chars[i + 1]);
            i += 2;
            continue;
        }
        if c == '(' {
            paren_depth += 1;
        } else if c == ')' {
            paren_depth -= 1;
        }
        if c == ',' && paren_depth == 0 && brace_depth == 0 {
            args.push(current.trim().to_string());
            current = String::new();
            i += 1;
            continue;
        }
        current.push(c);
        i += 1;
    }
    args.push(current.trim().to_string());
    args
}

fn strip_quotes(s: &str) -> String {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' || first == b'\'') && first == last {
            return s[1..s.len() - 1].to_string();
        }
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_resolve_round_trips() {
        let mut ctx = Context::new();
        ctx.set("environment.target_url.value", Value::String("http://h".into()))
            .unwrap();
        assert_eq!(
            ctx.resolve("environment.target_url.value").unwrap(),
            &Value::String("http://h".into())
        );
    }

    #[test]
    fn resolve_missing_path_fails() {
        let ctx = Context::new();
        assert!(matches!(
            ctx.resolve("variables.nope.value"),
            Err(ContextError::PathNotFound(_))
        ));
    }

    #[test]
    fn resolve_through_scalar_is_type_mismatch() {
        let mut ctx = Context::new();
        ctx.set("variables.x", Value::String("scalar".into())).unwrap();
        assert!(matches!(
            ctx.resolve("variables.x.value"),
            Err(ContextError::TypeMismatch(_))
        ));
    }

    #[test]
    fn substitute_is_identity_without_braces() {
        let ctx = Context::new();
        assert_eq!(ctx.substitute("plain text").unwrap(), "plain text");
    }

    #[test]
    fn substitute_resolves_variable_reference() {
        let mut ctx = Context::new();
        ctx.set("variables.token.value", Value::String("abc123".into()))
            .unwrap();
        assert_eq!(
            ctx.substitute("Bearer {{variables.token.value}}").unwrap(),
            "Bearer abc123"
        );
    }

    #[test]
    fn substitute_rejects_unclosed_marker() {
        let ctx = Context::new();
        assert!(matches!(
            ctx.substitute("{{oops"),
            Err(ContextError::UnclosedSubstitution)
        ));
    }

    #[test]
    fn substitute_invokes_function_calls_with_nested_args() {
        let mut ctx = Context::new();
        ctx.set("variables.raw.value", Value::String("x".into())).unwrap();
        let out = ctx
            .substitute("{{ base64_encode({{variables.raw.value}}) }}")
            .unwrap();
        assert_eq!(out, "eA==");
    }

    #[test]
    fn evaluate_condition_handles_equality() {
        let mut ctx = Context::new();
        ctx.set("variables.x.value", Value::String("abeA==".into()))
            .unwrap();
        assert!(ctx
            .evaluate_condition("{{variables.x.value}} == abeA==")
            .unwrap());
    }

    #[test]
    fn loop_child_context_does_not_leak_writes_upward() {
        let parent = Context::new();
        let mut child = parent.child_for_loop("item", Value::String("a".into()), Value::from(0));
        child.set("variables.leaked", Value::Bool(true)).unwrap();
        assert!(parent.resolve("variables.leaked").is_err());
        assert_eq!(child.resolve("loop.item").unwrap(), &Value::String("a".into()));
    }
}
