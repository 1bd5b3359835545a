//! Reads a PoC document off disk, accepting either YAML or JSON, and
//! deserializing it into [`crate::protocol::Poc`].

use crate::protocol::Poc;
use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::Path;

/// Loads and deserializes a PoC document. A top-level `poc:` key, if
/// present, is unwrapped first so a document can be embedded alongside
/// sibling keys (e.g. a suite manifest) without a separate parsing path.
pub fn load_poc_from_file<P: AsRef<Path>>(path: P) -> Result<Poc> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read PoC file at {}", path.display()))?;
    load_poc_from_str(&content, path.extension().and_then(|e| e.to_str()))
}

fn load_poc_from_str(content: &str, extension: Option<&str>) -> Result<Poc> {
    let mut value: Value = match extension {
        Some("json") => serde_json::from_str(content).context("failed to parse PoC as JSON")?,
        _ => serde_yaml::from_str(content).context("failed to parse PoC as YAML")?,
    };

    if let Value::Object(map) = &mut value {
        if let Some(inner) = map.remove("poc") {
            value = inner;
        }
    }

    serde_json::from_value(value).context("PoC document does not match the expected shape")
}

/// Validates a plan's overall document shape before the fuller semantic
/// pass in [`crate::validation`] — specifically, that it actually parsed
/// into something with an `exploit_scenario`, not an empty file.
pub fn ensure_non_empty(poc: &Poc) -> Result<()> {
    if poc.exploit_scenario.steps.is_empty() {
        bail!("PoC '{}' has no exploit_scenario.steps", poc.metadata.id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML_DOC: &str = r#"
metadata:
  id: poc-1
  title: sample
  dsl_version: "1.0"
exploit_scenario:
  steps:
    - dsl: wait a bit
      action:
        type: wait
        duration_ms: 1
"#;

    #[test]
    fn parses_a_bare_yaml_document() {
        let poc = load_poc_from_str(YAML_DOC, Some("yaml")).unwrap();
        assert_eq!(poc.metadata.id, "poc-1");
        assert_eq!(poc.exploit_scenario.steps.len(), 1);
    }

    #[test]
    fn unwraps_a_top_level_poc_key() {
        let wrapped = format!("poc:\n{}", YAML_DOC.lines().map(|l| format!("  {l}\n")).collect::<String>());
        let poc = load_poc_from_str(&wrapped, Some("yaml")).unwrap();
        assert_eq!(poc.metadata.id, "poc-1");
    }

    #[test]
    fn ensure_non_empty_rejects_a_scenario_with_no_steps() {
        let poc = load_poc_from_str(YAML_DOC, Some("yaml")).unwrap();
        let mut empty = poc;
        empty.exploit_scenario.steps.clear();
        assert!(ensure_non_empty(&empty).is_err());
    }
}
