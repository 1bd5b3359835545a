//! Extractor handlers: post-process an HTTP response (or other resolved
//! context value) into a variable written at `variables.<target_variable>`.
//!
//! Each extractor reads its selector fields straight out of the flattened
//! `ResponseAction::params`, and is handed the already-resolved `source`
//! value by the orchestrator (see [`default_source_path`] for how the
//! source path is chosen when the PoC doesn't override it with its own
//! `source`).

use crate::context::Context;
use crate::errors::ErrorCode;
use crate::protocol::ResponseAction;
use crate::registries::ExtractorHandler;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("path '{0}' not found in extraction source")]
    PathNotFound(String),
    #[error("header '{0}' not found in response")]
    HeaderNotFound(String),
    #[error("pattern '{0}' found no match")]
    NoMatch(String),
    #[error("invalid pattern '{0}': {1}")]
    InvalidPattern(String, String),
    #[error("extraction source is not usable for this extractor: {0}")]
    InvalidSource(String),
    #[error(transparent)]
    Context(#[from] crate::context::ContextError),
}

impl ExtractError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::PathNotFound(_) => ErrorCode::EXTRACTION_PATH_NOT_FOUND,
            Self::HeaderNotFound(_) => ErrorCode::EXTRACTION_HEADER_NOT_FOUND,
            Self::NoMatch(_) => ErrorCode::EXTRACTION_NO_MATCH,
            Self::InvalidPattern(..) => ErrorCode::EXTRACTION_INVALID_PATTERN,
            Self::InvalidSource(_) => ErrorCode::EXTRACTION_INVALID_SOURCE,
            Self::Context(e) => e.code(),
        }
    }
}

/// The context path an extractor reads from when the PoC doesn't name its
/// own `source` override.
pub fn default_source_path(extractor_type: &str) -> &'static str {
    match extractor_type {
        "extract_from_json" => "last_http_response.body_json",
        "extract_from_header" => "last_http_response.headers",
        "extract_from_body_regex" | "extract_from_html" | "extract_from_xml" => {
            "last_http_response.body"
        }
        _ => "last_http_response.body_json",
    }
}

fn param_str<'a>(action: &'a ResponseAction, key: &str) -> Option<&'a str> {
    action.params.get(key).and_then(Value::as_str)
}

fn extract_all_flag(action: &ResponseAction) -> bool {
    action
        .params
        .get("extract_all")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn body_as_text(source: &Value) -> String {
    match source {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------
// extract_from_json
// ---------------------------------------------------------------------

pub struct JsonPathExtractor;

impl ExtractorHandler for JsonPathExtractor {
    fn extractor_type(&self) -> &'static str {
        "extract_from_json"
    }

    fn extract(
        &self,
        _ctx: &Context,
        source: &Value,
        action: &ResponseAction,
    ) -> Result<Value, ExtractError> {
        let path = param_str(action, "json_path")
            .or_else(|| param_str(action, "path"))
            .ok_or_else(|| ExtractError::InvalidSource("missing json_path".to_string()))?;
        navigate_json(source, path, extract_all_flag(action))
            .ok_or_else(|| ExtractError::PathNotFound(path.to_string()))
    }
}

/// A JSONPath subset: optional leading `$`/`.`, `.field` chains, and
/// `[N]`/`[-N]`/`[*]` array indexing. `[*]` (or `extract_all`) collects
/// every element the path reaches into a sequence.
fn navigate_json(root: &Value, path: &str, extract_all: bool) -> Option<Value> {
    let clean = path.trim_start_matches('$').trim_start_matches('.');
    if clean.is_empty() {
        return Some(root.clone());
    }

    let mut current = vec![root.clone()];
    for segment in split_path_segments(clean) {
        let mut next = Vec::new();
        for value in &current {
            if let Some(field) = segment.strip_prefix('.') {
                let child = value.as_object()?.get(field)?.clone();
                next.push(child);
            } else if segment == "[*]" {
                let arr = value.as_array()?;
                next.extend(arr.iter().cloned());
            } else if let Some(index_str) = segment.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                let arr = value.as_array()?;
                let index: i64 = index_str.parse().ok()?;
                let resolved = if index < 0 {
                    arr.len().checked_sub(index.unsigned_abs() as usize)
                } else {
                    Some(index as usize)
                }?;
                next.push(arr.get(resolved)?.clone());
            } else {
                let child = value.as_object()?.get(segment.as_str())?.clone();
                next.push(child);
            }
        }
        current = next;
        if current.is_empty() {
            return None;
        }
    }

    if extract_all {
        Some(Value::Array(current))
    } else {
        current.into_iter().next()
    }
}

/// Splits `field[0].nested[*]` into `[".field", "[0]", ".nested", "[*]"]`.
fn split_path_segments(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    for c in path.chars() {
        match c {
            '.' => {
                if !current.is_empty() {
                    segments.push(current.clone());
                    current.clear();
                }
                current.push('.');
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(current.clone());
                    current.clear();
                }
                current.push('[');
            }
            ']' => {
                current.push(']');
                segments.push(current.clone());
                current.clear();
            }
            _ => {
                if current.is_empty() {
                    current.push('.');
                }
                current.push(c);
            }
        }
    }
    if !current.is_empty() && current != "." {
        segments.push(current);
    }
    segments
}

// ---------------------------------------------------------------------
// extract_from_header
// ---------------------------------------------------------------------

pub struct HeaderExtractor;

impl ExtractorHandler for HeaderExtractor {
    fn extractor_type(&self) -> &'static str {
        "extract_from_header"
    }

    fn extract(
        &self,
        _ctx: &Context,
        source: &Value,
        action: &ResponseAction,
    ) -> Result<Value, ExtractError> {
        let name = param_str(action, "header_name")
            .ok_or_else(|| ExtractError::InvalidSource("missing header_name".to_string()))?;
        let headers = source
            .as_object()
            .ok_or_else(|| ExtractError::InvalidSource("header source is not an object".to_string()))?;

        let matches: Vec<Value> = headers
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
            .collect();

        if matches.is_empty() {
            return Err(ExtractError::HeaderNotFound(name.to_string()));
        }
        if extract_all_flag(action) {
            Ok(Value::Array(matches))
        } else {
            Ok(matches.into_iter().next().unwrap())
        }
    }
}

// ---------------------------------------------------------------------
// extract_from_body_regex
// ---------------------------------------------------------------------

pub struct RegexExtractor;

impl ExtractorHandler for RegexExtractor {
    fn extractor_type(&self) -> &'static str {
        "extract_from_body_regex"
    }

    fn extract(
        &self,
        _ctx: &Context,
        source: &Value,
        action: &ResponseAction,
    ) -> Result<Value, ExtractError> {
        let pattern = param_str(action, "regex")
            .ok_or_else(|| ExtractError::InvalidSource("missing regex".to_string()))?;
        let group = action.params.get("group").and_then(Value::as_u64).unwrap_or(0) as usize;
        let re = Regex::new(pattern)
            .map_err(|e| ExtractError::InvalidPattern(pattern.to_string(), e.to_string()))?;
        let text = body_as_text(source);

        if extract_all_flag(action) {
            let matches: Vec<Value> = re
                .captures_iter(&text)
                .filter_map(|caps| {
                    caps.get(group)
                        .or_else(|| caps.get(0))
                        .map(|m| Value::String(m.as_str().to_string()))
                })
                .collect();
            if matches.is_empty() {
                Err(ExtractError::NoMatch(pattern.to_string()))
            } else {
                Ok(Value::Array(matches))
            }
        } else {
            let caps = re
                .captures(&text)
                .ok_or_else(|| ExtractError::NoMatch(pattern.to_string()))?;
            let matched = caps
                .get(group)
                .or_else(|| caps.get(0))
                .map(|m| m.as_str())
                .unwrap_or_default();
            Ok(Value::String(matched.to_string()))
        }
    }
}

// ---------------------------------------------------------------------
// extract_from_html
// ---------------------------------------------------------------------

pub struct HtmlExtractor;

impl ExtractorHandler for HtmlExtractor {
    fn extractor_type(&self) -> &'static str {
        "extract_from_html"
    }

    fn extract(
        &self,
        _ctx: &Context,
        source: &Value,
        action: &ResponseAction,
    ) -> Result<Value, ExtractError> {
        let selector_str = param_str(action, "css_selector")
            .map(str::to_string)
            .or_else(|| param_str(action, "xpath").map(xpath_to_css));
        let selector_str = selector_str
            .ok_or_else(|| ExtractError::InvalidSource("missing css_selector or xpath".to_string()))?;

        let selector = Selector::parse(&selector_str)
            .map_err(|e| ExtractError::InvalidPattern(selector_str.clone(), format!("{e:?}")))?;
        let document = Html::parse_document(&body_as_text(source));
        let attribute = param_str(action, "attribute");

        let values: Vec<Value> = document
            .select(&selector)
            .filter_map(|el| match attribute {
                Some(attr) => el.value().attr(attr).map(|v| Value::String(v.to_string())),
                None => Some(Value::String(el.text().collect::<String>().trim().to_string())),
            })
            .collect();

        if values.is_empty() {
            return Err(ExtractError::NoMatch(selector_str));
        }
        if extract_all_flag(action) {
            Ok(Value::Array(values))
        } else {
            Ok(values.into_iter().next().unwrap())
        }
    }
}

/// Maps a very small XPath subset (`//tag[@attr='v']`, `//tag[N]`, `/tag`)
/// onto a CSS selector good enough for the common scraping cases.
fn xpath_to_css(xpath: &str) -> String {
    let mut css = xpath.replace("//", " ").replace('/', " > ");
    css = css.replace("[@", "[").replace("='", "=\"").replace("']", "\"]");
    css.trim().to_string()
}

// ---------------------------------------------------------------------
// extract_from_xml
// ---------------------------------------------------------------------

pub struct XmlExtractor;

impl ExtractorHandler for XmlExtractor {
    fn extractor_type(&self) -> &'static str {
        "extract_from_xml"
    }

    fn extract(
        &self,
        _ctx: &Context,
        source: &Value,
        action: &ResponseAction,
    ) -> Result<Value, ExtractError> {
        let xpath = param_str(action, "xpath")
            .ok_or_else(|| ExtractError::InvalidSource("missing xpath".to_string()))?;
        let text = body_as_text(source);
        let doc = roxmltree::Document::parse(&text)
            .map_err(|e| ExtractError::InvalidPattern(xpath.to_string(), e.to_string()))?;

        let (node_path, attr_name) = match xpath.rsplit_once("/@") {
            Some((path, attr)) => (path, Some(attr)),
            None => (xpath, None),
        };
        let tag = node_path.trim_start_matches('/').rsplit('/').next().unwrap_or(node_path);

        let matches: Vec<Value> = doc
            .descendants()
            .filter(|n| n.is_element() && n.tag_name().name() == tag)
            .filter_map(|n| match attr_name {
                Some(attr) => n.attribute(attr).map(|v| Value::String(v.to_string())),
                None => n.text().map(|t| Value::String(t.trim().to_string())),
            })
            .collect();

        if matches.is_empty() {
            return Err(ExtractError::NoMatch(xpath.to_string()));
        }
        if extract_all_flag(action) {
            Ok(Value::Array(matches))
        } else {
            Ok(matches.into_iter().next().unwrap())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(extractor_type: &str, target_variable: &str, params: Value) -> ResponseAction {
        let mut merged = params;
        merged["type"] = json!(extractor_type);
        merged["target_variable"] = json!(target_variable);
        serde_json::from_value(merged).unwrap()
    }

    #[test]
    fn json_extractor_navigates_nested_fields_and_indices() {
        let ctx = Context::new();
        let body = json!({"data": {"tokens": ["a", "b", "c"]}});
        let a = action("extract_from_json", "t", json!({"json_path": "$.data.tokens[1]"}));
        assert_eq!(JsonPathExtractor.extract(&ctx, &body, &a).unwrap(), json!("b"));

        let a_all = action("extract_from_json", "t", json!({"json_path": "data.tokens[*]", "extract_all": true}));
        assert_eq!(
            JsonPathExtractor.extract(&ctx, &body, &a_all).unwrap(),
            json!(["a", "b", "c"])
        );
    }

    #[test]
    fn json_extractor_reports_missing_path() {
        let ctx = Context::new();
        let body = json!({"data": {}});
        let a = action("extract_from_json", "t", json!({"json_path": "data.missing"}));
        assert!(matches!(
            JsonPathExtractor.extract(&ctx, &body, &a),
            Err(ExtractError::PathNotFound(_))
        ));
    }

    #[test]
    fn header_extractor_is_case_insensitive() {
        let ctx = Context::new();
        let headers = json!({"X-Request-Id": "req-1"});
        let a = action("extract_from_header", "t", json!({"header_name": "x-request-id"}));
        assert_eq!(
            HeaderExtractor.extract(&ctx, &headers, &a).unwrap(),
            json!("req-1")
        );
    }

    #[test]
    fn regex_extractor_prefers_the_requested_capture_group() {
        let ctx = Context::new();
        let body = Value::String("Bearer abc123".to_string());
        let a = action("extract_from_body_regex", "t", json!({"regex": "Bearer (\\w+)", "group": 1}));
        assert_eq!(
            RegexExtractor.extract(&ctx, &body, &a).unwrap(),
            json!("abc123")
        );
    }

    #[test]
    fn html_extractor_reads_text_by_css_selector() {
        let ctx = Context::new();
        let body = Value::String("<div id=\"u\"><span class=\"n\">alice</span></div>".to_string());
        let a = action("extract_from_html", "t", json!({"css_selector": "#u .n"}));
        assert_eq!(
            HtmlExtractor.extract(&ctx, &body, &a).unwrap(),
            json!("alice")
        );
    }

    #[test]
    fn html_extractor_reads_an_attribute_when_requested() {
        let ctx = Context::new();
        let body = Value::String("<a href=\"/next\">go</a>".to_string());
        let a = action("extract_from_html", "t", json!({"css_selector": "a", "attribute": "href"}));
        assert_eq!(
            HtmlExtractor.extract(&ctx, &body, &a).unwrap(),
            json!("/next")
        );
    }

    #[test]
    fn xml_extractor_handles_attribute_selecting_xpath() {
        let ctx = Context::new();
        let body = Value::String("<root><user id=\"42\">alice</user></root>".to_string());
        let a = action("extract_from_xml", "t", json!({"xpath": "user/@id"}));
        assert_eq!(XmlExtractor.extract(&ctx, &body, &a).unwrap(), json!("42"));
    }

    #[test]
    fn xml_extractor_collects_text_content() {
        let ctx = Context::new();
        let body = Value::String("<root><user>alice</user></root>".to_string());
        let a = action("extract_from_xml", "t", json!({"xpath": "/root/user"}));
        assert_eq!(XmlExtractor.extract(&ctx, &body, &a).unwrap(), json!("alice"));
    }
}
