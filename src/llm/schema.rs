//! Structured parsing of model output
//!
//! Models are asked for JSON but frequently wrap it in prose or markdown
//! fences, so parsing first extracts the outermost `{ ... }` object.

use crate::neo4j::models::RelationKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::profiles::TaskKind;

/// Verdict for one candidate pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionVerdict {
    /// `None` when the model found no relationship
    pub relation_kind: Option<RelationKind>,
    pub confidence: f64,
    pub rationale: String,
}

/// A model response validated against its task's schema
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredResult {
    Connection(ConnectionVerdict),
    Insight(String),
    Tags(Vec<String>),
}

impl StructuredResult {
    pub fn into_connection(self) -> Option<ConnectionVerdict> {
        match self {
            Self::Connection(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_insight(self) -> Option<String> {
        match self {
            Self::Insight(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_tags(self) -> Option<Vec<String>> {
        match self {
            Self::Tags(t) => Some(t),
            _ => None,
        }
    }
}

/// Parse raw model text for `task`. The error is a human-readable reason.
pub fn parse_response(task: TaskKind, raw: &str) -> Result<StructuredResult, String> {
    match task {
        TaskKind::Connection => parse_connection(raw).map(StructuredResult::Connection),
        TaskKind::Insight => parse_insight(raw).map(StructuredResult::Insight),
        TaskKind::Tagging => parse_tags(raw).map(StructuredResult::Tags),
    }
}

/// Extract the outermost JSON object from text that may contain fences or prose
pub fn extract_json(raw: &str) -> Option<Value> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}

fn parse_connection(raw: &str) -> Result<ConnectionVerdict, String> {
    let value = extract_json(raw).ok_or_else(|| "response contains no JSON object".to_string())?;
    let obj = value
        .as_object()
        .ok_or_else(|| "response is not a JSON object".to_string())?;

    let relation_kind = match obj.get("relation_kind") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if is_none_marker(s) => None,
        Some(Value::String(s)) => Some(s.parse::<RelationKind>()?),
        Some(other) => return Err(format!("relation_kind has unexpected value {}", other)),
    };

    let confidence = match obj.get("confidence") {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| "confidence is not a finite number".to_string())?,
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("confidence '{}' is not a number", s))?,
        None | Some(Value::Null) if relation_kind.is_none() => 0.0,
        _ => return Err("missing confidence".to_string()),
    };
    if !(0.0..=1.0).contains(&confidence) {
        return Err(format!("confidence {} outside 0.0..=1.0", confidence));
    }

    let rationale = obj
        .get("rationale")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    Ok(ConnectionVerdict {
        relation_kind,
        confidence,
        rationale,
    })
}

fn is_none_marker(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "" | "none" | "null" | "no_relationship"
    )
}

fn parse_insight(raw: &str) -> Result<String, String> {
    if let Some(value) = extract_json(raw) {
        if let Some(summary) = value.get("summary").and_then(Value::as_str) {
            let summary = summary.trim();
            if summary.is_empty() {
                return Err("summary is empty".to_string());
            }
            return Ok(summary.to_string());
        }
    }
    let text = strip_fences(raw);
    if text.is_empty() {
        Err("empty insight response".to_string())
    } else {
        Ok(text.to_string())
    }
}

fn parse_tags(raw: &str) -> Result<Vec<String>, String> {
    let candidates: Vec<String> = match extract_json(raw)
        .as_ref()
        .and_then(|v| v.get("tags"))
        .and_then(Value::as_array)
    {
        Some(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        None => strip_fences(raw)
            .split([',', '\n'])
            .map(str::to_string)
            .collect(),
    };

    let mut tags: Vec<String> = Vec::new();
    for candidate in candidates {
        let tag = clean_tag(&candidate);
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    if tags.is_empty() {
        Err("no tags in response".to_string())
    } else {
        Ok(tags)
    }
}

/// Lowercase, trim list markers and quotes, join words with '-'
fn clean_tag(raw: &str) -> String {
    raw.trim()
        .trim_start_matches(['-', '*', '#'])
        .trim()
        .trim_matches(['"', '\'', '`', '.'])
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().trim_end_matches("```").trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_in_fenced_prose() {
        let raw = "Sure! Here you go:\n```json\n{\"relation_kind\": \"supports\", \"confidence\": 0.82, \"rationale\": \"Both discuss vendor X\"}\n```";
        let verdict = parse_response(TaskKind::Connection, raw)
            .unwrap()
            .into_connection()
            .unwrap();
        assert_eq!(verdict.relation_kind, Some(RelationKind::Supports));
        assert!((verdict.confidence - 0.82).abs() < 1e-9);
        assert_eq!(verdict.rationale, "Both discuss vendor X");
    }

    #[test]
    fn test_connection_none_means_no_relationship() {
        let verdict = parse_connection(r#"{"relation_kind": "none"}"#).unwrap();
        assert_eq!(verdict.relation_kind, None);
        assert_eq!(verdict.confidence, 0.0);

        let verdict = parse_connection(r#"{"relation_kind": null, "confidence": 0.1}"#).unwrap();
        assert_eq!(verdict.relation_kind, None);
    }

    #[test]
    fn test_connection_schema_failures() {
        assert!(parse_connection("no json here").is_err());
        assert!(parse_connection(r#"{"relation_kind": "friendship", "confidence": 0.9}"#).is_err());
        assert!(parse_connection(r#"{"relation_kind": "causal"}"#).is_err());
        assert!(parse_connection(r#"{"relation_kind": "causal", "confidence": 1.5}"#).is_err());
    }

    #[test]
    fn test_insight_json_or_plain_text() {
        assert_eq!(
            parse_insight(r#"{"summary": " Three new vendor links. "}"#).unwrap(),
            "Three new vendor links."
        );
        assert_eq!(parse_insight("Plain summary.").unwrap(), "Plain summary.");
        assert!(parse_insight("   ").is_err());
    }

    #[test]
    fn test_tags_json_and_comma_list() {
        assert_eq!(
            parse_tags(r#"{"tags": ["Rust", "async io", "rust"]}"#).unwrap(),
            vec!["rust", "async-io"]
        );
        assert_eq!(
            parse_tags("machine learning, #Rust, \"graphs\"").unwrap(),
            vec!["machine-learning", "rust", "graphs"]
        );
        assert!(parse_tags(" , ,").is_err());
    }
}
