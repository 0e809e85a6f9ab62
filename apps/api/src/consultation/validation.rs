//! Schema Validator — checks a parsed document against its kind's contract.
//!
//! Structural problems are errors and are all collected in one pass. Content
//! heuristics only ever produce warnings. Never panics on odd input.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::consultation::models::ConsultationKind;
use crate::consultation::schema::{contract, Count, Field, Shape};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Phrasing that belongs in the signal lists, not in weaknesses.
const SIGNAL_MARKERS: &[&str] = &[
    "признак активной",
    "признак дефицита",
    "в ресурсе",
    "в дефиците",
];

/// Phrasing that marks a deficit signal.
const DEFICIT_MARKERS: &[&str] = &["признак дефицита", "в дефиците"];

/// Phrasing that marks a resource (active) signal.
const RESOURCE_MARKERS: &[&str] = &["признак активной", "в ресурсе"];

pub fn validate(kind: ConsultationKind, document: &Value) -> ValidationResult {
    let mut errors = Vec::new();
    check_object(document, contract(kind), "", &mut errors);

    let warnings = match kind {
        ConsultationKind::Base => base_heuristics(document),
        _ => Vec::new(),
    };

    ValidationResult {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn describe_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn check_object(value: &Value, fields: &[Field], path: &str, errors: &mut Vec<String>) {
    let Some(object) = value.as_object() else {
        let at = if path.is_empty() { "document" } else { path };
        errors.push(format!(
            "{at}: expected object, got {}",
            describe_type(value)
        ));
        return;
    };

    for f in fields {
        let at = join(path, f.key);
        match object.get(f.key) {
            None => errors.push(format!("{at}: missing required key")),
            Some(v) => check_shape(v, &f.shape, &at, errors),
        }
    }
}

fn check_shape(value: &Value, shape: &Shape, path: &str, errors: &mut Vec<String>) {
    match shape {
        Shape::Text => {
            if !value.is_string() {
                errors.push(format!(
                    "{path}: expected string, got {}",
                    describe_type(value)
                ));
            }
        }
        Shape::Texts(count) => {
            if let Some(items) = check_array(value, count, path, errors) {
                for (i, item) in items.iter().enumerate() {
                    if !item.is_string() {
                        errors.push(format!(
                            "{path}[{i}]: expected string, got {}",
                            describe_type(item)
                        ));
                    }
                }
            }
        }
        Shape::Records(count, fields) => {
            if let Some(items) = check_array(value, count, path, errors) {
                for (i, item) in items.iter().enumerate() {
                    check_object(item, fields, &format!("{path}[{i}]"), errors);
                }
            }
        }
        Shape::Object(fields) => check_object(value, fields, path, errors),
    }
}

fn check_array<'a>(
    value: &'a Value,
    count: &Count,
    path: &str,
    errors: &mut Vec<String>,
) -> Option<&'a Vec<Value>> {
    let Some(items) = value.as_array() else {
        errors.push(format!(
            "{path}: expected array, got {}",
            describe_type(value)
        ));
        return None;
    };
    if !count.contains(items.len()) {
        errors.push(format!(
            "{path}: expected {} items, got {}",
            count.describe(),
            items.len()
        ));
    }
    Some(items)
}

// ────────────────────────────────────────────────────────────────────────────
// Heuristics
// ────────────────────────────────────────────────────────────────────────────

fn string_items<'a>(document: &'a Value, key: &str) -> impl Iterator<Item = (usize, &'a str)> {
    document
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .enumerate()
        .filter_map(|(i, v)| v.as_str().map(|s| (i, s)))
}

fn contains_any(text: &str, markers: &[&'static str]) -> Option<&'static str> {
    let lower = text.to_lowercase();
    markers.iter().find(|m| lower.contains(**m)).copied()
}

/// Weaknesses and the two signal lists are easy for a generator to swap.
fn base_heuristics(document: &Value) -> Vec<String> {
    let mut warnings = Vec::new();

    for (i, text) in string_items(document, "weaknesses") {
        if let Some(marker) = contains_any(text, SIGNAL_MARKERS) {
            warnings.push(format!(
                "weaknesses[{i}] reads like a signal entry (contains '{marker}')"
            ));
        }
    }

    for (i, text) in string_items(document, "resourceSignals") {
        if let Some(marker) = contains_any(text, DEFICIT_MARKERS) {
            warnings.push(format!(
                "resourceSignals[{i}] reads like a deficit signal (contains '{marker}')"
            ));
        }
    }

    for (i, text) in string_items(document, "deficitSignals") {
        if let Some(marker) = contains_any(text, RESOURCE_MARKERS) {
            warnings.push(format!(
                "deficitSignals[{i}] reads like a resource signal (contains '{marker}')"
            ));
        }
    }

    warnings
}
