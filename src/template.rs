//! `{{ name }}` placeholder rendering for step parameters.
//!
//! Substitution is single-pass: a resolved value that itself contains
//! `{{ ... }}` is inserted literally and never re-expanded.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{ProvisionError, Result};
use crate::vars::Variables;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Variable names referenced by `input`, in order of appearance
pub fn references(input: &str) -> Vec<String> {
    placeholder()
        .captures_iter(input)
        .map(|cap| cap[1].to_string())
        .collect()
}

/// Replace every placeholder in `input` with its variable value
pub fn render(input: &str, vars: &Variables) -> Result<String> {
    let mut output = String::with_capacity(input.len());
    let mut last = 0;
    for cap in placeholder().captures_iter(input) {
        let whole = cap.get(0).expect("capture 0 always exists");
        let name = &cap[1];
        let value = vars
            .get(name)
            .ok_or_else(|| ProvisionError::template(format!("undefined variable '{}'", name)))?;
        output.push_str(&input[last..whole.start()]);
        output.push_str(value);
        last = whole.end();
    }
    output.push_str(&input[last..]);
    Ok(output)
}

/// Render every string inside a JSON value, recursively
pub fn render_value(value: &Value, vars: &Variables) -> Result<Value> {
    Ok(match value {
        Value::String(s) => Value::String(render(s, vars)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_value(item, vars))
                .collect::<Result<_>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), render_value(v, vars)?)))
                .collect::<Result<_>>()?,
        ),
        other => other.clone(),
    })
}

/// Variable names referenced anywhere inside a JSON value
pub fn value_references(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => references(s),
        Value::Array(items) => items.iter().flat_map(value_references).collect(),
        Value::Object(map) => map.values().flat_map(value_references).collect(),
        _ => Vec::new(),
    }
}
