// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Template interpolation for action payloads.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Regex pattern for {{key}} tokens (double braces, identifier chars only).
// Allow expect here as the regex is compile-time verified to be valid
#[allow(clippy::expect_used)]
static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{([a-zA-Z_][a-zA-Z0-9_]*)\}\}").expect("constant regex pattern is valid")
});

/// Interpolate `{{key}}` tokens in a template against a trigger payload.
///
/// String scalars are scanned for tokens; each token is replaced by the
/// string form of the payload's value for that key (strings verbatim, other
/// scalars in JSON form). Unknown keys are left literal. Non-string scalars
/// pass through untouched; mappings and sequences recurse. Templates are
/// data, not code: no expressions, no escaping syntax.
pub fn interpolate(template: &Value, payload: &Value) -> Value {
    match template {
        Value::String(s) => Value::String(interpolate_str(s, payload)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| interpolate(item, payload)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate(v, payload)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Interpolate tokens within a single string scalar.
pub fn interpolate_str(template: &str, payload: &Value) -> String {
    TOKEN_PATTERN
        .replace_all(template, |caps: &regex::Captures| {
            let key = &caps[1];
            match payload.get(key) {
                Some(Value::String(s)) => s.clone(),
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            }
        })
        .to_string()
}

#[cfg(test)]
#[path = "template_tests.rs"]
mod tests;
