//! The `{{expression}}` language.
//!
//! Deliberately small and total: bare identifiers, dotted paths, pipes
//! into a fixed filter set, and a two-operator condition form. Anything
//! richer belongs in an agent, not the workflow layer.

use rcore::{Error, Result};
use serde_json::Value;

use crate::scope::Scope;

/// Evaluate a full expression (with optional filters) against a scope.
///
/// Resolution order for a bare identifier: variables, inputs, loop
/// state (`loop.index`, `loop.count`, `loop.first`, `loop.last`,
/// `item`), built-ins (`date`, `time`), else the identifier itself as a
/// literal. Dotted paths resolve nested maps; a missing segment is an
/// error.
pub fn eval(expr: &str, scope: &Scope) -> Result<Value> {
    let mut segments = expr.split('|').map(str::trim);
    let base = segments.next().unwrap_or_default();
    let mut value = eval_base(base, scope)?;
    for filter in segments {
        value = apply_filter(filter, value)?;
    }
    Ok(value)
}

fn eval_base(expr: &str, scope: &Scope) -> Result<Value> {
    if expr.is_empty() {
        return Ok(Value::String(String::new()));
    }

    // Whole-token lookup first so `loop.index` style synthetics win
    // over dotted-path traversal.
    if let Some(value) = scope.lookup(expr) {
        return Ok(value);
    }

    if let Some(value) = builtin(expr) {
        return Ok(value);
    }

    if let Some((root, path)) = expr.split_once('.') {
        let Some(mut value) = scope.lookup(root) else {
            return Err(Error::validation(
                "expression",
                format!("'{expr}': unknown name '{root}'"),
            ));
        };
        for segment in path.split('.') {
            value = match &value {
                Value::Object(map) => map.get(segment).cloned().ok_or_else(|| {
                    Error::validation(
                        "expression",
                        format!("'{expr}': missing segment '{segment}'"),
                    )
                })?,
                _ => {
                    return Err(Error::validation(
                        "expression",
                        format!("'{expr}': segment '{segment}' is not addressable"),
                    ));
                }
            };
        }
        return Ok(value);
    }

    // Unresolved bare identifier evaluates to itself.
    Ok(Value::String(expr.to_string()))
}

fn builtin(name: &str) -> Option<Value> {
    match name {
        "date" => Some(Value::String(
            chrono::Local::now().format("%Y-%m-%d").to_string(),
        )),
        "time" => Some(Value::String(
            chrono::Local::now().format("%H:%M:%S").to_string(),
        )),
        _ => None,
    }
}

fn apply_filter(filter: &str, value: Value) -> Result<Value> {
    let (name, arg) = match filter.split_once(':') {
        Some((name, arg)) => (name.trim(), arg),
        None => (filter, ""),
    };
    let out = match name {
        "upper" => Value::String(to_text(&value).to_uppercase()),
        "lower" => Value::String(to_text(&value).to_lowercase()),
        "trim" => Value::String(to_text(&value).trim().to_string()),
        "default" => {
            if is_blank(&value) {
                Value::String(arg.to_string())
            } else {
                value
            }
        }
        "lines" => Value::Array(
            to_text(&value)
                .lines()
                .map(|l| Value::String(l.to_string()))
                .collect(),
        ),
        "words" => Value::Array(
            to_text(&value)
                .split_whitespace()
                .map(|w| Value::String(w.to_string()))
                .collect(),
        ),
        "truncate" => {
            let n: usize = arg.trim().parse().map_err(|_| {
                Error::validation("expression", format!("truncate needs a number, got '{arg}'"))
            })?;
            Value::String(to_text(&value).chars().take(n).collect())
        }
        "join" => match value {
            Value::Array(items) => Value::String(
                items
                    .iter()
                    .map(to_text)
                    .collect::<Vec<_>>()
                    .join(arg),
            ),
            other => other,
        },
        other => {
            return Err(Error::validation(
                "expression",
                format!("unknown filter '{other}'"),
            ));
        }
    };
    Ok(out)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Render a value the way interpolation does: strings raw, scalars via
/// display, null empty, containers as JSON.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Expand every `{{ expr }}` in a template. Idempotent on strings with
/// no `{{`.
pub fn interpolate(template: &str, scope: &Scope) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        let Some(end) = tail.find("}}") else {
            // Unterminated marker passes through untouched.
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let value = eval(tail[..end].trim(), scope)?;
        out.push_str(&to_text(&value));
        rest = &tail[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Coerce a value to a boolean: non-empty string, non-zero number,
/// non-null container are true.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Evaluate a condition string.
///
/// `X in Y` / `X not in Y` are substring tests on the rendered sides;
/// anything else evaluates and coerces to bool.
pub fn eval_condition(cond: &str, scope: &Scope) -> Result<bool> {
    let cond = cond.trim();
    if let Some((left, right)) = split_operator(cond, " not in ") {
        let l = eval_side(left, scope)?;
        let r = eval_side(right, scope)?;
        return Ok(!r.contains(&l));
    }
    if let Some((left, right)) = split_operator(cond, " in ") {
        let l = eval_side(left, scope)?;
        let r = eval_side(right, scope)?;
        return Ok(r.contains(&l));
    }

    // A lone `{{expr}}` coerces the evaluated value, preserving
    // falsiness of `false`, `0`, and null.
    let inner = cond
        .strip_prefix("{{")
        .and_then(|s| s.strip_suffix("}}"))
        .filter(|s| !s.contains("{{"));
    if let Some(inner) = inner {
        return Ok(truthy(&eval(inner.trim(), scope)?));
    }
    if cond.contains("{{") {
        return Ok(!interpolate(cond, scope)?.trim().is_empty());
    }
    Ok(truthy(&eval(cond, scope)?))
}

fn split_operator<'a>(cond: &'a str, op: &str) -> Option<(&'a str, &'a str)> {
    // Never split inside an interpolation marker.
    let idx = cond.find(op)?;
    let before = &cond[..idx];
    if before.matches("{{").count() != before.matches("}}").count() {
        return None;
    }
    Some((before.trim(), cond[idx + op.len()..].trim()))
}

fn eval_side(side: &str, scope: &Scope) -> Result<String> {
    if side.contains("{{") {
        interpolate(side, scope)
    } else {
        Ok(to_text(&eval(side, scope)?))
    }
}
