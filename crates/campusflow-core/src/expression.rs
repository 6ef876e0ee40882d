//! Expression evaluation for node configurations.
//!
//! Node configs embed references into the execution context with
//! `{{ ... }}` markers, e.g. `"{{ payload.studentId }}"` or
//! `"https://{{ nodes['fetch'].body.host }}/notify"`. A string is parsed
//! into a small tagged AST (`TemplateExpr`) -- literal text, a single
//! reference, or a mixed template -- and references are JEXL expressions
//! evaluated by `jexl_eval` against the context object.
//!
//! Evaluation is **total**: node configs run against partially populated
//! contexts by design (a node may reference a field its dependency has not
//! produced), so a failed or missing reference logs a warning and yields
//! the caller-supplied default. Nothing in this module returns an error to
//! the node pipeline.
//!
//! **Security note:** context payloads are always passed as context
//! objects, never interpolated into expression strings.

use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Template AST
// ---------------------------------------------------------------------------

/// Parsed form of a config string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateExpr {
    /// Plain text; evaluates to itself.
    Literal(String),
    /// The whole string is one `{{ expr }}` marker; evaluates to the
    /// referenced value with its JSON type preserved.
    Reference(String),
    /// Text interleaved with markers; evaluates to a concatenated string.
    Template(Vec<TemplateExpr>),
}

/// Marker opening a context reference.
const MARKER_OPEN: &str = "{{";
/// Marker closing a context reference.
const MARKER_CLOSE: &str = "}}";

/// Whether a raw string contains reference syntax at all.
pub fn has_reference(raw: &str) -> bool {
    raw.contains(MARKER_OPEN)
}

/// Parse a raw config string into a `TemplateExpr`.
///
/// An unterminated marker is kept as literal text; parsing never fails.
pub fn parse_template(raw: &str) -> TemplateExpr {
    if !has_reference(raw) {
        return TemplateExpr::Literal(raw.to_string());
    }

    let mut segments = Vec::new();
    let mut rest = raw;

    while let Some(open) = rest.find(MARKER_OPEN) {
        match rest[open..].find(MARKER_CLOSE) {
            Some(close_rel) => {
                if open > 0 {
                    segments.push(TemplateExpr::Literal(rest[..open].to_string()));
                }
                let inner = &rest[open + MARKER_OPEN.len()..open + close_rel];
                segments.push(TemplateExpr::Reference(inner.trim().to_string()));
                rest = &rest[open + close_rel + MARKER_CLOSE.len()..];
            }
            None => break,
        }
    }
    if !rest.is_empty() {
        segments.push(TemplateExpr::Literal(rest.to_string()));
    }

    match segments.len() {
        0 => TemplateExpr::Literal(String::new()),
        1 => segments.into_iter().next().unwrap(),
        _ => TemplateExpr::Template(segments),
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// JEXL-backed evaluator with standard string transforms pre-registered.
pub struct Evaluator {
    inner: jexl_eval::Evaluator<'static>,
}

impl Evaluator {
    pub fn new() -> Self {
        let inner = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.trim()))
            })
            .with_transform("length", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                let len = match &val {
                    Value::String(s) => s.len(),
                    Value::Array(a) => a.len(),
                    Value::Object(o) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { inner }
    }

    /// Evaluate a raw config string against the context.
    ///
    /// - No marker: the string evaluates to itself.
    /// - A single whole-string marker: the referenced value, type preserved.
    /// - Mixed text and markers: a concatenated string.
    ///
    /// Any reference that fails to parse, fails to evaluate, or resolves to
    /// null (jexl's result for a missing path) logs a warning and is
    /// replaced by `default`. In mixed templates a failed segment
    /// contributes the default's display form (empty for null).
    pub fn evaluate(&self, raw: &str, context: &Value, default: &Value) -> Value {
        match parse_template(raw) {
            TemplateExpr::Literal(text) => Value::String(text),
            TemplateExpr::Reference(expr) => match self.eval_reference(&expr, context) {
                Some(value) => value,
                None => {
                    tracing::warn!(
                        expression = expr.as_str(),
                        "expression did not resolve, using default"
                    );
                    default.clone()
                }
            },
            TemplateExpr::Template(segments) => {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        TemplateExpr::Literal(text) => out.push_str(&text),
                        TemplateExpr::Reference(expr) => {
                            match self.eval_reference(&expr, context) {
                                Some(value) => out.push_str(&value_to_display(&value)),
                                None => {
                                    tracing::warn!(
                                        expression = expr.as_str(),
                                        "template segment did not resolve, using default"
                                    );
                                    out.push_str(&value_to_display(default));
                                }
                            }
                        }
                        TemplateExpr::Template(_) => unreachable!("templates do not nest"),
                    }
                }
                Value::String(out)
            }
        }
    }

    /// Walk a JSON tree and evaluate every string leaf containing reference
    /// syntax. Leaves that fail to resolve become `null`.
    pub fn evaluate_tree(&self, value: &Value, context: &Value) -> Value {
        match value {
            Value::String(s) if has_reference(s) => {
                self.evaluate(s, context, &Value::Null)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.evaluate_tree(item, context))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.evaluate_tree(v, context)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Evaluate a config string to a display string (for URLs, headers,
    /// query parameters). Failed references yield the default.
    pub fn evaluate_to_string(&self, raw: &str, context: &Value, default: &str) -> String {
        value_to_display(&self.evaluate(raw, context, &Value::String(default.to_string())))
    }

    fn eval_reference(&self, expr: &str, context: &Value) -> Option<Value> {
        if expr.is_empty() || !context.is_object() {
            return None;
        }
        match self.inner.eval_in_context(expr, context) {
            // jexl resolves a missing property to null rather than erroring;
            // treat null as a missing path.
            Ok(Value::Null) => None,
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(
                    expression = expr,
                    error = %err,
                    "expression evaluation failed"
                );
                None
            }
        }
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Convert a JSON value to its display form for string assembly.
fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // Objects/arrays render as compact JSON
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
