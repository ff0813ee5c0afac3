//! `{{ incident.field }}` substitution for action template text.

use crate::error::TemplateError;
use serde_json::Value;
use tracing::warn;

/// Render every `{{ path }}` in `template` by looking `path` up in `ctx`.
///
/// Paths are dotted (`incident.subject`). An unknown path renders as an
/// empty string.
pub fn render_string(template: &str, ctx: &Value) -> Result<String, TemplateError> {
    let mut result = String::new();
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let end = after_open.find("}}").ok_or_else(|| TemplateError::Unclosed {
            template: template.to_string(),
        })?;
        let expr = after_open[..end].trim();
        if expr.is_empty() {
            return Err(TemplateError::EmptyExpression {
                template: template.to_string(),
            });
        }
        match resolve_path(expr, ctx) {
            Some(value) => result.push_str(&value_to_string(value)),
            None => warn!(expression = expr, "Unknown template variable"),
        }
        rest = &after_open[end + 2..];
    }
    result.push_str(rest);

    Ok(result)
}

/// Check that every expression in `template` is closed and non-empty.
pub fn validate(template: &str) -> Result<(), TemplateError> {
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after_open = &rest[start + 2..];
        let end = after_open.find("}}").ok_or_else(|| TemplateError::Unclosed {
            template: template.to_string(),
        })?;
        if after_open[..end].trim().is_empty() {
            return Err(TemplateError::EmptyExpression {
                template: template.to_string(),
            });
        }
        rest = &after_open[end + 2..];
    }
    Ok(())
}

fn resolve_path<'v>(expr: &str, ctx: &'v Value) -> Option<&'v Value> {
    expr.split('.')
        .try_fold(ctx, |value, key| value.as_object()?.get(key.trim()))
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
