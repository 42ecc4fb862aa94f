//! Minimal default implementations of the template and expression traits.
//!
//! The production renderer is an external Handlebars-style engine; these
//! built-ins cover the common subset: `{{ dotted.path }}` substitution and
//! literal/path/comparison expressions. The engine runs out of the box.

use serde_json::Value;

use crate::context::{TemplateContext, is_truthy};
use crate::error::{EvalError, TemplateError};
use crate::traits::{ExpressionEvaluator, TemplateRenderer};

/// Substitutes `{{ path }}` tokens with values resolved from the context.
/// Unresolved paths render as the empty string.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleTemplateRenderer;

impl TemplateRenderer for SimpleTemplateRenderer {
    fn render(&self, template: &str, ctx: &TemplateContext) -> Result<String, TemplateError> {
        let mut output = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find("{{") {
            output.push_str(&rest[..open]);
            let after_open = &rest[open + 2..];
            let close = after_open.find("}}").ok_or_else(|| {
                TemplateError::Syntax(format!("unclosed '{{{{' in template: {template}"))
            })?;
            let expression = after_open[..close].trim();
            if let Some(value) = ctx.resolve(expression) {
                output.push_str(&value_to_string(value));
            }
            rest = &after_open[close + 2..];
        }
        output.push_str(rest);
        Ok(output)
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Evaluates literals, dotted paths, `!` negation, and `==`/`!=`
/// comparisons against the context.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleExpressionEvaluator;

impl SimpleExpressionEvaluator {
    fn eval_operand(&self, expression: &str, ctx: &TemplateContext) -> Value {
        let expression = expression.trim();

        if let Some(inner) = expression.strip_prefix('!') {
            return Value::Bool(!is_truthy(&self.eval_operand(inner, ctx)));
        }

        // Quoted strings and JSON literals (true, false, null, numbers).
        if let Ok(literal) = serde_json::from_str::<Value>(expression) {
            return literal;
        }
        if let Some(stripped) = expression
            .strip_prefix('\'')
            .and_then(|rest| rest.strip_suffix('\''))
        {
            return Value::String(stripped.to_string());
        }

        match ctx.resolve(expression) {
            Some(value) => value.clone(),
            None => Value::Null,
        }
    }
}

impl ExpressionEvaluator for SimpleExpressionEvaluator {
    fn evaluate(&self, expression: &str, ctx: &TemplateContext) -> Result<Value, EvalError> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(EvalError::Syntax {
                expression: expression.to_string(),
                message: "empty expression".to_string(),
            });
        }

        for (operator, negate) in [("==", false), ("!=", true)] {
            if let Some((left, right)) = expression.split_once(operator) {
                let left = self.eval_operand(left, ctx);
                let right = self.eval_operand(right, ctx);
                let equal = left == right;
                return Ok(Value::Bool(if negate { !equal } else { equal }));
            }
        }

        Ok(self.eval_operand(expression, ctx))
    }
}
