//! `${...}` expression rendering using minijinja.
//!
//! Field values in state configuration may embed expressions such as
//! `${app.name}` or `${workflow.variables.timeout}`. Each expression is
//! evaluated independently against the variables exposed by the
//! [`ExecutionContext`](crate::context::ExecutionContext); literal text
//! around expressions passes through unchanged.

use minijinja::{Environment, UndefinedBehavior, Value};

use crate::error::{EngineError, EngineResult};

/// Renders templated field values.
pub trait ExpressionRenderer: Send + Sync {
    /// Render every `${...}` expression in `expression` against `variables`.
    fn render(&self, expression: &str, variables: &serde_json::Value) -> EngineResult<String>;
}

/// Minijinja-backed renderer. Undefined variables are errors.
pub struct JinjaExpressionRenderer {
    env: Environment<'static>,
}

impl Default for JinjaExpressionRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl JinjaExpressionRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self { env }
    }

    fn render_one(&self, inner: &str, ctx: &Value) -> EngineResult<String> {
        let source = format!("{{{{ {} }}}}", inner.trim());
        self.env.render_str(&source, ctx).map_err(|e| {
            tracing::debug!(expression = %inner, error = %e, "Expression render failed");
            unresolved(inner)
        })
    }
}

impl ExpressionRenderer for JinjaExpressionRenderer {
    fn render(&self, expression: &str, variables: &serde_json::Value) -> EngineResult<String> {
        if !contains_expression(expression) {
            return Ok(expression.to_string());
        }

        let ctx = Value::from_serialize(variables);
        let mut output = String::with_capacity(expression.len());
        let mut rest = expression;

        while let Some(start) = rest.find("${") {
            output.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or_else(|| EngineError::Expression(format!("Unterminated expression in '{}'", expression)))?;
            let inner = &after[..end];
            if inner.trim().is_empty() {
                return Err(unresolved(inner));
            }
            output.push_str(&self.render_one(inner, &ctx)?);
            rest = &after[end + 1..];
        }
        output.push_str(rest);

        Ok(output)
    }
}

/// Check if a string contains `${...}` expression syntax.
pub fn contains_expression(s: &str) -> bool {
    s.contains("${")
}

fn unresolved(inner: &str) -> EngineError {
    EngineError::Expression(format!("Expression ${{{}}} could not be resolved", inner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_literal_passthrough() {
        let renderer = JinjaExpressionRenderer::new();
        assert_eq!(renderer.render("plain", &json!({})).unwrap(), "plain");
    }

    #[test]
    fn test_nested_lookup() {
        let renderer = JinjaExpressionRenderer::new();
        let vars = json!({"app": {"name": "orders"}, "env": {"name": "prod"}});
        assert_eq!(
            renderer.render("${app.name}-${env.name}__1", &vars).unwrap(),
            "orders-prod__1"
        );
    }

    #[test]
    fn test_unresolved_expression_message() {
        let renderer = JinjaExpressionRenderer::new();
        let err = renderer.render("${workflow.variables.asg}", &json!({})).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Expression ${workflow.variables.asg} could not be resolved"
        );
        assert!(!err.is_contract_violation());
    }

    #[test]
    fn test_unterminated_expression() {
        let renderer = JinjaExpressionRenderer::new();
        assert!(renderer.render("${app.name", &json!({"app": {"name": "x"}})).is_err());
    }
}
