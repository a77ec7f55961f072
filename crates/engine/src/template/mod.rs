//! Expression rendering for templated state fields.

mod renderer;

pub use renderer::{contains_expression, ExpressionRenderer, JinjaExpressionRenderer};
