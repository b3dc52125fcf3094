//! Script Interpreter Tool
//!
//! Runs small expression programs over named inputs. Scripts are `evalexpr`
//! programs: chained expressions separated by `;`, with assignment, the
//! `math::*` function namespace, and the invocation inputs bound as
//! variables. The script's `result` variable is the output when set;
//! otherwise the value of the final expression is returned.
//!
//! The interpreter's second-order surface is
//! [`create_function_executor`](crate::inferflow::tools::ScriptInterpreter::create_function_executor):
//! given a script once, it returns a reusable executor that actuation steps
//! invoke per cell. The executor is a [`ToolFn`], so the monitored decorator
//! can observe each invocation separately from the creation call.
//!
//! # Example
//!
//! ```rust,no_run
//! use inferflow::tools::{ScriptInterpreter, ScriptInterpreterTool};
//!
//! # async {
//! let interpreter = ScriptInterpreterTool::new();
//! let out = interpreter
//!     .execute("result = a + b", &serde_json::json!({"a": 2, "b": 3}))
//!     .await
//!     .unwrap();
//! assert_eq!(out, serde_json::json!(5));
//! # };
//! ```

use crate::inferflow::tools::{ScriptInterpreter, ToolError, ToolFn};
use async_trait::async_trait;
use evalexpr::{Context, ContextWithMutableVariables};

/// Expression-program interpreter over named inputs.
#[derive(Clone, Default)]
pub struct ScriptInterpreterTool;

impl ScriptInterpreterTool {
    pub fn new() -> Self {
        Self
    }

    fn to_eval_value(value: &serde_json::Value) -> evalexpr::Value {
        match value {
            serde_json::Value::Null => evalexpr::Value::Empty,
            serde_json::Value::Bool(b) => evalexpr::Value::Boolean(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    evalexpr::Value::Int(i)
                } else {
                    evalexpr::Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => evalexpr::Value::String(s.clone()),
            serde_json::Value::Array(items) => evalexpr::Value::Tuple(
                items.iter().map(Self::to_eval_value).collect(),
            ),
            // Objects are bound as their JSON text; scripts treat them opaquely.
            other => evalexpr::Value::String(other.to_string()),
        }
    }

    fn to_json_value(value: &evalexpr::Value) -> serde_json::Value {
        match value {
            evalexpr::Value::Empty => serde_json::Value::Null,
            evalexpr::Value::Boolean(b) => serde_json::Value::Bool(*b),
            evalexpr::Value::Int(i) => serde_json::Value::from(*i),
            evalexpr::Value::Float(x) => serde_json::Value::from(*x),
            evalexpr::Value::String(s) => serde_json::Value::String(s.clone()),
            evalexpr::Value::Tuple(items) => serde_json::Value::Array(
                items.iter().map(Self::to_json_value).collect(),
            ),
        }
    }

    fn run(script: &str, inputs: &serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let mut context = evalexpr::HashMapContext::new();
        if let serde_json::Value::Object(entries) = inputs {
            for (name, value) in entries {
                context
                    .set_value(name.clone(), Self::to_eval_value(value))
                    .map_err(|e| {
                        ToolError::InvalidParameters(format!(
                            "cannot bind input '{}': {}",
                            name, e
                        ))
                    })?;
            }
        }
        let last = evalexpr::eval_with_context_mut(script, &mut context)
            .map_err(|e| ToolError::ExecutionFailed(format!("script failed: {}", e)))?;
        // `result` wins over the final expression value when the script sets it.
        let output = context
            .get_value("result")
            .cloned()
            .unwrap_or(last);
        Ok(Self::to_json_value(&output))
    }
}

#[async_trait]
impl ScriptInterpreter for ScriptInterpreterTool {
    async fn execute(
        &self,
        script: &str,
        inputs: &serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        Self::run(script, inputs)
    }

    fn create_function_executor(&self, script: &str) -> Result<ToolFn, ToolError> {
        if script.trim().is_empty() {
            return Err(ToolError::InvalidParameters(
                "empty script".to_string(),
            ));
        }
        let script = script.to_string();
        Ok(ToolFn::new("function_executor", move |params| {
            let script = script.clone();
            Box::pin(async move { Self::run(&script, &params) })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn executes_with_bound_inputs() {
        let interpreter = ScriptInterpreterTool::new();
        let out = interpreter
            .execute("a * b", &serde_json::json!({"a": 6, "b": 7}))
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!(42));
    }

    #[tokio::test]
    async fn result_variable_wins_over_last_expression() {
        let interpreter = ScriptInterpreterTool::new();
        let out = interpreter
            .execute("result = x + 1; 999", &serde_json::json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!(2));
    }

    #[tokio::test]
    async fn script_errors_become_execution_failures() {
        let interpreter = ScriptInterpreterTool::new();
        assert!(matches!(
            interpreter.execute("undefined_var + 1", &serde_json::json!({})).await,
            Err(ToolError::ExecutionFailed(_))
        ));
    }

    #[tokio::test]
    async fn function_executor_is_reusable() {
        let interpreter = ScriptInterpreterTool::new();
        let executor = interpreter
            .create_function_executor("result = n * n")
            .unwrap();
        assert_eq!(
            executor.invoke(serde_json::json!({"n": 3})).await.unwrap(),
            serde_json::json!(9)
        );
        assert_eq!(
            executor.invoke(serde_json::json!({"n": 5})).await.unwrap(),
            serde_json::json!(25)
        );
    }

    #[tokio::test]
    async fn string_inputs_concatenate() {
        let interpreter = ScriptInterpreterTool::new();
        let out = interpreter
            .execute(
                "result = first + \" \" + second",
                &serde_json::json!({"first": "hello", "second": "world"}),
            )
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!("hello world"));
    }

    #[tokio::test]
    async fn empty_script_is_rejected_at_creation() {
        let interpreter = ScriptInterpreterTool::new();
        assert!(matches!(
            interpreter.create_function_executor("  "),
            Err(ToolError::InvalidParameters(_))
        ));
    }
}
