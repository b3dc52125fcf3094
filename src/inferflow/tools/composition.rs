//! Composition Tool
//!
//! Turns a declarative plan of tool affordances into one callable. A plan is
//! an ordered list of [`AffordanceBinding`]s (tool name, affordance name,
//! parameters) executed against the agent's [`ToolBundle`]; each
//! affordance's output lands in a variables map under its `output` name, and
//! `$name` strings in later parameters are resolved from that map. The
//! composed callable is a second-order tool: every execution of the plan is
//! observable as its own event.
//!
//! When the agent configures a *paradigm directory*, each JSON file in it
//! defines one named, reusable composition spec; `list_compositions` and
//! `load_composition` read them.

use crate::inferflow::tools::{Composition, ToolBundle, ToolError, ToolFn};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One step of a composition plan: a tool affordance bound to parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffordanceBinding {
    pub tool_name: String,
    pub affordance_name: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Variable name the affordance's output is stored under; defaults to
    /// `"result"`.
    pub output: Option<String>,
}

/// Plan-driven composition of tool calls.
pub struct CompositionTool {
    paradigm_dir: Option<PathBuf>,
    bundle: ToolBundle,
}

impl CompositionTool {
    /// Create a composition tool over the agent's bundle, optionally backed
    /// by a paradigm directory of composition specs.
    pub fn new(bundle: ToolBundle, paradigm_dir: Option<PathBuf>) -> Self {
        Self {
            paradigm_dir,
            bundle,
        }
    }

    /// Resolve `$name` parameter strings from the variables map.
    fn resolve_params(
        params: &serde_json::Value,
        variables: &serde_json::Map<String, serde_json::Value>,
    ) -> serde_json::Value {
        match params {
            serde_json::Value::String(s) if s.starts_with('$') => variables
                .get(&s[1..])
                .cloned()
                .unwrap_or(serde_json::Value::Null),
            serde_json::Value::Object(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::resolve_params(v, variables)))
                    .collect(),
            ),
            serde_json::Value::Array(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|item| Self::resolve_params(item, variables))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn string_param(params: &serde_json::Value, key: &str) -> Result<String, ToolError> {
        params[key]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ToolError::InvalidParameters(format!("missing '{}'", key)))
    }

    /// Dispatch one affordance against the bundle.
    async fn run_affordance(
        bundle: &ToolBundle,
        binding: &AffordanceBinding,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        match (binding.tool_name.as_str(), binding.affordance_name.as_str()) {
            ("language_model", "generate") => {
                let prompt = Self::string_param(&params, "prompt")?;
                let system = params["system_message"].as_str().map(|s| s.to_string());
                let out = bundle
                    .language_model()?
                    .generate(&prompt, system.as_deref())
                    .await?;
                Ok(serde_json::Value::String(out))
            }
            ("language_model", "run_prompt") => {
                let template = Self::string_param(&params, "template")?;
                let out = bundle
                    .language_model()?
                    .run_prompt(&template, &params["variables"])
                    .await?;
                Ok(serde_json::Value::String(out))
            }
            ("file_system", "read") => {
                let path = Self::string_param(&params, "path")?;
                let out = bundle.file_system()?.read(&path).await?;
                Ok(serde_json::Value::String(out))
            }
            ("file_system", "write") => {
                let path = Self::string_param(&params, "path")?;
                let content = Self::string_param(&params, "content")?;
                let out = bundle.file_system()?.write(&path, &content).await?;
                Ok(serde_json::Value::String(out))
            }
            ("script_interpreter", "execute") => {
                let script = Self::string_param(&params, "script")?;
                bundle
                    .interpreter()?
                    .execute(&script, &params["inputs"])
                    .await
            }
            ("prompt_templates", "render") => {
                let template_name = Self::string_param(&params, "template_name")?;
                let out = bundle
                    .prompts()?
                    .render(&template_name, &params["variables"])
                    .await?;
                Ok(serde_json::Value::String(out))
            }
            ("formatter", "parse") => {
                let raw = Self::string_param(&params, "raw")?;
                Ok(bundle.formatter()?.parse(&raw))
            }
            (tool, affordance) => Err(ToolError::NotFound(format!(
                "affordance {}.{}",
                tool, affordance
            ))),
        }
    }
}

#[async_trait]
impl Composition for CompositionTool {
    async fn list_compositions(&self) -> Result<Vec<String>, ToolError> {
        let dir = self
            .paradigm_dir
            .as_ref()
            .ok_or_else(|| ToolError::Disabled("no paradigm directory".to_string()))?;
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn load_composition(&self, name: &str) -> Result<Vec<AffordanceBinding>, ToolError> {
        let dir = self
            .paradigm_dir
            .as_ref()
            .ok_or_else(|| ToolError::Disabled("no paradigm directory".to_string()))?;
        let path = dir.join(format!("{}.json", name));
        let content = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolError::NotFound(format!("composition '{}'", name))
            } else {
                ToolError::Io(format!("cannot read composition '{}': {}", name, e))
            }
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ToolError::ExecutionFailed(format!("invalid composition spec '{}': {}", name, e))
        })
    }

    fn compose(
        &self,
        plan: Vec<AffordanceBinding>,
        return_key: Option<&str>,
    ) -> Result<ToolFn, ToolError> {
        if plan.is_empty() {
            return Err(ToolError::InvalidParameters("empty plan".to_string()));
        }
        let bundle = self.bundle.clone();
        let return_key = return_key.unwrap_or("result").to_string();
        Ok(ToolFn::new("composed_plan", move |invocation_params| {
            let bundle = bundle.clone();
            let plan = plan.clone();
            let return_key = return_key.clone();
            Box::pin(async move {
                let mut variables = match invocation_params {
                    serde_json::Value::Object(entries) => entries,
                    serde_json::Value::Null => serde_json::Map::new(),
                    other => {
                        let mut entries = serde_json::Map::new();
                        entries.insert("input".to_string(), other);
                        entries
                    }
                };
                for binding in &plan {
                    let params = CompositionTool::resolve_params(&binding.params, &variables);
                    let output =
                        CompositionTool::run_affordance(&bundle, binding, params).await?;
                    let slot = binding.output.clone().unwrap_or_else(|| "result".to_string());
                    variables.insert(slot, output);
                }
                Ok(variables
                    .remove(&return_key)
                    .unwrap_or(serde_json::Value::Null))
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inferflow::tools::{
        FormatterTool, LanguageModelTool, ScriptInterpreterTool,
    };
    use std::sync::Arc;

    fn bundle() -> ToolBundle {
        let bundle = ToolBundle::new();
        bundle.set_language_model(Arc::new(LanguageModelTool::mock(
            "m",
            &[("capital of France", "PARIS")],
        )));
        bundle.set_interpreter(Arc::new(ScriptInterpreterTool::new()));
        bundle.set_formatter(Arc::new(FormatterTool::new()));
        bundle
    }

    #[tokio::test]
    async fn composes_a_two_step_plan_with_variable_passing() {
        let tool = CompositionTool::new(bundle(), None);
        let plan = vec![
            AffordanceBinding {
                tool_name: "language_model".to_string(),
                affordance_name: "generate".to_string(),
                params: serde_json::json!({"prompt": "capital of France?"}),
                output: Some("city".to_string()),
            },
            AffordanceBinding {
                tool_name: "script_interpreter".to_string(),
                affordance_name: "execute".to_string(),
                params: serde_json::json!({
                    "script": "result = name + \"!\"",
                    "inputs": {"name": "$city"},
                }),
                output: None,
            },
        ];
        let composed = tool.compose(plan, None).unwrap();
        let out = composed.invoke(serde_json::json!({})).await.unwrap();
        assert_eq!(out, serde_json::json!("PARIS!"));
    }

    #[tokio::test]
    async fn unknown_affordances_are_not_found() {
        let tool = CompositionTool::new(bundle(), None);
        let plan = vec![AffordanceBinding {
            tool_name: "nope".to_string(),
            affordance_name: "missing".to_string(),
            params: serde_json::json!({}),
            output: None,
        }];
        let composed = tool.compose(plan, None).unwrap();
        assert!(matches!(
            composed.invoke(serde_json::json!({})).await,
            Err(ToolError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn paradigm_directory_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let spec = serde_json::json!([{
            "tool_name": "language_model",
            "affordance_name": "generate",
            "params": {"prompt": "capital of France?"},
        }]);
        std::fs::write(
            dir.path().join("ask_capital.json"),
            serde_json::to_string(&spec).unwrap(),
        )
        .unwrap();

        let tool = CompositionTool::new(bundle(), Some(dir.path().to_path_buf()));
        assert_eq!(
            tool.list_compositions().await.unwrap(),
            vec!["ask_capital".to_string()]
        );
        let plan = tool.load_composition("ask_capital").await.unwrap();
        assert_eq!(plan.len(), 1);
        let composed = tool.compose(plan, None).unwrap();
        assert_eq!(
            composed.invoke(serde_json::json!({})).await.unwrap(),
            serde_json::json!("PARIS")
        );
    }

    #[tokio::test]
    async fn empty_plans_are_rejected() {
        let tool = CompositionTool::new(bundle(), None);
        assert!(matches!(
            tool.compose(vec![], None),
            Err(ToolError::InvalidParameters(_))
        ));
    }
}
