//! Tool Layer
//!
//! Tools are the side-effecting leaves that inference steps invoke: the
//! language model, the file system, the script interpreter, prompt templates,
//! composition of tool plans, the formatter, and human input. Each tool is a
//! trait so the monitored decorators in
//! [`monitor`](crate::inferflow::monitor) can wrap any implementation, and so
//! tests can substitute mocks.
//!
//! # Second-order tools
//!
//! Some tool methods return callables: a script interpreter hands back an
//! executor, a language model hands back a generation function. These cross
//! the monitoring boundary as [`ToolFn`]s: named async closures over JSON
//! parameters. Declaring the boundary in the signature is what lets the
//! monitored decorator re-wrap the returned callable so its later invocations
//! are observable too.
//!
//! # The bundle handle
//!
//! A tool occasionally needs a sibling (the composition tool drives the
//! others). Instead of mutual references, every tool that needs siblings is
//! constructed with a lightweight [`ToolBundle`] handle that the registry
//! fills in after wrapping everything in monitors, so even tool-to-tool
//! calls emit events.
//!
//! # Available Tools
//!
//! - **LanguageModelTool**: chat-completion HTTP client with a mock mode for
//!   tests and offline runs
//! - **FileSystemTool**: base-directory-rooted file operations with path
//!   traversal protection
//! - **ScriptInterpreterTool**: expression programs over named inputs, plus
//!   reusable function executors
//! - **PromptStoreTool**: template directory with caching and rendering
//! - **CompositionTool**: named plans of tool affordances, optionally loaded
//!   from a paradigm directory
//! - **FormatterTool**: template functions, block parsing, element wrapping
//! - **HumanInputTool**: blocks a step on an observer-supplied answer

pub mod composition;
pub mod filesystem;
pub mod formatter;
pub mod human;
pub mod interpreter;
pub mod llm;
pub mod prompts;

pub use composition::{AffordanceBinding, CompositionTool};
pub use filesystem::FileSystemTool;
pub use formatter::FormatterTool;
pub use human::HumanInputTool;
pub use interpreter::ScriptInterpreterTool;
pub use llm::{LanguageModelTool, ProviderConfig};
pub use prompts::PromptStoreTool;

use crate::inferflow::event::InputKind;
use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

/// Error type for tool operations.
#[derive(Debug, Clone)]
pub enum ToolError {
    /// Requested tool, template, or composition is not available.
    NotFound(String),
    /// The tool ran but reported an application-level failure.
    ExecutionFailed(String),
    /// The provided parameters failed validation.
    InvalidParameters(String),
    /// An underlying I/O operation failed.
    Io(String),
    /// The tool is not enabled for the agent.
    Disabled(String),
    /// The operation was interrupted by run cancellation.
    Cancelled(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ToolError::ExecutionFailed(msg) => write!(f, "Tool execution failed: {}", msg),
            ToolError::InvalidParameters(msg) => write!(f, "Invalid parameters: {}", msg),
            ToolError::Io(msg) => write!(f, "IO error: {}", msg),
            ToolError::Disabled(msg) => write!(f, "Tool disabled: {}", msg),
            ToolError::Cancelled(msg) => write!(f, "Cancelled: {}", msg),
        }
    }
}

impl Error for ToolError {}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            ToolError::NotFound(err.to_string())
        } else {
            ToolError::Io(err.to_string())
        }
    }
}

/// Future returned by [`ToolFn`] invocations.
pub type ToolFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send>>;

/// A named second-order tool: a callable returned by a tool method.
///
/// Invocations take a JSON parameter object and produce a JSON result, so
/// monitored wrappers can sanitise both sides without knowing the concrete
/// tool.
#[derive(Clone)]
pub struct ToolFn {
    name: Arc<str>,
    func: Arc<dyn Fn(serde_json::Value) -> ToolFuture + Send + Sync>,
}

impl ToolFn {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(serde_json::Value) -> ToolFuture + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            func: Arc::new(func),
        }
    }

    /// Name of the callable, used in monitoring event method names.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the callable.
    pub async fn invoke(&self, params: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        (self.func)(params).await
    }
}

impl fmt::Debug for ToolFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ToolFn({})", self.name)
    }
}

/// Language model tool: prompt in, text out, plus generation functions that
/// steps store inside references.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model name this tool is bound to.
    fn model_name(&self) -> String;

    /// One chat round-trip.
    async fn generate(
        &self,
        prompt: &str,
        system_message: Option<&str>,
    ) -> Result<String, ToolError>;

    /// Render `template` with `variables` (``{name}`` placeholders) and
    /// generate from the result.
    async fn run_prompt(
        &self,
        template: &str,
        variables: &serde_json::Value,
    ) -> Result<String, ToolError>;

    /// Build a reusable generation function over `template`. Each invocation
    /// substitutes the invocation parameters into the template and generates.
    fn create_generation_function(&self, template: &str) -> Result<ToolFn, ToolError>;

    /// Usage counters for diagnostics.
    fn stats(&self) -> serde_json::Value;
}

/// File system tool rooted at the agent's base directory.
#[async_trait]
pub trait FileSystem: Send + Sync {
    fn base_dir(&self) -> &Path;

    async fn read(&self, path: &str) -> Result<String, ToolError>;

    /// Write `content`, creating parent directories. Returns the resolved
    /// path.
    async fn write(&self, path: &str, content: &str) -> Result<String, ToolError>;

    async fn append(&self, path: &str, content: &str) -> Result<String, ToolError>;

    async fn delete(&self, path: &str) -> Result<String, ToolError>;

    async fn list_directory(&self, path: &str) -> Result<Vec<String>, ToolError>;

    async fn exists(&self, path: &str) -> Result<bool, ToolError>;

    async fn read_json(&self, path: &str) -> Result<serde_json::Value, ToolError>;

    async fn write_json(
        &self,
        path: &str,
        value: &serde_json::Value,
    ) -> Result<String, ToolError>;
}

/// Script interpreter tool: expression programs over named inputs.
#[async_trait]
pub trait ScriptInterpreter: Send + Sync {
    /// Run `script` with `inputs` bound as variables; returns the script's
    /// `result` variable, or the value of the final expression.
    async fn execute(
        &self,
        script: &str,
        inputs: &serde_json::Value,
    ) -> Result<serde_json::Value, ToolError>;

    /// Build a reusable executor over `script`. Each invocation binds its
    /// parameters as variables and runs the script (a second-order tool).
    fn create_function_executor(&self, script: &str) -> Result<ToolFn, ToolError>;
}

/// Prompt template store backed by a template directory.
#[async_trait]
pub trait PromptTemplates: Send + Sync {
    /// Load a template by name (cached).
    async fn read(&self, template_name: &str) -> Result<String, ToolError>;

    /// Load and render a template with ``{name}`` substitution.
    async fn render(
        &self,
        template_name: &str,
        variables: &serde_json::Value,
    ) -> Result<String, ToolError>;

    /// Build a reusable rendering function over a template string.
    fn create_template_function(&self, template: &str) -> Result<ToolFn, ToolError>;

    /// Evict one template from the cache.
    async fn drop_cached(&self, template_name: &str);

    /// Cache statistics for diagnostics.
    async fn stats(&self) -> serde_json::Value;
}

/// Composition tool: executes named plans of tool affordances.
#[async_trait]
pub trait Composition: Send + Sync {
    /// Names of the composition specs available in the paradigm directory.
    async fn list_compositions(&self) -> Result<Vec<String>, ToolError>;

    /// Load one composition spec by name.
    async fn load_composition(&self, name: &str) -> Result<Vec<AffordanceBinding>, ToolError>;

    /// Build a callable that executes `plan` affordance-by-affordance and
    /// returns the variable named by `return_key` (default `"result"`).
    fn compose(
        &self,
        plan: Vec<AffordanceBinding>,
        return_key: Option<&str>,
    ) -> Result<ToolFn, ToolError>;
}

/// Formatter tool: small, pure text shaping helpers.
pub trait Formatter: Send + Sync {
    /// Build a rendering function over `template` (``{name}`` placeholders).
    fn create_template_function(&self, template: &str) -> ToolFn;

    /// Parse a `key: value` block response into a JSON object.
    fn parse(&self, raw: &str) -> serde_json::Value;

    /// Wrap data in the element wrapper, optionally with a type tag:
    /// `%(data)` or `%{tag}(data)`.
    fn wrap(&self, data: &serde_json::Value, type_tag: Option<&str>) -> String;

    /// Strip the element wrapper when present.
    fn strip(&self, element: &str) -> String;

    /// Lookup with default over a JSON object.
    fn get(
        &self,
        dictionary: &serde_json::Value,
        key: &str,
        default: serde_json::Value,
    ) -> serde_json::Value;
}

/// Human input tool: suspends the calling step until an observer answers.
#[async_trait]
pub trait HumanInput: Send + Sync {
    /// Ask the observers and block until an answer or cancellation arrives.
    /// A cancelled request surfaces as [`ToolError::Cancelled`].
    async fn await_input(
        &self,
        prompt: &str,
        kind: InputKind,
        options: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError>;

    /// Confirmation convenience: maps the answer onto a boolean.
    async fn confirm(&self, prompt: &str) -> Result<bool, ToolError>;
}

/// Kinds of tools an agent can enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    LanguageModel,
    FileSystem,
    ScriptInterpreter,
    PromptTemplates,
    Composition,
    Formatter,
    HumanInput,
}

impl ToolKind {
    /// Tool name as it appears in events and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::LanguageModel => "language_model",
            ToolKind::FileSystem => "file_system",
            ToolKind::ScriptInterpreter => "script_interpreter",
            ToolKind::PromptTemplates => "prompt_templates",
            ToolKind::Composition => "composition",
            ToolKind::Formatter => "formatter",
            ToolKind::HumanInput => "human_input",
        }
    }

    /// Every tool kind.
    pub fn all() -> &'static [ToolKind] {
        &[
            ToolKind::LanguageModel,
            ToolKind::FileSystem,
            ToolKind::ScriptInterpreter,
            ToolKind::PromptTemplates,
            ToolKind::Composition,
            ToolKind::Formatter,
            ToolKind::HumanInput,
        ]
    }
}

#[derive(Default)]
struct BundleInner {
    language_model: Option<Arc<dyn LanguageModel>>,
    file_system: Option<Arc<dyn FileSystem>>,
    interpreter: Option<Arc<dyn ScriptInterpreter>>,
    prompts: Option<Arc<dyn PromptTemplates>>,
    composition: Option<Arc<dyn Composition>>,
    formatter: Option<Arc<dyn Formatter>>,
    human_input: Option<Arc<dyn HumanInput>>,
}

/// The bound tool set of one agent, and the handle tools use to reach their
/// siblings.
///
/// The registry constructs tools with a clone of an empty bundle, wraps every
/// tool in its monitored decorator, and then fills the bundle with the
/// monitored instances, so all access paths, including tool-to-tool calls,
/// are observable. Accessors return [`ToolError::Disabled`] for tools the
/// agent did not enable.
#[derive(Clone, Default)]
pub struct ToolBundle {
    inner: Arc<RwLock<BundleInner>>,
}

impl ToolBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_language_model(&self, tool: Arc<dyn LanguageModel>) {
        self.inner.write().unwrap().language_model = Some(tool);
    }

    pub fn set_file_system(&self, tool: Arc<dyn FileSystem>) {
        self.inner.write().unwrap().file_system = Some(tool);
    }

    pub fn set_interpreter(&self, tool: Arc<dyn ScriptInterpreter>) {
        self.inner.write().unwrap().interpreter = Some(tool);
    }

    pub fn set_prompts(&self, tool: Arc<dyn PromptTemplates>) {
        self.inner.write().unwrap().prompts = Some(tool);
    }

    pub fn set_composition(&self, tool: Arc<dyn Composition>) {
        self.inner.write().unwrap().composition = Some(tool);
    }

    pub fn set_formatter(&self, tool: Arc<dyn Formatter>) {
        self.inner.write().unwrap().formatter = Some(tool);
    }

    pub fn set_human_input(&self, tool: Arc<dyn HumanInput>) {
        self.inner.write().unwrap().human_input = Some(tool);
    }

    pub fn language_model(&self) -> Result<Arc<dyn LanguageModel>, ToolError> {
        self.inner
            .read()
            .unwrap()
            .language_model
            .clone()
            .ok_or_else(|| ToolError::Disabled("language_model".to_string()))
    }

    pub fn file_system(&self) -> Result<Arc<dyn FileSystem>, ToolError> {
        self.inner
            .read()
            .unwrap()
            .file_system
            .clone()
            .ok_or_else(|| ToolError::Disabled("file_system".to_string()))
    }

    pub fn interpreter(&self) -> Result<Arc<dyn ScriptInterpreter>, ToolError> {
        self.inner
            .read()
            .unwrap()
            .interpreter
            .clone()
            .ok_or_else(|| ToolError::Disabled("script_interpreter".to_string()))
    }

    pub fn prompts(&self) -> Result<Arc<dyn PromptTemplates>, ToolError> {
        self.inner
            .read()
            .unwrap()
            .prompts
            .clone()
            .ok_or_else(|| ToolError::Disabled("prompt_templates".to_string()))
    }

    pub fn composition(&self) -> Result<Arc<dyn Composition>, ToolError> {
        self.inner
            .read()
            .unwrap()
            .composition
            .clone()
            .ok_or_else(|| ToolError::Disabled("composition".to_string()))
    }

    pub fn formatter(&self) -> Result<Arc<dyn Formatter>, ToolError> {
        self.inner
            .read()
            .unwrap()
            .formatter
            .clone()
            .ok_or_else(|| ToolError::Disabled("formatter".to_string()))
    }

    pub fn human_input(&self) -> Result<Arc<dyn HumanInput>, ToolError> {
        self.inner
            .read()
            .unwrap()
            .human_input
            .clone()
            .ok_or_else(|| ToolError::Disabled("human_input".to_string()))
    }

    /// True when the given tool is present.
    pub fn has(&self, kind: ToolKind) -> bool {
        let inner = self.inner.read().unwrap();
        match kind {
            ToolKind::LanguageModel => inner.language_model.is_some(),
            ToolKind::FileSystem => inner.file_system.is_some(),
            ToolKind::ScriptInterpreter => inner.interpreter.is_some(),
            ToolKind::PromptTemplates => inner.prompts.is_some(),
            ToolKind::Composition => inner.composition.is_some(),
            ToolKind::Formatter => inner.formatter.is_some(),
            ToolKind::HumanInput => inner.human_input.is_some(),
        }
    }
}

/// Substitute ``{name}`` placeholders from a JSON object (non-object values
/// replace the ``{input}`` placeholder). Shared by the prompt, formatter, and
/// language-model tools.
pub(crate) fn substitute_placeholders(template: &str, variables: &serde_json::Value) -> String {
    let mut text = template.to_string();
    match variables {
        serde_json::Value::Object(entries) => {
            for (key, value) in entries {
                let rendered = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                text = text.replace(&format!("{{{}}}", key), &rendered);
            }
        }
        serde_json::Value::Null => {}
        other => {
            let rendered = match other {
                serde_json::Value::String(s) => s.clone(),
                value => value.to_string(),
            };
            text = text.replace("{input}", &rendered);
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tool_fn_invokes_and_keeps_its_name() {
        let echo = ToolFn::new("echo", |params| {
            Box::pin(async move { Ok(params) })
        });
        assert_eq!(echo.name(), "echo");
        let out = echo.invoke(serde_json::json!({"x": 1})).await.unwrap();
        assert_eq!(out["x"], serde_json::json!(1));
    }

    #[test]
    fn bundle_reports_disabled_tools() {
        let bundle = ToolBundle::new();
        assert!(matches!(
            bundle.language_model(),
            Err(ToolError::Disabled(_))
        ));
        assert!(!bundle.has(ToolKind::Formatter));
    }

    #[test]
    fn placeholder_substitution_covers_objects_and_scalars() {
        assert_eq!(
            substitute_placeholders(
                "capital of {country}?",
                &serde_json::json!({"country": "France"})
            ),
            "capital of France?"
        );
        assert_eq!(
            substitute_placeholders("say {input}", &serde_json::json!("hello")),
            "say hello"
        );
    }
}
