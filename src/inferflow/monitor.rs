//! Monitored Tool Decorators
//!
//! Every tool handed to a step is wrapped in a monitored decorator: a
//! same-trait implementation that emits a [`ToolCallEvent`] around each
//! method call: `started` with the sanitised arguments, then `completed`
//! with the sanitised output and duration, or `failed` with the error before
//! re-raising it. The start and end events share one event id; the flow index
//! is read from the registry at call time, so events land on whatever step
//! the runner is currently executing.
//!
//! # Second-order tools
//!
//! Methods that return callables (a script executor, a generation function)
//! return [`ToolFn`]s; the decorator re-wraps the returned callable so each
//! later invocation emits its own event pair under the synthetic method name
//! `"<method>→execute"`, nested inside whatever step bracket is active when
//! the callable runs.
//!
//! The dynamic attribute interception of a duck-typed proxy becomes, in a
//! statically typed setting, one decorator per tool interface sharing the
//! generic [`Monitor`] core below.

use crate::inferflow::event::{InputKind, ToolCallEvent, ToolCallStatus};
use crate::inferflow::sanitize;
use crate::inferflow::tools::{
    AffordanceBinding, Composition, FileSystem, Formatter, HumanInput, LanguageModel,
    PromptTemplates, ScriptInterpreter, ToolError, ToolFn,
};
use async_trait::async_trait;
use chrono::Utc;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Sink receiving every tool call event (the registry's emit hook).
pub type EventSink = Arc<dyn Fn(ToolCallEvent) + Send + Sync>;

/// Reads the current flow index at call time.
pub type FlowIndexGetter = Arc<dyn Fn() -> String + Send + Sync>;

/// Shared monitoring core: identifies the agent and tool, and emits the
/// started/completed/failed event triple around invocations.
#[derive(Clone)]
pub struct Monitor {
    agent_id: Arc<str>,
    tool_name: Arc<str>,
    sink: EventSink,
    flow_index: FlowIndexGetter,
}

impl Monitor {
    pub fn new(
        agent_id: impl Into<String>,
        tool_name: impl Into<String>,
        sink: EventSink,
        flow_index: FlowIndexGetter,
    ) -> Self {
        Self {
            agent_id: Arc::from(agent_id.into()),
            tool_name: Arc::from(tool_name.into()),
            sink,
            flow_index,
        }
    }

    fn event(
        &self,
        event_id: &str,
        flow_index: &str,
        method: &str,
        inputs: serde_json::Value,
        status: ToolCallStatus,
    ) -> ToolCallEvent {
        ToolCallEvent {
            id: event_id.to_string(),
            timestamp: Utc::now(),
            flow_index: flow_index.to_string(),
            agent_id: self.agent_id.to_string(),
            tool_name: self.tool_name.to_string(),
            method: method.to_string(),
            inputs,
            outputs: None,
            duration_ms: None,
            status,
            error: None,
        }
    }

    /// Run an async tool invocation inside the monitoring bracket.
    ///
    /// `render` turns the successful output into its event payload; the
    /// payload is sanitised before emission.
    pub async fn call<T, Fut, R>(
        &self,
        method: &str,
        inputs: serde_json::Value,
        invocation: Fut,
        render: R,
    ) -> Result<T, ToolError>
    where
        Fut: Future<Output = Result<T, ToolError>>,
        R: FnOnce(&T) -> serde_json::Value,
    {
        let event_id = Uuid::new_v4().to_string()[..8].to_string();
        let flow_index = (self.flow_index)();
        let inputs = sanitize::sanitize(&inputs);
        (self.sink)(self.event(
            &event_id,
            &flow_index,
            method,
            inputs.clone(),
            ToolCallStatus::Started,
        ));

        let started_at = Instant::now();
        match invocation.await {
            Ok(value) => {
                let mut event = self.event(
                    &event_id,
                    &flow_index,
                    method,
                    inputs,
                    ToolCallStatus::Completed,
                );
                event.outputs = Some(sanitize::sanitize(&render(&value)));
                event.duration_ms = Some(started_at.elapsed().as_secs_f64() * 1000.0);
                (self.sink)(event);
                Ok(value)
            }
            Err(error) => {
                let mut event = self.event(
                    &event_id,
                    &flow_index,
                    method,
                    inputs,
                    ToolCallStatus::Failed,
                );
                event.duration_ms = Some(started_at.elapsed().as_secs_f64() * 1000.0);
                event.error = Some(error.to_string());
                (self.sink)(event);
                Err(error)
            }
        }
    }

    /// Synchronous variant for tool methods that do not await.
    pub fn call_sync<T, F, R>(
        &self,
        method: &str,
        inputs: serde_json::Value,
        invocation: F,
        render: R,
    ) -> Result<T, ToolError>
    where
        F: FnOnce() -> Result<T, ToolError>,
        R: FnOnce(&T) -> serde_json::Value,
    {
        let event_id = Uuid::new_v4().to_string()[..8].to_string();
        let flow_index = (self.flow_index)();
        let inputs = sanitize::sanitize(&inputs);
        (self.sink)(self.event(
            &event_id,
            &flow_index,
            method,
            inputs.clone(),
            ToolCallStatus::Started,
        ));
        let started_at = Instant::now();
        match invocation() {
            Ok(value) => {
                let mut event = self.event(
                    &event_id,
                    &flow_index,
                    method,
                    inputs,
                    ToolCallStatus::Completed,
                );
                event.outputs = Some(sanitize::sanitize(&render(&value)));
                event.duration_ms = Some(started_at.elapsed().as_secs_f64() * 1000.0);
                (self.sink)(event);
                Ok(value)
            }
            Err(error) => {
                let mut event = self.event(
                    &event_id,
                    &flow_index,
                    method,
                    inputs,
                    ToolCallStatus::Failed,
                );
                event.duration_ms = Some(started_at.elapsed().as_secs_f64() * 1000.0);
                event.error = Some(error.to_string());
                (self.sink)(event);
                Err(error)
            }
        }
    }

    /// Wrap a returned callable so its invocations are monitored under the
    /// synthetic method name `"<parent_method>→execute"`.
    pub fn wrap_returned(&self, parent_method: &str, callable: ToolFn) -> ToolFn {
        let monitor = self.clone();
        let method = format!("{}→execute", parent_method);
        let name = callable.name().to_string();
        ToolFn::new(name, move |params| {
            let monitor = monitor.clone();
            let callable = callable.clone();
            let method = method.clone();
            Box::pin(async move {
                let inputs = serde_json::json!({ "params": params.clone() });
                monitor
                    .call(&method, inputs, callable.invoke(params), |out| out.clone())
                    .await
            })
        })
    }
}

fn render_callable(callable: &ToolFn) -> serde_json::Value {
    serde_json::json!(format!("<callable:{}>", callable.name()))
}

/// Monitored decorator for [`LanguageModel`].
pub struct MonitoredLanguageModel {
    inner: Arc<dyn LanguageModel>,
    monitor: Monitor,
}

impl MonitoredLanguageModel {
    pub fn new(inner: Arc<dyn LanguageModel>, monitor: Monitor) -> Self {
        Self { inner, monitor }
    }
}

#[async_trait]
impl LanguageModel for MonitoredLanguageModel {
    fn model_name(&self) -> String {
        self.inner.model_name()
    }

    async fn generate(
        &self,
        prompt: &str,
        system_message: Option<&str>,
    ) -> Result<String, ToolError> {
        self.monitor
            .call(
                "generate",
                serde_json::json!({"prompt": prompt, "system_message": system_message}),
                self.inner.generate(prompt, system_message),
                |out| serde_json::json!(out),
            )
            .await
    }

    async fn run_prompt(
        &self,
        template: &str,
        variables: &serde_json::Value,
    ) -> Result<String, ToolError> {
        self.monitor
            .call(
                "run_prompt",
                serde_json::json!({"template": template, "variables": variables}),
                self.inner.run_prompt(template, variables),
                |out| serde_json::json!(out),
            )
            .await
    }

    fn create_generation_function(&self, template: &str) -> Result<ToolFn, ToolError> {
        let function = self.monitor.call_sync(
            "create_generation_function",
            serde_json::json!({ "template": template }),
            || self.inner.create_generation_function(template),
            render_callable,
        )?;
        Ok(self
            .monitor
            .wrap_returned("create_generation_function", function))
    }

    fn stats(&self) -> serde_json::Value {
        self.inner.stats()
    }
}

/// Monitored decorator for [`FileSystem`].
pub struct MonitoredFileSystem {
    inner: Arc<dyn FileSystem>,
    monitor: Monitor,
}

impl MonitoredFileSystem {
    pub fn new(inner: Arc<dyn FileSystem>, monitor: Monitor) -> Self {
        Self { inner, monitor }
    }
}

#[async_trait]
impl FileSystem for MonitoredFileSystem {
    fn base_dir(&self) -> &Path {
        self.inner.base_dir()
    }

    async fn read(&self, path: &str) -> Result<String, ToolError> {
        self.monitor
            .call(
                "read",
                serde_json::json!({ "path": path }),
                self.inner.read(path),
                |out| serde_json::json!(out),
            )
            .await
    }

    async fn write(&self, path: &str, content: &str) -> Result<String, ToolError> {
        self.monitor
            .call(
                "write",
                serde_json::json!({"path": path, "content": content}),
                self.inner.write(path, content),
                |out| serde_json::json!(out),
            )
            .await
    }

    async fn append(&self, path: &str, content: &str) -> Result<String, ToolError> {
        self.monitor
            .call(
                "append",
                serde_json::json!({"path": path, "content": content}),
                self.inner.append(path, content),
                |out| serde_json::json!(out),
            )
            .await
    }

    async fn delete(&self, path: &str) -> Result<String, ToolError> {
        self.monitor
            .call(
                "delete",
                serde_json::json!({ "path": path }),
                self.inner.delete(path),
                |out| serde_json::json!(out),
            )
            .await
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<String>, ToolError> {
        self.monitor
            .call(
                "list_directory",
                serde_json::json!({ "path": path }),
                self.inner.list_directory(path),
                |out| serde_json::json!(out),
            )
            .await
    }

    async fn exists(&self, path: &str) -> Result<bool, ToolError> {
        self.monitor
            .call(
                "exists",
                serde_json::json!({ "path": path }),
                self.inner.exists(path),
                |out| serde_json::json!(out),
            )
            .await
    }

    async fn read_json(&self, path: &str) -> Result<serde_json::Value, ToolError> {
        self.monitor
            .call(
                "read_json",
                serde_json::json!({ "path": path }),
                self.inner.read_json(path),
                |out| out.clone(),
            )
            .await
    }

    async fn write_json(
        &self,
        path: &str,
        value: &serde_json::Value,
    ) -> Result<String, ToolError> {
        self.monitor
            .call(
                "write_json",
                serde_json::json!({"path": path, "value": value}),
                self.inner.write_json(path, value),
                |out| serde_json::json!(out),
            )
            .await
    }
}

/// Monitored decorator for [`ScriptInterpreter`].
pub struct MonitoredScriptInterpreter {
    inner: Arc<dyn ScriptInterpreter>,
    monitor: Monitor,
}

impl MonitoredScriptInterpreter {
    pub fn new(inner: Arc<dyn ScriptInterpreter>, monitor: Monitor) -> Self {
        Self { inner, monitor }
    }
}

#[async_trait]
impl ScriptInterpreter for MonitoredScriptInterpreter {
    async fn execute(
        &self,
        script: &str,
        inputs: &serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        self.monitor
            .call(
                "execute",
                serde_json::json!({"script": script, "inputs": inputs}),
                self.inner.execute(script, inputs),
                |out| out.clone(),
            )
            .await
    }

    fn create_function_executor(&self, script: &str) -> Result<ToolFn, ToolError> {
        let executor = self.monitor.call_sync(
            "create_function_executor",
            serde_json::json!({ "script": script }),
            || self.inner.create_function_executor(script),
            render_callable,
        )?;
        Ok(self
            .monitor
            .wrap_returned("create_function_executor", executor))
    }
}

/// Monitored decorator for [`PromptTemplates`].
pub struct MonitoredPromptTemplates {
    inner: Arc<dyn PromptTemplates>,
    monitor: Monitor,
}

impl MonitoredPromptTemplates {
    pub fn new(inner: Arc<dyn PromptTemplates>, monitor: Monitor) -> Self {
        Self { inner, monitor }
    }
}

#[async_trait]
impl PromptTemplates for MonitoredPromptTemplates {
    async fn read(&self, template_name: &str) -> Result<String, ToolError> {
        self.monitor
            .call(
                "read",
                serde_json::json!({ "template_name": template_name }),
                self.inner.read(template_name),
                |out| serde_json::json!(out),
            )
            .await
    }

    async fn render(
        &self,
        template_name: &str,
        variables: &serde_json::Value,
    ) -> Result<String, ToolError> {
        self.monitor
            .call(
                "render",
                serde_json::json!({"template_name": template_name, "variables": variables}),
                self.inner.render(template_name, variables),
                |out| serde_json::json!(out),
            )
            .await
    }

    fn create_template_function(&self, template: &str) -> Result<ToolFn, ToolError> {
        let function = self.monitor.call_sync(
            "create_template_function",
            serde_json::json!({ "template": template }),
            || self.inner.create_template_function(template),
            render_callable,
        )?;
        Ok(self
            .monitor
            .wrap_returned("create_template_function", function))
    }

    async fn drop_cached(&self, template_name: &str) {
        self.inner.drop_cached(template_name).await;
    }

    async fn stats(&self) -> serde_json::Value {
        self.inner.stats().await
    }
}

/// Monitored decorator for [`Composition`].
pub struct MonitoredComposition {
    inner: Arc<dyn Composition>,
    monitor: Monitor,
}

impl MonitoredComposition {
    pub fn new(inner: Arc<dyn Composition>, monitor: Monitor) -> Self {
        Self { inner, monitor }
    }
}

#[async_trait]
impl Composition for MonitoredComposition {
    async fn list_compositions(&self) -> Result<Vec<String>, ToolError> {
        self.monitor
            .call(
                "list_compositions",
                serde_json::json!({}),
                self.inner.list_compositions(),
                |out| serde_json::json!(out),
            )
            .await
    }

    async fn load_composition(&self, name: &str) -> Result<Vec<AffordanceBinding>, ToolError> {
        self.monitor
            .call(
                "load_composition",
                serde_json::json!({ "name": name }),
                self.inner.load_composition(name),
                |out| serde_json::to_value(out).unwrap_or(serde_json::Value::Null),
            )
            .await
    }

    fn compose(
        &self,
        plan: Vec<AffordanceBinding>,
        return_key: Option<&str>,
    ) -> Result<ToolFn, ToolError> {
        let plan_payload = serde_json::to_value(&plan).unwrap_or(serde_json::Value::Null);
        let composed = self.monitor.call_sync(
            "compose",
            serde_json::json!({"plan": plan_payload, "return_key": return_key}),
            || self.inner.compose(plan, return_key),
            render_callable,
        )?;
        Ok(self.monitor.wrap_returned("compose", composed))
    }
}

/// Monitored decorator for [`Formatter`].
pub struct MonitoredFormatter {
    inner: Arc<dyn Formatter>,
    monitor: Monitor,
}

impl MonitoredFormatter {
    pub fn new(inner: Arc<dyn Formatter>, monitor: Monitor) -> Self {
        Self { inner, monitor }
    }
}

impl Formatter for MonitoredFormatter {
    fn create_template_function(&self, template: &str) -> ToolFn {
        let function = match self.monitor.call_sync(
            "create_template_function",
            serde_json::json!({ "template": template }),
            || Ok(self.inner.create_template_function(template)),
            render_callable,
        ) {
            Ok(function) => function,
            Err(_) => self.inner.create_template_function(template),
        };
        self.monitor
            .wrap_returned("create_template_function", function)
    }

    fn parse(&self, raw: &str) -> serde_json::Value {
        self.monitor
            .call_sync(
                "parse",
                serde_json::json!({ "raw": raw }),
                || Ok(self.inner.parse(raw)),
                |out: &serde_json::Value| out.clone(),
            )
            .unwrap_or(serde_json::Value::Null)
    }

    fn wrap(&self, data: &serde_json::Value, type_tag: Option<&str>) -> String {
        self.monitor
            .call_sync(
                "wrap",
                serde_json::json!({"data": data, "type_tag": type_tag}),
                || Ok(self.inner.wrap(data, type_tag)),
                |out: &String| serde_json::json!(out),
            )
            .unwrap_or_default()
    }

    fn strip(&self, element: &str) -> String {
        self.inner.strip(element)
    }

    fn get(
        &self,
        dictionary: &serde_json::Value,
        key: &str,
        default: serde_json::Value,
    ) -> serde_json::Value {
        self.inner.get(dictionary, key, default)
    }
}

/// Monitored decorator for [`HumanInput`].
pub struct MonitoredHumanInput {
    inner: Arc<dyn HumanInput>,
    monitor: Monitor,
}

impl MonitoredHumanInput {
    pub fn new(inner: Arc<dyn HumanInput>, monitor: Monitor) -> Self {
        Self { inner, monitor }
    }
}

#[async_trait]
impl HumanInput for MonitoredHumanInput {
    async fn await_input(
        &self,
        prompt: &str,
        kind: InputKind,
        options: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let inputs = serde_json::json!({
            "prompt": prompt,
            "kind": kind.clone(),
            "options": options.clone(),
        });
        self.monitor
            .call(
                "await_input",
                inputs,
                self.inner.await_input(prompt, kind, options),
                |out| out.clone(),
            )
            .await
    }

    async fn confirm(&self, prompt: &str) -> Result<bool, ToolError> {
        self.monitor
            .call(
                "confirm",
                serde_json::json!({ "prompt": prompt }),
                self.inner.confirm(prompt),
                |out| serde_json::json!(out),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inferflow::tools::{LanguageModelTool, ScriptInterpreterTool};
    use std::sync::Mutex;

    fn capture() -> (EventSink, Arc<Mutex<Vec<ToolCallEvent>>>) {
        let events: Arc<Mutex<Vec<ToolCallEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_events = events.clone();
        let sink: EventSink = Arc::new(move |event| {
            sink_events.lock().unwrap().push(event);
        });
        (sink, events)
    }

    fn monitor(sink: EventSink, tool_name: &str) -> Monitor {
        Monitor::new("a1", tool_name, sink, Arc::new(|| "1.2".to_string()))
    }

    #[tokio::test]
    async fn generate_emits_a_started_completed_pair_with_one_id() {
        let (sink, events) = capture();
        let tool = MonitoredLanguageModel::new(
            Arc::new(LanguageModelTool::mock("m", &[("France", "PARIS")])),
            monitor(sink, "language_model"),
        );
        let out = tool.generate("capital of France?", None).await.unwrap();
        assert_eq!(out, "PARIS");

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, ToolCallStatus::Started);
        assert_eq!(events[1].status, ToolCallStatus::Completed);
        assert_eq!(events[0].id, events[1].id);
        assert_eq!(events[0].method, "generate");
        assert_eq!(events[0].flow_index, "1.2");
        assert_eq!(events[1].outputs, Some(serde_json::json!("PARIS")));
        assert!(events[1].duration_ms.is_some());
    }

    #[tokio::test]
    async fn failures_emit_failed_and_re_raise() {
        let (sink, events) = capture();
        let tool = MonitoredScriptInterpreter::new(
            Arc::new(ScriptInterpreterTool::new()),
            monitor(sink, "script_interpreter"),
        );
        let result = tool.execute("missing_var", &serde_json::json!({})).await;
        assert!(result.is_err());

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].status, ToolCallStatus::Failed);
        assert!(events[1].error.is_some());
    }

    #[tokio::test]
    async fn second_order_executors_emit_their_own_events() {
        let (sink, events) = capture();
        let tool = MonitoredScriptInterpreter::new(
            Arc::new(ScriptInterpreterTool::new()),
            monitor(sink, "script_interpreter"),
        );
        let executor = tool.create_function_executor("result = n + 1").unwrap();
        executor.invoke(serde_json::json!({"n": 1})).await.unwrap();
        executor.invoke(serde_json::json!({"n": 2})).await.unwrap();

        let events = events.lock().unwrap();
        let methods: Vec<&str> = events.iter().map(|e| e.method.as_str()).collect();
        assert_eq!(
            methods,
            vec![
                "create_function_executor",
                "create_function_executor",
                "create_function_executor→execute",
                "create_function_executor→execute",
                "create_function_executor→execute",
                "create_function_executor→execute",
            ]
        );
        // The creation pair shares an id; each invocation pair shares its own.
        assert_eq!(events[2].id, events[3].id);
        assert_eq!(events[4].id, events[5].id);
        assert_ne!(events[2].id, events[4].id);
    }

    #[tokio::test]
    async fn inputs_are_sanitised() {
        let (sink, events) = capture();
        let tool = MonitoredLanguageModel::new(
            Arc::new(LanguageModelTool::mock("m", &[])),
            monitor(sink, "language_model"),
        );
        let huge = "p".repeat(sanitize::MAX_STRING_LEN + 10);
        tool.generate(&huge, None).await.unwrap();
        let events = events.lock().unwrap();
        let prompt = events[0].inputs["prompt"].as_str().unwrap();
        assert!(prompt.contains("[truncated"));
    }
}
