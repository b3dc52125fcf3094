//! Agent Registry
//!
//! Owns agent configurations and produces the monitored tool sets that runs
//! execute against. For each agent the registry:
//!
//! 1. instantiates the enabled tools with the agent's model binding and base
//!    directory,
//! 2. wraps every tool in its monitored decorator, bound to this agent id and
//!    to a closure reading the registry's *current flow index* at call time,
//! 3. fills the agent's [`ToolBundle`] with the monitored instances and
//!    caches the bundle until the agent is re-registered.
//!
//! The runner calls [`AgentRegistry::set_current_flow_index`] before each
//! step so tool events are tagged with the step that caused them. Every tool
//! call event is retained in a bounded ring (the last
//! [`MAX_HISTORY`] events) and forwarded to the registered sinks; the
//! facade's sink republishes them on the event bus.
//!
//! The registry always contains a reserved default agent; it can be
//! re-registered but never removed.

use crate::inferflow::event::ToolCallEvent;
use crate::inferflow::monitor::{
    EventSink, FlowIndexGetter, Monitor, MonitoredComposition, MonitoredFileSystem,
    MonitoredFormatter, MonitoredHumanInput, MonitoredLanguageModel, MonitoredPromptTemplates,
    MonitoredScriptInterpreter,
};
use crate::inferflow::rendezvous::HumanInputRendezvous;
use crate::inferflow::tools::{
    CompositionTool, FileSystemTool, FormatterTool, HumanInputTool, LanguageModelTool,
    PromptStoreTool, ProviderConfig, ScriptInterpreterTool, ToolBundle, ToolKind,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

/// Id of the reserved default agent.
pub const DEFAULT_AGENT_ID: &str = "default";

/// Tool call events retained per registry.
pub const MAX_HISTORY: usize = 500;

fn default_enabled_tools() -> HashSet<ToolKind> {
    ToolKind::all().iter().copied().collect()
}

/// Configuration of one agent: identity, model binding, directories, and
/// tool preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Stable identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Language model the agent is bound to.
    #[serde(default = "AgentConfig::default_model")]
    pub llm_model: String,
    /// Provider credentials; mock mode when absent.
    #[serde(default)]
    pub provider: Option<ProviderConfig>,
    /// Canned responses for mock mode, matched by prompt substring.
    #[serde(default)]
    pub mock_responses: HashMap<String, String>,
    /// Base directory for file operations; the registry default applies when
    /// absent.
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    /// Directory of composition specs; enables the paradigm-backed
    /// composition tool.
    #[serde(default)]
    pub paradigm_dir: Option<PathBuf>,
    /// Directory of prompt templates; defaults to `<base_dir>/prompts`.
    #[serde(default)]
    pub prompt_dir: Option<PathBuf>,
    /// Tools enabled for this agent (all, by default).
    #[serde(default = "default_enabled_tools")]
    pub enabled_tools: HashSet<ToolKind>,
}

impl AgentConfig {
    fn default_model() -> String {
        "default".to_string()
    }

    /// Minimal config: every tool enabled, mock language model.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            llm_model: Self::default_model(),
            provider: None,
            mock_responses: HashMap::new(),
            base_dir: None,
            paradigm_dir: None,
            prompt_dir: None,
            enabled_tools: default_enabled_tools(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.llm_model = model.into();
        self
    }

    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    pub fn with_paradigm_dir(mut self, paradigm_dir: impl Into<PathBuf>) -> Self {
        self.paradigm_dir = Some(paradigm_dir.into());
        self
    }

    pub fn with_mock_response(mut self, needle: &str, response: &str) -> Self {
        self.mock_responses
            .insert(needle.to_string(), response.to_string());
        self
    }

    pub fn with_enabled_tools(mut self, tools: &[ToolKind]) -> Self {
        self.enabled_tools = tools.iter().copied().collect();
        self
    }
}

/// Errors raised by registry operations.
#[derive(Debug, Clone)]
pub enum RegistryError {
    /// The reserved default agent cannot be unregistered.
    ReservedAgent(String),
    /// No configuration registered under the id.
    UnknownAgent(String),
    /// A tool could not be instantiated for the agent.
    ToolCreation(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::ReservedAgent(id) => {
                write!(f, "Agent '{}' is reserved and cannot be removed", id)
            }
            RegistryError::UnknownAgent(id) => write!(f, "Unknown agent: {}", id),
            RegistryError::ToolCreation(msg) => write!(f, "Tool creation failed: {}", msg),
        }
    }
}

impl Error for RegistryError {}

struct RegistryInner {
    default_base_dir: PathBuf,
    rendezvous: Arc<HumanInputRendezvous>,
    configs: Mutex<HashMap<String, AgentConfig>>,
    bundles: Mutex<HashMap<String, ToolBundle>>,
    sinks: Mutex<HashMap<String, EventSink>>,
    history: Mutex<VecDeque<ToolCallEvent>>,
    current_flow_index: RwLock<String>,
}

impl RegistryInner {
    fn emit(self: &Arc<Self>, event: ToolCallEvent) {
        {
            let mut history = self.history.lock().unwrap();
            if history.len() >= MAX_HISTORY {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        let sinks: Vec<EventSink> = self.sinks.lock().unwrap().values().cloned().collect();
        for sink in sinks {
            sink(event.clone());
        }
    }
}

/// Registry of agent configurations and their bound, monitored tool sets.
#[derive(Clone)]
pub struct AgentRegistry {
    inner: Arc<RegistryInner>,
}

impl AgentRegistry {
    /// Create a registry. The reserved default agent is registered
    /// immediately with a mock language model.
    pub fn new(default_base_dir: impl Into<PathBuf>, rendezvous: Arc<HumanInputRendezvous>) -> Self {
        let registry = Self {
            inner: Arc::new(RegistryInner {
                default_base_dir: default_base_dir.into(),
                rendezvous,
                configs: Mutex::new(HashMap::new()),
                bundles: Mutex::new(HashMap::new()),
                sinks: Mutex::new(HashMap::new()),
                history: Mutex::new(VecDeque::new()),
                current_flow_index: RwLock::new(String::new()),
            }),
        };
        registry.register(AgentConfig::new(DEFAULT_AGENT_ID, "Default Agent"));
        registry
    }

    /// Register (or replace) an agent configuration. Replacement invalidates
    /// any cached bound tool set for the id.
    pub fn register(&self, config: AgentConfig) {
        log::info!("registered agent {} ({})", config.id, config.llm_model);
        self.inner.bundles.lock().unwrap().remove(&config.id);
        self.inner
            .configs
            .lock()
            .unwrap()
            .insert(config.id.clone(), config);
    }

    /// Remove an agent. The reserved default agent cannot be removed.
    pub fn unregister(&self, agent_id: &str) -> Result<(), RegistryError> {
        if agent_id == DEFAULT_AGENT_ID {
            log::warn!("refusing to unregister the default agent");
            return Err(RegistryError::ReservedAgent(agent_id.to_string()));
        }
        let removed = self.inner.configs.lock().unwrap().remove(agent_id);
        self.inner.bundles.lock().unwrap().remove(agent_id);
        match removed {
            Some(_) => {
                log::info!("unregistered agent {}", agent_id);
                Ok(())
            }
            None => Err(RegistryError::UnknownAgent(agent_id.to_string())),
        }
    }

    /// Configuration of one agent.
    pub fn config(&self, agent_id: &str) -> Option<AgentConfig> {
        self.inner.configs.lock().unwrap().get(agent_id).cloned()
    }

    /// True when the agent id is registered.
    pub fn contains(&self, agent_id: &str) -> bool {
        self.inner.configs.lock().unwrap().contains_key(agent_id)
    }

    /// All registered configurations.
    pub fn list_agents(&self) -> Vec<AgentConfig> {
        self.inner.configs.lock().unwrap().values().cloned().collect()
    }

    /// Set the flow index used to tag subsequent tool events. Called by the
    /// runner before each step.
    pub fn set_current_flow_index(&self, flow_index: &str) {
        *self.inner.current_flow_index.write().unwrap() = flow_index.to_string();
    }

    /// Current flow index.
    pub fn current_flow_index(&self) -> String {
        self.inner.current_flow_index.read().unwrap().clone()
    }

    /// Register a sink for tool call events.
    pub fn subscribe_events(&self, sink_id: &str, sink: EventSink) {
        self.inner
            .sinks
            .lock()
            .unwrap()
            .insert(sink_id.to_string(), sink);
    }

    /// Remove a previously registered sink.
    pub fn unsubscribe_events(&self, sink_id: &str) {
        self.inner.sinks.lock().unwrap().remove(sink_id);
    }

    /// The most recent tool call events, oldest first.
    pub fn history(&self, limit: usize) -> Vec<ToolCallEvent> {
        let history = self.inner.history.lock().unwrap();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Forget all retained tool call events.
    pub fn clear_history(&self) {
        self.inner.history.lock().unwrap().clear();
    }

    /// Drop every cached bound tool set, forcing recreation on next access.
    pub fn invalidate_all(&self) {
        self.inner.bundles.lock().unwrap().clear();
    }

    /// The monitored tool set for an agent, cached until the agent is
    /// re-registered. Unknown ids fall back to the default agent.
    pub fn bound_tools(&self, agent_id: &str) -> Result<ToolBundle, RegistryError> {
        let config = match self.config(agent_id) {
            Some(config) => config,
            None => {
                log::warn!("unknown agent '{}', using default", agent_id);
                self.config(DEFAULT_AGENT_ID)
                    .ok_or_else(|| RegistryError::UnknownAgent(agent_id.to_string()))?
            }
        };
        if let Some(bundle) = self.inner.bundles.lock().unwrap().get(&config.id) {
            return Ok(bundle.clone());
        }
        let bundle = self.create_bundle(&config)?;
        self.inner
            .bundles
            .lock()
            .unwrap()
            .insert(config.id.clone(), bundle.clone());
        Ok(bundle)
    }

    fn sink(&self) -> EventSink {
        let inner = self.inner.clone();
        Arc::new(move |event| inner.emit(event))
    }

    fn flow_index_getter(&self) -> FlowIndexGetter {
        let inner = self.inner.clone();
        Arc::new(move || inner.current_flow_index.read().unwrap().clone())
    }

    fn monitor_for(&self, agent_id: &str, tool: ToolKind) -> Monitor {
        Monitor::new(agent_id, tool.as_str(), self.sink(), self.flow_index_getter())
    }

    /// Instantiate and wire the monitored tool set for one agent config.
    fn create_bundle(&self, config: &AgentConfig) -> Result<ToolBundle, RegistryError> {
        let base_dir = config
            .base_dir
            .clone()
            .unwrap_or_else(|| self.inner.default_base_dir.clone());
        let bundle = ToolBundle::new();

        if config.enabled_tools.contains(&ToolKind::LanguageModel) {
            let tool = LanguageModelTool::new(&config.llm_model, config.provider.clone());
            if config.provider.is_none() {
                for (needle, response) in &config.mock_responses {
                    tool.add_mock_response(needle, response);
                }
            }
            bundle.set_language_model(Arc::new(MonitoredLanguageModel::new(
                Arc::new(tool),
                self.monitor_for(&config.id, ToolKind::LanguageModel),
            )));
        }

        if config.enabled_tools.contains(&ToolKind::FileSystem) {
            let tool = FileSystemTool::new(&base_dir)
                .map_err(|e| RegistryError::ToolCreation(format!("file_system: {}", e)))?;
            bundle.set_file_system(Arc::new(MonitoredFileSystem::new(
                Arc::new(tool),
                self.monitor_for(&config.id, ToolKind::FileSystem),
            )));
        }

        if config.enabled_tools.contains(&ToolKind::ScriptInterpreter) {
            bundle.set_interpreter(Arc::new(MonitoredScriptInterpreter::new(
                Arc::new(ScriptInterpreterTool::new()),
                self.monitor_for(&config.id, ToolKind::ScriptInterpreter),
            )));
        }

        if config.enabled_tools.contains(&ToolKind::PromptTemplates) {
            let prompt_dir = config
                .prompt_dir
                .clone()
                .map(|dir| if dir.is_absolute() { dir } else { base_dir.join(dir) })
                .unwrap_or_else(|| base_dir.join("prompts"));
            bundle.set_prompts(Arc::new(MonitoredPromptTemplates::new(
                Arc::new(PromptStoreTool::new(prompt_dir)),
                self.monitor_for(&config.id, ToolKind::PromptTemplates),
            )));
        }

        if config.enabled_tools.contains(&ToolKind::Formatter) {
            bundle.set_formatter(Arc::new(MonitoredFormatter::new(
                Arc::new(FormatterTool::new()),
                self.monitor_for(&config.id, ToolKind::Formatter),
            )));
        }

        if config.enabled_tools.contains(&ToolKind::Composition) {
            // Relative paradigm dirs resolve against the agent's base dir.
            let paradigm_dir = config.paradigm_dir.clone().map(|dir| {
                if dir.is_absolute() {
                    dir
                } else {
                    base_dir.join(dir)
                }
            });
            if let Some(ref dir) = paradigm_dir {
                if !dir.is_dir() {
                    log::warn!("paradigm directory not found: {}", dir.display());
                }
            }
            bundle.set_composition(Arc::new(MonitoredComposition::new(
                Arc::new(CompositionTool::new(bundle.clone(), paradigm_dir)),
                self.monitor_for(&config.id, ToolKind::Composition),
            )));
        }

        if config.enabled_tools.contains(&ToolKind::HumanInput) {
            let tool =
                HumanInputTool::new(self.inner.rendezvous.clone(), self.flow_index_getter());
            bundle.set_human_input(Arc::new(MonitoredHumanInput::new(
                Arc::new(tool),
                self.monitor_for(&config.id, ToolKind::HumanInput),
            )));
        }

        log::info!(
            "created tool set for agent '{}' with model {}",
            config.id,
            config.llm_model
        );
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inferflow::event_bus::EventBus;
    use crate::inferflow::tools::LanguageModel;

    fn registry() -> (tempfile::TempDir, AgentRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let rendezvous = Arc::new(HumanInputRendezvous::new(bus));
        let registry = AgentRegistry::new(dir.path(), rendezvous);
        (dir, registry)
    }

    #[tokio::test]
    async fn default_agent_exists_and_cannot_be_removed() {
        let (_dir, registry) = registry();
        assert!(registry.contains(DEFAULT_AGENT_ID));
        assert!(matches!(
            registry.unregister(DEFAULT_AGENT_ID),
            Err(RegistryError::ReservedAgent(_))
        ));
    }

    #[tokio::test]
    async fn register_unregister_register_is_observationally_identical() {
        let (_dir, registry) = registry();
        let config = AgentConfig::new("a1", "Agent One").with_model("m1");
        registry.register(config.clone());
        let before: Vec<String> = {
            let mut agents: Vec<String> =
                registry.list_agents().into_iter().map(|a| a.id).collect();
            agents.sort();
            agents
        };
        registry.unregister("a1").unwrap();
        registry.register(config);
        let after: Vec<String> = {
            let mut agents: Vec<String> =
                registry.list_agents().into_iter().map(|a| a.id).collect();
            agents.sort();
            agents
        };
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn bound_tools_are_cached_until_re_registration() {
        let (_dir, registry) = registry();
        registry.register(AgentConfig::new("a1", "Agent One"));
        let first = registry.bound_tools("a1").unwrap();
        let second = registry.bound_tools("a1").unwrap();
        // Same bundle instance: the language model Arc is shared.
        assert!(Arc::ptr_eq(
            &first.language_model().unwrap(),
            &second.language_model().unwrap()
        ));

        registry.register(AgentConfig::new("a1", "Agent One"));
        let third = registry.bound_tools("a1").unwrap();
        assert!(!Arc::ptr_eq(
            &first.language_model().unwrap(),
            &third.language_model().unwrap()
        ));
    }

    #[tokio::test]
    async fn unknown_agents_fall_back_to_default() {
        let (_dir, registry) = registry();
        let bundle = registry.bound_tools("nobody").unwrap();
        assert_eq!(bundle.language_model().unwrap().model_name(), "default");
    }

    #[tokio::test]
    async fn tool_events_reach_history_and_sinks() {
        let (_dir, registry) = registry();
        registry.register(
            AgentConfig::new("a1", "Agent One").with_mock_response("France", "PARIS"),
        );
        registry.set_current_flow_index("1.2.3");

        let seen: Arc<Mutex<Vec<ToolCallEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        registry.subscribe_events(
            "test",
            Arc::new(move |event| sink_seen.lock().unwrap().push(event)),
        );

        let tools = registry.bound_tools("a1").unwrap();
        let out = tools
            .language_model()
            .unwrap()
            .generate("capital of France?", None)
            .await
            .unwrap();
        assert_eq!(out, "PARIS");

        let history = registry.history(10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].flow_index, "1.2.3");
        assert_eq!(history[0].agent_id, "a1");
        assert_eq!(seen.lock().unwrap().len(), 2);

        registry.unsubscribe_events("test");
        registry.clear_history();
        assert!(registry.history(10).is_empty());
    }

    #[tokio::test]
    async fn disabled_tools_are_absent_from_the_bundle() {
        let (_dir, registry) = registry();
        registry.register(
            AgentConfig::new("slim", "Slim").with_enabled_tools(&[ToolKind::Formatter]),
        );
        let bundle = registry.bound_tools("slim").unwrap();
        assert!(bundle.formatter().is_ok());
        assert!(bundle.language_model().is_err());
    }
}
