//! Configuration Surface
//!
//! One structured document configures the whole orchestration: the default
//! agent, the agent configs, the mapping rules and explicit pins, and the
//! sequence definitions (ordered step names). The document is plain JSON and
//! is applied onto a facade; applying registers the agents, installs the
//! routing, and registers the sequences.
//!
//! ```json
//! {
//!   "default_agent": "a1",
//!   "agents": [
//!     {"id": "a1", "name": "Primary", "llm_model": "gpt-4o-mini"}
//!   ],
//!   "mappings": [
//!     {"match_field": "flow_index", "pattern": "^1\\.2\\..*$",
//!      "priority": 10, "agent_id": "a3"}
//!   ],
//!   "explicit": {"1.2.3": "a2"},
//!   "sequences": {"judgement": ["IWC", "MVP", "CP", "PA", "PTA", "RR", "OWC"]}
//! }
//! ```

use crate::inferflow::facade::OrchestrationFacade;
use crate::inferflow::mapping::MappingRule;
use crate::inferflow::registry::AgentConfig;
use crate::inferflow::state::StepName;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::path::Path;

/// Errors raised while loading or applying a configuration document.
#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    /// A sequence definition names a step outside the closed step set.
    UnknownStep { sequence: String, step: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Configuration IO error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Configuration parse error: {}", msg),
            ConfigError::UnknownStep { sequence, step } => {
                write!(f, "Sequence '{}' names unknown step '{}'", sequence, step)
            }
        }
    }
}

impl Error for ConfigError {}

/// The structured configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    /// Fallback agent id for the mapping service.
    #[serde(default)]
    pub default_agent: Option<String>,
    /// Agent configurations to register.
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    /// Pattern-based routing rules.
    #[serde(default)]
    pub mappings: Vec<MappingRule>,
    /// Explicit pins: flow index → agent id.
    #[serde(default)]
    pub explicit: HashMap<String, String>,
    /// Sequence definitions: name → ordered step names.
    #[serde(default)]
    pub sequences: HashMap<String, Vec<String>>,
}

impl OrchestrationConfig {
    /// Parse a configuration from a JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        serde_json::from_value(value).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load a configuration from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.as_ref().display(), e)))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Resolve the sequence definitions against the closed step set.
    fn parsed_sequences(&self) -> Result<Vec<(String, Vec<StepName>)>, ConfigError> {
        let mut parsed = Vec::with_capacity(self.sequences.len());
        for (name, steps) in &self.sequences {
            let mut step_names = Vec::with_capacity(steps.len());
            for step in steps {
                step_names.push(step.parse::<StepName>().map_err(|_| {
                    ConfigError::UnknownStep {
                        sequence: name.clone(),
                        step: step.clone(),
                    }
                })?);
            }
            parsed.push((name.clone(), step_names));
        }
        Ok(parsed)
    }

    /// Apply the document onto a facade: agents, routing, sequences.
    ///
    /// Validation happens before any mutation, so a bad document leaves the
    /// facade untouched.
    pub fn apply(&self, facade: &OrchestrationFacade) -> Result<(), ConfigError> {
        let sequences = self.parsed_sequences()?;

        for agent in &self.agents {
            facade.registry().register(agent.clone());
            log::info!("loaded agent config: {} ({})", agent.id, agent.name);
        }
        for rule in &self.mappings {
            log::info!(
                "loaded mapping rule: {:?} {} -> {}",
                rule.match_field,
                rule.pattern,
                rule.agent_id
            );
            facade.mapping().add_rule(rule.clone());
        }
        for (flow_index, agent_id) in &self.explicit {
            facade.mapping().pin(flow_index, agent_id);
        }
        if let Some(default_agent) = &self.default_agent {
            facade.mapping().set_default_agent(default_agent);
        }
        for (name, steps) in sequences {
            facade.register_sequence(&name, &steps);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inferflow::event_bus::EventBus;
    use crate::inferflow::mapping::MappingService;
    use crate::inferflow::registry::AgentRegistry;
    use crate::inferflow::rendezvous::HumanInputRendezvous;
    use std::sync::Arc;

    fn facade() -> (tempfile::TempDir, OrchestrationFacade) {
        let bus = EventBus::new();
        let rendezvous = Arc::new(HumanInputRendezvous::new(bus.clone()));
        let dir = tempfile::tempdir().unwrap();
        let registry = AgentRegistry::new(dir.path(), rendezvous.clone());
        let facade =
            OrchestrationFacade::new(registry, Arc::new(MappingService::new()), bus, rendezvous);
        (dir, facade)
    }

    fn document() -> serde_json::Value {
        serde_json::json!({
            "default_agent": "a1",
            "agents": [
                {"id": "a1", "name": "One"},
                {"id": "a2", "name": "Two", "llm_model": "m2"},
            ],
            "mappings": [
                {"match_field": "flow_index", "pattern": "^1\\.2\\..*$",
                 "priority": 10, "agent_id": "a2"},
            ],
            "explicit": {"1.2.3": "a1"},
            "sequences": {"judgement": ["IWC", "MFP", "OWC"]},
        })
    }

    #[tokio::test]
    async fn apply_installs_agents_routing_and_sequences() {
        let (_dir, facade) = facade();
        let config = OrchestrationConfig::from_value(document()).unwrap();
        config.apply(&facade).unwrap();

        assert!(facade.registry().contains("a2"));
        assert_eq!(facade.mapping().resolve("1.2.3", None, None), "a1");
        assert_eq!(facade.mapping().resolve("1.2.9", None, None), "a2");
        assert_eq!(facade.mapping().resolve("9", None, None), "a1");
        assert!(facade.sequence_names().contains(&"judgement".to_string()));
    }

    #[tokio::test]
    async fn unknown_steps_fail_before_any_mutation() {
        let (_dir, facade) = facade();
        let mut document = document();
        document["sequences"]["bad"] = serde_json::json!(["IWC", "NOPE"]);
        let config = OrchestrationConfig::from_value(document).unwrap();
        assert!(matches!(
            config.apply(&facade),
            Err(ConfigError::UnknownStep { .. })
        ));
        // Nothing was registered.
        assert!(!facade.registry().contains("a2"));
        assert!(facade.sequence_names().is_empty());
    }

    #[test]
    fn from_path_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestration.json");
        std::fs::write(&path, serde_json::to_string_pretty(&document()).unwrap()).unwrap();
        let config = OrchestrationConfig::from_path(&path).unwrap();
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.default_agent.as_deref(), Some("a1"));
    }
}
