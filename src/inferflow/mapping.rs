//! Mapping Service
//!
//! Routes an inference descriptor to an agent id. Resolution order:
//!
//! 1. **Explicit pins** — a direct `flow_index → agent_id` assignment wins
//!    unconditionally.
//! 2. **Rules**: scanned in descending priority (insertion order among
//!    equals); the first rule whose regex matches the selected field wins.
//!    Patterns match from the start of the field, so `^` anchors are
//!    optional.
//! 3. **Default agent**: when nothing else applies.
//!
//! Rules with invalid patterns are kept but never match; the defect is
//! logged once, when the rule is added.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::inferflow::registry::DEFAULT_AGENT_ID;

/// Field of the inference descriptor a rule matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    FlowIndex,
    ConceptName,
    SequenceType,
}

/// One pattern-based routing rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingRule {
    pub match_field: MatchField,
    pub pattern: String,
    /// Higher priorities are consulted first.
    #[serde(default)]
    pub priority: i32,
    pub agent_id: String,
}

struct CompiledRule {
    rule: MappingRule,
    /// `None` when the pattern failed to compile; such rules never match.
    regex: Option<Regex>,
    /// Tie-breaker preserving insertion order among equal priorities.
    insertion: usize,
}

struct MappingState {
    rules: Vec<CompiledRule>,
    pins: HashMap<String, String>,
    default_agent: String,
    inserted: usize,
}

/// Routes inference descriptors to agent ids.
pub struct MappingService {
    state: Mutex<MappingState>,
}

impl Default for MappingService {
    fn default() -> Self {
        Self::new()
    }
}

impl MappingService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MappingState {
                rules: Vec::new(),
                pins: HashMap::new(),
                default_agent: DEFAULT_AGENT_ID.to_string(),
                inserted: 0,
            }),
        }
    }

    /// Add a rule, keeping the rule list in priority order.
    pub fn add_rule(&self, rule: MappingRule) {
        let regex = match Regex::new(&rule.pattern) {
            Ok(regex) => Some(regex),
            Err(error) => {
                log::warn!("invalid regex pattern in rule '{}': {}", rule.pattern, error);
                None
            }
        };
        let mut state = self.state.lock().unwrap();
        let insertion = state.inserted;
        state.inserted += 1;
        state.rules.push(CompiledRule {
            rule,
            regex,
            insertion,
        });
        state
            .rules
            .sort_by_key(|compiled| (-compiled.rule.priority, compiled.insertion));
    }

    /// Remove a rule by its position in the priority-ordered list.
    pub fn remove_rule(&self, index: usize) {
        let mut state = self.state.lock().unwrap();
        if index < state.rules.len() {
            state.rules.remove(index);
        }
    }

    /// Drop every rule.
    pub fn clear_rules(&self) {
        self.state.lock().unwrap().rules.clear();
    }

    /// Pin a flow index directly to an agent.
    pub fn pin(&self, flow_index: &str, agent_id: &str) {
        self.state
            .lock()
            .unwrap()
            .pins
            .insert(flow_index.to_string(), agent_id.to_string());
    }

    /// Remove one pin.
    pub fn unpin(&self, flow_index: &str) {
        self.state.lock().unwrap().pins.remove(flow_index);
    }

    /// Drop every pin.
    pub fn clear_pins(&self) {
        self.state.lock().unwrap().pins.clear();
    }

    /// Set the fallback agent.
    pub fn set_default_agent(&self, agent_id: &str) {
        self.state.lock().unwrap().default_agent = agent_id.to_string();
    }

    /// The fallback agent.
    pub fn default_agent(&self) -> String {
        self.state.lock().unwrap().default_agent.clone()
    }

    /// Resolve an inference descriptor to an agent id.
    pub fn resolve(
        &self,
        flow_index: &str,
        concept_name: Option<&str>,
        sequence_type: Option<&str>,
    ) -> String {
        let state = self.state.lock().unwrap();
        if let Some(agent_id) = state.pins.get(flow_index) {
            return agent_id.clone();
        }
        for compiled in &state.rules {
            let regex = match &compiled.regex {
                Some(regex) => regex,
                None => continue,
            };
            let value = match compiled.rule.match_field {
                MatchField::FlowIndex => flow_index,
                MatchField::ConceptName => concept_name.unwrap_or(""),
                MatchField::SequenceType => sequence_type.unwrap_or(""),
            };
            // Match must begin at the start of the field.
            if regex.find(value).map(|m| m.start() == 0).unwrap_or(false) {
                return compiled.rule.agent_id.clone();
            }
        }
        state.default_agent.clone()
    }

    /// Current mapping state, for the API and debugging.
    pub fn snapshot(&self) -> serde_json::Value {
        let state = self.state.lock().unwrap();
        serde_json::json!({
            "rules": state
                .rules
                .iter()
                .map(|compiled| serde_json::to_value(&compiled.rule).unwrap_or(serde_json::Value::Null))
                .collect::<Vec<_>>(),
            "explicit": state.pins,
            "default_agent": state.default_agent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(field: MatchField, pattern: &str, priority: i32, agent_id: &str) -> MappingRule {
        MappingRule {
            match_field: field,
            pattern: pattern.to_string(),
            priority,
            agent_id: agent_id.to_string(),
        }
    }

    #[test]
    fn precedence_is_pins_then_rules_then_default() {
        let mapping = MappingService::new();
        mapping.set_default_agent("a1");
        mapping.pin("1.2.3", "a2");
        mapping.add_rule(rule(MatchField::FlowIndex, r"^1\.2\..*$", 10, "a3"));

        assert_eq!(mapping.resolve("1.2.3", None, None), "a2");
        assert_eq!(mapping.resolve("1.2.4", None, None), "a3");
        assert_eq!(mapping.resolve("2.0.0", None, None), "a1");
    }

    #[test]
    fn higher_priority_rules_win() {
        let mapping = MappingService::new();
        mapping.add_rule(rule(MatchField::FlowIndex, "1", 1, "low"));
        mapping.add_rule(rule(MatchField::FlowIndex, "1", 10, "high"));
        assert_eq!(mapping.resolve("1.0", None, None), "high");
    }

    #[test]
    fn equal_priorities_keep_insertion_order() {
        let mapping = MappingService::new();
        mapping.add_rule(rule(MatchField::FlowIndex, "1", 5, "first"));
        mapping.add_rule(rule(MatchField::FlowIndex, "1", 5, "second"));
        assert_eq!(mapping.resolve("1.0", None, None), "first");
    }

    #[test]
    fn patterns_match_from_the_start() {
        let mapping = MappingService::new();
        mapping.add_rule(rule(MatchField::FlowIndex, r"2\.1", 0, "mid"));
        // "1.2.1" contains the pattern but not at the start.
        assert_eq!(mapping.resolve("1.2.1", None, None), DEFAULT_AGENT_ID);
        assert_eq!(mapping.resolve("2.1.9", None, None), "mid");
    }

    #[test]
    fn concept_and_sequence_fields_are_matchable() {
        let mapping = MappingService::new();
        mapping.add_rule(rule(MatchField::ConceptName, "country", 0, "geo"));
        mapping.add_rule(rule(MatchField::SequenceType, "imperative", 0, "imp"));
        assert_eq!(mapping.resolve("1", Some("country list"), None), "geo");
        assert_eq!(mapping.resolve("1", None, Some("imperative")), "imp");
        assert_eq!(mapping.resolve("1", None, None), DEFAULT_AGENT_ID);
    }

    #[test]
    fn invalid_patterns_never_match() {
        let mapping = MappingService::new();
        mapping.add_rule(rule(MatchField::FlowIndex, "(unclosed", 100, "broken"));
        mapping.add_rule(rule(MatchField::FlowIndex, ".*", 0, "catchall"));
        assert_eq!(mapping.resolve("anything", None, None), "catchall");
    }

    #[test]
    fn unpin_and_clear_restore_rule_resolution() {
        let mapping = MappingService::new();
        mapping.pin("1", "pinned");
        assert_eq!(mapping.resolve("1", None, None), "pinned");
        mapping.unpin("1");
        assert_eq!(mapping.resolve("1", None, None), DEFAULT_AGENT_ID);

        mapping.add_rule(rule(MatchField::FlowIndex, ".*", 0, "x"));
        mapping.clear_rules();
        assert_eq!(mapping.resolve("1", None, None), DEFAULT_AGENT_ID);
    }

    #[test]
    fn snapshot_exposes_rules_pins_and_default() {
        let mapping = MappingService::new();
        mapping.pin("1.1", "a2");
        mapping.add_rule(rule(MatchField::FlowIndex, "^1", 3, "a3"));
        let snapshot = mapping.snapshot();
        assert_eq!(snapshot["default_agent"], serde_json::json!(DEFAULT_AGENT_ID));
        assert_eq!(snapshot["explicit"]["1.1"], serde_json::json!("a2"));
        assert_eq!(snapshot["rules"][0]["agent_id"], serde_json::json!("a3"));
    }
}
