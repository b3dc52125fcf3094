// src/lib.rs

// Import the top-level `inferflow` module.
pub mod inferflow;

// If you want to provide direct access (without having to navigate through the whole hierarchy) to certain types or functionalities at the crate level, you can use re-exports:

// Re-exporting key items for easier external access.
pub use inferflow::concept::{Concept, ConceptKind};
pub use inferflow::config::OrchestrationConfig;
pub use inferflow::event::{Event, Frame, InputKind, ToolCallEvent, ToolCallStatus};
pub use inferflow::event_bus::{EventBus, Subscription};
pub use inferflow::facade::{OrchestrationFacade, RunHandle, RunOverrides, RunStatus};
pub use inferflow::mapping::{MappingRule, MappingService, MatchField};
pub use inferflow::reference::{Cell, Reference};
pub use inferflow::registry::{AgentConfig, AgentRegistry};
pub use inferflow::rendezvous::HumanInputRendezvous;
pub use inferflow::state::{InterpretationState, SequenceState, StepName};
// Deeper layers stay reachable through the module hierarchy.
pub use inferflow::reference;
pub use inferflow::tools;
