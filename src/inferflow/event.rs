//! Event Model
//!
//! Every observable thing the orchestration core does becomes one [`Event`]:
//! run lifecycle transitions, per-step inference brackets, monitored tool
//! calls, human-input traffic, and bus housekeeping. Events are published on
//! the [`EventBus`](crate::inferflow::event_bus::EventBus) and forwarded to
//! observers as [`Frame`]s; the wire shape is a `type` string plus a `data`
//! payload.
//!
//! # Frame types
//!
//! ```text
//! connection:established        first frame on every observer connection
//! execution:loaded|started|paused|resumed|completed|failed|cancelled
//! inference:started|completed|failed
//! tool:<method>:started|completed|failed
//! input:request|response|cancelled
//! bus:overflow
//! pong
//! ```
//!
//! Within one run, events are emitted in program order: a tool call's
//! `started` precedes its `completed`/`failed` with the same event id, and
//! nested (second-order) calls emit between the outer call's bracket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One framed message on the observer wire: a `type` tag plus payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Frame {
    pub fn new(frame_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            frame_type: frame_type.into(),
            data,
        }
    }
}

/// Status of one monitored tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Started,
    Completed,
    Failed,
}

impl ToolCallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCallStatus::Started => "started",
            ToolCallStatus::Completed => "completed",
            ToolCallStatus::Failed => "failed",
        }
    }
}

/// Event emitted when a monitored tool method is called.
///
/// The same `id` appears on the `started` event and on the matching
/// `completed`/`failed` event. Inputs and outputs are sanitised shallow
/// copies (see [`sanitize`](crate::inferflow::sanitize)).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub flow_index: String,
    pub agent_id: String,
    pub tool_name: String,
    /// Method name; second-order invocations use `"<method>→execute"`.
    pub method: String,
    pub inputs: serde_json::Value,
    pub outputs: Option<serde_json::Value>,
    pub duration_ms: Option<f64>,
    pub status: ToolCallStatus,
    pub error: Option<String>,
}

impl ToolCallEvent {
    /// Wire type of this event: `tool:<method>:<status>`.
    pub fn frame_type(&self) -> String {
        format!("tool:{}:{}", self.method, self.status.as_str())
    }
}

/// Interaction kind of a human-input request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputKind {
    /// Plain text entry.
    Text,
    /// Code entry with a language tag.
    Code { language: String },
    /// Yes/no confirmation.
    Confirm,
    /// Pick one of the options.
    Select { options: Vec<String> },
    /// Free-form editing of initial content.
    Editor { initial_content: String },
}

/// Structured event flowing through the bus.
///
/// Every variant that belongs to a run carries `run_id`; tool events are
/// correlated through their flow index instead, which the facade maps back
/// to runs. The combination of run id, flow index, step, and event id is
/// sufficient to reconstruct a run's story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// Synthetic first frame on every observer connection.
    ConnectionEstablished { message: String },

    // ── Run lifecycle ────────────────────────────────────────────────────
    /// A run was accepted and its state allocated.
    ExecutionLoaded {
        run_id: String,
        sequence_name: String,
        agent_id: String,
        flow_index: String,
    },
    /// The run's worker began executing steps.
    ExecutionStarted { run_id: String, sequence_name: String },
    /// The run is blocked on a human-input request.
    ExecutionPaused { run_id: String, request_id: String },
    /// The blocking request was answered and the run continues.
    ExecutionResumed { run_id: String },
    ExecutionCompleted { run_id: String },
    ExecutionFailed {
        run_id: String,
        /// Step that raised, when known.
        step: Option<String>,
        error: String,
    },
    ExecutionCancelled { run_id: String },

    // ── Step brackets ────────────────────────────────────────────────────
    InferenceStarted {
        run_id: String,
        step: String,
        step_index: usize,
        flow_index: String,
    },
    InferenceCompleted {
        run_id: String,
        step: String,
        step_index: usize,
        flow_index: String,
    },
    InferenceFailed {
        run_id: String,
        step: String,
        step_index: usize,
        flow_index: String,
        error: String,
    },

    // ── Tools ────────────────────────────────────────────────────────────
    ToolCall(ToolCallEvent),

    // ── Human input ──────────────────────────────────────────────────────
    InputRequest {
        request_id: String,
        prompt: String,
        kind: InputKind,
        options: serde_json::Value,
        /// Flow index of the requesting step, for run correlation.
        flow_index: String,
    },
    InputResponse { request_id: String },
    InputCancelled { request_id: String },

    // ── Bus housekeeping ─────────────────────────────────────────────────
    /// Inserted into a slow subscriber's stream in place of dropped events.
    BusOverflow { dropped: u64 },
    /// Reply to an observer `ping`.
    Pong,
}

impl Event {
    /// Wire type string of this event.
    pub fn frame_type(&self) -> String {
        match self {
            Event::ConnectionEstablished { .. } => "connection:established".to_string(),
            Event::ExecutionLoaded { .. } => "execution:loaded".to_string(),
            Event::ExecutionStarted { .. } => "execution:started".to_string(),
            Event::ExecutionPaused { .. } => "execution:paused".to_string(),
            Event::ExecutionResumed { .. } => "execution:resumed".to_string(),
            Event::ExecutionCompleted { .. } => "execution:completed".to_string(),
            Event::ExecutionFailed { .. } => "execution:failed".to_string(),
            Event::ExecutionCancelled { .. } => "execution:cancelled".to_string(),
            Event::InferenceStarted { .. } => "inference:started".to_string(),
            Event::InferenceCompleted { .. } => "inference:completed".to_string(),
            Event::InferenceFailed { .. } => "inference:failed".to_string(),
            Event::ToolCall(call) => call.frame_type(),
            Event::InputRequest { .. } => "input:request".to_string(),
            Event::InputResponse { .. } => "input:response".to_string(),
            Event::InputCancelled { .. } => "input:cancelled".to_string(),
            Event::BusOverflow { .. } => "bus:overflow".to_string(),
            Event::Pong => "pong".to_string(),
        }
    }

    /// Run the event belongs to, when it carries one directly.
    pub fn run_id(&self) -> Option<&str> {
        match self {
            Event::ExecutionLoaded { run_id, .. }
            | Event::ExecutionStarted { run_id, .. }
            | Event::ExecutionPaused { run_id, .. }
            | Event::ExecutionResumed { run_id }
            | Event::ExecutionCompleted { run_id }
            | Event::ExecutionFailed { run_id, .. }
            | Event::ExecutionCancelled { run_id }
            | Event::InferenceStarted { run_id, .. }
            | Event::InferenceCompleted { run_id, .. }
            | Event::InferenceFailed { run_id, .. } => Some(run_id),
            _ => None,
        }
    }

    /// Flow index the event is tagged with, when it has one.
    pub fn flow_index(&self) -> Option<&str> {
        match self {
            Event::ExecutionLoaded { flow_index, .. }
            | Event::InferenceStarted { flow_index, .. }
            | Event::InferenceCompleted { flow_index, .. }
            | Event::InferenceFailed { flow_index, .. }
            | Event::InputRequest { flow_index, .. } => Some(flow_index),
            Event::ToolCall(call) => Some(&call.flow_index),
            _ => None,
        }
    }

    /// Encode the event as a wire frame.
    pub fn to_frame(&self) -> Frame {
        let data = match self {
            Event::ToolCall(call) => {
                serde_json::to_value(call).unwrap_or(serde_json::Value::Null)
            }
            // The interaction kind's fields sit directly in the payload.
            Event::InputRequest {
                request_id,
                prompt,
                kind,
                options,
                flow_index,
            } => {
                let mut data = serde_json::json!({
                    "request_id": request_id,
                    "prompt": prompt,
                    "options": options,
                    "flow_index": flow_index,
                });
                if let (Some(entries), Ok(serde_json::Value::Object(kind_fields))) =
                    (data.as_object_mut(), serde_json::to_value(kind))
                {
                    for (key, value) in kind_fields {
                        entries.insert(key, value);
                    }
                }
                data
            }
            Event::Pong => serde_json::json!({}),
            other => match serde_json::to_value(other) {
                Ok(serde_json::Value::Object(mut entries)) => {
                    // The internal "event" discriminant is redundant with the
                    // frame type.
                    entries.remove("event");
                    serde_json::Value::Object(entries)
                }
                Ok(value) => value,
                Err(_) => serde_json::Value::Null,
            },
        };
        Frame::new(self.frame_type(), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_event(status: ToolCallStatus) -> ToolCallEvent {
        ToolCallEvent {
            id: "abc12345".to_string(),
            timestamp: Utc::now(),
            flow_index: "1.2".to_string(),
            agent_id: "a1".to_string(),
            tool_name: "language_model".to_string(),
            method: "generate".to_string(),
            inputs: serde_json::json!({"prompt": "hi"}),
            outputs: None,
            duration_ms: None,
            status,
            error: None,
        }
    }

    #[test]
    fn frame_types_follow_the_wire_grammar() {
        assert_eq!(
            Event::ExecutionCompleted {
                run_id: "r".to_string()
            }
            .frame_type(),
            "execution:completed"
        );
        assert_eq!(
            Event::ToolCall(tool_event(ToolCallStatus::Started)).frame_type(),
            "tool:generate:started"
        );
        assert_eq!(
            Event::ToolCall(tool_event(ToolCallStatus::Failed)).frame_type(),
            "tool:generate:failed"
        );
        assert_eq!(Event::Pong.frame_type(), "pong");
    }

    #[test]
    fn frames_strip_the_internal_discriminant() {
        let frame = Event::ExecutionStarted {
            run_id: "r1".to_string(),
            sequence_name: "judgement".to_string(),
        }
        .to_frame();
        assert_eq!(frame.frame_type, "execution:started");
        assert_eq!(frame.data["run_id"], serde_json::json!("r1"));
        assert!(frame.data.get("event").is_none());
    }

    #[test]
    fn input_request_frames_flatten_the_kind() {
        let frame = Event::InputRequest {
            request_id: "q1".to_string(),
            prompt: "Proceed?".to_string(),
            kind: InputKind::Confirm,
            options: serde_json::json!({}),
            flow_index: "1".to_string(),
        }
        .to_frame();
        assert_eq!(frame.data["kind"], serde_json::json!("confirm"));
        assert_eq!(frame.data["request_id"], serde_json::json!("q1"));
    }

    #[test]
    fn run_id_extraction_covers_lifecycle_events() {
        let event = Event::InferenceStarted {
            run_id: "r9".to_string(),
            step: "MFP".to_string(),
            step_index: 2,
            flow_index: "1".to_string(),
        };
        assert_eq!(event.run_id(), Some("r9"));
        assert_eq!(event.flow_index(), Some("1"));
        assert_eq!(Event::Pong.run_id(), None);
    }
}
