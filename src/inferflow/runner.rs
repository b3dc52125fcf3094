//! Sequence Runner
//!
//! Drives one inference sequence, step by step, over one
//! [`InterpretationState`]. For every step the runner:
//!
//! 1. checks the cooperative cancel flag (cancellation is only observed at
//!    step boundaries and inside rendezvous waits),
//! 2. sets the registry's current flow index so monitored tools tag their
//!    events with this run's step,
//! 3. emits `inference:started`, invokes the step function with the state and
//!    the agent's tool bundle, and emits `inference:completed` or
//!    `inference:failed`,
//! 4. advances the cursor, or transitions the run to a terminal outcome.
//!
//! Step ordering is taken verbatim from the sequence definition: no
//! backtracking, no retry, no implicit skip. A step that writes no block
//! entry is a no-op that still advances; a step that fails ends the run with
//! the error attached verbatim.

use crate::inferflow::event::Event;
use crate::inferflow::event_bus::EventBus;
use crate::inferflow::grouper::GrouperError;
use crate::inferflow::quantifier::QuantifierError;
use crate::inferflow::reference::ReferenceError;
use crate::inferflow::registry::AgentRegistry;
use crate::inferflow::state::{InterpretationState, StepDescriptor};
use crate::inferflow::steps::StepRegistry;
use crate::inferflow::tools::{ToolBundle, ToolError};
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a run's worker and the
/// facade.
#[derive(Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Observed at the next step boundary and by any
    /// rendezvous wait the facade cancels alongside.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Errors surfaced by step functions.
#[derive(Debug, Clone)]
pub enum StepError {
    /// The step observed run cancellation (typically through the rendezvous
    /// sentinel). Not an error in the usual sense.
    Cancelled(String),
    /// The step raised; the run transitions to failed.
    Failed(String),
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepError::Cancelled(msg) => write!(f, "Step cancelled: {}", msg),
            StepError::Failed(msg) => write!(f, "Step failed: {}", msg),
        }
    }
}

impl Error for StepError {}

impl From<ToolError> for StepError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::Cancelled(msg) => StepError::Cancelled(msg),
            other => StepError::Failed(other.to_string()),
        }
    }
}

impl From<ReferenceError> for StepError {
    fn from(err: ReferenceError) -> Self {
        StepError::Failed(err.to_string())
    }
}

impl From<QuantifierError> for StepError {
    fn from(err: QuantifierError) -> Self {
        StepError::Failed(err.to_string())
    }
}

impl From<GrouperError> for StepError {
    fn from(err: GrouperError) -> Self {
        StepError::Failed(err.to_string())
    }
}

/// Per-run context handed to step functions alongside the state and tools.
#[derive(Clone)]
pub struct StepContext {
    pub run_id: String,
    pub flow_index: String,
    pub cancel: CancelFlag,
}

/// Terminal outcome of one run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    Failed {
        step: Option<String>,
        error: String,
    },
    Cancelled,
}

/// Result of advancing the runner by one step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepProgress {
    /// The step ran (or no-opped) and the cursor advanced.
    Advanced(StepDescriptor),
    /// The run reached a terminal outcome.
    Terminal(RunOutcome),
}

/// Errors from driving the runner itself.
#[derive(Debug, Clone)]
pub enum RunnerError {
    /// `step()` was called before `start()` or after a terminal outcome.
    NotRunning(String),
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerError::NotRunning(msg) => write!(f, "Runner not running: {}", msg),
        }
    }
}

impl Error for RunnerError {}

/// Executes the ordered steps of one sequence over one state.
pub struct SequenceRunner {
    registry: AgentRegistry,
    bus: EventBus,
    steps: Arc<StepRegistry>,
    tools: ToolBundle,
    context: StepContext,
    state: Option<InterpretationState>,
    terminal: Option<RunOutcome>,
}

impl SequenceRunner {
    pub fn new(
        registry: AgentRegistry,
        bus: EventBus,
        steps: Arc<StepRegistry>,
        tools: ToolBundle,
        context: StepContext,
    ) -> Self {
        Self {
            registry,
            bus,
            steps,
            tools,
            context,
            state: None,
            terminal: None,
        }
    }

    /// Begin execution at step index 1 of the state's sequence.
    pub fn start(&mut self, state: InterpretationState) {
        self.state = Some(state);
        self.terminal = None;
    }

    /// The cursor: current step name, step index, and flow index.
    pub fn current(&self) -> Option<(StepDescriptor, String)> {
        self.state
            .as_ref()
            .and_then(|state| state.sequence.current())
            .map(|descriptor| (descriptor, self.context.flow_index.clone()))
    }

    /// Borrow the working state.
    pub fn state(&self) -> Option<&InterpretationState> {
        self.state.as_ref()
    }

    /// Take the working state back out of the runner.
    pub fn into_state(self) -> Option<InterpretationState> {
        self.state
    }

    /// Advance exactly one step. Fails if the runner was never started or has
    /// already reached a terminal outcome.
    pub async fn step(&mut self) -> Result<StepProgress, RunnerError> {
        if let Some(outcome) = &self.terminal {
            return Err(RunnerError::NotRunning(format!(
                "run already terminal: {:?}",
                outcome
            )));
        }
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| RunnerError::NotRunning("start() was not called".to_string()))?;

        if self.context.cancel.is_cancelled() {
            let outcome = RunOutcome::Cancelled;
            self.terminal = Some(outcome.clone());
            return Ok(StepProgress::Terminal(outcome));
        }

        let descriptor = match state.sequence.current() {
            Some(descriptor) => descriptor,
            None => {
                let outcome = RunOutcome::Completed;
                self.terminal = Some(outcome.clone());
                return Ok(StepProgress::Terminal(outcome));
            }
        };

        self.registry
            .set_current_flow_index(&self.context.flow_index);
        self.bus.publish(Event::InferenceStarted {
            run_id: self.context.run_id.clone(),
            step: descriptor.step_name.as_str().to_string(),
            step_index: descriptor.step_index,
            flow_index: self.context.flow_index.clone(),
        });

        let result = self
            .steps
            .execute(descriptor.step_name, state, &self.tools, &self.context)
            .await;

        match result {
            Ok(()) => {
                self.bus.publish(Event::InferenceCompleted {
                    run_id: self.context.run_id.clone(),
                    step: descriptor.step_name.as_str().to_string(),
                    step_index: descriptor.step_index,
                    flow_index: self.context.flow_index.clone(),
                });
                match state.sequence.advance() {
                    Some(next) => Ok(StepProgress::Advanced(next)),
                    None => {
                        let outcome = RunOutcome::Completed;
                        self.terminal = Some(outcome.clone());
                        Ok(StepProgress::Terminal(outcome))
                    }
                }
            }
            Err(error) => {
                self.bus.publish(Event::InferenceFailed {
                    run_id: self.context.run_id.clone(),
                    step: descriptor.step_name.as_str().to_string(),
                    step_index: descriptor.step_index,
                    flow_index: self.context.flow_index.clone(),
                    error: error.to_string(),
                });
                let outcome = match error {
                    StepError::Cancelled(_) => RunOutcome::Cancelled,
                    StepError::Failed(message) => RunOutcome::Failed {
                        step: Some(descriptor.step_name.as_str().to_string()),
                        error: message,
                    },
                };
                self.terminal = Some(outcome.clone());
                Ok(StepProgress::Terminal(outcome))
            }
        }
    }

    /// Repeat [`SequenceRunner::step`] until terminal.
    pub async fn run(&mut self) -> RunOutcome {
        loop {
            match self.step().await {
                Ok(StepProgress::Advanced(_)) => continue,
                Ok(StepProgress::Terminal(outcome)) => return outcome,
                Err(_) => {
                    return self
                        .terminal
                        .clone()
                        .unwrap_or(RunOutcome::Completed)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inferflow::event::Event;
    use crate::inferflow::rendezvous::HumanInputRendezvous;
    use crate::inferflow::state::StepName;

    fn runner_parts(
        input: serde_json::Value,
        steps: &[StepName],
    ) -> (SequenceRunner, EventBus, InterpretationState) {
        let bus = EventBus::new();
        let rendezvous = Arc::new(HumanInputRendezvous::new(bus.clone()));
        let dir = tempfile::tempdir().unwrap();
        let registry = AgentRegistry::new(dir.path(), rendezvous);
        let tools = registry.bound_tools("default").unwrap();
        let context = StepContext {
            run_id: "r1".to_string(),
            flow_index: "1".to_string(),
            cancel: CancelFlag::new(),
        };
        let runner = SequenceRunner::new(
            registry,
            bus.clone(),
            Arc::new(StepRegistry::standard()),
            tools,
            context,
        );
        let state = InterpretationState::new(steps, input);
        (runner, bus, state)
    }

    #[tokio::test]
    async fn empty_sequence_terminates_immediately() {
        let (mut runner, _bus, state) = runner_parts(serde_json::json!({}), &[]);
        runner.start(state);
        assert_eq!(
            runner.step().await.unwrap(),
            StepProgress::Terminal(RunOutcome::Completed)
        );
    }

    #[tokio::test]
    async fn step_after_terminal_fails() {
        let (mut runner, _bus, state) = runner_parts(serde_json::json!({}), &[]);
        runner.start(state);
        let _ = runner.step().await.unwrap();
        assert!(runner.step().await.is_err());
    }

    #[tokio::test]
    async fn emits_paired_inference_events_per_step() {
        let (mut runner, bus, state) =
            runner_parts(serde_json::json!({}), &[StepName::Iwi, StepName::Owi]);
        let mut subscription = bus.subscribe();
        runner.start(state);
        assert_eq!(runner.run().await, RunOutcome::Completed);

        let mut kinds = Vec::new();
        while let Some(event) = subscription.try_recv() {
            kinds.push(event.frame_type());
        }
        assert_eq!(
            kinds,
            vec![
                "inference:started",
                "inference:completed",
                "inference:started",
                "inference:completed",
            ]
        );
    }

    #[tokio::test]
    async fn cancellation_is_observed_at_the_step_boundary() {
        let (mut runner, bus, state) =
            runner_parts(serde_json::json!({}), &[StepName::Iwi, StepName::Owi]);
        let mut subscription = bus.subscribe();
        runner.start(state);
        let _ = runner.step().await.unwrap();
        runner.context.cancel.cancel();
        assert_eq!(
            runner.step().await.unwrap(),
            StepProgress::Terminal(RunOutcome::Cancelled)
        );
        // Only the first step emitted events.
        let mut count = 0;
        while let Some(event) = subscription.try_recv() {
            assert!(matches!(
                event,
                Event::InferenceStarted { .. } | Event::InferenceCompleted { .. }
            ));
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn current_reports_the_cursor() {
        let (mut runner, _bus, state) =
            runner_parts(serde_json::json!({}), &[StepName::Iwi, StepName::Mfp]);
        runner.start(state);
        let (descriptor, flow) = runner.current().unwrap();
        assert_eq!(descriptor.step_name, StepName::Iwi);
        assert_eq!(descriptor.step_index, 1);
        assert_eq!(flow, "1");
        let _ = runner.step().await.unwrap();
        let (descriptor, _) = runner.current().unwrap();
        assert_eq!(descriptor.step_name, StepName::Mfp);
    }
}
