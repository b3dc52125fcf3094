//! Orchestration Facade
//!
//! The single entry point external callers use to run inference sequences.
//! [`OrchestrationFacade::run`] validates the sequence name, allocates a run
//! id and working state, resolves the agent through the
//! [`MappingService`], obtains the agent's monitored tool bundle, and starts
//! a [`SequenceRunner`] on a dedicated worker task. Each active run owns one
//! worker; runs execute in parallel, each strictly sequential inside.
//!
//! The facade also owns run observability: a recorder task subscribes to the
//! bus and journals every event into the run it belongs to (directly via its
//! `run_id`, or through the run's flow index for tool and input events), so
//! late observers can page through [`OrchestrationFacade::events`]. The
//! recorder is also where *paused* lives: an `input:request` from a run's
//! step flips the run to paused and emits `execution:paused`; the answer
//! flips it back with `execution:resumed`.
//!
//! Cancellation is cooperative: [`OrchestrationFacade::cancel`] sets the
//! run's cancel flag (observed at step boundaries) and cancels any rendezvous
//! wait the run is parked on.
//!
//! The registry, mapping service, bus, and rendezvous are injected by
//! construction; nothing here reaches for ambient globals, and tests
//! instantiate their own.

use crate::inferflow::event::{Event, Frame};
use crate::inferflow::event_bus::EventBus;
use crate::inferflow::mapping::MappingService;
use crate::inferflow::registry::{AgentRegistry, RegistryError};
use crate::inferflow::rendezvous::{HumanInputRendezvous, InputRequest};
use crate::inferflow::runner::{CancelFlag, RunOutcome, SequenceRunner, StepContext};
use crate::inferflow::state::{InterpretationState, StepName};
use crate::inferflow::steps::StepRegistry;
use serde::Serialize;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use uuid::Uuid;

/// Events retained per run for late observers.
const JOURNAL_CAPACITY: usize = 4096;

/// Buffer of the facade's own bus subscription (the recorder).
const RECORDER_CAPACITY: usize = 8192;

/// Lifecycle state of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// Errors surfaced to the caller of [`OrchestrationFacade::run`]. No partial
/// run state exists when one of these is returned.
#[derive(Debug, Clone)]
pub enum FacadeError {
    UnknownSequence(String),
    UnknownAgent(String),
    Registry(RegistryError),
}

impl fmt::Display for FacadeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FacadeError::UnknownSequence(name) => write!(f, "Unknown sequence: {}", name),
            FacadeError::UnknownAgent(id) => write!(f, "Unknown agent: {}", id),
            FacadeError::Registry(err) => write!(f, "Registry error: {}", err),
        }
    }
}

impl Error for FacadeError {}

impl From<RegistryError> for FacadeError {
    fn from(err: RegistryError) -> Self {
        FacadeError::Registry(err)
    }
}

/// Optional per-run overrides of the configured routing.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    /// Flow index for the run; defaults to `"1"`.
    pub flow_index: Option<String>,
    /// Bypass the mapping service entirely.
    pub agent_id: Option<String>,
    /// Concept name fed to mapping rules.
    pub concept_name: Option<String>,
}

/// The caller's handle to a started run.
#[derive(Debug, Clone, Serialize)]
pub struct RunHandle {
    pub run_id: String,
    pub agent_id: String,
    pub sequence_name: String,
    pub flow_index: String,
}

/// Read-only status report of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatusReport {
    pub run_id: String,
    pub state: RunStatus,
    pub agent_id: String,
    pub sequence_name: String,
    pub current_step: Option<String>,
    pub current_step_index: Option<usize>,
    pub current_flow_index: String,
    pub error: Option<String>,
}

/// One journaled event, addressable by its monotonic cursor.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub cursor: u64,
    #[serde(flatten)]
    pub frame: Frame,
}

struct RunState {
    run_id: String,
    agent_id: String,
    sequence_name: String,
    flow_index: String,
    cancel: CancelFlag,
    status: RwLock<RunStatus>,
    error: RwLock<Option<String>>,
    current: RwLock<Option<(String, usize)>>,
    journal: Mutex<Vec<EventRecord>>,
    next_cursor: AtomicU64,
    final_state: Mutex<Option<InterpretationState>>,
}

impl RunState {
    fn journal_event(&self, event: &Event) {
        let cursor = self.next_cursor.fetch_add(1, Ordering::SeqCst);
        let mut journal = self.journal.lock().unwrap();
        if journal.len() >= JOURNAL_CAPACITY {
            journal.remove(0);
        }
        journal.push(EventRecord {
            cursor,
            frame: event.to_frame(),
        });
    }
}

struct FacadeInner {
    registry: AgentRegistry,
    mapping: Arc<MappingService>,
    bus: EventBus,
    rendezvous: Arc<HumanInputRendezvous>,
    steps: Arc<StepRegistry>,
    sequences: Mutex<HashMap<String, Vec<StepName>>>,
    runs: Mutex<HashMap<String, Arc<RunState>>>,
    flow_to_run: Mutex<HashMap<String, String>>,
    request_to_run: Mutex<HashMap<String, String>>,
}

impl FacadeInner {
    fn run_for_event(&self, event: &Event) -> Option<Arc<RunState>> {
        let run_id = match event.run_id() {
            Some(run_id) => Some(run_id.to_string()),
            None => match event {
                Event::InputResponse { request_id } | Event::InputCancelled { request_id } => {
                    self.request_to_run.lock().unwrap().get(request_id).cloned()
                }
                _ => event.flow_index().and_then(|flow_index| {
                    self.flow_to_run.lock().unwrap().get(flow_index).cloned()
                }),
            },
        }?;
        self.runs.lock().unwrap().get(&run_id).cloned()
    }

    /// Journal one bus event and maintain pause/resume bookkeeping.
    fn record(&self, event: &Event) {
        let run = match self.run_for_event(event) {
            Some(run) => run,
            None => return,
        };
        run.journal_event(event);

        match event {
            Event::InferenceStarted {
                step, step_index, ..
            } => {
                *run.current.write().unwrap() = Some((step.clone(), *step_index));
            }
            Event::InputRequest { request_id, .. } => {
                self.request_to_run
                    .lock()
                    .unwrap()
                    .insert(request_id.clone(), run.run_id.clone());
                let mut status = run.status.write().unwrap();
                if *status == RunStatus::Running {
                    *status = RunStatus::Paused;
                    drop(status);
                    self.bus.publish(Event::ExecutionPaused {
                        run_id: run.run_id.clone(),
                        request_id: request_id.clone(),
                    });
                }
            }
            Event::InputResponse { request_id } | Event::InputCancelled { request_id } => {
                self.request_to_run.lock().unwrap().remove(request_id);
                let mut status = run.status.write().unwrap();
                if *status == RunStatus::Paused {
                    *status = RunStatus::Running;
                    drop(status);
                    self.bus.publish(Event::ExecutionResumed {
                        run_id: run.run_id.clone(),
                    });
                }
            }
            _ => {}
        }
    }
}

/// Ties the registry, mapping, bus, rendezvous, and step set together behind
/// one `run`/`cancel`/`status`/`events` surface.
#[derive(Clone)]
pub struct OrchestrationFacade {
    inner: Arc<FacadeInner>,
}

impl OrchestrationFacade {
    /// Build a facade with the standard step set.
    pub fn new(
        registry: AgentRegistry,
        mapping: Arc<MappingService>,
        bus: EventBus,
        rendezvous: Arc<HumanInputRendezvous>,
    ) -> Self {
        Self::with_steps(registry, mapping, bus, rendezvous, StepRegistry::standard())
    }

    /// Build a facade with a custom step registry (embedders and tests).
    pub fn with_steps(
        registry: AgentRegistry,
        mapping: Arc<MappingService>,
        bus: EventBus,
        rendezvous: Arc<HumanInputRendezvous>,
        steps: StepRegistry,
    ) -> Self {
        let inner = Arc::new(FacadeInner {
            registry,
            mapping,
            bus,
            rendezvous,
            steps: Arc::new(steps),
            sequences: Mutex::new(HashMap::new()),
            runs: Mutex::new(HashMap::new()),
            flow_to_run: Mutex::new(HashMap::new()),
            request_to_run: Mutex::new(HashMap::new()),
        });

        // Tool events from monitored proxies flow onto the bus through the
        // registry sink.
        {
            let bus = inner.bus.clone();
            inner.registry.subscribe_events(
                "facade",
                Arc::new(move |event| bus.publish(Event::ToolCall(event))),
            );
        }

        // The recorder journals bus traffic into runs and maintains
        // paused/resumed state. It holds only a weak reference so dropping
        // the facade shuts it down.
        {
            let mut subscription = inner.bus.subscribe_with_capacity(RECORDER_CAPACITY);
            let weak: Weak<FacadeInner> = Arc::downgrade(&inner);
            tokio::spawn(async move {
                while let Some(event) = subscription.recv().await {
                    match weak.upgrade() {
                        Some(inner) => inner.record(&event),
                        None => break,
                    }
                }
            });
        }

        Self { inner }
    }

    /// Register (or replace) a sequence definition.
    pub fn register_sequence(&self, name: &str, steps: &[StepName]) {
        self.inner
            .sequences
            .lock()
            .unwrap()
            .insert(name.to_string(), steps.to_vec());
    }

    /// Names of the registered sequences.
    pub fn sequence_names(&self) -> Vec<String> {
        self.inner.sequences.lock().unwrap().keys().cloned().collect()
    }

    /// Start a run. Validates the sequence and any explicit agent override
    /// before any state is created.
    pub fn run(
        &self,
        sequence_name: &str,
        input_data: serde_json::Value,
        overrides: RunOverrides,
    ) -> Result<RunHandle, FacadeError> {
        let steps = self
            .inner
            .sequences
            .lock()
            .unwrap()
            .get(sequence_name)
            .cloned()
            .ok_or_else(|| FacadeError::UnknownSequence(sequence_name.to_string()))?;
        if let Some(agent_id) = &overrides.agent_id {
            if !self.inner.registry.contains(agent_id) {
                return Err(FacadeError::UnknownAgent(agent_id.clone()));
            }
        }

        let run_id = Uuid::new_v4().to_string();
        let flow_index = overrides.flow_index.clone().unwrap_or_else(|| "1".to_string());
        let agent_id = overrides.agent_id.clone().unwrap_or_else(|| {
            self.inner.mapping.resolve(
                &flow_index,
                overrides.concept_name.as_deref(),
                Some(sequence_name),
            )
        });
        let tools = self.inner.registry.bound_tools(&agent_id)?;

        let run_state = Arc::new(RunState {
            run_id: run_id.clone(),
            agent_id: agent_id.clone(),
            sequence_name: sequence_name.to_string(),
            flow_index: flow_index.clone(),
            cancel: CancelFlag::new(),
            status: RwLock::new(RunStatus::Running),
            error: RwLock::new(None),
            current: RwLock::new(None),
            journal: Mutex::new(Vec::new()),
            next_cursor: AtomicU64::new(0),
            final_state: Mutex::new(None),
        });
        self.inner
            .runs
            .lock()
            .unwrap()
            .insert(run_id.clone(), run_state.clone());
        self.inner
            .flow_to_run
            .lock()
            .unwrap()
            .insert(flow_index.clone(), run_id.clone());

        self.inner.bus.publish(Event::ExecutionLoaded {
            run_id: run_id.clone(),
            sequence_name: sequence_name.to_string(),
            agent_id: agent_id.clone(),
            flow_index: flow_index.clone(),
        });

        let state = InterpretationState::new(&steps, input_data);
        let context = StepContext {
            run_id: run_id.clone(),
            flow_index: flow_index.clone(),
            cancel: run_state.cancel.clone(),
        };
        let worker_inner = self.inner.clone();
        let worker_run = run_state.clone();
        tokio::spawn(async move {
            worker_inner.bus.publish(Event::ExecutionStarted {
                run_id: worker_run.run_id.clone(),
                sequence_name: worker_run.sequence_name.clone(),
            });
            let mut runner = SequenceRunner::new(
                worker_inner.registry.clone(),
                worker_inner.bus.clone(),
                worker_inner.steps.clone(),
                tools,
                context,
            );
            runner.start(state);
            let outcome = runner.run().await;
            *worker_run.final_state.lock().unwrap() = runner.into_state();

            match outcome {
                RunOutcome::Completed => {
                    *worker_run.status.write().unwrap() = RunStatus::Completed;
                    worker_inner.bus.publish(Event::ExecutionCompleted {
                        run_id: worker_run.run_id.clone(),
                    });
                }
                RunOutcome::Failed { step, error } => {
                    *worker_run.status.write().unwrap() = RunStatus::Failed;
                    *worker_run.error.write().unwrap() = Some(error.clone());
                    worker_inner.bus.publish(Event::ExecutionFailed {
                        run_id: worker_run.run_id.clone(),
                        step,
                        error,
                    });
                }
                RunOutcome::Cancelled => {
                    *worker_run.status.write().unwrap() = RunStatus::Cancelled;
                    worker_inner.bus.publish(Event::ExecutionCancelled {
                        run_id: worker_run.run_id.clone(),
                    });
                }
            }
        });

        Ok(RunHandle {
            run_id,
            agent_id,
            sequence_name: sequence_name.to_string(),
            flow_index,
        })
    }

    /// Request cooperative cancellation of a run. Returns `false` for unknown
    /// or already-terminal runs.
    pub fn cancel(&self, run_id: &str) -> bool {
        let run = match self.inner.runs.lock().unwrap().get(run_id).cloned() {
            Some(run) => run,
            None => return false,
        };
        if run.status.read().unwrap().is_terminal() {
            return false;
        }
        run.cancel.cancel();
        // Unblock any rendezvous wait belonging to this run.
        self.inner.rendezvous.cancel_for_flow_index(&run.flow_index);
        true
    }

    /// Ids of every run the facade still holds.
    pub fn run_ids(&self) -> Vec<String> {
        self.inner.runs.lock().unwrap().keys().cloned().collect()
    }

    /// Read-only status of a run.
    pub fn status(&self, run_id: &str) -> Option<RunStatusReport> {
        let run = self.inner.runs.lock().unwrap().get(run_id).cloned()?;
        let current = run.current.read().unwrap().clone();
        let state = *run.status.read().unwrap();
        let error = run.error.read().unwrap().clone();
        Some(RunStatusReport {
            run_id: run.run_id.clone(),
            state,
            agent_id: run.agent_id.clone(),
            sequence_name: run.sequence_name.clone(),
            current_step: current.as_ref().map(|(step, _)| step.clone()),
            current_step_index: current.map(|(_, index)| index),
            current_flow_index: run.flow_index.clone(),
            error,
        })
    }

    /// Already-journaled events of a run, strictly after `since` when given.
    pub fn events(&self, run_id: &str, since: Option<u64>) -> Option<Vec<EventRecord>> {
        let run = self.inner.runs.lock().unwrap().get(run_id).cloned()?;
        let journal = run.journal.lock().unwrap();
        let page = journal
            .iter()
            .filter(|record| since.map(|cursor| record.cursor > cursor).unwrap_or(true))
            .cloned()
            .collect();
        Some(page)
    }

    /// The run's final working state, once its worker finished.
    pub fn final_state(&self, run_id: &str) -> Option<InterpretationState> {
        let run = self.inner.runs.lock().unwrap().get(run_id).cloned()?;
        let state = run.final_state.lock().unwrap().clone();
        state
    }

    /// Open human-input requests.
    pub fn pending_inputs(&self) -> Vec<InputRequest> {
        self.inner.rendezvous.pending()
    }

    /// Answer a pending input request.
    pub fn submit_input(&self, request_id: &str, answer: serde_json::Value) -> bool {
        self.inner.rendezvous.submit(request_id, answer)
    }

    /// Cancel a pending input request.
    pub fn cancel_input(&self, request_id: &str) -> bool {
        self.inner.rendezvous.cancel(request_id)
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.inner.registry
    }

    pub fn mapping(&self) -> &Arc<MappingService> {
        &self.inner.mapping
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn rendezvous(&self) -> &Arc<HumanInputRendezvous> {
        &self.inner.rendezvous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facade() -> (tempfile::TempDir, OrchestrationFacade) {
        let bus = EventBus::new();
        let rendezvous = Arc::new(HumanInputRendezvous::new(bus.clone()));
        let dir = tempfile::tempdir().unwrap();
        let registry = AgentRegistry::new(dir.path(), rendezvous.clone());
        let facade =
            OrchestrationFacade::new(registry, Arc::new(MappingService::new()), bus, rendezvous);
        (dir, facade)
    }

    async fn wait_terminal(facade: &OrchestrationFacade, run_id: &str) -> RunStatusReport {
        for _ in 0..200 {
            if let Some(report) = facade.status(run_id) {
                if report.state.is_terminal() {
                    return report;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        facade.status(run_id).expect("run exists")
    }

    #[tokio::test]
    async fn unknown_sequence_is_rejected_without_state() {
        let (_dir, facade) = facade();
        assert!(matches!(
            facade.run("missing", serde_json::json!({}), RunOverrides::default()),
            Err(FacadeError::UnknownSequence(_))
        ));
    }

    #[tokio::test]
    async fn unknown_agent_override_is_rejected() {
        let (_dir, facade) = facade();
        facade.register_sequence("empty", &[]);
        let overrides = RunOverrides {
            agent_id: Some("ghost".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            facade.run("empty", serde_json::json!({}), overrides),
            Err(FacadeError::UnknownAgent(_))
        ));
    }

    #[tokio::test]
    async fn empty_sequence_completes_immediately() {
        let (_dir, facade) = facade();
        facade.register_sequence("empty", &[]);
        let handle = facade
            .run("empty", serde_json::json!({}), RunOverrides::default())
            .unwrap();
        let report = wait_terminal(&facade, &handle.run_id).await;
        assert_eq!(report.state, RunStatus::Completed);
    }

    #[tokio::test]
    async fn events_are_journaled_with_monotonic_cursors() {
        let (_dir, facade) = facade();
        facade.register_sequence("two", &[StepName::Iwi, StepName::Owi]);
        let handle = facade
            .run("two", serde_json::json!({}), RunOverrides::default())
            .unwrap();
        wait_terminal(&facade, &handle.run_id).await;
        // Give the recorder a beat to drain.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let records = facade.events(&handle.run_id, None).unwrap();
        let kinds: Vec<String> = records.iter().map(|r| r.frame.frame_type.clone()).collect();
        assert!(kinds.contains(&"execution:loaded".to_string()));
        assert!(kinds.contains(&"execution:started".to_string()));
        assert!(kinds.contains(&"execution:completed".to_string()));
        for window in records.windows(2) {
            assert!(window[0].cursor < window[1].cursor);
        }

        // Paging: everything after the first cursor.
        let first = records[0].cursor;
        let rest = facade.events(&handle.run_id, Some(first)).unwrap();
        assert_eq!(rest.len(), records.len() - 1);
    }

    #[tokio::test]
    async fn cancel_unknown_run_is_false() {
        let (_dir, facade) = facade();
        assert!(!facade.cancel("missing"));
    }

    #[tokio::test]
    async fn cancel_after_completion_is_false() {
        let (_dir, facade) = facade();
        facade.register_sequence("empty", &[]);
        let handle = facade
            .run("empty", serde_json::json!({}), RunOverrides::default())
            .unwrap();
        wait_terminal(&facade, &handle.run_id).await;
        assert!(!facade.cancel(&handle.run_id));
    }
}
