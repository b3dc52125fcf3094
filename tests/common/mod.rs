//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use inferflow::{
    AgentRegistry, Event, EventBus, HumanInputRendezvous, MappingService, OrchestrationFacade,
    RunStatus, Subscription,
};
use std::sync::Arc;
use std::time::Duration;

/// A facade over freshly instantiated components, rooted in a temp dir.
pub fn facade() -> (tempfile::TempDir, OrchestrationFacade) {
    let bus = EventBus::new();
    let rendezvous = Arc::new(HumanInputRendezvous::new(bus.clone()));
    let dir = tempfile::tempdir().unwrap();
    let registry = AgentRegistry::new(dir.path(), rendezvous.clone());
    let facade =
        OrchestrationFacade::new(registry, Arc::new(MappingService::new()), bus, rendezvous);
    (dir, facade)
}

/// Drain the subscription until an event satisfies `stop` (inclusive) or the
/// timeout expires.
pub async fn collect_until<F>(subscription: &mut Subscription, stop: F) -> Vec<Event>
where
    F: Fn(&Event) -> bool,
{
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let event = tokio::time::timeout_at(deadline, subscription.recv()).await;
        match event {
            Ok(Some(event)) => {
                let done = stop(&event);
                events.push(event);
                if done {
                    return events;
                }
            }
            _ => return events,
        }
    }
}

/// Drain the subscription until every listed frame type has been seen at
/// least once (or the timeout expires).
pub async fn collect_until_kinds(subscription: &mut Subscription, kinds: &[&str]) -> Vec<Event> {
    let mut remaining: std::collections::HashSet<String> =
        kinds.iter().map(|kind| kind.to_string()).collect();
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !remaining.is_empty() {
        match tokio::time::timeout_at(deadline, subscription.recv()).await {
            Ok(Some(event)) => {
                remaining.remove(&event.frame_type());
                events.push(event);
            }
            _ => break,
        }
    }
    events
}

/// Wait for one event matching `predicate`, skipping everything else.
pub async fn wait_for<F>(subscription: &mut Subscription, predicate: F) -> Option<Event>
where
    F: Fn(&Event) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        match tokio::time::timeout_at(deadline, subscription.recv()).await {
            Ok(Some(event)) if predicate(&event) => return Some(event),
            Ok(Some(_)) => continue,
            _ => return None,
        }
    }
}

/// Poll the facade until the run reaches a terminal state.
pub async fn wait_terminal(facade: &OrchestrationFacade, run_id: &str) -> RunStatus {
    for _ in 0..500 {
        if let Some(report) = facade.status(run_id) {
            if report.state.is_terminal() {
                return report.state;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("run {} did not reach a terminal state", run_id);
}

/// Frame types of a terminal event, used as collection stop markers.
pub fn is_terminal_event(event: &Event) -> bool {
    matches!(
        event,
        Event::ExecutionCompleted { .. }
            | Event::ExecutionFailed { .. }
            | Event::ExecutionCancelled { .. }
    )
}
