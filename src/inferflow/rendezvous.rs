//! Human-Input Rendezvous
//!
//! Lets a running sequence block until an external observer supplies an
//! answer. A step (through the human-input tool) calls
//! [`HumanInputRendezvous::await_input`]; the rendezvous allocates a request
//! id, emits an `input:request` event, and parks the step on a single-slot
//! completion. Any observer can answer via
//! [`submit`](HumanInputRendezvous::submit) (requests are not bound to the
//! transport that displays them) or abort via
//! [`cancel`](HumanInputRendezvous::cancel), which completes the wait with
//! the cancellation sentinel.
//!
//! Ordering guarantee: a submit that arrives before the matching
//! `await_input` is rejected as unknown, because the request id is allocated
//! only inside `await_input`. A request completes at most once; the second
//! submit for an id returns `false` and changes nothing.
//!
//! There is no timeout here; timeouts are policy for the layer above.

use crate::inferflow::event::{Event, InputKind};
use crate::inferflow::event_bus::EventBus;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

/// A pending human-input request, as listed for observers.
#[derive(Debug, Clone)]
pub struct InputRequest {
    pub id: String,
    pub prompt: String,
    pub kind: InputKind,
    pub options: serde_json::Value,
    pub flow_index: String,
    pub created_at: DateTime<Utc>,
}

struct PendingRequest {
    record: InputRequest,
    completion: oneshot::Sender<Option<serde_json::Value>>,
}

/// The process-wide rendezvous between waiting steps and observers.
pub struct HumanInputRendezvous {
    bus: EventBus,
    pending: Mutex<HashMap<String, PendingRequest>>,
}

impl HumanInputRendezvous {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Block until an observer answers or cancels.
    ///
    /// Returns `Some(answer)` on submit and `None`, the cancellation
    /// sentinel, on cancel. The caller (typically the human-input tool)
    /// decides the step's policy for the sentinel.
    pub async fn await_input(
        &self,
        prompt: &str,
        kind: InputKind,
        options: serde_json::Value,
        flow_index: &str,
    ) -> Option<serde_json::Value> {
        let request_id = Uuid::new_v4().to_string()[..8].to_string();
        let (completion, waiter) = oneshot::channel();
        let record = InputRequest {
            id: request_id.clone(),
            prompt: prompt.to_string(),
            kind: kind.clone(),
            options: options.clone(),
            flow_index: flow_index.to_string(),
            created_at: Utc::now(),
        };
        self.pending.lock().unwrap().insert(
            request_id.clone(),
            PendingRequest { record, completion },
        );

        self.bus.publish(Event::InputRequest {
            request_id: request_id.clone(),
            prompt: prompt.to_string(),
            kind,
            options,
            flow_index: flow_index.to_string(),
        });
        log::info!("waiting for input {} ({})", request_id, prompt);

        match waiter.await {
            Ok(answer) => answer,
            // Completion sender dropped without an answer: treat as cancelled.
            Err(_) => None,
        }
    }

    /// Complete a pending request with an answer. Returns `false` when the id
    /// is unknown or the request already completed.
    pub fn submit(&self, request_id: &str, answer: serde_json::Value) -> bool {
        let pending = self.pending.lock().unwrap().remove(request_id);
        match pending {
            None => {
                log::warn!("submit for unknown input request {}", request_id);
                false
            }
            Some(request) => {
                // Publish before completing, so observers see the response
                // ahead of whatever the resumed step emits next.
                self.bus.publish(Event::InputResponse {
                    request_id: request_id.to_string(),
                });
                let _ = request.completion.send(Some(answer));
                true
            }
        }
    }

    /// Complete a pending request with the cancellation sentinel. Returns
    /// `false` when the id is unknown or the request already completed.
    pub fn cancel(&self, request_id: &str) -> bool {
        let pending = self.pending.lock().unwrap().remove(request_id);
        match pending {
            None => false,
            Some(request) => {
                self.bus.publish(Event::InputCancelled {
                    request_id: request_id.to_string(),
                });
                let _ = request.completion.send(None);
                true
            }
        }
    }

    /// Cancel every pending request whose flow index matches. Used when a run
    /// is cancelled while one of its steps is waiting.
    pub fn cancel_for_flow_index(&self, flow_index: &str) -> usize {
        let ids: Vec<String> = self
            .pending
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.record.flow_index == flow_index)
            .map(|p| p.record.id.clone())
            .collect();
        let mut cancelled = 0;
        for id in ids {
            if self.cancel(&id) {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Snapshot of the open requests.
    pub fn pending(&self) -> Vec<InputRequest> {
        self.pending
            .lock()
            .unwrap()
            .values()
            .map(|p| p.record.clone())
            .collect()
    }

    /// True when at least one request is waiting.
    pub fn has_pending(&self) -> bool {
        !self.pending.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn rendezvous() -> (Arc<HumanInputRendezvous>, EventBus) {
        let bus = EventBus::new();
        (Arc::new(HumanInputRendezvous::new(bus.clone())), bus)
    }

    #[tokio::test]
    async fn submit_unblocks_the_waiter() {
        let (rendezvous, bus) = rendezvous();
        let mut subscription = bus.subscribe();

        let waiter = {
            let rendezvous = rendezvous.clone();
            tokio::spawn(async move {
                rendezvous
                    .await_input("Proceed?", InputKind::Confirm, serde_json::json!({}), "1")
                    .await
            })
        };

        // Pick the request id off the bus, then answer it.
        let request_id = loop {
            match subscription.recv().await.unwrap() {
                Event::InputRequest { request_id, .. } => break request_id,
                _ => continue,
            }
        };
        assert!(rendezvous.submit(&request_id, serde_json::json!("yes")));
        assert_eq!(waiter.await.unwrap(), Some(serde_json::json!("yes")));
    }

    #[tokio::test]
    async fn submit_before_await_is_rejected() {
        let (rendezvous, _bus) = rendezvous();
        assert!(!rendezvous.submit("never-allocated", serde_json::json!("x")));
    }

    #[tokio::test]
    async fn second_submit_is_rejected() {
        let (rendezvous, bus) = rendezvous();
        let mut subscription = bus.subscribe();
        let waiter = {
            let rendezvous = rendezvous.clone();
            tokio::spawn(async move {
                rendezvous
                    .await_input("?", InputKind::Text, serde_json::json!({}), "1")
                    .await
            })
        };
        let request_id = loop {
            match subscription.recv().await.unwrap() {
                Event::InputRequest { request_id, .. } => break request_id,
                _ => continue,
            }
        };
        assert!(rendezvous.submit(&request_id, serde_json::json!("a")));
        assert!(!rendezvous.submit(&request_id, serde_json::json!("b")));
        assert_eq!(waiter.await.unwrap(), Some(serde_json::json!("a")));
    }

    #[tokio::test]
    async fn cancel_delivers_the_sentinel() {
        let (rendezvous, bus) = rendezvous();
        let mut subscription = bus.subscribe();
        let waiter = {
            let rendezvous = rendezvous.clone();
            tokio::spawn(async move {
                rendezvous
                    .await_input("?", InputKind::Text, serde_json::json!({}), "2.1")
                    .await
            })
        };
        loop {
            if let Event::InputRequest { .. } = subscription.recv().await.unwrap() {
                break;
            }
        }
        assert_eq!(rendezvous.cancel_for_flow_index("2.1"), 1);
        assert_eq!(waiter.await.unwrap(), None);
        assert!(!rendezvous.has_pending());
    }

    #[tokio::test]
    async fn pending_lists_open_requests() {
        let (rendezvous, bus) = rendezvous();
        let mut subscription = bus.subscribe();
        let _waiter = {
            let rendezvous = rendezvous.clone();
            tokio::spawn(async move {
                rendezvous
                    .await_input(
                        "Pick one",
                        InputKind::Select {
                            options: vec!["a".to_string(), "b".to_string()],
                        },
                        serde_json::json!({}),
                        "1",
                    )
                    .await
            })
        };
        loop {
            if let Event::InputRequest { .. } = subscription.recv().await.unwrap() {
                break;
            }
        }
        let pending = rendezvous.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].prompt, "Pick one");
    }
}
