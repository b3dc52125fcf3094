//! Human Input Tool
//!
//! The tool face of the
//! [`HumanInputRendezvous`](crate::inferflow::rendezvous::HumanInputRendezvous):
//! a step that needs a human answer calls
//! [`await_input`](crate::inferflow::tools::HumanInput::await_input) and its
//! worker parks until an observer submits or cancels. Cancellation surfaces
//! as [`ToolError::Cancelled`]; the step decides whether that fails the run
//! (it usually does, except for confirmations that can default).
//!
//! The tool captures the registry's current flow index at call time, so the
//! emitted `input:request` event is attributable to the run whose step asked.

use crate::inferflow::event::InputKind;
use crate::inferflow::rendezvous::HumanInputRendezvous;
use crate::inferflow::tools::{HumanInput, ToolError};
use async_trait::async_trait;
use std::sync::Arc;

/// Values treated as affirmative by [`HumanInput::confirm`].
const AFFIRMATIVE: &[&str] = &["yes", "y", "true", "1", "confirm"];

/// Observer-backed human input.
pub struct HumanInputTool {
    rendezvous: Arc<HumanInputRendezvous>,
    flow_index: Arc<dyn Fn() -> String + Send + Sync>,
}

impl HumanInputTool {
    /// Create a tool over the shared rendezvous. `flow_index` is read at each
    /// call, the same way monitored proxies tag their events.
    pub fn new(
        rendezvous: Arc<HumanInputRendezvous>,
        flow_index: Arc<dyn Fn() -> String + Send + Sync>,
    ) -> Self {
        Self {
            rendezvous,
            flow_index,
        }
    }
}

#[async_trait]
impl HumanInput for HumanInputTool {
    async fn await_input(
        &self,
        prompt: &str,
        kind: InputKind,
        options: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let flow_index = (self.flow_index)();
        match self
            .rendezvous
            .await_input(prompt, kind, options, &flow_index)
            .await
        {
            Some(answer) => Ok(answer),
            None => Err(ToolError::Cancelled(format!(
                "input request for '{}' was cancelled",
                prompt
            ))),
        }
    }

    async fn confirm(&self, prompt: &str) -> Result<bool, ToolError> {
        let answer = self
            .await_input(prompt, InputKind::Confirm, serde_json::json!({}))
            .await?;
        let text = match &answer {
            serde_json::Value::String(s) => s.to_lowercase(),
            serde_json::Value::Bool(b) => return Ok(*b),
            other => other.to_string(),
        };
        Ok(AFFIRMATIVE.contains(&text.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inferflow::event::Event;
    use crate::inferflow::event_bus::EventBus;

    fn tool() -> (Arc<HumanInputRendezvous>, HumanInputTool, EventBus) {
        let bus = EventBus::new();
        let rendezvous = Arc::new(HumanInputRendezvous::new(bus.clone()));
        let tool = HumanInputTool::new(rendezvous.clone(), Arc::new(|| "7.7".to_string()));
        (rendezvous, tool, bus)
    }

    #[tokio::test]
    async fn confirm_maps_affirmative_answers() {
        let (rendezvous, tool, bus) = tool();
        let mut subscription = bus.subscribe();
        let waiter = tokio::spawn(async move { tool.confirm("Proceed?").await });

        let request_id = loop {
            if let Event::InputRequest {
                request_id,
                flow_index,
                ..
            } = subscription.recv().await.unwrap()
            {
                assert_eq!(flow_index, "7.7");
                break request_id;
            }
        };
        rendezvous.submit(&request_id, serde_json::json!("yes"));
        assert_eq!(waiter.await.unwrap().unwrap(), true);
    }

    #[tokio::test]
    async fn confirm_maps_negative_answers() {
        let (rendezvous, tool, bus) = tool();
        let mut subscription = bus.subscribe();
        let waiter = tokio::spawn(async move { tool.confirm("Proceed?").await });
        let request_id = loop {
            if let Event::InputRequest { request_id, .. } = subscription.recv().await.unwrap() {
                break request_id;
            }
        };
        rendezvous.submit(&request_id, serde_json::json!("no"));
        assert_eq!(waiter.await.unwrap().unwrap(), false);
    }

    #[tokio::test]
    async fn cancellation_surfaces_as_cancelled_error() {
        let (rendezvous, tool, bus) = tool();
        let mut subscription = bus.subscribe();
        let waiter = tokio::spawn(async move {
            tool.await_input("?", InputKind::Text, serde_json::json!({}))
                .await
        });
        let request_id = loop {
            if let Event::InputRequest { request_id, .. } = subscription.recv().await.unwrap() {
                break request_id;
            }
        };
        rendezvous.cancel(&request_id);
        assert!(matches!(
            waiter.await.unwrap(),
            Err(ToolError::Cancelled(_))
        ));
    }
}
