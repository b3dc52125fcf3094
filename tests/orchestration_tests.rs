//! End-to-end orchestration scenarios: the happy path, event-pairing
//! invariants, and agent routing.

mod common;

use common::{collect_until, facade, is_terminal_event, wait_terminal};
use inferflow::{AgentConfig, Cell, Event, MappingRule, MatchField, RunOverrides, RunStatus, StepName};

#[tokio::test]
async fn happy_path_emits_the_expected_event_order() {
    let (_dir, facade) = facade();
    facade.registry().register(
        AgentConfig::new("a1", "Agent One").with_mock_response("capital of France", "PARIS"),
    );
    facade.register_sequence("qa", &[StepName::Iwi, StepName::Mfp, StepName::Owi]);

    let mut subscription = facade.bus().subscribe();
    let handle = facade
        .run(
            "qa",
            serde_json::json!({"prompt": "capital of France?"}),
            RunOverrides {
                agent_id: Some("a1".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    let events = collect_until(&mut subscription, is_terminal_event).await;
    let kinds: Vec<String> = events
        .iter()
        .map(|event| event.frame_type())
        .filter(|kind| kind != "execution:loaded")
        .collect();
    assert_eq!(
        kinds,
        vec![
            "execution:started",
            "inference:started",
            "inference:completed",
            "inference:started",
            "tool:generate:started",
            "tool:generate:completed",
            "inference:completed",
            "inference:started",
            "inference:completed",
            "execution:completed",
        ]
    );

    // The step bracket around the tool call names MFP, and the tool call
    // carries the prompt and output.
    match events.iter().find(|e| e.frame_type() == "tool:generate:started") {
        Some(Event::ToolCall(call)) => {
            assert_eq!(call.agent_id, "a1");
            assert!(call.inputs["prompt"]
                .as_str()
                .unwrap()
                .contains("capital of France?"));
        }
        other => panic!("unexpected event {:?}", other),
    }
    match events.iter().find(|e| e.frame_type() == "tool:generate:completed") {
        Some(Event::ToolCall(call)) => {
            assert_eq!(call.outputs, Some(serde_json::json!("PARIS")));
        }
        other => panic!("unexpected event {:?}", other),
    }

    // Final state holds the answer in the function block.
    assert_eq!(wait_terminal(&facade, &handle.run_id).await, RunStatus::Completed);
    let state = facade.final_state(&handle.run_id).unwrap();
    let reference = state.function.earliest_references()[0];
    assert_eq!(
        reference.get(&[("function", 0)]).unwrap(),
        Cell::text("PARIS")
    );
}

#[tokio::test]
async fn inference_and_tool_brackets_are_balanced() {
    let (_dir, facade) = facade();
    facade.registry().register(
        AgentConfig::new("a1", "Agent One").with_mock_response("question", "answer"),
    );
    facade.register_sequence(
        "long",
        &[
            StepName::Iwi,
            StepName::Mvp,
            StepName::Mfp,
            StepName::Cp,
            StepName::Rr,
            StepName::Owi,
        ],
    );

    let mut subscription = facade.bus().subscribe();
    facade
        .run(
            "long",
            serde_json::json!({
                "prompt": "question one",
                "values": {"topic": ["a", "b"]},
            }),
            RunOverrides {
                agent_id: Some("a1".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    let events = collect_until(&mut subscription, is_terminal_event).await;

    let started = events
        .iter()
        .filter(|e| matches!(e, Event::InferenceStarted { .. }))
        .count();
    let ended = events
        .iter()
        .filter(|e| {
            matches!(
                e,
                Event::InferenceCompleted { .. } | Event::InferenceFailed { .. }
            )
        })
        .count();
    assert_eq!(started, ended);

    // Every tool started event has exactly one matching completion with the
    // same event id, inside the same inference bracket.
    let mut open: Vec<String> = Vec::new();
    let mut in_bracket = false;
    for event in &events {
        match event {
            Event::InferenceStarted { .. } => in_bracket = true,
            Event::InferenceCompleted { .. } | Event::InferenceFailed { .. } => {
                assert!(open.is_empty(), "tool call left open across a bracket");
                in_bracket = false;
            }
            Event::ToolCall(call) => {
                assert!(in_bracket, "tool event outside an inference bracket");
                match call.status {
                    inferflow::ToolCallStatus::Started => open.push(call.id.clone()),
                    _ => {
                        let position = open
                            .iter()
                            .position(|id| id == &call.id)
                            .expect("completion without start");
                        open.remove(position);
                    }
                }
            }
            _ => {}
        }
    }
    assert!(open.is_empty());
}

#[tokio::test]
async fn mapping_routes_runs_to_agents() {
    let (_dir, facade) = facade();
    facade.registry().register(AgentConfig::new("a1", "One"));
    facade.registry().register(AgentConfig::new("a2", "Two"));
    facade.registry().register(AgentConfig::new("a3", "Three"));
    facade.mapping().set_default_agent("a1");
    facade.mapping().pin("1.2.3", "a2");
    facade.mapping().add_rule(MappingRule {
        match_field: MatchField::FlowIndex,
        pattern: r"^1\.2\..*$".to_string(),
        priority: 10,
        agent_id: "a3".to_string(),
    });
    facade.register_sequence("empty", &[]);

    for (flow_index, expected) in [("1.2.3", "a2"), ("1.2.4", "a3"), ("2.0.0", "a1")] {
        let handle = facade
            .run(
                "empty",
                serde_json::json!({}),
                RunOverrides {
                    flow_index: Some(flow_index.to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(handle.agent_id, expected, "flow index {}", flow_index);
        wait_terminal(&facade, &handle.run_id).await;
    }
}

#[tokio::test]
async fn failing_steps_fail_the_run_with_the_error_attached() {
    let (_dir, facade) = facade();
    // MFP requires the language model; disable it so the step raises.
    facade.registry().register(
        AgentConfig::new("no-llm", "No Model")
            .with_enabled_tools(&[inferflow::tools::ToolKind::Formatter]),
    );
    facade.register_sequence("qa", &[StepName::Mfp, StepName::Owi]);

    let mut subscription = facade.bus().subscribe();
    let handle = facade
        .run(
            "qa",
            serde_json::json!({"prompt": "anything"}),
            RunOverrides {
                agent_id: Some("no-llm".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(wait_terminal(&facade, &handle.run_id).await, RunStatus::Failed);
    let report = facade.status(&handle.run_id).unwrap();
    assert!(report.error.unwrap().contains("language_model"));

    let events = collect_until(&mut subscription, is_terminal_event).await;
    let kinds: Vec<String> = events.iter().map(|e| e.frame_type()).collect();
    assert!(kinds.contains(&"inference:failed".to_string()));
    assert!(kinds.contains(&"execution:failed".to_string()));
    // The failing step never reached OWI.
    let started = events
        .iter()
        .filter(|e| matches!(e, Event::InferenceStarted { .. }))
        .count();
    assert_eq!(started, 1);
}

#[tokio::test]
async fn a_step_producing_nothing_is_a_no_op_not_an_error() {
    let (_dir, facade) = facade();
    // MFP with no prompt configured writes nothing and still advances.
    facade.register_sequence("quiet", &[StepName::Mfp, StepName::Owi]);
    let handle = facade
        .run("quiet", serde_json::json!({}), RunOverrides::default())
        .unwrap();
    assert_eq!(
        wait_terminal(&facade, &handle.run_id).await,
        RunStatus::Completed
    );
    let state = facade.final_state(&handle.run_id).unwrap();
    assert!(state.function.is_empty());
}
