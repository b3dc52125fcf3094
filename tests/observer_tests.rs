//! Observer delivery scenarios: ordered fan-out, slow-subscriber overflow,
//! and late observers paging the journal.

mod common;

use common::{collect_until, facade, is_terminal_event, wait_terminal};
use inferflow::{Event, RunOverrides, StepName};

#[tokio::test]
async fn both_observers_see_events_in_order_and_overflow_is_isolated() {
    let (_dir, facade) = facade();
    // Ten identity steps produce a comfortably long event stream.
    let steps = vec![StepName::Iwi; 10];
    facade.register_sequence("long", &steps);

    let mut fast = facade.bus().subscribe_with_capacity(256);
    // The slow observer reads nothing until the run is over; its buffer only
    // holds a few events.
    let mut slow = facade.bus().subscribe_with_capacity(4);

    let handle = facade
        .run("long", serde_json::json!({}), RunOverrides::default())
        .unwrap();
    wait_terminal(&facade, &handle.run_id).await;

    // The fast observer gets the full, ordered stream.
    let fast_events = collect_until(&mut fast, is_terminal_event).await;
    let fast_kinds: Vec<String> = fast_events.iter().map(|e| e.frame_type()).collect();
    assert_eq!(
        fast_kinds
            .iter()
            .filter(|kind| *kind == "inference:started")
            .count(),
        10
    );
    assert!(!fast_kinds.contains(&"bus:overflow".to_string()));
    // started/completed alternate in order for identity steps.
    let brackets: Vec<&String> = fast_kinds
        .iter()
        .filter(|kind| kind.starts_with("inference:"))
        .collect();
    for pair in brackets.chunks(2) {
        assert_eq!(pair[0], "inference:started");
        assert_eq!(pair[1], "inference:completed");
    }

    // Let the dispatcher finish delivering to the slow buffer before
    // resuming it.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    // The slow observer resumes reading: one overflow marker, then the
    // newest retained events, ending at the terminal event.
    let slow_events = collect_until(&mut slow, is_terminal_event).await;
    match slow_events.first() {
        Some(Event::BusOverflow { dropped }) => assert!(*dropped > 0),
        other => panic!("expected overflow marker, got {:?}", other),
    }
    assert!(is_terminal_event(slow_events.last().unwrap()));
    // What survived is exactly the newest suffix of the stream the fast
    // observer saw.
    let tail = &slow_events[1..];
    let expected_tail = &fast_events[fast_events.len() - tail.len()..];
    assert_eq!(tail, expected_tail);
}

#[tokio::test]
async fn late_observers_page_journaled_events() {
    let (_dir, facade) = facade();
    facade.register_sequence("three", &[StepName::Iwi, StepName::Mvp, StepName::Owi]);
    let handle = facade
        .run("three", serde_json::json!({}), RunOverrides::default())
        .unwrap();
    wait_terminal(&facade, &handle.run_id).await;
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    // A client that arrived after the run still reconstructs the story.
    let records = facade.events(&handle.run_id, None).unwrap();
    let kinds: Vec<&str> = records
        .iter()
        .map(|record| record.frame.frame_type.as_str())
        .collect();
    assert!(kinds.first().unwrap().starts_with("execution:loaded"));
    assert_eq!(*kinds.last().unwrap(), "execution:completed");

    // Resuming from a cursor yields only newer events.
    let midpoint = records[records.len() / 2].cursor;
    let newer = facade.events(&handle.run_id, Some(midpoint)).unwrap();
    assert!(newer.iter().all(|record| record.cursor > midpoint));
    assert_eq!(newer.len(), records.len() - records.len() / 2 - 1);
}

#[tokio::test]
async fn parallel_runs_keep_their_journals_apart() {
    let (_dir, facade) = facade();
    facade.register_sequence("short", &[StepName::Iwi, StepName::Owi]);

    let first = facade
        .run(
            "short",
            serde_json::json!({}),
            RunOverrides {
                flow_index: Some("1.1".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    let second = facade
        .run(
            "short",
            serde_json::json!({}),
            RunOverrides {
                flow_index: Some("1.2".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    wait_terminal(&facade, &first.run_id).await;
    wait_terminal(&facade, &second.run_id).await;
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    for handle in [&first, &second] {
        let records = facade.events(&handle.run_id, None).unwrap();
        for record in &records {
            if let Some(run_id) = record.frame.data.get("run_id").and_then(|v| v.as_str()) {
                assert_eq!(run_id, handle.run_id);
            }
        }
    }
}
