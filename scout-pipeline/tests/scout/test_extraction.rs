//! Event extraction over scripted streams

use futures::{stream, StreamExt};
use scout_pipeline::extraction::{collect_outputs, extract_object, Attributor};
use scout_pipeline::pipeline::{resolve_analyses, AnalysisRecord};
use scout_sdk::{Dispatch, EventStream, Stage, TaskSpec, WorkerError, WorkerEvent, WorkerId};
use serde_json::json;
use std::time::Duration;

use super::common::{analyst_events, TREND_OUTPUT};

fn merged_attributor() -> Attributor {
    let tasks = WorkerId::ANALYSTS
        .iter()
        .map(|w| TaskSpec::new(*w, "analyze"))
        .collect();
    Attributor::for_dispatch(&Dispatch::new(Stage::FanOut, "fan out", tasks))
}

fn scripted(events: Vec<WorkerEvent>) -> EventStream {
    Box::pin(stream::iter(events.into_iter().map(Ok)))
}

#[tokio::test]
async fn test_tagged_stream_fills_every_slot() {
    let outputs = collect_outputs(scripted(analyst_events()), merged_attributor(), 100)
        .await
        .unwrap();

    assert_eq!(outputs.events_seen, 6);
    assert!(!outputs.truncated);
    assert_eq!(outputs.text(WorkerId::Trend), Some(TREND_OUTPUT));

    let resolved = resolve_analyses(&outputs);
    assert!(resolved.missing().is_empty());
    match resolved.records.get(&WorkerId::Profit) {
        Some(AnalysisRecord::Profit(p)) => assert_eq!(p.profit_score.value(), 65),
        other => panic!("expected profit record, got {:?}", other),
    }
}

#[tokio::test]
async fn test_untagged_chunks_are_inferred() {
    let events = vec![
        WorkerEvent::untagged_chunk("Seasonality report: ```json\n{\"trend_score\": 70}\n```"),
        WorkerEvent::untagged_chunk("{\"profit_score\": 55}"),
        WorkerEvent::untagged_chunk("Thinking about the request..."),
        WorkerEvent::done(),
    ];

    let outputs = collect_outputs(scripted(events), merged_attributor(), 100)
        .await
        .unwrap();

    assert!(outputs.text(WorkerId::Trend).is_some());
    assert!(outputs.text(WorkerId::Profit).is_some());
    assert_eq!(outputs.unattributed, vec!["Thinking about the request...".to_string()]);

    let resolved = resolve_analyses(&outputs);
    assert_eq!(
        resolved.missing(),
        vec![WorkerId::Market, WorkerId::Competition]
    );
}

#[tokio::test]
async fn test_event_cap_keeps_partial_results() {
    let mut events = vec![WorkerEvent::chunk(WorkerId::Trend, TREND_OUTPUT)];
    for i in 0..20 {
        events.push(WorkerEvent::ToolInvocation {
            worker: Some(WorkerId::Market),
            task_id: None,
            tool: "web_search".to_string(),
            args: json!({"query": format!("market size {}", i)}),
        });
    }
    events.push(WorkerEvent::chunk(WorkerId::Market, "{\"market_score\": 90}"));

    let outputs = collect_outputs(scripted(events), merged_attributor(), 10)
        .await
        .unwrap();

    assert!(outputs.truncated);
    assert_eq!(outputs.events_seen, 10);
    assert!(outputs.text(WorkerId::Trend).is_some());
    assert!(outputs.text(WorkerId::Market).is_none());
}

#[tokio::test]
async fn test_event_cap_on_quiet_stream_proceeds() {
    let events = analyst_events()[..5].to_vec();
    // No terminal event and the stream never closes
    let stream: EventStream = Box::pin(
        stream::iter(events.into_iter().map(Ok::<_, WorkerError>))
            .chain(stream::pending::<Result<WorkerEvent, WorkerError>>()),
    );

    let outputs = tokio::time::timeout(
        Duration::from_millis(500),
        collect_outputs(stream, merged_attributor(), 5),
    )
    .await
    .expect("consumption should stop at the event cap")
    .unwrap();

    assert!(outputs.truncated);
    assert_eq!(outputs.events_seen, 5);
    assert!(resolve_analyses(&outputs).missing().is_empty());
}

#[tokio::test]
async fn test_last_chunk_wins() {
    let events = vec![
        WorkerEvent::chunk(WorkerId::Evaluator, "{\"opportunity_score\": 40}"),
        WorkerEvent::chunk(WorkerId::Evaluator, "   "),
        WorkerEvent::chunk(WorkerId::Evaluator, "{\"opportunity_score\": 80}"),
        WorkerEvent::done(),
        WorkerEvent::chunk(WorkerId::Evaluator, "{\"opportunity_score\": 10}"),
    ];

    let outputs = collect_outputs(scripted(events), Attributor::single(WorkerId::Evaluator), 100)
        .await
        .unwrap();

    // Blank chunks are skipped and nothing after the terminal event is read
    let value = extract_object(outputs.text(WorkerId::Evaluator).unwrap()).unwrap();
    assert_eq!(value["opportunity_score"], 80);
    assert_eq!(outputs.events_seen, 4);
}

#[tokio::test]
async fn test_stream_error_is_returned() {
    let items = vec![
        Ok(WorkerEvent::chunk(WorkerId::Trend, TREND_OUTPUT)),
        Err(WorkerError::Failed("network connection reset".to_string())),
    ];
    let stream: EventStream = Box::pin(stream::iter(items));

    let err = collect_outputs(stream, merged_attributor(), 100)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        WorkerError::Failed("network connection reset".to_string())
    );
}

#[test]
fn test_extract_object_from_prose() {
    let text = "Here is my evaluation: {\"opportunity_score\": 72, \"recommendation\": \"go\"} Let me know.";
    let value = extract_object(text).unwrap();
    assert_eq!(value["opportunity_score"], 72);

    assert!(extract_object("The market looks promising overall.").is_none());
    assert!(extract_object("[1, 2, 3]").is_none());
}
