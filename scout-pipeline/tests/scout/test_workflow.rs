//! Orchestrator runs against the scripted worker

use scout_pipeline::pipeline::{
    AnalysisPipeline, AnalysisState, FanOutMode, Phase, PipelineConfig, ProgressCallback,
    Recommendation, TrendDirection,
};
use scout_pipeline::session::{InMemorySessionStore, SessionStore};
use scout_pipeline::ErrorCategory;
use scout_sdk::{Stage, WorkerError, WorkerEvent, WorkerId};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::common::{
    analyst_events, desk_lamp, pipeline, ScriptedWorker, COMPETITION_OUTPUT, MARKET_OUTPUT,
    PROFIT_OUTPUT, REPORT_OUTPUT,
};

fn recording_callback() -> (ProgressCallback, Arc<Mutex<Vec<Phase>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: ProgressCallback = Arc::new(move |phase: Phase, _message: &str| {
        sink.lock().unwrap().push(phase);
    });
    (callback, seen)
}

#[tokio::test]
async fn test_full_run_reaches_completed() {
    let worker = Arc::new(ScriptedWorker::happy());
    let (callback, seen) = recording_callback();

    let result = pipeline(worker.clone(), FanOutMode::Merged)
        .run(desk_lamp(), Some(&callback))
        .await
        .unwrap();

    assert!(result.success);
    let state = &result.state;
    assert_eq!(state.phase(), Phase::Completed);
    assert!(state.is_complete());

    let trend = state.trend_analysis().unwrap();
    assert_eq!(trend.trend_score.value(), 85);
    assert_eq!(trend.trend_direction, TrendDirection::Rising);
    assert_eq!(state.profit_analysis().unwrap().profit_score.value(), 65);

    let evaluation = state.evaluation_result().unwrap();
    assert_eq!(evaluation.opportunity_score.value(), 78);
    assert_eq!(evaluation.recommendation, Recommendation::Go);

    assert_eq!(result.report_text(), Some(REPORT_OUTPUT));
    assert_eq!(state.history().len(), 1);
    assert_eq!(
        result.phase_times.keys().cloned().collect::<Vec<_>>(),
        vec!["evaluation", "parallel_analysis", "report_generation"]
    );

    assert_eq!(worker.dispatch_count(), 3);
    assert_eq!(worker.dispatches_for(Stage::FanOut)[0].tasks.len(), 4);

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            Phase::Initialized,
            Phase::AnalyzingTrends,
            Phase::AnalyzingMarket,
            Phase::AnalyzingCompetition,
            Phase::AnalyzingProfit,
            Phase::Evaluating,
            Phase::GeneratingReport,
            Phase::Completed,
        ]
    );
}

#[tokio::test]
async fn test_per_worker_mode_fills_the_same_slots() {
    let merged = pipeline(Arc::new(ScriptedWorker::happy()), FanOutMode::Merged)
        .run(desk_lamp(), None)
        .await
        .unwrap();

    let worker = Arc::new(ScriptedWorker::happy());
    let per_worker = pipeline(worker.clone(), FanOutMode::PerWorker)
        .run(desk_lamp(), None)
        .await
        .unwrap();

    for slot in WorkerId::ANALYSTS {
        assert_eq!(
            per_worker.state.record(slot),
            merged.state.record(slot),
            "{} slot differs",
            slot
        );
    }

    let fan_out = worker.dispatches_for(Stage::FanOut);
    assert_eq!(fan_out.len(), 4);
    assert!(fan_out.iter().all(|d| d.sole_worker().is_some()));
}

#[tokio::test]
async fn test_prose_output_becomes_placeholder() {
    let events = vec![
        WorkerEvent::chunk(WorkerId::Trend, "Searches look flat; nothing structured to report."),
        WorkerEvent::chunk(WorkerId::Market, MARKET_OUTPUT),
        WorkerEvent::chunk(WorkerId::Competition, COMPETITION_OUTPUT),
        WorkerEvent::chunk(WorkerId::Profit, PROFIT_OUTPUT),
        WorkerEvent::done(),
    ];
    let worker = Arc::new(ScriptedWorker::happy().with_events(Stage::FanOut, events));

    let result = pipeline(worker.clone(), FanOutMode::Merged)
        .run(desk_lamp(), None)
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.state.trend_analysis().is_none());
    assert!(result.state.market_analysis().is_some());

    let evaluation = &worker.dispatches_for(Stage::Evaluation)[0];
    assert!(evaluation.instruction.contains("No trend analysis available"));
    assert!(!evaluation.instruction.contains("No market analysis available"));

    let report = &worker.dispatches_for(Stage::Report)[0];
    assert!(report.instruction.contains("No trend analysis available"));
}

#[tokio::test]
async fn test_fan_out_failure_is_categorized() {
    let worker = Arc::new(ScriptedWorker::happy().failing(
        Stage::FanOut,
        WorkerError::Failed("network unreachable".to_string()),
    ));
    let store = Arc::new(InMemorySessionStore::new());
    let pipeline = pipeline(worker.clone(), FanOutMode::Merged).with_session_store(store.clone());

    let (callback, seen) = recording_callback();
    let err = pipeline.run(desk_lamp(), Some(&callback)).await.unwrap_err();

    assert_eq!(err.category, ErrorCategory::ExternalDependency);
    assert_eq!(err.phase, Some(Phase::AnalyzingTrends));
    assert!(err
        .user_message()
        .starts_with(ErrorCategory::ExternalDependency.user_message()));
    assert!(!err.user_message().contains("unreachable"));
    assert!(err.technical_detail.contains("network unreachable"));

    // Nothing after the fan-out was dispatched
    assert_eq!(worker.dispatch_count(), 1);
    assert_eq!(seen.lock().unwrap().last(), Some(&Phase::Failed));

    // The failed state was saved with its message
    let ids = store.session_ids();
    assert_eq!(ids.len(), 1);
    let saved = store.restore(&ids[0]).unwrap().unwrap();
    assert_eq!(saved.phase(), Phase::Failed);
    assert_eq!(saved.error_message(), Some(err.user_message()));
}

#[tokio::test]
async fn test_stream_error_mid_fan_out_fails_the_run() {
    let worker = Arc::new(ScriptedWorker::happy().breaking(
        Stage::FanOut,
        analyst_events()[..2].to_vec(),
        WorkerError::ResourceExhausted("rate limit".to_string()),
    ));

    let err = pipeline(worker, FanOutMode::PerWorker)
        .run(desk_lamp(), None)
        .await
        .unwrap_err();

    assert_eq!(err.category, ErrorCategory::Resource);
    assert_eq!(err.phase, Some(Phase::AnalyzingTrends));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_reports_phase_at_expiry() {
    let worker = Arc::new(ScriptedWorker::happy().hanging(Stage::Evaluation));
    let pipeline = AnalysisPipeline::new(
        worker,
        PipelineConfig {
            run_timeout: Duration::from_secs(30),
            ..Default::default()
        },
    );

    let mut state = AnalysisState::new(desk_lamp());
    let err = pipeline
        .execute("s-timeout", &mut state, None)
        .await
        .unwrap_err();

    assert_eq!(err.category, ErrorCategory::Timeout);
    assert_eq!(err.phase, Some(Phase::Evaluating));

    // Results gathered before the timeout stay; the run is not a success
    assert_eq!(state.phase(), Phase::Failed);
    assert!(state.trend_analysis().is_some());
    assert!(state.evaluation_result().is_none());
}

#[tokio::test]
async fn test_evaluator_failure_uses_fallback() {
    let worker = Arc::new(ScriptedWorker::happy().failing(
        Stage::Evaluation,
        WorkerError::Unavailable("evaluator offline".to_string()),
    ));

    let result = pipeline(worker, FanOutMode::Merged)
        .run(desk_lamp(), None)
        .await
        .unwrap();

    assert!(result.success);
    let evaluation = result.state.evaluation_result().unwrap();
    assert_eq!(evaluation.opportunity_score.value(), 50);
    assert_eq!(evaluation.recommendation, Recommendation::Cautious);
    assert_eq!(evaluation.key_risks, vec!["Incomplete analysis".to_string()]);
}

#[tokio::test]
async fn test_unparseable_evaluation_uses_fallback() {
    let worker = Arc::new(ScriptedWorker::happy().with_events(
        Stage::Evaluation,
        vec![
            WorkerEvent::chunk(WorkerId::Evaluator, "Looks like a decent opportunity overall."),
            WorkerEvent::done(),
        ],
    ));

    let result = pipeline(worker, FanOutMode::Merged)
        .run(desk_lamp(), None)
        .await
        .unwrap();

    let evaluation = result.state.evaluation_result().unwrap();
    assert_eq!(evaluation.opportunity_score.value(), 50);
    assert_eq!(
        evaluation.key_risks,
        vec!["Unable to parse evaluation results".to_string()]
    );
}

#[tokio::test]
async fn test_report_failure_uses_fallback_report() {
    let worker = Arc::new(ScriptedWorker::happy().failing(
        Stage::Report,
        WorkerError::Timeout("report worker".to_string()),
    ));

    let result = pipeline(worker, FanOutMode::Merged)
        .run(desk_lamp(), None)
        .await
        .unwrap();

    assert!(result.success);
    let report = result.report_text().unwrap();
    assert!(report.starts_with("# Product Opportunity Analysis Report"));
    assert!(report.contains("## Category: desk lamp"));
    assert!(report.contains("## Evaluation Score: 78/100"));
    assert!(report.contains("## Recommendation\nGO"));
}

#[tokio::test]
async fn test_portable_blender_trend_score() {
    let mut input = scout_pipeline::RequestInput::new("portable blender");
    input.target_market = "US".to_string();
    input.budget_range = "medium".to_string();
    input.business_model = "amazon_fba".to_string();
    let request = scout_pipeline::AnalysisRequest::new(input).unwrap();

    let result = pipeline(Arc::new(ScriptedWorker::happy()), FanOutMode::Merged)
        .run(request, None)
        .await
        .unwrap();

    assert_eq!(result.state.phase(), Phase::Completed);
    assert_eq!(
        result.state.trend_analysis().unwrap().trend_score.value(),
        85
    );
    assert_eq!(
        result.state.request().unwrap().fingerprint(),
        "portable blender:US:amazon_fba:medium"
    );
}

#[tokio::test]
async fn test_state_without_request_is_marked_failed() {
    let worker = Arc::new(ScriptedWorker::happy());
    let store = Arc::new(InMemorySessionStore::new());
    let pipeline = pipeline(worker.clone(), FanOutMode::Merged).with_session_store(store.clone());
    let (callback, seen) = recording_callback();

    let mut state = AnalysisState::default();
    let err = pipeline
        .execute("s-empty", &mut state, Some(&callback))
        .await
        .unwrap_err();

    assert_eq!(err.category, ErrorCategory::Validation);
    assert_eq!(err.phase, Some(Phase::Initialized));
    assert_eq!(state.phase(), Phase::Failed);
    assert_eq!(state.error_message(), Some(err.user_message()));
    assert_eq!(*seen.lock().unwrap(), vec![Phase::Failed]);
    assert_eq!(worker.dispatch_count(), 0);
    assert_eq!(
        store.load("s-empty").unwrap()["current_phase"],
        "failed"
    );
}
