//! State model tests: phase rules, record slots and session projections

use scout_pipeline::pipeline::{
    AnalysisRecord, AnalysisState, EvaluationResult, FallbackReason, Phase, StateError,
    TrendAnalysis,
};
use scout_pipeline::request::RequestInput;
use scout_pipeline::session::{InMemorySessionStore, SessionStore};
use scout_pipeline::AnalysisRequest;
use scout_sdk::WorkerId;
use serde_json::json;

use super::common::desk_lamp;

fn trend(score: i64) -> AnalysisRecord {
    let value = json!({"trend_score": score, "trend_direction": "rising"});
    AnalysisRecord::from_worker(WorkerId::Trend, value).unwrap()
}

#[test]
fn test_phase_walk_to_completed() {
    let mut state = AnalysisState::new(desk_lamp());
    for phase in [
        Phase::AnalyzingTrends,
        Phase::AnalyzingMarket,
        Phase::AnalyzingCompetition,
        Phase::AnalyzingProfit,
        Phase::Evaluating,
        Phase::GeneratingReport,
        Phase::Completed,
    ] {
        state.enter(phase).unwrap();
    }

    assert_eq!(state.phase(), Phase::Completed);
    assert!(state.enter(Phase::Evaluating).is_err());
    assert!(state.fail("late failure").is_err());
    assert!(state.error_message().is_none());
}

#[test]
fn test_set_phase_by_name() {
    let mut state = AnalysisState::new(desk_lamp());

    state.set_phase("evaluating").unwrap();
    assert_eq!(state.phase(), Phase::Evaluating);

    assert!(state.set_phase("warming_up").is_err());
    assert!(matches!(
        state.set_phase("failed"),
        Err(StateError::MissingErrorMessage)
    ));
    assert_eq!(state.phase(), Phase::Evaluating);
}

#[test]
fn test_failure_keeps_partial_results() {
    let mut state = AnalysisState::new(desk_lamp());
    state.enter(Phase::AnalyzingTrends).unwrap();
    state.store(trend(85));

    state.fail("The analysis took too long to complete").unwrap();

    assert_eq!(state.phase(), Phase::Failed);
    assert_eq!(state.trend_analysis().unwrap().trend_score.value(), 85);
    assert!(!state.is_complete());
}

#[test]
fn test_store_fills_the_worker_slot() {
    let mut state = AnalysisState::new(desk_lamp());
    state.store(trend(40));
    state.store(AnalysisRecord::Evaluation(EvaluationResult::fallback(
        FallbackReason::Missing,
    )));

    assert!(state.has_record(WorkerId::Trend));
    assert!(state.has_record(WorkerId::Evaluator));
    assert!(!state.has_record(WorkerId::Market));
    assert_eq!(
        state.record(WorkerId::Trend).map(|r| r.worker()),
        Some(WorkerId::Trend)
    );

    // A later record replaces the earlier one
    state.store(trend(60));
    assert_eq!(state.trend_analysis().unwrap().trend_score.value(), 60);
}

#[test]
fn test_history_needs_evaluation() {
    let mut state = AnalysisState::new(desk_lamp());
    assert!(!state.add_to_history("s1"));

    state.store(AnalysisRecord::Evaluation(EvaluationResult::fallback(
        FallbackReason::StageFailed,
    )));
    assert!(state.add_to_history("s1"));

    let entry = &state.history()[0];
    assert_eq!(entry.session_id, "s1");
    assert_eq!(entry.category, "desk lamp");
    assert_eq!(entry.opportunity_score, 50);
}

#[test]
fn test_session_projection_restores_state() {
    let mut input = RequestInput::new("  Yoga Mats ");
    input.target_market = "de".to_string();
    input.keywords = vec!["eco".to_string(), "".to_string()];
    let request = AnalysisRequest::new(input).unwrap();

    let mut state = AnalysisState::new(request);
    state.enter(Phase::AnalyzingTrends).unwrap();
    state.store(AnalysisRecord::Trend(TrendAnalysis::default()));
    state.set_report_text("# Report");

    let store = InMemorySessionStore::new();
    store.save("s1", state.to_session_map());

    let restored = store.restore("s1").unwrap().unwrap();
    assert_eq!(restored, state);

    let projection = store.load("s1").unwrap();
    assert_eq!(projection["current_phase"], "analyzing_trends");
    assert_eq!(projection["category"], "Yoga Mats");
    assert_eq!(projection["target_market"], "DE");
    assert_eq!(projection["keywords"], json!(["eco"]));

    assert!(store.restore("missing").is_none());
}
