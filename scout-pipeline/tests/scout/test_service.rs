//! Service front end: slots, cache, history and structured logs

use futures::StreamExt;
use scout_pipeline::history::HistoryDatabase;
use scout_pipeline::service::{AnalysisService, AnalysisUpdate, ServiceConfig};
use scout_pipeline::{AnalysisRequest, ErrorCategory, Phase};
use scout_sdk::{PipelineLog, Stage, WorkerError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use super::common::{desk_lamp, ScriptedWorker};

fn caching() -> ServiceConfig {
    ServiceConfig {
        enable_caching: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_slots_bound_concurrent_runs() {
    let gate = Arc::new(Semaphore::new(0));
    let worker = Arc::new(ScriptedWorker::happy().gated(gate.clone()));
    let service = AnalysisService::new(
        worker.clone(),
        ServiceConfig {
            max_concurrent_analyses: 2,
            ..Default::default()
        },
    )
    .unwrap();

    let mut runs = Vec::new();
    for category in ["desk lamp", "yoga mat", "phone stand"] {
        let service = service.clone();
        let request = AnalysisRequest::for_category(category).unwrap();
        runs.push(tokio::spawn(async move { service.analyze(request, None).await }));
    }

    for _ in 0..100 {
        if service.active_count() == 2 && worker.dispatch_count() == 2 {
            break;
        }
        tokio::task::yield_now().await;
    }

    // Third run waits for a slot and has not dispatched anything
    assert_eq!(service.active_count(), 2);
    assert_eq!(service.available_slots(), 0);
    assert_eq!(worker.dispatch_count(), 2);

    gate.add_permits(100);
    for run in runs {
        let result = run.await.unwrap();
        assert!(result.success);
    }

    assert_eq!(service.active_count(), 0);
    assert_eq!(service.available_slots(), 2);
    assert_eq!(worker.dispatch_count(), 9);
}

#[tokio::test(start_paused = true)]
async fn test_cache_serves_until_ttl() {
    let worker = Arc::new(ScriptedWorker::happy());
    let service = AnalysisService::new(worker.clone(), caching()).unwrap();

    let first = service.analyze(desk_lamp(), None).await;
    assert!(first.success);
    assert!(!first.cached);
    assert_eq!(worker.dispatch_count(), 3);

    tokio::time::advance(Duration::from_secs(1800)).await;
    let second = service.analyze(desk_lamp(), None).await;
    assert!(second.cached);
    assert_eq!(second.session_id, first.session_id);
    assert_eq!(worker.dispatch_count(), 3);

    tokio::time::advance(Duration::from_secs(1801)).await;
    let third = service.analyze(desk_lamp(), None).await;
    assert!(!third.cached);
    assert_ne!(third.session_id, first.session_id);
    assert_eq!(worker.dispatch_count(), 6);

    let stats = service.cache_stats().unwrap();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.ttl_seconds, 3600);
    assert_eq!(service.clear_cache(), 1);
}

#[tokio::test]
async fn test_identical_concurrent_requests_each_dispatch() {
    let gate = Arc::new(Semaphore::new(0));
    let worker = Arc::new(ScriptedWorker::happy().gated(gate.clone()));
    let service = AnalysisService::new(worker.clone(), caching()).unwrap();

    let mut runs = Vec::new();
    for _ in 0..2 {
        let service = service.clone();
        runs.push(tokio::spawn(async move { service.analyze(desk_lamp(), None).await }));
    }

    // Both miss the cache and hold their own slot while the first is in flight
    for _ in 0..100 {
        if worker.dispatch_count() == 2 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(worker.dispatch_count(), 2);
    assert_eq!(service.active_count(), 2);

    gate.add_permits(100);
    let mut sessions = Vec::new();
    for run in runs {
        let result = run.await.unwrap();
        assert!(result.success);
        assert!(!result.cached);
        sessions.push(result.session_id);
    }

    assert_ne!(sessions[0], sessions[1]);
    assert_eq!(worker.dispatch_count(), 6);
    assert_eq!(service.cache_stats().unwrap().entries, 1);

    // A later identical request is served from the cache
    assert!(service.analyze(desk_lamp(), None).await.cached);
    assert_eq!(worker.dispatch_count(), 6);
}

#[tokio::test]
async fn test_cache_key_covers_request_fields() {
    let worker = Arc::new(ScriptedWorker::happy());
    let service = AnalysisService::new(worker.clone(), caching()).unwrap();

    service.analyze(desk_lamp(), None).await;

    let mut input = scout_pipeline::RequestInput::new("desk lamp");
    input.budget_range = "high".to_string();
    let high_budget = AnalysisRequest::new(input).unwrap();
    let result = service.analyze(high_budget, None).await;

    assert!(!result.cached);
    assert_eq!(worker.dispatch_count(), 6);
}

#[tokio::test]
async fn test_failure_becomes_unsuccessful_result() {
    let worker = Arc::new(ScriptedWorker::happy().failing(
        Stage::FanOut,
        WorkerError::Failed("network unreachable".to_string()),
    ));
    let service = AnalysisService::new(worker, caching()).unwrap();

    let result = service.analyze(desk_lamp(), None).await;

    assert!(!result.success);
    assert_eq!(result.error_category, Some(ErrorCategory::ExternalDependency));
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .starts_with(ErrorCategory::ExternalDependency.user_message()));
    assert_eq!(result.state.phase(), Phase::Failed);
    assert_eq!(service.cache_stats().unwrap().entries, 0);

    let dict = result.to_dict();
    assert_eq!(dict["success"], false);
    assert_eq!(dict["error_category"], "external_dependency");
}

#[tokio::test(start_paused = true)]
async fn test_timeout_surfaces_as_timeout_category() {
    let worker = Arc::new(ScriptedWorker::happy().hanging(Stage::FanOut));
    let service = AnalysisService::new(
        worker,
        ServiceConfig {
            run_timeout_seconds: 60,
            ..Default::default()
        },
    )
    .unwrap();

    let result = service.analyze(desk_lamp(), None).await;

    assert!(!result.success);
    assert_eq!(result.error_category, Some(ErrorCategory::Timeout));
    assert_eq!(result.state.phase(), Phase::Failed);
    assert_eq!(service.available_slots(), 5);
}

#[tokio::test]
async fn test_history_records_each_run() {
    let worker = Arc::new(ScriptedWorker::happy());
    let service = AnalysisService::builder(worker, ServiceConfig::default())
        .history(HistoryDatabase::new_in_memory().unwrap())
        .build()
        .unwrap();

    service.analyze(desk_lamp(), None).await;
    service
        .analyze(AnalysisRequest::for_category("yoga mat").unwrap(), None)
        .await;

    let records = service.with_history(|db| db.recent(10)).unwrap().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].category, "yoga mat");
    assert_eq!(records[1].opportunity_score, Some(78));
    assert_eq!(records[1].recommendation.as_deref(), Some("go"));
}

#[tokio::test]
async fn test_structured_logs_are_broadcast() {
    let worker = Arc::new(ScriptedWorker::happy());
    let service = AnalysisService::new(worker, ServiceConfig::default()).unwrap();
    let mut logs = service.subscribe_logs();

    let result = service.analyze(desk_lamp(), None).await;

    let mut received = Vec::new();
    while let Ok(log) = logs.try_recv() {
        received.push(log);
    }

    assert!(received
        .iter()
        .all(|log| log.session_id() == result.session_id));
    assert!(received.iter().any(|log| matches!(
        log,
        PipelineLog::PhaseStarted { phase, .. } if phase == "evaluating"
    )));
    assert!(received
        .iter()
        .any(|log| matches!(log, PipelineLog::PhaseCompleted { phase, .. } if phase == "parallel_analysis")));
}

#[tokio::test]
async fn test_streaming_yields_progress_then_result() {
    let worker = Arc::new(ScriptedWorker::happy());
    let service = AnalysisService::new(worker, ServiceConfig::default()).unwrap();

    let updates: Vec<AnalysisUpdate> = service.analyze_streaming(desk_lamp()).collect().await;

    let phases: Vec<Phase> = updates
        .iter()
        .filter_map(|u| match u {
            AnalysisUpdate::Progress(p) => Some(p.phase),
            AnalysisUpdate::Finished(_) => None,
        })
        .collect();
    assert_eq!(phases.first(), Some(&Phase::Initialized));
    assert_eq!(phases.last(), Some(&Phase::Completed));

    match updates.last() {
        Some(AnalysisUpdate::Finished(result)) => assert!(result.success),
        other => panic!("expected final result, got {:?}", other),
    }
}
