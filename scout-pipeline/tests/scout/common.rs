//! Common test utilities: a scripted worker collaborator and sample outputs

#![allow(dead_code)]

use futures::stream;
use scout_pipeline::pipeline::{AnalysisPipeline, FanOutMode, PipelineConfig};
use scout_pipeline::AnalysisRequest;
use scout_sdk::{async_trait, Dispatch, EventStream, Stage, WorkerCollaborator, WorkerError, WorkerEvent, WorkerId};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

pub const TREND_OUTPUT: &str =
    "Trend findings:\n```json\n{\"trend_score\": 85, \"trend_direction\": \"rising\"}\n```";
pub const MARKET_OUTPUT: &str =
    r#"{"market_score": 72, "growth_rate": 0.12, "maturity_level": "growing"}"#;
pub const COMPETITION_OUTPUT: &str = r#"{"competition_score": 40, "entry_barriers": "low"}"#;
pub const PROFIT_OUTPUT: &str = r#"{"profit_score": "65", "margins": {"net": 0.22}}"#;
pub const EVALUATION_OUTPUT: &str = r#"{"opportunity_score": 78, "recommendation": "go", "key_risks": ["seasonal demand"]}"#;
pub const REPORT_OUTPUT: &str =
    "# Desk Lamp Opportunity\n\n## Executive Summary\nStrong, rising demand.\n\n## SWOT\n...";

pub fn analyst_events() -> Vec<WorkerEvent> {
    vec![
        WorkerEvent::ToolInvocation {
            worker: Some(WorkerId::Trend),
            task_id: Some("t1".to_string()),
            tool: "web_search".to_string(),
            args: json!({"query": "desk lamp search trends"}),
        },
        WorkerEvent::chunk(WorkerId::Trend, TREND_OUTPUT),
        WorkerEvent::chunk(WorkerId::Market, MARKET_OUTPUT),
        WorkerEvent::chunk(WorkerId::Competition, COMPETITION_OUTPUT),
        WorkerEvent::chunk(WorkerId::Profit, PROFIT_OUTPUT),
        WorkerEvent::done(),
    ]
}

pub fn desk_lamp() -> AnalysisRequest {
    AnalysisRequest::for_category("desk lamp").unwrap()
}

/// How the scripted worker answers one stage
#[derive(Clone)]
enum Script {
    Events(Vec<WorkerEvent>),
    DispatchError(WorkerError),
    /// Events, then a stream error
    BreaksAfter(Vec<WorkerEvent>, WorkerError),
    /// A stream that never yields
    Hang,
}

/// Worker collaborator that replays scripted events per stage and records
/// every dispatch it receives.
///
/// Single-task fan-out dispatches get the events tagged with their worker,
/// followed by a terminal event, so one script serves both fan-out modes.
pub struct ScriptedWorker {
    scripts: HashMap<Stage, Script>,
    gate: Option<Arc<Semaphore>>,
    dispatches: Mutex<Vec<Dispatch>>,
}

impl ScriptedWorker {
    /// Every stage answers with well-formed output
    pub fn happy() -> Self {
        let mut scripts = HashMap::new();
        scripts.insert(Stage::FanOut, Script::Events(analyst_events()));
        scripts.insert(
            Stage::Evaluation,
            Script::Events(vec![
                WorkerEvent::chunk(WorkerId::Evaluator, EVALUATION_OUTPUT),
                WorkerEvent::done(),
            ]),
        );
        scripts.insert(
            Stage::Report,
            Script::Events(vec![
                WorkerEvent::chunk(WorkerId::Report, REPORT_OUTPUT),
                WorkerEvent::done(),
            ]),
        );
        Self {
            scripts,
            gate: None,
            dispatches: Mutex::new(Vec::new()),
        }
    }

    pub fn with_events(mut self, stage: Stage, events: Vec<WorkerEvent>) -> Self {
        self.scripts.insert(stage, Script::Events(events));
        self
    }

    pub fn failing(mut self, stage: Stage, error: WorkerError) -> Self {
        self.scripts.insert(stage, Script::DispatchError(error));
        self
    }

    pub fn breaking(mut self, stage: Stage, events: Vec<WorkerEvent>, error: WorkerError) -> Self {
        self.scripts.insert(stage, Script::BreaksAfter(events, error));
        self
    }

    pub fn hanging(mut self, stage: Stage) -> Self {
        self.scripts.insert(stage, Script::Hang);
        self
    }

    /// Fan-out dispatches wait for a permit from `gate` before answering
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatches.lock().unwrap().len()
    }

    pub fn dispatches_for(&self, stage: Stage) -> Vec<Dispatch> {
        self.dispatches
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.stage == stage)
            .cloned()
            .collect()
    }
}

fn for_worker(events: &[WorkerEvent], worker: WorkerId) -> Vec<WorkerEvent> {
    let mut own: Vec<WorkerEvent> = events
        .iter()
        .filter(|e| e.worker() == Some(worker))
        .cloned()
        .collect();
    own.push(WorkerEvent::done());
    own
}

#[async_trait]
impl WorkerCollaborator for ScriptedWorker {
    async fn dispatch(&self, dispatch: Dispatch) -> Result<EventStream, WorkerError> {
        self.dispatches.lock().unwrap().push(dispatch.clone());

        if dispatch.stage == Stage::FanOut {
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.unwrap();
            }
        }

        let script = self
            .scripts
            .get(&dispatch.stage)
            .cloned()
            .unwrap_or(Script::Events(vec![WorkerEvent::done()]));

        let per_worker = match dispatch.sole_worker() {
            Some(worker) if dispatch.stage == Stage::FanOut => Some(worker),
            _ => None,
        };

        let items: Vec<Result<WorkerEvent, WorkerError>> = match script {
            Script::Events(events) => {
                let events = match per_worker {
                    Some(worker) => for_worker(&events, worker),
                    None => events,
                };
                events.into_iter().map(Ok).collect()
            }
            Script::DispatchError(error) => return Err(error),
            Script::BreaksAfter(events, error) => {
                let mut items: Vec<_> = events.into_iter().map(Ok).collect();
                items.push(Err(error));
                items
            }
            Script::Hang => return Ok(Box::pin(stream::pending::<Result<WorkerEvent, WorkerError>>())),
        };

        Ok(Box::pin(stream::iter(items)))
    }
}

pub fn pipeline(worker: Arc<ScriptedWorker>, fan_out: FanOutMode) -> AnalysisPipeline {
    AnalysisPipeline::new(
        worker,
        PipelineConfig {
            fan_out,
            ..Default::default()
        },
    )
}
