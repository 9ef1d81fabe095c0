//! Analysis pipeline orchestrator
//!
//! Drives one run through its phases:
//! - Phase 1: fan-out of the four analyst tasks (trend, market, competition, profit)
//! - Phase 2: evaluation of the combined analyses
//! - Phase 3: report generation
//!
//! Every stage talks to the worker collaborator through a [`StageContext`],
//! which carries the session id, the collaborator handle, the event cap and
//! the structured log sink. Nothing here reads global state.

use futures::StreamExt;
use scout_sdk::{
    log_phase_complete, log_phase_failed, log_phase_start, log_state_saved, log_worker_message,
    Dispatch, LogSink, WorkerCollaborator, WorkerEvent,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::phase1_fanout::run_fan_out;
use super::phase2_evaluate::run_evaluation;
use super::phase3_report::run_report;
use super::state::{AnalysisState, Phase};
use super::types::AnalysisRecord;
use crate::error::{ErrorCategory, ErrorContext, PipelineOutcome, StageError};
use crate::extraction::{preview, Attribution, Attributor, EventCollector, Flow, StageOutputs};
use crate::request::AnalysisRequest;
use crate::session::SessionStore;

/// Seconds spent per stage, keyed by stage name
pub type PhaseTimes = BTreeMap<String, f64>;

/// Invoked with the new phase and a readable message on every transition
pub type ProgressCallback = Arc<dyn Fn(Phase, &str) + Send + Sync>;

/// How the four analyst tasks are handed to the collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOutMode {
    /// One dispatch carrying all four tasks, consumed as one merged stream
    #[default]
    Merged,
    /// One dispatch per analyst, fanned in through a bounded channel
    PerWorker,
}

/// Configuration for a pipeline run
///
/// # Example
///
/// ```
/// use scout_pipeline::pipeline::{FanOutMode, PipelineConfig};
/// use std::time::Duration;
///
/// let config = PipelineConfig {
///     run_timeout: Duration::from_secs(120),
///     fan_out: FanOutMode::PerWorker,
///     ..Default::default()
/// };
/// assert_eq!(config.max_events, 100);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Events consumed per stream before proceeding with partial results
    pub max_events: usize,
    /// Wall-clock limit for a whole run
    pub run_timeout: Duration,
    pub fan_out: FanOutMode,
    /// Buffer size of the per-worker fan-in channel
    pub channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_events: crate::extraction::DEFAULT_MAX_EVENTS,
            run_timeout: Duration::from_secs(300),
            fan_out: FanOutMode::Merged,
            channel_capacity: 32,
        }
    }
}

/// Per-run handles shared by every stage
#[derive(Clone)]
pub struct StageContext {
    pub session_id: String,
    pub collaborator: Arc<dyn WorkerCollaborator>,
    pub max_events: usize,
    pub logs: LogSink,
}

impl StageContext {
    /// Dispatch and drain the stream into per-worker outputs.
    /// Dispatch and stream failures are returned as stage errors.
    pub async fn dispatch_and_collect(&self, dispatch: Dispatch) -> Result<StageOutputs, StageError> {
        let worker = dispatch.sole_worker();
        let attributor = Attributor::for_dispatch(&dispatch);

        let mut stream = self
            .collaborator
            .dispatch(dispatch)
            .await
            .map_err(|source| StageError::Dispatch { worker, source })?;

        let mut collector = EventCollector::new(attributor, self.max_events);
        while let Some(item) = stream.next().await {
            let event = item.map_err(|source| StageError::Stream { worker, source })?;
            let (attribution, flow) = collector.observe(&event);
            self.relay(attribution, &event);
            if flow == Flow::Stop {
                break;
            }
        }

        Ok(collector.finish())
    }

    /// Forward attributed activity to the structured log sink
    pub fn relay(&self, attribution: Attribution, event: &WorkerEvent) {
        let Some(worker) = attribution.worker() else {
            return;
        };
        match event {
            WorkerEvent::ToolInvocation { tool, .. } => {
                log_worker_message!(
                    self.logs,
                    self.session_id,
                    worker,
                    format!("Using tool: {}", tool)
                );
            }
            WorkerEvent::ToolResult { tool, .. } => {
                log_worker_message!(
                    self.logs,
                    self.session_id,
                    worker,
                    format!("Tool result: {}", tool)
                );
            }
            WorkerEvent::ContentChunk { text, .. } if !text.trim().is_empty() => {
                log_worker_message!(self.logs, self.session_id, worker, preview(text, 200));
            }
            _ => {}
        }
    }
}

/// Outcome of one run as handed to service callers
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub success: bool,
    pub session_id: String,
    pub state: AnalysisState,
    /// User-facing failure message
    pub error: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub execution_time: Duration,
    pub phase_times: PhaseTimes,
    /// Served from the result cache
    pub cached: bool,
}

impl PipelineResult {
    pub fn completed(
        session_id: impl Into<String>,
        state: AnalysisState,
        execution_time: Duration,
        phase_times: PhaseTimes,
    ) -> Self {
        Self {
            success: true,
            session_id: session_id.into(),
            state,
            error: None,
            error_category: None,
            execution_time,
            phase_times,
            cached: false,
        }
    }

    pub fn failed(
        session_id: impl Into<String>,
        state: AnalysisState,
        error: &ErrorContext,
        execution_time: Duration,
    ) -> Self {
        Self {
            success: false,
            session_id: session_id.into(),
            state,
            error: Some(error.user_message().to_string()),
            error_category: Some(error.category),
            execution_time,
            phase_times: PhaseTimes::new(),
            cached: false,
        }
    }

    pub fn report_text(&self) -> Option<&str> {
        self.state.report_text()
    }

    /// Nested map for exporters and UIs
    pub fn to_dict(&self) -> Value {
        json!({
            "success": self.success,
            "session_id": self.session_id,
            "state": self.state.to_dict(),
            "report": self.report_text(),
            "error": self.error,
            "error_category": self.error_category.map(|c| c.as_str()),
            "execution_time": self.execution_time.as_secs_f64(),
            "phase_times": self.phase_times,
            "cached": self.cached,
        })
    }
}

/// Runs analyses against one worker collaborator
#[derive(Clone)]
pub struct AnalysisPipeline {
    collaborator: Arc<dyn WorkerCollaborator>,
    config: PipelineConfig,
    logs: LogSink,
    sessions: Option<Arc<dyn SessionStore>>,
}

impl AnalysisPipeline {
    pub fn new(collaborator: Arc<dyn WorkerCollaborator>, config: PipelineConfig) -> Self {
        Self {
            collaborator,
            config,
            logs: LogSink::disabled(),
            sessions: None,
        }
    }

    pub fn with_logs(mut self, logs: LogSink) -> Self {
        self.logs = logs;
        self
    }

    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn context(&self, session_id: &str) -> StageContext {
        StageContext {
            session_id: session_id.to_string(),
            collaborator: self.collaborator.clone(),
            max_events: self.config.max_events,
            logs: self.logs.clone(),
        }
    }

    /// Run a fresh analysis for `request` under a new session id
    pub async fn run(
        &self,
        request: AnalysisRequest,
        progress: Option<&ProgressCallback>,
    ) -> PipelineOutcome<PipelineResult> {
        let session_id = Uuid::new_v4().to_string();
        let mut state = AnalysisState::new(request);
        let started = Instant::now();

        let phase_times = self.execute(&session_id, &mut state, progress).await?;
        Ok(PipelineResult::completed(
            session_id,
            state,
            started.elapsed(),
            phase_times,
        ))
    }

    /// Drive `state` to `completed` under the run timeout.
    ///
    /// On failure the state is left in `failed` with the user-facing message
    /// and the error carries the phase the run was in. Whatever was populated
    /// before the failure stays in the state.
    pub async fn execute(
        &self,
        session_id: &str,
        state: &mut AnalysisState,
        progress: Option<&ProgressCallback>,
    ) -> PipelineOutcome<PhaseTimes> {
        let ctx = self.context(session_id);
        let Some(request) = state.request().cloned() else {
            let context = ErrorContext::new(
                ErrorCategory::Validation,
                "analysis state carries no request",
            )
            .with_phase(state.phase());
            return Err(self.fail_run(&ctx, state, progress, context));
        };

        notify(progress, state.phase(), "Analysis started");
        info!(
            session_id,
            category = request.category(),
            market = request.target_market(),
            "starting analysis"
        );

        let span = info_span!("analysis", session_id, category = request.category());
        let stages = self
            .run_stages(&ctx, &request, state, progress)
            .instrument(span);

        let outcome = timeout(self.config.run_timeout, stages).await;
        let context = match outcome {
            Ok(Ok(phase_times)) => return Ok(phase_times),
            Ok(Err(err)) => err.into_context(state.phase()),
            Err(_) => {
                StageError::Timeout(self.config.run_timeout.as_secs()).into_context(state.phase())
            }
        };

        Err(self.fail_run(&ctx, state, progress, context))
    }

    /// Mark the run failed, tell the caller, and save the failed state
    fn fail_run(
        &self,
        ctx: &StageContext,
        state: &mut AnalysisState,
        progress: Option<&ProgressCallback>,
        context: ErrorContext,
    ) -> ErrorContext {
        let session_id = ctx.session_id.as_str();
        let phase = state.phase();
        error!(
            session_id,
            phase = %phase,
            category = %context.category,
            detail = %context.technical_detail,
            "analysis failed"
        );
        log_phase_failed!(
            ctx.logs,
            session_id,
            phase,
            context.category,
            context.technical_detail
        );

        if let Err(e) = state.fail(context.user_message()) {
            warn!(session_id, error = %e, "could not mark state as failed");
        }
        notify(progress, Phase::Failed, context.user_message());
        self.save_session(ctx, state);

        context
    }

    async fn run_stages(
        &self,
        ctx: &StageContext,
        request: &AnalysisRequest,
        state: &mut AnalysisState,
        progress: Option<&ProgressCallback>,
    ) -> Result<PhaseTimes, StageError> {
        let mut phase_times = PhaseTimes::new();

        // Phase 1: the four analyses run as one fan-out stage. The remaining
        // analyzing_* phases are reported once its results are assembled.
        let started = Instant::now();
        self.transition(ctx, state, Phase::AnalyzingTrends, progress)?;
        let analyses = run_fan_out(
            ctx,
            request,
            self.config.fan_out,
            self.config.channel_capacity,
        )
        .await?;
        for record in analyses.records.values() {
            state.store(record.clone());
        }
        for phase in [
            Phase::AnalyzingMarket,
            Phase::AnalyzingCompetition,
            Phase::AnalyzingProfit,
        ] {
            self.transition(ctx, state, phase, progress)?;
        }
        self.finish_stage(ctx, state, "parallel_analysis", started, &mut phase_times);

        // Phase 2
        let started = Instant::now();
        self.transition(ctx, state, Phase::Evaluating, progress)?;
        let evaluation = run_evaluation(ctx, request, &analyses).await;
        state.store(AnalysisRecord::Evaluation(evaluation.result));
        self.finish_stage(ctx, state, "evaluation", started, &mut phase_times);

        // Phase 3
        let started = Instant::now();
        self.transition(ctx, state, Phase::GeneratingReport, progress)?;
        let report = run_report(ctx, request, state).await;
        state.set_report_text(report.text);
        self.finish_stage(ctx, state, "report_generation", started, &mut phase_times);

        self.transition(ctx, state, Phase::Completed, progress)?;
        state.add_to_history(&ctx.session_id);
        self.save_session(ctx, state);

        info!(session_id = %ctx.session_id, "analysis completed");
        Ok(phase_times)
    }

    fn transition(
        &self,
        ctx: &StageContext,
        state: &mut AnalysisState,
        phase: Phase,
        progress: Option<&ProgressCallback>,
    ) -> Result<(), StageError> {
        state.enter(phase)?;
        log_phase_start!(ctx.logs, ctx.session_id, phase, phase.description());
        info!(session_id = %ctx.session_id, phase = %phase, "{}", phase.description());
        notify(progress, phase, phase.description());
        Ok(())
    }

    fn finish_stage(
        &self,
        ctx: &StageContext,
        state: &AnalysisState,
        stage: &str,
        started: Instant,
        phase_times: &mut PhaseTimes,
    ) {
        let elapsed = started.elapsed();
        phase_times.insert(stage.to_string(), elapsed.as_secs_f64());
        log_phase_complete!(ctx.logs, ctx.session_id, stage, elapsed);
        info!(
            session_id = %ctx.session_id,
            stage,
            elapsed_ms = elapsed.as_millis() as u64,
            "stage complete"
        );
        self.save_session(ctx, state);
    }

    fn save_session(&self, ctx: &StageContext, state: &AnalysisState) {
        let Some(store) = &self.sessions else {
            return;
        };
        let projection = state.to_session_map();
        let keys = projection.len();
        store.save(&ctx.session_id, projection);
        log_state_saved!(ctx.logs, ctx.session_id, state.phase(), keys);
    }
}

fn notify(progress: Option<&ProgressCallback>, phase: Phase, message: &str) {
    if let Some(callback) = progress {
        callback(phase, message);
    }
}
