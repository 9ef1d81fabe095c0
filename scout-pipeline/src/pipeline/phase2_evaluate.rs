//! Phase 2: Opportunity evaluation

use scout_sdk::{log_worker_complete, log_worker_failed, log_worker_start, Dispatch, Stage, TaskSpec, WorkerId};
use tracing::{info, warn};

use super::phase1_fanout::ResolvedAnalyses;
use super::prompts::evaluation_instruction;
use super::types::{AnalysisRecord, EvaluationResult, FallbackReason};
use super::workflow::StageContext;
use crate::extraction::{extract_object, preview};
use crate::request::AnalysisRequest;

/// Evaluation record plus why a fallback was used, if one was
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOutcome {
    pub result: EvaluationResult,
    pub fallback: Option<FallbackReason>,
}

impl EvaluationOutcome {
    fn extracted(result: EvaluationResult) -> Self {
        Self {
            result,
            fallback: None,
        }
    }

    fn degraded(reason: FallbackReason) -> Self {
        Self {
            result: EvaluationResult::fallback(reason),
            fallback: Some(reason),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

/// Ask the evaluator to synthesize the four analyses. Never fails the run:
/// any problem degrades to a fallback evaluation.
pub async fn run_evaluation(
    ctx: &StageContext,
    request: &AnalysisRequest,
    analyses: &ResolvedAnalyses,
) -> EvaluationOutcome {
    let inputs = analyses.synthesis_inputs();
    let task = TaskSpec::new(WorkerId::Evaluator, evaluation_instruction(request, &inputs));
    let dispatch = Dispatch::single(Stage::Evaluation, task);

    log_worker_start!(
        ctx.logs,
        ctx.session_id,
        WorkerId::Evaluator,
        "Evaluating overall opportunity"
    );

    let outputs = match ctx.dispatch_and_collect(dispatch).await {
        Ok(outputs) => outputs,
        Err(e) => {
            warn!(session_id = %ctx.session_id, error = %e, "evaluation stage failed, using fallback");
            log_worker_failed!(ctx.logs, ctx.session_id, WorkerId::Evaluator, e);
            return EvaluationOutcome::degraded(FallbackReason::StageFailed);
        }
    };

    let Some(text) = outputs.text(WorkerId::Evaluator) else {
        warn!(session_id = %ctx.session_id, "evaluator produced no output, using fallback");
        log_worker_failed!(ctx.logs, ctx.session_id, WorkerId::Evaluator, "no output");
        return EvaluationOutcome::degraded(FallbackReason::Missing);
    };

    let record = extract_object(text).map(|v| AnalysisRecord::from_worker(WorkerId::Evaluator, v));
    match record {
        Some(Ok(AnalysisRecord::Evaluation(result))) => {
            info!(
                session_id = %ctx.session_id,
                opportunity_score = result.opportunity_score.value(),
                recommendation = result.recommendation.as_str(),
                "evaluation extracted"
            );
            log_worker_complete!(
                ctx.logs,
                ctx.session_id,
                WorkerId::Evaluator,
                format!(
                    "Score {}/100, {}",
                    result.opportunity_score,
                    result.recommendation
                )
            );
            EvaluationOutcome::extracted(result)
        }
        _ => {
            warn!(
                session_id = %ctx.session_id,
                preview = %preview(text, 100),
                "evaluation output could not be parsed, using fallback"
            );
            log_worker_failed!(
                ctx.logs,
                ctx.session_id,
                WorkerId::Evaluator,
                "unparseable evaluation"
            );
            EvaluationOutcome::degraded(FallbackReason::Unparseable)
        }
    }
}
