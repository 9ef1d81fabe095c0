//! Phase 3: Report generation

use chrono::Utc;
use scout_sdk::{log_worker_complete, log_worker_failed, log_worker_start, Dispatch, Stage, TaskSpec, WorkerId};
use tracing::{info, warn};

use super::prompts::{placeholder, report_instruction};
use super::state::AnalysisState;
use super::types::{EvaluationResult, FallbackReason};
use super::workflow::StageContext;
use crate::request::AnalysisRequest;

/// Workers whose records feed the report, in section order
const REPORT_SECTIONS: [WorkerId; 5] = [
    WorkerId::Trend,
    WorkerId::Market,
    WorkerId::Competition,
    WorkerId::Profit,
    WorkerId::Evaluator,
];

#[derive(Debug, Clone, PartialEq)]
pub struct ReportOutcome {
    pub text: String,
    /// The templated report was used
    pub fallback: bool,
}

/// Pretty JSON of each record, or its placeholder
pub fn report_sections(state: &AnalysisState) -> Vec<(WorkerId, String)> {
    REPORT_SECTIONS
        .iter()
        .map(|worker| {
            let text = state
                .record(*worker)
                .map(|r| r.to_json_pretty())
                .unwrap_or_else(|| placeholder(*worker));
            (*worker, text)
        })
        .collect()
}

/// Ask the report worker for the final Markdown. Its text is kept verbatim;
/// a failed or empty answer is replaced by [`fallback_report`].
pub async fn run_report(
    ctx: &StageContext,
    request: &AnalysisRequest,
    state: &AnalysisState,
) -> ReportOutcome {
    let sections = report_sections(state);
    let task = TaskSpec::new(WorkerId::Report, report_instruction(request, &sections));
    let dispatch = Dispatch::single(Stage::Report, task);

    log_worker_start!(
        ctx.logs,
        ctx.session_id,
        WorkerId::Report,
        "Generating final report"
    );

    let text = match ctx.dispatch_and_collect(dispatch).await {
        Ok(outputs) => outputs.text(WorkerId::Report).map(str::to_string),
        Err(e) => {
            warn!(session_id = %ctx.session_id, error = %e, "report generation failed");
            log_worker_failed!(ctx.logs, ctx.session_id, WorkerId::Report, e);
            None
        }
    };

    match text {
        Some(text) => {
            info!(
                session_id = %ctx.session_id,
                chars = text.chars().count(),
                has_summary = text.contains("Executive Summary"),
                has_swot = text.contains("SWOT"),
                "report generated"
            );
            log_worker_complete!(ctx.logs, ctx.session_id, WorkerId::Report);
            ReportOutcome {
                text,
                fallback: false,
            }
        }
        None => {
            warn!(session_id = %ctx.session_id, "using templated fallback report");
            ReportOutcome {
                text: fallback_report(request, state),
                fallback: true,
            }
        }
    }
}

fn truncated(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Basic Markdown report assembled from whatever the state holds
pub fn fallback_report(request: &AnalysisRequest, state: &AnalysisState) -> String {
    let evaluation = state
        .evaluation_result()
        .cloned()
        .unwrap_or_else(|| EvaluationResult::fallback(FallbackReason::Missing));

    let mut report = String::new();
    report.push_str("# Product Opportunity Analysis Report\n\n");
    report.push_str(&format!("## Category: {}\n", request.category()));
    report.push_str(&format!("## Target Market: {}\n\n", request.target_market()));
    report.push_str("## Executive Summary\n");
    report.push_str(
        "This analysis was completed with available data. \
         A comprehensive evaluation requires full worker execution.\n\n",
    );

    report.push_str("## Analysis Results\n");
    for worker in WorkerId::ANALYSTS {
        let body = match state.record(worker) {
            Some(record) => format!("{}...", truncated(&record.to_value().to_string(), 200)),
            None => "Not available".to_string(),
        };
        report.push_str(&format!(
            "- **{} Analysis**: {}\n",
            capitalized(worker.label()),
            body
        ));
    }

    report.push_str(&format!(
        "\n## Evaluation Score: {}/100\n\n",
        evaluation.opportunity_score
    ));
    report.push_str(&format!(
        "## Recommendation\n{}\n\n",
        evaluation.recommendation.as_str().to_uppercase()
    ));
    report.push_str(&format!(
        "---\n*Report generated on {}*\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    ));
    report
}

fn capitalized(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
