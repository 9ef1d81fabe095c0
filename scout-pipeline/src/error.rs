//! Categorized error model.
//!
//! Every failure that leaves the pipeline is an [`ErrorContext`] tagged with one
//! [`ErrorCategory`] from a closed set. Callers only ever see the fixed user
//! message for the category; the technical detail stays in the logs.

use chrono::{DateTime, Utc};
use scout_sdk::{WorkerError, WorkerId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

use crate::pipeline::state::{Phase, StateError};

/// Result of a whole pipeline run, or of any step that reports to the caller
pub type PipelineOutcome<T> = Result<T, ErrorContext>;

/// Closed failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    AgentExecution,
    Parsing,
    Validation,
    Configuration,
    ExternalDependency,
    Timeout,
    Resource,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 7] = [
        ErrorCategory::AgentExecution,
        ErrorCategory::Parsing,
        ErrorCategory::Validation,
        ErrorCategory::Configuration,
        ErrorCategory::ExternalDependency,
        ErrorCategory::Timeout,
        ErrorCategory::Resource,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::AgentExecution => "agent_execution",
            ErrorCategory::Parsing => "parsing",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::ExternalDependency => "external_dependency",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Resource => "resource",
        }
    }

    /// Fixed, non-technical message shown to users
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCategory::AgentExecution => {
                "The analysis worker ran into a problem and could not finish the analysis"
            }
            ErrorCategory::Parsing => "Analysis data was received but could not be parsed",
            ErrorCategory::Validation => "The input does not meet the requirements",
            ErrorCategory::Configuration => "The system is misconfigured",
            ErrorCategory::ExternalDependency => {
                "An external service (such as web search) is temporarily unavailable"
            }
            ErrorCategory::Timeout => "The analysis took longer than expected",
            ErrorCategory::Resource => "System resources are temporarily unavailable",
        }
    }

    pub fn suggestion(&self) -> &'static str {
        match self {
            ErrorCategory::AgentExecution => {
                "Please try again; contact support if the problem persists"
            }
            ErrorCategory::Parsing => "This is usually temporary, please retry shortly",
            ErrorCategory::Validation => "Please check the input and try again",
            ErrorCategory::Configuration => "Please check API keys and system configuration",
            ErrorCategory::ExternalDependency => "Please wait a moment and retry",
            ErrorCategory::Timeout => "Try analyzing a more specific product category",
            ErrorCategory::Resource => "Please try again later",
        }
    }

    /// User message followed by the suggestion
    pub fn user_message_with_suggestion(&self) -> String {
        format!("{}. {}", self.user_message(), self.suggestion())
    }

    /// User message prefixed with a context such as "During trend analysis"
    pub fn detailed_message(&self, context: &str, include_suggestion: bool) -> String {
        let msg = if include_suggestion {
            self.user_message_with_suggestion()
        } else {
            self.user_message().to_string()
        };

        if context.is_empty() {
            msg
        } else {
            format!("{}: {}", context, msg)
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lexical fallback for failures that arrive as bare text
pub fn categorize_message(text: &str) -> ErrorCategory {
    let lower = text.to_lowercase();
    if lower.contains("network") || lower.contains("api") {
        ErrorCategory::ExternalDependency
    } else if lower.contains("resource") || lower.contains("memory") {
        ErrorCategory::Resource
    } else {
        ErrorCategory::AgentExecution
    }
}

/// Category of a collaborator failure. Only `Failed` goes through the heuristic.
pub fn categorize_worker_error(err: &WorkerError) -> ErrorCategory {
    match err {
        WorkerError::Unavailable(_) => ErrorCategory::ExternalDependency,
        WorkerError::Timeout(_) => ErrorCategory::Timeout,
        WorkerError::ResourceExhausted(_) => ErrorCategory::Resource,
        WorkerError::Protocol(_) => ErrorCategory::Parsing,
        WorkerError::Failed(text) => categorize_message(text),
    }
}

/// A categorized failure with where and when it happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub category: ErrorCategory,
    /// User-facing message
    pub message: String,
    /// Log-only detail
    pub technical_detail: String,
    pub phase: Option<Phase>,
    pub worker: Option<WorkerId>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorContext {
    /// Context carrying the category's fixed user message
    pub fn new(category: ErrorCategory, technical_detail: impl Into<String>) -> Self {
        Self {
            category,
            message: category.user_message_with_suggestion(),
            technical_detail: technical_detail.into(),
            phase: None,
            worker: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_worker(mut self, worker: WorkerId) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn user_message(&self) -> &str {
        &self.message
    }

    pub fn to_dict(&self) -> Value {
        json!({
            "category": self.category.as_str(),
            "message": self.message,
            "technical_detail": self.technical_detail,
            "phase": self.phase.map(|p| p.as_str()),
            "agent_name": self.worker.map(|w| w.name()),
            "timestamp": self.timestamp.to_rfc3339(),
        })
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.technical_detail)
    }
}

impl std::error::Error for ErrorContext {}

/// Failures raised inside a pipeline stage. Each variant knows its category.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("dispatch to worker collaborator failed: {source}")]
    Dispatch {
        worker: Option<WorkerId>,
        #[source]
        source: WorkerError,
    },

    #[error("worker stream failed: {source}")]
    Stream {
        worker: Option<WorkerId>,
        #[source]
        source: WorkerError,
    },

    #[error("state transition rejected: {0}")]
    State(#[from] StateError),

    #[error("fan-out task failed: {0}")]
    Join(String),

    #[error("analysis exceeded {0}s timeout")]
    Timeout(u64),
}

impl StageError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            StageError::Dispatch { source, .. } | StageError::Stream { source, .. } => {
                categorize_worker_error(source)
            }
            StageError::State(_) => ErrorCategory::Validation,
            StageError::Join(_) => ErrorCategory::AgentExecution,
            StageError::Timeout(_) => ErrorCategory::Timeout,
        }
    }

    pub fn worker(&self) -> Option<WorkerId> {
        match self {
            StageError::Dispatch { worker, .. } | StageError::Stream { worker, .. } => *worker,
            _ => None,
        }
    }

    /// Convert to an [`ErrorContext`] located at `phase`
    pub fn into_context(self, phase: Phase) -> ErrorContext {
        let mut context = ErrorContext::new(self.category(), self.to_string()).with_phase(phase);
        context.worker = self.worker();
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_message() {
        assert_eq!(
            categorize_message("Network unreachable"),
            ErrorCategory::ExternalDependency
        );
        assert_eq!(
            categorize_message("search API quota exceeded"),
            ErrorCategory::ExternalDependency
        );
        assert_eq!(categorize_message("out of memory"), ErrorCategory::Resource);
        assert_eq!(
            categorize_message("resource limit hit"),
            ErrorCategory::Resource
        );
        assert_eq!(
            categorize_message("model refused"),
            ErrorCategory::AgentExecution
        );
    }

    #[test]
    fn test_typed_worker_errors_skip_heuristic() {
        // "network" would otherwise be external_dependency
        let err = WorkerError::Timeout("network call hung".to_string());
        assert_eq!(categorize_worker_error(&err), ErrorCategory::Timeout);

        let err = WorkerError::Protocol("bad json".to_string());
        assert_eq!(categorize_worker_error(&err), ErrorCategory::Parsing);
    }

    #[test]
    fn test_every_category_has_fixed_message() {
        for category in ErrorCategory::ALL {
            let ctx = ErrorContext::new(category, "stack trace here");
            assert!(ctx.user_message().starts_with(category.user_message()));
            assert!(!ctx.user_message().contains("stack trace"));
        }
    }

    #[test]
    fn test_detailed_message() {
        let msg = ErrorCategory::Parsing.detailed_message("During trend analysis", false);
        assert_eq!(
            msg,
            "During trend analysis: Analysis data was received but could not be parsed"
        );
        assert_eq!(
            ErrorCategory::Parsing.detailed_message("", false),
            ErrorCategory::Parsing.user_message()
        );
    }

    #[test]
    fn test_error_context_to_dict() {
        let ctx = ErrorContext::new(ErrorCategory::Timeout, "Analysis exceeded 300s timeout")
            .with_phase(Phase::Evaluating)
            .with_worker(WorkerId::Evaluator);
        let dict = ctx.to_dict();

        assert_eq!(dict["category"], "timeout");
        assert_eq!(dict["phase"], "evaluating");
        assert_eq!(dict["agent_name"], "evaluator_agent");
        assert_eq!(dict["technical_detail"], "Analysis exceeded 300s timeout");
    }

    #[test]
    fn test_stage_error_categories() {
        let err = StageError::Dispatch {
            worker: Some(WorkerId::Market),
            source: WorkerError::Failed("network down".to_string()),
        };
        assert_eq!(err.category(), ErrorCategory::ExternalDependency);
        let ctx = err.into_context(Phase::AnalyzingTrends);
        assert_eq!(ctx.worker, Some(WorkerId::Market));

        let ctx = StageError::Timeout(300).into_context(Phase::AnalyzingTrends);
        assert_eq!(ctx.category, ErrorCategory::Timeout);
        assert_eq!(ctx.phase, Some(Phase::AnalyzingTrends));
        assert_eq!(ctx.technical_detail, "analysis exceeded 300s timeout");
    }

    #[test]
    fn test_result_combinators() {
        let ok: PipelineOutcome<u32> = Ok(2);
        assert_eq!(ok.clone().map(|v| v * 2), Ok(4));
        assert_eq!(ok.and_then(|v| Ok::<_, ErrorContext>(v + 1)), Ok(3));

        let err: PipelineOutcome<u32> = Err(ErrorContext::new(ErrorCategory::Parsing, "x"));
        assert_eq!(err.clone().unwrap_or(7), 7);
        let mapped = err.map_err(|e| e.category);
        assert_eq!(mapped, Err(ErrorCategory::Parsing));
    }
}
