//! Contract between the scout pipeline engine and the worker collaborator that
//! performs the actual analysis work, plus the structured log events the engine
//! publishes while a run is in flight.
//!
//! The engine never talks to a language model directly. It hands a [`Dispatch`]
//! to a [`WorkerCollaborator`] and consumes the returned [`EventStream`] of
//! [`WorkerEvent`]s. Every event may carry the [`WorkerId`] it belongs to; the
//! engine resolves untagged events on its own.

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::broadcast;

// Re-export async trait for convenience
pub use async_trait::async_trait;

/// Prefix for structured events written to stderr
pub const EVENT_PREFIX: &str = "__SCOUT_EVENT__:";

// ============================================================================
// Workers
// ============================================================================

/// The six workers the pipeline knows how to dispatch to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WorkerId {
    #[serde(rename = "trend_agent")]
    Trend,
    #[serde(rename = "market_agent")]
    Market,
    #[serde(rename = "competition_agent")]
    Competition,
    #[serde(rename = "profit_agent")]
    Profit,
    #[serde(rename = "evaluator_agent")]
    Evaluator,
    #[serde(rename = "report_agent")]
    Report,
}

impl WorkerId {
    /// Workers that run concurrently in the fan-out stage, in slot order
    pub const ANALYSTS: [WorkerId; 4] = [
        WorkerId::Trend,
        WorkerId::Market,
        WorkerId::Competition,
        WorkerId::Profit,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WorkerId::Trend => "trend_agent",
            WorkerId::Market => "market_agent",
            WorkerId::Competition => "competition_agent",
            WorkerId::Profit => "profit_agent",
            WorkerId::Evaluator => "evaluator_agent",
            WorkerId::Report => "report_agent",
        }
    }

    /// Short human label ("trend", "market", ...)
    pub fn label(&self) -> &'static str {
        match self {
            WorkerId::Trend => "trend",
            WorkerId::Market => "market",
            WorkerId::Competition => "competition",
            WorkerId::Profit => "profit",
            WorkerId::Evaluator => "evaluation",
            WorkerId::Report => "report",
        }
    }

    pub fn is_analyst(&self) -> bool {
        Self::ANALYSTS.contains(self)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WorkerId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trend_agent" | "trend" => Ok(WorkerId::Trend),
            "market_agent" | "market" => Ok(WorkerId::Market),
            "competition_agent" | "competition" => Ok(WorkerId::Competition),
            "profit_agent" | "profit" => Ok(WorkerId::Profit),
            "evaluator_agent" | "evaluator" => Ok(WorkerId::Evaluator),
            "report_agent" | "report" => Ok(WorkerId::Report),
            other => Err(format!("Unknown worker: {}", other)),
        }
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Pipeline stage a dispatch belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    FanOut,
    Evaluation,
    Report,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::FanOut => "fan_out",
            Stage::Evaluation => "evaluation",
            Stage::Report => "report",
        }
    }
}

/// One unit of work for one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub worker: WorkerId,
    pub instruction: String,
    /// Tools the worker is authorized to call
    #[serde(default)]
    pub tools: Vec<String>,
}

impl TaskSpec {
    pub fn new(worker: WorkerId, instruction: impl Into<String>) -> Self {
        Self {
            worker,
            instruction: instruction.into(),
            tools: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.tools = tools.iter().map(|t| t.to_string()).collect();
        self
    }
}

/// A request handed to the collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    pub stage: Stage,
    pub instruction: String,
    pub tasks: Vec<TaskSpec>,
}

impl Dispatch {
    pub fn new(stage: Stage, instruction: impl Into<String>, tasks: Vec<TaskSpec>) -> Self {
        Self {
            stage,
            instruction: instruction.into(),
            tasks,
        }
    }

    /// Dispatch with exactly one task whose instruction doubles as the dispatch instruction
    pub fn single(stage: Stage, task: TaskSpec) -> Self {
        Self {
            stage,
            instruction: task.instruction.clone(),
            tasks: vec![task],
        }
    }

    /// The only worker of a single-task dispatch
    pub fn sole_worker(&self) -> Option<WorkerId> {
        match self.tasks.as_slice() {
            [only] => Some(only.worker),
            _ => None,
        }
    }

    pub fn workers(&self) -> Vec<WorkerId> {
        self.tasks.iter().map(|t| t.worker).collect()
    }
}

// ============================================================================
// Events
// ============================================================================

/// Event kinds observed on a worker stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ToolInvocation,
    ToolResult,
    ContentChunk,
    Terminal,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ToolInvocation => "tool_invocation",
            EventKind::ToolResult => "tool_result",
            EventKind::ContentChunk => "content_chunk",
            EventKind::Terminal => "terminal",
        }
    }
}

/// One event produced by the collaborator.
///
/// `worker` is the explicit attribution tag. Collaborators that multiplex
/// several workers onto one stream should always set it; a `Terminal` without
/// a worker ends the whole dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    ToolInvocation {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worker: Option<WorkerId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        tool: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    ToolResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worker: Option<WorkerId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        tool: String,
        #[serde(default)]
        output: String,
    },
    ContentChunk {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worker: Option<WorkerId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        text: String,
    },
    Terminal {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worker: Option<WorkerId>,
    },
}

impl WorkerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WorkerEvent::ToolInvocation { .. } => EventKind::ToolInvocation,
            WorkerEvent::ToolResult { .. } => EventKind::ToolResult,
            WorkerEvent::ContentChunk { .. } => EventKind::ContentChunk,
            WorkerEvent::Terminal { .. } => EventKind::Terminal,
        }
    }

    pub fn worker(&self) -> Option<WorkerId> {
        match self {
            WorkerEvent::ToolInvocation { worker, .. }
            | WorkerEvent::ToolResult { worker, .. }
            | WorkerEvent::ContentChunk { worker, .. }
            | WorkerEvent::Terminal { worker } => *worker,
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            WorkerEvent::ToolInvocation { task_id, .. }
            | WorkerEvent::ToolResult { task_id, .. }
            | WorkerEvent::ContentChunk { task_id, .. } => task_id.as_deref(),
            WorkerEvent::Terminal { .. } => None,
        }
    }

    /// Content chunk attributed to `worker`
    pub fn chunk(worker: WorkerId, text: impl Into<String>) -> Self {
        WorkerEvent::ContentChunk {
            worker: Some(worker),
            task_id: None,
            text: text.into(),
        }
    }

    /// Content chunk with no attribution tag
    pub fn untagged_chunk(text: impl Into<String>) -> Self {
        WorkerEvent::ContentChunk {
            worker: None,
            task_id: None,
            text: text.into(),
        }
    }

    /// End of the whole dispatch
    pub fn done() -> Self {
        WorkerEvent::Terminal { worker: None }
    }
}

// ============================================================================
// Collaborator
// ============================================================================

/// Failures reported by a worker collaborator
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkerError {
    #[error("worker collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("worker timed out: {0}")]
    Timeout(String),

    #[error("worker resources exhausted: {0}")]
    ResourceExhausted(String),

    #[error("malformed worker event: {0}")]
    Protocol(String),

    /// Uncategorized failure text
    #[error("{0}")]
    Failed(String),
}

/// Ordered, finite stream of worker events
pub type EventStream = Pin<Box<dyn Stream<Item = Result<WorkerEvent, WorkerError>> + Send>>;

/// External service that executes analysis tasks
#[async_trait]
pub trait WorkerCollaborator: Send + Sync {
    /// Start a dispatch and return its event stream
    async fn dispatch(&self, dispatch: Dispatch) -> Result<EventStream, WorkerError>;
}

// ============================================================================
// Structured pipeline logs
// ============================================================================

/// Structured logging events emitted while a run executes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineLog {
    /// Phase entered
    PhaseStarted {
        session_id: String,
        phase: String,
        description: String,
    },
    /// Stage finished
    PhaseCompleted {
        session_id: String,
        phase: String,
        duration_ms: u64,
    },
    /// Run failed while in `phase`
    PhaseFailed {
        session_id: String,
        phase: String,
        category: String,
        error: String,
    },
    WorkerStarted {
        session_id: String,
        worker: WorkerId,
        description: String,
    },
    /// Streaming text from a worker
    WorkerMessage {
        session_id: String,
        worker: WorkerId,
        message: String,
    },
    WorkerCompleted {
        session_id: String,
        worker: WorkerId,
        result: Option<String>,
    },
    WorkerFailed {
        session_id: String,
        worker: WorkerId,
        error: String,
    },
    /// Flat state projection persisted
    StateSaved {
        session_id: String,
        phase: String,
        keys: usize,
    },
}

impl PipelineLog {
    /// Emit this log event to stderr for a supervising process
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            use std::io::Write;
            eprintln!("{}{}", EVENT_PREFIX, json);
            let _ = std::io::stderr().flush();
        }
    }

    /// Parse one `__SCOUT_EVENT__:` line
    pub fn parse_line(line: &str) -> Option<PipelineLog> {
        line.strip_prefix(EVENT_PREFIX)
            .and_then(|json| serde_json::from_str(json).ok())
    }

    pub fn session_id(&self) -> &str {
        match self {
            PipelineLog::PhaseStarted { session_id, .. }
            | PipelineLog::PhaseCompleted { session_id, .. }
            | PipelineLog::PhaseFailed { session_id, .. }
            | PipelineLog::WorkerStarted { session_id, .. }
            | PipelineLog::WorkerMessage { session_id, .. }
            | PipelineLog::WorkerCompleted { session_id, .. }
            | PipelineLog::WorkerFailed { session_id, .. }
            | PipelineLog::StateSaved { session_id, .. } => session_id,
        }
    }
}

/// Destination for [`PipelineLog`] events.
///
/// A sink is handed to the pipeline at construction; there is no process-wide
/// logger. Events go to an optional broadcast channel and, when enabled, to
/// stderr in the `__SCOUT_EVENT__:` line format.
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    tx: Option<broadcast::Sender<PipelineLog>>,
    echo_stderr: bool,
}

impl LogSink {
    /// Sink that drops everything
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn broadcast(tx: broadcast::Sender<PipelineLog>) -> Self {
        Self {
            tx: Some(tx),
            echo_stderr: false,
        }
    }

    pub fn with_stderr(mut self, enabled: bool) -> Self {
        self.echo_stderr = enabled;
        self
    }

    pub fn send(&self, log: PipelineLog) {
        if self.echo_stderr {
            log.emit();
        }
        if let Some(tx) = &self.tx {
            // No subscribers is fine
            let _ = tx.send(log);
        }
    }
}

/// Helper macros for pipeline logging
#[macro_export]
macro_rules! log_phase_start {
    ($sink:expr, $session:expr, $phase:expr, $desc:expr) => {
        $sink.send($crate::PipelineLog::PhaseStarted {
            session_id: $session.to_string(),
            phase: $phase.to_string(),
            description: $desc.to_string(),
        })
    };
}

#[macro_export]
macro_rules! log_phase_complete {
    ($sink:expr, $session:expr, $phase:expr, $elapsed:expr) => {
        $sink.send($crate::PipelineLog::PhaseCompleted {
            session_id: $session.to_string(),
            phase: $phase.to_string(),
            duration_ms: $elapsed.as_millis() as u64,
        })
    };
}

#[macro_export]
macro_rules! log_phase_failed {
    ($sink:expr, $session:expr, $phase:expr, $category:expr, $error:expr) => {
        $sink.send($crate::PipelineLog::PhaseFailed {
            session_id: $session.to_string(),
            phase: $phase.to_string(),
            category: $category.to_string(),
            error: $error.to_string(),
        })
    };
}

#[macro_export]
macro_rules! log_worker_start {
    ($sink:expr, $session:expr, $worker:expr, $desc:expr) => {
        $sink.send($crate::PipelineLog::WorkerStarted {
            session_id: $session.to_string(),
            worker: $worker,
            description: $desc.to_string(),
        })
    };
}

#[macro_export]
macro_rules! log_worker_message {
    ($sink:expr, $session:expr, $worker:expr, $msg:expr) => {
        $sink.send($crate::PipelineLog::WorkerMessage {
            session_id: $session.to_string(),
            worker: $worker,
            message: $msg.to_string(),
        })
    };
}

#[macro_export]
macro_rules! log_worker_complete {
    ($sink:expr, $session:expr, $worker:expr) => {
        $sink.send($crate::PipelineLog::WorkerCompleted {
            session_id: $session.to_string(),
            worker: $worker,
            result: None,
        })
    };
    ($sink:expr, $session:expr, $worker:expr, $result:expr) => {
        $sink.send($crate::PipelineLog::WorkerCompleted {
            session_id: $session.to_string(),
            worker: $worker,
            result: Some($result.to_string()),
        })
    };
}

#[macro_export]
macro_rules! log_worker_failed {
    ($sink:expr, $session:expr, $worker:expr, $error:expr) => {
        $sink.send($crate::PipelineLog::WorkerFailed {
            session_id: $session.to_string(),
            worker: $worker,
            error: $error.to_string(),
        })
    };
}

#[macro_export]
macro_rules! log_state_saved {
    ($sink:expr, $session:expr, $phase:expr, $keys:expr) => {
        $sink.send($crate::PipelineLog::StateSaved {
            session_id: $session.to_string(),
            phase: $phase.to_string(),
            keys: $keys,
        })
    };
}

// ============================================================================
// Console Logging Macros (for the CLI)
// ============================================================================
// Colored, human-readable output complementing the structured PipelineLog
// events.
// ============================================================================

/// Logs a phase transition with a header and description.
///
/// # Example
/// ```
/// use scout_sdk::log_phase_console;
/// log_phase_console!("analyzing_trends", "Analyzing market trends and search patterns");
/// ```
///
/// Outputs:
/// ```text
/// ═══ analyzing_trends ═══
/// Analyzing market trends and search patterns
/// ```
#[macro_export]
macro_rules! log_phase_console {
    ($phase:expr, $description:expr) => {
        println!("\x1b[1;36m═══ {} ═══\x1b[0m", $phase);
        println!("\x1b[36m{}\x1b[0m", $description);
    };
}

#[macro_export]
macro_rules! log_success {
    ($message:expr) => {
        println!("\x1b[32m✓ {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[32m✓ {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

#[macro_export]
macro_rules! log_info {
    ($message:expr) => {
        println!("\x1b[36mℹ {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[36mℹ {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

#[macro_export]
macro_rules! log_warning {
    ($message:expr) => {
        println!("\x1b[33m⚠ Warning: {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[33m⚠ Warning: {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

#[macro_export]
macro_rules! log_failure {
    ($message:expr) => {
        println!("\x1b[31m✗ {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[31m✗ {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

// ============================================================================
// End of Console Logging Macros
// ============================================================================
