//! Worker attribution for stream events.
//!
//! Events carrying a `worker` tag are attributed by direct lookup, and a
//! single-task dispatch owns every untagged event on its stream. The keyword
//! tables below only run for untagged events on a merged multi-task stream.

use regex::Regex;
use scout_sdk::{Dispatch, WorkerEvent, WorkerId};
use serde_json::Value;
use std::sync::OnceLock;

use super::json::extract_object;
use crate::pipeline::types::AnalysisRecord;

/// Keywords matched against tool queries and tool output
const QUERY_KEYWORDS: [(WorkerId, &[&str]); 4] = [
    (WorkerId::Trend, &["trend", "search", "volume"]),
    (WorkerId::Market, &["market", "size", "segment", "customer"]),
    (WorkerId::Competition, &["competitor", "competition", "price"]),
    (WorkerId::Profit, &["profit", "margin", "cost", "roi"]),
];

/// Phrases matched against content text
const CONTENT_KEYWORDS: [(WorkerId, &[&str]); 4] = [
    (
        WorkerId::Trend,
        &["trend analysis", "search trends", "seasonality"],
    ),
    (
        WorkerId::Market,
        &["market size", "customer segment"],
    ),
    (
        WorkerId::Competition,
        &["competitor", "competition", "market share"],
    ),
    (
        WorkerId::Profit,
        &["profit", "margin", "roi", "unit economics"],
    ),
];

/// Market sizing acronyms, whole words only ("some" is not SOM)
fn market_acronyms() -> &'static Regex {
    static ACRONYMS: OnceLock<Regex> = OnceLock::new();
    ACRONYMS.get_or_init(|| Regex::new(r"\b(?:tam|sam|som)\b").expect("Invalid regex"))
}

/// How an event was tied to a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribution {
    /// The event named its worker
    Tagged(WorkerId),
    /// Untagged, but the dispatch had one task
    Sole(WorkerId),
    /// Untagged on a merged stream, resolved lexically
    Inferred(WorkerId),
    Unattributed,
}

impl Attribution {
    pub fn worker(&self) -> Option<WorkerId> {
        match self {
            Attribution::Tagged(w) | Attribution::Sole(w) | Attribution::Inferred(w) => Some(*w),
            Attribution::Unattributed => None,
        }
    }
}

/// Attributes events for one dispatch
#[derive(Debug, Clone)]
pub struct Attributor {
    sole: Option<WorkerId>,
    dispatched: Vec<WorkerId>,
}

impl Attributor {
    pub fn for_dispatch(dispatch: &Dispatch) -> Self {
        Self {
            sole: dispatch.sole_worker(),
            dispatched: dispatch.workers(),
        }
    }

    /// Attributor for a stream that belongs to exactly one worker
    pub fn single(worker: WorkerId) -> Self {
        Self {
            sole: Some(worker),
            dispatched: vec![worker],
        }
    }

    pub fn attribute(&self, event: &WorkerEvent) -> Attribution {
        if let Some(worker) = event.worker() {
            return Attribution::Tagged(worker);
        }
        if let Some(worker) = self.sole {
            return Attribution::Sole(worker);
        }

        let inferred = match event {
            WorkerEvent::ToolInvocation { args, .. } => infer_from_query(&query_text(args)),
            WorkerEvent::ToolResult { tool, output, .. } => {
                infer_from_query(tool).or_else(|| infer_from_query(output))
            }
            WorkerEvent::ContentChunk { text, .. } => infer_from_content(text),
            WorkerEvent::Terminal { .. } => None,
        };

        match inferred {
            Some(worker) if self.dispatched.contains(&worker) => Attribution::Inferred(worker),
            _ => Attribution::Unattributed,
        }
    }
}

/// The `query` argument of a tool call, or the whole argument object
fn query_text(args: &Value) -> String {
    match args.get("query").and_then(Value::as_str) {
        Some(query) => query.to_string(),
        None => args.to_string(),
    }
}

/// Keyword match over a tool query
pub fn infer_from_query(text: &str) -> Option<WorkerId> {
    let lower = text.to_lowercase();
    QUERY_KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(worker, _)| *worker)
}

/// Characteristic score key first, then keyword phrases
pub fn infer_from_content(text: &str) -> Option<WorkerId> {
    if let Some(worker) = extract_object(text).and_then(|v| AnalysisRecord::sniff(&v)) {
        return Some(worker);
    }

    let lower = text.to_lowercase();
    CONTENT_KEYWORDS
        .iter()
        .find(|(worker, phrases)| {
            phrases.iter().any(|p| lower.contains(p))
                || (*worker == WorkerId::Market && market_acronyms().is_match(&lower))
        })
        .map(|(worker, _)| *worker)
}
