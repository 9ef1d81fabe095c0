//! Event stream consumption: classification, accumulation, and the per-worker
//! timeline kept for stage summaries.

use futures::StreamExt;
use scout_sdk::{EventKind, EventStream, WorkerError, WorkerEvent, WorkerId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use super::attribution::{Attribution, Attributor};
use super::json::preview;

/// Default cap on events consumed per stage
pub const DEFAULT_MAX_EVENTS: usize = 100;

/// Last content produced by a worker
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerOutput {
    pub text: String,
    pub task_id: Option<String>,
}

/// Everything accumulated from one stage's event stream
#[derive(Debug, Clone, Default)]
pub struct StageOutputs {
    /// Last non-empty content chunk per worker
    pub outputs: BTreeMap<WorkerId, WorkerOutput>,
    /// Content chunks nobody could be tied to, in arrival order
    pub unattributed: Vec<String>,
    /// Event counts per worker and kind
    pub timeline: BTreeMap<WorkerId, BTreeMap<EventKind, usize>>,
    /// Workers that sent their own terminal event
    pub finished: BTreeSet<WorkerId>,
    pub events_seen: usize,
    /// Consumption stopped at the event cap
    pub truncated: bool,
}

impl StageOutputs {
    pub fn text(&self, worker: WorkerId) -> Option<&str> {
        self.outputs.get(&worker).map(|o| o.text.as_str())
    }

    /// One line per worker: `trend_agent: content_chunk=3, tool_invocation=1`
    pub fn summary(&self) -> Vec<String> {
        self.timeline
            .iter()
            .map(|(worker, counts)| {
                let parts: Vec<String> = counts
                    .iter()
                    .map(|(kind, n)| format!("{}={}", kind.as_str(), n))
                    .collect();
                format!("{}: {}", worker, parts.join(", "))
            })
            .collect()
    }

    /// Fold another stage's outputs in; later content wins
    pub fn merge(&mut self, other: StageOutputs) {
        self.outputs.extend(other.outputs);
        self.unattributed.extend(other.unattributed);
        for (worker, counts) in other.timeline {
            let entry = self.timeline.entry(worker).or_default();
            for (kind, n) in counts {
                *entry.entry(kind).or_insert(0) += n;
            }
        }
        self.finished.extend(other.finished);
        self.events_seen += other.events_seen;
        self.truncated |= other.truncated;
    }
}

/// Whether the consumer should keep reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Incremental accumulator over one stream's events
#[derive(Debug)]
pub struct EventCollector {
    attributor: Attributor,
    max_events: usize,
    outputs: StageOutputs,
}

impl EventCollector {
    pub fn new(attributor: Attributor, max_events: usize) -> Self {
        Self {
            attributor,
            max_events,
            outputs: StageOutputs::default(),
        }
    }

    /// Record one event, in arrival order.
    ///
    /// Returns [`Flow::Stop`] on the dispatch-level terminal event and on the
    /// event that reaches the cap, so the caller never waits for one more.
    pub fn observe(&mut self, event: &WorkerEvent) -> (Attribution, Flow) {
        if self.outputs.events_seen >= self.max_events {
            self.outputs.truncated = true;
            return (Attribution::Unattributed, Flow::Stop);
        }
        self.outputs.events_seen += 1;

        let (attribution, flow) = self.record(event);
        if flow == Flow::Continue && self.outputs.events_seen >= self.max_events {
            self.outputs.truncated = true;
            return (attribution, Flow::Stop);
        }
        (attribution, flow)
    }

    fn record(&mut self, event: &WorkerEvent) -> (Attribution, Flow) {
        let attribution = self.attributor.attribute(event);
        let kind = event.kind();

        if let Some(worker) = attribution.worker() {
            *self
                .outputs
                .timeline
                .entry(worker)
                .or_default()
                .entry(kind)
                .or_insert(0) += 1;
        }

        debug!(
            kind = kind.as_str(),
            worker = attribution.worker().map(|w| w.name()),
            "worker event"
        );

        match event {
            WorkerEvent::ContentChunk { text, task_id, .. } => {
                if text.trim().is_empty() {
                    return (attribution, Flow::Continue);
                }
                match attribution.worker() {
                    Some(worker) => self.store_chunk(worker, text, task_id.clone()),
                    None => self.outputs.unattributed.push(text.clone()),
                }
            }
            WorkerEvent::Terminal { worker: None } => return (attribution, Flow::Stop),
            WorkerEvent::Terminal {
                worker: Some(worker),
            } => {
                self.outputs.finished.insert(*worker);
            }
            WorkerEvent::ToolInvocation { .. } | WorkerEvent::ToolResult { .. } => {}
        }

        (attribution, Flow::Continue)
    }

    fn store_chunk(&mut self, worker: WorkerId, text: &str, task_id: Option<String>) {
        if let Some(previous) = self.outputs.outputs.get(&worker) {
            if previous.task_id.is_some() && task_id.is_some() && previous.task_id != task_id {
                warn!(
                    worker = worker.name(),
                    previous_task = previous.task_id.as_deref(),
                    task = task_id.as_deref(),
                    "content from a different task overwrites earlier output"
                );
            }
        }
        self.outputs.outputs.insert(
            worker,
            WorkerOutput {
                text: text.to_string(),
                task_id,
            },
        );
    }

    pub fn finish(self) -> StageOutputs {
        if self.outputs.truncated {
            warn!(
                max_events = self.max_events,
                "event limit reached, proceeding with accumulated results"
            );
        }
        for (worker, output) in &self.outputs.outputs {
            debug!(
                worker = worker.name(),
                preview = %preview(&output.text, 100),
                "captured worker output"
            );
        }
        self.outputs
    }
}

/// Drain `stream` into a [`StageOutputs`], stopping at the dispatch-level
/// terminal event, the end of the stream, or `max_events`
pub async fn collect_outputs(
    mut stream: EventStream,
    attributor: Attributor,
    max_events: usize,
) -> Result<StageOutputs, WorkerError> {
    let mut collector = EventCollector::new(attributor, max_events);

    while let Some(item) = stream.next().await {
        let event = item?;
        if let (_, Flow::Stop) = collector.observe(&event) {
            break;
        }
    }

    Ok(collector.finish())
}
