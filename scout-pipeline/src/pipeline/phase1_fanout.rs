//! Phase 1: Fan-out of the four analyst tasks

use futures::StreamExt;
use scout_sdk::{
    log_worker_complete, log_worker_start, Dispatch, Stage, WorkerEvent, WorkerId,
};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::prompts::{analyst_task, fanout_instruction, placeholder};
use super::types::AnalysisRecord;
use super::workflow::{FanOutMode, StageContext};
use crate::error::StageError;
use crate::extraction::{extract_object, preview, Attributor, EventCollector, Flow, StageOutputs};
use crate::request::AnalysisRequest;

/// Typed records recovered from the fan-out, with the text they came from
#[derive(Debug, Clone, Default)]
pub struct ResolvedAnalyses {
    pub records: BTreeMap<WorkerId, AnalysisRecord>,
    /// Raw output of each worker whose record was extracted
    pub texts: BTreeMap<WorkerId, String>,
}

impl ResolvedAnalyses {
    /// Raw text per analyst in slot order, or the placeholder for a gap
    pub fn synthesis_inputs(&self) -> Vec<(WorkerId, String)> {
        WorkerId::ANALYSTS
            .iter()
            .map(|worker| {
                let text = self
                    .texts
                    .get(worker)
                    .cloned()
                    .unwrap_or_else(|| placeholder(*worker));
                (*worker, text)
            })
            .collect()
    }

    pub fn missing(&self) -> Vec<WorkerId> {
        WorkerId::ANALYSTS
            .iter()
            .filter(|w| !self.records.contains_key(w))
            .copied()
            .collect()
    }
}

/// Run the four analyses and resolve whatever structured output came back.
/// A worker with no usable output leaves a gap; only dispatch and stream
/// failures fail the stage.
pub async fn run_fan_out(
    ctx: &StageContext,
    request: &AnalysisRequest,
    mode: FanOutMode,
    channel_capacity: usize,
) -> Result<ResolvedAnalyses, StageError> {
    info!(
        session_id = %ctx.session_id,
        category = request.category(),
        mode = ?mode,
        "dispatching {} analyses",
        WorkerId::ANALYSTS.len()
    );

    for worker in WorkerId::ANALYSTS {
        log_worker_start!(
            ctx.logs,
            ctx.session_id,
            worker,
            format!("Running {} analysis", worker.label())
        );
    }

    let outputs = match mode {
        FanOutMode::Merged => fan_out_merged(ctx, request).await?,
        FanOutMode::PerWorker => fan_out_per_worker(ctx, request, channel_capacity).await?,
    };

    for line in outputs.summary() {
        info!(session_id = %ctx.session_id, "{}", line);
    }
    if !outputs.unattributed.is_empty() {
        debug!(
            count = outputs.unattributed.len(),
            "content chunks left unattributed"
        );
    }

    let resolved = resolve_analyses(&outputs);
    for worker in WorkerId::ANALYSTS {
        match resolved.records.get(&worker) {
            Some(record) => log_worker_complete!(
                ctx.logs,
                ctx.session_id,
                worker,
                preview(&record.to_value().to_string(), 200)
            ),
            None => log_worker_complete!(ctx.logs, ctx.session_id, worker),
        }
    }

    Ok(resolved)
}

async fn fan_out_merged(
    ctx: &StageContext,
    request: &AnalysisRequest,
) -> Result<StageOutputs, StageError> {
    let tasks = WorkerId::ANALYSTS
        .iter()
        .map(|worker| analyst_task(*worker, request))
        .collect();
    let dispatch = Dispatch::new(Stage::FanOut, fanout_instruction(request), tasks);
    ctx.dispatch_and_collect(dispatch).await
}

/// What a forwarder task hands to the consumer
enum Forwarded {
    Event(WorkerId, WorkerEvent),
    /// Stream ran out
    Ended(WorkerId),
    Failed(StageError),
}

async fn fan_out_per_worker(
    ctx: &StageContext,
    request: &AnalysisRequest,
    channel_capacity: usize,
) -> Result<StageOutputs, StageError> {
    let (tx, mut rx) = mpsc::channel(channel_capacity.max(1));
    let mut forwarders = JoinSet::new();

    for worker in WorkerId::ANALYSTS {
        let dispatch = Dispatch::single(Stage::FanOut, analyst_task(worker, request));
        let collaborator = ctx.collaborator.clone();
        let tx = tx.clone();

        forwarders.spawn(async move {
            let mut stream = match collaborator.dispatch(dispatch).await {
                Ok(stream) => stream,
                Err(source) => {
                    let err = StageError::Dispatch {
                        worker: Some(worker),
                        source,
                    };
                    let _ = tx.send(Forwarded::Failed(err)).await;
                    return;
                }
            };

            while let Some(item) = stream.next().await {
                let message = match item {
                    Ok(event) => Forwarded::Event(worker, event),
                    Err(source) => Forwarded::Failed(StageError::Stream {
                        worker: Some(worker),
                        source,
                    }),
                };
                let last = !matches!(message, Forwarded::Event(_, _));
                // Consumer gone means the stage already ended
                if tx.send(message).await.is_err() || last {
                    return;
                }
            }
            let _ = tx.send(Forwarded::Ended(worker)).await;
        });
    }
    drop(tx);

    let mut collectors: BTreeMap<WorkerId, EventCollector> = WorkerId::ANALYSTS
        .iter()
        .map(|w| (*w, EventCollector::new(Attributor::single(*w), ctx.max_events)))
        .collect();
    let mut stopped = BTreeSet::new();

    while let Some(message) = rx.recv().await {
        match message {
            Forwarded::Event(worker, event) => {
                if stopped.contains(&worker) {
                    continue;
                }
                let Some(collector) = collectors.get_mut(&worker) else {
                    continue;
                };
                let (attribution, flow) = collector.observe(&event);
                ctx.relay(attribution, &event);
                if flow == Flow::Stop {
                    stopped.insert(worker);
                }
            }
            Forwarded::Ended(worker) => {
                stopped.insert(worker);
            }
            Forwarded::Failed(err) => {
                forwarders.abort_all();
                return Err(err);
            }
        }
        if stopped.len() == WorkerId::ANALYSTS.len() {
            break;
        }
    }

    // Forwarders still streaming past their cap or terminal event are dropped
    forwarders.abort_all();
    while let Some(joined) = forwarders.join_next().await {
        match joined {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => return Err(StageError::Join(e.to_string())),
        }
    }

    let mut outputs = StageOutputs::default();
    for (_, collector) in collectors {
        outputs.merge(collector.finish());
    }
    Ok(outputs)
}

/// Turn each analyst's last output into its typed record.
///
/// The worker id decides the record type. Output without a parseable object,
/// or whose object does not fit the record, is a data gap.
pub fn resolve_analyses(outputs: &StageOutputs) -> ResolvedAnalyses {
    let mut resolved = ResolvedAnalyses::default();

    for worker in WorkerId::ANALYSTS {
        let Some(text) = outputs.text(worker) else {
            warn!(worker = worker.name(), "no output from worker");
            continue;
        };

        let Some(value) = extract_object(text) else {
            warn!(
                worker = worker.name(),
                preview = %preview(text, 100),
                "no structured data in worker output"
            );
            continue;
        };

        match AnalysisRecord::from_worker(worker, value) {
            Ok(record) => {
                resolved.records.insert(worker, record);
                resolved.texts.insert(worker, text.to_string());
            }
            Err(e) => {
                warn!(worker = worker.name(), error = %e, "worker output does not fit its record");
            }
        }
    }

    resolved
}
