//! Service front end
//!
//! [`AnalysisService`] is the entry point callers use. It bounds how many
//! analyses run at once, serves repeated requests from a TTL cache, records
//! every executed run in the optional history database, and turns pipeline
//! failures into `success = false` results carrying a fixed user message.

pub mod cache;
pub mod config;

pub use cache::{CacheStats, ResultCache};
pub use config::{ConfigError, ServiceConfig};

use anyhow::{Context, Result};
use async_stream::stream;
use chrono::{DateTime, Utc};
use futures::Stream;
use scout_sdk::{LogSink, PipelineLog, WorkerCollaborator};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ErrorCategory, ErrorContext};
use crate::history::HistoryDatabase;
use crate::pipeline::{AnalysisPipeline, AnalysisState, Phase, PipelineResult, ProgressCallback};
use crate::request::{AnalysisRequest, RequestInput};
use crate::session::SessionStore;

const LOG_CHANNEL_CAPACITY: usize = 256;

/// One progress notification from a running analysis
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub phase: Phase,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressUpdate {
    pub fn new(phase: Phase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Items yielded by [`AnalysisService::analyze_streaming`]
#[derive(Debug, Clone)]
pub enum AnalysisUpdate {
    Progress(ProgressUpdate),
    /// Always the last item
    Finished(Box<PipelineResult>),
}

struct ServiceInner {
    pipeline: AnalysisPipeline,
    config: ServiceConfig,
    slots: Arc<Semaphore>,
    active: AtomicUsize,
    cache: Option<ResultCache>,
    history: Option<Mutex<HistoryDatabase>>,
    logs_tx: broadcast::Sender<PipelineLog>,
}

/// Decrements the active-run count when a run ends, however it ends
struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Builder for [`AnalysisService`]
pub struct ServiceBuilder {
    collaborator: Arc<dyn WorkerCollaborator>,
    config: ServiceConfig,
    sessions: Option<Arc<dyn SessionStore>>,
    history: Option<HistoryDatabase>,
    emit_events: bool,
}

impl ServiceBuilder {
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    /// Use an already opened history database instead of `config.history_db`
    pub fn history(mut self, db: HistoryDatabase) -> Self {
        self.history = Some(db);
        self
    }

    /// Also write structured events to stderr for a supervising process
    pub fn emit_events(mut self, enabled: bool) -> Self {
        self.emit_events = enabled;
        self
    }

    pub fn build(self) -> Result<AnalysisService> {
        self.config
            .validate()
            .context("Invalid service configuration")?;

        let history = match (self.history, &self.config.history_db) {
            (Some(db), _) => Some(db),
            (None, Some(path)) => Some(
                HistoryDatabase::new(path)
                    .with_context(|| format!("Failed to open history at {}", path.display()))?,
            ),
            (None, None) => None,
        };

        let (logs_tx, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        let logs = LogSink::broadcast(logs_tx.clone()).with_stderr(self.emit_events);

        let mut pipeline = AnalysisPipeline::new(self.collaborator, self.config.pipeline_config())
            .with_logs(logs);
        if let Some(store) = self.sessions {
            pipeline = pipeline.with_session_store(store);
        }

        let cache = self
            .config
            .enable_caching
            .then(|| ResultCache::new(self.config.cache_ttl()));

        info!(
            max_concurrent = self.config.max_concurrent_analyses,
            caching = self.config.enable_caching,
            history = history.is_some(),
            "analysis service ready"
        );

        Ok(AnalysisService {
            inner: Arc::new(ServiceInner {
                pipeline,
                slots: Arc::new(Semaphore::new(self.config.max_concurrent_analyses)),
                active: AtomicUsize::new(0),
                cache,
                history: history.map(Mutex::new),
                logs_tx,
                config: self.config,
            }),
        })
    }
}

/// Concurrency-bounded, cache-backed analysis front end. Cheap to clone.
#[derive(Clone)]
pub struct AnalysisService {
    inner: Arc<ServiceInner>,
}

impl AnalysisService {
    pub fn builder(collaborator: Arc<dyn WorkerCollaborator>, config: ServiceConfig) -> ServiceBuilder {
        ServiceBuilder {
            collaborator,
            config,
            sessions: None,
            history: None,
            emit_events: false,
        }
    }

    pub fn new(collaborator: Arc<dyn WorkerCollaborator>, config: ServiceConfig) -> Result<Self> {
        Self::builder(collaborator, config).build()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    /// Build a request from raw input and analyze it. Invalid input comes back
    /// as a failed result with the validation message; nothing is dispatched.
    pub async fn analyze_input(
        &self,
        input: RequestInput,
        progress: Option<ProgressCallback>,
    ) -> PipelineResult {
        match AnalysisRequest::new(input) {
            Ok(request) => self.analyze(request, progress).await,
            Err(e) => {
                warn!(error = %e, "rejected analysis request");
                rejected(e.to_string())
            }
        }
    }

    /// Run one analysis, or serve it from the cache
    pub async fn analyze(
        &self,
        request: AnalysisRequest,
        progress: Option<ProgressCallback>,
    ) -> PipelineResult {
        let inner = &self.inner;

        if let Err(e) = request.validate() {
            warn!(error = %e, "rejected analysis request");
            return rejected(e.to_string());
        }

        let key = request.fingerprint();
        if let Some(cache) = &inner.cache {
            if let Some(mut hit) = cache.get(&key) {
                info!(key = %key, session_id = %hit.session_id, "serving cached analysis");
                hit.cached = true;
                return hit;
            }
        }

        if inner.slots.available_permits() == 0 {
            debug!(key = %key, "waiting for a free analysis slot");
        }
        let _permit = match inner.slots.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                let context = ErrorContext::new(ErrorCategory::Resource, e.to_string());
                return PipelineResult::failed(
                    Uuid::new_v4().to_string(),
                    AnalysisState::new(request),
                    &context,
                    Duration::ZERO,
                );
            }
        };
        let _active = ActiveGuard::enter(&inner.active);

        let session_id = Uuid::new_v4().to_string();
        let mut state = AnalysisState::new(request);
        let started = Instant::now();

        let result = match inner
            .pipeline
            .execute(&session_id, &mut state, progress.as_ref())
            .await
        {
            Ok(phase_times) => {
                PipelineResult::completed(session_id, state, started.elapsed(), phase_times)
            }
            Err(context) => PipelineResult::failed(session_id, state, &context, started.elapsed()),
        };

        if result.success {
            if let Some(cache) = &inner.cache {
                cache.put(key, result.clone());
            }
        }
        self.record_history(&result);

        result
    }

    /// Like [`analyze`](Self::analyze), but as a stream of progress updates
    /// ending with the result
    pub fn analyze_streaming(
        &self,
        request: AnalysisRequest,
    ) -> impl Stream<Item = AnalysisUpdate> + Send + 'static {
        let service = self.clone();
        stream! {
            let (tx, mut rx) = mpsc::unbounded_channel::<ProgressUpdate>();
            let callback: ProgressCallback = Arc::new(move |phase: Phase, message: &str| {
                let _ = tx.send(ProgressUpdate::new(phase, message));
            });

            let fallback_state = AnalysisState::new(request.clone());
            let run = tokio::spawn(async move { service.analyze(request, Some(callback)).await });

            // Closes once the run drops its callback
            while let Some(update) = rx.recv().await {
                yield AnalysisUpdate::Progress(update);
            }

            let result = match run.await {
                Ok(result) => result,
                Err(e) => {
                    let context = ErrorContext::new(ErrorCategory::AgentExecution, e.to_string());
                    PipelineResult::failed(
                        Uuid::new_v4().to_string(),
                        fallback_state,
                        &context,
                        Duration::ZERO,
                    )
                }
            };
            yield AnalysisUpdate::Finished(Box::new(result));
        }
    }

    fn record_history(&self, result: &PipelineResult) {
        let Some(history) = &self.inner.history else {
            return;
        };
        let db = history.lock().unwrap_or_else(PoisonError::into_inner);
        match db.record(result) {
            Ok(Some(id)) => debug!(id, session_id = %result.session_id, "recorded analysis"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to record analysis history"),
        }
        if let Err(e) = db.trim(self.inner.config.history_max_entries) {
            warn!(error = %e, "failed to trim analysis history");
        }
    }

    /// Runs currently holding a slot
    pub fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn available_slots(&self) -> usize {
        self.inner.slots.available_permits()
    }

    /// Drop all cached results; returns how many were removed
    pub fn clear_cache(&self) -> usize {
        self.inner.cache.as_ref().map(ResultCache::clear).unwrap_or(0)
    }

    /// `None` when caching is disabled
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.inner.cache.as_ref().map(ResultCache::stats)
    }

    /// Structured events from every run on this service
    pub fn subscribe_logs(&self) -> broadcast::Receiver<PipelineLog> {
        self.inner.logs_tx.subscribe()
    }

    /// Run `f` against the history database, if one is configured
    pub fn with_history<T>(&self, f: impl FnOnce(&HistoryDatabase) -> Result<T>) -> Option<Result<T>> {
        let history = self.inner.history.as_ref()?;
        let db = history.lock().unwrap_or_else(PoisonError::into_inner);
        Some(f(&*db))
    }
}

/// Failed result for a request that never ran
fn rejected(message: String) -> PipelineResult {
    PipelineResult {
        success: false,
        session_id: String::new(),
        state: AnalysisState::default(),
        error: Some(message),
        error_category: Some(ErrorCategory::Validation),
        execution_time: Duration::ZERO,
        phase_times: Default::default(),
        cached: false,
    }
}
