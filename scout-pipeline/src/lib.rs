// Categorized error model
pub mod error;

// Request validation
pub mod request;

// Worker event extraction
pub mod extraction;

// State model and orchestrator
pub mod pipeline;

// Session projections
pub mod session;

// Concurrency-bounded, cached front end
pub mod service;

// Persistent run history
pub mod history;

// Process-backed worker collaborator
pub mod worker;

pub use error::{ErrorCategory, ErrorContext, PipelineOutcome, StageError};
pub use pipeline::{AnalysisPipeline, AnalysisState, Phase, PipelineConfig, PipelineResult};
pub use request::{AnalysisRequest, RequestInput, ValidationError};
pub use service::{AnalysisService, AnalysisUpdate, ProgressUpdate, ServiceConfig};
