//! Analysis pipeline: state model, typed records, and the three-stage orchestrator

pub mod phase1_fanout;
pub mod phase2_evaluate;
pub mod phase3_report;
pub mod prompts;
pub mod state;
pub mod types;
pub mod workflow;

pub use phase1_fanout::{resolve_analyses, ResolvedAnalyses};
pub use phase2_evaluate::EvaluationOutcome;
pub use phase3_report::{fallback_report, ReportOutcome};
pub use state::{AnalysisHistoryEntry, AnalysisState, Phase, StateError};
pub use types::{
    AnalysisRecord, CompetitionAnalysis, EvaluationResult, FallbackReason, MarketAnalysis,
    MaturityLevel, ProfitAnalysis, Recommendation, RecordError, Score, ScoreError, SwotAnalysis,
    TrendAnalysis, TrendDirection,
};
pub use workflow::{
    AnalysisPipeline, FanOutMode, PhaseTimes, PipelineConfig, PipelineResult, ProgressCallback,
    StageContext,
};
