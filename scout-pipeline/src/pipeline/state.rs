//! Per-run analysis state and its phase state machine.

use chrono::{DateTime, Utc};
use scout_sdk::WorkerId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::types::{
    AnalysisRecord, CompetitionAnalysis, EvaluationResult, MarketAnalysis, ProfitAnalysis,
    Recommendation, TrendAnalysis,
};
use crate::request::{AnalysisRequest, RequestInput};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    #[error("Invalid phase: {0}")]
    InvalidPhase(String),

    #[error("the failed phase requires an error message")]
    MissingErrorMessage,

    #[error("cannot move from terminal phase {from} to {to}")]
    LeavingTerminal { from: Phase, to: Phase },

    #[error("malformed session projection: {0}")]
    Projection(String),
}

/// Named points in a run's progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initialized,
    AnalyzingTrends,
    AnalyzingMarket,
    AnalyzingCompetition,
    AnalyzingProfit,
    Evaluating,
    GeneratingReport,
    Completed,
    Failed,
}

impl Phase {
    pub const ALL: [Phase; 9] = [
        Phase::Initialized,
        Phase::AnalyzingTrends,
        Phase::AnalyzingMarket,
        Phase::AnalyzingCompetition,
        Phase::AnalyzingProfit,
        Phase::Evaluating,
        Phase::GeneratingReport,
        Phase::Completed,
        Phase::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initialized => "initialized",
            Phase::AnalyzingTrends => "analyzing_trends",
            Phase::AnalyzingMarket => "analyzing_market",
            Phase::AnalyzingCompetition => "analyzing_competition",
            Phase::AnalyzingProfit => "analyzing_profit",
            Phase::Evaluating => "evaluating",
            Phase::GeneratingReport => "generating_report",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }

    /// Human-readable progress message
    pub fn description(&self) -> &'static str {
        match self {
            Phase::Initialized => "Pipeline initialized, ready to start",
            Phase::AnalyzingTrends => "Analyzing market trends and search patterns",
            Phase::AnalyzingMarket => "Analyzing market size and customer segments",
            Phase::AnalyzingCompetition => "Analyzing competitors and pricing",
            Phase::AnalyzingProfit => "Analyzing profitability and ROI",
            Phase::Evaluating => "Evaluating overall opportunity",
            Phase::GeneratingReport => "Generating final report",
            Phase::Completed => "Analysis complete",
            Phase::Failed => "Analysis failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    /// The `analyzing_*` phase reported for an analyst worker
    pub fn for_analyst(worker: WorkerId) -> Option<Phase> {
        match worker {
            WorkerId::Trend => Some(Phase::AnalyzingTrends),
            WorkerId::Market => Some(Phase::AnalyzingMarket),
            WorkerId::Competition => Some(Phase::AnalyzingCompetition),
            WorkerId::Profit => Some(Phase::AnalyzingProfit),
            WorkerId::Evaluator | WorkerId::Report => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| StateError::InvalidPhase(s.to_string()))
    }
}

/// One finished analysis, remembered in the state's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisHistoryEntry {
    pub session_id: String,
    pub category: String,
    pub target_market: String,
    pub opportunity_score: u8,
    pub recommendation: Recommendation,
    pub timestamp: DateTime<Utc>,
}

/// Everything known about one run.
///
/// Phase and result slots are only changed through the methods below, which
/// enforce the phase rules and bump `updated_at` on every mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisState {
    request: Option<AnalysisRequest>,
    trend: Option<TrendAnalysis>,
    market: Option<MarketAnalysis>,
    competition: Option<CompetitionAnalysis>,
    profit: Option<ProfitAnalysis>,
    evaluation: Option<EvaluationResult>,
    report_text: Option<String>,
    phase: Phase,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    history: Vec<AnalysisHistoryEntry>,
}

impl Default for AnalysisState {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            request: None,
            trend: None,
            market: None,
            competition: None,
            profit: None,
            evaluation: None,
            report_text: None,
            phase: Phase::Initialized,
            error_message: None,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
        }
    }
}

impl AnalysisState {
    pub fn new(request: AnalysisRequest) -> Self {
        Self {
            request: Some(request),
            ..Self::default()
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn request(&self) -> Option<&AnalysisRequest> {
        self.request.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn trend_analysis(&self) -> Option<&TrendAnalysis> {
        self.trend.as_ref()
    }

    pub fn market_analysis(&self) -> Option<&MarketAnalysis> {
        self.market.as_ref()
    }

    pub fn competition_analysis(&self) -> Option<&CompetitionAnalysis> {
        self.competition.as_ref()
    }

    pub fn profit_analysis(&self) -> Option<&ProfitAnalysis> {
        self.profit.as_ref()
    }

    pub fn evaluation_result(&self) -> Option<&EvaluationResult> {
        self.evaluation.as_ref()
    }

    pub fn report_text(&self) -> Option<&str> {
        self.report_text.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn history(&self) -> &[AnalysisHistoryEntry] {
        &self.history
    }

    /// Whether the slot for `worker` holds a record
    pub fn has_record(&self, worker: WorkerId) -> bool {
        match worker {
            WorkerId::Trend => self.trend.is_some(),
            WorkerId::Market => self.market.is_some(),
            WorkerId::Competition => self.competition.is_some(),
            WorkerId::Profit => self.profit.is_some(),
            WorkerId::Evaluator => self.evaluation.is_some(),
            WorkerId::Report => self.report_text.is_some(),
        }
    }

    /// The record in `worker`'s slot, re-wrapped
    pub fn record(&self, worker: WorkerId) -> Option<AnalysisRecord> {
        match worker {
            WorkerId::Trend => self.trend.clone().map(AnalysisRecord::Trend),
            WorkerId::Market => self.market.clone().map(AnalysisRecord::Market),
            WorkerId::Competition => self.competition.clone().map(AnalysisRecord::Competition),
            WorkerId::Profit => self.profit.clone().map(AnalysisRecord::Profit),
            WorkerId::Evaluator => self.evaluation.clone().map(AnalysisRecord::Evaluation),
            WorkerId::Report => None,
        }
    }

    /// All five record slots are populated
    pub fn is_complete(&self) -> bool {
        self.trend.is_some()
            && self.market.is_some()
            && self.competition.is_some()
            && self.profit.is_some()
            && self.evaluation.is_some()
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Set the phase from its name. Unknown names, `failed`, and moves out of
    /// a terminal phase are rejected and leave the state untouched.
    pub fn set_phase(&mut self, phase: &str) -> Result<(), StateError> {
        let phase = Phase::from_str(phase)?;
        self.enter(phase)
    }

    /// Move to `phase`. Use [`AnalysisState::fail`] to enter `failed`.
    pub fn enter(&mut self, phase: Phase) -> Result<(), StateError> {
        if phase == Phase::Failed {
            return Err(StateError::MissingErrorMessage);
        }
        if self.phase.is_terminal() {
            return Err(StateError::LeavingTerminal {
                from: self.phase,
                to: phase,
            });
        }
        self.phase = phase;
        self.touch();
        Ok(())
    }

    /// Enter `failed` with `message`
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), StateError> {
        let message = message.into();
        if message.trim().is_empty() {
            return Err(StateError::MissingErrorMessage);
        }
        if self.phase.is_terminal() {
            return Err(StateError::LeavingTerminal {
                from: self.phase,
                to: Phase::Failed,
            });
        }
        self.error_message = Some(message);
        self.phase = Phase::Failed;
        self.touch();
        Ok(())
    }

    /// Put `record` into the slot its worker owns
    pub fn store(&mut self, record: AnalysisRecord) {
        match record {
            AnalysisRecord::Trend(r) => self.trend = Some(r),
            AnalysisRecord::Market(r) => self.market = Some(r),
            AnalysisRecord::Competition(r) => self.competition = Some(r),
            AnalysisRecord::Profit(r) => self.profit = Some(r),
            AnalysisRecord::Evaluation(r) => self.evaluation = Some(r),
        }
        self.touch();
    }

    pub fn set_report_text(&mut self, text: impl Into<String>) {
        self.report_text = Some(text.into());
        self.touch();
    }

    /// Append a history entry for this run; needs a request and an evaluation
    pub fn add_to_history(&mut self, session_id: &str) -> bool {
        let (Some(request), Some(evaluation)) = (&self.request, &self.evaluation) else {
            return false;
        };
        let entry = AnalysisHistoryEntry {
            session_id: session_id.to_string(),
            category: request.category().to_string(),
            target_market: request.target_market().to_string(),
            opportunity_score: evaluation.opportunity_score.value(),
            recommendation: evaluation.recommendation,
            timestamp: Utc::now(),
        };
        self.history.push(entry);
        self.touch();
        true
    }

    // ------------------------------------------------------------------
    // Projections
    // ------------------------------------------------------------------

    /// Flat key/value projection used for session storage
    pub fn to_session_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("current_phase".into(), json!(self.phase.as_str()));
        map.insert("created_at".into(), json!(self.created_at));
        map.insert("updated_at".into(), json!(self.updated_at));

        if let Some(request) = &self.request {
            map.insert("category".into(), json!(request.category()));
            map.insert("target_market".into(), json!(request.target_market()));
            map.insert("budget_range".into(), json!(request.budget_range().as_str()));
            map.insert(
                "business_model".into(),
                json!(request.business_model().as_str()),
            );
            map.insert("keywords".into(), json!(request.keywords()));
        }

        self.insert_records(&mut map);

        if let Some(report) = &self.report_text {
            map.insert("report_text".into(), json!(report));
        }
        if let Some(error) = &self.error_message {
            map.insert("error_message".into(), json!(error));
        }
        map.insert("analysis_history".into(), json!(self.history));
        map
    }

    /// Rebuild a state from [`AnalysisState::to_session_map`] output
    pub fn from_session_map(map: &Map<String, Value>) -> Result<Self, StateError> {
        let mut state = AnalysisState::default();

        if let Some(phase) = map.get("current_phase").and_then(Value::as_str) {
            state.phase = phase.parse()?;
        }
        if let Some(created) = map.get("created_at") {
            state.created_at = field(created, "created_at")?;
        }
        if let Some(updated) = map.get("updated_at") {
            state.updated_at = field(updated, "updated_at")?;
        }

        if let Some(category) = map.get("category").and_then(Value::as_str) {
            let mut input = RequestInput::new(category);
            if let Some(market) = map.get("target_market").and_then(Value::as_str) {
                input.target_market = market.to_string();
            }
            if let Some(budget) = map.get("budget_range").and_then(Value::as_str) {
                input.budget_range = budget.to_string();
            }
            if let Some(model) = map.get("business_model").and_then(Value::as_str) {
                input.business_model = model.to_string();
            }
            if let Some(keywords) = map.get("keywords") {
                input.keywords = field(keywords, "keywords")?;
            }
            let request = AnalysisRequest::new(input)
                .map_err(|e| StateError::Projection(e.to_string()))?;
            state.request = Some(request);
        }

        state.trend = optional_field(map, "trend_analysis")?;
        state.market = optional_field(map, "market_analysis")?;
        state.competition = optional_field(map, "competition_analysis")?;
        state.profit = optional_field(map, "profit_analysis")?;
        state.evaluation = optional_field(map, "evaluation_result")?;
        state.report_text = optional_field(map, "report_text")?;
        state.error_message = optional_field(map, "error_message")?;
        state.history = optional_field(map, "analysis_history")?.unwrap_or_default();

        Ok(state)
    }

    /// Nested projection used by result serialization
    pub fn to_dict(&self) -> Value {
        let mut map = Map::new();
        map.insert("current_phase".into(), json!(self.phase.as_str()));
        map.insert("error_message".into(), json!(self.error_message));
        map.insert("created_at".into(), json!(self.created_at));
        map.insert("updated_at".into(), json!(self.updated_at));
        map.insert("analysis_history".into(), json!(self.history));
        if let Some(request) = &self.request {
            map.insert("request".into(), json!(request));
        }
        self.insert_records(&mut map);
        if let Some(report) = &self.report_text {
            map.insert("report_text".into(), json!(report));
        }
        Value::Object(map)
    }

    fn insert_records(&self, map: &mut Map<String, Value>) {
        if let Some(r) = &self.trend {
            map.insert("trend_analysis".into(), json!(r));
        }
        if let Some(r) = &self.market {
            map.insert("market_analysis".into(), json!(r));
        }
        if let Some(r) = &self.competition {
            map.insert("competition_analysis".into(), json!(r));
        }
        if let Some(r) = &self.profit {
            map.insert("profit_analysis".into(), json!(r));
        }
        if let Some(r) = &self.evaluation {
            map.insert("evaluation_result".into(), json!(r));
        }
    }
}

fn field<T: serde::de::DeserializeOwned>(value: &Value, key: &str) -> Result<T, StateError> {
    serde_json::from_value(value.clone())
        .map_err(|e| StateError::Projection(format!("{}: {}", key, e)))
}

fn optional_field<T: serde::de::DeserializeOwned>(
    map: &Map<String, Value>,
    key: &str,
) -> Result<Option<T>, StateError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => field(value, key).map(Some),
    }
}
