//! Typed analysis records produced by the workers.

use scout_sdk::WorkerId;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::fmt;
use thiserror::Error;

pub const MIN_SCORE: i64 = 1;
pub const MAX_SCORE: i64 = 100;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoreError {
    #[error("Score must be an integer, got {0}")]
    NotNumeric(String),

    #[error("Score {0} is outside valid range [1, 100]")]
    OutOfBounds(i64),
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("expected a JSON object")]
    NotAnObject,

    #[error("{0} does not produce an analysis record")]
    NoRecordFor(WorkerId),

    #[error("record does not match the expected shape: {0}")]
    Shape(#[from] serde_json::Error),
}

/// A score in [1, 100]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Score(u8);

impl Score {
    pub fn new(value: i64) -> Result<Self, ScoreError> {
        if (MIN_SCORE..=MAX_SCORE).contains(&value) {
            Ok(Score(value as u8))
        } else {
            Err(ScoreError::OutOfBounds(value))
        }
    }

    /// Coerce a JSON value to a score. Numeric strings are parsed first and
    /// fractional numbers are truncated toward zero before the bounds check.
    pub fn coerce(value: &Value) -> Result<Self, ScoreError> {
        let raw = match value {
            Value::Number(n) => match n.as_i64() {
                Some(i) => i,
                None => n
                    .as_f64()
                    .map(|f| f.trunc() as i64)
                    .ok_or_else(|| ScoreError::NotNumeric(n.to_string()))?,
            },
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| ScoreError::NotNumeric(format!("{:?}", s)))?,
            other => return Err(ScoreError::NotNumeric(other.to_string())),
        };
        Score::new(raw)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for Score {
    fn default() -> Self {
        Score(50)
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Score {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.0)
    }
}

impl<'de> Deserialize<'de> for Score {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Score::coerce(&value).map_err(DeError::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Rising,
    #[default]
    Stable,
    Declining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaturityLevel {
    Emerging,
    #[default]
    Growing,
    Mature,
    Declining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Recommendation {
    #[serde(rename = "go")]
    Go,
    #[default]
    #[serde(rename = "cautious")]
    Cautious,
    #[serde(rename = "no-go")]
    NoGo,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Go => "go",
            Recommendation::Cautious => "cautious",
            Recommendation::NoGo => "no-go",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Recommendation::Go => "✅",
            Recommendation::Cautious => "⚠️",
            Recommendation::NoGo => "❌",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrendAnalysis {
    #[serde(default)]
    pub trend_score: Score,
    #[serde(default)]
    pub trend_direction: TrendDirection,
    #[serde(default)]
    pub seasonality: Map<String, Value>,
    #[serde(default)]
    pub related_queries: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<Value>,
}

fn default_market_size() -> Map<String, Value> {
    match json!({"tam": 0, "sam": 0, "som": 0, "currency": "USD"}) {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketAnalysis {
    #[serde(default = "default_market_size")]
    pub market_size: Map<String, Value>,
    #[serde(default)]
    pub growth_rate: f64,
    #[serde(default)]
    pub customer_segments: Vec<Value>,
    #[serde(default)]
    pub maturity_level: MaturityLevel,
    #[serde(default)]
    pub market_score: Score,
}

impl Default for MarketAnalysis {
    fn default() -> Self {
        Self {
            market_size: default_market_size(),
            growth_rate: 0.0,
            customer_segments: Vec::new(),
            maturity_level: MaturityLevel::default(),
            market_score: Score::default(),
        }
    }
}

fn default_entry_barriers() -> String {
    "medium".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitionAnalysis {
    #[serde(default)]
    pub competitors: Vec<Value>,
    /// Higher means more competitive
    #[serde(default)]
    pub competition_score: Score,
    #[serde(default)]
    pub pricing_analysis: Map<String, Value>,
    #[serde(default)]
    pub opportunities: Vec<String>,
    #[serde(default = "default_entry_barriers")]
    pub entry_barriers: String,
}

impl Default for CompetitionAnalysis {
    fn default() -> Self {
        Self {
            competitors: Vec::new(),
            competition_score: Score::default(),
            pricing_analysis: Map::new(),
            opportunities: Vec::new(),
            entry_barriers: default_entry_barriers(),
        }
    }
}

fn default_assessment() -> Map<String, Value> {
    match json!({"profitable": false, "rating": "unknown", "recommendation": "unknown"}) {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitAnalysis {
    #[serde(default)]
    pub unit_economics: Map<String, Value>,
    #[serde(default)]
    pub margins: Map<String, Value>,
    #[serde(default)]
    pub monthly_projection: Map<String, Value>,
    #[serde(default)]
    pub investment: Map<String, Value>,
    #[serde(default = "default_assessment")]
    pub assessment: Map<String, Value>,
    #[serde(default)]
    pub profit_score: Score,
}

impl Default for ProfitAnalysis {
    fn default() -> Self {
        Self {
            unit_economics: Map::new(),
            margins: Map::new(),
            monthly_projection: Map::new(),
            investment: Map::new(),
            assessment: default_assessment(),
            profit_score: Score::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SwotAnalysis {
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub opportunities: Vec<String>,
    #[serde(default)]
    pub threats: Vec<String>,
}

/// Why a fallback evaluation was substituted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// Evaluator answered but nothing parseable came back
    Unparseable,
    /// The evaluation stage itself failed
    StageFailed,
    /// No evaluation exists at report time
    Missing,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaluationResult {
    #[serde(default)]
    pub opportunity_score: Score,
    #[serde(default)]
    pub dimension_scores: Map<String, Value>,
    #[serde(default)]
    pub swot_analysis: SwotAnalysis,
    #[serde(default)]
    pub recommendation: Recommendation,
    #[serde(default)]
    pub recommendation_detail: String,
    #[serde(default)]
    pub key_risks: Vec<String>,
    #[serde(default)]
    pub success_factors: Vec<String>,
}

impl EvaluationResult {
    /// Neutral record used when no real evaluation is available
    pub fn fallback(reason: FallbackReason) -> Self {
        let (dimension, detail, risk, factor) = match reason {
            FallbackReason::Unparseable => (
                50,
                "Evaluation parsing failed - using fallback values",
                "Unable to parse evaluation results",
                "Manual review recommended",
            ),
            FallbackReason::StageFailed => (
                30,
                "Analysis completed but evaluation failed - manual review recommended",
                "Incomplete analysis",
                "Requires validation",
            ),
            FallbackReason::Missing => (
                50,
                "Basic analysis completed - requires detailed review",
                "No evaluation available",
                "Manual review needed",
            ),
        };

        let mut dimension_scores = Map::new();
        for worker in WorkerId::ANALYSTS {
            dimension_scores.insert(worker.label().to_string(), json!(dimension));
        }

        Self {
            opportunity_score: Score::default(),
            dimension_scores,
            swot_analysis: SwotAnalysis::default(),
            recommendation: Recommendation::Cautious,
            recommendation_detail: detail.to_string(),
            key_risks: vec![risk.to_string()],
            success_factors: vec![factor.to_string()],
        }
    }

    /// One-line-per-field summary for consoles
    pub fn summary(&self, category: &str, market: &str) -> String {
        format!(
            "Analysis: {} ({})\nOpportunity Score: {}/100\nRecommendation: {} {}",
            category,
            market,
            self.opportunity_score,
            self.recommendation.emoji(),
            self.recommendation.as_str().to_uppercase()
        )
    }
}

/// Any record a worker can produce, keyed by the worker that produced it
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisRecord {
    Trend(TrendAnalysis),
    Market(MarketAnalysis),
    Competition(CompetitionAnalysis),
    Profit(ProfitAnalysis),
    Evaluation(EvaluationResult),
}

/// Characteristic keys, in resolution priority order
const SNIFF_KEYS: [(&str, WorkerId); 5] = [
    ("trend_score", WorkerId::Trend),
    ("market_score", WorkerId::Market),
    ("competition_score", WorkerId::Competition),
    ("profit_score", WorkerId::Profit),
    ("opportunity_score", WorkerId::Evaluator),
];

impl AnalysisRecord {
    /// Parse `value` as the record type `worker` produces
    pub fn from_worker(worker: WorkerId, value: Value) -> Result<Self, RecordError> {
        if !value.is_object() {
            return Err(RecordError::NotAnObject);
        }
        let record = match worker {
            WorkerId::Trend => AnalysisRecord::Trend(serde_json::from_value(value)?),
            WorkerId::Market => AnalysisRecord::Market(serde_json::from_value(value)?),
            WorkerId::Competition => AnalysisRecord::Competition(serde_json::from_value(value)?),
            WorkerId::Profit => AnalysisRecord::Profit(serde_json::from_value(value)?),
            WorkerId::Evaluator => AnalysisRecord::Evaluation(serde_json::from_value(value)?),
            WorkerId::Report => return Err(RecordError::NoRecordFor(worker)),
        };
        Ok(record)
    }

    /// Guess the producing worker from characteristic keys. Only for payloads
    /// that arrived without attribution.
    pub fn sniff(value: &Value) -> Option<WorkerId> {
        let object = value.as_object()?;
        SNIFF_KEYS
            .iter()
            .find(|(key, _)| object.contains_key(*key))
            .map(|(_, worker)| *worker)
    }

    pub fn worker(&self) -> WorkerId {
        match self {
            AnalysisRecord::Trend(_) => WorkerId::Trend,
            AnalysisRecord::Market(_) => WorkerId::Market,
            AnalysisRecord::Competition(_) => WorkerId::Competition,
            AnalysisRecord::Profit(_) => WorkerId::Profit,
            AnalysisRecord::Evaluation(_) => WorkerId::Evaluator,
        }
    }

    pub fn to_value(&self) -> Value {
        let value = match self {
            AnalysisRecord::Trend(r) => serde_json::to_value(r),
            AnalysisRecord::Market(r) => serde_json::to_value(r),
            AnalysisRecord::Competition(r) => serde_json::to_value(r),
            AnalysisRecord::Profit(r) => serde_json::to_value(r),
            AnalysisRecord::Evaluation(r) => serde_json::to_value(r),
        };
        value.unwrap_or(Value::Null)
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(&self.to_value()).unwrap_or_default()
    }
}
