//! Validated analysis request.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const MAX_KEYWORDS: usize = 10;
pub const MIN_CATEGORY_CHARS: usize = 2;
pub const MAX_CATEGORY_CHARS: usize = 200;

/// Reasons a request is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Category is required and cannot be empty")]
    EmptyCategory,

    #[error("Category must be at least 2 characters")]
    CategoryTooShort,

    #[error("Category must be at most 200 characters")]
    CategoryTooLong,

    #[error("Target market is required")]
    EmptyMarket,

    #[error("Invalid budget_range: {0}. Must be one of low, medium, high")]
    InvalidBudget(String),

    #[error("Invalid business_model: {0}. Must be one of amazon_fba, amazon_fbm, dropshipping, private_label, wholesale, retail_arbitrage")]
    InvalidBusinessModel(String),

    #[error("Maximum 10 keywords allowed, got {0}")]
    TooManyKeywords(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetRange {
    Low,
    #[default]
    Medium,
    High,
}

impl BudgetRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetRange::Low => "low",
            BudgetRange::Medium => "medium",
            BudgetRange::High => "high",
        }
    }
}

impl FromStr for BudgetRange {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(BudgetRange::Low),
            "medium" => Ok(BudgetRange::Medium),
            "high" => Ok(BudgetRange::High),
            other => Err(ValidationError::InvalidBudget(other.to_string())),
        }
    }
}

impl fmt::Display for BudgetRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessModel {
    #[default]
    AmazonFba,
    AmazonFbm,
    Dropshipping,
    PrivateLabel,
    Wholesale,
    RetailArbitrage,
}

impl BusinessModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            BusinessModel::AmazonFba => "amazon_fba",
            BusinessModel::AmazonFbm => "amazon_fbm",
            BusinessModel::Dropshipping => "dropshipping",
            BusinessModel::PrivateLabel => "private_label",
            BusinessModel::Wholesale => "wholesale",
            BusinessModel::RetailArbitrage => "retail_arbitrage",
        }
    }
}

impl FromStr for BusinessModel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "amazon_fba" => Ok(BusinessModel::AmazonFba),
            "amazon_fbm" => Ok(BusinessModel::AmazonFbm),
            "dropshipping" => Ok(BusinessModel::Dropshipping),
            "private_label" => Ok(BusinessModel::PrivateLabel),
            "wholesale" => Ok(BusinessModel::Wholesale),
            "retail_arbitrage" => Ok(BusinessModel::RetailArbitrage),
            other => Err(ValidationError::InvalidBusinessModel(other.to_string())),
        }
    }
}

impl fmt::Display for BusinessModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw, unvalidated request fields as they arrive from a caller
#[derive(Debug, Clone, Deserialize)]
pub struct RequestInput {
    pub category: String,
    #[serde(default = "default_market")]
    pub target_market: String,
    #[serde(default = "default_budget")]
    pub budget_range: String,
    #[serde(default = "default_model")]
    pub business_model: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

fn default_market() -> String {
    "US".to_string()
}

fn default_budget() -> String {
    "medium".to_string()
}

fn default_model() -> String {
    "amazon_fba".to_string()
}

impl RequestInput {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            target_market: default_market(),
            budget_range: default_budget(),
            business_model: default_model(),
            keywords: Vec::new(),
        }
    }
}

/// A normalized, validated analysis request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RequestInput")]
pub struct AnalysisRequest {
    category: String,
    target_market: String,
    budget_range: BudgetRange,
    business_model: BusinessModel,
    keywords: Vec<String>,
}

impl AnalysisRequest {
    /// Normalize and validate raw input
    pub fn new(input: RequestInput) -> Result<Self, ValidationError> {
        let category = input.category.trim().to_string();
        let target_market = input.target_market.trim().to_uppercase();
        let keywords: Vec<String> = input
            .keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(String::from)
            .collect();

        check_category(&category)?;
        if target_market.is_empty() {
            return Err(ValidationError::EmptyMarket);
        }
        let budget_range = input.budget_range.parse()?;
        let business_model = input.business_model.parse()?;
        if keywords.len() > MAX_KEYWORDS {
            return Err(ValidationError::TooManyKeywords(keywords.len()));
        }

        Ok(Self {
            category,
            target_market,
            budget_range,
            business_model,
            keywords,
        })
    }

    /// Request for `category` with all other fields defaulted
    pub fn for_category(category: impl Into<String>) -> Result<Self, ValidationError> {
        Self::new(RequestInput::new(category))
    }

    /// Re-check the invariants `new` established
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_category(&self.category)?;
        if self.target_market.trim().is_empty() {
            return Err(ValidationError::EmptyMarket);
        }
        if self.keywords.len() > MAX_KEYWORDS {
            return Err(ValidationError::TooManyKeywords(self.keywords.len()));
        }
        Ok(())
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn target_market(&self) -> &str {
        &self.target_market
    }

    pub fn budget_range(&self) -> BudgetRange {
        self.budget_range
    }

    pub fn business_model(&self) -> BusinessModel {
        self.business_model
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Category followed by the extra keywords, without duplicates
    pub fn all_keywords(&self) -> Vec<String> {
        let mut all = vec![self.category.clone()];
        for keyword in &self.keywords {
            if !all.contains(keyword) {
                all.push(keyword.clone());
            }
        }
        all
    }

    /// Cache key: `category:market:model:budget`
    pub fn fingerprint(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.category, self.target_market, self.business_model, self.budget_range
        )
    }
}

impl TryFrom<RequestInput> for AnalysisRequest {
    type Error = ValidationError;

    fn try_from(input: RequestInput) -> Result<Self, Self::Error> {
        Self::new(input)
    }
}

fn check_category(category: &str) -> Result<(), ValidationError> {
    let chars = category.chars().count();
    if chars == 0 {
        Err(ValidationError::EmptyCategory)
    } else if chars < MIN_CATEGORY_CHARS {
        Err(ValidationError::CategoryTooShort)
    } else if chars > MAX_CATEGORY_CHARS {
        Err(ValidationError::CategoryTooLong)
    } else {
        Ok(())
    }
}
