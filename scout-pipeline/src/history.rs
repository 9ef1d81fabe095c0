//! SQLite database for persistent analysis history
//!
//! Every executed run (successful or failed) is stored with its request
//! fields, outcome, score, and the flat state projection, so earlier analyses
//! can be listed, searched, summarized, and restored after a restart.
//!
//! # Database Schema
//!
//! 1. **analyses** - One row per run: request fields, success flag, execution
//!    time, opportunity score, recommendation, error message, state projection
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use scout_pipeline::history::HistoryDatabase;
//!
//! # fn main() -> anyhow::Result<()> {
//! let db = HistoryDatabase::new(HistoryDatabase::default_path())?;
//!
//! for entry in db.recent(10)? {
//!     println!("{} ({}) -> {:?}", entry.category, entry.target_market, entry.opportunity_score);
//! }
//!
//! let stats = db.statistics()?;
//! println!("Success rate: {:.1}%", stats.success_rate * 100.0);
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::pipeline::{AnalysisState, PipelineResult};

/// Database wrapper for analysis history
pub struct HistoryDatabase {
    conn: Connection,
}

/// One stored run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub session_id: String,
    pub category: String,
    pub target_market: String,
    pub budget_range: String,
    pub business_model: String,
    pub keywords: Vec<String>,
    pub success: bool,
    pub execution_time: f64,
    pub opportunity_score: Option<u8>,
    pub recommendation: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Aggregates over all stored runs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
    /// Seconds, over successful runs
    pub average_execution_time: f64,
    pub average_score: Option<f64>,
    pub recommendations: BTreeMap<String, usize>,
    /// Most analyzed categories with their counts
    pub top_categories: Vec<(String, usize)>,
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, session_id, category, target_market, budget_range, business_model,
           keywords, success, execution_time, opportunity_score, recommendation,
           error_message, created_at
    FROM analyses
"#;

impl HistoryDatabase {
    /// Open (or create) the database at `path` and make sure the schema exists
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open history database {}", path.display()))?;

        // WAL for concurrent readers while the service writes
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self { conn };
        db.initialize_schema()?;
        Ok(db)
    }

    /// In-memory database, discarded on drop
    pub fn new_in_memory() -> Result<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.initialize_schema()?;
        Ok(db)
    }

    /// `~/.scout/history.db`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".scout")
            .join("history.db")
    }

    pub fn initialize_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS analyses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL UNIQUE,

                -- Request
                category TEXT NOT NULL,
                target_market TEXT NOT NULL,
                budget_range TEXT NOT NULL,
                business_model TEXT NOT NULL,
                keywords TEXT NOT NULL DEFAULT '[]',

                -- Outcome
                success INTEGER NOT NULL,
                execution_time REAL NOT NULL,
                opportunity_score INTEGER,
                recommendation TEXT,
                error_message TEXT,

                -- Flat state projection
                state_json TEXT NOT NULL,

                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_analyses_category ON analyses(category);
            CREATE INDEX IF NOT EXISTS idx_analyses_market ON analyses(target_market);
            CREATE INDEX IF NOT EXISTS idx_analyses_created_at ON analyses(created_at DESC);
            "#,
        )?;
        Ok(())
    }

    /// Store one run. Results without a request (nothing was executed) are skipped.
    pub fn record(&self, result: &PipelineResult) -> Result<Option<i64>> {
        let Some(request) = result.state.request() else {
            return Ok(None);
        };
        let evaluation = result.state.evaluation_result();
        let keywords = serde_json::to_string(request.keywords())?;
        let state_json = serde_json::to_string(&result.state.to_session_map())?;

        self.conn.execute(
            r#"
            INSERT INTO analyses (
                session_id, category, target_market, budget_range, business_model,
                keywords, success, execution_time, opportunity_score, recommendation,
                error_message, state_json, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                result.session_id,
                request.category(),
                request.target_market(),
                request.budget_range().as_str(),
                request.business_model().as_str(),
                keywords,
                result.success,
                result.execution_time.as_secs_f64(),
                evaluation.map(|e| e.opportunity_score.value()),
                evaluation.map(|e| e.recommendation.as_str()),
                result.error,
                state_json,
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(Some(self.conn.last_insert_rowid()))
    }

    /// Most recent runs first
    pub fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        let query = format!("{} ORDER BY id DESC LIMIT ?1", SELECT_COLUMNS);
        let mut stmt = self.conn.prepare(&query)?;
        let records = stmt
            .query_map(params![limit], map_record_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Runs for a category, case-insensitive
    pub fn by_category(&self, category: &str, limit: usize) -> Result<Vec<HistoryRecord>> {
        let query = format!(
            "{} WHERE category = ?1 COLLATE NOCASE ORDER BY id DESC LIMIT ?2",
            SELECT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&query)?;
        let records = stmt
            .query_map(params![category, limit], map_record_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn by_market(&self, target_market: &str, limit: usize) -> Result<Vec<HistoryRecord>> {
        let query = format!(
            "{} WHERE target_market = ?1 COLLATE NOCASE ORDER BY id DESC LIMIT ?2",
            SELECT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&query)?;
        let records = stmt
            .query_map(params![target_market, limit], map_record_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Substring match over category and keywords
    pub fn search(&self, text: &str, limit: usize) -> Result<Vec<HistoryRecord>> {
        let pattern = format!("%{}%", text.trim());
        let query = format!(
            "{} WHERE category LIKE ?1 OR keywords LIKE ?1 ORDER BY id DESC LIMIT ?2",
            SELECT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&query)?;
        let records = stmt
            .query_map(params![pattern, limit], map_record_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Rebuild the stored state of a run
    pub fn load_state(&self, session_id: &str) -> Result<Option<AnalysisState>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT state_json FROM analyses WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(json) = json else {
            return Ok(None);
        };
        let map: Map<String, Value> = serde_json::from_str(&json)?;
        let state = AnalysisState::from_session_map(&map)
            .with_context(|| format!("stored state for {} is malformed", session_id))?;
        Ok(Some(state))
    }

    pub fn statistics(&self) -> Result<HistoryStats> {
        let (total, successful, average_execution_time, average_score) = self.conn.query_row(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END), 0),
                AVG(CASE WHEN success = 1 THEN execution_time END),
                AVG(opportunity_score)
            FROM analyses
            "#,
            [],
            |row| {
                Ok((
                    row.get::<_, usize>(0)?,
                    row.get::<_, usize>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                ))
            },
        )?;

        let mut stmt = self.conn.prepare(
            r#"
            SELECT recommendation, COUNT(*)
            FROM analyses
            WHERE recommendation IS NOT NULL
            GROUP BY recommendation
            "#,
        )?;
        let recommendations = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?)))?
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        let mut stmt = self.conn.prepare(
            r#"
            SELECT category, COUNT(*) AS n
            FROM analyses
            GROUP BY category
            ORDER BY n DESC, category ASC
            LIMIT 5
            "#,
        )?;
        let top_categories = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let success_rate = if total == 0 {
            0.0
        } else {
            successful as f64 / total as f64
        };

        Ok(HistoryStats {
            total,
            successful,
            failed: total - successful,
            success_rate,
            average_execution_time: average_execution_time.unwrap_or(0.0),
            average_score,
            recommendations,
            top_categories,
        })
    }

    /// Keep only the newest `max_entries` runs; returns how many were deleted
    pub fn trim(&self, max_entries: usize) -> Result<usize> {
        let deleted = self.conn.execute(
            r#"
            DELETE FROM analyses
            WHERE id NOT IN (SELECT id FROM analyses ORDER BY id DESC LIMIT ?1)
            "#,
            params![max_entries],
        )?;
        Ok(deleted)
    }

    pub fn clear(&self) -> Result<usize> {
        let deleted = self.conn.execute("DELETE FROM analyses", [])?;
        Ok(deleted)
    }

    pub fn count(&self) -> Result<usize> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM analyses", [], |row| row.get(0))?;
        Ok(count)
    }
}

/// Map a database row to HistoryRecord
fn map_record_row(row: &Row) -> rusqlite::Result<HistoryRecord> {
    let keywords_json: String = row.get(6)?;
    let created_at_str: String = row.get(12)?;

    let keywords = serde_json::from_str(&keywords_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(12, rusqlite::types::Type::Text, Box::new(e))
        })?
        .with_timezone(&Utc);

    Ok(HistoryRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        category: row.get(2)?,
        target_market: row.get(3)?,
        budget_range: row.get(4)?,
        business_model: row.get(5)?,
        keywords,
        success: row.get(7)?,
        execution_time: row.get(8)?,
        opportunity_score: row.get(9)?,
        recommendation: row.get(10)?,
        error_message: row.get(11)?,
        created_at,
    })
}
