//! Session storage for intermediate and final state projections

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::pipeline::state::{AnalysisState, StateError};

/// Where the pipeline saves the flat state projection after each stage
pub trait SessionStore: Send + Sync {
    fn save(&self, session_id: &str, projection: Map<String, Value>);

    fn load(&self, session_id: &str) -> Option<Map<String, Value>>;

    fn remove(&self, session_id: &str) -> bool;

    /// Rebuild the saved state for `session_id`
    fn restore(&self, session_id: &str) -> Option<Result<AnalysisState, StateError>> {
        self.load(session_id)
            .map(|map| AnalysisState::from_session_map(&map))
    }
}

/// Process-local session store
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, Map<String, Value>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Map<String, Value>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}

impl SessionStore for InMemorySessionStore {
    fn save(&self, session_id: &str, projection: Map<String, Value>) {
        self.lock().insert(session_id.to_string(), projection);
    }

    fn load(&self, session_id: &str) -> Option<Map<String, Value>> {
        self.lock().get(session_id).cloned()
    }

    fn remove(&self, session_id: &str) -> bool {
        self.lock().remove(session_id).is_some()
    }
}
