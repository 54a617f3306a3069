use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use trivia_core::model::{Difficulty, Question, QuizSession};

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Version tag written into every persisted progress record. Records with
/// any other version are treated as absent on load.
pub const PROGRESS_SCHEMA_VERSION: u32 = 1;

/// Persisted snapshot of an in-flight session.
///
/// This mirrors the domain `QuizSession` so repositories can
/// serialize/deserialize without leaking storage concerns into the domain
/// layer. The stored `score` is informational only; restore always
/// recomputes it from `answers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub version: u32,
    pub player_name: String,
    pub difficulty: Difficulty,
    pub questions: Vec<Question>,
    pub current_index: usize,
    pub score: usize,
    pub answers: BTreeMap<usize, String>,
    pub started_at: DateTime<Utc>,
}

impl ProgressRecord {
    #[must_use]
    pub fn from_session(session: &QuizSession) -> Self {
        Self {
            version: PROGRESS_SCHEMA_VERSION,
            player_name: session.player_name().to_owned(),
            difficulty: session.difficulty(),
            questions: session.questions().to_vec(),
            current_index: session.current_index(),
            score: session.score(),
            answers: session.answers().clone(),
            started_at: session.started_at(),
        }
    }
}

/// Single-slot persistence for session progress.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Overwrite the stored progress snapshot.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the snapshot cannot be stored.
    async fn save_progress(&self, record: &ProgressRecord) -> Result<(), StorageError>;

    /// Fetch the stored progress snapshot.
    ///
    /// Absent, structurally invalid, or wrong-version data is `Ok(None)`,
    /// never an error; only connection-level failures are `Err`.
    async fn load_progress(&self) -> Result<Option<ProgressRecord>, StorageError>;

    /// Remove the stored snapshot. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the slot cannot be cleared.
    async fn clear_progress(&self) -> Result<(), StorageError>;
}

/// Longer-lived player identity slot, independent of session progress.
/// Used to prefill the next session's start form.
#[async_trait]
pub trait PlayerRepository: Send + Sync {
    /// Persist the player name.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the name cannot be stored.
    async fn save_player_name(&self, name: &str) -> Result<(), StorageError>;

    /// Fetch the stored player name, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on connection-level failures.
    async fn load_player_name(&self) -> Result<Option<String>, StorageError>;
}

/// Simple in-memory store for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    progress: Arc<Mutex<Option<ProgressRecord>>>,
    player_name: Arc<Mutex<Option<String>>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressRepository for InMemoryStore {
    async fn save_progress(&self, record: &ProgressRecord) -> Result<(), StorageError> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        *guard = Some(record.clone());
        Ok(())
    }

    async fn load_progress(&self) -> Result<Option<ProgressRecord>, StorageError> {
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.clone())
    }

    async fn clear_progress(&self) -> Result<(), StorageError> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        *guard = None;
        Ok(())
    }
}

#[async_trait]
impl PlayerRepository for InMemoryStore {
    async fn save_player_name(&self, name: &str) -> Result<(), StorageError> {
        let mut guard = self
            .player_name
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        *guard = Some(name.to_owned());
        Ok(())
    }

    async fn load_player_name(&self) -> Result<Option<String>, StorageError> {
        let guard = self
            .player_name
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.clone())
    }
}

/// Aggregates the progress and player slots behind trait objects for easy
/// backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressRepository>,
    pub player: Arc<dyn PlayerRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let store = InMemoryStore::new();
        let progress: Arc<dyn ProgressRepository> = Arc::new(store.clone());
        let player: Arc<dyn PlayerRepository> = Arc::new(store);
        Self { progress, player }
    }
}
