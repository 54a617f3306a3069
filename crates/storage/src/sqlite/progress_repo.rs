use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use tracing::warn;

use crate::repository::{
    PROGRESS_SCHEMA_VERSION, ProgressRecord, ProgressRepository, StorageError,
};

use super::SqliteStore;

#[async_trait]
impl ProgressRepository for SqliteStore {
    async fn save_progress(&self, record: &ProgressRecord) -> Result<(), StorageError> {
        let payload = serde_json::to_string(record)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;

        sqlx::query(
            r"
            INSERT INTO session_progress (id, version, payload, saved_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                version = excluded.version,
                payload = excluded.payload,
                saved_at = excluded.saved_at
            ",
        )
        .bind(1_i64)
        .bind(i64::from(record.version))
        .bind(payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|err| StorageError::Connection(err.to_string()))?;

        Ok(())
    }

    async fn load_progress(&self) -> Result<Option<ProgressRecord>, StorageError> {
        let row = sqlx::query("SELECT version, payload FROM session_progress WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| StorageError::Connection(err.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let version: i64 = row
            .try_get("version")
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        if version != i64::from(PROGRESS_SCHEMA_VERSION) {
            warn!(version, "discarding saved progress with unknown schema version");
            return Ok(None);
        }

        let payload: String = row
            .try_get("payload")
            .map_err(|err| StorageError::Serialization(err.to_string()))?;

        match serde_json::from_str::<ProgressRecord>(&payload) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                warn!(error = %err, "discarding structurally invalid saved progress");
                Ok(None)
            }
        }
    }

    async fn clear_progress(&self) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM session_progress WHERE id = 1")
            .execute(&self.pool)
            .await
            .map_err(|err| StorageError::Connection(err.to_string()))?;
        Ok(())
    }
}
