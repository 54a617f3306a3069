use async_trait::async_trait;
use sqlx::Row;

use crate::repository::{PlayerRepository, StorageError};

use super::SqliteStore;

#[async_trait]
impl PlayerRepository for SqliteStore {
    async fn save_player_name(&self, name: &str) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO player (id, name)
            VALUES (?1, ?2)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name
            ",
        )
        .bind(1_i64)
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(|err| StorageError::Connection(err.to_string()))?;

        Ok(())
    }

    async fn load_player_name(&self) -> Result<Option<String>, StorageError> {
        let row = sqlx::query("SELECT name FROM player WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| StorageError::Connection(err.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        row.try_get("name")
            .map(Some)
            .map_err(|err| StorageError::Serialization(err.to_string()))
    }
}
