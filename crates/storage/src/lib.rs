#![forbid(unsafe_code)]

pub mod repository;
pub mod sqlite;

pub use repository::{
    InMemoryStore, PROGRESS_SCHEMA_VERSION, PlayerRepository, ProgressRecord, ProgressRepository,
    Storage, StorageError,
};
pub use sqlite::{SqliteInitError, SqliteStore};
