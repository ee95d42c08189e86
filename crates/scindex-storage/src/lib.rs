//! scindex-storage: pluggable storage backends for SCIndex.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use scindex_core::error::IndexerError;
use scindex_core::store::IndexStore;

pub use memory::InMemoryStorage;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

/// Which backend to open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    Sqlite { path: String },
}

impl Default for StorageKind {
    fn default() -> Self {
        Self::Memory
    }
}

/// Open the backend described by `kind`.
pub async fn open(kind: &StorageKind) -> Result<Arc<dyn IndexStore>, IndexerError> {
    match kind {
        StorageKind::Memory => Ok(Arc::new(InMemoryStorage::new())),
        #[cfg(feature = "sqlite")]
        StorageKind::Sqlite { path } => Ok(Arc::new(SqliteStorage::open(path).await?)),
        #[cfg(not(feature = "sqlite"))]
        StorageKind::Sqlite { .. } => Err(IndexerError::Config(
            "sqlite backend not compiled in (enable the `sqlite` feature)".into(),
        )),
    }
}
