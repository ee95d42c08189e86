//! SQLite storage backend for SCIndex.
//!
//! Persists owners, invoke history, variable snapshots, interaction heights,
//! counters and scalars to a single SQLite file. Uses `sqlx` with WAL mode.
//! Grouped writes ([`CommitGroup`], staged merges) run in one transaction.
//!
//! # Usage
//! ```rust,no_run
//! use scindex_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./scindex.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnection, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use scindex_core::error::IndexerError;
use scindex_core::store::{CommitGroup, IndexSnapshot, IndexStore};
use scindex_core::types::{
    ChainInfo, NormalTxWithScid, ParsedTransaction, ScVariable, TxCountKind, TxCounts,
};

const META_LAST_INDEXED: &str = "last_indexed_height";
const META_CHAIN_INFO: &str = "chain_info";

fn storage_err(e: impl std::fmt::Display) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// SQLite-backed index storage.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./scindex.db"`) or a full
    /// SQLite URL (`"sqlite:./scindex.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Limited to one connection so every query sees the same database.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        let statements = [
            "CREATE TABLE IF NOT EXISTS owners (
                scid  TEXT NOT NULL PRIMARY KEY,
                owner TEXT NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS invokes (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                scid        TEXT    NOT NULL,
                txid        TEXT    NOT NULL,
                height      INTEGER NOT NULL,
                record_json TEXT    NOT NULL,
                UNIQUE (scid, height, txid)
            );",
            "CREATE INDEX IF NOT EXISTS idx_invokes_scid ON invokes (scid, height);",
            "CREATE TABLE IF NOT EXISTS variables (
                scid      TEXT    NOT NULL,
                height    INTEGER NOT NULL,
                vars_json TEXT    NOT NULL,
                PRIMARY KEY (scid, height)
            );",
            "CREATE TABLE IF NOT EXISTS interaction_heights (
                scid   TEXT    NOT NULL,
                height INTEGER NOT NULL,
                PRIMARY KEY (scid, height)
            );",
            "CREATE TABLE IF NOT EXISTS normal_txs (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT    NOT NULL,
                txid    TEXT    NOT NULL,
                scid    TEXT    NOT NULL,
                fees    INTEGER NOT NULL,
                height  INTEGER NOT NULL,
                UNIQUE (address, txid, scid)
            );",
            "CREATE INDEX IF NOT EXISTS idx_normal_txs_address ON normal_txs (address);",
            "CREATE TABLE IF NOT EXISTS tx_counts (
                kind  TEXT    NOT NULL PRIMARY KEY,
                count INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS meta (
                key   TEXT NOT NULL PRIMARY KEY,
                value TEXT NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS invalid_deploys (
                scid TEXT    NOT NULL PRIMARY KEY,
                fees INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS block_details (
                hash         TEXT NOT NULL PRIMARY KEY,
                details_json TEXT NOT NULL
            );",
        ];

        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }
        Ok(())
    }

    async fn get_meta(&self, key: &str) -> Result<Option<String>, IndexerError> {
        let row = sqlx::query("SELECT value FROM meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }
}

// ─── Write helpers (shared by single writes and transactions) ───────────────

async fn put_owner(conn: &mut SqliteConnection, scid: &str, owner: &str) -> Result<(), IndexerError> {
    sqlx::query("INSERT OR REPLACE INTO owners (scid, owner) VALUES (?, ?)")
        .bind(scid)
        .bind(owner)
        .execute(&mut *conn)
        .await
        .map_err(storage_err)?;
    Ok(())
}

async fn put_invoke(conn: &mut SqliteConnection, record: &ParsedTransaction) -> Result<(), IndexerError> {
    let json = serde_json::to_string(record).map_err(storage_err)?;
    sqlx::query("INSERT OR IGNORE INTO invokes (scid, txid, height, record_json) VALUES (?, ?, ?, ?)")
        .bind(&record.scid)
        .bind(&record.txid)
        .bind(record.height as i64)
        .bind(&json)
        .execute(&mut *conn)
        .await
        .map_err(storage_err)?;
    Ok(())
}

async fn put_variables(
    conn: &mut SqliteConnection,
    scid: &str,
    height: u64,
    vars: &[ScVariable],
) -> Result<(), IndexerError> {
    let json = serde_json::to_string(vars).map_err(storage_err)?;
    sqlx::query("INSERT OR REPLACE INTO variables (scid, height, vars_json) VALUES (?, ?, ?)")
        .bind(scid)
        .bind(height as i64)
        .bind(&json)
        .execute(&mut *conn)
        .await
        .map_err(storage_err)?;
    Ok(())
}

async fn put_interaction_height(
    conn: &mut SqliteConnection,
    scid: &str,
    height: u64,
) -> Result<(), IndexerError> {
    sqlx::query("INSERT OR IGNORE INTO interaction_heights (scid, height) VALUES (?, ?)")
        .bind(scid)
        .bind(height as i64)
        .execute(&mut *conn)
        .await
        .map_err(storage_err)?;
    Ok(())
}

async fn put_normal_tx(
    conn: &mut SqliteConnection,
    address: &str,
    record: &NormalTxWithScid,
) -> Result<(), IndexerError> {
    sqlx::query(
        "INSERT OR IGNORE INTO normal_txs (address, txid, scid, fees, height) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(address)
    .bind(&record.txid)
    .bind(&record.scid)
    .bind(record.fees as i64)
    .bind(record.height as i64)
    .execute(&mut *conn)
    .await
    .map_err(storage_err)?;
    Ok(())
}

async fn put_tx_count(conn: &mut SqliteConnection, kind: TxCountKind, count: u64) -> Result<(), IndexerError> {
    sqlx::query("INSERT OR REPLACE INTO tx_counts (kind, count) VALUES (?, ?)")
        .bind(kind.as_str())
        .bind(count as i64)
        .execute(&mut *conn)
        .await
        .map_err(storage_err)?;
    Ok(())
}

async fn put_meta(conn: &mut SqliteConnection, key: &str, value: &str) -> Result<(), IndexerError> {
    sqlx::query("INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(value)
        .execute(&mut *conn)
        .await
        .map_err(storage_err)?;
    Ok(())
}

async fn put_invalid_deploy(conn: &mut SqliteConnection, scid: &str, fees: u64) -> Result<(), IndexerError> {
    sqlx::query("INSERT OR REPLACE INTO invalid_deploys (scid, fees) VALUES (?, ?)")
        .bind(scid)
        .bind(fees as i64)
        .execute(&mut *conn)
        .await
        .map_err(storage_err)?;
    Ok(())
}

async fn put_block_details(
    conn: &mut SqliteConnection,
    hash: &str,
    details: &serde_json::Value,
) -> Result<(), IndexerError> {
    let json = serde_json::to_string(details).map_err(storage_err)?;
    sqlx::query("INSERT OR REPLACE INTO block_details (hash, details_json) VALUES (?, ?)")
        .bind(hash)
        .bind(&json)
        .execute(&mut *conn)
        .await
        .map_err(storage_err)?;
    Ok(())
}

async fn apply_group(conn: &mut SqliteConnection, group: &CommitGroup) -> Result<(), IndexerError> {
    if let Some(owner) = &group.owner {
        put_owner(conn, &group.scid, owner).await?;
    }
    if let Some(record) = &group.invoke {
        put_invoke(conn, record).await?;
    }
    if let Some((height, vars)) = &group.variables {
        put_variables(conn, &group.scid, *height, vars).await?;
    }
    if let Some(height) = group.interaction_height {
        put_interaction_height(conn, &group.scid, height).await?;
    }
    Ok(())
}

// ─── IndexStore impl ─────────────────────────────────────────────────────────

#[async_trait]
impl IndexStore for SqliteStorage {
    async fn store_owner(&self, scid: &str, owner: &str) -> Result<(), IndexerError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        put_owner(&mut conn, scid, owner).await
    }

    async fn get_owner(&self, scid: &str) -> Result<Option<String>, IndexerError> {
        let row = sqlx::query("SELECT owner FROM owners WHERE scid = ?")
            .bind(scid)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.map(|r| r.get::<String, _>("owner")))
    }

    async fn get_all_owners(&self) -> Result<BTreeMap<String, String>, IndexerError> {
        let rows = sqlx::query("SELECT scid, owner FROM owners")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("scid"), r.get::<String, _>("owner")))
            .collect())
    }

    async fn store_invoke_details(&self, record: &ParsedTransaction) -> Result<(), IndexerError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        put_invoke(&mut conn, record).await?;
        debug!(scid = %record.scid, txid = %record.txid, height = record.height, "invoke stored");
        Ok(())
    }

    async fn get_invoke_details(&self, scid: &str) -> Result<Vec<ParsedTransaction>, IndexerError> {
        let rows = sqlx::query("SELECT record_json FROM invokes WHERE scid = ? ORDER BY height, id")
            .bind(scid)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let json: String = row.get("record_json");
            records.push(serde_json::from_str(&json).map_err(storage_err)?);
        }
        Ok(records)
    }

    async fn store_variables(
        &self,
        scid: &str,
        height: u64,
        vars: &[ScVariable],
    ) -> Result<(), IndexerError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        put_variables(&mut conn, scid, height, vars).await
    }

    async fn get_variables_at(
        &self,
        scid: &str,
        height: u64,
    ) -> Result<Option<(u64, Vec<ScVariable>)>, IndexerError> {
        let row = sqlx::query(
            "SELECT height, vars_json FROM variables
             WHERE scid = ? AND height <= ?
             ORDER BY height DESC LIMIT 1",
        )
        .bind(scid)
        .bind(height as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        match row {
            None => Ok(None),
            Some(r) => {
                let json: String = r.get("vars_json");
                let vars = serde_json::from_str(&json).map_err(storage_err)?;
                Ok(Some((r.get::<i64, _>("height") as u64, vars)))
            }
        }
    }

    async fn get_variable_heights(&self, scid: &str) -> Result<Vec<u64>, IndexerError> {
        let rows = sqlx::query("SELECT height FROM variables WHERE scid = ? ORDER BY height")
            .bind(scid)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(rows
            .into_iter()
            .map(|r| r.get::<i64, _>("height") as u64)
            .collect())
    }

    async fn store_interaction_height(&self, scid: &str, height: u64) -> Result<(), IndexerError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        put_interaction_height(&mut conn, scid, height).await
    }

    async fn get_interaction_heights(&self, scid: &str) -> Result<Vec<u64>, IndexerError> {
        let rows = sqlx::query(
            "SELECT height FROM interaction_heights WHERE scid = ? ORDER BY rowid",
        )
        .bind(scid)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(rows
            .into_iter()
            .map(|r| r.get::<i64, _>("height") as u64)
            .collect())
    }

    async fn store_normal_tx_with_scid(
        &self,
        address: &str,
        record: &NormalTxWithScid,
    ) -> Result<(), IndexerError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        put_normal_tx(&mut conn, address, record).await
    }

    async fn get_normal_txs_with_scid(
        &self,
        address: &str,
    ) -> Result<Vec<NormalTxWithScid>, IndexerError> {
        let rows = sqlx::query(
            "SELECT txid, scid, fees, height FROM normal_txs WHERE address = ? ORDER BY id",
        )
        .bind(address)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(rows
            .into_iter()
            .map(|r| NormalTxWithScid {
                txid: r.get("txid"),
                scid: r.get("scid"),
                fees: r.get::<i64, _>("fees") as u64,
                height: r.get::<i64, _>("height") as u64,
            })
            .collect())
    }

    async fn store_tx_count(&self, kind: TxCountKind, count: u64) -> Result<(), IndexerError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        put_tx_count(&mut conn, kind, count).await
    }

    async fn get_tx_count(&self, kind: TxCountKind) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT count FROM tx_counts WHERE kind = ?")
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.map(|r| r.get::<i64, _>("count") as u64).unwrap_or(0))
    }

    async fn store_last_indexed_height(&self, height: u64) -> Result<(), IndexerError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        put_meta(&mut conn, META_LAST_INDEXED, &height.to_string()).await?;
        debug!(height, "last indexed height saved");
        Ok(())
    }

    async fn get_last_indexed_height(&self) -> Result<u64, IndexerError> {
        match self.get_meta(META_LAST_INDEXED).await? {
            Some(v) => v.parse().map_err(storage_err),
            None => Ok(0),
        }
    }

    async fn commit_progress(&self, counts: &TxCounts, height: u64) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        for kind in TxCountKind::ALL {
            let delta = counts.get(kind);
            if delta == 0 {
                continue;
            }
            let row = sqlx::query("SELECT count FROM tx_counts WHERE kind = ?")
                .bind(kind.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage_err)?;
            let current = row.map(|r| r.get::<i64, _>("count") as u64).unwrap_or(0);
            put_tx_count(&mut tx, kind, current + delta).await?;
        }
        put_meta(&mut tx, META_LAST_INDEXED, &height.to_string()).await?;
        tx.commit().await.map_err(storage_err)?;
        debug!(height, "batch progress saved");
        Ok(())
    }

    async fn store_chain_info(&self, info: &ChainInfo) -> Result<(), IndexerError> {
        let json = serde_json::to_string(info).map_err(storage_err)?;
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        put_meta(&mut conn, META_CHAIN_INFO, &json).await
    }

    async fn get_chain_info(&self) -> Result<Option<ChainInfo>, IndexerError> {
        match self.get_meta(META_CHAIN_INFO).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json).map_err(storage_err)?)),
            None => Ok(None),
        }
    }

    async fn store_invalid_deploy(&self, scid: &str, fees: u64) -> Result<(), IndexerError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        put_invalid_deploy(&mut conn, scid, fees).await
    }

    async fn get_invalid_deploys(&self) -> Result<BTreeMap<String, u64>, IndexerError> {
        let rows = sqlx::query("SELECT scid, fees FROM invalid_deploys")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("scid"), r.get::<i64, _>("fees") as u64))
            .collect())
    }

    async fn store_block_details(
        &self,
        block_hash: &str,
        details: &serde_json::Value,
    ) -> Result<(), IndexerError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        put_block_details(&mut conn, block_hash, details).await
    }

    async fn commit_group(&self, group: &CommitGroup) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        apply_group(&mut tx, group).await?;
        tx.commit().await.map_err(storage_err)?;
        debug!(scid = %group.scid, "commit group applied");
        Ok(())
    }

    async fn merge(&self, staged: IndexSnapshot) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        for (scid, owner) in &staged.owners {
            put_owner(&mut tx, scid, owner).await?;
        }
        for records in staged.invokes.values() {
            for record in records {
                put_invoke(&mut tx, record).await?;
            }
        }
        for (scid, by_height) in &staged.variables {
            for (height, vars) in by_height {
                put_variables(&mut tx, scid, *height, vars).await?;
            }
        }
        for (scid, heights) in &staged.interaction_heights {
            for height in heights {
                put_interaction_height(&mut tx, scid, *height).await?;
            }
        }
        for (address, records) in &staged.normal_txs {
            for record in records {
                put_normal_tx(&mut tx, address, record).await?;
            }
        }
        if !staged.tx_counts.is_empty() {
            for kind in TxCountKind::ALL {
                put_tx_count(&mut tx, kind, staged.tx_counts.get(kind)).await?;
            }
        }
        if let Some(info) = &staged.chain_info {
            let json = serde_json::to_string(info).map_err(storage_err)?;
            put_meta(&mut tx, META_CHAIN_INFO, &json).await?;
        }
        for (scid, fees) in &staged.invalid_deploys {
            put_invalid_deploy(&mut tx, scid, *fees).await?;
        }
        for (hash, details) in &staged.block_details {
            put_block_details(&mut tx, hash, details).await?;
        }

        tx.commit().await.map_err(storage_err)?;

        // The staged height only ever raises the persisted one.
        if staged.last_indexed_height > self.get_last_indexed_height().await? {
            self.store_last_indexed_height(staged.last_indexed_height).await?;
        }

        debug!(contracts = staged.owners.len(), "staged snapshot merged");
        Ok(())
    }

    async fn close(&self) -> Result<(), IndexerError> {
        self.pool.close().await;
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
