//! Durable storage engine: a generic, WAL-journaled mapping from id to
//! JSON-serialized [`Record`], backed by one SQLite table per collection.
//!
//! `Store` itself carries no secondary indices — those are a distinct
//! component (see `atlas_core::index`) built by scanning the store on
//! open. `Store` only owns durability: the journal and the SQLite file.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::glob;
use crate::journal::{CheckpointMode, CheckpointStats, DurabilityLevel, Journal, JournalRecord};
use crate::record::Record;

/// Tunables that map onto spec-level configuration (`busy timeout`,
/// `mmap size`, `page size`, durability).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub durability: DurabilityLevel,
    pub busy_timeout_ms: u64,
    pub mmap_size_bytes: i64,
    pub page_size: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            durability: DurabilityLevel::Full,
            busy_timeout_ms: 5_000,
            mmap_size_bytes: 30 * 1024 * 1024 * 1024,
            page_size: 4096,
        }
    }
}

/// One buffered mutation awaiting [`Store::commit`].
enum BufferedOp {
    Write {
        collection: &'static str,
        id: String,
        data: String,
    },
    Delete {
        collection: &'static str,
        id: String,
    },
}

/// A batch of writes/deletes that commit (or roll back) atomically.
///
/// Staged via [`Store::stage_write`]/[`Store::stage_delete`]; nothing is
/// visible to readers until [`Store::commit`] succeeds.
#[derive(Default)]
pub struct Transaction {
    ops: Vec<BufferedOp>,
}

impl Transaction {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// The generic, durable task/record store.
pub struct Store {
    conn: Connection,
    journal: Journal,
    #[allow(dead_code)]
    base_dir: PathBuf,
    name: String,
}

impl Store {
    /// Open (or create) the store at `{base_dir}/{name}.db`, replaying any
    /// WAL entries left over from an unclean shutdown before returning.
    pub fn open(base_dir: &Path, name: &str, config: &StoreConfig) -> Result<Self> {
        std::fs::create_dir_all(base_dir)?;
        let db_path = base_dir.join(format!("{name}.db"));
        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))?;
        conn.pragma_update(None, "page_size", config.page_size)?;
        conn.pragma_update(None, "mmap_size", config.mmap_size_bytes)?;

        let journal = Journal::open(base_dir, name, config.durability)?;

        let mut store = Store {
            conn,
            journal,
            base_dir: base_dir.to_path_buf(),
            name: name.to_string(),
        };

        let replayed = store.journal.recover(|record| store_apply(&store.conn, record))?;
        if replayed > 0 {
            info!(replayed, "replayed pending journal entries on open");
        }
        Ok(store)
    }

    fn ensure_table<T: Record>(&self) -> Result<()> {
        let collection = T::collection_name();
        self.conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS \"{collection}\" (
                    id TEXT PRIMARY KEY,
                    data TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                )"
            ),
            [],
        )?;
        Ok(())
    }

    pub fn exists<T: Record>(&self, id: &str) -> Result<bool> {
        self.ensure_table::<T>()?;
        let collection = T::collection_name();
        let found: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT 1 FROM \"{collection}\" WHERE id = ?1"),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get<T: Record>(&self, id: &str) -> Result<T> {
        self.ensure_table::<T>()?;
        let collection = T::collection_name();
        let data: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT data FROM \"{collection}\" WHERE id = ?1"),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match data {
            Some(json) => Ok(T::from_json(&json)?),
            None => Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            }),
        }
    }

    pub fn multi_get<T: Record>(&self, ids: &[String]) -> Result<Vec<T>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(record) = self.get::<T>(id) {
                out.push(record);
            }
        }
        Ok(out)
    }

    pub fn count<T: Record>(&self) -> Result<usize> {
        self.ensure_table::<T>()?;
        let collection = T::collection_name();
        let n: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM \"{collection}\""), [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Every record in the collection. Used by index rebuild on open.
    pub fn list_all<T: Record>(&self) -> Result<Vec<T>> {
        self.ensure_table::<T>()?;
        let collection = T::collection_name();
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT data FROM \"{collection}\" ORDER BY id"))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(T::from_json(&row?)?);
        }
        Ok(out)
    }

    /// Glob-pattern scan over ids, using the pattern's literal prefix as a
    /// seek hint before filtering the remainder in memory.
    pub fn scan<T: Record>(&self, pattern: &str) -> Result<Vec<T>> {
        self.ensure_table::<T>()?;
        let collection = T::collection_name();
        let prefix = glob::literal_prefix(pattern);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, data FROM \"{collection}\" WHERE id >= ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![prefix], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, data) = row?;
            if !id.starts_with(&prefix) {
                break;
            }
            if glob::matches(pattern, &id) {
                out.push(T::from_json(&data)?);
            }
        }
        Ok(out)
    }

    pub fn begin_transaction(&self) -> Transaction {
        Transaction::default()
    }

    pub fn stage_write<T: Record>(&self, tx: &mut Transaction, record: &T) -> Result<()> {
        tx.ops.push(BufferedOp::Write {
            collection: T::collection_name(),
            id: record.id(),
            data: record.to_json()?,
        });
        Ok(())
    }

    pub fn stage_delete<T: Record>(&self, tx: &mut Transaction, id: &str) -> Result<()> {
        tx.ops.push(BufferedOp::Delete {
            collection: T::collection_name(),
            id: id.to_string(),
        });
        Ok(())
    }

    /// Convenience single-op create: fails if `id` already exists.
    pub fn create<T: Record>(&mut self, record: T) -> Result<T> {
        self.ensure_table::<T>()?;
        if self.exists::<T>(&record.id())? {
            return Err(StoreError::DuplicateKey {
                collection: T::collection_name().to_string(),
                id: record.id(),
            });
        }
        let mut tx = self.begin_transaction();
        self.stage_write(&mut tx, &record)?;
        self.commit(tx)?;
        Ok(record)
    }

    /// Convenience single-op update: fails if `id` does not exist, and if
    /// both the incoming and stored records carry a version, enforces
    /// `record.version() == stored.version() + 1`.
    pub fn update<T: Record>(&mut self, record: T) -> Result<T> {
        self.ensure_table::<T>()?;
        let current = self.get::<T>(&record.id())?;
        if let (Some(expected), Some(stored)) = (record.version(), current.version()) {
            if expected != stored + 1 {
                return Err(StoreError::VersionConflict {
                    collection: T::collection_name().to_string(),
                    id: record.id(),
                    expected: stored + 1,
                    found: expected,
                });
            }
        }
        let mut tx = self.begin_transaction();
        self.stage_write(&mut tx, &record)?;
        self.commit(tx)?;
        Ok(record)
    }

    pub fn delete<T: Record>(&mut self, id: &str) -> Result<()> {
        self.ensure_table::<T>()?;
        if !self.exists::<T>(id)? {
            return Err(StoreError::NotFound {
                collection: T::collection_name().to_string(),
                id: id.to_string(),
            });
        }
        let mut tx = self.begin_transaction();
        self.stage_delete::<T>(&mut tx, id)?;
        self.commit(tx)?;
        Ok(())
    }

    /// Commit a staged transaction: journal every op (durable), then apply
    /// all of them inside one SQLite transaction (atomic).
    pub fn commit(&mut self, tx: Transaction) -> Result<()> {
        if tx.is_empty() {
            return Ok(());
        }
        for op in &tx.ops {
            match op {
                BufferedOp::Write { collection, id, data } => {
                    self.journal.append(collection, id, Some(data.clone()))?;
                }
                BufferedOp::Delete { collection, id } => {
                    self.journal.append(collection, id, None)?;
                }
            }
        }

        let sqltx = self.conn.transaction()?;
        for op in &tx.ops {
            apply_op(&sqltx, op)?;
        }
        sqltx.commit()?;
        debug!(ops = tx.len(), "store transaction committed");
        Ok(())
    }

    /// Discard a staged transaction without touching the store.
    pub fn rollback(&self, _tx: Transaction) {}

    /// Fold the journal back into the main table and truncate it. Safe to
    /// call at any time; `commit` already applies changes to the table
    /// directly, so this only bounds WAL growth.
    pub fn sync(&mut self) -> Result<CheckpointStats> {
        let conn = &self.conn;
        self.journal
            .checkpoint(CheckpointMode::Passive, |record| store_apply(conn, record))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn journal_len_bytes(&self) -> u64 {
        self.journal.len_bytes()
    }
}

fn apply_op(conn: &Connection, op: &BufferedOp) -> Result<()> {
    match op {
        BufferedOp::Write { collection, id, data } => {
            conn.execute(
                &format!(
                    "INSERT INTO \"{collection}\" (id, data, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at"
                ),
                params![id, data, crate::record::now_ms()],
            )?;
        }
        BufferedOp::Delete { collection, id } => {
            conn.execute(&format!("DELETE FROM \"{collection}\" WHERE id = ?1"), params![id])?;
        }
    }
    Ok(())
}

fn store_apply(conn: &Connection, record: &JournalRecord) -> Result<()> {
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            record.collection
        ),
        [],
    )?;
    match &record.payload {
        Some(data) => {
            conn.execute(
                &format!(
                    "INSERT INTO \"{}\" (id, data, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
                    record.collection
                ),
                params![record.key, data, crate::record::now_ms()],
            )?;
        }
        None => {
            conn.execute(
                &format!("DELETE FROM \"{}\" WHERE id = ?1", record.collection),
                params![record.key],
            )?;
        }
    }
    Ok(())
}
