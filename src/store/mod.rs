//! Durable per-project chunk store.
//!
//! One SQLite database per project holds every chunk with its embedding
//! blob, plus a small metadata key/value table (dimension, precision,
//! kernel name, project directory). Writes go through single transactions
//! so a failed reindex cycle leaves no partial commit.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use crate::chunker::Chunk;
use crate::config::Precision;
use crate::error::EngineError;
use crate::vector::{VectorEntry, VectorIndex};

/// Metadata keys every project store carries.
pub mod meta_keys {
    pub const DIMENSION: &str = "dimension";
    pub const PRECISION: &str = "precision";
    pub const CPU_CAPABILITIES: &str = "cpu_capabilities";
    pub const PROJECT_DIRECTORY: &str = "project_directory";
}

/// One persisted chunk row.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub id: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub chunk_type: String,
    pub embedding: Vec<u8>,
    pub precision: Precision,
    pub indexed_at: DateTime<Utc>,
}

impl ChunkRecord {
    /// Build a record from a chunk and its embedding blob.
    pub fn from_chunk(chunk: &Chunk, embedding: Vec<u8>, precision: Precision) -> Self {
        Self {
            id: chunk.id.clone(),
            file_path: chunk.path.clone(),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            content: chunk.text.clone(),
            chunk_type: chunk.kind_tag(),
            embedding,
            precision,
            indexed_at: chunk.modified_at,
        }
    }
}

/// SQLite-backed chunk store for one project.
pub struct ChunkStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl ChunkStore {
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                EngineError::read_failure(parent, format!("cannot create store directory: {}", e))
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                file_path TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                content TEXT NOT NULL,
                chunk_type TEXT NOT NULL,
                embedding BLOB NOT NULL,
                precision INTEGER NOT NULL,
                indexed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_file_path ON chunks(file_path);
            CREATE INDEX IF NOT EXISTS idx_chunks_chunk_type ON chunks(chunk_type);
            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    /// Transactional bulk upsert keyed by chunk identifier.
    pub fn save_chunks(&self, records: &[ChunkRecord]) -> Result<(), EngineError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO chunks
                     (id, file_path, start_line, end_line, content, chunk_type, embedding, precision, indexed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for r in records {
                stmt.execute(params![
                    r.id,
                    r.file_path,
                    r.start_line as i64,
                    r.end_line as i64,
                    r.content,
                    r.chunk_type,
                    r.embedding,
                    r.precision.as_code(),
                    r.indexed_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        debug!("Saved {} chunks", records.len());
        Ok(())
    }

    pub fn get_chunks_by_ids(&self, ids: &[String]) -> Result<Vec<ChunkRecord>, EngineError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, file_path, start_line, end_line, content, chunk_type, embedding, precision, indexed_at
             FROM chunks WHERE id = ?1",
        )?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = stmt
                .query_row(params![id], row_to_record)
                .optional()?
            {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Delete every chunk of one file. Returns the removed identifiers.
    pub fn delete_by_path(&self, file_path: &str) -> Result<Vec<String>, EngineError> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        let ids: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM chunks WHERE file_path = ?1")?;
            let rows = stmt.query_map(params![file_path], |row| row.get(0))?;
            rows.collect::<Result<Vec<String>, _>>()?
        };
        tx.execute("DELETE FROM chunks WHERE file_path = ?1", params![file_path])?;
        tx.commit()?;
        Ok(ids)
    }

    /// Stream all rows into a freshly built VectorIndex.
    ///
    /// Row decoding fans out over a bounded pool; rows whose blob length
    /// does not match the expected dimension are rejected as an invariant
    /// violation (corrupted store or misconfigured model).
    pub fn load_all(
        &self,
        dimension: usize,
        precision: Precision,
        parallelism: usize,
    ) -> Result<VectorIndex, EngineError> {
        let records: Vec<ChunkRecord> = {
            let conn = self.conn.lock().expect("store mutex poisoned");
            let mut stmt = conn.prepare(
                "SELECT id, file_path, start_line, end_line, content, chunk_type, embedding, precision, indexed_at
                 FROM chunks ORDER BY id",
            )?;
            let rows = stmt.query_map([], row_to_record)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let to_entries = |records: Vec<ChunkRecord>| -> Vec<VectorEntry> {
            records
                .into_par_iter()
                .map(|r| VectorEntry {
                    id: r.id,
                    path: r.file_path,
                    start_line: r.start_line,
                    end_line: r.end_line,
                    text: r.content,
                    embedding: r.embedding,
                    precision: r.precision,
                    kind_tag: r.chunk_type,
                    modified_at: r.indexed_at,
                })
                .collect()
        };

        let entries = match rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism.max(1))
            .build()
        {
            Ok(pool) => pool.install(|| to_entries(records)),
            Err(_) => to_entries(records),
        };

        let mut index = VectorIndex::new(dimension, precision);
        index.append_batch(entries)?;
        Ok(index)
    }

    /// Delete all chunks and metadata, then compact the database file.
    pub fn clear(&self) -> Result<(), EngineError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute("DELETE FROM chunks", [])?;
        conn.execute("DELETE FROM metadata", [])?;
        conn.execute_batch("VACUUM")?;
        Ok(())
    }

    pub fn save_metadata(&self, key: &str, value: &str) -> Result<(), EngineError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>, EngineError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let value = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn chunk_count(&self) -> Result<usize, EngineError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    pub fn file_count(&self) -> Result<usize, EngineError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT file_path) FROM chunks",
            [],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    /// Distinct file paths currently stored (snapshot reconciliation).
    pub fn stored_paths(&self) -> Result<Vec<String>, EngineError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare("SELECT DISTINCT file_path FROM chunks ORDER BY file_path")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }

    pub fn db_size_bytes(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChunkRecord> {
    let precision_code: i64 = row.get(7)?;
    let indexed_at: String = row.get(8)?;
    Ok(ChunkRecord {
        id: row.get(0)?,
        file_path: row.get(1)?,
        start_line: row.get::<_, i64>(2)? as usize,
        end_line: row.get::<_, i64>(3)? as usize,
        content: row.get(4)?,
        chunk_type: row.get(5)?,
        embedding: row.get(6)?,
        precision: Precision::from_code(precision_code).unwrap_or(Precision::Single),
        indexed_at: DateTime::parse_from_rfc3339(&indexed_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}
