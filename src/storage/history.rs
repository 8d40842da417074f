//! SQLite-backed conversion history.
//!
//! The history store is the durable projection of job outcomes: it
//! survives process restarts and registry eviction, and status routes
//! fall back to it before reporting a job as unknown.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::settings::ConversionSettings;

/// SQLite conversion history database
pub struct HistoryDb {
    conn: Arc<Mutex<Connection>>,
}

/// One persisted conversion record
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub filename: String,
    pub original_filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_format: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Aggregate history statistics
#[derive(Debug, Clone, Serialize)]
pub struct HistoryStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub processing: usize,
    pub success_rate: f64,
    pub format_breakdown: HashMap<String, usize>,
}

impl HistoryDb {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| Error::History(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::History(format!("Failed to open in-memory database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA cache_size=10000;
            PRAGMA temp_store=MEMORY;
        "#,
        )
        .map_err(|e| Error::History(format!("Failed to set pragmas: {}", e)))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS conversions (
                id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                original_filename TEXT NOT NULL,
                input_format TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                confidence REAL,
                error_message TEXT,
                output_path TEXT,
                settings_json TEXT,
                file_size INTEGER,
                created_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_conversions_status ON conversions(status);
            CREATE INDEX IF NOT EXISTS idx_conversions_created_at ON conversions(created_at);
            CREATE INDEX IF NOT EXISTS idx_conversions_original_filename
                ON conversions(original_filename);
        "#,
        )
        .map_err(|e| Error::History(format!("Failed to run migrations: {}", e)))?;

        tracing::debug!("History database migrations complete");
        Ok(())
    }

    /// Insert a new entry in `pending` state.
    pub fn create(
        &self,
        id: Uuid,
        filename: &str,
        original_filename: &str,
        input_format: Option<&str>,
        settings: &ConversionSettings,
        file_size: Option<u64>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let settings_json = serde_json::to_string(settings)?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO conversions (
                id, filename, original_filename, input_format, status,
                settings_json, file_size, created_at
            ) VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7)
            "#,
            params![
                id.to_string(),
                filename,
                original_filename,
                input_format,
                settings_json,
                file_size.map(|s| s as i64),
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| Error::History(format!("Failed to create history entry: {}", e)))?;

        Ok(())
    }

    /// Update the terminal fields of an entry. Sets `completed_at` when
    /// the status is terminal. Returns false when the entry is missing.
    pub fn update_status(
        &self,
        id: Uuid,
        status: &str,
        confidence: Option<f32>,
        error_message: Option<&str>,
        output_path: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let completed_at = matches!(status, "completed" | "failed")
            .then(|| Utc::now().to_rfc3339());

        let count = conn
            .execute(
                r#"
                UPDATE conversions SET
                    status = ?2,
                    confidence = COALESCE(?3, confidence),
                    error_message = COALESCE(?4, error_message),
                    output_path = COALESCE(?5, output_path),
                    completed_at = COALESCE(?6, completed_at)
                WHERE id = ?1
                "#,
                params![
                    id.to_string(),
                    status,
                    confidence.map(|c| c as f64),
                    error_message,
                    output_path,
                    completed_at,
                ],
            )
            .map_err(|e| Error::History(format!("Failed to update history entry: {}", e)))?;

        Ok(count > 0)
    }

    /// Look up a single entry
    pub fn get(&self, id: Uuid) -> Result<Option<HistoryEntry>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare("SELECT * FROM conversions WHERE id = ?1")
            .map_err(|e| Error::History(format!("Failed to prepare query: {}", e)))?;

        let entry = stmt
            .query_row(params![id.to_string()], row_to_entry)
            .optional()
            .map_err(|e| Error::History(format!("Failed to get history entry: {}", e)))?;

        Ok(entry)
    }

    /// List entries, newest first, with optional status filtering
    pub fn list(
        &self,
        limit: usize,
        offset: usize,
        status: Option<&str>,
    ) -> Result<Vec<HistoryEntry>> {
        let conn = self.conn.lock();

        let entries = match status {
            Some(status) => {
                let mut stmt = conn
                    .prepare(
                        "SELECT * FROM conversions WHERE status = ?1
                         ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
                    )
                    .map_err(|e| Error::History(format!("Failed to prepare query: {}", e)))?;
                let rows: Vec<HistoryEntry> = stmt
                    .query_map(params![status, limit as i64, offset as i64], row_to_entry)
                    .map_err(|e| Error::History(format!("Failed to list history: {}", e)))?
                    .filter_map(|r| r.ok())
                    .collect();
                rows
            }
            None => {
                let mut stmt = conn
                    .prepare(
                        "SELECT * FROM conversions
                         ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
                    )
                    .map_err(|e| Error::History(format!("Failed to prepare query: {}", e)))?;
                let rows: Vec<HistoryEntry> = stmt
                    .query_map(params![limit as i64, offset as i64], row_to_entry)
                    .map_err(|e| Error::History(format!("Failed to list history: {}", e)))?
                    .filter_map(|r| r.ok())
                    .collect();
                rows
            }
        };

        Ok(entries)
    }

    /// Most recent entries
    pub fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.list(limit, 0, None)
    }

    /// Delete one entry. Returns false when it did not exist.
    pub fn delete(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn.lock();

        let count = conn
            .execute("DELETE FROM conversions WHERE id = ?1", params![id.to_string()])
            .map_err(|e| Error::History(format!("Failed to delete history entry: {}", e)))?;

        Ok(count > 0)
    }

    /// Delete every entry, returning how many were removed
    pub fn delete_all(&self) -> Result<usize> {
        let conn = self.conn.lock();

        let count = conn
            .execute("DELETE FROM conversions", [])
            .map_err(|e| Error::History(format!("Failed to clear history: {}", e)))?;

        Ok(count)
    }

    /// Aggregate statistics over all entries
    pub fn stats(&self) -> Result<HistoryStats> {
        let conn = self.conn.lock();

        let count_where = |clause: &str| -> usize {
            conn.query_row(
                &format!("SELECT COUNT(*) FROM conversions {}", clause),
                [],
                |row| row.get::<_, i64>(0),
            )
            .unwrap_or(0) as usize
        };

        let total = count_where("");
        let completed = count_where("WHERE status = 'completed'");
        let failed = count_where("WHERE status = 'failed'");
        let pending = count_where("WHERE status = 'pending'");
        let processing = count_where("WHERE status = 'processing'");

        let mut format_breakdown = HashMap::new();
        let mut stmt = conn
            .prepare(
                "SELECT input_format, COUNT(*) FROM conversions
                 WHERE input_format IS NOT NULL GROUP BY input_format",
            )
            .map_err(|e| Error::History(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })
            .map_err(|e| Error::History(format!("Failed to compute stats: {}", e)))?;
        for row in rows.flatten() {
            format_breakdown.insert(row.0, row.1);
        }

        let success_rate = if total > 0 {
            (completed as f64 / total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };

        Ok(HistoryStats {
            total,
            completed,
            failed,
            pending,
            processing,
            success_rate,
            format_breakdown,
        })
    }

    /// Search entries by original filename substring
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare(
                "SELECT * FROM conversions WHERE original_filename LIKE ?1
                 ORDER BY created_at DESC LIMIT ?2",
            )
            .map_err(|e| Error::History(format!("Failed to prepare query: {}", e)))?;

        let pattern = format!("%{}%", query);
        let entries = stmt
            .query_map(params![pattern, limit as i64], row_to_entry)
            .map_err(|e| Error::History(format!("Failed to search history: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(entries)
    }

    /// Delete entries older than `days`, returning their ids so callers
    /// can remove the matching output directories.
    pub fn cleanup_old(&self, days: i64) -> Result<Vec<Uuid>> {
        let conn = self.conn.lock();
        let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();

        let mut stmt = conn
            .prepare("SELECT id FROM conversions WHERE created_at < ?1")
            .map_err(|e| Error::History(format!("Failed to prepare query: {}", e)))?;
        let ids: Vec<Uuid> = stmt
            .query_map(params![cutoff], |row| row.get::<_, String>(0))
            .map_err(|e| Error::History(format!("Failed to query old entries: {}", e)))?
            .filter_map(|r| r.ok())
            .filter_map(|s| Uuid::parse_str(&s).ok())
            .collect();

        conn.execute(
            "DELETE FROM conversions WHERE created_at < ?1",
            params![cutoff],
        )
        .map_err(|e| Error::History(format!("Failed to delete old entries: {}", e)))?;

        Ok(ids)
    }
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let id: String = row.get("id")?;
    let created_at: String = row.get("created_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    let settings_json: Option<String> = row.get("settings_json")?;

    Ok(HistoryEntry {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        filename: row.get("filename")?,
        original_filename: row.get("original_filename")?,
        input_format: row.get("input_format")?,
        status: row.get("status")?,
        confidence: row.get("confidence")?,
        error_message: row.get("error_message")?,
        output_path: row.get("output_path")?,
        settings: settings_json.and_then(|s| serde_json::from_str(&s).ok()),
        file_size: row.get::<_, Option<i64>>("file_size")?.map(|s| s as u64),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        completed_at: completed_at.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        }),
    })
}
