//! Database operations for DVR
//!
//! Uses rusqlite with connection pooling (r2d2) for efficient concurrent access.
//! WAL mode is enabled so readers are not blocked by the recording tasks' writes.

use std::path::Path;

use anyhow::{Context, Result};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, Row};
use tracing::{debug, info, warn};

use crate::dvr::data_manager::RecordingStore;
use crate::dvr::models::*;

/// Persisted recording store backed by SQLite
pub struct DvrDatabase {
    pool: Pool<SqliteConnectionManager>,
}

impl DvrDatabase {
    /// Open (or create) the database file with a connection pool
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("Initializing DVR database at: {:?}", db_path);

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let manager = SqliteConnectionManager::file(db_path);

        let pool = Pool::builder()
            .max_size(5)
            .connection_timeout(std::time::Duration::from_secs(10))
            .build(manager)
            .context("Failed to create database pool")?;

        let db = Self { pool };
        db.initialize_schema()?;
        db.configure_wal_mode()?;

        info!("DVR database initialized successfully");
        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().context("Failed to get database connection")
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS dvr_recordings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                priority INTEGER NOT NULL,
                type TEXT NOT NULL,
                uri TEXT,
                channel_id INTEGER NOT NULL,
                start_time_utc_millis INTEGER NOT NULL,
                end_time_utc_millis INTEGER NOT NULL,
                media_size INTEGER NOT NULL DEFAULT 0,
                state TEXT NOT NULL DEFAULT 'not_started',
                channel_json TEXT NOT NULL,
                programs_json TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_dvr_recordings_state ON dvr_recordings(state)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_dvr_recordings_start ON dvr_recordings(start_time_utc_millis)",
            [],
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    fn configure_wal_mode(&self) -> Result<()> {
        let conn = self.get_conn()?;

        // PRAGMA journal_mode returns the new mode, so we use query_row
        let journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;

        info!("Database journal mode: {}", journal_mode);
        if journal_mode != "wal" {
            warn!("WAL mode not enabled, got: {}", journal_mode);
        }
        Ok(())
    }

    /// Count recordings in a given state (lightweight check)
    pub fn count_with_state(&self, state: RecordingState) -> Result<i64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM dvr_recordings WHERE state = ?1",
            params![state.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl RecordingStore for DvrDatabase {
    fn load_all(&self) -> Result<Vec<Recording>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            "SELECT * FROM dvr_recordings ORDER BY start_time_utc_millis ASC, id ASC",
        )?;
        let rows = stmt.query_map([], row_to_recording)?;

        let mut result = Vec::new();
        for recording in rows {
            result.push(recording?);
        }

        debug!("Loaded {} recordings", result.len());
        Ok(result)
    }

    fn insert(&self, recording: &Recording) -> Result<Recording> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let explicit_id = (recording.id != ID_NOT_SET).then_some(recording.id);
        tx.execute(
            "INSERT INTO dvr_recordings (
                id, priority, type, uri, channel_id,
                start_time_utc_millis, end_time_utc_millis, media_size, state,
                channel_json, programs_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                explicit_id,
                recording.priority,
                recording.recording_type.as_str(),
                recording.uri,
                recording.channel.id,
                recording.start_time_ms,
                recording.end_time_ms,
                recording.media_size,
                recording.state.as_str(),
                serde_json::to_value(&recording.channel)?,
                serde_json::to_value(&recording.programs)?,
            ],
        )?;

        let id = tx.last_insert_rowid();
        let stored = recording.clone().with_id(id);
        if recording.uri.is_none() {
            tx.execute(
                "UPDATE dvr_recordings SET uri = ?1 WHERE id = ?2",
                params![stored.uri, id],
            )?;
        }
        tx.commit()?;

        info!("Added recording {}", id);
        Ok(stored)
    }

    fn update(&self, recording: &Recording) -> Result<usize> {
        let conn = self.get_conn()?;

        let count = conn.execute(
            "UPDATE dvr_recordings SET
                priority = ?1,
                type = ?2,
                uri = ?3,
                channel_id = ?4,
                start_time_utc_millis = ?5,
                end_time_utc_millis = ?6,
                media_size = ?7,
                state = ?8,
                channel_json = ?9,
                programs_json = ?10
             WHERE id = ?11",
            params![
                recording.priority,
                recording.recording_type.as_str(),
                recording.uri,
                recording.channel.id,
                recording.start_time_ms,
                recording.end_time_ms,
                recording.media_size,
                recording.state.as_str(),
                serde_json::to_value(&recording.channel)?,
                serde_json::to_value(&recording.programs)?,
                recording.id,
            ],
        )?;

        debug!("Updated recording {} to {:?}", recording.id, recording.state);
        Ok(count)
    }

    fn delete(&self, id: i64) -> Result<usize> {
        let conn = self.get_conn()?;
        let count = conn.execute("DELETE FROM dvr_recordings WHERE id = ?1", params![id])?;
        info!("Deleted recording {} from database", id);
        Ok(count)
    }
}

fn row_to_recording(row: &Row<'_>) -> rusqlite::Result<Recording> {
    let type_str: String = row.get("type")?;
    let state_str: String = row.get("state")?;
    let channel: serde_json::Value = row.get("channel_json")?;
    let programs: serde_json::Value = row.get("programs_json")?;

    Ok(Recording {
        id: row.get("id")?,
        priority: row.get("priority")?,
        recording_type: type_str.parse().unwrap_or_else(|e: String| {
            warn!("{}, treating as timed", e);
            RecordingType::Timed
        }),
        uri: row.get("uri")?,
        channel: serde_json::from_value(channel).map_err(|e| json_error(e, "channel_json"))?,
        programs: serde_json::from_value(programs).map_err(|e| json_error(e, "programs_json"))?,
        start_time_ms: row.get("start_time_utc_millis")?,
        end_time_ms: row.get("end_time_utc_millis")?,
        media_size: row.get("media_size")?,
        state: state_str.parse().unwrap_or_else(|e: String| {
            warn!("{}, treating as not started", e);
            RecordingState::NotStarted
        }),
    })
}

fn json_error(e: serde_json::Error, column: &str) -> rusqlite::Error {
    warn!("Malformed {} column: {}", column, e);
    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
}
