use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{DateTime, NaiveDateTime, Utc};
use flate2::{write::GzEncoder, Compression};
use rusqlite::backup::Backup;
use rusqlite::{params, Connection, OpenFlags, Row};
use thiserror::Error;

use crate::sqlite::configure_connection;

const HISTORY_SCHEMA: &str = include_str!("../../sql/history.sql");

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to open history database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on history database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("history path not configured")]
    MissingStore,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type HistoryResult<T> = Result<T, HistoryError>;

/// One processed source video. `video_id` is the dedup key; the remaining
/// columns exist so an operator can tell what a bare id was.
#[derive(Debug, Clone, Default)]
pub struct HistoryRecord {
    pub video_id: String,
    pub source_url: String,
    pub title: Option<String>,
    pub channel_url: Option<String>,
    pub sha256: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub video_id: String,
    pub source_url: String,
    pub title: Option<String>,
    pub channel_url: Option<String>,
    pub sha256: Option<String>,
    pub recorded_at: Option<DateTime<Utc>>,
}

impl HistoryEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            video_id: row.get("video_id")?,
            source_url: row.get("source_url")?,
            title: row.get("title")?,
            channel_url: row.get("channel_url")?,
            sha256: row.get("sha256")?,
            recorded_at: parse_timestamp(row.get("recorded_at")?)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DownloadHistoryBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for DownloadHistoryBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl DownloadHistoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> HistoryResult<DownloadHistory> {
        let path = self.path.ok_or(HistoryError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(DownloadHistory { path, flags })
    }
}

/// Persistent set of already-processed video ids. Every mutation commits
/// before returning, so a kill at any point leaves either the old or the
/// new set on disk, never a torn one.
#[derive(Debug, Clone)]
pub struct DownloadHistory {
    path: PathBuf,
    flags: OpenFlags,
}

impl DownloadHistory {
    pub fn builder() -> DownloadHistoryBuilder {
        DownloadHistoryBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> HistoryResult<Self> {
        DownloadHistoryBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> HistoryResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            HistoryError::Open {
                source,
                path: self.path.clone(),
            }
        })?;
        configure_connection(&conn).map_err(|source| HistoryError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> HistoryResult<()> {
        let conn = self.open()?;
        conn.execute_batch(HISTORY_SCHEMA)?;
        Ok(())
    }

    pub fn is_downloaded(&self, video_id: &str) -> HistoryResult<bool> {
        let conn = self.open()?;
        let present = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM download_history WHERE video_id = ?1)",
            [video_id],
            |row| row.get::<_, bool>(0),
        )?;
        Ok(present)
    }

    /// Returns true when the record was newly inserted, false when the id
    /// was already marked (a no-op, by contract).
    pub fn mark_downloaded(&self, record: &HistoryRecord) -> HistoryResult<bool> {
        let conn = self.open()?;
        let affected = conn.execute(
            "INSERT OR IGNORE INTO download_history (
                video_id, source_url, title, channel_url, sha256
            ) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &record.video_id,
                &record.source_url,
                &record.title,
                &record.channel_url,
                &record.sha256,
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn count(&self) -> HistoryResult<i64> {
        let conn = self.open()?;
        let count = conn.query_row("SELECT COUNT(*) FROM download_history", [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }

    pub fn recent(&self, limit: usize) -> HistoryResult<Vec<HistoryEntry>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM download_history ORDER BY recorded_at DESC LIMIT ?1",
        )?;
        let mut rows = stmt.query([limit as i64])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(HistoryEntry::from_row(row)?);
        }
        Ok(entries)
    }

    pub fn forget(&self, video_id: &str) -> HistoryResult<bool> {
        let conn = self.open()?;
        let affected = conn.execute(
            "DELETE FROM download_history WHERE video_id = ?1",
            [video_id],
        )?;
        Ok(affected > 0)
    }

    pub fn backup_to(&self, destination: impl AsRef<Path>) -> HistoryResult<()> {
        let destination_path = destination.as_ref();
        if let Some(parent) = destination_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let source = self.open()?;
        let mut dest = Connection::open(destination_path)?;
        configure_connection(&dest).map_err(|source| HistoryError::Open {
            source,
            path: destination_path.to_path_buf(),
        })?;
        let backup = Backup::new(&source, &mut dest)?;
        backup.run_to_completion(10, StdDuration::from_millis(50), None)?;
        Ok(())
    }

    pub fn export_backup(&self, output: impl AsRef<Path>) -> HistoryResult<()> {
        let output = output.as_ref();
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = self.open()?;
        let mut dump = String::new();
        dump.push_str(HISTORY_SCHEMA);
        dump.push('\n');
        dump.push_str("BEGIN;\n");

        let mut stmt = conn.prepare(
            "SELECT video_id, source_url, title, channel_url, sha256, recorded_at
             FROM download_history ORDER BY recorded_at ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;

        for row in rows {
            let (video_id, source_url, title, channel_url, sha256, recorded_at) = row?;
            dump.push_str(&format!(
                "INSERT INTO download_history (video_id, source_url, title, channel_url, sha256, recorded_at) VALUES ({}, {}, {}, {}, {}, {});\n",
                sql_quote(&video_id),
                sql_quote(&source_url),
                format_optional_text(title),
                format_optional_text(channel_url),
                format_optional_text(sha256),
                format_optional_text(recorded_at),
            ));
        }

        dump.push_str("COMMIT;\n");

        let file = File::create(output)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(dump.as_bytes())?;
        encoder.finish()?;
        Ok(())
    }
}

fn sql_quote(value: &str) -> String {
    let escaped = value.replace('\'', "''");
    format!("'{}'", escaped)
}

fn format_optional_text(value: Option<String>) -> String {
    value
        .map(|v| sql_quote(&v))
        .unwrap_or_else(|| "NULL".to_string())
}

fn parse_timestamp(value: Option<NaiveDateTime>) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    Ok(value.map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc)))
}
