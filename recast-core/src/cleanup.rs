use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration as StdDuration, SystemTime};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, Row};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};
use walkdir::WalkDir;

use crate::sqlite::configure_connection;

const CLEANUP_SCHEMA: &str = include_str!("../../sql/cleanup.sql");

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("failed to open cleanup database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on cleanup database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("cleanup path not configured")]
    MissingStore,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type CleanupResult<T> = Result<T, CleanupError>;

#[derive(Debug, Clone)]
pub struct PendingDeletion {
    pub path: String,
    pub enqueued_at: Option<DateTime<Utc>>,
    pub attempts: i64,
    pub last_error: Option<String>,
}

impl PendingDeletion {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            path: row.get("path")?,
            enqueued_at: parse_timestamp(row.get("enqueued_at")?)?,
            attempts: row.get("attempts")?,
            last_error: row.get("last_error")?,
        })
    }
}

/// Outcome of one `flush` sweep. Paths that vanished on their own count as
/// reclaimed, not as errors.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub deleted: usize,
    pub missing: usize,
    pub failed: usize,
    pub dropped: usize,
    pub failed_paths: Vec<String>,
}

impl CleanupReport {
    pub fn reclaimed(&self) -> usize {
        self.deleted + self.missing
    }
}

#[derive(Debug, Clone)]
pub struct CleanupQueueBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
    max_attempts: u32,
}

impl Default for CleanupQueueBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
            max_attempts: 0,
        }
    }
}

impl CleanupQueueBuilder {
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

    /// 0 retries failed deletions forever (the historical behaviour);
    /// a positive cap drops an entry after that many sweeps failed on it,
    /// trading a leaked file for a queue that cannot grow without bound.
    pub fn max_attempts(mut self, value: u32) -> Self {
        self.max_attempts = value;
        self
    }

    pub fn build(self) -> CleanupResult<CleanupQueue> {
        let path = self.path.ok_or(CleanupError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(CleanupQueue {
            path,
            flags,
            max_attempts: self.max_attempts,
        })
    }
}

/// Persistent queue of files awaiting removal. Deletion happens on the
/// *next* run rather than inline, so a file the platform still holds open
/// (antivirus scan, slow close) does not fail the run that produced it.
#[derive(Debug, Clone)]
pub struct CleanupQueue {
    path: PathBuf,
    flags: OpenFlags,
    max_attempts: u32,
}

impl CleanupQueue {
    pub fn builder() -> CleanupQueueBuilder {
        CleanupQueueBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> CleanupResult<Self> {
        CleanupQueueBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> CleanupResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            CleanupError::Open {
                source,
                path: self.path.clone(),
            }
        })?;
        configure_connection(&conn).map_err(|source| CleanupError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> CleanupResult<()> {
        let conn = self.open()?;
        conn.execute_batch(CLEANUP_SCHEMA)?;
        Ok(())
    }

    /// Returns true when the path was newly queued; re-enqueueing a queued
    /// path is a no-op.
    pub fn enqueue(&self, file: impl AsRef<Path>) -> CleanupResult<bool> {
        let conn = self.open()?;
        let value = file.as_ref().to_string_lossy().into_owned();
        let affected = conn.execute(
            "INSERT OR IGNORE INTO pending_deletions (path) VALUES (?1)",
            [&value],
        )?;
        Ok(affected > 0)
    }

    pub fn pending(&self) -> CleanupResult<Vec<PendingDeletion>> {
        let conn = self.open()?;
        let mut stmt =
            conn.prepare("SELECT * FROM pending_deletions ORDER BY enqueued_at ASC")?;
        let mut rows = stmt.query([])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(PendingDeletion::from_row(row)?);
        }
        Ok(entries)
    }

    pub fn count(&self) -> CleanupResult<i64> {
        let conn = self.open()?;
        let count = conn.query_row("SELECT COUNT(*) FROM pending_deletions", [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }

    /// Attempts every queued path once. Successes (and paths already gone)
    /// leave the queue; failures stay queued with their attempt counter
    /// bumped, or are dropped loudly once past the configured cap.
    pub fn flush(&self) -> CleanupResult<CleanupReport> {
        let entries = self.pending()?;
        if entries.is_empty() {
            return Ok(CleanupReport::default());
        }

        let mut report = CleanupReport::default();
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        for entry in entries {
            match force_delete(Path::new(&entry.path)) {
                DeleteOutcome::Deleted => {
                    debug!(path = %entry.path, "reclaimed file");
                    report.deleted += 1;
                    tx.execute("DELETE FROM pending_deletions WHERE path = ?1", [&entry.path])?;
                }
                DeleteOutcome::Missing => {
                    debug!(path = %entry.path, "file already gone, dropping entry");
                    report.missing += 1;
                    tx.execute("DELETE FROM pending_deletions WHERE path = ?1", [&entry.path])?;
                }
                DeleteOutcome::Failed(err) => {
                    let attempts = entry.attempts + 1;
                    if self.max_attempts > 0 && attempts >= i64::from(self.max_attempts) {
                        error!(
                            path = %entry.path,
                            attempts,
                            error = %err,
                            "giving up on deletion, file is leaked"
                        );
                        report.dropped += 1;
                        tx.execute(
                            "DELETE FROM pending_deletions WHERE path = ?1",
                            [&entry.path],
                        )?;
                    } else {
                        warn!(path = %entry.path, attempts, error = %err, "deletion failed, keeping entry");
                        report.failed += 1;
                        report.failed_paths.push(entry.path.clone());
                        tx.execute(
                            "UPDATE pending_deletions SET attempts = ?1, last_error = ?2 WHERE path = ?3",
                            params![attempts, err.to_string(), &entry.path],
                        )?;
                    }
                }
            }
        }
        tx.commit()?;
        Ok(report)
    }

    /// Queues stale files sitting in `dir` that nothing references, the
    /// residue of a run killed between fetch and record. Returns how many
    /// paths were newly queued.
    pub fn scan_orphans(
        &self,
        dir: impl AsRef<Path>,
        older_than: StdDuration,
    ) -> CleanupResult<usize> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Ok(0);
        }
        let cutoff = SystemTime::now()
            .checked_sub(older_than)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut queued = 0usize;
        for entry in WalkDir::new(dir).min_depth(1).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let modified = match entry
                .metadata()
                .map_err(io::Error::from)
                .and_then(|meta| meta.modified())
            {
                Ok(ts) => ts,
                Err(err) => {
                    warn!(path = %entry.path().display(), error = %err, "skipping unreadable file");
                    continue;
                }
            };
            if modified > cutoff {
                continue;
            }
            if self.enqueue(entry.path())? {
                queued += 1;
            }
        }
        Ok(queued)
    }
}

enum DeleteOutcome {
    Deleted,
    Missing,
    Failed(io::Error),
}

/// Plain removal first; on failure, escalate the platform-specific way.
/// A path that is already gone is success, not an error.
fn force_delete(path: &Path) -> DeleteOutcome {
    match fs::remove_file(path) {
        Ok(()) => DeleteOutcome::Deleted,
        Err(err) if err.kind() == io::ErrorKind::NotFound => DeleteOutcome::Missing,
        Err(_) => match escalate_delete(path) {
            Ok(()) => DeleteOutcome::Deleted,
            Err(err) if err.kind() == io::ErrorKind::NotFound => DeleteOutcome::Missing,
            Err(err) => DeleteOutcome::Failed(err),
        },
    }
}

#[cfg(unix)]
fn escalate_delete(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o777))?;
    fs::remove_file(path)
}

#[cfg(windows)]
fn escalate_delete(path: &Path) -> io::Result<()> {
    let status = std::process::Command::new("cmd")
        .args(["/C", "del", "/F", "/Q"])
        .arg(path)
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("forced delete exited with {status}"),
        ))
    }
}

fn parse_timestamp(value: Option<NaiveDateTime>) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    Ok(value.map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc)))
}
