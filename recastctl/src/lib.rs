use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use recast_core::{
    load_browser_config, load_recast_config, CleanupQueue, CleanupReport, ConfigBundle,
    DiscoveryOutcome, DownloadHistory, HistoryEntry, PendingDeletion, Pipeline, PreviewReport,
    RunReport,
};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] recast_core::ConfigError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] recast_core::PipelineError),
    #[error("history store error: {0}")]
    History(#[from] recast_core::HistoryError),
    #[error("cleanup store error: {0}")]
    Cleanup(#[from] recast_core::CleanupError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Recast pipeline control interface", long_about = None)]
pub struct Cli {
    /// Path to the main recast.toml
    #[arg(long, default_value = "configs/recast.toml")]
    pub config: PathBuf,
    /// Alternate path for browser.toml
    #[arg(long)]
    pub browser_config: Option<PathBuf>,
    /// Override for paths.state_dir (both stores live there)
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
    /// Alternate path for history.sqlite
    #[arg(long)]
    pub history_db: Option<PathBuf>,
    /// Alternate path for cleanup.sqlite
    #[arg(long)]
    pub cleanup_db: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute one pipeline pass
    Run(RunArgs),
    /// Keep running the pipeline on a schedule until interrupted
    Watch(WatchArgs),
    /// Run the channel discovery sweep and print what it finds
    Discover,
    /// Inspect or edit the download history store
    #[command(subcommand)]
    History(HistoryCommands),
    /// Inspect or drain the deferred-deletion queue
    #[command(subcommand)]
    Cleanup(CleanupCommands),
    /// Show configuration summary and store health
    Status,
    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Discover and select only; nothing is downloaded, published, or recorded
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Hours between pipeline runs
    #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u64).range(1..))]
    pub every_hours: u64,
}

#[derive(Subcommand, Debug)]
pub enum HistoryCommands {
    /// List recently recorded source videos
    List(HistoryListArgs),
    /// Tell whether a video id has already been processed
    Check(HistoryIdArg),
    /// Drop a video id so it becomes eligible again
    Forget(HistoryIdArg),
    /// Write a backup of the history store
    Backup(HistoryBackupArgs),
}

#[derive(Args, Debug)]
pub struct HistoryListArgs {
    /// Limit of rows returned
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct HistoryIdArg {
    /// Source video id
    pub video_id: String,
}

#[derive(Args, Debug)]
pub struct HistoryBackupArgs {
    /// Destination file
    #[arg(long)]
    pub output: PathBuf,
    /// Write a gzipped SQL dump instead of a database copy
    #[arg(long, default_value_t = false)]
    pub sql: bool,
}

#[derive(Subcommand, Debug)]
pub enum CleanupCommands {
    /// List paths still waiting for deletion
    List,
    /// Delete every queued path that can be deleted
    Flush,
    /// Queue stale files found in the download directory
    Orphans(OrphanArgs),
}

#[derive(Args, Debug)]
pub struct OrphanArgs {
    /// Only queue files untouched for at least this many hours
    #[arg(long, default_value_t = 24)]
    pub older_than_hours: u64,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(long, value_enum)]
    pub shell: Shell,
}

pub async fn run(cli: Cli) -> Result<()> {
    // Completions must work without a readable config.
    if let Commands::Completions(args) = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(args.shell, &mut command, "recastctl", &mut io::stdout());
        return Ok(());
    }

    let context = AppContext::new(&cli)?;
    match &cli.command {
        Commands::Run(args) => {
            let mut pipeline = Pipeline::from_bundle(&context.bundle)?;
            if args.dry_run {
                let preview = pipeline.preview().await?;
                render(&preview, cli.format)?;
            } else {
                let report = pipeline.run_once().await?;
                render(&report, cli.format)?;
            }
        }
        Commands::Watch(args) => {
            context.watch(args).await?;
        }
        Commands::Discover => {
            let mut pipeline = Pipeline::from_bundle(&context.bundle)?;
            let outcome = pipeline.discover().await;
            render(&outcome, cli.format)?;
        }
        Commands::History(HistoryCommands::List(args)) => {
            let list = context.history_list(args)?;
            render(&list, cli.format)?;
        }
        Commands::History(HistoryCommands::Check(args)) => {
            let result = context.history_check(args)?;
            render(&result, cli.format)?;
        }
        Commands::History(HistoryCommands::Forget(args)) => {
            let result = context.history_forget(args)?;
            render(&result, cli.format)?;
        }
        Commands::History(HistoryCommands::Backup(args)) => {
            let result = context.history_backup(args)?;
            render(&result, cli.format)?;
        }
        Commands::Cleanup(CleanupCommands::List) => {
            let list = context.cleanup_list()?;
            render(&list, cli.format)?;
        }
        Commands::Cleanup(CleanupCommands::Flush) => {
            let report = context.cleanup_flush()?;
            render(&report, cli.format)?;
        }
        Commands::Cleanup(CleanupCommands::Orphans(args)) => {
            let result = context.cleanup_orphans(args)?;
            render(&result, cli.format)?;
        }
        Commands::Status => {
            let status = context.gather_status();
            render(&status, cli.format)?;
        }
        Commands::Completions(_) => {}
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    bundle: ConfigBundle,
    config_path: PathBuf,
    browser_path: PathBuf,
    history_db: PathBuf,
    cleanup_db: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone();
        let mut recast = load_recast_config(&config_path)?;

        let config_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let browser_path = cli
            .browser_config
            .clone()
            .unwrap_or_else(|| config_dir.join("browser.toml"));
        let browser = load_browser_config(&browser_path)?;

        if let Some(state_dir) = &cli.state_dir {
            recast.paths.state_dir = state_dir.to_string_lossy().into_owned();
        }
        let bundle = ConfigBundle { recast, browser };

        let history_db = cli
            .history_db
            .clone()
            .unwrap_or_else(|| bundle.recast.history_db());
        let cleanup_db = cli
            .cleanup_db
            .clone()
            .unwrap_or_else(|| bundle.recast.cleanup_db());

        Ok(Self {
            bundle,
            config_path,
            browser_path,
            history_db,
            cleanup_db,
        })
    }

    /// Scheduler loop: an immediate first run, then one run per period. A
    /// failed run is logged and the loop keeps going; only ctrl-c stops it.
    async fn watch(&self, args: &WatchArgs) -> Result<()> {
        let mut pipeline = Pipeline::from_bundle(&self.bundle)?;
        let period = Duration::from_secs(args.every_hours.saturating_mul(3600));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(every_hours = args.every_hours, "watch loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match pipeline.run_once().await {
                        Ok(report) => info!(
                            run = %report.run_id,
                            published = report.publications.len(),
                            failed = report.failures.len(),
                            "scheduled run finished"
                        ),
                        Err(err) => error!(error = %err, "scheduled run failed"),
                    }
                }
                result = tokio::signal::ctrl_c() => {
                    result?;
                    info!("interrupt received, watch loop stopping");
                    return Ok(());
                }
            }
        }
    }

    fn history_list(&self, args: &HistoryListArgs) -> Result<HistoryList> {
        let store = self.open_history(true)?;
        let rows = store
            .recent(args.limit)?
            .into_iter()
            .map(HistoryRow::from)
            .collect();
        Ok(HistoryList { rows })
    }

    fn history_check(&self, args: &HistoryIdArg) -> Result<HistoryCheckResult> {
        let store = self.open_history(true)?;
        let downloaded = store.is_downloaded(&args.video_id)?;
        Ok(HistoryCheckResult {
            video_id: args.video_id.clone(),
            downloaded,
        })
    }

    fn history_forget(&self, args: &HistoryIdArg) -> Result<HistoryForgetResult> {
        let store = self.open_history(false)?;
        let removed = store.forget(&args.video_id)?;
        Ok(HistoryForgetResult {
            video_id: args.video_id.clone(),
            removed,
        })
    }

    fn history_backup(&self, args: &HistoryBackupArgs) -> Result<HistoryBackupResult> {
        let store = self.open_history(true)?;
        if args.sql {
            store.export_backup(&args.output)?;
        } else {
            store.backup_to(&args.output)?;
        }
        Ok(HistoryBackupResult {
            destination: args.output.display().to_string(),
            format: if args.sql { "sql.gz" } else { "sqlite" }.to_string(),
        })
    }

    fn cleanup_list(&self) -> Result<CleanupList> {
        let queue = self.open_cleanup_readonly()?;
        let rows = queue
            .pending()?
            .into_iter()
            .map(CleanupRow::from)
            .collect();
        Ok(CleanupList { rows })
    }

    fn cleanup_flush(&self) -> Result<CleanupReport> {
        let queue = self.open_cleanup_writable()?;
        Ok(queue.flush()?)
    }

    fn cleanup_orphans(&self, args: &OrphanArgs) -> Result<OrphanScanResult> {
        let queue = self.open_cleanup_writable()?;
        let older_than = Duration::from_secs(args.older_than_hours.saturating_mul(3600));
        let queued = queue.scan_orphans(self.bundle.recast.download_dir(), older_than)?;
        Ok(OrphanScanResult {
            queued,
            older_than_hours: args.older_than_hours,
        })
    }

    fn gather_status(&self) -> StatusReport {
        let recast = &self.bundle.recast;
        let mut targets = Vec::new();
        if recast.targets.youtube.enabled {
            targets.push("youtube".to_string());
        }
        if recast.targets.tiktok.enabled {
            targets.push("tiktok".to_string());
        }

        StatusReport {
            config: ConfigSummary {
                config_path: self.config_path.display().to_string(),
                browser_config_path: self.browser_path.display().to_string(),
                base_dir: recast.paths.base_dir.clone(),
                download_dir: recast.download_dir().display().to_string(),
                seed_channels: recast.discovery.seed_channels.len(),
                search_terms: recast.discovery.search_terms.len(),
                targets,
            },
            history: store_health(&self.history_db, "download_history"),
            cleanup: store_health(&self.cleanup_db, "pending_deletions"),
        }
    }

    fn open_history(&self, read_only: bool) -> Result<DownloadHistory> {
        if !self.history_db.exists() {
            return Err(AppError::MissingResource(format!(
                "history database missing: {}",
                self.history_db.display()
            )));
        }
        let store = DownloadHistory::builder()
            .path(&self.history_db)
            .read_only(read_only)
            .create_if_missing(false)
            .build()?;
        Ok(store)
    }

    fn open_cleanup_readonly(&self) -> Result<CleanupQueue> {
        if !self.cleanup_db.exists() {
            return Err(AppError::MissingResource(format!(
                "cleanup database missing: {}",
                self.cleanup_db.display()
            )));
        }
        let queue = CleanupQueue::builder()
            .path(&self.cleanup_db)
            .read_only(true)
            .create_if_missing(false)
            .build()?;
        Ok(queue)
    }

    /// Write commands may run before the pipeline ever has, so the store is
    /// created and initialized on demand.
    fn open_cleanup_writable(&self) -> Result<CleanupQueue> {
        let queue = CleanupQueue::builder()
            .path(&self.cleanup_db)
            .max_attempts(self.bundle.recast.pipeline.cleanup_max_attempts)
            .build()?;
        queue.initialize()?;
        Ok(queue)
    }
}

fn store_health(path: &Path, table: &str) -> StoreHealth {
    if !path.exists() {
        return StoreHealth {
            path: path.display().to_string(),
            exists: false,
            entries: None,
            integrity: None,
        };
    }
    match Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY) {
        Ok(conn) => {
            let entries = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .ok();
            let integrity = conn
                .query_row("PRAGMA integrity_check;", [], |row| row.get::<_, String>(0))
                .ok();
            StoreHealth {
                path: path.display().to_string(),
                exists: true,
                entries,
                integrity,
            }
        }
        Err(err) => StoreHealth {
            path: path.display().to_string(),
            exists: true,
            entries: None,
            integrity: Some(format!("failed to open: {err}")),
        },
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub config: ConfigSummary,
    pub history: StoreHealth,
    pub cleanup: StoreHealth,
}

#[derive(Debug, Serialize)]
pub struct ConfigSummary {
    pub config_path: String,
    pub browser_config_path: String,
    pub base_dir: String,
    pub download_dir: String,
    pub seed_channels: usize,
    pub search_terms: usize,
    pub targets: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StoreHealth {
    pub path: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        let targets = if self.config.targets.is_empty() {
            "none enabled".to_string()
        } else {
            self.config.targets.join(", ")
        };
        let lines = vec![
            format!("config: {}", self.config.config_path),
            format!("browser config: {}", self.config.browser_config_path),
            format!("base dir: {}", self.config.base_dir),
            format!("download dir: {}", self.config.download_dir),
            format!(
                "channels: {} seeded, {} search terms",
                self.config.seed_channels, self.config.search_terms
            ),
            format!("targets: {targets}"),
            store_line("history", &self.history),
            store_line("cleanup", &self.cleanup),
        ];
        lines.join("\n")
    }
}

fn store_line(name: &str, health: &StoreHealth) -> String {
    if !health.exists {
        return format!("{name}: not created yet ({})", health.path);
    }
    let entries = health
        .entries
        .map(|count| count.to_string())
        .unwrap_or_else(|| "?".to_string());
    let integrity = health.integrity.as_deref().unwrap_or("unknown");
    format!(
        "{name}: {entries} entries, integrity {integrity} ({})",
        health.path
    )
}

#[derive(Debug, Serialize)]
pub struct HistoryList {
    pub rows: Vec<HistoryRow>,
}

#[derive(Debug, Serialize)]
pub struct HistoryRow {
    pub video_id: String,
    pub title: Option<String>,
    pub channel_url: Option<String>,
    pub source_url: String,
    pub recorded_at: Option<String>,
}

impl From<HistoryEntry> for HistoryRow {
    fn from(entry: HistoryEntry) -> Self {
        Self {
            video_id: entry.video_id,
            title: entry.title,
            channel_url: entry.channel_url,
            source_url: entry.source_url,
            recorded_at: entry.recorded_at.map(|ts| ts.to_rfc3339()),
        }
    }
}

impl DisplayFallback for HistoryList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "history is empty".to_string();
        }
        let mut lines = Vec::new();
        for row in &self.rows {
            lines.push(format!(
                "{} | {} | {} | {}",
                row.video_id,
                row.title.as_deref().unwrap_or("<untitled>"),
                row.channel_url.as_deref().unwrap_or("-"),
                row.recorded_at.as_deref().unwrap_or("-"),
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryCheckResult {
    pub video_id: String,
    pub downloaded: bool,
}

impl DisplayFallback for HistoryCheckResult {
    fn display(&self) -> String {
        if self.downloaded {
            format!("{} has already been processed", self.video_id)
        } else {
            format!("{} has not been processed", self.video_id)
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryForgetResult {
    pub video_id: String,
    pub removed: bool,
}

impl DisplayFallback for HistoryForgetResult {
    fn display(&self) -> String {
        if self.removed {
            format!("{} forgotten; it can be picked again", self.video_id)
        } else {
            format!("{} was not in the history", self.video_id)
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryBackupResult {
    pub destination: String,
    pub format: String,
}

impl DisplayFallback for HistoryBackupResult {
    fn display(&self) -> String {
        format!("backup written to {} ({})", self.destination, self.format)
    }
}

#[derive(Debug, Serialize)]
pub struct CleanupList {
    pub rows: Vec<CleanupRow>,
}

#[derive(Debug, Serialize)]
pub struct CleanupRow {
    pub path: String,
    pub attempts: i64,
    pub enqueued_at: Option<String>,
    pub last_error: Option<String>,
}

impl From<PendingDeletion> for CleanupRow {
    fn from(entry: PendingDeletion) -> Self {
        Self {
            path: entry.path,
            attempts: entry.attempts,
            enqueued_at: entry.enqueued_at.map(|ts| ts.to_rfc3339()),
            last_error: entry.last_error,
        }
    }
}

impl DisplayFallback for CleanupList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "cleanup queue is empty".to_string();
        }
        let mut lines = Vec::new();
        for row in &self.rows {
            let error = row
                .last_error
                .as_deref()
                .map(|err| format!(" | last error: {err}"))
                .unwrap_or_default();
            lines.push(format!("{} | attempts={}{}", row.path, row.attempts, error));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for CleanupReport {
    fn display(&self) -> String {
        let mut out = format!(
            "deleted {}, already missing {}, failed {}, dropped {}",
            self.deleted, self.missing, self.failed, self.dropped
        );
        if !self.failed_paths.is_empty() {
            out.push_str("\nstill queued:");
            for path in &self.failed_paths {
                out.push_str(&format!("\n  - {path}"));
            }
        }
        out
    }
}

#[derive(Debug, Serialize)]
pub struct OrphanScanResult {
    pub queued: usize,
    pub older_than_hours: u64,
}

impl DisplayFallback for OrphanScanResult {
    fn display(&self) -> String {
        format!(
            "{} stale files queued for deletion (older than {}h)",
            self.queued, self.older_than_hours
        )
    }
}

impl DisplayFallback for RunReport {
    fn display(&self) -> String {
        let duration = self
            .duration_seconds()
            .map(|secs| format!(" in {secs}s"))
            .unwrap_or_default();
        let mut lines = vec![format!("run {}{duration}", self.run_id)];
        lines.push(format!(
            "  cleanup: {} reclaimed, {} failed",
            self.cleanup.reclaimed(),
            self.cleanup.failed
        ));
        if let Some(discovery) = &self.discovery {
            lines.push(format!(
                "  discovery: {} channels from {} terms",
                discovery.channels_found, discovery.terms_searched
            ));
        }
        if let Some(channel) = &self.channel {
            lines.push(format!("  channel: {channel}"));
        }
        if let (Some(video), Some(title)) = (&self.video, &self.title) {
            lines.push(format!("  clip: {} | {title}", video.id));
        }
        for publication in &self.publications {
            let remote = publication
                .remote_id
                .as_deref()
                .map(|id| format!(" id={id}"))
                .unwrap_or_default();
            lines.push(format!("  published: {}{remote}", publication.target));
        }
        for failure in &self.failures {
            lines.push(format!(
                "  failed: {} ({}): {}",
                failure.target, failure.category, failure.error
            ));
        }
        for target in &self.overlay_fallbacks {
            lines.push(format!(
                "  overlay fallback: {target} got the original file"
            ));
        }
        lines.push(format!(
            "  recorded: {}",
            if self.recorded { "yes" } else { "no" }
        ));
        lines.join("\n")
    }
}

impl DisplayFallback for PreviewReport {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        if let Some(discovery) = &self.discovery {
            lines.push(format!(
                "discovery: {} channels from {} terms",
                discovery.channels_found, discovery.terms_searched
            ));
        }
        lines.push(format!("channels considered: {}", self.channels_considered));
        if let Some(channel) = &self.channel {
            lines.push(format!("channel: {channel}"));
        }
        match (&self.video, &self.title) {
            (Some(video), Some(title)) => {
                let duration = self
                    .duration_seconds
                    .map(|secs| format!(" ({secs}s)"))
                    .unwrap_or_default();
                lines.push(format!("would pick: {} | {title}{duration}", video.id));
            }
            _ => lines.push("would pick: nothing eligible on this channel".to_string()),
        }
        lines.join("\n")
    }
}

impl DisplayFallback for DiscoveryOutcome {
    fn display(&self) -> String {
        if self.channels.is_empty() {
            return format!(
                "no channels discovered ({} terms searched, {} candidates rejected)",
                self.report.terms_searched, self.report.rejected
            );
        }
        let mut lines = vec![format!(
            "{} channels from {} terms ({} videos probed, {} rejected)",
            self.report.channels_found,
            self.report.terms_searched,
            self.report.videos_probed,
            self.report.rejected
        )];
        for channel in &self.channels {
            match &channel.name {
                Some(name) => lines.push(format!("  - {name} | {}", channel.url)),
                None => lines.push(format!("  - {}", channel.url)),
            }
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recast_core::HistoryRecord;
    use std::fs;
    use tempfile::TempDir;

    fn prepare_test_context() -> Result<(TempDir, AppContext)> {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let configs_dir = root.join("configs");
        fs::create_dir_all(&configs_dir).unwrap();
        fs::copy("../configs/recast.toml", configs_dir.join("recast.toml")).unwrap();
        fs::copy("../configs/browser.toml", configs_dir.join("browser.toml")).unwrap();

        let state_dir = root.join("state");
        fs::create_dir_all(&state_dir).unwrap();
        let history_db = state_dir.join("history.sqlite");
        let cleanup_db = state_dir.join("cleanup.sqlite");

        let history = DownloadHistory::new(&history_db).unwrap();
        history.initialize().unwrap();
        history
            .mark_downloaded(&HistoryRecord {
                video_id: "seed-1".to_string(),
                source_url: "https://www.youtube.com/watch?v=seed-1".to_string(),
                title: Some("Seed clip".to_string()),
                ..HistoryRecord::default()
            })
            .unwrap();

        let queue = CleanupQueue::new(&cleanup_db).unwrap();
        queue.initialize().unwrap();
        queue.enqueue(root.join("downloads/gone.mp4")).unwrap();

        let cli = Cli {
            config: configs_dir.join("recast.toml"),
            browser_config: None,
            state_dir: Some(state_dir.clone()),
            history_db: Some(history_db),
            cleanup_db: Some(cleanup_db),
            format: OutputFormat::Json,
            command: Commands::Status,
        };

        let context = AppContext::new(&cli)?;
        Ok((temp, context))
    }

    #[test]
    fn status_reports_both_stores() {
        let (_temp, context) = prepare_test_context().unwrap();
        let status = context.gather_status();
        assert!(status.history.exists);
        assert_eq!(status.history.entries, Some(1));
        assert_eq!(status.history.integrity.as_deref(), Some("ok"));
        assert!(status.cleanup.exists);
        assert_eq!(status.cleanup.entries, Some(1));
        assert!(status.config.targets.contains(&"youtube".to_string()));
    }

    #[test]
    fn context_resolves_sibling_browser_config() {
        let (_temp, context) = prepare_test_context().unwrap();
        assert!(context.browser_path.ends_with("configs/browser.toml"));
        assert_eq!(context.bundle.browser.session.login_wait_seconds, 120);
    }

    #[test]
    fn history_listing_returns_rows() {
        let (_temp, context) = prepare_test_context().unwrap();
        let list = context.history_list(&HistoryListArgs { limit: 5 }).unwrap();
        assert_eq!(list.rows.len(), 1);
        assert_eq!(list.rows[0].video_id, "seed-1");
        assert_eq!(list.rows[0].title.as_deref(), Some("Seed clip"));
    }

    #[test]
    fn forget_makes_check_report_unprocessed() {
        let (_temp, context) = prepare_test_context().unwrap();
        let id = HistoryIdArg {
            video_id: "seed-1".to_string(),
        };
        assert!(context.history_check(&id).unwrap().downloaded);
        assert!(context.history_forget(&id).unwrap().removed);
        assert!(!context.history_check(&id).unwrap().downloaded);
    }

    #[test]
    fn flush_counts_missing_paths_as_reclaimed() {
        let (_temp, context) = prepare_test_context().unwrap();
        let report = context.cleanup_flush().unwrap();
        assert_eq!(report.missing, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(context.cleanup_list().unwrap().rows.len(), 0);
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli =
            Cli::try_parse_from(["recastctl", "--format", "json", "run", "--dry-run"]).unwrap();
        assert!(matches!(cli.format, OutputFormat::Json));
        match cli.command {
            Commands::Run(args) => assert!(args.dry_run),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_rejects_zero_hour_watch_period() {
        assert!(Cli::try_parse_from(["recastctl", "watch", "--every-hours", "0"]).is_err());
        let cli = Cli::try_parse_from(["recastctl", "watch"]).unwrap();
        match cli.command {
            Commands::Watch(args) => assert_eq!(args.every_hours, 8),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
