//! # CLI Module
//!
//! Command-line interface for the media analysis cache.
//!
//! ## Usage
//! ```bash
//! # Profile every media file under a folder, two at a time
//! media-analyzer analyze ~/Videos --max-parallel 2
//!
//! # Re-run even if a cached result exists
//! media-analyzer analyze movie.mkv --force --param window_bytes=262144
//!
//! # Inspect the stores
//! media-analyzer jobs list --limit 10
//! media-analyzer cache stats --output json
//!
//! # Drop cache entries as files change
//! media-analyzer watch ~/Videos
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use media_analyzer::core::cache::{CacheBackend, CacheStats, SqliteCache};
use media_analyzer::core::jobs::{Job, JobRepository, JobStats, JobStatus, JobType};
use media_analyzer::core::scanner::{MediaScanner, ScanConfig};
use media_analyzer::core::service::{
    AnalysisOutcome, AnalysisService, ServiceConfig, ServiceConfigBuilder,
};
use media_analyzer::core::watcher::{CacheInvalidator, WatcherConfig};
use media_analyzer::core::worker::WorkerRegistry;
use media_analyzer::error::{AnalyzerError, Result};
use media_analyzer::events::{Event, EventBus, EventReceiver, JobEvent, WatcherEvent};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Media Analyzer - cached media analysis with a background job queue
#[derive(Parser, Debug)]
#[command(name = "media-analyzer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct StoreArgs {
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding cache.db and jobs.db
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze media files, serving cached results where possible
    Analyze {
        /// Files or directories (directories are scanned for media)
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Analysis to run
        #[arg(short, long, default_value = "bitrate")]
        kind: Kind,

        /// Analysis parameter as key=value (repeatable)
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Jobs allowed to run at once
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Ignore cached results and analyze again
        #[arg(short, long)]
        force: bool,

        /// Include hidden files when scanning directories
        #[arg(long)]
        include_hidden: bool,

        /// Output format
        #[arg(short, long, default_value = "pretty")]
        output: OutputFormat,
    },

    /// Inspect or clear job records
    Jobs {
        #[command(subcommand)]
        command: JobsCommand,
    },

    /// Inspect or clear cached analyses
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },

    /// Sweep old jobs plus expired and orphaned cache entries
    Maintain,

    /// Watch folders and drop cache entries for media that changes
    Watch {
        #[arg(required = true)]
        dirs: Vec<PathBuf>,

        /// Quiet period before a changed file is invalidated
        #[arg(long, default_value = "500")]
        debounce_ms: u64,
    },
}

#[derive(Subcommand, Debug)]
enum JobsCommand {
    /// Most recent jobs first
    List {
        #[arg(short, long, default_value = "20")]
        limit: usize,

        #[arg(short, long, default_value = "pretty")]
        output: OutputFormat,
    },
    /// Counts by status and type
    Stats {
        #[arg(short, long, default_value = "pretty")]
        output: OutputFormat,
    },
    /// Delete finished job records
    Clear,
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Entry, point and size totals
    Stats {
        #[arg(short, long, default_value = "pretty")]
        output: OutputFormat,
    },
    /// Delete every cached analysis
    Clear,
    /// Delete cached analyses for specific files
    Invalidate {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    /// Full-file bitrate profile
    Bitrate,
    /// Per-stream demux inspection
    Streams,
    /// Stream-removal transcode
    Removal,
}

impl From<Kind> for JobType {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Bitrate => JobType::BitrateAnalysis,
            Kind::Streams => JobType::StreamAnalysis,
            Kind::Removal => JobType::StreamRemoval,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Human-readable output with colors
    Pretty,
    /// JSON output for scripting
    Json,
}

/// Run the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.store)?;

    match cli.command {
        Commands::Analyze {
            paths,
            kind,
            params,
            max_parallel,
            force,
            include_hidden,
            output,
        } => {
            let mut builder = ServiceConfigBuilder::from_config(config);
            if let Some(max_parallel) = max_parallel {
                builder = builder.max_parallel(max_parallel);
            }
            let request = AnalyzeRequest {
                paths,
                job_type: kind.into(),
                params: parse_params(&params)?,
                force,
                include_hidden,
                output,
            };
            run_analyze(builder.build(), request)
        }
        Commands::Jobs { command } => run_jobs(&config, command),
        Commands::Cache { command } => run_cache(&config, command),
        Commands::Maintain => run_maintain(config),
        Commands::Watch { dirs, debounce_ms } => run_watch(&config, dirs, debounce_ms),
    }
}

fn load_config(store: &StoreArgs) -> Result<ServiceConfig> {
    let config = match store.config {
        Some(ref path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };
    let mut builder = ServiceConfigBuilder::from_config(config);
    if let Some(ref dir) = store.data_dir {
        builder = builder.data_dir(dir);
    }
    Ok(builder.build())
}

/// Turn `key=value` pairs into a params object. Values that parse as JSON
/// keep their type; anything else is a string.
fn parse_params(pairs: &[String]) -> Result<serde_json::Value> {
    let mut params = serde_json::Map::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .filter(|(key, _)| !key.trim().is_empty())
            .ok_or_else(|| AnalyzerError::Config(format!("expected KEY=VALUE, got '{}'", pair)))?;
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        params.insert(key.trim().to_string(), value);
    }
    Ok(serde_json::Value::Object(params))
}

struct AnalyzeRequest {
    paths: Vec<PathBuf>,
    job_type: JobType,
    params: serde_json::Value,
    force: bool,
    include_hidden: bool,
    output: OutputFormat,
}

fn run_analyze(config: ServiceConfig, request: AnalyzeRequest) -> Result<()> {
    let term = Term::stderr();
    let pretty = request.output == OutputFormat::Pretty;

    let scanner = MediaScanner::new(ScanConfig {
        include_hidden: request.include_hidden,
        ..Default::default()
    });
    let scan = scanner.scan(&request.paths);
    for error in &scan.errors {
        term.write_line(&format!("{} {}", style("!").yellow(), error)).ok();
    }
    let files: Vec<PathBuf> = scan.files.into_iter().map(|f| f.path).collect();

    if files.is_empty() {
        if pretty {
            term.write_line(&format!("{}", style("No media files found.").dim())).ok();
        } else {
            println!("[]");
        }
        return Ok(());
    }

    let service = AnalysisService::open(config, WorkerRegistry::with_defaults())?;
    let recovered = service.recovered();
    if pretty && recovered.failed + recovered.cancelled > 0 {
        term.write_line(&format!(
            "{} closed out {} interrupted and {} waiting jobs from an earlier run",
            style("i").cyan(),
            recovered.failed,
            recovered.cancelled
        ))
        .ok();
    }

    // Subscribe before submitting so no terminal event is missed
    let events = service.subscribe();

    let outcomes: Vec<(PathBuf, Result<AnalysisOutcome>)> = if request.force {
        files
            .iter()
            .map(|path| {
                let outcome = service.force_reanalyze(path, request.job_type, &request.params);
                (path.clone(), outcome)
            })
            .collect()
    } else {
        service.analyze_batch(&files, request.job_type, &request.params)
    };

    let pending: HashSet<String> = outcomes
        .iter()
        .filter_map(|(_, outcome)| outcome.as_ref().ok().and_then(|o| o.job_id()))
        .map(str::to_string)
        .collect();

    let progress = pretty.then(|| {
        let pb = ProgressBar::new(pending.len() as u64);
        let template = "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}";
        if let Ok(bar_style) = ProgressStyle::default_bar().template(template) {
            pb.set_style(bar_style.progress_chars("█▓░"));
        }
        pb
    });

    wait_for_jobs(&service, &events, pending, progress.as_ref())?;
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    let rows = collect_rows(&service, outcomes);
    match request.output {
        OutputFormat::Pretty => print_analysis_pretty(&term, &rows),
        OutputFormat::Json => print_json(&rows)?,
    }

    service.shutdown()?;
    Ok(())
}

/// Drive the progress bar from the event stream until every job is terminal
fn wait_for_jobs(
    service: &AnalysisService,
    events: &EventReceiver,
    mut pending: HashSet<String>,
    progress: Option<&ProgressBar>,
) -> Result<()> {
    while !pending.is_empty() {
        match events.recv_timeout(Duration::from_millis(250)) {
            Ok(Event::Job(JobEvent::Progress(p))) => {
                if let Some(pb) = progress {
                    let stage = p.stage.unwrap_or_default();
                    pb.set_message(format!("{} {}%", stage, p.percentage));
                }
            }
            Ok(Event::Job(event)) if event.is_terminal() => {
                if pending.remove(event.job_id()) {
                    if let Some(pb) = progress {
                        pb.inc(1);
                    }
                }
            }
            Ok(_) => {}
            Err(_) => {
                // Fall back to the store in case the bus dropped an event
                let mut finished = Vec::new();
                for job_id in &pending {
                    if service.job(job_id)?.is_some_and(|job| job.status.is_terminal()) {
                        finished.push(job_id.clone());
                    }
                }
                for job_id in finished {
                    pending.remove(&job_id);
                    if let Some(pb) = progress {
                        pb.inc(1);
                    }
                }
            }
        }
    }
    Ok(())
}

#[derive(Debug, serde::Serialize)]
struct AnalysisRow {
    path: PathBuf,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn collect_rows(
    service: &AnalysisService,
    outcomes: Vec<(PathBuf, Result<AnalysisOutcome>)>,
) -> Vec<AnalysisRow> {
    outcomes
        .into_iter()
        .map(|(path, outcome)| match outcome {
            Ok(AnalysisOutcome::Cached(entry)) => AnalysisRow {
                path,
                status: "cached".to_string(),
                job_id: None,
                result: Some(entry.payload.summary()),
                error: None,
            },
            Ok(AnalysisOutcome::Queued { job_id, .. }) => match service.job(&job_id) {
                Ok(Some(job)) => AnalysisRow {
                    path,
                    status: job.status.to_string(),
                    job_id: Some(job_id),
                    result: job.result,
                    error: job.error_message,
                },
                Ok(None) => AnalysisRow {
                    path,
                    status: "unknown".to_string(),
                    job_id: Some(job_id),
                    result: None,
                    error: None,
                },
                Err(e) => AnalysisRow {
                    path,
                    status: "unknown".to_string(),
                    job_id: Some(job_id),
                    result: None,
                    error: Some(e.to_string()),
                },
            },
            Ok(AnalysisOutcome::Rejected(reason)) => AnalysisRow {
                path,
                status: "rejected".to_string(),
                job_id: None,
                result: None,
                error: Some(reason.to_string()),
            },
            Err(e) => AnalysisRow {
                path,
                status: "error".to_string(),
                job_id: None,
                result: None,
                error: Some(e.to_string()),
            },
        })
        .collect()
}

fn print_analysis_pretty(term: &Term, rows: &[AnalysisRow]) {
    term.write_line("").ok();
    for row in rows {
        let marker = match row.status.as_str() {
            "cached" => style("●").cyan(),
            "completed" => style("✓").green(),
            "cancelled" => style("○").dim(),
            _ => style("✗").red(),
        };
        term.write_line(&format!(
            "{} {} {}",
            marker,
            display_path(&row.path),
            style(format!("({})", row.status)).dim()
        ))
        .ok();

        if let Some(ref result) = row.result {
            if let Some(avg) = result.get("average_bitrate").and_then(|v| v.as_f64()) {
                let peak = result.get("peak_bitrate").and_then(|v| v.as_f64()).unwrap_or(avg);
                term.write_line(&format!(
                    "    avg {}  peak {}",
                    style(format_bitrate(avg)).yellow(),
                    format_bitrate(peak)
                ))
                .ok();
            }
        }
        if let Some(ref error) = row.error {
            term.write_line(&format!("    {}", style(error).red())).ok();
        }
    }

    let cached = rows.iter().filter(|r| r.status == "cached").count();
    let completed = rows.iter().filter(|r| r.status == "completed").count();
    term.write_line("").ok();
    term.write_line(&format!(
        "{} {} files: {} from cache, {} analyzed, {} not analyzed",
        style("Done.").bold(),
        style(rows.len()).cyan(),
        style(cached).cyan(),
        style(completed).green(),
        rows.len() - cached - completed
    ))
    .ok();
}

fn run_jobs(config: &ServiceConfig, command: JobsCommand) -> Result<()> {
    // Read-only commands open the store directly so a running analyzer's
    // jobs are not closed out as interrupted
    let jobs = JobRepository::open(&config.jobs_db)?;
    let term = Term::stdout();

    match command {
        JobsCommand::List { limit, output } => {
            let recent = jobs.list_recent(limit)?;
            match output {
                OutputFormat::Pretty => print_jobs_pretty(&term, &recent),
                OutputFormat::Json => print_json(&recent)?,
            }
        }
        JobsCommand::Stats { output } => {
            let stats = jobs.statistics()?;
            match output {
                OutputFormat::Pretty => print_job_stats(&term, &stats),
                OutputFormat::Json => print_json(&stats)?,
            }
        }
        JobsCommand::Clear => {
            let removed = jobs.delete_all()?;
            term.write_line(&format!("Removed {} finished jobs", style(removed).cyan())).ok();
        }
    }
    Ok(())
}

fn print_jobs_pretty(term: &Term, jobs: &[Job]) {
    if jobs.is_empty() {
        term.write_line(&format!("{}", style("No jobs recorded.").dim())).ok();
        return;
    }
    for job in jobs {
        let status = match job.status {
            JobStatus::Completed => style(job.status.as_str()).green(),
            JobStatus::Failed => style(job.status.as_str()).red(),
            JobStatus::Running => style(job.status.as_str()).yellow(),
            _ => style(job.status.as_str()).dim(),
        };
        term.write_line(&format!(
            "{}  {:<16} {:<9} {:>3}%  {}",
            style(&job.id[..job.id.len().min(8)]).dim(),
            job.job_type.as_str(),
            status,
            job.progress,
            display_path(&job.file_path)
        ))
        .ok();
        if let Some(ref message) = job.error_message {
            term.write_line(&format!("          {}", style(message).red())).ok();
        }
    }
}

fn print_job_stats(term: &Term, stats: &JobStats) {
    term.write_line(&format!("{}", style("Jobs").bold().underlined())).ok();
    term.write_line(&format!("  total      {}", style(stats.total).cyan())).ok();
    term.write_line(&format!("  pending    {}", stats.pending)).ok();
    term.write_line(&format!("  running    {}", stats.running)).ok();
    term.write_line(&format!("  completed  {}", style(stats.completed).green())).ok();
    term.write_line(&format!("  failed     {}", style(stats.failed).red())).ok();
    term.write_line(&format!("  cancelled  {}", stats.cancelled)).ok();
    for (job_type, count) in &stats.by_type {
        term.write_line(&format!("  {:<18} {}", style(job_type).dim(), count)).ok();
    }
}

fn run_cache(config: &ServiceConfig, command: CacheCommand) -> Result<()> {
    let cache = SqliteCache::open(&config.cache_db)?.with_batch_size(config.batch_size);
    let term = Term::stdout();

    match command {
        CacheCommand::Stats { output } => {
            let stats = cache.statistics()?;
            match output {
                OutputFormat::Pretty => print_cache_stats(&term, &stats),
                OutputFormat::Json => print_json(&stats)?,
            }
        }
        CacheCommand::Clear => {
            let removed = cache.clear_all()?;
            term.write_line(&format!("Removed {} cache entries", style(removed).cyan())).ok();
        }
        CacheCommand::Invalidate { paths } => {
            let mut removed = 0;
            for path in &paths {
                removed += cache.invalidate(path)?;
            }
            term.write_line(&format!("Removed {} cache entries", style(removed).cyan())).ok();
        }
    }
    Ok(())
}

fn print_cache_stats(term: &Term, stats: &CacheStats) {
    term.write_line(&format!("{}", style("Cache").bold().underlined())).ok();
    term.write_line(&format!("  entries  {}", style(stats.total_entries).cyan())).ok();
    term.write_line(&format!("  points   {}", stats.total_points)).ok();
    term.write_line(&format!(
        "  size     {}",
        style(format_bytes(stats.total_size_bytes)).yellow()
    ))
    .ok();
    for (cache_type, type_stats) in &stats.by_type {
        term.write_line(&format!(
            "  {:<10} {} entries, {} points",
            style(cache_type).dim(),
            type_stats.entries,
            type_stats.points
        ))
        .ok();
    }
}

fn run_maintain(config: ServiceConfig) -> Result<()> {
    let service = AnalysisService::open(config, WorkerRegistry::with_defaults())?;
    let report = service.run_maintenance()?;
    service.shutdown()?;

    let term = Term::stdout();
    term.write_line(&format!(
        "{} removed {} old jobs, {} expired and {} orphaned cache entries",
        style("✓").green().bold(),
        style(report.jobs_cleaned).cyan(),
        style(report.cache_cleaned).cyan(),
        style(report.orphans_removed).cyan()
    ))
    .ok();
    Ok(())
}

fn run_watch(config: &ServiceConfig, dirs: Vec<PathBuf>, debounce_ms: u64) -> Result<()> {
    let cache: Arc<dyn CacheBackend> =
        Arc::new(SqliteCache::open(&config.cache_db)?.with_batch_size(config.batch_size));
    let bus = EventBus::new();
    let events = bus.subscribe();

    let watcher_config = WatcherConfig {
        debounce_duration: Duration::from_millis(debounce_ms),
        ..Default::default()
    };
    let mut watcher = CacheInvalidator::new(watcher_config, cache, bus)?;
    for dir in &dirs {
        watcher.watch(dir)?;
    }

    let term = Term::stderr();
    term.write_line(&format!("{}", style("Watching for changes (Ctrl-C to stop)").dim())).ok();

    for event in events.iter() {
        let Event::Watcher(event) = event else {
            continue;
        };
        let line = match event {
            WatcherEvent::Started { path } => {
                format!("{} watching {}", style("▶").green(), display_path(&path))
            }
            WatcherEvent::Stopped { path } => {
                format!("{} stopped {}", style("■").dim(), display_path(&path))
            }
            WatcherEvent::MediaModified {
                path,
                entries_removed,
            } => format!(
                "{} modified {} ({} entries dropped)",
                style("~").yellow(),
                display_path(&path),
                entries_removed
            ),
            WatcherEvent::MediaRemoved {
                path,
                entries_removed,
            } => format!(
                "{} removed {} ({} entries dropped)",
                style("-").red(),
                display_path(&path),
                entries_removed
            ),
            WatcherEvent::Error { message } => format!("{} {}", style("!").red(), message),
        };
        term.write_line(&line).ok();
    }
    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let text =
        serde_json::to_string_pretty(value).map_err(|e| AnalyzerError::Config(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

fn display_path(path: &std::path::Path) -> String {
    match dirs::home_dir().and_then(|home| path.strip_prefix(home).ok().map(PathBuf::from)) {
        Some(relative) => format!("~/{}", relative.display()),
        None => path.display().to_string(),
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

fn format_bitrate(bits_per_second: f64) -> String {
    if bits_per_second >= 1_000_000.0 {
        format!("{:.2} Mb/s", bits_per_second / 1_000_000.0)
    } else if bits_per_second >= 1_000.0 {
        format!("{:.1} kb/s", bits_per_second / 1_000.0)
    } else {
        format!("{:.0} b/s", bits_per_second)
    }
}
