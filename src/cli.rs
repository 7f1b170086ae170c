//! CLI
//!
//! `sync` runs one manual session, `diff` previews the decision table and
//! `watch` keeps a group in sync live until stdin is closed or a line is read.

use crate::config::{ConfigLoader, SyncfoldConfig};
use crate::diff::DiffOutcome;
use crate::error::SyncError;
use crate::logging::LoggingConfig;
use crate::ops::{FileOps, LocalFileOps};
use crate::progress::{ProgressSink, TracingProgress};
use crate::session::{SyncReport, SyncSession};
use crate::snapshot::{JsonSnapshotStore, SnapshotStore};
use crate::watch::LiveSync;
use clap::{Args, Parser, Subcommand};
use comfy_table::Table;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// syncfold - keep the same folder in sync across several locations
#[derive(Parser)]
#[command(name = "syncfold")]
#[command(about = "Multi-replica folder synchronization")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path, layered over the global config
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr, both)
    #[arg(long, global = true)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Fold the logging flags over the configured values.
    pub fn logging_config(&self, base: &LoggingConfig) -> LoggingConfig {
        let mut config = base.clone();
        if let Some(level) = &self.log_level {
            config.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.format = format.clone();
        }
        if let Some(output) = &self.log_output {
            config.output = output.clone();
        }
        if let Some(file) = &self.log_file {
            config.file = Some(file.clone());
        }
        config
    }
}

#[derive(Args, Debug, Clone)]
pub struct GroupArgs {
    /// Sync group name; each group keeps its own snapshot per replica
    #[arg(long, short)]
    pub group: String,

    /// Replica roots, at least two
    #[arg(required = true, num_args = 2..)]
    pub roots: Vec<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Synchronise the replicas once
    Sync {
        #[command(flatten)]
        target: GroupArgs,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show what a sync would do without changing anything
    Diff {
        #[command(flatten)]
        target: GroupArgs,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Sync once, then propagate changes live
    Watch {
        #[command(flatten)]
        target: GroupArgs,
        /// Skip the initial manual sync
        #[arg(long)]
        no_initial_sync: bool,
    },
}

pub struct CliContext {
    config: SyncfoldConfig,
    ops: Arc<LocalFileOps>,
    store: Arc<JsonSnapshotStore>,
}

impl CliContext {
    pub fn new(config: SyncfoldConfig) -> Result<Self, SyncError> {
        let ops = Arc::new(LocalFileOps::from_config(&config.sync)?);
        let store = Arc::new(JsonSnapshotStore::new(config.sync.metadata_dir.clone()));
        Ok(Self { config, ops, store })
    }

    /// Load configuration, honouring an explicit file.
    pub fn load_config(path: Option<&PathBuf>) -> Result<SyncfoldConfig, SyncError> {
        match path {
            Some(path) => ConfigLoader::load_with_file(path),
            None => ConfigLoader::load(),
        }
    }

    pub fn config(&self) -> &SyncfoldConfig {
        &self.config
    }

    pub fn execute(&self, command: &Commands) -> Result<String, SyncError> {
        match command {
            Commands::Sync { target, format } => {
                let report = self.sync(target)?;
                format_report(&report, format)
            }
            Commands::Diff { target, format } => {
                let progress = TracingProgress::default();
                let outcome = self.session(&progress).preview(&target.group, &target.roots)?;
                format_outcome(&outcome, format)
            }
            Commands::Watch {
                target,
                no_initial_sync,
            } => self.watch(target, *no_initial_sync),
        }
    }

    fn session<'a>(&'a self, progress: &'a dyn ProgressSink) -> SyncSession<'a> {
        SyncSession::new(
            &self.config.sync,
            self.ops.as_ref(),
            self.store.as_ref(),
            progress,
        )
    }

    fn sync(&self, target: &GroupArgs) -> Result<SyncReport, SyncError> {
        let progress = TracingProgress::default();
        self.session(&progress).run(&target.group, &target.roots)
    }

    fn watch(&self, target: &GroupArgs, no_initial_sync: bool) -> Result<String, SyncError> {
        let roots = if no_initial_sync {
            target
                .roots
                .iter()
                .map(|root| {
                    dunce::canonicalize(root).map_err(|source| SyncError::ReplicaUnavailable {
                        path: root.clone(),
                        source,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?
        } else {
            let report = self.sync(target)?;
            eprintln!("{}", format_report(&report, "text")?);
            report.replicas
        };

        let ops: Arc<dyn FileOps> = self.ops.clone();
        let store: Arc<dyn SnapshotStore> = self.store.clone();
        let progress: Arc<dyn ProgressSink> = Arc::new(TracingProgress::default());
        let live = LiveSync::start(
            &target.group,
            roots.clone(),
            self.config.sync.clone(),
            &self.config.watch,
            ops,
            store,
            progress,
        )?;
        eprintln!(
            "{} {} replicas of '{}' (press Enter to stop)",
            "Watching".bold(),
            roots.len(),
            target.group
        );

        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        let batches = live.scheduler().processed();
        live.stop();
        info!(group = %target.group, batches, "Watch ended");
        Ok(format!("Stopped watching '{}' after {} event batches", target.group, batches))
    }
}

pub fn format_report(report: &SyncReport, format: &str) -> Result<String, SyncError> {
    if format == "json" {
        return serde_json::to_string_pretty(report)
            .map_err(|e| SyncError::Config(format!("Failed to encode report: {}", e)));
    }

    let mut out = String::new();
    let mode = if report.raw_mode { "raw" } else { "metadata" };
    out.push_str(&format!(
        "{} '{}' across {} replicas ({} merge)\n",
        "Synced".bold(),
        report.group,
        report.replicas.len(),
        mode
    ));
    for root in &report.excluded {
        out.push_str(&format!("  {} {}\n", "excluded".yellow(), root.display()));
    }
    let s = &report.summary;
    out.push_str(&format!(
        "  planned {}, created {}, updated {}, deleted {}, renamed {}\n",
        report.planned, s.created, s.updated, s.deleted, s.renamed
    ));
    if s.errors > 0 || s.invalid > 0 {
        out.push_str(&format!(
            "  {} {} failed, {} invalid\n",
            "errors:".red(),
            s.errors,
            s.invalid
        ));
    }
    if report.retried_deletions > 0 {
        out.push_str(&format!(
            "  {} deletions will be retried next run\n",
            report.retried_deletions
        ));
    }
    for root in &report.unsaved {
        out.push_str(&format!("  {} {}\n", "snapshot not saved:".red(), root.display()));
    }
    if report.is_clean() {
        out.push_str(&format!("{}", "In sync".green()));
    }
    Ok(out.trim_end().to_string())
}

pub fn format_outcome(outcome: &DiffOutcome, format: &str) -> Result<String, SyncError> {
    if format == "json" {
        let entries: Vec<_> = outcome.table.entries().collect();
        return serde_json::to_string_pretty(&entries)
            .map_err(|e| SyncError::Config(format!("Failed to encode diff: {}", e)));
    }
    if outcome.is_in_sync() {
        return Ok(format!("'{}' is in sync", outcome.group));
    }

    let roots = outcome.roots();
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Path", "Action", "Source", "Targets"]);
    for entry in outcome.table.entries() {
        let action = match (&entry.renamed_to, entry.kind()) {
            (Some(to), _) => format!("rename -> {}", to),
            (None, Some(kind)) => kind.to_string(),
            (None, None) => "-".to_string(),
        };
        let targets = entry
            .targets
            .iter()
            .map(|(replica, target)| format!("{} {}", target.kind, roots[*replica].display()))
            .collect::<Vec<_>>()
            .join("\n");
        table.add_row(vec![
            entry.path.to_string(),
            action,
            roots[entry.source_replica].display().to_string(),
            targets,
        ]);
    }
    Ok(format!(
        "{} operations for '{}'\n{}",
        outcome.table.operation_count(),
        outcome.group,
        table
    ))
}
