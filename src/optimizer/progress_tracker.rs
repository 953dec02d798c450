//! # Progress Tracking Module
//!
//! Unisce spinner, statistiche e log per-file in un singolo tracker.
//! Ogni esito viene loggato con `tracing` e conteggiato in `BatchStats`.

use crate::{
    error::Stage,
    file_manager::FileManager,
    optimizer::task_optimizer::{FileOutcome, SkipReason},
    progress::{BatchStats, ProgressManager},
};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// A file that ended in `FileOutcome::Failed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFile {
    pub path: PathBuf,
    pub stage: Stage,
    pub message: String,
}

/// Tracks one run: spinner, counters and the list of failures
pub struct ProgressTracker {
    progress: ProgressManager,
    stats: BatchStats,
    failures: Vec<FailedFile>,
}

impl ProgressTracker {
    pub fn new(show_progress: bool) -> Self {
        Self {
            progress: ProgressManager::spinner(show_progress),
            stats: BatchStats::new(),
            failures: Vec::new(),
        }
    }

    /// Announce the file about to be processed
    pub fn start_file(&self, path: &Path) {
        self.progress
            .set_message(&format!("[..] {}", display_name(path)));
    }

    /// Count and log a terminal outcome
    pub fn finish_file(&mut self, path: &Path, outcome: &FileOutcome) {
        let name = display_name(path);
        let message = match outcome {
            FileOutcome::Done {
                record,
                original_size,
            } => {
                let patch_size = record
                    .patch
                    .as_ref()
                    .and_then(|patch| std::fs::metadata(patch).ok())
                    .map(|metadata| metadata.len())
                    .unwrap_or(0);
                self.stats
                    .add_fixed(*original_size, record.size, patch_size);
                info!(
                    "Fixed {} ({} -> {}, patch {})",
                    path.display(),
                    FileManager::format_size(*original_size),
                    FileManager::format_size(record.size),
                    FileManager::format_size(patch_size)
                );
                format!("[OK] {}", name)
            }
            FileOutcome::Skipped(reason) => {
                match reason {
                    SkipReason::AlreadyProcessed => self.stats.add_already_processed(),
                    SkipReason::GroupMismatch => self.stats.add_group_mismatch(),
                    SkipReason::DryRun => self.stats.add_dry_run(),
                }
                info!("Skipped {}: {}", path.display(), reason);
                format!("[SKIP] {}", name)
            }
            FileOutcome::Failed { stage, error } => {
                self.stats.add_failure();
                error!(
                    "Failed {} at {} stage ({}): {}",
                    path.display(),
                    stage,
                    error.kind().as_str(),
                    error
                );
                self.failures.push(FailedFile {
                    path: path.to_path_buf(),
                    stage: *stage,
                    message: error.to_string(),
                });
                format!("[ERROR] {}", name)
            }
        };
        self.progress.update(&message);
    }

    pub fn stats(&self) -> &BatchStats {
        &self.stats
    }

    /// Stop the spinner and hand back counters and failures
    pub fn finish(self) -> (BatchStats, Vec<FailedFile>) {
        self.progress.finish(&self.stats.format_summary());
        (self.stats, self.failures)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}
