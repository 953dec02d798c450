//! # Batch Optimizer Main Orchestrator
//!
//! Orchestratore principale: enumera i film, li fa passare uno alla volta
//! dalla `FilePipeline` e raccoglie gli esiti.
//!
//! ## Garanzie:
//! - Il backend di diff viene scelto una volta sola, prima di qualsiasi remux
//! - Elaborazione sequenziale in ordine deterministico (per nome)
//! - L'errore di un file non interrompe il batch: viene loggato con lo stadio
//!   e annotato nel ledger
//! - Ctrl-C viene controllato tra un file e l'altro; il file in corso termina

use crate::{
    config::Config,
    error::FixError,
    file_manager::FileManager,
    group_filter::GroupFilter,
    optimizer::{
        progress_tracker::{FailedFile, ProgressTracker},
        task_optimizer::{FileOutcome, FilePipeline},
    },
    patch::PatchCodec,
    progress::BatchStats,
    replacer::AtomicReplacer,
    state::StateManager,
    tool_resolver::ToolPathResolver,
    video_processor::{FfmpegRemuxer, Remux},
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What a run did
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub stats: BatchStats,
    pub failures: Vec<FailedFile>,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Orchestratore principale
pub struct BatchOptimizer<R: Remux> {
    config: Config,
    ledger: StateManager,
    codec: PatchCodec,
    remuxer: R,
    filter: GroupFilter,
    cancel: Arc<AtomicBool>,
}

impl<R: Remux> BatchOptimizer<R> {
    /// Validate the config, pick a diff backend and open the ledger.
    ///
    /// Fails with `MissingDependency` when no backend is installed, before
    /// any file is touched.
    pub async fn new(
        root: &Path,
        config: Config,
        remuxer: R,
        resolver: &ToolPathResolver,
    ) -> Result<Self, FixError> {
        let codec = select_codec(&config, resolver)?;
        Self::with_codec(root, config, remuxer, codec).await
    }

    /// Same as `new` with an already selected codec
    pub async fn with_codec(
        root: &Path,
        config: Config,
        remuxer: R,
        codec: PatchCodec,
    ) -> Result<Self, FixError> {
        let ledger = StateManager::open(&config.ledger_location(root), config.force).await?;
        let filter = GroupFilter::new(config.group_id);

        Ok(Self {
            config,
            ledger,
            codec,
            remuxer,
            filter,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Share a cancellation flag (set by the Ctrl-C handler)
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn ledger(&self) -> &StateManager {
        &self.ledger
    }

    pub fn backend_name(&self) -> &'static str {
        self.codec.backend_name()
    }

    /// Esegue il processo di ottimizzazione
    pub async fn run(&mut self, root: &Path) -> Result<RunSummary, FixError> {
        let start_time = Instant::now();
        let files = FileManager::enumerate(root, self.config.recursive, &self.config.extensions)?;

        self.log_configuration(root);
        if !self.config.dry_run {
            self.remove_stale_temp_files(root).await;
        }

        let pipeline = FilePipeline {
            remuxer: &self.remuxer,
            codec: &self.codec,
            replacer: AtomicReplacer::from_config(&self.config),
            filter: self.filter,
            dry_run: self.config.dry_run,
        };
        let mut tracker = ProgressTracker::new(self.config.show_progress);
        let mut cancelled = false;

        for path in files {
            if self.cancel.load(Ordering::SeqCst) {
                warn!("Interrupted, stopping before {}", path.display());
                cancelled = true;
                break;
            }

            tracker.start_file(&path);
            let outcome = pipeline.process(&path, &mut self.ledger).await;

            if let FileOutcome::Failed { stage, ref error } = outcome {
                if !self.config.dry_run {
                    let key = tokio::fs::canonicalize(&path)
                        .await
                        .unwrap_or_else(|_| path.clone());
                    if let Err(e) = self
                        .ledger
                        .record_failure(&key, stage, &error.to_string())
                        .await
                    {
                        warn!("Could not note failure of {}: {}", path.display(), e);
                    }
                }
            }

            tracker.finish_file(&path, &outcome);
        }

        let (stats, failures) = tracker.finish();
        let summary = RunSummary {
            stats,
            failures,
            cancelled,
            elapsed: start_time.elapsed(),
        };
        self.print_final_stats(&summary);
        Ok(summary)
    }

    fn log_configuration(&self, root: &Path) {
        info!("Fixing movies in: {}", root.display());
        info!("Diff backend: {}", self.codec.backend_name());
        info!("Ledger: {}", self.ledger.path().display());
        if let Some(gid) = self.filter.target() {
            info!("Only files owned by group {}", gid);
        }
        if self.config.force {
            info!("Force mode: processed files will be fixed again");
        }
        if self.config.dry_run {
            info!("Dry run mode: No files will be modified");
        }
        if !self.config.verify_patches {
            warn!("Patch verification disabled");
        }
    }

    async fn remove_stale_temp_files(&self, root: &Path) {
        let root = root.to_path_buf();
        let recursive = self.config.recursive;
        let ledger = self.ledger.path().to_path_buf();
        let stale = tokio::task::spawn_blocking(move || {
            FileManager::stale_temp_files(&root, recursive, &ledger)
        })
        .await
        .unwrap_or_default();

        for path in stale {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => info!("Removed leftover temp file {}", path.display()),
                Err(e) => debug!("Cannot remove {}: {}", path.display(), e),
            }
        }
    }

    fn print_final_stats(&self, summary: &RunSummary) {
        let stats = &summary.stats;
        let ledger = self.ledger.stats();

        info!("=== Run Complete ===");
        info!("{}", stats.format_summary());
        info!("Elapsed: {:.1}s", summary.elapsed.as_secs_f64());
        info!(
            "Ledger: {} fixed files, {} with failures",
            ledger.successes, ledger.failures
        );
        for failed in &summary.failures {
            warn!(
                "  {} [{}]: {}",
                failed.path.display(),
                failed.stage,
                failed.message
            );
        }
        if summary.cancelled {
            warn!("Run was interrupted; remaining files were not visited");
        }
    }
}

impl BatchOptimizer<FfmpegRemuxer> {
    /// Production setup: the diff backend is checked before ffmpeg, so a
    /// host missing both reports the diff tools.
    pub async fn with_ffmpeg(
        root: &Path,
        config: Config,
        resolver: &ToolPathResolver,
    ) -> Result<Self, FixError> {
        let codec = select_codec(&config, resolver)?;
        let remuxer = FfmpegRemuxer::new(&config, resolver)?;
        Self::with_codec(root, config, remuxer, codec).await
    }
}

fn select_codec(config: &Config, resolver: &ToolPathResolver) -> Result<PatchCodec, FixError> {
    config
        .validate()
        .map_err(|e| FixError::config(format!("{:#}", e)))?;
    PatchCodec::select(
        resolver,
        config.preferred_backend.as_deref(),
        Duration::from_secs(config.patch_timeout_secs),
    )
}
