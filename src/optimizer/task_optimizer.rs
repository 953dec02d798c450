//! # File Pipeline
//!
//! Worker per il singolo file: filtro gruppo → skip-check → remux → diff →
//! sostituzione → record. Separato dall'orchestratore così ogni stadio resta
//! testabile con un remuxer finto.

use crate::error::{FixError, Stage, StageError};
use crate::file_manager::MediaFile;
use crate::group_filter::GroupFilter;
use crate::patch::PatchCodec;
use crate::replacer::AtomicReplacer;
use crate::state::{ProcessedState, ProcessingRecord, StateManager};
use crate::video_processor::Remux;
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

/// Why a file was left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    GroupMismatch,
    AlreadyProcessed,
    DryRun,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::GroupMismatch => "group mismatch",
            SkipReason::AlreadyProcessed => "already processed",
            SkipReason::DryRun => "would be processed (dry run)",
        };
        f.write_str(reason)
    }
}

/// Terminal state of one file
#[derive(Debug)]
pub enum FileOutcome {
    Done {
        record: ProcessingRecord,
        original_size: u64,
    },
    Skipped(SkipReason),
    Failed {
        stage: Stage,
        error: FixError,
    },
}

impl FileOutcome {
    fn failed(stage: Stage, error: FixError) -> Self {
        FileOutcome::Failed { stage, error }
    }
}

impl From<StageError> for FileOutcome {
    fn from(e: StageError) -> Self {
        FileOutcome::failed(e.stage, e.error)
    }
}

/// Everything one file needs to go through the pipeline
pub struct FilePipeline<'a, R: Remux> {
    pub remuxer: &'a R,
    pub codec: &'a PatchCodec,
    pub replacer: AtomicReplacer,
    pub filter: GroupFilter,
    pub dry_run: bool,
}

impl<'a, R: Remux> FilePipeline<'a, R> {
    /// Run one file to a terminal outcome. Never returns early with an error.
    pub async fn process(&self, path: &Path, ledger: &mut StateManager) -> FileOutcome {
        let media = match MediaFile::stat(path).await {
            Ok(media) => media,
            Err(e) => return FileOutcome::failed(Stage::Discovery, FixError::Io(e)),
        };

        if !self.filter.admits(&media) {
            debug!(
                "Group {:?} != {:?}: {}",
                media.group_id,
                self.filter.target(),
                media.path.display()
            );
            return FileOutcome::Skipped(SkipReason::GroupMismatch);
        }

        match ledger.processed_state(&media).await {
            ProcessedState::Recorded(_) => {
                return FileOutcome::Skipped(SkipReason::AlreadyProcessed);
            }
            ProcessedState::Recovered(record) => {
                debug!(
                    "Recovered record for {} from {:?}",
                    media.path.display(),
                    record.patch
                );
                if !self.dry_run {
                    if let Err(e) = ledger.record_success(record).await {
                        warn!("Could not heal ledger for {}: {}", media.path.display(), e);
                    }
                }
                return FileOutcome::Skipped(SkipReason::AlreadyProcessed);
            }
            ProcessedState::Unprocessed => {}
        }

        if self.dry_run {
            return FileOutcome::Skipped(SkipReason::DryRun);
        }

        let output = match self.remuxer.remux(&media.path).await {
            Ok(output) => output,
            Err(e) => return FileOutcome::failed(Stage::Remux, e),
        };

        match self
            .replacer
            .commit(&media, output, self.codec, ledger)
            .await
        {
            Ok(record) => FileOutcome::Done {
                record,
                original_size: media.size,
            },
            Err(e) => e.into(),
        }
    }
}
