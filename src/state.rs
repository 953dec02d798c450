//! # State Management Module
//!
//! Questo modulo gestisce il ledger dei file processati per evitare rielaborazioni.
//!
//! ## Responsabilità:
//! - Traccia quali file sono già stati ottimizzati, quando e con quale patch
//! - Persiste lo stato in un file JSON leggibile (e modificabile a mano)
//! - Scritture durevoli: file temporaneo, `fsync`, rename atomico, `fsync` directory
//! - Ricostruisce lo stato dai sidecar `.patch` quando il ledger manca o è vecchio
//!
//! ## Fonte di verità:
//! - Le patch sidecar (con il digest del contenuto ottimizzato nell'header) sono
//!   la fonte di verità
//! - Il ledger è una cache derivata: fast path su dimensione + mtime, e in caso di
//!   mismatch si ricade sul confronto SHA-256 con gli header delle patch
//! - Ledger cancellato o corrotto => "riprocessa tutto quello che non ha una patch
//!   valida", mai un errore fatale
//!
//! ## Esempio struttura ledger:
//! ```json
//! {
//!   "records": {
//!     "/movies/a.mp4": {
//!       "path": "/movies/a.mp4",
//!       "outcome": "success",
//!       "processed_at": 1700000000,
//!       "patch": "/movies/a.mp4.1700000000.v2.patch",
//!       "backend": "xdelta3",
//!       "size": 1048576,
//!       "modified_time": 1600000000,
//!       "optimized_sha256": "9f86d081..."
//!     }
//!   }
//! }
//! ```

use crate::error::{FixError, Stage};
use crate::file_manager::{now_secs, FileManager, MediaFile, TEMP_PREFIX};
use crate::patch::PatchArtifact;
use crate::platform;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Result of a processing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// Diagnostic note about the latest failed attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureNote {
    pub stage: Stage,
    pub reason: String,
    pub at: u64,
}

/// Information about a processed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingRecord {
    pub path: PathBuf,
    pub outcome: Outcome,
    pub processed_at: u64,
    #[serde(default)]
    pub patch: Option<PathBuf>,
    #[serde(default)]
    pub backend: Option<String>,
    /// Size of the file right after replacement
    #[serde(default)]
    pub size: u64,
    /// Modification time of the file right after replacement
    #[serde(default)]
    pub modified_time: u64,
    #[serde(default)]
    pub optimized_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<FailureNote>,
}

impl ProcessingRecord {
    /// Success record for `media` as it looks after replacement
    pub fn success(media: &MediaFile, artifact: &PatchArtifact, processed_at: u64) -> Self {
        Self {
            path: media.path.clone(),
            outcome: Outcome::Success,
            processed_at,
            patch: Some(artifact.path.clone()),
            backend: Some(artifact.header.backend.clone()),
            size: media.size,
            modified_time: media.modified_time,
            optimized_sha256: Some(artifact.header.optimized_sha256.clone()),
            last_failure: None,
        }
    }

    fn failure(path: &Path, note: FailureNote) -> Self {
        Self {
            path: path.to_path_buf(),
            outcome: Outcome::Failure,
            processed_at: note.at,
            patch: None,
            backend: None,
            size: 0,
            modified_time: 0,
            optimized_sha256: None,
            last_failure: Some(note),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Ledger file content
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(default)]
    pub records: BTreeMap<String, ProcessingRecord>,
}

/// What the skip-check found for a file
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessedState {
    /// Needs processing (or `force` is set)
    Unprocessed,
    /// Ledger fast path: record, patch and file metadata all agree
    Recorded(ProcessingRecord),
    /// No usable record, but a sidecar patch proves the current content is optimized
    Recovered(ProcessingRecord),
}

impl ProcessedState {
    pub fn is_processed(&self) -> bool {
        !matches!(self, ProcessedState::Unprocessed)
    }
}

/// Aggregate counts for reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub successes: usize,
    pub failures: usize,
}

/// Manages the processing ledger
pub struct StateManager {
    state_file_path: PathBuf,
    state: StateFile,
    force: bool,
}

impl StateManager {
    /// Open (or start) the ledger at `state_file_path`
    pub async fn open(state_file_path: &Path, force: bool) -> Result<Self, FixError> {
        let state = match fs::read_to_string(state_file_path).await {
            Ok(content) => match serde_json::from_str::<StateFile>(&content) {
                Ok(state) => state,
                Err(e) => {
                    warn!(
                        "Ledger {} is unreadable ({}); treating it as empty",
                        state_file_path.display(),
                        e
                    );
                    StateFile::default()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => StateFile::default(),
            Err(e) => {
                return Err(FixError::ledger(format!(
                    "cannot read {}: {}",
                    state_file_path.display(),
                    e
                )))
            }
        };

        debug!(
            "Opened ledger {} with {} records",
            state_file_path.display(),
            state.records.len()
        );

        Ok(Self {
            state_file_path: state_file_path.to_path_buf(),
            state,
            force,
        })
    }

    pub fn path(&self) -> &Path {
        &self.state_file_path
    }

    pub fn get(&self, path: &Path) -> Option<&ProcessingRecord> {
        self.state.records.get(&key(path))
    }

    pub fn len(&self) -> usize {
        self.state.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.records.is_empty()
    }

    /// Decide whether `media` still needs processing
    pub async fn processed_state(&self, media: &MediaFile) -> ProcessedState {
        if self.force {
            return ProcessedState::Unprocessed;
        }

        if let Some(record) = self.get(&media.path) {
            let patch_present = record.patch.as_ref().map(|p| p.exists()).unwrap_or(false);
            if record.is_success()
                && patch_present
                && record.size == media.size
                && record.modified_time == media.modified_time
            {
                return ProcessedState::Recorded(record.clone());
            }
            debug!(
                "Ledger record for {} is stale, checking patch sidecars",
                media.path.display()
            );
        }

        let media_path = media.path.clone();
        let sidecars = tokio::task::spawn_blocking(move || PatchArtifact::sidecars(&media_path))
            .await
            .unwrap_or_default();
        let candidates: Vec<PatchArtifact> = sidecars
            .into_iter()
            .filter(|artifact| artifact.header.optimized_size == media.size)
            .collect();
        if candidates.is_empty() {
            return ProcessedState::Unprocessed;
        }

        let digest = match FileManager::sha256(&media.path).await {
            Ok(digest) => digest,
            Err(e) => {
                warn!("Cannot fingerprint {}: {}", media.path.display(), e);
                return ProcessedState::Unprocessed;
            }
        };

        match candidates
            .iter()
            .find(|artifact| artifact.header.optimized_sha256 == digest)
        {
            Some(artifact) => ProcessedState::Recovered(ProcessingRecord::success(
                media,
                artifact,
                artifact.header.created_at,
            )),
            None => ProcessedState::Unprocessed,
        }
    }

    /// Check if a file has a current successful record (or a proving sidecar)
    pub async fn is_processed(&self, path: &Path) -> bool {
        match MediaFile::stat(path).await {
            Ok(media) => self.processed_state(&media).await.is_processed(),
            Err(_) => false,
        }
    }

    /// Durably store a success record, superseding any earlier one
    pub async fn record_success(&mut self, record: ProcessingRecord) -> Result<(), FixError> {
        let mut next = self.state.clone();
        next.records.insert(key(&record.path), record);
        self.commit(next).await
    }

    /// Durably note a failed attempt. Never hides an existing success.
    pub async fn record_failure(
        &mut self,
        path: &Path,
        stage: Stage,
        reason: &str,
    ) -> Result<(), FixError> {
        let note = FailureNote {
            stage,
            reason: reason.to_string(),
            at: now_secs(),
        };
        let mut next = self.state.clone();
        match next.records.get_mut(&key(path)) {
            Some(existing) if existing.is_success() => existing.last_failure = Some(note),
            _ => {
                next.records
                    .insert(key(path), ProcessingRecord::failure(path, note));
            }
        }
        self.commit(next).await
    }

    /// Durably drop the record for `path` (explicit reversion)
    pub async fn remove(&mut self, path: &Path) -> Result<Option<ProcessingRecord>, FixError> {
        let mut next = self.state.clone();
        let removed = next.records.remove(&key(path));
        if removed.is_some() {
            self.commit(next).await?;
        }
        Ok(removed)
    }

    /// Get statistics about recorded files
    pub fn stats(&self) -> LedgerStats {
        let successes = self
            .state
            .records
            .values()
            .filter(|record| record.is_success())
            .count();
        LedgerStats {
            successes,
            failures: self.state.records.len() - successes,
        }
    }

    /// Write `next` to disk, then make it the in-memory view
    async fn commit(&mut self, next: StateFile) -> Result<(), FixError> {
        let content = serde_json::to_string_pretty(&next)
            .map_err(|e| FixError::ledger(format!("cannot serialize ledger: {}", e)))?;
        let path = self.state_file_path.clone();

        tokio::task::spawn_blocking(move || write_durably(&path, content.as_bytes()))
            .await
            .map_err(|e| FixError::ledger(format!("ledger writer panicked: {}", e)))?
            .map_err(|e| {
                FixError::ledger(format!(
                    "cannot write {}: {}",
                    self.state_file_path.display(),
                    e
                ))
            })?;

        self.state = next;
        Ok(())
    }
}

fn key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn write_durably(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = platform::parent_dir(path);
    std::fs::create_dir_all(dir)?;

    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(".json")
        .tempfile_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    platform::sync_dir(dir)
}
