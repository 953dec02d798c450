//! # Atomic Replacement
//!
//! Promuove la copia ottimizzata al posto dell'originale senza mai lasciare
//! un file a metà.
//!
//! ## Sequenza (`commit`):
//! 1. Snapshot dei metadata dell'originale (mode, owner, group, atime, mtime)
//! 2. Controllo che l'originale non sia cambiato durante il remux
//! 3. Patch inversa scritta e sincronizzata su disco (`PatchCodec::diff`)
//! 4. Verifica opzionale: la patch ricostruisce davvero l'originale
//! 5. Metadata applicati al file temporaneo, `fsync`, rename atomico, `fsync` directory
//! 6. Record di successo nel ledger
//!
//! Un errore prima del rename lascia l'originale intatto e rimuove la patch.
//! Dopo il rename la patch non viene mai rimossa: un `fsync` della directory
//! fallito viene solo segnalato. Un errore al passo 6 lascia file e patch
//! coerenti: la prossima esecuzione li riconosce tramite il digest
//! nell'header della patch.

use crate::config::Config;
use crate::error::{FixError, Stage, StageError};
use crate::file_manager::{now_secs, unix_secs, MediaFile};
use crate::patch::{PatchArtifact, PatchCodec};
use crate::platform;
use crate::state::{ProcessingRecord, StateManager};
use crate::video_processor::RemuxOutput;
use std::fs::{self, FileTimes, OpenOptions};
use std::io;
use std::path::Path;
use std::time::SystemTime;
use tempfile::TempPath;
use tracing::{debug, warn};

/// Metadata to carry over from an original to its replacement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    pub size: u64,
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub accessed: Option<SystemTime>,
    pub modified: SystemTime,
}

impl FileSnapshot {
    pub fn capture(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self {
            size: metadata.len(),
            mode: platform::mode(&metadata),
            uid: platform::user_id(&metadata),
            gid: platform::group_id(&metadata),
            accessed: metadata.accessed().ok(),
            modified: metadata.modified()?,
        })
    }

    /// Whether `media` still describes the file this snapshot was taken of
    pub fn matches(&self, media: &MediaFile) -> bool {
        self.size == media.size && unix_secs(self.modified) == media.modified_time
    }
}

/// Replaces originals with their optimized copies
#[derive(Debug, Clone, Copy)]
pub struct AtomicReplacer {
    preserve_mtime: bool,
    verify: bool,
}

impl AtomicReplacer {
    pub fn new(preserve_mtime: bool, verify: bool) -> Self {
        Self {
            preserve_mtime,
            verify,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.preserve_mtime, config.verify_patches)
    }

    /// Patch, replace and record one file
    pub async fn commit(
        &self,
        original: &MediaFile,
        output: RemuxOutput,
        codec: &PatchCodec,
        ledger: &mut StateManager,
    ) -> Result<ProcessingRecord, StageError> {
        let path = original.path.clone();

        let snapshot = FileSnapshot::capture(&path).map_err(|e| {
            StageError::new(
                Stage::Replace,
                FixError::replace(format!("cannot stat {}: {}", path.display(), e)),
            )
        })?;
        if !snapshot.matches(original) {
            return Err(StageError::new(
                Stage::Replace,
                FixError::replace(format!(
                    "{} changed while it was being remuxed",
                    path.display()
                )),
            ));
        }

        let artifact = codec
            .diff(&path, output.path())
            .await
            .map_err(|e| StageError::new(Stage::Diff, e))?;

        if self.verify {
            if let Err(e) = codec.verify(&artifact, output.path()).await {
                discard(&artifact);
                return Err(StageError::new(Stage::Diff, e));
            }
            debug!("Verified patch {}", artifact.path.display());
        }

        let replacement = output.into_temp_path();
        let target = path.clone();
        let preserve_mtime = self.preserve_mtime;
        let swapped = tokio::task::spawn_blocking(move || {
            swap(&target, replacement, &snapshot, preserve_mtime)
        })
        .await
        .map_err(|e| {
            // Unknown whether the rename happened, so the patch stays
            StageError::new(
                Stage::Replace,
                FixError::replace(format!("cannot replace {}: {}", path.display(), e)),
            )
        })?;

        match swapped {
            Ok(()) => {}
            Err(e) if e.target_replaced() => {
                warn!("{} was replaced but {}", path.display(), e);
            }
            Err(e) => {
                discard(&artifact);
                return Err(StageError::new(
                    Stage::Replace,
                    FixError::replace(format!("cannot replace {}: {}", path.display(), e)),
                ));
            }
        }

        let replaced = MediaFile::stat(&path).await.map_err(|e| {
            StageError::new(
                Stage::Record,
                FixError::ledger(format!("cannot stat {}: {}", path.display(), e)),
            )
        })?;
        let record = ProcessingRecord::success(&replaced, &artifact, now_secs());
        ledger
            .record_success(record.clone())
            .await
            .map_err(|e| StageError::new(Stage::Record, e))?;

        Ok(record)
    }
}

/// How a swap went wrong
#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    /// `target` is untouched and the replacement was deleted
    #[error("{0}")]
    NotReplaced(io::Error),
    /// The rename happened; only the directory sync failed
    #[error("the directory sync failed: {0}")]
    NotSynced(io::Error),
}

impl SwapError {
    pub fn target_replaced(&self) -> bool {
        matches!(self, SwapError::NotSynced(_))
    }
}

/// Atomically rename `replacement` over `target`, carrying the snapshot's metadata.
pub fn swap(
    target: &Path,
    replacement: TempPath,
    snapshot: &FileSnapshot,
    preserve_times: bool,
) -> Result<(), SwapError> {
    swap_with(target, replacement, snapshot, preserve_times, platform::sync_dir)
}

fn swap_with(
    target: &Path,
    replacement: TempPath,
    snapshot: &FileSnapshot,
    preserve_times: bool,
    sync_dir: impl FnOnce(&Path) -> io::Result<()>,
) -> Result<(), SwapError> {
    prepare(&replacement, snapshot, preserve_times).map_err(SwapError::NotReplaced)?;
    replacement
        .persist(target)
        .map_err(|e| SwapError::NotReplaced(e.error))?;
    sync_dir(platform::parent_dir(target)).map_err(SwapError::NotSynced)
}

/// Times, fsync, owner and mode of the replacement before it is renamed
fn prepare(replacement: &Path, snapshot: &FileSnapshot, preserve_times: bool) -> io::Result<()> {
    {
        let file = OpenOptions::new().write(true).open(replacement)?;
        if preserve_times {
            let mut times = FileTimes::new().set_modified(snapshot.modified);
            if let Some(accessed) = snapshot.accessed {
                times = times.set_accessed(accessed);
            }
            file.set_times(times)?;
        }
        file.sync_all()?;
    }

    // chown may clear setuid/setgid, so the mode goes last
    platform::chown(replacement, snapshot.uid, snapshot.gid)?;
    if let Some(mode) = snapshot.mode {
        platform::set_mode(replacement, mode)?;
    }
    Ok(())
}

fn discard(artifact: &PatchArtifact) {
    if let Err(e) = artifact.remove() {
        warn!(
            "Could not remove unused patch {}: {}",
            artifact.path.display(),
            e
        );
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::state::ProcessedState;
    use crate::test_support::{CopyBackend, FakeRemuxer};
    use crate::video_processor::Remux;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn codec(backend: CopyBackend) -> PatchCodec {
        PatchCodec::with_backend(Box::new(backend), Duration::from_secs(30))
    }

    async fn movie(dir: &Path, name: &str) -> MediaFile {
        let path = dir.join(name);
        std::fs::write(&path, b"moov-at-end").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o640)).unwrap();
        let old = SystemTime::UNIX_EPOCH + Duration::from_secs(1_500_000_000);
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_times(FileTimes::new().set_modified(old).set_accessed(old))
            .unwrap();
        MediaFile::stat(&path).await.unwrap()
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_commit_preserves_metadata_and_records() {
        let dir = TempDir::new().unwrap();
        let media = movie(dir.path(), "a.mp4").await;
        let mut ledger = StateManager::open(&dir.path().join("ledger.json"), false)
            .await
            .unwrap();
        let output = FakeRemuxer::default().remux(&media.path).await.unwrap();

        let record = AtomicReplacer::new(true, true)
            .commit(&media, output, &codec(CopyBackend::default()), &mut ledger)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&media.path).unwrap(), b"FASTSTART:moov-at-end");
        let after = std::fs::metadata(&media.path).unwrap();
        assert_eq!(after.permissions().mode() & 0o7777, 0o640);
        assert_eq!(unix_secs(after.modified().unwrap()), 1_500_000_000);

        let patch = record.patch.clone().unwrap();
        assert!(patch.exists());
        assert_eq!(record.backend.as_deref(), Some("copy"));
        assert_eq!(ledger.get(&media.path), Some(&record));

        let current = MediaFile::stat(&media.path).await.unwrap();
        assert!(matches!(
            ledger.processed_state(&current).await,
            ProcessedState::Recorded(_)
        ));
    }

    #[tokio::test]
    async fn test_no_preserve_mtime_takes_fresh_time() {
        let dir = TempDir::new().unwrap();
        let media = movie(dir.path(), "a.mp4").await;
        let mut ledger = StateManager::open(&dir.path().join("ledger.json"), false)
            .await
            .unwrap();
        let output = FakeRemuxer::default().remux(&media.path).await.unwrap();

        AtomicReplacer::new(false, false)
            .commit(&media, output, &codec(CopyBackend::default()), &mut ledger)
            .await
            .unwrap();

        let after = std::fs::metadata(&media.path).unwrap();
        assert!(unix_secs(after.modified().unwrap()) > 1_500_000_000);
    }

    #[tokio::test]
    async fn test_diff_failure_leaves_original_alone() {
        let dir = TempDir::new().unwrap();
        let media = movie(dir.path(), "a.mp4").await;
        let mut ledger = StateManager::open(&dir.path().join("ledger.json"), false)
            .await
            .unwrap();
        let output = FakeRemuxer::default().remux(&media.path).await.unwrap();

        let err = AtomicReplacer::new(true, true)
            .commit(&media, output, &codec(CopyBackend::failing()), &mut ledger)
            .await
            .unwrap_err();

        assert_eq!(err.stage, Stage::Diff);
        assert_eq!(std::fs::read(&media.path).unwrap(), b"moov-at-end");
        assert_eq!(entries(dir.path()), vec!["a.mp4".to_string()]);
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_changed_original_is_not_replaced() {
        let dir = TempDir::new().unwrap();
        let media = movie(dir.path(), "a.mp4").await;
        let mut ledger = StateManager::open(&dir.path().join("ledger.json"), false)
            .await
            .unwrap();
        let output = FakeRemuxer::default().remux(&media.path).await.unwrap();
        std::fs::write(&media.path, b"someone else wrote this").unwrap();

        let err = AtomicReplacer::new(true, true)
            .commit(&media, output, &codec(CopyBackend::default()), &mut ledger)
            .await
            .unwrap_err();

        assert_eq!(err.stage, Stage::Replace);
        assert_eq!(std::fs::read(&media.path).unwrap(), b"someone else wrote this");
        assert!(PatchArtifact::sidecars(&media.path).is_empty());
    }

    #[tokio::test]
    async fn test_record_failure_keeps_file_recoverable() {
        let dir = TempDir::new().unwrap();
        let ledger_dir = dir.path().join("state");
        let media = movie(dir.path(), "a.mp4").await;
        let original = std::fs::read(&media.path).unwrap();
        let mut ledger = StateManager::open(&ledger_dir.join("ledger.json"), false)
            .await
            .unwrap();
        std::fs::write(&ledger_dir, b"").unwrap();
        let output = FakeRemuxer::default().remux(&media.path).await.unwrap();

        let err = AtomicReplacer::new(true, true)
            .commit(&media, output, &codec(CopyBackend::default()), &mut ledger)
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::Record);
        assert!(matches!(err.error, FixError::Ledger(_)));
        assert_ne!(std::fs::read(&media.path).unwrap(), original);
        assert_eq!(PatchArtifact::sidecars(&media.path).len(), 1);
        assert!(ledger.is_empty());

        let fresh = StateManager::open(&dir.path().join("other.json"), false)
            .await
            .unwrap();
        let current = MediaFile::stat(&media.path).await.unwrap();
        assert!(matches!(
            fresh.processed_state(&current).await,
            ProcessedState::Recovered(_)
        ));
    }

    #[test]
    fn test_swap_failure_deletes_replacement() {
        let dir = TempDir::new().unwrap();
        let target: PathBuf = dir.path().join("occupied");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("inside"), b"x").unwrap();

        let temp = tempfile::Builder::new()
            .prefix(crate::file_manager::TEMP_PREFIX)
            .tempfile_in(dir.path())
            .unwrap()
            .into_temp_path();
        let temp_location = temp.to_path_buf();
        let snapshot = FileSnapshot::capture(&target.join("inside")).unwrap();

        let err = swap(&target, temp, &snapshot, true).unwrap_err();
        assert!(!err.target_replaced());
        assert!(!temp_location.exists());
        assert!(target.join("inside").exists());
    }

    #[test]
    fn test_sync_failure_after_rename_is_reported_as_replaced() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a.mp4");
        std::fs::write(&target, b"original").unwrap();
        let snapshot = FileSnapshot::capture(&target).unwrap();

        let mut temp = tempfile::Builder::new()
            .prefix(crate::file_manager::TEMP_PREFIX)
            .tempfile_in(dir.path())
            .unwrap();
        std::io::Write::write_all(&mut temp, b"optimized").unwrap();
        let temp = temp.into_temp_path();

        let err = swap_with(&target, temp, &snapshot, true, |_| {
            Err(io::Error::other("EIO"))
        })
        .unwrap_err();

        assert!(err.target_replaced());
        assert!(err.to_string().contains("EIO"));
        assert_eq!(std::fs::read(&target).unwrap(), b"optimized");
    }
}
