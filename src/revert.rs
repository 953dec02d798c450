//! # Reversion
//!
//! Riporta un film al contenuto originale applicando al contrario la sua patch.
//!
//! ## Ricerca della patch (in ordine):
//! 1. `--patch` esplicito
//! 2. La patch indicata dal record del ledger, se corrisponde al contenuto attuale
//! 3. La patch sidecar più recente il cui digest ottimizzato corrisponde al file
//!
//! Con `--all` la reversione continua finché esiste una patch che corrisponde,
//! annullando anche le esecuzioni forzate ripetute. Il file viene sostituito con
//! lo stesso rename atomico usato dall'ottimizzazione e il record nel ledger
//! viene rimosso.

use crate::config::DEFAULT_LEDGER_NAME;
use crate::error::FixError;
use crate::file_manager::FileManager;
use crate::patch::{PatchArtifact, PatchCodec};
use crate::platform;
use crate::replacer::{self, FileSnapshot, SwapError};
use crate::state::StateManager;
use crate::tool_resolver::ToolPathResolver;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How to revert one file
#[derive(Debug, Clone)]
pub struct RevertOptions {
    /// Use this artifact for the first step
    pub patch: Option<PathBuf>,
    /// Keep reverting while a matching artifact exists
    pub all: bool,
    /// Delete each artifact after it was applied
    pub remove_patch: bool,
    pub preserve_mtime: bool,
}

impl Default for RevertOptions {
    fn default() -> Self {
        Self {
            patch: None,
            all: false,
            remove_patch: false,
            preserve_mtime: true,
        }
    }
}

/// What a reversion did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertReport {
    pub path: PathBuf,
    /// Artifacts applied, newest first
    pub applied: Vec<PathBuf>,
}

/// Applies patch artifacts in reverse
pub struct Reverter {
    resolver: ToolPathResolver,
    timeout: Duration,
    fixed_codec: Option<PatchCodec>,
}

impl Reverter {
    /// Reverter that picks the backend named in each artifact header
    pub fn new(resolver: ToolPathResolver, timeout: Duration) -> Self {
        Self {
            resolver,
            timeout,
            fixed_codec: None,
        }
    }

    /// Reverter bound to one codec
    pub fn with_codec(codec: PatchCodec) -> Self {
        Self {
            resolver: ToolPathResolver::new(),
            timeout: Duration::from_secs(0),
            fixed_codec: Some(codec),
        }
    }

    pub async fn revert(
        &self,
        file: &Path,
        ledger: &mut StateManager,
        options: &RevertOptions,
    ) -> Result<RevertReport, FixError> {
        let path = tokio::fs::canonicalize(file).await?;
        let mut report = RevertReport {
            path: path.clone(),
            applied: Vec::new(),
        };
        let mut explicit = options.patch.clone();

        let outcome = loop {
            let located = match explicit.take() {
                Some(patch) => PatchArtifact::read(&patch).map(Some),
                None => self.locate(&path, ledger).await,
            };
            let artifact = match located {
                Ok(Some(artifact)) => artifact,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };

            if let Err(e) = self.revert_once(&path, &artifact, options).await {
                break Err(e);
            }
            info!(
                "Reverted {} with {}",
                path.display(),
                artifact.path.display()
            );

            if options.remove_patch {
                if let Err(e) = artifact.remove() {
                    warn!("Could not remove {}: {}", artifact.path.display(), e);
                }
            }
            report.applied.push(artifact.path);

            if !options.all {
                break Ok(());
            }
        };

        // Any step taken invalidates the record, even if a later one failed
        if !report.applied.is_empty() {
            ledger.remove(&path).await?;
        }
        outcome?;

        if report.applied.is_empty() {
            return Err(FixError::patch(format!(
                "no patch matches the current content of {}",
                path.display()
            )));
        }
        Ok(report)
    }

    /// Ledger record first, then sidecars matching the current content
    async fn locate(
        &self,
        path: &Path,
        ledger: &StateManager,
    ) -> Result<Option<PatchArtifact>, FixError> {
        let digest = FileManager::sha256(path)
            .await
            .map_err(|e| FixError::patch(format!("cannot hash {}: {}", path.display(), e)))?;

        if let Some(patch) = ledger.get(path).and_then(|record| record.patch.clone()) {
            match PatchArtifact::read(&patch) {
                Ok(artifact) if artifact.header.optimized_sha256 == digest => {
                    return Ok(Some(artifact));
                }
                Ok(_) => debug!("Ledger patch {} is for other content", patch.display()),
                Err(e) => debug!("Ledger patch unusable: {}", e),
            }
        }

        let media = path.to_path_buf();
        let sidecars = tokio::task::spawn_blocking(move || PatchArtifact::sidecars(&media))
            .await
            .unwrap_or_default();
        Ok(sidecars
            .into_iter()
            .find(|artifact| artifact.header.optimized_sha256 == digest))
    }

    async fn revert_once(
        &self,
        path: &Path,
        artifact: &PatchArtifact,
        options: &RevertOptions,
    ) -> Result<(), FixError> {
        let resolved;
        let codec = match self.fixed_codec {
            Some(ref codec) => codec,
            None => {
                resolved = PatchCodec::for_backend(
                    &artifact.header.backend,
                    &self.resolver,
                    self.timeout,
                )?;
                &resolved
            }
        };

        let restored = codec.reverse_apply(path, artifact).await?;

        let target = path.to_path_buf();
        let preserve = options.preserve_mtime;
        let swapped = tokio::task::spawn_blocking(move || {
            let snapshot = FileSnapshot::capture(&target).map_err(SwapError::NotReplaced)?;
            replacer::swap(&target, restored, &snapshot, preserve)
        })
        .await
        .map_err(|e| FixError::replace(format!("cannot restore {}: {}", path.display(), e)))?;

        match swapped {
            Ok(()) => Ok(()),
            Err(e) if e.target_replaced() => {
                warn!("{} was restored but {}", path.display(), e);
                Ok(())
            }
            Err(e) => Err(FixError::replace(format!(
                "cannot restore {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// Nearest `.movie-fixer-ledger.json` in `file`'s directory or its ancestors
pub fn find_ledger(file: &Path) -> PathBuf {
    let start = platform::parent_dir(file);
    start
        .ancestors()
        .map(|dir| dir.join(DEFAULT_LEDGER_NAME))
        .find(|candidate| candidate.is_file())
        .unwrap_or_else(|| start.join(DEFAULT_LEDGER_NAME))
}
