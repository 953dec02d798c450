//! # Patch Codec
//!
//! Produces and applies the reversible binary patches that make every
//! replacement undoable.
//!
//! ## Responsibilities:
//! - Select one diff backend at startup from a ranked list (`backends`)
//! - `diff`: write a durable, self-describing artifact (`artifact`) whose
//!   delta rebuilds the original from the optimized file
//! - `reverse_apply`: rebuild the original, refusing artifacts from another
//!   format version or backend, artifacts made for different content, and
//!   any reconstruction whose digest does not match
//!
//! ## Example:
//! ```rust,no_run
//! # async fn demo() -> Result<(), movie_fixer::FixError> {
//! use movie_fixer::patch::PatchCodec;
//! use movie_fixer::tool_resolver::ToolPathResolver;
//! use std::path::Path;
//! use std::time::Duration;
//!
//! let codec = PatchCodec::select(&ToolPathResolver::new(), None, Duration::from_secs(900))?;
//! let artifact = codec.diff(Path::new("a.mp4"), Path::new(".movie-fixer-tmp-x.mp4")).await?;
//! codec.verify(&artifact, Path::new(".movie-fixer-tmp-x.mp4")).await?;
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod backends;

pub use artifact::{PatchArtifact, PatchHeader, PATCH_FORMAT_VERSION};
pub use backends::DiffBackend;

use crate::error::FixError;
use crate::external::{self, ToolFailure};
use crate::file_manager::{now_secs, FileManager, TEMP_PREFIX};
use crate::platform;
use crate::tool_resolver::ToolPathResolver;
use std::path::Path;
use std::time::Duration;
use tempfile::TempPath;
use tokio::process::Command;
use tracing::{debug, info};

/// Diff/patch adapter bound to one backend for the whole run
#[derive(Debug)]
pub struct PatchCodec {
    backend: Box<dyn DiffBackend>,
    timeout: Duration,
}

impl PatchCodec {
    /// Pick the first available backend, `preferred` first
    pub fn select(
        resolver: &ToolPathResolver,
        preferred: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, FixError> {
        let mut tried: Vec<&str> = Vec::new();
        for name in backends::ranked(preferred) {
            if let Some(backend) = backends::build(name, resolver) {
                info!("Using diff backend: {}", name);
                return Ok(Self::with_backend(backend, timeout));
            }
            debug!("Diff backend {} unavailable", name);
            tried.extend(backends::required_tools(name));
        }

        Err(FixError::MissingDependency(format!(
            "no binary diff backend is installed (looked for: {})",
            tried.join(", ")
        )))
    }

    /// Codec for exactly the backend named in an artifact header
    pub fn for_backend(
        name: &str,
        resolver: &ToolPathResolver,
        timeout: Duration,
    ) -> Result<Self, FixError> {
        backends::build(name, resolver)
            .map(|backend| Self::with_backend(backend, timeout))
            .ok_or_else(|| {
                FixError::MissingDependency(format!(
                    "diff backend '{}' is not installed (needs: {})",
                    name,
                    backends::required_tools(name).join(", ")
                ))
            })
    }

    pub fn with_backend(backend: Box<dyn DiffBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Write a sidecar artifact next to `original` that rebuilds it from `optimized`
    pub async fn diff(&self, original: &Path, optimized: &Path) -> Result<PatchArtifact, FixError> {
        let original_sha256 = hash(original).await?;
        let optimized_sha256 = hash(optimized).await?;
        let (original_size, _) = FileManager::get_file_info(original).await.map_err(|e| {
            FixError::patch(format!("cannot stat {}: {}", original.display(), e))
        })?;
        let (optimized_size, _) = FileManager::get_file_info(optimized).await.map_err(|e| {
            FixError::patch(format!("cannot stat {}: {}", optimized.display(), e))
        })?;

        let delta = temp_sibling(original, ".delta")?;
        self.run(
            "diff",
            self.backend.diff_command(optimized, original, &delta),
        )
        .await?;

        let header = PatchHeader {
            format_version: PATCH_FORMAT_VERSION,
            backend: self.backend.name().to_string(),
            source: original.to_path_buf(),
            created_at: now_secs(),
            original_size,
            original_sha256,
            optimized_size,
            optimized_sha256,
        };

        let media = original.to_path_buf();
        let delta_path = delta.to_path_buf();
        let artifact = tokio::task::spawn_blocking(move || {
            PatchArtifact::write(&media, header, &delta_path)
        })
        .await
        .map_err(|e| FixError::patch(format!("patch writer panicked: {}", e)))??;

        debug!(
            "Wrote patch {} ({} delta bytes)",
            artifact.path.display(),
            artifact.delta_len().unwrap_or(0)
        );
        Ok(artifact)
    }

    /// Prove that `artifact` rebuilds its original from `optimized`
    pub async fn verify(&self, artifact: &PatchArtifact, optimized: &Path) -> Result<(), FixError> {
        let restored = self.reverse_apply(optimized, artifact).await?;
        drop(restored);
        Ok(())
    }

    /// Rebuild the original bytes into a temp file next to `optimized`
    pub async fn reverse_apply(
        &self,
        optimized: &Path,
        artifact: &PatchArtifact,
    ) -> Result<TempPath, FixError> {
        let header = &artifact.header;
        if header.format_version != PATCH_FORMAT_VERSION {
            return Err(FixError::patch(format!(
                "{} uses patch format v{}, expected v{}",
                artifact.path.display(),
                header.format_version,
                PATCH_FORMAT_VERSION
            )));
        }
        if header.backend != self.backend.name() {
            return Err(FixError::patch(format!(
                "{} was made with '{}' but the active backend is '{}'",
                artifact.path.display(),
                header.backend,
                self.backend.name()
            )));
        }

        let current = hash(optimized).await?;
        if current != header.optimized_sha256 {
            return Err(FixError::patch(format!(
                "{} does not match the content {} was created for",
                optimized.display(),
                artifact.path.display()
            )));
        }

        let delta = temp_sibling(optimized, ".delta")?;
        let source = artifact.clone();
        let delta_path = delta.to_path_buf();
        tokio::task::spawn_blocking(move || source.extract_delta(&delta_path))
            .await
            .map_err(|e| FixError::patch(format!("delta extraction panicked: {}", e)))??;

        let restored = temp_sibling(optimized, ".restore")?;
        self.run(
            "reverse apply",
            self.backend.apply_command(optimized, &delta, &restored),
        )
        .await?;

        let restored_sha256 = hash(&restored).await?;
        if restored_sha256 != header.original_sha256 {
            return Err(FixError::patch(format!(
                "reconstruction from {} does not match the recorded original digest",
                artifact.path.display()
            )));
        }

        Ok(restored)
    }

    async fn run(&self, action: &str, cmd: Command) -> Result<(), FixError> {
        let tool = self.backend.name();
        external::run_tool(tool, cmd, self.timeout)
            .await
            .map(|_| ())
            .map_err(|failure| match failure {
                ToolFailure::Spawn(e) => {
                    FixError::patch(format!("{} {}: failed to execute: {}", tool, action, e))
                }
                other => FixError::patch(format!("{} {} {}", tool, action, other)),
            })
    }
}

async fn hash(path: &Path) -> Result<String, FixError> {
    FileManager::sha256(path)
        .await
        .map_err(|e| FixError::patch(format!("cannot hash {}: {}", path.display(), e)))
}

/// Empty temp file in the same directory as `path`, deleted on drop
fn temp_sibling(path: &Path, suffix: &str) -> Result<TempPath, FixError> {
    tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(suffix)
        .tempfile_in(platform::parent_dir(path))
        .map(|file| file.into_temp_path())
        .map_err(|e| {
            FixError::patch(format!(
                "cannot create temp file next to {}: {}",
                path.display(),
                e
            ))
        })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::CopyBackend;
    use tempfile::TempDir;

    fn codec() -> PatchCodec {
        PatchCodec::with_backend(Box::new(CopyBackend::default()), Duration::from_secs(30))
    }

    fn fixture(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
        let original = dir.join("a.mp4");
        let optimized = dir.join(".movie-fixer-tmp-opt.mp4");
        std::fs::write(&original, b"moov-at-end original bytes").unwrap();
        std::fs::write(&optimized, b"moov-first optimized bytes!").unwrap();
        (original, optimized)
    }

    #[tokio::test]
    async fn test_round_trip_restores_original_bytes() {
        let dir = TempDir::new().unwrap();
        let (original, optimized) = fixture(dir.path());
        let backend = CopyBackend::default();
        let diff_calls = backend.diff_calls.clone();
        let codec = PatchCodec::with_backend(Box::new(backend), Duration::from_secs(30));

        let artifact = codec.diff(&original, &optimized).await.unwrap();
        assert_eq!(diff_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(artifact.header.backend, "copy");
        assert_eq!(artifact.header.original_size, 26);
        assert!(artifact.path.exists());

        let restored = codec.reverse_apply(&optimized, &artifact).await.unwrap();
        assert_eq!(
            std::fs::read(&restored).unwrap(),
            std::fs::read(&original).unwrap()
        );
        codec.verify(&artifact, &optimized).await.unwrap();
    }

    #[tokio::test]
    async fn test_refuses_wrong_content() {
        let dir = TempDir::new().unwrap();
        let (original, optimized) = fixture(dir.path());
        let codec = codec();
        let artifact = codec.diff(&original, &optimized).await.unwrap();

        std::fs::write(&optimized, b"someone edited this file").unwrap();
        let err = codec.reverse_apply(&optimized, &artifact).await.unwrap_err();
        assert!(matches!(err, FixError::Patch(_)));
    }

    #[tokio::test]
    async fn test_refuses_other_backend() {
        let dir = TempDir::new().unwrap();
        let (original, optimized) = fixture(dir.path());
        let mut artifact = codec().diff(&original, &optimized).await.unwrap();
        artifact.header.backend = "bsdiff".to_string();

        let err = codec().reverse_apply(&optimized, &artifact).await.unwrap_err();
        assert!(err.to_string().contains("bsdiff"), "{err}");
    }

    #[tokio::test]
    async fn test_refuses_corrupt_delta() {
        let dir = TempDir::new().unwrap();
        let (original, optimized) = fixture(dir.path());
        let codec = codec();
        let artifact = codec.diff(&original, &optimized).await.unwrap();

        let mut bytes = std::fs::read(&artifact.path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&artifact.path, bytes).unwrap();

        let err = codec.reverse_apply(&optimized, &artifact).await.unwrap_err();
        assert!(err.to_string().contains("does not match"), "{err}");
    }

    #[tokio::test]
    async fn test_failing_tool_leaves_no_artifact() {
        let dir = TempDir::new().unwrap();
        let (original, optimized) = fixture(dir.path());
        let codec = PatchCodec::with_backend(
            Box::new(CopyBackend::failing()),
            Duration::from_secs(30),
        );

        let err = codec.diff(&original, &optimized).await.unwrap_err();
        assert!(matches!(err, FixError::Patch(_)));
        assert!(PatchArtifact::sidecars(&original).is_empty());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".delta"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_select_without_backends_is_missing_dependency() {
        let dir = TempDir::new().unwrap();
        let resolver = ToolPathResolver::isolated(dir.path());
        let err = PatchCodec::select(&resolver, None, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, FixError::MissingDependency(_)));
        assert!(err.to_string().contains("xdelta3"));
        assert!(err.to_string().contains("bspatch"));
    }

    #[tokio::test]
    async fn test_real_backends_round_trip_when_installed() {
        let resolver = ToolPathResolver::new();
        for name in backends::BACKEND_NAMES {
            let Ok(codec) = PatchCodec::for_backend(name, &resolver, Duration::from_secs(60))
            else {
                // Not installed here; nothing to exercise
                continue;
            };
            let dir = TempDir::new().unwrap();
            let (original, optimized) = fixture(dir.path());
            let artifact = codec.diff(&original, &optimized).await.unwrap();
            codec.verify(&artifact, &optimized).await.unwrap();
        }
    }
}
