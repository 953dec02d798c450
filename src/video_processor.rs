//! # Video Processing Module
//!
//! Questo modulo gestisce il remux dei film tramite FFmpeg.
//!
//! ## Responsabilità:
//! - Remux lossless (`-c copy`): nessuna ricodifica di audio o video
//! - Sposta l'atomo `moov` in testa (`+faststart`) per lo streaming progressivo
//! - Rigenera i timestamp mancanti (`+genpts+igndts`)
//! - Preserva tutti gli stream (`-map 0`) e i metadata (`-map_metadata 0`)
//! - Timeout per invocazione (default 900s), il processo viene ucciso allo scadere
//!
//! ## Output:
//! - Un file temporaneo nascosto nella stessa directory dell'originale
//!   (`.movie-fixer-tmp-XXXX.<ext>`), così il rename finale resta atomico
//! - Il file temporaneo viene cancellato automaticamente se non viene mai
//!   promosso a originale
//!
//! ## Esempio:
//! ```rust,no_run
//! # async fn demo() -> Result<(), movie_fixer::FixError> {
//! use movie_fixer::config::Config;
//! use movie_fixer::tool_resolver::ToolPathResolver;
//! use movie_fixer::video_processor::{FfmpegRemuxer, Remux};
//! use std::path::Path;
//!
//! let remuxer = FfmpegRemuxer::new(&Config::default(), &ToolPathResolver::new())?;
//! let output = remuxer.remux(Path::new("/movies/a.mp4")).await?;
//! println!("optimized copy at {}", output.path().display());
//! # Ok(())
//! # }
//! ```

use crate::config::Config;
use crate::error::FixError;
use crate::external::{self, ToolFailure};
use crate::file_manager::TEMP_PREFIX;
use crate::platform;
use crate::tool_resolver::ToolPathResolver;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempPath;
use tokio::process::Command;
use tracing::debug;

/// Produces an optimized copy of a movie
#[allow(async_fn_in_trait)]
pub trait Remux {
    async fn remux(&self, source: &Path) -> Result<RemuxOutput, FixError>;
}

/// An optimized copy waiting to replace its original
#[derive(Debug)]
pub struct RemuxOutput {
    temp: TempPath,
}

impl RemuxOutput {
    pub fn new(temp: TempPath) -> Self {
        Self { temp }
    }

    pub fn path(&self) -> &Path {
        &self.temp
    }

    pub fn into_temp_path(self) -> TempPath {
        self.temp
    }
}

/// Remuxes with the ffmpeg binary
#[derive(Debug, Clone)]
pub struct FfmpegRemuxer {
    ffmpeg: PathBuf,
    timeout: Duration,
}

impl FfmpegRemuxer {
    /// Use `ffmpeg_path` from the config, or resolve ffmpeg like any other tool
    pub fn new(config: &Config, resolver: &ToolPathResolver) -> Result<Self, FixError> {
        let ffmpeg = match config.ffmpeg_path {
            Some(ref path) => path.clone(),
            None => resolver
                .check_tool_with_instructions("ffmpeg")
                .map_err(FixError::MissingDependency)?,
        };
        Ok(Self::with_binary(
            ffmpeg,
            Duration::from_secs(config.remux_timeout_secs),
        ))
    }

    pub fn with_binary<P: Into<PathBuf>>(ffmpeg: P, timeout: Duration) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            timeout,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.ffmpeg
    }

    /// Arguments for a lossless faststart remux of `source` into `output`
    pub fn ffmpeg_args(source: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-nostdin",
            "-hide_banner",
            "-v",
            "error",
            "-fflags",
            "+genpts+igndts",
            "-i",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push(source.as_os_str().to_os_string());
        args.extend(
            [
                "-map",
                "0",
                "-c",
                "copy",
                "-map_metadata",
                "0",
                "-movflags",
                "+faststart",
                "-y",
            ]
            .iter()
            .map(OsString::from),
        );
        args.push(output.as_os_str().to_os_string());
        args
    }
}

impl Remux for FfmpegRemuxer {
    async fn remux(&self, source: &Path) -> Result<RemuxOutput, FixError> {
        // Same extension so ffmpeg picks the same container
        let suffix = source
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(&suffix)
            .tempfile_in(platform::parent_dir(source))
            .map_err(|e| {
                FixError::remux(format!(
                    "cannot create temp file next to {}: {}",
                    source.display(),
                    e
                ))
            })?
            .into_temp_path();

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(Self::ffmpeg_args(source, &temp));

        external::run_tool("ffmpeg", cmd, self.timeout)
            .await
            .map_err(|failure| match failure {
                ToolFailure::Spawn(e) => FixError::remux(format!(
                    "failed to execute {}: {}",
                    self.ffmpeg.display(),
                    e
                )),
                other => FixError::remux(format!("ffmpeg {}", other)),
            })?;

        let size = tokio::fs::metadata(&temp)
            .await
            .map_err(|e| FixError::remux(format!("ffmpeg output vanished: {}", e)))?
            .len();
        if size == 0 {
            return Err(FixError::remux(format!(
                "ffmpeg produced an empty file for {}",
                source.display()
            )));
        }

        debug!("Remuxed {} ({} bytes)", source.display(), size);
        Ok(RemuxOutput::new(temp))
    }
}
