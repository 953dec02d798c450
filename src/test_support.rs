//! Test doubles shared by the unit tests.

use crate::error::FixError;
use crate::file_manager::TEMP_PREFIX;
use crate::patch::DiffBackend;
use crate::platform;
use crate::video_processor::{Remux, RemuxOutput};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::process::Command;

/// Diff backend whose "delta" is a plain copy of the target
#[derive(Debug, Clone, Default)]
pub struct CopyBackend {
    fail: bool,
    pub diff_calls: Arc<AtomicUsize>,
}

impl CopyBackend {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

impl DiffBackend for CopyBackend {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn diff_command(&self, _base: &Path, target: &Path, delta: &Path) -> Command {
        self.diff_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", "echo 'diff backend exploded' >&2; exit 2"]);
            return cmd;
        }
        let mut cmd = Command::new("cp");
        cmd.arg(target).arg(delta);
        cmd
    }

    fn apply_command(&self, _base: &Path, delta: &Path, output: &Path) -> Command {
        let mut cmd = Command::new("cp");
        cmd.arg(delta).arg(output);
        cmd
    }
}

/// Remuxer that prepends a marker instead of running ffmpeg
#[derive(Debug, Clone, Default)]
pub struct FakeRemuxer {
    pub calls: Arc<AtomicUsize>,
    pub fail_for: Arc<Mutex<Vec<String>>>,
    /// Temp outputs handed out so far (they may already be gone)
    pub outputs: Arc<Mutex<Vec<PathBuf>>>,
}

impl FakeRemuxer {
    pub fn fail_on(&self, file_name: &str) {
        self.fail_for.lock().unwrap().push(file_name.to_string());
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Remux for FakeRemuxer {
    async fn remux(&self, source: &Path) -> Result<RemuxOutput, FixError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = source
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        if self.fail_for.lock().unwrap().contains(&name) {
            return Err(FixError::remux(format!("ffmpeg exited with 1 for {}", name)));
        }

        let original = std::fs::read(source)?;
        let mut optimized = b"FASTSTART:".to_vec();
        optimized.extend_from_slice(&original);

        let temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".mp4")
            .tempfile_in(platform::parent_dir(source))?
            .into_temp_path();
        std::fs::write(&temp, optimized)?;
        self.outputs.lock().unwrap().push(temp.to_path_buf());
        Ok(RemuxOutput::new(temp))
    }
}
