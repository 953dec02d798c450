//! # Progress Tracking and Statistics Module
//!
//! Questo modulo gestisce il feedback visivo e le statistiche di un run.
//!
//! ## Responsabilità:
//! - Spinner con `indicatif` (la discovery è lazy, il totale non è noto a priori)
//! - Statistiche cumulative del run (file sistemati, saltati, falliti)
//! - Byte prima/dopo il remux e spazio occupato dalle patch
//! - Riepilogo finale formattato
//!
//! ## Statistiche tracciate:
//! - **files_seen**: file candidati incontrati
//! - **files_fixed**: file remuxati e sostituiti
//! - **skipped_processed**: già processati (ledger o patch sidecar)
//! - **skipped_group**: esclusi dal filtro sul gruppo
//! - **dry_run_pending**: file che un run reale processerebbe
//! - **failed**: errori per-file
//!
//! ## Visual feedback:
//! ```text
//! ⠋ [00:02:15] 42 files  [OK] movie.mp4
//! ```

use crate::file_manager::FileManager;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Manages the run spinner
#[derive(Clone)]
pub struct ProgressManager {
    bar: ProgressBar,
}

impl ProgressManager {
    /// Spinner on stderr, or a hidden one when progress is disabled
    pub fn spinner(enabled: bool) -> Self {
        if !enabled {
            return Self::hidden();
        }

        let bar = ProgressBar::new_spinner();
        let template = "{spinner:.green} [{elapsed_precise}] {pos} files  {msg}";
        if let Ok(style) = ProgressStyle::default_spinner().template(template) {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Count one file and show a message
    pub fn update(&self, message: &str) {
        self.bar.inc(1);
        self.bar.set_message(message.to_string());
    }

    /// Set a custom message without incrementing
    pub fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    /// Finish with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

/// Statistics for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub files_seen: usize,
    pub files_fixed: usize,
    pub skipped_processed: usize,
    pub skipped_group: usize,
    pub dry_run_pending: usize,
    pub failed: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub patch_bytes: u64,
}

impl BatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_fixed(&mut self, original_size: u64, new_size: u64, patch_size: u64) {
        self.files_seen += 1;
        self.files_fixed += 1;
        self.bytes_before += original_size;
        self.bytes_after += new_size;
        self.patch_bytes += patch_size;
    }

    pub fn add_already_processed(&mut self) {
        self.files_seen += 1;
        self.skipped_processed += 1;
    }

    pub fn add_group_mismatch(&mut self) {
        self.files_seen += 1;
        self.skipped_group += 1;
    }

    pub fn add_dry_run(&mut self) {
        self.files_seen += 1;
        self.dry_run_pending += 1;
    }

    pub fn add_failure(&mut self) {
        self.files_seen += 1;
        self.failed += 1;
    }

    pub fn skipped(&self) -> usize {
        self.skipped_processed + self.skipped_group + self.dry_run_pending
    }

    pub fn format_summary(&self) -> String {
        let mut summary = format!(
            "Seen: {} | Fixed: {} | Skipped: {} | Failed: {}",
            self.files_seen,
            self.files_fixed,
            self.skipped(),
            self.failed
        );
        if self.files_fixed > 0 {
            summary.push_str(&format!(
                " | Remuxed {} -> {} | Patches: {}",
                FileManager::format_size(self.bytes_before),
                FileManager::format_size(self.bytes_after),
                FileManager::format_size(self.patch_bytes)
            ));
        }
        if self.dry_run_pending > 0 {
            summary.push_str(&format!(" | Would fix: {}", self.dry_run_pending));
        }
        summary
    }
}
