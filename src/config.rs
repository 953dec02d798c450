//! # Configuration Management Module
//!
//! Questo modulo gestisce tutta la configurazione dell'applicazione.
//!
//! ## Responsabilità:
//! - Definisce la struct `Config` con tutti i parametri della pipeline
//! - Fornisce validazione dei parametri di input
//! - Supporta caricamento/salvataggio configurazione da/verso file JSON
//! - Fornisce valori di default sensati per tutti i parametri
//!
//! ## Parametri di configurazione:
//! - `recursive`: Scansione ricorsiva delle sottodirectory (default: false)
//! - `force`: Riprocessa anche i file già ottimizzati (default: false)
//! - `group_id`: Processa solo i file con questo GID (default: None = tutti)
//! - `ledger_path`: Percorso del ledger (default: `<root>/.movie-fixer-ledger.json`)
//! - `extensions`: Estensioni video accettate (default: mp4, mkv, avi, mov)
//! - `remux_timeout_secs` / `patch_timeout_secs`: Timeout tool esterni (default: 900)
//! - `preferred_backend`: Backend di diff da provare per primo (default: None)
//! - `verify_patches`: Verifica la patch prima di sostituire l'originale (default: true)
//! - `preserve_mtime`: Ripristina atime/mtime originali (default: true)
//! - `dry_run`: Nessuna modifica su disco (default: false)
//! - `ffmpeg_path`: Percorso esplicito di ffmpeg (default: None = risoluzione automatica)
//! - `show_progress`: Spinner di avanzamento (default: true)
//!
//! ## Esempio:
//! ```rust
//! use movie_fixer::Config;
//!
//! let config = Config {
//!     recursive: true,
//!     group_id: Some(1001),
//!     ..Default::default()
//! };
//! config.validate().unwrap();
//! ```

use crate::patch::backends::BACKEND_NAMES;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default ledger file name, created inside the media root
pub const DEFAULT_LEDGER_NAME: &str = ".movie-fixer-ledger.json";

/// Configuration for a fix run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Walk subdirectories
    pub recursive: bool,
    /// Reprocess files that already have a successful record
    pub force: bool,
    /// Only process files owned by this group id
    pub group_id: Option<u32>,
    /// Ledger location (None = DEFAULT_LEDGER_NAME inside the root)
    pub ledger_path: Option<PathBuf>,
    /// Accepted extensions, lowercase, without the dot
    pub extensions: Vec<String>,
    /// Timeout for a single ffmpeg invocation
    pub remux_timeout_secs: u64,
    /// Timeout for a single diff/patch tool invocation
    pub patch_timeout_secs: u64,
    /// Diff backend to try before the built-in ranking
    pub preferred_backend: Option<String>,
    /// Reverse-apply every new patch before touching the original
    pub verify_patches: bool,
    /// Restore the original access/modification times after replacement
    pub preserve_mtime: bool,
    /// Dry run - report what would be processed without writing anything
    pub dry_run: bool,
    /// Explicit ffmpeg binary
    pub ffmpeg_path: Option<PathBuf>,
    /// Draw a progress spinner on stderr
    pub show_progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recursive: false,
            force: false,
            group_id: None,
            ledger_path: None,
            extensions: ["mp4", "mkv", "avi", "mov"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            remux_timeout_secs: 900,
            patch_timeout_secs: 900,
            preferred_backend: None,
            verify_patches: true,
            preserve_mtime: true,
            dry_run: false,
            ffmpeg_path: None,
            show_progress: true,
        }
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.extensions.is_empty() {
            return Err(anyhow::anyhow!("At least one file extension is required"));
        }

        if let Some(bad) = self
            .extensions
            .iter()
            .find(|ext| ext.is_empty() || ext.starts_with('.'))
        {
            return Err(anyhow::anyhow!(
                "Extensions must be given without a leading dot: {:?}",
                bad
            ));
        }

        if self.remux_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Remux timeout must be greater than 0"));
        }

        if self.patch_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Patch timeout must be greater than 0"));
        }

        if let Some(ref backend) = self.preferred_backend {
            if !BACKEND_NAMES.contains(&backend.as_str()) {
                return Err(anyhow::anyhow!(
                    "Unknown diff backend '{}' (known: {})",
                    backend,
                    BACKEND_NAMES.join(", ")
                ));
            }
        }

        if let Some(ref ffmpeg) = self.ffmpeg_path {
            if !ffmpeg.exists() {
                return Err(anyhow::anyhow!(
                    "ffmpeg path does not exist: {}",
                    ffmpeg.display()
                ));
            }
        }

        Ok(())
    }

    /// Resolve where the ledger lives for a given media root
    pub fn ledger_location(&self, root: &Path) -> PathBuf {
        self.ledger_path
            .clone()
            .unwrap_or_else(|| root.join(DEFAULT_LEDGER_NAME))
    }

    /// Load configuration from file
    pub async fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}
