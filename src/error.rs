//! # Error Types Module
//!
//! Questo modulo definisce tutti i tipi di errore custom dell'applicazione.
//!
//! ## Responsabilità:
//! - Definisce `FixError` enum per categorizzare tutti gli errori possibili
//! - Espone un `ErrorKind` stabile, indipendente dal tool esterno che ha fallito
//! - Definisce `Stage` e `StageError` per associare un errore alla fase della pipeline
//!
//! ## Categorie di errori:
//! - `Discovery`: root o sottodirectory non accessibile
//! - `Remux`: ffmpeg mancante, exit code non zero, output vuoto o timeout
//! - `Patch`: nessun backend di diff, fallimento del tool, patch incompatibile
//! - `Replace`: errore filesystem durante cattura metadata o swap del file
//! - `Ledger`: scrittura del ledger fallita
//! - `MissingDependency`: tool esterno richiesto non installato
//! - `Config`: configurazione non valida
//!
//! ## Politica di propagazione:
//! - Solo `Discovery` sulla root, `MissingDependency` per il diff e `Config` sono fatali
//! - Tutto il resto viene catturato dall'orchestratore per singolo file
//!
//! ## Esempio:
//! ```rust
//! use movie_fixer::error::FixError;
//!
//! let err = FixError::remux("ffmpeg exited with status 1");
//! assert_eq!(err.kind().as_str(), "remux");
//! ```

use std::fmt;
use std::path::PathBuf;

/// Custom error types for the fix/revert pipeline
#[derive(thiserror::Error, Debug)]
pub enum FixError {
    #[error("Discovery error at {path}: {message}")]
    Discovery { path: PathBuf, message: String },

    #[error("Remux error: {0}")]
    Remux(String),

    #[error("Patch error: {0}")]
    Patch(String),

    #[error("Replace error: {0}")]
    Replace(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Dependency missing: {0}")]
    MissingDependency(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable category of a [`FixError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Discovery,
    Remux,
    Patch,
    Replace,
    Ledger,
    MissingDependency,
    Config,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Remux => "remux",
            Self::Patch => "patch",
            Self::Replace => "replace",
            Self::Ledger => "ledger",
            Self::MissingDependency => "missing-dependency",
            Self::Config => "config",
            Self::Io => "io",
        }
    }
}

impl FixError {
    pub fn discovery<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        FixError::Discovery {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn remux<S: Into<String>>(msg: S) -> Self {
        FixError::Remux(msg.into())
    }

    pub fn patch<S: Into<String>>(msg: S) -> Self {
        FixError::Patch(msg.into())
    }

    pub fn replace<S: Into<String>>(msg: S) -> Self {
        FixError::Replace(msg.into())
    }

    pub fn ledger<S: Into<String>>(msg: S) -> Self {
        FixError::Ledger(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        FixError::Config(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FixError::Discovery { .. } => ErrorKind::Discovery,
            FixError::Remux(_) => ErrorKind::Remux,
            FixError::Patch(_) => ErrorKind::Patch,
            FixError::Replace(_) => ErrorKind::Replace,
            FixError::Ledger(_) => ErrorKind::Ledger,
            FixError::MissingDependency(_) => ErrorKind::MissingDependency,
            FixError::Config(_) => ErrorKind::Config,
            FixError::Io(_) => ErrorKind::Io,
        }
    }

    /// Errors that would fail every file, so the whole run stops
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FixError::Discovery { .. } | FixError::MissingDependency(_) | FixError::Config(_)
        )
    }
}

/// Pipeline stage a per-file failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Discovery,
    Remux,
    Diff,
    Replace,
    Record,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Discovery => "discovery",
            Stage::Remux => "remux",
            Stage::Diff => "diff",
            Stage::Replace => "replace",
            Stage::Record => "record",
        };
        f.write_str(name)
    }
}

/// A [`FixError`] tagged with the stage that produced it
#[derive(thiserror::Error, Debug)]
#[error("{stage} stage failed: {error}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub error: FixError,
}

impl StageError {
    pub fn new(stage: Stage, error: FixError) -> Self {
        Self { stage, error }
    }
}

pub type Result<T> = std::result::Result<T, FixError>;
