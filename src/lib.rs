//! # Movie Fixer Library
//!
//! Questo è il modulo principale della libreria che espone tutte le API pubbliche.
//!
//! ## Responsabilità:
//! - Definisce la struttura modulare dell'applicazione
//! - Espone i tipi e le funzioni principali tramite re-exports
//! - Fornisce un'interfaccia pulita per il main.rs e per altri consumatori
//!
//! ## Architettura dei moduli:
//! - `config`: Gestione configurazione e validazione parametri
//! - `error`: Tassonomia degli errori e stadi della pipeline
//! - `file_manager`: Discovery dei film e utility sui file
//! - `group_filter`: Filtro sul gruppo proprietario
//! - `state`: Ledger dei file processati e persistenza durevole
//! - `video_processor`: Remux lossless con FFmpeg
//! - `patch`: Patch binarie reversibili e backend di diff
//! - `replacer`: Sostituzione atomica con preservazione metadata
//! - `optimizer`: Orchestratore del batch e pipeline per file
//! - `revert`: Ripristino degli originali dalle patch
//! - `tool_resolver`, `external`, `platform`: tool esterni e shim di piattaforma
//! - `progress`: Spinner e statistiche
//!
//! ## Utilizzo:
//! ```rust,no_run
//! use movie_fixer::{BatchOptimizer, Config, ToolPathResolver};
//! use std::path::Path;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let root = Path::new("/movies");
//! let config = Config::default();
//! let resolver = ToolPathResolver::new();
//! let mut optimizer = BatchOptimizer::with_ffmpeg(root, config, &resolver).await?;
//! let summary = optimizer.run(root).await?;
//! println!("{}", summary.stats.format_summary());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod external;
pub mod file_manager;
pub mod group_filter;
pub mod optimizer;
pub mod patch;
pub mod platform;
pub mod progress;
pub mod replacer;
pub mod revert;
pub mod state;
pub mod tool_resolver;
pub mod video_processor;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;
pub use error::{FixError, Stage, StageError};
pub use optimizer::{BatchOptimizer, FileOutcome, RunSummary, SkipReason};
pub use patch::{PatchArtifact, PatchCodec};
pub use revert::{RevertOptions, Reverter};
pub use state::{ProcessedState, ProcessingRecord, StateManager};
pub use tool_resolver::ToolPathResolver;
pub use video_processor::{FfmpegRemuxer, Remux};
