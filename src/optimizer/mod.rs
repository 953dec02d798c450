//! # Optimizer Module
//!
//! Separa le responsabilità in sottomoduli:
//! - `media_optimizer`: Orchestratore principale del batch
//! - `task_optimizer`: Pipeline del singolo file
//! - `progress_tracker`: Spinner, statistiche e log degli esiti

pub mod media_optimizer;
pub mod progress_tracker;
pub mod task_optimizer;

pub use media_optimizer::{BatchOptimizer, RunSummary};
pub use progress_tracker::{FailedFile, ProgressTracker};
pub use task_optimizer::{FileOutcome, FilePipeline, SkipReason};
