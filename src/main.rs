//! # Movie Fixer - Main Entry Point
//!
//! Questo è il punto di ingresso principale dell'applicazione.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti della command line con `clap`
//! - Inizializzazione del sistema di logging con `tracing`
//! - Merge tra file di configurazione e flag della CLI
//! - Gestione di Ctrl-C: il file in corso termina, poi il run si ferma
//! - Exit code non zero se un file fallisce o se il run è fatale
//!
//! ## Sottocomandi:
//! 1. `fix`: remux di tutti i film di una directory, con patch reversibili
//! 2. `revert`: ripristina un film dal contenuto originale
//! 3. `status`: dice se i film indicati risultano già ottimizzati
//! 4. `tools`: report di disponibilità dei tool esterni
//!
//! ## Esempio di utilizzo:
//! ```bash
//! movie-fixer fix /srv/movies --recursive --group 1001
//! movie-fixer revert /srv/movies/a.mp4 --remove-patch
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use movie_fixer::revert::{find_ledger, RevertOptions, Reverter};
use movie_fixer::{BatchOptimizer, Config, StateManager, ToolPathResolver};

#[derive(Parser)]
#[command(name = "movie-fixer", version)]
#[command(about = "Remux movies for fast seeking, keeping a reversible patch of every change")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Remux every movie in a directory
    Fix(FixArgs),
    /// Restore a movie's original content from its patch
    Revert(RevertArgs),
    /// Tell whether movies are already fixed
    Status(StatusArgs),
    /// Show which external tools are available
    Tools,
}

#[derive(Args)]
struct FixArgs {
    /// Directory containing the movies
    directory: PathBuf,

    /// Walk subdirectories
    #[arg(short, long)]
    recursive: bool,

    /// Process files again even if they were already fixed
    #[arg(short, long)]
    force: bool,

    /// Only process files owned by this group id
    #[arg(short = 'g', long = "group", value_name = "GID")]
    group: Option<u32>,

    /// Ledger file (default: <DIRECTORY>/.movie-fixer-ledger.json)
    #[arg(long, value_name = "PATH")]
    ledger: Option<PathBuf>,

    /// Diff backend to try first (xdelta3, hdiffpatch, bsdiff)
    #[arg(long, value_name = "NAME")]
    backend: Option<String>,

    /// Timeout for one ffmpeg run
    #[arg(long, value_name = "SECS")]
    remux_timeout: Option<u64>,

    /// Timeout for one diff/patch tool run
    #[arg(long, value_name = "SECS")]
    patch_timeout: Option<u64>,

    /// Skip the reverse-apply check of new patches
    #[arg(long)]
    no_verify: bool,

    /// Let replaced files take the current time as modification time
    #[arg(long)]
    no_preserve_mtime: bool,

    /// Dry run - report what would be processed without writing anything
    #[arg(long)]
    dry_run: bool,

    /// JSON configuration file; flags override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Do not draw the progress spinner
    #[arg(long)]
    no_progress: bool,
}

#[derive(Args)]
struct RevertArgs {
    /// Movie to restore
    file: PathBuf,

    /// Patch artifact to apply (default: found via the ledger or next to the file)
    #[arg(long, value_name = "PATH")]
    patch: Option<PathBuf>,

    /// Ledger file (default: nearest .movie-fixer-ledger.json upwards)
    #[arg(long, value_name = "PATH")]
    ledger: Option<PathBuf>,

    /// Keep reverting while an older patch matches (undoes forced runs)
    #[arg(long)]
    all: bool,

    /// Delete each patch once it has been applied
    #[arg(long)]
    remove_patch: bool,

    /// Timeout for one patch tool run
    #[arg(long, value_name = "SECS", default_value_t = 900)]
    patch_timeout: u64,

    /// Let the restored file take the current time as modification time
    #[arg(long)]
    no_preserve_mtime: bool,
}

#[derive(Args)]
struct StatusArgs {
    /// Movies to check
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Ledger file (default: nearest .movie-fixer-ledger.json upwards)
    #[arg(long, value_name = "PATH")]
    ledger: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    match cli.command {
        Command::Fix(args) => run_fix(args).await,
        Command::Revert(args) => run_revert(args).await,
        Command::Status(args) => run_status(args).await,
        Command::Tools => {
            println!("{}", ToolPathResolver::new().get_tools_report());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn load_config(args: &FixArgs) -> Result<Config> {
    let mut config = match args.config {
        Some(ref path) => {
            if !path.is_file() {
                return Err(anyhow::anyhow!(
                    "Config file does not exist: {}",
                    path.display()
                ));
            }
            Config::from_file(path)
                .await
                .with_context(|| format!("Invalid config file {}", path.display()))?
        }
        None => Config::default(),
    };

    config.recursive |= args.recursive;
    config.force |= args.force;
    config.dry_run |= args.dry_run;
    if args.group.is_some() {
        config.group_id = args.group;
    }
    if args.ledger.is_some() {
        config.ledger_path = args.ledger.clone();
    }
    if args.backend.is_some() {
        config.preferred_backend = args.backend.clone();
    }
    if let Some(secs) = args.remux_timeout {
        config.remux_timeout_secs = secs;
    }
    if let Some(secs) = args.patch_timeout {
        config.patch_timeout_secs = secs;
    }
    if args.no_verify {
        config.verify_patches = false;
    }
    if args.no_preserve_mtime {
        config.preserve_mtime = false;
    }
    if args.no_progress {
        config.show_progress = false;
    }

    config.validate()?;
    Ok(config)
}

async fn run_fix(args: FixArgs) -> Result<ExitCode> {
    if !args.directory.is_dir() {
        return Err(anyhow::anyhow!(
            "Movie directory does not exist: {}",
            args.directory.display()
        ));
    }

    let config = load_config(&args).await?;
    let resolver = ToolPathResolver::new();

    let cancel = Arc::new(AtomicBool::new(false));
    watch_ctrl_c(cancel.clone());

    let mut optimizer = BatchOptimizer::with_ffmpeg(&args.directory, config, &resolver)
        .await?
        .with_cancel(cancel);
    let summary = optimizer.run(&args.directory).await?;

    if summary.cancelled {
        Ok(ExitCode::from(130))
    } else if summary.has_failures() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

async fn run_revert(args: RevertArgs) -> Result<ExitCode> {
    let file = args
        .file
        .canonicalize()
        .with_context(|| format!("Cannot access {}", args.file.display()))?;
    let ledger_path = args.ledger.clone().unwrap_or_else(|| find_ledger(&file));
    let mut ledger = StateManager::open(&ledger_path, false).await?;

    let reverter = Reverter::new(
        ToolPathResolver::new(),
        Duration::from_secs(args.patch_timeout),
    );
    let options = RevertOptions {
        patch: args.patch,
        all: args.all,
        remove_patch: args.remove_patch,
        preserve_mtime: !args.no_preserve_mtime,
    };

    let report = reverter
        .revert(&file, &mut ledger, &options)
        .await
        .with_context(|| format!("Failed to revert {}", file.display()))?;

    info!(
        "Restored {} ({} patch{} applied)",
        report.path.display(),
        report.applied.len(),
        if report.applied.len() == 1 { "" } else { "es" }
    );
    Ok(ExitCode::SUCCESS)
}

async fn run_status(args: StatusArgs) -> Result<ExitCode> {
    for file in &args.files {
        let file = file
            .canonicalize()
            .with_context(|| format!("Cannot access {}", file.display()))?;
        let ledger_path = args.ledger.clone().unwrap_or_else(|| find_ledger(&file));
        let ledger = StateManager::open(&ledger_path, false).await?;

        let state = if ledger.is_processed(&file).await {
            "fixed"
        } else {
            "not fixed"
        };
        println!("{}: {}", file.display(), state);
    }
    Ok(ExitCode::SUCCESS)
}

/// First Ctrl-C stops after the current file, the second one exits at once
fn watch_ctrl_c(cancel: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupted: finishing the current file (Ctrl-C again to abort)");
        cancel.store(true, Ordering::SeqCst);

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Aborted; leftover temp files are removed on the next run");
            std::process::exit(130);
        }
    });
}
