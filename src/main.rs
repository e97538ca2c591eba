//! Media Cache CLI application
//!
//! Command-line entry point for the symlink acceleration cache. Each
//! invocation is one short-lived job on a current-thread runtime; cron
//! starts the scheduled ones.

use std::process;

use tracing::{debug, info};

use media_cache::app::logging::{init_logging, RotatingFile};
use media_cache::app::jobs::JobContext;
use media_cache::cli::{
    handle_clear, handle_config, handle_disable, handle_enable, handle_health, handle_monitor,
    handle_mount, handle_rollback, handle_status, handle_sweep, handle_top, handle_usage, Cli,
    Commands, ConfigAction,
};
use media_cache::config::AppConfig;
use media_cache::errors::Result;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let result = run().await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();

    // `config init` must work before any configuration exists
    let writing_config = matches!(
        &cli.command,
        Commands::Config(args) if matches!(args.action, ConfigAction::Init { .. })
    );
    let mut config = if writing_config {
        AppConfig::default()
    } else {
        AppConfig::load(cli.global.config.clone()).await?
    };
    if let Some(cache_dir) = &cli.global.cache_dir {
        config.paths.cache_root = cache_dir.clone();
    }

    setup_logging(&cli, &config);
    info!("Media Cache v{} starting", env!("CARGO_PKG_VERSION"));

    if let Commands::Config(args) = cli.command {
        return handle_config(args.action, &config).await;
    }

    config.validate()?;
    let ctx = JobContext::new(config, cli.global.config.clone());

    match cli.command {
        Commands::Status => handle_status(&ctx).await,
        Commands::Enable => handle_enable(&ctx).await,
        Commands::Disable => handle_disable(&ctx).await,
        Commands::Sweep(args) => handle_sweep(&ctx, args).await,
        Commands::Monitor(args) => handle_monitor(&ctx, args).await,
        Commands::Clear(args) => handle_clear(&ctx, args).await,
        Commands::Usage => handle_usage(&ctx).await,
        Commands::Health { fix } => handle_health(&ctx, fix).await,
        Commands::Top { limit, category } => handle_top(&ctx, limit, category).await,
        Commands::Rollback(args) => handle_rollback(&ctx, args).await,
        Commands::Mount(args) => handle_mount(&ctx, args.action).await,
        Commands::Config(_) => Ok(()),
    }
}

/// Initialize logging from the verbosity flags and the logging section
///
/// Job commands also append to `<state_dir>/logs/<job>.log`.
fn setup_logging(cli: &Cli, config: &AppConfig) {
    let level = cli.log_level(&config.logging.level);

    let file = match cli.job_name() {
        Some(job) if config.logging.file_logging => {
            let path = config.log_dir().join(format!("{}.log", job));
            match RotatingFile::open(
                &path,
                config.logging.max_log_bytes,
                config.logging.max_log_files,
            ) {
                Ok(file) => Some(file),
                Err(e) => {
                    eprintln!("Warning: cannot open log file {}: {}", path.display(), e);
                    None
                }
            }
        }
        _ => None,
    };

    init_logging(level, cli.global.very_verbose, file);

    if cli.global.very_verbose {
        debug!("Very verbose logging enabled");
    }
}
