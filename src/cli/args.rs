//! Command-line argument parsing for the media cache
//!
//! This module defines the CLI structure using clap derive macros. Scheduled
//! invocations from cron pass `--scheduled`; everything else is treated as an
//! operator command.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::app::jobs::Trigger;
use crate::app::models::{Category, JobKind};

/// Media Cache - symlink acceleration cache for a NAS media library
#[derive(Parser, Debug)]
#[command(
    name = "media_cache",
    version,
    about = "Bounded symlink acceleration cache in front of a NAS media library",
    long_about = "Promotes a budgeted subset of a NAS media library onto fast local storage as symlinks.
Jobs are started by cron; every command here is safe to run by hand."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Cache root, overriding the configuration
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show cache status and last runs
    Status,

    /// Mark the cache active and install the schedule
    Enable,

    /// Mark the cache disabled and remove the schedule
    Disable,

    /// Run an admission sweep
    Sweep(SweepArgs),

    /// Refresh statistics; without --quick, print the full report
    Monitor(MonitorArgs),

    /// Remove every link in one category
    Clear(ClearArgs),

    /// Show space usage per category
    Usage,

    /// Report broken links and ledger drift
    Health {
        /// Remove broken links and reconcile the ledger
        #[arg(long)]
        fix: bool,
    },

    /// List the largest cached entries
    Top {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,

        /// Only entries in this category
        #[arg(short, long)]
        category: Option<Category>,
    },

    /// Remove every link and return the cache to inactive
    Rollback(RollbackArgs),

    /// Query or change the consumer media server mount
    Mount(MountArgs),

    /// Manage the configuration file
    Config(ConfigArgs),
}

/// Which sweep job to run
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSelection {
    /// movies, tv, doc and popular
    Sweep,
    /// recent and downloads
    Recent,
    /// both jobs, one after the other
    All,
}

impl JobSelection {
    /// Jobs to run, in order
    pub fn jobs(&self) -> Vec<JobKind> {
        match self {
            JobSelection::Sweep => vec![JobKind::Sweep],
            JobSelection::Recent => vec![JobKind::Recent],
            JobSelection::All => vec![JobKind::Sweep, JobKind::Recent],
        }
    }
}

/// Arguments for the sweep command
#[derive(Args, Debug, Clone)]
pub struct SweepArgs {
    /// Job to run
    #[arg(long, value_enum, default_value = "all")]
    pub job: JobSelection,

    /// Invoked by the scheduler: contention and non-active status are silent no-ops
    #[arg(long)]
    pub scheduled: bool,
}

/// Arguments for the monitor command
#[derive(Args, Debug, Clone)]
pub struct MonitorArgs {
    /// Only refresh the stored statistics
    #[arg(long)]
    pub quick: bool,

    /// Invoked by the scheduler
    #[arg(long)]
    pub scheduled: bool,
}

/// Arguments for the clear command
#[derive(Args, Debug, Clone)]
pub struct ClearArgs {
    /// Category to clear
    pub category: Category,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for the rollback command
#[derive(Args, Debug, Clone)]
pub struct RollbackArgs {
    /// Also detach the consumer media server mount
    #[arg(long)]
    pub detach_mount: bool,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for mount control
#[derive(Args, Debug)]
pub struct MountArgs {
    #[command(subcommand)]
    pub action: MountAction,
}

/// Mount actions
#[derive(Subcommand, Debug)]
pub enum MountAction {
    /// Show whether the consumer sees the cache
    Status,

    /// Expose the cache to the consumer
    Attach {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Withdraw the cache from the consumer
    Detach {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

/// Arguments for configuration management
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a commented default configuration file
    Init {
        /// Where to write it; defaults to the user config directory
        #[arg(value_name = "FILE")]
        path: Option<PathBuf>,
    },

    /// Print the effective configuration
    Show,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the logging level based on global arguments
    ///
    /// `configured` is the level from the configuration file and applies
    /// when no flag is given.
    pub fn log_level<'a>(&self, configured: &'a str) -> &'a str {
        if self.global.quiet {
            "error"
        } else if self.global.very_verbose {
            "debug"
        } else if self.global.verbose {
            "info"
        } else {
            configured
        }
    }

    /// Job name used for the log file, if this command runs a job
    pub fn job_name(&self) -> Option<&'static str> {
        match &self.command {
            Commands::Sweep(args) => Some(match args.job {
                JobSelection::Sweep => JobKind::Sweep.as_str(),
                JobSelection::Recent => JobKind::Recent.as_str(),
                JobSelection::All => "sweep-all",
            }),
            Commands::Monitor(_) => Some(JobKind::Monitor.as_str()),
            Commands::Rollback(_) => Some(JobKind::Rollback.as_str()),
            Commands::Health { fix: true } => Some("health"),
            Commands::Clear(_) => Some("clear"),
            _ => None,
        }
    }
}

impl SweepArgs {
    pub fn trigger(&self) -> Trigger {
        trigger(self.scheduled)
    }
}

impl MonitorArgs {
    pub fn trigger(&self) -> Trigger {
        trigger(self.scheduled)
    }
}

fn trigger(scheduled: bool) -> Trigger {
    if scheduled {
        Trigger::Scheduled
    } else {
        Trigger::Manual
    }
}
