//! Auction hooks CLI for configuration checks.
//!
//! This tool provides commands for:
//! - Validating configuration files, including execution plans and module
//!   configuration
//! - Computing configuration hashes
//! - Evaluating activity rules against a component without running a server

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use auction_hooks_common::activity::{ComponentType, TraceLevel};

mod activity;
mod config;
mod error;
mod hash;

use error::CliError;

#[derive(Parser)]
#[command(name = "ahcli")]
#[command(about = "Auction hooks CLI for configuration management")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Activity rule evaluation
    Activity {
        #[command(subcommand)]
        action: ActivityAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate settings, execution plans and module configuration
    Validate {
        /// Path to the TOML configuration file
        #[arg(long, short)]
        file: PathBuf,
    },

    /// Compute and display config hash (SHA-256)
    Hash {
        /// Path to the TOML configuration file
        #[arg(long, short)]
        file: PathBuf,

        /// Output format
        #[arg(long, default_value = "text")]
        format: HashFormat,

        /// Hash the raw file without applying environment overrides
        #[arg(long)]
        raw: bool,
    },
}

#[derive(Subcommand)]
enum ActivityAction {
    /// Check whether a component may perform an activity
    Check {
        /// Path to the TOML configuration file
        #[arg(long, short)]
        file: PathBuf,

        /// Activity name, e.g. `syncUser` or `transmit_ufpd`
        #[arg(long, short)]
        activity: String,

        /// Kind of component performing the activity
        #[arg(long, value_enum, default_value = "bidder")]
        component_type: ComponentKind,

        /// Component name, e.g. the bidder code
        #[arg(long)]
        component_name: String,

        /// ISO-3166 alpha-3 country of the user
        #[arg(long)]
        country: Option<String>,

        /// Region within the country
        #[arg(long, requires = "country")]
        region: Option<String>,

        /// Global Privacy Control signal
        #[arg(long)]
        gpc: Option<String>,

        /// Print the evaluation trace at this level
        #[arg(long, value_enum)]
        trace: Option<TraceArg>,
    },
}

#[derive(Clone, ValueEnum, Debug)]
pub enum HashFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum, Debug)]
pub enum ComponentKind {
    Bidder,
    Analytics,
    General,
    Rtd,
    Userid,
}

impl From<ComponentKind> for ComponentType {
    fn from(kind: ComponentKind) -> Self {
        match kind {
            ComponentKind::Bidder => ComponentType::Bidder,
            ComponentKind::Analytics => ComponentType::Analytics,
            ComponentKind::General => ComponentType::GeneralModule,
            ComponentKind::Rtd => ComponentType::RtdModule,
            ComponentKind::Userid => ComponentType::UserIdModule,
        }
    }
}

#[derive(Clone, Copy, ValueEnum, Debug)]
pub enum TraceArg {
    Basic,
    Verbose,
}

impl From<TraceArg> for TraceLevel {
    fn from(arg: TraceArg) -> Self {
        match arg {
            TraceArg::Basic => TraceLevel::Basic,
            TraceArg::Verbose => TraceLevel::Verbose,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        if let Err(e) = auction_hooks_common::logging::init_logging(log::LevelFilter::Debug) {
            eprintln!("Warning: logging unavailable: {}", e);
        }
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Validate { file } => config::validate(file, cli.verbose),
            ConfigAction::Hash { file, format, raw } => {
                hash::compute_and_display(file, format, raw, cli.verbose)
            }
        },
        Commands::Activity { action } => match action {
            ActivityAction::Check {
                file,
                activity: activity_name,
                component_type,
                component_name,
                country,
                region,
                gpc,
                trace,
            } => activity::check(
                &file,
                &activity::CheckRequest {
                    activity: activity_name,
                    component_type: component_type.into(),
                    component_name,
                    country,
                    region,
                    gpc,
                    trace: trace.map(Into::into),
                },
                cli.verbose,
            ),
        },
    }
}
