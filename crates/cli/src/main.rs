// complexrecon CLI: merge, match and reconcile predicted complexes

mod covariation;
mod exit_codes;
mod recon;
mod uniprot;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use complexrecon::ReconError;

use exit_codes::{recon_exit_code, EXIT_SUCCESS};

#[derive(Parser)]
#[command(name = "complexrecon")]
#[command(about = "Reconcile predicted protein complexes against a curated registry")]
#[command(version)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge, match and reconcile the candidates named in a config file
    #[command(after_help = "\
Examples:
  complexrecon run humap.toml
  complexrecon run humap.toml --json
  complexrecon run humap.toml --plan plan.json --registry registry.json
  complexrecon run humap.toml --strict")]
    Run {
        /// Path to the TOML config file
        config: PathBuf,

        /// Print the run summary as JSON to stdout
        #[arg(long)]
        json: bool,

        /// Write every xref/annotation plan as JSON
        #[arg(long, value_name = "FILE")]
        plan: Option<PathBuf>,

        /// Write the registry after all plans were applied, as JSON
        #[arg(long, value_name = "FILE")]
        registry: Option<PathBuf>,

        /// Exit non-zero when any candidate was skipped
        #[arg(long)]
        strict: bool,
    },

    /// Build covariation matrices for every registry complex
    #[command(after_help = "\
Examples:
  complexrecon covariation humap.toml
  complexrecon covariation humap.toml --matrices matrices.json")]
    Covariation {
        /// Path to the TOML config file (needs a [covariation] section)
        config: PathBuf,

        /// Print the covariation summary as JSON to stdout
        #[arg(long)]
        json: bool,

        /// Write every complex's matrix as JSON
        #[arg(long, value_name = "FILE")]
        matrices: Option<PathBuf>,
    },

    /// Check a config file and the files it points to without running
    Validate {
        /// Path to the TOML config file
        config: PathBuf,
    },
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => tracing::Level::ERROR,
        (false, 0) => tracing::Level::WARN,
        (false, 1) => tracing::Level::INFO,
        (false, 2) => tracing::Level::DEBUG,
        (false, _) => tracing::Level::TRACE,
    };
    // Also installs the `log` bridge, so engine records show up here
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(verbose > 1)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Run { config, json, plan, registry, strict } => {
            recon::cmd_run(config, json, plan, registry, strict)
        }
        Commands::Covariation { config, json, matrices } => {
            covariation::cmd_covariation(config, json, matrices)
        }
        Commands::Validate { config } => recon::cmd_validate(config),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    /// Engine error with its registry exit code.
    pub fn recon(err: ReconError) -> Self {
        let code = recon_exit_code(&err);
        let hint = match &err {
            ReconError::MissingColumn { file, .. } => Some(format!("check the header row of the {file} file")),
            ReconError::LookupNotFound { .. } => Some("add the term to the [terms] table".to_string()),
            _ => None,
        };
        Self { code, message: err.to_string(), hint }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
