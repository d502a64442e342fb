//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// SowRisk - sow-farm abortion risk aggregation and charts
///
/// Augments daily farm records with peer statistics and trailing test
/// positivity, then draws one risk chart per farm.
///
/// Examples:
///   sowrisk
///   sowrisk --stage process --divisions 猪业一部,猪业二部
///   sowrisk --stage render --plot-dir ./plots
///   sowrisk --window-days 30 --format json --summary run.json
///   sowrisk --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Stage(s) to run
    #[arg(long, default_value = "all", value_name = "STAGE")]
    pub stage: Stage,

    /// Path to configuration file
    ///
    /// If not specified, looks for .sowrisk.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory holding the raw farm-day, test and outbreak files
    #[arg(long, value_name = "DIR", env = "SOWRISK_RAW_DIR")]
    pub raw_dir: Option<PathBuf>,

    /// Directory for processed farm-day tables
    #[arg(long, value_name = "DIR", env = "SOWRISK_PROCESSED_DIR")]
    pub processed_dir: Option<PathBuf>,

    /// Root directory for chart images
    #[arg(long, value_name = "DIR", env = "SOWRISK_PLOT_DIR")]
    pub plot_dir: Option<PathBuf>,

    /// Divisions to process (comma-separated)
    ///
    /// Example: --divisions 猪业一部,猪业二部
    #[arg(long, value_name = "NAMES", value_delimiter = ',')]
    pub divisions: Option<Vec<String>>,

    /// Trailing window for positivity ratios, in days
    #[arg(long, value_name = "DAYS")]
    pub window_days: Option<u32>,

    /// Output file path for the run summary
    #[arg(short, long, value_name = "FILE")]
    pub summary: Option<PathBuf>,

    /// Output format for the run summary (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Dry run: list the files each stage would read and write, then exit
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .sowrisk.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Pipeline stage selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Stage {
    /// Aggregate raw tables into processed tables
    Process,
    /// Draw charts from processed tables
    Render,
    /// Process, then render (default)
    #[default]
    All,
}

impl Stage {
    pub fn runs_process(&self) -> bool {
        matches!(self, Stage::Process | Stage::All)
    }

    pub fn runs_render(&self) -> bool {
        matches!(self, Stage::Render | Stage::All)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Process => "process",
            Stage::Render => "render",
            Stage::All => "all",
        }
    }
}

/// Output format for the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.window_days == Some(0) {
            return Err("Window must be at least 1 day".to_string());
        }

        if let Some(ref divisions) = self.divisions {
            if divisions.iter().all(|d| d.trim().is_empty()) {
                return Err("At least one division must be given".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
