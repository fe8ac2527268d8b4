//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::domain::Priority;

/// batchpipe - batched, rate-limited record ingestion
#[derive(Parser)]
#[command(
    name = "bp",
    about = "Send records to an ingestion endpoint in rate-limited, retried batches",
    version,
    after_help = "Logs are written to: ~/.local/share/batchpipe/logs/batchpipe.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Send JSON-lines records through the pipeline
    Send {
        /// File with one record per line; `-` reads stdin
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Override the configured sampling rate
        #[arg(short, long)]
        rate: Option<f64>,

        /// Priority for transmission attempts (low, normal, high, critical or an integer)
        #[arg(short, long)]
        priority: Option<Priority>,

        /// Output format for the summary
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Check whether the endpoint supports batch ingestion
    Probe,

    /// Print the effective configuration as YAML
    Config,
}

/// Output format for command summaries
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
