//! batchpipe - record ingestion CLI
//!
//! Reads records, samples and batches them, and sends them to the configured
//! ingestion endpoint.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use clap::Parser;
use eyre::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use batchpipe::batch::{BatchError, Delivery};
use batchpipe::cli::{Cli, Command, OutputFormat};
use batchpipe::config::Config;
use batchpipe::domain::{Priority, Record};
use batchpipe::gateway::IngestionGateway;
use batchpipe::pipeline::Pipeline;
use batchpipe::scheduler::PriorityScheduler;

fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("batchpipe")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Write to log file, not stdout/stderr
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(log_dir.join("batchpipe.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(base_url = %config.gateway.base_url, "batchpipe loaded config");

    match cli.command {
        Command::Send {
            file,
            rate,
            priority,
            format,
        } => cmd_send(config, &file, rate, priority, format).await,
        Command::Probe => cmd_probe(&config).await,
        Command::Config => cmd_config(&config),
    }
}

/// Outcome counts for `send`
#[derive(Debug, Default, Serialize)]
struct SendSummary {
    read: usize,
    sent: usize,
    sampled_out: usize,
    failed: usize,
}

async fn cmd_send(
    mut config: Config,
    file: &Path,
    rate: Option<f64>,
    priority: Option<Priority>,
    format: OutputFormat,
) -> Result<()> {
    if rate.is_some() {
        config.sampling.rate = rate;
    }
    if let Some(priority) = priority {
        config.scheduler.default_priority = priority;
    }
    config.validate().context("Invalid configuration")?;

    let records = read_records(file)?;
    let scheduler = PriorityScheduler::new(config.scheduler.clone());
    let pipeline = Pipeline::from_config(&config, scheduler.clone())?;

    let mut summary = SendSummary {
        read: records.len(),
        ..Default::default()
    };
    let mut handles = Vec::with_capacity(records.len());
    for record in records {
        handles.push((record.id.clone(), pipeline.append(record).await));
    }

    pipeline.shutdown().await.context("Pipeline shut down before all records settled")?;
    scheduler.wait_until_idle().await;

    for (id, handle) in handles {
        match handle.await {
            Ok(Delivery::Sent) => summary.sent += 1,
            Ok(Delivery::SampledOut) => summary.sampled_out += 1,
            Err(BatchError::Delivery(e)) => {
                warn!(%id, error = %e, "Record not delivered");
                eprintln!("{}: {}", id, e);
                summary.failed += 1;
            }
            Err(BatchError::Closed) => summary.failed += 1,
        }
    }

    info!(?summary, "Send complete");
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => println!(
            "read {}, sent {}, sampled out {}, failed {}",
            summary.read, summary.sent, summary.sampled_out, summary.failed
        ),
    }

    if summary.failed > 0 {
        return Err(eyre::eyre!("{} record(s) failed to send", summary.failed));
    }
    Ok(())
}

/// Parse JSON-lines records from `file`, or stdin for `-`
fn read_records(file: &Path) -> Result<Vec<Record>> {
    let reader: Box<dyn BufRead> = if file == Path::new("-") {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let handle = fs::File::open(file).context(format!("Failed to open {}", file.display()))?;
        Box::new(BufReader::new(handle))
    };

    let mut records = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read input")?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Record =
            serde_json::from_str(&line).context(format!("Invalid record on line {}", number + 1))?;
        records.push(record);
    }
    Ok(records)
}

async fn cmd_probe(config: &Config) -> Result<()> {
    let gateway = IngestionGateway::from_config(&config.gateway, config.retry.clone())
        .context("Failed to create ingestion gateway")?;
    let capability = gateway.capability().await;

    if capability.batch {
        println!("batch ingestion: supported");
        println!("body size budget: {} bytes", gateway.byte_budget(&capability));
    } else {
        println!("batch ingestion: unsupported (records are sent individually)");
    }
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("Failed to serialize configuration")?;
    print!("{}", yaml);
    Ok(())
}
