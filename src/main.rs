//! `tripdata-ingest` command-line entry point.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use tripdata_ingest::config::PipelineConfig;
use tripdata_ingest::decoder::{ParquetTripDecoder, parquet::detect_parquet_schema};
use tripdata_ingest::execution::TracingDispatchObserver;
use tripdata_ingest::logging::{LogFormat, LogLevel, init_logging};
use tripdata_ingest::pipeline::IngestionPipeline;

/// Watch a directory for trip data files and ingest them into a sink.
#[derive(Parser, Debug)]
#[command(name = "tripdata-ingest")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "TRIPDATA_LOG_LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Emit logs as JSON lines
    #[arg(long, env = "TRIPDATA_LOG_JSON", global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline until interrupted
    Run {
        /// Pipeline configuration file (JSON)
        #[arg(short, long, env = "TRIPDATA_CONFIG")]
        config: PathBuf,
    },

    /// Validate a configuration file and print the effective settings
    CheckConfig {
        #[arg(short, long, env = "TRIPDATA_CONFIG")]
        config: PathBuf,
    },

    /// Print the schema detected for a Parquet file
    Detect {
        file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let format = if cli.log_json { LogFormat::Json } else { LogFormat::Text };
    // The CLI still works without logging.
    let _ = init_logging(cli.log_level, format);

    if let Err(e) = execute(cli.command) {
        error!(error = %e, "command failed");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn execute(command: Command) -> Result<()> {
    match command {
        Command::Run { config } => run(&config),
        Command::CheckConfig { config } => check_config(&config),
        Command::Detect { file } => detect(&file),
    }
}

fn load_config(path: &Path) -> Result<PipelineConfig> {
    let config = PipelineConfig::load(path)?;
    config
        .validate()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    Ok(config)
}

fn run(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let pipeline = IngestionPipeline::from_config(config, Arc::new(ParquetTripDecoder::new()))?
        .with_observer(Arc::new(TracingDispatchObserver));

    let (tx, rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .context("failed to install Ctrl-C handler")?;

    pipeline.start()?;
    info!("running; press Ctrl-C to stop");
    let _ = rx.recv();

    info!("shutdown requested");
    if let Some(report) = pipeline.stop() {
        info!(drained = report.drained, discarded = report.discarded, "shutdown complete");
    }
    println!("{}", pipeline.metrics().snapshot());
    Ok(())
}

fn check_config(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let rendered = serde_json::to_string_pretty(&config).context("failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}

fn detect(file: &Path) -> Result<()> {
    if !file.is_file() {
        bail!("not a file: {}", file.display());
    }
    let detected =
        detect_parquet_schema(file).with_context(|| format!("failed to read {}", file.display()))?;
    match detected {
        Some(schema) => println!("{schema}"),
        None => println!("unknown"),
    }
    Ok(())
}
