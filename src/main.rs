mod analysis;
mod config;
mod data;
mod ingest;
mod monitoring;
mod pipeline;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use config::{Config, EnvConfig};
use data::store::read_corpus;
use ingest::server::IngestServer;
use monitoring::report::CsvReportWriter;

#[derive(Parser)]
#[command(name = "poll-fusion")]
#[command(about = "Blend historical survey bias, poll trends and auxiliary signals into a vote-share forecast", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "poll-fusion.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read the corpus, run every stage and write the forecast (default)
    Forecast {
        /// Override the corpus path
        #[arg(long)]
        corpus: Option<PathBuf>,
        /// Override the CSV output path
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Accept records over TCP and append them to the corpus
    Serve {
        /// Override the bind address
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Send one record to a running ingest server
    Send {
        /// Source tag, e.g. CIS_CURRENT
        source: String,
        /// JSON payload for the record's `data` field
        data: String,
        /// Server address; defaults to the configured bind address
        #[arg(long)]
        addr: Option<String>,
    },

    /// Write the reference scenario corpus
    Seed {
        /// Replace an existing corpus
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("POLL_FUSION_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    let env_config = EnvConfig::load()?;
    config.apply_env(&env_config);

    match cli.command.unwrap_or(Commands::Forecast { corpus: None, output: None }) {
        Commands::Forecast { corpus, output } => {
            if let Some(path) = corpus {
                config.system.corpus_path = path.display().to_string();
            }
            if let Some(path) = output {
                config.system.output_path = path.display().to_string();
            }
            config.validate()?;
            forecast(&config)
        }
        Commands::Serve { bind } => {
            if let Some(addr) = bind {
                config.ingest.bind_addr = addr;
            }
            config.validate()?;
            serve(config).await
        }
        Commands::Send { source, data, addr } => {
            let data: serde_json::Value =
                serde_json::from_str(&data).context("Record data must be valid JSON")?;
            let addr = addr.unwrap_or_else(|| config.ingest.bind_addr.clone());

            if ingest::client::send_record(&addr, &source, data).await? {
                tracing::info!("Record {} acknowledged by {}", source, addr);
                Ok(())
            } else {
                anyhow::bail!("Server {} rejected the {} record", addr, source)
            }
        }
        Commands::Seed { force } => {
            config.validate()?;
            let records = ingest::seed::reference_corpus(&config.sources);
            ingest::seed::write_corpus(
                PathBuf::from(&config.system.corpus_path).as_path(),
                &records,
                force,
            )?;
            Ok(())
        }
    }
}

fn forecast(config: &Config) -> Result<()> {
    tracing::info!("Reading corpus: {}", config.system.corpus_path);
    let snapshot = read_corpus(&config.system.corpus_path)?;
    tracing::info!(
        "Loaded {} records ({} malformed lines skipped)",
        snapshot.len(),
        snapshot.skipped
    );
    if snapshot.is_empty() {
        tracing::warn!("Corpus holds no usable records, every estimate will be 0");
    }

    let report = pipeline::run(config, &snapshot);
    println!("{}", report);

    let writer = CsvReportWriter::new(&config.system.output_path);
    if let Err(e) = writer.write(&report.forecast) {
        tracing::error!("Could not save forecast to {}: {:#}", writer.path().display(), e);
        return Err(e);
    }
    tracing::info!("Forecast saved to {}", writer.path().display());

    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let server = IngestServer::bind(config.ingest.clone(), &config.system.corpus_path)
        .await
        .with_context(|| format!("Failed to bind ingest server on {}", config.ingest.bind_addr))?;

    let stats = server.stats();
    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
        })
        .await?;

    if stats.rejected() > 0 {
        tracing::warn!("{} payloads were rejected during this session", stats.rejected());
    }
    Ok(())
}
