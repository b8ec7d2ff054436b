//! CLI Entry Point for stand-daq
//!
//! Provides command-line interface for:
//! - Running the control server (acquisition, live WebSocket endpoint, recording)
//! - Listing registered recordings
//!
//! # Usage
//!
//! Start the server against the configured serial port:
//! ```bash
//! stand-daq serve --config config/stand_daq.toml
//! ```
//!
//! Start without hardware:
//! ```bash
//! stand-daq serve --simulate --bind 127.0.0.1:8000
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stand_daq::config::{AcquisitionMode, Settings, DEFAULT_CONFIG_PATH};
use stand_daq::recording::{JsonFileRegistry, RecordingRegistry};
use stand_daq::{logging, server, ControlServer};
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "stand-daq")]
#[command(about = "Test stand acquisition, live broadcast and recording server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control server until Ctrl+C
    Serve {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Use the simulated source regardless of configuration
        #[arg(long)]
        simulate: bool,

        /// Override the listen address
        #[arg(long)]
        bind: Option<String>,
    },

    /// List registered recordings
    Recordings {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            simulate,
            bind,
        } => {
            let mut settings = load_settings(&config)?;
            if simulate {
                settings.acquisition.mode = AcquisitionMode::Simulated;
            }
            if let Some(addr) = bind {
                settings.server.bind_addr = addr;
            }
            run_server(settings).await
        }
        Commands::Recordings { config } => {
            let settings = load_settings(&config)?;
            list_recordings(&settings).await
        }
    }
}

fn load_settings(path: &Path) -> Result<Settings> {
    let settings = Settings::load_from(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    logging::init_from_settings(&settings)?;
    Ok(settings)
}

async fn run_server(settings: Settings) -> Result<()> {
    tracing::info!(
        name = %settings.application.name,
        mode = ?settings.acquisition.mode,
        "Starting control server"
    );

    let server = ControlServer::start(&settings)
        .await
        .context("Failed to start control server")?;

    let listener = TcpListener::bind(&settings.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.server.bind_addr))?;

    server::serve(listener, server, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
        tracing::info!("Shutdown requested");
    })
    .await?;

    Ok(())
}

async fn list_recordings(settings: &Settings) -> Result<()> {
    let registry = JsonFileRegistry::open(&settings.storage.registry_file).await?;
    let entries = registry.list().await?;

    if entries.is_empty() {
        println!("No recordings in {}", registry.path().display());
        return Ok(());
    }

    for entry in entries {
        println!(
            "{}  {}  {}",
            entry.id,
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.name.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
