//! Coordinator binary

use clap::{Parser, Subcommand};
use shardcoord::coordinator::{load_snapshot, save_snapshot, Configuration};
use shardcoord::{Command, Coordinator, CoordinatorConfig, CoordinatorHandle, LocalHost};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shardcoord")]
#[command(about = "shardcoord membership and placement coordinator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed a JSON-lines command log through a fresh coordinator
    Replay {
        /// Command log, one JSON command per line
        #[arg(long)]
        commands: PathBuf,

        /// Configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write the final state here
        #[arg(long)]
        snapshot_out: Option<PathBuf>,
    },

    /// Print the state held in a snapshot file
    Inspect {
        #[arg(long)]
        snapshot: PathBuf,
    },

    /// Run a local coordinator, reading JSON commands from stdin
    Serve {
        /// Configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            commands,
            config,
            snapshot_out,
        } => replay(&commands, config.as_deref(), snapshot_out.as_deref())?,
        Commands::Inspect { snapshot } => inspect(&snapshot)?,
        Commands::Serve { config } => serve(config.as_deref()).await?,
    }

    Ok(())
}

fn replay(commands: &Path, config: Option<&Path>, snapshot_out: Option<&Path>) -> anyhow::Result<()> {
    let config = CoordinatorConfig::load(config)?;
    let mut coord = Coordinator::new(config);
    let mut host = LocalHost::new();

    let reader = BufReader::new(std::fs::File::open(commands)?);
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let command = Command::from_json(line)
            .map_err(|e| anyhow::anyhow!("line {}: {}", lineno + 1, e))?;
        let name = command.name();
        let response = coord.apply(&mut host, command);
        println!(
            "{:>5} {:<18} {}{}",
            lineno + 1,
            name,
            response.code,
            response
                .payload
                .as_ref()
                .map(|p| format!(" ({} bytes)", p.len()))
                .unwrap_or_default()
        );
    }

    println!();
    print!("{}", coord.debug_dump());

    if let Some(path) = snapshot_out {
        save_snapshot(&coord, path)?;
        println!("snapshot written to {}", path.display());
    }

    Ok(())
}

fn inspect(snapshot: &Path) -> anyhow::Result<()> {
    let coord = load_snapshot(snapshot)?;
    print!("{}", coord.debug_dump());

    let Ok(blob) = coord.config_get() else {
        println!("cluster is not initialized");
        return Ok(());
    };

    let config = Configuration::decode(&blob)?;
    println!(
        "configuration version {}: {} servers, {} spaces, {} transfers",
        config.version,
        config.servers.len(),
        config.spaces.len(),
        config.transfers.len()
    );
    for server in &config.servers {
        println!("  {} at {} is {}", server.id, server.bind_to, server.state);
    }
    for space in &config.spaces {
        println!(
            "  space \"{}\": F={} P={} {} regions",
            space.name,
            space.fault_tolerance,
            space.predecessor_width,
            space.regions().count()
        );
    }

    Ok(())
}

async fn serve(config: Option<&Path>) -> anyhow::Result<()> {
    let config = CoordinatorConfig::load(config)?;

    let restored = match config.snapshot_path.as_deref() {
        Some(path) if path.exists() => Some(load_snapshot(path)?),
        _ => None,
    };
    let coord = restored.unwrap_or_else(|| Coordinator::new(config));

    tracing::info!("Starting coordinator at version {}", coord.version());
    let handle = CoordinatorHandle::spawn(coord);
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match Command::from_json(&line) {
                    Ok(command) => {
                        let response = handle.apply(command).await?;
                        println!("{}", serde_json::to_string(&response.code)?);
                    }
                    Err(e) => tracing::warn!("skipping malformed command: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    let coord = handle.shutdown().await?;
    tracing::info!("Stopped at version {}", coord.version());
    Ok(())
}
