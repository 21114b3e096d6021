//! infrasync CLI - registry reconciliation from the command line

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use infrasync_engine::{EngineConfig, MemoryRegistry, SyncEngine};
use infrasync_model::{FileSource, SourceWorker, SOURCE_ENDPOINT, SOURCE_FIREWALL, SOURCE_MDM};
use infrasync_state::FingerprintStore;

#[derive(Parser)]
#[command(name = "infrasync")]
#[command(about = "infrasync - converge an infrastructure registry with its sources")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run one reconciliation pass over exported source payloads.
    ///
    /// Reads firewall.json / mdm.json / endpoint.json from the payload
    /// directory and applies the resulting plan against an in-memory
    /// registry double (the live registry client is wired in by the
    /// service wrapper, not the CLI).
    Run {
        /// Directory holding <source>.json payload exports
        #[arg(short, long, default_value = "./payloads")]
        payload_dir: PathBuf,
    },
    /// Show fingerprint-store status: entity counts, last run, per-source freshness
    Status,
    /// Print the effective configuration read from the environment
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt::init();

    let config = EngineConfig::from_env();

    match cli.command {
        Some(Commands::Run { payload_dir }) => run(config, payload_dir).await,
        Some(Commands::Status) => status(config),
        Some(Commands::Check) => check(config),
        None => {
            println!("infrasync v0.1.0 - Use --help for commands");
            Ok(())
        }
    }
}

async fn run(config: EngineConfig, payload_dir: PathBuf) -> anyhow::Result<()> {
    let mut sources: Vec<Arc<dyn SourceWorker>> = Vec::new();
    for id in [SOURCE_FIREWALL, SOURCE_MDM, SOURCE_ENDPOINT] {
        let path = payload_dir.join(format!("{}.json", id));
        if path.exists() {
            sources.push(Arc::new(FileSource::new(id, path)));
        }
    }
    anyhow::ensure!(
        !sources.is_empty(),
        "no payload files found in {} (expected firewall.json / mdm.json / endpoint.json)",
        payload_dir.display()
    );

    let store = FingerprintStore::open(&config.state.db_path)
        .with_context(|| format!("opening state store at {}", config.state.db_path.display()))?;
    let registry = Arc::new(MemoryRegistry::new());
    let engine = SyncEngine::new(config, store, registry, sources);

    let summary = engine.run_once().await?;
    println!("{}", summary);
    for warning in &summary.warnings {
        println!("warning: {}", warning);
    }

    if summary.failed > 0 {
        anyhow::bail!("{} operation(s) failed; see audit log", summary.failed);
    }
    Ok(())
}

fn status(config: EngineConfig) -> anyhow::Result<()> {
    let store = FingerprintStore::open(&config.state.db_path)
        .with_context(|| format!("opening state store at {}", config.state.db_path.display()))?;
    let status = store.status()?;

    println!("entities: active={} missing={} deleted={}", status.active, status.missing, status.deleted);
    match status.last_completed_run {
        Some(run) => println!(
            "last completed run: {} at {} (created={} updated={} retired={} deleted={} failed={})",
            run.run_id, run.started_at, run.created, run.updated, run.retired, run.deleted, run.failed
        ),
        None => println!("last completed run: none"),
    }
    for (source, seen) in status.source_last_seen {
        println!("source {}: last seen {}", source, seen);
    }
    Ok(())
}

fn check(config: EngineConfig) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
