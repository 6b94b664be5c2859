//! `linkmesh` server binary.
//!
//! Reads `linkmesh.toml` (or the path given with `--config`), opens the
//! SQLite store, and either serves the JSON API with the batch jobs running
//! on timers or runs a single batch pass and prints its report.
//!
//! ```text
//! linkmesh serve
//! linkmesh settle
//! linkmesh sweep --module exchange --batch-size 100
//! ```

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use linkmesh_core::link::Module;
use linkmesh_engine::Engine;
use linkmesh_server::{
  Live, app, build_engine,
  config::ServerConfig,
  jobs::{self, Job},
};
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "linkmesh backlink distribution and exchange server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "linkmesh.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Serve the API and run the batch jobs on their timers.
  Serve,
  /// Settle one batch of pending exchange links.
  Settle,
  /// Apply credit decay to idle ledgers.
  Decay,
  /// Backfill missing ledger transactions and report drift.
  Reconcile,
  /// Re-check the stalest live backlinks of one module.
  Sweep {
    #[arg(long, value_enum, default_value_t = ModuleArg::Exchange)]
    module:     ModuleArg,
    #[arg(long)]
    batch_size: Option<usize>,
  },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModuleArg {
  Distribution,
  Exchange,
}

impl From<ModuleArg> for Module {
  fn from(m: ModuleArg) -> Self {
    match m {
      ModuleArg::Distribution => Module::Distribution,
      ModuleArg::Exchange => Module::Exchange,
    }
  }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let cfg = ServerConfig::load(&cli.config).context("failed to load configuration")?;
  let engine = build_engine(&cfg).await?;

  let job = match cli.command {
    Command::Serve => return serve(engine, &cfg).await,
    Command::Settle => Job::Settlement,
    Command::Decay => Job::Decay,
    Command::Reconcile => Job::Reconcile,
    Command::Sweep { module, batch_size } => Job::Health {
      module:     module.into(),
      batch_size: batch_size.unwrap_or(cfg.jobs.health_batch).max(1),
    },
  };

  let report = jobs::run(&engine, job)
    .await
    .with_context(|| format!("{} failed", job.name()))?;
  println!("{}", serde_json::to_string_pretty(&report)?);
  Ok(())
}

async fn serve(engine: Engine<Live>, cfg: &ServerConfig) -> anyhow::Result<()> {
  let loops = jobs::spawn(engine.clone(), &cfg.jobs);
  let address = format!("{}:{}", cfg.host, cfg.port);

  tracing::info!(jobs = loops.len(), "Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app(engine)).await.context("server error")?;
  Ok(())
}
