//! linkmesh server: configuration, the HTTP collaborators, and the
//! background job loops around a SQLite-backed [`Engine`].

pub mod config;
pub mod content;
pub mod jobs;
pub mod monitor;

use anyhow::Context as _;
use axum::Router;
use linkmesh_core::risk::HeuristicRiskScorer;
use linkmesh_engine::{Backends, Engine};
use linkmesh_store_sqlite::SqliteStore;
use tracing::info;

use crate::{config::ServerConfig, content::Content, monitor::HttpMonitor};

/// The production wiring.
pub struct Live;

impl Backends for Live {
  type Store = SqliteStore;
  type Content = Content;
  type Risk = HeuristicRiskScorer;
  type Monitor = HttpMonitor;
}

/// Open the store and build the collaborators described by `cfg`.
pub async fn build_engine(cfg: &ServerConfig) -> anyhow::Result<Engine<Live>> {
  let store_path = cfg.resolved_store_path();
  if let Some(dir) = store_path.parent()
    && !dir.as_os_str().is_empty()
  {
    std::fs::create_dir_all(dir)
      .with_context(|| format!("failed to create {}", dir.display()))?;
  }
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let content = Content::from_config(&cfg.content).context("failed to build content client")?;
  let monitor = HttpMonitor::new(&cfg.monitor).context("failed to build monitor client")?;
  info!(store = %store_path.display(), content = content.describe(), "engine ready");

  Ok(Engine::new(
    store,
    content,
    HeuristicRiskScorer::new(cfg.risk.clone()),
    monitor,
    cfg.engine.clone(),
  ))
}

/// The HTTP surface: the JSON API under `/api` and a liveness probe.
pub fn app<B: Backends>(engine: Engine<B>) -> Router {
  Router::new()
    .route("/healthz", axum::routing::get(|| async { "ok" }))
    .nest("/api", linkmesh_api::api_router(engine))
}
