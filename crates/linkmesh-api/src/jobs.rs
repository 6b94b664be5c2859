//! Manual triggers for the batch jobs the server otherwise runs on timers.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/jobs/settlement` | One settlement batch |
//! | `POST` | `/jobs/decay` | One decay pass over all ledgers |
//! | `POST` | `/jobs/reconcile` | Backfill missing transactions, report drift |
//! | `POST` | `/jobs/health` | `?module=<module>[&batch_size=<n>]` |

use axum::{
  Json,
  extract::{Query, State},
};
use linkmesh_core::link::Module;
use linkmesh_engine::{
  Backends, Engine,
  decay::DecayReport,
  health::HealthBatchReport,
  reconcile::ReconcileReport,
  settlement::SettlementReport,
};
use serde::Deserialize;

use crate::error::ApiError;

const DEFAULT_SWEEP_BATCH: usize = 50;

/// `POST /jobs/settlement`
pub async fn settlement<B: Backends>(
  State(engine): State<Engine<B>>,
) -> Result<Json<SettlementReport>, ApiError> {
  Ok(Json(engine.run_settlement().await?))
}

/// `POST /jobs/decay`
pub async fn decay<B: Backends>(
  State(engine): State<Engine<B>>,
) -> Result<Json<DecayReport>, ApiError> {
  Ok(Json(engine.run_decay().await?))
}

/// `POST /jobs/reconcile`
pub async fn reconcile<B: Backends>(
  State(engine): State<Engine<B>>,
) -> Result<Json<ReconcileReport>, ApiError> {
  Ok(Json(engine.run_reconciliation().await?))
}

#[derive(Debug, Deserialize)]
pub struct HealthParams {
  pub module:     Module,
  pub batch_size: Option<usize>,
}

/// `POST /jobs/health?module=<module>[&batch_size=<n>]`
pub async fn health<B: Backends>(
  State(engine): State<Engine<B>>,
  Query(params): Query<HealthParams>,
) -> Result<Json<HealthBatchReport>, ApiError> {
  let batch_size = params.batch_size.unwrap_or(DEFAULT_SWEEP_BATCH);
  if batch_size == 0 {
    return Err(ApiError::BadRequest("batch_size must be positive".into()));
  }
  Ok(Json(engine.run_health_check_batch(params.module, batch_size).await?))
}
