//! Per-user handlers: link settings, velocity, ledger and reports.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/users/:id/settings` | Stored settings or the defaults |
//! | `PUT`  | `/users/:id/settings` | Body: `LinkSettings`; missing fields default |
//! | `GET`  | `/users/:id/velocity` | `?tier=<n>` required |
//! | `GET`  | `/users/:id/ledger` | Applies the starting bonus on first access |
//! | `POST` | `/users/:id/bonus` | Body: `{"amount":10,"reason":"..."}`; returns 201 |
//! | `GET`  | `/users/:id/anchors` | Anchor-type profile |
//! | `GET`  | `/users/:id/patterns` | Reciprocity and path-distance report |
//! | `GET`  | `/users/:id/summary` | Everything above in one document |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use linkmesh_core::{ledger::Ledger, tier::{LinkSettings, Tier}};
use linkmesh_engine::{
  Backends, Engine,
  analytics::UserSummary,
  anchors::AnchorProfile,
  graph::PatternReport,
  velocity::VelocityCheck,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

// ─── Settings and velocity ───────────────────────────────────────────────────

/// `GET /users/:id/settings`
pub async fn get_settings<B: Backends>(
  State(engine): State<Engine<B>>,
  Path(user_id): Path<Uuid>,
) -> Result<Json<LinkSettings>, ApiError> {
  Ok(Json(engine.link_settings(user_id).await?))
}

/// `PUT /users/:id/settings`
pub async fn put_settings<B: Backends>(
  State(engine): State<Engine<B>>,
  Path(user_id): Path<Uuid>,
  Json(settings): Json<LinkSettings>,
) -> Result<Json<LinkSettings>, ApiError> {
  Ok(Json(engine.update_link_settings(user_id, settings).await?))
}

#[derive(Debug, Deserialize)]
pub struct VelocityParams {
  pub tier: Tier,
}

/// `GET /users/:id/velocity?tier=<n>`
pub async fn velocity<B: Backends>(
  State(engine): State<Engine<B>>,
  Path(user_id): Path<Uuid>,
  Query(params): Query<VelocityParams>,
) -> Result<Json<VelocityCheck>, ApiError> {
  Ok(Json(engine.check_velocity(user_id, params.tier).await?))
}

// ─── Ledger ──────────────────────────────────────────────────────────────────

/// `GET /users/:id/ledger`
pub async fn ledger<B: Backends>(
  State(engine): State<Engine<B>>,
  Path(user_id): Path<Uuid>,
) -> Result<Json<Ledger>, ApiError> {
  Ok(Json(engine.ledger(user_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct BonusBody {
  pub amount: i64,
  #[serde(default = "default_bonus_reason")]
  pub reason: String,
}

fn default_bonus_reason() -> String { "manual bonus".into() }

/// `POST /users/:id/bonus`
pub async fn bonus<B: Backends>(
  State(engine): State<Engine<B>>,
  Path(user_id): Path<Uuid>,
  Json(body): Json<BonusBody>,
) -> Result<impl IntoResponse, ApiError> {
  let transaction = engine.grant_bonus(user_id, body.amount, body.reason).await?;
  Ok((StatusCode::CREATED, Json(transaction)))
}

// ─── Reports ─────────────────────────────────────────────────────────────────

/// `GET /users/:id/anchors`
pub async fn anchors<B: Backends>(
  State(engine): State<Engine<B>>,
  Path(user_id): Path<Uuid>,
) -> Result<Json<AnchorProfile>, ApiError> {
  Ok(Json(engine.anchor_profile(user_id).await?))
}

/// `GET /users/:id/patterns`
pub async fn patterns<B: Backends>(
  State(engine): State<Engine<B>>,
  Path(user_id): Path<Uuid>,
) -> Result<Json<PatternReport>, ApiError> {
  Ok(Json(engine.detect_patterns(user_id).await?))
}

/// `GET /users/:id/summary`
pub async fn summary<B: Backends>(
  State(engine): State<Engine<B>>,
  Path(user_id): Path<Uuid>,
) -> Result<Json<UserSummary>, ApiError> {
  Ok(Json(engine.user_summary(user_id).await?))
}
