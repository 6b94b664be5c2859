//! Handlers for sites, articles and platforms.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/sites` | Body: [`NewSite`]; returns 201 |
//! | `GET`  | `/sites/:id` | 404 if not found |
//! | `POST` | `/articles` | Body: [`NewArticle`]; returns 201 |
//! | `GET`  | `/articles/:id` | 404 if not found |
//! | `GET`  | `/articles/:id/derivatives` | Tier-2 and tier-3 rewrites |
//! | `POST` | `/articles/:id/distribute` | Runs the distribution engine once |
//! | `GET`  | `/platforms` | Optional `?tier=2&active_only=true` |
//! | `PUT`  | `/platforms` | Body: [`NewPlatform`]; insert or replace |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use linkmesh_core::{
  content::{Article, Derivative, Platform, Site},
  tier::Tier,
};
use linkmesh_engine::{
  Backends, Engine,
  catalog::{NewArticle, NewPlatform, NewSite},
  distribution::DistributionOutcome,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

// ─── Sites ───────────────────────────────────────────────────────────────────

/// `POST /sites`
pub async fn create_site<B: Backends>(
  State(engine): State<Engine<B>>,
  Json(body): Json<NewSite>,
) -> Result<impl IntoResponse, ApiError> {
  let site = engine.create_site(body).await?;
  Ok((StatusCode::CREATED, Json(site)))
}

/// `GET /sites/:id`
pub async fn get_site<B: Backends>(
  State(engine): State<Engine<B>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Site>, ApiError> {
  Ok(Json(engine.get_site(id).await?))
}

// ─── Articles ────────────────────────────────────────────────────────────────

/// `POST /articles`
pub async fn create_article<B: Backends>(
  State(engine): State<Engine<B>>,
  Json(body): Json<NewArticle>,
) -> Result<impl IntoResponse, ApiError> {
  let article = engine.create_article(body).await?;
  Ok((StatusCode::CREATED, Json(article)))
}

/// `GET /articles/:id`
pub async fn get_article<B: Backends>(
  State(engine): State<Engine<B>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Article>, ApiError> {
  Ok(Json(engine.get_article(id).await?))
}

/// `GET /articles/:id/derivatives`
pub async fn derivatives<B: Backends>(
  State(engine): State<Engine<B>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<Derivative>>, ApiError> {
  engine.get_article(id).await?;
  Ok(Json(engine.list_derivatives(id).await?))
}

/// `POST /articles/:id/distribute`
///
/// 409 if the article was already distributed. Derivatives that could not be
/// generated are listed under `skipped` rather than failing the request.
pub async fn distribute<B: Backends>(
  State(engine): State<Engine<B>>,
  Path(id): Path<Uuid>,
) -> Result<Json<DistributionOutcome>, ApiError> {
  Ok(Json(engine.distribute(id).await?))
}

// ─── Platforms ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PlatformParams {
  pub tier:        Option<Tier>,
  #[serde(default)]
  pub active_only: bool,
}

/// `GET /platforms[?tier=<n>][&active_only=true]`
pub async fn list_platforms<B: Backends>(
  State(engine): State<Engine<B>>,
  Query(params): Query<PlatformParams>,
) -> Result<Json<Vec<Platform>>, ApiError> {
  Ok(Json(engine.list_platforms(params.tier, params.active_only).await?))
}

/// `PUT /platforms`
pub async fn upsert_platform<B: Backends>(
  State(engine): State<Engine<B>>,
  Json(body): Json<NewPlatform>,
) -> Result<Json<Platform>, ApiError> {
  Ok(Json(engine.upsert_platform(body).await?))
}
