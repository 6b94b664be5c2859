//! Handlers for link-graph queries and anchor selection.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/graph/distance` | `?a=<id>&b=<id>`; 0 means no known path |
//! | `GET`  | `/graph/route` | `?source=<id>&target=<id>[&module=exchange]` |
//! | `GET`  | `/graph/isolation` | `?user_id=<id>&url=<url>&module=<module>` |
//! | `POST` | `/anchors/select` | Body: `AnchorRequest` |

use axum::{
  Json,
  extract::{Query, State},
};
use linkmesh_core::{
  anchor::{Anchor, AnchorRequest},
  link::Module,
};
use linkmesh_engine::{
  Backends, Engine,
  graph::{IsolationCheck, RouteCheck},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct DistanceParams {
  pub a: Uuid,
  pub b: Uuid,
}

#[derive(Debug, Serialize)]
pub struct Distance {
  pub a:            Uuid,
  pub b:            Uuid,
  pub hop_distance: u32,
}

/// `GET /graph/distance?a=<id>&b=<id>`
pub async fn distance<B: Backends>(
  State(engine): State<Engine<B>>,
  Query(params): Query<DistanceParams>,
) -> Result<Json<Distance>, ApiError> {
  let hop_distance = engine.hop_distance(params.a, params.b).await?;
  Ok(Json(Distance { a: params.a, b: params.b, hop_distance }))
}

#[derive(Debug, Deserialize)]
pub struct RouteParams {
  pub source: Uuid,
  pub target: Uuid,
  pub module: Option<Module>,
}

/// `GET /graph/route?source=<id>&target=<id>[&module=<module>]`
pub async fn route<B: Backends>(
  State(engine): State<Engine<B>>,
  Query(params): Query<RouteParams>,
) -> Result<Json<RouteCheck>, ApiError> {
  let module = params.module.unwrap_or(Module::Exchange);
  Ok(Json(engine.is_route_safe(params.source, params.target, module).await?))
}

#[derive(Debug, Deserialize)]
pub struct IsolationParams {
  pub user_id: Uuid,
  pub url:     String,
  pub module:  Module,
}

/// `GET /graph/isolation?user_id=<id>&url=<url>&module=<module>`
pub async fn isolation<B: Backends>(
  State(engine): State<Engine<B>>,
  Query(params): Query<IsolationParams>,
) -> Result<Json<IsolationCheck>, ApiError> {
  Ok(Json(
    engine
      .enforce_module_isolation(params.user_id, &params.url, params.module)
      .await?,
  ))
}

/// `POST /anchors/select`
pub async fn select_anchor<B: Backends>(
  State(engine): State<Engine<B>>,
  Json(request): Json<AnchorRequest>,
) -> Json<Anchor> {
  Json(engine.select_anchor(&request))
}
