//! Handlers for distribution tasks, the hand-off point to external
//! placement executors.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/tasks` | Filters: `user_id`, `article_id`, `status`, `due_before`, `limit` |
//! | `GET`  | `/tasks/due` | Pending tasks whose time has come; optional `?limit` |
//! | `GET`  | `/tasks/:id` | 404 if not found |
//! | `POST` | `/tasks/:id/complete` | Body: `{"placed_url":"..."}`; records the backlink |
//! | `POST` | `/tasks/:id/fail` | Body: `{"reason":"..."}` |

use axum::{
  Json,
  extract::{Path, Query, State},
};
use linkmesh_core::{content::DistributionTask, store::TaskQuery};
use linkmesh_engine::{Backends, Engine, distribution::TaskCompletion};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

/// `GET /tasks`
pub async fn list<B: Backends>(
  State(engine): State<Engine<B>>,
  Query(query): Query<TaskQuery>,
) -> Result<Json<Vec<DistributionTask>>, ApiError> {
  Ok(Json(engine.list_tasks(query).await?))
}

#[derive(Debug, Deserialize)]
pub struct DueParams {
  pub limit: Option<usize>,
}

/// `GET /tasks/due[?limit=<n>]`
pub async fn due<B: Backends>(
  State(engine): State<Engine<B>>,
  Query(params): Query<DueParams>,
) -> Result<Json<Vec<DistributionTask>>, ApiError> {
  Ok(Json(engine.due_tasks(params.limit).await?))
}

/// `GET /tasks/:id`
pub async fn get_one<B: Backends>(
  State(engine): State<Engine<B>>,
  Path(id): Path<Uuid>,
) -> Result<Json<DistributionTask>, ApiError> {
  Ok(Json(engine.get_task(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct CompleteBody {
  pub placed_url: String,
}

/// `POST /tasks/:id/complete`
pub async fn complete<B: Backends>(
  State(engine): State<Engine<B>>,
  Path(id): Path<Uuid>,
  Json(body): Json<CompleteBody>,
) -> Result<Json<TaskCompletion>, ApiError> {
  Ok(Json(engine.complete_task(id, body.placed_url).await?))
}

#[derive(Debug, Deserialize)]
pub struct FailBody {
  pub reason: String,
}

/// `POST /tasks/:id/fail`
pub async fn fail<B: Backends>(
  State(engine): State<Engine<B>>,
  Path(id): Path<Uuid>,
  Json(body): Json<FailBody>,
) -> Result<Json<DistributionTask>, ApiError> {
  Ok(Json(engine.fail_task(id, body.reason).await?))
}
