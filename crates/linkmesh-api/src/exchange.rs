//! Handlers for the peer link exchange: inventory, matching, execution,
//! settlement of single links, transactions and the pair blacklist.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/inventory` | Body: [`NewInventory`]; 422 if the domain is ineligible |
//! | `GET`  | `/inventory` | Filters: `owner_id`, `exclude_owner`, `min_authority`, `tier`, `with_capacity`, `limit` |
//! | `GET`  | `/inventory/:id` | 404 if not found |
//! | `POST` | `/inventory/:id/deactivate` | Withdraws the item from matching |
//! | `POST` | `/exchange/matches` | Body: [`MatchRequest`]; ranked candidates |
//! | `POST` | `/exchange` | Body: [`ExchangeRequest`]; 201, 402 or 409 |
//! | `GET`  | `/exchange/links` | Filters: `participant`, `requester_id`, `provider_id`, `status`, ... |
//! | `GET`  | `/exchange/links/:id` | 404 if not found |
//! | `POST` | `/exchange/links/:id/settle` | Settle now if the grace period has passed |
//! | `GET`  | `/transactions` | Filters: `user_id`, `kind`, `related_link_id`, `limit` |
//! | `POST` | `/blacklist` | Body: [`BlacklistBody`]; returns 201 |
//! | `GET`  | `/blacklist` | `?participant=<id>[&active_only=true]` |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use linkmesh_core::{
  exchange::{BlacklistEntry, ExchangeLink, InventoryItem},
  ledger::Transaction,
  store::{ExchangeLinkQuery, InventoryQuery, TransactionQuery},
};
use linkmesh_engine::{
  Backends, Engine,
  exchange::{ExchangeRequest, MatchCandidate, MatchRequest, NewInventory},
  settlement::LinkSettlement,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

// ─── Inventory ───────────────────────────────────────────────────────────────

/// `POST /inventory`
pub async fn add_inventory<B: Backends>(
  State(engine): State<Engine<B>>,
  Json(body): Json<NewInventory>,
) -> Result<impl IntoResponse, ApiError> {
  let item = engine.add_inventory(body).await?;
  Ok((StatusCode::CREATED, Json(item)))
}

/// `GET /inventory`
pub async fn list_inventory<B: Backends>(
  State(engine): State<Engine<B>>,
  Query(query): Query<InventoryQuery>,
) -> Result<Json<Vec<InventoryItem>>, ApiError> {
  Ok(Json(engine.list_inventory(query).await?))
}

/// `GET /inventory/:id`
pub async fn get_inventory<B: Backends>(
  State(engine): State<Engine<B>>,
  Path(id): Path<Uuid>,
) -> Result<Json<InventoryItem>, ApiError> {
  Ok(Json(engine.get_inventory(id).await?))
}

/// `POST /inventory/:id/deactivate`
pub async fn deactivate_inventory<B: Backends>(
  State(engine): State<Engine<B>>,
  Path(id): Path<Uuid>,
) -> Result<Json<InventoryItem>, ApiError> {
  Ok(Json(engine.deactivate_inventory(id).await?))
}

// ─── Matching and execution ──────────────────────────────────────────────────

/// `POST /exchange/matches`
pub async fn find_matches<B: Backends>(
  State(engine): State<Engine<B>>,
  Json(request): Json<MatchRequest>,
) -> Result<Json<Vec<MatchCandidate>>, ApiError> {
  Ok(Json(engine.find_matches(request).await?))
}

/// `POST /exchange` returns 201 with the [`ExchangeReceipt`](linkmesh_engine::exchange::ExchangeReceipt).
pub async fn execute<B: Backends>(
  State(engine): State<Engine<B>>,
  Json(request): Json<ExchangeRequest>,
) -> Result<impl IntoResponse, ApiError> {
  let receipt = engine.execute_exchange(request).await?;
  Ok((StatusCode::CREATED, Json(receipt)))
}

/// `GET /exchange/links`
pub async fn list_links<B: Backends>(
  State(engine): State<Engine<B>>,
  Query(query): Query<ExchangeLinkQuery>,
) -> Result<Json<Vec<ExchangeLink>>, ApiError> {
  Ok(Json(engine.exchange_links(query).await?))
}

/// `GET /exchange/links/:id`
pub async fn get_link<B: Backends>(
  State(engine): State<Engine<B>>,
  Path(id): Path<Uuid>,
) -> Result<Json<ExchangeLink>, ApiError> {
  Ok(Json(engine.get_exchange_link(id).await?))
}

/// `POST /exchange/links/:id/settle`
pub async fn settle_link<B: Backends>(
  State(engine): State<Engine<B>>,
  Path(id): Path<Uuid>,
) -> Result<Json<LinkSettlement>, ApiError> {
  Ok(Json(engine.settle_link(id).await?))
}

// ─── Transactions ────────────────────────────────────────────────────────────

/// `GET /transactions`
pub async fn transactions<B: Backends>(
  State(engine): State<Engine<B>>,
  Query(query): Query<TransactionQuery>,
) -> Result<Json<Vec<Transaction>>, ApiError> {
  Ok(Json(engine.transactions(query).await?))
}

// ─── Blacklist ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct BlacklistBody {
  pub participant_a: Uuid,
  pub participant_b: Uuid,
  pub days:          i64,
  pub reason:        String,
}

/// `POST /blacklist`
pub async fn blacklist_pair<B: Backends>(
  State(engine): State<Engine<B>>,
  Json(body): Json<BlacklistBody>,
) -> Result<impl IntoResponse, ApiError> {
  let entry = engine
    .blacklist_pair(body.participant_a, body.participant_b, body.days, body.reason)
    .await?;
  Ok((StatusCode::CREATED, Json(entry)))
}

#[derive(Debug, Deserialize)]
pub struct BlacklistParams {
  pub participant: Option<Uuid>,
  #[serde(default)]
  pub active_only: bool,
}

/// `GET /blacklist[?participant=<id>][&active_only=true]`
pub async fn list_blacklist<B: Backends>(
  State(engine): State<Engine<B>>,
  Query(params): Query<BlacklistParams>,
) -> Result<Json<Vec<BlacklistEntry>>, ApiError> {
  Ok(Json(engine.list_blacklist(params.participant, params.active_only).await?))
}
