//! JSON REST API for linkmesh.
//!
//! Exposes an axum [`Router`] over an [`Engine`]: catalog records, the
//! distribution engine and its task queue, the peer exchange, ledgers,
//! graph queries and manual triggers for the batch jobs. Auth, TLS, and
//! transport concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", linkmesh_api::api_router(engine.clone()))
//! ```

pub mod catalog;
pub mod error;
pub mod exchange;
pub mod graph;
pub mod jobs;
pub mod tasks;
pub mod users;

use axum::{
  Router,
  routing::{get, post},
};
use linkmesh_engine::{Backends, Engine};
use tower_http::trace::TraceLayer;

pub use error::ApiError;

/// Build a fully-materialised API router for `engine`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<B: Backends>(engine: Engine<B>) -> Router<()> {
  Router::new()
    // Catalog
    .route("/sites", post(catalog::create_site::<B>))
    .route("/sites/{id}", get(catalog::get_site::<B>))
    .route("/articles", post(catalog::create_article::<B>))
    .route("/articles/{id}", get(catalog::get_article::<B>))
    .route("/articles/{id}/derivatives", get(catalog::derivatives::<B>))
    .route("/articles/{id}/distribute", post(catalog::distribute::<B>))
    .route(
      "/platforms",
      get(catalog::list_platforms::<B>).put(catalog::upsert_platform::<B>),
    )
    // Tasks
    .route("/tasks", get(tasks::list::<B>))
    .route("/tasks/due", get(tasks::due::<B>))
    .route("/tasks/{id}", get(tasks::get_one::<B>))
    .route("/tasks/{id}/complete", post(tasks::complete::<B>))
    .route("/tasks/{id}/fail", post(tasks::fail::<B>))
    // Users
    .route(
      "/users/{id}/settings",
      get(users::get_settings::<B>).put(users::put_settings::<B>),
    )
    .route("/users/{id}/velocity", get(users::velocity::<B>))
    .route("/users/{id}/ledger", get(users::ledger::<B>))
    .route("/users/{id}/bonus", post(users::bonus::<B>))
    .route("/users/{id}/anchors", get(users::anchors::<B>))
    .route("/users/{id}/patterns", get(users::patterns::<B>))
    .route("/users/{id}/summary", get(users::summary::<B>))
    // Exchange
    .route(
      "/inventory",
      get(exchange::list_inventory::<B>).post(exchange::add_inventory::<B>),
    )
    .route("/inventory/{id}", get(exchange::get_inventory::<B>))
    .route("/inventory/{id}/deactivate", post(exchange::deactivate_inventory::<B>))
    .route("/exchange", post(exchange::execute::<B>))
    .route("/exchange/matches", post(exchange::find_matches::<B>))
    .route("/exchange/links", get(exchange::list_links::<B>))
    .route("/exchange/links/{id}", get(exchange::get_link::<B>))
    .route("/exchange/links/{id}/settle", post(exchange::settle_link::<B>))
    .route("/transactions", get(exchange::transactions::<B>))
    .route(
      "/blacklist",
      get(exchange::list_blacklist::<B>).post(exchange::blacklist_pair::<B>),
    )
    // Graph
    .route("/graph/distance", get(graph::distance::<B>))
    .route("/graph/route", get(graph::route::<B>))
    .route("/graph/isolation", get(graph::isolation::<B>))
    .route("/anchors/select", post(graph::select_anchor::<B>))
    // Jobs
    .route("/jobs/settlement", post(jobs::settlement::<B>))
    .route("/jobs/decay", post(jobs::decay::<B>))
    .route("/jobs/reconcile", post(jobs::reconcile::<B>))
    .route("/jobs/health", post(jobs::health::<B>))
    .layer(TraceLayer::new_for_http())
    .with_state(engine)
}
