//! Error type for `linkmesh-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] linkmesh_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("{entity} not found: {id}")]
  NotFound { entity: &'static str, id: uuid::Uuid },

  /// A state change was requested on a row that is no longer in a state that
  /// permits it (e.g. completing a task that already failed).
  #[error("invalid transition: {0}")]
  InvalidTransition(String),
}

impl Error {
  pub fn is_not_found(&self) -> bool { matches!(self, Self::NotFound { .. }) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
