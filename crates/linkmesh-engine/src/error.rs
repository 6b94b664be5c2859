//! Error type for `linkmesh-engine`.
//!
//! Variants follow the failure taxonomy callers act on: missing records abort
//! the operation, ineligible and capacity failures skip a candidate, safety
//! blocks are never retried, transient collaborator failures may be.

use linkmesh_core::collab::CollaboratorError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("article {0} not found")]
  ArticleNotFound(Uuid),

  #[error("site {0} not found")]
  SiteNotFound(Uuid),

  #[error("inventory item {0} not found")]
  InventoryNotFound(Uuid),

  #[error("exchange link {0} not found")]
  ExchangeLinkNotFound(Uuid),

  #[error("task {0} not found")]
  TaskNotFound(Uuid),

  #[error("ineligible: {0}")]
  Ineligible(String),

  #[error("capacity exhausted: {0}")]
  CapacityExhausted(String),

  #[error("insufficient credits: {required} required, {available} available")]
  InsufficientBalance { required: i64, available: i64 },

  #[error("blocked: {0}")]
  SafetyBlock(String),

  #[error("collaborator failed: {0}")]
  Transient(#[from] CollaboratorError),

  #[error("article {0} has already been distributed")]
  AlreadyDistributed(Uuid),

  #[error("invalid url: {0}")]
  InvalidUrl(String),

  #[error("invalid input: {0}")]
  InvalidInput(String),

  /// The record exists but is not in a state that permits the operation.
  #[error("invalid state: {0}")]
  InvalidState(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub fn is_not_found(&self) -> bool {
    matches!(
      self,
      Self::ArticleNotFound(_)
        | Self::SiteNotFound(_)
        | Self::InventoryNotFound(_)
        | Self::ExchangeLinkNotFound(_)
        | Self::TaskNotFound(_)
    )
  }
}

impl From<linkmesh_core::Error> for Error {
  fn from(e: linkmesh_core::Error) -> Self {
    match e {
      linkmesh_core::Error::InvalidUrl { .. } => Self::InvalidUrl(e.to_string()),
      other => Self::InvalidInput(other.to_string()),
    }
  }
}

/// Box a backend error.
pub(crate) fn store_err<E>(e: E) -> Error
where
  E: std::error::Error + Send + Sync + 'static,
{
  Error::Store(Box::new(e))
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
