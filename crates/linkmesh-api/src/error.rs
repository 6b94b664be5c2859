//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use linkmesh_engine::Error as EngineError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("payment required: {0}")]
  PaymentRequired(String),

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("unprocessable: {0}")]
  Unprocessable(String),

  #[error("unavailable: {0}")]
  Unavailable(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<EngineError> for ApiError {
  fn from(e: EngineError) -> Self {
    if e.is_not_found() {
      return Self::NotFound(e.to_string());
    }
    match e {
      EngineError::Store(inner) => Self::Store(inner),
      EngineError::InsufficientBalance { .. } => Self::PaymentRequired(e.to_string()),
      EngineError::Ineligible(_) => Self::Unprocessable(e.to_string()),
      EngineError::SafetyBlock(_)
      | EngineError::CapacityExhausted(_)
      | EngineError::AlreadyDistributed(_)
      | EngineError::InvalidState(_) => Self::Conflict(e.to_string()),
      EngineError::Transient(_) => Self::Unavailable(e.to_string()),
      _ => Self::BadRequest(e.to_string()),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::PaymentRequired(m) => (StatusCode::PAYMENT_REQUIRED, m.clone()),
      ApiError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
      ApiError::Unprocessable(m) => (StatusCode::UNPROCESSABLE_ENTITY, m.clone()),
      ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
      ApiError::Store(e) => {
        error!(error = %e, "store failure");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
      }
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}

#[cfg(test)]
mod tests {
  use linkmesh_core::collab::CollaboratorError;
  use uuid::Uuid;

  use super::*;

  fn status(e: EngineError) -> StatusCode { ApiError::from(e).into_response().status() }

  #[test]
  fn engine_failures_map_to_distinct_statuses() {
    assert_eq!(status(EngineError::ArticleNotFound(Uuid::nil())), StatusCode::NOT_FOUND);
    assert_eq!(
      status(EngineError::InsufficientBalance { required: 10, available: 5 }),
      StatusCode::PAYMENT_REQUIRED
    );
    assert_eq!(
      status(EngineError::Ineligible("blocked tld".into())),
      StatusCode::UNPROCESSABLE_ENTITY
    );
    assert_eq!(status(EngineError::SafetyBlock("pair".into())), StatusCode::CONFLICT);
    assert_eq!(status(EngineError::CapacityExhausted("full".into())), StatusCode::CONFLICT);
    assert_eq!(
      status(EngineError::Transient(CollaboratorError::Unavailable("down".into()))),
      StatusCode::SERVICE_UNAVAILABLE
    );
    assert_eq!(status(EngineError::InvalidUrl("x".into())), StatusCode::BAD_REQUEST);
  }
}
