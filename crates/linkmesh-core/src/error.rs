//! Error types for `linkmesh-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown {kind} discriminant: {value:?}")]
  UnknownDiscriminant { kind: &'static str, value: String },

  #[error("invalid tier: {0}")]
  InvalidTier(u8),

  #[error("invalid url {url:?}: {reason}")]
  InvalidUrl { url: String, reason: String },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  pub(crate) fn unknown(kind: &'static str, value: &str) -> Self {
    Self::UnknownDiscriminant { kind, value: value.to_owned() }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
