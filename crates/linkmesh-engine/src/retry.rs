//! Timeout and retry around collaborator calls.

use std::{future::Future, time::Duration};

use linkmesh_core::{
  collab::{AdaptedContent, CollaboratorError, ContentAdapter, ContentRequest},
  config::ContentCallConfig,
};
use tracing::warn;

/// Run `fut` with a deadline, mapping expiry to [`CollaboratorError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, CollaboratorError>
where
  F: Future<Output = Result<T, CollaboratorError>>,
{
  match tokio::time::timeout(limit, fut).await {
    Ok(result) => result,
    Err(_) => Err(CollaboratorError::Timeout(limit)),
  }
}

/// Ask `adapter` for content, retrying retryable failures with doubling
/// backoff. Returns the last error once attempts run out.
pub async fn generate_with_retry<C: ContentAdapter>(
  adapter: &C,
  request: &ContentRequest,
  policy: ContentCallConfig,
) -> Result<AdaptedContent, CollaboratorError> {
  let limit = Duration::from_secs(policy.timeout_secs.max(1));
  let attempts = policy.attempts.max(1);
  let mut backoff = Duration::from_millis(policy.retry_backoff_ms);

  let mut attempt = 1;
  loop {
    match with_timeout(limit, adapter.generate(request.clone())).await {
      Ok(content) => return Ok(content),
      Err(e) if !e.is_retryable() || attempt >= attempts => return Err(e),
      Err(e) => {
        warn!(attempt, error = %e, "content generation failed; retrying");
        tokio::time::sleep(backoff).await;
        backoff = backoff.saturating_mul(2);
        attempt += 1;
      }
    }
  }
}
