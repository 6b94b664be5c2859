//! Content adaptation over HTTP, with the extractive adapter as the
//! fallback when no endpoint is configured.
//!
//! The remote service receives the [`ContentRequest`] as JSON and answers
//! with an [`AdaptedContent`]. A 4xx is a rejection; anything else that is
//! not a success may be retried.

use std::time::Duration;

use linkmesh_core::{
  adapt::ExtractiveAdapter,
  collab::{AdaptedContent, CollaboratorError, ContentAdapter, ContentRequest},
};
use reqwest::Client;

use crate::config::ContentConfig;

pub struct HttpContentAdapter {
  client:   Client,
  endpoint: String,
  timeout:  Duration,
}

impl HttpContentAdapter {
  pub fn new(endpoint: String, timeout: Duration) -> reqwest::Result<Self> {
    let client = Client::builder().timeout(timeout).build()?;
    Ok(Self { client, endpoint, timeout })
  }
}

impl ContentAdapter for HttpContentAdapter {
  async fn generate(&self, request: ContentRequest) -> Result<AdaptedContent, CollaboratorError> {
    let resp = self
      .client
      .post(&self.endpoint)
      .json(&request)
      .send()
      .await
      .map_err(|e| transport_error(e, self.timeout))?;

    let status = resp.status();
    if status.is_client_error() {
      let detail = resp.text().await.unwrap_or_default();
      return Err(CollaboratorError::Rejected(format!("{status}: {detail}")));
    }
    if !status.is_success() {
      return Err(CollaboratorError::Unavailable(format!(
        "content service returned {status}"
      )));
    }
    resp
      .json()
      .await
      .map_err(|e| CollaboratorError::Unavailable(format!("malformed content response: {e}")))
  }
}

pub(crate) fn transport_error(e: reqwest::Error, timeout: Duration) -> CollaboratorError {
  if e.is_timeout() {
    CollaboratorError::Timeout(timeout)
  } else {
    CollaboratorError::Unavailable(e.to_string())
  }
}

/// The content adapter the server runs with.
pub enum Content {
  Http(HttpContentAdapter),
  Extractive(ExtractiveAdapter),
}

impl Content {
  pub fn from_config(cfg: &ContentConfig) -> reqwest::Result<Self> {
    Ok(match &cfg.endpoint {
      Some(endpoint) => Self::Http(HttpContentAdapter::new(
        endpoint.clone(),
        Duration::from_secs(cfg.timeout_secs.max(1)),
      )?),
      None => Self::Extractive(ExtractiveAdapter::default()),
    })
  }

  pub fn describe(&self) -> &str {
    match self {
      Self::Http(a) => &a.endpoint,
      Self::Extractive(_) => "built-in extractive adapter",
    }
  }
}

impl ContentAdapter for Content {
  async fn generate(&self, request: ContentRequest) -> Result<AdaptedContent, CollaboratorError> {
    match self {
      Self::Http(a) => a.generate(request).await,
      Self::Extractive(a) => a.generate(request).await,
    }
  }
}
