//! Liveness and indexation checks by fetching the placement page.
//!
//! A page is live when it still contains the target URL. It counts as
//! indexed when live and neither an `X-Robots-Tag` header nor a robots
//! `<meta>` tag says `noindex`. 404 and 410 mean the page is gone; other
//! failures are errors so callers leave the link untouched.

use std::time::Duration;

use linkmesh_core::collab::{CollaboratorError, HealthProbe, HealthReport, IndexationMonitor};
use reqwest::{Client, StatusCode, header::HeaderMap};

use crate::{config::MonitorConfig, content::transport_error};

pub struct HttpMonitor {
  client:  Client,
  timeout: Duration,
}

impl HttpMonitor {
  pub fn new(cfg: &MonitorConfig) -> reqwest::Result<Self> {
    let timeout = Duration::from_secs(cfg.timeout_secs.max(1));
    let client = Client::builder()
      .timeout(timeout)
      .user_agent(cfg.user_agent.clone())
      .build()?;
    Ok(Self { client, timeout })
  }
}

impl IndexationMonitor for HttpMonitor {
  async fn check_health(&self, probe: HealthProbe) -> Result<HealthReport, CollaboratorError> {
    let resp = self
      .client
      .get(&probe.page_url)
      .send()
      .await
      .map_err(|e| transport_error(e, self.timeout))?;

    let status = resp.status();
    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
      return Ok(HealthReport { is_live: false, is_indexed: false });
    }
    if !status.is_success() {
      return Err(CollaboratorError::Unavailable(format!(
        "{} returned {status}",
        probe.page_url
      )));
    }

    let header_noindex = robots_header_noindex(resp.headers());
    let body = resp
      .text()
      .await
      .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;
    Ok(inspect(&body, &probe.target_url, header_noindex))
  }
}

fn robots_header_noindex(headers: &HeaderMap) -> bool {
  headers
    .get_all("x-robots-tag")
    .iter()
    .filter_map(|v| v.to_str().ok())
    .any(|v| v.to_ascii_lowercase().contains("noindex"))
}

/// Judge a fetched page. An empty target only requires the page to exist.
pub fn inspect(body: &str, target_url: &str, header_noindex: bool) -> HealthReport {
  let target = target_url.trim_end_matches('/');
  let is_live = target.is_empty() || body.contains(target);
  let is_indexed = is_live && !header_noindex && !meta_noindex(body);
  HealthReport { is_live, is_indexed }
}

/// Whether any `<meta name="robots">` (or `googlebot`) tag carries `noindex`.
fn meta_noindex(body: &str) -> bool {
  let lower = body.to_ascii_lowercase();
  let mut rest = lower.as_str();
  while let Some(start) = rest.find("<meta") {
    let tag_and_rest = &rest[start..];
    let end = tag_and_rest.find('>').unwrap_or(tag_and_rest.len());
    let tag = &tag_and_rest[..end];
    if (tag.contains("robots") || tag.contains("googlebot")) && tag.contains("noindex") {
      return true;
    }
    rest = &tag_and_rest[end..];
  }
  false
}

#[cfg(test)]
mod tests {
  use super::*;

  const TARGET: &str = "https://trail.co/blog/shoes";

  #[test]
  fn page_with_the_link_is_live_and_indexed() {
    let body = format!(r#"<html><body><a href="{TARGET}">shoes</a></body></html>"#);
    assert_eq!(inspect(&body, TARGET, false), HealthReport { is_live: true, is_indexed: true });
  }

  #[test]
  fn missing_link_means_removed() {
    let body = "<html><body>nothing here</body></html>";
    assert_eq!(inspect(body, TARGET, false), HealthReport { is_live: false, is_indexed: false });
  }

  #[test]
  fn noindex_meta_or_header_keeps_the_page_out_of_the_index() {
    let body = format!(
      r#"<html><head><META NAME="robots" CONTENT="noindex, follow"></head><a href="{TARGET}/">x</a></html>"#
    );
    assert_eq!(inspect(&body, TARGET, false), HealthReport { is_live: true, is_indexed: false });

    let plain = format!(r#"<a href="{TARGET}">x</a>"#);
    assert!(!inspect(&plain, TARGET, true).is_indexed);
  }

  #[test]
  fn unrelated_meta_tags_are_ignored() {
    let body = format!(
      r#"<meta name="description" content="noindex is a word"><meta name="robots" content="index"><a href="{TARGET}">x</a>"#
    );
    assert!(inspect(&body, TARGET, false).is_indexed);
  }

  #[test]
  fn empty_target_only_needs_the_page() {
    assert!(inspect("<html></html>", "", false).is_live);
  }
}
