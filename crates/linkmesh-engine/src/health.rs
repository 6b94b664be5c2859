//! The health sweep: re-check the stalest live backlinks of one module.

use std::time::Duration as StdDuration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use linkmesh_core::{
  collab::{HealthProbe, IndexationMonitor},
  link::Module,
  store::{BacklinkQuery, LinkStore},
};

use crate::{Backends, Engine, Result, error::store_err, retry::with_timeout};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthFailure {
  pub backlink_id: Uuid,
  pub reason:      String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthBatchReport {
  pub module:        Module,
  pub checked:       usize,
  pub live_count:    usize,
  pub indexed_count: usize,
  pub failures:      Vec<HealthFailure>,
}

impl<B: Backends> Engine<B> {
  /// Check up to `batch_size` live backlinks, least recently attempted
  /// first. A failed check leaves the health fields untouched and only
  /// stamps the attempt, so the next sweep starts with other backlinks.
  pub async fn run_health_check_batch(
    &self,
    module: Module,
    batch_size: usize,
  ) -> Result<HealthBatchReport> {
    let now = self.now();
    let backlinks = self
      .store
      .list_backlinks(BacklinkQuery {
        module: Some(module),
        live_only: true,
        stalest_first: true,
        limit: Some(batch_size),
        ..Default::default()
      })
      .await
      .map_err(store_err)?;
    let limit = StdDuration::from_secs(self.config.settlement.check_timeout_secs.max(1));

    let mut report = HealthBatchReport {
      module,
      checked: 0,
      live_count: 0,
      indexed_count: 0,
      failures: Vec::new(),
    };
    for backlink in backlinks {
      report.checked += 1;
      let probe = HealthProbe {
        link_id:    backlink.backlink_id,
        page_url:   backlink.source_url.clone(),
        target_url: backlink.target_url.clone(),
        module,
      };
      let health = match with_timeout(limit, self.monitor.check_health(probe)).await {
        Ok(h) => h,
        Err(e) => {
          warn!(backlink_id = %backlink.backlink_id, error = %e, "health check failed");
          self
            .store
            .record_backlink_attempt(backlink.backlink_id, now)
            .await
            .map_err(store_err)?;
          report.failures.push(HealthFailure {
            backlink_id: backlink.backlink_id,
            reason:      e.to_string(),
          });
          continue;
        }
      };

      self
        .store
        .record_backlink_health(backlink.backlink_id, health, now)
        .await
        .map_err(store_err)?;
      if health.is_live {
        report.live_count += 1;
      } else {
        warn!(backlink_id = %backlink.backlink_id, source = %backlink.source_url, "backlink removed");
      }
      if health.is_indexed {
        report.indexed_count += 1;
      }
    }

    info!(
      module = module.as_str(),
      checked = report.checked,
      live = report.live_count,
      indexed = report.indexed_count,
      failures = report.failures.len(),
      "health sweep finished"
    );
    Ok(report)
  }
}
