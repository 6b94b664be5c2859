//! Settlement: confirm pending exchange links once their grace period has
//! passed and finalise the provider's credits.
//!
//! A live link awards; a dead one claws back the pending amount. A check
//! that fails or times out decides nothing: the attempt is stamped on the
//! link, which then queues behind every link not yet tried.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use linkmesh_core::{
  collab::{HealthProbe, IndexationMonitor},
  exchange::{CreditsStatus, ExchangeLink, SettlementDecision},
  ledger::Transaction,
  link::Module,
  store::{ExchangeLinkQuery, LinkStore, SettleOutcome},
};

use crate::{Backends, Engine, Error, Result, error::store_err, retry::with_timeout};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LinkSettlement {
  Awarded { transaction: Transaction },
  ClawedBack { transaction: Transaction },
  Deferred { reason: String },
  NotDue { due_at: DateTime<Utc> },
  AlreadySettled { status: CreditsStatus },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementFailure {
  pub link_id: Uuid,
  pub reason:  String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettlementReport {
  pub examined:        usize,
  pub awarded:         usize,
  pub clawed_back:     usize,
  pub deferred:        usize,
  pub already_settled: usize,
  pub failures:        Vec<SettlementFailure>,
}

impl<B: Backends> Engine<B> {
  /// Settle up to one batch of pending links older than the grace period.
  /// Links never attempted come first, oldest first; deferred links follow
  /// in order of their last attempt.
  pub async fn run_settlement(&self) -> Result<SettlementReport> {
    let now = self.now();
    let cfg = self.config.settlement;
    let links = self
      .store
      .list_exchange_links(ExchangeLinkQuery {
        status: Some(CreditsStatus::Pending),
        created_before: Some(now - Duration::days(cfg.grace_days)),
        least_attempted_first: true,
        limit: Some(cfg.batch_size),
        ..Default::default()
      })
      .await
      .map_err(store_err)?;

    let mut report = SettlementReport { examined: links.len(), ..Default::default() };
    for link in &links {
      match self.settle_at(link, now).await {
        Ok(LinkSettlement::Awarded { .. }) => report.awarded += 1,
        Ok(LinkSettlement::ClawedBack { .. }) => report.clawed_back += 1,
        Ok(LinkSettlement::Deferred { .. } | LinkSettlement::NotDue { .. }) => {
          report.deferred += 1
        }
        Ok(LinkSettlement::AlreadySettled { .. }) => report.already_settled += 1,
        Err(e) => {
          warn!(link_id = %link.link_id, error = %e, "settlement failed");
          report.failures.push(SettlementFailure {
            link_id: link.link_id,
            reason:  e.to_string(),
          });
        }
      }
    }

    info!(
      examined = report.examined,
      awarded = report.awarded,
      clawed_back = report.clawed_back,
      deferred = report.deferred,
      failures = report.failures.len(),
      "settlement run finished"
    );
    Ok(report)
  }

  /// Settle one link now. Calling this on a settled link is a no-op.
  pub async fn settle_link(&self, link_id: Uuid) -> Result<LinkSettlement> {
    let link = self.get_exchange_link(link_id).await?;
    self.settle_at(&link, self.now()).await
  }

  async fn settle_at(&self, link: &ExchangeLink, now: DateTime<Utc>) -> Result<LinkSettlement> {
    if link.credits_status.is_terminal() {
      return Ok(LinkSettlement::AlreadySettled { status: link.credits_status });
    }
    let due_at = link.created_at + Duration::days(self.config.settlement.grace_days);
    if due_at > now {
      return Ok(LinkSettlement::NotDue { due_at });
    }

    let probe = HealthProbe {
      link_id:    link.link_id,
      page_url:   link.page_url.clone(),
      target_url: link.target_url.clone(),
      module:     Module::Exchange,
    };
    let limit = StdDuration::from_secs(self.config.settlement.check_timeout_secs.max(1));
    let report = match with_timeout(limit, self.monitor.check_health(probe)).await {
      Ok(report) => report,
      Err(e) => {
        warn!(link_id = %link.link_id, error = %e, "liveness check failed; settlement deferred");
        self
          .store
          .record_settlement_attempt(link.link_id, now)
          .await
          .map_err(store_err)?;
        return Ok(LinkSettlement::Deferred { reason: e.to_string() });
      }
    };

    let decision = if report.is_live {
      SettlementDecision::Award
    } else {
      SettlementDecision::Clawback
    };
    let outcome = self
      .store
      .settle_exchange_link(link.link_id, decision, report, now)
      .await
      .map_err(store_err)?;

    match outcome {
      SettleOutcome::Settled { transaction, .. } => {
        info!(
          link_id = %link.link_id,
          provider_id = %link.provider_id,
          credits = link.credits_awarded,
          ?decision,
          "link settled"
        );
        Ok(match decision {
          SettlementDecision::Award => LinkSettlement::Awarded { transaction },
          SettlementDecision::Clawback => LinkSettlement::ClawedBack { transaction },
        })
      }
      SettleOutcome::AlreadySettled(status) => Ok(LinkSettlement::AlreadySettled { status }),
      SettleOutcome::NotFound => Err(Error::ExchangeLinkNotFound(link.link_id)),
    }
  }
}
