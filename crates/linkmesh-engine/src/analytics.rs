//! Per-user reporting composed from the other engine queries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use linkmesh_core::{
  content::TaskStatus,
  exchange::{CreditsStatus, ExchangeLink},
  ledger::Ledger,
  link::Backlink,
  store::{BacklinkQuery, ExchangeLinkQuery, LinkStore, TaskQuery},
};

use crate::{
  Backends, Engine, Result, anchors::AnchorProfile, error::store_err,
  graph::PatternReport,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacklinkStats {
  pub total:      usize,
  pub live:       usize,
  pub indexed:    usize,
  /// Keyed by tier number.
  pub by_tier:    BTreeMap<u8, usize>,
  /// Indexed share of live backlinks.
  pub index_rate: f64,
}

impl BacklinkStats {
  pub fn from_backlinks<'a>(backlinks: impl IntoIterator<Item = &'a Backlink>) -> Self {
    let mut stats = Self::default();
    for b in backlinks {
      stats.total += 1;
      *stats.by_tier.entry(b.tier.number()).or_default() += 1;
      if b.is_live {
        stats.live += 1;
        if b.is_indexed {
          stats.indexed += 1;
        }
      }
    }
    if stats.live > 0 {
      stats.index_rate = stats.indexed as f64 / stats.live as f64;
    }
    stats
  }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TaskStats {
  pub pending:   usize,
  pub completed: usize,
  pub failed:    usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CreditStatusCounts {
  pub pending:    usize,
  pub awarded:    usize,
  pub clawedback: usize,
}

impl CreditStatusCounts {
  fn add(&mut self, link: &ExchangeLink) {
    match link.credits_status {
      CreditsStatus::Pending => self.pending += 1,
      CreditsStatus::Awarded => self.awarded += 1,
      CreditsStatus::ClawedBack => self.clawedback += 1,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExchangeStats {
  /// Links this user's pages carry.
  pub given:    CreditStatusCounts,
  /// Links this user bought.
  pub received: CreditStatusCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
  pub user_id:   Uuid,
  pub backlinks: BacklinkStats,
  pub tasks:     TaskStats,
  pub exchange:  ExchangeStats,
  pub ledger:    Ledger,
  pub anchors:   AnchorProfile,
  pub patterns:  PatternReport,
}

impl<B: Backends> Engine<B> {
  pub async fn user_summary(&self, user_id: Uuid) -> Result<UserSummary> {
    let backlinks = self
      .store
      .list_backlinks(BacklinkQuery { user_id: Some(user_id), ..Default::default() })
      .await
      .map_err(store_err)?;

    let mut tasks = TaskStats::default();
    for task in self
      .list_tasks(TaskQuery { user_id: Some(user_id), ..Default::default() })
      .await?
    {
      match task.status {
        TaskStatus::Pending => tasks.pending += 1,
        TaskStatus::Completed => tasks.completed += 1,
        TaskStatus::Failed => tasks.failed += 1,
      }
    }

    let mut exchange = ExchangeStats::default();
    for link in self
      .exchange_links(ExchangeLinkQuery { participant: Some(user_id), ..Default::default() })
      .await?
    {
      if link.provider_id == user_id {
        exchange.given.add(&link);
      } else {
        exchange.received.add(&link);
      }
    }

    let ledger = match self.store.get_ledger(user_id).await.map_err(store_err)? {
      Some(l) => l,
      None => Ledger::empty(user_id, self.now()),
    };

    Ok(UserSummary {
      user_id,
      backlinks: BacklinkStats::from_backlinks(&backlinks),
      tasks,
      exchange,
      ledger,
      anchors: self.anchor_profile(user_id).await?,
      patterns: self.detect_patterns(user_id).await?,
    })
  }
}
