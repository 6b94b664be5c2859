//! Reconciliation: make every exchange link's ledger trail complete, then
//! check every ledger against its transaction history.
//!
//! Backfills go through the same atomic ledger path as live traffic and are
//! keyed by link id, so a second run finds nothing to do.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use linkmesh_core::{
  exchange::{CreditsStatus, ExchangeLink},
  ledger::{LedgerDrift, LedgerEntry, LedgerSums},
  store::{ExchangeLinkQuery, LedgerOutcome, LinkStore, TransactionQuery},
};

use crate::{Backends, Engine, Result, error::store_err};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileReport {
  pub links_examined:  usize,
  pub backfilled:      usize,
  /// Links whose missing entries could not be applied without a negative
  /// balance.
  pub unrecoverable:   Vec<Uuid>,
  pub ledgers_checked: usize,
  pub drift:           Vec<LedgerDrift>,
}

/// Every transaction `link` implies, in the order they happen.
pub fn expected_entries(link: &ExchangeLink) -> Vec<LedgerEntry> {
  let credits = link.credits_awarded;
  let tag = |e: LedgerEntry| e.for_link(link.link_id).for_inventory(link.inventory_id);

  let mut entries = vec![
    tag(LedgerEntry::spend(link.requester_id, credits, "backfill: link purchase")),
    tag(LedgerEntry::pending(link.provider_id, credits, "backfill: link provided")),
  ];
  match link.credits_status {
    CreditsStatus::Pending => {}
    CreditsStatus::Awarded => {
      entries.push(tag(LedgerEntry::earn(link.provider_id, credits, "backfill: settlement")))
    }
    CreditsStatus::ClawedBack => {
      entries.push(tag(LedgerEntry::clawback(link.provider_id, credits, "backfill: clawback")))
    }
  }
  entries
}

impl<B: Backends> Engine<B> {
  pub async fn run_reconciliation(&self) -> Result<ReconcileReport> {
    let now = self.now();
    let links = self
      .store
      .list_exchange_links(ExchangeLinkQuery { oldest_first: true, ..Default::default() })
      .await
      .map_err(store_err)?;

    let mut report = ReconcileReport { links_examined: links.len(), ..Default::default() };
    for link in &links {
      match self
        .store
        .apply_ledger_entries(expected_entries(link), now)
        .await
        .map_err(store_err)?
      {
        LedgerOutcome::Applied { transactions, .. } if !transactions.is_empty() => {
          warn!(
            link_id = %link.link_id,
            count = transactions.len(),
            "backfilled missing ledger transactions"
          );
          report.backfilled += transactions.len();
        }
        LedgerOutcome::Applied { .. } => {}
        LedgerOutcome::Insufficient { user_id } => {
          warn!(link_id = %link.link_id, %user_id, "ledger trail cannot be backfilled");
          report.unrecoverable.push(link.link_id);
        }
      }
    }

    let ledgers = self.store.list_ledgers().await.map_err(store_err)?;
    report.ledgers_checked = ledgers.len();
    for ledger in &ledgers {
      let history = self
        .store
        .list_transactions(TransactionQuery {
          user_id: Some(ledger.user_id),
          ..Default::default()
        })
        .await
        .map_err(store_err)?;
      if let Some(drift) = LedgerDrift::detect(ledger, LedgerSums::from_transactions(&history)) {
        warn!(
          user_id = %drift.user_id,
          stored_balance = drift.stored_balance,
          expected_balance = drift.expected_balance,
          stored_pending = drift.stored_pending,
          expected_pending = drift.expected_pending,
          "ledger drift"
        );
        report.drift.push(drift);
      }
    }

    info!(
      links = report.links_examined,
      backfilled = report.backfilled,
      unrecoverable = report.unrecoverable.len(),
      drift = report.drift.len(),
      "reconciliation finished"
    );
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use linkmesh_core::{anchor::AnchorType, ledger::TransactionKind};

  use super::*;

  fn link(status: CreditsStatus) -> ExchangeLink {
    ExchangeLink {
      link_id:         Uuid::new_v4(),
      requester_id:    Uuid::new_v4(),
      provider_id:     Uuid::new_v4(),
      inventory_id:    Uuid::new_v4(),
      page_url:        "https://provider.com/resources".into(),
      target_url:      "https://requester.com/a".into(),
      hop_distance:    0,
      anchor_text:     "requester.com".into(),
      anchor_type:     AnchorType::NakedDomain,
      credits_awarded: 10,
      credits_status:  status,
      is_live:         true,
      is_indexed:      false,
      created_at:      Utc::now(),
      settled_at:      None,
    }
  }

  fn kinds(entries: &[LedgerEntry]) -> Vec<TransactionKind> {
    entries.iter().map(|e| e.kind).collect()
  }

  #[test]
  fn pending_link_implies_spend_and_pending() {
    let l = link(CreditsStatus::Pending);
    let entries = expected_entries(&l);
    assert_eq!(kinds(&entries), [TransactionKind::Spent, TransactionKind::Pending]);
    assert_eq!(entries[0].user_id, l.requester_id);
    assert_eq!(entries[0].amount, -10);
    assert_eq!(entries[1].user_id, l.provider_id);
    assert!(entries.iter().all(|e| e.related_link_id == Some(l.link_id)));
  }

  #[test]
  fn settled_links_add_their_terminal_entry() {
    let awarded = expected_entries(&link(CreditsStatus::Awarded));
    assert_eq!(awarded.last().map(|e| e.kind), Some(TransactionKind::Earned));

    let clawed = expected_entries(&link(CreditsStatus::ClawedBack));
    assert_eq!(clawed.last().map(|e| (e.kind, e.amount)), Some((TransactionKind::Clawback, -10)));
  }
}
