//! Credit decay: idle balances lose a share per idle month, capped per run.
//!
//! Idleness runs from the latest `earned` or `decay` transaction, or from
//! ledger creation, so each idle month is charged once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use linkmesh_core::{
  ledger::{Ledger, LedgerEntry, TransactionKind, decay_amount, months_between},
  store::{LedgerOutcome, LinkStore},
};

use crate::{Backends, Engine, Result, error::store_err};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayFailure {
  pub user_id: Uuid,
  pub reason:  String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecayReport {
  pub examined:        usize,
  pub decayed:         usize,
  pub credits_removed: i64,
  pub failures:        Vec<DecayFailure>,
}

impl<B: Backends> Engine<B> {
  pub async fn run_decay(&self) -> Result<DecayReport> {
    let now = self.now();
    let ledgers = self.store.list_ledgers().await.map_err(store_err)?;

    let mut report = DecayReport::default();
    for ledger in ledgers.iter().filter(|l| l.balance > 0) {
      report.examined += 1;
      match self.decay_one(ledger, now).await {
        Ok(0) => {}
        Ok(amount) => {
          report.decayed += 1;
          report.credits_removed += amount;
        }
        Err(e) => {
          warn!(user_id = %ledger.user_id, error = %e, "decay failed");
          report.failures.push(DecayFailure {
            user_id: ledger.user_id,
            reason:  e.to_string(),
          });
        }
      }
    }

    info!(
      examined = report.examined,
      decayed = report.decayed,
      credits_removed = report.credits_removed,
      "decay run finished"
    );
    Ok(report)
  }

  /// Decay one ledger; returns the credits removed.
  async fn decay_one(&self, ledger: &Ledger, now: DateTime<Utc>) -> Result<i64> {
    let cfg = self.config.decay;
    let last_activity = self
      .store
      .last_transaction_at(
        ledger.user_id,
        vec![TransactionKind::Earned, TransactionKind::Decay],
      )
      .await
      .map_err(store_err)?;
    let since = last_activity.map_or(ledger.created_at, |t| t.max(ledger.created_at));

    let months = months_between(since, now);
    if months < cfg.idle_months.max(1) {
      return Ok(0);
    }
    let amount = decay_amount(ledger.balance, months, cfg.rate_percent, cfg.cap_percent);
    if amount == 0 {
      return Ok(0);
    }

    let entry = LedgerEntry::decay(ledger.user_id, amount, format!("{months} idle months"));
    match self
      .store
      .apply_ledger_entries(vec![entry], now)
      .await
      .map_err(store_err)?
    {
      LedgerOutcome::Applied { .. } => {
        info!(user_id = %ledger.user_id, months, amount, "credits decayed");
        Ok(amount)
      }
      // The balance dropped since it was read; next run recomputes.
      LedgerOutcome::Insufficient { .. } => Ok(0),
    }
  }
}
