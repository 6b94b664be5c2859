//! The credit ledger.
//!
//! Every mutation of a [`Ledger`] is paired with exactly one immutable
//! [`Transaction`]. Amounts are signed. `earned`, `spent`, `decay` and `bonus`
//! move the spendable balance; `pending` and `clawback` move the pending
//! bucket; an `earned` transaction that references an exchange link also
//! drains that link's pending amount.

use chrono::{DateTime, Datelike, Months, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Ledger ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
  pub user_id:         Uuid,
  /// Spendable; never negative.
  pub balance:         i64,
  /// Awaiting settlement; not spendable.
  pub pending_credits: i64,
  pub lifetime_earned: i64,
  pub lifetime_spent:  i64,
  pub created_at:      DateTime<Utc>,
  pub updated_at:      DateTime<Utc>,
}

impl Ledger {
  pub fn empty(user_id: Uuid, now: DateTime<Utc>) -> Self {
    Self {
      user_id,
      balance: 0,
      pending_credits: 0,
      lifetime_earned: 0,
      lifetime_spent: 0,
      created_at: now,
      updated_at: now,
    }
  }

  /// The ledger after `entry`, or `None` if it would push the balance or the
  /// pending bucket below zero.
  pub fn apply(&self, entry: &LedgerEntry, now: DateTime<Utc>) -> Option<Ledger> {
    let mut next = self.clone();
    let amount = entry.amount;

    match entry.kind {
      TransactionKind::Earned => {
        next.balance += amount;
        next.lifetime_earned += amount;
        if entry.related_link_id.is_some() {
          next.pending_credits -= amount;
        }
      }
      TransactionKind::Spent => {
        next.balance += amount;
        next.lifetime_spent -= amount;
      }
      TransactionKind::Decay | TransactionKind::Bonus => next.balance += amount,
      TransactionKind::Pending | TransactionKind::Clawback => {
        next.pending_credits += amount;
      }
    }

    if next.balance < 0 || next.pending_credits < 0 {
      return None;
    }
    next.updated_at = now;
    Some(next)
  }
}

// ─── Transactions ────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
  Earned,
  Spent,
  Pending,
  Decay,
  Bonus,
  Clawback,
}

impl TransactionKind {
  pub const ALL: [TransactionKind; 6] = [
    TransactionKind::Earned,
    TransactionKind::Spent,
    TransactionKind::Pending,
    TransactionKind::Decay,
    TransactionKind::Bonus,
    TransactionKind::Clawback,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Earned => "earned",
      Self::Spent => "spent",
      Self::Pending => "pending",
      Self::Decay => "decay",
      Self::Bonus => "bonus",
      Self::Clawback => "clawback",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|k| k.as_str() == s)
      .ok_or_else(|| Error::unknown("transaction kind", s))
  }

  /// Whether this kind moves the spendable balance.
  pub fn affects_balance(self) -> bool {
    matches!(self, Self::Earned | Self::Spent | Self::Decay | Self::Bonus)
  }
}

/// An immutable record of one ledger mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
  pub transaction_id:       Uuid,
  pub user_id:              Uuid,
  pub kind:                 TransactionKind,
  pub amount:               i64,
  pub balance_after:        i64,
  pub pending_after:        i64,
  pub reason:               String,
  pub related_link_id:      Option<Uuid>,
  pub related_inventory_id: Option<Uuid>,
  pub created_at:           DateTime<Utc>,
}

/// A requested ledger mutation. Constructors take positive magnitudes and set
/// the sign from the kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
  pub user_id:              Uuid,
  pub kind:                 TransactionKind,
  pub amount:               i64,
  pub reason:               String,
  pub related_link_id:      Option<Uuid>,
  pub related_inventory_id: Option<Uuid>,
  /// Applied at most once per user under this key; later entries with the
  /// same key are skipped.
  #[serde(default)]
  pub once_key:             Option<String>,
}

impl LedgerEntry {
  fn new(user_id: Uuid, kind: TransactionKind, amount: i64, reason: String) -> Self {
    Self {
      user_id,
      kind,
      amount,
      reason,
      related_link_id: None,
      related_inventory_id: None,
      once_key: None,
    }
  }

  pub fn spend(user_id: Uuid, credits: i64, reason: impl Into<String>) -> Self {
    Self::new(user_id, TransactionKind::Spent, -credits.abs(), reason.into())
  }

  pub fn pending(user_id: Uuid, credits: i64, reason: impl Into<String>) -> Self {
    Self::new(user_id, TransactionKind::Pending, credits.abs(), reason.into())
  }

  pub fn earn(user_id: Uuid, credits: i64, reason: impl Into<String>) -> Self {
    Self::new(user_id, TransactionKind::Earned, credits.abs(), reason.into())
  }

  pub fn clawback(user_id: Uuid, credits: i64, reason: impl Into<String>) -> Self {
    Self::new(user_id, TransactionKind::Clawback, -credits.abs(), reason.into())
  }

  pub fn decay(user_id: Uuid, credits: i64, reason: impl Into<String>) -> Self {
    Self::new(user_id, TransactionKind::Decay, -credits.abs(), reason.into())
  }

  pub fn bonus(user_id: Uuid, credits: i64, reason: impl Into<String>) -> Self {
    Self::new(user_id, TransactionKind::Bonus, credits.abs(), reason.into())
  }

  pub fn for_link(mut self, link_id: Uuid) -> Self {
    self.related_link_id = Some(link_id);
    self
  }

  pub fn for_inventory(mut self, inventory_id: Uuid) -> Self {
    self.related_inventory_id = Some(inventory_id);
    self
  }

  pub fn once(mut self, key: impl Into<String>) -> Self {
    self.once_key = Some(key.into());
    self
  }
}

// ─── Reconciliation ──────────────────────────────────────────────────────────

/// Balance and pending totals recomputed from a transaction history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSums {
  pub balance: i64,
  pub pending: i64,
}

impl LedgerSums {
  pub fn from_transactions<'a>(txs: impl IntoIterator<Item = &'a Transaction>) -> Self {
    let mut sums = Self::default();
    for tx in txs {
      if tx.kind.affects_balance() {
        sums.balance += tx.amount;
      }
      match tx.kind {
        TransactionKind::Pending | TransactionKind::Clawback => sums.pending += tx.amount,
        TransactionKind::Earned if tx.related_link_id.is_some() => {
          sums.pending -= tx.amount;
        }
        _ => {}
      }
    }
    sums
  }
}

/// A ledger whose stored totals disagree with its transaction history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerDrift {
  pub user_id:          Uuid,
  pub stored_balance:   i64,
  pub expected_balance: i64,
  pub stored_pending:   i64,
  pub expected_pending: i64,
}

impl LedgerDrift {
  pub fn detect(ledger: &Ledger, sums: LedgerSums) -> Option<Self> {
    if ledger.balance == sums.balance && ledger.pending_credits == sums.pending {
      return None;
    }
    Some(Self {
      user_id:          ledger.user_id,
      stored_balance:   ledger.balance,
      expected_balance: sums.balance,
      stored_pending:   ledger.pending_credits,
      expected_pending: sums.pending,
    })
  }
}

// ─── Decay arithmetic ────────────────────────────────────────────────────────

/// Whole calendar months elapsed from `from` to `to`.
pub fn months_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u32 {
  if to <= from {
    return 0;
  }
  let raw = (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32;
  let mut months = raw.max(0) as u32;
  while months > 0 {
    match from.checked_add_months(Months::new(months)) {
      Some(t) if t <= to => break,
      _ => months -= 1,
    }
  }
  months
}

/// Credits lost to decay: `rate_percent` per idle month, capped at
/// `cap_percent` of the balance. Rounds down.
pub fn decay_amount(balance: i64, idle_months: u32, rate_percent: u32, cap_percent: u32) -> i64 {
  if balance <= 0 || idle_months == 0 {
    return 0;
  }
  let raw = balance * i64::from(rate_percent) * i64::from(idle_months) / 100;
  let cap = balance * i64::from(cap_percent) / 100;
  raw.min(cap).max(0)
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
  }

  #[test]
  fn spend_refuses_to_go_negative() {
    let user = Uuid::new_v4();
    let mut ledger = Ledger::empty(user, Utc::now());
    ledger.balance = 5;
    assert!(ledger.apply(&LedgerEntry::spend(user, 10, "x"), Utc::now()).is_none());

    let after = ledger
      .apply(&LedgerEntry::spend(user, 5, "x"), Utc::now())
      .unwrap();
    assert_eq!(after.balance, 0);
    assert_eq!(after.lifetime_spent, 5);
  }

  #[test]
  fn earning_a_link_drains_pending() {
    let user = Uuid::new_v4();
    let link = Uuid::new_v4();
    let ledger = Ledger::empty(user, Utc::now());
    let ledger = ledger
      .apply(&LedgerEntry::pending(user, 10, "p").for_link(link), Utc::now())
      .unwrap();
    assert_eq!((ledger.balance, ledger.pending_credits), (0, 10));

    let ledger = ledger
      .apply(&LedgerEntry::earn(user, 10, "e").for_link(link), Utc::now())
      .unwrap();
    assert_eq!((ledger.balance, ledger.pending_credits), (10, 0));
    assert_eq!(ledger.lifetime_earned, 10);
  }

  #[test]
  fn clawback_only_touches_pending() {
    let user = Uuid::new_v4();
    let mut ledger = Ledger::empty(user, Utc::now());
    ledger.balance = 7;
    ledger.pending_credits = 10;
    let after = ledger
      .apply(&LedgerEntry::clawback(user, 10, "dead"), Utc::now())
      .unwrap();
    assert_eq!((after.balance, after.pending_credits), (7, 0));
    assert!(after.apply(&LedgerEntry::clawback(user, 1, "x"), Utc::now()).is_none());
  }

  #[test]
  fn sums_match_applied_history() {
    let user = Uuid::new_v4();
    let link = Uuid::new_v4();
    let entries = [
      LedgerEntry::bonus(user, 50, "welcome"),
      LedgerEntry::spend(user, 12, "exchange"),
      LedgerEntry::pending(user, 8, "provided").for_link(link),
      LedgerEntry::earn(user, 8, "settled").for_link(link),
      LedgerEntry::pending(user, 4, "provided").for_link(Uuid::new_v4()),
      LedgerEntry::decay(user, 2, "idle"),
    ];

    let now = Utc::now();
    let mut ledger = Ledger::empty(user, now);
    let mut txs = Vec::new();
    for e in &entries {
      ledger = ledger.apply(e, now).unwrap();
      txs.push(Transaction {
        transaction_id:       Uuid::new_v4(),
        user_id:              user,
        kind:                 e.kind,
        amount:               e.amount,
        balance_after:        ledger.balance,
        pending_after:        ledger.pending_credits,
        reason:               e.reason.clone(),
        related_link_id:      e.related_link_id,
        related_inventory_id: None,
        created_at:           now,
      });
    }

    let sums = LedgerSums::from_transactions(&txs);
    assert_eq!(sums, LedgerSums { balance: 44, pending: 4 });
    assert!(LedgerDrift::detect(&ledger, sums).is_none());

    ledger.balance += 1;
    let drift = LedgerDrift::detect(&ledger, sums).unwrap();
    assert_eq!(drift.expected_balance, 44);
  }

  #[test]
  fn months_between_counts_whole_months() {
    assert_eq!(months_between(at(2024, 1, 15), at(2024, 4, 15)), 3);
    assert_eq!(months_between(at(2024, 1, 15), at(2024, 4, 14)), 2);
    assert_eq!(months_between(at(2024, 1, 31), at(2024, 2, 29)), 1);
    assert_eq!(months_between(at(2024, 5, 1), at(2024, 4, 1)), 0);
  }

  #[test]
  fn decay_is_capped() {
    assert_eq!(decay_amount(100, 3, 5, 20), 15);
    assert_eq!(decay_amount(100, 6, 5, 20), 20);
    assert_eq!(decay_amount(100, 0, 5, 20), 0);
    assert_eq!(decay_amount(0, 4, 5, 20), 0);
    assert_eq!(decay_amount(19, 1, 5, 20), 0);
  }
}
