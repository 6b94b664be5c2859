//! Peer exchange records: offered link slots, realised exchange links and
//! pairwise blacklist entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, anchor::AnchorType, tier::Tier};

// ─── Inventory ───────────────────────────────────────────────────────────────

/// A participant's offered link slot.
///
/// `current_outbound_links <= max_outbound_links` always holds; the remaining
/// capacity is the gating resource for matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryItem {
  pub inventory_id:           Uuid,
  pub owner_id:               Uuid,
  pub domain:                 String,
  pub page_url:               String,
  /// 0–100.
  pub authority:              u32,
  /// 0–100, higher is better.
  pub quality_score:          f64,
  /// 0–100, higher is riskier.
  pub risk_score:             f64,
  pub tier:                   Tier,
  pub credits_per_link:       i64,
  pub max_outbound_links:     u32,
  pub current_outbound_links: u32,
  pub active:                 bool,
  pub created_at:             DateTime<Utc>,
}

impl InventoryItem {
  pub fn remaining_capacity(&self) -> u32 {
    self.max_outbound_links.saturating_sub(self.current_outbound_links)
  }

  pub fn has_capacity(&self) -> bool { self.active && self.remaining_capacity() > 0 }
}

// ─── Exchange links ──────────────────────────────────────────────────────────

/// Settlement state of the provider's credits for one exchange link.
///
/// `Pending` moves to exactly one of the two terminal states, exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditsStatus {
  Pending,
  Awarded,
  #[serde(rename = "clawedback")]
  ClawedBack,
}

/// The outcome of a liveness check, as applied to a pending link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementDecision {
  Award,
  Clawback,
}

impl CreditsStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Awarded => "awarded",
      Self::ClawedBack => "clawedback",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "pending" => Ok(Self::Pending),
      "awarded" => Ok(Self::Awarded),
      "clawedback" => Ok(Self::ClawedBack),
      other => Err(Error::unknown("credits status", other)),
    }
  }

  pub fn is_terminal(self) -> bool { !matches!(self, Self::Pending) }

  /// The state reached by applying `decision`, or `None` if `self` is already
  /// terminal.
  pub fn settle(self, decision: SettlementDecision) -> Option<Self> {
    match (self, decision) {
      (Self::Pending, SettlementDecision::Award) => Some(Self::Awarded),
      (Self::Pending, SettlementDecision::Clawback) => Some(Self::ClawedBack),
      (Self::Awarded | Self::ClawedBack, _) => None,
    }
  }
}

/// One realised peer link: `provider`'s page links to `requester`'s target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeLink {
  pub link_id:         Uuid,
  pub requester_id:    Uuid,
  pub provider_id:     Uuid,
  pub inventory_id:    Uuid,
  pub page_url:        String,
  pub target_url:      String,
  /// Hop distance between the pair at creation time; 0 when unknown.
  pub hop_distance:    u32,
  pub anchor_text:     String,
  pub anchor_type:     AnchorType,
  pub credits_awarded: i64,
  pub credits_status:  CreditsStatus,
  pub is_live:         bool,
  pub is_indexed:      bool,
  pub created_at:      DateTime<Utc>,
  pub settled_at:      Option<DateTime<Utc>>,
}

// ─── Blacklist ───────────────────────────────────────────────────────────────

/// An expiring block between two participants. The pair is stored in
/// canonical (sorted) order so `(a, b)` and `(b, a)` are the same row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistEntry {
  pub participant_a: Uuid,
  pub participant_b: Uuid,
  pub reason:        String,
  pub created_at:    DateTime<Utc>,
  pub expires_at:    DateTime<Utc>,
}

impl BlacklistEntry {
  pub fn new(
    a: Uuid,
    b: Uuid,
    reason: impl Into<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
  ) -> Self {
    let (participant_a, participant_b) = canonical_pair(a, b);
    Self {
      participant_a,
      participant_b,
      reason: reason.into(),
      created_at,
      expires_at,
    }
  }

  pub fn is_active(&self, now: DateTime<Utc>) -> bool { self.expires_at > now }
}

/// Order a participant pair so the smaller id comes first.
pub fn canonical_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
  if a <= b { (a, b) } else { (b, a) }
}

#[cfg(test)]
mod tests {
  use chrono::Duration;

  use super::*;

  #[test]
  fn settlement_is_single_shot() {
    let awarded = CreditsStatus::Pending.settle(SettlementDecision::Award);
    assert_eq!(awarded, Some(CreditsStatus::Awarded));
    assert_eq!(
      CreditsStatus::Pending.settle(SettlementDecision::Clawback),
      Some(CreditsStatus::ClawedBack)
    );
    assert_eq!(CreditsStatus::Awarded.settle(SettlementDecision::Clawback), None);
    assert_eq!(CreditsStatus::ClawedBack.settle(SettlementDecision::Award), None);
  }

  #[test]
  fn clawedback_serializes_as_one_word() {
    assert_eq!(
      serde_json::to_string(&CreditsStatus::ClawedBack).unwrap(),
      "\"clawedback\""
    );
  }

  #[test]
  fn blacklist_pair_is_order_independent() {
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let now = Utc::now();
    let e1 = BlacklistEntry::new(a, b, "manual", now, now + Duration::days(1));
    let e2 = BlacklistEntry::new(b, a, "manual", now, now + Duration::days(1));
    assert_eq!(
      (e1.participant_a, e1.participant_b),
      (e2.participant_a, e2.participant_b)
    );
    assert!(e1.is_active(now));
    assert!(!e1.is_active(now + Duration::days(2)));
  }

  #[test]
  fn capacity_accounts_for_inactive_items() {
    let mut item = InventoryItem {
      inventory_id:           Uuid::new_v4(),
      owner_id:               Uuid::new_v4(),
      domain:                 "example.com".into(),
      page_url:               "https://example.com/resources".into(),
      authority:              40,
      quality_score:          70.0,
      risk_score:             10.0,
      tier:                   Tier::Two,
      credits_per_link:       5,
      max_outbound_links:     2,
      current_outbound_links: 1,
      active:                 true,
      created_at:             Utc::now(),
    };
    assert_eq!(item.remaining_capacity(), 1);
    assert!(item.has_capacity());
    item.active = false;
    assert!(!item.has_capacity());
  }
}
