//! Realised backlinks and the module that produced them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, anchor::AnchorType, tier::Tier};

// ─── Module ──────────────────────────────────────────────────────────────────

/// A link-building subsystem. The same physical domain must never serve two
/// modules for the same user.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Module {
  Distribution,
  Exchange,
}

impl Module {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Distribution => "distribution",
      Self::Exchange => "exchange",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "distribution" => Ok(Self::Distribution),
      "exchange" => Ok(Self::Exchange),
      other => Err(Error::unknown("module", other)),
    }
  }
}

// ─── Backlink ────────────────────────────────────────────────────────────────

/// A live (or formerly live) link placement. Rows are append-only; only the
/// health fields (`is_live`, `is_indexed`, `last_checked_at`, `removed_at`)
/// change, and only through the indexation monitor or settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backlink {
  pub backlink_id:      Uuid,
  pub user_id:          Uuid,
  pub module:           Module,
  pub tier:             Tier,
  /// The page carrying the link.
  pub source_url:       String,
  pub source_domain:    String,
  /// Where the link points. Empty when a tier-3 placement went out before its
  /// tier-2 parent had a known URL.
  pub target_url:       String,
  pub anchor_text:      String,
  pub anchor_type:      AnchorType,
  pub is_live:          bool,
  pub is_indexed:       bool,
  pub created_at:       DateTime<Utc>,
  pub last_checked_at:  Option<DateTime<Utc>>,
  pub removed_at:       Option<DateTime<Utc>>,
  pub task_id:          Option<Uuid>,
  pub exchange_link_id: Option<Uuid>,
}

/// Records that `domain` carries placements for `user_id` under `module`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainUsage {
  pub user_id:       Uuid,
  pub domain:        String,
  pub module:        Module,
  pub first_used_at: DateTime<Utc>,
}
