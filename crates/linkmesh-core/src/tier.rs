//! Link tiers and the per-tier rate limits attached to each user.
//!
//! Tier 1 is the published article itself. Tier 2 derivatives link to tier 1,
//! tier 3 derivatives link to tier 2.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Error;

// ─── Tier ────────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum Tier {
  One,
  Two,
  Three,
}

impl Tier {
  pub const ALL: [Tier; 3] = [Tier::One, Tier::Two, Tier::Three];

  pub fn number(self) -> u8 {
    match self {
      Self::One => 1,
      Self::Two => 2,
      Self::Three => 3,
    }
  }

  /// Scheduling priority for distribution tasks; higher runs first when two
  /// tasks fall due at the same time.
  pub fn task_priority(self) -> i32 {
    match self {
      Self::One => 10,
      Self::Two => 5,
      Self::Three => 3,
    }
  }
}

impl TryFrom<u8> for Tier {
  type Error = Error;

  fn try_from(n: u8) -> Result<Self, Self::Error> {
    match n {
      1 => Ok(Self::One),
      2 => Ok(Self::Two),
      3 => Ok(Self::Three),
      other => Err(Error::InvalidTier(other)),
    }
  }
}

impl From<Tier> for u8 {
  fn from(t: Tier) -> u8 { t.number() }
}

impl fmt::Display for Tier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "tier{}", self.number())
  }
}

// ─── TierTable ───────────────────────────────────────────────────────────────

/// One value per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierTable<T> {
  pub tier1: T,
  pub tier2: T,
  pub tier3: T,
}

impl<T: Copy> TierTable<T> {
  pub const fn new(tier1: T, tier2: T, tier3: T) -> Self {
    Self { tier1, tier2, tier3 }
  }

  pub fn get(&self, tier: Tier) -> T {
    match tier {
      Tier::One => self.tier1,
      Tier::Two => self.tier2,
      Tier::Three => self.tier3,
    }
  }

  pub fn set(&mut self, tier: Tier, value: T) {
    match tier {
      Tier::One => self.tier1 = value,
      Tier::Two => self.tier2 = value,
      Tier::Three => self.tier3 = value,
    }
  }
}

// ─── LinkSettings ────────────────────────────────────────────────────────────

pub const DEFAULT_DAILY_CAPS: TierTable<u32> = TierTable::new(2, 5, 10);
pub const DEFAULT_VELOCITY_HOURS: TierTable<u32> = TierTable::new(48, 12, 4);

/// User-configurable placement limits, consulted by the velocity gate and by
/// the distribution scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
  /// Maximum backlinks created per UTC calendar day, per tier.
  pub daily_caps:     TierTable<u32>,
  /// Minimum hours between two placements at the same tier.
  pub velocity_hours: TierTable<u32>,
}

impl Default for LinkSettings {
  fn default() -> Self {
    Self {
      daily_caps:     DEFAULT_DAILY_CAPS,
      velocity_hours: DEFAULT_VELOCITY_HOURS,
    }
  }
}
