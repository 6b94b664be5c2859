//! Anchor text selection.
//!
//! Each placement draws its anchor type from a fixed distribution conditioned
//! on tier, then derives the text deterministically from the type. Selection
//! is stateless per call; profile drift is reported elsewhere and never
//! corrected here.

use std::sync::{Mutex, PoisonError};

use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result, domain::naked_domain, link::Module, tier::Tier,
  weighted::WeightedTable,
};

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AnchorType {
  Branded,
  NakedDomain,
  ExactMatch,
  PartialMatch,
  Generic,
}

impl AnchorType {
  pub const ALL: [AnchorType; 5] = [
    AnchorType::Branded,
    AnchorType::NakedDomain,
    AnchorType::ExactMatch,
    AnchorType::PartialMatch,
    AnchorType::Generic,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Branded => "branded",
      Self::NakedDomain => "naked_domain",
      Self::ExactMatch => "exact_match",
      Self::PartialMatch => "partial_match",
      Self::Generic => "generic",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "branded" => Ok(Self::Branded),
      "naked_domain" => Ok(Self::NakedDomain),
      "exact_match" => Ok(Self::ExactMatch),
      "partial_match" => Ok(Self::PartialMatch),
      "generic" => Ok(Self::Generic),
      other => Err(Error::unknown("anchor type", other)),
    }
  }

  /// Keyword-bearing anchors; these are what over-optimisation looks like.
  pub fn is_keyword(self) -> bool {
    matches!(self, Self::ExactMatch | Self::PartialMatch)
  }
}

/// A chosen anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
  pub text:        String,
  pub anchor_type: AnchorType,
}

/// Inputs to [`AnchorSelector::select`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorRequest {
  pub target_url: String,
  pub keyword:    String,
  pub site_name:  String,
  pub tier:       Tier,
  pub module:     Module,
}

// ─── Distributions ───────────────────────────────────────────────────────────

/// Phrases used for generic anchors.
pub const GENERIC_PHRASES: [&str; 6] = [
  "click here",
  "read more",
  "learn more",
  "this article",
  "visit the site",
  "see the full post",
];

/// The target anchor-type distribution for `tier`.
pub fn distribution(tier: Tier) -> WeightedTable<AnchorType> {
  use AnchorType::*;
  match tier {
    Tier::One => WeightedTable::new([
      (Branded, 0.35),
      (NakedDomain, 0.25),
      (PartialMatch, 0.20),
      (ExactMatch, 0.05),
      (Generic, 0.15),
    ]),
    Tier::Two => WeightedTable::new([
      (Branded, 0.40),
      (NakedDomain, 0.35),
      (PartialMatch, 0.15),
      (Generic, 0.10),
    ]),
    Tier::Three => WeightedTable::new([
      (NakedDomain, 0.50),
      (Branded, 0.35),
      (Generic, 0.15),
    ]),
  }
}

/// Derive the anchor text for `anchor_type`. Only generic anchors consume
/// randomness.
pub fn anchor_text<R: Rng + ?Sized>(
  anchor_type: AnchorType,
  request: &AnchorRequest,
  rng: &mut R,
) -> String {
  let domain = naked_domain(&request.target_url);
  let keyword = request.keyword.trim();
  let brand = request.site_name.trim();

  match anchor_type {
    AnchorType::Branded if !brand.is_empty() => brand.to_owned(),
    AnchorType::Branded | AnchorType::NakedDomain => domain,
    AnchorType::ExactMatch if !keyword.is_empty() => keyword.to_owned(),
    AnchorType::PartialMatch if !keyword.is_empty() => format!("{keyword} guide"),
    AnchorType::ExactMatch | AnchorType::PartialMatch => {
      if brand.is_empty() { domain } else { brand.to_owned() }
    }
    AnchorType::Generic => GENERIC_PHRASES
      .choose(rng)
      .copied()
      .unwrap_or(GENERIC_PHRASES[0])
      .to_owned(),
  }
}

// ─── Selector ────────────────────────────────────────────────────────────────

/// Draws anchors from the tier distributions. Shared across tasks; the RNG is
/// behind a mutex that is never held across an await point.
pub struct AnchorSelector {
  rng: Mutex<StdRng>,
}

impl AnchorSelector {
  pub fn from_entropy() -> Self {
    Self { rng: Mutex::new(StdRng::from_entropy()) }
  }

  /// A deterministic selector for tests and replays.
  pub fn seeded(seed: u64) -> Self {
    Self { rng: Mutex::new(StdRng::seed_from_u64(seed)) }
  }

  pub fn select(&self, request: &AnchorRequest) -> Anchor {
    let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
    let anchor_type = distribution(request.tier)
      .sample(&mut *rng)
      .unwrap_or(AnchorType::Branded);
    let text = anchor_text(anchor_type, request, &mut *rng);
    Anchor { text, anchor_type }
  }
}

impl Default for AnchorSelector {
  fn default() -> Self { Self::from_entropy() }
}
