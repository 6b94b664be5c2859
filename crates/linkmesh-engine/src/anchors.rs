//! Anchor selection and the per-user anchor profile report.
//!
//! The profile only reports drift; selection never reads it.

use std::collections::BTreeMap;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use linkmesh_core::{
  anchor::{Anchor, AnchorRequest, AnchorType},
  config::AnchorConfig,
  link::Backlink,
  store::{BacklinkQuery, LinkStore},
};

use crate::{Backends, Engine, Result, error::store_err};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorProfile {
  pub user_id:           Uuid,
  pub total:             u32,
  pub counts:            BTreeMap<AnchorType, u32>,
  pub shares:            BTreeMap<AnchorType, f64>,
  pub dominant:          Option<AnchorType>,
  pub over_concentrated: bool,
  pub over_optimized:    bool,
  pub suggestions:       Vec<String>,
}

/// Build a profile from a set of backlinks.
pub fn profile_of<'a>(
  user_id: Uuid,
  backlinks: impl IntoIterator<Item = &'a Backlink>,
  config: &AnchorConfig,
) -> AnchorProfile {
  let mut counts: BTreeMap<AnchorType, u32> = BTreeMap::new();
  for b in backlinks {
    *counts.entry(b.anchor_type).or_default() += 1;
  }
  let total: u32 = counts.values().sum();

  let share = |n: u32| if total == 0 { 0.0 } else { f64::from(n) / f64::from(total) };
  let shares: BTreeMap<AnchorType, f64> =
    counts.iter().map(|(ty, n)| (*ty, share(*n))).collect();

  let dominant = counts
    .iter()
    .max_by_key(|(_, n)| **n)
    .map(|(ty, _)| *ty);
  let top_share = dominant.and_then(|d| shares.get(&d).copied()).unwrap_or(0.0);
  let exact_share = shares.get(&AnchorType::ExactMatch).copied().unwrap_or(0.0);
  let brand_share = [AnchorType::Branded, AnchorType::NakedDomain]
    .iter()
    .filter_map(|ty| shares.get(ty))
    .sum::<f64>();

  let over_concentrated = top_share > config.concentration_threshold;
  let over_optimized = exact_share > config.exact_match_ceiling;

  let mut suggestions = Vec::new();
  if total > 0 {
    if let (true, Some(ty)) = (over_concentrated, dominant) {
      suggestions.push(format!(
        "{:.0}% of anchors are {}; vary anchor types on upcoming placements",
        top_share * 100.0,
        ty.as_str()
      ));
    }
    if over_optimized {
      suggestions.push(format!(
        "exact-match anchors are at {:.0}%; keep them under {:.0}%",
        exact_share * 100.0,
        config.exact_match_ceiling * 100.0
      ));
    }
    if brand_share < 0.5 {
      suggestions.push("add more branded and naked-domain anchors".to_owned());
    }
  }

  AnchorProfile {
    user_id,
    total,
    counts,
    shares,
    dominant,
    over_concentrated,
    over_optimized,
    suggestions,
  }
}

impl<B: Backends> Engine<B> {
  pub fn select_anchor(&self, request: &AnchorRequest) -> Anchor {
    self.anchors.select(request)
  }

  /// Anchor-type distribution over the user's backlinks in the history
  /// window.
  pub async fn anchor_profile(&self, user_id: Uuid) -> Result<AnchorProfile> {
    let since = self.now() - Duration::days(self.config.anchors.history_days);
    let backlinks = self
      .store
      .list_backlinks(BacklinkQuery {
        user_id: Some(user_id),
        created_after: Some(since),
        ..Default::default()
      })
      .await
      .map_err(store_err)?;
    Ok(profile_of(user_id, &backlinks, &self.config.anchors))
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use linkmesh_core::{link::Module, tier::Tier};

  use super::*;

  fn backlink(anchor_type: AnchorType) -> Backlink {
    Backlink {
      backlink_id:      Uuid::new_v4(),
      user_id:          Uuid::nil(),
      module:           Module::Distribution,
      tier:             Tier::Two,
      source_url:       "https://medium.com/p/1".into(),
      source_domain:    "medium.com".into(),
      target_url:       "https://site.com/a".into(),
      anchor_text:      "x".into(),
      anchor_type,
      is_live:          true,
      is_indexed:       false,
      created_at:       Utc::now(),
      last_checked_at:  None,
      removed_at:       None,
      task_id:          None,
      exchange_link_id: None,
    }
  }

  fn profile(types: &[AnchorType]) -> AnchorProfile {
    let links: Vec<Backlink> = types.iter().copied().map(backlink).collect();
    profile_of(Uuid::nil(), &links, &AnchorConfig::default())
  }

  #[test]
  fn balanced_profile_raises_nothing() {
    use AnchorType::*;
    let p = profile(&[Branded, Branded, NakedDomain, NakedDomain, PartialMatch, Generic]);
    assert_eq!(p.total, 6);
    assert!(!p.over_concentrated);
    assert!(!p.over_optimized);
    assert!(p.suggestions.is_empty());
  }

  #[test]
  fn single_type_is_over_concentrated() {
    use AnchorType::*;
    let p = profile(&[Branded, Branded, Branded, Branded, Generic]);
    assert_eq!(p.dominant, Some(Branded));
    assert!(p.over_concentrated);
    assert!((p.shares[&Branded] - 0.8).abs() < 1e-9);
    assert_eq!(p.suggestions.len(), 1);
  }

  #[test]
  fn exact_match_above_ceiling_is_over_optimized() {
    use AnchorType::*;
    let p = profile(&[ExactMatch, ExactMatch, Branded, NakedDomain, Generic]);
    assert!(p.over_optimized);
    assert!(p.suggestions.iter().any(|s| s.contains("exact-match")));
  }

  #[test]
  fn empty_history_has_no_dominant_type() {
    let p = profile(&[]);
    assert_eq!(p.total, 0);
    assert_eq!(p.dominant, None);
    assert!(p.suggestions.is_empty());
  }
}
