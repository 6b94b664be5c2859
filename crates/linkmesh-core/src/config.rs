//! Engine configuration. Every field has a default so partial TOML works.

use serde::{Deserialize, Serialize};

use crate::content::DerivativeKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  pub distribution: DistributionConfig,
  pub exchange:     ExchangeConfig,
  pub settlement:   SettlementConfig,
  pub decay:        DecayConfig,
  pub anchors:      AnchorConfig,
  pub patterns:     PatternConfig,
}

// ─── Distribution ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
  pub tier2_kinds:       Vec<DerivativeKind>,
  pub tier3_kinds:       Vec<DerivativeKind>,
  pub content:           ContentCallConfig,
  pub max_title_chars:   usize,
  pub max_excerpt_chars: usize,
  pub max_body_chars:    usize,
}

impl Default for DistributionConfig {
  fn default() -> Self {
    Self {
      tier2_kinds:       vec![DerivativeKind::Syndication, DerivativeKind::Opinion],
      tier3_kinds:       vec![
        DerivativeKind::Summary,
        DerivativeKind::Snippet,
        DerivativeKind::Abstract,
      ],
      content:           ContentCallConfig::default(),
      max_title_chars:   200,
      max_excerpt_chars: 500,
      max_body_chars:    20_000,
    }
  }
}

/// Timeout and retry policy for content-adaptation calls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentCallConfig {
  pub timeout_secs:     u64,
  pub attempts:         u32,
  /// Delay before the second attempt; doubles after each failure.
  pub retry_backoff_ms: u64,
}

impl Default for ContentCallConfig {
  fn default() -> Self {
    Self { timeout_secs: 30, attempts: 3, retry_backoff_ms: 500 }
  }
}

// ─── Exchange ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
  /// Known hop distances below this are refused; 0 (unknown) is allowed.
  pub min_hop_distance:         u32,
  pub max_connections_per_pair: u32,
  pub blacklist_days:           i64,
  pub authority_weight:         f64,
  pub quality_weight:           f64,
  /// Ranking bonus per hop of distance.
  pub hop_bonus:                f64,
  pub match_limit:              usize,
  /// BFS depth bound for hop-distance queries.
  pub max_search_depth:         u32,
  /// Credited once when a participant's ledger is first created.
  pub starting_bonus:           i64,
  pub content:                  ContentCallConfig,
}

impl Default for ExchangeConfig {
  fn default() -> Self {
    Self {
      min_hop_distance:         3,
      max_connections_per_pair: 2,
      blacklist_days:           90,
      authority_weight:         0.4,
      quality_weight:           0.3,
      hop_bonus:                5.0,
      match_limit:              20,
      max_search_depth:         6,
      starting_bonus:           0,
      content:                  ContentCallConfig::default(),
    }
  }
}

// ─── Batch jobs ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
  pub grace_days:         i64,
  pub batch_size:         usize,
  pub check_timeout_secs: u64,
}

impl Default for SettlementConfig {
  fn default() -> Self {
    Self { grace_days: 7, batch_size: 100, check_timeout_secs: 20 }
  }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
  pub idle_months:  u32,
  pub rate_percent: u32,
  pub cap_percent:  u32,
}

impl Default for DecayConfig {
  fn default() -> Self {
    Self { idle_months: 1, rate_percent: 5, cap_percent: 20 }
  }
}

// ─── Reporting ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
  pub history_days:            i64,
  /// A single anchor type above this share is over-concentrated.
  pub concentration_threshold: f64,
  /// Exact-match anchors above this share are over-optimised.
  pub exact_match_ceiling:     f64,
}

impl Default for AnchorConfig {
  fn default() -> Self {
    Self {
      history_days:            90,
      concentration_threshold: 0.6,
      exact_match_ceiling:     0.10,
    }
  }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
  pub window_days: i64,
}

impl Default for PatternConfig {
  fn default() -> Self { Self { window_days: 90 } }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_config_uses_defaults() {
    let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(cfg.exchange.min_hop_distance, 3);
    assert_eq!(cfg.exchange.max_connections_per_pair, 2);
    assert_eq!(cfg.settlement.grace_days, 7);
    assert_eq!(cfg.distribution.tier2_kinds.len(), 2);
    assert_eq!(cfg.distribution.tier3_kinds.len(), 3);
  }

  #[test]
  fn nested_override_keeps_siblings() {
    let cfg: EngineConfig =
      serde_json::from_str(r#"{"exchange":{"min_hop_distance":4}}"#).unwrap();
    assert_eq!(cfg.exchange.min_hop_distance, 4);
    assert_eq!(cfg.exchange.blacklist_days, 90);
  }
}
