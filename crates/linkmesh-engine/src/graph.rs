//! The link graph: who links to whom through exchange links.
//!
//! An edge runs from the provider (whose page carries the link) to the
//! requester (whose URL it points at). Clawed-back links are not edges.
//! Everything here is read-only; only blacklists and the per-pair cap ever
//! refuse a placement.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use linkmesh_core::{
  domain::registrable_domain,
  exchange::CreditsStatus,
  link::Module,
  store::{ExchangeLinkQuery, LinkStore},
};

use crate::{Backends, Engine, Result, error::store_err};

// ─── Reports ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteCheck {
  pub safe:   bool,
  pub reason: Option<String>,
}

impl RouteCheck {
  fn safe() -> Self { Self { safe: true, reason: None } }

  fn blocked(reason: String) -> Self { Self { safe: false, reason: Some(reason) } }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationCheck {
  pub allowed:  bool,
  pub domain:   String,
  /// The other module already using `domain`, when refused.
  pub conflict: Option<Module>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
  Low,
  Medium,
  High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternReport {
  pub user_id:             Uuid,
  pub links_examined:      usize,
  /// Counterparties linked in both directions within the window.
  pub reciprocal_count:    u32,
  pub reciprocal_partners: Vec<Uuid>,
  /// Mean creation-time hop distance over links where it was known.
  pub avg_path_distance:   f64,
  pub risk:                RiskLevel,
}

/// Reciprocity dominates; a short average path only raises low to medium.
pub fn classify(reciprocal_count: u32, avg_path_distance: f64) -> RiskLevel {
  if reciprocal_count >= 3 {
    RiskLevel::High
  } else if reciprocal_count >= 1
    || (avg_path_distance > 0.0 && avg_path_distance < 2.5)
  {
    RiskLevel::Medium
  } else {
    RiskLevel::Low
  }
}

// ─── Queries ─────────────────────────────────────────────────────────────────

impl<B: Backends> Engine<B> {
  /// Directed BFS distance from `from` to `to`, bounded by the configured
  /// search depth. Returns 0 when no path is known, and for `from == to`.
  pub async fn shortest_path(&self, from: Uuid, to: Uuid) -> Result<u32> {
    if from == to {
      return Ok(0);
    }

    let mut visited = HashSet::from([from]);
    let mut frontier = vec![from];
    for depth in 1..=self.config.exchange.max_search_depth {
      let mut next = Vec::new();
      for node in frontier {
        let peers = self
          .store
          .linked_participants(node)
          .await
          .map_err(store_err)?;
        for peer in peers {
          if peer == to {
            return Ok(depth);
          }
          if visited.insert(peer) {
            next.push(peer);
          }
        }
      }
      if next.is_empty() {
        break;
      }
      frontier = next;
    }
    Ok(0)
  }

  /// The shorter of the two directed distances; 0 when neither is known.
  pub async fn hop_distance(&self, a: Uuid, b: Uuid) -> Result<u32> {
    let forward = self.shortest_path(a, b).await?;
    let backward = self.shortest_path(b, a).await?;
    Ok(match (forward, backward) {
      (0, d) | (d, 0) => d,
      (f, r) => f.min(r),
    })
  }

  /// Hard refusals only: an unexpired blacklist entry, or the pair already
  /// at the connection cap.
  pub async fn is_route_safe(
    &self,
    source: Uuid,
    target: Uuid,
    module: Module,
  ) -> Result<RouteCheck> {
    let now = self.now();
    if let Some(entry) = self
      .store
      .active_blacklist(source, target, now)
      .await
      .map_err(store_err)?
    {
      debug!(%source, %target, module = module.as_str(), "route blacklisted");
      return Ok(RouteCheck::blocked(format!(
        "pair is blacklisted until {} ({})",
        entry.expires_at.format("%Y-%m-%d"),
        entry.reason
      )));
    }

    let max = self.config.exchange.max_connections_per_pair;
    let connections = self
      .store
      .count_connections(source, target)
      .await
      .map_err(store_err)?;
    if connections >= max {
      debug!(%source, %target, connections, "route at connection cap");
      return Ok(RouteCheck::blocked(format!(
        "pair already has {connections} of {max} allowed connections"
      )));
    }

    Ok(RouteCheck::safe())
  }

  /// Refuse `url` for `module` when its registrable domain already carries
  /// placements from a different module for `user_id`. `blog.provider.com`
  /// and `provider.com` count as the same platform.
  pub async fn enforce_module_isolation(
    &self,
    user_id: Uuid,
    url: &str,
    module: Module,
  ) -> Result<IsolationCheck> {
    let domain = registrable_domain(url)?;
    let used_by = self
      .store
      .domain_modules(user_id, domain.clone())
      .await
      .map_err(store_err)?;
    let conflict = used_by.into_iter().find(|m| *m != module);
    Ok(IsolationCheck { allowed: conflict.is_none(), domain, conflict })
  }

  /// Scan the user's exchange links inside the pattern window for
  /// reciprocal pairs and short paths.
  pub async fn detect_patterns(&self, user_id: Uuid) -> Result<PatternReport> {
    let since = self.now() - Duration::days(self.config.patterns.window_days);
    self.patterns_since(user_id, since).await
  }

  pub(crate) async fn patterns_since(
    &self,
    user_id: Uuid,
    since: DateTime<Utc>,
  ) -> Result<PatternReport> {
    let links = self
      .store
      .list_exchange_links(ExchangeLinkQuery {
        participant: Some(user_id),
        created_after: Some(since),
        ..Default::default()
      })
      .await
      .map_err(store_err)?;

    let mut outgoing = BTreeSet::new();
    let mut incoming = BTreeSet::new();
    let mut hops = Vec::new();
    for link in links.iter().filter(|l| l.credits_status != CreditsStatus::ClawedBack) {
      if link.provider_id == user_id {
        outgoing.insert(link.requester_id);
      } else {
        incoming.insert(link.provider_id);
      }
      if link.hop_distance > 0 {
        hops.push(f64::from(link.hop_distance));
      }
    }

    let reciprocal_partners: Vec<Uuid> = outgoing.intersection(&incoming).copied().collect();
    let reciprocal_count = reciprocal_partners.len() as u32;
    let avg_path_distance = if hops.is_empty() {
      0.0
    } else {
      hops.iter().sum::<f64>() / hops.len() as f64
    };
    let risk = classify(reciprocal_count, avg_path_distance);
    if risk != RiskLevel::Low {
      warn!(%user_id, reciprocal_count, avg_path_distance, ?risk, "link pattern risk");
    }

    Ok(PatternReport {
      user_id,
      links_examined: links.len(),
      reciprocal_count,
      reciprocal_partners,
      avg_path_distance,
      risk,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reciprocity_drives_risk() {
    assert_eq!(classify(0, 0.0), RiskLevel::Low);
    assert_eq!(classify(0, 4.0), RiskLevel::Low);
    assert_eq!(classify(1, 4.0), RiskLevel::Medium);
    assert_eq!(classify(3, 5.0), RiskLevel::High);
  }

  #[test]
  fn short_paths_raise_to_medium_only() {
    assert_eq!(classify(0, 2.0), RiskLevel::Medium);
    assert_eq!(classify(0, 1.0), RiskLevel::Medium);
  }
}
