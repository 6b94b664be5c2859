//! [`HeuristicRiskScorer`]: a self-contained [`RiskScorer`] built from
//! structural signals of the domain and URL. Used when no external scoring
//! service is configured.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
  collab::{
    CollaboratorError, CreditQuote, CreditRequest, DomainScore, Eligibility,
    PageScore, RiskScorer,
  },
  domain::{base_domain, top_level},
  link::Module,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
  /// Top-level domains that are never eligible.
  pub blocked_tlds:      Vec<String>,
  /// Top-level domains that raise the risk score.
  pub risky_tlds:        Vec<String>,
  /// Substrings that make a domain ineligible.
  pub spam_terms:        Vec<String>,
  /// Domains scoring above this are ineligible.
  pub max_risk:          f64,
  /// Credit multiplier applied to reciprocal links.
  pub reciprocal_factor: f64,
  /// Hop distance from which the distance bonus starts counting.
  pub bonus_hop_floor:   u32,
}

impl Default for RiskConfig {
  fn default() -> Self {
    let owned = |xs: &[&str]| -> Vec<String> { xs.iter().map(|s| (*s).to_owned()).collect() };
    Self {
      blocked_tlds:      owned(&["zip", "mov", "gq", "tk", "ml", "cf"]),
      risky_tlds:        owned(&["xyz", "top", "info", "click", "loan", "win"]),
      spam_terms:        owned(&["casino", "viagra", "porn", "payday", "escort", "replica"]),
      max_risk:          70.0,
      reciprocal_factor: 0.5,
      bonus_hop_floor:   3,
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct HeuristicRiskScorer {
  config: RiskConfig,
}

impl HeuristicRiskScorer {
  pub fn new(config: RiskConfig) -> Self { Self { config } }

  /// Structural risk of a domain, 0–100.
  pub fn domain_risk(&self, domain: &str) -> f64 {
    let mut risk: f64 = 10.0;
    let tld = top_level(domain);
    if self.config.risky_tlds.iter().any(|t| t == tld) {
      risk += 20.0;
    }
    let digits = domain.chars().filter(char::is_ascii_digit).count();
    if digits > 2 {
      risk += 15.0;
    }
    if domain.matches('-').count() >= 2 {
      risk += 15.0;
    }
    if domain.len() > 25 {
      risk += 10.0;
    }
    if domain.split('.').count() > 3 {
      risk += 10.0;
    }
    risk.clamp(0.0, 100.0)
  }

  pub fn eligibility(&self, domain: &str) -> Eligibility {
    let domain = match base_domain(domain) {
      Ok(d) => d,
      Err(e) => return Eligibility::ineligible(e.to_string()),
    };
    let tld = top_level(&domain);
    if self.config.blocked_tlds.iter().any(|t| t == tld) {
      return Eligibility::ineligible(format!("top-level domain .{tld} is blocked"));
    }
    if let Some(term) = self.config.spam_terms.iter().find(|t| domain.contains(t.as_str())) {
      return Eligibility::ineligible(format!("domain contains blocked term {term:?}"));
    }
    let risk = self.domain_risk(&domain);
    if risk > self.config.max_risk {
      return Eligibility::ineligible(format!(
        "risk score {risk:.0} exceeds {:.0}",
        self.config.max_risk
      ));
    }
    Eligibility::eligible()
  }

  pub fn page(&self, url: &str) -> PageScore {
    let risk_score = base_domain(url)
      .map(|d| self.domain_risk(&d))
      .unwrap_or(100.0);

    let mut page_score: f64 = 100.0;
    if let Ok(parsed) = Url::parse(url) {
      let depth = parsed
        .path_segments()
        .map(|segs| segs.filter(|s| !s.is_empty()).count())
        .unwrap_or(0);
      page_score -= 10.0 * depth as f64;
      if parsed.query().is_some() {
        page_score -= 15.0;
      }
    } else {
      page_score = 20.0;
    }

    PageScore {
      page_score:   page_score.clamp(20.0, 100.0),
      domain_score: DomainScore { risk_score },
    }
  }

  /// Price one link. Authority sets the base (1 credit per 10 points, at
  /// least 1); risk scales it down; reciprocity halves it; each hop past the
  /// floor adds 10%, up to +50%.
  pub fn quote(&self, request: &CreditRequest) -> CreditQuote {
    let base = i64::from(request.authority.div_ceil(10)).max(1);
    let risk = self.domain_risk(&request.domain);

    let mut value = base as f64 * (1.0 - risk / 200.0);
    if request.is_reciprocal {
      value *= self.config.reciprocal_factor;
    }
    if request.hop_distance > self.config.bonus_hop_floor {
      let extra = f64::from(request.hop_distance - self.config.bonus_hop_floor);
      value *= 1.0 + (0.1 * extra).min(0.5);
    }

    CreditQuote {
      base_credits:  base,
      final_credits: (value.round() as i64).max(1),
    }
  }
}

impl RiskScorer for HeuristicRiskScorer {
  async fn check_eligibility(
    &self,
    domain: String,
    _module: Module,
  ) -> Result<Eligibility, CollaboratorError> {
    Ok(self.eligibility(&domain))
  }

  async fn score_page(&self, url: String) -> Result<PageScore, CollaboratorError> {
    Ok(self.page(&url))
  }

  async fn calculate_credit_value(
    &self,
    request: CreditRequest,
  ) -> Result<CreditQuote, CollaboratorError> {
    Ok(self.quote(&request))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn scorer() -> HeuristicRiskScorer { HeuristicRiskScorer::default() }

  fn credit(domain: &str, authority: u32, is_reciprocal: bool, hop_distance: u32) -> i64 {
    scorer()
      .quote(&CreditRequest {
        domain: domain.into(),
        authority,
        is_reciprocal,
        hop_distance,
      })
      .final_credits
  }

  #[test]
  fn clean_domains_are_eligible() {
    assert!(scorer().eligibility("https://www.gardening-weekly.com/").is_eligible);
  }

  #[test]
  fn blocked_tld_and_spam_terms_are_ineligible() {
    let e = scorer().eligibility("cheap-stuff.tk");
    assert!(!e.is_eligible);
    assert!(e.reason.unwrap().contains(".tk"));
    assert!(!scorer().eligibility("best-casino-online.com").is_eligible);
  }

  #[test]
  fn structurally_noisy_domains_cross_the_risk_line() {
    let s = scorer();
    let noisy = "buy-123-cheap-4567-links.a.b.xyz";
    assert!(s.domain_risk(noisy) > 70.0);
    assert!(!s.eligibility(noisy).is_eligible);
  }

  #[test]
  fn credit_value_rises_with_authority_and_falls_with_risk() {
    assert!(credit("example.com", 80, false, 0) > credit("example.com", 20, false, 0));
    assert!(credit("example.com", 80, false, 0) > credit("a-b-c123456.xyz", 80, false, 0));
  }

  #[test]
  fn reciprocity_discounts_and_distance_rewards() {
    let plain = credit("example.com", 60, false, 3);
    assert!(credit("example.com", 60, true, 3) < plain);
    assert!(credit("example.com", 60, false, 6) > plain);
    assert!(credit("example.com", 0, true, 0) >= 1);
  }

  #[test]
  fn deeper_pages_score_lower() {
    let s = scorer();
    let shallow = s.page("https://example.com/links").page_score;
    let deep = s.page("https://example.com/a/b/c/d?ref=1").page_score;
    assert!(shallow > deep);
  }
}
