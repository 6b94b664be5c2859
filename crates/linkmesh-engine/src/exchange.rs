//! The exchange engine: inventory, matching, execution, and the ledger and
//! blacklist operations participants call directly.
//!
//! Execution re-runs every check matching ran, then hands the whole write
//! set to [`LinkStore::commit_exchange`] so the link, both ledger rows and
//! their transactions land together.

use std::collections::HashSet;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use linkmesh_core::{
  anchor::AnchorRequest,
  collab::{AdaptedContent, ContentPurpose, ContentRequest, CreditRequest, RiskScorer},
  domain::{base_domain, registrable_domain},
  exchange::{BlacklistEntry, CreditsStatus, ExchangeLink, InventoryItem},
  ledger::{Ledger, LedgerEntry, Transaction},
  link::{Backlink, DomainUsage, Module},
  store::{
    CommitOutcome, ExchangeCommit, ExchangeLinkQuery, InventoryQuery, LedgerOutcome,
    LinkStore, PairLimit, TransactionQuery,
  },
  tier::Tier,
};

use crate::{
  Backends, Engine, Error, Result, error::store_err, retry::generate_with_retry,
};

// ─── Requests and results ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInventory {
  pub owner_id:           Uuid,
  pub page_url:           String,
  /// 0–100.
  pub authority:          u32,
  pub tier:               Tier,
  pub max_outbound_links: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchRequest {
  pub requester_id:  Uuid,
  /// The requester's own domain; inventory on it is never offered back.
  #[serde(default)]
  pub target_domain: Option<String>,
  #[serde(default)]
  pub min_authority: Option<u32>,
  #[serde(default)]
  pub tier:          Option<Tier>,
  #[serde(default)]
  pub limit:         Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCandidate {
  pub inventory:     InventoryItem,
  pub hop_distance:  u32,
  pub is_reciprocal: bool,
  pub credits:       i64,
  pub score:         f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRequest {
  pub requester_id: Uuid,
  pub inventory_id: Uuid,
  pub target_url:   String,
  pub keyword:      String,
  pub site_name:    String,
  /// Text the contextual paragraph is written around; the keyword is used
  /// when empty.
  #[serde(default)]
  pub context:      String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeReceipt {
  pub link:              ExchangeLink,
  pub credits_spent:     i64,
  pub requester_balance: i64,
  pub provider_pending:  i64,
  pub pair_blacklisted:  bool,
  pub content:           AdaptedContent,
}

/// Ranking score: authority and quality weighted, plus a bonus per hop.
pub fn match_score(
  authority: u32,
  quality: f64,
  hop_distance: u32,
  authority_weight: f64,
  quality_weight: f64,
  hop_bonus: f64,
) -> f64 {
  authority_weight * f64::from(authority)
    + quality_weight * quality
    + hop_bonus * f64::from(hop_distance)
}

// ─── Inventory ───────────────────────────────────────────────────────────────

impl<B: Backends> Engine<B> {
  /// Screen, score and price a page, then list it. Ineligible domains never
  /// enter inventory.
  pub async fn add_inventory(&self, new: NewInventory) -> Result<InventoryItem> {
    if new.authority > 100 {
      return Err(Error::InvalidInput(format!("authority {} is above 100", new.authority)));
    }
    if new.max_outbound_links == 0 {
      return Err(Error::InvalidInput("max_outbound_links must be positive".into()));
    }
    let domain = base_domain(&new.page_url)?;

    let eligibility = self
      .risk
      .check_eligibility(domain.clone(), Module::Exchange)
      .await?;
    if !eligibility.is_eligible {
      let reason = eligibility.reason.unwrap_or_else(|| format!("{domain} is not eligible"));
      warn!(owner_id = %new.owner_id, %domain, %reason, "inventory rejected");
      return Err(Error::Ineligible(reason));
    }

    let page = self.risk.score_page(new.page_url.clone()).await?;
    let quote = self
      .risk
      .calculate_credit_value(CreditRequest {
        domain:        domain.clone(),
        authority:     new.authority,
        is_reciprocal: false,
        hop_distance:  0,
      })
      .await?;

    let item = InventoryItem {
      inventory_id:           Uuid::new_v4(),
      owner_id:               new.owner_id,
      domain,
      page_url:               new.page_url,
      authority:              new.authority,
      quality_score:          page.page_score,
      risk_score:             page.domain_score.risk_score,
      tier:                   new.tier,
      credits_per_link:       quote.final_credits,
      max_outbound_links:     new.max_outbound_links,
      current_outbound_links: 0,
      active:                 true,
      created_at:             self.now(),
    };
    let item = self.store.insert_inventory(item).await.map_err(store_err)?;
    info!(
      inventory_id = %item.inventory_id,
      domain = %item.domain,
      credits = item.credits_per_link,
      "inventory listed"
    );
    Ok(item)
  }

  pub async fn get_inventory(&self, inventory_id: Uuid) -> Result<InventoryItem> {
    self
      .store
      .get_inventory(inventory_id)
      .await
      .map_err(store_err)?
      .ok_or(Error::InventoryNotFound(inventory_id))
  }

  pub async fn list_inventory(&self, query: InventoryQuery) -> Result<Vec<InventoryItem>> {
    self.store.list_inventory(query).await.map_err(store_err)
  }

  pub async fn deactivate_inventory(&self, inventory_id: Uuid) -> Result<InventoryItem> {
    self.get_inventory(inventory_id).await?;
    let item = self
      .store
      .set_inventory_active(inventory_id, false)
      .await
      .map_err(store_err)?;
    info!(%inventory_id, "inventory deactivated");
    Ok(item)
  }
}

// ─── Matching and execution ──────────────────────────────────────────────────

impl<B: Backends> Engine<B> {
  /// Ranked inventory the requester may buy a link from. Candidates failing
  /// any check are dropped, never reported as errors.
  pub async fn find_matches(&self, request: MatchRequest) -> Result<Vec<MatchCandidate>> {
    let cfg = &self.config.exchange;
    let requester = request.requester_id;
    let own_domain = request
      .target_domain
      .as_deref()
      .and_then(|d| base_domain(d).ok());

    let items = self
      .list_inventory(InventoryQuery {
        exclude_owner: Some(requester),
        min_authority: request.min_authority,
        tier: request.tier,
        with_capacity: true,
        ..Default::default()
      })
      .await?;
    let already_linked: HashSet<Uuid> = self
      .store
      .linked_participants(requester)
      .await
      .map_err(store_err)?
      .into_iter()
      .collect();

    let mut candidates = Vec::new();
    for item in items {
      let inventory_id = item.inventory_id;
      if own_domain.as_deref() == Some(item.domain.as_str()) {
        continue;
      }

      match self
        .risk
        .check_eligibility(item.domain.clone(), Module::Exchange)
        .await
      {
        Ok(e) if e.is_eligible => {}
        Ok(e) => {
          warn!(%inventory_id, reason = ?e.reason, "candidate ineligible");
          continue;
        }
        Err(e) => {
          warn!(%inventory_id, error = %e, "eligibility check failed; candidate skipped");
          continue;
        }
      }

      let route = self.is_route_safe(item.owner_id, requester, Module::Exchange).await?;
      if !route.safe {
        debug!(%inventory_id, reason = ?route.reason, "candidate route unsafe");
        continue;
      }

      let hop_distance = self.hop_distance(requester, item.owner_id).await?;
      if hop_distance != 0 && hop_distance < cfg.min_hop_distance {
        debug!(%inventory_id, hop_distance, "candidate too close");
        continue;
      }

      match self
        .enforce_module_isolation(requester, &item.page_url, Module::Exchange)
        .await
      {
        Ok(check) if check.allowed => {}
        Ok(_) | Err(Error::InvalidUrl(_)) => {
          debug!(%inventory_id, "candidate domain isolated to another module");
          continue;
        }
        Err(e) => return Err(e),
      }

      let is_reciprocal = already_linked.contains(&item.owner_id);
      let credits = match self
        .risk
        .calculate_credit_value(CreditRequest {
          domain: item.domain.clone(),
          authority: item.authority,
          is_reciprocal,
          hop_distance,
        })
        .await
      {
        Ok(quote) => quote.final_credits,
        Err(e) => {
          warn!(%inventory_id, error = %e, "pricing failed; candidate skipped");
          continue;
        }
      };

      let score = match_score(
        item.authority,
        item.quality_score,
        hop_distance,
        cfg.authority_weight,
        cfg.quality_weight,
        cfg.hop_bonus,
      );
      candidates.push(MatchCandidate {
        inventory: item,
        hop_distance,
        is_reciprocal,
        credits,
        score,
      });
    }

    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    candidates.truncate(request.limit.unwrap_or(cfg.match_limit));
    debug!(%requester, matches = candidates.len(), "matches found");
    Ok(candidates)
  }

  /// Buy one link. Every refusal happens before any write; the writes
  /// themselves are one atomic commit.
  pub async fn execute_exchange(&self, request: ExchangeRequest) -> Result<ExchangeReceipt> {
    let now = self.now();
    let cfg = &self.config.exchange;
    let requester = request.requester_id;
    base_domain(&request.target_url)?;

    let item = self.get_inventory(request.inventory_id).await?;
    let provider = item.owner_id;
    if provider == requester {
      return Err(Error::SafetyBlock("cannot buy a link from your own inventory".into()));
    }
    if !item.has_capacity() {
      return Err(Error::CapacityExhausted(format!(
        "inventory item {} has no remaining capacity",
        item.inventory_id
      )));
    }

    let eligibility = self
      .risk
      .check_eligibility(item.domain.clone(), Module::Exchange)
      .await?;
    if !eligibility.is_eligible {
      return Err(Error::Ineligible(
        eligibility
          .reason
          .unwrap_or_else(|| format!("{} is not eligible", item.domain)),
      ));
    }

    let route = self.is_route_safe(provider, requester, Module::Exchange).await?;
    if !route.safe {
      return Err(Error::SafetyBlock(route.reason.unwrap_or_else(|| "route unsafe".into())));
    }

    let hop_distance = self.hop_distance(requester, provider).await?;
    if hop_distance != 0 && hop_distance < cfg.min_hop_distance {
      return Err(Error::SafetyBlock(format!(
        "participants are {hop_distance} hops apart; the minimum is {}",
        cfg.min_hop_distance
      )));
    }

    let isolation = self
      .enforce_module_isolation(requester, &item.page_url, Module::Exchange)
      .await?;
    if let Some(module) = isolation.conflict {
      return Err(Error::SafetyBlock(format!(
        "{} already carries {} links for this participant",
        isolation.domain,
        module.as_str()
      )));
    }

    let is_reciprocal = self
      .store
      .linked_participants(requester)
      .await
      .map_err(store_err)?
      .contains(&provider);
    let credits = self
      .risk
      .calculate_credit_value(CreditRequest {
        domain: item.domain.clone(),
        authority: item.authority,
        is_reciprocal,
        hop_distance,
      })
      .await?
      .final_credits;

    let available = self.ledger(requester).await?.balance;
    if available < credits {
      return Err(Error::InsufficientBalance { required: credits, available });
    }

    let anchor = self.select_anchor(&AnchorRequest {
      target_url: request.target_url.clone(),
      keyword:    request.keyword.clone(),
      site_name:  request.site_name.clone(),
      tier:       item.tier,
      module:     Module::Exchange,
    });
    let body = if request.context.trim().is_empty() {
      request.keyword.clone()
    } else {
      request.context.clone()
    };
    let content = generate_with_retry(
      &*self.content,
      &ContentRequest {
        purpose:            ContentPurpose::Contextual { page_url: item.page_url.clone() },
        tier:               item.tier,
        title:              request.keyword.clone(),
        body,
        primary_keyword:    request.keyword.clone(),
        secondary_keywords: Vec::new(),
        site_name:          request.site_name.clone(),
        anchor:             anchor.clone(),
        target_url:         Some(request.target_url.clone()),
      },
      cfg.content,
    )
    .await?;

    let link_id = Uuid::new_v4();
    let link = ExchangeLink {
      link_id,
      requester_id: requester,
      provider_id: provider,
      inventory_id: item.inventory_id,
      page_url: item.page_url.clone(),
      target_url: request.target_url.clone(),
      hop_distance,
      anchor_text: anchor.text.clone(),
      anchor_type: anchor.anchor_type,
      credits_awarded: credits,
      credits_status: CreditsStatus::Pending,
      is_live: true,
      is_indexed: false,
      created_at: now,
      settled_at: None,
    };
    let backlink = Backlink {
      backlink_id:      Uuid::new_v4(),
      user_id:          requester,
      module:           Module::Exchange,
      tier:             item.tier,
      source_url:       item.page_url.clone(),
      source_domain:    item.domain.clone(),
      target_url:       request.target_url,
      anchor_text:      anchor.text,
      anchor_type:      anchor.anchor_type,
      is_live:          true,
      is_indexed:       false,
      created_at:       now,
      last_checked_at:  None,
      removed_at:       None,
      task_id:          None,
      exchange_link_id: Some(link_id),
    };
    let commit = ExchangeCommit {
      link,
      backlink,
      usage: DomainUsage {
        user_id:       requester,
        domain:        registrable_domain(&item.domain)?,
        module:        Module::Exchange,
        first_used_at: now,
      },
      requester_debit: LedgerEntry::spend(requester, credits, format!("link from {}", item.domain))
        .for_link(link_id)
        .for_inventory(item.inventory_id),
      provider_credit: LedgerEntry::pending(provider, credits, format!("link on {}", item.domain))
        .for_link(link_id)
        .for_inventory(item.inventory_id),
      pair_limit: PairLimit {
        max_connections: cfg.max_connections_per_pair,
        blacklist_until: now + Duration::days(cfg.blacklist_days),
        reason:          "connection limit reached".into(),
      },
    };

    match self.store.commit_exchange(commit).await.map_err(store_err)? {
      CommitOutcome::Committed { link, requester_balance, provider_pending, blacklisted } => {
        info!(
          %link_id,
          %requester,
          %provider,
          credits,
          hop_distance,
          blacklisted,
          "exchange executed"
        );
        Ok(ExchangeReceipt {
          link,
          credits_spent: credits,
          requester_balance,
          provider_pending,
          pair_blacklisted: blacklisted,
          content,
        })
      }
      CommitOutcome::InsufficientBalance { required, available } => {
        Err(Error::InsufficientBalance { required, available })
      }
      CommitOutcome::CapacityExhausted => Err(Error::CapacityExhausted(format!(
        "inventory item {} filled up",
        item.inventory_id
      ))),
    }
  }

  pub async fn get_exchange_link(&self, link_id: Uuid) -> Result<ExchangeLink> {
    self
      .store
      .get_exchange_link(link_id)
      .await
      .map_err(store_err)?
      .ok_or(Error::ExchangeLinkNotFound(link_id))
  }

  pub async fn exchange_links(&self, query: ExchangeLinkQuery) -> Result<Vec<ExchangeLink>> {
    self.store.list_exchange_links(query).await.map_err(store_err)
  }
}

// ─── Ledger and blacklist ────────────────────────────────────────────────────

impl<B: Backends> Engine<B> {
  /// The participant's ledger. A participant without one gets the starting
  /// bonus if configured, or an unsaved empty ledger. The bonus is keyed, so
  /// racing first reads grant it once.
  pub async fn ledger(&self, user_id: Uuid) -> Result<Ledger> {
    if let Some(ledger) = self.store.get_ledger(user_id).await.map_err(store_err)? {
      return Ok(ledger);
    }
    let now = self.now();
    let bonus = self.config.exchange.starting_bonus;
    if bonus <= 0 {
      return Ok(Ledger::empty(user_id, now));
    }

    let outcome = self
      .store
      .apply_ledger_entries(
        vec![LedgerEntry::bonus(user_id, bonus, "starting bonus").once("starting-bonus")],
        now,
      )
      .await
      .map_err(store_err)?;
    if matches!(outcome, LedgerOutcome::Applied { ref transactions, .. } if !transactions.is_empty()) {
      info!(%user_id, bonus, "starting bonus granted");
    }
    Ok(
      self
        .store
        .get_ledger(user_id)
        .await
        .map_err(store_err)?
        .unwrap_or_else(|| Ledger::empty(user_id, now)),
    )
  }

  pub async fn transactions(&self, query: TransactionQuery) -> Result<Vec<Transaction>> {
    self.store.list_transactions(query).await.map_err(store_err)
  }

  pub async fn grant_bonus(
    &self,
    user_id: Uuid,
    amount: i64,
    reason: String,
  ) -> Result<Transaction> {
    if amount <= 0 {
      return Err(Error::InvalidInput(format!("bonus must be positive, got {amount}")));
    }
    let outcome = self
      .store
      .apply_ledger_entries(vec![LedgerEntry::bonus(user_id, amount, reason)], self.now())
      .await
      .map_err(store_err)?;
    match outcome {
      LedgerOutcome::Applied { mut transactions, .. } if !transactions.is_empty() => {
        info!(%user_id, amount, "bonus granted");
        Ok(transactions.remove(0))
      }
      other => Err(Error::InvalidState(format!("bonus not applied: {other:?}"))),
    }
  }

  /// Block a pair for `days`. Re-blacklisting extends the expiry.
  pub async fn blacklist_pair(
    &self,
    a: Uuid,
    b: Uuid,
    days: i64,
    reason: String,
  ) -> Result<BlacklistEntry> {
    if a == b {
      return Err(Error::InvalidInput("cannot blacklist a participant against itself".into()));
    }
    if days <= 0 {
      return Err(Error::InvalidInput(format!("blacklist days must be positive, got {days}")));
    }
    let now = self.now();
    let entry = self
      .store
      .upsert_blacklist(BlacklistEntry::new(a, b, reason, now, now + Duration::days(days)))
      .await
      .map_err(store_err)?;
    info!(%a, %b, expires_at = %entry.expires_at, "pair blacklisted");
    Ok(entry)
  }

  pub async fn list_blacklist(
    &self,
    participant: Option<Uuid>,
    active_only: bool,
  ) -> Result<Vec<BlacklistEntry>> {
    let active_at = active_only.then(|| self.now());
    self
      .store
      .list_blacklist(participant, active_at)
      .await
      .map_err(store_err)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn distance_outranks_a_small_authority_edge() {
    let near = match_score(60, 70.0, 3, 0.4, 0.3, 5.0);
    let far = match_score(55, 70.0, 5, 0.4, 0.3, 5.0);
    assert!(far > near);
  }

  #[test]
  fn unknown_distance_adds_nothing() {
    assert!((match_score(50, 50.0, 0, 0.4, 0.3, 5.0) - 35.0).abs() < 1e-9);
  }
}
