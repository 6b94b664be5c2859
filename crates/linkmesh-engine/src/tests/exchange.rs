use chrono::Duration;
use linkmesh_core::{
  config::EngineConfig,
  exchange::CreditsStatus,
  ledger::TransactionKind,
  link::{DomainUsage, Module},
  store::{ExchangeLinkQuery, LinkStore, TransactionQuery},
};
use uuid::Uuid;

use super::{FakeContent, Harness, harness, harness_with, t0};
use crate::{
  Error,
  exchange::{ExchangeRequest, MatchRequest},
};

fn buy(requester_id: Uuid, inventory_id: Uuid) -> ExchangeRequest {
  ExchangeRequest {
    requester_id,
    inventory_id,
    target_url: "https://requester.com/guide".into(),
    keyword: "trail running".into(),
    site_name: "Requester".into(),
    context: String::new(),
  }
}

fn matches_for(requester_id: Uuid) -> MatchRequest {
  MatchRequest { requester_id, ..Default::default() }
}

async fn transactions_of(h: &Harness, user_id: Uuid) -> Vec<TransactionKind> {
  h.engine
    .transactions(TransactionQuery { user_id: Some(user_id), ..Default::default() })
    .await
    .unwrap()
    .into_iter()
    .map(|t| t.kind)
    .collect()
}

async fn harness_without_hop_floor() -> Harness {
  let mut config = EngineConfig::default();
  config.exchange.min_hop_distance = 0;
  harness_with(config, FakeContent::default()).await
}

#[tokio::test]
async fn exchange_debits_requester_and_credits_provider_pending() {
  let h = harness().await;
  let requester = Uuid::new_v4();
  let provider = Uuid::new_v4();
  h.fund(requester, 12).await;
  let item = h.inventory(provider, "provider.com", 5).await;
  assert_eq!(item.credits_per_link, 10);

  let receipt = h
    .engine
    .execute_exchange(buy(requester, item.inventory_id))
    .await
    .unwrap();
  assert_eq!(receipt.credits_spent, 10);
  assert_eq!(receipt.requester_balance, 2);
  assert_eq!(receipt.provider_pending, 10);
  assert_eq!(receipt.link.credits_status, CreditsStatus::Pending);
  assert!(!receipt.pair_blacklisted);

  let requester_ledger = h.engine.ledger(requester).await.unwrap();
  assert_eq!(requester_ledger.balance, 2);
  assert_eq!(requester_ledger.lifetime_spent, 10);
  let provider_ledger = h.engine.ledger(provider).await.unwrap();
  assert_eq!((provider_ledger.balance, provider_ledger.pending_credits), (0, 10));

  let links = h
    .engine
    .exchange_links(ExchangeLinkQuery { participant: Some(requester), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(links.len(), 1);
  assert_eq!(links[0].provider_id, provider);

  let item = h.engine.get_inventory(item.inventory_id).await.unwrap();
  assert_eq!(item.current_outbound_links, 1);
  assert_eq!(
    transactions_of(&h, requester).await,
    [TransactionKind::Bonus, TransactionKind::Spent]
  );
  assert_eq!(transactions_of(&h, provider).await, [TransactionKind::Pending]);
}

#[tokio::test]
async fn insufficient_balance_writes_nothing() {
  let h = harness().await;
  let requester = Uuid::new_v4();
  let provider = Uuid::new_v4();
  h.fund(requester, 5).await;
  let item = h.inventory(provider, "provider.com", 5).await;

  let err = h
    .engine
    .execute_exchange(buy(requester, item.inventory_id))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::InsufficientBalance { required: 10, available: 5 }));

  assert_eq!(transactions_of(&h, requester).await, [TransactionKind::Bonus]);
  assert!(transactions_of(&h, provider).await.is_empty());
  assert_eq!(h.engine.ledger(requester).await.unwrap().balance, 5);
  let links = h.engine.exchange_links(ExchangeLinkQuery::default()).await.unwrap();
  assert!(links.is_empty());
  let item = h.engine.get_inventory(item.inventory_id).await.unwrap();
  assert_eq!(item.current_outbound_links, 0);
}

#[tokio::test]
async fn candidates_two_hops_away_are_never_matched() {
  let h = harness().await;
  let owner = Uuid::new_v4();
  let middle = Uuid::new_v4();
  let requester = Uuid::new_v4();
  let far = Uuid::new_v4();
  h.fund(middle, 20).await;
  h.fund(requester, 40).await;

  let owner_item = h.inventory(owner, "owner.com", 5).await;
  let middle_item = h.inventory(middle, "middle.com", 5).await;
  let far_item = h.inventory(far, "far.com", 5).await;

  // owner -> middle -> requester
  h.engine
    .execute_exchange(buy(middle, owner_item.inventory_id))
    .await
    .unwrap();
  h.engine
    .execute_exchange(buy(requester, middle_item.inventory_id))
    .await
    .unwrap();
  assert_eq!(h.engine.hop_distance(requester, owner).await.unwrap(), 2);
  assert_eq!(h.engine.shortest_path(requester, owner).await.unwrap(), 0);
  assert_eq!(h.engine.hop_distance(requester, far).await.unwrap(), 0);

  let matches = h.engine.find_matches(matches_for(requester)).await.unwrap();
  let ids: Vec<Uuid> = matches.iter().map(|m| m.inventory.inventory_id).collect();
  assert_eq!(ids, [far_item.inventory_id]);
  assert_eq!(matches[0].credits, 10);
  assert!(!matches[0].is_reciprocal);

  let err = h
    .engine
    .execute_exchange(buy(requester, owner_item.inventory_id))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::SafetyBlock(_)));
}

#[tokio::test]
async fn matches_rank_by_authority_and_skip_own_domain() {
  let h = harness().await;
  let requester = Uuid::new_v4();
  let low = h.inventory(Uuid::new_v4(), "low.com", 2).await;
  let high = h
    .engine
    .add_inventory(crate::exchange::NewInventory {
      owner_id:           Uuid::new_v4(),
      page_url:           "https://high.com/links".into(),
      authority:          90,
      tier:               linkmesh_core::tier::Tier::Two,
      max_outbound_links: 2,
    })
    .await
    .unwrap();
  h.inventory(Uuid::new_v4(), "requester.com", 2).await;

  let matches = h
    .engine
    .find_matches(MatchRequest {
      requester_id:  requester,
      target_domain: Some("https://requester.com".into()),
      ..Default::default()
    })
    .await
    .unwrap();
  let ids: Vec<Uuid> = matches.iter().map(|m| m.inventory.inventory_id).collect();
  assert_eq!(ids, [high.inventory_id, low.inventory_id]);
  assert!(matches[0].score > matches[1].score);

  let limited = h
    .engine
    .find_matches(MatchRequest { limit: Some(1), ..matches_for(requester) })
    .await
    .unwrap();
  assert_eq!(limited.len(), 1);

  let filtered = h
    .engine
    .find_matches(MatchRequest { min_authority: Some(60), ..matches_for(requester) })
    .await
    .unwrap();
  assert_eq!(filtered.len(), 1);
}

#[tokio::test]
async fn reaching_the_pair_cap_blacklists_the_pair() {
  let h = harness_without_hop_floor().await;
  let requester = Uuid::new_v4();
  let provider = Uuid::new_v4();
  h.fund(requester, 50).await;
  let item = h.inventory(provider, "provider.com", 5).await;

  let first = h
    .engine
    .execute_exchange(buy(requester, item.inventory_id))
    .await
    .unwrap();
  assert!(!first.pair_blacklisted);
  let second = h
    .engine
    .execute_exchange(buy(requester, item.inventory_id))
    .await
    .unwrap();
  assert!(second.pair_blacklisted);

  let err = h
    .engine
    .execute_exchange(buy(requester, item.inventory_id))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::SafetyBlock(_)));

  let entries = h.engine.list_blacklist(Some(requester), true).await.unwrap();
  assert_eq!(entries.len(), 1);
  assert_eq!(entries[0].expires_at, t0() + Duration::days(90));
  assert!(h.engine.find_matches(matches_for(requester)).await.unwrap().is_empty());
}

#[tokio::test]
async fn blacklist_expires() {
  let h = harness().await;
  let requester = Uuid::new_v4();
  let provider = Uuid::new_v4();
  h.fund(requester, 20).await;
  let item = h.inventory(provider, "provider.com", 5).await;

  h.engine
    .blacklist_pair(provider, requester, 30, "manual review".into())
    .await
    .unwrap();
  let route = h
    .engine
    .is_route_safe(requester, provider, Module::Exchange)
    .await
    .unwrap();
  assert!(!route.safe);
  let err = h
    .engine
    .execute_exchange(buy(requester, item.inventory_id))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::SafetyBlock(_)));

  h.clock.advance(Duration::days(31));
  assert!(h.engine.list_blacklist(Some(requester), true).await.unwrap().is_empty());
  assert_eq!(h.engine.list_blacklist(Some(requester), false).await.unwrap().len(), 1);
  h.engine
    .execute_exchange(buy(requester, item.inventory_id))
    .await
    .unwrap();
}

#[tokio::test]
async fn blacklisting_yourself_is_invalid() {
  let h = harness().await;
  let user = Uuid::new_v4();
  let err = h.engine.blacklist_pair(user, user, 30, "x".into()).await.unwrap_err();
  assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn own_inventory_cannot_be_bought() {
  let h = harness().await;
  let user = Uuid::new_v4();
  h.fund(user, 20).await;
  let item = h.inventory(user, "mine.com", 5).await;
  let err = h
    .engine
    .execute_exchange(buy(user, item.inventory_id))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::SafetyBlock(_)));
  assert!(h.engine.find_matches(matches_for(user)).await.unwrap().is_empty());
}

#[tokio::test]
async fn ineligible_domains_never_enter_inventory() {
  let h = harness().await;
  let err = h
    .engine
    .add_inventory(crate::exchange::NewInventory {
      owner_id:           Uuid::new_v4(),
      page_url:           "https://www.spam-links.com/list".into(),
      authority:          40,
      tier:               linkmesh_core::tier::Tier::Two,
      max_outbound_links: 3,
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Ineligible(ref r) if r.contains("spam-links.com")));
  let all = h.engine.list_inventory(Default::default()).await.unwrap();
  assert!(all.is_empty());
}

#[tokio::test]
async fn domain_used_by_distribution_is_refused_for_exchange() {
  let h = harness().await;
  let requester = Uuid::new_v4();
  h.fund(requester, 20).await;
  let item = h.inventory(Uuid::new_v4(), "provider.com", 5).await;
  h.engine
    .store()
    .record_domain_usage(DomainUsage {
      user_id:       requester,
      domain:        "provider.com".into(),
      module:        Module::Distribution,
      first_used_at: t0(),
    })
    .await
    .unwrap();

  assert!(h.engine.find_matches(matches_for(requester)).await.unwrap().is_empty());
  let err = h
    .engine
    .execute_exchange(buy(requester, item.inventory_id))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::SafetyBlock(ref r) if r.contains("distribution")));
}

#[tokio::test]
async fn isolation_covers_every_subdomain_of_a_platform() {
  let h = harness().await;
  let requester = Uuid::new_v4();
  h.engine
    .store()
    .record_domain_usage(DomainUsage {
      user_id:       requester,
      domain:        "provider.com".into(),
      module:        Module::Distribution,
      first_used_at: t0(),
    })
    .await
    .unwrap();

  for url in ["https://blog.provider.com/post", "https://www.provider.com/", "provider.com"] {
    let check = h
      .engine
      .enforce_module_isolation(requester, url, Module::Exchange)
      .await
      .unwrap();
    assert!(!check.allowed, "{url}");
    assert_eq!(check.domain, "provider.com");
  }
  let elsewhere = h
    .engine
    .enforce_module_isolation(requester, "https://provider.co.uk/post", Module::Exchange)
    .await
    .unwrap();
  assert!(elsewhere.allowed);
}

#[tokio::test]
async fn full_or_inactive_inventory_is_not_offered() {
  let h = harness_without_hop_floor().await;
  let first = Uuid::new_v4();
  let second = Uuid::new_v4();
  h.fund(first, 20).await;
  h.fund(second, 20).await;
  let single = h.inventory(Uuid::new_v4(), "single.com", 1).await;
  let retired = h.inventory(Uuid::new_v4(), "retired.com", 5).await;
  h.engine.deactivate_inventory(retired.inventory_id).await.unwrap();

  h.engine
    .execute_exchange(buy(first, single.inventory_id))
    .await
    .unwrap();
  let err = h
    .engine
    .execute_exchange(buy(second, single.inventory_id))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::CapacityExhausted(_)));
  assert!(h.engine.find_matches(matches_for(second)).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_inventory_is_not_found() {
  let h = harness().await;
  let err = h
    .engine
    .execute_exchange(buy(Uuid::new_v4(), Uuid::new_v4()))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::InventoryNotFound(_)));
}

#[tokio::test]
async fn starting_bonus_is_granted_once() {
  let mut config = EngineConfig::default();
  config.exchange.starting_bonus = 25;
  let h = harness_with(config, FakeContent::default()).await;
  let user = Uuid::new_v4();

  assert_eq!(h.engine.ledger(user).await.unwrap().balance, 25);
  assert_eq!(h.engine.ledger(user).await.unwrap().balance, 25);
  assert_eq!(transactions_of(&h, user).await, [TransactionKind::Bonus]);
}

#[tokio::test]
async fn racing_first_reads_grant_the_starting_bonus_once() {
  let mut config = EngineConfig::default();
  config.exchange.starting_bonus = 25;
  let h = harness_with(config, FakeContent::default()).await;
  let user = Uuid::new_v4();

  let (a, b) = tokio::join!(h.engine.ledger(user), h.engine.ledger(user));
  assert_eq!((a.unwrap().balance, b.unwrap().balance), (25, 25));
  assert_eq!(transactions_of(&h, user).await, [TransactionKind::Bonus]);
}

#[tokio::test]
async fn unfunded_ledger_is_empty_and_unsaved() {
  let h = harness().await;
  let user = Uuid::new_v4();
  let ledger = h.engine.ledger(user).await.unwrap();
  assert_eq!(ledger.balance, 0);
  assert!(h.engine.store().get_ledger(user).await.unwrap().is_none());

  let err = h.engine.grant_bonus(user, 0, "nothing".into()).await.unwrap_err();
  assert!(matches!(err, Error::InvalidInput(_)));
}
