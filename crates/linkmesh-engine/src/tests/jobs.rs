use chrono::{Duration, Months};
use linkmesh_core::{
  collab::{CollaboratorError, HealthReport},
  config::EngineConfig,
  exchange::{CreditsStatus, ExchangeLink},
  ledger::{LedgerDrift, TransactionKind},
  link::{Backlink, Module},
  store::{BacklinkQuery, LinkStore, TransactionQuery},
};
use uuid::Uuid;

use super::{FakeContent, Harness, harness, harness_with, t0};
use crate::{exchange::ExchangeRequest, settlement::LinkSettlement};

const PROVIDER_PAGE: &str = "https://provider.com/resources";

struct Trade {
  requester: Uuid,
  provider:  Uuid,
  link:      ExchangeLink,
}

/// One 10-credit exchange at `t0`, requester left with 2 credits.
async fn trade(h: &Harness) -> Trade { trade_on(h, "provider.com").await }

/// A 10-credit exchange between two fresh participants, placed on
/// `https://{domain}/resources` at the current clock time.
async fn trade_on(h: &Harness, domain: &str) -> Trade {
  let requester = Uuid::new_v4();
  let provider = Uuid::new_v4();
  h.fund(requester, 12).await;
  let item = h.inventory(provider, domain, 5).await;
  let receipt = h
    .engine
    .execute_exchange(ExchangeRequest {
      requester_id: requester,
      inventory_id: item.inventory_id,
      target_url:   "https://requester.com/guide".into(),
      keyword:      "trail running".into(),
      site_name:    "Requester".into(),
      context:      String::new(),
    })
    .await
    .unwrap();
  Trade { requester, provider, link: receipt.link }
}

async fn backlinks_of(h: &Harness, user_id: Uuid) -> Vec<Backlink> {
  h.engine
    .store()
    .list_backlinks(BacklinkQuery { user_id: Some(user_id), ..Default::default() })
    .await
    .unwrap()
}

/// Run one statement against the store behind the engine's back, binding
/// `id` as `?1`. Stands in for a crash between writes or a manual edit.
async fn tamper(h: &Harness, sql: &'static str, id: Uuid) {
  h.engine
    .store()
    .connection()
    .call(move |conn| {
      conn.execute(sql, [id.hyphenated().to_string()])?;
      Ok(())
    })
    .await
    .unwrap();
}

async fn kinds(h: &Harness, user_id: Uuid) -> Vec<TransactionKind> {
  h.engine
    .transactions(TransactionQuery { user_id: Some(user_id), ..Default::default() })
    .await
    .unwrap()
    .into_iter()
    .map(|t| t.kind)
    .collect()
}

// ─── Settlement ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn live_links_are_awarded_after_the_grace_period() {
  let h = harness().await;
  let trade = trade(&h).await;

  let early = h.engine.settle_link(trade.link.link_id).await.unwrap();
  assert!(matches!(early, LinkSettlement::NotDue { due_at } if due_at == t0() + Duration::days(7)));

  h.clock.advance(Duration::days(6));
  assert_eq!(h.engine.run_settlement().await.unwrap().examined, 0);

  h.clock.advance(Duration::days(2));
  let report = h.engine.run_settlement().await.unwrap();
  assert_eq!((report.examined, report.awarded), (1, 1));
  assert!(report.failures.is_empty());

  let provider = h.engine.ledger(trade.provider).await.unwrap();
  assert_eq!((provider.balance, provider.pending_credits), (10, 0));
  assert_eq!(provider.lifetime_earned, 10);
  let link = h.engine.get_exchange_link(trade.link.link_id).await.unwrap();
  assert_eq!(link.credits_status, CreditsStatus::Awarded);
  assert_eq!(link.settled_at, Some(t0() + Duration::days(8)));

  let again = h.engine.settle_link(trade.link.link_id).await.unwrap();
  assert!(matches!(
    again,
    LinkSettlement::AlreadySettled { status: CreditsStatus::Awarded }
  ));
  assert_eq!(h.engine.run_settlement().await.unwrap().examined, 0);
  assert_eq!(
    kinds(&h, trade.provider).await,
    [TransactionKind::Pending, TransactionKind::Earned]
  );
}

#[tokio::test]
async fn dead_links_are_clawed_back() {
  let h = harness().await;
  let trade = trade(&h).await;
  h.monitor.dead(PROVIDER_PAGE);
  h.clock.advance(Duration::days(8));

  let settled = h.engine.settle_link(trade.link.link_id).await.unwrap();
  assert!(matches!(settled, LinkSettlement::ClawedBack { ref transaction } if transaction.amount == -10));

  let provider = h.engine.ledger(trade.provider).await.unwrap();
  assert_eq!((provider.balance, provider.pending_credits), (0, 0));
  assert_eq!(h.engine.ledger(trade.requester).await.unwrap().balance, 2);

  let link = h.engine.get_exchange_link(trade.link.link_id).await.unwrap();
  assert_eq!(link.credits_status, CreditsStatus::ClawedBack);
  assert!(!link.is_live);

  let backlinks = h
    .engine
    .store()
    .list_backlinks(BacklinkQuery { user_id: Some(trade.requester), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(backlinks.len(), 1);
  assert!(!backlinks[0].is_live);
  assert_eq!(backlinks[0].removed_at, Some(t0() + Duration::days(8)));
}

#[tokio::test]
async fn failed_checks_defer_settlement() {
  let h = harness().await;
  let trade = trade(&h).await;
  h.monitor.set(PROVIDER_PAGE, Err(CollaboratorError::Unavailable("crawler down".into())));
  h.clock.advance(Duration::days(8));

  let report = h.engine.run_settlement().await.unwrap();
  assert_eq!((report.examined, report.deferred, report.awarded), (1, 1, 0));
  let link = h.engine.get_exchange_link(trade.link.link_id).await.unwrap();
  assert_eq!(link.credits_status, CreditsStatus::Pending);
  assert_eq!(h.engine.ledger(trade.provider).await.unwrap().pending_credits, 10);

  h.monitor.set(PROVIDER_PAGE, Ok(HealthReport { is_live: true, is_indexed: false }));
  let report = h.engine.run_settlement().await.unwrap();
  assert_eq!(report.awarded, 1);
}

#[tokio::test]
async fn deferred_links_queue_behind_untried_ones() {
  let mut config = EngineConfig::default();
  config.settlement.batch_size = 1;
  let h = harness_with(config, FakeContent::default()).await;
  let stuck = trade_on(&h, "stuck.com").await;
  h.clock.advance(Duration::minutes(1));
  let healthy = trade_on(&h, "healthy.com").await;
  h.monitor.set(
    "https://stuck.com/resources",
    Err(CollaboratorError::Unavailable("crawler blocked".into())),
  );
  h.clock.advance(Duration::days(8));

  let first = h.engine.run_settlement().await.unwrap();
  assert_eq!((first.examined, first.deferred, first.awarded), (1, 1, 0));

  h.clock.advance(Duration::hours(1));
  let second = h.engine.run_settlement().await.unwrap();
  assert_eq!((second.examined, second.deferred, second.awarded), (1, 0, 1));
  let link = h.engine.get_exchange_link(healthy.link.link_id).await.unwrap();
  assert_eq!(link.credits_status, CreditsStatus::Awarded);
  assert_eq!(h.engine.ledger(healthy.provider).await.unwrap().balance, 10);

  h.clock.advance(Duration::hours(1));
  let third = h.engine.run_settlement().await.unwrap();
  assert_eq!((third.examined, third.deferred), (1, 1));
  let link = h.engine.get_exchange_link(stuck.link.link_id).await.unwrap();
  assert_eq!(link.credits_status, CreditsStatus::Pending);
}

#[tokio::test]
async fn settling_an_unknown_link_is_not_found() {
  let h = harness().await;
  let err = h.engine.settle_link(Uuid::new_v4()).await.unwrap_err();
  assert!(err.is_not_found());
}

// ─── Decay ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn idle_balances_decay_once_per_idle_month() {
  let h = harness().await;
  let user = Uuid::new_v4();
  h.fund(user, 100).await;

  h.clock.advance(Duration::days(20));
  let report = h.engine.run_decay().await.unwrap();
  assert_eq!((report.examined, report.decayed), (1, 0));

  h.clock.set(t0().checked_add_months(Months::new(3)).unwrap());
  let report = h.engine.run_decay().await.unwrap();
  assert_eq!((report.decayed, report.credits_removed), (1, 15));
  assert_eq!(h.engine.ledger(user).await.unwrap().balance, 85);

  let report = h.engine.run_decay().await.unwrap();
  assert_eq!(report.decayed, 0);
  assert_eq!(h.engine.ledger(user).await.unwrap().balance, 85);

  let decays = h
    .engine
    .transactions(TransactionQuery {
      user_id: Some(user),
      kind: Some(TransactionKind::Decay),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(decays.len(), 1);
  assert_eq!(decays[0].amount, -15);
}

#[tokio::test]
async fn decay_is_capped() {
  let h = harness().await;
  let user = Uuid::new_v4();
  h.fund(user, 100).await;
  h.clock.set(t0().checked_add_months(Months::new(12)).unwrap());

  let report = h.engine.run_decay().await.unwrap();
  assert_eq!(report.credits_removed, 20);
}

// ─── Reconciliation ──────────────────────────────────────────────────────────

#[tokio::test]
async fn reconciliation_of_a_clean_history_changes_nothing() {
  let h = harness().await;
  let trade = trade(&h).await;
  h.clock.advance(Duration::days(8));
  h.engine.run_settlement().await.unwrap();
  let before = kinds(&h, trade.provider).await.len() + kinds(&h, trade.requester).await.len();

  for _ in 0..2 {
    let report = h.engine.run_reconciliation().await.unwrap();
    assert_eq!(report.links_examined, 1);
    assert_eq!(report.backfilled, 0);
    assert!(report.unrecoverable.is_empty());
    assert_eq!(report.ledgers_checked, 2);
    assert!(report.drift.is_empty());
  }
  let after = kinds(&h, trade.provider).await.len() + kinds(&h, trade.requester).await.len();
  assert_eq!(before, after);
}

#[tokio::test]
async fn reconciliation_backfills_a_link_whose_transactions_were_lost() {
  let h = harness().await;
  let trade = trade(&h).await;
  // The link row survives; the ledgers look as they did before the trade.
  tamper(&h, "DELETE FROM transactions WHERE related_link_id = ?1", trade.link.link_id).await;
  tamper(
    &h,
    "UPDATE ledgers SET balance = balance + 10, lifetime_spent = lifetime_spent - 10
     WHERE user_id = ?1",
    trade.requester,
  )
  .await;
  tamper(
    &h,
    "UPDATE ledgers SET pending_credits = pending_credits - 10 WHERE user_id = ?1",
    trade.provider,
  )
  .await;

  let report = h.engine.run_reconciliation().await.unwrap();
  assert_eq!((report.links_examined, report.backfilled), (1, 2));
  assert!(report.unrecoverable.is_empty());
  assert!(report.drift.is_empty());

  let requester = h.engine.ledger(trade.requester).await.unwrap();
  assert_eq!((requester.balance, requester.lifetime_spent), (2, 10));
  assert_eq!(h.engine.ledger(trade.provider).await.unwrap().pending_credits, 10);
  assert_eq!(kinds(&h, trade.requester).await, [TransactionKind::Bonus, TransactionKind::Spent]);
  assert_eq!(kinds(&h, trade.provider).await, [TransactionKind::Pending]);

  let again = h.engine.run_reconciliation().await.unwrap();
  assert_eq!(again.backfilled, 0);
  assert!(again.drift.is_empty());
  assert_eq!(h.engine.ledger(trade.requester).await.unwrap().balance, 2);
}

#[tokio::test]
async fn reconciliation_backfills_a_lost_award() {
  let h = harness().await;
  let trade = trade(&h).await;
  h.clock.advance(Duration::days(8));
  h.engine.run_settlement().await.unwrap();
  tamper(
    &h,
    "DELETE FROM transactions WHERE related_link_id = ?1 AND kind = 'earned'",
    trade.link.link_id,
  )
  .await;
  tamper(
    &h,
    "UPDATE ledgers SET balance = balance - 10, lifetime_earned = lifetime_earned - 10,
       pending_credits = pending_credits + 10
     WHERE user_id = ?1",
    trade.provider,
  )
  .await;

  let report = h.engine.run_reconciliation().await.unwrap();
  assert_eq!(report.backfilled, 1);
  assert!(report.drift.is_empty());
  let provider = h.engine.ledger(trade.provider).await.unwrap();
  assert_eq!((provider.balance, provider.pending_credits), (10, 0));
  assert_eq!(
    kinds(&h, trade.provider).await,
    [TransactionKind::Pending, TransactionKind::Earned]
  );
}

#[tokio::test]
async fn reconciliation_reports_links_the_requester_cannot_cover() {
  let h = harness().await;
  let trade = trade(&h).await;
  // Records lost after the debit landed: the requester's 2 credits cannot
  // absorb a second 10-credit spend.
  tamper(&h, "DELETE FROM transactions WHERE related_link_id = ?1", trade.link.link_id).await;
  tamper(
    &h,
    "UPDATE ledgers SET pending_credits = pending_credits - 10 WHERE user_id = ?1",
    trade.provider,
  )
  .await;

  let report = h.engine.run_reconciliation().await.unwrap();
  assert_eq!(report.backfilled, 0);
  assert_eq!(report.unrecoverable, [trade.link.link_id]);
  assert_eq!(
    report.drift,
    [LedgerDrift {
      user_id:          trade.requester,
      stored_balance:   2,
      expected_balance: 12,
      stored_pending:   0,
      expected_pending: 0,
    }]
  );
  assert_eq!(h.engine.ledger(trade.provider).await.unwrap().pending_credits, 0);
}

#[tokio::test]
async fn reconciliation_reports_tampered_ledgers_without_rewriting_them() {
  let h = harness().await;
  let user = Uuid::new_v4();
  h.fund(user, 40).await;
  tamper(&h, "UPDATE ledgers SET balance = balance + 5 WHERE user_id = ?1", user).await;

  let report = h.engine.run_reconciliation().await.unwrap();
  assert_eq!(report.ledgers_checked, 1);
  assert_eq!(
    report.drift,
    [LedgerDrift {
      user_id:          user,
      stored_balance:   45,
      expected_balance: 40,
      stored_pending:   0,
      expected_pending: 0,
    }]
  );
  assert_eq!(h.engine.ledger(user).await.unwrap().balance, 45);
}

// ─── Health sweep ────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_sweep_marks_removed_backlinks() {
  let h = harness().await;
  let trade = trade(&h).await;
  h.monitor.dead(PROVIDER_PAGE);
  h.clock.advance(Duration::hours(1));

  let report = h.engine.run_health_check_batch(Module::Exchange, 10).await.unwrap();
  assert_eq!((report.checked, report.live_count, report.indexed_count), (1, 0, 0));

  let backlinks = h
    .engine
    .store()
    .list_backlinks(BacklinkQuery { user_id: Some(trade.requester), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(backlinks[0].removed_at, Some(t0() + Duration::hours(1)));
  assert_eq!(backlinks[0].last_checked_at, Some(t0() + Duration::hours(1)));

  let report = h.engine.run_health_check_batch(Module::Exchange, 10).await.unwrap();
  assert_eq!(report.checked, 0);
  let other = h.engine.run_health_check_batch(Module::Distribution, 10).await.unwrap();
  assert_eq!(other.checked, 0);
}

#[tokio::test]
async fn failed_health_checks_leave_backlinks_untouched() {
  let h = harness().await;
  let trade = trade(&h).await;
  h.monitor.set(PROVIDER_PAGE, Err(CollaboratorError::Unavailable("blocked".into())));

  let report = h.engine.run_health_check_batch(Module::Exchange, 10).await.unwrap();
  assert_eq!(report.checked, 1);
  assert_eq!(report.failures.len(), 1);

  let backlinks = h
    .engine
    .store()
    .list_backlinks(BacklinkQuery { user_id: Some(trade.requester), ..Default::default() })
    .await
    .unwrap();
  assert!(backlinks[0].is_live);
  assert_eq!(backlinks[0].last_checked_at, None);
}

#[tokio::test]
async fn failing_backlinks_rotate_to_the_back_of_the_sweep() {
  let h = harness().await;
  let stuck = trade_on(&h, "stuck.com").await;
  h.clock.advance(Duration::minutes(1));
  let healthy = trade_on(&h, "healthy.com").await;
  h.monitor.set(
    "https://stuck.com/resources",
    Err(CollaboratorError::Timeout(std::time::Duration::from_secs(20))),
  );

  h.clock.advance(Duration::hours(1));
  let first = h.engine.run_health_check_batch(Module::Exchange, 1).await.unwrap();
  assert_eq!((first.checked, first.failures.len()), (1, 1));
  assert_eq!(first.failures[0].reason, "timed out after 20s");

  h.clock.advance(Duration::hours(1));
  let checked_at = h.clock.now();
  let second = h.engine.run_health_check_batch(Module::Exchange, 1).await.unwrap();
  assert_eq!((second.checked, second.live_count), (1, 1));
  assert!(second.failures.is_empty());

  let healthy_links = backlinks_of(&h, healthy.requester).await;
  assert_eq!(healthy_links[0].last_checked_at, Some(checked_at));
  let stuck_links = backlinks_of(&h, stuck.requester).await;
  assert_eq!(stuck_links[0].last_checked_at, None);

  h.clock.advance(Duration::hours(1));
  let third = h.engine.run_health_check_batch(Module::Exchange, 1).await.unwrap();
  assert_eq!(third.failures.len(), 1);
  assert_eq!(third.failures[0].backlink_id, stuck_links[0].backlink_id);
}

// ─── Reporting ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn summary_counts_both_sides_of_a_trade() {
  let h = harness().await;
  let trade = trade(&h).await;

  let buyer = h.engine.user_summary(trade.requester).await.unwrap();
  assert_eq!(buyer.exchange.received.pending, 1);
  assert_eq!(buyer.exchange.given.pending, 0);
  assert_eq!(buyer.backlinks.total, 1);
  assert_eq!(buyer.ledger.balance, 2);

  let seller = h.engine.user_summary(trade.provider).await.unwrap();
  assert_eq!(seller.exchange.given.pending, 1);
  assert_eq!(seller.backlinks.total, 0);
  assert_eq!(seller.ledger.pending_credits, 10);
}
