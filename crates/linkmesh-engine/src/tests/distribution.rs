use std::collections::HashSet;

use chrono::Duration;
use linkmesh_core::{
  anchor::AnchorType,
  config::EngineConfig,
  content::{DerivativeKind, DistributionStatus, TaskStatus},
  link::{Backlink, DomainUsage, Module},
  store::{LinkStore, TaskQuery},
  tier::Tier,
};
use uuid::Uuid;

use super::{FakeContent, harness, harness_with, t0};
use crate::Error;

fn by_article(article_id: Uuid) -> TaskQuery {
  TaskQuery { article_id: Some(article_id), ..Default::default() }
}

#[tokio::test]
async fn default_distribution_schedules_two_tier2_and_three_tier3_tasks() {
  let h = harness().await;
  let user = Uuid::new_v4();
  let article = h.article(user).await;
  h.platforms(Tier::Two, 2).await;
  h.platforms(Tier::Three, 3).await;

  let out = h.engine.distribute(article.article_id).await.unwrap();
  assert_eq!(out.tasks_created, 5);
  assert_eq!((out.tier2_count, out.tier3_count), (2, 3));
  assert!(out.skipped.is_empty());

  let tasks = h.engine.list_tasks(by_article(article.article_id)).await.unwrap();
  let tier3_floor = t0() + Duration::hours(2 * 12);
  for task in tasks.iter().filter(|t| t.tier == Tier::Three) {
    assert!(task.scheduled_for >= tier3_floor, "{} < {tier3_floor}", task.scheduled_for);
  }
  let mut tier2_times: Vec<_> = tasks
    .iter()
    .filter(|t| t.tier == Tier::Two)
    .map(|t| t.scheduled_for)
    .collect();
  tier2_times.sort();
  assert_eq!(tier2_times, [t0(), t0() + Duration::hours(12)]);

  let article = h.engine.get_article(article.article_id).await.unwrap();
  assert_eq!(article.distribution_status, DistributionStatus::Distributing);
}

#[tokio::test]
async fn tier3_derivatives_chain_through_tier2() {
  let h = harness().await;
  let article = h.article(Uuid::new_v4()).await;
  h.platforms(Tier::Two, 1).await;
  h.platforms(Tier::Three, 1).await;
  h.engine.distribute(article.article_id).await.unwrap();

  let derivatives = h.engine.list_derivatives(article.article_id).await.unwrap();
  let tier2_ids: HashSet<Uuid> = derivatives
    .iter()
    .filter(|d| d.tier == Tier::Two)
    .map(|d| d.derivative_id)
    .collect();

  for d in &derivatives {
    match d.tier {
      Tier::Two => {
        assert_eq!(d.target_url.as_deref(), Some("https://site.com/blog/a"));
        assert_eq!(d.target_tier, Tier::One);
      }
      _ => {
        assert_eq!(d.target_url, None);
        assert_eq!(d.target_tier, Tier::Two);
        assert!(tier2_ids.contains(&d.parent_derivative_id.unwrap()));
        assert!(!d.anchor_type.is_keyword());
      }
    }
  }
}

#[tokio::test]
async fn platforms_are_used_round_robin_by_authority() {
  let h = harness().await;
  let article = h.article(Uuid::new_v4()).await;
  h.platforms(Tier::Two, 1).await;
  let tier3 = h.platforms(Tier::Three, 2).await;
  h.engine.distribute(article.article_id).await.unwrap();

  let mut tier3_tasks: Vec<_> = h
    .engine
    .list_tasks(by_article(article.article_id))
    .await
    .unwrap()
    .into_iter()
    .filter(|t| t.tier == Tier::Three)
    .collect();
  tier3_tasks.sort_by_key(|t| t.scheduled_for);
  let order: Vec<_> = tier3_tasks.iter().map(|t| t.platform_id).collect();
  assert_eq!(
    order,
    [tier3[0].platform_id, tier3[1].platform_id, tier3[0].platform_id]
  );
}

#[tokio::test]
async fn distributing_twice_is_refused() {
  let h = harness().await;
  let article = h.article(Uuid::new_v4()).await;
  h.platforms(Tier::Two, 2).await;
  h.engine.distribute(article.article_id).await.unwrap();

  let err = h.engine.distribute(article.article_id).await.unwrap_err();
  assert!(matches!(err, Error::AlreadyDistributed(id) if id == article.article_id));
}

#[tokio::test]
async fn unknown_article_is_not_found() {
  let h = harness().await;
  let err = h.engine.distribute(Uuid::new_v4()).await.unwrap_err();
  assert!(err.is_not_found());
}

#[tokio::test]
async fn tier_without_platforms_is_skipped() {
  let h = harness().await;
  let article = h.article(Uuid::new_v4()).await;
  h.platforms(Tier::Two, 2).await;

  let out = h.engine.distribute(article.article_id).await.unwrap();
  assert_eq!(out.tasks_created, 2);
  assert_eq!(out.tier3_count, 0);
  assert_eq!(out.skipped.len(), 3);
  assert!(out.skipped.iter().all(|s| s.tier == Tier::Three));
}

#[tokio::test]
async fn a_run_without_platforms_leaves_the_article_retryable() {
  let h = harness().await;
  let article = h.article(Uuid::new_v4()).await;

  let out = h.engine.distribute(article.article_id).await.unwrap();
  assert_eq!(out.tasks_created, 0);
  assert_eq!(out.skipped.len(), 5);
  let untouched = h.engine.get_article(article.article_id).await.unwrap();
  assert_eq!(untouched.distribution_status, DistributionStatus::NotStarted);
  assert!(h.engine.list_derivatives(article.article_id).await.unwrap().is_empty());

  h.platforms(Tier::Two, 2).await;
  h.platforms(Tier::Three, 3).await;
  let retry = h.engine.distribute(article.article_id).await.unwrap();
  assert_eq!(retry.tasks_created, 5);
  let started = h.engine.get_article(article.article_id).await.unwrap();
  assert_eq!(started.distribution_status, DistributionStatus::Distributing);
}

#[tokio::test]
async fn failed_generation_skips_only_that_kind() {
  let content = FakeContent { failing: HashSet::from([DerivativeKind::Opinion]) };
  let h = harness_with(EngineConfig::default(), content).await;
  let article = h.article(Uuid::new_v4()).await;
  h.platforms(Tier::Two, 2).await;
  h.platforms(Tier::Three, 2).await;

  let out = h.engine.distribute(article.article_id).await.unwrap();
  assert_eq!((out.tier2_count, out.tier3_count), (1, 3));
  assert_eq!(out.tasks_created, 4);
  assert_eq!(out.skipped.len(), 1);
  assert_eq!(out.skipped[0].kind, DerivativeKind::Opinion);
}

#[tokio::test]
async fn platform_domain_used_by_exchange_is_excluded() {
  let h = harness().await;
  let user = Uuid::new_v4();
  let article = h.article(user).await;
  let tier2 = h.platforms(Tier::Two, 2).await;

  h.engine
    .store()
    .record_domain_usage(DomainUsage {
      user_id:       user,
      domain:        "tier2-p0.com".into(),
      module:        Module::Exchange,
      first_used_at: t0(),
    })
    .await
    .unwrap();

  let check = h
    .engine
    .enforce_module_isolation(user, &tier2[0].url, Module::Distribution)
    .await
    .unwrap();
  assert!(!check.allowed);
  assert_eq!(check.conflict, Some(Module::Exchange));

  h.engine.distribute(article.article_id).await.unwrap();
  let tasks = h.engine.list_tasks(by_article(article.article_id)).await.unwrap();
  assert_eq!(tasks.len(), 2);
  assert!(tasks.iter().all(|t| t.platform_id == tier2[1].platform_id));
}

#[tokio::test]
async fn completing_all_tasks_finishes_the_article() {
  let h = harness().await;
  let user = Uuid::new_v4();
  let article = h.article(user).await;
  h.platforms(Tier::Two, 1).await;
  h.platforms(Tier::Three, 1).await;
  h.engine.distribute(article.article_id).await.unwrap();

  let tasks = h.engine.list_tasks(by_article(article.article_id)).await.unwrap();
  let (tier2, tier3): (Vec<_>, Vec<_>) = tasks.into_iter().partition(|t| t.tier == Tier::Two);

  // Place every tier-2 derivative first.
  let mut placed = Vec::new();
  for (i, task) in tier2.iter().enumerate() {
    let url = format!("https://medium.com/@site/post-{i}");
    let done = h.engine.complete_task(task.task_id, url.clone()).await.unwrap();
    assert_eq!(done.task.status, TaskStatus::Completed);
    assert_eq!(done.backlink.target_url, "https://site.com/blog/a");
    assert_eq!(done.backlink.source_domain, "medium.com");
    placed.push(url);
  }

  // A tier-3 placement points at its parent's placement.
  let first = &tier3[0];
  let done = h
    .engine
    .complete_task(first.task_id, "https://pinboard.in/u/site/1".into())
    .await
    .unwrap();
  assert!(placed.contains(&done.backlink.target_url));
  assert_eq!(done.backlink.tier, Tier::Three);

  let again = h
    .engine
    .complete_task(first.task_id, "https://pinboard.in/u/site/2".into())
    .await
    .unwrap_err();
  assert!(matches!(again, Error::InvalidState(_)));

  let article_now = h.engine.get_article(article.article_id).await.unwrap();
  assert_eq!(article_now.distribution_status, DistributionStatus::Distributing);

  for task in &tier3[1..] {
    h.engine.fail_task(task.task_id, "platform rejected post".into()).await.unwrap();
  }
  let article_now = h.engine.get_article(article.article_id).await.unwrap();
  assert_eq!(article_now.distribution_status, DistributionStatus::Distributed);
}

#[tokio::test]
async fn due_tasks_respect_schedule() {
  let h = harness().await;
  let article = h.article(Uuid::new_v4()).await;
  h.platforms(Tier::Two, 2).await;
  h.platforms(Tier::Three, 2).await;
  h.engine.distribute(article.article_id).await.unwrap();

  let due = h.engine.due_tasks(None).await.unwrap();
  assert_eq!(due.len(), 1);
  assert_eq!(due[0].tier, Tier::Two);

  h.clock.advance(Duration::days(3));
  assert_eq!(h.engine.due_tasks(None).await.unwrap().len(), 5);
  assert_eq!(h.engine.due_tasks(Some(2)).await.unwrap().len(), 2);
}

#[tokio::test]
async fn velocity_gate_reports_next_slot_from_latest_backlink() {
  let h = harness().await;
  let user = Uuid::new_v4();
  let created = t0() - Duration::hours(10);
  h.engine
    .store()
    .insert_backlink(Backlink {
      backlink_id:      Uuid::new_v4(),
      user_id:          user,
      module:           Module::Distribution,
      tier:             Tier::One,
      source_url:       "https://news.example.com/feature".into(),
      source_domain:    "news.example.com".into(),
      target_url:       "https://site.com/blog/a".into(),
      anchor_text:      "Site Co".into(),
      anchor_type:      AnchorType::Branded,
      is_live:          true,
      is_indexed:       false,
      created_at:       created,
      last_checked_at:  None,
      removed_at:       None,
      task_id:          None,
      exchange_link_id: None,
    })
    .await
    .unwrap();

  let check = h.engine.check_velocity(user, Tier::One).await.unwrap();
  assert!(!check.allowed);
  assert_eq!(check.next_available_at, Some(created + Duration::hours(48)));

  let other_tier = h.engine.check_velocity(user, Tier::Two).await.unwrap();
  assert!(other_tier.allowed);
}

#[tokio::test]
async fn stored_settings_override_defaults() {
  let h = harness().await;
  let user = Uuid::new_v4();
  let mut settings = h.engine.link_settings(user).await.unwrap();
  assert_eq!(settings.daily_caps.get(Tier::One), 2);

  settings.daily_caps.set(Tier::One, 0);
  h.engine.update_link_settings(user, settings).await.unwrap();
  let check = h.engine.check_velocity(user, Tier::One).await.unwrap();
  assert!(!check.allowed);
  assert_eq!(check.daily_cap, 0);
}
