//! The distribution engine: turn one article into tiered derivatives and
//! scheduled placement tasks, then track those tasks to completion.
//!
//! Tier-2 derivatives link to the article. Tier-3 derivatives carry no
//! direct link; each names a tier-2 parent, and is scheduled to trail the
//! tier-2 placements so the parent usually has a URL by the time it runs.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use linkmesh_core::{
  adapt::truncate_chars,
  anchor::AnchorRequest,
  collab::{ContentPurpose, ContentRequest},
  content::{
    Article, Derivative, DerivativeKind, DerivativeStatus, DistributionStatus,
    DistributionTask, Platform, Site, TaskStatus,
  },
  domain::{base_domain, registrable_domain},
  link::{Backlink, DomainUsage, Module},
  store::{DistributionBatch, LinkStore, TaskQuery},
  tier::Tier,
};

use crate::{
  Backends, Engine, Error, Result, error::store_err, retry::generate_with_retry,
};

// ─── Results ─────────────────────────────────────────────────────────────────

/// A derivative kind that produced no task, and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedDerivative {
  pub kind:   DerivativeKind,
  pub tier:   Tier,
  pub reason: String,
}

/// Partial distribution is a success; callers compare the counts against
/// what they expected and read `skipped` for the omissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionOutcome {
  pub article_id:    Uuid,
  pub tasks_created: usize,
  pub tier2_count:   usize,
  pub tier3_count:   usize,
  pub skipped:       Vec<SkippedDerivative>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompletion {
  pub task:     DistributionTask,
  pub backlink: Backlink,
}

// ─── Distribution ────────────────────────────────────────────────────────────

impl<B: Backends> Engine<B> {
  /// Generate the article's tier-2 and tier-3 derivatives and schedule one
  /// placement task per derivative.
  ///
  /// The article moves to `distributing` only when at least one task was
  /// created. A run that finds no eligible platform writes nothing and
  /// leaves the article `not_started`, so it can be distributed again once
  /// platforms exist.
  pub async fn distribute(&self, article_id: Uuid) -> Result<DistributionOutcome> {
    let now = self.now();
    let article = self.get_article(article_id).await?;
    if article.distribution_status != DistributionStatus::NotStarted {
      return Err(Error::AlreadyDistributed(article_id));
    }
    let site = self.get_site(article.site_id).await?;
    let settings = self.link_settings(article.user_id).await?;

    let mut batch = DistributionBatch::default();
    let mut skipped = Vec::new();

    // Tier 2: straight at the article.
    let tier2_kinds = self.kinds_for(Tier::Two);
    let tier2_platforms = self.eligible_platforms(article.user_id, Tier::Two).await?;
    let mut tier2 = Vec::new();
    if tier2_platforms.is_empty() {
      skip_all(&mut skipped, &tier2_kinds, Tier::Two, "no eligible tier2 platforms");
    } else {
      for kind in &tier2_kinds {
        match self.derive(&article, &site, *kind, None, now).await {
          Ok(d) => tier2.push(d),
          Err(reason) => skipped.push(SkippedDerivative { kind: *kind, tier: Tier::Two, reason }),
        }
      }
    }

    // Tier 3: at a tier-2 parent, never at the article.
    let tier3_kinds = self.kinds_for(Tier::Three);
    let tier3_platforms = self.eligible_platforms(article.user_id, Tier::Three).await?;
    let mut tier3 = Vec::new();
    if tier3_platforms.is_empty() {
      skip_all(&mut skipped, &tier3_kinds, Tier::Three, "no eligible tier3 platforms");
    } else {
      for (i, kind) in tier3_kinds.iter().enumerate() {
        let parent = (!tier2.is_empty()).then(|| tier2[i % tier2.len()].derivative_id);
        match self.derive(&article, &site, *kind, parent, now).await {
          Ok(d) => tier3.push(d),
          Err(reason) => {
            skipped.push(SkippedDerivative { kind: *kind, tier: Tier::Three, reason })
          }
        }
      }
    }

    let tier2_spacing = hours(settings.velocity_hours.get(Tier::Two));
    let tier3_spacing = hours(settings.velocity_hours.get(Tier::Three));
    let mut tasks = schedule(&tier2, &tier2_platforms, now, Duration::zero(), tier2_spacing);
    tasks.extend(schedule(&tier3, &tier3_platforms, now, tier2_spacing * 2, tier3_spacing));

    let mut usages: BTreeMap<String, DomainUsage> = BTreeMap::new();
    let platforms = tier2_platforms.iter().chain(&tier3_platforms);
    for platform in platforms.filter(|p| tasks.iter().any(|t| t.platform_id == p.platform_id)) {
      if let Ok(domain) = registrable_domain(&platform.url) {
        usages.entry(domain.clone()).or_insert(DomainUsage {
          user_id: article.user_id,
          domain,
          module: Module::Distribution,
          first_used_at: now,
        });
      }
    }

    let outcome = DistributionOutcome {
      article_id,
      tasks_created: tasks.len(),
      tier2_count: tier2.len(),
      tier3_count: tier3.len(),
      skipped,
    };

    batch.derivatives = tier2.into_iter().chain(tier3).collect();
    batch.tasks = tasks;
    batch.usages = usages.into_values().collect();
    self.store.record_distribution(batch).await.map_err(store_err)?;

    if outcome.tasks_created > 0 {
      self
        .store
        .set_article_status(article_id, DistributionStatus::Distributing)
        .await
        .map_err(store_err)?;
    }

    info!(
      %article_id,
      tasks = outcome.tasks_created,
      tier2 = outcome.tier2_count,
      tier3 = outcome.tier3_count,
      skipped = outcome.skipped.len(),
      "article distributed"
    );
    Ok(outcome)
  }

  /// Configured kinds for `tier`, dropping any bound to another tier.
  fn kinds_for(&self, tier: Tier) -> Vec<DerivativeKind> {
    let cfg = &self.config.distribution;
    let configured = match tier {
      Tier::Two => &cfg.tier2_kinds,
      _ => &cfg.tier3_kinds,
    };
    configured
      .iter()
      .copied()
      .filter(|k| {
        let ok = k.tier() == tier;
        if !ok {
          warn!(kind = k.as_str(), %tier, "derivative kind configured for the wrong tier");
        }
        ok
      })
      .collect()
  }

  /// Active platforms at `tier`, highest authority first, minus any whose
  /// domain already serves another module for `user_id`.
  async fn eligible_platforms(&self, user_id: Uuid, tier: Tier) -> Result<Vec<Platform>> {
    let mut eligible = Vec::new();
    for platform in self.list_platforms(Some(tier), true).await? {
      match self
        .enforce_module_isolation(user_id, &platform.url, Module::Distribution)
        .await
      {
        Ok(check) if check.allowed => eligible.push(platform),
        Ok(check) => warn!(
          platform = %platform.name,
          domain = %check.domain,
          "platform domain used by another module; skipped"
        ),
        Err(Error::InvalidUrl(reason)) => {
          warn!(platform = %platform.name, %reason, "platform url unusable; skipped")
        }
        Err(e) => return Err(e),
      }
    }
    Ok(eligible)
  }

  /// Build one derivative. Errors are skip reasons, not failures.
  async fn derive(
    &self,
    article: &Article,
    site: &Site,
    kind: DerivativeKind,
    parent: Option<Uuid>,
    now: DateTime<Utc>,
  ) -> Result<Derivative, String> {
    let tier = kind.tier();
    let cfg = &self.config.distribution;
    let anchor = self.select_anchor(&AnchorRequest {
      target_url: article.target_url.clone(),
      keyword:    article.primary_keyword.clone(),
      site_name:  site.name.clone(),
      tier,
      module:     Module::Distribution,
    });
    let target_url = (tier == Tier::Two).then(|| article.target_url.clone());

    let request = ContentRequest {
      purpose:            ContentPurpose::Derivative { kind },
      tier,
      title:              article.title.clone(),
      body:               article.body.clone(),
      primary_keyword:    article.primary_keyword.clone(),
      secondary_keywords: article.secondary_keywords.clone(),
      site_name:          site.name.clone(),
      anchor:             anchor.clone(),
      target_url:         target_url.clone(),
    };
    let content = generate_with_retry(&*self.content, &request, cfg.content)
      .await
      .map_err(|e| {
        warn!(article_id = %article.article_id, kind = kind.as_str(), error = %e, "derivative skipped");
        e.to_string()
      })?;

    Ok(Derivative {
      derivative_id:        Uuid::new_v4(),
      article_id:           article.article_id,
      user_id:              article.user_id,
      kind,
      tier,
      title:                truncate_chars(&content.title, cfg.max_title_chars),
      body:                 truncate_chars(&content.content, cfg.max_body_chars),
      excerpt:              truncate_chars(&content.excerpt, cfg.max_excerpt_chars),
      anchor_text:          anchor.text,
      anchor_type:          anchor.anchor_type,
      target_url,
      target_tier:          if tier == Tier::Two { Tier::One } else { Tier::Two },
      parent_derivative_id: parent,
      platform_category:    kind.platform_category().to_owned(),
      status:               DerivativeStatus::Pending,
      created_at:           now,
    })
  }
}

fn hours(h: u32) -> Duration { Duration::hours(i64::from(h)) }

fn skip_all(
  skipped: &mut Vec<SkippedDerivative>,
  kinds: &[DerivativeKind],
  tier: Tier,
  reason: &str,
) {
  warn!(%tier, reason, "tier skipped");
  skipped.extend(kinds.iter().map(|kind| SkippedDerivative {
    kind: *kind,
    tier,
    reason: reason.to_owned(),
  }));
}

/// One task per derivative, cycling through `platforms` in order, the i-th
/// scheduled at `now + base + i * spacing`.
fn schedule(
  derivatives: &[Derivative],
  platforms: &[Platform],
  now: DateTime<Utc>,
  base: Duration,
  spacing: Duration,
) -> Vec<DistributionTask> {
  if platforms.is_empty() {
    return Vec::new();
  }
  derivatives
    .iter()
    .enumerate()
    .map(|(i, d)| {
      let platform = &platforms[i % platforms.len()];
      DistributionTask {
        task_id:        Uuid::new_v4(),
        derivative_id:  d.derivative_id,
        article_id:     d.article_id,
        user_id:        d.user_id,
        platform_id:    platform.platform_id,
        tier:           d.tier,
        scheduled_for:  now + base + spacing * i as i32,
        priority:       d.tier.task_priority(),
        status:         TaskStatus::Pending,
        placed_url:     None,
        failure_reason: None,
        created_at:     now,
        finished_at:    None,
      }
    })
    .collect()
}

// ─── Task lifecycle ──────────────────────────────────────────────────────────

impl<B: Backends> Engine<B> {
  pub async fn get_task(&self, task_id: Uuid) -> Result<DistributionTask> {
    self
      .store
      .get_task(task_id)
      .await
      .map_err(store_err)?
      .ok_or(Error::TaskNotFound(task_id))
  }

  pub async fn list_tasks(&self, query: TaskQuery) -> Result<Vec<DistributionTask>> {
    self.store.list_tasks(query).await.map_err(store_err)
  }

  /// Pending tasks whose scheduled time has passed, earliest first.
  pub async fn due_tasks(&self, limit: Option<usize>) -> Result<Vec<DistributionTask>> {
    self
      .list_tasks(TaskQuery {
        status: Some(TaskStatus::Pending),
        due_before: Some(self.now()),
        limit,
        ..Default::default()
      })
      .await
  }

  /// Record a successful placement and its backlink.
  pub async fn complete_task(&self, task_id: Uuid, placed_url: String) -> Result<TaskCompletion> {
    let now = self.now();
    let task = self.pending_task(task_id).await?;
    let source_domain = base_domain(&placed_url)?;
    let derivative = self
      .store
      .get_derivative(task.derivative_id)
      .await
      .map_err(store_err)?
      .ok_or_else(|| Error::InvalidState(format!("task {task_id} has no derivative")))?;

    let target_url = match &derivative.target_url {
      Some(url) => url.clone(),
      None => self.parent_placement(&derivative).await?.unwrap_or_default(),
    };

    let backlink = Backlink {
      backlink_id:      Uuid::new_v4(),
      user_id:          task.user_id,
      module:           Module::Distribution,
      tier:             task.tier,
      source_url:       placed_url.clone(),
      source_domain,
      target_url,
      anchor_text:      derivative.anchor_text,
      anchor_type:      derivative.anchor_type,
      is_live:          true,
      is_indexed:       false,
      created_at:       now,
      last_checked_at:  None,
      removed_at:       None,
      task_id:          Some(task_id),
      exchange_link_id: None,
    };

    let task = self
      .store
      .complete_task(task_id, placed_url, backlink.clone(), now)
      .await
      .map_err(store_err)?;
    info!(%task_id, article_id = %task.article_id, tier = %task.tier, "task completed");
    self.finish_article_if_done(task.article_id).await?;
    Ok(TaskCompletion { task, backlink })
  }

  pub async fn fail_task(&self, task_id: Uuid, reason: String) -> Result<DistributionTask> {
    let now = self.now();
    self.pending_task(task_id).await?;
    let task = self
      .store
      .fail_task(task_id, reason, now)
      .await
      .map_err(store_err)?;
    warn!(%task_id, article_id = %task.article_id, reason = ?task.failure_reason, "task failed");
    self.finish_article_if_done(task.article_id).await?;
    Ok(task)
  }

  async fn pending_task(&self, task_id: Uuid) -> Result<DistributionTask> {
    let task = self.get_task(task_id).await?;
    if task.status.is_terminal() {
      return Err(Error::InvalidState(format!(
        "task {task_id} is already {}",
        task.status.as_str()
      )));
    }
    Ok(task)
  }

  /// Where the tier-2 parent of `derivative` was placed, if it has been.
  async fn parent_placement(&self, derivative: &Derivative) -> Result<Option<String>> {
    let Some(parent_id) = derivative.parent_derivative_id else {
      return Ok(None);
    };
    let placed = self
      .list_tasks(TaskQuery {
        article_id: Some(derivative.article_id),
        status: Some(TaskStatus::Completed),
        ..Default::default()
      })
      .await?;
    Ok(
      placed
        .into_iter()
        .find(|t| t.derivative_id == parent_id)
        .and_then(|t| t.placed_url),
    )
  }

  async fn finish_article_if_done(&self, article_id: Uuid) -> Result<()> {
    let tasks = self
      .list_tasks(TaskQuery { article_id: Some(article_id), ..Default::default() })
      .await?;
    if !tasks.is_empty() && tasks.iter().all(|t| t.status.is_terminal()) {
      self
        .store
        .set_article_status(article_id, DistributionStatus::Distributed)
        .await
        .map_err(store_err)?;
      info!(%article_id, "article fully distributed");
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;
  use linkmesh_core::anchor::AnchorType;

  use super::*;

  fn derivative(tier: Tier) -> Derivative {
    Derivative {
      derivative_id:        Uuid::new_v4(),
      article_id:           Uuid::nil(),
      user_id:              Uuid::nil(),
      kind:                 DerivativeKind::Summary,
      tier,
      title:                "t".into(),
      body:                 "b".into(),
      excerpt:              "e".into(),
      anchor_text:          "a".into(),
      anchor_type:          AnchorType::Branded,
      target_url:           None,
      target_tier:          Tier::Two,
      parent_derivative_id: None,
      platform_category:    "web2".into(),
      status:               DerivativeStatus::Pending,
      created_at:           Utc::now(),
    }
  }

  fn platform(authority: u32) -> Platform {
    Platform {
      platform_id: Uuid::new_v4(),
      name:        format!("p{authority}"),
      url:         format!("https://p{authority}.example.com"),
      tier:        Tier::Three,
      category:    "web2".into(),
      authority,
      active:      true,
    }
  }

  #[test]
  fn schedule_cycles_platforms_and_spaces_tasks() {
    let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let ds: Vec<_> = (0..3).map(|_| derivative(Tier::Three)).collect();
    let ps = [platform(90), platform(60)];
    let tasks = schedule(&ds, &ps, now, Duration::hours(24), Duration::hours(4));

    let ids: Vec<_> = tasks.iter().map(|t| t.platform_id).collect();
    assert_eq!(ids, [ps[0].platform_id, ps[1].platform_id, ps[0].platform_id]);
    let offsets: Vec<_> = tasks
      .iter()
      .map(|t| (t.scheduled_for - now).num_hours())
      .collect();
    assert_eq!(offsets, [24, 28, 32]);
    assert!(tasks.iter().all(|t| t.priority == Tier::Three.task_priority()));
  }

  #[test]
  fn schedule_without_platforms_is_empty() {
    let ds = [derivative(Tier::Two)];
    let tasks = schedule(&ds, &[], Utc::now(), Duration::zero(), Duration::hours(12));
    assert!(tasks.is_empty());
  }
}
