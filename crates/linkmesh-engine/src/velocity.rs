//! Per-tier placement gates: a UTC daily cap and a minimum spacing between
//! placements.
//!
//! Both gates are advisory. Nothing here takes a lock; a caller that loses a
//! race by a few seconds simply places one link early.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use linkmesh_core::{
  store::LinkStore,
  tier::{LinkSettings, Tier},
};

use crate::{Backends, Engine, Result, error::store_err};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VelocityCheck {
  pub allowed:           bool,
  pub reason:            Option<String>,
  /// Earliest instant both gates would pass; set only when refused.
  pub next_available_at: Option<DateTime<Utc>>,
  pub today_count:       u32,
  pub daily_cap:         u32,
}

/// Midnight UTC of the day containing `now`.
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
  now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Evaluate both gates for one tier.
pub fn evaluate(
  settings: &LinkSettings,
  tier: Tier,
  today_count: u32,
  latest: Option<DateTime<Utc>>,
  now: DateTime<Utc>,
) -> VelocityCheck {
  let daily_cap = settings.daily_caps.get(tier);
  let spacing = Duration::hours(i64::from(settings.velocity_hours.get(tier)));

  let mut reasons = Vec::new();
  let mut next: Option<DateTime<Utc>> = None;

  if today_count >= daily_cap {
    reasons.push(format!("daily cap of {daily_cap} {tier} links reached"));
    next = Some(start_of_day(now) + Duration::days(1));
  }

  if let Some(latest) = latest {
    let ready_at = latest + spacing;
    if ready_at > now {
      reasons.push(format!(
        "minimum spacing of {}h since the last {tier} link not met",
        spacing.num_hours()
      ));
      next = Some(next.map_or(ready_at, |n| n.max(ready_at)));
    }
  }

  VelocityCheck {
    allowed: reasons.is_empty(),
    reason: (!reasons.is_empty()).then(|| reasons.join("; ")),
    next_available_at: next,
    today_count,
    daily_cap,
  }
}

impl<B: Backends> Engine<B> {
  /// The user's stored settings, or the defaults.
  pub async fn link_settings(&self, user_id: Uuid) -> Result<LinkSettings> {
    Ok(
      self
        .store
        .get_settings(user_id)
        .await
        .map_err(store_err)?
        .unwrap_or_default(),
    )
  }

  pub async fn update_link_settings(
    &self,
    user_id: Uuid,
    settings: LinkSettings,
  ) -> Result<LinkSettings> {
    self
      .store
      .put_settings(user_id, settings)
      .await
      .map_err(store_err)?;
    Ok(settings)
  }

  pub async fn check_velocity(&self, user_id: Uuid, tier: Tier) -> Result<VelocityCheck> {
    let now = self.now();
    let settings = self.link_settings(user_id).await?;
    let today_count = self
      .store
      .count_backlinks_since(user_id, tier, start_of_day(now))
      .await
      .map_err(store_err)?;
    let latest = self
      .store
      .latest_backlink(user_id, tier)
      .await
      .map_err(store_err)?
      .map(|b| b.created_at);

    let check = evaluate(&settings, tier, today_count, latest, now);
    debug!(%user_id, %tier, allowed = check.allowed, today_count, "velocity check");
    Ok(check)
  }
}
