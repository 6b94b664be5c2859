//! Articles, their tiered derivatives, target platforms and the scheduled
//! tasks that bind a derivative to a platform.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, anchor::AnchorType, tier::Tier};

// ─── Sites and articles ──────────────────────────────────────────────────────

/// A user's own website; the brand used for branded anchors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
  pub site_id:    Uuid,
  pub user_id:    Uuid,
  pub name:       String,
  pub domain:     String,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStatus {
  #[default]
  NotStarted,
  Distributing,
  Distributed,
}

impl DistributionStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::NotStarted => "not_started",
      Self::Distributing => "distributing",
      Self::Distributed => "distributed",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "not_started" => Ok(Self::NotStarted),
      "distributing" => Ok(Self::Distributing),
      "distributed" => Ok(Self::Distributed),
      other => Err(Error::unknown("distribution status", other)),
    }
  }
}

/// A published article (tier 1). Content fields never change once the
/// article has been distributed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
  pub article_id:          Uuid,
  pub site_id:             Uuid,
  pub user_id:             Uuid,
  pub title:               String,
  pub body:                String,
  pub primary_keyword:     String,
  pub secondary_keywords:  Vec<String>,
  pub target_url:          String,
  pub distribution_status: DistributionStatus,
  pub created_at:          DateTime<Utc>,
}

// ─── Derivatives ─────────────────────────────────────────────────────────────

/// The seven adaptation kinds. Each is bound to exactly one tier.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DerivativeKind {
  Syndication,
  Opinion,
  Listicle,
  Summary,
  Snippet,
  Abstract,
  SocialPost,
}

impl DerivativeKind {
  pub const ALL: [DerivativeKind; 7] = [
    DerivativeKind::Syndication,
    DerivativeKind::Opinion,
    DerivativeKind::Listicle,
    DerivativeKind::Summary,
    DerivativeKind::Snippet,
    DerivativeKind::Abstract,
    DerivativeKind::SocialPost,
  ];

  pub fn tier(self) -> Tier {
    match self {
      Self::Syndication | Self::Opinion | Self::Listicle => Tier::Two,
      Self::Summary | Self::Snippet | Self::Abstract | Self::SocialPost => Tier::Three,
    }
  }

  /// The platform category this kind is written for.
  pub fn platform_category(self) -> &'static str {
    match self {
      Self::Syndication => "publishing",
      Self::Opinion | Self::Listicle => "blog",
      Self::Summary => "web2",
      Self::Snippet => "bookmark",
      Self::Abstract => "document",
      Self::SocialPost => "social",
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Syndication => "syndication",
      Self::Opinion => "opinion",
      Self::Listicle => "listicle",
      Self::Summary => "summary",
      Self::Snippet => "snippet",
      Self::Abstract => "abstract",
      Self::SocialPost => "social_post",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|k| k.as_str() == s)
      .ok_or_else(|| Error::unknown("derivative kind", s))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivativeStatus {
  Pending,
  Placed,
  Failed,
}

impl DerivativeStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Placed => "placed",
      Self::Failed => "failed",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "pending" => Ok(Self::Pending),
      "placed" => Ok(Self::Placed),
      "failed" => Ok(Self::Failed),
      other => Err(Error::unknown("derivative status", other)),
    }
  }
}

/// A generated adaptation of an article for one platform tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Derivative {
  pub derivative_id:        Uuid,
  pub article_id:           Uuid,
  pub user_id:              Uuid,
  pub kind:                 DerivativeKind,
  pub tier:                 Tier,
  pub title:                String,
  pub body:                 String,
  pub excerpt:              String,
  pub anchor_text:          String,
  pub anchor_type:          AnchorType,
  /// Set only when this derivative links straight to the article.
  pub target_url:           Option<String>,
  pub target_tier:          Tier,
  /// The tier-2 derivative a tier-3 derivative links to.
  pub parent_derivative_id: Option<Uuid>,
  pub platform_category:    String,
  pub status:               DerivativeStatus,
  pub created_at:           DateTime<Utc>,
}

// ─── Platforms ───────────────────────────────────────────────────────────────

/// A third-party site that accepts placements at one tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Platform {
  pub platform_id: Uuid,
  pub name:        String,
  pub url:         String,
  pub tier:        Tier,
  pub category:    String,
  /// 0–100.
  pub authority:   u32,
  pub active:      bool,
}

// ─── Tasks ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
  Pending,
  Completed,
  Failed,
}

impl TaskStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Completed => "completed",
      Self::Failed => "failed",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "pending" => Ok(Self::Pending),
      "completed" => Ok(Self::Completed),
      "failed" => Ok(Self::Failed),
      other => Err(Error::unknown("task status", other)),
    }
  }

  pub fn is_terminal(self) -> bool { !matches!(self, Self::Pending) }

  /// The derivative status implied by a task reaching `self`.
  pub fn derivative_status(self) -> DerivativeStatus {
    match self {
      Self::Pending => DerivativeStatus::Pending,
      Self::Completed => DerivativeStatus::Placed,
      Self::Failed => DerivativeStatus::Failed,
    }
  }
}

/// A scheduled placement of one derivative on one platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionTask {
  pub task_id:        Uuid,
  pub derivative_id:  Uuid,
  pub article_id:     Uuid,
  pub user_id:        Uuid,
  pub platform_id:    Uuid,
  pub tier:           Tier,
  pub scheduled_for:  DateTime<Utc>,
  pub priority:       i32,
  pub status:         TaskStatus,
  pub placed_url:     Option<String>,
  pub failure_reason: Option<String>,
  pub created_at:     DateTime<Utc>,
  pub finished_at:    Option<DateTime<Utc>>,
}
