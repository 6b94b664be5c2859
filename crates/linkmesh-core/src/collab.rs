//! Contracts for the external collaborators the engine consumes: content
//! adaptation, indexation monitoring and risk scoring.
//!
//! Implementations live outside this crate (HTTP clients in the server,
//! fakes in tests), apart from the built-in [`crate::risk`] and
//! [`crate::adapt`] fallbacks.

use std::{future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{anchor::Anchor, content::DerivativeKind, link::Module, tier::Tier};

/// A failed collaborator call.
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
  #[error("timed out after {0:?}")]
  Timeout(Duration),

  #[error("collaborator unavailable: {0}")]
  Unavailable(String),

  /// The collaborator understood the request and refused it; retrying will
  /// not help.
  #[error("collaborator rejected the request: {0}")]
  Rejected(String),
}

impl CollaboratorError {
  pub fn is_retryable(&self) -> bool { !matches!(self, Self::Rejected(_)) }
}

// ─── Content adaptation ──────────────────────────────────────────────────────

/// What the adapted content is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "purpose", rename_all = "snake_case")]
pub enum ContentPurpose {
  /// A tiered derivative of the article.
  Derivative { kind: DerivativeKind },
  /// A contextual paragraph placed on an exchange partner's page.
  Contextual { page_url: String },
}

/// Input to [`ContentAdapter::generate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRequest {
  #[serde(flatten)]
  pub purpose:            ContentPurpose,
  pub tier:               Tier,
  pub title:              String,
  pub body:               String,
  pub primary_keyword:    String,
  pub secondary_keywords: Vec<String>,
  pub site_name:          String,
  pub anchor:             Anchor,
  /// Where the anchor should point. `None` for derivatives that must not
  /// link to the article directly.
  pub target_url:         Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptedContent {
  pub title:   String,
  pub content: String,
  pub excerpt: String,
}

/// Produces adapted title/body/excerpt. May be slow, may fail, may overrun
/// length budgets; callers time out, retry and truncate.
pub trait ContentAdapter: Send + Sync {
  fn generate(
    &self,
    request: ContentRequest,
  ) -> impl Future<Output = Result<AdaptedContent, CollaboratorError>> + Send + '_;
}

// ─── Indexation monitor ──────────────────────────────────────────────────────

/// A placed link to verify.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthProbe {
  pub link_id:    Uuid,
  /// The page carrying the link.
  pub page_url:   String,
  /// The URL the link should point at; empty for a liveness-only check.
  pub target_url: String,
  pub module:     Module,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
  pub is_live:    bool,
  pub is_indexed: bool,
}

pub trait IndexationMonitor: Send + Sync {
  fn check_health(
    &self,
    probe: HealthProbe,
  ) -> impl Future<Output = Result<HealthReport, CollaboratorError>> + Send + '_;
}

// ─── Risk scoring ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
  pub is_eligible: bool,
  pub reason:      Option<String>,
}

impl Eligibility {
  pub fn eligible() -> Self { Self { is_eligible: true, reason: None } }

  pub fn ineligible(reason: impl Into<String>) -> Self {
    Self { is_eligible: false, reason: Some(reason.into()) }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DomainScore {
  /// 0–100, higher is riskier.
  pub risk_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageScore {
  /// 0–100, higher is better.
  pub page_score:   f64,
  pub domain_score: DomainScore,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditRequest {
  pub domain:        String,
  pub authority:     u32,
  pub is_reciprocal: bool,
  pub hop_distance:  u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditQuote {
  pub base_credits:  i64,
  pub final_credits: i64,
}

/// Screens domains and prices links. Higher authority and lower risk must
/// raise the credit value; ineligible domains must never enter inventory or
/// matching.
pub trait RiskScorer: Send + Sync {
  fn check_eligibility(
    &self,
    domain: String,
    module: Module,
  ) -> impl Future<Output = Result<Eligibility, CollaboratorError>> + Send + '_;

  fn score_page(
    &self,
    url: String,
  ) -> impl Future<Output = Result<PageScore, CollaboratorError>> + Send + '_;

  fn calculate_credit_value(
    &self,
    request: CreditRequest,
  ) -> impl Future<Output = Result<CreditQuote, CollaboratorError>> + Send + '_;
}
