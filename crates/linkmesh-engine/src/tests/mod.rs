//! Engine tests against an in-memory `SqliteStore` and in-process fake
//! collaborators.

mod distribution;
mod exchange;
mod jobs;

use std::{
  collections::{HashMap, HashSet},
  sync::{Arc, Mutex},
};

use chrono::{DateTime, Duration, TimeZone, Utc};
use linkmesh_core::{
  adapt::ExtractiveAdapter,
  anchor::AnchorSelector,
  collab::{
    AdaptedContent, CollaboratorError, ContentAdapter, ContentPurpose, ContentRequest,
    CreditQuote, CreditRequest, DomainScore, Eligibility, HealthProbe, HealthReport,
    IndexationMonitor, PageScore, RiskScorer,
  },
  config::EngineConfig,
  content::{Article, DerivativeKind, Platform},
  exchange::InventoryItem,
  link::Module,
  tier::Tier,
};
use linkmesh_store_sqlite::SqliteStore;
use uuid::Uuid;

use crate::{
  Backends, Clock, Engine,
  catalog::{NewArticle, NewPlatform, NewSite},
  exchange::NewInventory,
};

// ─── Fakes ───────────────────────────────────────────────────────────────────

/// Extractive content, except for kinds scripted to fail.
#[derive(Default)]
pub struct FakeContent {
  pub failing: HashSet<DerivativeKind>,
}

impl ContentAdapter for FakeContent {
  async fn generate(
    &self,
    request: ContentRequest,
  ) -> Result<AdaptedContent, CollaboratorError> {
    if let ContentPurpose::Derivative { kind } = &request.purpose {
      if self.failing.contains(kind) {
        return Err(CollaboratorError::Rejected(format!("{} unsupported", kind.as_str())));
      }
    }
    ExtractiveAdapter::default().generate(request).await
  }
}

/// Every domain is eligible except those listed; every link costs `credits`.
pub struct FixedRisk {
  pub blocked: HashSet<String>,
  pub credits: i64,
}

impl Default for FixedRisk {
  fn default() -> Self {
    Self { blocked: HashSet::from(["spam-links.com".to_owned()]), credits: 10 }
  }
}

impl RiskScorer for FixedRisk {
  async fn check_eligibility(
    &self,
    domain: String,
    _module: Module,
  ) -> Result<Eligibility, CollaboratorError> {
    Ok(if self.blocked.contains(&domain) {
      Eligibility::ineligible(format!("{domain} is blocked"))
    } else {
      Eligibility::eligible()
    })
  }

  async fn score_page(&self, _url: String) -> Result<PageScore, CollaboratorError> {
    Ok(PageScore { page_score: 80.0, domain_score: DomainScore { risk_score: 10.0 } })
  }

  async fn calculate_credit_value(
    &self,
    _request: CreditRequest,
  ) -> Result<CreditQuote, CollaboratorError> {
    Ok(CreditQuote { base_credits: self.credits, final_credits: self.credits })
  }
}

/// Live and indexed unless a page URL has been scripted otherwise.
#[derive(Clone, Default)]
pub struct ScriptedMonitor {
  script: Arc<Mutex<HashMap<String, Result<HealthReport, CollaboratorError>>>>,
}

impl ScriptedMonitor {
  pub fn set(&self, page_url: &str, result: Result<HealthReport, CollaboratorError>) {
    self
      .script
      .lock()
      .unwrap()
      .insert(page_url.to_owned(), result);
  }

  pub fn dead(&self, page_url: &str) {
    self.set(page_url, Ok(HealthReport { is_live: false, is_indexed: false }));
  }
}

impl IndexationMonitor for ScriptedMonitor {
  async fn check_health(&self, probe: HealthProbe) -> Result<HealthReport, CollaboratorError> {
    self
      .script
      .lock()
      .unwrap()
      .get(&probe.page_url)
      .cloned()
      .unwrap_or(Ok(HealthReport { is_live: true, is_indexed: true }))
  }
}

pub struct Fakes;

impl Backends for Fakes {
  type Store = SqliteStore;
  type Content = FakeContent;
  type Risk = FixedRisk;
  type Monitor = ScriptedMonitor;
}

// ─── Clock ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct TestClock(Arc<Mutex<DateTime<Utc>>>);

impl TestClock {
  pub fn new(at: DateTime<Utc>) -> Self { Self(Arc::new(Mutex::new(at))) }

  pub fn now(&self) -> DateTime<Utc> { *self.0.lock().unwrap() }

  pub fn set(&self, at: DateTime<Utc>) { *self.0.lock().unwrap() = at; }

  pub fn advance(&self, by: Duration) {
    let next = self.now() + by;
    self.set(next);
  }

  pub fn clock(&self) -> Clock {
    let inner = Arc::clone(&self.0);
    Arc::new(move || *inner.lock().unwrap())
  }
}

pub fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap() }

// ─── Harness ─────────────────────────────────────────────────────────────────

pub struct Harness {
  pub engine:  Engine<Fakes>,
  pub clock:   TestClock,
  pub monitor: ScriptedMonitor,
}

pub async fn harness() -> Harness { harness_with(EngineConfig::default(), FakeContent::default()).await }

pub async fn harness_with(config: EngineConfig, content: FakeContent) -> Harness {
  let store = SqliteStore::open_in_memory().await.expect("in-memory store");
  let clock = TestClock::new(t0());
  let monitor = ScriptedMonitor::default();
  let engine = Engine::<Fakes>::new(store, content, FixedRisk::default(), monitor.clone(), config)
    .with_anchor_selector(AnchorSelector::seeded(7))
    .with_clock(clock.clock());
  Harness { engine, clock, monitor }
}

// ─── Fixtures ────────────────────────────────────────────────────────────────

impl Harness {
  pub async fn article(&self, user_id: Uuid) -> Article {
    let site = self
      .engine
      .create_site(NewSite {
        user_id,
        name: "Site Co".into(),
        domain: "site.com".into(),
      })
      .await
      .unwrap();
    self
      .engine
      .create_article(NewArticle {
        site_id:            site.site_id,
        title:              "Trail running in winter".into(),
        body:               "Cold air changes everything. Layer up! Hydrate often.\n\n\
                             Pick shoes with grip."
          .into(),
        primary_keyword:    "trail running".into(),
        secondary_keywords: vec!["winter".into()],
        target_url:         "https://site.com/blog/a".into(),
      })
      .await
      .unwrap()
  }

  /// `n` active platforms at `tier`, authority descending from 90.
  pub async fn platforms(&self, tier: Tier, n: u32) -> Vec<Platform> {
    let mut out = Vec::new();
    for i in 0..n {
      let p = self
        .engine
        .upsert_platform(NewPlatform {
          platform_id: None,
          name:        format!("{tier}-{i}"),
          url:         format!("https://{tier}-p{i}.com"),
          tier,
          category:    "blog".into(),
          authority:   90 - i * 10,
          active:      true,
        })
        .await
        .unwrap();
      out.push(p);
    }
    out
  }

  pub async fn fund(&self, user_id: Uuid, credits: i64) {
    self
      .engine
      .grant_bonus(user_id, credits, "test funding".into())
      .await
      .unwrap();
  }

  pub async fn inventory(&self, owner_id: Uuid, domain: &str, max: u32) -> InventoryItem {
    self
      .engine
      .add_inventory(NewInventory {
        owner_id,
        page_url: format!("https://{domain}/resources"),
        authority: 50,
        tier: Tier::Two,
        max_outbound_links: max,
      })
      .await
      .unwrap()
  }
}
