//! The [`Engine`] bundle: one store, three collaborators, the anchor
//! selector, configuration and a clock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use linkmesh_core::{
  anchor::AnchorSelector,
  collab::{ContentAdapter, IndexationMonitor, RiskScorer},
  config::EngineConfig,
  store::LinkStore,
};

/// The concrete types an [`Engine`] runs on. Implemented by a marker type
/// per deployment (the server binary, the test fakes).
pub trait Backends: Send + Sync + 'static {
  type Store: LinkStore + 'static;
  type Content: ContentAdapter + 'static;
  type Risk: RiskScorer + 'static;
  type Monitor: IndexationMonitor + 'static;
}

/// Source of the current time. Every operation reads the clock once and
/// threads that instant through.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct Engine<B: Backends> {
  pub(crate) store:   Arc<B::Store>,
  pub(crate) content: Arc<B::Content>,
  pub(crate) risk:    Arc<B::Risk>,
  pub(crate) monitor: Arc<B::Monitor>,
  pub(crate) anchors: Arc<AnchorSelector>,
  pub(crate) config:  Arc<EngineConfig>,
  clock:              Clock,
}

impl<B: Backends> Clone for Engine<B> {
  fn clone(&self) -> Self {
    Self {
      store:   Arc::clone(&self.store),
      content: Arc::clone(&self.content),
      risk:    Arc::clone(&self.risk),
      monitor: Arc::clone(&self.monitor),
      anchors: Arc::clone(&self.anchors),
      config:  Arc::clone(&self.config),
      clock:   Arc::clone(&self.clock),
    }
  }
}

impl<B: Backends> Engine<B> {
  pub fn new(
    store: B::Store,
    content: B::Content,
    risk: B::Risk,
    monitor: B::Monitor,
    config: EngineConfig,
  ) -> Self {
    Self {
      store:   Arc::new(store),
      content: Arc::new(content),
      risk:    Arc::new(risk),
      monitor: Arc::new(monitor),
      anchors: Arc::new(AnchorSelector::from_entropy()),
      config:  Arc::new(config),
      clock:   Arc::new(Utc::now),
    }
  }

  pub fn with_anchor_selector(mut self, selector: AnchorSelector) -> Self {
    self.anchors = Arc::new(selector);
    self
  }

  pub fn with_clock(mut self, clock: Clock) -> Self {
    self.clock = clock;
    self
  }

  pub fn store(&self) -> &B::Store { &self.store }

  pub fn config(&self) -> &EngineConfig { &self.config }

  pub fn now(&self) -> DateTime<Utc> { (self.clock)() }
}
