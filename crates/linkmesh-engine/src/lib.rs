//! The linkmesh engine: tiered content distribution and the peer link
//! exchange, built over a [`linkmesh_core::store::LinkStore`] and the three
//! external collaborators (content adaptation, indexation monitoring, risk
//! scoring).
//!
//! Every operation hangs off [`Engine`]. Request-scoped operations
//! (distribution, matching, exchange execution) and the periodic batch jobs
//! (settlement, decay, reconciliation, health sweep) share one instance.

#![allow(async_fn_in_trait)]

pub mod analytics;
pub mod anchors;
pub mod catalog;
pub mod decay;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod graph;
pub mod health;
pub mod reconcile;
pub mod retry;
pub mod settlement;
pub mod velocity;

pub use engine::{Backends, Clock, Engine};
pub use error::{Error, Result};

#[cfg(test)]
mod tests;
