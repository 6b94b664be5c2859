//! Batch jobs: one-shot runs for the CLI and the timer loops for `serve`.

use std::time::Duration;

use linkmesh_core::link::Module;
use linkmesh_engine::{
  Backends, Engine, Result,
  decay::DecayReport,
  health::HealthBatchReport,
  reconcile::ReconcileReport,
  settlement::SettlementReport,
};
use serde::Serialize;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{error, info};

use crate::config::JobsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
  Settlement,
  Decay,
  Reconcile,
  Health { module: Module, batch_size: usize },
}

impl Job {
  pub fn name(&self) -> &'static str {
    match self {
      Self::Settlement => "settlement",
      Self::Decay => "decay",
      Self::Reconcile => "reconcile",
      Self::Health { module: Module::Distribution, .. } => "health:distribution",
      Self::Health { module: Module::Exchange, .. } => "health:exchange",
    }
  }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum JobReport {
  Settlement(SettlementReport),
  Decay(DecayReport),
  Reconcile(ReconcileReport),
  Health(HealthBatchReport),
}

pub async fn run<B: Backends>(engine: &Engine<B>, job: Job) -> Result<JobReport> {
  Ok(match job {
    Job::Settlement => JobReport::Settlement(engine.run_settlement().await?),
    Job::Decay => JobReport::Decay(engine.run_decay().await?),
    Job::Reconcile => JobReport::Reconcile(engine.run_reconciliation().await?),
    Job::Health { module, batch_size } => {
      JobReport::Health(engine.run_health_check_batch(module, batch_size).await?)
    }
  })
}

/// The enabled jobs with their periods.
pub fn schedule(cfg: &JobsConfig) -> Vec<(Job, Duration)> {
  let health = |module| Job::Health { module, batch_size: cfg.health_batch.max(1) };
  [
    (Job::Settlement, cfg.settlement_secs),
    (Job::Decay, cfg.decay_secs),
    (Job::Reconcile, cfg.reconcile_secs),
    (health(Module::Distribution), cfg.health_secs),
    (health(Module::Exchange), cfg.health_secs),
  ]
  .into_iter()
  .filter(|(_, secs)| *secs > 0)
  .map(|(job, secs)| (job, Duration::from_secs(secs)))
  .collect()
}

/// Start one loop per enabled job. A failed run is logged and the loop
/// carries on at the next tick.
pub fn spawn<B: Backends>(engine: Engine<B>, cfg: &JobsConfig) -> Vec<JoinHandle<()>> {
  schedule(cfg)
    .into_iter()
    .map(|(job, period)| {
      let engine = engine.clone();
      info!(job = job.name(), period_secs = period.as_secs(), "job scheduled");
      tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
          ticker.tick().await;
          if let Err(e) = run(&engine, job).await {
            error!(job = job.name(), error = %e, "job failed");
          }
        }
      })
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_periods_disable_jobs() {
    let cfg = JobsConfig { decay_secs: 0, health_secs: 0, ..JobsConfig::default() };
    let names: Vec<&str> = schedule(&cfg).iter().map(|(j, _)| j.name()).collect();
    assert_eq!(names, ["settlement", "reconcile"]);
  }

  #[test]
  fn health_sweeps_cover_both_modules() {
    let jobs = schedule(&JobsConfig::default());
    assert_eq!(jobs.len(), 5);
    assert!(jobs.iter().any(|(j, _)| j.name() == "health:distribution"));
    assert!(jobs.iter().any(|(j, _)| j.name() == "health:exchange"));
  }
}
