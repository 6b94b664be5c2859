//! Server configuration: a TOML file layered with `LINKMESH__*` environment
//! variables. Every field has a default, so an empty file is valid.

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File, FileFormat};
use linkmesh_core::{config::EngineConfig, risk::RiskConfig};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host:       String,
  pub port:       u16,
  pub store_path: PathBuf,
  pub content:    ContentConfig,
  pub monitor:    MonitorConfig,
  pub jobs:       JobsConfig,
  pub risk:       RiskConfig,
  pub engine:     EngineConfig,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:       "127.0.0.1".into(),
      port:       8640,
      store_path: PathBuf::from("~/.local/share/linkmesh/linkmesh.db"),
      content:    ContentConfig::default(),
      monitor:    MonitorConfig::default(),
      jobs:       JobsConfig::default(),
      risk:       RiskConfig::default(),
      engine:     EngineConfig::default(),
    }
  }
}

/// Remote content adaptation. Without an endpoint the built-in extractive
/// adapter is used.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
  pub endpoint:     Option<String>,
  pub timeout_secs: u64,
}

impl Default for ContentConfig {
  fn default() -> Self { Self { endpoint: None, timeout_secs: 30 } }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
  pub user_agent:   String,
  pub timeout_secs: u64,
}

impl Default for MonitorConfig {
  fn default() -> Self {
    Self {
      user_agent:   concat!("linkmesh/", env!("CARGO_PKG_VERSION")).into(),
      timeout_secs: 15,
    }
  }
}

/// Periods of the background job loops, in seconds. Zero disables a loop.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
  pub settlement_secs: u64,
  pub decay_secs:      u64,
  pub reconcile_secs:  u64,
  pub health_secs:     u64,
  pub health_batch:    usize,
}

impl Default for JobsConfig {
  fn default() -> Self {
    Self {
      settlement_secs: 60 * 60,
      decay_secs:      24 * 60 * 60,
      reconcile_secs:  6 * 60 * 60,
      health_secs:     30 * 60,
      health_batch:    50,
    }
  }
}

impl ServerConfig {
  /// Read `path` (optional) and the environment.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    Config::builder()
      .add_source(File::from(path).required(false))
      .add_source(Environment::with_prefix("LINKMESH").separator("__"))
      .build()?
      .try_deserialize()
  }

  /// Parse a TOML document without consulting the environment.
  pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
    Config::builder()
      .add_source(File::from_str(source, FileFormat::Toml))
      .build()?
      .try_deserialize()
  }

  /// `store_path` with a leading `~` expanded.
  pub fn resolved_store_path(&self) -> PathBuf { expand_tilde(&self.store_path) }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_document_is_all_defaults() {
    let cfg = ServerConfig::from_toml("").unwrap();
    assert_eq!(cfg.port, 8640);
    assert!(cfg.content.endpoint.is_none());
    assert_eq!(cfg.jobs.health_batch, 50);
    assert_eq!(cfg.engine.exchange.min_hop_distance, 3);
  }

  #[test]
  fn nested_sections_override_single_fields() {
    let cfg = ServerConfig::from_toml(
      r#"
        port = 9000

        [content]
        endpoint = "http://localhost:7070/adapt"

        [jobs]
        decay_secs = 0

        [engine.settlement]
        grace_days = 14
      "#,
    )
    .unwrap();
    assert_eq!(cfg.port, 9000);
    assert_eq!(cfg.content.endpoint.as_deref(), Some("http://localhost:7070/adapt"));
    assert_eq!(cfg.content.timeout_secs, 30);
    assert_eq!(cfg.jobs.decay_secs, 0);
    assert_eq!(cfg.jobs.settlement_secs, 3600);
    assert_eq!(cfg.engine.settlement.grace_days, 14);
    assert_eq!(cfg.engine.settlement.batch_size, 100);
  }

  #[test]
  fn tilde_expands_against_home() {
    let Ok(home) = std::env::var("HOME") else { return };
    let expanded = expand_tilde(Path::new("~/data/linkmesh.db"));
    assert_eq!(expanded, PathBuf::from(home).join("data/linkmesh.db"));
    assert_eq!(expand_tilde(Path::new("/var/db")), PathBuf::from("/var/db"));
  }
}
