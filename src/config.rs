use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "CADENCE_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub daemon: DaemonConfig,
    pub policy: PolicyConfig,
    /// Named daemons reachable by `cadence query --daemon <name>`.
    pub nodes: HashMap<String, NodeTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub http_addr: String,
    pub log_level: String,
    /// Seconds between reconciliation passes.
    pub reconcile_interval_secs: u64,
    /// Fleet state file. Unset keeps the fleet in memory only.
    pub state_file: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:9200".to_string(),
            log_level: "info".to_string(),
            reconcile_interval_secs: 30,
            state_file: dirs::data_local_dir().map(|dir| {
                dir.join("cadence")
                    .join("fleet.json")
                    .display()
                    .to_string()
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Maximum number of nodes allowed to be active at once.
    pub max_cluster_active: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_cluster_active: 1,
        }
    }
}

impl PolicyConfig {
    pub fn max_cluster_active(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.max_cluster_active)
            .context("policy.max_cluster_active must be a positive integer")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTarget {
    pub url: String,
}

impl Config {
    pub fn path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("could not determine config directory")?;
        Ok(config_dir.join("cadence").join("config.yaml"))
    }
}

/// Load the default config file (if present) layered with `CADENCE_*` env vars.
pub fn load() -> Result<Config> {
    load_from(&Config::path()?)
}

/// Load an explicitly named config file; it must exist.
pub fn load_required(path: &Path) -> Result<Config> {
    if !path.exists() {
        bail!("config file {} not found", path.display());
    }
    load_from(path)
}

fn load_from(path: &Path) -> Result<Config> {
    let config: Config = Figment::from(Serialized::defaults(Config::default()))
        .merge(Yaml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .with_context(|| format!("parsing {}", path.display()))?;

    config.policy.max_cluster_active()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_default_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_from(&dir.path().join("config.yaml")).unwrap();
        assert_eq!(config.policy.max_cluster_active, 1);
        assert_eq!(config.daemon.reconcile_interval_secs, 30);
        assert!(config.nodes.is_empty());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "daemon:\n  http_addr: \"0.0.0.0:9300\"\npolicy:\n  max_cluster_active: 3\nnodes:\n  edge:\n    url: http://edge:9200\n",
        )
        .unwrap();

        let config = load_required(&path).unwrap();
        assert_eq!(config.daemon.http_addr, "0.0.0.0:9300");
        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.policy.max_cluster_active().unwrap().get(), 3);
        assert_eq!(config.nodes["edge"].url, "http://edge:9200");
    }

    #[test]
    fn zero_max_cluster_active_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "policy:\n  max_cluster_active: 0\n").unwrap();
        assert!(load_required(&path).is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_required(&dir.path().join("absent.yaml")).is_err());
    }
}
