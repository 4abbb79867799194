use anyhow::Result;
use std::path::Path;

use crate::config;

pub fn run(
    http_addr: Option<String>,
    log_level: Option<String>,
    max_cluster_active: Option<usize>,
    config_path: Option<String>,
) -> Result<()> {
    // Load config from file (custom path or default)
    let mut cfg = match config_path {
        Some(path) => config::load_required(Path::new(&path))?,
        None => config::load()?,
    };

    // CLI flags override config values
    if let Some(addr) = http_addr {
        cfg.daemon.http_addr = addr;
    }
    if let Some(level) = log_level {
        cfg.daemon.log_level = level;
    }
    if let Some(max) = max_cluster_active {
        cfg.policy.max_cluster_active = max;
    }

    // Build tokio runtime explicitly (no #[tokio::main] on fn main)
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(crate::server::run(cfg.daemon, cfg.policy))
}
