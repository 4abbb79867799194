//! Fleet state file: checksummed, generation-ordered, replaced atomically.
//!
//! Persists the fleet's node intents so the daemon resumes with the same
//! view of the fleet after a restart. Every stored fleet carries the
//! registry generation it was captured at; a write older than the last one
//! on disk is dropped, so concurrent mutations never regress the file.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::fleet::NodeIntent;

/// Node intents wrapped with integrity metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFleet {
    /// SHA-256 checksum of the serialized nodes: "sha256:<hex>"
    pub checksum: String,
    /// Registry mutation counter at capture time.
    #[serde(default)]
    pub generation: u64,
    pub saved_at: DateTime<Utc>,
    pub nodes: Vec<NodeIntent>,
}

impl StoredFleet {
    pub fn new(generation: u64, nodes: Vec<NodeIntent>) -> Self {
        let checksum = Self::digest(&nodes);
        Self {
            checksum,
            generation,
            saved_at: Utc::now(),
            nodes,
        }
    }

    /// Verify the checksum matches the node data.
    pub fn verify(&self) -> bool {
        self.checksum == Self::digest(&self.nodes)
    }

    fn digest(nodes: &[NodeIntent]) -> String {
        let serialized = serde_json::to_string(nodes).unwrap_or_default();
        format!("sha256:{:x}", Sha256::digest(serialized.as_bytes()))
    }
}

pub struct FleetStore {
    path: PathBuf,
    /// Generation of the last fleet written; also serializes writers.
    written: Mutex<u64>,
}

impl FleetStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            written: Mutex::new(0),
        }
    }

    /// Write the fleet unless a newer generation is already on disk.
    /// Returns whether the file was replaced.
    pub async fn write(&self, stored: &StoredFleet) -> Result<bool> {
        let mut written = self.written.lock().await;
        if stored.generation <= *written {
            debug!(
                generation = stored.generation,
                written = *written,
                "skipping stale fleet state write"
            );
            return Ok(false);
        }

        let bytes = serde_json::to_vec_pretty(stored).context("encoding fleet state")?;
        replace_atomically(&self.path, &bytes).await?;
        *written = stored.generation;
        Ok(true)
    }

    /// Load and verify the fleet. The generation read becomes the floor for
    /// later writes.
    pub async fn read(&self) -> Result<StoredFleet> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        let stored = decode(&bytes).with_context(|| format!("loading {}", self.path.display()))?;

        let mut written = self.written.lock().await;
        *written = (*written).max(stored.generation);
        Ok(stored)
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

fn decode(bytes: &[u8]) -> Result<StoredFleet> {
    let stored: StoredFleet = serde_json::from_slice(bytes).context("malformed fleet state")?;
    if !stored.verify() {
        warn!(checksum = %stored.checksum, "fleet state checksum mismatch");
        bail!("checksum does not match node data");
    }
    Ok(stored)
}

/// Readers only ever see the old file or the complete new one.
async fn replace_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
    }
    let staging = path.with_extension("json.tmp");
    tokio::fs::write(&staging, bytes)
        .await
        .with_context(|| format!("writing {}", staging.display()))?;
    tokio::fs::rename(&staging, path)
        .await
        .with_context(|| format!("moving {} into place", staging.display()))
}
