use async_graphql::SimpleObject;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fleet::{FleetSnapshot, NodeIntent};
use super::intent::IntentRecord;
use super::policy::{is_cluster_active, is_gated};
use super::reconciler::PassSummary;

#[derive(Debug, Clone, Serialize, Deserialize, SimpleObject)]
pub struct DaemonHealth {
    pub version: String,
    pub uptime_secs: u64,
    pub node_count: u64,
    pub max_cluster_active: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, SimpleObject)]
pub struct FleetStatus {
    pub max_cluster_active: u64,
    pub cluster_active: u64,
    pub cluster_count: u64,
    pub faulted: Vec<String>,
}

impl FleetStatus {
    pub fn new(snapshot: FleetSnapshot, max_cluster_active: usize) -> Self {
        Self {
            max_cluster_active: max_cluster_active as u64,
            cluster_active: snapshot.cluster_active as u64,
            cluster_count: snapshot.cluster_count as u64,
            faulted: snapshot.faulted,
        }
    }
}

/// A node's intent with its classification, for display.
#[derive(Debug, Clone, Serialize, Deserialize, SimpleObject)]
pub struct NodeView {
    pub name: String,
    pub state: String,
    pub update_available: Option<String>,
    /// Decoded display form; absent when the record is invalid.
    pub display: Option<String>,
    pub active: Option<bool>,
    pub gated: Option<bool>,
    pub fault: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&NodeIntent> for NodeView {
    fn from(node: &NodeIntent) -> Self {
        let decoded = node.decode();
        let intent = decoded.as_ref().ok();
        Self {
            name: node.name.clone(),
            state: node.intent.state.clone(),
            update_available: node.intent.update_available.clone(),
            display: intent.map(|i| i.display_string()),
            active: intent.map(is_cluster_active),
            gated: intent.map(is_gated),
            fault: decoded.as_ref().err().map(|e| e.to_string()),
            updated_at: node.updated_at,
        }
    }
}

/// Ad-hoc admission check against caller-supplied counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    pub intent: IntentRecord,
    pub cluster_active: usize,
    pub cluster_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, SimpleObject)]
pub struct CheckResponse {
    pub intent: String,
    pub gated: bool,
    pub permit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, SimpleObject)]
pub struct ReconcileResult {
    pub advanced: u64,
    pub deferred: u64,
    pub faulted: u64,
    pub idle: u64,
}

impl From<PassSummary> for ReconcileResult {
    fn from(summary: PassSummary) -> Self {
        Self {
            advanced: summary.advanced as u64,
            deferred: summary.deferred as u64,
            faulted: summary.faulted as u64,
            idle: summary.idle as u64,
        }
    }
}
