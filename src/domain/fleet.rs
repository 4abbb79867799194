//! Fleet registry and active-count aggregation.
//!
//! Node agents write their intents here in the propagated record form; the
//! reconciler reads them back, and [`FleetSnapshot`] aggregates the fleet-wide
//! counts the admission policy consumes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::fleet_store::{FleetStore, StoredFleet};
use super::intent::{Intent, IntentError, IntentRecord, Trigger};
use super::policy::is_cluster_active;

/// A node and its current propagated intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeIntent {
    pub name: String,
    pub intent: IntentRecord,
    pub updated_at: DateTime<Utc>,
}

impl NodeIntent {
    pub fn new(name: impl Into<String>, intent: IntentRecord) -> Self {
        Self {
            name: name.into(),
            intent,
            updated_at: Utc::now(),
        }
    }

    pub fn decode(&self) -> Result<Intent, IntentError> {
        Intent::try_from(&self.intent)
    }
}

/// Aggregate fleet occupancy at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSnapshot {
    pub cluster_active: usize,
    pub cluster_count: usize,
    /// Nodes whose intent record does not decode.
    pub faulted: Vec<String>,
}

impl FleetSnapshot {
    /// Apply the active classifier across the whole fleet.
    ///
    /// Undecodable intents count as active.
    pub fn observe<'a>(nodes: impl IntoIterator<Item = &'a NodeIntent>) -> Self {
        Self::observe_where(nodes, |_| true)
    }

    /// Occupancy as seen by `name` when deciding its own next step.
    ///
    /// The node never counts against itself. A node that already holds a slot
    /// only counts slot holders ordered ahead of it by name, so after an
    /// overshoot the first holders keep moving and release their slots while
    /// the rest wait. Every node still counts toward the fleet size.
    pub fn observe_for<'a>(
        nodes: impl IntoIterator<Item = &'a NodeIntent> + Clone,
        name: &str,
    ) -> Self {
        let holds_slot = nodes
            .clone()
            .into_iter()
            .find(|node| node.name == name)
            .map(|node| node.decode().map_or(true, |intent| is_cluster_active(&intent)))
            .unwrap_or(false);

        Self::observe_where(nodes, |other| {
            other.name != name && (!holds_slot || other.name.as_str() < name)
        })
    }

    fn observe_where<'a>(
        nodes: impl IntoIterator<Item = &'a NodeIntent>,
        counts_against: impl Fn(&NodeIntent) -> bool,
    ) -> Self {
        let mut snapshot = Self::default();
        for node in nodes {
            snapshot.cluster_count += 1;
            let active = match node.decode() {
                Ok(intent) => is_cluster_active(&intent),
                Err(_) => {
                    snapshot.faulted.push(node.name.clone());
                    true
                }
            };
            if active && counts_against(node) {
                snapshot.cluster_active += 1;
            }
        }
        snapshot
    }
}

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("node {node}: {source}")]
    InvalidIntent {
        node: String,
        #[source]
        source: IntentError,
    },
}

/// Node intents plus a counter bumped on every mutation.
#[derive(Default)]
struct Registry {
    nodes: BTreeMap<String, NodeIntent>,
    generation: u64,
}

impl Registry {
    /// Capture the current state for persistence. Must be called while the
    /// write guard that made the mutation is still held.
    fn stage(&mut self) -> StoredFleet {
        self.generation += 1;
        StoredFleet::new(self.generation, self.nodes.values().cloned().collect())
    }
}

pub struct FleetService {
    registry: RwLock<Registry>,
    store: Option<FleetStore>,
}

impl FleetService {
    pub fn new(store: Option<FleetStore>) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            store,
        }
    }

    /// Populate the registry from the persisted fleet file, if valid.
    pub async fn load_from_disk(&self) {
        let Some(store) = &self.store else {
            return;
        };
        if !store.exists() {
            info!("no fleet state file found, fleet starts empty");
            return;
        }

        match store.read().await {
            Ok(stored) => {
                info!(
                    nodes = stored.nodes.len(),
                    generation = stored.generation,
                    checksum = %stored.checksum,
                    "loaded fleet state from disk"
                );
                let mut registry = self.registry.write().await;
                registry.generation = stored.generation;
                registry.nodes = stored
                    .nodes
                    .into_iter()
                    .map(|node| (node.name.clone(), node))
                    .collect();
            }
            Err(e) => {
                warn!(error = %e, "failed to load fleet state, starting empty");
            }
        }
    }

    async fn persist(&self, staged: Option<StoredFleet>) {
        let (Some(store), Some(stored)) = (&self.store, staged) else {
            return;
        };
        if let Err(e) = store.write(&stored).await {
            warn!(error = %e, "failed to persist fleet state");
        }
    }

    fn stage(&self, registry: &mut Registry) -> Option<StoredFleet> {
        self.store.as_ref().map(|_| registry.stage())
    }

    pub async fn nodes(&self) -> Vec<NodeIntent> {
        self.registry.read().await.nodes.values().cloned().collect()
    }

    pub async fn node(&self, name: &str) -> Option<NodeIntent> {
        self.registry.read().await.nodes.get(name).cloned()
    }

    /// Fleet-wide occupancy.
    pub async fn snapshot(&self) -> FleetSnapshot {
        FleetSnapshot::observe(self.registry.read().await.nodes.values())
    }

    /// Occupancy as seen by one node deciding its next step.
    pub async fn snapshot_for(&self, name: &str) -> FleetSnapshot {
        FleetSnapshot::observe_for(self.registry.read().await.nodes.values(), name)
    }

    /// Add a node at the default intent. An already known node is returned
    /// unchanged.
    pub async fn register(&self, name: &str) -> NodeIntent {
        let (node, staged) = {
            let mut registry = self.registry.write().await;
            if let Some(existing) = registry.nodes.get(name) {
                return existing.clone();
            }
            let node = NodeIntent::new(name, IntentRecord::from(Intent::default()));
            registry.nodes.insert(name.to_string(), node.clone());
            info!(node = %name, intent = %Intent::default(), "registered node");
            (node, self.stage(&mut registry))
        };
        self.persist(staged).await;
        node
    }

    /// Store a node's intent record as reported, registering the node if new.
    ///
    /// The record is not decoded here; a malformed record surfaces as an
    /// evaluation fault on the next reconciliation pass.
    pub async fn put_intent(&self, name: &str, intent: IntentRecord) -> NodeIntent {
        let node = NodeIntent::new(name, intent);
        let staged = {
            let mut registry = self.registry.write().await;
            let previous = registry.nodes.insert(name.to_string(), node.clone());
            if previous.is_none() {
                info!(node = %name, intent = ?node.intent, "registered node");
            }
            self.stage(&mut registry)
        };
        self.persist(staged).await;
        node
    }

    /// Apply a trigger to a node's current intent.
    pub async fn report(&self, name: &str, trigger: Trigger) -> Result<NodeIntent, FleetError> {
        let (node, staged) = {
            let mut registry = self.registry.write().await;
            let node = registry
                .nodes
                .get_mut(name)
                .ok_or_else(|| FleetError::UnknownNode(name.to_string()))?;
            let current = node.decode().map_err(|source| FleetError::InvalidIntent {
                node: name.to_string(),
                source,
            })?;
            let next = current.apply(trigger);
            info!(
                node = %name,
                trigger = ?trigger,
                from = %current,
                to = %next,
                "node reported"
            );
            *node = NodeIntent::new(name, IntentRecord::from(next));
            let node = node.clone();
            (node, self.stage(&mut registry))
        };
        self.persist(staged).await;
        Ok(node)
    }

    /// Replace a node's intent only if it still matches what the caller
    /// observed. Returns `false` when the record changed underneath.
    pub async fn compare_and_set(&self, name: &str, observed: &IntentRecord, next: Intent) -> bool {
        let staged = {
            let mut registry = self.registry.write().await;
            match registry.nodes.get_mut(name) {
                Some(node) if node.intent == *observed => {
                    *node = NodeIntent::new(name, IntentRecord::from(next));
                }
                _ => return false,
            }
            self.stage(&mut registry)
        };
        self.persist(staged).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::intent::UpdateAvailability;

    fn node(name: &str, intent: Intent) -> NodeIntent {
        NodeIntent::new(name, IntentRecord::from(intent))
    }

    fn broken(name: &str) -> NodeIntent {
        NodeIntent::new(
            name,
            IntentRecord {
                state: "rebooting".to_string(),
                update_available: None,
            },
        )
    }

    #[test]
    fn snapshot_counts_active_nodes() {
        let nodes = vec![
            node("a", Intent::pending_update()),
            node("b", Intent::stabilized(UpdateAvailability::Available)),
            node("c", Intent::update_error()),
            node("d", Intent::reset()),
        ];
        let snapshot = FleetSnapshot::observe(&nodes);
        assert_eq!(snapshot.cluster_active, 2);
        assert_eq!(snapshot.cluster_count, 4);
        assert!(snapshot.faulted.is_empty());
    }

    #[test]
    fn node_never_counts_against_itself() {
        let nodes = vec![
            node("a", Intent::stabilized(UpdateAvailability::Available)),
            node("b", Intent::update_success()),
            node("c", Intent::pending_update()),
        ];
        let snapshot = FleetSnapshot::observe_for(&nodes, "c");
        assert_eq!(snapshot.cluster_active, 1);
        assert_eq!(snapshot.cluster_count, 3);
    }

    #[test]
    fn idle_node_counts_every_slot_holder() {
        let nodes = vec![
            node("a", Intent::pending_prepare_update()),
            node("b", Intent::stabilized(UpdateAvailability::Available)),
            node("c", Intent::update_error()),
        ];
        let snapshot = FleetSnapshot::observe_for(&nodes, "b");
        assert_eq!(snapshot.cluster_active, 2);
    }

    #[test]
    fn slot_holders_only_count_holders_ahead_of_them() {
        let nodes = vec![
            node("a", Intent::pending_prepare_update()),
            node("b", Intent::pending_prepare_update()),
            node("c", Intent::pending_prepare_update()),
        ];
        assert_eq!(FleetSnapshot::observe_for(&nodes, "a").cluster_active, 0);
        assert_eq!(FleetSnapshot::observe_for(&nodes, "b").cluster_active, 1);
        assert_eq!(FleetSnapshot::observe_for(&nodes, "c").cluster_active, 2);
        assert_eq!(FleetSnapshot::observe(&nodes).cluster_active, 3);
    }

    #[test]
    fn undecodable_nodes_are_faulted_and_active() {
        let nodes = vec![broken("a"), node("b", Intent::stabilizing())];
        let snapshot = FleetSnapshot::observe(&nodes);
        assert_eq!(snapshot.cluster_active, 1);
        assert_eq!(snapshot.faulted, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn report_applies_trigger() {
        let fleet = FleetService::new(None);
        fleet
            .put_intent("a", IntentRecord::from(Intent::stabilizing()))
            .await;
        let updated = fleet
            .report(
                "a",
                Trigger::Assessed {
                    update_available: UpdateAvailability::Available,
                },
            )
            .await
            .unwrap();
        assert_eq!(
            updated.decode(),
            Ok(Intent::stabilized(UpdateAvailability::Available))
        );
    }

    #[tokio::test]
    async fn report_for_unknown_node_fails() {
        let fleet = FleetService::new(None);
        let err = fleet.report("ghost", Trigger::Updated).await.unwrap_err();
        assert!(matches!(err, FleetError::UnknownNode(ref n) if n == "ghost"));
    }

    #[tokio::test]
    async fn report_on_malformed_record_fails() {
        let fleet = FleetService::new(None);
        fleet.put_intent("a", broken("a").intent).await;
        let err = fleet.report("a", Trigger::Admit).await.unwrap_err();
        assert!(matches!(err, FleetError::InvalidIntent { .. }));
    }

    #[tokio::test]
    async fn compare_and_set_rejects_stale_observation() {
        let fleet = FleetService::new(None);
        let observed = IntentRecord::from(Intent::pending_stabilizing());
        fleet.put_intent("a", observed.clone()).await;
        fleet.report("a", Trigger::Failed).await.unwrap();

        assert!(!fleet.compare_and_set("a", &observed, Intent::stabilizing()).await);
        assert_eq!(fleet.node("a").await.unwrap().decode(), Ok(Intent::update_error()));
    }

    #[tokio::test]
    async fn fleet_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.json");

        let fleet = FleetService::new(Some(FleetStore::new(path.clone())));
        fleet
            .put_intent("a", IntentRecord::from(Intent::pending_update()))
            .await;

        let restarted = FleetService::new(Some(FleetStore::new(path)));
        restarted.load_from_disk().await;
        assert_eq!(
            restarted.node("a").await.unwrap().decode(),
            Ok(Intent::pending_update())
        );
    }

    #[tokio::test]
    async fn register_adds_node_once() {
        let fleet = FleetService::new(None);
        let node = fleet.register("a").await;
        assert_eq!(node.decode(), Ok(Intent::pending_stabilizing()));

        fleet.report("a", Trigger::Admit).await.unwrap();
        let again = fleet.register("a").await;
        assert_eq!(again.decode(), Ok(Intent::stabilizing()));
        assert_eq!(fleet.nodes().await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writes_persist_latest_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.json");
        let fleet = Arc::new(FleetService::new(Some(FleetStore::new(path.clone()))));

        let mut handles = Vec::new();
        for i in 0..16 {
            let fleet = fleet.clone();
            handles.push(tokio::spawn(async move {
                let name = format!("node-{i:02}");
                fleet
                    .put_intent(&name, IntentRecord::from(Intent::pending_update()))
                    .await;
                fleet.report(&name, Trigger::Failed).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let restarted = FleetService::new(Some(FleetStore::new(path)));
        restarted.load_from_disk().await;
        let nodes = restarted.nodes().await;
        assert_eq!(nodes.len(), 16);
        for node in nodes {
            assert_eq!(node.decode(), Ok(Intent::update_error()), "{}", node.name);
        }
    }
}
