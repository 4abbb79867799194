//! Reconciliation pass: advance every node the policy admits.
//!
//! Level-triggered: each pass re-reads every node and recomputes the fleet
//! counts, so a denial now is simply retried on a later pass. Passes are
//! serialized; the interval loop and an on-demand request never interleave.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::fleet::FleetService;
use super::intent::Trigger;
use super::policy::{evaluate, Evaluation, Policy};

/// Outcome counts of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassSummary {
    /// Nodes moved to their next intent.
    pub advanced: usize,
    /// Nodes denied by the policy, or whose intent changed mid-pass.
    pub deferred: usize,
    /// Nodes skipped because their intent could not be evaluated.
    pub faulted: usize,
    /// Nodes permitted but waiting on their agent or an operator.
    pub idle: usize,
}

pub struct Reconciler {
    fleet: Arc<FleetService>,
    policy: Arc<dyn Policy>,
    pass: Mutex<()>,
}

impl Reconciler {
    pub fn new(fleet: Arc<FleetService>, policy: Arc<dyn Policy>) -> Self {
        Self {
            fleet,
            policy,
            pass: Mutex::new(()),
        }
    }

    pub async fn reconcile_once(&self) -> PassSummary {
        let _pass = self.pass.lock().await;
        let mut summary = PassSummary::default();

        for node in self.fleet.nodes().await {
            // Counts are taken per node so earlier writes in this pass are seen.
            let snapshot = self.fleet.snapshot_for(&node.name).await;

            let intent = match evaluate(
                self.policy.as_ref(),
                &node.name,
                &node.intent,
                snapshot.cluster_active,
                snapshot.cluster_count,
            ) {
                Ok(Evaluation {
                    intent,
                    permit: true,
                }) => intent,
                Ok(Evaluation { intent, .. }) => {
                    debug!(node = %node.name, intent = %intent, "node deferred");
                    summary.deferred += 1;
                    continue;
                }
                Err(e) => {
                    warn!(node = %node.name, error = %e, "skipping node, intent not evaluable");
                    summary.faulted += 1;
                    continue;
                }
            };

            let next = intent.apply(Trigger::Admit);
            if next == intent {
                summary.idle += 1;
                continue;
            }

            if self.fleet.compare_and_set(&node.name, &node.intent, next).await {
                info!(
                    node = %node.name,
                    from = %intent,
                    to = %next,
                    cluster_active = snapshot.cluster_active,
                    cluster_count = snapshot.cluster_count,
                    "node advanced"
                );
                summary.advanced += 1;
            } else {
                debug!(node = %node.name, "intent changed during pass, deferring");
                summary.deferred += 1;
            }
        }

        summary
    }
}
