//! Governor service: the daemon's single entry point into the fleet.
//!
//! Wraps the fleet registry, the admission policy and the reconciler, and
//! converts domain values into the API view types.

use std::sync::Arc;
use std::time::Instant;

use super::fleet::{FleetError, FleetService};
use super::intent::{IntentRecord, Trigger};
use super::policy::{evaluate, is_gated, DefaultPolicy, PolicyError};
use super::reconciler::Reconciler;
use super::types::{
    CheckRequest, CheckResponse, DaemonHealth, FleetStatus, NodeView, ReconcileResult,
};

pub struct Governor {
    fleet: Arc<FleetService>,
    policy: Arc<DefaultPolicy>,
    reconciler: Reconciler,
    started: Instant,
}

impl Governor {
    pub fn new(fleet: Arc<FleetService>, policy: DefaultPolicy) -> Self {
        let policy = Arc::new(policy);
        let reconciler = Reconciler::new(fleet.clone(), policy.clone());
        Self {
            fleet,
            policy,
            reconciler,
            started: Instant::now(),
        }
    }

    pub async fn health(&self) -> DaemonHealth {
        DaemonHealth {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.started.elapsed().as_secs(),
            node_count: self.fleet.nodes().await.len() as u64,
            max_cluster_active: self.policy.max_cluster_active() as u64,
        }
    }

    pub async fn fleet_status(&self) -> FleetStatus {
        FleetStatus::new(
            self.fleet.snapshot().await,
            self.policy.max_cluster_active(),
        )
    }

    pub async fn nodes(&self) -> Vec<NodeView> {
        self.fleet.nodes().await.iter().map(NodeView::from).collect()
    }

    pub async fn node(&self, name: &str) -> Option<NodeView> {
        self.fleet.node(name).await.as_ref().map(NodeView::from)
    }

    pub async fn register(&self, name: &str) -> NodeView {
        NodeView::from(&self.fleet.register(name).await)
    }

    pub async fn put_intent(&self, name: &str, intent: IntentRecord) -> NodeView {
        NodeView::from(&self.fleet.put_intent(name, intent).await)
    }

    pub async fn report(&self, name: &str, trigger: Trigger) -> Result<NodeView, FleetError> {
        self.fleet
            .report(name, trigger)
            .await
            .map(|node| NodeView::from(&node))
    }

    /// Evaluate a caller-supplied check without touching the fleet.
    pub fn check(&self, req: &CheckRequest) -> Result<CheckResponse, PolicyError> {
        let evaluation = evaluate(
            self.policy.as_ref(),
            "(ad-hoc)",
            &req.intent,
            req.cluster_active,
            req.cluster_count,
        )?;
        Ok(CheckResponse {
            intent: evaluation.intent.display_string(),
            gated: is_gated(&evaluation.intent),
            permit: evaluation.permit,
        })
    }

    pub async fn reconcile(&self) -> ReconcileResult {
        self.reconciler.reconcile_once().await.into()
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;
    use crate::domain::intent::{Intent, UpdateAvailability};

    fn governor(max: usize) -> Governor {
        Governor::new(
            Arc::new(FleetService::new(None)),
            DefaultPolicy::new(NonZeroUsize::new(max).unwrap()),
        )
    }

    #[tokio::test]
    async fn fleet_status_reports_occupancy() {
        let governor = governor(2);
        governor
            .put_intent("a", IntentRecord::from(Intent::pending_update()))
            .await;
        governor
            .put_intent("b", IntentRecord::from(Intent::stabilizing()))
            .await;

        let status = governor.fleet_status().await;
        assert_eq!(status.max_cluster_active, 2);
        assert_eq!(status.cluster_active, 1);
        assert_eq!(status.cluster_count, 2);
    }

    #[test]
    fn ad_hoc_check_denies_at_max() {
        let governor = governor(2);
        let resp = governor
            .check(&CheckRequest {
                intent: IntentRecord::from(Intent::stabilized(UpdateAvailability::Available)),
                cluster_active: 2,
                cluster_count: 5,
            })
            .unwrap();
        assert!(resp.gated);
        assert!(!resp.permit);
        assert_eq!(resp.intent, "stabilized(update=true)");
    }

    #[test]
    fn ad_hoc_check_faults_on_invalid_record() {
        let governor = governor(2);
        let result = governor.check(&CheckRequest {
            intent: IntentRecord {
                state: "cordoned".to_string(),
                update_available: None,
            },
            cluster_active: 0,
            cluster_count: 1,
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn node_view_exposes_faults() {
        let governor = governor(1);
        governor
            .put_intent(
                "a",
                IntentRecord {
                    state: "cordoned".to_string(),
                    update_available: None,
                },
            )
            .await;
        let view = governor.node("a").await.unwrap();
        assert!(view.display.is_none());
        assert!(view.fault.is_some());
    }
    #[tokio::test]
    async fn register_starts_at_default_intent_and_keeps_existing() {
        let governor = governor(1);
        let view = governor.register("a").await;
        assert_eq!(view.state, "pending-stabilizing");

        governor
            .put_intent("a", IntentRecord::from(Intent::pending_update()))
            .await;
        let view = governor.register("a").await;
        assert_eq!(view.state, "pending-update");
        assert_eq!(governor.health().await.node_count, 1);
    }
}
