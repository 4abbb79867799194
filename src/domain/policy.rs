//! Admission control for disruptive update transitions.
//!
//! Two exhaustive classifications drive every decision:
//! - [`is_cluster_active`]: does a node in this intent occupy a slot of the
//!   fleet-wide concurrency budget.
//! - [`is_gated`]: is the transition implied by this intent subject to that
//!   budget at all.
//!
//! The policy is a pure function of a [`PolicyCheck`] snapshot. Concurrent
//! reconcilers may observe stale counts and briefly overshoot the budget; the
//! next pass re-observes the fleet and denies further gated transitions.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::intent::{Intent, IntentError, IntentRecord, UpdateAvailability};

/// Whether a node in this intent occupies a concurrency slot.
pub fn is_cluster_active(intent: &Intent) -> bool {
    match intent {
        Intent::PendingStabilizing => false,
        Intent::Stabilizing => false,
        Intent::Stabilized { .. } => false,
        Intent::PendingPrepareUpdate => true,
        Intent::PendingUpdate => true,
        // Held until the node is returned to service.
        Intent::UpdateSuccess => true,
        // Unresolved failures hold the fleet back.
        Intent::UpdateError => true,
        Intent::Reset => false,
    }
}

/// Whether the transition implied by this intent is subject to the budget.
///
/// `Stabilized` with an available update is gated even though it is not
/// active: its next step enters a slot-consuming state. Ungated intents must
/// never be starved, nodes holding a slot need to finish to release it.
pub fn is_gated(intent: &Intent) -> bool {
    match intent {
        Intent::PendingStabilizing => false,
        Intent::Stabilizing => false,
        Intent::Stabilized { update_available } => match update_available {
            UpdateAvailability::Available => true,
            UpdateAvailability::Unavailable => false,
            UpdateAvailability::Unknown => false,
        },
        Intent::PendingPrepareUpdate => true,
        Intent::PendingUpdate => true,
        Intent::UpdateSuccess => false,
        Intent::UpdateError => false,
        Intent::Reset => false,
    }
}

/// Inputs to a single admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCheck {
    pub intent: Intent,
    /// Nodes currently classified active across the fleet.
    pub cluster_active: usize,
    /// Fleet size. Carried for diagnostics, not part of the threshold.
    pub cluster_count: usize,
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("node {node}: invalid intent: {source}")]
    InvalidIntent {
        node: String,
        #[source]
        source: IntentError,
    },
}

/// Admission decision point consulted before every lifecycle transition.
///
/// `Ok(false)` is a denial and means "retry on a later pass". `Err` is an
/// evaluation fault; callers must treat it as neither permit nor denial.
pub trait Policy: Send + Sync {
    fn check(&self, req: &PolicyCheck) -> Result<bool, PolicyError>;
}

/// Caps the number of simultaneously active nodes.
#[derive(Debug, Clone, Copy)]
pub struct DefaultPolicy {
    max_cluster_active: NonZeroUsize,
}

impl DefaultPolicy {
    pub fn new(max_cluster_active: NonZeroUsize) -> Self {
        Self { max_cluster_active }
    }

    pub fn max_cluster_active(&self) -> usize {
        self.max_cluster_active.get()
    }
}

impl Policy for DefaultPolicy {
    fn check(&self, req: &PolicyCheck) -> Result<bool, PolicyError> {
        let intent = req.intent.display_string();

        if !is_gated(&req.intent) {
            debug!(
                intent = %intent,
                cluster_active = req.cluster_active,
                cluster_count = req.cluster_count,
                "ungated transition permitted"
            );
            return Ok(true);
        }

        let max = self.max_cluster_active.get();
        if req.cluster_active < max {
            debug!(
                intent = %intent,
                cluster_active = req.cluster_active,
                cluster_count = req.cluster_count,
                max_cluster_active = max,
                "gated transition permitted"
            );
            Ok(true)
        } else {
            info!(
                intent = %intent,
                cluster_active = req.cluster_active,
                cluster_count = req.cluster_count,
                max_cluster_active = max,
                "gated transition denied, active limit reached"
            );
            Ok(false)
        }
    }
}

/// A decoded intent and the policy's decision on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub intent: Intent,
    pub permit: bool,
}

/// Decode a node's propagated intent and check it.
///
/// A record that does not decode is an evaluation fault for that node only.
pub fn evaluate(
    policy: &dyn Policy,
    node: &str,
    record: &IntentRecord,
    cluster_active: usize,
    cluster_count: usize,
) -> Result<Evaluation, PolicyError> {
    let intent = Intent::try_from(record).map_err(|source| PolicyError::InvalidIntent {
        node: node.to_string(),
        source,
    })?;
    let permit = policy.check(&PolicyCheck {
        intent,
        cluster_active,
        cluster_count,
    })?;
    Ok(Evaluation { intent, permit })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_CLUSTER_ACTIVE: usize = 1;

    fn policy() -> DefaultPolicy {
        DefaultPolicy::new(NonZeroUsize::new(MAX_CLUSTER_ACTIVE).unwrap())
    }

    fn check(intent: Intent, cluster_active: usize, cluster_count: usize) -> bool {
        policy()
            .check(&PolicyCheck {
                intent,
                cluster_active,
                cluster_count,
            })
            .unwrap()
    }

    fn available() -> Intent {
        Intent::stabilized(UpdateAvailability::Available)
    }

    #[test]
    fn stabilize_permitted_at_max_active() {
        let n = MAX_CLUSTER_ACTIVE;
        assert!(check(Intent::pending_stabilizing(), n, n + 1));
        assert!(check(Intent::pending_stabilizing(), 0, n + 1));
    }

    #[test]
    fn prepare_update_denied_at_max_active() {
        let n = MAX_CLUSTER_ACTIVE;
        assert!(!check(Intent::pending_prepare_update(), n, n + 1));
    }

    #[test]
    fn prepare_update_denied_over_threshold() {
        let n = MAX_CLUSTER_ACTIVE;
        assert!(!check(Intent::pending_prepare_update(), n + 1, n + 1));
    }

    #[test]
    fn update_success_permitted_at_max_active() {
        // The node still has to be returned to service to release its slot.
        let n = MAX_CLUSTER_ACTIVE;
        assert!(check(Intent::update_success(), n, n + 1));
    }

    #[test]
    fn update_available_denied_at_max_active() {
        let n = MAX_CLUSTER_ACTIVE;
        assert!(!check(available(), n, n + 1));
    }

    #[test]
    fn ungated_intents_always_permitted() {
        let max = 3;
        let policy = DefaultPolicy::new(NonZeroUsize::new(max).unwrap());
        for intent in Intent::all().into_iter().filter(|i| !is_gated(i)) {
            for cluster_active in [0, max - 1, max, max + 1, 100] {
                let req = PolicyCheck {
                    intent,
                    cluster_active,
                    cluster_count: max + 1,
                };
                assert!(policy.check(&req).unwrap(), "{intent} at {cluster_active}");
            }
        }
    }

    #[test]
    fn gated_intents_permitted_only_below_max() {
        let max = 3;
        let count = 6;
        let policy = DefaultPolicy::new(NonZeroUsize::new(max).unwrap());
        for intent in Intent::all().into_iter().filter(is_gated) {
            for cluster_active in 0..=count + 2 {
                let req = PolicyCheck {
                    intent,
                    cluster_active,
                    cluster_count: count,
                };
                assert_eq!(
                    policy.check(&req).unwrap(),
                    cluster_active < max,
                    "{intent} at {cluster_active}"
                );
            }
        }
    }

    #[test]
    fn gated_decisions_are_monotonic() {
        let policy = DefaultPolicy::new(NonZeroUsize::new(4).unwrap());
        for intent in Intent::all().into_iter().filter(is_gated) {
            let decisions: Vec<bool> = (0..10)
                .map(|cluster_active| {
                    policy
                        .check(&PolicyCheck {
                            intent,
                            cluster_active,
                            cluster_count: 10,
                        })
                        .unwrap()
                })
                .collect();
            // Once denied, never permitted again at a higher count.
            assert!(decisions.windows(2).all(|w| w[0] || !w[1]), "{intent}");
        }
    }

    #[test]
    fn repeated_checks_are_identical() {
        let policy = policy();
        for intent in Intent::all() {
            let req = PolicyCheck {
                intent,
                cluster_active: MAX_CLUSTER_ACTIVE,
                cluster_count: 5,
            };
            let first = policy.check(&req).unwrap();
            let second = policy.check(&req).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn active_classification() {
        let cases = [
            // Nodes beginning or applying an update are working towards a goal.
            (Intent::pending_prepare_update(), true),
            (Intent::pending_update(), true),
            // Success not yet handled still occupies a slot.
            (Intent::update_success(), true),
            // Errors keep the rest of the fleet from progressing.
            (Intent::update_error(), true),
            // Stabilization and reset are non-intrusive.
            (Intent::pending_stabilizing(), false),
            (Intent::stabilizing(), false),
            (Intent::stabilized(UpdateAvailability::Available), false),
            (Intent::stabilized(UpdateAvailability::Unavailable), false),
            (Intent::stabilized(UpdateAvailability::Unknown), false),
            (Intent::reset(), false),
        ];
        assert_eq!(cases.len(), Intent::all().len());
        for (intent, expected) in cases {
            assert_eq!(is_cluster_active(&intent), expected, "{intent}");
            assert_eq!(is_cluster_active(&intent), is_cluster_active(&intent));
        }
    }

    #[test]
    fn gated_classification() {
        let gated: Vec<Intent> = Intent::all().into_iter().filter(is_gated).collect();
        assert_eq!(
            gated,
            vec![
                Intent::stabilized(UpdateAvailability::Available),
                Intent::pending_prepare_update(),
                Intent::pending_update(),
            ]
        );
    }

    #[test]
    fn evaluate_faults_on_undecodable_record() {
        let record = IntentRecord {
            state: "stabilized".to_string(),
            update_available: Some("perhaps".to_string()),
        };
        let err = evaluate(&policy(), "node-a", &record, 0, 3).unwrap_err();
        assert!(matches!(
            err,
            PolicyError::InvalidIntent { ref node, source: IntentError::UnknownAvailability(_) }
                if node == "node-a"
        ));
    }

    #[test]
    fn evaluate_checks_decoded_record() {
        let record = IntentRecord::from(available());
        let permitted = evaluate(&policy(), "node-a", &record, 0, 3).unwrap();
        assert_eq!(permitted.intent, available());
        assert!(permitted.permit);
        assert!(!evaluate(&policy(), "node-a", &record, 1, 3).unwrap().permit);
    }
}
