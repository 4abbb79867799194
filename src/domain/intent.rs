//! Intent: a node's position in the OS update lifecycle.
//!
//! An `Intent` is a value: it is never mutated in place, a transition produces
//! the successor value. The propagated form of an intent is an [`IntentRecord`]
//! (plain strings, as written to node annotations); decoding a record is the
//! only place a structurally invalid intent can appear.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whether a newer OS version exists for a stabilized node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateAvailability {
    #[serde(rename = "true", alias = "available")]
    Available,
    #[serde(rename = "false", alias = "unavailable")]
    Unavailable,
    #[serde(rename = "unknown")]
    Unknown,
}

impl UpdateAvailability {
    /// Marker value as written to a node record.
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Available => "true",
            Self::Unavailable => "false",
            Self::Unknown => "unknown",
        }
    }
}

impl FromStr for UpdateAvailability {
    type Err = IntentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "true" | "available" => Ok(Self::Available),
            "false" | "unavailable" => Ok(Self::Unavailable),
            "unknown" => Ok(Self::Unknown),
            other => Err(IntentError::UnknownAvailability(other.to_string())),
        }
    }
}

impl fmt::Display for UpdateAvailability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// Lifecycle state of a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum Intent {
    /// (Re)establish a known-good baseline before any update decision.
    #[default]
    PendingStabilizing,
    Stabilizing,
    Stabilized {
        #[serde(rename = "updateAvailable")]
        update_available: UpdateAvailability,
    },
    /// Queued to download and stage an update.
    PendingPrepareUpdate,
    /// Queued to apply a staged update. This is the disruptive step.
    PendingUpdate,
    /// Update applied; the node has not yet been returned to service.
    UpdateSuccess,
    UpdateError,
    /// Returning to an idle baseline after success or an operator resolution.
    Reset,
}

/// External event driving a lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Trigger {
    /// The reconciler admitted the node's next step.
    Admit,
    /// The node agent finished stabilizing and assessed update availability.
    Assessed {
        #[serde(rename = "updateAvailable")]
        update_available: UpdateAvailability,
    },
    /// The node agent applied the staged update.
    Updated,
    /// The node agent failed the operation it was performing.
    Failed,
    /// An operator cleared an update error.
    Resolve,
}

impl Intent {
    pub fn pending_stabilizing() -> Self {
        Self::PendingStabilizing
    }

    pub fn stabilizing() -> Self {
        Self::Stabilizing
    }

    pub fn stabilized(update_available: UpdateAvailability) -> Self {
        Self::Stabilized { update_available }
    }

    pub fn pending_prepare_update() -> Self {
        Self::PendingPrepareUpdate
    }

    pub fn pending_update() -> Self {
        Self::PendingUpdate
    }

    pub fn update_success() -> Self {
        Self::UpdateSuccess
    }

    pub fn update_error() -> Self {
        Self::UpdateError
    }

    pub fn reset() -> Self {
        Self::Reset
    }

    /// Every lifecycle state, with each `Stabilized` sub-variant.
    pub fn all() -> [Intent; 10] {
        [
            Self::PendingStabilizing,
            Self::Stabilizing,
            Self::stabilized(UpdateAvailability::Available),
            Self::stabilized(UpdateAvailability::Unavailable),
            Self::stabilized(UpdateAvailability::Unknown),
            Self::PendingPrepareUpdate,
            Self::PendingUpdate,
            Self::UpdateSuccess,
            Self::UpdateError,
            Self::Reset,
        ]
    }

    /// State name as written to a node record.
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::PendingStabilizing => "pending-stabilizing",
            Self::Stabilizing => "stabilizing",
            Self::Stabilized { .. } => "stabilized",
            Self::PendingPrepareUpdate => "pending-prepare-update",
            Self::PendingUpdate => "pending-update",
            Self::UpdateSuccess => "update-success",
            Self::UpdateError => "update-error",
            Self::Reset => "reset",
        }
    }

    /// Update availability, defined only for `Stabilized`.
    pub fn update_available(&self) -> Option<UpdateAvailability> {
        match self {
            Self::Stabilized { update_available } => Some(*update_available),
            _ => None,
        }
    }

    /// Human-readable rendering for logs and diagnostics.
    pub fn display_string(&self) -> String {
        match self {
            Self::Stabilized { update_available } => {
                format!("{}(update={})", self.state_name(), update_available)
            }
            _ => self.state_name().to_string(),
        }
    }

    /// Successor intent for the given trigger. Triggers that do not apply to
    /// the current state leave it unchanged.
    pub fn apply(self, trigger: Trigger) -> Intent {
        match (self, trigger) {
            (_, Trigger::Failed) => Self::UpdateError,

            (Self::PendingStabilizing, Trigger::Admit) => Self::Stabilizing,
            (
                Self::Stabilized {
                    update_available: UpdateAvailability::Available,
                },
                Trigger::Admit,
            ) => Self::PendingPrepareUpdate,
            (Self::PendingPrepareUpdate, Trigger::Admit) => Self::PendingUpdate,
            (Self::UpdateSuccess, Trigger::Admit) => Self::Reset,
            (Self::Reset, Trigger::Admit) => Self::PendingStabilizing,

            (Self::Stabilizing, Trigger::Assessed { update_available }) => {
                Self::Stabilized { update_available }
            }
            (Self::PendingUpdate, Trigger::Updated) => Self::UpdateSuccess,
            (Self::UpdateError, Trigger::Resolve) => Self::Reset,

            (current, _) => current,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_string())
    }
}

/// Parses `state` or `state:availability`, e.g. `stabilized:true`.
impl FromStr for Intent {
    type Err = IntentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (state, update_available) = match s.split_once(':') {
            Some((state, avail)) => (state, Some(avail.to_string())),
            None => (s, None),
        };
        Intent::try_from(&IntentRecord {
            state: state.trim().to_string(),
            update_available,
        })
    }
}

/// A structurally invalid intent record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntentError {
    #[error("unrecognized lifecycle state '{0}'")]
    UnknownState(String),

    #[error("unrecognized update availability '{0}'")]
    UnknownAvailability(String),
}

/// Propagated form of an intent, as stored on the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentRecord {
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_available: Option<String>,
}

impl TryFrom<&IntentRecord> for Intent {
    type Error = IntentError;

    fn try_from(record: &IntentRecord) -> Result<Self, Self::Error> {
        let intent = match record.state.as_str() {
            "pending-stabilizing" => Intent::PendingStabilizing,
            "stabilizing" => Intent::Stabilizing,
            "stabilized" => {
                let update_available = match record.update_available.as_deref() {
                    Some(value) => value.trim().parse()?,
                    None => UpdateAvailability::Unknown,
                };
                Intent::Stabilized { update_available }
            }
            "pending-prepare-update" => Intent::PendingPrepareUpdate,
            "pending-update" => Intent::PendingUpdate,
            "update-success" => Intent::UpdateSuccess,
            "update-error" => Intent::UpdateError,
            "reset" => Intent::Reset,
            other => return Err(IntentError::UnknownState(other.to_string())),
        };
        Ok(intent)
    }
}

impl From<Intent> for IntentRecord {
    fn from(intent: Intent) -> Self {
        Self {
            state: intent.state_name().to_string(),
            update_available: intent.update_available().map(|a| a.marker().to_string()),
        }
    }
}
