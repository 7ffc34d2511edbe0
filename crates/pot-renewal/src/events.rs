use serde::Serialize;

use crate::types::{PathId, ProfileIndex};

/// Renewal events the application may want to observe.
///
/// Delivered best-effort: a full channel drops events rather than stall
/// the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RenewalEvent {
    /// A path received its first profile set and profile 0 went live.
    Provisioned {
        path: PathId,
        active_index: ProfileIndex,
        hops: usize,
        profiles: u32,
        refresh_interval_ms: u64,
    },
    /// Provisioning failed; the path runs without proof-of-transit.
    ProvisioningFailed { path: PathId, reason: String },
    /// The active profile rotated.
    Renewed {
        path: PathId,
        previous: ProfileIndex,
        active_index: ProfileIndex,
    },
    /// A queued renewal found no state (path deleted meanwhile).
    RenewalSkipped { path: PathId },
    /// A renewal failed. The previous profile stays live, no timer is armed.
    RenewalStalled {
        path: PathId,
        active_index: ProfileIndex,
        reason: String,
    },
    /// All recorded configuration for a path was deleted.
    TornDown {
        path: PathId,
        deletes: usize,
        delete_failures: usize,
    },
}

impl RenewalEvent {
    pub fn path(&self) -> &PathId {
        match self {
            RenewalEvent::Provisioned { path, .. }
            | RenewalEvent::ProvisioningFailed { path, .. }
            | RenewalEvent::Renewed { path, .. }
            | RenewalEvent::RenewalSkipped { path }
            | RenewalEvent::RenewalStalled { path, .. }
            | RenewalEvent::TornDown { path, .. } => path,
        }
    }
}
