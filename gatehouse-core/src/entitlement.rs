// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::identifiers::BucketId;
use crate::time::Timestamp;

/// Persisted entitlement bookkeeping for a single member.
///
/// A record is created on the first observed join or first payment signal for a member and never
/// deleted afterwards; the `trial_used` flag doubles as an anti-abuse ledger preventing trial
/// re-use across re-joins.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementRecord {
    /// Trial has been granted at least once. Monotonic, never reset.
    pub trial_used: bool,

    /// When the active trial's access ends. `None` while no trial grant is pending expiry.
    pub trial_expires_at: Option<Timestamp>,

    /// Pool bucket assigned for the current trial, kept so it can be precisely revoked.
    pub trial_bucket: Option<BucketId>,

    /// Access is currently backed by the external payment signal.
    pub paid: bool,

    /// Most recent join observed. Zero when the member has never been seen joining (record
    /// created by a payment signal alone).
    pub last_join_at: Timestamp,
}

impl EntitlementRecord {
    /// Derive the conceptual access state from the stored fields.
    ///
    /// Paid status supersedes trial-active state; the two are mutually exclusive at settled
    /// points because every paid transition clears the trial fields.
    pub fn access_state(&self) -> AccessState {
        if self.paid {
            return AccessState::Paid;
        }

        match (self.trial_expires_at, &self.trial_bucket) {
            (Some(expires_at), Some(bucket)) => AccessState::TrialActive {
                expires_at,
                bucket: bucket.clone(),
            },
            _ if self.trial_used => AccessState::TrialConsumed,
            _ => AccessState::NoAccess,
        }
    }
}

/// Conceptual per-member access state, derived from the record, never stored separately.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessState {
    /// No entitlement of any kind.
    NoAccess,

    /// A one-time trial grant is pending expiry.
    TrialActive {
        expires_at: Timestamp,
        bucket: BucketId,
    },

    /// The one-time trial was consumed and no other entitlement is held.
    TrialConsumed,

    /// Access is backed by the external payment signal.
    Paid,
}

impl Display for AccessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AccessState::NoAccess => "no-access",
            AccessState::TrialActive { .. } => "trial-active",
            AccessState::TrialConsumed => "trial-consumed",
            AccessState::Paid => "paid",
        };

        write!(f, "{}", s)
    }
}
