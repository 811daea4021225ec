// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

use gatehouse_core::{BucketId, EntitlementRecord, MemberId, Timestamp};

/// Interface for the per-member entitlement ledger.
///
/// Implementations must make every write an atomic create-if-absent upsert of the whole record.
pub trait EntitlementStore {
    type Error: Error;

    /// Get a member's record.
    fn get(
        &self,
        member: &MemberId,
    ) -> impl Future<Output = Result<Option<EntitlementRecord>, Self::Error>>;

    /// Record an observed join, creating the record when absent.
    fn upsert_join(
        &self,
        member: &MemberId,
        now: Timestamp,
    ) -> impl Future<Output = Result<(), Self::Error>>;

    /// Consume the member's one-time trial.
    ///
    /// Marks `trial_used`, stores the expiry and the assigned bucket and bumps `last_join_at`,
    /// all in a single write. `trial_used` is monotonic; no operation ever resets it.
    fn start_trial(
        &self,
        member: &MemberId,
        expires_at: Timestamp,
        bucket: &BucketId,
        now: Timestamp,
    ) -> impl Future<Output = Result<(), Self::Error>>;

    /// Clear trial expiry and stored bucket in a single write.
    fn clear_trial(&self, member: &MemberId) -> impl Future<Output = Result<(), Self::Error>>;

    /// Set or unset the paid flag.
    fn set_paid(
        &self,
        member: &MemberId,
        paid: bool,
    ) -> impl Future<Output = Result<(), Self::Error>>;

    /// Point-in-time list of members whose trial expiry has passed, with the bucket recorded for
    /// the trial.
    fn expired_trials(
        &self,
        now: Timestamp,
    ) -> impl Future<Output = Result<Vec<(MemberId, Option<BucketId>)>, Self::Error>>;
}
