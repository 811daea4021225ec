// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashSet;
use std::error::Error;

use gatehouse_core::{BucketId, MemberId};

/// Interface to the chat platform's live group membership.
///
/// All operations must be idempotent: granting an already-held bucket or revoking an absent one
/// is a no-op, not an error. Errors returned here are transient platform failures (rate limits,
/// network); callers log and swallow them and rely on the next enforcement call to self-heal.
pub trait LiveMembership {
    type Error: Error;

    /// Query whether a member currently holds a bucket.
    fn has_bucket(
        &self,
        member: &MemberId,
        bucket: &BucketId,
    ) -> impl Future<Output = Result<bool, Self::Error>>;

    /// All buckets a member currently holds, or `None` when the member has left the space.
    fn held_buckets(
        &self,
        member: &MemberId,
    ) -> impl Future<Output = Result<Option<HashSet<BucketId>>, Self::Error>>;

    /// Grant a bucket to a member.
    fn grant(
        &self,
        member: &MemberId,
        bucket: &BucketId,
        reason: &str,
    ) -> impl Future<Output = Result<(), Self::Error>>;

    /// Revoke a bucket from a member.
    fn revoke(
        &self,
        member: &MemberId,
        bucket: &BucketId,
        reason: &str,
    ) -> impl Future<Output = Result<(), Self::Error>>;
}

/// Best-effort direct-message delivery.
///
/// A side channel only: delivery failures are logged and swallowed, they never affect
/// entitlement state.
pub trait Notifier {
    type Error: Error;

    /// Send a direct message to a member.
    fn notify(
        &self,
        member: &MemberId,
        text: &str,
    ) -> impl Future<Output = Result<(), Self::Error>>;
}
