// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashSet;

use gatehouse_core::{BucketId, Config, MemberId};
use rand::seq::IndexedRandom;
use tracing::warn;

use crate::traits::LiveMembership;

/// Strategy for choosing one access bucket from the configured pool.
///
/// Injected into the allocator so tests can substitute a deterministic strategy for the
/// uniform-random default.
pub trait BucketSelector {
    fn select(&mut self, pool: &[BucketId]) -> BucketId;
}

/// Uniform-random selection over the pool.
///
/// Randomization decorrelates which bucket a member holds from why they hold it (trial vs.
/// paid), and every payment-triggered enforcement re-randomizes, so the same member may occupy a
/// different bucket across their membership lifetime.
#[derive(Clone, Debug, Default)]
pub struct UniformSelector;

impl BucketSelector for UniformSelector {
    fn select(&mut self, pool: &[BucketId]) -> BucketId {
        let mut rng = rand::rng();
        pool.choose(&mut rng)
            .expect("bucket pool is validated non-empty at startup")
            .clone()
    }
}

/// Maps members onto the pool of interchangeable access buckets and performs idempotent
/// add/remove of those buckets against the live membership.
///
/// The distinguished payment-signal bucket is only ever read here, never granted or revoked.
/// Grant and revoke calls are best-effort: transient platform failures are logged at `warn` and
/// swallowed. A partially-applied result (a member momentarily holding two buckets) is
/// acceptable and self-heals on the next enforcement call.
#[derive(Debug)]
pub struct BucketAllocator<L, S> {
    config: Config,
    membership: L,
    selector: S,
}

impl<L, S> BucketAllocator<L, S>
where
    L: LiveMembership,
    S: BucketSelector,
{
    pub fn new(config: Config, membership: L, selector: S) -> Self {
        Self {
            config,
            membership,
            selector,
        }
    }

    /// Choose one bucket from the pool with the injected strategy.
    pub fn select_bucket(&mut self) -> BucketId {
        self.selector.select(&self.config.bucket_pool)
    }

    /// Query the payment signal.
    ///
    /// Read failures count as "not held"; the signal is never granted on a failed read and the
    /// next trigger self-heals.
    pub async fn payment_signal_held(&self, member: &MemberId) -> bool {
        match self
            .membership
            .has_bucket(member, &self.config.payment_bucket)
            .await
        {
            Ok(held) => held,
            Err(err) => {
                warn!(member = %member, "payment signal read failed: {err}");
                false
            }
        }
    }

    /// All buckets a member currently holds, `None` when the member left the space or the live
    /// membership could not be read.
    pub async fn held_buckets(&self, member: &MemberId) -> Option<HashSet<BucketId>> {
        match self.membership.held_buckets(member).await {
            Ok(held) => held,
            Err(err) => {
                warn!(member = %member, "live membership read failed: {err}");
                None
            }
        }
    }

    /// Live held set intersected with the configured pool.
    pub async fn current_buckets(&self, member: &MemberId) -> Option<HashSet<BucketId>> {
        let held = self.held_buckets(member).await?;
        Some(
            held.into_iter()
                .filter(|bucket| self.config.bucket_pool.contains(bucket))
                .collect(),
        )
    }

    /// Converge the member onto exactly one pool bucket.
    ///
    /// Picks a bucket with the injected strategy, grants it when missing, then revokes every
    /// other pool bucket the member holds, each attempt best-effort.
    pub async fn enforce_single_bucket(&mut self, member: &MemberId) {
        let chosen = self.select_bucket();
        let held = self.current_buckets(member).await.unwrap_or_default();

        if !held.contains(&chosen) {
            self.grant_bucket(member, &chosen, "Enforcing single access bucket")
                .await;
        }

        for bucket in held {
            if bucket != chosen {
                self.revoke_bucket(member, &bucket, "Enforcing single access bucket")
                    .await;
            }
        }
    }

    /// Remove every pool bucket the member currently holds, best-effort per bucket.
    pub async fn revoke_all_buckets(&self, member: &MemberId, reason: &str) {
        let held = self.current_buckets(member).await.unwrap_or_default();
        for bucket in held {
            self.revoke_bucket(member, &bucket, reason).await;
        }
    }

    /// Grant one specific bucket, used for fresh trial starts where no prior bucket exists.
    pub async fn grant_bucket(&self, member: &MemberId, bucket: &BucketId, reason: &str) {
        if let Err(err) = self.membership.grant(member, bucket, reason).await {
            warn!(member = %member, bucket = %bucket, "bucket grant failed: {err}");
        }
    }

    /// Revoke one specific bucket.
    pub async fn revoke_bucket(&self, member: &MemberId, bucket: &BucketId, reason: &str) {
        if let Err(err) = self.membership.revoke(member, bucket, reason).await {
            warn!(member = %member, bucket = %bucket, "bucket revoke failed: {err}");
        }
    }
}
