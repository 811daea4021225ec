// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashSet;
use std::error::Error;
use std::time::Duration;

use gatehouse_core::{AccessState, BucketId, Config, MemberId, Timestamp};
use gatehouse_store::EntitlementStore;
use thiserror::Error;
use tracing::{debug, warn};

use crate::allocator::{BucketAllocator, BucketSelector};
use crate::messages;
use crate::traits::{LiveMembership, Notifier};

/// The access-entitlement state machine.
///
/// Given a member's persisted record and a live-membership snapshot plus an incoming trigger
/// (join, payment-signal change, trial expiry), computes the next record state and applies the
/// role and notification side effects.
///
/// Store errors propagate; platform grant/revoke and notification failures never do. They are
/// logged and left to self-heal on the next enforcement call, so a failed platform call never
/// aborts a trigger's remaining steps.
#[derive(Debug)]
pub struct EntitlementEngine<St, L, S, N> {
    config: Config,
    store: St,
    allocator: BucketAllocator<L, S>,
    notifier: N,
}

impl<St, L, S, N> EntitlementEngine<St, L, S, N>
where
    St: EntitlementStore,
    L: LiveMembership,
    S: BucketSelector,
    N: Notifier,
{
    pub fn new(config: Config, store: St, membership: L, selector: S, notifier: N) -> Self {
        let allocator = BucketAllocator::new(config.clone(), membership, selector);
        Self {
            config,
            store,
            allocator,
            notifier,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle an observed member join.
    ///
    /// `account_age` is the age of the member's platform account at join time, used by the
    /// optional anti-alt policy.
    pub async fn handle_join(
        &mut self,
        member: &MemberId,
        account_age: Duration,
        now: Timestamp,
    ) -> Result<AccessState, EngineError<St::Error>> {
        self.store
            .upsert_join(member, now)
            .await
            .map_err(EngineError::Store)?;

        // Payment signal already present, e.g. the billing integration assigned it before the
        // join event arrived.
        if self.allocator.payment_signal_held(member).await {
            debug!(member = %member, "join with payment signal held, marking paid");
            self.mark_paid(member).await?;
            return Ok(AccessState::Paid);
        }

        // Idempotency guard against duplicate join events: an already-held pool bucket means a
        // previous trigger settled this member.
        let held = self.allocator.current_buckets(member).await;
        if held.as_ref().is_some_and(|held| !held.is_empty()) {
            debug!(member = %member, "join ignored, access bucket already held");
            return self.settled_state(member).await;
        }

        if !self.config.min_account_age.is_zero() && account_age < self.config.min_account_age {
            debug!(member = %member, "join blocked by account-age policy");
            self.notify(member, &messages::account_too_new(&self.config))
                .await;
            return self.settled_state(member).await;
        }

        let record = self
            .store
            .get(member)
            .await
            .map_err(EngineError::Store)?
            .unwrap_or_default();

        if record.trial_used {
            debug!(member = %member, "join without remaining trial");
            self.notify(member, &messages::trial_already_used(&self.config))
                .await;
            return Ok(AccessState::TrialConsumed);
        }

        // One-time trial. The record is persisted before the bucket is granted: a crash in
        // between leaves a consumed trial without access, never the reverse.
        let bucket = self.allocator.select_bucket();
        let expires_at = now + self.config.trial_duration_ms();
        self.store
            .start_trial(member, expires_at, &bucket, now)
            .await
            .map_err(EngineError::Store)?;
        self.allocator
            .grant_bucket(member, &bucket, "Granting trial access")
            .await;
        self.notify(member, &messages::welcome(&self.config)).await;

        debug!(member = %member, bucket = %bucket, expires_at, "trial granted");
        Ok(AccessState::TrialActive { expires_at, bucket })
    }

    /// Handle a change of the member's live bucket set.
    ///
    /// The payment-signal transition is derived by diffing the distinguished payment bucket's
    /// presence across the old and new set; all other bucket changes are not this system's
    /// concern.
    pub async fn handle_buckets_changed(
        &mut self,
        member: &MemberId,
        old_buckets: &HashSet<BucketId>,
        new_buckets: &HashSet<BucketId>,
    ) -> Result<AccessState, EngineError<St::Error>> {
        let was_paid = old_buckets.contains(&self.config.payment_bucket);
        let is_paid = new_buckets.contains(&self.config.payment_bucket);

        match (was_paid, is_paid) {
            (false, true) => {
                debug!(member = %member, "payment signal granted");
                self.mark_paid(member).await?;
                self.notify(member, &messages::purchase_confirmed()).await;
                Ok(AccessState::Paid)
            }
            (true, false) => {
                debug!(member = %member, "payment signal revoked");
                self.store
                    .set_paid(member, false)
                    .await
                    .map_err(EngineError::Store)?;
                self.allocator
                    .revoke_all_buckets(member, "Payment signal revoked")
                    .await;
                self.settled_state(member).await
            }
            _ => self.settled_state(member).await,
        }
    }

    /// Handle a trial whose expiry timestamp has passed, fed by the sweep.
    ///
    /// The trial bookkeeping is cleared before any role mutation, so a crashed or re-run sweep
    /// never re-enters this branch for the same lapsed trial. The cost is a possible single
    /// missed removal on a crash in between, which never grants undue access and self-corrects
    /// on the next payment or trial cycle.
    pub async fn handle_expired(
        &mut self,
        member: &MemberId,
        recorded_bucket: Option<&BucketId>,
        _now: Timestamp,
    ) -> Result<AccessState, EngineError<St::Error>> {
        let record = self
            .store
            .get(member)
            .await
            .map_err(EngineError::Store)?
            .unwrap_or_default();

        self.store
            .clear_trial(member)
            .await
            .map_err(EngineError::Store)?;

        // Member departed between expiry and sweep execution (or the membership read failed):
        // the expiry is cleared, nothing further to do.
        let Some(held) = self.allocator.held_buckets(member).await else {
            debug!(member = %member, "expired trial for absent member, skipped");
            return self.settled_state(member).await;
        };

        // The payment signal appeared without us observing the transition event. Treat the
        // sweep hit as the missed payment-granted trigger.
        if held.contains(&self.config.payment_bucket) {
            debug!(member = %member, "expired trial but payment signal held, marking paid");
            self.store
                .set_paid(member, true)
                .await
                .map_err(EngineError::Store)?;
            self.allocator.enforce_single_bucket(member).await;
            return Ok(AccessState::Paid);
        }

        // Paid already recorded: the expiry was stale bookkeeping, no role change.
        if record.paid {
            return Ok(AccessState::Paid);
        }

        if let Some(bucket) = recorded_bucket {
            if held.contains(bucket) {
                self.allocator
                    .revoke_bucket(member, bucket, "Trial expired")
                    .await;
            }
        } else {
            // A record with an expiry but no stored bucket, e.g. written by an older version.
            warn!(member = %member, "expired trial without recorded bucket");
        }

        // Cleanup safety net: catches a stored bucket id that is no longer part of the
        // configured pool, or a member holding more than one pool bucket.
        self.allocator
            .revoke_all_buckets(member, "Trial expired")
            .await;
        self.notify(member, &messages::trial_expired(&self.config))
            .await;

        debug!(member = %member, "trial expired, access revoked");
        Ok(AccessState::TrialConsumed)
    }

    /// One reconciliation pass: every record whose trial expiry has passed is fed through
    /// [`Self::handle_expired`], sequentially, so per-run notification ordering stays
    /// deterministic.
    pub async fn sweep(&mut self, now: Timestamp) -> Result<(), EngineError<St::Error>> {
        let expired = self
            .store
            .expired_trials(now)
            .await
            .map_err(EngineError::Store)?;

        if !expired.is_empty() {
            debug!(count = expired.len(), "sweeping expired trials");
        }

        for (member, bucket) in expired {
            self.handle_expired(&member, bucket.as_ref(), now).await?;
        }

        Ok(())
    }

    /// Mark a member paid: persist the flag, clear trial bookkeeping and converge onto a single,
    /// freshly-randomized pool bucket.
    async fn mark_paid(&mut self, member: &MemberId) -> Result<(), EngineError<St::Error>> {
        self.store
            .set_paid(member, true)
            .await
            .map_err(EngineError::Store)?;
        self.store
            .clear_trial(member)
            .await
            .map_err(EngineError::Store)?;
        self.allocator.enforce_single_bucket(member).await;
        Ok(())
    }

    /// The member's settled access state as derived from the stored record.
    async fn settled_state(
        &self,
        member: &MemberId,
    ) -> Result<AccessState, EngineError<St::Error>> {
        let record = self
            .store
            .get(member)
            .await
            .map_err(EngineError::Store)?
            .unwrap_or_default();
        Ok(record.access_state())
    }

    async fn notify(&self, member: &MemberId, text: &str) {
        if let Err(err) = self.notifier.notify(member, text).await {
            debug!(member = %member, "notification delivery failed: {err}");
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError<E>
where
    E: Error,
{
    /// The entitlement record could not be read or written.
    #[error("entitlement store: {0}")]
    Store(#[source] E),
}
