// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory entitlement ledger.
//!
//! Does not persist anything across process runs; intended for development and test contexts.
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use gatehouse_core::{BucketId, EntitlementRecord, MemberId, Timestamp};

use crate::traits::EntitlementStore;

#[derive(Debug, Default)]
pub struct InnerMemoryStore {
    records: HashMap<MemberId, EntitlementRecord>,
}

impl InnerMemoryStore {
    fn record_mut(&mut self, member: &MemberId) -> &mut EntitlementRecord {
        self.records.entry(member.clone()).or_default()
    }
}

/// In-memory entitlement store.
///
/// Supports usage in asynchronous contexts by wrapping an `InnerMemoryStore` with an `RwLock`
/// and `Arc`. Mutations take the write lock for the whole record update, which gives the
/// per-record atomicity the [`EntitlementStore`] contract asks for.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<InnerMemoryStore>>,
}

impl MemoryStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Obtain a read-lock on the store.
    pub fn read_store(&self) -> RwLockReadGuard<'_, InnerMemoryStore> {
        self.inner
            .read()
            .expect("acquire shared read access on store")
    }

    /// Obtain a write-lock on the store.
    pub fn write_store(&self) -> RwLockWriteGuard<'_, InnerMemoryStore> {
        self.inner
            .write()
            .expect("acquire exclusive write access on store")
    }
}

impl EntitlementStore for MemoryStore {
    type Error = Infallible;

    async fn get(&self, member: &MemberId) -> Result<Option<EntitlementRecord>, Self::Error> {
        let store = self.read_store();
        Ok(store.records.get(member).cloned())
    }

    async fn upsert_join(&self, member: &MemberId, now: Timestamp) -> Result<(), Self::Error> {
        let mut store = self.write_store();
        store.record_mut(member).last_join_at = now;
        Ok(())
    }

    async fn start_trial(
        &self,
        member: &MemberId,
        expires_at: Timestamp,
        bucket: &BucketId,
        now: Timestamp,
    ) -> Result<(), Self::Error> {
        let mut store = self.write_store();
        let record = store.record_mut(member);
        record.trial_used = true;
        record.trial_expires_at = Some(expires_at);
        record.trial_bucket = Some(bucket.clone());
        record.last_join_at = now;
        Ok(())
    }

    async fn clear_trial(&self, member: &MemberId) -> Result<(), Self::Error> {
        let mut store = self.write_store();
        let record = store.record_mut(member);
        record.trial_expires_at = None;
        record.trial_bucket = None;
        Ok(())
    }

    async fn set_paid(&self, member: &MemberId, paid: bool) -> Result<(), Self::Error> {
        let mut store = self.write_store();
        store.record_mut(member).paid = paid;
        Ok(())
    }

    async fn expired_trials(
        &self,
        now: Timestamp,
    ) -> Result<Vec<(MemberId, Option<BucketId>)>, Self::Error> {
        let store = self.read_store();
        let mut expired: Vec<_> = store
            .records
            .iter()
            .filter(|(_, record)| matches!(record.trial_expires_at, Some(at) if at <= now))
            .map(|(member, record)| (member.clone(), record.trial_bucket.clone()))
            .collect();
        // Deterministic sweep order per run.
        expired.sort();
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use gatehouse_core::AccessState;

    use super::*;

    #[tokio::test]
    async fn upsert_creates_records() {
        let store = MemoryStore::new();
        let alice = MemberId::from("alice");

        assert!(store.get(&alice).await.unwrap().is_none());

        store.upsert_join(&alice, 17).await.unwrap();
        let record = store.get(&alice).await.unwrap().unwrap();
        assert_eq!(record.last_join_at, 17);
        assert_eq!(record.access_state(), AccessState::NoAccess);

        // Writes on unknown members never fail, they create the record.
        let bob = MemberId::from("bob");
        store.set_paid(&bob, true).await.unwrap();
        let record = store.get(&bob).await.unwrap().unwrap();
        assert!(record.paid);
        assert_eq!(record.last_join_at, 0);
    }

    #[tokio::test]
    async fn trial_round_trip() {
        let store = MemoryStore::new();
        let alice = MemberId::from("alice");
        let bucket = BucketId::from("g2");

        store.start_trial(&alice, 1_000, &bucket, 10).await.unwrap();

        let record = store.get(&alice).await.unwrap().unwrap();
        assert!(record.trial_used);
        assert_eq!(record.trial_expires_at, Some(1_000));
        assert_eq!(record.trial_bucket, Some(bucket.clone()));
        assert_eq!(record.last_join_at, 10);

        // Not yet expired.
        assert!(store.expired_trials(999).await.unwrap().is_empty());
        // Expired at and after the stored timestamp.
        assert_eq!(
            store.expired_trials(1_000).await.unwrap(),
            vec![(alice.clone(), Some(bucket))]
        );

        store.clear_trial(&alice).await.unwrap();
        let record = store.get(&alice).await.unwrap().unwrap();
        assert!(record.trial_used, "clearing a trial never resets trial_used");
        assert_eq!(record.trial_expires_at, None);
        assert_eq!(record.trial_bucket, None);
        assert!(store.expired_trials(u64::MAX).await.unwrap().is_empty());
    }
}
