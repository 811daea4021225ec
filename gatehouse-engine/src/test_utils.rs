// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test doubles for the engine's external collaborators.
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use gatehouse_core::{BucketId, Config, MemberId};
use thiserror::Error;

use crate::allocator::BucketSelector;
use crate::traits::{LiveMembership, Notifier};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Configuration used across engine tests: pool `[g2, g3, g4]`, payment bucket `payroll`,
/// 48 hour trial.
pub fn test_config() -> Config {
    Config::builder("payroll".into(), "https://example.com/checkout")
        .bucket_pool(["g2".into(), "g3".into(), "g4".into()])
        .build()
        .expect("test configuration is valid")
}

#[derive(Debug, Error)]
#[error("scripted platform failure")]
pub struct ScriptedFailure;

#[derive(Debug, Default)]
struct InnerTestMembership {
    held: HashMap<MemberId, HashSet<BucketId>>,
    departed: HashSet<MemberId>,
    fail_grants: bool,
    fail_revokes: bool,
    grant_calls: Vec<(MemberId, BucketId)>,
    revoke_calls: Vec<(MemberId, BucketId)>,
}

/// Scripted live membership with per-call failure injection.
///
/// Every member is present with an empty bucket set until marked departed. Grants and revokes
/// are recorded even when scripted to fail, so tests can assert on attempted platform calls.
#[derive(Clone, Debug, Default)]
pub struct TestMembership {
    inner: Arc<Mutex<InnerTestMembership>>,
}

impl TestMembership {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InnerTestMembership> {
        self.inner.lock().expect("acquire test membership lock")
    }

    pub fn insert_bucket(&self, member: &MemberId, bucket: BucketId) {
        self.lock().held.entry(member.clone()).or_default().insert(bucket);
    }

    pub fn set_departed(&self, member: &MemberId) {
        let mut inner = self.lock();
        inner.departed.insert(member.clone());
        inner.held.remove(member);
    }

    pub fn set_fail_grants(&self, fail: bool) {
        self.lock().fail_grants = fail;
    }

    pub fn set_fail_revokes(&self, fail: bool) {
        self.lock().fail_revokes = fail;
    }

    pub fn held(&self, member: &MemberId) -> HashSet<BucketId> {
        self.lock().held.get(member).cloned().unwrap_or_default()
    }

    pub fn grant_calls(&self) -> Vec<(MemberId, BucketId)> {
        self.lock().grant_calls.clone()
    }

    pub fn revoke_calls(&self) -> Vec<(MemberId, BucketId)> {
        self.lock().revoke_calls.clone()
    }
}

impl LiveMembership for TestMembership {
    type Error = ScriptedFailure;

    async fn has_bucket(
        &self,
        member: &MemberId,
        bucket: &BucketId,
    ) -> Result<bool, Self::Error> {
        let inner = self.lock();
        Ok(inner
            .held
            .get(member)
            .is_some_and(|held| held.contains(bucket)))
    }

    async fn held_buckets(
        &self,
        member: &MemberId,
    ) -> Result<Option<HashSet<BucketId>>, Self::Error> {
        let inner = self.lock();
        if inner.departed.contains(member) {
            return Ok(None);
        }
        Ok(Some(inner.held.get(member).cloned().unwrap_or_default()))
    }

    async fn grant(
        &self,
        member: &MemberId,
        bucket: &BucketId,
        _reason: &str,
    ) -> Result<(), Self::Error> {
        let mut inner = self.lock();
        inner.grant_calls.push((member.clone(), bucket.clone()));
        if inner.fail_grants {
            return Err(ScriptedFailure);
        }
        inner
            .held
            .entry(member.clone())
            .or_default()
            .insert(bucket.clone());
        Ok(())
    }

    async fn revoke(
        &self,
        member: &MemberId,
        bucket: &BucketId,
        _reason: &str,
    ) -> Result<(), Self::Error> {
        let mut inner = self.lock();
        inner.revoke_calls.push((member.clone(), bucket.clone()));
        if inner.fail_revokes {
            return Err(ScriptedFailure);
        }
        if let Some(held) = inner.held.get_mut(member) {
            held.remove(bucket);
        }
        Ok(())
    }
}

/// Recording notifier with an optional scripted failure mode.
#[derive(Clone, Debug, Default)]
pub struct TestNotifier {
    sent: Arc<Mutex<Vec<(MemberId, String)>>>,
    fail: Arc<Mutex<bool>>,
}

impl TestNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().expect("acquire test notifier lock") = fail;
    }

    pub fn sent(&self) -> Vec<(MemberId, String)> {
        self.sent.lock().expect("acquire test notifier lock").clone()
    }

    pub fn sent_to(&self, member: &MemberId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(to, _)| to == member)
            .map(|(_, text)| text)
            .collect()
    }
}

impl Notifier for TestNotifier {
    type Error = ScriptedFailure;

    async fn notify(&self, member: &MemberId, text: &str) -> Result<(), Self::Error> {
        if *self.fail.lock().expect("acquire test notifier lock") {
            return Err(ScriptedFailure);
        }
        self.sent
            .lock()
            .expect("acquire test notifier lock")
            .push((member.clone(), text.to_string()));
        Ok(())
    }
}

/// Always selects the same bucket.
#[derive(Clone, Debug)]
pub struct FixedSelector(BucketId);

impl FixedSelector {
    pub fn new(bucket: impl Into<BucketId>) -> Self {
        Self(bucket.into())
    }
}

impl BucketSelector for FixedSelector {
    fn select(&mut self, _pool: &[BucketId]) -> BucketId {
        self.0.clone()
    }
}

/// Cycles deterministically through the pool, one bucket per selection.
#[derive(Clone, Debug, Default)]
pub struct RotatingSelector {
    next: usize,
}

impl RotatingSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BucketSelector for RotatingSelector {
    fn select(&mut self, pool: &[BucketId]) -> BucketId {
        let bucket = pool[self.next % pool.len()].clone();
        self.next += 1;
        bucket
    }
}
