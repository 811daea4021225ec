// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashSet;
use std::time::Duration;

use gatehouse_core::{AccessState, BucketId, Config, MemberId};
use gatehouse_store::{EntitlementStore, MemoryStore};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::actor::{EngineActor, ToEngineActor};
use crate::allocator::UniformSelector;
use crate::engine::EntitlementEngine;
use crate::test_utils::{
    RotatingSelector, TestMembership, TestNotifier, init_tracing, test_config,
};

type TestEngine = EntitlementEngine<MemoryStore, TestMembership, RotatingSelector, TestNotifier>;

const HOUR_MS: u64 = 60 * 60 * 1000;
const TRIAL_MS: u64 = 48 * HOUR_MS;

fn test_engine_with_config(
    config: Config,
) -> (TestEngine, MemoryStore, TestMembership, TestNotifier) {
    init_tracing();

    let store = MemoryStore::new();
    let membership = TestMembership::new();
    let notifier = TestNotifier::new();
    let engine = EntitlementEngine::new(
        config,
        store.clone(),
        membership.clone(),
        RotatingSelector::new(),
        notifier.clone(),
    );

    (engine, store, membership, notifier)
}

fn test_engine() -> (TestEngine, MemoryStore, TestMembership, TestNotifier) {
    test_engine_with_config(test_config())
}

fn pool_buckets(membership: &TestMembership, member: &MemberId) -> HashSet<BucketId> {
    let pool = [
        BucketId::from("g2"),
        BucketId::from("g3"),
        BucketId::from("g4"),
    ];
    membership
        .held(member)
        .into_iter()
        .filter(|bucket| pool.contains(bucket))
        .collect()
}

#[tokio::test]
async fn fresh_join_grants_trial() {
    let (mut engine, store, membership, notifier) = test_engine();
    let alice = MemberId::from("alice");

    let state = engine
        .handle_join(&alice, Duration::from_secs(0), 1_000)
        .await
        .unwrap();

    assert_eq!(
        state,
        AccessState::TrialActive {
            expires_at: 1_000 + TRIAL_MS,
            bucket: "g2".into(),
        }
    );

    let record = store.get(&alice).await.unwrap().unwrap();
    assert!(record.trial_used);
    assert_eq!(record.trial_expires_at, Some(1_000 + TRIAL_MS));
    assert_eq!(record.trial_bucket, Some("g2".into()));
    assert_eq!(record.last_join_at, 1_000);
    assert!(!record.paid);

    assert_eq!(pool_buckets(&membership, &alice).len(), 1);
    let sent = notifier.sent_to(&alice);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("48-hour trial"));
}

#[tokio::test]
async fn randomized_selection_stays_in_pool() {
    init_tracing();

    let store = MemoryStore::new();
    let membership = TestMembership::new();
    let mut engine = EntitlementEngine::new(
        test_config(),
        store,
        membership.clone(),
        UniformSelector,
        TestNotifier::new(),
    );
    let alice = MemberId::from("alice");

    engine
        .handle_join(&alice, Duration::from_secs(0), 1_000)
        .await
        .unwrap();

    let held = pool_buckets(&membership, &alice);
    assert_eq!(held.len(), 1, "exactly one of g2/g3/g4 granted");
}

#[tokio::test]
async fn repeated_join_is_idempotent() {
    let (mut engine, store, membership, notifier) = test_engine();
    let alice = MemberId::from("alice");

    engine
        .handle_join(&alice, Duration::from_secs(0), 1_000)
        .await
        .unwrap();
    let record = store.get(&alice).await.unwrap().unwrap();
    let grants = membership.grant_calls().len();
    let sent = notifier.sent().len();

    // A duplicate join event while the trial bucket is held changes nothing but last_join_at.
    let state = engine
        .handle_join(&alice, Duration::from_secs(0), 2_000)
        .await
        .unwrap();

    assert_eq!(
        state,
        AccessState::TrialActive {
            expires_at: 1_000 + TRIAL_MS,
            bucket: "g2".into(),
        }
    );
    let record_after = store.get(&alice).await.unwrap().unwrap();
    assert_eq!(record_after.last_join_at, 2_000);
    assert_eq!(record_after.trial_expires_at, record.trial_expires_at);
    assert_eq!(membership.grant_calls().len(), grants);
    assert!(membership.revoke_calls().is_empty());
    assert_eq!(notifier.sent().len(), sent);
}

#[tokio::test]
async fn trial_is_single_use() {
    let (mut engine, store, membership, notifier) = test_engine();
    let alice = MemberId::from("alice");

    engine
        .handle_join(&alice, Duration::from_secs(0), 1_000)
        .await
        .unwrap();
    engine.sweep(1_000 + TRIAL_MS).await.unwrap();

    // Rejoining after the trial lapsed never grants another one.
    let state = engine
        .handle_join(&alice, Duration::from_secs(0), 2_000 + TRIAL_MS)
        .await
        .unwrap();

    assert_eq!(state, AccessState::TrialConsumed);
    let record = store.get(&alice).await.unwrap().unwrap();
    assert!(record.trial_used);
    assert_eq!(record.trial_expires_at, None);
    assert!(pool_buckets(&membership, &alice).is_empty());

    let sent = notifier.sent_to(&alice);
    assert_eq!(sent.len(), 3, "welcome, expiry, trial-already-used");
    assert!(sent[2].contains("already been used"));
}

#[tokio::test]
async fn join_with_payment_signal_marks_paid() {
    let (mut engine, store, membership, notifier) = test_engine();
    let alice = MemberId::from("alice");
    membership.insert_bucket(&alice, "payroll".into());

    let state = engine
        .handle_join(&alice, Duration::from_secs(0), 1_000)
        .await
        .unwrap();

    assert_eq!(state, AccessState::Paid);
    let record = store.get(&alice).await.unwrap().unwrap();
    assert!(record.paid);
    assert!(!record.trial_used, "the trial was not consumed");
    assert_eq!(record.trial_expires_at, None);
    assert_eq!(pool_buckets(&membership, &alice).len(), 1);
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn account_age_policy_blocks_trial() {
    let config = Config::builder("payroll".into(), "https://example.com/checkout")
        .bucket_pool(["g2".into(), "g3".into(), "g4".into()])
        .min_account_age(Duration::from_secs(7 * 24 * 60 * 60))
        .build()
        .unwrap();
    let (mut engine, store, membership, notifier) = test_engine_with_config(config);
    let alice = MemberId::from("alice");

    let state = engine
        .handle_join(&alice, Duration::from_secs(24 * 60 * 60), 1_000)
        .await
        .unwrap();

    assert_eq!(state, AccessState::NoAccess);
    let record = store.get(&alice).await.unwrap().unwrap();
    assert!(!record.trial_used, "trial stays available for later");
    assert!(membership.grant_calls().is_empty());
    let sent = notifier.sent_to(&alice);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("too new"));

    // Old enough accounts pass the policy.
    let bob = MemberId::from("bob");
    let state = engine
        .handle_join(&bob, Duration::from_secs(8 * 24 * 60 * 60), 2_000)
        .await
        .unwrap();
    assert!(matches!(state, AccessState::TrialActive { .. }));
}

#[tokio::test]
async fn payment_granted_mid_trial_supersedes_it() {
    let (mut engine, store, membership, notifier) = test_engine();
    let alice = MemberId::from("alice");

    engine
        .handle_join(&alice, Duration::from_secs(0), 1_000)
        .await
        .unwrap();
    membership.insert_bucket(&alice, "payroll".into());

    let old_buckets = HashSet::from(["g2".into()]);
    let new_buckets = HashSet::from(["g2".into(), "payroll".into()]);
    let state = engine
        .handle_buckets_changed(&alice, &old_buckets, &new_buckets)
        .await
        .unwrap();

    assert_eq!(state, AccessState::Paid);
    let record = store.get(&alice).await.unwrap().unwrap();
    assert!(record.paid);
    assert!(record.trial_used);
    assert_eq!(record.trial_expires_at, None);
    assert_eq!(record.trial_bucket, None);

    // Exactly one (possibly different) pool bucket after re-randomized enforcement.
    assert_eq!(pool_buckets(&membership, &alice).len(), 1);
    let sent = notifier.sent_to(&alice);
    assert_eq!(sent.len(), 2);
    assert!(sent[1].contains("Payment confirmed"));

    // A later sweep tick finds no expiry to process for this member.
    let revokes = membership.revoke_calls().len();
    engine.sweep(1_000 + TRIAL_MS).await.unwrap();
    assert_eq!(membership.revoke_calls().len(), revokes);
    assert_eq!(notifier.sent_to(&alice).len(), 2);
}

#[tokio::test]
async fn payment_revoked_removes_all_access() {
    let (mut engine, store, membership, _) = test_engine();
    let alice = MemberId::from("alice");
    membership.insert_bucket(&alice, "payroll".into());

    engine
        .handle_join(&alice, Duration::from_secs(0), 1_000)
        .await
        .unwrap();
    let mut old_buckets: HashSet<BucketId> = pool_buckets(&membership, &alice);
    old_buckets.insert("payroll".into());
    let new_buckets = pool_buckets(&membership, &alice);

    let state = engine
        .handle_buckets_changed(&alice, &old_buckets, &new_buckets)
        .await
        .unwrap();

    let record = store.get(&alice).await.unwrap().unwrap();
    assert!(!record.paid);
    assert!(pool_buckets(&membership, &alice).is_empty());
    // No trial is re-granted automatically.
    assert_ne!(state, AccessState::Paid);
    assert!(!matches!(state, AccessState::TrialActive { .. }));
}

#[tokio::test]
async fn unrelated_bucket_changes_are_ignored() {
    let (mut engine, store, membership, notifier) = test_engine();
    let alice = MemberId::from("alice");

    let old_buckets = HashSet::from(["moderator".into()]);
    let new_buckets = HashSet::new();
    engine
        .handle_buckets_changed(&alice, &old_buckets, &new_buckets)
        .await
        .unwrap();

    assert!(store.get(&alice).await.unwrap().is_none());
    assert!(membership.grant_calls().is_empty());
    assert!(membership.revoke_calls().is_empty());
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn sweep_expires_lapsed_trial() {
    let (mut engine, store, membership, notifier) = test_engine();
    let alice = MemberId::from("alice");

    engine
        .handle_join(&alice, Duration::from_secs(0), 1_000)
        .await
        .unwrap();

    // One tick before expiry nothing happens.
    engine.sweep(999 + TRIAL_MS).await.unwrap();
    assert_eq!(pool_buckets(&membership, &alice).len(), 1);

    engine.sweep(1_000 + TRIAL_MS).await.unwrap();

    let record = store.get(&alice).await.unwrap().unwrap();
    assert!(record.trial_used);
    assert_eq!(record.trial_expires_at, None);
    assert_eq!(record.trial_bucket, None);
    assert!(pool_buckets(&membership, &alice).is_empty());

    let sent = notifier.sent_to(&alice);
    assert_eq!(sent.len(), 2);
    assert!(sent[1].contains("trial just ended"));
}

#[tokio::test]
async fn sweep_clears_expiry_even_when_revokes_fail() {
    let (mut engine, store, membership, notifier) = test_engine();
    let alice = MemberId::from("alice");

    engine
        .handle_join(&alice, Duration::from_secs(0), 1_000)
        .await
        .unwrap();

    membership.set_fail_revokes(true);
    engine.sweep(1_000 + TRIAL_MS).await.unwrap();

    // The bookkeeping is cleared even though the member still holds the bucket.
    let record = store.get(&alice).await.unwrap().unwrap();
    assert_eq!(record.trial_expires_at, None);
    assert_eq!(record.trial_bucket, None);
    assert_eq!(pool_buckets(&membership, &alice).len(), 1);
    let revokes = membership.revoke_calls().len();
    let sent = notifier.sent().len();

    // A re-run sweep never re-enters the expiry branch for the same lapsed trial: no repeated
    // removal attempts, no duplicate notifications.
    engine.sweep(2_000 + TRIAL_MS).await.unwrap();
    assert_eq!(membership.revoke_calls().len(), revokes);
    assert_eq!(notifier.sent().len(), sent);
}

#[tokio::test]
async fn sweep_skips_departed_member() {
    let (mut engine, store, membership, notifier) = test_engine();
    let alice = MemberId::from("alice");

    engine
        .handle_join(&alice, Duration::from_secs(0), 1_000)
        .await
        .unwrap();
    membership.set_departed(&alice);
    let sent = notifier.sent().len();

    engine.sweep(1_000 + TRIAL_MS).await.unwrap();

    let record = store.get(&alice).await.unwrap().unwrap();
    assert_eq!(record.trial_expires_at, None);
    assert!(membership.revoke_calls().is_empty());
    assert_eq!(notifier.sent().len(), sent, "no notification for absent members");
}

#[tokio::test]
async fn sweep_self_heals_missed_payment_transition() {
    let (mut engine, store, membership, notifier) = test_engine();
    let alice = MemberId::from("alice");

    engine
        .handle_join(&alice, Duration::from_secs(0), 1_000)
        .await
        .unwrap();
    // The billing integration assigned the payment signal but the change event was lost.
    membership.insert_bucket(&alice, "payroll".into());
    let sent = notifier.sent().len();

    engine.sweep(1_000 + TRIAL_MS).await.unwrap();

    let record = store.get(&alice).await.unwrap().unwrap();
    assert!(record.paid);
    assert_eq!(record.trial_expires_at, None);
    assert_eq!(pool_buckets(&membership, &alice).len(), 1);
    assert_eq!(notifier.sent().len(), sent, "no expiry notification for a paid member");
}

#[tokio::test]
async fn sweep_with_paid_recorded_clears_expiry_only() {
    let (mut engine, store, membership, notifier) = test_engine();
    let alice = MemberId::from("alice");

    // Stale bookkeeping: paid recorded while an expiry is still set.
    store.start_trial(&alice, 5_000, &"g3".into(), 1_000).await.unwrap();
    store.set_paid(&alice, true).await.unwrap();
    membership.insert_bucket(&alice, "g3".into());

    engine.sweep(10_000).await.unwrap();

    let record = store.get(&alice).await.unwrap().unwrap();
    assert!(record.paid);
    assert_eq!(record.trial_expires_at, None);
    assert!(membership.revoke_calls().is_empty(), "no role change");
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn notification_failures_never_affect_entitlements() {
    let (mut engine, store, membership, notifier) = test_engine();
    let alice = MemberId::from("alice");
    notifier.set_fail(true);

    let state = engine
        .handle_join(&alice, Duration::from_secs(0), 1_000)
        .await
        .unwrap();

    assert!(matches!(state, AccessState::TrialActive { .. }));
    let record = store.get(&alice).await.unwrap().unwrap();
    assert!(record.trial_used);
    assert_eq!(pool_buckets(&membership, &alice).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn actor_funnels_events_and_shuts_down() {
    let (engine, store, membership, _) = test_engine();
    let alice = MemberId::from("alice");
    membership.insert_bucket(&alice, "payroll".into());

    let (actor, actor_tx) = EngineActor::new(engine);
    let shutdown_token = CancellationToken::new();
    let handle = tokio::spawn(actor.run(shutdown_token));

    actor_tx
        .send(ToEngineActor::MemberJoined {
            member: alice.clone(),
            account_age: Duration::from_secs(0),
        })
        .await
        .unwrap();

    let (reply_tx, reply_rx) = oneshot::channel();
    actor_tx
        .send(ToEngineActor::Shutdown { reply: reply_tx })
        .await
        .unwrap();
    reply_rx.await.unwrap();
    handle.await.unwrap().unwrap();

    let record = store.get(&alice).await.unwrap().unwrap();
    assert!(record.paid);
}
