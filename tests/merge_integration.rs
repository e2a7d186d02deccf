//! Integration tests for actor merging
//!
//! These tests verify that:
//! 1. A merge reassigns identifiers and links, tombstones the absorbed
//!    actor, and records an audit entry
//! 2. Merges chain transitively through tombstone redirects
//! 3. A failed merge leaves both actors untouched
//! 4. Concurrent merges of the same pair produce exactly one record

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Barrier;
use uuid::Uuid;

use identity_engine::config::EngineConfig;
use identity_engine::index::{IndexKey, OwnerEntry, OwnerList};
use identity_engine::models::{
    Actor, Decision, IdentifierType, IdentityHints, MatchDecision, MergeRecord, Provenance,
    SignalRecord, SignalType,
};
use identity_engine::store::{
    ActorSnapshot, IdentityStore, MatchCommit, MemoryStore, MergeCommit,
};
use identity_engine::{EngineError, MergeError, ResolutionEngine};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn phone_signal(brand_id: Uuid, phone: &str) -> SignalRecord {
    SignalRecord {
        signal_id: Uuid::new_v4(),
        signal_type: SignalType::Order,
        brand_id,
        received_at: Utc::now(),
        hints: IdentityHints {
            phone: Some(phone.to_string()),
            ..Default::default()
        },
    }
}

async fn seed_actor(engine: &ResolutionEngine, brand_id: Uuid, phone: &str) -> Uuid {
    init_tracing();
    let decision = engine.resolve(&phone_signal(brand_id, phone)).await.unwrap();
    assert_eq!(decision.decision, Decision::CreatedNew);
    decision.actor_id.unwrap()
}

#[tokio::test]
async fn test_merge_moves_identifiers_links_and_tombstones_absorbed() {
    let engine = ResolutionEngine::new();
    let brand = Uuid::new_v4();

    let a = seed_actor(&engine, brand, "+15550000001").await;
    let b = seed_actor(&engine, brand, "+15550000002").await;

    let record = engine
        .merge_actors(brand, a, b, "same customer per support ticket")
        .await
        .unwrap();
    let primary = record.primary_id;
    let absorbed = record.merged_id;
    assert_ne!(primary, absorbed);

    // Both original ids now resolve to the surviving primary
    assert_eq!(engine.get_actor(brand, a).await.unwrap().actor_id, primary);
    assert_eq!(engine.get_actor(brand, b).await.unwrap().actor_id, primary);

    let history = engine.get_actor_history(brand, primary).await.unwrap();
    assert_eq!(history.links.len(), 2);
    assert_eq!(history.merges.len(), 1);
    assert_eq!(history.merges[0].merge_id, record.merge_id);

    // Signals for the absorbed actor's phone now land on the primary
    let decision = engine
        .resolve(&phone_signal(brand, "+15550000002"))
        .await
        .unwrap();
    assert_eq!(decision.decision, Decision::Matched);
    assert_eq!(decision.actor_id, Some(primary));
}

#[tokio::test]
async fn test_merges_chain_through_tombstone_redirects() {
    let engine = ResolutionEngine::new();
    let brand = Uuid::new_v4();

    let a = seed_actor(&engine, brand, "+15550000001").await;
    let b = seed_actor(&engine, brand, "+15550000002").await;
    let c = seed_actor(&engine, brand, "+15550000003").await;

    let first = engine.merge_actors(brand, a, b, "duplicate").await.unwrap();
    let absorbed = first.merged_id;

    // Merging through the tombstoned id resolves to its redirect first
    let second = engine.merge_actors(brand, absorbed, c, "duplicate").await.unwrap();
    assert_eq!(second.primary_id, first.primary_id);

    let final_actor = engine.get_actor(brand, a).await.unwrap();
    assert_eq!(engine.get_actor(brand, b).await.unwrap().actor_id, final_actor.actor_id);
    assert_eq!(engine.get_actor(brand, c).await.unwrap().actor_id, final_actor.actor_id);
    assert_eq!(final_actor.signal_count, 3);

    let history = engine
        .get_actor_history(brand, final_actor.actor_id)
        .await
        .unwrap();
    assert_eq!(history.links.len(), 3);
    assert_eq!(history.merges.len(), 2);
}

#[tokio::test]
async fn test_merge_backdates_primary_first_seen_to_earliest_link() {
    let engine = ResolutionEngine::new();
    let brand = Uuid::new_v4();

    // A long-dormant single-signal actor
    let mut old_signal = phone_signal(brand, "+15550000001");
    old_signal.received_at = Utc::now() - chrono::Duration::days(200);
    let old_decision = engine.resolve(&old_signal).await.unwrap();
    assert_eq!(old_decision.decision, Decision::CreatedNew);
    let dormant = old_decision.actor_id.unwrap();

    // A fresher primary with more signals, so it wins the primary choice
    let primary_id = seed_actor(&engine, brand, "+15550000002").await;
    let follow_up = engine.resolve(&phone_signal(brand, "+15550000002")).await.unwrap();
    assert_eq!(follow_up.actor_id, Some(primary_id));

    let record = engine
        .merge_actors(brand, dormant, primary_id, "same customer")
        .await
        .unwrap();
    assert_eq!(record.primary_id, primary_id);

    // The absorbed actor's history predates the primary; first_seen must
    // cover every link the primary now owns
    let primary = engine.get_actor(brand, primary_id).await.unwrap();
    assert_eq!(primary.first_seen, old_signal.received_at);
    let history = engine.get_actor_history(brand, primary_id).await.unwrap();
    assert!(history.links.iter().all(|l| l.occurred_at >= primary.first_seen));

    // And it stays put on the next recompute
    engine.resolve(&phone_signal(brand, "+15550000002")).await.unwrap();
    let primary = engine.get_actor(brand, primary_id).await.unwrap();
    assert_eq!(primary.first_seen, old_signal.received_at);
}

#[tokio::test]
async fn test_self_merge_is_rejected() {
    let engine = ResolutionEngine::new();
    let brand = Uuid::new_v4();
    let a = seed_actor(&engine, brand, "+15550000001").await;

    let err = engine.merge_actors(brand, a, a, "oops").await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Merge(MergeError::SelfMerge { .. })
    ));
}

#[tokio::test]
async fn test_cross_tenant_merge_is_rejected() {
    let engine = ResolutionEngine::new();
    let brand_a = Uuid::new_v4();
    let brand_b = Uuid::new_v4();

    let a = seed_actor(&engine, brand_a, "+15550000001").await;
    let b = seed_actor(&engine, brand_b, "+15550000001").await;

    let err = engine.merge_actors(brand_a, a, b, "never").await.unwrap_err();
    assert!(matches!(err, EngineError::TenantMismatch { .. }));

    // Both actors untouched
    assert!(engine.get_actor(brand_a, a).await.unwrap().is_active());
    assert!(engine.get_actor(brand_b, b).await.unwrap().is_active());
}

/// Store wrapper whose merge commits always fail, for exercising the
/// resolver's failure path.
struct RejectingMergeStore {
    inner: MemoryStore,
}

#[async_trait]
impl IdentityStore for RejectingMergeStore {
    async fn decision_for_signal(&self, signal_id: Uuid) -> Option<MatchDecision> {
        self.inner.decision_for_signal(signal_id).await
    }

    async fn lookup(&self, key: &IndexKey) -> OwnerList {
        self.inner.lookup(key).await
    }

    async fn entries_of_type(
        &self,
        brand_id: Uuid,
        id_type: IdentifierType,
    ) -> Vec<(String, OwnerEntry)> {
        self.inner.entries_of_type(brand_id, id_type).await
    }

    async fn actor(&self, actor_id: Uuid) -> Option<Actor> {
        self.inner.actor(actor_id).await
    }

    async fn actor_snapshot(&self, actor_id: Uuid) -> Option<ActorSnapshot> {
        self.inner.actor_snapshot(actor_id).await
    }

    async fn merges_involving(&self, actor_id: Uuid) -> Vec<MergeRecord> {
        self.inner.merges_involving(actor_id).await
    }

    async fn commit_match(&self, commit: MatchCommit) -> Result<MatchDecision, EngineError> {
        self.inner.commit_match(commit).await
    }

    async fn apply_merge(&self, _commit: MergeCommit) -> Result<(), MergeError> {
        Err(MergeError::Aborted {
            reason: "injected failure".to_string(),
        })
    }

    async fn shared_values(&self, brand_id: Uuid) -> Vec<(IndexKey, Vec<Uuid>)> {
        self.inner.shared_values(brand_id).await
    }
}

#[tokio::test]
async fn test_failed_merge_leaves_both_actors_untouched() {
    let store = Arc::new(RejectingMergeStore {
        inner: MemoryStore::new(),
    });
    let engine = ResolutionEngine::with_store(store.clone(), EngineConfig::default());
    let brand = Uuid::new_v4();

    let a = seed_actor(&engine, brand, "+15550000001").await;
    let b = seed_actor(&engine, brand, "+15550000002").await;

    let err = engine.merge_actors(brand, a, b, "doomed").await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Merge(MergeError::Aborted { .. })
    ));

    for actor_id in [a, b] {
        let actor = engine.get_actor(brand, actor_id).await.unwrap();
        assert!(actor.is_active());
        assert_eq!(actor.signal_count, 1);
    }
    assert!(engine.get_actor_history(brand, a).await.unwrap().merges.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_merges_of_same_pair_yield_one_record() {
    let engine = Arc::new(ResolutionEngine::new());
    let brand = Uuid::new_v4();

    let a = seed_actor(&engine, brand, "+15550000001").await;
    let b = seed_actor(&engine, brand, "+15550000002").await;

    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for _ in 0..2 {
        let engine = engine.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            engine.merge_actors(brand, a, b, "racing merge").await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(EngineError::Merge(MergeError::SelfMerge { .. })) => {}
            Err(other) => panic!("unexpected merge error: {other}"),
        }
    }
    assert_eq!(succeeded, 1);

    let history = engine.get_actor_history(brand, a).await.unwrap();
    assert_eq!(history.merges.len(), 1);
}

#[tokio::test]
async fn test_reconcile_unifies_actors_sharing_a_value() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let brand = Uuid::new_v4();
    let now = Utc::now();

    // Seed two active actors both owning the same phone value, the state
    // a reconciliation sweep exists to repair
    let key = IndexKey::new(brand, IdentifierType::Phone, "+15550000001");
    let mut actor_ids = Vec::new();
    for _ in 0..2 {
        let actor = Actor::new(brand, now);
        actor_ids.push(actor.actor_id);
        store
            .commit_match(MatchCommit {
                decision: MatchDecision {
                    decision_id: Uuid::new_v4(),
                    brand_id: brand,
                    signal_id: Uuid::new_v4(),
                    actor_id: Some(actor.actor_id),
                    confidence: 0.9,
                    method: None,
                    decision: Decision::CreatedNew,
                    reason: "seed".to_string(),
                    candidates: vec![],
                    decided_at: now,
                },
                new_actor: Some(actor.clone()),
                link: None,
                upserts: vec![identity_engine::store::IdentifierUpsert {
                    key: key.clone(),
                    actor_id: actor.actor_id,
                    confidence: 0.9,
                    verified: false,
                    provenance: Provenance {
                        signal_id: Uuid::new_v4(),
                        signal_type: SignalType::Order,
                    },
                    seen_at: now,
                }],
                stats: None,
            })
            .await
            .unwrap();
    }

    let engine = ResolutionEngine::with_store(store.clone(), EngineConfig::default());
    let records = engine.reconcile(brand).await.unwrap();
    assert_eq!(records.len(), 1);

    // One owner remains, and both original ids resolve to it
    let owners = store.lookup(&key).await;
    assert_eq!(owners.len(), 1);
    let survivor = owners[0].actor_id;
    for actor_id in actor_ids {
        assert_eq!(engine.get_actor(brand, actor_id).await.unwrap().actor_id, survivor);
    }

    // A second sweep finds nothing left to do
    assert!(engine.reconcile(brand).await.unwrap().is_empty());
}
