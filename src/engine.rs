//! `ResolutionEngine`: the external surface of the subsystem.
//!
//! `resolve` is the only mutating entry point for signals; merges go
//! through `merge_actors`/`reconcile`. The engine owns the keyed lock
//! manager and the read-decide-commit choreography:
//!
//! 1. value locks on every candidate identifier (sorted, so concurrent
//!    signals sharing a value serialize and disjoint ones run parallel),
//! 2. idempotency re-check under those locks,
//! 3. index lookups → pure scoring → decision,
//! 4. actor lock, tombstone re-check, then one atomic store commit.
//!
//! Value locks are always taken before actor locks, and both classes are
//! acquired in sorted order, which rules out deadlock against merges.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::extract::{extract_candidates, Candidate};
use crate::index::IndexKey;
use crate::locks::{actor_key, value_key, LockManager};
use crate::matcher::Matcher;
use crate::merge::MergeResolver;
use crate::models::{Actor, Link, MatchDecision, MergeRecord, SignalRecord};
use crate::scoring::{decide, rank_candidates, MatchOutcome, RankedCandidate};
use crate::stats::{ConfidenceModel, DecayingUnionModel};
use crate::store::{follow_redirects, IdentityStore, MemoryStore};

/// Audit view of one actor: its links and the merges that shaped it
#[derive(Debug, Clone)]
pub struct ActorHistory {
    /// The active actor the queried id resolves to
    pub actor_id: Uuid,
    /// Links in `occurred_at` order
    pub links: Vec<Link>,
    /// Merge records involving the actor, in `merged_at` order
    pub merges: Vec<MergeRecord>,
}

pub struct ResolutionEngine {
    store: Arc<dyn IdentityStore>,
    locks: Arc<LockManager>,
    matcher: Matcher,
    merger: MergeResolver,
    config: EngineConfig,
}

impl ResolutionEngine {
    /// Engine over the in-memory store with default configuration
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), config)
    }

    /// Engine over an injected store (tests substitute fakes here)
    pub fn with_store(store: Arc<dyn IdentityStore>, config: EngineConfig) -> Self {
        let model: Arc<dyn ConfidenceModel> =
            Arc::new(DecayingUnionModel::new(config.confidence.clone()));
        Self::with_store_and_model(store, model, config)
    }

    /// Full wiring control, including a custom confidence model
    pub fn with_store_and_model(
        store: Arc<dyn IdentityStore>,
        model: Arc<dyn ConfidenceModel>,
        config: EngineConfig,
    ) -> Self {
        let locks = Arc::new(LockManager::new(config.locks.clone()));
        let matcher = Matcher::new(store.clone(), config.clone(), model.clone());
        let merger = MergeResolver::new(store.clone(), locks.clone(), model, config.clone());
        Self {
            store,
            locks,
            matcher,
            merger,
            config,
        }
    }

    /// Resolve one signal to a terminal decision.
    ///
    /// Idempotent: re-submitting an already-resolved signal returns the
    /// recorded decision without creating a second link or actor.
    pub async fn resolve(&self, signal: &SignalRecord) -> EngineResult<MatchDecision> {
        // Fast path before taking any locks
        if let Some(existing) = self.store.decision_for_signal(signal.signal_id).await {
            debug!(signal_id = %signal.signal_id, "signal already resolved");
            return Ok(existing);
        }

        let now = Utc::now();
        let candidates = extract_candidates(signal);
        if candidates.is_empty() {
            debug!(signal_id = %signal.signal_id, "signal carries no usable identifiers");
            let commit =
                self.matcher
                    .flagged_commit(signal, &[], "no usable identifiers extracted", now);
            return self.store.commit_match(commit).await;
        }

        // Serialize against other signals claiming any of the same values
        let keys: Vec<u64> = candidates
            .iter()
            .map(|c| value_key(&IndexKey::new(signal.brand_id, c.id_type, c.value.clone())))
            .collect();
        let _value_guard = self.locks.acquire_all(&keys).await?;

        // The race may have been lost to a duplicate submission
        if let Some(existing) = self.store.decision_for_signal(signal.signal_id).await {
            return Ok(existing);
        }

        let hits = self.matcher.gather_hits(signal.brand_id, &candidates).await;
        let ranked = rank_candidates(hits, &self.config.matching);

        match decide(ranked, &self.config.matching) {
            MatchOutcome::NoCandidates => {
                let commit = self.matcher.created_commit(signal, &candidates, now);
                let decision = self.store.commit_match(commit).await?;
                info!(
                    signal_id = %signal.signal_id,
                    actor_id = ?decision.actor_id,
                    "created new actor"
                );
                Ok(decision)
            }
            MatchOutcome::Matched { top } => self.commit_matched(signal, &candidates, top).await,
            MatchOutcome::Ambiguous {
                top,
                runner_up,
                margin,
            } => {
                info!(
                    signal_id = %signal.signal_id,
                    top = %top.actor_id,
                    runner_up = %runner_up.actor_id,
                    margin,
                    "ambiguous match flagged for review"
                );
                let reason =
                    format!("two candidates within ambiguity band (margin {margin:.3})");
                let commit = self
                    .matcher
                    .flagged_commit(signal, &[top, runner_up], &reason, now);
                self.store.commit_match(commit).await
            }
            MatchOutcome::BelowThreshold { top } => {
                let reason = format!(
                    "composite {:.2} below match threshold {:.2}",
                    top.composite, self.config.matching.match_threshold
                );
                let commit = self.matcher.flagged_commit(signal, &[top], &reason, now);
                self.store.commit_match(commit).await
            }
        }
    }

    /// Commit a matched decision under the target actor's lock, chasing
    /// the tombstone redirect if a merge got there first.
    async fn commit_matched(
        &self,
        signal: &SignalRecord,
        candidates: &[Candidate],
        top: RankedCandidate,
    ) -> EngineResult<MatchDecision> {
        let mut target = top.actor_id;

        for _ in 0..=self.config.redirect_retries {
            let _actor_guard = self.locks.acquire(actor_key(&target)).await?;
            let snapshot = self
                .store
                .actor_snapshot(target)
                .await
                .ok_or(EngineError::ActorNotFound { actor_id: target })?;

            if let Some(into) = snapshot.actor.merged_into() {
                debug!(actor_id = %target, %into, "match target tombstoned, following redirect");
                target = into;
                continue;
            }

            let now = Utc::now();
            let commit = self
                .matcher
                .matched_commit(signal, candidates, &top, &snapshot, now);
            let decision = self.store.commit_match(commit).await?;
            debug!(
                signal_id = %signal.signal_id,
                actor_id = %target,
                confidence = top.composite,
                "signal matched"
            );
            return Ok(decision);
        }

        Err(EngineError::RedirectCycle {
            actor_id: target,
            depth: self.config.redirect_retries,
        })
    }

    /// Fetch an actor, following tombstone redirection transparently
    pub async fn get_actor(&self, brand_id: Uuid, actor_id: Uuid) -> EngineResult<Actor> {
        let actor = follow_redirects(self.store.as_ref(), actor_id).await?;
        if actor.brand_id != brand_id {
            return Err(EngineError::TenantMismatch {
                actor_id: actor.actor_id,
                brand_id,
            });
        }
        Ok(actor)
    }

    /// Audit history of an actor (links and merges, in order)
    pub async fn get_actor_history(
        &self,
        brand_id: Uuid,
        actor_id: Uuid,
    ) -> EngineResult<ActorHistory> {
        let actor = self.get_actor(brand_id, actor_id).await?;
        let snapshot = self
            .store
            .actor_snapshot(actor.actor_id)
            .await
            .ok_or(EngineError::ActorNotFound {
                actor_id: actor.actor_id,
            })?;
        let mut merges = self.store.merges_involving(actor.actor_id).await;
        merges.sort_by_key(|m| m.merged_at);
        Ok(ActorHistory {
            actor_id: actor.actor_id,
            links: snapshot.links,
            merges,
        })
    }

    /// Explicitly merge two actors of one brand
    pub async fn merge_actors(
        &self,
        brand_id: Uuid,
        a: Uuid,
        b: Uuid,
        reason: &str,
    ) -> EngineResult<MergeRecord> {
        self.merger.merge(brand_id, a, b, reason).await
    }

    /// Sweep the brand's index for values shared across distinct actors
    /// and merge the duplicates
    pub async fn reconcile(&self, brand_id: Uuid) -> EngineResult<Vec<MergeRecord>> {
        self.merger.reconcile(brand_id).await
    }
}

impl Default for ResolutionEngine {
    fn default() -> Self {
        Self::new()
    }
}
