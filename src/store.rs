//! Injectable identity store.
//!
//! The `IdentityStore` trait is the seam between the resolution logic and
//! storage: tests (and future database backends) substitute their own
//! implementation. `MemoryStore` is the authoritative in-memory backend —
//! actors, the identifier index, links, and the append-only decision and
//! merge logs, all under one interior lock so that `commit_match` and
//! `apply_merge` are all-or-nothing.
//!
//! Callers are expected to hold the relevant keyed locks (identifier
//! values, actors) around read-decide-commit sequences; the store itself
//! only guarantees that each individual commit is atomic and validated
//! before any mutation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult, MergeError, MergeResult};
use crate::index::{combine_confidence, sort_owners, IndexKey, OwnerEntry, OwnerList};
use crate::models::{
    Actor, ActorState, Identifier, IdentifierType, Link, MatchDecision, MergeRecord, Provenance,
};
use crate::stats::StatsUpdate;

/// Full view of one actor: its row, owned identifiers, and links
#[derive(Debug, Clone)]
pub struct ActorSnapshot {
    pub actor: Actor,
    pub identifiers: Vec<Identifier>,
    pub links: Vec<Link>,
}

/// One identifier insertion/strengthening, applied inside a commit
#[derive(Debug, Clone)]
pub struct IdentifierUpsert {
    pub key: IndexKey,
    pub actor_id: Uuid,
    pub confidence: f64,
    pub verified: bool,
    pub provenance: Provenance,
    pub seen_at: DateTime<Utc>,
}

/// Everything one resolution writes, applied atomically:
/// decision (always), new actor / link / identifier upserts / recomputed
/// stats (depending on the decision).
#[derive(Debug, Clone)]
pub struct MatchCommit {
    pub decision: MatchDecision,
    pub new_actor: Option<Actor>,
    pub link: Option<Link>,
    pub upserts: Vec<IdentifierUpsert>,
    /// Recomputed derived fields for the affected actor
    pub stats: Option<(Uuid, StatsUpdate)>,
}

/// Everything one merge writes, applied atomically
#[derive(Debug, Clone)]
pub struct MergeCommit {
    pub record: MergeRecord,
    /// Recomputed derived fields for the surviving primary
    pub primary_stats: StatsUpdate,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Recorded decision for a signal, if it was already resolved
    async fn decision_for_signal(&self, signal_id: Uuid) -> Option<MatchDecision>;

    /// Owners of an identifier value, highest confidence first
    async fn lookup(&self, key: &IndexKey) -> OwnerList;

    /// All indexed values of one type under a brand (fuzzy scans,
    /// reconciliation)
    async fn entries_of_type(
        &self,
        brand_id: Uuid,
        id_type: IdentifierType,
    ) -> Vec<(String, OwnerEntry)>;

    async fn actor(&self, actor_id: Uuid) -> Option<Actor>;

    async fn actor_snapshot(&self, actor_id: Uuid) -> Option<ActorSnapshot>;

    /// Merge records where the actor was primary or absorbed
    async fn merges_involving(&self, actor_id: Uuid) -> Vec<MergeRecord>;

    /// Apply one resolution atomically. Idempotent per signal: if a
    /// decision for the signal already exists it is returned unchanged
    /// and nothing is written.
    async fn commit_match(&self, commit: MatchCommit) -> EngineResult<MatchDecision>;

    /// Apply one merge atomically. Validates lifecycle invariants before
    /// mutating anything; a failed validation leaves both actors and all
    /// identifiers untouched.
    async fn apply_merge(&self, commit: MergeCommit) -> MergeResult<()>;

    /// Values owned by more than one active actor under a brand
    /// (reconciliation sweep input)
    async fn shared_values(&self, brand_id: Uuid) -> Vec<(IndexKey, Vec<Uuid>)>;
}

/// Tombstone chains are depth 1 in practice (tombstones are never merge
/// targets); the bound is cycle protection, not an expected case.
pub const MAX_REDIRECT_DEPTH: usize = 8;

/// Resolve an actor id to its current active actor, following tombstone
/// redirects transparently.
pub async fn follow_redirects(store: &dyn IdentityStore, actor_id: Uuid) -> EngineResult<Actor> {
    let mut current = actor_id;
    for _ in 0..MAX_REDIRECT_DEPTH {
        let actor = store
            .actor(current)
            .await
            .ok_or(EngineError::ActorNotFound { actor_id: current })?;
        match actor.merged_into() {
            None => return Ok(actor),
            Some(into) => current = into,
        }
    }
    Err(EngineError::RedirectCycle {
        actor_id,
        depth: MAX_REDIRECT_DEPTH,
    })
}

#[derive(Default)]
struct State {
    actors: HashMap<Uuid, Actor>,
    identifiers: HashMap<IndexKey, OwnerList>,
    links: Vec<Link>,
    decisions: Vec<MatchDecision>,
    decision_by_signal: HashMap<Uuid, usize>,
    merges: Vec<MergeRecord>,
}

impl State {
    fn identifiers_of_actor(&self, actor_id: Uuid) -> Vec<Identifier> {
        let mut out = Vec::new();
        for (key, owners) in &self.identifiers {
            for entry in owners {
                if entry.actor_id == actor_id {
                    out.push(Identifier {
                        id_type: key.id_type,
                        value: key.value.clone(),
                        confidence: entry.confidence,
                        provenance: entry.provenance,
                        verified: entry.verified,
                        first_seen: entry.first_seen,
                        last_seen: entry.last_seen,
                    });
                }
            }
        }
        out
    }

    fn links_of_actor(&self, actor_id: Uuid) -> Vec<Link> {
        let mut links: Vec<Link> = self
            .links
            .iter()
            .filter(|l| l.actor_id == actor_id)
            .cloned()
            .collect();
        links.sort_by_key(|l| l.occurred_at);
        links
    }

    fn apply_stats(&mut self, actor_id: Uuid, stats: &StatsUpdate) {
        if let Some(actor) = self.actors.get_mut(&actor_id) {
            actor.signal_count = stats.signal_count;
            actor.signal_sources = stats.signal_sources.clone();
            actor.first_seen = stats.first_seen;
            actor.last_seen = stats.last_seen;
            actor.primary_phone = stats.primary_phone.clone();
            actor.primary_email = stats.primary_email.clone();
            actor.primary_name = stats.primary_name.clone();
            actor.profile_completeness = stats.profile_completeness;
            actor.confidence_in_identity = stats.confidence_in_identity;
            actor.identity_quality = stats.identity_quality;
            actor.verification_status = stats.verification_status;
        }
    }
}

/// In-memory store backend
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn decision_for_signal(&self, signal_id: Uuid) -> Option<MatchDecision> {
        let state = self.state.read().expect("store lock poisoned");
        state
            .decision_by_signal
            .get(&signal_id)
            .map(|idx| state.decisions[*idx].clone())
    }

    async fn lookup(&self, key: &IndexKey) -> OwnerList {
        let state = self.state.read().expect("store lock poisoned");
        let mut owners = state.identifiers.get(key).cloned().unwrap_or_default();
        sort_owners(&mut owners);
        owners
    }

    async fn entries_of_type(
        &self,
        brand_id: Uuid,
        id_type: IdentifierType,
    ) -> Vec<(String, OwnerEntry)> {
        let state = self.state.read().expect("store lock poisoned");
        let mut out = Vec::new();
        for (key, owners) in &state.identifiers {
            if key.brand_id != brand_id || key.id_type != id_type {
                continue;
            }
            for entry in owners {
                out.push((key.value.clone(), entry.clone()));
            }
        }
        out
    }

    async fn actor(&self, actor_id: Uuid) -> Option<Actor> {
        let state = self.state.read().expect("store lock poisoned");
        state.actors.get(&actor_id).cloned()
    }

    async fn actor_snapshot(&self, actor_id: Uuid) -> Option<ActorSnapshot> {
        let state = self.state.read().expect("store lock poisoned");
        let actor = state.actors.get(&actor_id)?.clone();
        Some(ActorSnapshot {
            identifiers: state.identifiers_of_actor(actor_id),
            links: state.links_of_actor(actor_id),
            actor,
        })
    }

    async fn merges_involving(&self, actor_id: Uuid) -> Vec<MergeRecord> {
        let state = self.state.read().expect("store lock poisoned");
        state
            .merges
            .iter()
            .filter(|m| m.primary_id == actor_id || m.merged_id == actor_id)
            .cloned()
            .collect()
    }

    async fn commit_match(&self, commit: MatchCommit) -> EngineResult<MatchDecision> {
        let mut state = self.state.write().expect("store lock poisoned");

        // Idempotency: one decision (and at most one link) per signal
        if let Some(idx) = state.decision_by_signal.get(&commit.decision.signal_id) {
            return Ok(state.decisions[*idx].clone());
        }

        // Validate before mutating anything
        if let Some(link) = &commit.link {
            let target = match (&commit.new_actor, state.actors.get(&link.actor_id)) {
                (Some(new_actor), _) if new_actor.actor_id == link.actor_id => new_actor,
                (_, Some(existing)) => existing,
                _ => {
                    return Err(EngineError::ActorNotFound {
                        actor_id: link.actor_id,
                    })
                }
            };
            if let Some(into) = target.merged_into() {
                return Err(EngineError::ActorTombstoned {
                    actor_id: link.actor_id,
                    into,
                });
            }
            if target.brand_id != commit.decision.brand_id {
                return Err(EngineError::TenantMismatch {
                    actor_id: link.actor_id,
                    brand_id: commit.decision.brand_id,
                });
            }
        }

        if let Some(actor) = commit.new_actor {
            state.actors.insert(actor.actor_id, actor);
        }
        if let Some(link) = commit.link {
            state.links.push(link);
        }
        for upsert in commit.upserts {
            let owners = state.identifiers.entry(upsert.key).or_default();
            match owners.iter_mut().find(|o| o.actor_id == upsert.actor_id) {
                Some(entry) => {
                    // Monotonic: independent-evidence union, never a
                    // plain overwrite
                    entry.confidence = combine_confidence(entry.confidence, upsert.confidence);
                    entry.verified |= upsert.verified;
                    if upsert.seen_at > entry.last_seen {
                        entry.last_seen = upsert.seen_at;
                        entry.provenance = upsert.provenance;
                    }
                }
                None => owners.push(OwnerEntry {
                    actor_id: upsert.actor_id,
                    confidence: upsert.confidence.clamp(0.0, 1.0),
                    verified: upsert.verified,
                    provenance: upsert.provenance,
                    first_seen: upsert.seen_at,
                    last_seen: upsert.seen_at,
                }),
            }
            sort_owners(owners);
        }
        if let Some((actor_id, stats)) = &commit.stats {
            state.apply_stats(*actor_id, stats);
        }

        let idx = state.decisions.len();
        state
            .decision_by_signal
            .insert(commit.decision.signal_id, idx);
        state.decisions.push(commit.decision);
        Ok(state.decisions[idx].clone())
    }

    async fn apply_merge(&self, commit: MergeCommit) -> MergeResult<()> {
        let mut state = self.state.write().expect("store lock poisoned");
        let record = &commit.record;

        // Validate lifecycle invariants before any mutation
        let primary = state
            .actors
            .get(&record.primary_id)
            .ok_or(MergeError::ActorNotFound {
                actor_id: record.primary_id,
            })?;
        let merged = state
            .actors
            .get(&record.merged_id)
            .ok_or(MergeError::ActorNotFound {
                actor_id: record.merged_id,
            })?;
        if primary.brand_id != merged.brand_id {
            return Err(MergeError::CrossTenant {
                primary: record.primary_id,
                merged: record.merged_id,
            });
        }
        if let Some(into) = primary.merged_into() {
            return Err(MergeError::TargetTombstoned {
                actor_id: record.primary_id,
                into,
            });
        }
        if let Some(into) = merged.merged_into() {
            return Err(MergeError::SourceTombstoned {
                actor_id: record.merged_id,
                into,
            });
        }

        // Reassign identifiers merged → primary, folding contested
        // entries into single ownership
        for owners in state.identifiers.values_mut() {
            let Some(pos) = owners.iter().position(|o| o.actor_id == record.merged_id) else {
                continue;
            };
            if let Some(existing) = owners
                .iter()
                .position(|o| o.actor_id == record.primary_id)
            {
                let absorbed = owners.remove(pos);
                let existing = if existing > pos { existing - 1 } else { existing };
                let entry = &mut owners[existing];
                entry.confidence = combine_confidence(entry.confidence, absorbed.confidence);
                entry.verified |= absorbed.verified;
                entry.first_seen = entry.first_seen.min(absorbed.first_seen);
                if absorbed.last_seen > entry.last_seen {
                    entry.last_seen = absorbed.last_seen;
                    entry.provenance = absorbed.provenance;
                }
            } else {
                owners[pos].actor_id = record.primary_id;
            }
            sort_owners(owners);
        }

        // Re-own links so none dangle
        for link in state.links.iter_mut() {
            if link.actor_id == record.merged_id {
                link.actor_id = record.primary_id;
            }
        }

        let primary_id = record.primary_id;
        if let Some(merged) = state.actors.get_mut(&record.merged_id) {
            merged.state = ActorState::Merged { into: primary_id };
        }
        state.apply_stats(record.primary_id, &commit.primary_stats);
        state.merges.push(commit.record);
        Ok(())
    }

    async fn shared_values(&self, brand_id: Uuid) -> Vec<(IndexKey, Vec<Uuid>)> {
        let state = self.state.read().expect("store lock poisoned");
        let mut out = Vec::new();
        for (key, owners) in &state.identifiers {
            if key.brand_id != brand_id {
                continue;
            }
            let mut active: Vec<Uuid> = owners
                .iter()
                .filter(|o| {
                    state
                        .actors
                        .get(&o.actor_id)
                        .map(|a| a.is_active())
                        .unwrap_or(false)
                })
                .map(|o| o.actor_id)
                .collect();
            active.dedup();
            if active.len() > 1 {
                out.push((key.clone(), active));
            }
        }
        out
    }
}
