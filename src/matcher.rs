//! Per-signal resolution pipeline.
//!
//! The matcher reads the index (exact lookups plus Jaro-Winkler fuzzy
//! name hits), hands the hits to the pure scoring module, and builds the
//! atomic `MatchCommit` for whichever outcome the policy picked. Locking
//! and retries live in the engine; this module never mutates state
//! directly.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::extract::Candidate;
use crate::index::{combine_confidence, IndexKey};
use crate::models::{
    Actor, CandidateRef, Decision, Identifier, IdentifierType, Link, MatchDecision, MatchMethod,
    Provenance, SignalRecord,
};
use crate::scoring::{ActorHit, RankedCandidate};
use crate::stats::{self, ConfidenceModel};
use crate::store::{ActorSnapshot, IdentifierUpsert, IdentityStore, MatchCommit};

/// Link method for an exact hit of a given identifier type
fn exact_method(id_type: IdentifierType) -> MatchMethod {
    if id_type == IdentifierType::OrderId {
        MatchMethod::CrossReference
    } else {
        MatchMethod::ExactMatch
    }
}

pub struct Matcher {
    store: Arc<dyn IdentityStore>,
    config: EngineConfig,
    model: Arc<dyn ConfidenceModel>,
}

impl Matcher {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        config: EngineConfig,
        model: Arc<dyn ConfidenceModel>,
    ) -> Self {
        Self {
            store,
            config,
            model,
        }
    }

    /// Query the index for every candidate and collect per-actor hits.
    ///
    /// Exact lookups for all types; name candidates additionally scan the
    /// brand's name entries for fuzzy hits, with the stored confidence
    /// scaled by string similarity.
    pub async fn gather_hits(&self, brand_id: Uuid, candidates: &[Candidate]) -> Vec<ActorHit> {
        let mut hits = Vec::new();

        for candidate in candidates {
            let key = IndexKey::new(brand_id, candidate.id_type, candidate.value.clone());
            for owner in self.store.lookup(&key).await {
                hits.push(ActorHit {
                    actor_id: owner.actor_id,
                    id_type: candidate.id_type,
                    value: candidate.value.clone(),
                    confidence: owner.confidence,
                    method: exact_method(candidate.id_type),
                    last_seen: owner.last_seen,
                });
            }

            if candidate.id_type == IdentifierType::Name {
                let entries = self
                    .store
                    .entries_of_type(brand_id, IdentifierType::Name)
                    .await;
                for (value, entry) in entries {
                    if value == candidate.value {
                        continue; // exact hit already collected
                    }
                    let similarity = strsim::jaro_winkler(&candidate.value, &value);
                    if similarity >= self.config.matching.fuzzy_name_threshold {
                        debug!(
                            candidate = %candidate.value,
                            indexed = %value,
                            similarity,
                            "fuzzy name hit"
                        );
                        hits.push(ActorHit {
                            actor_id: entry.actor_id,
                            id_type: IdentifierType::Name,
                            value: value.clone(),
                            confidence: entry.confidence * similarity,
                            method: MatchMethod::FuzzyMatch,
                            last_seen: entry.last_seen,
                        });
                    }
                }
            }
        }

        hits
    }

    /// Commit for a `matched` decision: link, identifier upserts onto the
    /// matched actor, and that actor's recomputed stats.
    pub fn matched_commit(
        &self,
        signal: &SignalRecord,
        candidates: &[Candidate],
        top: &RankedCandidate,
        snapshot: &ActorSnapshot,
        now: DateTime<Utc>,
    ) -> MatchCommit {
        let actor_id = snapshot.actor.actor_id;
        let link = Link {
            link_id: Uuid::new_v4(),
            actor_id,
            brand_id: signal.brand_id,
            signal_id: signal.signal_id,
            signal_type: signal.signal_type,
            identifier_type: top.best_hit.id_type,
            identifier_value: top.best_hit.value.clone(),
            method: top.best_hit.method,
            confidence: top.composite,
            occurred_at: signal.received_at,
        };

        let upserts = self.upserts_for(signal, candidates, actor_id);
        let stats = self.projected_stats(snapshot, &upserts, Some(&link), now);

        MatchCommit {
            decision: MatchDecision {
                decision_id: Uuid::new_v4(),
                brand_id: signal.brand_id,
                signal_id: signal.signal_id,
                actor_id: Some(actor_id),
                confidence: top.composite,
                method: Some(top.best_hit.method),
                decision: Decision::Matched,
                reason: format!(
                    "matched on {} with {} corroborating type(s)",
                    top.best_hit.id_type,
                    top.identifier_types.len()
                ),
                candidates: vec![],
                decided_at: now,
            },
            new_actor: None,
            link: Some(link),
            upserts,
            stats: Some((actor_id, stats)),
        }
    }

    /// Commit for a `created_new` decision: fresh actor seeded with the
    /// signal's candidates, plus its first link.
    pub fn created_commit(
        &self,
        signal: &SignalRecord,
        candidates: &[Candidate],
        now: DateTime<Utc>,
    ) -> MatchCommit {
        let actor = Actor::new(signal.brand_id, signal.received_at);
        let actor_id = actor.actor_id;

        // Candidates are ordered by confidence, so the first one anchors
        // the link
        let best = &candidates[0];
        let link = Link {
            link_id: Uuid::new_v4(),
            actor_id,
            brand_id: signal.brand_id,
            signal_id: signal.signal_id,
            signal_type: signal.signal_type,
            identifier_type: best.id_type,
            identifier_value: best.value.clone(),
            method: exact_method(best.id_type),
            confidence: best.confidence,
            occurred_at: signal.received_at,
        };

        let upserts = self.upserts_for(signal, candidates, actor_id);
        let snapshot = ActorSnapshot {
            actor: actor.clone(),
            identifiers: vec![],
            links: vec![],
        };
        let stats = self.projected_stats(&snapshot, &upserts, Some(&link), now);

        MatchCommit {
            decision: MatchDecision {
                decision_id: Uuid::new_v4(),
                brand_id: signal.brand_id,
                signal_id: signal.signal_id,
                actor_id: Some(actor_id),
                confidence: best.confidence,
                method: Some(link.method),
                decision: Decision::CreatedNew,
                reason: format!("no existing actor for {} candidate(s)", candidates.len()),
                candidates: vec![],
                decided_at: now,
            },
            new_actor: Some(actor),
            link: Some(link),
            upserts,
            stats: Some((actor_id, stats)),
        }
    }

    /// Commit for a `flagged_for_review` decision: audit record only, no
    /// link and no identifier writes.
    pub fn flagged_commit(
        &self,
        signal: &SignalRecord,
        ranked: &[RankedCandidate],
        reason: &str,
        now: DateTime<Utc>,
    ) -> MatchCommit {
        MatchCommit {
            decision: MatchDecision {
                decision_id: Uuid::new_v4(),
                brand_id: signal.brand_id,
                signal_id: signal.signal_id,
                actor_id: None,
                confidence: ranked.first().map(|c| c.composite).unwrap_or(0.0),
                method: None,
                decision: Decision::FlaggedForReview,
                reason: reason.to_string(),
                candidates: ranked
                    .iter()
                    .map(|c| CandidateRef {
                        actor_id: c.actor_id,
                        confidence: c.composite,
                    })
                    .collect(),
                decided_at: now,
            },
            new_actor: None,
            link: None,
            upserts: vec![],
            stats: None,
        }
    }

    fn upserts_for(
        &self,
        signal: &SignalRecord,
        candidates: &[Candidate],
        actor_id: Uuid,
    ) -> Vec<IdentifierUpsert> {
        candidates
            .iter()
            .map(|candidate| IdentifierUpsert {
                key: IndexKey::new(signal.brand_id, candidate.id_type, candidate.value.clone()),
                actor_id,
                confidence: candidate.confidence,
                verified: candidate.verified,
                provenance: Provenance {
                    signal_id: signal.signal_id,
                    signal_type: signal.signal_type,
                },
                seen_at: signal.received_at,
            })
            .collect()
    }

    /// Recompute stats against the state the commit will produce, so the
    /// store can apply structure and derived fields in one critical
    /// section.
    fn projected_stats(
        &self,
        snapshot: &ActorSnapshot,
        upserts: &[IdentifierUpsert],
        new_link: Option<&Link>,
        now: DateTime<Utc>,
    ) -> crate::stats::StatsUpdate {
        let mut identifiers = snapshot.identifiers.clone();
        for upsert in upserts {
            match identifiers
                .iter_mut()
                .find(|i| i.id_type == upsert.key.id_type && i.value == upsert.key.value)
            {
                Some(existing) => {
                    existing.confidence =
                        combine_confidence(existing.confidence, upsert.confidence);
                    existing.verified |= upsert.verified;
                    if upsert.seen_at > existing.last_seen {
                        existing.last_seen = upsert.seen_at;
                        existing.provenance = upsert.provenance;
                    }
                }
                None => identifiers.push(Identifier {
                    id_type: upsert.key.id_type,
                    value: upsert.key.value.clone(),
                    confidence: upsert.confidence.clamp(0.0, 1.0),
                    provenance: upsert.provenance,
                    verified: upsert.verified,
                    first_seen: upsert.seen_at,
                    last_seen: upsert.seen_at,
                }),
            }
        }

        let mut links = snapshot.links.clone();
        if let Some(link) = new_link {
            links.push(link.clone());
        }

        stats::recompute(
            &snapshot.actor,
            &identifiers,
            &links,
            self.model.as_ref(),
            &self.config.completeness,
            now,
        )
    }
}
