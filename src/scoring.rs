//! Pure match scoring and the decision policy.
//!
//! No storage, no locks: given the index hits for one signal's candidates
//! this module ranks candidate actors and applies the uniform decision
//! policy. Deterministic, so it is unit-tested without a store or a lock
//! manager.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::MatchConfig;
use crate::models::{IdentifierType, MatchMethod};

/// One index hit attributed to a candidate actor
#[derive(Debug, Clone)]
pub struct ActorHit {
    pub actor_id: Uuid,
    pub id_type: IdentifierType,
    pub value: String,
    /// Match confidence: the stored identifier confidence, scaled by
    /// string similarity for fuzzy name hits
    pub confidence: f64,
    pub method: MatchMethod,
    pub last_seen: DateTime<Utc>,
}

/// A candidate actor after aggregation across all of a signal's hits
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub actor_id: Uuid,
    /// Max single-identifier confidence among phone/email hits, plus the
    /// corroboration bonus when multiple independent types agree
    pub composite: f64,
    /// Most recent activity across the contributing hits (tie-break)
    pub last_seen: DateTime<Utc>,
    /// Distinct identifier types that agreed on this actor
    pub identifier_types: BTreeSet<IdentifierType>,
    /// The hit that supplied the composite score; recorded on the link
    pub best_hit: ActorHit,
}

/// Outcome of the decision policy
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    /// The index returned nothing for every candidate
    NoCandidates,

    /// Clear winner above the match threshold
    Matched { top: RankedCandidate },

    /// Two candidates above threshold within the ambiguity band
    Ambiguous {
        top: RankedCandidate,
        runner_up: RankedCandidate,
        margin: f64,
    },

    /// Candidates exist but the best composite is below threshold
    BelowThreshold { top: RankedCandidate },
}

/// Aggregate hits into ranked candidate actors.
///
/// Composite confidence is the maximum single-identifier confidence among
/// phone/email hits; when more than one independent identifier type
/// agrees on the same actor, the corroboration bonus is added (capped at
/// 1.0) — corroboration beats single-field coincidence. Ranking is by
/// composite descending, tie-broken by most-recent `last_seen`.
pub fn rank_candidates(hits: Vec<ActorHit>, config: &MatchConfig) -> Vec<RankedCandidate> {
    let mut by_actor: HashMap<Uuid, Vec<ActorHit>> = HashMap::new();
    for hit in hits {
        by_actor.entry(hit.actor_id).or_default().push(hit);
    }

    let mut ranked: Vec<RankedCandidate> = by_actor
        .into_iter()
        .map(|(actor_id, actor_hits)| {
            let identifier_types: BTreeSet<IdentifierType> =
                actor_hits.iter().map(|h| h.id_type).collect();
            let last_seen = actor_hits
                .iter()
                .map(|h| h.last_seen)
                .max()
                .expect("at least one hit per actor");

            let strong_best = actor_hits
                .iter()
                .filter(|h| h.id_type.is_strong())
                .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap_or(std::cmp::Ordering::Equal));
            let overall_best = actor_hits
                .iter()
                .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap_or(std::cmp::Ordering::Equal))
                .expect("at least one hit per actor");

            let mut composite = strong_best.map(|h| h.confidence).unwrap_or(0.0);
            if identifier_types.len() > 1 {
                composite = (composite + config.corroboration_bonus).min(1.0);
            }

            let best_hit = strong_best.unwrap_or(overall_best).clone();

            RankedCandidate {
                actor_id,
                composite,
                last_seen,
                identifier_types,
                best_hit,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.composite
            .partial_cmp(&a.composite)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.last_seen.cmp(&a.last_seen))
    });
    ranked.truncate(config.max_candidates);
    ranked
}

/// Apply the uniform decision policy to ranked candidates.
///
/// Rules:
/// 1. No candidates → `NoCandidates` (the matcher creates a new actor)
/// 2. Top two candidates ≥ threshold within the ambiguity band →
///    `Ambiguous` (flagged for review)
/// 3. Top candidate ≥ threshold → `Matched`
/// 4. Otherwise → `BelowThreshold` (flagged for review)
pub fn decide(mut ranked: Vec<RankedCandidate>, config: &MatchConfig) -> MatchOutcome {
    if ranked.is_empty() {
        return MatchOutcome::NoCandidates;
    }

    let top = ranked.remove(0);
    if top.composite < config.match_threshold {
        return MatchOutcome::BelowThreshold { top };
    }

    if let Some(runner_up) = ranked.into_iter().next() {
        let margin = top.composite - runner_up.composite;
        if runner_up.composite >= config.match_threshold && margin < config.ambiguity_margin {
            return MatchOutcome::Ambiguous {
                top,
                runner_up,
                margin,
            };
        }
    }

    MatchOutcome::Matched { top }
}
