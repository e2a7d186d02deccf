//! Derived actor stats: pure recomputation after every link or merge.
//!
//! Everything here is derivable from the actor's current identifiers and
//! links alone, which is what keeps the stored fields drift-free: the
//! caller recomputes inside the same critical section that mutated the
//! underlying rows.
//!
//! The identity-confidence curve is deliberately behind a trait — the
//! weights of profile completeness are fixed design constants, the decay
//! behavior is a tunable.

use std::collections::BTreeSet;
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::config::{CompletenessWeights, ConfidenceConfig};
use crate::models::{
    Actor, Identifier, IdentifierType, IdentityQuality, Link, SignalType, VerificationStatus,
};

/// Recomputed derived fields, applied to an actor atomically with the
/// structural change that triggered them
#[derive(Debug, Clone)]
pub struct StatsUpdate {
    pub signal_count: u64,
    pub signal_sources: BTreeSet<SignalType>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub primary_phone: Option<String>,
    pub primary_email: Option<String>,
    pub primary_name: Option<String>,
    pub profile_completeness: f64,
    pub confidence_in_identity: f64,
    pub identity_quality: IdentityQuality,
    pub verification_status: VerificationStatus,
}

/// Tunable identity-confidence curve
pub trait ConfidenceModel: Send + Sync {
    /// Confidence that the actor's identifiers describe one real person,
    /// given the evidence currently attached to it
    fn identity_confidence(
        &self,
        identifiers: &[Identifier],
        first_seen: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> f64;
}

/// Default model: independent-evidence union of the best identifier
/// confidence per type, with exponential staleness decay applied only
/// while fewer than `corroboration_floor` independent types agree.
pub struct DecayingUnionModel {
    config: ConfidenceConfig,
}

impl DecayingUnionModel {
    pub fn new(config: ConfidenceConfig) -> Self {
        Self { config }
    }
}

impl ConfidenceModel for DecayingUnionModel {
    fn identity_confidence(
        &self,
        identifiers: &[Identifier],
        first_seen: DateTime<Utc>,
        _now: DateTime<Utc>,
    ) -> f64 {
        if identifiers.is_empty() {
            return 0.0;
        }

        let best = best_per_type(identifiers);
        let union = 1.0 - best.values().fold(1.0, |acc, c| acc * (1.0 - c.clamp(0.0, 1.0)));

        let corroborating = best
            .values()
            .filter(|c| **c >= self.config.corroboration_min_confidence)
            .count();
        if corroborating >= self.config.corroboration_floor {
            return union.min(1.0);
        }

        // Uncorroborated identities decay: a single evidence channel
        // stretched over a long span is weaker than the same channel
        // confirmed yesterday.
        let latest_evidence = identifiers
            .iter()
            .map(|i| i.last_seen)
            .max()
            .unwrap_or(first_seen);
        let span_days = (latest_evidence - first_seen).num_seconds() as f64 / 86_400.0;
        let decay = 0.5_f64.powf(span_days.max(0.0) / self.config.decay_half_life_days);
        (union * decay).min(1.0)
    }
}

/// Best confidence per identifier type
fn best_per_type(identifiers: &[Identifier]) -> HashMap<IdentifierType, f64> {
    let mut best: HashMap<IdentifierType, f64> = HashMap::new();
    for identifier in identifiers {
        let entry = best.entry(identifier.id_type).or_insert(0.0);
        if identifier.confidence > *entry {
            *entry = identifier.confidence;
        }
    }
    best
}

/// Highest-confidence value of one identifier type
fn primary_value(identifiers: &[Identifier], id_type: IdentifierType) -> Option<String> {
    identifiers
        .iter()
        .filter(|i| i.id_type == id_type)
        .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap_or(std::cmp::Ordering::Equal))
        .map(|i| i.value.clone())
}

/// Weighted profile completeness, capped at 1.0.
///
/// The weights are chosen so no single identifier alone yields a
/// "complete" profile.
pub fn completeness(
    identifiers: &[Identifier],
    signal_count: u64,
    weights: &CompletenessWeights,
) -> f64 {
    let has = |t: IdentifierType| identifiers.iter().any(|i| i.id_type == t);
    let mut score = 0.0;
    if has(IdentifierType::Phone) {
        score += weights.phone;
    }
    if has(IdentifierType::Email) {
        score += weights.email;
    }
    if has(IdentifierType::Name) {
        score += weights.name;
    }
    if signal_count >= weights.signal_depth_at {
        score += weights.signal_depth;
    }
    score.min(1.0)
}

/// Map confidence into quality bands
pub fn quality_band(confidence: f64, has_identifiers: bool) -> IdentityQuality {
    if !has_identifiers {
        IdentityQuality::Unknown
    } else if confidence >= 0.75 {
        IdentityQuality::High
    } else if confidence >= 0.4 {
        IdentityQuality::Medium
    } else {
        IdentityQuality::Low
    }
}

/// Recompute every derived field of an actor from its identifiers and
/// links. Pure; the store applies the result.
pub fn recompute(
    actor: &Actor,
    identifiers: &[Identifier],
    links: &[Link],
    model: &dyn ConfidenceModel,
    weights: &CompletenessWeights,
    now: DateTime<Utc>,
) -> StatsUpdate {
    let signal_count = links.len() as u64;
    let signal_sources: BTreeSet<SignalType> = links.iter().map(|l| l.signal_type).collect();
    // A merge (or a late-arriving signal) can attach links that predate
    // the actor row; first_seen must cover the earliest of them
    let first_seen = links
        .iter()
        .map(|l| l.occurred_at)
        .min()
        .unwrap_or(actor.first_seen)
        .min(actor.first_seen);
    let last_seen = links
        .iter()
        .map(|l| l.occurred_at)
        .max()
        .unwrap_or(actor.last_seen)
        .max(first_seen);

    let confidence_in_identity = model.identity_confidence(identifiers, first_seen, now);

    // Review-flagged actors stay flagged until resolved out of band
    let verification_status = if actor.verification_status == VerificationStatus::Flagged {
        VerificationStatus::Flagged
    } else if identifiers.iter().any(|i| i.verified) {
        VerificationStatus::Verified
    } else {
        VerificationStatus::Unverified
    };

    StatsUpdate {
        signal_count,
        signal_sources,
        first_seen,
        last_seen,
        primary_phone: primary_value(identifiers, IdentifierType::Phone),
        primary_email: primary_value(identifiers, IdentifierType::Email),
        primary_name: primary_value(identifiers, IdentifierType::Name),
        profile_completeness: completeness(identifiers, signal_count, weights),
        confidence_in_identity,
        identity_quality: quality_band(confidence_in_identity, !identifiers.is_empty()),
        verification_status,
    }
}
