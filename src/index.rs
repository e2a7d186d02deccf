//! Identifier index types and the confidence combination rule.
//!
//! The index is the authoritative mapping from `(brand, type, normalized
//! value)` to owning actors. The brand is part of the key, so a value seen
//! under one brand can structurally never resolve to an actor of another.
//!
//! A value normally has exactly one owner; a second owner can appear
//! transiently during a contested match and is converged back to single
//! ownership by the merge resolver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use uuid::Uuid;

use crate::models::{IdentifierType, Provenance};

/// Index key. `Ord` so multi-key lock acquisition can sort keys into a
/// deterministic order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexKey {
    pub brand_id: Uuid,
    pub id_type: IdentifierType,
    pub value: String,
}

impl IndexKey {
    pub fn new(brand_id: Uuid, id_type: IdentifierType, value: impl Into<String>) -> Self {
        Self {
            brand_id,
            id_type,
            value: value.into(),
        }
    }
}

/// One owner of an indexed value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerEntry {
    pub actor_id: Uuid,
    pub confidence: f64,
    pub verified: bool,
    pub provenance: Provenance,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Owner list per value. Bounded inline to the common case of single
/// ownership plus one contested transient.
pub type OwnerList = SmallVec<[OwnerEntry; 2]>;

/// Combine stored confidence with new independent evidence.
///
/// Independent-evidence union: `1 - (1-c1)(1-c2)`, capped at 1.0. The
/// result is never below either input, so repeated sightings strengthen
/// trust and never decrease it.
pub fn combine_confidence(c1: f64, c2: f64) -> f64 {
    let c1 = c1.clamp(0.0, 1.0);
    let c2 = c2.clamp(0.0, 1.0);
    (1.0 - (1.0 - c1) * (1.0 - c2)).min(1.0)
}

/// Sort hits for lookup results: highest confidence first, most recently
/// seen first among equals.
pub fn sort_owners(owners: &mut OwnerList) {
    owners.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.last_seen.cmp(&a.last_seen))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_is_union_of_independent_evidence() {
        // Worked example from the design: 0.6 + 0.5 evidence yields 0.8
        let combined = combine_confidence(0.6, 0.5);
        assert!((combined - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_combine_is_monotonic() {
        let c1 = 0.7;
        for c2 in [0.0, 0.1, 0.5, 0.9, 1.0] {
            let combined = combine_confidence(c1, c2);
            assert!(combined >= c1);
            assert!(combined >= c2);
            assert!(combined <= 1.0);
        }
    }

    #[test]
    fn test_combine_clamps_out_of_range_inputs() {
        assert_eq!(combine_confidence(1.5, 0.5), 1.0);
        assert_eq!(combine_confidence(-0.5, 0.4), 0.4);
    }

    #[test]
    fn test_sort_owners_orders_by_confidence_then_recency() {
        let now = Utc::now();
        let earlier = now - chrono::Duration::days(1);
        let provenance = Provenance {
            signal_id: Uuid::new_v4(),
            signal_type: crate::models::SignalType::Order,
        };
        let entry = |conf: f64, seen: DateTime<Utc>| OwnerEntry {
            actor_id: Uuid::new_v4(),
            confidence: conf,
            verified: false,
            provenance,
            first_seen: seen,
            last_seen: seen,
        };

        let mut owners: OwnerList =
            smallvec::smallvec![entry(0.5, now), entry(0.9, earlier), entry(0.9, now)];
        sort_owners(&mut owners);

        assert_eq!(owners[0].confidence, 0.9);
        assert_eq!(owners[0].last_seen, now);
        assert_eq!(owners[1].confidence, 0.9);
        assert_eq!(owners[2].confidence, 0.5);
    }
}
