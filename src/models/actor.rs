//! Resolved customer identities.
//!
//! Actors are never hard-deleted: a merged actor becomes a tombstone whose
//! state carries a redirect pointer to the surviving primary, so links held
//! concurrently can never dangle.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::signal::SignalType;

/// Banded view of `confidence_in_identity`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityQuality {
    High,
    Medium,
    Low,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified,
    Unverified,
    Flagged,
}

/// Actor lifecycle state. Merges are irreversible and one-directional:
/// a tombstone never re-activates and is never itself a merge target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ActorState {
    Active,
    Merged { into: Uuid },
}

/// A resolved real-world identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub actor_id: Uuid,
    pub brand_id: Uuid,

    /// Best-known values, derived from the highest-confidence identifier
    /// of each type
    pub primary_phone: Option<String>,
    pub primary_email: Option<String>,
    pub primary_name: Option<String>,

    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,

    /// Derived fields, recomputed after every link or merge
    pub signal_count: u64,
    pub signal_sources: BTreeSet<SignalType>,
    pub profile_completeness: f64,
    pub confidence_in_identity: f64,
    pub identity_quality: IdentityQuality,

    pub verification_status: VerificationStatus,
    pub state: ActorState,
}

impl Actor {
    /// Fresh actor created on a first unmatched signal
    pub fn new(brand_id: Uuid, seen_at: DateTime<Utc>) -> Self {
        Self {
            actor_id: Uuid::new_v4(),
            brand_id,
            primary_phone: None,
            primary_email: None,
            primary_name: None,
            first_seen: seen_at,
            last_seen: seen_at,
            signal_count: 0,
            signal_sources: BTreeSet::new(),
            profile_completeness: 0.0,
            confidence_in_identity: 0.0,
            identity_quality: IdentityQuality::Unknown,
            verification_status: VerificationStatus::Unverified,
            state: ActorState::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ActorState::Active)
    }

    /// Redirect target if this actor is a tombstone
    pub fn merged_into(&self) -> Option<Uuid> {
        match self.state {
            ActorState::Active => None,
            ActorState::Merged { into } => Some(into),
        }
    }
}
