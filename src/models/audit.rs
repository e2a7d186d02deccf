//! Attribution links and append-only audit records.
//!
//! `MatchDecision` and `MergeRecord` are immutable once written; links are
//! re-owned (never deleted) when their actor is absorbed by a merge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::identifier::IdentifierType;
use super::signal::SignalType;

/// How a signal was attributed to an actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    ExactMatch,
    FuzzyMatch,
    CrossReference,
}

/// An established attribution of one signal to one actor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub link_id: Uuid,
    pub actor_id: Uuid,
    pub brand_id: Uuid,
    pub signal_id: Uuid,
    pub signal_type: SignalType,
    pub identifier_type: IdentifierType,
    pub identifier_value: String,
    pub method: MatchMethod,
    pub confidence: f64,
    pub occurred_at: DateTime<Utc>,
}

/// Terminal outcome of one resolution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Matched,
    CreatedNew,
    FlaggedForReview,
}

/// A candidate actor recorded on a flagged decision, for manual or
/// downstream re-resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRef {
    pub actor_id: Uuid,
    pub confidence: f64,
}

/// Immutable audit record of one resolution attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchDecision {
    pub decision_id: Uuid,
    pub brand_id: Uuid,
    pub signal_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub confidence: f64,
    pub method: Option<MatchMethod>,
    pub decision: Decision,
    pub reason: String,
    /// Populated only on `flagged_for_review`
    pub candidates: Vec<CandidateRef>,
    pub decided_at: DateTime<Utc>,
}

/// Immutable audit record of one merge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRecord {
    pub merge_id: Uuid,
    pub brand_id: Uuid,
    pub primary_id: Uuid,
    pub merged_id: Uuid,
    pub reason: String,
    pub confidence: f64,
    /// Identifier values shared by both actors at merge time
    pub triggering_identifiers: Vec<(IdentifierType, String)>,
    pub merged_at: DateTime<Utc>,
}
