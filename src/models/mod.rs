//! Core data model: actors, identifiers, signals, and audit records

pub mod actor;
pub mod audit;
pub mod identifier;
pub mod signal;

pub use actor::{Actor, ActorState, IdentityQuality, VerificationStatus};
pub use audit::{
    CandidateRef, Decision, Link, MatchDecision, MatchMethod, MergeRecord,
};
pub use identifier::{Identifier, IdentifierType, Provenance};
pub use signal::{IdentityHints, SignalRecord, SignalType};
