//! Identity resolution engine for multi-brand customer signals.
//!
//! Inbound signals (WhatsApp messages, reviews, orders, surveys, social
//! posts) carry fragmentary identity hints. This crate extracts and
//! normalizes identifiers from those hints, matches each signal against
//! known actors through an inverted identifier index, and either links
//! the signal, creates a new actor, or flags it for review. Duplicate
//! actors discovered later are merged by graph contraction with a full
//! audit trail.
//!
//! ## Architecture
//! Signal -> extract candidates -> index lookup -> score -> decide ->
//! atomic commit (link + identifier upserts + recomputed stats).
//!
//! All writes go through the [`store::IdentityStore`] trait; the engine
//! serializes conflicting writers with keyed async locks so signals for
//! different customers resolve in parallel.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use identity_engine::engine::ResolutionEngine;
//! use identity_engine::models::{IdentityHints, SignalRecord, SignalType};
//! use chrono::Utc;
//! use uuid::Uuid;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let engine = ResolutionEngine::new();
//! let signal = SignalRecord {
//!     signal_id: Uuid::new_v4(),
//!     signal_type: SignalType::WhatsappMessage,
//!     brand_id: Uuid::new_v4(),
//!     received_at: Utc::now(),
//!     hints: IdentityHints {
//!         phone: Some("+44 7700 900123".to_string()),
//!         name: Some("Jess Morgan".to_string()),
//!         ..IdentityHints::default()
//!     },
//! };
//! let decision = engine.resolve(&signal).await?;
//! println!("{:?} -> {:?}", decision.decision, decision.actor_id);
//! # Ok(())
//! # }
//! ```

// Core error handling
pub mod error;

// Domain models: actors, identifiers, signals, audit records
pub mod models;

// Runtime configuration
pub mod config;

// Identifier extraction and normalization
pub mod extract;

// Inverted identifier index primitives
pub mod index;

// Keyed async locking
pub mod locks;

// Candidate ranking and the match decision policy
pub mod scoring;

// Derived actor stats and the confidence model
pub mod stats;

// Storage trait and the in-memory store
pub mod store;

// Per-signal match pipeline
pub mod matcher;

// Duplicate-actor merging
pub mod merge;

// Public engine facade
pub mod engine;

pub use engine::{ActorHistory, ResolutionEngine};
pub use error::{CandidateError, EngineError, EngineResult, LockError, MergeError, MergeResult};
