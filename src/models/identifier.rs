//! Identity facts: typed, normalized identifier values with confidence
//! and provenance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::signal::SignalType;

/// Kind of identity fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierType {
    Phone,
    Email,
    Name,
    SocialHandle,
    OrderId,
}

impl IdentifierType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierType::Phone => "phone",
            IdentifierType::Email => "email",
            IdentifierType::Name => "name",
            IdentifierType::SocialHandle => "social_handle",
            IdentifierType::OrderId => "order_id",
        }
    }

    /// Phone and email are the strong match channels: composite match
    /// confidence is taken from them, other types only corroborate.
    pub fn is_strong(&self) -> bool {
        matches!(self, IdentifierType::Phone | IdentifierType::Email)
    }
}

impl std::fmt::Display for IdentifierType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which signal contributed an identity fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub signal_id: Uuid,
    pub signal_type: SignalType,
}

/// One identity fact about an actor.
///
/// Owned by exactly one active actor at any instant; the same value may
/// transiently exist on two actors during a contested match, until the
/// merge resolver converges ownership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identifier {
    pub id_type: IdentifierType,
    pub value: String,
    pub confidence: f64,
    pub provenance: Provenance,
    pub verified: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}
