//! Normalized signal records consumed from the intake collaborator.
//!
//! The engine does not define intake transport; it only consumes this
//! minimal shape. The signal vocabulary covers the origin channels of the
//! surrounding platform: messaging, review sites, orders, surveys, and
//! social posts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Origin channel of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    WhatsappMessage,
    GoogleReview,
    UberReview,
    Order,
    SurveyResponse,
    InstagramPost,
    TiktokPost,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::WhatsappMessage => "whatsapp_message",
            SignalType::GoogleReview => "google_review",
            SignalType::UberReview => "uber_review",
            SignalType::Order => "order",
            SignalType::SurveyResponse => "survey_response",
            SignalType::InstagramPost => "instagram_post",
            SignalType::TiktokPost => "tiktok_post",
        }
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw identity hints carried by a signal's payload.
///
/// Structured fields come straight from the source (e.g. the phone number
/// on a WhatsApp message); `free_text` is loosely parsed for embedded
/// phones and emails at a lower base confidence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityHints {
    pub phone: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub social_handle: Option<String>,
    pub order_ref: Option<String>,
    pub free_text: Option<String>,
}

impl IdentityHints {
    pub fn is_empty(&self) -> bool {
        self.phone.is_none()
            && self.email.is_none()
            && self.name.is_none()
            && self.social_handle.is_none()
            && self.order_ref.is_none()
            && self.free_text.is_none()
    }
}

/// One normalized signal record, scoped to a brand (tenant)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRecord {
    pub signal_id: Uuid,
    pub signal_type: SignalType,
    pub brand_id: Uuid,
    pub received_at: DateTime<Utc>,
    pub hints: IdentityHints,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_type_serde_round_trip() {
        let json = serde_json::to_string(&SignalType::WhatsappMessage).unwrap();
        assert_eq!(json, "\"whatsapp_message\"");
        let back: SignalType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SignalType::WhatsappMessage);
    }

    #[test]
    fn test_empty_hints() {
        assert!(IdentityHints::default().is_empty());
        let hints = IdentityHints {
            phone: Some("+447700900123".to_string()),
            ..Default::default()
        };
        assert!(!hints.is_empty());
    }
}
