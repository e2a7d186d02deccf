//! Identifier extraction and normalization.
//!
//! Pure: a signal goes in, an ordered set of normalized candidate
//! identifiers comes out. Malformed hints are dropped per-candidate (with
//! a debug log), never failing the whole signal.
//!
//! Normalization rules:
//! - phone: digits only, international `00` prefix folded, `+`-prefixed,
//!   7..=15 digits required
//! - email: lower-cased, shape-validated
//! - name: Unicode NFKC fold, lowercase, punctuation stripped, whitespace
//!   collapsed
//! - social handle: leading `@` stripped, lower-cased
//! - order id: trimmed, upper-cased

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

use crate::error::CandidateError;
use crate::models::{IdentifierType, SignalRecord, SignalType};

/// Base confidence for identity facts parsed out of free text rather than
/// taken from a structured field
const TEXT_PHONE_CONFIDENCE: f64 = 0.6;
const TEXT_EMAIL_CONFIDENCE: f64 = 0.65;

/// One normalized candidate identifier
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id_type: IdentifierType,
    pub value: String,
    pub confidence: f64,
    /// Came from a structured payload field (vs. loosely parsed text)
    pub structured: bool,
    /// The source channel vouches for this value (e.g. the sender phone
    /// of a WhatsApp message)
    pub verified: bool,
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap())
}

fn text_phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\+?\d[\d\s().\-]{5,17}\d").unwrap())
}

fn text_email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").unwrap())
}

/// Canonicalize a raw phone string.
///
/// Keeps digits only, folds the `00` international prefix, and requires a
/// plausible E.164 length. The intake sources deliver numbers with country
/// codes already present, so no per-tenant default is guessed.
pub fn normalize_phone(raw: &str) -> Result<String, CandidateError> {
    let mut digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if let Some(stripped) = digits.strip_prefix("00") {
        digits = stripped.to_string();
    }
    match digits.len() {
        0 => Err(CandidateError::Empty),
        n if !(7..=15).contains(&n) => Err(CandidateError::PhoneLength { digits: n }),
        _ => Ok(format!("+{digits}")),
    }
}

/// Lower-case and shape-validate an email address
pub fn normalize_email(raw: &str) -> Result<String, CandidateError> {
    let value = raw.trim().to_lowercase();
    if value.is_empty() {
        return Err(CandidateError::Empty);
    }
    if !email_re().is_match(&value) {
        return Err(CandidateError::EmailShape { value });
    }
    Ok(value)
}

/// NFKC-fold a display name, strip punctuation, collapse whitespace
pub fn normalize_name(raw: &str) -> Result<String, CandidateError> {
    let folded: String = raw.nfkc().collect();
    let stripped: String = folded
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_lowercase().next().unwrap_or(c) } else { ' ' })
        .collect();
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        Err(CandidateError::Empty)
    } else {
        Ok(collapsed)
    }
}

/// Strip the leading `@` and lower-case a social handle
pub fn normalize_handle(raw: &str) -> Result<String, CandidateError> {
    let value = raw.trim().trim_start_matches('@').to_lowercase();
    if value.is_empty() {
        return Err(CandidateError::Empty);
    }
    if !value.chars().any(|c| c.is_alphanumeric()) {
        return Err(CandidateError::HandleShape { value });
    }
    Ok(value)
}

pub fn normalize_order_ref(raw: &str) -> Result<String, CandidateError> {
    let value = raw.trim().to_uppercase();
    if value.is_empty() {
        Err(CandidateError::Empty)
    } else {
        Ok(value)
    }
}

/// Base confidence for a structured field, by source channel.
///
/// Exact structured fields score higher than loosely parsed text: a phone
/// field on a WhatsApp signal is the sender's own number, a name on a
/// review is whatever the reviewer typed.
fn structured_confidence(signal_type: SignalType, id_type: IdentifierType) -> f64 {
    use IdentifierType::*;
    use SignalType::*;
    match (signal_type, id_type) {
        (WhatsappMessage, Phone) => 0.95,
        (Order, Phone) => 0.9,
        (_, Phone) => 0.85,
        (Order, Email) | (SurveyResponse, Email) => 0.9,
        (_, Email) => 0.8,
        (InstagramPost, SocialHandle) | (TiktokPost, SocialHandle) => 0.9,
        (_, SocialHandle) => 0.7,
        (Order, OrderId) => 0.95,
        (_, OrderId) => 0.8,
        (_, Name) => 0.6,
    }
}

/// Does the source channel vouch for this structured field?
fn channel_verifies(signal_type: SignalType, id_type: IdentifierType) -> bool {
    use IdentifierType::*;
    use SignalType::*;
    matches!(
        (signal_type, id_type),
        (WhatsappMessage, Phone) | (Order, Phone) | (Order, Email) | (Order, OrderId)
    )
}

/// Derive the ordered candidate set for a signal.
///
/// Pure function: no side effects beyond debug logs for dropped
/// candidates. Output is de-duplicated by `(type, value)` (keeping the
/// strongest sighting) and ordered by confidence, highest first.
pub fn extract_candidates(signal: &SignalRecord) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = Vec::new();
    let hints = &signal.hints;

    let mut push_structured = |id_type: IdentifierType, raw: &str| {
        let normalized = match id_type {
            IdentifierType::Phone => normalize_phone(raw),
            IdentifierType::Email => normalize_email(raw),
            IdentifierType::Name => normalize_name(raw),
            IdentifierType::SocialHandle => normalize_handle(raw),
            IdentifierType::OrderId => normalize_order_ref(raw),
        };
        match normalized {
            Ok(value) => candidates.push(Candidate {
                id_type,
                value,
                confidence: structured_confidence(signal.signal_type, id_type),
                structured: true,
                verified: channel_verifies(signal.signal_type, id_type),
            }),
            Err(err) => {
                debug!(
                    signal_id = %signal.signal_id,
                    id_type = %id_type,
                    %err,
                    "dropping malformed candidate"
                );
            }
        }
    };

    if let Some(phone) = &hints.phone {
        push_structured(IdentifierType::Phone, phone);
    }
    if let Some(email) = &hints.email {
        push_structured(IdentifierType::Email, email);
    }
    if let Some(handle) = &hints.social_handle {
        push_structured(IdentifierType::SocialHandle, handle);
    }
    if let Some(order_ref) = &hints.order_ref {
        push_structured(IdentifierType::OrderId, order_ref);
    }
    if let Some(name) = &hints.name {
        push_structured(IdentifierType::Name, name);
    }

    // Loosely parsed text: lower confidence, never verified
    if let Some(text) = &hints.free_text {
        for m in text_email_re().find_iter(text) {
            if let Ok(value) = normalize_email(m.as_str()) {
                candidates.push(Candidate {
                    id_type: IdentifierType::Email,
                    value,
                    confidence: TEXT_EMAIL_CONFIDENCE,
                    structured: false,
                    verified: false,
                });
            }
        }
        for m in text_phone_re().find_iter(text) {
            if let Ok(value) = normalize_phone(m.as_str()) {
                candidates.push(Candidate {
                    id_type: IdentifierType::Phone,
                    value,
                    confidence: TEXT_PHONE_CONFIDENCE,
                    structured: false,
                    verified: false,
                });
            }
        }
    }

    dedup_candidates(&mut candidates);
    candidates
}

/// Keep one candidate per `(type, value)`, preferring the strongest
/// sighting, then order by confidence descending.
fn dedup_candidates(candidates: &mut Vec<Candidate>) {
    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates.drain(..) {
        match kept
            .iter_mut()
            .find(|c| c.id_type == candidate.id_type && c.value == candidate.value)
        {
            Some(existing) => {
                if candidate.confidence > existing.confidence {
                    existing.confidence = candidate.confidence;
                }
                existing.structured |= candidate.structured;
                existing.verified |= candidate.verified;
            }
            None => kept.push(candidate),
        }
    }
    kept.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    *candidates = kept;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IdentityHints;
    use chrono::Utc;
    use uuid::Uuid;

    fn make_signal(signal_type: SignalType, hints: IdentityHints) -> SignalRecord {
        SignalRecord {
            signal_id: Uuid::new_v4(),
            signal_type,
            brand_id: Uuid::new_v4(),
            received_at: Utc::now(),
            hints,
        }
    }

    #[test]
    fn test_normalize_phone_strips_formatting() {
        assert_eq!(normalize_phone("+44 7700 900-123").unwrap(), "+447700900123");
        assert_eq!(normalize_phone("(555) 000-1234").unwrap(), "+5550001234");
        assert_eq!(normalize_phone("00447700900123").unwrap(), "+447700900123");
    }

    #[test]
    fn test_normalize_phone_rejects_implausible_lengths() {
        assert!(matches!(
            normalize_phone("12345"),
            Err(CandidateError::PhoneLength { digits: 5 })
        ));
        assert!(matches!(normalize_phone("no digits here"), Err(CandidateError::Empty)));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Dee@Example.COM ").unwrap(), "dee@example.com");
        assert!(normalize_email("not-an-email").is_err());
        assert!(normalize_email("two@at@signs.com").is_err());
    }

    #[test]
    fn test_normalize_name_folds_and_collapses() {
        assert_eq!(normalize_name("  O'Brien,   Mary ").unwrap(), "o brien mary");
        // Full-width characters are converted to ASCII by NFKC
        assert_eq!(normalize_name("Ｄｅｅ").unwrap(), "dee");
        assert!(normalize_name("!!!").is_err());
    }

    #[test]
    fn test_normalize_handle() {
        assert_eq!(normalize_handle("@WingFan99").unwrap(), "wingfan99");
        assert!(normalize_handle("@@").is_err());
    }

    #[test]
    fn test_whatsapp_phone_scores_highest_and_is_verified() {
        let signal = make_signal(
            SignalType::WhatsappMessage,
            IdentityHints {
                phone: Some("+44 7700 900123".to_string()),
                name: Some("Dee".to_string()),
                ..Default::default()
            },
        );
        let candidates = extract_candidates(&signal);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].id_type, IdentifierType::Phone);
        assert_eq!(candidates[0].confidence, 0.95);
        assert!(candidates[0].verified);
        assert_eq!(candidates[1].id_type, IdentifierType::Name);
        assert!(!candidates[1].verified);
    }

    #[test]
    fn test_malformed_candidate_dropped_not_fatal() {
        let signal = make_signal(
            SignalType::GoogleReview,
            IdentityHints {
                email: Some("broken".to_string()),
                name: Some("Mary O'Brien".to_string()),
                ..Default::default()
            },
        );
        let candidates = extract_candidates(&signal);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id_type, IdentifierType::Name);
    }

    #[test]
    fn test_free_text_parsing_scores_lower_than_structured() {
        let signal = make_signal(
            SignalType::SurveyResponse,
            IdentityHints {
                email: Some("dee@example.com".to_string()),
                free_text: Some("reach me at dee@example.com or +44 7700 900123".to_string()),
                ..Default::default()
            },
        );
        let candidates = extract_candidates(&signal);
        // Structured + text email collapse into one candidate at the
        // structured confidence; the text phone survives on its own.
        assert_eq!(candidates.len(), 2);
        let email = candidates.iter().find(|c| c.id_type == IdentifierType::Email).unwrap();
        assert_eq!(email.confidence, 0.9);
        assert!(email.structured);
        let phone = candidates.iter().find(|c| c.id_type == IdentifierType::Phone).unwrap();
        assert_eq!(phone.confidence, TEXT_PHONE_CONFIDENCE);
        assert!(!phone.structured);
    }

    #[test]
    fn test_empty_hints_produce_no_candidates() {
        let signal = make_signal(SignalType::Order, IdentityHints::default());
        assert!(extract_candidates(&signal).is_empty());
    }
}
