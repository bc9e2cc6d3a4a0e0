//! Delivery Classifier.
//!
//! Maps a transport failure onto one recovery action. Authentication and
//! connection failures are recognized from the failure's structure; every
//! other response is classified from its code and text.

use crate::transport::{FailureKind, TransportError};

/// Category of a provider response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Provider-enforced sending quota; retrying will not help.
    HardLimit,
    /// Temporary throttling or deferral.
    TempThrottle,
    /// The recipient does not exist.
    BadRecipient,
    /// Anything else.
    Other,
}

impl Category {
    /// Label used in logs and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HardLimit => "HARD_LIMIT",
            Self::TempThrottle => "TEMP_THROTTLE",
            Self::BadRecipient => "BAD_RECIPIENT",
            Self::Other => "OTHER",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const HARD_LIMIT_PHRASES: [&str; 4] = [
    "5.4.5",
    "daily user sending limit exceeded",
    "too many unique external",
    "has exceeded the gmail sending limit",
];

const UNKNOWN_RECIPIENT_PHRASES: [&str; 3] = ["5.1.1", "user unknown", "no such user"];

/// Classifies a response code and text (case-insensitive).
///
/// Hard-limit phrases win over the 4xx range, so a quota rejection phrased
/// with a 4xx code still stops the run.
#[must_use]
pub fn classify(code: Option<u16>, text: &str) -> Category {
    let t = text.to_lowercase();

    if HARD_LIMIT_PHRASES.iter().any(|p| t.contains(p)) {
        return Category::HardLimit;
    }

    if code.is_some_and(|c| (400..=499).contains(&c))
        || (t.contains("rate") && t.contains("limit"))
        || t.contains("try again later")
        || (t.contains("temporarily") && t.contains("limit"))
    {
        return Category::TempThrottle;
    }

    if UNKNOWN_RECIPIENT_PHRASES.iter().any(|p| t.contains(p))
        || (t.contains("recipient address rejected") && t.contains("unknown"))
    {
        return Category::BadRecipient;
    }

    Category::Other
}

/// What the run loop does after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Credentials rejected: record `ERROR`, abort.
    AbortAuth,
    /// Provider quota hit: record `ERROR`, abort.
    AbortHardLimit,
    /// Session lost: record `ERROR`, reconnect, retry once.
    Reconnect,
    /// Throttled: record `ERROR`, back off, reset the session, retry once.
    Backoff,
    /// Unknown recipient: record `INVALID`, optionally suppress, continue.
    Invalid,
    /// Unclassified: record `ERROR`, continue.
    Continue,
}

/// Chooses the recovery action for a transport failure.
#[must_use]
pub fn recovery(error: &TransportError) -> Recovery {
    match error.kind {
        FailureKind::Auth => Recovery::AbortAuth,
        FailureKind::Connection => Recovery::Reconnect,
        FailureKind::Response => match classify(error.code, &error.text) {
            Category::HardLimit => Recovery::AbortHardLimit,
            Category::TempThrottle => Recovery::Backoff,
            Category::BadRecipient => Recovery::Invalid,
            Category::Other => Recovery::Continue,
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_reference_cases() {
        assert_eq!(classify(Some(550), "5.1.1 user unknown"), Category::BadRecipient);
        assert_eq!(classify(Some(450), "mailbox busy"), Category::TempThrottle);
        assert_eq!(
            classify(Some(550), "Daily user sending limit exceeded."),
            Category::HardLimit
        );
        assert_eq!(classify(Some(554), "message content rejected"), Category::Other);
    }

    #[test]
    fn test_hard_limit_checked_before_4xx() {
        assert_eq!(
            classify(Some(421), "4.7.0 Too many unique external recipients"),
            Category::HardLimit
        );
        assert_eq!(classify(None, "550 5.4.5 Daily sending quota"), Category::HardLimit);
    }

    #[test]
    fn test_throttle_phrases_without_code() {
        assert_eq!(classify(None, "Rate limit exceeded"), Category::TempThrottle);
        assert_eq!(classify(None, "please TRY AGAIN LATER"), Category::TempThrottle);
        assert_eq!(
            classify(Some(550), "temporarily deferred: limit reached"),
            Category::TempThrottle
        );
        assert_eq!(classify(Some(500), "temporarily unavailable"), Category::Other);
    }

    #[test]
    fn test_bad_recipient_phrases() {
        assert_eq!(classify(Some(550), "No such user here"), Category::BadRecipient);
        assert_eq!(
            classify(Some(550), "Recipient address rejected: User unknown in relay table"),
            Category::BadRecipient
        );
        assert_eq!(
            classify(Some(550), "Recipient address rejected: policy"),
            Category::Other
        );
    }

    #[test]
    fn test_throttle_checked_before_bad_recipient() {
        // A transient rejection of an unknown mailbox is retried, not suppressed.
        assert_eq!(classify(Some(450), "4.1.1 user unknown"), Category::TempThrottle);
        assert_eq!(
            classify(Some(550), "user unknown, rate limit exceeded"),
            Category::TempThrottle
        );
    }

    #[test]
    fn test_code_range_bounds() {
        assert_eq!(classify(Some(399), ""), Category::Other);
        assert_eq!(classify(Some(400), ""), Category::TempThrottle);
        assert_eq!(classify(Some(499), ""), Category::TempThrottle);
        assert_eq!(classify(Some(500), ""), Category::Other);
    }

    #[test]
    fn test_recovery_uses_structure_first() {
        let auth = TransportError::auth(Some(535), "5.7.8 rate limit on logins");
        assert_eq!(recovery(&auth), Recovery::AbortAuth);

        let dropped = TransportError::connection("connection reset");
        assert_eq!(recovery(&dropped), Recovery::Reconnect);

        let throttled = TransportError::response(Some(451), "try again later");
        assert_eq!(recovery(&throttled), Recovery::Backoff);

        let unknown = TransportError::response(Some(550), "5.1.1 no such user");
        assert_eq!(recovery(&unknown), Recovery::Invalid);

        let hard = TransportError::response(Some(550), "5.4.5 Daily user sending limit exceeded");
        assert_eq!(recovery(&hard), Recovery::AbortHardLimit);

        let odd = TransportError::response(Some(552), "message too large");
        assert_eq!(recovery(&odd), Recovery::Continue);
    }
}
