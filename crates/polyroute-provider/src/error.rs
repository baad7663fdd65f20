use serde::{Deserialize, Serialize};

/// Upstream error kinds, classified from status code, auth scheme, and body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamErrorKind {
    /// Transport failure; no HTTP response.
    Network,
    /// HTTP 400.
    BadRequest,
    /// HTTP 401 on api-key auth; the key is dead.
    AuthApiKey,
    /// HTTP 401 on oauth auth; refreshable.
    AuthOauthExpired,
    /// HTTP 402/403.
    Forbidden,
    /// HTTP 429, transient.
    RateShort,
    /// HTTP 429 with daily-quota wording.
    RateDaily,
    /// HTTP 5xx.
    Server,
    /// Converter or stream plumbing failure on our side.
    Internal,
}

/// What a given error kind does to retry and health bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disposition {
    pub recoverable: bool,
    pub affects_health: bool,
}

pub fn disposition(kind: UpstreamErrorKind) -> Disposition {
    match kind {
        UpstreamErrorKind::Network => Disposition {
            recoverable: true,
            affects_health: false,
        },
        UpstreamErrorKind::BadRequest => Disposition {
            recoverable: true,
            affects_health: false,
        },
        UpstreamErrorKind::AuthApiKey => Disposition {
            recoverable: false,
            affects_health: true,
        },
        UpstreamErrorKind::AuthOauthExpired => Disposition {
            recoverable: true,
            affects_health: false,
        },
        UpstreamErrorKind::Forbidden => Disposition {
            recoverable: false,
            affects_health: true,
        },
        UpstreamErrorKind::RateShort => Disposition {
            recoverable: true,
            affects_health: true,
        },
        UpstreamErrorKind::RateDaily => Disposition {
            recoverable: false,
            affects_health: true,
        },
        UpstreamErrorKind::Server => Disposition {
            recoverable: false,
            affects_health: true,
        },
        UpstreamErrorKind::Internal => Disposition {
            recoverable: true,
            affects_health: false,
        },
    }
}

/// Keyword match distinguishing per-day exhaustion from a transient 429.
pub fn is_daily_quota(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("quota") || lower.contains("daily") || lower.contains("exceeded today")
}

pub fn classify_status(status: u16, oauth: bool, body: &str) -> UpstreamErrorKind {
    match status {
        400 => UpstreamErrorKind::BadRequest,
        401 if oauth => UpstreamErrorKind::AuthOauthExpired,
        401 => UpstreamErrorKind::AuthApiKey,
        402 | 403 => UpstreamErrorKind::Forbidden,
        429 if is_daily_quota(body) => UpstreamErrorKind::RateDaily,
        429 => UpstreamErrorKind::RateShort,
        500..=599 => UpstreamErrorKind::Server,
        _ => UpstreamErrorKind::BadRequest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_quota_wording_is_detected() {
        assert!(is_daily_quota("You exceeded your daily request limit"));
        assert!(is_daily_quota("Quota exhausted for this key"));
        assert!(is_daily_quota("limit exceeded today"));
        assert!(!is_daily_quota("Too many requests, slow down"));
    }

    #[test]
    fn classification_follows_auth_scheme() {
        assert_eq!(
            classify_status(401, true, ""),
            UpstreamErrorKind::AuthOauthExpired
        );
        assert_eq!(classify_status(401, false, ""), UpstreamErrorKind::AuthApiKey);
        assert_eq!(
            classify_status(429, false, "daily quota reached"),
            UpstreamErrorKind::RateDaily
        );
        assert_eq!(classify_status(524, false, ""), UpstreamErrorKind::Server);
    }

    #[test]
    fn dispositions_match_the_failure_table() {
        assert!(disposition(UpstreamErrorKind::Network).recoverable);
        assert!(!disposition(UpstreamErrorKind::Network).affects_health);
        assert!(disposition(UpstreamErrorKind::RateShort).affects_health);
        assert!(disposition(UpstreamErrorKind::RateShort).recoverable);
        assert!(!disposition(UpstreamErrorKind::RateDaily).recoverable);
        assert!(!disposition(UpstreamErrorKind::Server).recoverable);
    }
}
