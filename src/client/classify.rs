//! Failure classification: per-channel skip reasons and permanent
//! authentication failures.

use std::fmt;

use crate::transport::ApiError;

// ── skip reasons ─────────────────────────────────────────────────────────────

/// Why a configured channel was not subscribed. Closed set; `Unknown` is the
/// catch-all for failures none of the other reasons explain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InvalidFormat,
    NotFound,
    NotAMember,
    AccessDenied,
    RateLimited,
    NetworkTimeout,
    PermissionDenied,
    ApiError,
    Unknown,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::InvalidFormat => "invalid-format",
            SkipReason::NotFound => "not-found",
            SkipReason::NotAMember => "not-a-member",
            SkipReason::AccessDenied => "access-denied",
            SkipReason::RateLimited => "rate-limited",
            SkipReason::NetworkTimeout => "network-timeout",
            SkipReason::PermissionDenied => "permission-denied",
            SkipReason::ApiError => "api-error",
            SkipReason::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured channel that did not survive subscription.
#[derive(Debug, Clone)]
pub struct SkippedChannel {
    pub channel_id: String,
    pub reason: SkipReason,
    pub detail: Option<String>,
}

/// Classify a directory/transport failure into a [`SkipReason`], from its
/// result code first, then HTTP status, then message text.
pub fn classify_skip(err: &ApiError) -> SkipReason {
    if let Some(code) = err.code.as_deref() {
        return match code {
            "channel_not_found" | "user_not_found" => SkipReason::NotFound,
            "not_in_channel" | "not_in_group" => SkipReason::NotAMember,
            "access_denied" | "channel_is_archived" => SkipReason::AccessDenied,
            "ratelimited" | "rate_limited" => SkipReason::RateLimited,
            "missing_scope" | "no_permission" | "restricted_action" => {
                SkipReason::PermissionDenied
            }
            _ => SkipReason::ApiError,
        };
    }

    match err.status {
        Some(404) => return SkipReason::NotFound,
        Some(403) => return SkipReason::AccessDenied,
        Some(429) => return SkipReason::RateLimited,
        Some(408) | Some(504) => return SkipReason::NetworkTimeout,
        Some(s) if s >= 400 => return SkipReason::ApiError,
        _ => {}
    }

    let msg = err.message.to_lowercase();
    if msg.contains("timeout") || msg.contains("timed out") {
        SkipReason::NetworkTimeout
    } else {
        SkipReason::Unknown
    }
}

// ── authentication failures ──────────────────────────────────────────────────

/// Message substrings that mark a permanent authentication failure.
const AUTH_MESSAGE_PATTERNS: &[&str] = &[
    "invalid_auth",
    "token_revoked",
    "account_inactive",
    "invalid_token",
    "not_authed",
    "token_expired",
    "unauthorized",
    "authentication failed",
    "invalid credentials",
];

/// Result codes that mark a permanent authentication failure.
const AUTH_CODES: &[&str] = &["invalid_auth", "token_revoked", "account_inactive"];

/// True when `err` is a permanent authentication failure: such errors
/// invalidate the team instead of scheduling a reconnect.
pub fn is_auth_failure(err: &ApiError) -> bool {
    let msg = err.message.to_lowercase();
    if AUTH_MESSAGE_PATTERNS.iter().any(|p| msg.contains(p)) {
        return true;
    }
    if err.code.as_deref().is_some_and(|c| AUTH_CODES.contains(&c)) {
        return true;
    }
    err.status == Some(401) || msg.contains("401")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_detected_from_message_case_insensitive() {
        for msg in [
            "invalid_auth",
            "An API error occurred: Token_Revoked",
            "account_inactive for workspace",
            "request was UNAUTHORIZED",
            "Authentication Failed: check token",
            "invalid credentials supplied",
        ] {
            assert!(is_auth_failure(&ApiError::new(msg)), "expected auth failure for {msg:?}");
        }
    }

    #[test]
    fn auth_detected_from_code() {
        for code in ["invalid_auth", "token_revoked", "account_inactive"] {
            let e = ApiError::new("api call failed").with_code(code);
            assert!(is_auth_failure(&e), "expected auth failure for code {code:?}");
        }
        let e = ApiError::new("api call failed").with_code("channel_not_found");
        assert!(!is_auth_failure(&e));
    }

    #[test]
    fn auth_detected_from_status_401() {
        assert!(is_auth_failure(&ApiError::new("request failed").with_status(401)));
        assert!(is_auth_failure(&ApiError::new("server said 401")));
        assert!(!is_auth_failure(&ApiError::new("request failed").with_status(500)));
    }

    #[test]
    fn plain_network_error_is_not_auth() {
        assert!(!is_auth_failure(&ApiError::new("connection reset by peer")));
    }

    #[test]
    fn skip_reason_from_code() {
        let cases = [
            ("channel_not_found", SkipReason::NotFound),
            ("not_in_channel", SkipReason::NotAMember),
            ("access_denied", SkipReason::AccessDenied),
            ("ratelimited", SkipReason::RateLimited),
            ("missing_scope", SkipReason::PermissionDenied),
            ("fatal_error", SkipReason::ApiError),
        ];
        for (code, expected) in cases {
            let e = ApiError::new("call failed").with_code(code);
            assert_eq!(classify_skip(&e), expected, "code {code:?}");
        }
    }

    #[test]
    fn skip_reason_from_status_when_no_code() {
        assert_eq!(classify_skip(&ApiError::new("x").with_status(404)), SkipReason::NotFound);
        assert_eq!(classify_skip(&ApiError::new("x").with_status(429)), SkipReason::RateLimited);
        assert_eq!(classify_skip(&ApiError::new("x").with_status(403)), SkipReason::AccessDenied);
        assert_eq!(classify_skip(&ApiError::new("x").with_status(500)), SkipReason::ApiError);
    }

    #[test]
    fn skip_reason_from_message_timeout() {
        assert_eq!(classify_skip(&ApiError::new("request timed out")), SkipReason::NetworkTimeout);
        assert_eq!(classify_skip(&ApiError::new("connect timeout")), SkipReason::NetworkTimeout);
        assert_eq!(classify_skip(&ApiError::new("mystery failure")), SkipReason::Unknown);
    }

    #[test]
    fn skip_reason_renders_kebab_case() {
        assert_eq!(SkipReason::NotAMember.to_string(), "not-a-member");
        assert_eq!(SkipReason::InvalidFormat.to_string(), "invalid-format");
    }
}
