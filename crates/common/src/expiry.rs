//! Token expiration evaluation

use std::time::Duration;

use crate::token::TokenRecord;

/// Default safety margin (60 seconds) absorbing clock skew and request latency
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// Decides whether a token is still usable at a given instant.
///
/// A token with no decodable expiration is always expired: a credential of
/// unknown lifetime is never presumed valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationPolicy {
    pub safety_margin: Duration,
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        Self {
            safety_margin: DEFAULT_SAFETY_MARGIN,
        }
    }
}

impl ExpirationPolicy {
    pub fn new(safety_margin: Duration) -> Self {
        Self { safety_margin }
    }

    /// `true` when the token expires at or before `now + margin`
    pub fn is_expired(&self, record: &TokenRecord, now_ms: i64) -> bool {
        match record.expires_at_ms() {
            None => true,
            Some(expires_at) => {
                let margin = self.safety_margin.as_millis() as i64;
                expires_at <= now_ms.saturating_add(margin)
            }
        }
    }
}

/// `max(0, floor((expires_at - now) / 1000))`, zero when there is no expiry
pub fn time_until_expiration_secs(record: &TokenRecord, now_ms: i64) -> u64 {
    match record.expires_at_ms() {
        Some(expires_at) if expires_at > now_ms => ((expires_at - now_ms) / 1000) as u64,
        _ => 0,
    }
}
