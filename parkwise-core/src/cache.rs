//! Values with an explicit expiry instant.

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
/// A cached value and the instant after which it must be refetched.
pub struct Cached<T> {
    /// Cached payload.
    pub value: T,
    /// Expiry instant (exclusive).
    pub expires_at: DateTime<Utc>,
}

impl<T> Cached<T> {
    /// Cache `value` for `ttl` starting at `now`.
    #[must_use]
    pub fn new(value: T, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: now + ttl,
        }
    }

    /// Whether the entry is stale at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// The value, if still fresh at `now`.
    #[must_use]
    pub fn fresh(&self, now: DateTime<Utc>) -> Option<&T> {
        (!self.is_expired(now)).then_some(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn expires_exactly_at_ttl() {
        let start = Utc
            .with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
            .single()
            .expect("valid instant");
        let cached = Cached::new("lots", start, Duration::minutes(5));
        assert_eq!(cached.fresh(start + Duration::minutes(4)), Some(&"lots"));
        assert!(cached.is_expired(start + Duration::minutes(5)));
        assert_eq!(cached.fresh(start + Duration::minutes(6)), None);
    }
}
