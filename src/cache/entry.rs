//! Cache entries with a time-to-live

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Milliseconds since the Unix epoch, the clock all entries are stamped with
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A cached value, the wall-clock time it was written, and how long it lives.
///
/// Valid while `now - timestamp < ttl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    /// Write time in milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Time to live in milliseconds
    pub ttl: u64,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, ttl: Duration) -> Self {
        Self::at(data, now_millis(), ttl)
    }

    pub fn at(data: T, timestamp: i64, ttl: Duration) -> Self {
        Self {
            data,
            timestamp,
            ttl: ttl.as_millis().min(u64::MAX as u128) as u64,
        }
    }

    pub fn is_valid_at(&self, now: i64) -> bool {
        let age = now.saturating_sub(self.timestamp);
        // An entry stamped in the future (clock moved back) counts as fresh
        age < 0 || (age as u64) < self.ttl
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(now_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity_window() {
        let entry = CacheEntry::at("v", 1_000, Duration::from_millis(500));
        assert!(entry.is_valid_at(1_000));
        assert!(entry.is_valid_at(1_499));
        assert!(!entry.is_valid_at(1_500));
        assert!(!entry.is_valid_at(10_000));
    }

    #[test]
    fn test_zero_ttl_is_never_valid() {
        let entry = CacheEntry::at(1, 1_000, Duration::ZERO);
        assert!(!entry.is_valid_at(1_000));
    }
}
