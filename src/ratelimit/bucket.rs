//! Token bucket for a single fixed window.

use std::time::Duration;
use tokio::time::Instant;

/// Remaining tokens for one bucket key within one fixed window.
///
/// A bucket is created full on first access and is never refilled: the
/// window resets by replacing the whole bucket once `expires_at` passes.
/// The token count only goes down and stops at zero.
#[derive(Debug, Clone)]
pub struct Bucket {
    remaining: u64,
    max: u64,
    generation: u64,
    expires_at: Instant,
}

impl Bucket {
    /// Create a full bucket whose window starts at `now`.
    pub fn new(max: u64, ttl: Duration, generation: u64, now: Instant) -> Self {
        Self {
            remaining: max,
            max,
            generation,
            expires_at: now + ttl,
        }
    }

    /// Take one token.
    ///
    /// Returns `true` if a token was available, `false` if the bucket is
    /// exhausted. An exhausted bucket is left at zero.
    pub fn try_consume(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    /// Tokens left in this window.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Tokens the window started with.
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Identity of this bucket instance, distinct for every re-creation
    /// under the same key.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// When the window ends.
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Get the duration until the window resets.
    pub fn duration_until_reset(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_starts_full() {
        let bucket = Bucket::new(10, Duration::from_secs(1), 1, Instant::now());

        assert_eq!(bucket.remaining(), 10);
        assert_eq!(bucket.max(), 10);
        assert_eq!(bucket.generation(), 1);
    }

    #[test]
    fn test_bucket_consume_until_exhausted() {
        let mut bucket = Bucket::new(5, Duration::from_secs(1), 1, Instant::now());

        for _ in 0..5 {
            assert!(bucket.try_consume());
        }

        // The 6th access is rejected and the count stays at zero
        assert!(!bucket.try_consume());
        assert!(!bucket.try_consume());
        assert_eq!(bucket.remaining(), 0);
    }

    #[test]
    fn test_bucket_expiry() {
        let now = Instant::now();
        let bucket = Bucket::new(1, Duration::from_millis(1000), 1, now);

        assert!(!bucket.is_expired(now));
        assert!(!bucket.is_expired(now + Duration::from_millis(999)));
        assert!(bucket.is_expired(now + Duration::from_millis(1000)));

        assert_eq!(bucket.duration_until_reset(now), Duration::from_millis(1000));
        assert_eq!(
            bucket.duration_until_reset(now + Duration::from_secs(5)),
            Duration::ZERO
        );
    }
}
