//! Pure TTL arithmetic for the instance registry.
//!
//! Time is always passed in; nothing here reads a clock.

use std::time::Duration;

use godfs_constants::tracker::MAX_HEARTBEAT_INTERVAL_MS;
use godfs_constants::tracker::MAX_MISSED_HEARTBEATS;
use tokio::time::Instant;

/// `heartbeat_interval` clamped to [`MAX_HEARTBEAT_INTERVAL_MS`].
#[inline]
pub fn bounded_interval(heartbeat_interval: Duration) -> Duration {
    heartbeat_interval.min(Duration::from_millis(MAX_HEARTBEAT_INTERVAL_MS))
}

/// Time an instance stays registered without a heartbeat.
///
/// One interval for the heartbeat itself plus `missed_heartbeats` rounds of
/// slack, so a node survives that many lost heartbeats. Both inputs are
/// clamped to their maximums, keeping deadlines representable.
#[inline]
pub fn compute_ttl(heartbeat_interval: Duration, missed_heartbeats: u32) -> Duration {
    bounded_interval(heartbeat_interval).saturating_mul(missed_heartbeats.min(MAX_MISSED_HEARTBEATS) + 1)
}

/// Expiry deadline for a heartbeat received at `now`.
#[inline]
pub fn compute_deadline(now: Instant, ttl: Duration) -> Instant {
    now + ttl
}

/// Deadline after the connection carrying an instance's heartbeats dropped.
///
/// Shortened to one interval from now, never extended.
#[inline]
pub fn shortened_deadline(current: Instant, now: Instant, heartbeat_interval: Duration) -> Instant {
    current.min(now + bounded_interval(heartbeat_interval))
}

/// Whether an entry with `deadline` is expired at `now`.
#[inline]
pub fn is_expired(deadline: Instant, now: Instant) -> bool {
    now >= deadline
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_includes_slack() {
        assert_eq!(compute_ttl(Duration::from_secs(5), 2), Duration::from_secs(15));
        assert_eq!(compute_ttl(Duration::from_secs(5), 0), Duration::from_secs(5));
    }

    #[test]
    fn test_ttl_is_bounded() {
        let max = Duration::from_millis(MAX_HEARTBEAT_INTERVAL_MS);
        assert_eq!(compute_ttl(Duration::MAX, 2), max * 3);
        assert_eq!(
            compute_ttl(Duration::from_secs(1), u32::MAX),
            Duration::from_secs(u64::from(MAX_MISSED_HEARTBEATS) + 1)
        );

        let now = Instant::now();
        let longest = max * (MAX_MISSED_HEARTBEATS + 1);
        assert_eq!(compute_deadline(now, compute_ttl(Duration::MAX, u32::MAX)), now + longest);
        assert_eq!(shortened_deadline(now + max * 2, now, Duration::MAX), now + max);
    }

    #[test]
    fn test_shortened_deadline_never_extends() {
        let now = Instant::now();
        let far = now + Duration::from_secs(30);
        let near = now + Duration::from_secs(2);
        assert_eq!(shortened_deadline(far, now, Duration::from_secs(5)), now + Duration::from_secs(5));
        assert_eq!(shortened_deadline(near, now, Duration::from_secs(5)), near);
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Instant::now();
        let deadline = now + Duration::from_secs(1);
        assert!(!is_expired(deadline, now));
        assert!(is_expired(deadline, deadline));
        assert!(is_expired(deadline, deadline + Duration::from_millis(1)));
    }
}
