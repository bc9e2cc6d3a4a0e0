//! Pause lengths used by the run loop.

use std::time::Duration;

use rand::Rng;

use crate::campaign::Pacing;

const MIN_INTERVAL: Duration = Duration::from_secs(1);
const THROTTLE_FLOOR: Duration = Duration::from_secs(180);
const THROTTLE_JITTER: Duration = Duration::from_secs(45);
const RECONNECT_FLOOR: Duration = Duration::from_secs(60);
const RECONNECT_JITTER: Duration = Duration::from_secs(10);

fn jittered(base: Duration, max_jitter: Duration) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..=max_jitter.as_secs());
    base + Duration::from_secs(jitter)
}

/// Pause between two attempts: the interval (at least a second) plus jitter.
#[must_use]
pub fn between_messages(pacing: &Pacing) -> Duration {
    jittered(pacing.interval.max(MIN_INTERVAL), pacing.jitter)
}

/// Pause after a throttling reply, before the session is recreated.
#[must_use]
pub fn throttle_backoff(pacing: &Pacing) -> Duration {
    jittered(THROTTLE_FLOOR.max(pacing.interval * 4), THROTTLE_JITTER)
}

/// Pause after dropping a session, before retrying.
#[must_use]
pub fn reconnect_pause(pacing: &Pacing) -> Duration {
    jittered(pacing.interval.max(RECONNECT_FLOOR), RECONNECT_JITTER)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    fn pacing(interval: u64, jitter: u64) -> Pacing {
        Pacing {
            interval: Duration::from_secs(interval),
            jitter: Duration::from_secs(jitter),
            ..Pacing::default()
        }
    }

    #[test]
    fn test_between_messages_bounds() {
        for _ in 0..50 {
            let d = between_messages(&pacing(30, 10));
            assert!(d >= Duration::from_secs(30) && d <= Duration::from_secs(40));
        }
        assert_eq!(between_messages(&pacing(0, 0)), Duration::from_secs(1));
    }

    #[test]
    fn test_throttle_floor_and_scaling() {
        for _ in 0..50 {
            let short = throttle_backoff(&pacing(10, 0));
            assert!(short >= Duration::from_secs(180) && short <= Duration::from_secs(225));
            let long = throttle_backoff(&pacing(100, 0));
            assert!(long >= Duration::from_secs(400) && long <= Duration::from_secs(445));
        }
    }

    #[test]
    fn test_reconnect_pause_floor() {
        for _ in 0..50 {
            let d = reconnect_pause(&pacing(5, 0));
            assert!(d >= Duration::from_secs(60) && d <= Duration::from_secs(70));
            let d = reconnect_pause(&pacing(90, 0));
            assert!(d >= Duration::from_secs(90) && d <= Duration::from_secs(100));
        }
    }
}
