//! Idle-channel keep-alive: send a heartbeat when nothing else has gone out
//! for `interval`, and declare the peer unreachable (via
//! [`super::PeerConnection::is_timed_out`]) when nothing has come back for
//! several intervals.

use std::time::{Duration, Instant};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HeartbeatTimer {
    interval: Duration,
    last_sent: Instant,
}

impl HeartbeatTimer {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_sent: now,
        }
    }

    /// Returns `true` and resets the timer if a heartbeat is due.
    pub fn poll(&mut self, now: Instant) -> bool {
        if now.duration_since(self.last_sent) >= self.interval {
            self.last_sent = now;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_per_interval() {
        let now = Instant::now();
        let mut timer = HeartbeatTimer::new(Duration::from_millis(100), now);
        assert!(!timer.poll(now + Duration::from_millis(50)));
        assert!(timer.poll(now + Duration::from_millis(100)));
        assert!(!timer.poll(now + Duration::from_millis(150)));
        assert!(timer.poll(now + Duration::from_millis(201)));
    }
}
