use std::sync::Mutex;

use tokio::time::{Duration, Instant};

/// Process-wide gate that suppresses every outbound call after the upstream
/// signals rate-limit exhaustion. Global and binary: either everything may
/// proceed or nothing may.
#[derive(Debug)]
pub struct CircuitBreaker {
    blocked_until: Mutex<Option<Instant>>,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            blocked_until: Mutex::new(None),
            cooldown,
        }
    }

    /// Block all outbound calls for the configured cooldown. Tripping while
    /// already blocked resets the deadline; deadlines never stack.
    pub fn trip(&self) -> Duration {
        self.trip_for(self.cooldown)
    }

    pub fn trip_for(&self, cooldown: Duration) -> Duration {
        let deadline = Instant::now() + cooldown;
        *self.blocked_until.lock().unwrap() = Some(deadline);
        log::warn!(
            "circuit breaker tripped: all upstream requests blocked for {}s",
            cooldown.as_secs()
        );
        cooldown
    }

    pub fn is_blocked(&self) -> bool {
        match *self.blocked_until.lock().unwrap() {
            Some(deadline) => Instant::now() < deadline,
            None => false,
        }
    }

    /// Time left until calls are allowed again; zero when not blocked.
    pub fn remaining(&self) -> Duration {
        match *self.blocked_until.lock().unwrap() {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    /// Administrative unblock. Not used on the hot path; expiry is time-based.
    pub fn reset(&self) {
        *self.blocked_until.lock().unwrap() = None;
        log::info!("circuit breaker reset: upstream requests allowed again");
    }
}
