use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Process-wide spacing between connection attempts: no two listeners may
/// start a handshake within `spacing` of each other, regardless of which
/// listener attempted last.
pub struct ConnectionGate {
    last_attempt: Mutex<Option<Instant>>,
    spacing: Duration,
}

impl ConnectionGate {
    pub fn new(spacing: Duration) -> Self {
        Self { last_attempt: Mutex::new(None), spacing }
    }

    /// Claim the next attempt slot. Returns false when the spacing window
    /// since the last claim has not elapsed.
    pub fn try_acquire(&self) -> bool {
        let mut last = self.last_attempt.lock();
        let now = Instant::now();

        match *last {
            Some(previous) if now.duration_since(previous) < self.spacing => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Whether a claim would currently succeed, without taking the slot.
    pub fn is_open(&self) -> bool {
        match *self.last_attempt.lock() {
            Some(previous) => previous.elapsed() >= self.spacing,
            None => true,
        }
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }
}
