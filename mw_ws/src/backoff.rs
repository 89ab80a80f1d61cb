use std::time::Duration;

use tokio::time::Instant;

/// Delay table keyed by attempt count; everything past the table end is
/// capped at [`MAX_BACKOFF`].
const BACKOFF_TABLE_SECS: [u64; 10] = [1, 2, 4, 8, 16, 32, 60, 120, 300, 600];

/// Hard cap on the retry delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(1_800);

/// Attempt count fully resets after this long without an attempt.
const FULL_RESET_AFTER: Duration = Duration::from_secs(3_600);
/// Attempt count drops by two after this long without an attempt.
const PARTIAL_DECAY_AFTER: Duration = Duration::from_secs(1_800);
const PARTIAL_DECAY_STEP: u32 = 2;

/// Delay scheduled before the given attempt. Attempt 0 is the first-ever
/// attempt and carries no delay.
pub fn delay_for(attempts: u32) -> Duration {
    match attempts {
        0 => Duration::ZERO,
        n => BACKOFF_TABLE_SECS.get(n as usize - 1).map(|s| Duration::from_secs(*s)).unwrap_or(MAX_BACKOFF),
    }
}

/// Per-listener retry bookkeeping: attempt counter with time-based decay.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    attempts: u32,
    last_attempt: Option<Instant>,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::new()
    }
}

impl BackoffSchedule {
    pub fn new() -> Self {
        Self { attempts: 0, last_attempt: None }
    }

    /// Decay the attempt counter based on idle time, then return the
    /// delay to apply before the next attempt.
    pub fn scheduled_delay(&mut self) -> Duration {
        self.apply_decay();
        delay_for(self.attempts)
    }

    fn apply_decay(&mut self) {
        let Some(last) = self.last_attempt else {
            return;
        };
        let idle = last.elapsed();

        if idle >= FULL_RESET_AFTER {
            self.attempts = 0;
        } else if idle >= PARTIAL_DECAY_AFTER {
            self.attempts = self.attempts.saturating_sub(PARTIAL_DECAY_STEP);
        }
    }

    /// Stamp an attempt as happening now.
    pub fn record_attempt(&mut self) {
        self.last_attempt = Some(Instant::now());
    }

    /// Advance the schedule after a transport failure.
    pub fn advance(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    /// Back to baseline after a successful handshake.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    /// True while the listener must not retry yet: the scheduled delay
    /// since the last attempt has not fully elapsed.
    pub fn in_cooldown(&self) -> bool {
        match self.last_attempt {
            Some(last) => last.elapsed() < delay_for(self.attempts),
            None => false,
        }
    }
}
