use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::ACCOUNT_SCOPE;
use crate::DEFAULT_RETRY_AFTER_SECS;
use crate::headers;
use crate::headers::RuleWindow;

/// Tracked quota for one rate-limit scope.
///
/// `max == 0` marks a placeholder created by a 429 that arrived before any
/// header observation; once its restriction lapses the scope reverts to
/// "no data" optimism.
#[derive(Debug, Clone)]
struct QuotaState {
    max: u32,
    remaining: u32,
    period_secs: u64,
    penalty_secs: u64,
    reset_at: Instant,
}

/// Read-only view of one scope, for status display and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub max: u32,
    pub remaining: u32,
    pub period_secs: u64,
    pub penalty_secs: u64,
    pub reset_in: Duration,
}

/// Adaptive rate-limit governor shared by every listener.
///
/// All state lives behind a single mutex; callers hold it only for cheap
/// bookkeeping, never across an await point. Time is measured with
/// `tokio::time::Instant` so tests can drive the clock.
pub struct QuotaGuard {
    scopes: Mutex<HashMap<String, QuotaState>>,
    /// Percentage of `max` kept in reserve; at least one request is always
    /// reserved regardless of this value.
    safety_threshold_pct: u32,
}

impl QuotaGuard {
    pub fn new(safety_threshold_pct: u32) -> Self {
        Self { scopes: Mutex::new(HashMap::new()), safety_threshold_pct: safety_threshold_pct.min(100) }
    }

    /// Update a scope from the rules/state header pair of one response.
    ///
    /// Tracks the shortest window no longer than 60s; long-horizon caps
    /// (e.g. hourly) are deliberately ignored. A non-zero `restricted`
    /// value in the state entry means the client is actively throttled:
    /// remaining drops to zero until the restriction lapses.
    pub fn parse_headers(&self, scope: &str, rules_header: &str, state_header: &str) {
        let rules = headers::parse_rules(rules_header);
        let states = headers::parse_state(state_header);

        let mut scopes = self.scopes.lock();

        let tracked = headers::select_tracked_rule(&rules).or_else(|| {
            // No short-window rule in this response; keep tracking the
            // previously observed rule if there is one.
            scopes.get(scope).filter(|s| s.max > 0).map(|s| RuleWindow {
                max: s.max,
                period_secs: s.period_secs,
                penalty_secs: s.penalty_secs,
            })
        });
        let Some(rule) = tracked else {
            return;
        };

        let state = headers::select_state(&states, Some(rule.period_secs)).or_else(|| headers::select_state(&states, None));

        let now = Instant::now();
        let (remaining, reset_at) = match state {
            Some(s) if s.restricted_secs > 0 => (0, now + Duration::from_secs(s.restricted_secs)),
            Some(s) => (rule.max.saturating_sub(s.used), now + Duration::from_secs(rule.period_secs)),
            None => (rule.max, now + Duration::from_secs(rule.period_secs)),
        };

        tracing::debug!(scope, max = rule.max, remaining, period = rule.period_secs, "quota headers observed");

        scopes.insert(
            scope.to_string(),
            QuotaState { max: rule.max, remaining, period_secs: rule.period_secs, penalty_secs: rule.penalty_secs, reset_at },
        );
    }

    fn reserved(&self, max: u32) -> u32 {
        let pct = (max as u64 * self.safety_threshold_pct as u64).div_ceil(100);
        (pct as u32).max(1)
    }

    /// Admission query. Unconditionally true for scopes with no data yet.
    /// Replenishes the window when the reset time has passed.
    pub fn can_make_request(&self, scope: &str) -> bool {
        let mut scopes = self.scopes.lock();
        let now = Instant::now();

        let admit = match scopes.get_mut(scope) {
            None => return true,
            Some(state) if now >= state.reset_at && state.max == 0 => None,
            Some(state) => {
                if now >= state.reset_at {
                    state.remaining = state.max;
                    state.reset_at = now + Duration::from_secs(state.period_secs);
                }
                Some(state.remaining > self.reserved(state.max))
            }
        };

        match admit {
            Some(admit) => admit,
            None => {
                // 429 placeholder whose restriction has lapsed.
                scopes.remove(scope);
                true
            }
        }
    }

    /// Account one admitted request against the scope. Server headers
    /// remain authoritative and overwrite this estimate on every response.
    pub fn record_request(&self, scope: &str) {
        if let Some(state) = self.scopes.lock().get_mut(scope) {
            state.remaining = state.remaining.saturating_sub(1);
        }
    }

    /// Synchronous half of 429 handling: force the account scope to zero
    /// and arm the reset timer. Returns the wait in seconds.
    pub fn register_429(&self, retry_after_secs: Option<u64>) -> u64 {
        let wait = retry_after_secs.unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        let now = Instant::now();

        let mut scopes = self.scopes.lock();
        match scopes.get_mut(ACCOUNT_SCOPE) {
            Some(state) => {
                state.remaining = 0;
                // The one place a reset time may move backwards.
                state.reset_at = now + Duration::from_secs(wait);
            }
            None => {
                scopes.insert(
                    ACCOUNT_SCOPE.to_string(),
                    QuotaState { max: 0, remaining: 0, period_secs: wait, penalty_secs: 0, reset_at: now + Duration::from_secs(wait) },
                );
            }
        }

        wait
    }

    /// Full 429 handling: zero the account scope, then wait out the
    /// server-specified (or default) interval. Callers re-parse headers
    /// after this returns so subsequent admission sees fresh state.
    pub async fn handle_429(&self, retry_after_secs: Option<u64>) -> u64 {
        let wait = self.register_429(retry_after_secs);
        tracing::warn!(wait_secs = wait, "rate limited by server, backing off");
        tokio::time::sleep(Duration::from_secs(wait)).await;
        wait
    }

    pub fn snapshot(&self, scope: &str) -> Option<QuotaSnapshot> {
        let scopes = self.scopes.lock();
        let state = scopes.get(scope)?;
        Some(QuotaSnapshot {
            max: state.max,
            remaining: state.remaining,
            period_secs: state.period_secs,
            penalty_secs: state.penalty_secs,
            reset_in: state.reset_at.saturating_duration_since(Instant::now()),
        })
    }
}
