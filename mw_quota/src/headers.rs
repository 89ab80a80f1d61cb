//! Parsing of the server's rate-limit headers.
//!
//! The rules header lists one `max:period:penalty` triple per enforcement
//! window, comma-separated; the state header mirrors it with
//! `used:period:restricted` triples. Only short windows (period <= 60s)
//! are tracked; long-horizon caps such as hourly totals are ignored.

/// Longest window period the guard will track, in seconds.
pub const MAX_TRACKED_PERIOD_SECS: u64 = 60;

/// One `max:period:penalty` entry from the rules header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleWindow {
    pub max: u32,
    pub period_secs: u64,
    pub penalty_secs: u64,
}

/// One `used:period:restricted` entry from the state header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateWindow {
    pub used: u32,
    pub period_secs: u64,
    pub restricted_secs: u64,
}

fn parse_triple(entry: &str) -> Option<(u64, u64, u64)> {
    let mut parts = entry.trim().splitn(3, ':');
    let a = parts.next()?.trim().parse().ok()?;
    let b = parts.next()?.trim().parse().ok()?;
    let c = parts.next()?.trim().parse().ok()?;
    Some((a, b, c))
}

/// Parse a rules header, skipping malformed entries.
pub fn parse_rules(header: &str) -> Vec<RuleWindow> {
    header
        .split(',')
        .filter(|e| !e.trim().is_empty())
        .filter_map(|entry| match parse_triple(entry) {
            Some((max, period, penalty)) => {
                Some(RuleWindow { max: max.min(u32::MAX as u64) as u32, period_secs: period, penalty_secs: penalty })
            }
            None => {
                tracing::warn!("Skipping malformed rate-limit rule entry: {entry:?}");
                None
            }
        })
        .collect()
}

/// Parse a state header, skipping malformed entries.
pub fn parse_state(header: &str) -> Vec<StateWindow> {
    header
        .split(',')
        .filter(|e| !e.trim().is_empty())
        .filter_map(|entry| match parse_triple(entry) {
            Some((used, period, restricted)) => {
                Some(StateWindow { used: used.min(u32::MAX as u64) as u32, period_secs: period, restricted_secs: restricted })
            }
            None => {
                tracing::warn!("Skipping malformed rate-limit state entry: {entry:?}");
                None
            }
        })
        .collect()
}

/// Select the rule to track: the smallest period no longer than
/// [`MAX_TRACKED_PERIOD_SECS`].
pub fn select_tracked_rule(rules: &[RuleWindow]) -> Option<RuleWindow> {
    rules.iter().filter(|r| r.period_secs <= MAX_TRACKED_PERIOD_SECS).min_by_key(|r| r.period_secs).copied()
}

/// Select the state entry matching `tracked_period`, or the first short
/// window when nothing is tracked yet.
pub fn select_state(states: &[StateWindow], tracked_period: Option<u64>) -> Option<StateWindow> {
    match tracked_period {
        Some(period) => states.iter().find(|s| s.period_secs == period).copied(),
        None => states.iter().find(|s| s.period_secs <= MAX_TRACKED_PERIOD_SECS).copied(),
    }
}
