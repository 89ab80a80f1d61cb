use serde::Deserialize;
use serde::Serialize;

/// Identity of a live search: one listener may exist per key at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionKey {
    /// Market (league/realm) the search runs against.
    pub market: String,
    /// Server-side search identifier.
    pub search_id: String,
}

impl SubscriptionKey {
    pub fn new(market: impl Into<String>, search_id: impl Into<String>) -> Self {
        Self { market: market.into(), search_id: search_id.into() }
    }

    /// A key is usable only when both halves are non-empty.
    pub fn is_valid(&self) -> bool {
        !self.market.trim().is_empty() && !self.search_id.trim().is_empty()
    }
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.market, self.search_id)
    }
}

/// A configured search subscription. Owned by configuration; the core
/// never mutates these, it only reconciles against them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(flatten)]
    pub key: SubscriptionKey,
    /// Individually enabled flag.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether the parent group is enabled. Group-disable always wins
    /// over an individually-enabled search.
    #[serde(default = "default_true")]
    pub group_enabled: bool,
    /// Human-readable label for logs.
    #[serde(default)]
    pub label: String,
}

fn default_true() -> bool {
    true
}

impl Subscription {
    pub fn new(market: impl Into<String>, search_id: impl Into<String>) -> Self {
        Self { key: SubscriptionKey::new(market, search_id), enabled: true, group_enabled: true, label: String::new() }
    }

    pub fn is_active(&self) -> bool {
        self.enabled && self.group_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_validity() {
        assert!(SubscriptionKey::new("standard", "abc123").is_valid());
        assert!(!SubscriptionKey::new("", "abc123").is_valid());
        assert!(!SubscriptionKey::new("standard", "  ").is_valid());
    }

    #[test]
    fn test_group_disable_wins() {
        let mut sub = Subscription::new("standard", "abc123");
        assert!(sub.is_active());

        sub.group_enabled = false;
        assert!(!sub.is_active(), "group disable must override the enabled flag");

        sub.enabled = false;
        sub.group_enabled = true;
        assert!(!sub.is_active());
    }
}
