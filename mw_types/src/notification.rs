use serde::Deserialize;

/// Wire shape of a push message: `{"new": ["id1", "id2", ...]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationEnvelope {
    #[serde(default)]
    pub new: Vec<String>,
}

impl NotificationEnvelope {
    pub fn into_batch(self) -> NotificationBatch {
        NotificationBatch { ids: self.new }
    }
}

/// Item ids extracted from one push message. Immutable once created,
/// consumed exactly once by the fetch pipeline.
#[derive(Debug, Clone)]
pub struct NotificationBatch {
    ids: Vec<String>,
}

impl NotificationBatch {
    pub fn new(ids: Vec<String>) -> Self {
        Self { ids }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Split into sub-batches no larger than `size` (the server's hard
    /// per-request id limit).
    pub fn chunks(&self, size: usize) -> impl Iterator<Item = &[String]> {
        self.ids.chunks(size)
    }
}
