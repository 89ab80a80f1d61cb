use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use mw_types::NotificationBatch;
use mw_types::SubscriptionKey;

use crate::pipeline::FetchPipeline;

/// Supplies the session credential for outbound connections and fetches.
pub trait SessionProvider: Send + Sync {
    fn session(&self) -> Option<String>;
}

/// Fixed credential, for configuration-file sessions and tests.
pub struct StaticSession(pub String);

impl SessionProvider for StaticSession {
    fn session(&self) -> Option<String> {
        if self.0.trim().is_empty() { None } else { Some(self.0.clone()) }
    }
}

/// Where a listener hands its notification batches. Direct mode runs the
/// fetch pipeline inline (preserving per-listener arrival order); burst
/// mode enqueues for paced draining by the orchestrator.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn submit(&self, key: SubscriptionKey, batch: NotificationBatch, cancel: CancellationToken);
}

/// Inline execution: each batch is fetched before the next frame is read.
pub struct DirectSink {
    pipeline: Arc<FetchPipeline>,
}

impl DirectSink {
    pub fn new(pipeline: Arc<FetchPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl NotificationSink for DirectSink {
    async fn submit(&self, key: SubscriptionKey, batch: NotificationBatch, cancel: CancellationToken) {
        self.pipeline.process(&key, batch, &cancel).await;
    }
}
