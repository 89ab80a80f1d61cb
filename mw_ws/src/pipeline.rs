use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mw_http::FetchClient;
use mw_http::MAX_IDS_PER_FETCH;
use mw_quota::ACCOUNT_SCOPE;
use mw_quota::QuotaGuard;
use mw_types::FetchedListing;
use mw_types::NotificationBatch;
use mw_types::SubscriptionKey;
use mw_types::unix_now;

use crate::sink::SessionProvider;

/// Turns one notification batch into quota-gated detail fetches and hands
/// the results to the consumer channel.
pub struct FetchPipeline {
    client: FetchClient,
    quota: Arc<QuotaGuard>,
    session: Arc<dyn SessionProvider>,
    consumer: mpsc::Sender<FetchedListing>,
}

impl FetchPipeline {
    pub fn new(
        client: FetchClient,
        quota: Arc<QuotaGuard>,
        session: Arc<dyn SessionProvider>,
        consumer: mpsc::Sender<FetchedListing>,
    ) -> Self {
        Self { client, quota, session, consumer }
    }

    /// Process one batch: split into sub-batches of at most
    /// [`MAX_IDS_PER_FETCH`] ids, each individually admitted by the quota
    /// guard. Skippable per-item failures never abort the batch; any
    /// other failure abandons the remaining sub-batches.
    pub async fn process(&self, key: &SubscriptionKey, batch: NotificationBatch, cancel: &CancellationToken) {
        if batch.is_empty() {
            return;
        }
        tracing::debug!(%key, ids = batch.len(), "processing notification batch");

        for chunk in batch.chunks(MAX_IDS_PER_FETCH) {
            if cancel.is_cancelled() {
                tracing::debug!(%key, "listener stopped, discarding remaining sub-batches");
                return;
            }

            if !self.quota.can_make_request(ACCOUNT_SCOPE) {
                tracing::warn!(%key, ids = chunk.len(), "quota exhausted, skipping sub-batch");
                continue;
            }

            let session = self.session.session().unwrap_or_default();
            match self.client.fetch_batch(chunk, &key.search_id, &session).await {
                Ok(listings) => {
                    if cancel.is_cancelled() {
                        tracing::debug!(%key, count = listings.len(), "listener stopped, discarding fetched listings");
                        return;
                    }
                    self.deliver(key, listings).await;
                }
                Err(err) if err.is_skippable() => {
                    tracing::info!(%key, %err, "skipping sub-batch");
                }
                Err(err) => {
                    tracing::error!(%key, %err, "fetch failed, abandoning remaining sub-batches");
                    return;
                }
            }
        }
    }

    async fn deliver(&self, key: &SubscriptionKey, listings: Vec<FetchedListing>) {
        let now = unix_now();
        for listing in listings {
            if listing.access_token.is_expired(now) {
                tracing::debug!(%key, id = %listing.id, "listing token already expired at hand-off");
            }
            if self.consumer.send(listing).await.is_err() {
                tracing::warn!(%key, "listing consumer dropped, discarding results");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::sink::StaticSession;

    fn pipeline_with(quota: Arc<QuotaGuard>) -> (FetchPipeline, mpsc::Receiver<FetchedListing>) {
        let (tx, rx) = mpsc::channel(16);
        // Loopback discard port: any actual fetch attempt fails fast.
        let client = FetchClient::new("http://127.0.0.1:9", Arc::clone(&quota)).unwrap();
        let pipeline = FetchPipeline::new(client, quota, Arc::new(StaticSession("sess".into())), tx);
        (pipeline, rx)
    }

    fn batch_of(n: usize) -> NotificationBatch {
        NotificationBatch::new((0..n).map(|i| format!("id{i}")).collect())
    }

    #[tokio::test]
    async fn test_quota_denied_batch_is_skipped_without_fetching() {
        let quota = Arc::new(QuotaGuard::new(100));
        // Threshold 100% reserves everything: admission always denied.
        quota.parse_headers(ACCOUNT_SCOPE, "6:4:10", "0:4:0");

        let (pipeline, mut rx) = pipeline_with(quota);
        pipeline.process(&SubscriptionKey::new("standard", "s1"), batch_of(23), &CancellationToken::new()).await;

        assert!(rx.try_recv().is_err(), "denied sub-batches must not produce listings");
    }

    #[tokio::test]
    async fn test_cancelled_batch_is_discarded() {
        let quota = Arc::new(QuotaGuard::new(10));
        let (pipeline, mut rx) = pipeline_with(quota);

        let cancel = CancellationToken::new();
        cancel.cancel();
        pipeline.process(&SubscriptionKey::new("standard", "s1"), batch_of(5), &cancel).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_transport_failure_does_not_panic() {
        // No quota data: admission is optimistic, the fetch itself fails
        // (connection refused) and the batch is abandoned quietly.
        let quota = Arc::new(QuotaGuard::new(10));
        let (pipeline, mut rx) = pipeline_with(quota);

        pipeline.process(&SubscriptionKey::new("standard", "s1"), batch_of(3), &CancellationToken::new()).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let quota = Arc::new(QuotaGuard::new(10));
        let (pipeline, mut rx) = pipeline_with(quota);

        pipeline.process(&SubscriptionKey::new("standard", "s1"), batch_of(0), &CancellationToken::new()).await;
        assert!(rx.try_recv().is_err());
    }
}
