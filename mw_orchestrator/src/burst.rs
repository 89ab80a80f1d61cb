use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use mw_types::NotificationBatch;
use mw_types::SubscriptionKey;
use mw_ws::NotificationSink;

/// One queued notification, still carrying its listener's cancellation
/// token so a stopped listener's work can be discarded at drain time.
pub struct BurstEntry {
    pub key: SubscriptionKey,
    pub batch: NotificationBatch,
    pub cancel: CancellationToken,
}

struct BurstState {
    entries: VecDeque<BurstEntry>,
    window: u64,
    drained_in_window: u32,
}

/// Bounded FIFO buffer between listeners and the fetch pipeline.
///
/// Enqueue never blocks: at capacity the new entry is dropped with a
/// warning, so a notification flood degrades to lost items rather than
/// stalled receive loops. Draining is paced to at most
/// `max_per_second` entries per one-second window.
pub struct BurstQueue {
    state: Mutex<BurstState>,
    epoch: Instant,
    capacity: usize,
    max_per_second: u32,
}

impl BurstQueue {
    pub fn new(capacity: usize, max_per_second: u32) -> Self {
        Self {
            state: Mutex::new(BurstState { entries: VecDeque::new(), window: 0, drained_in_window: 0 }),
            epoch: Instant::now(),
            capacity,
            max_per_second,
        }
    }

    /// Queue an entry; returns false when the entry was dropped at
    /// capacity.
    pub fn enqueue(&self, entry: BurstEntry) -> bool {
        let mut state = self.state.lock();
        if state.entries.len() >= self.capacity {
            tracing::warn!(key = %entry.key, ids = entry.batch.len(), "burst queue full, dropping notification");
            return false;
        }
        state.entries.push_back(entry);
        true
    }

    /// Take the next entries allowed by the per-second pacing window, in
    /// arrival order.
    pub fn drain(&self) -> Vec<BurstEntry> {
        let mut state = self.state.lock();

        let window = self.epoch.elapsed().as_secs();
        if window != state.window {
            state.window = window;
            state.drained_in_window = 0;
        }

        let allowance = self.max_per_second.saturating_sub(state.drained_in_window) as usize;
        let take = allowance.min(state.entries.len());

        let mut out = Vec::with_capacity(take);
        for _ in 0..take {
            if let Some(entry) = state.entries.pop_front() {
                out.push(entry);
            }
        }
        state.drained_in_window += out.len() as u32;
        out
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sink adapter: listeners submit into the queue instead of running the
/// fetch pipeline inline.
pub struct BurstSink {
    queue: Arc<BurstQueue>,
}

impl BurstSink {
    pub fn new(queue: Arc<BurstQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl NotificationSink for BurstSink {
    async fn submit(&self, key: SubscriptionKey, batch: NotificationBatch, cancel: CancellationToken) {
        self.queue.enqueue(BurstEntry { key, batch, cancel });
    }
}
