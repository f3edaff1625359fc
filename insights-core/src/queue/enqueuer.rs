use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use insights_model::WorkerMessage;
use tracing::debug;

use super::QueueBackend;
use crate::config::QueueConfig;
use crate::error::Result;

/// Serialises worker messages onto the queue.
///
/// Large enqueues are packed into `BulkEnqueue` messages that are sent
/// immediately; the inner messages keep the requested delay and are sent
/// individually when the bulk message is dispatched.
pub struct MessageEnqueuer<Q: QueueBackend + ?Sized = dyn QueueBackend> {
    queue: Arc<Q>,
    bulk_threshold: usize,
    bulk_size: usize,
}

impl<Q: QueueBackend + ?Sized> fmt::Debug for MessageEnqueuer<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageEnqueuer")
            .field("queue", &type_name::<Q>())
            .field("bulk_threshold", &self.bulk_threshold)
            .field("bulk_size", &self.bulk_size)
            .finish()
    }
}

impl<Q: QueueBackend + ?Sized> MessageEnqueuer<Q> {
    pub fn new(queue: Arc<Q>, config: &QueueConfig) -> Self {
        Self {
            queue,
            bulk_threshold: config.bulk_enqueue_threshold,
            bulk_size: config.bulk_enqueue_size.max(1),
        }
    }

    pub async fn enqueue_one(
        &self,
        message: WorkerMessage,
        not_before: Duration,
    ) -> Result<()> {
        self.enqueue_individually(vec![message], not_before).await
    }

    pub async fn enqueue(
        &self,
        messages: Vec<WorkerMessage>,
        not_before: Duration,
    ) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        if self.bulk_threshold < 2 || messages.len() < self.bulk_threshold {
            return self.enqueue_individually(messages, not_before).await;
        }

        let count = messages.len();
        let not_before_ms = u64::try_from(not_before.as_millis()).unwrap_or(u64::MAX);
        let bulk = messages
            .chunks(self.bulk_size)
            .map(|chunk| WorkerMessage::BulkEnqueue {
                messages: chunk.to_vec(),
                not_before_ms,
            })
            .collect::<Vec<_>>();
        debug!(
            target: "catalog_scan::queue",
            messages = count,
            bulk_messages = bulk.len(),
            "packing enqueue into bulk messages"
        );
        self.enqueue_individually(bulk, Duration::ZERO).await
    }

    /// Sends each message on its own, never packing.
    pub async fn enqueue_individually(
        &self,
        messages: Vec<WorkerMessage>,
        not_before: Duration,
    ) -> Result<()> {
        let bodies = messages
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.queue.send_many(bodies, not_before).await
    }
}

#[cfg(test)]
mod tests {
    use insights_model::CatalogPageScanMessage;

    use super::*;
    use crate::queue::MemoryQueue;

    fn page(i: usize) -> WorkerMessage {
        CatalogPageScanMessage {
            storage_suffix: "s".into(),
            scan_id: "scan".into(),
            page_id: i.to_string(),
        }
        .into()
    }

    #[tokio::test]
    async fn small_enqueues_are_sent_individually() -> Result<()> {
        let queue = Arc::new(MemoryQueue::new());
        let enqueuer = MessageEnqueuer::new(queue.clone(), &QueueConfig::default());
        enqueuer
            .enqueue((0..3).map(page).collect(), Duration::ZERO)
            .await?;
        assert_eq!(queue.depth().await?, 3);
        Ok(())
    }

    #[tokio::test]
    async fn large_enqueues_are_packed() -> Result<()> {
        let queue = Arc::new(MemoryQueue::new());
        let config = QueueConfig {
            bulk_enqueue_threshold: 10,
            bulk_enqueue_size: 4,
            ..QueueConfig::default()
        };
        let enqueuer = MessageEnqueuer::new(queue.clone(), &config);
        enqueuer
            .enqueue((0..10).map(page).collect(), Duration::from_secs(5))
            .await?;

        let bodies = queue.pending_bodies().await;
        assert_eq!(bodies.len(), 3);
        let first: WorkerMessage = serde_json::from_str(&bodies[0])?;
        match first {
            WorkerMessage::BulkEnqueue {
                messages,
                not_before_ms,
            } => {
                assert_eq!(messages.len(), 4);
                assert_eq!(not_before_ms, 5_000);
            }
            other => panic!("expected bulk message, got {other:?}"),
        }
        // The bulk messages themselves are visible right away.
        assert!(queue.receive().await?.is_some());
        Ok(())
    }
}
