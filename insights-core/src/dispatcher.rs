use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use insights_model::WorkerMessage;
use tracing::{Instrument, debug, debug_span, error, warn};

use crate::config::QueueConfig;
use crate::error::{InsightsError, Result};
use crate::processors::{
    CatalogIndexScanProcessor, CatalogLeafScanProcessor, CatalogPageScanProcessor,
};
use crate::queue::{MessageEnqueuer, QueueBackend, QueueMessage};

/// Outcome of dispatching a single message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DispatchStatus {
    Success,
    Retry { error: String },
    DeadLetter { error: String },
}

/// Contract exposed to worker loops for executing one received message.
#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    async fn dispatch(&self, body: &str) -> DispatchStatus;
}

/// Routes each worker message to its processor.
pub struct WorkerMessageDispatcher {
    index: CatalogIndexScanProcessor,
    page: CatalogPageScanProcessor,
    leaf: CatalogLeafScanProcessor,
    enqueuer: Arc<MessageEnqueuer>,
}

impl fmt::Debug for WorkerMessageDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerMessageDispatcher")
            .field("index", &self.index)
            .field("page", &self.page)
            .field("leaf", &self.leaf)
            .field("enqueuer", &self.enqueuer)
            .finish()
    }
}

impl WorkerMessageDispatcher {
    pub fn new(
        index: CatalogIndexScanProcessor,
        page: CatalogPageScanProcessor,
        leaf: CatalogLeafScanProcessor,
        enqueuer: Arc<MessageEnqueuer>,
    ) -> Self {
        Self {
            index,
            page,
            leaf,
            enqueuer,
        }
    }

    async fn handle(&self, message: WorkerMessage) -> Result<()> {
        match message {
            WorkerMessage::CatalogIndexScan(message) => {
                self.index.process(&message).await
            }
            WorkerMessage::CatalogPageScan(message) => {
                self.page.process(&message).await
            }
            WorkerMessage::CatalogLeafScan(message) => {
                self.leaf.process(&message).await
            }
            WorkerMessage::CatalogLeafScanBatch(message) => {
                self.leaf.process_batch(&message).await
            }
            WorkerMessage::BulkEnqueue {
                messages,
                not_before_ms,
            } => {
                debug!(
                    target: "catalog_scan::dispatch",
                    messages = messages.len(),
                    not_before_ms,
                    "unpacking bulk enqueue"
                );
                self.enqueuer
                    .enqueue_individually(messages, Duration::from_millis(not_before_ms))
                    .await
            }
        }
    }

    fn handle_error(&self, err: InsightsError) -> DispatchStatus {
        let msg = err.to_string();
        if err.is_retryable() {
            warn!(target: "catalog_scan::dispatch", error = %msg, "retrying message");
            DispatchStatus::Retry { error: msg }
        } else {
            warn!(
                target: "catalog_scan::dispatch",
                error = %msg,
                "dead-lettering message due to non-retryable error"
            );
            DispatchStatus::DeadLetter { error: msg }
        }
    }
}

#[async_trait]
impl MessageDispatcher for WorkerMessageDispatcher {
    async fn dispatch(&self, body: &str) -> DispatchStatus {
        let message: WorkerMessage = match serde_json::from_str(body) {
            Ok(message) => message,
            Err(err) => {
                let msg = err.to_string();
                warn!(
                    target: "catalog_scan::dispatch",
                    error = %msg,
                    "dead-lettering message that does not parse"
                );
                return DispatchStatus::DeadLetter { error: msg };
            }
        };

        let span = debug_span!(
            "dispatch",
            kind = message.kind(),
            scan_id = message.scan_id().unwrap_or_default()
        );
        match self.handle(message).instrument(span).await {
            Ok(()) => DispatchStatus::Success,
            Err(err) => self.handle_error(err),
        }
    }
}

/// Counters for one [`WorkerRuntime::run_until_idle`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

impl RunSummary {
    pub fn processed(&self) -> usize {
        self.succeeded + self.retried + self.dead_lettered
    }
}

/// Receives, dispatches and settles messages one at a time.
pub struct WorkerRuntime<Q: QueueBackend + ?Sized = dyn QueueBackend> {
    queue: Arc<Q>,
    dispatcher: Arc<dyn MessageDispatcher>,
    max_dequeue_count: u32,
    retry_backoff: Duration,
}

impl<Q: QueueBackend + ?Sized> fmt::Debug for WorkerRuntime<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRuntime")
            .field("queue", &type_name::<Q>())
            .field("dispatcher", &"MessageDispatcher")
            .field("max_dequeue_count", &self.max_dequeue_count)
            .field("retry_backoff", &self.retry_backoff)
            .finish()
    }
}

impl<Q: QueueBackend + ?Sized> WorkerRuntime<Q> {
    pub fn new(
        queue: Arc<Q>,
        dispatcher: Arc<dyn MessageDispatcher>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            max_dequeue_count: config.max_dequeue_count.max(1),
            retry_backoff: config.retry_backoff(),
        }
    }

    /// Handles the next visible message, if any.
    pub async fn process_next(&self) -> Result<Option<DispatchStatus>> {
        let Some(message) = self.queue.receive().await? else {
            return Ok(None);
        };
        let status = self.dispatcher.dispatch(&message.body).await;
        let settled = self.settle(&message, status).await?;
        Ok(Some(settled))
    }

    /// Processes messages until the queue is empty, sleeping through delays
    /// of messages that are not yet visible. Stops early after
    /// `max_messages`.
    pub async fn run_until_idle(&self, max_messages: usize) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        while summary.processed() < max_messages {
            match self.process_next().await? {
                Some(DispatchStatus::Success) => summary.succeeded += 1,
                Some(DispatchStatus::Retry { .. }) => summary.retried += 1,
                Some(DispatchStatus::DeadLetter { .. }) => summary.dead_lettered += 1,
                None => match self.queue.next_visible_in().await? {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => break,
                },
            }
        }
        debug!(
            target: "catalog_scan::dispatch",
            succeeded = summary.succeeded,
            retried = summary.retried,
            dead_lettered = summary.dead_lettered,
            "worker is idle"
        );
        Ok(summary)
    }

    /// Settles the message and returns the status it was settled with. A
    /// retry on the last allowed delivery becomes a dead letter.
    async fn settle(
        &self,
        message: &QueueMessage,
        status: DispatchStatus,
    ) -> Result<DispatchStatus> {
        match status {
            DispatchStatus::Success => {
                self.queue.complete(message.receipt).await?;
                Ok(DispatchStatus::Success)
            }
            DispatchStatus::Retry { error }
                if message.dequeue_count >= self.max_dequeue_count =>
            {
                error!(
                    target: "catalog_scan::dispatch",
                    dequeue_count = message.dequeue_count,
                    error = %error,
                    "message exhausted its deliveries"
                );
                let reason = format!(
                    "gave up after {} deliveries: {error}",
                    message.dequeue_count
                );
                self.queue
                    .dead_letter(message.receipt, reason.clone())
                    .await?;
                Ok(DispatchStatus::DeadLetter { error: reason })
            }
            DispatchStatus::Retry { error } => {
                self.queue.abandon(message.receipt, self.retry_backoff).await?;
                Ok(DispatchStatus::Retry { error })
            }
            DispatchStatus::DeadLetter { error } => {
                self.queue
                    .dead_letter(message.receipt, error.clone())
                    .await?;
                Ok(DispatchStatus::DeadLetter { error })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::queue::MemoryQueue;

    /// Answers with a fixed status and counts calls.
    struct FixedDispatcher {
        status: DispatchStatus,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MessageDispatcher for FixedDispatcher {
        async fn dispatch(&self, _body: &str) -> DispatchStatus {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.status.clone()
        }
    }

    fn runtime(
        status: DispatchStatus,
    ) -> (WorkerRuntime<MemoryQueue>, Arc<MemoryQueue>, Arc<FixedDispatcher>) {
        let queue = Arc::new(MemoryQueue::new());
        let dispatcher = Arc::new(FixedDispatcher {
            status,
            calls: AtomicUsize::new(0),
        });
        let config = QueueConfig {
            max_dequeue_count: 3,
            ..QueueConfig::default()
        };
        (
            WorkerRuntime::new(queue.clone(), dispatcher.clone(), &config),
            queue,
            dispatcher,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_the_dequeue_limit_then_dead_letters() -> Result<()> {
        let (runtime, queue, dispatcher) = runtime(DispatchStatus::Retry {
            error: "busy".into(),
        });
        queue.send("{}".into(), Duration::ZERO).await?;

        let summary = runtime.run_until_idle(100).await?;
        assert_eq!(summary.retried, 2);
        assert_eq!(summary.dead_lettered, 1);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 3);

        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].dequeue_count, 3);
        assert!(dead[0].reason.contains("busy"));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_delayed_messages() -> Result<()> {
        let (runtime, queue, _dispatcher) = runtime(DispatchStatus::Success);
        queue.send("{}".into(), Duration::from_secs(60)).await?;

        let summary = runtime.run_until_idle(100).await?;
        assert_eq!(summary.succeeded, 1);
        assert_eq!(queue.depth().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn stops_after_max_messages() -> Result<()> {
        let (runtime, queue, _dispatcher) = runtime(DispatchStatus::Success);
        for _ in 0..3 {
            queue.send("{}".into(), Duration::ZERO).await?;
        }
        let summary = runtime.run_until_idle(2).await?;
        assert_eq!(summary.processed(), 2);
        assert_eq!(queue.depth().await?, 1);
        Ok(())
    }
}
