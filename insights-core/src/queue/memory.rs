use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::{QueueBackend, QueueMessage, Receipt};
use crate::error::{InsightsError, Result};

#[derive(Clone, Debug)]
struct Pending {
    body: String,
    visible_at: Instant,
    dequeue_count: u32,
    sequence: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadLetter {
    pub body: String,
    pub reason: String,
    pub dequeue_count: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: Vec<Pending>,
    in_flight: HashMap<Receipt, Pending>,
    dead: Vec<DeadLetter>,
    next_sequence: u64,
    sent: u64,
}

/// In-process queue with visibility delays. Time comes from
/// [`tokio::time::Instant`] so paused-clock tests can fast-forward delays.
#[derive(Clone, Debug, Default)]
pub struct MemoryQueue {
    state: Arc<Mutex<QueueState>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead.clone()
    }

    /// Bodies waiting for delivery, in send order.
    pub async fn pending_bodies(&self) -> Vec<String> {
        let guard = self.state.lock().await;
        let mut pending: Vec<_> = guard.ready.iter().collect();
        pending.sort_by_key(|p| p.sequence);
        pending.into_iter().map(|p| p.body.clone()).collect()
    }

    /// Total messages ever sent.
    pub async fn sent_count(&self) -> u64 {
        self.state.lock().await.sent
    }

    async fn take_in_flight(&self, receipt: Receipt) -> Result<Pending> {
        self.state
            .lock()
            .await
            .in_flight
            .remove(&receipt)
            .ok_or_else(|| InsightsError::NotFound(format!("receipt {:?}", receipt.0)))
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn send(&self, body: String, visible_after: Duration) -> Result<()> {
        let mut guard = self.state.lock().await;
        let sequence = guard.next_sequence;
        guard.next_sequence += 1;
        guard.sent += 1;
        guard.ready.push(Pending {
            body,
            visible_at: Instant::now() + visible_after,
            dequeue_count: 0,
            sequence,
        });
        Ok(())
    }

    async fn receive(&self) -> Result<Option<QueueMessage>> {
        let mut guard = self.state.lock().await;
        let now = Instant::now();
        let next = guard
            .ready
            .iter()
            .enumerate()
            .filter(|(_, p)| p.visible_at <= now)
            .min_by_key(|(_, p)| (p.visible_at, p.sequence))
            .map(|(index, _)| index);
        let Some(index) = next else {
            return Ok(None);
        };

        let mut pending = guard.ready.swap_remove(index);
        pending.dequeue_count += 1;
        let receipt = Receipt(Uuid::now_v7());
        let message = QueueMessage {
            receipt,
            body: pending.body.clone(),
            dequeue_count: pending.dequeue_count,
        };
        guard.in_flight.insert(receipt, pending);
        Ok(Some(message))
    }

    async fn complete(&self, receipt: Receipt) -> Result<()> {
        self.take_in_flight(receipt).await?;
        Ok(())
    }

    async fn abandon(&self, receipt: Receipt, delay: Duration) -> Result<()> {
        let mut pending = self.take_in_flight(receipt).await?;
        pending.visible_at = Instant::now() + delay;
        self.state.lock().await.ready.push(pending);
        Ok(())
    }

    async fn dead_letter(&self, receipt: Receipt, reason: String) -> Result<()> {
        let pending = self.take_in_flight(receipt).await?;
        self.state.lock().await.dead.push(DeadLetter {
            body: pending.body,
            reason,
            dequeue_count: pending.dequeue_count,
        });
        Ok(())
    }

    async fn depth(&self) -> Result<usize> {
        Ok(self.state.lock().await.ready.len())
    }

    async fn next_visible_in(&self) -> Result<Option<Duration>> {
        let guard = self.state.lock().await;
        let now = Instant::now();
        Ok(guard
            .ready
            .iter()
            .map(|p| p.visible_at.saturating_duration_since(now))
            .min())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn delayed_messages_stay_hidden_until_due() -> Result<()> {
        let queue = MemoryQueue::new();
        queue.send("later".into(), Duration::from_secs(10)).await?;
        queue.send("now".into(), Duration::ZERO).await?;

        let first = queue.receive().await?.unwrap();
        assert_eq!(first.body, "now");
        assert!(queue.receive().await?.is_none());
        assert_eq!(
            queue.next_visible_in().await?,
            Some(Duration::from_secs(10))
        );

        tokio::time::advance(Duration::from_secs(10)).await;
        let second = queue.receive().await?.unwrap();
        assert_eq!(second.body, "later");
        Ok(())
    }

    #[tokio::test]
    async fn abandoned_messages_are_redelivered_with_count() -> Result<()> {
        let queue = MemoryQueue::new();
        queue.send("m".into(), Duration::ZERO).await?;

        let first = queue.receive().await?.unwrap();
        queue.abandon(first.receipt, Duration::ZERO).await?;
        let second = queue.receive().await?.unwrap();
        assert_eq!(second.dequeue_count, 2);

        queue.dead_letter(second.receipt, "poison".into()).await?;
        assert_eq!(queue.depth().await?, 0);
        assert_eq!(queue.dead_letters().await[0].reason, "poison");
        assert!(queue.complete(second.receipt).await.is_err());
        Ok(())
    }
}
