//! At-least-once message delivery.

mod enqueuer;
mod memory;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

pub use enqueuer::MessageEnqueuer;
pub use memory::{DeadLetter, MemoryQueue};

/// Handle for a received message, valid until it is completed, abandoned or
/// dead-lettered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Receipt(pub Uuid);

#[derive(Clone, Debug)]
pub struct QueueMessage {
    pub receipt: Receipt,
    pub body: String,
    /// Deliveries including this one.
    pub dequeue_count: u32,
}

/// The queue collaborator. Delivery is at-least-once and unordered.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn send(&self, body: String, visible_after: Duration) -> Result<()>;

    /// Send several bodies with the same delay. Default implementation sends
    /// them one by one.
    async fn send_many(
        &self,
        bodies: Vec<String>,
        visible_after: Duration,
    ) -> Result<()> {
        for body in bodies {
            self.send(body, visible_after).await?;
        }
        Ok(())
    }

    /// Next visible message, hidden until it is settled.
    async fn receive(&self) -> Result<Option<QueueMessage>>;

    async fn complete(&self, receipt: Receipt) -> Result<()>;

    /// Return a message to the queue, visible again after `delay`.
    async fn abandon(&self, receipt: Receipt, delay: Duration) -> Result<()>;

    async fn dead_letter(&self, receipt: Receipt, reason: String) -> Result<()>;

    /// Messages waiting for delivery, visible or delayed.
    async fn depth(&self) -> Result<usize>;

    /// Time until the next delayed message becomes visible, if any are
    /// pending. Backends that cannot tell return `None`.
    async fn next_visible_in(&self) -> Result<Option<Duration>> {
        Ok(None)
    }
}
