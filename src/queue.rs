//! The queue: a FIFO channel carrying `(tag, task id)` messages between
//! the scheduler and the worker pool.
//!
//! The default implementation is in-process (a bounded `tokio` mpsc
//! channel); the trait is the seam an out-of-process backend would
//! implement without the scheduler or worker noticing.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::errors::QueueError;

/// A message carried on the queue. The core only ever uses
/// `tag = "request"`, but the tag is carried through so a future
/// backend can multiplex other message kinds on the same channel.
#[derive(Debug, Clone)]
pub struct Message {
    pub tag: &'static str,
    pub task_id: Uuid,
}

impl Message {
    pub fn request(task_id: Uuid) -> Self {
        Self {
            tag: "request",
            task_id,
        }
    }
}

/// Producer/consumer contract for the task queue.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Non-blocking bounded put; fails with `Full` at capacity.
    fn put(&self, message: Message) -> Result<(), QueueError>;

    /// Best-effort size introspection; `None` if unavailable.
    fn len_hint(&self) -> Option<usize>;
}

/// Consumer-side handle. Kept separate from `Queue` because the
/// default in-process channel has an owned receiver that can't be
/// cloned the way the sender can.
#[async_trait]
pub trait QueueConsumer: Send {
    async fn recv(&mut self) -> Option<Message>;
}

/// Default in-process queue backed by a bounded `tokio::sync::mpsc`
/// channel. Safe for multiple producers; the single consumer half is
/// handed out once via [`InProcessQueue::take_consumer`].
pub struct InProcessQueue {
    sender: mpsc::Sender<Message>,
    capacity: usize,
}

pub struct InProcessConsumer {
    receiver: mpsc::Receiver<Message>,
}

impl InProcessQueue {
    pub fn new(capacity: usize) -> (Self, InProcessConsumer) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender, capacity }, InProcessConsumer { receiver })
    }
}

#[async_trait]
impl Queue for InProcessQueue {
    fn put(&self, message: Message) -> Result<(), QueueError> {
        self.sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.capacity - self.sender.capacity())
    }
}

#[async_trait]
impl QueueConsumer for InProcessConsumer {
    async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }
}

/// A consumer handle shared by multiple worker tasks pulling off the
/// same queue. `InProcessConsumer` owns its receiver outright, which
/// rules out more than one worker draining it directly; this wraps it
/// behind a mutex so a configured worker *count* can share one queue.
#[derive(Clone)]
pub struct SharedConsumer(std::sync::Arc<tokio::sync::Mutex<InProcessConsumer>>);

impl SharedConsumer {
    pub fn new(consumer: InProcessConsumer) -> Self {
        Self(std::sync::Arc::new(tokio::sync::Mutex::new(consumer)))
    }
}

#[async_trait]
impl QueueConsumer for SharedConsumer {
    async fn recv(&mut self) -> Option<Message> {
        self.0.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_recv_round_trips() {
        let (queue, mut consumer) = InProcessQueue::new(4);
        let id = Uuid::new_v4();
        queue.put(Message::request(id)).unwrap();
        let message = consumer.recv().await.unwrap();
        assert_eq!(message.task_id, id);
        assert_eq!(message.tag, "request");
    }

    #[tokio::test]
    async fn put_fails_when_full() {
        let (queue, _consumer) = InProcessQueue::new(1);
        queue.put(Message::request(Uuid::new_v4())).unwrap();
        let result = queue.put(Message::request(Uuid::new_v4()));
        assert!(matches!(result, Err(QueueError::Full)));
    }
}
