//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus is the **transport layer** for events after they have been
//! persisted: events are stored first (event store is the source of truth),
//! then published for distribution to projections and handlers.
//!
//! The contract is intentionally lightweight:
//! - **Transport-agnostic**: in-memory channels today, brokers later
//! - **At-least-once delivery**: consumers must be idempotent
//! - **No persistence**: the bus distributes, it does not store

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to an event stream.
///
/// Each subscription gets a copy of all events published to the bus
/// (broadcast semantics). Designed for single-threaded consumption; use a
/// channel per consumer thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// Publication happens **after** a successful append to the event store; if
/// publication fails the events are still persisted and can be republished,
/// which is where the at-least-once semantics come from.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug;

    /// Publish a message to all current subscribers.
    fn publish(&self, message: M) -> Result<(), Self::Error>;

    /// Create a new subscription receiving all subsequently published messages.
    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
