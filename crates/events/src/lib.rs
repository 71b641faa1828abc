//! `shipstock-events`: event primitives shared by domain and infrastructure.
//!
//! Events are facts: immutable, versioned, append-only. This crate defines the
//! `Event` contract, the tenant-scoped `EventEnvelope`, a transport-agnostic
//! pub/sub `EventBus`, and the `Projection` read-model contract.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod projection;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use projection::Projection;
