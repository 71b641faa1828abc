use crate::{Event, EventEnvelope};

/// A projection builds a read model from an append-only event stream.
///
/// Projections are the read side of CQRS: they fold events into queryable,
/// denormalized state. Two properties matter here:
///
/// - **Idempotency**: events can arrive more than once (at-least-once
///   delivery); applying the same event twice must not corrupt the model.
///   Sequence-number cursors are the usual guard.
/// - **Disposability**: the event stream is the source of truth; a read model
///   can be deleted and rebuilt from scratch at any time.
///
/// How the read model is stored is an infrastructure concern, not part of
/// this contract.
pub trait Projection {
    type Ev: Event;

    /// Apply a single event to the projection, updating the read model.
    fn apply(&mut self, envelope: &EventEnvelope<Self::Ev>);
}
