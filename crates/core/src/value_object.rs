//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**: two instances
/// with the same attribute values are the same value. A costing policy is a
/// value object; a shipment (which keeps its identity while its item list
/// changes) is an entity.
///
/// To "modify" a value object, construct a new one. The trait bounds reflect
/// value semantics: cheap to clone, comparable, debuggable.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
