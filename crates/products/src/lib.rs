//! Product catalog collaborator contract.
//!
//! The product catalog itself is owned elsewhere; this crate defines the
//! identifier, the record shape the receipt processor mutates (quantity and
//! buying price), and the lookup/mutation contract with an in-memory
//! implementation for tests/dev.

pub mod store;

pub use store::{InMemoryProductStore, ProductId, ProductRecord, ProductStore, ProductStoreError};
