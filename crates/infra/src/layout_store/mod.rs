//! Append-only versioned layout store.
//!
//! Every write is a new row; history is only ever removed in bulk for one
//! `(owner, entity)` pair. Readers ask for the newest row per entity.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryLayoutStore;
pub use postgres::{PoolSettings, PostgresLayoutStore};
pub use r#trait::{LayoutStore, StoreError};
