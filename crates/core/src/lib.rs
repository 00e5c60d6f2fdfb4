//! `citylayout-core` — domain building blocks shared by every layer.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod payload;
pub mod record;

pub use error::{DomainError, DomainResult};
pub use id::{LayoutId, OwnerId};
pub use payload::Payload;
pub use record::LayoutRecord;
