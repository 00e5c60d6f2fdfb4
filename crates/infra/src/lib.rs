//! Infrastructure layer: layout persistence, broker transports, config.

pub mod broadcast;
pub mod config;
pub mod layout_service;
pub mod layout_store;
pub mod rpc;
pub mod workers;

pub use config::{ConfigError, ServiceConfig};
pub use layout_service::{Clock, LayoutService, LayoutServiceError, SystemClock};
