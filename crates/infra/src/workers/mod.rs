//! Background workers.

pub mod rpc_worker;

pub use rpc_worker::{RpcWorker, WorkerHandle};
