pub mod event;
pub mod row;
pub mod store;
pub mod layer;

mod queue;
mod writer;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

pub mod backend;
pub mod config;
pub mod env;
pub mod identity;
pub mod init;
pub mod memory_store;
pub mod metrics;
pub mod noop_store;
