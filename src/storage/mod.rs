//! Storage module for Ferrite Functions
//!
//! A small in-memory keyspace with multiple databases. It backs the
//! reference [`StoreDispatcher`](crate::commands::StoreDispatcher) that
//! callbacks reach through `redis.call`.

mod memory;

pub use memory::{Database, Store, Value};
