//! Command module for Ferrite Functions
//!
//! Command execution, the per-connection session, the store dispatcher that
//! scripts call into, and the Redis Functions subsystem.

pub mod dispatcher;
mod executor;
pub mod functions;
pub mod session;

pub use dispatcher::{CallContext, CommandDispatcher, SharedDispatcher, StoreDispatcher};
pub use executor::CommandExecutor;
pub use session::Session;
