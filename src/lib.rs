//! # Ferrite Functions
//!
//! The Redis Functions subsystem of a Redis-compatible store: `FUNCTION LOAD`
//! libraries of Lua callbacks, invoke them with `FCALL` / `FCALL_RO`, and
//! manage them with `FUNCTION LIST | DELETE | FLUSH | DUMP | RESTORE | STATS`.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use ferrite_functions::{CommandExecutor, Config, Session};
//!
//! let executor = CommandExecutor::new(Arc::new(Config::default()));
//! let mut session = Session::new();
//! let load = [
//!     Bytes::from("FUNCTION"),
//!     Bytes::from("LOAD"),
//!     Bytes::from("#!lua name=mylib\nredis.register_function('hi', function() return 'hello' end)"),
//! ];
//! executor.execute(&mut session, &load);
//! let reply = executor.execute(&mut session, &[Bytes::from("FCALL"), Bytes::from("hi"), Bytes::from("0")]);
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod protocol;
pub mod storage;

pub use commands::{CommandExecutor, Session};
pub use config::Config;
pub use error::{FerriteError, Result};
pub use protocol::Frame;
