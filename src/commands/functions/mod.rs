//! Redis Functions
//!
//! Libraries of Lua callbacks loaded with `FUNCTION LOAD` and invoked by name
//! with `FCALL` / `FCALL_RO`.
//!
//! - [`bridge`]: conversion between Lua values and replies
//! - [`host`]: the sandboxed interpreter
//! - [`registry`]: loaded libraries and the function index
//! - [`loader`]: FUNCTION LOAD
//! - [`invoker`]: FCALL / FCALL_RO
//! - [`snapshot`]: FUNCTION DUMP / RESTORE
//! - [`handlers`]: the FUNCTION subcommands

pub mod bridge;
pub mod handlers;
pub mod host;
pub mod invoker;
pub mod loader;
pub mod registry;
pub mod snapshot;

pub use bridge::ScriptValue;
pub use host::{FunctionFlag, ScriptHost};
pub use invoker::{CallMode, FunctionCall};
pub use registry::{CollisionPolicy, FunctionDef, Library, Registry};
pub use snapshot::RestorePolicy;
