//! RESP reply model
//!
//! Commands in this crate never touch the wire directly; they build [`Frame`]
//! values and leave encoding to the network front end.

mod frame;

pub use frame::Frame;
