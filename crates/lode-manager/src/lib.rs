//! Driver manager process internals.
//!
//! A manager hosts driver instances and serves them to a storage host over
//! the wire protocol. The binary in this crate dials the host and reconnects
//! forever; the library half exists so the whole manager can also be embedded
//! in-process, which is how the end-to-end tests run it.
//!
//! - [`instances`]: instance lifecycle and operation dispatch
//! - [`handler`]: the protocol method surface and per-connection serve loop
//! - [`error`]: manager errors and their wire error codes

pub mod error;
pub mod handler;
pub mod instances;

pub use error::ManagerError;
pub use handler::ProtocolHandler;
pub use instances::{DriverInstance, InstanceManager};
