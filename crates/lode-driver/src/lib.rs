//! Storage driver contract and catalog.
//!
//! A driver is a pluggable storage backend. This crate defines the trait a
//! driver implements, the data model its operations speak, the catalog a
//! manager process assembles from registered drivers, and one built-in driver
//! backed by the local filesystem.
//!
//! # Architecture
//!
//! - [`driver`]: the [`Driver`] trait plus the optional [`Getter`],
//!   [`OtherOps`], and [`Rooter`] interfaces
//! - [`model`]: objects, links, storage records, and config item schemas
//! - [`catalog`]: explicit registration of driver kinds, no global state
//! - [`local`]: the `Local` filesystem driver

pub mod catalog;
pub mod driver;
pub mod error;
pub mod local;
pub mod model;

pub use catalog::{DriverConstructor, DriverEntry, DriverRegistry};
pub use driver::{Driver, Getter, OtherOps, Rooter, capabilities_of};
pub use error::{DriverError, Result};
pub use local::LocalDriver;
pub use model::{
    DriverCapabilities, DriverConfig, DriverItem, ItemType, Link, LinkArgs, ListArgs, Object,
    OtherArgs, Storage,
};
