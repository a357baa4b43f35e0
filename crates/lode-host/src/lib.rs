//! Host side of the driver process boundary.
//!
//! The host keeps a set of live connections to driver-manager processes and
//! routes storage operations across them. Managers can dial in
//! ([`HostServer`]) or be dialed ([`ManagerPool`]); both expose the same
//! [`ManagerRegistry`] surface, and [`RemoteAdapter`] turns any instance
//! hosted behind that surface back into an ordinary [`lode_driver::Driver`].
//!
//! # Architecture
//!
//! - [`registry`]: session bookkeeping plus catalog-wide routing
//! - [`server`]: inbound TCP listener with a handshake gate
//! - [`pool`]: outbound dialing pool
//! - [`adapter`]: the remote driver adapter and its factory
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lode_host::{HostServer, ManagerRegistry, RemoteDriverFactory};
//! use lode_driver::{Driver, Storage};
//! use lode_rpc::Timeouts;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = Arc::new(
//!     HostServer::bind("0.0.0.0:5245", Timeouts::default(), CancellationToken::new()).await?,
//! );
//!
//! let factory = RemoteDriverFactory::new(server.clone());
//! let mut driver = factory.adapter_for(Storage {
//!     id: 1,
//!     mount_path: "/mnt/photos".to_string(),
//!     driver: "Local".to_string(),
//!     addition: r#"{"root_folder_path":"/srv/photos"}"#.to_string(),
//!     status: "work".to_string(),
//! });
//! driver.init().await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod error;
pub mod pool;
pub mod registry;
pub mod server;

pub use adapter::{RemoteAdapter, RemoteDriverFactory};
pub use error::{HostError, Result};
pub use pool::{ManagerClient, ManagerPool};
pub use registry::{ManagerRegistry, SessionSet};
pub use server::HostServer;
