//! Wire protocol shared by both ends of a driver-manager connection.
//!
//! This crate provides the message types, the newline-delimited transport
//! codec, and the stream session used between a storage host and its
//! driver-manager processes over TCP.
//!
//! # Architecture
//!
//! - [`protocol`]: message frames (`handshake`, `request`, `response`, `ping`)
//!   and the error codes carried in responses
//! - [`transport`]: one-JSON-object-per-line codec
//! - [`session`]: correlated request/response multiplexing over one connection
//!
//! # Example
//!
//! ```no_run
//! use lode_rpc::{Session, Timeouts};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), lode_rpc::SessionError> {
//! let stream = tokio::net::TcpStream::connect("127.0.0.1:5245").await?;
//! let session = Session::spawn(stream, "dm-1", Timeouts::default(), CancellationToken::new());
//!
//! // The manager side announces its catalog right after connecting.
//! let catalog = session.wait_for_handshake().await?;
//! println!("{} drivers available", catalog.driver_count);
//!
//! let drivers = session
//!     .send_request("list_drivers", None, &CancellationToken::new())
//!     .await?;
//! println!("{drivers}");
//! # Ok(())
//! # }
//! ```

pub mod protocol;
pub mod session;
pub mod transport;

pub use protocol::{
    CODE_BAD_REQUEST, CODE_DRIVER_ERROR, CODE_NOT_FOUND, DEFAULT_PORT, ErrorInfo, HANDSHAKE_ID,
    HandshakeInfo, Message, MessageType,
};
pub use session::{Session, SessionError, Timeouts};
pub use transport::{CodecError, LineCodec};
