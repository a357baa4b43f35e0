//! Stream session shared by both connection roles.
//!
//! A [`Session`] owns one persistent connection: a read loop that routes
//! incoming frames, a table of in-flight requests keyed by correlation id, and
//! a connected flag. The host uses it to issue requests against a manager
//! (after capturing the manager's handshake); the manager process uses the
//! same type to serve requests arriving from the host.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::{Sink, SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::protocol::{ErrorInfo, HandshakeInfo, Message, MessageType};
use crate::transport::{CodecError, LineCodec};

/// All protocol deadlines, configurable per connection.
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// Dialing a peer.
    pub connect: Duration,
    /// Waiting for the one-shot handshake. Longer than a single request.
    pub handshake: Duration,
    /// Waiting for the response to one request.
    pub request: Duration,
    /// Delivering a response into a consumer's slot. A stalled consumer
    /// forfeits the response rather than blocking the read loop.
    pub delivery_grace: Duration,
    /// Pause between reconnection attempts.
    pub reconnect_backoff: Duration,
    /// Waiting for in-flight tasks to unwind at shutdown.
    pub shutdown_grace: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            handshake: Duration::from_secs(30),
            request: Duration::from_secs(30),
            delivery_grace: Duration::from_secs(5),
            reconnect_backoff: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Errors surfaced by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Remote(#[from] ErrorInfo),

    #[error("not connected to driver manager")]
    NotConnected,

    #[error("request timeout")]
    Timeout,

    #[error("handshake timeout")]
    HandshakeTimeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("connection closed")]
    Disconnected,
}

impl SessionError {
    /// The wire error code carried by a remote failure, if any.
    #[must_use]
    pub fn remote_code(&self) -> Option<i32> {
        match self {
            SessionError::Remote(info) => Some(info.code),
            _ => None,
        }
    }
}

type BoxedSink = Pin<Box<dyn Sink<Message, Error = CodecError> + Send>>;
type Pending = Arc<Mutex<HashMap<String, mpsc::Sender<Message>>>>;

/// One physical connection plus its protocol state.
pub struct Session {
    id: String,
    sink: Arc<Mutex<BoxedSink>>,
    pending: Pending,
    connected: Arc<AtomicBool>,
    handshake: Arc<std::sync::OnceLock<HandshakeInfo>>,
    handshake_slot: Mutex<Option<oneshot::Receiver<HandshakeInfo>>>,
    inbound_slot: std::sync::Mutex<Option<mpsc::Receiver<Message>>>,
    seq: AtomicU64,
    timeouts: Timeouts,
    cancel: CancellationToken,
    done: CancellationToken,
}

impl Session {
    /// Wrap an established stream and start its read loop.
    ///
    /// `cancel` is the session's own token: firing it tears the connection
    /// down. The read loop runs until the stream closes or the token fires;
    /// either way the connected flag flips false and every still-pending
    /// awaiter fails.
    pub fn spawn<S>(stream: S, id: impl Into<String>, timeouts: Timeouts, cancel: CancellationToken) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let id = id.into();
        let framed = Framed::new(stream, LineCodec::new());
        let (sink, mut stream) = framed.split();
        let sink: BoxedSink = Box::pin(sink);

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));
        let handshake = Arc::new(std::sync::OnceLock::new());
        let (handshake_tx, handshake_rx) = oneshot::channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let done = CancellationToken::new();

        let read_loop = ReadLoop {
            session_id: id.clone(),
            pending: pending.clone(),
            connected: connected.clone(),
            handshake: handshake.clone(),
            handshake_tx: Some(handshake_tx),
            inbound_tx,
            delivery_grace: timeouts.delivery_grace,
            cancel: cancel.clone(),
            done: done.clone(),
        };

        tokio::spawn(async move {
            read_loop.run(&mut stream).await;
        });

        Self {
            id,
            sink: Arc::new(Mutex::new(sink)),
            pending,
            connected,
            handshake,
            handshake_slot: Mutex::new(Some(handshake_rx)),
            inbound_slot: std::sync::Mutex::new(Some(inbound_rx)),
            seq: AtomicU64::new(0),
            timeouts,
            cancel,
            done,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// The catalog snapshot captured from this session's handshake, if one
    /// has arrived.
    #[must_use]
    pub fn handshake_info(&self) -> Option<&HandshakeInfo> {
        self.handshake.get()
    }

    /// Token cancelled when the read loop exits; lets an owner await
    /// disconnection without polling.
    #[must_use]
    pub fn closed(&self) -> CancellationToken {
        self.done.clone()
    }

    /// Tear the session down. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
        self.connected.store(false, Ordering::Release);
    }

    /// Take the inbound queue of requests and pings addressed to this side.
    /// Only one consumer may exist; later calls return `None`.
    #[must_use]
    pub fn take_inbound(&self) -> Option<mpsc::Receiver<Message>> {
        self.inbound_slot
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
    }

    /// Write one message to the peer. Safe under concurrent writers.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is disconnected or the write fails.
    pub async fn send(&self, msg: Message) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let mut sink = self.sink.lock().await;
        sink.send(msg).await?;
        Ok(())
    }

    /// Block until the peer's handshake has been read, then return it.
    ///
    /// # Errors
    ///
    /// Fails with `HandshakeTimeout` if no handshake arrives in time, or with
    /// `Disconnected`/`Cancelled` if the session dies first.
    pub async fn wait_for_handshake(&self) -> Result<HandshakeInfo, SessionError> {
        if let Some(info) = self.handshake.get() {
            return Ok(info.clone());
        }

        let slot = self.handshake_slot.lock().await.take();
        let Some(rx) = slot else {
            return Err(SessionError::Disconnected);
        };

        tokio::select! {
            () = self.cancel.cancelled() => Err(SessionError::Cancelled),
            res = tokio::time::timeout(self.timeouts.handshake, rx) => match res {
                Err(_) => Err(SessionError::HandshakeTimeout),
                Ok(Err(_)) => Err(SessionError::Disconnected),
                Ok(Ok(info)) => Ok(info),
            },
        }
    }

    /// Issue a request and await its correlated response.
    ///
    /// The correlation id combines the method name, a wall-clock nanosecond
    /// stamp, and a per-session counter, so concurrent callers never collide.
    /// The delivery registration is removed on every exit path.
    ///
    /// # Errors
    ///
    /// Fails fast with `NotConnected` on a dead session; otherwise fails with
    /// `Timeout`, `Cancelled`, `Disconnected`, or the error the peer carried
    /// in its response.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Map<String, Value>>,
        cancel: &CancellationToken,
    ) -> Result<Value, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }

        let id = self.next_request_id(method);
        let msg = Message::request(id.clone(), method, params);
        self.roundtrip(id, msg, cancel).await
    }

    /// Probe the peer's liveness. Resolves once the matching pong arrives.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Session::send_request`].
    pub async fn ping(&self, cancel: &CancellationToken) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }

        let id = self.next_request_id("ping");
        let msg = Message::ping(id.clone());
        self.roundtrip(id, msg, cancel).await.map(|_| ())
    }

    async fn roundtrip(
        &self,
        id: String,
        msg: Message,
        cancel: &CancellationToken,
    ) -> Result<Value, SessionError> {
        let (tx, rx) = mpsc::channel(1);
        self.pending.lock().await.insert(id.clone(), tx);

        let result = self.roundtrip_inner(msg, cancel, rx).await;

        self.pending.lock().await.remove(&id);
        result
    }

    async fn roundtrip_inner(
        &self,
        msg: Message,
        cancel: &CancellationToken,
        mut rx: mpsc::Receiver<Message>,
    ) -> Result<Value, SessionError> {
        self.send(msg).await?;

        let response = tokio::select! {
            () = cancel.cancelled() => return Err(SessionError::Cancelled),
            () = self.cancel.cancelled() => return Err(SessionError::Disconnected),
            res = tokio::time::timeout(self.timeouts.request, rx.recv()) => match res {
                Err(_) => return Err(SessionError::Timeout),
                Ok(None) => return Err(SessionError::Disconnected),
                Ok(Some(msg)) => msg,
            },
        };

        if let Some(err) = response.error {
            return Err(SessionError::Remote(err));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    fn next_request_id(&self, method: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{method}-{nanos}-{seq}")
    }

    #[cfg(test)]
    async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }
}

struct ReadLoop {
    session_id: String,
    pending: Pending,
    connected: Arc<AtomicBool>,
    handshake: Arc<std::sync::OnceLock<HandshakeInfo>>,
    handshake_tx: Option<oneshot::Sender<HandshakeInfo>>,
    inbound_tx: mpsc::Sender<Message>,
    delivery_grace: Duration,
    cancel: CancellationToken,
    done: CancellationToken,
}

impl ReadLoop {
    async fn run<St>(mut self, stream: &mut St)
    where
        St: futures_util::Stream<Item = Result<Message, CodecError>> + Unpin,
    {
        loop {
            let item = tokio::select! {
                () = self.cancel.cancelled() => break,
                item = stream.next() => item,
            };

            match item {
                Some(Ok(msg)) => self.route(msg).await,
                Some(Err(e)) => {
                    warn!("[{}] Read error: {}", self.session_id, e);
                    break;
                }
                None => break,
            }
        }

        self.connected.store(false, Ordering::Release);
        // Dropping the delivery senders fails every still-pending awaiter.
        self.pending.lock().await.clear();
        self.done.cancel();
        debug!("[{}] Read loop ended", self.session_id);
    }

    async fn route(&mut self, msg: Message) {
        match msg.message_type {
            MessageType::Handshake => {
                if self.handshake.get().is_some() {
                    // Already captured; repeated handshakes are ignored.
                    return;
                }
                let Some(result) = msg.result.as_ref() else {
                    warn!("[{}] Handshake without result, ignoring", self.session_id);
                    return;
                };
                match HandshakeInfo::from_result(result) {
                    Ok(info) => {
                        let _ = self.handshake.set(info.clone());
                        if let Some(tx) = self.handshake_tx.take() {
                            let _ = tx.send(info);
                        }
                    }
                    Err(e) => warn!("[{}] Failed to parse handshake: {}", self.session_id, e),
                }
            }
            MessageType::Response => {
                if msg.id.is_empty() {
                    return;
                }
                let tx = self.pending.lock().await.get(&msg.id).cloned();
                let Some(tx) = tx else {
                    debug!("[{}] Dropping late or duplicate response: {}", self.session_id, msg.id);
                    return;
                };
                let id = msg.id.clone();
                if tokio::time::timeout(self.delivery_grace, tx.send(msg))
                    .await
                    .map_or(true, |sent| sent.is_err())
                {
                    warn!("[{}] Response delivery timed out for id: {}", self.session_id, id);
                }
            }
            MessageType::Request | MessageType::Ping => {
                if self.inbound_tx.send(msg).await.is_err() {
                    debug!("[{}] No inbound consumer, dropping request", self.session_id);
                }
            }
        }
    }
}
