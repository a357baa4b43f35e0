//! Inbound listener: managers dial the host.
//!
//! Each accepted connection must open with the manager's catalog handshake;
//! one that stays silent is dropped. Accepted sessions join the shared
//! [`SessionSet`] and leave it again when their connection ends, so the
//! routing layer only ever sees live managers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lode_rpc::{Session, Timeouts};

use crate::error::Result;
use crate::registry::{ManagerRegistry, SessionSet};

/// TCP server accepting driver-manager connections.
pub struct HostServer {
    set: Arc<SessionSet>,
    local_addr: SocketAddr,
    timeouts: Timeouts,
    cancel: CancellationToken,
}

impl HostServer {
    /// Bind `addr` and start accepting manager connections in the
    /// background. Binding port 0 picks a free port; [`HostServer::local_addr`]
    /// reports the actual one.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(addr: &str, timeouts: Timeouts, cancel: CancellationToken) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Listening for driver managers on {}", local_addr);

        let set = Arc::new(SessionSet::new());
        let accept_set = Arc::clone(&set);
        let accept_timeouts = timeouts.clone();
        let accept_cancel = cancel.clone();
        tokio::spawn(async move {
            accept_loop(listener, accept_set, accept_timeouts, accept_cancel).await;
        });

        Ok(Self {
            set,
            local_addr,
            timeouts,
            cancel,
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn connected_count(&self) -> usize {
        self.set.len().await
    }

    /// Stop accepting, close every manager connection, and wait up to the
    /// shutdown grace for their read loops to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let sessions = self.set.close_all().await;
        let drained = tokio::time::timeout(self.timeouts.shutdown_grace, async {
            for session in &sessions {
                session.closed().cancelled().await;
            }
        })
        .await;
        if drained.is_err() {
            warn!("Shutdown grace elapsed with sessions still draining");
        }
    }
}

#[async_trait]
impl ManagerRegistry for HostServer {
    async fn sessions(&self) -> Vec<Arc<Session>> {
        self.set.list().await
    }

    async fn session(&self, id: &str) -> Option<Arc<Session>> {
        self.set.get(id).await
    }
}

async fn accept_loop(
    listener: TcpListener,
    set: Arc<SessionSet>,
    timeouts: Timeouts,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let set = Arc::clone(&set);
                let timeouts = timeouts.clone();
                let cancel = cancel.child_token();
                tokio::spawn(async move {
                    admit(stream, peer, set, timeouts, cancel).await;
                });
            }
            Err(e) => {
                warn!("Accept failed: {}", e);
            }
        }
    }
    info!("Stopped accepting driver managers");
}

/// Run one accepted connection through the handshake gate.
async fn admit(
    stream: TcpStream,
    peer: SocketAddr,
    set: Arc<SessionSet>,
    timeouts: Timeouts,
    cancel: CancellationToken,
) {
    let session_id = next_session_id();
    let session = Arc::new(Session::spawn(stream, session_id.clone(), timeouts, cancel));

    match session.wait_for_handshake().await {
        Ok(info) => {
            info!(
                "Driver manager {} connected from {} as {} ({} drivers)",
                info.manager_id.as_deref().unwrap_or("<unnamed>"),
                peer,
                session_id,
                info.driver_count
            );
            set.insert(session).await;
        }
        Err(e) => {
            warn!("Dropping connection from {}: {}", peer, e);
            session.close();
        }
    }
}

fn next_session_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("dm-{nanos}")
}
