//! Outbound connections: the host dials managers it knows about.
//!
//! [`ManagerClient`] is one dialed connection with typed helpers over the
//! method surface; [`ManagerPool`] keeps a set of them and layers the
//! catalog-wide routing of [`ManagerRegistry`] on top.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use lode_rpc::{HandshakeInfo, Session, Timeouts};

use crate::error::{HostError, Result};
use crate::registry::{ManagerRegistry, SessionSet};

/// One connection to a driver manager, dialed from the host side.
pub struct ManagerClient {
    address: String,
    session: Arc<Session>,
}

impl ManagerClient {
    /// Dial `address`, start the session, and wait for the manager's catalog
    /// handshake. A peer that never completes the handshake is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error on connect failure, connect timeout, or handshake
    /// timeout.
    pub async fn connect(address: &str, timeouts: Timeouts, cancel: CancellationToken) -> Result<Self> {
        let stream = tokio::time::timeout(
            timeouts.connect,
            tokio::net::TcpStream::connect(address),
        )
        .await
        .map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::TimedOut, format!("connect to {address} timed out"))
        })??;

        let session = Arc::new(Session::spawn(stream, address, timeouts, cancel));
        if let Err(e) = session.wait_for_handshake().await {
            session.close();
            return Err(e.into());
        }

        Ok(Self {
            address: address.to_string(),
            session,
        })
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// The catalog announced at connection time.
    #[must_use]
    pub fn handshake_info(&self) -> Option<&HandshakeInfo> {
        self.session.handshake_info()
    }

    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn close(&self) {
        self.session.close();
    }

    /// This manager's driver catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the reply is not an object.
    pub async fn list_drivers(&self, cancel: &CancellationToken) -> Result<Map<String, Value>> {
        match self.session.send_request("list_drivers", None, cancel).await? {
            Value::Object(catalog) => Ok(catalog),
            other => Err(HostError::BadResponse(format!(
                "list_drivers returned {other}"
            ))),
        }
    }

    /// Full descriptor of one driver on this manager.
    ///
    /// # Errors
    ///
    /// Returns an error if the manager does not know the driver.
    pub async fn get_driver_info(&self, driver: &str, cancel: &CancellationToken) -> Result<Value> {
        let mut params = Map::new();
        params.insert("driver".to_string(), Value::String(driver.to_string()));
        Ok(self
            .session
            .send_request("get_driver_info", Some(params), cancel)
            .await?)
    }

    /// Create an instance on this manager.
    ///
    /// # Errors
    ///
    /// Returns an error if the manager rejects the instance.
    pub async fn create_instance(
        &self,
        instance_id: &str,
        driver: &str,
        config: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut params = Map::new();
        params.insert("instance_id".to_string(), Value::String(instance_id.to_string()));
        params.insert("driver".to_string(), Value::String(driver.to_string()));
        params.insert("config".to_string(), Value::Object(config.clone()));
        self.session
            .send_request("create_instance", Some(params), cancel)
            .await?;
        Ok(())
    }

    /// Remove an instance from this manager.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance is unknown or teardown fails.
    pub async fn remove_instance(&self, instance_id: &str, cancel: &CancellationToken) -> Result<()> {
        let mut params = Map::new();
        params.insert("instance_id".to_string(), Value::String(instance_id.to_string()));
        self.session
            .send_request("remove_instance", Some(params), cancel)
            .await?;
        Ok(())
    }

    /// Run one operation against an instance on this manager.
    ///
    /// # Errors
    ///
    /// Returns an error carrying the remote code on failure.
    pub async fn execute_operation(
        &self,
        instance_id: &str,
        operation: &str,
        params: Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let mut request = Map::new();
        request.insert("instance_id".to_string(), Value::String(instance_id.to_string()));
        request.insert("operation".to_string(), Value::String(operation.to_string()));
        request.insert("params".to_string(), Value::Object(params));
        Ok(self
            .session
            .send_request("execute_operation", Some(request), cancel)
            .await?)
    }

    /// Probe this manager's liveness.
    ///
    /// # Errors
    ///
    /// Returns an error if the pong never arrives.
    pub async fn ping(&self, cancel: &CancellationToken) -> Result<()> {
        self.session.ping(cancel).await?;
        Ok(())
    }
}

/// Pool of manager connections established from the host side, keyed by the
/// address each was dialed at.
pub struct ManagerPool {
    set: Arc<SessionSet>,
    timeouts: Timeouts,
    cancel: CancellationToken,
}

impl ManagerPool {
    #[must_use]
    pub fn new(timeouts: Timeouts, cancel: CancellationToken) -> Self {
        Self {
            set: Arc::new(SessionSet::new()),
            timeouts,
            cancel,
        }
    }

    /// Dial a manager and add it to the pool.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`ManagerClient::connect`].
    pub async fn connect(&self, address: &str) -> Result<ManagerClient> {
        let client =
            ManagerClient::connect(address, self.timeouts.clone(), self.cancel.child_token()).await?;

        if let Some(info) = client.handshake_info() {
            info!(
                "Connected to driver manager {} at {} ({} drivers)",
                info.manager_id.as_deref().unwrap_or("<unnamed>"),
                address,
                info.driver_count
            );
        }
        self.set.insert(Arc::clone(client.session())).await;
        Ok(client)
    }

    /// Drop the connection dialed at `address`, if it is still in the pool.
    pub async fn disconnect(&self, address: &str) {
        if let Some(session) = self.set.remove(address).await {
            session.close();
        }
    }

    pub async fn connected_count(&self) -> usize {
        self.set.len().await
    }

    /// Probe one pooled manager.
    ///
    /// # Errors
    ///
    /// Returns an error if the manager is gone or the pong never arrives.
    pub async fn ping(&self, address: &str, cancel: &CancellationToken) -> Result<()> {
        let session = self
            .set
            .get(address)
            .await
            .ok_or_else(|| HostError::ManagerNotFound(address.to_string()))?;
        session.ping(cancel).await?;
        Ok(())
    }

    /// Close every pooled connection.
    pub async fn shutdown(&self) {
        let _ = self.set.close_all().await;
        self.cancel.cancel();
    }
}

#[async_trait]
impl ManagerRegistry for ManagerPool {
    async fn sessions(&self) -> Vec<Arc<Session>> {
        self.set.list().await
    }

    async fn session(&self, id: &str) -> Option<Arc<Session>> {
        self.set.get(id).await
    }
}
