//! Connected-manager bookkeeping and catalog-wide routing.
//!
//! [`SessionSet`] is the shared map of live manager sessions. The
//! [`ManagerRegistry`] trait sits on top of it and carries the routing logic
//! both connection directions share: the host server (managers dial in) and
//! the manager pool (the host dials out) expose the same surface, so the
//! adapter never cares which way a connection was made.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use lode_rpc::{Session, SessionError};

use crate::error::{HostError, Result};

/// Live sessions keyed by session id. Sessions remove themselves when their
/// read loop ends.
#[derive(Default)]
pub struct SessionSet {
    inner: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session and arrange for its removal once it closes. An
    /// existing session under the same id is closed, not leaked.
    pub async fn insert(self: &Arc<Self>, session: Arc<Session>) {
        let id = session.id().to_string();
        let displaced = self.inner.write().await.insert(id.clone(), session.clone());
        if let Some(old) = displaced {
            if !Arc::ptr_eq(&old, &session) {
                debug!("Session {} replaced, closing the old connection", id);
                old.close();
            }
        }

        let set = Arc::clone(self);
        tokio::spawn(async move {
            session.closed().cancelled().await;
            let mut inner = set.inner.write().await;
            // Only remove the entry if it is still this exact session.
            if inner.get(&id).is_some_and(|s| Arc::ptr_eq(s, &session)) {
                inner.remove(&id);
                debug!("Session {} removed from set", id);
            }
        });
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.write().await.remove(id)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.inner
            .read()
            .await
            .get(id)
            .filter(|s| s.is_connected())
            .cloned()
    }

    pub async fn list(&self) -> Vec<Arc<Session>> {
        self.inner
            .read()
            .await
            .values()
            .filter(|s| s.is_connected())
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.list().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Close every session and hand back the drained set so callers can wait
    /// for the read loops to finish.
    pub async fn close_all(&self) -> Vec<Arc<Session>> {
        let sessions: Vec<Arc<Session>> = self
            .inner
            .write()
            .await
            .drain()
            .map(|(_, s)| s)
            .collect();
        for session in &sessions {
            session.close();
        }
        sessions
    }
}

/// The host-side view over some set of connected managers.
#[async_trait]
pub trait ManagerRegistry: Send + Sync {
    async fn sessions(&self) -> Vec<Arc<Session>>;

    async fn session(&self, id: &str) -> Option<Arc<Session>>;

    /// Merge the driver catalogs of every connected manager. When two
    /// managers offer the same driver name the later one wins.
    async fn list_all_drivers(&self, cancel: &CancellationToken) -> Result<Map<String, Value>> {
        let sessions = self.sessions().await;
        if sessions.is_empty() {
            return Err(HostError::NoManagers);
        }

        let mut merged = Map::new();
        for session in sessions {
            match session.send_request("list_drivers", None, cancel).await {
                Ok(Value::Object(catalog)) => merged.extend(catalog),
                Ok(other) => warn!(
                    "Manager {} returned a non-object driver catalog: {}",
                    session.id(),
                    other
                ),
                Err(e) => warn!("list_drivers failed on {}: {}", session.id(), e),
            }
        }
        Ok(merged)
    }

    /// Full descriptor of one driver, from the first manager that knows it.
    async fn get_driver_info(&self, driver: &str, cancel: &CancellationToken) -> Result<Value> {
        let sessions = self.sessions().await;
        if sessions.is_empty() {
            return Err(HostError::NoManagers);
        }

        for session in sessions {
            let mut params = Map::new();
            params.insert("driver".to_string(), Value::String(driver.to_string()));
            match session.send_request("get_driver_info", Some(params), cancel).await {
                Ok(info) => return Ok(info),
                Err(e) => debug!("get_driver_info({}) on {}: {}", driver, session.id(), e),
            }
        }
        Err(HostError::DriverNotFound(driver.to_string()))
    }

    /// Create an instance on some manager that offers `driver`, preferring
    /// managers whose handshake catalog listed it. Returns the session id of
    /// the manager that accepted, so later operations can target it.
    async fn create_instance(
        &self,
        instance_id: &str,
        driver: &str,
        config: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let sessions = self.sessions().await;
        if sessions.is_empty() {
            return Err(HostError::NoManagers);
        }

        let mut candidates: Vec<Arc<Session>> = sessions
            .iter()
            .filter(|s| s.handshake_info().is_some_and(|h| h.has_driver(driver)))
            .cloned()
            .collect();
        if candidates.is_empty() {
            // Handshake catalogs are a snapshot; fall back to asking everyone.
            candidates = sessions;
        }

        let mut last = HostError::DriverNotFound(driver.to_string());
        for session in candidates {
            let mut params = Map::new();
            params.insert("instance_id".to_string(), Value::String(instance_id.to_string()));
            params.insert("driver".to_string(), Value::String(driver.to_string()));
            params.insert("config".to_string(), Value::Object(config.clone()));
            match session.send_request("create_instance", Some(params), cancel).await {
                Ok(_) => return Ok(session.id().to_string()),
                Err(e) => {
                    debug!("create_instance on {} failed: {}", session.id(), e);
                    last = e.into();
                }
            }
        }
        Err(last)
    }

    /// Run an operation on the specific manager session that hosts the
    /// instance.
    async fn execute_on(
        &self,
        session_id: &str,
        instance_id: &str,
        operation: &str,
        params: Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let session = self
            .session(session_id)
            .await
            .ok_or_else(|| HostError::ManagerNotFound(session_id.to_string()))?;
        session
            .send_request("execute_operation", Some(operation_params(instance_id, operation, params)), cancel)
            .await
            .map_err(Into::into)
    }

    /// Run an operation wherever the instance lives; first success wins.
    async fn execute_operation(
        &self,
        instance_id: &str,
        operation: &str,
        params: Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let sessions = self.sessions().await;
        if sessions.is_empty() {
            return Err(HostError::NoManagers);
        }

        let mut last = HostError::InstanceNotFound(instance_id.to_string());
        for session in sessions {
            let request = operation_params(instance_id, operation, params.clone());
            match session.send_request("execute_operation", Some(request), cancel).await {
                Ok(result) => return Ok(result),
                Err(SessionError::Remote(info)) if info.code == lode_rpc::CODE_NOT_FOUND => {
                    // Not hosted here, keep looking.
                }
                Err(e) => last = e.into(),
            }
        }
        Err(last)
    }

    /// Remove an instance from whichever manager hosts it. Managers that
    /// never heard of the instance are skipped; a manager that hosts it but
    /// fails to tear it down fails the removal.
    async fn remove_instance(&self, instance_id: &str, cancel: &CancellationToken) -> Result<()> {
        let sessions = self.sessions().await;
        if sessions.is_empty() {
            return Err(HostError::NoManagers);
        }

        let mut last = HostError::InstanceNotFound(instance_id.to_string());
        for session in sessions {
            let mut params = Map::new();
            params.insert("instance_id".to_string(), Value::String(instance_id.to_string()));
            match session.send_request("remove_instance", Some(params), cancel).await {
                Ok(_) => return Ok(()),
                Err(SessionError::Remote(info)) if info.code == lode_rpc::CODE_NOT_FOUND => {}
                Err(e) => last = e.into(),
            }
        }
        Err(last)
    }
}

fn operation_params(instance_id: &str, operation: &str, params: Map<String, Value>) -> Map<String, Value> {
    let mut request = Map::new();
    request.insert("instance_id".to_string(), Value::String(instance_id.to_string()));
    request.insert("operation".to_string(), Value::String(operation.to_string()));
    request.insert("params".to_string(), Value::Object(params));
    request
}
