//! Remote driver adapter.
//!
//! Presents a driver instance living in a manager process as an ordinary
//! [`Driver`]. Creation records which manager session accepted the instance;
//! every later operation targets that session, so an instance never gets
//! split across managers that happen to offer the same driver kind.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use lode_driver::{
    Driver, DriverConfig, DriverError, Getter, Link, LinkArgs, ListArgs, Object, OtherArgs,
    OtherOps, Storage,
};

use crate::registry::ManagerRegistry;

/// A [`Driver`] whose implementation lives in a remote manager process.
pub struct RemoteAdapter {
    registry: Arc<dyn ManagerRegistry>,
    instance_id: String,
    storage: Option<Storage>,
    /// Session id of the manager that accepted the instance. Set by init.
    origin: Option<String>,
    cancel: CancellationToken,
}

impl RemoteAdapter {
    #[must_use]
    pub fn new(registry: Arc<dyn ManagerRegistry>, instance_id: impl Into<String>) -> Self {
        Self {
            registry,
            instance_id: instance_id.into(),
            storage: None,
            origin: None,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    async fn call(&self, operation: &str, params: Map<String, Value>) -> lode_driver::Result<Value> {
        let origin = self.origin.as_ref().ok_or(DriverError::NotInitialized)?;
        self.registry
            .execute_on(origin, &self.instance_id, operation, params, &self.cancel)
            .await
            .map_err(Into::into)
    }
}

/// Decode a storage's addition into the config map sent to the manager.
/// An addition that is not a JSON object is passed through wrapped, so a
/// driver with an opaque or legacy addition format still receives it intact.
fn addition_config(addition: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(addition) {
        Ok(Value::Object(map)) => map,
        _ => {
            let mut map = Map::new();
            map.insert("addition".to_string(), Value::String(addition.to_string()));
            map
        }
    }
}

fn path_params(path: &str) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("path".to_string(), Value::String(path.to_string()));
    params
}

#[async_trait]
impl Driver for RemoteAdapter {
    fn config(&self) -> DriverConfig {
        DriverConfig {
            name: self
                .storage
                .as_ref()
                .map_or_else(|| "Remote".to_string(), |s| s.driver.clone()),
            ..DriverConfig::default()
        }
    }

    fn storage(&self) -> Option<&Storage> {
        self.storage.as_ref()
    }

    fn set_storage(&mut self, storage: Storage) {
        self.storage = Some(storage);
    }

    async fn init(&mut self) -> lode_driver::Result<()> {
        let storage = self.storage.as_ref().ok_or(DriverError::NotInitialized)?;
        let config = addition_config(&storage.addition);

        let origin = self
            .registry
            .create_instance(&self.instance_id, &storage.driver, &config, &self.cancel)
            .await
            .map_err(DriverError::from)?;

        debug!("Instance {} created on manager session {}", self.instance_id, origin);
        self.origin = Some(origin);
        Ok(())
    }

    async fn destroy(&mut self) -> lode_driver::Result<()> {
        let cancel = self.cancel.clone();

        if let Some(origin) = self.origin.as_deref() {
            if let Some(session) = self.registry.session(origin).await {
                let mut params = Map::new();
                params.insert("instance_id".to_string(), Value::String(self.instance_id.clone()));
                match session.send_request("remove_instance", Some(params), &cancel).await {
                    Ok(_) => {
                        self.origin = None;
                        return Ok(());
                    }
                    Err(e) => debug!(
                        "remove_instance on origin session {} failed, trying all managers: {}",
                        origin, e
                    ),
                }
            }
        }

        // The origin session may have reconnected under a new id; ask every
        // connected manager before giving up.
        self.registry
            .remove_instance(&self.instance_id, &cancel)
            .await
            .map_err(DriverError::from)?;
        self.origin = None;
        Ok(())
    }

    async fn list(&self, dir: &Object, args: &ListArgs) -> lode_driver::Result<Vec<Object>> {
        let mut params = path_params(&dir.path);
        params.insert("refresh".to_string(), Value::Bool(args.refresh));
        let result = self.call("list", params).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn link(&self, file: &Object, args: &LinkArgs) -> lode_driver::Result<Link> {
        let mut params = path_params(&file.path);
        if let Some(ip) = &args.ip {
            params.insert("ip".to_string(), Value::String(ip.clone()));
        }
        let result = self.call("link", params).await?;
        Ok(serde_json::from_value(result)?)
    }

    fn as_getter(&self) -> Option<&dyn Getter> {
        Some(self)
    }

    fn as_other(&self) -> Option<&dyn OtherOps> {
        Some(self)
    }
}

#[async_trait]
impl Getter for RemoteAdapter {
    async fn get(&self, path: &str) -> lode_driver::Result<Object> {
        let result = self.call("get", path_params(path)).await?;
        Ok(serde_json::from_value(result)?)
    }
}

#[async_trait]
impl OtherOps for RemoteAdapter {
    async fn other(&self, args: &OtherArgs) -> lode_driver::Result<Value> {
        let mut params = Map::new();
        params.insert("method".to_string(), Value::String(args.method.clone()));
        params.insert("data".to_string(), args.data.clone());
        if let Some(obj) = &args.obj {
            params.insert("path".to_string(), Value::String(obj.path.clone()));
        }
        self.call("other", params).await
    }
}

/// Builds adapters for storages whose driver lives behind the process
/// boundary.
pub struct RemoteDriverFactory {
    registry: Arc<dyn ManagerRegistry>,
}

impl RemoteDriverFactory {
    #[must_use]
    pub fn new(registry: Arc<dyn ManagerRegistry>) -> Self {
        Self { registry }
    }

    /// An un-initialized adapter bound to `storage`. The instance id is
    /// derived from the storage id, so re-creating the adapter for the same
    /// storage addresses the same remote instance.
    #[must_use]
    pub fn adapter_for(&self, storage: Storage) -> RemoteAdapter {
        let mut adapter = RemoteAdapter::new(
            Arc::clone(&self.registry),
            format!("storage-{}", storage.id),
        );
        adapter.set_storage(storage);
        adapter
    }

    /// Names of every driver offered by connected managers.
    ///
    /// # Errors
    ///
    /// Returns an error when no managers are connected.
    pub async fn driver_names(&self, cancel: &CancellationToken) -> crate::error::Result<Vec<String>> {
        let catalog = self.registry.list_all_drivers(cancel).await?;
        Ok(catalog.keys().cloned().collect())
    }
}
