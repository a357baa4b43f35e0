//! Driver instance lifecycle and operation dispatch.
//!
//! An instance is one configured, initialized driver identified by the id the
//! host chose for it. Creation initializes the driver before it becomes
//! visible; removal tears it down first and aborts if teardown fails, so a
//! half-destroyed driver never silently disappears.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use serde_json::{Map, Value, json};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use lode_driver::{
    Driver, DriverRegistry, LinkArgs, ListArgs, Object, OtherArgs, Storage, capabilities_of,
};

use crate::error::{ManagerError, Result};

/// One live driver instance.
pub struct DriverInstance {
    pub id: String,
    pub driver_name: String,
    driver: RwLock<Box<dyn Driver>>,
    enabled: AtomicBool,
}

impl DriverInstance {
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

/// All instances hosted by this manager process.
pub struct InstanceManager {
    registry: Arc<DriverRegistry>,
    instances: RwLock<HashMap<String, Arc<DriverInstance>>>,
    next_storage_id: AtomicI64,
}

impl InstanceManager {
    #[must_use]
    pub fn new(registry: Arc<DriverRegistry>) -> Self {
        Self {
            registry,
            instances: RwLock::new(HashMap::new()),
            next_storage_id: AtomicI64::new(1),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    /// Create and initialize an instance of `driver_name` under `instance_id`.
    ///
    /// The map write lock is held across construction and init, so two
    /// concurrent creates with the same id cannot both succeed. A failed init
    /// leaves no trace.
    pub async fn create(
        &self,
        instance_id: &str,
        driver_name: &str,
        config: &Map<String, Value>,
    ) -> Result<()> {
        let mut instances = self.instances.write().await;
        if instances.contains_key(instance_id) {
            return Err(ManagerError::DuplicateInstance(instance_id.to_string()));
        }

        let mut driver = self
            .registry
            .construct(driver_name)
            .ok_or_else(|| ManagerError::UnknownDriver(driver_name.to_string()))?;

        let storage = Storage {
            id: self.next_storage_id.fetch_add(1, Ordering::Relaxed),
            mount_path: format!("/driver-{instance_id}"),
            driver: driver_name.to_string(),
            addition: serde_json::to_string(config)?,
            status: "work".to_string(),
        };
        driver.set_storage(storage);
        driver.init().await?;

        instances.insert(
            instance_id.to_string(),
            Arc::new(DriverInstance {
                id: instance_id.to_string(),
                driver_name: driver_name.to_string(),
                driver: RwLock::new(driver),
                enabled: AtomicBool::new(true),
            }),
        );
        info!("Created driver instance {} ({})", instance_id, driver_name);
        Ok(())
    }

    /// Tear an instance down and unregister it. If the driver's teardown
    /// fails the instance stays registered.
    pub async fn remove(&self, instance_id: &str) -> Result<()> {
        let instance = self.get(instance_id).await?;

        if let Err(e) = instance.driver.write().await.destroy().await {
            warn!("Teardown of instance {} failed: {}", instance_id, e);
            return Err(e.into());
        }

        self.instances.write().await.remove(instance_id);
        info!("Removed driver instance {}", instance_id);
        Ok(())
    }

    pub async fn set_enabled(&self, instance_id: &str, enabled: bool) -> Result<()> {
        let instance = self.get(instance_id).await?;
        instance.enabled.store(enabled, Ordering::Release);
        debug!(
            "Instance {} {}",
            instance_id,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    pub async fn get(&self, instance_id: &str) -> Result<Arc<DriverInstance>> {
        self.instances
            .read()
            .await
            .get(instance_id)
            .cloned()
            .ok_or_else(|| ManagerError::InstanceNotFound(instance_id.to_string()))
    }

    /// Summaries of every hosted instance, sorted by id.
    pub async fn list(&self) -> Vec<Value> {
        let instances: Vec<Arc<DriverInstance>> =
            self.instances.read().await.values().cloned().collect();

        let mut out = Vec::with_capacity(instances.len());
        for instance in instances {
            let caps = capabilities_of(&**instance.driver.read().await);
            out.push(json!({
                "instance_id": instance.id,
                "driver": instance.driver_name,
                "enabled": instance.is_enabled(),
                "capabilities": caps,
            }));
        }
        out.sort_by(|a, b| a["instance_id"].as_str().cmp(&b["instance_id"].as_str()));
        out
    }

    /// Run one named operation against an instance.
    ///
    /// Parameter and capability problems are rejected before the driver is
    /// touched; only a genuine driver call can produce a driver failure.
    pub async fn execute(
        &self,
        instance_id: &str,
        operation: &str,
        params: &Map<String, Value>,
    ) -> Result<Value> {
        let instance = self.get(instance_id).await?;
        if !instance.is_enabled() {
            return Err(ManagerError::InstanceDisabled(instance_id.to_string()));
        }

        let driver = instance.driver.read().await;
        match operation {
            "list" => {
                let path = str_param(params, "path")?;
                let args = ListArgs {
                    refresh: params.get("refresh").and_then(Value::as_bool).unwrap_or(false),
                };
                let objects = driver.list(&Object::dir(path), &args).await?;
                Ok(serde_json::to_value(objects)?)
            }
            "link" => {
                let path = str_param(params, "path")?;
                let args = LinkArgs {
                    ip: params.get("ip").and_then(Value::as_str).map(str::to_string),
                };
                let link = driver.link(&Object::file(path, 0), &args).await?;
                Ok(serde_json::to_value(link)?)
            }
            "get" => {
                let path = str_param(params, "path")?;
                let getter = driver
                    .as_getter()
                    .ok_or_else(|| not_supported(&**driver, "get"))?;
                let object = getter.get(path).await?;
                Ok(serde_json::to_value(object)?)
            }
            "other" => {
                let method = str_param(params, "method")?;
                let ops = driver
                    .as_other()
                    .ok_or_else(|| not_supported(&**driver, "other"))?;
                let args = OtherArgs {
                    obj: params
                        .get("path")
                        .and_then(Value::as_str)
                        .map(|p| Object::file(p, 0)),
                    method: method.to_string(),
                    data: params.get("data").cloned().unwrap_or(Value::Null),
                };
                Ok(ops.other(&args).await?)
            }
            _ => Err(ManagerError::BadParams(format!(
                "unknown operation: {operation}"
            ))),
        }
    }
}

fn not_supported(driver: &dyn Driver, op: &str) -> ManagerError {
    ManagerError::NotSupported(format!("driver {} does not support {op}", driver.config().name))
}

fn str_param<'a>(params: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ManagerError::BadParams(format!("{key} parameter is required")))
}
