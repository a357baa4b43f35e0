//! Local filesystem driver.
//!
//! Serves a directory tree on the manager's own filesystem. Mostly useful for
//! development and for exercising the process boundary end to end, but it is
//! a complete driver: listing, links, point lookup, and a root path.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::catalog::DriverRegistry;
use crate::driver::{Driver, Getter, Rooter};
use crate::error::{DriverError, Result};
use crate::model::{
    DriverConfig, DriverItem, ItemType, Link, LinkArgs, ListArgs, Object, Storage,
};

#[derive(Debug, Deserialize)]
struct LocalAddition {
    root_folder_path: String,
}

/// Driver backed by a directory on the local filesystem.
#[derive(Debug, Default)]
pub struct LocalDriver {
    storage: Option<Storage>,
    root: String,
}

impl LocalDriver {
    pub const NAME: &'static str = "Local";

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn driver_config() -> DriverConfig {
        DriverConfig {
            name: Self::NAME.to_string(),
            default_root: "/".to_string(),
            no_cache: true,
            alert: String::new(),
        }
    }

    #[must_use]
    pub fn items() -> Vec<DriverItem> {
        vec![DriverItem::required(
            "root_folder_path",
            ItemType::String,
            "absolute path of the directory to serve",
        )]
    }

    /// Register this driver kind in a catalog.
    pub fn register(registry: &mut DriverRegistry) {
        registry.register(Self::driver_config(), Self::items(), || {
            Box::new(LocalDriver::new())
        });
    }

    /// Map a mount-relative path onto the served tree. Rejects any path that
    /// tries to step outside the root.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        if self.root.is_empty() {
            return Err(DriverError::NotInitialized);
        }
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(DriverError::InvalidConfig(format!(
                "path escapes the served root: {path}"
            )));
        }
        Ok(Path::new(&self.root).join(relative))
    }

    async fn stat(&self, path: &str) -> Result<Object> {
        let full = self.resolve(path)?;
        let meta = tokio::fs::metadata(&full).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DriverError::ObjectNotFound(path.to_string())
            } else {
                DriverError::Io(e)
            }
        })?;

        let name = full
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Object {
            id: String::new(),
            name,
            path: path.to_string(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            is_dir: meta.is_dir(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
        })
    }
}

#[async_trait]
impl Driver for LocalDriver {
    fn config(&self) -> DriverConfig {
        Self::driver_config()
    }

    fn storage(&self) -> Option<&Storage> {
        self.storage.as_ref()
    }

    fn set_storage(&mut self, storage: Storage) {
        self.storage = Some(storage);
    }

    async fn init(&mut self) -> Result<()> {
        let storage = self.storage.as_ref().ok_or(DriverError::NotInitialized)?;
        let addition: LocalAddition = serde_json::from_str(&storage.addition)
            .map_err(|e| DriverError::InvalidConfig(format!("bad addition: {e}")))?;

        let meta = tokio::fs::metadata(&addition.root_folder_path)
            .await
            .map_err(|e| {
                DriverError::InvalidConfig(format!(
                    "root_folder_path {}: {e}",
                    addition.root_folder_path
                ))
            })?;
        if !meta.is_dir() {
            return Err(DriverError::InvalidConfig(format!(
                "root_folder_path is not a directory: {}",
                addition.root_folder_path
            )));
        }

        debug!("Local driver serving {}", addition.root_folder_path);
        self.root = addition.root_folder_path;
        Ok(())
    }

    async fn destroy(&mut self) -> Result<()> {
        self.root.clear();
        Ok(())
    }

    async fn list(&self, dir: &Object, _args: &ListArgs) -> Result<Vec<Object>> {
        let full = self.resolve(&dir.path)?;
        let mut entries = tokio::fs::read_dir(&full).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DriverError::ObjectNotFound(dir.path.clone())
            } else {
                DriverError::Io(e)
            }
        })?;

        let base = dir.path.trim_end_matches('/');
        let mut objects = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            let name = entry.file_name().to_string_lossy().into_owned();
            objects.push(Object {
                id: String::new(),
                path: format!("{base}/{name}"),
                name,
                size: if meta.is_dir() { 0 } else { meta.len() },
                is_dir: meta.is_dir(),
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        objects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(objects)
    }

    async fn link(&self, file: &Object, _args: &LinkArgs) -> Result<Link> {
        // Surface missing files as 404s instead of handing out dead links.
        let obj = self.stat(&file.path).await?;
        if obj.is_dir {
            return Err(DriverError::NotSupported(format!(
                "cannot link a directory: {}",
                file.path
            )));
        }
        let full = self.resolve(&file.path)?;
        Ok(Link::direct(format!("file://{}", full.display())))
    }

    fn as_getter(&self) -> Option<&dyn Getter> {
        Some(self)
    }

    fn as_rooter(&self) -> Option<&dyn Rooter> {
        Some(self)
    }
}

#[async_trait]
impl Getter for LocalDriver {
    async fn get(&self, path: &str) -> Result<Object> {
        self.stat(path).await
    }
}

impl Rooter for LocalDriver {
    fn root(&self) -> &str {
        &self.root
    }
}
