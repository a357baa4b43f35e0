//! The driver contract.
//!
//! Core operations every driver provides live on [`Driver`]. Optional
//! operations live on separate traits; a driver advertises membership through
//! the `as_*` accessors, so callers can test a capability without invoking
//! anything.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::model::{
    DriverCapabilities, DriverConfig, Link, LinkArgs, ListArgs, Object, OtherArgs, Storage,
};

/// A pluggable storage backend.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Static metadata. Must be callable before init.
    fn config(&self) -> DriverConfig;

    /// The persistent state bound to this instance, if any.
    fn storage(&self) -> Option<&Storage>;

    /// Bind persistent state. Called exactly once, before [`Driver::init`].
    fn set_storage(&mut self, storage: Storage);

    /// Decode the bound storage's addition and prepare the backend. The
    /// instance is unusable until this returns `Ok`.
    async fn init(&mut self) -> Result<()>;

    /// Release resources. A failure here must leave the instance registered.
    async fn destroy(&mut self) -> Result<()>;

    /// List the children of a directory.
    async fn list(&self, dir: &Object, args: &ListArgs) -> Result<Vec<Object>>;

    /// Resolve content access for a file.
    async fn link(&self, file: &Object, args: &LinkArgs) -> Result<Link>;

    fn as_getter(&self) -> Option<&dyn Getter> {
        None
    }

    fn as_other(&self) -> Option<&dyn OtherOps> {
        None
    }

    fn as_rooter(&self) -> Option<&dyn Rooter> {
        None
    }
}

/// Optional: point lookup of a single object by path.
#[async_trait]
pub trait Getter: Send + Sync {
    async fn get(&self, path: &str) -> Result<Object>;
}

/// Optional: driver-defined extra operations dispatched by method name.
#[async_trait]
pub trait OtherOps: Send + Sync {
    async fn other(&self, args: &OtherArgs) -> Result<Value>;
}

/// Optional: a driver that exposes its root path.
pub trait Rooter: Send + Sync {
    fn root(&self) -> &str;
}

/// Inspect which optional interfaces `driver` implements.
#[must_use]
pub fn capabilities_of(driver: &dyn Driver) -> DriverCapabilities {
    DriverCapabilities {
        supports_get: driver.as_getter().is_some(),
        supports_other: driver.as_other().is_some(),
        supports_root: driver.as_rooter().is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverError;

    struct Bare;

    #[async_trait]
    impl Driver for Bare {
        fn config(&self) -> DriverConfig {
            DriverConfig {
                name: "Bare".to_string(),
                ..DriverConfig::default()
            }
        }

        fn storage(&self) -> Option<&Storage> {
            None
        }

        fn set_storage(&mut self, _storage: Storage) {}

        async fn init(&mut self) -> Result<()> {
            Ok(())
        }

        async fn destroy(&mut self) -> Result<()> {
            Ok(())
        }

        async fn list(&self, _dir: &Object, _args: &ListArgs) -> Result<Vec<Object>> {
            Ok(Vec::new())
        }

        async fn link(&self, file: &Object, _args: &LinkArgs) -> Result<Link> {
            Err(DriverError::ObjectNotFound(file.path.clone()))
        }
    }

    struct WithGet(Bare);

    #[async_trait]
    impl Driver for WithGet {
        fn config(&self) -> DriverConfig {
            self.0.config()
        }

        fn storage(&self) -> Option<&Storage> {
            None
        }

        fn set_storage(&mut self, storage: Storage) {
            self.0.set_storage(storage);
        }

        async fn init(&mut self) -> Result<()> {
            Ok(())
        }

        async fn destroy(&mut self) -> Result<()> {
            Ok(())
        }

        async fn list(&self, dir: &Object, args: &ListArgs) -> Result<Vec<Object>> {
            self.0.list(dir, args).await
        }

        async fn link(&self, file: &Object, args: &LinkArgs) -> Result<Link> {
            self.0.link(file, args).await
        }

        fn as_getter(&self) -> Option<&dyn Getter> {
            Some(self)
        }
    }

    #[async_trait]
    impl Getter for WithGet {
        async fn get(&self, path: &str) -> Result<Object> {
            Ok(Object::file(path, 0))
        }
    }

    #[test]
    fn test_capabilities_default_to_none() {
        let caps = capabilities_of(&Bare);
        assert!(!caps.supports_get);
        assert!(!caps.supports_other);
        assert!(!caps.supports_root);
    }

    #[tokio::test]
    async fn test_capability_reported_without_invocation() {
        let driver = WithGet(Bare);
        let caps = capabilities_of(&driver);
        assert!(caps.supports_get);
        assert!(!caps.supports_other);

        let getter = driver.as_getter().unwrap();
        let obj = getter.get("/a").await.unwrap();
        assert_eq!(obj.path, "/a");
    }
}
