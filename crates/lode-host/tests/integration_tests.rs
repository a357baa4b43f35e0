//! End-to-end tests: a real host and real manager processes talking TCP.
//!
//! The manager side runs in-process but uses the same handler and session
//! code as the `lode-manager` binary, so everything except process spawning
//! is exercised for real.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use lode_driver::{
    Driver, DriverConfig, DriverError, DriverRegistry, Link, LinkArgs, ListArgs, LocalDriver,
    Object, Storage,
};
use lode_host::{HostError, HostServer, ManagerPool, ManagerRegistry, RemoteDriverFactory};
use lode_manager::{InstanceManager, ProtocolHandler};
use lode_rpc::{Session, Timeouts};

fn test_timeouts() -> Timeouts {
    Timeouts {
        connect: Duration::from_secs(2),
        handshake: Duration::from_secs(2),
        request: Duration::from_secs(2),
        delivery_grace: Duration::from_secs(1),
        reconnect_backoff: Duration::from_millis(100),
        shutdown_grace: Duration::from_secs(1),
    }
}

/// In-memory driver used to tell managers apart in routing tests.
#[derive(Default)]
struct MemDriver {
    storage: Option<Storage>,
}

#[async_trait]
impl Driver for MemDriver {
    fn config(&self) -> DriverConfig {
        DriverConfig {
            name: "Mem".to_string(),
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
        Ok(())
    }

    async fn destroy(&mut self) -> lode_driver::Result<()> {
        Ok(())
    }

    async fn list(&self, dir: &Object, _args: &ListArgs) -> lode_driver::Result<Vec<Object>> {
        if dir.path == "/" {
            Ok(vec![Object::file("/mem.txt", 3)])
        } else {
            Err(DriverError::ObjectNotFound(dir.path.clone()))
        }
    }

    async fn link(&self, file: &Object, _args: &LinkArgs) -> lode_driver::Result<Link> {
        Ok(Link::direct(format!("mem://{}", file.path)))
    }
}

fn local_registry() -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    LocalDriver::register(&mut registry);
    registry
}

fn register_mem(registry: &mut DriverRegistry) {
    registry.register(
        DriverConfig {
            name: "Mem".to_string(),
            ..DriverConfig::default()
        },
        Vec::new(),
        || Box::new(MemDriver::default()),
    );
}

/// Dial the host and serve the manager protocol on the connection, exactly
/// as the manager binary does after connecting.
async fn spawn_manager(
    addr: std::net::SocketAddr,
    manager_id: &str,
    registry: DriverRegistry,
) -> CancellationToken {
    let instances = Arc::new(InstanceManager::new(Arc::new(registry)));
    let handler = ProtocolHandler::new(manager_id, instances);
    let stream = TcpStream::connect(addr).await.unwrap();
    let cancel = CancellationToken::new();
    let session = Session::spawn(stream, manager_id, test_timeouts(), cancel.clone());
    tokio::spawn(async move {
        let _ = handler.serve(&session).await;
    });
    cancel
}

/// Listen for host-initiated connections and serve each one, for pool tests.
async fn spawn_manager_listener(registry: DriverRegistry) -> std::net::SocketAddr {
    let instances = Arc::new(InstanceManager::new(Arc::new(registry)));
    let handler = Arc::new(ProtocolHandler::new("dm-listener", instances));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let session = Session::spawn(
                    stream,
                    "host-conn",
                    test_timeouts(),
                    CancellationToken::new(),
                );
                let _ = handler.serve(&session).await;
            });
        }
    });
    addr
}

async fn wait_for_managers(server: &HostServer, count: usize) {
    for _ in 0..100 {
        if server.connected_count().await == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "expected {count} connected managers, have {}",
        server.connected_count().await
    );
}

async fn bind_server() -> Arc<HostServer> {
    Arc::new(
        HostServer::bind("127.0.0.1:0", test_timeouts(), CancellationToken::new())
            .await
            .unwrap(),
    )
}

fn local_storage(id: i64, root: &std::path::Path) -> Storage {
    Storage {
        id,
        mount_path: format!("/mnt/test-{id}"),
        driver: "Local".to_string(),
        addition: format!(r#"{{"root_folder_path":"{}"}}"#, root.display()),
        status: "work".to_string(),
    }
}

#[tokio::test]
async fn test_full_instance_lifecycle_over_tcp() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("b.txt"), b"world").unwrap();
    std::fs::write(dir.path().join("a.txt"), b"hi").unwrap();

    let server = bind_server().await;
    let _manager = spawn_manager(server.local_addr(), "dm-a", local_registry()).await;
    wait_for_managers(&server, 1).await;

    let cancel = CancellationToken::new();
    let catalog = server.list_all_drivers(&cancel).await.unwrap();
    assert!(catalog.contains_key("Local"));
    let info = server.get_driver_info("Local", &cancel).await.unwrap();
    assert_eq!(info["items"][0]["name"], "root_folder_path");

    let factory = RemoteDriverFactory::new(server.clone());
    let mut driver = factory.adapter_for(local_storage(1, dir.path()));
    driver.init().await.unwrap();

    let listed = driver
        .list(&Object::dir("/"), &ListArgs::default())
        .await
        .unwrap();
    let names: Vec<_> = listed.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, vec!["a.txt", "b.txt"]);
    assert_eq!(listed[1].size, 5);

    let obj = driver.as_getter().unwrap().get("/a.txt").await.unwrap();
    assert_eq!(obj.size, 2);
    assert!(!obj.is_dir);

    let link = driver
        .link(&Object::file("/b.txt", 5), &LinkArgs::default())
        .await
        .unwrap();
    assert!(link.url.starts_with("file://"));

    driver.destroy().await.unwrap();
    // A destroyed adapter refuses further operations.
    assert!(driver
        .list(&Object::dir("/"), &ListArgs::default())
        .await
        .is_err());
}

#[tokio::test]
async fn test_empty_catalog_handshake() {
    let server = bind_server().await;
    let _manager = spawn_manager(server.local_addr(), "dm-empty", DriverRegistry::new()).await;
    wait_for_managers(&server, 1).await;

    let session = &server.sessions().await[0];
    let info = session.handshake_info().unwrap();
    assert_eq!(info.manager_id.as_deref(), Some("dm-empty"));
    assert_eq!(info.driver_count, 0);
    assert!(info.drivers.is_empty());

    // An empty catalog is a valid answer, not an error.
    let catalog = server
        .list_all_drivers(&CancellationToken::new())
        .await
        .unwrap();
    assert!(catalog.is_empty());
}

#[tokio::test]
async fn test_duplicate_create_rejected_remotely() {
    let dir = tempfile::tempdir().unwrap();
    let server = bind_server().await;
    let _manager = spawn_manager(server.local_addr(), "dm-a", local_registry()).await;
    wait_for_managers(&server, 1).await;

    let cancel = CancellationToken::new();
    let mut config = Map::new();
    config.insert(
        "root_folder_path".to_string(),
        Value::String(dir.path().display().to_string()),
    );

    server
        .create_instance("storage-dup", "Local", &config, &cancel)
        .await
        .unwrap();
    let err = server
        .create_instance("storage-dup", "Local", &config, &cancel)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already exists"));

    // The original instance is untouched.
    let mut params = Map::new();
    params.insert("path".to_string(), Value::String("/".to_string()));
    assert!(server
        .execute_operation("storage-dup", "list", params, &cancel)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_bogus_operation_rejected_with_400() {
    let dir = tempfile::tempdir().unwrap();
    let server = bind_server().await;
    let _manager = spawn_manager(server.local_addr(), "dm-a", local_registry()).await;
    wait_for_managers(&server, 1).await;

    let cancel = CancellationToken::new();
    let mut config = Map::new();
    config.insert(
        "root_folder_path".to_string(),
        Value::String(dir.path().display().to_string()),
    );
    let origin = server
        .create_instance("storage-8", "Local", &config, &cancel)
        .await
        .unwrap();

    let err = server
        .execute_on(&origin, "storage-8", "teleport", Map::new(), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.remote_code(), Some(400));

    // Missing required params are also caught before the driver runs.
    let err = server
        .execute_on(&origin, "storage-8", "list", Map::new(), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.remote_code(), Some(400));
}

#[tokio::test]
async fn test_unhandshaken_connection_never_registered() {
    let server = bind_server().await;

    // Connect but never send a handshake; the gate must drop us.
    let silent = TcpStream::connect(server.local_addr()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.connected_count().await, 0);

    // The handshake timeout closes the connection from the host side.
    tokio::time::sleep(test_timeouts().handshake + Duration::from_millis(500)).await;
    assert_eq!(server.connected_count().await, 0);
    drop(silent);
}

#[tokio::test]
async fn test_remote_errors_carry_codes() {
    let dir = tempfile::tempdir().unwrap();
    let server = bind_server().await;
    let _manager = spawn_manager(server.local_addr(), "dm-a", local_registry()).await;
    wait_for_managers(&server, 1).await;

    let cancel = CancellationToken::new();

    // Unknown driver: rejected by every manager.
    let err = server.get_driver_info("S3", &cancel).await.unwrap_err();
    assert!(matches!(err, HostError::DriverNotFound(_)));

    let factory = RemoteDriverFactory::new(server.clone());
    let mut unknown = factory.adapter_for(Storage {
        driver: "S3".to_string(),
        ..local_storage(2, dir.path())
    });
    assert!(unknown.init().await.is_err());

    // A bad addition fails init remotely and the error comes back typed.
    let mut bad = factory.adapter_for(Storage {
        addition: r#"{"root_folder_path":"/definitely/not/here"}"#.to_string(),
        ..local_storage(3, dir.path())
    });
    let err = bad.init().await.unwrap_err();
    assert!(err.to_string().contains("root_folder_path"));

    // Operations on an instance nobody hosts report a 404 underneath.
    let err = server
        .execute_operation("ghost", "list", Map::new(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, HostError::InstanceNotFound(_)));
}

#[tokio::test]
async fn test_manager_disconnect_is_survivable() {
    let dir = tempfile::tempdir().unwrap();
    let server = bind_server().await;
    let manager = spawn_manager(server.local_addr(), "dm-a", local_registry()).await;
    wait_for_managers(&server, 1).await;

    let factory = RemoteDriverFactory::new(server.clone());
    let mut driver = factory.adapter_for(local_storage(4, dir.path()));
    driver.init().await.unwrap();

    manager.cancel();
    wait_for_managers(&server, 0).await;

    // Operations fail promptly instead of hanging.
    assert!(driver
        .list(&Object::dir("/"), &ListArgs::default())
        .await
        .is_err());
    assert!(matches!(
        server
            .list_all_drivers(&CancellationToken::new())
            .await
            .unwrap_err(),
        HostError::NoManagers
    ));

    // A new manager connecting restores service.
    let _manager2 = spawn_manager(server.local_addr(), "dm-b", local_registry()).await;
    wait_for_managers(&server, 1).await;
    let mut driver2 = factory.adapter_for(local_storage(5, dir.path()));
    driver2.init().await.unwrap();
    assert!(driver2
        .list(&Object::dir("/"), &ListArgs::default())
        .await
        .is_ok());
}

#[tokio::test]
async fn test_pool_connects_and_pings() {
    let addr = spawn_manager_listener(local_registry()).await;
    let pool = Arc::new(ManagerPool::new(test_timeouts(), CancellationToken::new()));

    let client = pool.connect(&addr.to_string()).await.unwrap();
    let info = client.handshake_info().unwrap();
    assert_eq!(info.manager_id.as_deref(), Some("dm-listener"));
    assert_eq!(info.driver_count, 1);
    assert!(info.has_driver("Local"));
    assert_eq!(pool.connected_count().await, 1);

    let cancel = CancellationToken::new();
    pool.ping(&addr.to_string(), &cancel).await.unwrap();
    client.ping(&cancel).await.unwrap();

    // The client's typed helpers speak the same method surface.
    let drivers = client.list_drivers(&cancel).await.unwrap();
    assert!(drivers.contains_key("Local"));
    let info = client.get_driver_info("Local", &cancel).await.unwrap();
    assert_eq!(info["name"], "Local");

    // The pool exposes the same routing surface as the server.
    let catalog = pool.list_all_drivers(&cancel).await.unwrap();
    assert!(catalog.contains_key("Local"));

    pool.disconnect(&addr.to_string()).await;
    assert_eq!(pool.connected_count().await, 0);
    assert!(matches!(
        pool.ping(&addr.to_string(), &cancel).await.unwrap_err(),
        HostError::ManagerNotFound(_)
    ));
}

#[tokio::test]
async fn test_server_shutdown_closes_managers() {
    let server = bind_server().await;
    let _manager = spawn_manager(server.local_addr(), "dm-a", local_registry()).await;
    wait_for_managers(&server, 1).await;

    let session = server.sessions().await[0].clone();
    server.shutdown().await;

    // Shutdown returns only after the session's read loop has unwound.
    assert!(!session.is_connected());
    assert_eq!(server.connected_count().await, 0);

    // New connections are no longer admitted.
    if let Ok(stream) = TcpStream::connect(server.local_addr()).await {
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(server.connected_count().await, 0);
        drop(stream);
    }
}

#[tokio::test]
async fn test_instance_routed_to_manager_offering_driver() {
    let server = bind_server().await;
    let _manager_a = spawn_manager(server.local_addr(), "dm-a", local_registry()).await;

    let mut registry_b = local_registry();
    register_mem(&mut registry_b);
    let _manager_b = spawn_manager(server.local_addr(), "dm-b", registry_b).await;
    wait_for_managers(&server, 2).await;

    // The merged catalog sees both managers' drivers.
    let cancel = CancellationToken::new();
    let catalog = server.list_all_drivers(&cancel).await.unwrap();
    assert!(catalog.contains_key("Local"));
    assert!(catalog.contains_key("Mem"));

    // Looking Mem up fans out: dm-a misses, dm-b answers.
    let info = server.get_driver_info("Mem", &cancel).await.unwrap();
    assert_eq!(info["name"], "Mem");
    assert_eq!(info["config"]["name"], "Mem");

    // Only dm-b offers Mem, so the instance must land there.
    let origin = server
        .create_instance("storage-7", "Mem", &Map::new(), &cancel)
        .await
        .unwrap();
    let origin_session = server.session(&origin).await.unwrap();
    assert!(
        origin_session
            .handshake_info()
            .is_some_and(|h| h.has_driver("Mem")),
        "instance placed on a manager without the driver"
    );

    // Operations through the recorded origin reach the Mem driver.
    let mut params = Map::new();
    params.insert("path".to_string(), Value::String("/".to_string()));
    let result = server
        .execute_on(&origin, "storage-7", "list", params, &cancel)
        .await
        .unwrap();
    assert_eq!(result, json!([{"name": "mem.txt", "path": "/mem.txt", "size": 3, "is_dir": false}]));

    server.remove_instance("storage-7", &cancel).await.unwrap();
}
