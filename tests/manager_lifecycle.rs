use std::sync::Arc;
use std::time::Duration;

use datalink_core::{SessionEvent, TlsConfig, TlsMode};
use datalink_drivers::DriverRegistry;
use datalink_lib::testing::{FakeDriver, MemoryStore};
use datalink_lib::{
    ConnectionId, ConnectionManager, ConnectionSnapshot, ConnectionState, Datasource,
    DialectFamily, HostDatasource, LinkError, ManagerConfig,
};
use tokio::sync::broadcast;

fn host(dialect_host: &str, port: u16) -> HostDatasource {
    HostDatasource {
        id: None,
        name: "primary".to_string(),
        host: dialect_host.to_string(),
        port,
        username: Some("app".to_string()),
        password: Some("pw".into()),
        database: Some("orders".to_string()),
        ssl: None,
    }
}

fn pg() -> Datasource {
    Datasource::Postgres(host("db1", 5432))
}

fn setup(config: ManagerConfig) -> (ConnectionManager, Arc<FakeDriver>, Arc<MemoryStore>) {
    setup_with_store(config, MemoryStore::new())
}

fn setup_with_store(
    config: ManagerConfig,
    store: MemoryStore,
) -> (ConnectionManager, Arc<FakeDriver>, Arc<MemoryStore>) {
    let driver = Arc::new(FakeDriver::new(DialectFamily::Postgres));
    let store = Arc::new(store);
    let mut registry = DriverRegistry::new();
    registry.register(driver.clone());
    let manager = ConnectionManager::new(config, Arc::new(registry), store.clone());
    (manager, driver, store)
}

/// Collects batches until `id` disappears from the registry
async fn batches_until_evicted(
    rx: &mut broadcast::Receiver<Vec<ConnectionSnapshot>>,
    id: &ConnectionId,
) -> Vec<ConnectionSnapshot> {
    let mut history = Vec::new();
    loop {
        let batch = rx.recv().await.expect("snapshot stream");
        match batch.into_iter().find(|s| &s.id == id) {
            Some(snapshot) => history.push(snapshot),
            None => return history,
        }
    }
}

#[tokio::test]
async fn test_compatible_dialects_share_one_connection() {
    let (manager, driver, _) = setup(ManagerConfig::default());

    let a = manager.get_or_create(pg()).await.unwrap();
    let b = manager
        .get_or_create(Datasource::Cockroachdb(host("DB1", 5432)))
        .await
        .unwrap();

    assert_eq!(a, b);
    assert_eq!(a.connection_id().as_str(), "postgres-db1:5432");
    assert_eq!(driver.connect_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_single_attempt() {
    let (manager, driver, _) = setup(ManagerConfig::default());
    driver.set_connect_delay(Duration::from_millis(500));

    let (a, b) = tokio::join!(manager.get_or_create(pg()), manager.get_or_create(pg()));

    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.session(), b.session());
    assert_eq!(driver.connect_calls(), 1);
    assert_eq!(manager.state(a.connection_id()), Some(ConnectionState::Connected));
}

#[tokio::test]
async fn test_connected_record_returns_without_new_attempt() {
    let (manager, driver, _) = setup(ManagerConfig::default());

    let first = manager.get_or_create(pg()).await.unwrap();
    let mut rx = manager.subscribe();
    let second = manager.create_connection(pg()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(driver.connect_calls(), 1);
    assert!(rx.try_recv().is_err(), "reuse must not broadcast");
}

#[tokio::test]
async fn test_lifecycle_states_are_broadcast() {
    let (manager, _, _) = setup(ManagerConfig::default());
    let mut rx = manager.subscribe();

    manager.get_or_create(pg()).await.unwrap();

    let connecting = rx.recv().await.unwrap();
    assert_eq!(connecting.len(), 1);
    assert_eq!(connecting[0].state, ConnectionState::Connecting);
    assert!(connecting[0].last_connected_at.is_none());

    let connected = rx.recv().await.unwrap();
    assert_eq!(connected[0].state, ConnectionState::Connected);
    assert_eq!(connected[0].retry_count, 0);
    assert!(connected[0].last_connected_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_evict_then_fresh_cycle() {
    let (manager, driver, _) = setup(ManagerConfig::default());

    let handle = manager.get_or_create(pg()).await.unwrap();
    let id = handle.connection_id().clone();
    let mut rx = manager.subscribe();

    driver.fail_connects(Some(LinkError::connection_failed("connection refused")));
    assert!(driver.emit(handle.session(), SessionEvent::Error("socket hang up".into())));

    let history = batches_until_evicted(&mut rx, &id).await;

    assert_eq!(history[0].state, ConnectionState::Disconnected);
    assert_eq!(history[0].last_error.as_deref(), Some("socket hang up"));

    let max_retry = history.iter().map(|s| s.retry_count).max().unwrap();
    assert_eq!(max_retry, 3);

    let last = history.last().unwrap();
    assert_eq!(last.state, ConnectionState::Failed);
    assert_eq!(
        last.last_error.as_deref(),
        Some("Connection failed: connection refused")
    );

    assert!(manager.snapshots().is_empty());
    assert_eq!(driver.connect_calls(), 1 + 3);
    assert!(manager.get(&id).is_none());

    // Endpoint is back: a later call starts over from scratch
    driver.fail_connects(None);
    let fresh = manager.get_or_create(pg()).await.unwrap();
    let snapshot = manager.snapshot(fresh.connection_id()).unwrap();
    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert_eq!(snapshot.retry_count, 0);
    assert!(snapshot.last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_retry_succeeds_and_resets_counter() {
    let (manager, driver, _) = setup(ManagerConfig::default());

    let handle = manager.get_or_create(pg()).await.unwrap();
    let id = handle.connection_id().clone();
    let mut rx = manager.subscribe();

    driver.fail_connects(Some(LinkError::connection_failed("connection refused")));
    assert!(driver.emit(handle.session(), SessionEvent::Closed));

    // Let the first reconnection attempt fail, then recover
    loop {
        let batch = rx.recv().await.unwrap();
        let snapshot = batch.iter().find(|s| s.id == id).unwrap();
        if snapshot.retry_count == 1 && snapshot.state == ConnectionState::Disconnected
            && snapshot.last_error.as_deref() == Some("Connection failed: connection refused")
        {
            break;
        }
    }
    driver.fail_connects(None);

    loop {
        let batch = rx.recv().await.unwrap();
        let snapshot = batch.iter().find(|s| s.id == id).unwrap();
        if snapshot.state == ConnectionState::Connected {
            assert_eq!(snapshot.retry_count, 0);
            assert!(snapshot.last_error.is_none());
            break;
        }
    }

    let current = manager.get(&id).expect("reconnected");
    assert_ne!(current.session(), handle.session());
    // Stale session was closed; only the new one stays open
    assert_eq!(driver.open_sessions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_callers_wait_for_reconnection() {
    let (manager, driver, _) = setup(ManagerConfig::default());

    let handle = manager.get_or_create(pg()).await.unwrap();
    assert!(manager.report_lost(handle.connection_id(), "query failed: broken pipe"));

    // Arrives while the retry cycle is sleeping; must not open a second session
    let reconnected = manager.get_or_create(pg()).await.unwrap();

    assert_ne!(reconnected.session(), handle.session());
    assert_eq!(driver.connect_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_waiter_times_out() {
    let config = ManagerConfig {
        connect_timeout_ms: 120_000,
        ..ManagerConfig::default()
    };
    let (manager, driver, _) = setup(config);
    driver.set_connect_delay(Duration::from_secs(90));

    let opener = tokio::spawn({
        let manager = manager.clone();
        async move { manager.get_or_create(pg()).await }
    });
    tokio::task::yield_now().await;

    let err = manager.get_or_create(pg()).await.unwrap_err();
    assert_eq!(err, LinkError::Timeout { timeout_ms: 30_000 });

    // The original attempt is unaffected by the waiter giving up
    assert!(opener.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_marks_failed() {
    let (manager, driver, _) = setup(ManagerConfig::default());
    driver.set_connect_delay(Duration::from_secs(60));

    let err = manager.get_or_create(pg()).await.unwrap_err();
    assert_eq!(err, LinkError::Timeout { timeout_ms: 15_000 });

    let snapshot = &manager.snapshots()[0];
    assert_eq!(snapshot.state, ConnectionState::Failed);
    assert_eq!(
        snapshot.last_error.as_deref(),
        Some("Operation timed out after 15000ms")
    );
}

#[tokio::test]
async fn test_disconnect_removes_record_even_if_close_fails() {
    let (manager, driver, store) = setup(ManagerConfig::default());

    let handle = manager.get_or_create(pg()).await.unwrap();
    driver.fail_disconnects(true);

    manager.disconnect(handle.connection_id()).await.unwrap();

    assert!(manager.snapshots().is_empty());
    assert_eq!(driver.disconnect_calls(), 1);
    assert!(store.touches().is_empty());

    // Unknown ids are a no-op
    manager.disconnect(handle.connection_id()).await.unwrap();
    assert_eq!(driver.disconnect_calls(), 1);
}

#[tokio::test]
async fn test_disconnect_all_and_remove() {
    let (manager, driver, _) = setup(ManagerConfig::default());

    let a = manager.get_or_create(pg()).await.unwrap();
    manager
        .get_or_create(Datasource::Postgres(host("db2", 5432)))
        .await
        .unwrap();
    assert_eq!(manager.snapshots().len(), 2);

    manager.remove(a.connection_id()).await.unwrap();
    assert_eq!(manager.snapshots().len(), 1);

    manager.disconnect_all().await.unwrap();
    assert!(manager.snapshots().is_empty());
    assert_eq!(driver.open_sessions(), 0);
}

#[tokio::test]
async fn test_missing_certificate_is_omitted() {
    let (manager, driver, _) = setup(ManagerConfig::default());

    let mut ds = host("db1", 5432);
    ds.ssl = Some(
        TlsConfig::new(TlsMode::VerifyCa)
            .with_ca("/nonexistent/datalink/ca.pem")
            .with_client_cert("/nonexistent/datalink/client.pem", "/nonexistent/datalink/client.key"),
    );

    manager.get_or_create(Datasource::Postgres(ds)).await.unwrap();

    let tls = driver.last_request().unwrap().tls.expect("tls material");
    assert!(tls.reject_unauthorized);
    assert!(tls.ca_pem.is_none());
    assert!(tls.cert_pem.is_none());
    assert!(tls.key_pem.is_none());
}

#[tokio::test]
async fn test_certificate_contents_reach_driver() {
    let dir = tempfile::tempdir().unwrap();
    let ca_path = dir.path().join("ca.pem");
    std::fs::write(&ca_path, "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n")
        .unwrap();

    let (manager, driver, _) = setup(ManagerConfig::default());
    let mut ds = host("db1", 5432);
    ds.ssl = Some(TlsConfig::new(TlsMode::Required).with_ca(ca_path.to_string_lossy()));

    manager.get_or_create(Datasource::Postgres(ds)).await.unwrap();

    let tls = driver.last_request().unwrap().tls.unwrap();
    assert!(!tls.reject_unauthorized);
    assert!(tls.ca_pem.unwrap().contains("BEGIN CERTIFICATE"));
}

#[tokio::test]
async fn test_secrets_are_rehydrated_for_saved_datasources() {
    let store = MemoryStore::new().with_secret("ds_1", "from-vault");
    let (manager, driver, store) = setup_with_store(ManagerConfig::default(), store);

    let mut ds = host("db1", 5432);
    ds.id = Some("ds_1".to_string());
    ds.password = None;

    manager.get_or_create(Datasource::Postgres(ds)).await.unwrap();

    let request = driver.last_request().unwrap();
    let secret = request.datasource.secret().map(|s| s.expose().clone());
    assert_eq!(secret.as_deref(), Some("from-vault"));

    tokio::task::yield_now().await;
    assert_eq!(store.touches(), vec!["ds_1".to_string()]);
}

#[tokio::test]
async fn test_secret_failure_is_propagated() {
    let (manager, driver, _) = setup(ManagerConfig::default());

    let mut ds = host("db1", 5432);
    ds.id = Some("ds_missing".to_string());
    ds.password = None;

    let err = manager.get_or_create(Datasource::Postgres(ds)).await.unwrap_err();
    assert!(matches!(err, LinkError::SecretError { .. }));
    assert_eq!(driver.connect_calls(), 0);
    assert_eq!(manager.snapshots()[0].state, ConnectionState::Failed);
}

#[tokio::test]
async fn test_touch_failure_is_swallowed() {
    let (manager, _, store) = setup(ManagerConfig::default());
    store.fail_touches(true);

    let mut ds = host("db1", 5432);
    ds.id = Some("ds_1".to_string());
    assert!(manager.get_or_create(Datasource::Postgres(ds)).await.is_ok());
}

#[tokio::test]
async fn test_connection_string_is_stable() {
    let (manager, _, _) = setup(ManagerConfig::default());
    manager.get_or_create(pg()).await.unwrap();

    let first = manager.snapshots();
    let second = manager.snapshots();

    assert_eq!(
        first[0].connection_string.as_deref(),
        Some("postgres://app@db1:5432/orders")
    );
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_test_connection_has_no_side_effects() {
    let (manager, driver, _) = setup(ManagerConfig::default());
    let mut rx = manager.subscribe();

    manager.test_connection(pg()).await.unwrap();

    assert_eq!(driver.connect_calls(), 1);
    assert_eq!(driver.open_sessions(), 0);
    assert!(manager.snapshots().is_empty());
    assert!(rx.try_recv().is_err());
}
