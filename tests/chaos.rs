// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Chaos Testing for the sync service
//!
//! This module tests failure scenarios using:
//! 1. **FailingDocumentStore wrappers** - precise error injection at specific call counts
//! 2. **Slow and offline stores** - latency and refusal at the connection layer
//! 3. **Data corruption** - garbage documents in the secondary store
//! 4. **Container killing** - abrupt Redis death mid-session (needs Docker)
//!
//! # Running Chaos Tests
//! ```bash
//! cargo test --test chaos
//! cargo test --test chaos -- --ignored --nocapture   # container scenarios
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde_json::{json, Value};

use dual_sync::model::{Account, Appointment, AppointmentStatus, Gender, RoleCode};
use dual_sync::storage::memory::{InMemoryDocumentStore, InMemoryPrimaryStore, MemoryConnector};
use dual_sync::storage::traits::SearchPage;
use dual_sync::{
    CircuitConfig, ConnectionManager, ConnectionState, ConsistencyReport, ConsistencyVerifier, Connector,
    DocumentStore, EntityKind, PrimaryId, SkipReason, StorageError, SyncConfig, SyncService, SyncStatus,
    SyncedDocument, UnverifiableReason, WriteAction,
};

use testcontainers::{clients::Cli, core::WaitFor, GenericImage};

// =============================================================================
// Failing Store Wrappers - Precise Error Injection
// =============================================================================

/// Wraps a store and injects failures at specific call counts.
pub struct FailingDocumentStore {
    inner: Arc<dyn DocumentStore>,
    call_count: AtomicU64,
    /// Fail on these call numbers (1-indexed)
    fail_on_calls: Vec<u64>,
    /// Fail every call from this number on (1-indexed)
    fail_from: Option<u64>,
    error: StorageError,
    healed: AtomicBool,
}

impl FailingDocumentStore {
    pub fn new(inner: Arc<dyn DocumentStore>, fail_on_calls: Vec<u64>, error: StorageError) -> Self {
        Self {
            inner,
            call_count: AtomicU64::new(0),
            fail_on_calls,
            fail_from: None,
            error,
            healed: AtomicBool::new(false),
        }
    }

    /// Fails permanently after `n` successful calls, until healed.
    pub fn fail_after(inner: Arc<dyn DocumentStore>, n: u64, error: StorageError) -> Self {
        let mut store = Self::new(inner, vec![], error);
        store.fail_from = Some(n + 1);
        store
    }

    pub fn heal(&self) {
        self.healed.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u64 {
        self.call_count.load(Ordering::SeqCst)
    }

    fn maybe_fail(&self) -> Result<(), StorageError> {
        let count = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        if self.healed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let fail = self.fail_on_calls.contains(&count) || self.fail_from.is_some_and(|from| count >= from);
        if fail {
            Err(self.error.clone())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentStore for FailingDocumentStore {
    async fn ping(&self) -> Result<(), StorageError> {
        self.inner.ping().await
    }

    async fn upsert(&self, doc: &SyncedDocument) -> Result<WriteAction, StorageError> {
        self.maybe_fail()?;
        self.inner.upsert(doc).await
    }

    async fn get(&self, kind: EntityKind, primary_id: PrimaryId) -> Result<Option<SyncedDocument>, StorageError> {
        self.maybe_fail()?;
        self.inner.get(kind, primary_id).await
    }

    async fn get_value(&self, kind: EntityKind, primary_id: PrimaryId) -> Result<Option<Value>, StorageError> {
        self.maybe_fail()?;
        self.inner.get_value(kind, primary_id).await
    }

    async fn delete(&self, kind: EntityKind, primary_id: PrimaryId) -> Result<WriteAction, StorageError> {
        self.maybe_fail()?;
        self.inner.delete(kind, primary_id).await
    }

    async fn search(&self, kind: EntityKind, query: &str, offset: usize, limit: usize) -> Result<SearchPage, StorageError> {
        self.maybe_fail()?;
        self.inner.search(kind, query, offset, limit).await
    }
}

/// Adds a fixed delay to every write.
pub struct SlowDocumentStore {
    inner: Arc<dyn DocumentStore>,
    delay: Duration,
}

#[async_trait]
impl DocumentStore for SlowDocumentStore {
    async fn ping(&self) -> Result<(), StorageError> {
        self.inner.ping().await
    }

    async fn upsert(&self, doc: &SyncedDocument) -> Result<WriteAction, StorageError> {
        tokio::time::sleep(self.delay).await;
        self.inner.upsert(doc).await
    }

    async fn get(&self, kind: EntityKind, primary_id: PrimaryId) -> Result<Option<SyncedDocument>, StorageError> {
        self.inner.get(kind, primary_id).await
    }

    async fn get_value(&self, kind: EntityKind, primary_id: PrimaryId) -> Result<Option<Value>, StorageError> {
        self.inner.get_value(kind, primary_id).await
    }

    async fn delete(&self, kind: EntityKind, primary_id: PrimaryId) -> Result<WriteAction, StorageError> {
        self.inner.delete(kind, primary_id).await
    }

    async fn search(&self, kind: EntityKind, query: &str, offset: usize, limit: usize) -> Result<SearchPage, StorageError> {
        self.inner.search(kind, query, offset, limit).await
    }
}

/// Hands out one fixed store and counts connects.
struct StaticConnector {
    store: Arc<dyn DocumentStore>,
    connects: AtomicU64,
}

impl StaticConnector {
    fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            connects: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Connector for StaticConnector {
    async fn connect(&self) -> Result<Arc<dyn DocumentStore>, StorageError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.store.clone())
    }

    fn describe(&self) -> String {
        "static".into()
    }
}

/// Refuses every connection.
struct RefusingConnector {
    connects: AtomicU64,
}

#[async_trait]
impl Connector for RefusingConnector {
    async fn connect(&self) -> Result<Arc<dyn DocumentStore>, StorageError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Unavailable("connection refused".into()))
    }

    fn describe(&self) -> String {
        "refusing".into()
    }
}

/// Must never be reached.
struct PanickingConnector;

#[async_trait]
impl Connector for PanickingConnector {
    async fn connect(&self) -> Result<Arc<dyn DocumentStore>, StorageError> {
        panic!("connector called while sync is disabled");
    }

    fn describe(&self) -> String {
        "panicking".into()
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn config() -> SyncConfig {
    SyncConfig {
        reconnect_backoff_ms: 0,
        operation_timeout_ms: 100,
        connect_timeout_ms: 100,
        ..Default::default()
    }
}

fn service_over(connector: Arc<dyn Connector>, config: SyncConfig, circuit: CircuitConfig) -> SyncService {
    let connection = Arc::new(ConnectionManager::new(connector, &config));
    SyncService::with_circuit(config, connection, circuit)
}

fn account(id: PrimaryId, name: &str) -> Account {
    Account {
        id: Some(id),
        name: name.into(),
        last_name: "Lopez".into(),
        age: 38,
        gender: Gender::Female,
        phone: "555-0142".into(),
        email: format!("{}@example.com", name.to_lowercase()),
        role: RoleCode::patient(),
    }
}

// =============================================================================
// Error injection
// =============================================================================

#[tokio::test]
async fn chaos_injected_failures_are_reported_not_raised() {
    let memory = Arc::new(InMemoryDocumentStore::new());
    let failing = Arc::new(FailingDocumentStore::new(
        memory.clone(),
        vec![2, 4],
        StorageError::Backend("OOM command not allowed".into()),
    ));
    let service = service_over(
        Arc::new(StaticConnector::new(failing.clone())),
        config(),
        CircuitConfig::lenient(),
    );

    let mut statuses = Vec::new();
    for id in 1..=5 {
        let outcome = service.sync_account(&account(id, "Ana"), None, None).await.unwrap();
        statuses.push(outcome.status);
    }

    assert!(matches!(statuses[0], SyncStatus::Success(WriteAction::Created)));
    assert!(matches!(statuses[1], SyncStatus::Failed(StorageError::Backend(_))));
    assert!(matches!(statuses[2], SyncStatus::Success(_)));
    assert!(matches!(statuses[3], SyncStatus::Failed(_)));
    assert!(matches!(statuses[4], SyncStatus::Success(_)));

    // Failed writes left nothing behind
    assert_eq!(memory.len(), 3);
    assert!(memory.raw(EntityKind::Account, 2).is_none());
    assert!(memory.raw(EntityKind::Account, 4).is_none());
}

#[tokio::test]
async fn chaos_circuit_opens_then_recovers() {
    let memory = Arc::new(InMemoryDocumentStore::new());
    let failing = Arc::new(FailingDocumentStore::fail_after(
        memory.clone(),
        0,
        StorageError::Backend("READONLY replica".into()),
    ));
    let service = service_over(
        Arc::new(StaticConnector::new(failing.clone())),
        config(),
        CircuitConfig::fast_trip(),
    );
    let ana = account(1, "Ana");

    let first = service.sync_account(&ana, None, None).await.unwrap();
    assert!(first.is_failed());
    for _ in 0..3 {
        let outcome = service.sync_account(&ana, None, None).await.unwrap();
        assert!(!outcome.is_success());
    }

    // Open: fails fast without touching the store
    let calls = failing.calls();
    let outcome = service.sync_account(&ana, None, None).await.unwrap();
    assert_eq!(outcome.status, SyncStatus::Skipped(SkipReason::CircuitOpen));
    assert_eq!(failing.calls(), calls);

    // Heal and wait out the recovery window
    failing.heal();
    tokio::time::sleep(Duration::from_millis(80)).await;

    let outcome = service.sync_account(&ana, None, None).await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(memory.len(), 1);
}

#[tokio::test]
async fn chaos_connection_drop_triggers_single_reconnect() {
    let memory = Arc::new(InMemoryDocumentStore::new());
    let failing = Arc::new(FailingDocumentStore::new(
        memory.clone(),
        vec![2],
        StorageError::Unavailable("broken pipe".into()),
    ));
    let connector = Arc::new(StaticConnector::new(failing.clone()));
    let service = service_over(connector.clone(), config(), CircuitConfig::lenient());

    assert!(service.sync_account(&account(1, "Ana"), None, None).await.unwrap().is_success());

    let dropped = service.sync_account(&account(2, "Bea"), None, None).await.unwrap();
    assert_eq!(dropped.status, SyncStatus::Skipped(SkipReason::SecondaryUnavailable));
    assert_eq!(service.connection().state(), ConnectionState::Disconnected);

    // Next call reconnects once and proceeds
    assert!(service.sync_account(&account(2, "Bea"), None, None).await.unwrap().is_success());
    assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    assert_eq!(service.connection().state(), ConnectionState::Connected);
}

// =============================================================================
// Latency and refusal
// =============================================================================

#[tokio::test]
async fn chaos_slow_store_never_blocks_caller_past_timeout() {
    let memory = Arc::new(InMemoryDocumentStore::new());
    let slow = Arc::new(SlowDocumentStore {
        inner: memory.clone(),
        delay: Duration::from_secs(10),
    });
    let service = service_over(Arc::new(StaticConnector::new(slow)), config(), CircuitConfig::lenient());

    let started = Instant::now();
    let outcome = service.sync_account(&account(1, "Ana"), None, None).await.unwrap();
    let elapsed = started.elapsed();

    assert!(matches!(outcome.status, SyncStatus::Failed(StorageError::Timeout(_))));
    assert!(elapsed < Duration::from_secs(1), "caller blocked for {:?}", elapsed);
    assert!(memory.is_empty());
}

#[tokio::test]
async fn chaos_slow_connect_is_bounded() {
    let memory = Arc::new(InMemoryDocumentStore::new());
    let connector = Arc::new(MemoryConnector::new(memory.clone()).with_latency(Duration::from_secs(10)));
    let service = service_over(connector, config(), CircuitConfig::lenient());

    let started = Instant::now();
    let outcome = service.sync_account(&account(1, "Ana"), None, None).await.unwrap();

    assert_eq!(outcome.status, SyncStatus::Skipped(SkipReason::SecondaryUnavailable));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn chaos_offline_store_with_backoff_does_not_hammer() {
    let connector = Arc::new(RefusingConnector {
        connects: AtomicU64::new(0),
    });
    let service = service_over(
        connector.clone(),
        SyncConfig {
            reconnect_backoff_ms: 60_000,
            ..config()
        },
        CircuitConfig::default(),
    );

    for id in 1..=100 {
        let outcome = service.sync_account(&account(id, "Ana"), None, None).await.unwrap();
        assert_eq!(outcome.status, SyncStatus::Skipped(SkipReason::SecondaryUnavailable));
    }

    // One real attempt, then fail-fast inside the backoff window
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    assert_eq!(service.connection().connect_attempts(), 1);
}

#[tokio::test]
async fn chaos_disabled_never_reaches_connector() {
    let service = service_over(Arc::new(PanickingConnector), SyncConfig::disabled(), CircuitConfig::default());

    for id in 1..=10 {
        let outcome = service.sync_account(&account(id, "Ana"), None, None).await.unwrap();
        assert_eq!(outcome.status, SyncStatus::Skipped(SkipReason::Disabled));
    }
    assert!(service.get_account(1).await.is_none());
    assert!(service.search("ana").collect().await.is_empty());
    assert_eq!(service.connection().state(), ConnectionState::Uninitialized);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn chaos_racing_writes_converge_to_one_whole_document() {
    let memory = Arc::new(InMemoryDocumentStore::new());
    let service = Arc::new(service_over(
        Arc::new(MemoryConnector::new(memory.clone())),
        config(),
        CircuitConfig::lenient(),
    ));

    let mut tasks = Vec::new();
    for version in 0..32u32 {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            let mut ana = account(1, &format!("Ana{}", version));
            ana.age = version;
            service.sync_account(&ana, None, None).await.unwrap()
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().is_success());
    }

    // Last writer wins, but fields are never mixed across versions
    let doc = service.get_account(1).await.unwrap();
    let version: u32 = doc.name.trim_start_matches("Ana").parse().unwrap();
    assert_eq!(doc.age, version);
    assert_eq!(doc.email, format!("ana{}@example.com", version));
    assert_eq!(memory.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn chaos_concurrent_first_use_connects_once() {
    let memory = Arc::new(InMemoryDocumentStore::new());
    let connector = Arc::new(MemoryConnector::new(memory.clone()).with_latency(Duration::from_millis(30)));
    let relaxed = SyncConfig {
        reconnect_backoff_ms: 0,
        ..Default::default()
    };
    let service = Arc::new(service_over(connector.clone(), relaxed, CircuitConfig::lenient()));

    let mut tasks = Vec::new();
    for id in 1..=50 {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            service.sync_account(&account(id, "Ana"), None, None).await.unwrap()
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().is_success());
    }

    assert_eq!(connector.connects(), 1);
    assert_eq!(memory.len(), 50);
}

#[tokio::test]
async fn chaos_repeated_outages_do_not_leak_connections() {
    let memory = Arc::new(InMemoryDocumentStore::new());
    let connector = Arc::new(MemoryConnector::new(memory.clone()));
    let service = service_over(connector.clone(), config(), CircuitConfig::lenient());

    for round in 0..20 {
        memory.set_available(true);
        assert!(service.sync_account(&account(1, "Ana"), None, None).await.unwrap().is_success());

        memory.set_available(false);
        let outcome = service.sync_account(&account(1, "Ana"), None, None).await.unwrap();
        assert!(outcome.is_skipped(), "round {}: {:?}", round, outcome);
    }

    // The manager holds at most one handle: the connector's Arc plus ours
    assert_eq!(Arc::strong_count(&memory), 2);
    service.close();
    assert_eq!(Arc::strong_count(&memory), 2);
    // One connect per recovery, no more
    assert!(connector.connects() <= 40);
}

// =============================================================================
// Idempotence and corruption
// =============================================================================

#[tokio::test]
async fn chaos_idempotent_upsert() {
    let memory = Arc::new(InMemoryDocumentStore::new());
    let service = service_over(
        Arc::new(MemoryConnector::new(memory.clone())),
        config(),
        CircuitConfig::lenient(),
    );
    let ana = account(1, "Ana");

    let first = service.sync_account(&ana, None, None).await.unwrap();
    assert_eq!(first.action(), Some(WriteAction::Created));
    let stored = memory.raw(EntityKind::Account, 1).unwrap();

    for _ in 0..5 {
        let again = service.sync_account(&ana, None, None).await.unwrap();
        assert_eq!(again.action(), Some(WriteAction::Updated));
    }

    let mut latest = memory.raw(EntityKind::Account, 1).unwrap();
    let mut original = stored;
    latest.as_object_mut().unwrap().remove("synced_at");
    original.as_object_mut().unwrap().remove("synced_at");
    assert_eq!(latest, original);
    assert_eq!(memory.len(), 1);
}

#[tokio::test]
async fn chaos_corrupt_document_is_contained() {
    let memory = Arc::new(InMemoryDocumentStore::new());
    let service = Arc::new(service_over(
        Arc::new(MemoryConnector::new(memory.clone())),
        config(),
        CircuitConfig::fast_trip(),
    ));
    memory.put_raw(EntityKind::Account, 1, json!({"primary_id": 1, "name": ["not", "a", "string"]}));

    // Reads never raise
    for _ in 0..5 {
        assert!(service.get_account(1).await.is_none());
    }
    // Corruption is a document problem, not a store problem
    assert_eq!(service.connection().state(), ConnectionState::Connected);
    assert!(service.sync_account(&account(2, "Bea"), None, None).await.unwrap().is_success());

    // Re-sync repairs it
    let primary = Arc::new(InMemoryPrimaryStore::new());
    primary.insert_account(account(1, "Ana"));
    assert!(service.sync_account(&account(1, "Ana"), None, None).await.unwrap().is_success());
    let verifier = ConsistencyVerifier::new(primary, service.clone());
    assert_eq!(verifier.verify_account(1).await, ConsistencyReport::Consistent(1));
}

#[tokio::test]
async fn chaos_verifier_survives_mixed_failures() {
    let memory = Arc::new(InMemoryDocumentStore::new());
    let service = Arc::new(service_over(
        Arc::new(MemoryConnector::new(memory.clone())),
        config(),
        CircuitConfig::lenient(),
    ));
    let primary = Arc::new(InMemoryPrimaryStore::new());

    let patient = account(7, "Luis");
    let mut psychologist = account(42, "Ana");
    psychologist.role = RoleCode::psychologist();
    primary.insert_account(patient.clone());
    primary.insert_account(psychologist.clone());

    let base = Appointment {
        id: Some(1),
        patient_id: 7,
        psychologist_id: 42,
        date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
        time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        status: AppointmentStatus::Scheduled,
    };
    for id in 1..=6 {
        let appointment = Appointment { id: Some(id), ..base.clone() };
        primary.insert_appointment(appointment.clone());
        if id % 2 == 1 {
            service.sync_appointment(&appointment, &patient, &psychologist).await.unwrap();
        }
    }
    // Status changed in the primary, never re-synced
    primary.insert_appointment(Appointment {
        id: Some(3),
        status: AppointmentStatus::Cancelled,
        ..base.clone()
    });
    memory.put_raw(EntityKind::Appointment, 5, json!("garbage"));

    let verifier = ConsistencyVerifier::new(primary, service);
    let mut batch = verifier.verify_batch(EntityKind::Appointment, 1..=7);
    let reports = batch.collect().await;

    assert_eq!(reports.len(), 7);
    assert_eq!(reports[0], ConsistencyReport::Consistent(1));
    assert_eq!(reports[1], ConsistencyReport::Missing(2));
    assert!(matches!(&reports[2], ConsistencyReport::Diverged { fields, .. } if fields.contains_key("status")));
    // Garbage stored under 5 diverges on every field; it is not a read failure
    match &reports[4] {
        ConsistencyReport::Diverged { primary_id, fields } => {
            assert_eq!(*primary_id, 5);
            assert_eq!(fields["status"].actual, None);
            assert_eq!(fields[""].actual, Some(json!("garbage")));
        }
        other => panic!("expected Diverged, got {:?}", other),
    }
    assert!(matches!(
        reports[6],
        ConsistencyReport::Unverifiable { reason: UnverifiableReason::PrimaryNotFound, .. }
    ));

    let summary = batch.summary();
    assert_eq!(summary.consistent, 1);
    assert_eq!(summary.missing, 3);
    assert_eq!(summary.diverged, 2);
    assert_eq!(summary.unverifiable, 1);
}

// =============================================================================
// Container killing (requires Docker)
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn chaos_redis_killed_mid_session() {
    let docker = Cli::default();
    let image = GenericImage::new("redis/redis-stack-server", "latest")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    let redis = docker.run(image);
    let port = redis.get_host_port_ipv4(6379);

    let service = SyncService::from_config(SyncConfig {
        secondary_url: Some(format!("redis://127.0.0.1:{}", port)),
        operation_timeout_ms: 500,
        connect_timeout_ms: 500,
        reconnect_backoff_ms: 0,
        ..Default::default()
    })
    .expect("valid url");

    assert_eq!(service.connection().init().await, ConnectionState::Connected);
    assert!(service.sync_account(&account(1, "Ana"), None, None).await.unwrap().is_success());

    redis.stop();

    let started = Instant::now();
    for id in 2..=5 {
        let outcome = service.sync_account(&account(id, "Bea"), None, None).await.unwrap();
        assert!(!outcome.is_success(), "write succeeded against a dead store");
    }
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(service.get_account(1).await.is_none());
    assert!(!service.connection().is_connected().await);
}
