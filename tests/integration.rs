// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Integration Tests for the sync service
//!
//! These tests need a real Redis Stack (RedisJSON + RediSearch) secondary
//! store, started with testcontainers. The primary store is a SQLite file
//! seeded with the application schema.
//!
//! # Running Tests
//! ```bash
//! # Run all integration tests (requires Docker)
//! cargo test --test integration -- --ignored
//!
//! # Run only happy-path tests
//! cargo test --test integration happy -- --ignored
//!
//! # Run only failure scenario tests
//! cargo test --test integration failure -- --ignored
//! ```
//!
//! # Test Organization
//! - `happy_*` - Normal operation: write-through, search, verification
//! - `failure_*` - Failure scenarios: unreachable store, bad credentials

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dual_sync::model::EntityKind;
use dual_sync::storage::sql::SqlPrimaryStore;
use dual_sync::{
    ConnectionState, ConsistencyReport, ConsistencyVerifier, PrimaryStore, SkipReason, SyncConfig, SyncService,
    SyncStatus, SyncedDocument, WriteAction,
};

use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

// =============================================================================
// Container Helpers
// =============================================================================

/// Redis Stack: JSON and search modules preloaded
fn redis_stack_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis/redis-stack-server", "latest")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

fn secondary_config(port: u16, prefix: &str) -> SyncConfig {
    SyncConfig {
        secondary_url: Some(format!("redis://127.0.0.1:{}", port)),
        key_prefix: prefix.to_string(),
        reconnect_backoff_ms: 0,
        search_page_size: 2,
        ..Default::default()
    }
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE accounts_role (id INTEGER PRIMARY KEY, code TEXT NOT NULL, name TEXT NOT NULL)",
    "CREATE TABLE accounts_account (id INTEGER PRIMARY KEY, name TEXT, last_name TEXT, age INTEGER, \
     gender TEXT, phone TEXT, email TEXT, role_id INTEGER)",
    "CREATE TABLE offices_doctorsoffice (id INTEGER PRIMARY KEY, name TEXT, address TEXT, phone TEXT, email TEXT)",
    "CREATE TABLE doctors_doctor (id INTEGER PRIMARY KEY, account_id INTEGER, doctors_office_id INTEGER, specialty TEXT)",
    "CREATE TABLE appointments_appointment (id INTEGER PRIMARY KEY, patient_id INTEGER, psychologist_id INTEGER, \
     date TEXT, time TEXT, status TEXT)",
    "INSERT INTO accounts_role VALUES (1, 'patient', 'Patient'), (2, 'psychologist', 'Psychologist')",
    "INSERT INTO accounts_account VALUES (42, 'Ana', 'Lopez', 38, 'F', '555-0142', 'ana@example.com', 2)",
    "INSERT INTO accounts_account VALUES (7, 'Luis', 'Vega', 29, 'M', '555-0107', 'luis@example.com', 1)",
    "INSERT INTO accounts_account VALUES (8, 'Mariana', 'Sosa', 33, 'F', '555-0108', 'msosa@example.com', 1)",
    "INSERT INTO accounts_account VALUES (9, 'Juliana', 'Rey', 51, 'F', '555-0109', 'jrey@example.com', 1)",
    "INSERT INTO offices_doctorsoffice VALUES (3, 'Centro Norte', 'Av. Central 10', '555-0300', 'norte@example.com')",
    "INSERT INTO doctors_doctor VALUES (5, 42, 3, 'clinical')",
    "INSERT INTO appointments_appointment VALUES (100, 7, 42, '2025-03-14', '10:30:00', 'confirmed')",
];

fn unique_db_path(name: &str) -> PathBuf {
    let _ = std::fs::create_dir_all("temp");
    PathBuf::from(format!("temp/integration_{}_{}.db", name, std::process::id()))
}

async fn seeded_primary(name: &str) -> (Arc<SqlPrimaryStore>, PathBuf) {
    let path = unique_db_path(name);
    let _ = std::fs::remove_file(&path);
    let store = SqlPrimaryStore::new(&format!("sqlite://{}?mode=rwc", path.display()))
        .await
        .expect("Failed to open SQLite primary");
    for stmt in SCHEMA {
        sqlx::query(stmt).execute(&store.pool()).await.expect("Failed to seed schema");
    }
    (Arc::new(store), path)
}

async fn sync_all_accounts(service: &SyncService, primary: &SqlPrimaryStore, ids: &[i64]) {
    for &id in ids {
        let record = primary
            .fetch_account_with_relations(id)
            .await
            .expect("primary read failed")
            .expect("seeded account missing");
        let outcome = service.sync_account_record(&record).await.expect("valid record");
        assert!(outcome.is_success(), "sync of {} failed: {}", id, outcome);
    }
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_write_through_and_read_back() {
    let docker = Cli::default();
    let redis = redis_stack_container(&docker);
    let port = redis.get_host_port_ipv4(6379);
    let (primary, db_path) = seeded_primary("write_through").await;

    let service = SyncService::from_config(secondary_config(port, "it1:")).expect("valid url");
    assert_eq!(service.connection().init().await, ConnectionState::Connected);
    assert!(service.ensure_indexes().await);

    let record = primary.fetch_account_with_relations(42).await.unwrap().unwrap();
    let first = service.sync_account_record(&record).await.unwrap();
    assert_eq!(first.status, SyncStatus::Success(WriteAction::Created));
    let created_at = service.get_account(42).await.expect("document stored").created_at;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = service.sync_account_record(&record).await.unwrap();
    assert_eq!(second.status, SyncStatus::Success(WriteAction::Updated));

    let doc = service.get_account(42).await.expect("document stored");
    // Re-sync replaces the body but keeps the first-sync time
    assert_eq!(doc.created_at, created_at);
    assert!(doc.synced_at > created_at);
    assert_eq!(doc.full_name, "Ana Lopez");
    let profile = doc.doctor_profile.expect("psychologist profile embedded");
    assert_eq!(profile.doctor_id, 5);
    assert_eq!(profile.office.name, "Centro Norte");

    // Appointment lives in its own collection under the same id space
    let appointment = primary.fetch_appointment_with_relations(100).await.unwrap().unwrap();
    let outcome = service.sync_appointment_record(&appointment).await.unwrap();
    assert!(outcome.is_success());
    let stored = service.get_appointment(100).await.unwrap();
    assert_eq!(stored.date, "2025-03-14");
    assert_eq!(stored.time, "10:30:00");
    assert_eq!(stored.psychologist_name, "Ana Lopez");
    assert!(service.get_account(100).await.is_none());

    assert_eq!(service.delete_appointment(100).await.action(), Some(WriteAction::Deleted));
    assert!(service.get_appointment(100).await.is_none());

    service.close();
    let _ = std::fs::remove_file(&db_path);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_search_pages_through_redisearch() {
    let docker = Cli::default();
    let redis = redis_stack_container(&docker);
    let port = redis.get_host_port_ipv4(6379);
    let (primary, db_path) = seeded_primary("search").await;

    let service = SyncService::from_config(secondary_config(port, "it2:")).expect("valid url");
    service.connection().init().await;
    sync_all_accounts(&service, &primary, &[7, 8, 9, 42]).await;

    // Infix match inside a token, case-insensitive
    let ids: Vec<i64> = service
        .search("IANA")
        .collect()
        .await
        .iter()
        .map(SyncedDocument::primary_id)
        .collect();
    assert_eq!(ids, vec![8, 9]);

    // Full name spans two fields
    let hits = service.search("ana lopez").collect().await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].primary_id(), 42);

    // Email matches
    assert_eq!(service.search("msosa@").collect().await.len(), 1);

    // Empty query lists everything in id order, across pages
    let all: Vec<i64> = service.search("").collect().await.iter().map(|d| d.primary_id()).collect();
    assert_eq!(all, vec![7, 8, 9, 42]);

    // Restart re-queries from the top
    let mut cursor = service.search("a");
    let first = cursor.next().await.map(|d| d.primary_id());
    cursor.restart();
    assert_eq!(cursor.next().await.map(|d| d.primary_id()), first);

    let appointment = primary.fetch_appointment_with_relations(100).await.unwrap().unwrap();
    service.sync_appointment_record(&appointment).await.unwrap();
    let by_participant = service.search_in(EntityKind::Appointment, "vega").collect().await;
    assert_eq!(by_participant.len(), 1);

    let _ = std::fs::remove_file(&db_path);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_verifier_detects_drift_in_primary() {
    let docker = Cli::default();
    let redis = redis_stack_container(&docker);
    let port = redis.get_host_port_ipv4(6379);
    let (primary, db_path) = seeded_primary("verify").await;

    let service = Arc::new(SyncService::from_config(secondary_config(port, "it3:")).expect("valid url"));
    service.connection().init().await;
    sync_all_accounts(&service, &primary, &[7, 42]).await;

    let verifier = ConsistencyVerifier::new(primary.clone(), service.clone());
    assert_eq!(verifier.verify_account(42).await, ConsistencyReport::Consistent(42));
    assert_eq!(verifier.verify_account(8).await, ConsistencyReport::Missing(8));

    // Office renamed in the primary without a re-sync
    sqlx::query("UPDATE offices_doctorsoffice SET name = 'Centro Sur' WHERE id = 3")
        .execute(&primary.pool())
        .await
        .unwrap();

    match verifier.verify_account(42).await {
        ConsistencyReport::Diverged { fields, .. } => {
            let drift = &fields["doctor_profile.office.name"];
            assert_eq!(drift.expected.as_ref().and_then(|v| v.as_str()), Some("Centro Sur"));
            assert_eq!(drift.actual.as_ref().and_then(|v| v.as_str()), Some("Centro Norte"));
        }
        other => panic!("expected drift, got {:?}", other),
    }

    let mut batch = verifier.verify_batch(EntityKind::Account, [7, 8, 42, 1000]);
    let reports = batch.collect().await;
    assert_eq!(reports.len(), 4);
    let summary = batch.summary();
    assert_eq!(summary.consistent, 1);
    assert_eq!(summary.missing, 1);
    assert_eq!(summary.diverged, 1);
    assert_eq!(summary.unverifiable, 1);

    let _ = std::fs::remove_file(&db_path);
}

// =============================================================================
// Failure scenarios
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker for the recovery half
async fn failure_secondary_unreachable_at_startup() {
    // Nothing listens here yet
    let config = SyncConfig {
        secondary_url: Some("redis://127.0.0.1:1".into()),
        connect_timeout_ms: 300,
        reconnect_backoff_ms: 0,
        ..Default::default()
    };
    let service = SyncService::from_config(config).expect("valid url");
    let (primary, db_path) = seeded_primary("unreachable").await;

    assert_eq!(service.connection().init().await, ConnectionState::Disconnected);
    let record = primary.fetch_account_with_relations(7).await.unwrap().unwrap();
    let outcome = service.sync_account_record(&record).await.unwrap();
    assert_eq!(outcome.status, SyncStatus::Skipped(SkipReason::SecondaryUnavailable));
    assert!(!service.connection().is_connected().await);

    // A fresh service against a live store recovers with no restart of the caller
    let docker = Cli::default();
    let redis = redis_stack_container(&docker);
    let live = SyncService::from_config(secondary_config(redis.get_host_port_ipv4(6379), "it4:")).unwrap();
    assert!(live.sync_account_record(&record).await.unwrap().is_success());
    assert!(live.connection().is_connected().await);

    let _ = std::fs::remove_file(&db_path);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn failure_wrong_credentials_are_skipped() {
    let docker = Cli::default();
    let image = GenericImage::new("redis/redis-stack-server", "latest")
        .with_env_var("REDIS_ARGS", "--requirepass s3cret")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    let redis = docker.run(image);
    let port = redis.get_host_port_ipv4(6379);
    let (primary, db_path) = seeded_primary("credentials").await;
    let record = primary.fetch_account_with_relations(7).await.unwrap().unwrap();

    let wrong = SyncService::from_config(SyncConfig {
        secondary_password: Some("nope".into()),
        ..secondary_config(port, "it5:")
    })
    .unwrap();
    let outcome = wrong.sync_account_record(&record).await.unwrap();
    assert!(outcome.is_skipped(), "unexpected outcome {}", outcome);

    let right = SyncService::from_config(SyncConfig {
        secondary_password: Some("s3cret".into()),
        ..secondary_config(port, "it5:")
    })
    .unwrap();
    assert!(right.sync_account_record(&record).await.unwrap().is_success());

    let _ = std::fs::remove_file(&db_path);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn failure_operation_timeout_bounds_latency() {
    let docker = Cli::default();
    let redis = redis_stack_container(&docker);
    let port = redis.get_host_port_ipv4(6379);
    let (primary, db_path) = seeded_primary("timeout").await;
    let record = primary.fetch_account_with_relations(42).await.unwrap().unwrap();

    let service = SyncService::from_config(SyncConfig {
        operation_timeout_ms: 1,
        ..secondary_config(port, "it6:")
    })
    .unwrap();
    service.connection().init().await;

    let started = std::time::Instant::now();
    for _ in 0..5 {
        // Might win the race on a fast machine; never blocks either way
        let _ = service.sync_account_record(&record).await.unwrap();
    }
    assert!(started.elapsed() < Duration::from_secs(2));

    let _ = std::fs::remove_file(&db_path);
}
