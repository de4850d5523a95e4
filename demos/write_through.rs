// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Write-through walkthrough.
//!
//! Demonstrates:
//! 1. Mirroring committed accounts and an appointment into the secondary store
//! 2. Reading documents back by primary id
//! 3. Searching by name
//! 4. Verifying consistency after the primary store drifts
//! 5. Behaviour with the secondary store offline
//! 6. Displaying metrics
//!
//! Uses in-memory stores unless `SYNC_SECONDARY_URL` points at a Redis Stack
//! server:
//!
//! ```bash
//! cargo run --example write_through
//! SYNC_SECONDARY_URL=redis://localhost:6379 cargo run --example write_through
//! ```

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};

use dual_sync::model::{Account, Appointment, AppointmentStatus, DoctorProfile, Gender, Office, RoleCode, Specialty};
use dual_sync::storage::memory::{InMemoryDocumentStore, InMemoryPrimaryStore, MemoryConnector};
use dual_sync::{ConnectionManager, ConsistencyVerifier, SyncConfig, SyncService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dual_sync=info")),
        )
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║              dual-sync: Write-Through Example                 ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Wire the service
    // ─────────────────────────────────────────────────────────────────────────
    let config = SyncConfig::from_env();
    let memory = Arc::new(InMemoryDocumentStore::new());
    let service = if config.secondary_url.is_some() {
        println!("📦 Secondary store: {}", config.secondary_url.as_deref().unwrap_or_default());
        Arc::new(SyncService::from_config(config)?)
    } else {
        println!("📦 Secondary store: in-memory");
        let connection = Arc::new(ConnectionManager::new(Arc::new(MemoryConnector::new(memory.clone())), &config));
        Arc::new(SyncService::new(config, connection))
    };
    println!("   State after init: {}", service.connection().init().await);

    // The application's committed rows
    let primary = Arc::new(InMemoryPrimaryStore::new());
    let ana = Account {
        id: Some(42),
        name: "Ana".into(),
        last_name: "Lopez".into(),
        age: 38,
        gender: Gender::Female,
        phone: "555-0142".into(),
        email: "ana@example.com".into(),
        role: RoleCode::psychologist(),
    };
    let luis = Account {
        id: Some(7),
        name: "Luis".into(),
        last_name: "Vega".into(),
        age: 29,
        gender: Gender::Male,
        phone: "555-0107".into(),
        email: "luis@example.com".into(),
        role: RoleCode::patient(),
    };
    let profile = DoctorProfile {
        id: Some(5),
        account_id: 42,
        office_id: 3,
        specialty: Specialty::Clinical,
    };
    let office = Office {
        id: Some(3),
        name: "Centro Norte".into(),
        address: "Av. Central 10".into(),
        phone: "555-0300".into(),
        email: "norte@example.com".into(),
    };
    let appointment = Appointment {
        id: Some(100),
        patient_id: 7,
        psychologist_id: 42,
        date: NaiveDate::from_ymd_opt(2025, 3, 14).ok_or("bad date")?,
        time: NaiveTime::from_hms_opt(10, 30, 0).ok_or("bad time")?,
        status: AppointmentStatus::Confirmed,
    };
    primary.insert_account(ana.clone());
    primary.insert_account(luis.clone());
    primary.insert_profile(profile.clone());
    primary.insert_office(office.clone());
    primary.insert_appointment(appointment.clone());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Write-through after each commit
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Syncing committed entities...");
    for outcome in [
        service.sync_account(&ana, Some(&profile), Some(&office)).await?,
        service.sync_account(&luis, None, None).await?,
        service.sync_appointment(&appointment, &luis, &ana).await?,
    ] {
        println!("   └─ {}", outcome);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Read back and search
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📖 Reading back...");
    if let Some(doc) = service.get_account(42).await {
        let office_name = doc.doctor_profile.as_ref().map(|p| p.office.name.as_str()).unwrap_or("-");
        println!("   └─ account 42: {} {} ({}), office: {}", doc.name, doc.last_name, doc.role, office_name);
    }
    if let Some(doc) = service.get_appointment(100).await {
        println!("   └─ appointment 100: {} {} with {}", doc.date, doc.time, doc.psychologist_name);
    }

    println!("\n🔍 Searching accounts for \"lo\"...");
    let mut cursor = service.search("lo");
    while let Some(doc) = cursor.next().await {
        println!("   └─ {}: {:?}", doc.primary_id(), doc.as_account().map(|a| a.email.as_str()));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Verify after drift
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔐 Verifying...");
    primary.insert_office(Office {
        name: "Centro Sur".into(),
        ..office.clone()
    });
    let verifier = ConsistencyVerifier::new(primary.clone(), service.clone());
    let mut batch = verifier.verify_batch(dual_sync::EntityKind::Account, [7, 42, 99]);
    while let Some(report) = batch.next().await {
        println!("   └─ {:?}", report);
    }
    println!("   Summary: {:?}", batch.summary());

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Secondary offline: the caller is never blocked or failed
    // ─────────────────────────────────────────────────────────────────────────
    if service.connection().describe() == "memory" {
        println!("\n💥 Taking the in-memory store offline...");
        memory.set_available(false);
        let outcome = service.sync_account(&luis, None, None).await?;
        println!("   └─ {}", outcome);
        memory.set_available(true);
        let outcome = service.sync_account(&luis, None, None).await?;
        println!("   └─ back online: {}", outcome);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Metrics:");
    dump_metrics(&snapshotter);

    println!("\n🛑 Shutting down...");
    service.close();
    println!("   State: {}", service.connection().state());
    Ok(())
}

fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines = Vec::new();
    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        let rendered = match value {
            DebugValue::Counter(v) => format!("{}", v),
            DebugValue::Gauge(v) => format!("{}", v.into_inner()),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                format!("count={} sum={:.4}", count, sum)
            }
        };
        lines.push(format!("{}{} = {}", key.name(), label_str, rendered));
    }
    lines.sort();
    for line in lines {
        println!("   └─ {}", line);
    }
}
