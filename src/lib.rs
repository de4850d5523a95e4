// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Dual Sync
//!
//! Write-through synchronization from a relational primary store to a Redis
//! JSON document store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Application (primary commit)               │
//! │  • Commits Account / Appointment to the relational store   │
//! │  • Then calls SyncService::sync_*                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SyncService                         │
//! │  • Serializer: entity → denormalized document              │
//! │  • Guard: enabled flag, circuit breaker, timeout           │
//! │  • Returns SyncOutcome, never fails the caller             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                     (ConnectionManager)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │               Secondary: Redis Stack (JSON + Search)        │
//! │  • One document per (kind, primary_id), upserted whole     │
//! │  • Search indexes over the name fields                     │
//! └─────────────────────────────────────────────────────────────┘
//!
//!         ConsistencyVerifier: PrimaryStore ⇄ SyncService (read-only)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dual_sync::{SyncConfig, SyncService};
//! use dual_sync::model::{Account, Gender, RoleCode};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SyncConfig {
//!         secondary_url: Some("redis://localhost:6379".into()),
//!         ..Default::default()
//!     };
//!     let service = SyncService::from_config(config).expect("valid secondary URL");
//!
//!     // Optional eager connect; failures here are never fatal
//!     service.connection().init().await;
//!
//!     let account = Account {
//!         id: Some(42),
//!         name: "Ana".into(),
//!         last_name: "Lopez".into(),
//!         age: 38,
//!         gender: Gender::Female,
//!         phone: "555-0142".into(),
//!         email: "ana@example.com".into(),
//!         role: RoleCode::patient(),
//!     };
//!     let outcome = service.sync_account(&account, None, None).await.unwrap();
//!     println!("{}", outcome);
//!
//!     let mut hits = service.search("lopez");
//!     while let Some(doc) = hits.next().await {
//!         println!("{:?}", doc);
//!     }
//!
//!     service.close();
//! }
//! ```
//!
//! ## Modules
//!
//! - [`service`]: The [`SyncService`] write-through entry point and search cursor
//! - [`connection`]: Shared, lazily-reconnecting secondary-store handle
//! - [`serializer`]: Primary entities to [`document`] shapes
//! - [`verify`]: Field-level drift detection between the stores
//! - [`storage`]: Store seams and backends (Redis, SQL, memory)
//! - [`search`]: Index definitions and query translation
//! - [`resilience`]: Circuit breaker and retry policies

pub mod config;
pub mod connection;
pub mod document;
pub mod metrics;
pub mod model;
pub mod resilience;
pub mod search;
pub mod serializer;
pub mod service;
pub mod storage;
pub mod verify;

pub use config::SyncConfig;
pub use connection::{ConnectionManager, ConnectionState, Connector};
pub use document::{AccountDocument, AppointmentDocument, SyncedDocument};
pub use model::{EntityKind, PrimaryId};
pub use serializer::SerializationError;
pub use service::{FetchError, SearchCursor, SkipReason, SyncOutcome, SyncService, SyncStatus};
pub use storage::traits::{DocumentStore, PrimaryStore, StorageError, WriteAction};
pub use verify::{ConsistencyReport, ConsistencyVerifier, FieldDrift, UnverifiableReason, VerifyBatch, VerifySummary};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError};
pub use resilience::retry::RetryConfig;
pub use metrics::LatencyTimer;
