// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync Service: write-through from the primary store to the secondary store.
//!
//! The application calls the service right after a primary-store commit. The
//! service serializes the committed entity and upserts the document keyed by
//! its primary id. Nothing the secondary store does can fail the caller: every
//! environmental problem becomes a [`SyncOutcome`] that is logged, counted and
//! returned. Only contract violations ([`SerializationError`]) propagate.
//!
//! # Guard
//!
//! Every secondary-store call runs through one guard. One deadline,
//! `operation_timeout` from entry, bounds both the handle acquisition and the
//! operation itself:
//!
//! ```text
//! enabled? ──no──→ Skipped(Disabled)           (no connector call)
//!    │
//! get_handle ──err / deadline──→ Skipped(SecondaryUnavailable)
//!    │
//! circuit ──open──→ Skipped(CircuitOpen)
//!    │
//! op until deadline
//!    ├─ Ok            → Success
//!    ├─ Unavailable   → mark unhealthy, Skipped(SecondaryUnavailable)
//!    ├─ Timeout       → mark unhealthy, Failed
//!    └─ other error   → Failed
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use dual_sync::{SyncConfig, SyncService};
//! use dual_sync::model::{Account, Gender, RoleCode};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig {
//!     secondary_url: Some("redis://localhost:6379".into()),
//!     ..Default::default()
//! };
//! let service = SyncService::from_config(config)?;
//! service.connection().init().await;
//!
//! let account = Account {
//!     id: Some(7),
//!     name: "Luis".into(),
//!     last_name: "Vega".into(),
//!     age: 29,
//!     gender: Gender::Male,
//!     phone: "555-0107".into(),
//!     email: "luis@example.com".into(),
//!     role: RoleCode::patient(),
//! };
//!
//! // After the primary commit:
//! let outcome = service.sync_account(&account, None, None).await?;
//! println!("{}", outcome);
//! # Ok(())
//! # }
//! ```

mod search_api;
mod types;

pub use search_api::SearchCursor;
pub use types::{FetchError, SkipReason, SyncOutcome, SyncStatus};

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::connection::{ConnectionManager, Connector};
use crate::document::{AccountDocument, AppointmentDocument, SyncedDocument};
use crate::metrics::LatencyTimer;
use crate::model::{
    Account, AccountRecord, Appointment, AppointmentRecord, DoctorProfile, EntityKind, Office,
    PrimaryId,
};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError};
use crate::serializer::{
    now_millis, serialize_account, serialize_account_record, serialize_appointment,
    serialize_appointment_record, SerializationError,
};
use crate::storage::redis::RedisConnector;
use crate::storage::traits::{DocumentStore, StorageError, WriteAction};

/// Connector used when no secondary store URL is configured.
struct Unconfigured;

#[async_trait]
impl Connector for Unconfigured {
    async fn connect(&self) -> Result<Arc<dyn DocumentStore>, StorageError> {
        Err(StorageError::Unavailable("no secondary store configured".to_string()))
    }

    fn describe(&self) -> String {
        "unconfigured".to_string()
    }
}

/// Write-through and guarded reads against the secondary store.
pub struct SyncService {
    config: SyncConfig,
    connection: Arc<ConnectionManager>,
    circuit: CircuitBreaker,
}

impl SyncService {
    pub fn new(config: SyncConfig, connection: Arc<ConnectionManager>) -> Self {
        Self::with_circuit(config, connection, CircuitConfig::default())
    }

    pub fn with_circuit(config: SyncConfig, connection: Arc<ConnectionManager>, circuit: CircuitConfig) -> Self {
        Self {
            config,
            connection,
            circuit: CircuitBreaker::new("secondary", circuit),
        }
    }

    /// Wire a Redis-backed service from config. Does not connect.
    ///
    /// With no `secondary_url` the service still works; every operation is
    /// skipped as unavailable.
    pub fn from_config(config: SyncConfig) -> Result<Self, StorageError> {
        let connector: Arc<dyn Connector> = if config.secondary_url.is_some() {
            Arc::new(RedisConnector::from_config(&config)?)
        } else {
            Arc::new(Unconfigured)
        };
        let connection = Arc::new(ConnectionManager::new(connector, &config));
        Ok(Self::new(config, connection))
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The connection manager, for health checks and shutdown.
    #[must_use]
    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    #[must_use]
    pub fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Write-through
    // ═══════════════════════════════════════════════════════════════════════

    /// Mirror a committed account (with its doctor profile and office, if
    /// any) into the secondary store.
    #[tracing::instrument(skip_all, fields(kind = "account", primary_id = ?account.id))]
    pub async fn sync_account(
        &self,
        account: &Account,
        doctor_profile: Option<&DoctorProfile>,
        office: Option<&Office>,
    ) -> Result<SyncOutcome, SerializationError> {
        let doc = serialize_account(account, doctor_profile, office)?;
        Ok(self.write(doc.into()).await)
    }

    /// Mirror a committed appointment, denormalizing both participants.
    #[tracing::instrument(skip_all, fields(kind = "appointment", primary_id = ?appointment.id))]
    pub async fn sync_appointment(
        &self,
        appointment: &Appointment,
        patient: &Account,
        psychologist: &Account,
    ) -> Result<SyncOutcome, SerializationError> {
        let doc = serialize_appointment(appointment, patient, psychologist)?;
        Ok(self.write(doc.into()).await)
    }

    pub async fn sync_account_record(&self, record: &AccountRecord) -> Result<SyncOutcome, SerializationError> {
        let doc = serialize_account_record(record)?;
        Ok(self.write(doc.into()).await)
    }

    pub async fn sync_appointment_record(&self, record: &AppointmentRecord) -> Result<SyncOutcome, SerializationError> {
        let doc = serialize_appointment_record(record)?;
        Ok(self.write(doc.into()).await)
    }

    /// Remove the document for a deleted account.
    #[tracing::instrument(skip(self), fields(kind = "account"))]
    pub async fn delete_account(&self, primary_id: PrimaryId) -> SyncOutcome {
        self.remove(EntityKind::Account, primary_id).await
    }

    /// Remove the document for a deleted appointment.
    #[tracing::instrument(skip(self), fields(kind = "appointment"))]
    pub async fn delete_appointment(&self, primary_id: PrimaryId) -> SyncOutcome {
        self.remove(EntityKind::Appointment, primary_id).await
    }

    async fn write(&self, doc: SyncedDocument) -> SyncOutcome {
        let kind = doc.kind();
        let primary_id = doc.primary_id();
        let result = self
            .guarded("upsert", |store| async move { store.upsert(&doc).await })
            .await;
        self.finish(kind, primary_id, result)
    }

    async fn remove(&self, kind: EntityKind, primary_id: PrimaryId) -> SyncOutcome {
        let result = self
            .guarded("delete", |store| async move { store.delete(kind, primary_id).await })
            .await;
        self.finish(kind, primary_id, result)
    }

    fn finish(
        &self,
        kind: EntityKind,
        primary_id: PrimaryId,
        result: Result<WriteAction, FetchError>,
    ) -> SyncOutcome {
        let status = match result {
            Ok(action) => SyncStatus::Success(action),
            Err(FetchError::Skipped(reason)) => SyncStatus::Skipped(reason),
            Err(FetchError::Storage(e)) => SyncStatus::Failed(e),
        };
        let outcome = SyncOutcome {
            kind,
            primary_id,
            status,
            at: now_millis(),
        };

        match &outcome.status {
            SyncStatus::Success(action) => {
                info!(kind = %kind, primary_id, action = %action, "Secondary store updated");
            }
            SyncStatus::Skipped(SkipReason::Disabled) => {
                debug!(kind = %kind, primary_id, "Sync disabled, skipping");
            }
            SyncStatus::Skipped(reason) => {
                warn!(kind = %kind, primary_id, reason = %reason, "Sync skipped");
            }
            SyncStatus::Failed(e) => {
                error!(kind = %kind, primary_id, error = %e, "Sync failed");
            }
        }
        crate::metrics::record_outcome(kind, outcome.label());
        outcome
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════════════════

    /// The stored document, or `None` if absent or unreachable. Never errors.
    pub async fn get_by_primary_id(&self, kind: EntityKind, primary_id: PrimaryId) -> Option<SyncedDocument> {
        match self.fetch_document(kind, primary_id).await {
            Ok(doc) => doc,
            Err(FetchError::Skipped(reason)) => {
                debug!(kind = %kind, primary_id, reason = %reason, "Read skipped");
                None
            }
            Err(FetchError::Storage(e)) => {
                warn!(kind = %kind, primary_id, error = %e, "Read failed");
                None
            }
        }
    }

    pub async fn get_account(&self, primary_id: PrimaryId) -> Option<AccountDocument> {
        match self.get_by_primary_id(EntityKind::Account, primary_id).await {
            Some(SyncedDocument::Account(doc)) => Some(doc),
            _ => None,
        }
    }

    pub async fn get_appointment(&self, primary_id: PrimaryId) -> Option<AppointmentDocument> {
        match self.get_by_primary_id(EntityKind::Appointment, primary_id).await {
            Some(SyncedDocument::Appointment(doc)) => Some(doc),
            _ => None,
        }
    }

    /// Guarded read that tells "absent" (`Ok(None)`) apart from "could not
    /// look" (`Err`).
    pub async fn fetch_document(
        &self,
        kind: EntityKind,
        primary_id: PrimaryId,
    ) -> Result<Option<SyncedDocument>, FetchError> {
        self.guarded("get", |store| async move { store.get(kind, primary_id).await })
            .await
    }

    /// Guarded read of the stored JSON as-is, without decoding it.
    ///
    /// Used by the verifier so hand-edited or wrong-typed documents show up
    /// as drift instead of read failures.
    pub async fn fetch_value(&self, kind: EntityKind, primary_id: PrimaryId) -> Result<Option<Value>, FetchError> {
        self.guarded("get", |store| async move { store.get_value(kind, primary_id).await })
            .await
    }

    /// Search accounts by name or email (case-insensitive substring).
    pub fn search(&self, query: &str) -> SearchCursor<'_> {
        self.search_in(EntityKind::Account, query)
    }

    /// Search one collection by its name fields.
    pub fn search_in(&self, kind: EntityKind, query: &str) -> SearchCursor<'_> {
        SearchCursor::new(self, kind, query)
    }

    /// Create search indexes if missing. Returns whether they are in place.
    pub async fn ensure_indexes(&self) -> bool {
        match self.guarded("ensure_indexes", |store| async move { store.ensure_indexes().await }).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Could not ensure search indexes");
                false
            }
        }
    }

    /// Shut down the secondary connection.
    pub fn close(&self) {
        self.connection.close();
    }

    /// Run one secondary-store operation behind the enabled flag, the
    /// connection manager, the circuit breaker and the operation timeout.
    async fn guarded<T, F, Fut>(&self, operation: &'static str, op: F) -> Result<T, FetchError>
    where
        F: FnOnce(Arc<dyn DocumentStore>) -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        if !self.config.enabled {
            return Err(FetchError::Skipped(SkipReason::Disabled));
        }

        let timeout = self.config.operation_timeout();
        let deadline = tokio::time::Instant::now() + timeout;
        let _timer = LatencyTimer::new(operation);

        let handle = match tokio::time::timeout_at(deadline, self.connection.get_handle()).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                debug!(operation, error = %e, "No secondary handle");
                return Err(FetchError::Skipped(SkipReason::SecondaryUnavailable));
            }
            Err(_) => {
                debug!(operation, timeout_ms = timeout.as_millis() as u64, "No secondary handle before the deadline");
                return Err(FetchError::Skipped(SkipReason::SecondaryUnavailable));
            }
        };
        let store = handle.clone();

        // Corrupt documents are returned through the breaker as successes:
        // they say nothing about the store's health.
        let result = self
            .circuit
            .call(|| async move {
                match tokio::time::timeout_at(deadline, op(store)).await {
                    Ok(Ok(value)) => Ok(Ok(value)),
                    Ok(Err(e @ StorageError::Corruption { .. })) => Ok(Err(e)),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(StorageError::Timeout(timeout)),
                }
            })
            .await;

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(FetchError::Storage(e)),
            Err(CircuitError::Rejected) => Err(FetchError::Skipped(SkipReason::CircuitOpen)),
            Err(CircuitError::Inner(e)) => {
                if e.is_connection_class() {
                    self.connection.invalidate(&handle, &e.to_string());
                }
                match e {
                    StorageError::Unavailable(_) => Err(FetchError::Skipped(SkipReason::SecondaryUnavailable)),
                    other => Err(FetchError::Storage(other)),
                }
            }
        }
    }
}
