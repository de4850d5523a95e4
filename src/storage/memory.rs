// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory backends.
//!
//! [`InMemoryDocumentStore`] stands in for the secondary store in tests and
//! embedded setups. Documents are kept as raw JSON, the way a document
//! database holds them, so decoding faults surface exactly as they would
//! against Redis. [`InMemoryPrimaryStore`] holds relational rows and resolves
//! relations like the SQL reader does.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::connection::Connector;
use crate::document::{SyncedDocument, CREATED_AT_FIELD};
use crate::model::{
    Account, AccountRecord, Appointment, AppointmentRecord, DoctorProfile, EntityKind, Office,
    PrimaryId,
};
use crate::search::NameMatcher;
use super::traits::{DocumentStore, PrimaryStore, SearchPage, StorageError, WriteAction};
use tracing::warn;

const OFFLINE: &str = "memory store offline";

pub struct InMemoryDocumentStore {
    data: DashMap<(EntityKind, PrimaryId), Value>,
    available: AtomicBool,
}

impl InMemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Get current document count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Clear all documents
    pub fn clear(&self) {
        self.data.clear();
    }

    /// Take the store offline (or back online). While offline every
    /// operation, and every connect through a [`MemoryConnector`], fails with
    /// [`StorageError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Raw stored JSON, bypassing decoding.
    #[must_use]
    pub fn raw(&self, kind: EntityKind, primary_id: PrimaryId) -> Option<Value> {
        self.data.get(&(kind, primary_id)).map(|r| r.value().clone())
    }

    /// Overwrite the stored JSON directly (simulates out-of-band edits).
    pub fn put_raw(&self, kind: EntityKind, primary_id: PrimaryId, value: Value) {
        self.data.insert((kind, primary_id), value);
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StorageError::Unavailable(OFFLINE.to_string()))
        }
    }

    fn decode(kind: EntityKind, primary_id: PrimaryId, value: Value) -> Result<SyncedDocument, StorageError> {
        SyncedDocument::from_value(kind, value).map_err(|e| StorageError::Corruption {
            key: format!("{}:{}", kind.collection(), primary_id),
            reason: e.to_string(),
        })
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn ping(&self) -> Result<(), StorageError> {
        self.check_available()
    }

    async fn upsert(&self, doc: &SyncedDocument) -> Result<WriteAction, StorageError> {
        self.check_available()?;
        let mut value = doc.to_value()?;
        match self.data.entry((doc.kind(), doc.primary_id())) {
            Entry::Occupied(mut entry) => {
                // Replace everything but the first-sync time
                if let (Some(created), Value::Object(map)) = (entry.get().get(CREATED_AT_FIELD), &mut value) {
                    map.insert(CREATED_AT_FIELD.to_string(), created.clone());
                }
                entry.insert(value);
                Ok(WriteAction::Updated)
            }
            Entry::Vacant(entry) => {
                entry.insert(value);
                Ok(WriteAction::Created)
            }
        }
    }

    async fn get(&self, kind: EntityKind, primary_id: PrimaryId) -> Result<Option<SyncedDocument>, StorageError> {
        self.get_value(kind, primary_id)
            .await?
            .map(|value| Self::decode(kind, primary_id, value))
            .transpose()
    }

    async fn get_value(&self, kind: EntityKind, primary_id: PrimaryId) -> Result<Option<Value>, StorageError> {
        self.check_available()?;
        Ok(self.raw(kind, primary_id))
    }

    async fn delete(&self, kind: EntityKind, primary_id: PrimaryId) -> Result<WriteAction, StorageError> {
        self.check_available()?;
        Ok(match self.data.remove(&(kind, primary_id)) {
            Some(_) => WriteAction::Deleted,
            None => WriteAction::Absent,
        })
    }

    async fn search(
        &self,
        kind: EntityKind,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> Result<SearchPage, StorageError> {
        self.check_available()?;
        let matcher = NameMatcher::new(query);

        // Snapshot the collection in primary_id order, like FT.SEARCH SORTBY
        let mut candidates: Vec<(PrimaryId, Value)> = self
            .data
            .iter()
            .filter(|entry| entry.key().0 == kind)
            .map(|entry| (entry.key().1, entry.value().clone()))
            .collect();
        candidates.sort_by_key(|(id, _)| *id);

        let window: Vec<(PrimaryId, Value)> = candidates.iter().skip(offset).take(limit).cloned().collect();
        let scanned = window.len();
        let mut documents = Vec::new();
        for (id, value) in window {
            match Self::decode(kind, id, value) {
                Ok(doc) if matcher.matches(&doc) => documents.push(doc),
                Ok(_) => {}
                Err(e) => {
                    warn!(kind = %kind, primary_id = id, error = %e, "Skipping corrupt search candidate");
                    crate::metrics::record_corrupt_document(kind, "search");
                }
            }
        }

        Ok(SearchPage {
            documents,
            scanned,
            exhausted: offset + scanned >= candidates.len(),
        })
    }
}

/// Hands out one shared [`InMemoryDocumentStore`] and counts connects.
pub struct MemoryConnector {
    store: Arc<InMemoryDocumentStore>,
    connects: AtomicU64,
    latency: Duration,
}

impl MemoryConnector {
    pub fn new(store: Arc<InMemoryDocumentStore>) -> Self {
        Self {
            store,
            connects: AtomicU64::new(0),
            latency: Duration::ZERO,
        }
    }

    /// Delay every connect, to widen race windows in tests.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Physical connects performed (successful or not)
    #[must_use]
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn store(&self) -> Arc<InMemoryDocumentStore> {
        self.store.clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn DocumentStore>, StorageError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.store.check_available()?;
        Ok(self.store.clone() as Arc<dyn DocumentStore>)
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Relational rows held in memory, keyed like their tables.
pub struct InMemoryPrimaryStore {
    accounts: DashMap<PrimaryId, Account>,
    /// `doctors_doctor` rows keyed by `account_id` (one-to-one)
    profiles: DashMap<PrimaryId, DoctorProfile>,
    offices: DashMap<PrimaryId, Office>,
    appointments: DashMap<PrimaryId, Appointment>,
    available: AtomicBool,
}

impl InMemoryPrimaryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            profiles: DashMap::new(),
            offices: DashMap::new(),
            appointments: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Rows without an id are ignored; they were never committed.
    pub fn insert_account(&self, account: Account) {
        if let Some(id) = account.id {
            self.accounts.insert(id, account);
        }
    }

    pub fn insert_profile(&self, profile: DoctorProfile) {
        self.profiles.insert(profile.account_id, profile);
    }

    pub fn insert_office(&self, office: Office) {
        if let Some(id) = office.id {
            self.offices.insert(id, office);
        }
    }

    pub fn insert_appointment(&self, appointment: Appointment) {
        if let Some(id) = appointment.id {
            self.appointments.insert(id, appointment);
        }
    }

    pub fn remove_account(&self, primary_id: PrimaryId) {
        self.accounts.remove(&primary_id);
        self.profiles.remove(&primary_id);
    }

    pub fn remove_profile(&self, account_id: PrimaryId) {
        self.profiles.remove(&account_id);
    }

    pub fn remove_appointment(&self, primary_id: PrimaryId) {
        self.appointments.remove(&primary_id);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("primary store offline".to_string()))
        }
    }

    fn account(&self, primary_id: PrimaryId) -> Option<Account> {
        self.accounts.get(&primary_id).map(|r| r.value().clone())
    }
}

impl Default for InMemoryPrimaryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrimaryStore for InMemoryPrimaryStore {
    async fn fetch_account_with_relations(&self, primary_id: PrimaryId) -> Result<Option<AccountRecord>, StorageError> {
        self.check_available()?;
        let Some(account) = self.account(primary_id) else {
            return Ok(None);
        };

        let mut record = AccountRecord::new(account);
        if let Some(profile) = self.profiles.get(&primary_id).map(|r| r.value().clone()) {
            record.office = self.offices.get(&profile.office_id).map(|r| r.value().clone());
            record.doctor_profile = Some(profile);
        }
        Ok(Some(record))
    }

    async fn fetch_appointment_with_relations(&self, primary_id: PrimaryId) -> Result<Option<AppointmentRecord>, StorageError> {
        self.check_available()?;
        let Some(appointment) = self.appointments.get(&primary_id).map(|r| r.value().clone()) else {
            return Ok(None);
        };

        let dangling = |field: &str, id: PrimaryId| {
            StorageError::Backend(format!("appointment {} references missing {} {}", primary_id, field, id))
        };
        let patient = self
            .account(appointment.patient_id)
            .ok_or_else(|| dangling("patient", appointment.patient_id))?;
        let psychologist = self
            .account(appointment.psychologist_id)
            .ok_or_else(|| dangling("psychologist", appointment.psychologist_id))?;

        Ok(Some(AppointmentRecord {
            appointment,
            patient,
            psychologist,
        }))
    }
}
