// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Consistency verification between the primary and secondary stores.
//!
//! The verifier rebuilds the document the primary store says should exist and
//! compares it, field by field, with what the secondary store holds. It only
//! reads: drift is reported, never repaired.
//!
//! # Protocol
//!
//! ```text
//! verify(kind, id)
//!       │
//!       ├─→ PrimaryStore fetch ──none──→ Unverifiable(PrimaryNotFound)
//!       │                      ──err───→ Unverifiable(PrimaryUnavailable)
//!       │
//!       ├─→ SyncService::fetch_value ──none──→ Missing
//!       │                            ──err───→ Unverifiable(SecondaryUnavailable)
//!       │
//!       ├─→ serialize expected ──err──→ Unverifiable(Serialization)
//!       │
//!       └─→ diff (timestamps, derived fields excluded) ──empty──→ Consistent
//!                                                       ──else───→ Diverged { fields }
//! ```
//!
//! The stored side is the raw JSON, not a decoded document. A hand-edited
//! field of the wrong type, or a key the serializer never writes (even one
//! set to `null`), is drift.

mod diff;

pub use diff::{diff, flatten, FieldDrift};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::document::{self, SyncedDocument};
use crate::model::{AccountRecord, AppointmentRecord, EntityKind, PrimaryId};
use crate::serializer::{serialize_account_record, serialize_appointment_record, SerializationError};
use crate::service::{FetchError, SyncService};
use crate::storage::traits::{PrimaryStore, StorageError};

/// Why a record could not be verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnverifiableReason {
    /// No primary row (deleted, or never existed)
    PrimaryNotFound,
    PrimaryUnavailable(String),
    SecondaryUnavailable(String),
    /// The primary record could not be turned into a document
    Serialization(String),
}

impl fmt::Display for UnverifiableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrimaryNotFound => write!(f, "primary record not found"),
            Self::PrimaryUnavailable(msg) => write!(f, "primary unavailable: {}", msg),
            Self::SecondaryUnavailable(msg) => write!(f, "secondary unavailable: {}", msg),
            Self::Serialization(msg) => write!(f, "serialization failed: {}", msg),
        }
    }
}

/// Verdict for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyReport {
    Consistent(PrimaryId),
    /// Primary row exists, secondary document does not
    Missing(PrimaryId),
    Diverged {
        primary_id: PrimaryId,
        fields: BTreeMap<String, FieldDrift>,
    },
    Unverifiable {
        primary_id: PrimaryId,
        reason: UnverifiableReason,
    },
}

impl ConsistencyReport {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        matches!(self, Self::Consistent(_))
    }

    #[must_use]
    pub fn primary_id(&self) -> PrimaryId {
        match self {
            Self::Consistent(id) | Self::Missing(id) => *id,
            Self::Diverged { primary_id, .. } | Self::Unverifiable { primary_id, .. } => *primary_id,
        }
    }

    /// Metric label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Consistent(_) => "consistent",
            Self::Missing(_) => "missing",
            Self::Diverged { .. } => "diverged",
            Self::Unverifiable { .. } => "unverifiable",
        }
    }

    fn unverifiable(primary_id: PrimaryId, reason: UnverifiableReason) -> Self {
        Self::Unverifiable { primary_id, reason }
    }
}

/// Tally of a verification run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifySummary {
    pub consistent: usize,
    pub missing: usize,
    pub diverged: usize,
    pub unverifiable: usize,
}

impl VerifySummary {
    fn record(&mut self, report: &ConsistencyReport) {
        match report {
            ConsistencyReport::Consistent(_) => self.consistent += 1,
            ConsistencyReport::Missing(_) => self.missing += 1,
            ConsistencyReport::Diverged { .. } => self.diverged += 1,
            ConsistencyReport::Unverifiable { .. } => self.unverifiable += 1,
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.consistent + self.missing + self.diverged + self.unverifiable
    }

    /// Everything checked and nothing found wrong.
    #[must_use]
    pub fn all_consistent(&self) -> bool {
        self.consistent == self.total()
    }
}

/// Read-only comparison of primary records with their secondary documents.
pub struct ConsistencyVerifier {
    primary: Arc<dyn PrimaryStore>,
    service: Arc<SyncService>,
}

impl ConsistencyVerifier {
    pub fn new(primary: Arc<dyn PrimaryStore>, service: Arc<SyncService>) -> Self {
        Self { primary, service }
    }

    pub async fn verify_account(&self, primary_id: PrimaryId) -> ConsistencyReport {
        self.verify(EntityKind::Account, primary_id).await
    }

    pub async fn verify_appointment(&self, primary_id: PrimaryId) -> ConsistencyReport {
        self.verify(EntityKind::Appointment, primary_id).await
    }

    /// Compare one record across both stores.
    #[tracing::instrument(skip(self))]
    pub async fn verify(&self, kind: EntityKind, primary_id: PrimaryId) -> ConsistencyReport {
        let report = self.check(kind, primary_id).await;

        match &report {
            ConsistencyReport::Consistent(_) => debug!(kind = %kind, primary_id, "Record consistent"),
            ConsistencyReport::Missing(_) => warn!(kind = %kind, primary_id, "Secondary document missing"),
            ConsistencyReport::Diverged { fields, .. } => {
                let paths: Vec<&str> = fields.keys().map(String::as_str).collect();
                warn!(kind = %kind, primary_id, fields = ?paths, "Secondary document diverged");
            }
            ConsistencyReport::Unverifiable { reason, .. } => {
                info!(kind = %kind, primary_id, reason = %reason, "Record unverifiable");
            }
        }
        crate::metrics::record_verify_report(kind, report.label());
        report
    }

    /// Lazily verify many ids, one report each.
    pub fn verify_batch(&self, kind: EntityKind, ids: impl IntoIterator<Item = PrimaryId>) -> VerifyBatch<'_> {
        VerifyBatch {
            verifier: self,
            kind,
            ids: ids.into_iter().collect::<Vec<_>>().into_iter(),
            summary: VerifySummary::default(),
        }
    }

    async fn check(&self, kind: EntityKind, primary_id: PrimaryId) -> ConsistencyReport {
        let record = match self.fetch_record(kind, primary_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return ConsistencyReport::unverifiable(primary_id, UnverifiableReason::PrimaryNotFound),
            Err(e) => {
                return ConsistencyReport::unverifiable(
                    primary_id,
                    UnverifiableReason::PrimaryUnavailable(e.to_string()),
                )
            }
        };

        let actual = match self.service.fetch_value(kind, primary_id).await {
            Ok(Some(value)) => document::comparable(value),
            Ok(None) => return ConsistencyReport::Missing(primary_id),
            Err(e) => return ConsistencyReport::unverifiable(primary_id, secondary_reason(e)),
        };

        let expected = match record.serialize() {
            Ok(doc) => doc,
            Err(e) => {
                return ConsistencyReport::unverifiable(primary_id, UnverifiableReason::Serialization(e.to_string()))
            }
        };

        let expected = match expected.comparable_value() {
            Ok(value) => value,
            Err(e) => {
                return ConsistencyReport::unverifiable(primary_id, UnverifiableReason::Serialization(e.to_string()))
            }
        };

        let fields = diff(&expected, &actual);
        if fields.is_empty() {
            ConsistencyReport::Consistent(primary_id)
        } else {
            ConsistencyReport::Diverged { primary_id, fields }
        }
    }

    async fn fetch_record(&self, kind: EntityKind, primary_id: PrimaryId) -> Result<Option<PrimaryRecord>, StorageError> {
        Ok(match kind {
            EntityKind::Account => self
                .primary
                .fetch_account_with_relations(primary_id)
                .await?
                .map(PrimaryRecord::Account),
            EntityKind::Appointment => self
                .primary
                .fetch_appointment_with_relations(primary_id)
                .await?
                .map(PrimaryRecord::Appointment),
        })
    }
}

/// A primary record of either kind, with relations loaded.
enum PrimaryRecord {
    Account(AccountRecord),
    Appointment(AppointmentRecord),
}

impl PrimaryRecord {
    /// The document the primary store says should exist.
    fn serialize(&self) -> Result<SyncedDocument, SerializationError> {
        match self {
            Self::Account(record) => serialize_account_record(record).map(Into::into),
            Self::Appointment(record) => serialize_appointment_record(record).map(Into::into),
        }
    }
}

fn secondary_reason(e: FetchError) -> UnverifiableReason {
    UnverifiableReason::SecondaryUnavailable(e.to_string())
}

/// Finite cursor over per-id reports. A failure for one id never stops the
/// rest.
pub struct VerifyBatch<'a> {
    verifier: &'a ConsistencyVerifier,
    kind: EntityKind,
    ids: std::vec::IntoIter<PrimaryId>,
    summary: VerifySummary,
}

impl VerifyBatch<'_> {
    pub async fn next(&mut self) -> Option<ConsistencyReport> {
        let primary_id = self.ids.next()?;
        let report = self.verifier.verify(self.kind, primary_id).await;
        self.summary.record(&report);
        Some(report)
    }

    /// Ids not yet verified.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.ids.len()
    }

    /// Tally of the reports produced so far.
    #[must_use]
    pub fn summary(&self) -> VerifySummary {
        self.summary
    }

    /// Drain the remaining ids.
    pub async fn collect(&mut self) -> Vec<ConsistencyReport> {
        let mut reports = Vec::with_capacity(self.remaining());
        while let Some(report) = self.next().await {
            reports.push(report);
        }
        reports
    }
}
