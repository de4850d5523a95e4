// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::document::SyncedDocument;
use crate::model::{AccountRecord, AppointmentRecord, EntityKind, PrimaryId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Store unreachable (connect refused, connection closed, not configured)
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Storage operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Corrupt document at '{key}': {reason}")]
    Corruption {
        key: String,
        reason: String,
    },
}

impl StorageError {
    /// Whether this failure says something about the connection itself
    /// (as opposed to one bad request or document).
    #[must_use]
    pub fn is_connection_class(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

/// What a keyed write did to the secondary store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
    /// Upsert inserted a new document
    Created,
    /// Upsert replaced an existing document
    Updated,
    /// Delete removed a document
    Deleted,
    /// Delete found nothing to remove
    Absent,
}

impl std::fmt::Display for WriteAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Deleted => write!(f, "deleted"),
            Self::Absent => write!(f, "absent"),
        }
    }
}

/// One page of search results.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    /// Matching documents in this page
    pub documents: Vec<SyncedDocument>,
    /// Candidates consumed from the store (advance the offset by this much).
    /// May exceed `documents.len()` when the backend pre-filters loosely or
    /// a candidate could not be decoded and was skipped.
    pub scanned: usize,
    /// No candidates remain past this page
    pub exhausted: bool,
}

/// The secondary document store.
///
/// Every write replaces a whole document keyed by `(kind, primary_id)`, so a
/// write is either fully applied or not at all.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Lightweight round-trip health check.
    async fn ping(&self) -> Result<(), StorageError>;

    /// Insert-or-replace keyed by the document's kind and `primary_id`.
    async fn upsert(&self, doc: &SyncedDocument) -> Result<WriteAction, StorageError>;

    async fn get(&self, kind: EntityKind, primary_id: PrimaryId) -> Result<Option<SyncedDocument>, StorageError>;

    /// The stored JSON as-is, without decoding into a typed document.
    async fn get_value(&self, kind: EntityKind, primary_id: PrimaryId) -> Result<Option<Value>, StorageError>;

    /// Returns `Deleted` or `Absent`.
    async fn delete(&self, kind: EntityKind, primary_id: PrimaryId) -> Result<WriteAction, StorageError>;

    /// Case-insensitive substring search over the kind's name fields.
    /// `offset` counts candidates, as reported by [`SearchPage::scanned`].
    /// A candidate that cannot be decoded is skipped, not an error.
    async fn search(
        &self,
        kind: EntityKind,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> Result<SearchPage, StorageError>;

    /// Create secondary indexes if the backend has any.
    async fn ensure_indexes(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Read-only view of the primary relational store.
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    async fn fetch_account_with_relations(&self, primary_id: PrimaryId) -> Result<Option<AccountRecord>, StorageError>;

    async fn fetch_appointment_with_relations(&self, primary_id: PrimaryId) -> Result<Option<AppointmentRecord>, StorageError>;
}
