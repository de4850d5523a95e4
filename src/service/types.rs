// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the sync service.

use thiserror::Error;

use crate::model::{EntityKind, PrimaryId};
use crate::storage::traits::{StorageError, WriteAction};

/// Why an operation did not reach the secondary store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Write-through switched off in config
    Disabled,
    /// No usable connection
    SecondaryUnavailable,
    /// Circuit breaker is failing fast
    CircuitOpen,
}

impl SkipReason {
    /// Metric label
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Disabled => "skipped_disabled",
            Self::SecondaryUnavailable => "skipped_unavailable",
            Self::CircuitOpen => "skipped_circuit_open",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "sync disabled"),
            Self::SecondaryUnavailable => write!(f, "secondary unavailable"),
            Self::CircuitOpen => write!(f, "circuit open"),
        }
    }
}

/// What happened to one sync or delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Success(WriteAction),
    Skipped(SkipReason),
    Failed(StorageError),
}

/// Result of one service operation. Logged and returned, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub kind: EntityKind,
    pub primary_id: PrimaryId,
    pub status: SyncStatus,
    /// Epoch millis when the outcome was decided
    pub at: i64,
}

impl SyncOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.status, SyncStatus::Success(_))
    }

    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self.status, SyncStatus::Skipped(_))
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.status, SyncStatus::Failed(_))
    }

    /// The write action, if the operation succeeded.
    #[must_use]
    pub fn action(&self) -> Option<WriteAction> {
        match self.status {
            SyncStatus::Success(action) => Some(action),
            _ => None,
        }
    }

    /// Metric label for the outcome
    #[must_use]
    pub fn label(&self) -> &'static str {
        match &self.status {
            SyncStatus::Success(WriteAction::Created) => "created",
            SyncStatus::Success(WriteAction::Updated) => "updated",
            SyncStatus::Success(WriteAction::Deleted) => "deleted",
            SyncStatus::Success(WriteAction::Absent) => "absent",
            SyncStatus::Skipped(reason) => reason.label(),
            SyncStatus::Failed(_) => "failed",
        }
    }
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.status {
            SyncStatus::Success(action) => write!(f, "{} {} {}", self.kind, self.primary_id, action),
            SyncStatus::Skipped(reason) => write!(f, "{} {} skipped: {}", self.kind, self.primary_id, reason),
            SyncStatus::Failed(e) => write!(f, "{} {} failed: {}", self.kind, self.primary_id, e),
        }
    }
}

/// Failure of a guarded read that must distinguish "absent" from "down".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("skipped: {0}")]
    Skipped(SkipReason),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
