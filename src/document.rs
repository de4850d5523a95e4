// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Synced documents: the secondary-store representation of primary entities.
//!
//! Documents are denormalized so reads never need a join. An account embeds
//! its doctor profile and office; an appointment carries both participants'
//! names and emails.
//!
//! ```json
//! {
//!   "primary_id": 42,
//!   "name": "Ana",
//!   "last_name": "Lopez",
//!   "full_name": "Ana Lopez",
//!   "role": "psychologist",
//!   "role_display": "Psychologist",
//!   "doctor_profile": {
//!     "doctor_id": 7,
//!     "specialty": "clinical",
//!     "specialty_display": "Clinical Psychology",
//!     "office": {"office_id": 3, "name": "Central Office", ...}
//!   },
//!   "created_at": 1767084600000,
//!   "synced_at": 1767084657058
//! }
//! ```
//!
//! The nested `doctor_profile` is either fully present or absent as a key.
//! It is never `null` and never `{}`, so secondary-store queries can test
//! for its presence cheaply.
//!
//! `created_at` is the time of the first sync. Stores keep the value already
//! stored when they replace a document, so only an insert sets it.
//!
//! `full_name` and the `*_display` labels are derived from other fields and
//! are left out of consistency checks along with the timestamps.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{AppointmentStatus, EntityKind, Gender, PrimaryId, RoleCode, Specialty};
use crate::storage::traits::StorageError;

/// Field stamped at serialization time and excluded from drift checks.
pub const SYNCED_AT_FIELD: &str = "synced_at";

/// First-sync time, kept by the store across replacements.
pub const CREATED_AT_FIELD: &str = "created_at";

/// Fields computed from other fields of the same document.
const DERIVED_FIELDS: [&str; 4] = ["full_name", "gender_display", "role_display", "status_display"];

/// Drop timestamps and derived fields, leaving only what must agree with the
/// primary store field for field.
#[must_use]
pub fn comparable(mut value: Value) -> Value {
    if let Value::Object(ref mut map) = value {
        map.remove(SYNCED_AT_FIELD);
        map.remove(CREATED_AT_FIELD);
        for field in DERIVED_FIELDS {
            map.remove(field);
        }
        if let Some(Value::Object(profile)) = map.get_mut("doctor_profile") {
            profile.remove("specialty_display");
        }
    }
    value
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfficeDocument {
    pub office_id: PrimaryId,
    pub name: String,
    pub address: String,
    pub phone: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorProfileDocument {
    pub doctor_id: PrimaryId,
    pub specialty: Specialty,
    pub specialty_display: String,
    pub office: OfficeDocument,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDocument {
    pub primary_id: PrimaryId,
    pub name: String,
    pub last_name: String,
    /// "{name} {last_name}", searchable as one string
    pub full_name: String,
    pub email: String,
    pub age: u32,
    pub gender: Gender,
    pub gender_display: String,
    pub phone: String,
    pub role: RoleCode,
    pub role_display: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor_profile: Option<DoctorProfileDocument>,
    /// Psychologist synced before their profile existed
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub profile_incomplete: bool,
    #[serde(default)]
    pub created_at: i64,
    pub synced_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentDocument {
    pub primary_id: PrimaryId,
    /// ISO date, `YYYY-MM-DD`
    pub date: String,
    /// ISO time, `HH:MM:SS`
    pub time: String,
    pub status: AppointmentStatus,
    pub status_display: String,
    pub patient_id: PrimaryId,
    pub patient_name: String,
    pub patient_email: String,
    pub psychologist_id: PrimaryId,
    pub psychologist_name: String,
    pub psychologist_email: String,
    #[serde(default)]
    pub created_at: i64,
    pub synced_at: i64,
}

/// A document of either kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncedDocument {
    Account(AccountDocument),
    Appointment(AppointmentDocument),
}

impl SyncedDocument {
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Account(_) => EntityKind::Account,
            Self::Appointment(_) => EntityKind::Appointment,
        }
    }

    #[must_use]
    pub fn primary_id(&self) -> PrimaryId {
        match self {
            Self::Account(doc) => doc.primary_id,
            Self::Appointment(doc) => doc.primary_id,
        }
    }

    #[must_use]
    pub fn synced_at(&self) -> i64 {
        match self {
            Self::Account(doc) => doc.synced_at,
            Self::Appointment(doc) => doc.synced_at,
        }
    }

    #[must_use]
    pub fn created_at(&self) -> i64 {
        match self {
            Self::Account(doc) => doc.created_at,
            Self::Appointment(doc) => doc.created_at,
        }
    }

    pub fn as_account(&self) -> Option<&AccountDocument> {
        match self {
            Self::Account(doc) => Some(doc),
            Self::Appointment(_) => None,
        }
    }

    pub fn as_appointment(&self) -> Option<&AppointmentDocument> {
        match self {
            Self::Appointment(doc) => Some(doc),
            Self::Account(_) => None,
        }
    }

    /// The stored JSON shape (no kind tag: the collection carries the kind).
    pub fn to_value(&self) -> Result<Value, StorageError> {
        let value = match self {
            Self::Account(doc) => serde_json::to_value(doc),
            Self::Appointment(doc) => serde_json::to_value(doc),
        };
        value.map_err(|e| StorageError::Backend(format!("Failed to encode document: {}", e)))
    }

    /// JSON shape minus the timestamps, for drift comparison.
    pub fn comparable_value(&self) -> Result<Value, StorageError> {
        Ok(comparable(self.to_value()?))
    }

    /// Decode a stored document of a known kind.
    pub fn from_value(kind: EntityKind, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            EntityKind::Account => Self::Account(serde_json::from_value(value)?),
            EntityKind::Appointment => Self::Appointment(serde_json::from_value(value)?),
        })
    }
}

impl From<AccountDocument> for SyncedDocument {
    fn from(doc: AccountDocument) -> Self {
        Self::Account(doc)
    }
}

impl From<AppointmentDocument> for SyncedDocument {
    fn from(doc: AppointmentDocument) -> Self {
        Self::Appointment(doc)
    }
}
