// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Document serializer: primary entity (plus loaded relations) → synced document.
//!
//! Pure and deterministic. The only time-dependent fields are `synced_at`
//! and `created_at`, both excluded from consistency comparisons. A fresh
//! document proposes `created_at = synced_at`; the store keeps the stored
//! value on replacement. Use the `*_at` variants to pin the timestamp.
//!
//! # Example
//!
//! ```
//! use dual_sync::model::{Account, Gender, RoleCode};
//! use dual_sync::serializer::serialize_account_at;
//!
//! let account = Account {
//!     id: Some(7),
//!     name: "Luis".into(),
//!     last_name: "Vega".into(),
//!     age: 31,
//!     gender: Gender::Male,
//!     phone: "555-0101".into(),
//!     email: "luis@example.com".into(),
//!     role: RoleCode::patient(),
//! };
//!
//! let doc = serialize_account_at(&account, None, None, 0).unwrap();
//! assert_eq!(doc.primary_id, 7);
//! assert!(doc.doctor_profile.is_none());
//! ```

use thiserror::Error;

use crate::document::{AccountDocument, AppointmentDocument, DoctorProfileDocument, OfficeDocument};
use crate::model::{Account, AccountRecord, Appointment, AppointmentRecord, DoctorProfile, Office, PrimaryId};

/// The caller handed over an entity that violates the serializer's contract.
///
/// This is a defect in calling code, not an environmental failure, so it is
/// surfaced rather than swallowed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SerializationError {
    #[error("{entity} is missing required field '{field}'")]
    MissingField {
        entity: &'static str,
        field: &'static str,
    },
    #[error("{entity} requires relation '{relation}' but none was supplied")]
    MissingRelation {
        entity: &'static str,
        relation: &'static str,
    },
    #[error("{entity}.{field} is {expected} but the supplied relation has id {actual}")]
    RelationMismatch {
        entity: &'static str,
        field: &'static str,
        expected: PrimaryId,
        actual: PrimaryId,
    },
}

/// Current epoch millis.
#[must_use]
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn require_id(id: Option<PrimaryId>, entity: &'static str) -> Result<PrimaryId, SerializationError> {
    id.ok_or(SerializationError::MissingField { entity, field: "id" })
}

/// Serialize an account, stamping `synced_at` with the current time.
pub fn serialize_account(
    account: &Account,
    doctor_profile: Option<&DoctorProfile>,
    office: Option<&Office>,
) -> Result<AccountDocument, SerializationError> {
    serialize_account_at(account, doctor_profile, office, now_millis())
}

/// Serialize an account with an explicit `synced_at`.
///
/// The nested profile is embedded only for psychologist accounts with a
/// supplied profile. A psychologist without one is flagged
/// `profile_incomplete` instead.
pub fn serialize_account_at(
    account: &Account,
    doctor_profile: Option<&DoctorProfile>,
    office: Option<&Office>,
    synced_at: i64,
) -> Result<AccountDocument, SerializationError> {
    let primary_id = require_id(account.id, "account")?;
    let is_psychologist = account.role.is_psychologist();

    let nested = match doctor_profile {
        Some(profile) if is_psychologist => Some(profile_document(primary_id, profile, office)?),
        _ => None,
    };

    Ok(AccountDocument {
        primary_id,
        name: account.name.clone(),
        last_name: account.last_name.clone(),
        full_name: account.full_name(),
        email: account.email.clone(),
        age: account.age,
        gender: account.gender,
        gender_display: account.gender.label().to_string(),
        phone: account.phone.clone(),
        role: account.role.clone(),
        role_display: account.role.label(),
        profile_incomplete: is_psychologist && nested.is_none(),
        doctor_profile: nested,
        created_at: synced_at,
        synced_at,
    })
}

fn profile_document(
    account_id: PrimaryId,
    profile: &DoctorProfile,
    office: Option<&Office>,
) -> Result<DoctorProfileDocument, SerializationError> {
    let doctor_id = require_id(profile.id, "doctor_profile")?;
    if profile.account_id != account_id {
        return Err(SerializationError::RelationMismatch {
            entity: "doctor_profile",
            field: "account_id",
            expected: profile.account_id,
            actual: account_id,
        });
    }

    let office = office.ok_or(SerializationError::MissingRelation {
        entity: "doctor_profile",
        relation: "office",
    })?;
    let office_id = require_id(office.id, "office")?;
    if profile.office_id != office_id {
        return Err(SerializationError::RelationMismatch {
            entity: "doctor_profile",
            field: "office_id",
            expected: profile.office_id,
            actual: office_id,
        });
    }

    Ok(DoctorProfileDocument {
        doctor_id,
        specialty: profile.specialty,
        specialty_display: profile.specialty.label().to_string(),
        office: OfficeDocument {
            office_id,
            name: office.name.clone(),
            address: office.address.clone(),
            phone: office.phone.clone(),
            email: office.email.clone(),
        },
    })
}

/// Serialize an appointment, stamping `synced_at` with the current time.
pub fn serialize_appointment(
    appointment: &Appointment,
    patient: &Account,
    psychologist: &Account,
) -> Result<AppointmentDocument, SerializationError> {
    serialize_appointment_at(appointment, patient, psychologist, now_millis())
}

/// Serialize an appointment with an explicit `synced_at`.
pub fn serialize_appointment_at(
    appointment: &Appointment,
    patient: &Account,
    psychologist: &Account,
    synced_at: i64,
) -> Result<AppointmentDocument, SerializationError> {
    let primary_id = require_id(appointment.id, "appointment")?;
    let patient_id = require_id(patient.id, "patient")?;
    let psychologist_id = require_id(psychologist.id, "psychologist")?;

    if appointment.patient_id != patient_id {
        return Err(SerializationError::RelationMismatch {
            entity: "appointment",
            field: "patient_id",
            expected: appointment.patient_id,
            actual: patient_id,
        });
    }
    if appointment.psychologist_id != psychologist_id {
        return Err(SerializationError::RelationMismatch {
            entity: "appointment",
            field: "psychologist_id",
            expected: appointment.psychologist_id,
            actual: psychologist_id,
        });
    }

    Ok(AppointmentDocument {
        primary_id,
        date: appointment.date.format("%Y-%m-%d").to_string(),
        time: appointment.time.format("%H:%M:%S").to_string(),
        status: appointment.status,
        status_display: appointment.status.label().to_string(),
        patient_id,
        patient_name: patient.full_name(),
        patient_email: patient.email.clone(),
        psychologist_id,
        psychologist_name: psychologist.full_name(),
        psychologist_email: psychologist.email.clone(),
        created_at: synced_at,
        synced_at,
    })
}

pub fn serialize_account_record(record: &AccountRecord) -> Result<AccountDocument, SerializationError> {
    serialize_account(&record.account, record.doctor_profile.as_ref(), record.office.as_ref())
}

pub fn serialize_appointment_record(record: &AppointmentRecord) -> Result<AppointmentDocument, SerializationError> {
    serialize_appointment(&record.appointment, &record.patient, &record.psychologist)
}
