// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Primary-store entities.
//!
//! These mirror the relational records as committed in the primary store.
//! The engine only ever reads them: they arrive from the caller right after a
//! commit, or from a [`PrimaryStore`](crate::storage::traits::PrimaryStore)
//! during verification.
//!
//! Identifiers are `Option<PrimaryId>` because an entity that has not been
//! committed yet has no id; serializing one is a caller bug and is rejected by
//! the serializer.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Primary-store-assigned identifier.
pub type PrimaryId = i64;

/// The entity kinds mirrored into the secondary store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Account,
    Appointment,
}

impl EntityKind {
    /// Secondary-store collection holding documents of this kind.
    #[must_use]
    pub fn collection(self) -> &'static str {
        match self {
            Self::Account => "accounts",
            Self::Appointment => "appointments",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account => write!(f, "account"),
            Self::Appointment => write!(f, "appointment"),
        }
    }
}

/// Role code from the `accounts_role` table.
///
/// Roles are data, not a closed set: new ones can be created at runtime.
/// Codes are stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleCode(String);

impl RoleCode {
    pub const PATIENT: &'static str = "patient";
    pub const PSYCHOLOGIST: &'static str = "psychologist";
    pub const SUPERVISOR: &'static str = "supervisor";

    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_ascii_lowercase())
    }

    #[must_use]
    pub fn patient() -> Self {
        Self::new(Self::PATIENT)
    }

    #[must_use]
    pub fn psychologist() -> Self {
        Self::new(Self::PSYCHOLOGIST)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_psychologist(&self) -> bool {
        self.0 == Self::PSYCHOLOGIST
    }

    /// Human-readable label: the code with its first letter capitalized
    /// ("psychologist" → "Psychologist").
    #[must_use]
    pub fn label(&self) -> String {
        let mut chars = self.0.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl fmt::Display for RoleCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
    #[serde(rename = "O")]
    Other,
}

impl Gender {
    /// Parse the one-letter column code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "M" | "m" => Some(Self::Male),
            "F" | "f" => Some(Self::Female),
            "O" | "o" => Some(Self::Other),
            _ => None,
        }
    }

    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Male => "M",
            Self::Female => "F",
            Self::Other => "O",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Male => "Male",
            Self::Female => "Female",
            Self::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specialty {
    Clinical,
    Cognitive,
    Developmental,
    Social,
    Neuropsychology,
    Counseling,
}

impl Specialty {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "clinical" => Some(Self::Clinical),
            "cognitive" => Some(Self::Cognitive),
            "developmental" => Some(Self::Developmental),
            "social" => Some(Self::Social),
            "neuropsychology" => Some(Self::Neuropsychology),
            "counseling" => Some(Self::Counseling),
            _ => None,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Clinical => "Clinical Psychology",
            Self::Cognitive => "Cognitive Psychology",
            Self::Developmental => "Developmental Psychology",
            Self::Social => "Social Psychology",
            Self::Neuropsychology => "Neuropsychology",
            Self::Counseling => "Counseling Psychology",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    #[default]
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "scheduled" => Some(Self::Scheduled),
            "confirmed" => Some(Self::Confirmed),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "no_show" => Some(Self::NoShow),
            _ => None,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Scheduled => "Scheduled",
            Self::Confirmed => "Confirmed",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
            Self::NoShow => "No Show",
        }
    }
}

/// A patient, psychologist or any other role holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: Option<PrimaryId>,
    pub name: String,
    pub last_name: String,
    pub age: u32,
    pub gender: Gender,
    pub phone: String,
    pub email: String,
    pub role: RoleCode,
}

impl Account {
    /// "{name} {last_name}"
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.name, self.last_name)
    }
}

/// Psychologist profile linking an account to an office.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoctorProfile {
    pub id: Option<PrimaryId>,
    pub account_id: PrimaryId,
    pub office_id: PrimaryId,
    pub specialty: Specialty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Office {
    pub id: Option<PrimaryId>,
    pub name: String,
    pub address: String,
    pub phone: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appointment {
    pub id: Option<PrimaryId>,
    pub patient_id: PrimaryId,
    pub psychologist_id: PrimaryId,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: AppointmentStatus,
}

/// An account with its eagerly-loaded relations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub account: Account,
    pub doctor_profile: Option<DoctorProfile>,
    pub office: Option<Office>,
}

impl AccountRecord {
    pub fn new(account: Account) -> Self {
        Self {
            account,
            doctor_profile: None,
            office: None,
        }
    }

    pub fn with_profile(mut self, profile: DoctorProfile, office: Office) -> Self {
        self.doctor_profile = Some(profile);
        self.office = Some(office);
        self
    }
}

/// An appointment with both participants loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentRecord {
    pub appointment: Appointment,
    pub patient: Account,
    pub psychologist: Account,
}
