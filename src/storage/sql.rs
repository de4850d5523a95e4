// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL reader for the primary store.
//!
//! Reads the application's relational schema (MySQL in production, SQLite in
//! development) and assembles entities with their relations. Read-only: the
//! schema belongs to the application and is never created or migrated here.
//!
//! ```text
//! accounts_account ──role_id──→ accounts_role(code)
//!        ↑
//!   account_id (1:1)
//!        │
//! doctors_doctor ──doctors_office_id──→ offices_doctorsoffice
//!
//! appointments_appointment ──patient_id / psychologist_id──→ accounts_account
//! ```
//!
//! ## sqlx Any Driver Quirks
//!
//! - Text columns may come back as BLOB, so strings are read as `String`
//!   with a `Vec<u8>` fallback.
//! - DATE/TIME have no portable mapping; they are selected with
//!   `CAST(... AS CHAR)` and parsed here.
//! - Integer width differs between backends; ids are read as `i64` with an
//!   `i32` fallback.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use std::sync::Once;
use std::time::Duration;

use crate::model::{
    Account, AccountRecord, Appointment, AppointmentRecord, AppointmentStatus, DoctorProfile,
    Gender, Office, PrimaryId, RoleCode, Specialty,
};
use crate::resilience::retry::{retry, RetryConfig};
use super::traits::{PrimaryStore, StorageError};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

const ACCOUNT_SQL: &str = "\
    SELECT a.id, a.name, a.last_name, a.age, a.gender, a.phone, a.email, r.code AS role_code \
    FROM accounts_account a \
    JOIN accounts_role r ON r.id = a.role_id \
    WHERE a.id = ?";

// LEFT JOIN: a profile whose office row is gone still loads, and the
// serializer reports the missing relation
const PROFILE_SQL: &str = "\
    SELECT d.id AS doctor_id, d.doctors_office_id, d.specialty, \
           o.id AS office_id, o.name AS office_name, o.address AS office_address, \
           o.phone AS office_phone, o.email AS office_email \
    FROM doctors_doctor d \
    LEFT JOIN offices_doctorsoffice o ON o.id = d.doctors_office_id \
    WHERE d.account_id = ?";

const APPOINTMENT_SQL: &str = "\
    SELECT id, patient_id, psychologist_id, \
           CAST(date AS CHAR) AS date_text, CAST(time AS CHAR) AS time_text, status \
    FROM appointments_appointment \
    WHERE id = ?";

pub struct SqlPrimaryStore {
    pool: AnyPool,
}

impl SqlPrimaryStore {
    /// Connect with startup-mode retry (fails fast if config is wrong).
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        let pool = retry("primary_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(5))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(|e| StorageError::Unavailable(e.to_string()))
        })
        .await?;

        Ok(Self { pool })
    }

    /// Reuse a pool the application already owns.
    pub fn from_pool(pool: AnyPool) -> Self {
        install_drivers();
        Self { pool }
    }

    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    async fn fetch_one(&self, op: &str, sql: &'static str, id: PrimaryId) -> Result<Option<AnyRow>, StorageError> {
        retry(op, &RetryConfig::query(), || async {
            sqlx::query(sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)
        })
        .await
    }

    async fn load_account(&self, primary_id: PrimaryId) -> Result<Option<Account>, StorageError> {
        self.fetch_one("primary_account", ACCOUNT_SQL, primary_id)
            .await?
            .map(|row| account_from_row(&row))
            .transpose()
    }

    async fn load_profile(&self, account_id: PrimaryId) -> Result<Option<(DoctorProfile, Option<Office>)>, StorageError> {
        let Some(row) = self.fetch_one("primary_profile", PROFILE_SQL, account_id).await? else {
            return Ok(None);
        };

        let specialty_code = text(&row, "specialty")?;
        let profile = DoctorProfile {
            id: Some(int(&row, "doctor_id")?),
            account_id,
            office_id: int(&row, "doctors_office_id")?,
            specialty: Specialty::from_code(&specialty_code)
                .ok_or_else(|| out_of_domain("specialty", &specialty_code))?,
        };

        let office = match opt_int(&row, "office_id") {
            Some(office_id) => Some(Office {
                id: Some(office_id),
                name: text(&row, "office_name")?,
                address: text(&row, "office_address")?,
                phone: text(&row, "office_phone")?,
                email: text(&row, "office_email")?,
            }),
            None => None,
        };

        Ok(Some((profile, office)))
    }
}

#[async_trait]
impl PrimaryStore for SqlPrimaryStore {
    async fn fetch_account_with_relations(&self, primary_id: PrimaryId) -> Result<Option<AccountRecord>, StorageError> {
        let Some(account) = self.load_account(primary_id).await? else {
            return Ok(None);
        };

        let mut record = AccountRecord::new(account);
        if let Some((profile, office)) = self.load_profile(primary_id).await? {
            record.doctor_profile = Some(profile);
            record.office = office;
        }
        Ok(Some(record))
    }

    async fn fetch_appointment_with_relations(&self, primary_id: PrimaryId) -> Result<Option<AppointmentRecord>, StorageError> {
        let Some(row) = self.fetch_one("primary_appointment", APPOINTMENT_SQL, primary_id).await? else {
            return Ok(None);
        };
        let appointment = appointment_from_row(&row)?;

        let dangling = |field: &str, id: PrimaryId| {
            StorageError::Backend(format!("appointment {} references missing {} {}", primary_id, field, id))
        };
        let patient = self
            .load_account(appointment.patient_id)
            .await?
            .ok_or_else(|| dangling("patient", appointment.patient_id))?;
        let psychologist = self
            .load_account(appointment.psychologist_id)
            .await?
            .ok_or_else(|| dangling("psychologist", appointment.psychologist_id))?;

        Ok(Some(AppointmentRecord {
            appointment,
            patient,
            psychologist,
        }))
    }
}

fn map_sqlx_error(e: sqlx::Error) -> StorageError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StorageError::Unavailable(e.to_string())
        }
        other => StorageError::Backend(other.to_string()),
    }
}

fn account_from_row(row: &AnyRow) -> Result<Account, StorageError> {
    let gender_code = text(row, "gender")?;
    let age = int(row, "age")?;

    Ok(Account {
        id: Some(int(row, "id")?),
        name: text(row, "name")?,
        last_name: text(row, "last_name")?,
        age: u32::try_from(age).map_err(|_| out_of_domain("age", &age.to_string()))?,
        gender: Gender::from_code(&gender_code).ok_or_else(|| out_of_domain("gender", &gender_code))?,
        phone: text(row, "phone")?,
        email: text(row, "email")?,
        role: RoleCode::new(text(row, "role_code")?),
    })
}

fn appointment_from_row(row: &AnyRow) -> Result<Appointment, StorageError> {
    let date_text = text(row, "date_text")?;
    let time_text = text(row, "time_text")?;
    let status_code = text(row, "status")?;

    Ok(Appointment {
        id: Some(int(row, "id")?),
        patient_id: int(row, "patient_id")?,
        psychologist_id: int(row, "psychologist_id")?,
        date: NaiveDate::parse_from_str(date_text.trim(), "%Y-%m-%d")
            .map_err(|_| out_of_domain("date", &date_text))?,
        time: NaiveTime::parse_from_str(time_text.trim(), "%H:%M:%S%.f")
            .map_err(|_| out_of_domain("time", &time_text))?,
        status: AppointmentStatus::from_code(&status_code)
            .ok_or_else(|| out_of_domain("status", &status_code))?,
    })
}

fn text(row: &AnyRow, column: &str) -> Result<String, StorageError> {
    row.try_get::<String, _>(column)
        .ok()
        .or_else(|| {
            row.try_get::<Vec<u8>, _>(column)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
        .ok_or_else(|| StorageError::Backend(format!("Column '{}' is not readable as text", column)))
}

fn int(row: &AnyRow, column: &str) -> Result<i64, StorageError> {
    opt_int(row, column)
        .ok_or_else(|| StorageError::Backend(format!("Column '{}' is not readable as an integer", column)))
}

fn opt_int(row: &AnyRow, column: &str) -> Option<i64> {
    row.try_get::<Option<i64>, _>(column)
        .ok()
        .flatten()
        .or_else(|| row.try_get::<Option<i32>, _>(column).ok().flatten().map(i64::from))
}

fn out_of_domain(column: &str, value: &str) -> StorageError {
    StorageError::Backend(format!("Unexpected value '{}' in column '{}'", value, column))
}
