// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Substring matching over denormalized name fields.

use crate::document::SyncedDocument;

/// A normalized (trimmed, lowercased) search query.
///
/// An empty query matches every document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameMatcher {
    needle: String,
}

impl NameMatcher {
    pub fn new(query: &str) -> Self {
        Self {
            needle: query.trim().to_lowercase(),
        }
    }

    #[must_use]
    pub fn needle(&self) -> &str {
        &self.needle
    }

    #[must_use]
    pub fn matches_everything(&self) -> bool {
        self.needle.is_empty()
    }

    /// Check a document against the query.
    ///
    /// Accounts match on `name`, `last_name`, `email` and the full name;
    /// appointments on `patient_name` and `psychologist_name`.
    #[must_use]
    pub fn matches(&self, doc: &SyncedDocument) -> bool {
        if self.matches_everything() {
            return true;
        }
        match doc {
            SyncedDocument::Account(account) => {
                self.hit(&account.name)
                    || self.hit(&account.last_name)
                    || self.hit(&account.email)
                    || self.hit(&format!("{} {}", account.name, account.last_name))
            }
            SyncedDocument::Appointment(appointment) => {
                self.hit(&appointment.patient_name) || self.hit(&appointment.psychologist_name)
            }
        }
    }

    fn hit(&self, haystack: &str) -> bool {
        haystack.to_lowercase().contains(&self.needle)
    }
}
