// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! RediSearch Translator
//!
//! Translates a name search into an FT.SEARCH candidate query.
//!
//! # RediSearch Query Syntax
//!
//! ```text
//! @field:*value*            - Contains (DIALECT 2)
//! @f1|f2:(a b)              - Every term in any of the fields
//! *                         - All documents
//! ```
//!
//! RediSearch splits indexed text on punctuation and whitespace, so the query
//! is split the same way. Terms shorter than [`MIN_INFIX_LEN`] are dropped
//! from the candidate query; the exact check happens afterwards in
//! [`NameMatcher`](super::NameMatcher).

use crate::model::EntityKind;

use super::matcher::NameMatcher;

/// Shortest term sent as an infix wildcard.
pub const MIN_INFIX_LEN: usize = 2;

/// RediSearch query translator
pub struct RediSearchTranslator;

impl RediSearchTranslator {
    /// TEXT fields searched for each kind.
    #[must_use]
    pub fn name_fields(kind: EntityKind) -> &'static [&'static str] {
        match kind {
            EntityKind::Account => &["name", "last_name", "email"],
            EntityKind::Appointment => &["patient_name", "psychologist_name"],
        }
    }

    /// Build the candidate query for a name search.
    pub fn translate(kind: EntityKind, matcher: &NameMatcher) -> String {
        let terms = Self::terms(matcher.needle());
        if terms.is_empty() {
            return "*".to_string();
        }

        let fields = Self::name_fields(kind).join("|");
        let wildcards: Vec<String> = terms.iter().map(|t| format!("*{}*", t)).collect();
        format!("@{}:({})", fields, wildcards.join(" "))
    }

    /// Split on anything RediSearch would split on, keeping usable terms.
    fn terms(needle: &str) -> Vec<String> {
        needle
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() >= MIN_INFIX_LEN)
            .map(str::to_string)
            .collect()
    }
}
