// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Index Manager
//!
//! RediSearch index definitions for the synced collections.
//!
//! # RediSearch Index Creation
//!
//! ```text
//! FT.CREATE sync:idx:appointments
//!   ON JSON
//!   PREFIX 1 sync:appointments:
//!   SCHEMA
//!     $.primary_id AS primary_id NUMERIC SORTABLE
//!     $.patient_name AS patient_name TEXT
//!     $.psychologist_name AS psychologist_name TEXT
//! ```

use crate::model::EntityKind;

use super::redis_translator::RediSearchTranslator;

/// Search index definition
#[derive(Debug, Clone)]
pub struct SearchIndex {
    /// Index name (will be prefixed with "idx:")
    pub name: String,
    /// Key prefix this index covers (e.g., "accounts:")
    pub prefix: String,
    /// Field definitions for the index
    pub fields: Vec<SearchField>,
}

impl SearchIndex {
    /// Create a new search index definition
    pub fn new(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            fields: Vec::new(),
        }
    }

    /// The index backing name search for one collection.
    #[must_use]
    pub fn for_kind(kind: EntityKind) -> Self {
        let collection = kind.collection();
        let index = Self::new(collection, format!("{}:", collection)).numeric_sortable("primary_id");
        RediSearchTranslator::name_fields(kind)
            .iter()
            .fold(index, |index, field| index.text(*field))
    }

    /// Add a text field
    pub fn text(mut self, name: impl Into<String>) -> Self {
        self.fields.push(SearchField {
            name: name.into(),
            field_type: SearchFieldType::Text,
            sortable: false,
        });
        self
    }

    /// Add a sortable numeric field
    pub fn numeric_sortable(mut self, name: impl Into<String>) -> Self {
        self.fields.push(SearchField {
            name: name.into(),
            field_type: SearchFieldType::Numeric,
            sortable: true,
        });
        self
    }

    /// Full index name including the global key prefix
    #[must_use]
    pub fn index_name(&self, key_prefix: &str) -> String {
        format!("{}idx:{}", key_prefix, self.name)
    }

    /// Generate FT.CREATE args (without the command itself)
    ///
    /// The key prefix is prepended to both the index name and the covered key
    /// prefix to match the actual key structure in Redis.
    pub fn to_ft_create_args(&self, key_prefix: &str) -> Vec<String> {
        let mut args = vec![
            self.index_name(key_prefix),
            "ON".to_string(),
            "JSON".to_string(),
            "PREFIX".to_string(),
            "1".to_string(),
            format!("{}{}", key_prefix, self.prefix),
            "SCHEMA".to_string(),
        ];

        for field in &self.fields {
            args.extend(field.to_schema_args());
        }

        args
    }
}

/// Search field definition
#[derive(Debug, Clone)]
pub struct SearchField {
    /// Field name (used in queries); indexed at `$.{name}`
    pub name: String,
    pub field_type: SearchFieldType,
    pub sortable: bool,
}

impl SearchField {
    fn to_schema_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("$.{}", self.name),
            "AS".to_string(),
            self.name.clone(),
            self.field_type.to_string(),
        ];

        if self.sortable {
            args.push("SORTABLE".to_string());
        }

        args
    }
}

/// Search field types supported by RediSearch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchFieldType {
    /// Full-text searchable field
    Text,
    /// Numeric field (supports range queries and sorting)
    Numeric,
}

impl std::fmt::Display for SearchFieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "TEXT"),
            Self::Numeric => write!(f, "NUMERIC"),
        }
    }
}
