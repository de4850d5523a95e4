// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Search Infrastructure
//!
//! Name search over synced documents: case-insensitive substring matching on
//! the denormalized name fields of each entity kind.
//!
//! # Architecture
//!
//! ```text
//! search(kind, "ana lo")
//!     │
//!     ├─→ RediSearchTranslator → @name|last_name|email:(*ana* *lo*)   (candidate set)
//!     │        │
//!     │        └─→ FT.SEARCH ... SORTBY primary_id LIMIT offset n DIALECT 2
//!     │
//!     └─→ NameMatcher → exact substring check on each candidate
//! ```
//!
//! RediSearch tokenizes on punctuation, so the FT query can only narrow the
//! candidate set. [`NameMatcher`] gives the definitive answer and is the
//! single source of matching semantics for every backend.
//!
//! # Indexes
//!
//! ```text
//! FT.CREATE sync:idx:accounts ON JSON PREFIX 1 sync:accounts: SCHEMA
//!   $.primary_id AS primary_id NUMERIC SORTABLE
//!   $.name AS name TEXT
//!   $.last_name AS last_name TEXT
//!   $.email AS email TEXT
//! ```

mod index_manager;
mod matcher;
mod redis_translator;

pub use index_manager::{SearchField, SearchFieldType, SearchIndex};
pub use matcher::NameMatcher;
pub use redis_translator::RediSearchTranslator;
