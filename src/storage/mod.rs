// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage seams and their backends.
//!
//! - [`traits`]: `DocumentStore` (secondary) and `PrimaryStore` (read-only primary)
//! - [`redis`]: RedisJSON + RediSearch secondary store
//! - [`memory`]: in-memory secondary and primary stores
//! - [`sql`]: sqlx reader for the relational primary store

pub mod memory;
pub mod redis;
pub mod sql;
pub mod traits;
