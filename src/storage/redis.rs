// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis storage backend for the secondary store.
//!
//! Documents are stored with RedisJSON (Redis Stack), one key per entity:
//!
//! ```text
//! sync:accounts:42      → {"primary_id": 42, "name": "Ana", ..., "doctor_profile": {...}}
//! sync:appointments:100 → {"primary_id": 100, "patient_name": "Luis Vega", ...}
//! ```
//!
//! Upserts run one Lua script that replaces the whole document with
//! `JSON.SET key $ <doc>` and then restores the previously stored
//! `created_at`. The script is atomic, so a document is always exactly one
//! serializer output (plus its first-sync time), never a merge.
//!
//! Search runs on RediSearch indexes over the same keys:
//! ```text
//! FT.CREATE sync:idx:accounts ON JSON PREFIX 1 sync:accounts: SCHEMA ...
//! FT.SEARCH sync:idx:accounts '@name|last_name|email:(*ana*)' RETURN 1 $ SORTBY primary_id ASC LIMIT 0 25 DIALECT 2
//! ```

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, Client, ConnectionInfo, IntoConnectionInfo, RedisError, Script, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::connection::Connector;
use crate::document::SyncedDocument;
use crate::model::{EntityKind, PrimaryId};
use crate::resilience::retry::{retry, RetryConfig};
use crate::search::{NameMatcher, RediSearchTranslator, SearchIndex};
use super::traits::{DocumentStore, SearchPage, StorageError, WriteAction};

const INDEXED_KINDS: [EntityKind; 2] = [EntityKind::Account, EntityKind::Appointment];

/// KEYS[1] = document key, ARGV[1] = document JSON.
/// Returns 1 if a document was replaced, 0 if one was inserted.
const UPSERT_SCRIPT: &str = r#"
local previous = redis.call('JSON.GET', KEYS[1], '$.created_at')
redis.call('JSON.SET', KEYS[1], '$', ARGV[1])
if not previous then
  return 0
end
local created = string.match(previous, '^%[(.+)%]$')
if created then
  redis.call('JSON.SET', KEYS[1], '$.created_at', created)
end
return 1
"#;

pub struct RedisDocumentStore {
    connection: ConnectionManager,
    /// Key prefix for namespacing (e.g., "sync:" → "sync:accounts:42")
    prefix: String,
    upsert_script: Script,
}

impl RedisDocumentStore {
    /// Open a managed connection. One attempt; callers decide on retries.
    pub async fn open(info: ConnectionInfo, prefix: &str) -> Result<Self, StorageError> {
        let client = Client::open(info).map_err(map_redis_error)?;
        let connection = ConnectionManager::new(client).await.map_err(map_redis_error)?;

        Ok(Self {
            connection,
            prefix: prefix.to_string(),
            upsert_script: Script::new(UPSERT_SCRIPT),
        })
    }

    /// Get a clone of the connection manager
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    /// Get the configured prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key holding the document for `(kind, primary_id)`.
    #[inline]
    pub fn document_key(&self, kind: EntityKind, primary_id: PrimaryId) -> String {
        format!("{}{}:{}", self.prefix, kind.collection(), primary_id)
    }

    fn index_name(&self, kind: EntityKind) -> String {
        SearchIndex::for_kind(kind).index_name(&self.prefix)
    }

    fn corrupt(key: &str, reason: impl ToString) -> StorageError {
        StorageError::Corruption {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    fn parse_json(key: &str, json: &str) -> Result<serde_json::Value, StorageError> {
        serde_json::from_str(json).map_err(|e| Self::corrupt(key, e))
    }

    fn decode(key: &str, kind: EntityKind, json: &str) -> Result<SyncedDocument, StorageError> {
        let value = Self::parse_json(key, json)?;
        SyncedDocument::from_value(kind, value).map_err(|e| Self::corrupt(key, e))
    }

    /// Parse an FT.SEARCH reply made with `RETURN 1 $`:
    /// `[total, key, ["$", json], key, ["$", json], ...]`
    ///
    /// Each hit decodes independently; one bad document does not fail the
    /// page.
    #[allow(clippy::type_complexity)]
    fn parse_search_reply(
        kind: EntityKind,
        reply: Value,
    ) -> Result<(usize, Vec<Result<SyncedDocument, StorageError>>), StorageError> {
        let Value::Array(items) = reply else {
            return Err(StorageError::Backend(format!("Unexpected FT.SEARCH reply: {:?}", reply)));
        };

        let mut items = items.into_iter();
        let total = match items.next() {
            Some(Value::Int(n)) => usize::try_from(n).unwrap_or(0),
            _ => 0,
        };

        let mut documents = Vec::new();
        while let Some(key) = items.next() {
            let key: String = redis::from_redis_value(&key).map_err(map_redis_error)?;
            let json = match items.next() {
                Some(Value::Array(fields)) => fields.chunks(2).find_map(|pair| match pair {
                    [name, value] if redis::from_redis_value::<String>(name).ok().as_deref() == Some("$") => {
                        redis::from_redis_value::<String>(value).ok()
                    }
                    _ => None,
                }),
                _ => None,
            };
            let hit = match json {
                Some(json) => Self::decode(&key, kind, &json),
                None => Err(Self::corrupt(&key, "search hit without a JSON body")),
            };
            documents.push(hit);
        }

        Ok((total, documents))
    }
}

#[async_trait]
impl DocumentStore for RedisDocumentStore {
    async fn ping(&self) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: String = cmd("PING").query_async(&mut conn).await.map_err(map_redis_error)?;
        Ok(())
    }

    async fn upsert(&self, doc: &SyncedDocument) -> Result<WriteAction, StorageError> {
        let conn = self.connection.clone();
        let key = self.document_key(doc.kind(), doc.primary_id());
        let json = serde_json::to_string(&doc.to_value()?)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let replaced: i64 = retry("redis_json_upsert", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            let json = json.clone();
            let script = &self.upsert_script;
            async move {
                let replaced: i64 = script.key(&key).arg(&json).invoke_async(&mut conn).await?;
                Ok(replaced)
            }
        })
        .await
        .map_err(map_redis_error)?;

        debug!(key = %key, replaced, "JSON.SET");
        Ok(if replaced > 0 { WriteAction::Updated } else { WriteAction::Created })
    }

    async fn get(&self, kind: EntityKind, primary_id: PrimaryId) -> Result<Option<SyncedDocument>, StorageError> {
        let key = self.document_key(kind, primary_id);
        self.get_value(kind, primary_id)
            .await?
            .map(|value| SyncedDocument::from_value(kind, value).map_err(|e| Self::corrupt(&key, e)))
            .transpose()
    }

    async fn get_value(&self, kind: EntityKind, primary_id: PrimaryId) -> Result<Option<serde_json::Value>, StorageError> {
        let conn = self.connection.clone();
        let key = self.document_key(kind, primary_id);

        let json: Option<String> = retry("redis_json_get", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                let data: Option<String> = cmd("JSON.GET").arg(&key).query_async(&mut conn).await?;
                Ok(data)
            }
        })
        .await
        .map_err(map_redis_error)?;

        json.map(|s| Self::parse_json(&key, &s)).transpose()
    }

    async fn delete(&self, kind: EntityKind, primary_id: PrimaryId) -> Result<WriteAction, StorageError> {
        let conn = self.connection.clone();
        let key = self.document_key(kind, primary_id);

        let removed: i64 = retry("redis_delete", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                let removed: i64 = cmd("DEL").arg(&key).query_async(&mut conn).await?;
                Ok(removed)
            }
        })
        .await
        .map_err(map_redis_error)?;

        Ok(if removed > 0 { WriteAction::Deleted } else { WriteAction::Absent })
    }

    async fn search(
        &self,
        kind: EntityKind,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> Result<SearchPage, StorageError> {
        let matcher = NameMatcher::new(query);
        let index = self.index_name(kind);
        let query_str = RediSearchTranslator::translate(kind, &matcher);
        debug!(index = %index, query = %query_str, offset, limit, "FT.SEARCH");

        let mut conn = self.connection.clone();
        let reply: Value = cmd("FT.SEARCH")
            .arg(&index)
            .arg(&query_str)
            .arg("RETURN").arg(1).arg("$")
            .arg("SORTBY").arg("primary_id").arg("ASC")
            .arg("LIMIT").arg(offset).arg(limit)
            .arg("DIALECT").arg(2)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        let (total, candidates) = Self::parse_search_reply(kind, reply)?;
        let scanned = candidates.len();
        let mut documents = Vec::with_capacity(scanned);
        for candidate in candidates {
            match candidate {
                Ok(doc) if matcher.matches(&doc) => documents.push(doc),
                Ok(_) => {}
                Err(e) => {
                    warn!(index = %index, error = %e, "Skipping corrupt search candidate");
                    crate::metrics::record_corrupt_document(kind, "search");
                }
            }
        }

        Ok(SearchPage {
            documents,
            scanned,
            exhausted: scanned < limit || offset + scanned >= total,
        })
    }

    async fn ensure_indexes(&self) -> Result<(), StorageError> {
        for kind in INDEXED_KINDS {
            let args = SearchIndex::for_kind(kind).to_ft_create_args(&self.prefix);
            let mut conn = self.connection.clone();
            let result: Result<(), RedisError> = cmd("FT.CREATE").arg(&args).query_async(&mut conn).await;

            match result {
                Ok(()) => info!(index = %args[0], "Search index created"),
                Err(e) if e.to_string().contains("Index already exists") => {
                    debug!(index = %args[0], "Search index already exists");
                }
                Err(e) => return Err(map_redis_error(e)),
            }
        }
        Ok(())
    }
}

fn map_redis_error(e: RedisError) -> StorageError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
        StorageError::Unavailable(e.to_string())
    } else {
        StorageError::Backend(e.to_string())
    }
}

/// Connects [`RedisDocumentStore`]s for the connection manager.
pub struct RedisConnector {
    info: ConnectionInfo,
    prefix: String,
}

impl RedisConnector {
    /// Build from a Redis URL plus an optional credential pair. Explicit
    /// credentials win over any embedded in the URL.
    pub fn new(
        url: &str,
        username: Option<&str>,
        password: Option<&str>,
        prefix: &str,
    ) -> Result<Self, StorageError> {
        let mut info = url
            .into_connection_info()
            .map_err(|e| StorageError::Backend(format!("Invalid secondary store URL: {}", e)))?;
        if let Some(username) = username {
            info.redis.username = Some(username.to_string());
        }
        if let Some(password) = password {
            info.redis.password = Some(password.to_string());
        }

        Ok(Self {
            info,
            prefix: prefix.to_string(),
        })
    }

    /// Build from config. Fails when no URL is configured.
    pub fn from_config(config: &SyncConfig) -> Result<Self, StorageError> {
        let url = config
            .secondary_url
            .as_deref()
            .ok_or_else(|| StorageError::Unavailable("no secondary store configured".to_string()))?;
        Self::new(
            url,
            config.secondary_username.as_deref(),
            config.secondary_password.as_deref(),
            &config.key_prefix,
        )
    }

    #[must_use]
    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.info
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self) -> Result<Arc<dyn DocumentStore>, StorageError> {
        let store = RedisDocumentStore::open(self.info.clone(), &self.prefix).await?;
        store.ping().await?;

        // Searches against a missing index fail, so create them up front
        if let Err(e) = store.ensure_indexes().await {
            warn!(error = %e, "Failed to ensure search indexes");
        }
        Ok(Arc::new(store) as Arc<dyn DocumentStore>)
    }

    fn describe(&self) -> String {
        format!("redis://{}/{}", self.info.addr, self.info.redis.db)
    }
}
