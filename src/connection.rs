// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connection Manager for the secondary store.
//!
//! One shared handle for the life of the process, established lazily and
//! re-established on demand. The manager is an ordinary value: build it once
//! at startup, share it behind an `Arc`, and [`close`](ConnectionManager::close)
//! it at shutdown.
//!
//! # State Machine
//!
//! ```text
//!                  connect ok
//!  Uninitialized ─────────────→ Connected
//!        │                       │     ↑
//!        │ connect failed        │     │ reconnect ok
//!        │                probe / I/O  │
//!        │                failure ↓    │
//!        └──────────────────→ Disconnected
//!
//!  any state ── close() ──→ Closed (terminal)
//! ```
//!
//! # Reconnects
//!
//! Reconnects are single-flight. Callers that find no usable handle queue on
//! one async mutex; the first performs the physical connect and the rest
//! re-check the state after acquiring the lock and reuse its handle. After a
//! failed attempt, callers arriving within `reconnect_backoff` fail fast
//! rather than each repeating the attempt.
//!
//! The lock is held for one attempt at a time, never across a retry
//! schedule, so a request queued behind [`init`](ConnectionManager::init)
//! waits for at most one connect timeout.
//!
//! Connection failures are never fatal: every method degrades to an
//! `Unavailable` error or `false`.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::resilience::retry::{retry, RetryConfig};
use crate::storage::traits::{DocumentStore, StorageError};

/// Opens handles to the secondary store.
#[async_trait]
pub trait Connector: Send + Sync {
    /// One physical connection attempt.
    async fn connect(&self) -> Result<Arc<dyn DocumentStore>, StorageError>;

    /// Human-readable target, safe to log (no credentials).
    fn describe(&self) -> String;
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never attempted
    Uninitialized,
    /// Handle cached and believed healthy
    Connected,
    /// Last connect or probe failed; next use reconnects
    Disconnected,
    /// Shut down; terminal
    Closed,
}

impl ConnectionState {
    /// Numeric code for the state gauge
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::Connected => 1,
            Self::Disconnected => 2,
            Self::Closed => 3,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

struct Slot {
    state: ConnectionState,
    handle: Option<Arc<dyn DocumentStore>>,
    last_failure: Option<Instant>,
}

/// Owns the shared secondary-store handle and its reconnect policy.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    slot: RwLock<Slot>,
    /// Serializes reconnects (single-flight)
    reconnect: Mutex<()>,
    state: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    connect_attempts: AtomicU64,
    connect_timeout: Duration,
    probe_timeout: Duration,
    reconnect_backoff: Duration,
}

impl ConnectionManager {
    /// Create a manager. Does not connect.
    pub fn new(connector: Arc<dyn Connector>, config: &SyncConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Uninitialized);
        crate::metrics::set_connection_state(ConnectionState::Uninitialized.code());

        Self {
            connector,
            slot: RwLock::new(Slot {
                state: ConnectionState::Uninitialized,
                handle: None,
                last_failure: None,
            }),
            reconnect: Mutex::new(()),
            state: state_tx,
            state_rx,
            connect_attempts: AtomicU64::new(0),
            connect_timeout: config.connect_timeout(),
            probe_timeout: config.probe_timeout(),
            reconnect_backoff: config.reconnect_backoff(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.slot.read().state
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Physical connect attempts made so far.
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn describe(&self) -> String {
        self.connector.describe()
    }

    /// Eager connect at process start.
    ///
    /// Retries a few times, then gives up and leaves the manager
    /// `Disconnected`; the first request tries again. Never fatal.
    #[tracing::instrument(skip(self), fields(store = %self.connector.describe()))]
    pub async fn init(&self) -> ConnectionState {
        match self.state() {
            ConnectionState::Connected | ConnectionState::Closed => return self.state(),
            _ => {}
        }

        // Each attempt takes the lock on its own; the backoff sleeps between
        // attempts run unlocked
        let result = retry("secondary_connect", &RetryConfig::startup(), || self.connect_exclusive()).await;
        if let Err(e) = result {
            warn!(error = %e, "Secondary store unavailable at startup, continuing without it");
        }
        self.state()
    }

    /// The shared handle, connecting first if needed.
    ///
    /// With a cached handle this does no I/O. Otherwise it makes at most one
    /// connect attempt bounded by the connect timeout.
    pub async fn get_handle(&self) -> Result<Arc<dyn DocumentStore>, StorageError> {
        if let Some(handle) = self.cached()? {
            return Ok(handle);
        }

        let _guard = self.reconnect.lock().await;

        // Another caller may have reconnected while we waited
        if let Some(handle) = self.cached()? {
            return Ok(handle);
        }

        let last_failure = self.slot.read().last_failure;
        if let Some(failed_at) = last_failure {
            let since = failed_at.elapsed();
            if since < self.reconnect_backoff {
                debug!(since_ms = since.as_millis() as u64, "Reconnect suppressed by backoff");
                return Err(StorageError::Unavailable(format!(
                    "last connect failed {}ms ago",
                    since.as_millis()
                )));
            }
        }

        let result = retry("secondary_reconnect", &RetryConfig::once(), || self.attempt_connect()).await;
        self.install(result)
    }

    /// Round-trip health probe. Never errors.
    ///
    /// A failed or slow probe drops the handle and moves to `Disconnected`.
    pub async fn is_connected(&self) -> bool {
        let handle = match self.cached() {
            Ok(Some(handle)) => handle,
            _ => return false,
        };

        match tokio::time::timeout(self.probe_timeout, handle.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                self.invalidate(&handle, &e.to_string());
                false
            }
            Err(_) => {
                self.invalidate(&handle, "probe timed out");
                false
            }
        }
    }

    /// Drop the current handle after a connection-level failure.
    pub fn mark_unhealthy(&self, reason: &str) {
        let mut slot = self.slot.write();
        if slot.state == ConnectionState::Connected {
            slot.state = ConnectionState::Disconnected;
            slot.handle = None;
            self.publish(ConnectionState::Disconnected);
            warn!(reason, "Secondary store marked unhealthy");
        }
    }

    /// Like [`mark_unhealthy`](Self::mark_unhealthy), but only if `handle` is
    /// still the current one. A failure seen on an old handle must not tear
    /// down a newer connection.
    pub(crate) fn invalidate(&self, handle: &Arc<dyn DocumentStore>, reason: &str) {
        let mut slot = self.slot.write();
        let current = slot
            .handle
            .as_ref()
            .is_some_and(|h| Arc::as_ptr(h) as *const () == Arc::as_ptr(handle) as *const ());
        if current && slot.state == ConnectionState::Connected {
            slot.state = ConnectionState::Disconnected;
            slot.handle = None;
            self.publish(ConnectionState::Disconnected);
            warn!(reason, "Secondary store marked unhealthy");
        }
    }

    /// Shut down. Idempotent; `Closed` is terminal.
    pub fn close(&self) {
        let mut slot = self.slot.write();
        if slot.state == ConnectionState::Closed {
            return;
        }
        slot.state = ConnectionState::Closed;
        slot.handle = None;
        self.publish(ConnectionState::Closed);
        info!(target_store = %self.connector.describe(), "Secondary store connection closed");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    fn cached(&self) -> Result<Option<Arc<dyn DocumentStore>>, StorageError> {
        let slot = self.slot.read();
        match slot.state {
            ConnectionState::Closed => Err(StorageError::Unavailable("connection closed".to_string())),
            ConnectionState::Connected => Ok(slot.handle.clone()),
            _ => Ok(None),
        }
    }

    /// One attempt under the reconnect lock, reusing a handle that another
    /// caller installed meanwhile.
    async fn connect_exclusive(&self) -> Result<Arc<dyn DocumentStore>, StorageError> {
        let _guard = self.reconnect.lock().await;
        if let Some(handle) = self.cached()? {
            return Ok(handle);
        }
        let result = self.attempt_connect().await;
        self.install(result)
    }

    async fn attempt_connect(&self) -> Result<Arc<dyn DocumentStore>, StorageError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let result = match tokio::time::timeout(self.connect_timeout, self.connector.connect()).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout(self.connect_timeout)),
        };
        crate::metrics::record_connect_attempt(result.is_ok());
        result
    }

    /// Apply the result of a connect attempt to the slot.
    fn install(
        &self,
        result: Result<Arc<dyn DocumentStore>, StorageError>,
    ) -> Result<Arc<dyn DocumentStore>, StorageError> {
        let mut slot = self.slot.write();

        // close() won the race: discard whatever we got
        if slot.state == ConnectionState::Closed {
            return Err(StorageError::Unavailable("connection closed".to_string()));
        }

        match result {
            Ok(handle) => {
                slot.state = ConnectionState::Connected;
                slot.handle = Some(handle.clone());
                slot.last_failure = None;
                self.publish(ConnectionState::Connected);
                info!(target_store = %self.connector.describe(), "Secondary store connected");
                Ok(handle)
            }
            Err(e) => {
                slot.state = ConnectionState::Disconnected;
                slot.handle = None;
                slot.last_failure = Some(Instant::now());
                self.publish(ConnectionState::Disconnected);
                warn!(target_store = %self.connector.describe(), error = %e, "Secondary store connect failed");
                Err(e)
            }
        }
    }

    fn publish(&self, state: ConnectionState) {
        let _ = self.state.send(state);
        crate::metrics::set_connection_state(state.code());
    }
}
