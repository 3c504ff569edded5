//! Host and guest access policy stores.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tandem_common::{EventEmitter, ParticipantId};
use tandem_config::AccessConfig;
use tracing::{debug, info, warn};

use crate::access::types::{AccessControl, AccessControlRecord};
use crate::context::SessionContext;
use crate::error::SessionError;

/// Key under which the access-control record round-trips through the
/// settings store.
pub const ACCESS_CONTROL_KEY: &str = "accessControl";

/// Opaque key-value persistence owned by a collaborator outside this crate.
/// The policy store treats it as durable: a write that returns `Ok` is
/// assumed to survive a crash.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, String>;
    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), String>;
}

/// In-memory settings store for tests and single-process setups.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: tokio::sync::RwLock<HashMap<String, serde_json::Value>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, String> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), String> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// Read access to the current policy record, host- or guest-side. The gate
/// consults this synchronously on every evaluation.
pub trait PolicyReader: Send + Sync {
    fn record(&self) -> AccessControlRecord;

    fn is_read_only(&self, participant: ParticipantId) -> bool {
        self.record().is_read_only(participant)
    }
}

// ---------------------------------------------------------------------------
// Host side
// ---------------------------------------------------------------------------

/// Authoritative policy store on the host. Mutations persist to the
/// settings store before the in-memory cache updates, then notify
/// subscribers; the cache is therefore never ahead of durable state.
pub struct HostPolicyStore {
    settings: Arc<dyn SettingsStore>,
    context: Arc<SessionContext>,
    cache: RwLock<AccessControlRecord>,
    changed: EventEmitter<AccessControlRecord>,
    read_only_changed: EventEmitter<bool>,
}

impl HostPolicyStore {
    /// Build a store seeded from host configuration. The seed applies until
    /// [`refresh`](Self::refresh) finds a persisted record.
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        context: Arc<SessionContext>,
        defaults: &AccessConfig,
    ) -> Self {
        let mut record = AccessControlRecord::default();
        record.default_access_control = AccessControl {
            is_read_only: defaults.default_read_only,
        };
        context.set_read_only(defaults.default_read_only);
        Self {
            settings,
            context,
            cache: RwLock::new(record),
            changed: EventEmitter::new(),
            read_only_changed: EventEmitter::new(),
        }
    }

    fn cached(&self) -> AccessControlRecord {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install(&self, record: AccessControlRecord) {
        let previous = {
            let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *cache, record.clone())
        };
        let read_only = record.default_access_control.is_read_only;
        self.context.set_read_only(read_only);
        self.changed.emit(&record);
        if previous.default_access_control.is_read_only != read_only {
            self.read_only_changed.emit(&read_only);
        }
    }

    /// Re-read the persisted record, replacing the cache if it differs. A
    /// missing record keeps the configured seed; a malformed one is logged
    /// and ignored.
    pub async fn refresh(&self) -> Result<(), SessionError> {
        let value = self
            .settings
            .get(ACCESS_CONTROL_KEY)
            .await
            .map_err(SessionError::Storage)?;
        let Some(value) = value else {
            debug!("no persisted access-control record, keeping configured defaults");
            return Ok(());
        };
        let record: AccessControlRecord = match serde_json::from_value(value) {
            Ok(record) => record,
            Err(err) => {
                warn!(error = %err, "persisted access-control record is malformed, ignoring");
                return Ok(());
            }
        };
        if record != self.cached() {
            self.install(record);
        }
        Ok(())
    }

    /// Flip the session-wide read-only default.
    ///
    /// Refused while guests are connected: read-only is negotiated against
    /// client capabilities at admission time and cannot change under
    /// connected participants. Persists first; the cache update and
    /// notifications follow only a durable write.
    pub async fn set_read_only(&self, read_only: bool) -> Result<(), SessionError> {
        if self.context.has_collaborators() {
            return Err(SessionError::ReadOnlyLocked);
        }
        let mut record = self.cached();
        if record.default_access_control.is_read_only == read_only {
            return Ok(());
        }
        record.default_access_control.is_read_only = read_only;

        self.persist(&record).await?;
        info!(read_only, "session read-only mode changed");
        self.install(record);
        Ok(())
    }

    /// Set or clear a per-user read-only override. Overrides for the host
    /// sentinel are inert; the effective-flag lookup ignores them.
    pub async fn set_user_read_only(
        &self,
        participant: ParticipantId,
        read_only: Option<bool>,
    ) -> Result<(), SessionError> {
        let mut record = self.cached();
        match read_only {
            Some(is_read_only) => {
                record
                    .user_access_control
                    .insert(participant, AccessControl { is_read_only });
            }
            None => {
                record.user_access_control.remove(&participant);
            }
        }
        if record == self.cached() {
            return Ok(());
        }

        self.persist(&record).await?;
        info!(participant = %participant, override_ = ?read_only, "per-user access changed");
        self.install(record);
        Ok(())
    }

    async fn persist(&self, record: &AccessControlRecord) -> Result<(), SessionError> {
        let value = serde_json::to_value(record)?;
        self.settings
            .set(ACCESS_CONTROL_KEY, value)
            .await
            .map_err(SessionError::Storage)
    }

    pub fn changes(&self) -> &EventEmitter<AccessControlRecord> {
        &self.changed
    }

    pub fn read_only_changes(&self) -> &EventEmitter<bool> {
        &self.read_only_changed
    }
}

impl PolicyReader for HostPolicyStore {
    fn record(&self) -> AccessControlRecord {
        self.cached()
    }
}

// ---------------------------------------------------------------------------
// Guest side
// ---------------------------------------------------------------------------

/// Passive replica of the host's policy record. Updated only from host
/// notifications; guests never write policy.
pub struct GuestPolicyCache {
    context: Arc<SessionContext>,
    cache: RwLock<AccessControlRecord>,
    changed: EventEmitter<AccessControlRecord>,
    read_only_changed: EventEmitter<bool>,
}

impl GuestPolicyCache {
    pub fn new(context: Arc<SessionContext>) -> Self {
        Self {
            context,
            cache: RwLock::new(AccessControlRecord::default()),
            changed: EventEmitter::new(),
            read_only_changed: EventEmitter::new(),
        }
    }

    /// Install a record received from the host.
    pub fn apply_remote(&self, record: AccessControlRecord) {
        let previous = {
            let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *cache, record.clone())
        };
        let read_only = record.default_access_control.is_read_only;
        self.context.set_read_only(read_only);
        self.changed.emit(&record);
        if previous.default_access_control.is_read_only != read_only {
            self.read_only_changed.emit(&read_only);
        }
    }

    pub fn changes(&self) -> &EventEmitter<AccessControlRecord> {
        &self.changed
    }

    pub fn read_only_changes(&self) -> &EventEmitter<bool> {
        &self.read_only_changed
    }
}

impl PolicyReader for GuestPolicyCache {
    fn record(&self) -> AccessControlRecord {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
