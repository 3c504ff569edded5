//! Dynamic per-operation access store and shared-terminal gate wiring.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tandem_common::EventEmitter;
use tandem_config::TerminalConfig;
use tracing::{debug, info};

use crate::access::operation::{Enablement, OperationName, RestrictedOperation};
use crate::access::types::{OperationAccess, OperationKey};
use crate::error::{ErrorCode, ErrorDetail};

/// Notification payload for one access entry, also usable as a wire
/// snapshot element.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OperationAccessChange {
    pub key: OperationKey,
    pub access: OperationAccess,
}

/// Mutable map of host decisions keyed by operation instance.
///
/// On the host this is the authority: entries are created lazily on first
/// evaluation and overwritten by explicit host decisions. On guests it is a
/// replica fed from host notifications. Every [`set`](Self::set) and
/// [`apply_remote`](Self::apply_remote) emits a change, including repeats
/// of the same value; deduplication is the consumer's concern.
pub struct OperationAccessStore {
    entries: RwLock<HashMap<OperationKey, OperationAccess>>,
    changed: EventEmitter<OperationAccessChange>,
}

impl OperationAccessStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            changed: EventEmitter::new(),
        }
    }

    pub fn get(&self, key: &OperationKey) -> Option<OperationAccess> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }

    /// Current access for `key`, creating the entry with `initial` on first
    /// evaluation. Creation is not a host decision and emits no change.
    pub fn evaluate(
        &self,
        key: &OperationKey,
        initial: impl FnOnce() -> OperationAccess,
    ) -> OperationAccess {
        if let Some(access) = self.get(key) {
            return access;
        }
        *self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_insert_with(initial)
    }

    /// Record a host decision and notify subscribers.
    pub fn set(&self, key: OperationKey, access: OperationAccess) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), access);
        info!(operation = %key.name, target = ?key.target, access = ?access, "operation access set");
        self.changed.emit(&OperationAccessChange { key, access });
    }

    /// Install an entry received from the host and re-emit it locally.
    pub fn apply_remote(&self, change: OperationAccessChange) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(change.key.clone(), change.access);
        debug!(operation = %change.key.name, access = ?change.access, "operation access replicated");
        self.changed.emit(&change);
    }

    /// All current entries, ordered by key, for the join snapshot.
    pub fn snapshot(&self) -> Vec<OperationAccessChange> {
        let mut all: Vec<OperationAccessChange> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(key, access)| OperationAccessChange {
                key: key.clone(),
                access: *access,
            })
            .collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Drop all entries. Called at session end; emits nothing.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn changes(&self) -> &EventEmitter<OperationAccessChange> {
        &self.changed
    }
}

impl Default for OperationAccessStore {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Shared-terminal gates
// ---------------------------------------------------------------------------

/// Access for a terminal nobody has decided on yet, derived from host
/// configuration.
pub fn initial_terminal_access(config: &TerminalConfig) -> OperationAccess {
    if !config.shared_write_enabled {
        OperationAccess::DisabledByHostConfiguration
    } else if config.guest_write_by_default {
        OperationAccess::Allowed
    } else {
        OperationAccess::ExplicitlyRejectedByHost
    }
}

fn terminal_denial(access: OperationAccess) -> Enablement {
    match access {
        OperationAccess::Allowed => Enablement::Enabled,
        OperationAccess::ExplicitlyRejectedByHost => Enablement::DisabledBecause(
            ErrorDetail::new(
                ErrorCode::OperationRejected,
                "The host has not granted write access to this terminal.",
            ),
        ),
        OperationAccess::DisabledByHostConfiguration => Enablement::DisabledBecause(
            ErrorDetail::new(
                ErrorCode::OperationRejected,
                "Shared terminal writes are disabled by the host's configuration.",
            ),
        ),
    }
}

/// Host-side write gate for one shared terminal. First evaluation seeds the
/// store entry from configuration; later host decisions take over.
pub fn host_terminal_write(
    terminal_id: impl Into<String>,
    store: Arc<OperationAccessStore>,
    config: &TerminalConfig,
) -> RestrictedOperation {
    let target = terminal_id.into();
    let key = OperationKey::with_target(OperationName::WriteToSharedTerminal, target.clone());
    let initial = initial_terminal_access(config);
    RestrictedOperation::new(OperationName::WriteToSharedTerminal)
        .with_target(target)
        .with_enablement(move || terminal_denial(store.evaluate(&key, || initial)))
}

/// Guest-side write gate for one shared terminal, backed by the replica.
/// An entry the host has not published yet counts as enabled; the host
/// re-verifies every write on its own side.
pub fn guest_terminal_write(
    terminal_id: impl Into<String>,
    store: Arc<OperationAccessStore>,
) -> RestrictedOperation {
    let target = terminal_id.into();
    let key = OperationKey::with_target(OperationName::WriteToSharedTerminal, target.clone());
    RestrictedOperation::new(OperationName::WriteToSharedTerminal)
        .with_target(target)
        .with_enablement(move || match store.get(&key) {
            None | Some(OperationAccess::Allowed) => Enablement::Enabled,
            Some(denied) => terminal_denial(denied),
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
