//! Ephemeral per-session state shared across the core.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tandem_common::{ParticipantId, SessionId};

/// A remote participant as seen from this side of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collaborator {
    pub id: ParticipantId,
    /// Display name after host-side disambiguation.
    pub display_name: String,
    pub email: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ContextInner {
    collaborators: HashMap<ParticipantId, Collaborator>,
    read_only: bool,
    coediting_session: Option<String>,
}

/// Session-scoped mutable state: the collaborator roster, the effective
/// read-only flag, and the co-editing session identifier. One instance is
/// created per process and injected into every component that needs it;
/// nothing here is global.
///
/// All of it is cleared synchronously when the lifecycle leaves `Shared` or
/// `Joined`, before the corresponding state-changed notification fires.
#[derive(Debug)]
pub struct SessionContext {
    session_id: SessionId,
    inner: RwLock<ContextInner>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self {
            session_id: SessionId::new(),
            inner: RwLock::new(ContextInner::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ContextInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ContextInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    // -----------------------------------------------------------------------
    // Roster
    // -----------------------------------------------------------------------

    pub fn add_collaborator(&self, collaborator: Collaborator) {
        self.write()
            .collaborators
            .insert(collaborator.id, collaborator);
    }

    pub fn remove_collaborator(&self, id: ParticipantId) -> Option<Collaborator> {
        self.write().collaborators.remove(&id)
    }

    pub fn collaborator(&self, id: ParticipantId) -> Option<Collaborator> {
        self.read().collaborators.get(&id).cloned()
    }

    /// Snapshot of the roster, ordered by participant id.
    pub fn collaborators(&self) -> Vec<Collaborator> {
        let mut all: Vec<Collaborator> = self.read().collaborators.values().cloned().collect();
        all.sort_by_key(|c| c.id);
        all
    }

    pub fn collaborator_count(&self) -> usize {
        self.read().collaborators.len()
    }

    pub fn has_collaborators(&self) -> bool {
        !self.read().collaborators.is_empty()
    }

    // -----------------------------------------------------------------------
    // Read-only flag and co-editing id
    // -----------------------------------------------------------------------

    /// Cached session-level read-only flag. The authoritative value lives in
    /// the access policy store; this mirror exists for cheap synchronous
    /// reads.
    pub fn is_read_only(&self) -> bool {
        self.read().read_only
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.write().read_only = read_only;
    }

    pub fn coediting_session(&self) -> Option<String> {
        self.read().coediting_session.clone()
    }

    pub fn set_coediting_session(&self, id: Option<String>) {
        self.write().coediting_session = id;
    }

    /// Clear all ephemeral session data. Runs synchronously inside the
    /// lifecycle transition, before any state-changed notification fires.
    pub fn reset(&self) {
        let mut inner = self.write();
        inner.collaborators.clear();
        inner.read_only = false;
        inner.coediting_session = None;
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
