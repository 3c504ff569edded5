//! Access-control data model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tandem_common::ParticipantId;

use crate::access::operation::OperationName;

/// Read-only flag for one participant or for the session default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    #[serde(default)]
    pub is_read_only: bool,
}

impl AccessControl {
    pub fn read_only() -> Self {
        Self { is_read_only: true }
    }
}

/// The host-owned access policy: one session-wide default plus per-user
/// overrides. Persisted as a single record in the settings store and
/// replicated to guests over the session channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlRecord {
    #[serde(default)]
    pub default_access_control: AccessControl,
    #[serde(default)]
    pub user_access_control: BTreeMap<ParticipantId, AccessControl>,
}

impl AccessControlRecord {
    /// Effective read-only flag for `participant`: the per-user override if
    /// present, otherwise the session default. The host sentinel is never
    /// read-only regardless of record content.
    pub fn is_read_only(&self, participant: ParticipantId) -> bool {
        if participant.is_host() {
            return false;
        }
        self.user_access_control
            .get(&participant)
            .map(|access| access.is_read_only)
            .unwrap_or(self.default_access_control.is_read_only)
    }
}

/// Participant attribution for a gated call, normalized at the protocol
/// boundary. The core never sees raw wire shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantContext {
    /// Attributed to a specific session participant.
    Participant(ParticipantId),
    /// No participant could be resolved from the call context.
    Unattributed,
}

impl ParticipantContext {
    pub fn participant(&self) -> Option<ParticipantId> {
        match self {
            Self::Participant(id) => Some(*id),
            Self::Unattributed => None,
        }
    }

    pub fn host() -> Self {
        Self::Participant(ParticipantId::HOST)
    }
}

impl From<ParticipantId> for ParticipantContext {
    fn from(id: ParticipantId) -> Self {
        Self::Participant(id)
    }
}

/// Host decision state for one dynamically gated operation instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationAccess {
    Allowed,
    ExplicitlyRejectedByHost,
    DisabledByHostConfiguration,
}

impl OperationAccess {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::ExplicitlyRejectedByHost)
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::DisabledByHostConfiguration)
    }
}

/// Identifies one gated operation instance: the operation name plus an
/// optional per-target discriminator (e.g. a terminal id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationKey {
    pub name: OperationName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl OperationKey {
    pub fn new(name: OperationName) -> Self {
        Self { name, target: None }
    }

    pub fn with_target(name: OperationName, target: impl Into<String>) -> Self {
        Self {
            name,
            target: Some(target.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_record_is_writable() {
        let record = AccessControlRecord::default();
        assert!(!record.is_read_only(ParticipantId(7)));
    }

    #[test]
    fn per_user_override_beats_default() {
        let mut record = AccessControlRecord::default();
        record.default_access_control = AccessControl::read_only();
        record
            .user_access_control
            .insert(ParticipantId(3), AccessControl::default());

        assert!(record.is_read_only(ParticipantId(2)));
        assert!(!record.is_read_only(ParticipantId(3)));
    }

    #[test]
    fn host_is_never_read_only() {
        let mut record = AccessControlRecord::default();
        record.default_access_control = AccessControl::read_only();
        record
            .user_access_control
            .insert(ParticipantId::HOST, AccessControl::read_only());

        assert!(!record.is_read_only(ParticipantId::HOST));
    }

    #[test]
    fn record_round_trips_through_json() {
        let mut record = AccessControlRecord::default();
        record.default_access_control = AccessControl::read_only();
        record
            .user_access_control
            .insert(ParticipantId(4), AccessControl::default());

        let json = serde_json::to_string(&record).unwrap();
        let back: AccessControlRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn record_tolerates_missing_fields() {
        let record: AccessControlRecord = serde_json::from_str("{}").unwrap();
        assert_eq!(record, AccessControlRecord::default());
    }

    #[test]
    fn participant_context_resolution() {
        let ctx = ParticipantContext::Participant(ParticipantId(9));
        assert_eq!(ctx.participant(), Some(ParticipantId(9)));
        assert_eq!(ParticipantContext::Unattributed.participant(), None);
        assert_eq!(
            ParticipantContext::host().participant(),
            Some(ParticipantId::HOST)
        );
    }

    #[test]
    fn operation_key_serde_omits_absent_target() {
        let bare = OperationKey::new(OperationName::Edit);
        assert_eq!(serde_json::to_string(&bare).unwrap(), "{\"name\":\"edit\"}");

        let targeted = OperationKey::with_target(OperationName::WriteToSharedTerminal, "t1");
        let json = serde_json::to_string(&targeted).unwrap();
        let back: OperationKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, targeted);
    }
}
