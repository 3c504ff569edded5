//! Lifecycle state, action, and status types.

use serde::{Deserialize, Serialize};

/// Overall collaboration state of this process, whether acting as host or
/// guest. Exactly one state holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Startup, before the sign-in check has run.
    Initializing,
    SignedOut,
    /// Interactive sign-in in progress.
    SigningIn,
    /// Waiting on an external browser or token flow.
    ExternallySigningIn,
    SignedIn,
    SharingInProgress,
    /// Hosting an active session.
    Shared,
    JoiningInProgress,
    /// Participating in someone else's session.
    Joined,
}

impl SessionState {
    /// States in which ephemeral collaboration data (roster, read-only flag,
    /// co-editing identifier) is live.
    pub fn is_collaborating(self) -> bool {
        matches!(self, Self::Shared | Self::Joined)
    }
}

/// Triggers fed to the state machine. An action with no transition from the
/// current state is a silent no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionAction {
    AttemptSharing,
    SharingError,
    SharingSuccess,
    EndSharing,
    Unjoin,
    AttemptJoining,
    JoiningError,
    /// Join accepted but the workspace needs a reload before it applies.
    JoiningPendingReload,
    JoiningSuccess,
    AttemptSignIn,
    AwaitExternalSignIn,
    SignInError,
    SignInSuccess,
    SignOut,
}

/// Payload of a state-changed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub state: SessionState,
    pub previous: SessionState,
}

/// Finer-grained progress points pushed on the status channel while a
/// long-running flow is inside a single state. Distinct from state changes;
/// consumers of one never see the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    SigningIn,
    SharingStarting,
    WaitingForHostApproval,
    JoiningWorkspace,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collaborating_states() {
        assert!(SessionState::Shared.is_collaborating());
        assert!(SessionState::Joined.is_collaborating());
        assert!(!SessionState::SharingInProgress.is_collaborating());
        assert!(!SessionState::SignedIn.is_collaborating());
        assert!(!SessionState::Initializing.is_collaborating());
    }

    #[test]
    fn state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SessionState::SharingInProgress).unwrap(),
            "\"sharing_in_progress\""
        );
        assert_eq!(
            serde_json::to_string(&SessionStatus::WaitingForHostApproval).unwrap(),
            "\"waiting_for_host_approval\""
        );
    }
}
