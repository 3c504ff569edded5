//! Session error types and the stable wire error codes.

use serde::{Deserialize, Serialize};

use crate::lifecycle::types::{SessionAction, SessionState};

/// Error codes that cross the wire. Serialized verbatim; these strings are
/// part of the protocol contract and must not be renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    OperationRejectedInReadOnlySession,
    OperationRejected,
    CollaborationSessionGuestRejected,
    CollaborationSessionGuestRejectedWithSpecificReason,
}

/// Structured code plus human-readable message, produced by enablement
/// predicates that want to explain themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Errors surfaced by the session core.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A gated operation was refused. Carries the stable wire code so RPC
    /// layers can serialize it unchanged.
    #[error("{message}")]
    Operation { code: ErrorCode, message: String },

    /// A join attempt was refused by the host.
    #[error("{message}")]
    GuestRejected { code: ErrorCode, message: String },

    /// The operation gate only exists while a collaboration is active.
    #[error("operation gate is not available in session state {state:?}")]
    GateUnavailable { state: SessionState },

    /// The requested lifecycle action has no transition from the current
    /// state.
    #[error("action {action:?} is not applicable in session state {state:?}")]
    NotApplicable {
        state: SessionState,
        action: SessionAction,
    },

    /// Read-only mode cannot change while guests are connected.
    #[error("cannot change read-only mode while guests are connected")]
    ReadOnlyLocked,

    /// The collaborator-owned settings store failed.
    #[error("settings store error: {0}")]
    Storage(String),

    /// A persisted or wire payload did not parse.
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// The peer link closed mid-call.
    #[error("session channel closed")]
    ChannelClosed,

    /// The flow was cancelled locally before completing.
    #[error("cancelled")]
    Cancelled,
}

impl SessionError {
    /// Wire code for errors that carry one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Operation { code, .. } | Self::GuestRejected { code, .. } => Some(*code),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
