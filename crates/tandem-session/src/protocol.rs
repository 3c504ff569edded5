//! Wire protocol between host and guests.
//!
//! Messages ride any ordered, reliable duplex channel; the transport itself
//! lives outside this crate. [`loopback`] provides the in-process pairing
//! used by tests and single-machine setups.

use serde::{Deserialize, Serialize};
use tandem_common::ParticipantId;
use tokio::sync::mpsc;

use crate::access::grants::OperationAccessChange;
use crate::access::types::{AccessControlRecord, OperationAccess, ParticipantContext};
use crate::access::OperationName;
use crate::context::Collaborator;
use crate::error::ErrorCode;
use crate::lifecycle::types::SessionStatus;

/// Who a guest claims to be when joining.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestProfile {
    pub display_name: String,
    pub email: String,
}

impl GuestProfile {
    pub fn new(display_name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            email: email.into(),
        }
    }

    /// Roster display form: `name (email)`, or the bare name when no email
    /// is known. Host-side disambiguation counters key off this string.
    pub fn roster_name(&self) -> String {
        if self.email.is_empty() {
            self.display_name.clone()
        } else {
            format!("{} ({})", self.display_name, self.email)
        }
    }
}

/// What the joining client's software can do. Checked against session
/// policy at admission; an incapable client is rejected outright rather
/// than admitted into a session it cannot honor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// The client application understands read-only sessions.
    pub client_read_only_support: bool,
    /// The collaboration extension understands read-only sessions.
    pub extension_read_only_support: bool,
}

impl Default for ClientCapabilities {
    fn default() -> Self {
        Self {
            client_read_only_support: true,
            extension_read_only_support: true,
        }
    }
}

/// Guest to host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinRequest {
        profile: GuestProfile,
        capabilities: ClientCapabilities,
        correlation: String,
    },
    /// Fire-and-forget request for access to a gated operation.
    AccessRequest {
        operation: OperationName,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        correlation: String,
    },
    Leave,
}

/// Host to guest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    JoinAccepted {
        participant_id: ParticipantId,
        /// Roster name after disambiguation.
        assigned_display_name: String,
        access_control: AccessControlRecord,
        operation_access: Vec<OperationAccessChange>,
        collaborators: Vec<Collaborator>,
    },
    JoinRejected {
        code: ErrorCode,
        message: String,
    },
    AccessControlChanged {
        record: AccessControlRecord,
    },
    OperationAccessChanged {
        operation: OperationName,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        access: OperationAccess,
    },
    StatusUpdate {
        status: SessionStatus,
    },
    CollaboratorJoined {
        collaborator: Collaborator,
    },
    CollaboratorLeft {
        participant_id: ParticipantId,
    },
    /// The host removed this guest.
    Removed {
        message: String,
    },
    SessionEnded,
}

/// Participant attribution as it arrives at the RPC boundary. Peers encode
/// it inconsistently; [`resolve`](Self::resolve) normalizes every shape
/// into a [`ParticipantContext`] so the core never branches on wire form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireParticipantRef {
    Numeric(u32),
    Text(String),
    Tagged { participant_id: ParticipantId },
}

impl WireParticipantRef {
    pub fn resolve(&self) -> ParticipantContext {
        match self {
            Self::Numeric(id) => ParticipantContext::Participant(ParticipantId(*id)),
            Self::Text(raw) => raw
                .parse::<u32>()
                .map(|id| ParticipantContext::Participant(ParticipantId(id)))
                .unwrap_or(ParticipantContext::Unattributed),
            Self::Tagged { participant_id } => ParticipantContext::Participant(*participant_id),
        }
    }
}

// ---------------------------------------------------------------------------
// In-process transport
// ---------------------------------------------------------------------------

/// Guest end of an in-process session link.
pub struct GuestEndpoint {
    pub tx: mpsc::UnboundedSender<ClientMessage>,
    pub rx: mpsc::UnboundedReceiver<ServerMessage>,
}

/// Host end of an in-process session link, one per guest.
pub struct HostEndpoint {
    pub tx: mpsc::UnboundedSender<ServerMessage>,
    pub rx: mpsc::UnboundedReceiver<ClientMessage>,
}

/// Paired in-process endpoints for one host-guest link.
pub fn loopback() -> (HostEndpoint, GuestEndpoint) {
    let (client_tx, client_rx) = mpsc::unbounded_channel();
    let (server_tx, server_rx) = mpsc::unbounded_channel();
    (
        HostEndpoint {
            tx: server_tx,
            rx: client_rx,
        },
        GuestEndpoint {
            tx: client_tx,
            rx: server_rx,
        },
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
