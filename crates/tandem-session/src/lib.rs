//! Collaborative session core: lifecycle state machine, access policy,
//! operation gating, host admission, and guest access requests.
//!
//! A session has one host and any number of guests. The host owns the
//! authoritative access policy and all admission decisions; guests hold
//! passive replicas kept in sync over the session channel. Both sides gate
//! restricted operations through [`OperationGate`] against their local view.

pub mod access;
pub mod context;
pub mod error;
pub mod guest;
pub mod host;
pub mod lifecycle;
pub mod protocol;

pub use access::{
    build, code_action, debug_continue, debug_evaluate, debug_set_variable, edit, file_access,
    guest_terminal_write, host_terminal_write, initial_terminal_access, launch_debug, run_task,
    AccessControl, AccessControlRecord, Decision, DenialReason, DenialRecord, Enablement,
    GateRole, GuestPolicyCache, HostPolicyStore, MemorySettingsStore, OperationAccess,
    OperationAccessChange, OperationAccessStore, OperationGate, OperationKey, OperationName,
    ParticipantContext, PolicyReader, RestrictedOperation, SettingsStore,
};
pub use context::{Collaborator, SessionContext};
pub use error::{ErrorCode, ErrorDetail, SessionError};
pub use guest::{AccessRequestEvent, GuestAccessRequestClient, GuestSession};
pub use host::{
    ApprovalUi, GuestApprovalRequest, HostApprovalController, HostSession, JoinDecision,
    JoinOutcome, OperationAccessHandler, PostJoinAction,
};
pub use lifecycle::{
    interactive_sign_in, silent_sign_in, SessionAction, SessionState, SessionStateMachine,
    SessionStatus, StateChange,
};
pub use protocol::{
    loopback, ClientCapabilities, ClientMessage, GuestEndpoint, GuestProfile, HostEndpoint,
    ServerMessage, WireParticipantRef,
};
