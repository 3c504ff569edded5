//! Access control: policy records, restricted operations, and the gate.

pub mod gate;
pub mod grants;
pub mod operation;
pub mod policy;
pub mod types;

pub use gate::{Decision, DenialReason, DenialRecord, GateRole, OperationGate};
pub use grants::{
    guest_terminal_write, host_terminal_write, initial_terminal_access, OperationAccessChange,
    OperationAccessStore,
};
pub use operation::{
    build, code_action, debug_continue, debug_evaluate, debug_set_variable, edit, file_access,
    launch_debug, run_task, Enablement, OperationName, RestrictedOperation,
};
pub use policy::{
    GuestPolicyCache, HostPolicyStore, MemorySettingsStore, PolicyReader, SettingsStore,
    ACCESS_CONTROL_KEY,
};
pub use types::{
    AccessControl, AccessControlRecord, OperationAccess, OperationKey, ParticipantContext,
};
