//! Host side: admission control and session orchestration.

pub mod approval;
pub mod session;

pub use approval::{
    ApprovalUi, GuestApprovalRequest, HostApprovalController, JoinDecision, JoinOutcome,
    OperationAccessHandler, PostJoinAction,
};
pub use session::HostSession;
