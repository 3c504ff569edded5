//! Host-side admission control and access-request handling.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::FutureExt;
use tandem_common::ParticipantId;
use tandem_config::SessionConfig;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::access::grants::OperationAccessStore;
use crate::access::policy::{HostPolicyStore, PolicyReader};
use crate::access::types::{OperationAccess, OperationKey};
use crate::access::OperationName;
use crate::context::Collaborator;
use crate::error::ErrorCode;
use crate::protocol::{ClientCapabilities, GuestProfile};

/// One pending admission, consumed by a single approval pass.
#[derive(Debug, Clone)]
pub struct GuestApprovalRequest {
    pub participant_id: ParticipantId,
    pub profile: GuestProfile,
    pub capabilities: ClientCapabilities,
}

/// The host's answer to a join prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinDecision {
    Accept,
    Reject,
}

/// What the host clicked on a post-admission join notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostJoinAction {
    Dismiss,
    Reject,
}

/// Result of one admission pass.
#[derive(Debug, Clone)]
pub enum JoinOutcome {
    Admitted { collaborator: Collaborator },
    Rejected { code: ErrorCode, message: String },
}

impl JoinOutcome {
    fn rejected(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Rejected {
            code,
            message: message.into(),
        }
    }
}

/// Decision surface presented to the human host. Implementations bridge to
/// whatever front end is in use; the controller only awaits answers.
#[async_trait]
pub trait ApprovalUi: Send + Sync {
    /// Modal prompt for an explicit join approval. The admission pass
    /// blocks on this for as long as the human takes.
    async fn confirm_join(&self, guest: &GuestProfile) -> JoinDecision;

    /// Non-blocking notification that a guest was auto-admitted. Resolves
    /// to whatever the host eventually clicks; callers spawn this and
    /// react to a late [`PostJoinAction::Reject`] by removing the guest.
    async fn notify_joined(&self, collaborator: &Collaborator) -> PostJoinAction;
}

/// Host-side handler for one operation's access requests. Returns
/// `Some(true)` to grant, `Some(false)` to reject, `None` when the host
/// made no decision yet.
#[async_trait]
pub trait OperationAccessHandler: Send + Sync {
    async fn decide(
        &self,
        target: Option<&str>,
        participant: ParticipantId,
    ) -> Result<Option<bool>, String>;
}

/// Admission control and guest access-request dispatch on the host.
///
/// Owns the display-name disambiguation counters and the per-operation
/// handler registry. One instance lives for the whole hosted session.
pub struct HostApprovalController {
    config: SessionConfig,
    policy: Arc<HostPolicyStore>,
    grants: Arc<OperationAccessStore>,
    ui: Arc<dyn ApprovalUi>,
    handlers: RwLock<HashMap<OperationName, Arc<dyn OperationAccessHandler>>>,
    /// Seen-count per roster name. Approvals interleave across awaits; the
    /// mutex scopes each read-increment to one admission.
    name_counters: Mutex<HashMap<String, u32>>,
}

impl HostApprovalController {
    pub fn new(
        config: SessionConfig,
        policy: Arc<HostPolicyStore>,
        grants: Arc<OperationAccessStore>,
        ui: Arc<dyn ApprovalUi>,
    ) -> Self {
        Self {
            config,
            policy,
            grants,
            ui,
            handlers: RwLock::new(HashMap::new()),
            name_counters: Mutex::new(HashMap::new()),
        }
    }

    /// Register the access-request handler for one operation, replacing any
    /// previous registration.
    pub fn register_operation_handler(
        &self,
        operation: OperationName,
        handler: Arc<dyn OperationAccessHandler>,
    ) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(operation, handler);
    }

    /// Whether admissions currently require an explicit host approval.
    pub fn requires_approval(&self) -> bool {
        self.config.guest_approval_required
    }

    /// Run one admission pass: capability negotiation, then either an
    /// explicit approval prompt or an automatic admit.
    ///
    /// Capability checks run against the session's read-only policy before
    /// any prompt. An extension that cannot honor read-only produces a
    /// different rejection message than a client application that cannot,
    /// so the guest knows which piece of software to update.
    pub async fn approve_join(&self, request: GuestApprovalRequest) -> JoinOutcome {
        let read_only = self
            .policy
            .record()
            .default_access_control
            .is_read_only;

        if read_only && !request.capabilities.extension_read_only_support {
            info!(guest = %request.profile.display_name, "rejecting join: extension lacks read-only support");
            return JoinOutcome::rejected(
                ErrorCode::CollaborationSessionGuestRejectedWithSpecificReason,
                "This session is read-only. Update the collaboration extension to a version with read-only support and try again.",
            );
        }
        if read_only && !request.capabilities.client_read_only_support {
            info!(guest = %request.profile.display_name, "rejecting join: client lacks read-only support");
            return JoinOutcome::rejected(
                ErrorCode::CollaborationSessionGuestRejectedWithSpecificReason,
                "This session is read-only. Update your client application to a version with read-only support and try again.",
            );
        }

        if !self.config.guest_approval_required {
            let collaborator = self.admit(request).await;
            info!(guest = %collaborator.display_name, "guest auto-admitted");
            return JoinOutcome::Admitted { collaborator };
        }

        match self.ui.confirm_join(&request.profile).await {
            JoinDecision::Accept => {
                let collaborator = self.admit(request).await;
                info!(guest = %collaborator.display_name, "guest admitted by host");
                JoinOutcome::Admitted { collaborator }
            }
            JoinDecision::Reject => {
                info!(guest = %request.profile.display_name, "guest rejected by host");
                JoinOutcome::rejected(
                    ErrorCode::CollaborationSessionGuestRejected,
                    "The host rejected your request to join this session.",
                )
            }
        }
    }

    async fn admit(&self, request: GuestApprovalRequest) -> Collaborator {
        let display_name = self.disambiguate(&request.profile).await;
        Collaborator {
            id: request.participant_id,
            display_name,
            email: request.profile.email,
            joined_at: Utc::now(),
        }
    }

    /// Assign a unique roster name: the first `name (email)` keeps the bare
    /// form, later duplicates get a ` (n)` suffix.
    async fn disambiguate(&self, profile: &GuestProfile) -> String {
        let base = profile.roster_name();
        let mut counters = self.name_counters.lock().await;
        let seen = counters.entry(base.clone()).or_insert(0);
        let assigned = if *seen == 0 {
            base.clone()
        } else {
            format!("{base} ({seen})")
        };
        *seen += 1;
        assigned
    }

    /// Dispatch a guest's access request to the registered handler, if any.
    ///
    /// Fire-and-forget from the guest's perspective: outcomes are published
    /// through the operation-access store, never returned. A handler fault
    /// or panic is contained and treated as no decision.
    pub async fn handle_access_request(
        &self,
        operation: OperationName,
        target: Option<String>,
        participant: ParticipantId,
    ) {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&operation)
            .cloned();
        let Some(handler) = handler else {
            debug!(operation = %operation, "no access-request handler registered, ignoring");
            return;
        };

        let outcome =
            AssertUnwindSafe(handler.decide(target.as_deref(), participant))
                .catch_unwind()
                .await;
        let decision = match outcome {
            Ok(Ok(decision)) => decision,
            Ok(Err(error)) => {
                warn!(operation = %operation, error = %error, "access-request handler failed");
                None
            }
            Err(_) => {
                warn!(operation = %operation, "access-request handler panicked");
                None
            }
        };

        let Some(allowed) = decision else {
            debug!(operation = %operation, participant = %participant, "host made no access decision");
            return;
        };
        let access = if allowed {
            OperationAccess::Allowed
        } else {
            OperationAccess::ExplicitlyRejectedByHost
        };
        self.grants.set(OperationKey { name: operation, target }, access);
    }

    /// Spawnable post-admission notification. Resolves the UI toast and
    /// returns the action for the caller to apply.
    pub async fn notify_joined(&self, collaborator: &Collaborator) -> PostJoinAction {
        self.ui.notify_joined(collaborator).await
    }

    pub fn notify_on_join(&self) -> bool {
        self.config.notify_on_join
    }

    /// Forget per-session state. Name counters restart with the next
    /// session; handler registrations survive.
    pub async fn reset(&self) {
        self.name_counters.lock().await.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
