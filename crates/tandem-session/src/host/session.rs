//! Hosted session orchestration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tandem_common::ParticipantId;
use tandem_config::TandemConfig;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::access::gate::OperationGate;
use crate::access::grants::OperationAccessStore;
use crate::access::policy::{HostPolicyStore, PolicyReader, SettingsStore};
use crate::context::SessionContext;
use crate::error::{ErrorCode, SessionError};
use crate::host::approval::{
    ApprovalUi, GuestApprovalRequest, HostApprovalController, JoinOutcome, PostJoinAction,
};
use crate::lifecycle::machine::SessionStateMachine;
use crate::lifecycle::types::{SessionAction, SessionState, SessionStatus};
use crate::protocol::{ClientMessage, HostEndpoint, ServerMessage};

struct GuestLink {
    tx: mpsc::UnboundedSender<ServerMessage>,
}

/// Everything the host side of a session owns: lifecycle, policy, grants,
/// admission, and the per-guest links.
///
/// One task per connected guest runs [`serve_guest`](Self::serve_guest);
/// policy and grant changes fan out to every link through subscriptions
/// wired at construction.
pub struct HostSession {
    config: TandemConfig,
    context: Arc<SessionContext>,
    machine: Arc<SessionStateMachine>,
    policy: Arc<HostPolicyStore>,
    grants: Arc<OperationAccessStore>,
    approval: Arc<HostApprovalController>,
    guests: RwLock<HashMap<ParticipantId, GuestLink>>,
    next_guest_id: AtomicU32,
}

impl HostSession {
    pub fn new(
        config: TandemConfig,
        settings: Arc<dyn SettingsStore>,
        ui: Arc<dyn ApprovalUi>,
    ) -> Arc<Self> {
        let context = Arc::new(SessionContext::new());
        let machine = Arc::new(SessionStateMachine::new(Arc::clone(&context)));
        let policy = Arc::new(HostPolicyStore::new(
            settings,
            Arc::clone(&context),
            &config.access,
        ));
        let grants = Arc::new(OperationAccessStore::new());
        let approval = Arc::new(HostApprovalController::new(
            config.session.clone(),
            Arc::clone(&policy),
            Arc::clone(&grants),
            ui,
        ));
        let session = Arc::new(Self {
            config,
            context,
            machine,
            policy,
            grants,
            approval,
            guests: RwLock::new(HashMap::new()),
            next_guest_id: AtomicU32::new(ParticipantId::HOST.0 + 1),
        });
        session.wire_notifications();
        session
    }

    /// Fan policy and grant changes out to every connected guest. Held
    /// weakly so the subscriptions cannot keep the session alive.
    fn wire_notifications(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.policy.changes().subscribe(move |record| {
            if let Some(session) = weak.upgrade() {
                session.broadcast(ServerMessage::AccessControlChanged {
                    record: record.clone(),
                });
            }
        });

        let weak = Arc::downgrade(self);
        self.grants.changes().subscribe(move |change| {
            if let Some(session) = weak.upgrade() {
                session.broadcast(ServerMessage::OperationAccessChanged {
                    operation: change.key.name,
                    target: change.key.target.clone(),
                    access: change.access,
                });
            }
        });
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start hosting. Loads any persisted access policy while the share is
    /// in progress.
    pub async fn share(&self) -> Result<(), SessionError> {
        let state = self.machine.state();
        self.machine
            .transition(SessionAction::AttemptSharing)
            .ok_or(SessionError::NotApplicable {
                state,
                action: SessionAction::AttemptSharing,
            })?;
        self.machine.point(SessionStatus::SharingStarting);

        if let Err(err) = self.policy.refresh().await {
            warn!(error = %err, "could not load persisted access policy, sharing with defaults");
        }

        self.machine.transition(SessionAction::SharingSuccess);
        info!(session_id = %self.context.session_id(), "session shared");
        Ok(())
    }

    /// Stop hosting: tell every guest, then tear down session state.
    pub async fn end_sharing(&self) -> Result<(), SessionError> {
        let state = self.machine.state();
        if state != SessionState::Shared {
            return Err(SessionError::NotApplicable {
                state,
                action: SessionAction::EndSharing,
            });
        }
        self.broadcast(ServerMessage::SessionEnded);
        self.guests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.grants.clear();
        self.approval.reset().await;
        self.machine.transition(SessionAction::EndSharing);
        info!(session_id = %self.context.session_id(), "session ended");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Guest connections
    // -----------------------------------------------------------------------

    /// Drive one guest connection from hello to hangup. Spawned per
    /// incoming link; returns when the link closes or the guest leaves.
    pub async fn serve_guest(self: Arc<Self>, mut endpoint: HostEndpoint) {
        let Some(first) = endpoint.rx.recv().await else {
            return;
        };
        let ClientMessage::JoinRequest {
            profile,
            capabilities,
            correlation,
        } = first
        else {
            debug!("guest link opened without a join request, dropping");
            return;
        };
        debug!(guest = %profile.display_name, correlation = %correlation, "join request received");

        if self.machine.state() != SessionState::Shared {
            let _ = endpoint.tx.send(ServerMessage::JoinRejected {
                code: ErrorCode::CollaborationSessionGuestRejected,
                message: "No active collaboration session.".into(),
            });
            return;
        }
        let connected = self
            .guests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        if connected >= self.config.session.max_guests {
            info!(guest = %profile.display_name, "rejecting join: session is full");
            let _ = endpoint.tx.send(ServerMessage::JoinRejected {
                code: ErrorCode::CollaborationSessionGuestRejected,
                message: "The session is full.".into(),
            });
            return;
        }

        let participant_id = ParticipantId(self.next_guest_id.fetch_add(1, Ordering::SeqCst));
        if self.approval.requires_approval() {
            let _ = endpoint.tx.send(ServerMessage::StatusUpdate {
                status: SessionStatus::WaitingForHostApproval,
            });
        }

        let outcome = self
            .approval
            .approve_join(GuestApprovalRequest {
                participant_id,
                profile,
                capabilities,
            })
            .await;
        let collaborator = match outcome {
            JoinOutcome::Admitted { collaborator } => collaborator,
            JoinOutcome::Rejected { code, message } => {
                let _ = endpoint.tx.send(ServerMessage::JoinRejected { code, message });
                return;
            }
        };

        // The approval wait is unbounded; the session may have ended
        // underneath it.
        if self.machine.state() != SessionState::Shared {
            let _ = endpoint.tx.send(ServerMessage::JoinRejected {
                code: ErrorCode::CollaborationSessionGuestRejected,
                message: "The session ended before the join completed.".into(),
            });
            return;
        }

        self.guests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                participant_id,
                GuestLink {
                    tx: endpoint.tx.clone(),
                },
            );
        self.context.add_collaborator(collaborator.clone());

        let peers = self
            .context
            .collaborators()
            .into_iter()
            .filter(|c| c.id != participant_id)
            .collect();
        let _ = endpoint.tx.send(ServerMessage::JoinAccepted {
            participant_id,
            assigned_display_name: collaborator.display_name.clone(),
            access_control: self.policy.record(),
            operation_access: self.grants.snapshot(),
            collaborators: peers,
        });
        self.broadcast_except(
            participant_id,
            ServerMessage::CollaboratorJoined {
                collaborator: collaborator.clone(),
            },
        );
        info!(
            participant = %participant_id,
            guest = %collaborator.display_name,
            "guest joined"
        );

        if !self.approval.requires_approval() && self.approval.notify_on_join() {
            let session = Arc::clone(&self);
            let joined = collaborator.clone();
            tokio::spawn(async move {
                if session.approval.notify_joined(&joined).await == PostJoinAction::Reject {
                    info!(participant = %joined.id, "host rejected auto-admitted guest");
                    session
                        .remove_guest(joined.id, "The host removed you from this session.");
                }
            });
        }

        while let Some(message) = endpoint.rx.recv().await {
            match message {
                ClientMessage::AccessRequest {
                    operation,
                    target,
                    correlation,
                } => {
                    // Attribution comes from the link, not the payload.
                    debug!(
                        participant = %participant_id,
                        operation = %operation,
                        correlation = %correlation,
                        "access request received"
                    );
                    self.approval
                        .handle_access_request(operation, target, participant_id)
                        .await;
                }
                ClientMessage::Leave => break,
                ClientMessage::JoinRequest { .. } => {
                    debug!(participant = %participant_id, "duplicate join request, ignoring");
                }
            }
        }
        self.drop_guest(participant_id);
    }

    /// Eject a connected guest with a reason.
    pub fn remove_guest(&self, id: ParticipantId, message: impl Into<String>) {
        let link = self
            .guests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        let Some(link) = link else {
            return;
        };
        self.forget(id);
        let _ = link.tx.send(ServerMessage::Removed {
            message: message.into(),
        });
    }

    fn drop_guest(&self, id: ParticipantId) {
        let removed = self
            .guests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        if removed {
            self.forget(id);
        }
    }

    fn forget(&self, id: ParticipantId) {
        if self.context.remove_collaborator(id).is_some() {
            info!(participant = %id, "guest left");
            self.broadcast(ServerMessage::CollaboratorLeft { participant_id: id });
        }
    }

    fn broadcast(&self, message: ServerMessage) {
        let guests = self.guests.read().unwrap_or_else(PoisonError::into_inner);
        for link in guests.values() {
            let _ = link.tx.send(message.clone());
        }
    }

    fn broadcast_except(&self, skip: ParticipantId, message: ServerMessage) {
        let guests = self.guests.read().unwrap_or_else(PoisonError::into_inner);
        for (id, link) in guests.iter() {
            if *id != skip {
                let _ = link.tx.send(message.clone());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Operation gate bound to this hosted session. Fails outside `Shared`.
    pub fn gate(&self) -> Result<OperationGate, SessionError> {
        OperationGate::for_host(
            Arc::clone(&self.machine),
            Arc::clone(&self.policy) as Arc<dyn PolicyReader>,
        )
    }

    pub async fn set_read_only(&self, read_only: bool) -> Result<(), SessionError> {
        self.policy.set_read_only(read_only).await
    }

    pub fn machine(&self) -> &Arc<SessionStateMachine> {
        &self.machine
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    pub fn policy(&self) -> &Arc<HostPolicyStore> {
        &self.policy
    }

    pub fn grants(&self) -> &Arc<OperationAccessStore> {
        &self.grants
    }

    pub fn approval(&self) -> &Arc<HostApprovalController> {
        &self.approval
    }

    pub fn config(&self) -> &TandemConfig {
        &self.config
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
