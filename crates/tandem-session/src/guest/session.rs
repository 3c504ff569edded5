//! Guest-side session: join flow and host-notification pump.

use std::sync::{Arc, PoisonError, RwLock};

use tandem_common::ParticipantId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::access::gate::OperationGate;
use crate::access::grants::{OperationAccessChange, OperationAccessStore};
use crate::access::policy::{GuestPolicyCache, PolicyReader};
use crate::access::types::{OperationKey, ParticipantContext};
use crate::context::{Collaborator, SessionContext};
use crate::error::SessionError;
use crate::guest::requests::GuestAccessRequestClient;
use crate::lifecycle::machine::SessionStateMachine;
use crate::lifecycle::types::{SessionAction, SessionState, SessionStatus};
use crate::protocol::{
    ClientCapabilities, ClientMessage, GuestEndpoint, GuestProfile, ServerMessage,
};

/// Everything the guest side of a session owns: lifecycle, the policy
/// replica, the grant replica, and the access-request client.
///
/// [`join`](Self::join) drives admission; afterwards
/// [`spawn_pump`](Self::spawn_pump) keeps the replicas in sync with host
/// notifications until the link closes.
pub struct GuestSession {
    context: Arc<SessionContext>,
    machine: Arc<SessionStateMachine>,
    policy: Arc<GuestPolicyCache>,
    grants: Arc<OperationAccessStore>,
    requests: Arc<GuestAccessRequestClient>,
    tx: mpsc::UnboundedSender<ClientMessage>,
    participant_id: RwLock<Option<ParticipantId>>,
}

impl GuestSession {
    pub fn new(tx: mpsc::UnboundedSender<ClientMessage>) -> Arc<Self> {
        let context = Arc::new(SessionContext::new());
        let machine = Arc::new(SessionStateMachine::new(Arc::clone(&context)));
        let policy = Arc::new(GuestPolicyCache::new(Arc::clone(&context)));
        Arc::new(Self {
            context,
            machine,
            policy,
            grants: Arc::new(OperationAccessStore::new()),
            requests: Arc::new(GuestAccessRequestClient::new(tx.clone())),
            tx,
            participant_id: RwLock::new(None),
        })
    }

    /// Request admission and wait for the host's verdict.
    ///
    /// Progress updates forwarded by the host surface on the status
    /// channel. Cancellation wins the race with an in-flight verdict: the
    /// join fails locally and any late host answer is ignored by the pump.
    pub async fn join(
        &self,
        endpoint: &mut GuestEndpoint,
        profile: GuestProfile,
        capabilities: ClientCapabilities,
        cancel: &CancellationToken,
    ) -> Result<Collaborator, SessionError> {
        let state = self.machine.state();
        self.machine
            .transition(SessionAction::AttemptJoining)
            .ok_or(SessionError::NotApplicable {
                state,
                action: SessionAction::AttemptJoining,
            })?;

        let email = profile.email.clone();
        endpoint
            .tx
            .send(ClientMessage::JoinRequest {
                profile,
                capabilities,
                correlation: tandem_common::new_correlation_id(),
            })
            .map_err(|_| {
                self.machine.transition(SessionAction::JoiningError);
                SessionError::ChannelClosed
            })?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("join cancelled");
                    self.machine.transition(SessionAction::JoiningError);
                    return Err(SessionError::Cancelled);
                }
                message = endpoint.rx.recv() => match message {
                    None => {
                        self.machine.transition(SessionAction::JoiningError);
                        return Err(SessionError::ChannelClosed);
                    }
                    Some(ServerMessage::StatusUpdate { status }) => {
                        self.machine.point(status);
                    }
                    Some(ServerMessage::JoinAccepted {
                        participant_id,
                        assigned_display_name,
                        access_control,
                        operation_access,
                        collaborators,
                    }) => {
                        *self
                            .participant_id
                            .write()
                            .unwrap_or_else(PoisonError::into_inner) = Some(participant_id);
                        self.policy.apply_remote(access_control);
                        for change in operation_access {
                            self.grants.apply_remote(change);
                        }
                        for collaborator in collaborators {
                            self.context.add_collaborator(collaborator);
                        }
                        self.machine.point(SessionStatus::JoiningWorkspace);
                        self.machine.transition(SessionAction::JoiningSuccess);
                        let own = Collaborator {
                            id: participant_id,
                            display_name: assigned_display_name,
                            email,
                            joined_at: chrono::Utc::now(),
                        };
                        info!(
                            participant = %participant_id,
                            display_name = %own.display_name,
                            "joined session"
                        );
                        return Ok(own);
                    }
                    Some(ServerMessage::JoinRejected { code, message }) => {
                        info!(code = ?code, "join rejected by host");
                        self.machine.transition(SessionAction::JoiningError);
                        return Err(SessionError::GuestRejected { code, message });
                    }
                    Some(other) => {
                        debug!(message = ?other, "unexpected message before join completion, ignoring");
                    }
                }
            }
        }
    }

    /// Consume the endpoint's receive half and process host notifications
    /// until the link closes.
    pub fn spawn_pump(
        self: &Arc<Self>,
        rx: mpsc::UnboundedReceiver<ServerMessage>,
    ) -> tokio::task::JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move { session.pump(rx).await })
    }

    async fn pump(&self, mut rx: mpsc::UnboundedReceiver<ServerMessage>) {
        while let Some(message) = rx.recv().await {
            self.dispatch(message);
        }
        // The link dropping out from under an active session is a failure,
        // not a leave.
        if self.machine.state() == SessionState::Joined {
            warn!("host link lost");
            self.machine.transition(SessionAction::JoiningError);
            self.clear_replicas();
        }
    }

    fn dispatch(&self, message: ServerMessage) {
        match message {
            ServerMessage::AccessControlChanged { record } => {
                self.policy.apply_remote(record);
            }
            ServerMessage::OperationAccessChanged {
                operation,
                target,
                access,
            } => {
                let key = OperationKey {
                    name: operation,
                    target,
                };
                self.grants.apply_remote(OperationAccessChange { key: key.clone(), access });
                self.requests.handle_access_changed(key, access);
            }
            ServerMessage::StatusUpdate { status } => {
                self.machine.point(status);
            }
            ServerMessage::CollaboratorJoined { collaborator } => {
                debug!(participant = %collaborator.id, "collaborator joined");
                self.context.add_collaborator(collaborator);
            }
            ServerMessage::CollaboratorLeft { participant_id } => {
                debug!(participant = %participant_id, "collaborator left");
                self.context.remove_collaborator(participant_id);
            }
            ServerMessage::SessionEnded => {
                info!("host ended the session");
                self.machine.transition(SessionAction::Unjoin);
                self.clear_replicas();
            }
            ServerMessage::Removed { message } => {
                warn!(reason = %message, "removed from session by host");
                self.machine.transition(SessionAction::Unjoin);
                self.clear_replicas();
            }
            ServerMessage::JoinAccepted { .. } | ServerMessage::JoinRejected { .. } => {
                debug!("stray join verdict after admission, ignoring");
            }
        }
    }

    /// Leave voluntarily.
    pub fn leave(&self) -> Result<(), SessionError> {
        let state = self.machine.state();
        self.machine
            .transition(SessionAction::Unjoin)
            .ok_or(SessionError::NotApplicable {
                state,
                action: SessionAction::Unjoin,
            })?;
        let _ = self.tx.send(ClientMessage::Leave);
        self.clear_replicas();
        Ok(())
    }

    fn clear_replicas(&self) {
        self.grants.clear();
        self.requests.reset();
        *self
            .participant_id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Operation gate bound to this joined session. Fails outside `Joined`.
    pub fn gate(&self) -> Result<OperationGate, SessionError> {
        OperationGate::for_guest(
            Arc::clone(&self.machine),
            Arc::clone(&self.policy) as Arc<dyn PolicyReader>,
        )
    }

    /// This guest's own attribution for gated calls.
    pub fn own_context(&self) -> ParticipantContext {
        match *self
            .participant_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
        {
            Some(id) => ParticipantContext::Participant(id),
            None => ParticipantContext::Unattributed,
        }
    }

    pub fn participant_id(&self) -> Option<ParticipantId> {
        *self
            .participant_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn machine(&self) -> &Arc<SessionStateMachine> {
        &self.machine
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    pub fn policy(&self) -> &Arc<GuestPolicyCache> {
        &self.policy
    }

    pub fn grants(&self) -> &Arc<OperationAccessStore> {
        &self.grants
    }

    pub fn requests(&self) -> &Arc<GuestAccessRequestClient> {
        &self.requests
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::access::policy::{MemorySettingsStore, SettingsStore};
    use crate::access::types::{AccessControlRecord, OperationAccess};
    use crate::access::OperationName;
    use crate::error::ErrorCode;
    use crate::guest::requests::AccessRequestEvent;
    use crate::host::approval::{
        ApprovalUi, JoinDecision, OperationAccessHandler, PostJoinAction,
    };
    use crate::host::session::HostSession;
    use crate::protocol::loopback;
    use tandem_config::TandemConfig;

    /// Host UI that answers join prompts with a fixed decision, or never
    /// answers when none is scripted.
    struct HostUi {
        decision: Option<JoinDecision>,
    }

    #[async_trait]
    impl ApprovalUi for HostUi {
        async fn confirm_join(&self, _guest: &GuestProfile) -> JoinDecision {
            match self.decision {
                Some(decision) => decision,
                None => std::future::pending().await,
            }
        }

        async fn notify_joined(&self, _collaborator: &Collaborator) -> PostJoinAction {
            PostJoinAction::Dismiss
        }
    }

    struct GrantingHandler;

    #[async_trait]
    impl OperationAccessHandler for GrantingHandler {
        async fn decide(
            &self,
            _target: Option<&str>,
            _participant: ParticipantId,
        ) -> Result<Option<bool>, String> {
            Ok(Some(true))
        }
    }

    async fn shared_host(config: TandemConfig, decision: Option<JoinDecision>) -> Arc<HostSession> {
        let host = HostSession::new(
            config,
            Arc::new(MemorySettingsStore::new()) as Arc<dyn SettingsStore>,
            Arc::new(HostUi { decision }),
        );
        host.machine().transition(SessionAction::SignInSuccess);
        host.share().await.unwrap();
        host
    }

    fn auto_admit_config() -> TandemConfig {
        let mut config = TandemConfig::default();
        config.session.guest_approval_required = false;
        config.session.notify_on_join = false;
        config
    }

    fn signed_in_guest(host: &Arc<HostSession>) -> (Arc<GuestSession>, GuestEndpoint) {
        let (host_end, guest_end) = loopback();
        tokio::spawn(Arc::clone(host).serve_guest(host_end));
        let guest = GuestSession::new(guest_end.tx.clone());
        guest.machine().transition(SessionAction::SignInSuccess);
        (guest, guest_end)
    }

    async fn joined_pair() -> (Arc<HostSession>, Arc<GuestSession>) {
        let host = shared_host(auto_admit_config(), None).await;
        let (guest, mut endpoint) = signed_in_guest(&host);
        guest
            .join(
                &mut endpoint,
                GuestProfile::new("Ana", "ana@x.com"),
                ClientCapabilities::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        guest.spawn_pump(endpoint.rx);
        (host, guest)
    }

    #[tokio::test]
    async fn join_round_trip_applies_the_snapshot() {
        let host = shared_host(auto_admit_config(), None).await;
        host.grants().set(
            OperationKey::with_target(OperationName::WriteToSharedTerminal, "terminal-1"),
            OperationAccess::ExplicitlyRejectedByHost,
        );

        let (guest, mut endpoint) = signed_in_guest(&host);
        let me = guest
            .join(
                &mut endpoint,
                GuestProfile::new("Ana", "ana@x.com"),
                ClientCapabilities::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(me.id, ParticipantId(2));
        assert_eq!(me.display_name, "Ana (ana@x.com)");
        assert_eq!(guest.machine().state(), SessionState::Joined);
        assert_eq!(guest.participant_id(), Some(ParticipantId(2)));
        assert_eq!(
            guest.own_context(),
            ParticipantContext::Participant(ParticipantId(2))
        );
        assert_eq!(
            guest.grants().get(&OperationKey::with_target(
                OperationName::WriteToSharedTerminal,
                "terminal-1"
            )),
            Some(OperationAccess::ExplicitlyRejectedByHost)
        );
    }

    #[tokio::test]
    async fn join_requires_signed_in() {
        let host = shared_host(auto_admit_config(), None).await;
        let (host_end, mut endpoint) = loopback();
        tokio::spawn(Arc::clone(&host).serve_guest(host_end));
        let guest = GuestSession::new(endpoint.tx.clone());

        let err = guest
            .join(
                &mut endpoint,
                GuestProfile::new("Ana", "ana@x.com"),
                ClientCapabilities::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotApplicable { .. }));
    }

    #[tokio::test]
    async fn host_rejection_surfaces_code_and_message() {
        let host = shared_host(TandemConfig::default(), Some(JoinDecision::Reject)).await;
        let (guest, mut endpoint) = signed_in_guest(&host);

        let err = guest
            .join(
                &mut endpoint,
                GuestProfile::new("Ana", "ana@x.com"),
                ClientCapabilities::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        match err {
            SessionError::GuestRejected { code, message } => {
                assert_eq!(code, ErrorCode::CollaborationSessionGuestRejected);
                assert!(message.contains("rejected"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(guest.machine().state(), SessionState::SignedIn);
    }

    #[tokio::test]
    async fn outdated_client_gets_the_specific_reason() {
        let mut config = auto_admit_config();
        config.access.default_read_only = true;
        let host = shared_host(config, None).await;
        let (guest, mut endpoint) = signed_in_guest(&host);

        let capabilities = ClientCapabilities {
            client_read_only_support: false,
            extension_read_only_support: true,
        };
        let err = guest
            .join(
                &mut endpoint,
                GuestProfile::new("Ana", "ana@x.com"),
                capabilities,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        match err {
            SessionError::GuestRejected { code, message } => {
                assert_eq!(
                    code,
                    ErrorCode::CollaborationSessionGuestRejectedWithSpecificReason
                );
                assert!(message.contains("client application"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_join_fails_locally() {
        // Approval required and the host never answers.
        let host = shared_host(TandemConfig::default(), None).await;
        let (guest, endpoint) = signed_in_guest(&host);

        let waiting = Arc::new(Notify::new());
        let waiting2 = Arc::clone(&waiting);
        guest.machine().on_status(move |status| {
            if *status == SessionStatus::WaitingForHostApproval {
                waiting2.notify_one();
            }
        });

        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        let guest2 = Arc::clone(&guest);
        let join = tokio::spawn(async move {
            let mut endpoint = endpoint;
            guest2
                .join(
                    &mut endpoint,
                    GuestProfile::new("Ana", "ana@x.com"),
                    ClientCapabilities::default(),
                    &cancel2,
                )
                .await
        });

        waiting.notified().await;
        cancel.cancel();

        let err = join.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::Cancelled));
        assert_eq!(guest.machine().state(), SessionState::SignedIn);
    }

    #[tokio::test]
    async fn pump_applies_policy_changes() {
        let (host, guest) = joined_pair().await;
        let updated = Arc::new(Notify::new());
        let updated2 = Arc::clone(&updated);
        guest.policy().changes().subscribe(move |_| {
            updated2.notify_one();
        });

        host.policy()
            .set_user_read_only(ParticipantId(2), Some(true))
            .await
            .unwrap();
        updated.notified().await;

        assert!(guest.policy().is_read_only(ParticipantId(2)));
        let gate = guest.gate().unwrap();
        let edit = crate::access::RestrictedOperation::new(OperationName::Edit);
        let decision = gate.evaluate(&guest.own_context(), &edit).unwrap();
        assert!(!decision.is_allowed());
    }

    #[tokio::test]
    async fn access_request_grant_round_trip() {
        let (host, guest) = joined_pair().await;
        host.approval().register_operation_handler(
            OperationName::WriteToSharedTerminal,
            Arc::new(GrantingHandler),
        );

        let events = Arc::new(Mutex::new(Vec::new()));
        let notify = Arc::new(Notify::new());
        let events2 = Arc::clone(&events);
        let notify2 = Arc::clone(&notify);
        guest.requests().events().subscribe(move |event| {
            events2.lock().unwrap().push(event.clone());
            notify2.notify_one();
        });

        assert!(guest
            .requests()
            .request_access(OperationName::WriteToSharedTerminal, Some("terminal-1".into())));
        notify.notified().await;

        let key = OperationKey::with_target(OperationName::WriteToSharedTerminal, "terminal-1");
        assert_eq!(
            *events.lock().unwrap(),
            vec![AccessRequestEvent::Granted { key: key.clone() }]
        );
        assert_eq!(guest.grants().get(&key), Some(OperationAccess::Allowed));
        assert!(!guest.requests().is_awaiting(&key));
    }

    #[tokio::test]
    async fn session_end_unjoins_and_clears() {
        let (host, guest) = joined_pair().await;

        let left = Arc::new(Notify::new());
        let left2 = Arc::clone(&left);
        guest.machine().on_state_changed(move |change| {
            if change.previous == SessionState::Joined {
                left2.notify_one();
            }
        });

        host.end_sharing().await.unwrap();
        left.notified().await;

        assert_eq!(guest.machine().state(), SessionState::SignedIn);
        assert!(!guest.context().has_collaborators());
        assert!(guest.grants().snapshot().is_empty());
        assert_eq!(guest.participant_id(), None);
        assert!(guest.gate().is_err());
    }

    #[tokio::test]
    async fn removal_by_host_unjoins() {
        let (host, guest) = joined_pair().await;

        let left = Arc::new(Notify::new());
        let left2 = Arc::clone(&left);
        guest.machine().on_state_changed(move |change| {
            if change.previous == SessionState::Joined {
                left2.notify_one();
            }
        });

        host.remove_guest(ParticipantId(2), "The host removed you from this session.");
        left.notified().await;

        assert_eq!(guest.machine().state(), SessionState::SignedIn);
        assert_eq!(host.context().collaborator_count(), 0);
    }

    #[tokio::test]
    async fn voluntary_leave_notifies_the_host() {
        let (host, guest) = joined_pair().await;

        guest.leave().unwrap();

        // The host observes the leave and drops the roster entry.
        let mut tries = 0;
        while host.context().collaborator_count() > 0 && tries < 100 {
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
            tries += 1;
        }
        assert_eq!(host.context().collaborator_count(), 0);
        assert_eq!(guest.machine().state(), SessionState::SignedIn);
    }

    #[tokio::test]
    async fn lost_link_is_a_joining_error() {
        let (client_tx, _client_rx) = mpsc::unbounded_channel();
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let mut endpoint = GuestEndpoint {
            tx: client_tx,
            rx: server_rx,
        };
        let guest = GuestSession::new(endpoint.tx.clone());
        guest.machine().transition(SessionAction::SignInSuccess);

        server_tx
            .send(ServerMessage::JoinAccepted {
                participant_id: ParticipantId(2),
                assigned_display_name: "Ana (ana@x.com)".into(),
                access_control: AccessControlRecord::default(),
                operation_access: Vec::new(),
                collaborators: Vec::new(),
            })
            .unwrap();
        guest
            .join(
                &mut endpoint,
                GuestProfile::new("Ana", "ana@x.com"),
                ClientCapabilities::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let pump = guest.spawn_pump(endpoint.rx);

        drop(server_tx);
        pump.await.unwrap();

        assert_eq!(guest.machine().state(), SessionState::SignedIn);
        assert_eq!(guest.participant_id(), None);
    }
}
