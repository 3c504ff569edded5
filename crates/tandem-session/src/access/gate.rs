//! Operation gating against the session policy.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::access::operation::{Enablement, OperationName, RestrictedOperation};
use crate::access::policy::PolicyReader;
use crate::access::types::ParticipantContext;
use crate::error::{ErrorCode, ErrorDetail, SessionError};
use crate::lifecycle::machine::SessionStateMachine;
use crate::lifecycle::types::SessionState;

/// Outcome of a gate evaluation. Denials are expected values, not errors;
/// only infrastructure faults surface as [`SessionError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied(DenialReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn denial(&self) -> Option<&DenialReason> {
        match self {
            Self::Allowed => None,
            Self::Denied(reason) => Some(reason),
        }
    }
}

/// Why an operation was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    /// The session is read-only for the calling participant and the
    /// operation is write-class.
    RejectedInReadOnlySession,
    /// The host's configuration or an explicit host decision disables the
    /// operation, optionally with a structured explanation.
    DisabledByHost(Option<ErrorDetail>),
}

impl DenialReason {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::RejectedInReadOnlySession => ErrorCode::OperationRejectedInReadOnlySession,
            Self::DisabledByHost(Some(detail)) => detail.code,
            Self::DisabledByHost(None) => ErrorCode::OperationRejected,
        }
    }

    pub fn message(&self, operation: OperationName) -> String {
        match self {
            Self::RejectedInReadOnlySession => {
                format!("{operation} is not available in a read-only collaboration session")
            }
            Self::DisabledByHost(Some(detail)) => detail.message.clone(),
            Self::DisabledByHost(None) => {
                format!("{operation} has been disabled by the host")
            }
        }
    }
}

/// Which side of the session a gate serves. Hosts gate while `Shared`,
/// guests while `Joined`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRole {
    Host,
    Guest,
}

impl GateRole {
    fn required_state(self) -> SessionState {
        match self {
            Self::Host => SessionState::Shared,
            Self::Guest => SessionState::Joined,
        }
    }
}

/// One denial, reported on the diagnostics channel. Sent fire-and-forget;
/// a slow or absent consumer never blocks gating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenialRecord {
    pub operation: OperationName,
    pub reason: String,
}

/// Policy gate for restricted operations.
///
/// Construction fails outside the role's active state; an existing gate
/// also re-checks the state on every call so a gate outliving its session
/// degrades to errors instead of stale answers.
pub struct OperationGate {
    role: GateRole,
    machine: Arc<SessionStateMachine>,
    policy: Arc<dyn PolicyReader>,
    diagnostics: Option<mpsc::UnboundedSender<DenialRecord>>,
}

impl std::fmt::Debug for OperationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationGate")
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl OperationGate {
    pub fn for_host(
        machine: Arc<SessionStateMachine>,
        policy: Arc<dyn PolicyReader>,
    ) -> Result<Self, SessionError> {
        Self::new(GateRole::Host, machine, policy)
    }

    pub fn for_guest(
        machine: Arc<SessionStateMachine>,
        policy: Arc<dyn PolicyReader>,
    ) -> Result<Self, SessionError> {
        Self::new(GateRole::Guest, machine, policy)
    }

    fn new(
        role: GateRole,
        machine: Arc<SessionStateMachine>,
        policy: Arc<dyn PolicyReader>,
    ) -> Result<Self, SessionError> {
        let gate = Self {
            role,
            machine,
            policy,
            diagnostics: None,
        };
        gate.ensure_available()?;
        Ok(gate)
    }

    /// Attach a denial diagnostics sink.
    pub fn with_diagnostics(mut self, sink: mpsc::UnboundedSender<DenialRecord>) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    fn ensure_available(&self) -> Result<(), SessionError> {
        let state = self.machine.state();
        if state == self.role.required_state() {
            Ok(())
        } else {
            Err(SessionError::GateUnavailable { state })
        }
    }

    /// Evaluate `operation` for the caller identified by `context`.
    ///
    /// Checks read-only policy first, then the operation's enablement
    /// predicate. The host sentinel is exempt from the read-only check, as
    /// is an unattributed context: when attribution cannot be resolved the
    /// read-only check fails open rather than blocking host-originated
    /// internal calls.
    pub fn evaluate(
        &self,
        context: &ParticipantContext,
        operation: &RestrictedOperation,
    ) -> Result<Decision, SessionError> {
        self.ensure_available()?;

        if let Some(reason) = self.check(context, operation) {
            self.report_denial(operation, &reason);
            return Ok(Decision::Denied(reason));
        }
        Ok(Decision::Allowed)
    }

    /// Evaluate and convert a denial into a coded error, for RPC entry
    /// points that must refuse with a stable wire code.
    pub fn verify(
        &self,
        context: &ParticipantContext,
        operation: &RestrictedOperation,
    ) -> Result<(), SessionError> {
        match self.evaluate(context, operation)? {
            Decision::Allowed => Ok(()),
            Decision::Denied(reason) => Err(SessionError::Operation {
                code: reason.error_code(),
                message: reason.message(operation.name()),
            }),
        }
    }

    fn check(
        &self,
        context: &ParticipantContext,
        operation: &RestrictedOperation,
    ) -> Option<DenialReason> {
        if !operation.enabled_in_read_only() {
            match context {
                ParticipantContext::Participant(id) => {
                    if self.policy.is_read_only(*id) {
                        return Some(DenialReason::RejectedInReadOnlySession);
                    }
                }
                ParticipantContext::Unattributed => {
                    warn!(
                        operation = %operation.name(),
                        "gated call without participant attribution, skipping read-only check"
                    );
                }
            }
        }

        match operation.check_enablement() {
            Enablement::Enabled => None,
            Enablement::Disabled => Some(DenialReason::DisabledByHost(None)),
            Enablement::DisabledBecause(detail) => {
                Some(DenialReason::DisabledByHost(Some(detail)))
            }
        }
    }

    fn report_denial(&self, operation: &RestrictedOperation, reason: &DenialReason) {
        let record = DenialRecord {
            operation: operation.name(),
            reason: reason.message(operation.name()),
        };
        debug!(operation = %record.operation, reason = %record.reason, "operation denied");
        if let Some(sink) = &self.diagnostics {
            let _ = sink.send(record);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tandem_common::ParticipantId;
    use tandem_config::AccessConfig;

    use super::*;
    use crate::access::policy::{HostPolicyStore, MemorySettingsStore, SettingsStore};
    use crate::access::types::{AccessControl, AccessControlRecord};
    use crate::context::SessionContext;
    use crate::lifecycle::types::SessionAction;

    struct FixedPolicy(AccessControlRecord);

    impl PolicyReader for FixedPolicy {
        fn record(&self) -> AccessControlRecord {
            self.0.clone()
        }
    }

    fn read_only_policy() -> Arc<dyn PolicyReader> {
        let mut record = AccessControlRecord::default();
        record.default_access_control = AccessControl::read_only();
        Arc::new(FixedPolicy(record))
    }

    fn writable_policy() -> Arc<dyn PolicyReader> {
        Arc::new(FixedPolicy(AccessControlRecord::default()))
    }

    fn shared_machine() -> Arc<SessionStateMachine> {
        let machine = SessionStateMachine::new(Arc::new(SessionContext::new()));
        machine.transition(SessionAction::SignInSuccess);
        machine.transition(SessionAction::AttemptSharing);
        machine.transition(SessionAction::SharingSuccess);
        Arc::new(machine)
    }

    fn joined_machine() -> Arc<SessionStateMachine> {
        let machine = SessionStateMachine::new(Arc::new(SessionContext::new()));
        machine.transition(SessionAction::SignInSuccess);
        machine.transition(SessionAction::AttemptJoining);
        machine.transition(SessionAction::JoiningSuccess);
        Arc::new(machine)
    }

    #[test]
    fn gate_requires_active_session() {
        let machine = Arc::new(SessionStateMachine::new(Arc::new(SessionContext::new())));
        let err = OperationGate::for_host(machine, writable_policy()).unwrap_err();
        assert!(matches!(
            err,
            SessionError::GateUnavailable {
                state: SessionState::Initializing
            }
        ));

        // Guest role needs Joined, not Shared.
        let err = OperationGate::for_guest(shared_machine(), writable_policy()).unwrap_err();
        assert!(matches!(err, SessionError::GateUnavailable { .. }));
    }

    #[test]
    fn read_only_denies_write_class_operations() {
        let gate = OperationGate::for_host(shared_machine(), read_only_policy()).unwrap();
        let edit = RestrictedOperation::new(OperationName::Edit);
        let guest = ParticipantContext::Participant(ParticipantId(2));

        let decision = gate.evaluate(&guest, &edit).unwrap();
        assert_eq!(
            decision,
            Decision::Denied(DenialReason::RejectedInReadOnlySession)
        );
    }

    #[test]
    fn read_only_permits_marked_operations() {
        let gate = OperationGate::for_host(shared_machine(), read_only_policy()).unwrap();
        let evaluate =
            RestrictedOperation::new(OperationName::DebugEvaluate).allow_in_read_only();
        let guest = ParticipantContext::Participant(ParticipantId(2));

        assert!(gate.evaluate(&guest, &evaluate).unwrap().is_allowed());
    }

    #[test]
    fn host_sentinel_bypasses_read_only() {
        let gate = OperationGate::for_host(shared_machine(), read_only_policy()).unwrap();
        let edit = RestrictedOperation::new(OperationName::Edit);

        let decision = gate.evaluate(&ParticipantContext::host(), &edit).unwrap();
        assert!(decision.is_allowed());
    }

    #[test]
    fn unattributed_context_fails_open() {
        let gate = OperationGate::for_host(shared_machine(), read_only_policy()).unwrap();
        let edit = RestrictedOperation::new(OperationName::Edit);

        let decision = gate
            .evaluate(&ParticipantContext::Unattributed, &edit)
            .unwrap();
        assert!(decision.is_allowed());
    }

    #[test]
    fn enablement_denial_beats_allowed() {
        let gate = OperationGate::for_guest(joined_machine(), writable_policy()).unwrap();
        let task = RestrictedOperation::new(OperationName::RunTask)
            .with_enablement(|| Enablement::Disabled);
        let guest = ParticipantContext::Participant(ParticipantId(3));

        let decision = gate.evaluate(&guest, &task).unwrap();
        assert_eq!(decision, Decision::Denied(DenialReason::DisabledByHost(None)));
    }

    #[test]
    fn read_only_denial_wins_over_enablement() {
        let gate = OperationGate::for_host(shared_machine(), read_only_policy()).unwrap();
        let task = RestrictedOperation::new(OperationName::RunTask)
            .with_enablement(|| Enablement::Disabled);
        let guest = ParticipantContext::Participant(ParticipantId(2));

        let decision = gate.evaluate(&guest, &task).unwrap();
        assert_eq!(
            decision,
            Decision::Denied(DenialReason::RejectedInReadOnlySession)
        );
    }

    #[test]
    fn verify_maps_denials_to_coded_errors() {
        let gate = OperationGate::for_host(shared_machine(), read_only_policy()).unwrap();
        let guest = ParticipantContext::Participant(ParticipantId(2));

        let err = gate
            .verify(&guest, &RestrictedOperation::new(OperationName::Edit))
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::OperationRejectedInReadOnlySession));

        let disabled = RestrictedOperation::new(OperationName::LaunchDebug).with_enablement(|| {
            Enablement::DisabledBecause(ErrorDetail::new(
                ErrorCode::OperationRejected,
                "debug sessions are disabled",
            ))
        });
        let err = gate.verify(&guest, &disabled).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::OperationRejected));
        assert_eq!(err.to_string(), "debug sessions are disabled");
    }

    #[test]
    fn verify_passes_allowed_operations() {
        let gate = OperationGate::for_guest(joined_machine(), writable_policy()).unwrap();
        let guest = ParticipantContext::Participant(ParticipantId(4));
        gate.verify(&guest, &RestrictedOperation::new(OperationName::Edit))
            .unwrap();
    }

    #[test]
    fn denials_reach_the_diagnostics_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let gate = OperationGate::for_host(shared_machine(), read_only_policy())
            .unwrap()
            .with_diagnostics(tx);
        let guest = ParticipantContext::Participant(ParticipantId(2));

        gate.evaluate(&guest, &RestrictedOperation::new(OperationName::Edit))
            .unwrap();
        gate.evaluate(
            &guest,
            &RestrictedOperation::new(OperationName::DebugEvaluate).allow_in_read_only(),
        )
        .unwrap();

        let record = rx.try_recv().unwrap();
        assert_eq!(record.operation, OperationName::Edit);
        assert!(record.reason.contains("read-only"));
        // The allowed evaluation reported nothing.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_diagnostics_consumer_does_not_block() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let gate = OperationGate::for_host(shared_machine(), read_only_policy())
            .unwrap()
            .with_diagnostics(tx);
        let guest = ParticipantContext::Participant(ParticipantId(2));

        let decision = gate
            .evaluate(&guest, &RestrictedOperation::new(OperationName::Edit))
            .unwrap();
        assert!(!decision.is_allowed());
    }

    #[test]
    fn gate_degrades_when_session_ends() {
        let machine = shared_machine();
        let gate =
            OperationGate::for_host(Arc::clone(&machine), writable_policy()).unwrap();

        machine.transition(SessionAction::EndSharing);

        let err = gate
            .evaluate(
                &ParticipantContext::host(),
                &RestrictedOperation::new(OperationName::Edit),
            )
            .unwrap_err();
        assert!(matches!(err, SessionError::GateUnavailable { .. }));
    }

    #[tokio::test]
    async fn gate_follows_live_policy_changes() {
        let settings = Arc::new(MemorySettingsStore::new());
        let context = Arc::new(SessionContext::new());
        let machine = Arc::new(SessionStateMachine::new(Arc::clone(&context)));
        machine.transition(SessionAction::SignInSuccess);
        machine.transition(SessionAction::AttemptSharing);
        machine.transition(SessionAction::SharingSuccess);

        let policy = Arc::new(HostPolicyStore::new(
            settings as Arc<dyn SettingsStore>,
            context,
            &AccessConfig::default(),
        ));
        let gate = OperationGate::for_host(
            machine,
            Arc::clone(&policy) as Arc<dyn PolicyReader>,
        )
        .unwrap();
        let guest = ParticipantContext::Participant(ParticipantId(2));
        let edit = RestrictedOperation::new(OperationName::Edit);

        assert!(gate.evaluate(&guest, &edit).unwrap().is_allowed());
        policy.set_read_only(true).await.unwrap();
        assert!(!gate.evaluate(&guest, &edit).unwrap().is_allowed());
    }
}
