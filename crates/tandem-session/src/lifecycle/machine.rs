//! Deterministic session lifecycle state machine.

use std::sync::{Arc, PoisonError, RwLock};

use tandem_common::{EventEmitter, SubscriptionToken};
use tracing::{debug, info};

use crate::context::SessionContext;
use crate::lifecycle::types::{SessionAction, SessionState, SessionStatus, StateChange};

/// Table lookup for one `(state, action)` pair. `None` means the pair is
/// unmapped and the action must be ignored.
fn transition_for(state: SessionState, action: SessionAction) -> Option<SessionState> {
    use SessionAction as A;
    use SessionState as S;

    match (state, action) {
        // Startup resolves to one of the signed states.
        (S::Initializing, A::SignInSuccess) => Some(S::SignedIn),
        (S::Initializing, A::SignInError) => Some(S::SignedOut),
        (S::Initializing, A::SignOut) => Some(S::SignedOut),
        (S::Initializing, A::AttemptSignIn) => Some(S::SigningIn),
        (S::Initializing, A::AwaitExternalSignIn) => Some(S::ExternallySigningIn),

        (S::SignedOut, A::AttemptSignIn) => Some(S::SigningIn),
        (S::SignedOut, A::AwaitExternalSignIn) => Some(S::ExternallySigningIn),
        (S::SignedOut, A::SignInSuccess) => Some(S::SignedIn),

        (S::SigningIn, A::SignInSuccess) => Some(S::SignedIn),
        (S::SigningIn, A::SignInError) => Some(S::SignedOut),
        (S::SigningIn, A::SignOut) => Some(S::SignedOut),
        (S::SigningIn, A::AwaitExternalSignIn) => Some(S::ExternallySigningIn),

        (S::ExternallySigningIn, A::SignInSuccess) => Some(S::SignedIn),
        (S::ExternallySigningIn, A::SignInError) => Some(S::SignedOut),
        (S::ExternallySigningIn, A::SignOut) => Some(S::SignedOut),
        // Giving up on the external flow in favor of an interactive one.
        (S::ExternallySigningIn, A::AttemptSignIn) => Some(S::SigningIn),

        (S::SignedIn, A::AttemptSharing) => Some(S::SharingInProgress),
        (S::SignedIn, A::AttemptJoining) => Some(S::JoiningInProgress),
        (S::SignedIn, A::SignOut) => Some(S::SignedOut),

        (S::SharingInProgress, A::SharingSuccess) => Some(S::Shared),
        (S::SharingInProgress, A::SharingError) => Some(S::SignedIn),

        (S::Shared, A::EndSharing) => Some(S::SignedIn),
        (S::Shared, A::SharingError) => Some(S::SignedIn),
        (S::Shared, A::SignOut) => Some(S::SignedOut),

        (S::JoiningInProgress, A::JoiningSuccess) => Some(S::Joined),
        (S::JoiningInProgress, A::JoiningError) => Some(S::SignedIn),
        // Accepted join that applies only after a workspace reload; the
        // process stays out of the session until then.
        (S::JoiningInProgress, A::JoiningPendingReload) => Some(S::SignedIn),

        (S::Joined, A::Unjoin) => Some(S::SignedIn),
        (S::Joined, A::JoiningError) => Some(S::SignedIn),
        (S::Joined, A::SignOut) => Some(S::SignedOut),

        _ => None,
    }
}

/// Session lifecycle driver. Holds the current [`SessionState`], applies
/// [`SessionAction`]s through a fixed transition table, and notifies
/// subscribers on two separate channels: coarse state changes and
/// finer-grained status points.
///
/// Ephemeral session data in the shared [`SessionContext`] is cleared
/// synchronously inside [`transition`](Self::transition) whenever the
/// machine leaves `Shared` or `Joined`, before the state-changed
/// notification fires. A consumer reacting to the notification always
/// observes the already-cleared context.
pub struct SessionStateMachine {
    context: Arc<SessionContext>,
    state: RwLock<SessionState>,
    state_changed: EventEmitter<StateChange>,
    status_changed: EventEmitter<SessionStatus>,
}

impl SessionStateMachine {
    pub fn new(context: Arc<SessionContext>) -> Self {
        Self {
            context,
            state: RwLock::new(SessionState::Initializing),
            state_changed: EventEmitter::new(),
            status_changed: EventEmitter::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    /// Apply `action`. Unmapped `(state, action)` pairs are ignored and
    /// return `None`; mapped pairs move the machine and return the change
    /// after all subscribers have run.
    pub fn transition(&self, action: SessionAction) -> Option<StateChange> {
        let change = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let current = *state;
            let Some(next) = transition_for(current, action) else {
                debug!(state = ?current, action = ?action, "ignoring unmapped session action");
                return None;
            };
            *state = next;
            StateChange {
                state: next,
                previous: current,
            }
        };

        if change.previous.is_collaborating() && !change.state.is_collaborating() {
            self.context.reset();
        }

        info!(
            from = ?change.previous,
            to = ?change.state,
            action = ?action,
            "session state changed"
        );
        self.state_changed.emit(&change);
        Some(change)
    }

    /// Report a progress point on the status channel. Does not touch the
    /// state.
    pub fn point(&self, status: SessionStatus) {
        debug!(status = ?status, "session status point");
        self.status_changed.emit(&status);
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    pub fn on_state_changed(
        &self,
        handler: impl Fn(&StateChange) + Send + Sync + 'static,
    ) -> SubscriptionToken {
        self.state_changed.subscribe(handler)
    }

    pub fn unsubscribe_state_changed(&self, token: SubscriptionToken) -> bool {
        self.state_changed.unsubscribe(token)
    }

    pub fn on_status(
        &self,
        handler: impl Fn(&SessionStatus) + Send + Sync + 'static,
    ) -> SubscriptionToken {
        self.status_changed.subscribe(handler)
    }

    pub fn unsubscribe_status(&self, token: SubscriptionToken) -> bool {
        self.status_changed.unsubscribe(token)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
