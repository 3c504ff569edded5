//! Sign-in flows driven through the state machine.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::lifecycle::machine::SessionStateMachine;
use crate::lifecycle::types::{SessionAction, SessionState, SessionStatus};

/// Attempt a silent sign-in against an external token source.
///
/// Drives the machine into `ExternallySigningIn` and waits for `external`
/// to resolve: `true` means a token was obtained, `false` means the source
/// answered with no credentials. If the source does not answer within
/// `timeout`, the stale sign-in attempt is abandoned with a forced
/// `SignOut` so the process cannot hang in `ExternallySigningIn` forever.
pub async fn silent_sign_in<F>(
    machine: &SessionStateMachine,
    external: F,
    timeout: Duration,
) -> SessionState
where
    F: Future<Output = bool>,
{
    if machine.transition(SessionAction::AwaitExternalSignIn).is_none() {
        return machine.state();
    }
    machine.point(SessionStatus::SigningIn);

    match tokio::time::timeout(timeout, external).await {
        Ok(true) => {
            machine.transition(SessionAction::SignInSuccess);
        }
        Ok(false) => {
            debug!("silent sign-in source returned no credentials");
            machine.transition(SessionAction::SignInError);
        }
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs(), "silent sign-in timed out, signing out");
            machine.transition(SessionAction::SignOut);
        }
    }
    machine.state()
}

/// Run an interactive sign-in attempt, cancellable by the user.
///
/// Cancellation wins the race: once `cancel` fires, any still in-flight
/// completion of `attempt` is ignored and the machine records a sign-in
/// error.
pub async fn interactive_sign_in<F>(
    machine: &SessionStateMachine,
    attempt: F,
    cancel: &CancellationToken,
) -> SessionState
where
    F: Future<Output = bool>,
{
    if machine.transition(SessionAction::AttemptSignIn).is_none() {
        return machine.state();
    }
    machine.point(SessionStatus::SigningIn);

    tokio::select! {
        _ = cancel.cancelled() => {
            debug!("interactive sign-in cancelled");
            machine.transition(SessionAction::SignInError);
        }
        succeeded = attempt => {
            let action = if succeeded {
                SessionAction::SignInSuccess
            } else {
                SessionAction::SignInError
            };
            machine.transition(action);
        }
    }
    machine.state()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
