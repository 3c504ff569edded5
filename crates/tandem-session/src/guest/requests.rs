//! Guest-side access requests and decision surfacing.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use tandem_common::{new_correlation_id, EventEmitter};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::access::types::{OperationAccess, OperationKey};
use crate::access::OperationName;
use crate::protocol::ClientMessage;

/// Decision surfaced to the guest-side UI for one requested operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessRequestEvent {
    Granted { key: OperationKey },
    /// Shown at most once per target until the host grants access again.
    Rejected { key: OperationKey, message: String },
}

/// Sends access requests to the host and turns the resulting decision
/// notifications into UI events.
///
/// Requests are fire-and-forget: nothing blocks on the host, answers only
/// ever arrive as operation-access notifications. Repeat rejections for a
/// target are suppressed until a grant re-arms it, so a guest retrying a
/// denied operation is not buried in identical toasts.
pub struct GuestAccessRequestClient {
    tx: mpsc::UnboundedSender<ClientMessage>,
    /// Targets with a request in flight.
    awaiting: Mutex<HashSet<OperationKey>>,
    /// Targets whose rejection has already been surfaced.
    rejection_shown: Mutex<HashSet<OperationKey>>,
    events: EventEmitter<AccessRequestEvent>,
}

impl GuestAccessRequestClient {
    pub fn new(tx: mpsc::UnboundedSender<ClientMessage>) -> Self {
        Self {
            tx,
            awaiting: Mutex::new(HashSet::new()),
            rejection_shown: Mutex::new(HashSet::new()),
            events: EventEmitter::new(),
        }
    }

    /// Ask the host for access to `operation`. Returns whether a request
    /// was actually sent; a request already in flight for the same target
    /// suppresses the repeat.
    pub fn request_access(&self, operation: OperationName, target: Option<String>) -> bool {
        let key = OperationKey {
            name: operation,
            target,
        };
        {
            let mut awaiting = self
                .awaiting
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !awaiting.insert(key.clone()) {
                debug!(operation = %key.name, "access request already in flight, not resending");
                return false;
            }
        }

        let message = ClientMessage::AccessRequest {
            operation: key.name,
            target: key.target.clone(),
            correlation: new_correlation_id(),
        };
        if self.tx.send(message).is_err() {
            warn!(operation = %key.name, "host link closed, dropping access request");
            self.awaiting
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
            return false;
        }
        info!(operation = %key.name, target = ?key.target, "access requested from host");
        true
    }

    /// Feed one decision notification from the host. Grants clear the
    /// rejection marker for the target; rejections surface once.
    pub fn handle_access_changed(&self, key: OperationKey, access: OperationAccess) {
        self.awaiting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);

        match access {
            OperationAccess::Allowed => {
                self.rejection_shown
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&key);
                self.events.emit(&AccessRequestEvent::Granted { key });
            }
            OperationAccess::ExplicitlyRejectedByHost => {
                self.surface_rejection(
                    key,
                    "The host rejected the access request.".to_string(),
                );
            }
            OperationAccess::DisabledByHostConfiguration => {
                self.surface_rejection(
                    key,
                    "The host's configuration does not allow this operation.".to_string(),
                );
            }
        }
    }

    fn surface_rejection(&self, key: OperationKey, message: String) {
        let first = self
            .rejection_shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());
        if !first {
            debug!(operation = %key.name, "suppressing repeated rejection notification");
            return;
        }
        self.events.emit(&AccessRequestEvent::Rejected { key, message });
    }

    pub fn is_awaiting(&self, key: &OperationKey) -> bool {
        self.awaiting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    pub fn events(&self) -> &EventEmitter<AccessRequestEvent> {
        &self.events
    }

    /// Forget all in-flight and shown markers. Called when the session
    /// ends.
    pub fn reset(&self) {
        self.awaiting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.rejection_shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
