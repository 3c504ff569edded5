//! Restricted operation definitions.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tandem_config::AccessConfig;

use crate::access::types::OperationKey;
use crate::error::{ErrorCode, ErrorDetail};

/// Closed set of operations the gate knows how to police.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationName {
    Edit,
    FileAccess,
    CodeAction,
    RunTask,
    Build,
    LaunchDebug,
    DebugContinue,
    DebugSetVariable,
    DebugEvaluate,
    WriteToSharedTerminal,
}

impl OperationName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Edit => "edit",
            Self::FileAccess => "file_access",
            Self::CodeAction => "code_action",
            Self::RunTask => "run_task",
            Self::Build => "build",
            Self::LaunchDebug => "launch_debug",
            Self::DebugContinue => "debug_continue",
            Self::DebugSetVariable => "debug_set_variable",
            Self::DebugEvaluate => "debug_evaluate",
            Self::WriteToSharedTerminal => "write_to_shared_terminal",
        }
    }
}

impl fmt::Display for OperationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an operation's host-enablement predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enablement {
    Enabled,
    /// Disabled without further explanation.
    Disabled,
    /// Disabled with a structured reason to surface to the caller.
    DisabledBecause(ErrorDetail),
}

type EnablementFn = Arc<dyn Fn() -> Enablement + Send + Sync>;

/// A named, gateable action. The name and read-only behavior are fixed at
/// construction; only the enablement predicate's answer varies over time.
#[derive(Clone)]
pub struct RestrictedOperation {
    name: OperationName,
    enabled_in_read_only: bool,
    target: Option<String>,
    enablement: Option<EnablementFn>,
}

impl RestrictedOperation {
    /// A write-class operation: denied to read-only participants.
    pub fn new(name: OperationName) -> Self {
        Self {
            name,
            enabled_in_read_only: false,
            target: None,
            enablement: None,
        }
    }

    /// Permit this operation even for read-only participants.
    pub fn allow_in_read_only(mut self) -> Self {
        self.enabled_in_read_only = true;
        self
    }

    /// Attach an instance target, e.g. a terminal identifier.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Attach a host-enablement predicate, consulted on every evaluation.
    pub fn with_enablement(
        mut self,
        predicate: impl Fn() -> Enablement + Send + Sync + 'static,
    ) -> Self {
        self.enablement = Some(Arc::new(predicate));
        self
    }

    pub fn name(&self) -> OperationName {
        self.name
    }

    pub fn enabled_in_read_only(&self) -> bool {
        self.enabled_in_read_only
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn key(&self) -> OperationKey {
        OperationKey {
            name: self.name,
            target: self.target.clone(),
        }
    }

    /// Ask the enablement predicate. Operations without one are always
    /// enabled.
    pub fn check_enablement(&self) -> Enablement {
        match &self.enablement {
            Some(predicate) => predicate(),
            None => Enablement::Enabled,
        }
    }
}

impl fmt::Debug for RestrictedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestrictedOperation")
            .field("name", &self.name)
            .field("enabled_in_read_only", &self.enabled_in_read_only)
            .field("target", &self.target)
            .field("has_enablement", &self.enablement.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Standard operations
// ---------------------------------------------------------------------------

/// Document edits. Write-class, so read-only participants are refused.
pub fn edit() -> RestrictedOperation {
    RestrictedOperation::new(OperationName::Edit)
}

/// File creation, deletion and renames.
pub fn file_access() -> RestrictedOperation {
    RestrictedOperation::new(OperationName::FileAccess)
}

/// Quick fixes and refactorings, which apply edits when executed.
pub fn code_action() -> RestrictedOperation {
    RestrictedOperation::new(OperationName::CodeAction)
}

/// Task execution, gated on the host's guest-task setting.
pub fn run_task(config: &AccessConfig) -> RestrictedOperation {
    RestrictedOperation::new(OperationName::RunTask).with_enablement(task_gate(config))
}

/// Build invocation, gated like tasks.
pub fn build(config: &AccessConfig) -> RestrictedOperation {
    RestrictedOperation::new(OperationName::Build).with_enablement(task_gate(config))
}

/// Starting a debug session on the host.
pub fn launch_debug(config: &AccessConfig) -> RestrictedOperation {
    RestrictedOperation::new(OperationName::LaunchDebug).with_enablement(debug_gate(config))
}

/// Resuming the debuggee.
pub fn debug_continue(config: &AccessConfig) -> RestrictedOperation {
    RestrictedOperation::new(OperationName::DebugContinue).with_enablement(debug_gate(config))
}

/// Overwriting a variable in the debuggee.
pub fn debug_set_variable(config: &AccessConfig) -> RestrictedOperation {
    RestrictedOperation::new(OperationName::DebugSetVariable).with_enablement(debug_gate(config))
}

/// Expression evaluation, which can run arbitrary code in the debuggee.
pub fn debug_evaluate(config: &AccessConfig) -> RestrictedOperation {
    RestrictedOperation::new(OperationName::DebugEvaluate).with_enablement(debug_gate(config))
}

fn debug_gate(config: &AccessConfig) -> impl Fn() -> Enablement + Send + Sync + 'static {
    let allowed = config.allow_guest_debug_control;
    move || {
        if allowed {
            Enablement::Enabled
        } else {
            Enablement::DisabledBecause(ErrorDetail::new(
                ErrorCode::OperationRejected,
                "The host has disabled debugger control for guests.",
            ))
        }
    }
}

fn task_gate(config: &AccessConfig) -> impl Fn() -> Enablement + Send + Sync + 'static {
    let allowed = config.allow_guest_task_run;
    move || {
        if allowed {
            Enablement::Enabled
        } else {
            Enablement::DisabledBecause(ErrorDetail::new(
                ErrorCode::OperationRejected,
                "The host has disabled running tasks and builds for guests.",
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
