//! Configuration schema types for tandem.
//!
//! All structs use `serde(default)` so partial configs work correctly.
//! Missing fields are filled with defaults matching a host that approves
//! every guest by hand and shares read-write.

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration for tandem.
///
/// Only override what you want to change; every section has defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TandemConfig {
    pub session: SessionConfig,
    pub access: AccessConfig,
    pub terminal: TerminalConfig,
    pub signin: SignInConfig,
    pub logging: LoggingConfig,
}

/// Session lifecycle and admission behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Hold each joining guest until the host explicitly accepts them.
    /// When off, guests are admitted immediately and the host only gets
    /// an after-the-fact notification with a reject action.
    pub guest_approval_required: bool,
    /// Maximum guests in one session (the host is not counted).
    pub max_guests: usize,
    /// Surface a "guest joined" notification when auto-admitting.
    pub notify_on_join: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            guest_approval_required: true,
            max_guests: 5,
            notify_on_join: true,
        }
    }
}

/// Defaults for the session's access-control record and for
/// host-configurable feature gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Start new sessions read-only for guests.
    pub default_read_only: bool,
    /// Let guests drive the debugger (continue, set variables, evaluate).
    pub allow_guest_debug_control: bool,
    /// Let guests run tasks and builds.
    pub allow_guest_task_run: bool,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            default_read_only: false,
            allow_guest_debug_control: true,
            allow_guest_task_run: true,
        }
    }
}

/// Shared-terminal gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Master switch for guest writes to shared terminals. Off means
    /// every write request is answered "disabled by host configuration".
    pub shared_write_enabled: bool,
    /// Whether a terminal starts writable for guests before the host has
    /// decided anything for it.
    pub guest_write_by_default: bool,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shared_write_enabled: true,
            guest_write_by_default: false,
        }
    }
}

/// Sign-in flow tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignInConfig {
    /// How long the silent (external browser) sign-in may take before the
    /// session is forced back to signed-out.
    pub silent_timeout_secs: u64,
}

impl Default for SignInConfig {
    fn default() -> Self {
        Self {
            silent_timeout_secs: 15,
        }
    }
}

/// Logging defaults for the binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter when RUST_LOG is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
