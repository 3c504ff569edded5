//! Session lifecycle: state machine, transition table, and sign-in flows.

pub mod machine;
pub mod signin;
pub mod types;

pub use machine::SessionStateMachine;
pub use signin::{interactive_sign_in, silent_sign_in};
pub use types::{SessionAction, SessionState, SessionStatus, StateChange};
