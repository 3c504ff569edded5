pub mod errors;
pub mod events;
pub mod id;

pub use errors::{ConfigError, TandemError};
pub use events::{EventEmitter, SubscriptionToken};
pub use id::{new_correlation_id, ParticipantId, SessionId};

pub type Result<T> = std::result::Result<T, TandemError>;
