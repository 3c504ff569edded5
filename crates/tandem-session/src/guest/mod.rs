//! Guest side: join flow, replicas, and access requests.

pub mod requests;
pub mod session;

pub use requests::{AccessRequestEvent, GuestAccessRequestClient};
pub use session::GuestSession;
