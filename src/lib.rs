pub mod cache;
pub mod config;
pub mod error;
pub mod providers;
pub mod session;

pub use error::{SessionError, SessionResult};
pub use session::{RefreshPolicy, Role, SessionSnapshot, SessionState, SessionStore, UserProjection};
