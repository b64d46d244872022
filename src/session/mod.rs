//! Session/identity core: the state machine behind "who is logged in".
//! Keep the public surface thin and split implementation across sub-modules.

mod projection;
mod state;
mod store;

pub use projection::{resolve_user, Role, UserProjection};
pub use state::{PersistedFragment, SessionSnapshot, SessionState};
pub use store::{RefreshPolicy, SessionStore, SESSION_CACHE_KEY};
