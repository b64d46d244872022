use serde::{Deserialize, Serialize};

use super::projection::UserProjection;
use crate::error::SessionError;

/// Authentication state as a tagged variant: "authenticated with no user" is
/// unrepresentable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    LoggedOut,
    LoggedIn(UserProjection),
}

impl SessionState {
    pub fn user(&self) -> Option<&UserProjection> {
        match self {
            SessionState::LoggedOut => None,
            SessionState::LoggedIn(u) => Some(u),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::LoggedIn(_))
    }
}

/// What reactive readers observe. `is_loading` and `last_error` are transient
/// and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub is_loading: bool,
    pub last_error: Option<SessionError>,
}

impl SessionSnapshot {
    pub fn user(&self) -> Option<&UserProjection> {
        self.state.user()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.is_authenticated()
    }
}

/// The subset of session state written to the persisted cache. Kept as the
/// two-field shape so an on-disk fragment from an older client still parses;
/// hydration re-checks consistency.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedFragment {
    pub user: Option<UserProjection>,
    pub is_authenticated: bool,
}

impl PersistedFragment {
    pub fn from_snapshot(snap: &SessionSnapshot) -> Self {
        Self {
            user: snap.user().cloned(),
            is_authenticated: snap.is_authenticated(),
        }
    }

    /// Rebuild state from a persisted fragment. A fragment claiming
    /// authentication without a user hydrates as logged out.
    pub fn into_state(self) -> SessionState {
        match (self.is_authenticated, self.user) {
            (true, Some(user)) => SessionState::LoggedIn(user),
            _ => SessionState::LoggedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;

    fn someone() -> UserProjection {
        UserProjection { id: "u1".into(), email: "u@example.com".into(), name: "U".into(), role: Role::Tenant }
    }

    #[test]
    fn fragment_round_trip() {
        let snap = SessionSnapshot {
            state: SessionState::LoggedIn(someone()),
            is_loading: true,
            last_error: Some(SessionError::network("net", "down")),
        };
        let frag = PersistedFragment::from_snapshot(&snap);
        let json = serde_json::to_string(&frag).unwrap();
        // Transient fields must not appear in the persisted form.
        assert!(!json.contains("is_loading"));
        assert!(!json.contains("last_error"));
        let back: PersistedFragment = serde_json::from_str(&json).unwrap();
        assert_eq!(back.into_state(), SessionState::LoggedIn(someone()));
    }

    #[test]
    fn inconsistent_fragment_hydrates_logged_out() {
        let frag = PersistedFragment { user: None, is_authenticated: true };
        assert_eq!(frag.into_state(), SessionState::LoggedOut);
        let frag = PersistedFragment { user: Some(someone()), is_authenticated: false };
        assert_eq!(frag.into_state(), SessionState::LoggedOut);
    }
}
