//! Remote collaborator contracts: identity provider, profile table, and the
//! concrete clients behind them. The session store only ever talks to these
//! traits; UI code must never call a provider directly.

mod gotrue;
mod postgrest;
mod local;

pub use gotrue::{GoTrueIdentityProvider, TokenState};
pub use postgrest::PostgrestProfileStore;
pub use local::{LocalIdentityProvider, LocalProfileStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::Role;

/// Failures crossing the provider boundary, before translation into
/// `SessionError`. Kept separate so HTTP status handling stays out of the
/// session core.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("invalid credentials: {0}")]
    Credentials(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("provider returned HTTP {status}: {message}")]
    Service { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Network(err.to_string())
    }
}

/// Metadata attached to an account at registration time. Rarely updated
/// afterwards; the profile table is the mutable copy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountInfo {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub metadata: AccountMetadata,
}

/// An active session as issued by the identity provider.
#[derive(Debug, Clone)]
pub struct ProviderSession {
    pub account: AccountInfo,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Result of `sign_up`: the provider may activate the account immediately
/// (session present) or defer until the email is confirmed (session absent).
#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub account: Option<AccountInfo>,
    pub session: Option<ProviderSession>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: AccountMetadata,
    ) -> Result<SignUpOutcome, ProviderError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderSession, ProviderError>;

    /// Invalidate the remote session/token.
    async fn sign_out(&self) -> Result<(), ProviderError>;

    /// Return the currently valid session, if any, without forcing a re-auth.
    async fn get_session(&self) -> Result<Option<ProviderSession>, ProviderError>;

    /// Mint a refreshed token via a real round trip so provider-side metadata
    /// updates become visible. `None` when there is nothing to refresh.
    async fn refresh_session(&self) -> Result<Option<ProviderSession>, ProviderError>;
}

/// Mutable per-account display data, keyed by the provider's account id.
/// Authoritative over account metadata when present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Partial profile update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Single-row-by-id read. `Ok(None)` when no row exists.
    async fn fetch(&self, account_id: &str) -> Result<Option<ProfileRecord>, ProviderError>;

    /// Apply a partial update and return the row as stored.
    async fn update(
        &self,
        account_id: &str,
        changes: ProfileChanges,
    ) -> Result<ProfileRecord, ProviderError>;
}
