//! GoTrue-style HTTP identity provider: signup, password grant, token
//! refresh, logout. Holds the current token pair locally so `get_session`
//! answers without a round trip.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    AccountInfo, AccountMetadata, IdentityProvider, ProviderError, ProviderSession, SignUpOutcome,
};
use crate::cache::PersistedCache;
use crate::session::Role;

/// Key under which the token pair is persisted, alongside the session
/// fragment, so a restarted process can still confirm its session remotely.
const TOKEN_CACHE_KEY: &str = "auth-tokens";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenPair {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    account: AccountInfo,
}

/// Current token pair, shared between the identity provider and any client
/// (e.g. the profile store) that must send the session's bearer token.
/// With a backing cache, writes go through so the tokens survive a restart;
/// without one the state is purely in-memory.
#[derive(Default)]
pub struct TokenState {
    inner: RwLock<Option<TokenPair>>,
    cache: Option<Arc<dyn PersistedCache>>,
}

impl TokenState {
    /// Ephemeral token state; the session dies with the process.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Write-through token state over a durable cache. Loads any previously
    /// persisted pair so `get_session` after a restart can resume the
    /// session the persisted fragment promises.
    pub fn persistent(cache: Arc<dyn PersistedCache>) -> Arc<Self> {
        let initial = cache.get(TOKEN_CACHE_KEY).and_then(|raw| {
            match serde_json::from_str::<TokenPair>(&raw) {
                Ok(pair) => Some(pair),
                Err(e) => {
                    warn!(error = %e, "discarding unreadable persisted token pair");
                    None
                }
            }
        });
        Arc::new(Self { inner: RwLock::new(initial), cache: Some(cache) })
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.read().as_ref().map(|t| t.access_token.clone())
    }

    fn set(&self, pair: TokenPair) {
        if let Some(cache) = &self.cache {
            match serde_json::to_string(&pair) {
                Ok(raw) => {
                    if let Err(e) = cache.set(TOKEN_CACHE_KEY, &raw) {
                        warn!(error = %e, "failed to persist token pair");
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode token pair"),
            }
        }
        *self.inner.write() = Some(pair);
    }

    fn clear(&self) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.remove(TOKEN_CACHE_KEY) {
                warn!(error = %e, "failed to remove persisted token pair");
            }
        }
        *self.inner.write() = None;
    }

    fn current(&self) -> Option<TokenPair> {
        self.inner.read().clone()
    }
}

pub struct GoTrueIdentityProvider {
    base: Url,
    api_key: String,
    client: reqwest::Client,
    tokens: Arc<TokenState>,
}

#[derive(Deserialize, Default)]
struct WireMetadata {
    name: Option<String>,
    role: Option<String>,
}

#[derive(Deserialize)]
struct WireUser {
    id: String,
    email: Option<String>,
    #[serde(default)]
    user_metadata: WireMetadata,
}

#[derive(Deserialize)]
struct WireSession {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    user: WireUser,
}

impl From<WireUser> for AccountInfo {
    fn from(u: WireUser) -> Self {
        AccountInfo {
            id: u.id,
            email: u.email.unwrap_or_default(),
            metadata: AccountMetadata {
                name: u.user_metadata.name,
                // Unknown role strings degrade to "no role" so the
                // projection's default applies.
                role: u.user_metadata.role.as_deref().and_then(|r| Role::from_str(r).ok()),
            },
        }
    }
}

impl GoTrueIdentityProvider {
    pub fn new(base: &str, api_key: &str, tokens: Arc<TokenState>) -> Result<Self, ProviderError> {
        let base = Url::parse(base)
            .map_err(|e| ProviderError::Network(format!("invalid base URL: {}", e)))?;
        Ok(Self {
            base,
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
            tokens,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.base
            .join(path)
            .map_err(|e| ProviderError::Network(format!("invalid endpoint {}: {}", path, e)))
    }

    async fn read_failure(resp: reqwest::Response) -> (u16, String) {
        let status = resp.status().as_u16();
        let val: serde_json::Value = resp.json().await.unwrap_or(serde_json::json!({}));
        let msg = val
            .get("error_description")
            .or_else(|| val.get("msg"))
            .or_else(|| val.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("request failed")
            .to_string();
        (status, msg)
    }

    fn store_session(&self, wire: WireSession) -> ProviderSession {
        let account: AccountInfo = wire.user.into();
        let expires_at = wire.expires_in.map(|secs| Utc::now() + Duration::seconds(secs));
        self.tokens.set(TokenPair {
            access_token: wire.access_token.clone(),
            refresh_token: wire.refresh_token.clone(),
            expires_at,
            account: account.clone(),
        });
        ProviderSession {
            account,
            access_token: wire.access_token,
            refresh_token: wire.refresh_token,
            expires_at,
        }
    }

    async fn refresh_with(&self, refresh_token: &str) -> Result<Option<ProviderSession>, ProviderError> {
        let url = self.endpoint("/auth/v1/token?grant_type=refresh_token")?;
        let resp = self
            .client
            .post(url)
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        if !resp.status().is_success() {
            let (status, msg) = Self::read_failure(resp).await;
            // A rejected refresh token means the session is gone for good.
            if status == 400 || status == 401 {
                self.tokens.clear();
                return Err(ProviderError::Credentials(msg));
            }
            return Err(ProviderError::Service { status, message: msg });
        }
        let wire: WireSession = resp.json().await?;
        Ok(Some(self.store_session(wire)))
    }
}

#[async_trait]
impl IdentityProvider for GoTrueIdentityProvider {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: AccountMetadata,
    ) -> Result<SignUpOutcome, ProviderError> {
        let url = self.endpoint("/auth/v1/signup")?;
        let resp = self
            .client
            .post(url)
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({
                "email": email,
                "password": password,
                "data": {
                    "name": metadata.name,
                    "role": metadata.role.map(|r| r.as_str()),
                },
            }))
            .send()
            .await?;
        if !resp.status().is_success() {
            let (status, msg) = Self::read_failure(resp).await;
            return Err(match status {
                409 | 422 => ProviderError::Conflict(msg),
                400 if msg.to_lowercase().contains("registered") => ProviderError::Conflict(msg),
                400 | 401 => ProviderError::Credentials(msg),
                _ => ProviderError::Service { status, message: msg },
            });
        }
        // Auto-confirm deployments return a full session; confirmation-gated
        // ones return only the pending user object.
        let val: serde_json::Value = resp.json().await?;
        if val.get("access_token").is_some() {
            let wire: WireSession = serde_json::from_value(val)
                .map_err(|e| ProviderError::Network(format!("malformed signup response: {}", e)))?;
            let session = self.store_session(wire);
            return Ok(SignUpOutcome { account: Some(session.account.clone()), session: Some(session) });
        }
        let user_val = val.get("user").cloned().unwrap_or(val);
        let account = match serde_json::from_value::<WireUser>(user_val) {
            Ok(u) => Some(AccountInfo::from(u)),
            Err(_) => None,
        };
        debug!(email = %email, "signup accepted, activation deferred");
        Ok(SignUpOutcome { account, session: None })
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderSession, ProviderError> {
        let url = self.endpoint("/auth/v1/token?grant_type=password")?;
        let resp = self
            .client
            .post(url)
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;
        if !resp.status().is_success() {
            let (status, msg) = Self::read_failure(resp).await;
            return Err(match status {
                400 | 401 => ProviderError::Credentials(msg),
                _ => ProviderError::Service { status, message: msg },
            });
        }
        let wire: WireSession = resp.json().await?;
        Ok(self.store_session(wire))
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        let Some(pair) = self.tokens.current() else {
            return Ok(());
        };
        // Local tokens are dropped whatever the remote outcome; a stale
        // bearer token must not outlive the local session.
        self.tokens.clear();
        let url = self.endpoint("/auth/v1/logout")?;
        let resp = self
            .client
            .post(url)
            .header("apikey", &self.api_key)
            .bearer_auth(&pair.access_token)
            .send()
            .await?;
        if !resp.status().is_success() && resp.status().as_u16() != 401 {
            let (status, msg) = Self::read_failure(resp).await;
            return Err(ProviderError::Service { status, message: msg });
        }
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<ProviderSession>, ProviderError> {
        let Some(pair) = self.tokens.current() else {
            return Ok(None);
        };
        let expired = pair.expires_at.map(|at| at <= Utc::now()).unwrap_or(false);
        if expired {
            match pair.refresh_token.as_deref() {
                Some(rt) => {
                    let rt = rt.to_string();
                    return self.refresh_with(&rt).await;
                }
                None => {
                    self.tokens.clear();
                    return Ok(None);
                }
            }
        }
        Ok(Some(ProviderSession {
            account: pair.account,
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            expires_at: pair.expires_at,
        }))
    }

    async fn refresh_session(&self) -> Result<Option<ProviderSession>, ProviderError> {
        let Some(pair) = self.tokens.current() else {
            return Ok(None);
        };
        let Some(rt) = pair.refresh_token else {
            return Err(ProviderError::Credentials("session has no refresh token".into()));
        };
        self.refresh_with(&rt).await
    }
}
