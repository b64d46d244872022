//! Environment-driven configuration and wiring.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::cache::FileCache;
use crate::providers::{GoTrueIdentityProvider, PostgrestProfileStore, TokenState};
use crate::session::{RefreshPolicy, SessionStore};

#[derive(Debug, Clone)]
pub struct Settings {
    /// Base URL of the hosted backend (identity + table endpoints).
    pub api_url: String,
    /// Publishable API key sent with every request.
    pub api_key: String,
    /// Directory for the persisted session fragment.
    pub cache_dir: String,
    pub refresh_policy: RefreshPolicy,
}

fn parse_refresh_policy(raw: Option<&str>) -> RefreshPolicy {
    match raw {
        Some("keep") => RefreshPolicy::KeepCache,
        _ => RefreshPolicy::InvalidateCache,
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let api_url = std::env::var("RENOVIA_API_URL")
            .unwrap_or_else(|_| "http://localhost:54321".to_string());
        let api_key = std::env::var("RENOVIA_API_KEY").unwrap_or_default();
        let cache_dir = std::env::var("RENOVIA_CACHE_DIR").unwrap_or_else(|_| ".renovia".to_string());
        let refresh_policy =
            parse_refresh_policy(std::env::var("RENOVIA_REFRESH_POLICY").ok().as_deref());
        Settings { api_url, api_key, cache_dir, refresh_policy }
    }

    /// Wire a session store to the HTTP providers and the file cache.
    pub fn build_store(&self) -> Result<SessionStore> {
        info!(
            api_url = %self.api_url,
            cache_dir = %self.cache_dir,
            refresh_policy = ?self.refresh_policy,
            "building session store"
        );
        let cache: Arc<FileCache> = Arc::new(FileCache::new(&self.cache_dir)?);
        // Tokens share the session fragment's cache so a restarted process
        // can confirm its session instead of logging out unconditionally.
        let tokens = TokenState::persistent(cache.clone());
        let identity = GoTrueIdentityProvider::new(&self.api_url, &self.api_key, tokens.clone())
            .context("configuring identity provider")?;
        let profiles = PostgrestProfileStore::new(&self.api_url, &self.api_key, tokens)
            .context("configuring profile store")?;
        Ok(SessionStore::new(
            Arc::new(identity),
            Arc::new(profiles),
            cache,
            self.refresh_policy,
        ))
    }
}
