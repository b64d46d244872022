//! PostgREST-style profile table client. Reads run under the session's
//! bearer token so row security sees the right account.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use tracing::debug;

use super::gotrue::TokenState;
use super::{ProfileChanges, ProfileRecord, ProfileStore, ProviderError};

pub struct PostgrestProfileStore {
    base: Url,
    api_key: String,
    table: String,
    client: reqwest::Client,
    tokens: Arc<TokenState>,
}

impl PostgrestProfileStore {
    pub fn new(base: &str, api_key: &str, tokens: Arc<TokenState>) -> Result<Self, ProviderError> {
        let base = Url::parse(base)
            .map_err(|e| ProviderError::Network(format!("invalid base URL: {}", e)))?;
        Ok(Self {
            base,
            api_key: api_key.to_string(),
            table: "profiles".to_string(),
            client: reqwest::Client::new(),
            tokens,
        })
    }

    fn table_url(&self, account_id: &str) -> Result<Url, ProviderError> {
        let path = format!(
            "/rest/v1/{}?id=eq.{}&select=*",
            self.table,
            urlencoding::encode(account_id)
        );
        self.base
            .join(&path)
            .map_err(|e| ProviderError::Network(format!("invalid table endpoint: {}", e)))
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let req = req.header("apikey", &self.api_key);
        match self.tokens.access_token() {
            Some(token) => req.bearer_auth(token),
            None => req.bearer_auth(&self.api_key),
        }
    }

    async fn fail(resp: reqwest::Response) -> ProviderError {
        let status = resp.status().as_u16();
        let val: serde_json::Value = resp.json().await.unwrap_or(serde_json::json!({}));
        let msg = val
            .get("message")
            .or_else(|| val.get("details"))
            .and_then(|v| v.as_str())
            .unwrap_or("profile request failed")
            .to_string();
        match status {
            401 => ProviderError::Credentials(msg),
            _ => ProviderError::Service { status, message: msg },
        }
    }
}

#[async_trait]
impl ProfileStore for PostgrestProfileStore {
    async fn fetch(&self, account_id: &str) -> Result<Option<ProfileRecord>, ProviderError> {
        let url = self.table_url(account_id)?;
        let resp = self.authed(self.client.get(url)).send().await?;
        if !resp.status().is_success() {
            return Err(Self::fail(resp).await);
        }
        let mut rows: Vec<ProfileRecord> = resp.json().await?;
        debug!(account_id = %account_id, found = !rows.is_empty(), "profile fetch");
        Ok(if rows.is_empty() { None } else { Some(rows.remove(0)) })
    }

    async fn update(
        &self,
        account_id: &str,
        changes: ProfileChanges,
    ) -> Result<ProfileRecord, ProviderError> {
        let url = self.table_url(account_id)?;
        let resp = self
            .authed(self.client.patch(url))
            .header("Prefer", "return=representation")
            .json(&changes)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::fail(resp).await);
        }
        let mut rows: Vec<ProfileRecord> = resp.json().await?;
        if rows.is_empty() {
            return Err(ProviderError::Service {
                status: 404,
                message: format!("no profile row for account {}", account_id),
            });
        }
        Ok(rows.remove(0))
    }
}
