//! In-process identity provider and profile store. Backs the crate's own
//! tests and serves as a dev backend when no remote deployment is available.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{
    AccountInfo, AccountMetadata, IdentityProvider, ProfileChanges, ProfileRecord, ProfileStore,
    ProviderError, ProviderSession, SignUpOutcome,
};
use crate::session::Role;

#[derive(Debug, Clone)]
struct LocalAccount {
    id: String,
    email: String,
    password: String,
    metadata: AccountMetadata,
    confirmed: bool,
}

pub struct LocalIdentityProvider {
    accounts: RwLock<HashMap<String, LocalAccount>>,
    active: RwLock<Option<ProviderSession>>,
    require_email_confirmation: AtomicBool,
    fail_next: Mutex<Option<ProviderError>>,
    counter: AtomicU64,
}

impl Default for LocalIdentityProvider {
    fn default() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            active: RwLock::new(None),
            require_email_confirmation: AtomicBool::new(false),
            fail_next: Mutex::new(None),
            counter: AtomicU64::new(1),
        }
    }
}

impl LocalIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_email_confirmation_required(&self, required: bool) {
        self.require_email_confirmation.store(required, Ordering::SeqCst);
    }

    /// Fail the next provider call with the given error.
    pub fn inject_failure(&self, err: ProviderError) {
        *self.fail_next.lock() = Some(err);
    }

    /// Pre-create a confirmed account, returning its id.
    pub fn seed_account(&self, email: &str, password: &str, name: &str, role: Role) -> String {
        let id = self.next_id();
        self.accounts.write().insert(
            email.to_string(),
            LocalAccount {
                id: id.clone(),
                email: email.to_string(),
                password: password.to_string(),
                metadata: AccountMetadata { name: Some(name.to_string()), role: Some(role) },
                confirmed: true,
            },
        );
        id
    }

    /// Overwrite an account's provider-side metadata. Visible to the client
    /// only after `refresh_session` re-reads the registry.
    pub fn set_account_metadata(&self, email: &str, metadata: AccountMetadata) {
        if let Some(acct) = self.accounts.write().get_mut(email) {
            acct.metadata = metadata;
        }
    }

    fn next_id(&self) -> String {
        format!("acct-{}", self.counter.fetch_add(1, Ordering::SeqCst))
    }

    fn take_failure(&self) -> Option<ProviderError> {
        self.fail_next.lock().take()
    }

    fn issue(&self, acct: &LocalAccount) -> ProviderSession {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let session = ProviderSession {
            account: AccountInfo {
                id: acct.id.clone(),
                email: acct.email.clone(),
                metadata: acct.metadata.clone(),
            },
            access_token: format!("token-{}", n),
            refresh_token: Some(format!("refresh-{}", n)),
            expires_at: Some(Utc::now() + Duration::hours(1)),
        };
        *self.active.write() = Some(session.clone());
        session
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: AccountMetadata,
    ) -> Result<SignUpOutcome, ProviderError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        if self.accounts.read().contains_key(email) {
            return Err(ProviderError::Conflict("User already registered".into()));
        }
        let confirmed = !self.require_email_confirmation.load(Ordering::SeqCst);
        let acct = LocalAccount {
            id: self.next_id(),
            email: email.to_string(),
            password: password.to_string(),
            metadata,
            confirmed,
        };
        self.accounts.write().insert(email.to_string(), acct.clone());
        debug!(email = %email, confirmed, "local sign-up");
        let account = AccountInfo {
            id: acct.id.clone(),
            email: acct.email.clone(),
            metadata: acct.metadata.clone(),
        };
        if confirmed {
            let session = self.issue(&acct);
            Ok(SignUpOutcome { account: Some(account), session: Some(session) })
        } else {
            Ok(SignUpOutcome { account: Some(account), session: None })
        }
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderSession, ProviderError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let acct = {
            let accounts = self.accounts.read();
            accounts.get(email).cloned()
        };
        let Some(acct) = acct else {
            return Err(ProviderError::Credentials("Invalid login credentials".into()));
        };
        if acct.password != password {
            return Err(ProviderError::Credentials("Invalid login credentials".into()));
        }
        if !acct.confirmed {
            return Err(ProviderError::Credentials("Email not confirmed".into()));
        }
        Ok(self.issue(&acct))
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        *self.active.write() = None;
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<ProviderSession>, ProviderError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        Ok(self.active.read().clone())
    }

    async fn refresh_session(&self) -> Result<Option<ProviderSession>, ProviderError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let email = {
            let active = self.active.read();
            match active.as_ref() {
                Some(sess) => sess.account.email.clone(),
                None => return Ok(None),
            }
        };
        // Re-read the registry so metadata updated since login becomes
        // visible, then mint a fresh token pair.
        let acct = self.accounts.read().get(&email).cloned();
        match acct {
            Some(acct) => Ok(Some(self.issue(&acct))),
            None => {
                *self.active.write() = None;
                Ok(None)
            }
        }
    }
}

pub struct LocalProfileStore {
    rows: RwLock<HashMap<String, ProfileRecord>>,
    fail_next: Mutex<Option<ProviderError>>,
}

impl Default for LocalProfileStore {
    fn default() -> Self {
        Self { rows: RwLock::new(HashMap::new()), fail_next: Mutex::new(None) }
    }
}

impl LocalProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: ProfileRecord) {
        self.rows.write().insert(record.id.clone(), record);
    }

    pub fn inject_failure(&self, err: ProviderError) {
        *self.fail_next.lock() = Some(err);
    }
}

#[async_trait]
impl ProfileStore for LocalProfileStore {
    async fn fetch(&self, account_id: &str) -> Result<Option<ProfileRecord>, ProviderError> {
        if let Some(err) = self.fail_next.lock().take() {
            return Err(err);
        }
        Ok(self.rows.read().get(account_id).cloned())
    }

    async fn update(
        &self,
        account_id: &str,
        changes: ProfileChanges,
    ) -> Result<ProfileRecord, ProviderError> {
        if let Some(err) = self.fail_next.lock().take() {
            return Err(err);
        }
        let mut rows = self.rows.write();
        let Some(row) = rows.get_mut(account_id) else {
            return Err(ProviderError::Service {
                status: 404,
                message: format!("no profile row for account {}", account_id),
            });
        };
        if let Some(name) = changes.name {
            row.name = Some(name);
        }
        if let Some(role) = changes.role {
            row.role = Some(role);
        }
        row.updated_at = Some(Utc::now());
        Ok(row.clone())
    }
}
