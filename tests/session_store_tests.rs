//! Session store integration tests: the full operation lifecycle against the
//! in-process provider, covering persistence, reconciliation precedence, and
//! the failure paths.

use std::sync::Arc;

use renovia::cache::{MemoryCache, PersistedCache};
use renovia::providers::{
    AccountMetadata, LocalIdentityProvider, LocalProfileStore, ProfileRecord, ProviderError,
};
use renovia::session::{PersistedFragment, SESSION_CACHE_KEY};
use renovia::{RefreshPolicy, Role, SessionError, SessionState, SessionStore};

struct Harness {
    identity: Arc<LocalIdentityProvider>,
    profiles: Arc<LocalProfileStore>,
    cache: Arc<MemoryCache>,
    store: SessionStore,
}

fn harness(policy: RefreshPolicy) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
    let identity = Arc::new(LocalIdentityProvider::new());
    let profiles = Arc::new(LocalProfileStore::new());
    let cache = Arc::new(MemoryCache::new());
    let store = SessionStore::new(identity.clone(), profiles.clone(), cache.clone(), policy);
    Harness { identity, profiles, cache, store }
}

fn read_fragment(cache: &MemoryCache) -> PersistedFragment {
    let raw = cache.get(SESSION_CACHE_KEY).expect("fragment present");
    serde_json::from_str(&raw).expect("fragment parses")
}

#[tokio::test]
async fn login_persists_fragment_matching_memory() {
    let h = harness(RefreshPolicy::InvalidateCache);
    h.identity.seed_account("owner@x.com", "secret1", "Olive Owner", Role::PropertyOwner);

    h.store.login("owner@x.com", "secret1").await.expect("login");

    let snap = h.store.snapshot();
    assert!(snap.is_authenticated());
    assert!(!snap.is_loading);

    let frag = read_fragment(&h.cache);
    assert!(frag.is_authenticated);
    assert_eq!(frag.user.as_ref(), snap.user());
    // Transient fields never reach the cache.
    let raw = h.cache.get(SESSION_CACHE_KEY).unwrap();
    assert!(!raw.contains("is_loading"));
    assert!(!raw.contains("last_error"));
}

#[tokio::test]
async fn check_session_is_idempotent() {
    let h = harness(RefreshPolicy::InvalidateCache);
    let id = h.identity.seed_account("t@x.com", "pw", "Terry", Role::Tenant);
    h.profiles.insert(ProfileRecord {
        id: id.clone(),
        name: Some("Terry Tenant".into()),
        role: Some(Role::Tenant),
        ..Default::default()
    });
    h.store.login("t@x.com", "pw").await.unwrap();

    h.store.check_session().await.unwrap();
    let first = h.store.current_user().expect("user after first check");
    h.store.check_session().await.unwrap();
    let second = h.store.current_user().expect("user after second check");
    assert_eq!(first, second);
    assert_eq!(first.name, "Terry Tenant");
}

#[tokio::test]
async fn profile_row_takes_precedence_over_metadata() {
    let h = harness(RefreshPolicy::InvalidateCache);
    let id = h.identity.seed_account("a@x.com", "pw", "Bob", Role::PropertyOwner);
    h.profiles.insert(ProfileRecord {
        id,
        name: Some("Alice".into()),
        role: Some(Role::Administrator),
        ..Default::default()
    });
    h.store.login("a@x.com", "pw").await.unwrap();
    h.store.check_session().await.unwrap();

    let user = h.store.current_user().unwrap();
    assert_eq!(user.name, "Alice");
    assert_eq!(user.role, Role::Administrator);
}

#[tokio::test]
async fn metadata_fallback_when_profile_read_fails() {
    let h = harness(RefreshPolicy::InvalidateCache);
    h.identity.seed_account("t@x.com", "pw", "Terry", Role::Tenant);
    h.store.login("t@x.com", "pw").await.unwrap();

    h.profiles.inject_failure(ProviderError::Service { status: 503, message: "down".into() });
    // Degraded reconciliation still succeeds.
    h.store.check_session().await.expect("check survives profile outage");

    let user = h.store.current_user().unwrap();
    assert_eq!(user.role, Role::Tenant);
    assert_eq!(user.name, "Terry");
}

#[tokio::test]
async fn role_defaults_to_property_owner_when_no_source_has_one() {
    let h = harness(RefreshPolicy::InvalidateCache);
    h.identity.seed_account("n@x.com", "pw", "", Role::Tenant);
    // Strip the registration metadata so neither source offers a role.
    h.identity.set_account_metadata("n@x.com", AccountMetadata::default());
    h.store.login("n@x.com", "pw").await.unwrap();

    let user = h.store.current_user().unwrap();
    assert_eq!(user.role, Role::PropertyOwner);
    assert_eq!(user.name, "");
}

#[tokio::test]
async fn refresh_invalidates_persisted_fragment_but_keeps_memory() {
    let h = harness(RefreshPolicy::InvalidateCache);
    let id = h.identity.seed_account("o@x.com", "pw", "Olive", Role::PropertyOwner);
    h.profiles.insert(ProfileRecord { id, name: Some("Olive O.".into()), ..Default::default() });
    h.store.login("o@x.com", "pw").await.unwrap();
    assert!(h.cache.get(SESSION_CACHE_KEY).is_some());

    h.store.refresh_user_data().await.expect("refresh");

    assert!(h.store.is_authenticated());
    assert_eq!(h.store.current_user().unwrap().name, "Olive O.");
    assert_eq!(h.cache.get(SESSION_CACHE_KEY), None, "fragment must be deleted");
}

#[tokio::test]
async fn keep_cache_policy_retains_fragment_after_refresh() {
    let h = harness(RefreshPolicy::KeepCache);
    h.identity.seed_account("o@x.com", "pw", "Olive", Role::PropertyOwner);
    h.store.login("o@x.com", "pw").await.unwrap();

    h.store.refresh_user_data().await.expect("refresh");

    let frag = read_fragment(&h.cache);
    assert!(frag.is_authenticated);
    assert_eq!(frag.user, h.store.current_user());
}

#[tokio::test]
async fn refresh_makes_updated_provider_metadata_visible() {
    let h = harness(RefreshPolicy::InvalidateCache);
    h.identity.seed_account("r@x.com", "pw", "Before", Role::Tenant);
    h.store.login("r@x.com", "pw").await.unwrap();
    assert_eq!(h.store.current_user().unwrap().name, "Before");

    h.identity.set_account_metadata(
        "r@x.com",
        AccountMetadata { name: Some("After".into()), role: Some(Role::Tenant) },
    );
    h.store.refresh_user_data().await.unwrap();
    assert_eq!(h.store.current_user().unwrap().name, "After");
}

#[tokio::test]
async fn refresh_without_session_fails_with_no_session() {
    let h = harness(RefreshPolicy::InvalidateCache);
    let err = h.store.refresh_user_data().await.expect_err("must fail");
    assert!(matches!(err, SessionError::NoSession { .. }));
    assert_eq!(h.store.last_error(), Some(err));
    assert!(!h.store.is_authenticated());
}

#[tokio::test]
async fn logout_reaches_clean_terminal_state() {
    let h = harness(RefreshPolicy::InvalidateCache);
    h.identity.seed_account("o@x.com", "pw", "Olive", Role::PropertyOwner);
    h.store.login("o@x.com", "pw").await.unwrap();
    // Leave a stale error behind to prove logout clears it.
    let _ = h.store.login("o@x.com", "wrong").await;
    assert!(h.store.last_error().is_some());

    h.store.logout().await.expect("logout");

    let snap = h.store.snapshot();
    assert_eq!(snap.state, SessionState::LoggedOut);
    assert_eq!(snap.last_error, None);
    assert!(!snap.is_loading);
    let frag = read_fragment(&h.cache);
    assert!(!frag.is_authenticated);
    assert_eq!(frag.user, None);
}

#[tokio::test]
async fn logout_fails_closed_on_remote_failure() {
    let h = harness(RefreshPolicy::InvalidateCache);
    h.identity.seed_account("o@x.com", "pw", "Olive", Role::PropertyOwner);
    h.store.login("o@x.com", "pw").await.unwrap();

    h.identity.inject_failure(ProviderError::Network("connection reset".into()));
    let err = h.store.logout().await.expect_err("remote sign-out failed");
    assert!(err.is_retryable());

    // Local state must not believe it is still logged in.
    assert!(!h.store.is_authenticated());
    assert_eq!(h.store.current_user(), None);
    assert!(h.store.last_error().is_some());
}

#[tokio::test]
async fn register_with_deferred_activation_reports_informational() {
    let h = harness(RefreshPolicy::InvalidateCache);
    h.identity.set_email_confirmation_required(true);

    let err = h
        .store
        .register("new@x.com", "secret1", "New User", Role::Tenant)
        .await
        .expect_err("activation deferred");

    assert!(err.is_informational());
    assert!(err.message().contains("check your email"));
    assert!(!h.store.is_authenticated());
    assert_eq!(h.store.current_user(), None);
    assert_eq!(h.store.last_error(), Some(err));
}

#[tokio::test]
async fn register_with_immediate_session_logs_in() {
    let h = harness(RefreshPolicy::InvalidateCache);
    h.store
        .register("new@x.com", "secret1", "New User", Role::Tenant)
        .await
        .expect("register");

    let user = h.store.current_user().expect("logged in");
    assert_eq!(user.email, "new@x.com");
    assert_eq!(user.name, "New User");
    assert_eq!(user.role, Role::Tenant);
    assert!(h.store.last_error().is_none());
}

#[tokio::test]
async fn duplicate_registration_is_a_conflict() {
    let h = harness(RefreshPolicy::InvalidateCache);
    h.identity.seed_account("dup@x.com", "pw", "Dup", Role::Tenant);
    let err = h
        .store
        .register("dup@x.com", "pw2", "Dup Again", Role::Tenant)
        .await
        .expect_err("duplicate");
    assert!(matches!(err, SessionError::Conflict { .. }));
    assert!(!h.store.is_authenticated());
}

#[tokio::test]
async fn repeated_wrong_password_records_error_each_time() {
    let h = harness(RefreshPolicy::InvalidateCache);
    h.identity.seed_account("o@x.com", "right", "Olive", Role::PropertyOwner);

    for _ in 0..2 {
        let err = h.store.login("o@x.com", "wrong").await.expect_err("bad password");
        assert!(matches!(err, SessionError::Credentials { .. }));
        assert_eq!(h.store.last_error(), Some(err));
        assert!(!h.store.is_authenticated());
        assert!(!h.store.is_loading());
    }
}

#[tokio::test]
async fn login_failure_leaves_prior_user_untouched() {
    let h = harness(RefreshPolicy::InvalidateCache);
    h.identity.seed_account("o@x.com", "pw", "Olive", Role::PropertyOwner);
    h.store.login("o@x.com", "pw").await.unwrap();
    let before = h.store.current_user();

    let _ = h.store.login("o@x.com", "wrong").await;
    assert_eq!(h.store.current_user(), before);
    assert!(h.store.last_error().is_some());
}

#[tokio::test]
async fn empty_credentials_are_rejected_locally() {
    let h = harness(RefreshPolicy::InvalidateCache);
    let err = h.store.login("", "").await.expect_err("validation");
    assert!(matches!(err, SessionError::Validation { .. }));

    let err = h.store.register("x@x.com", "", "X", Role::Tenant).await.expect_err("validation");
    assert!(matches!(err, SessionError::Validation { .. }));
}

#[tokio::test]
async fn check_session_with_no_remote_session_logs_out() {
    let h = harness(RefreshPolicy::InvalidateCache);
    h.store.check_session().await.expect("check");
    assert_eq!(h.store.snapshot().state, SessionState::LoggedOut);
}

#[tokio::test]
async fn check_session_provider_error_logs_out_and_records() {
    let h = harness(RefreshPolicy::InvalidateCache);
    h.identity.seed_account("o@x.com", "pw", "Olive", Role::PropertyOwner);
    h.store.login("o@x.com", "pw").await.unwrap();

    h.identity.inject_failure(ProviderError::Network("timeout".into()));
    let err = h.store.check_session().await.expect_err("provider down");
    assert!(err.is_retryable());
    assert!(!h.store.is_authenticated());
}

#[tokio::test]
async fn subscribers_observe_state_changes() {
    let h = harness(RefreshPolicy::InvalidateCache);
    h.identity.seed_account("o@x.com", "pw", "Olive", Role::PropertyOwner);
    let mut rx = h.store.subscribe();

    h.store.login("o@x.com", "pw").await.unwrap();

    assert!(rx.has_changed().unwrap());
    let snap = rx.borrow_and_update().clone();
    assert!(snap.is_authenticated());
}
