//! Authentication bridge.
//!
//! Turns credentials into a bearer token the API accepts:
//! 1. try the cached token with a cheap live probe,
//! 2. otherwise open a login transport, drive the login page, and read the
//!    token out of the application's client-side storage,
//! 3. cache the new token and install it on the [`OfwClient`].
//!
//! The transport is closed on every path once it has been opened.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::CoreError;
use crate::ofw::client::OfwClient;
use crate::ofw::credentials::Credentials;
use crate::ofw::storage::TokenCache;
use crate::ofw::transport::{LoginTransport, TransportFactory, unwrap_storage_value};

/// Where the bridge is in an authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    /// Nothing attempted yet.
    Unauthenticated,
    /// Loading and probing the cached token.
    CacheCheck,
    /// The cached token was accepted.
    CachedValid,
    /// No usable cached token.
    NeedsLogin,
    /// A transport is driving the login page.
    LoginInProgress,
    /// A token is installed on the client.
    Authenticated,
    /// The last login attempt failed.
    LoginFailed,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::CacheCheck => "cache check",
            Self::CachedValid => "cached token valid",
            Self::NeedsLogin => "needs login",
            Self::LoginInProgress => "login in progress",
            Self::Authenticated => "authenticated",
            Self::LoginFailed => "login failed",
        };
        f.write_str(name)
    }
}

/// Why an authentication attempt failed.
#[derive(Debug, Error)]
pub enum AuthError {
    /// A session could not be established or the browser could not be driven.
    #[error("could not start a login session: {0}")]
    SessionInitFailed(String),

    /// The login form was not on the page.
    #[error("login form not found: {0}")]
    FormNotFound(String),

    /// The login page displayed an error.
    #[error("login rejected: {0}")]
    LoginRejected(String),

    /// Neither success nor an error was observed in time.
    #[error("login outcome unknown: {0}")]
    LoginTimeout(String),

    /// Logged in, but no token was found in client-side storage.
    #[error("no bearer token after login: {0}")]
    TokenMissing(String),

    /// An API call was made without a token.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The API rejected a request.
    #[error("API error: {status} - {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
}

impl From<CoreError> for AuthError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::NotAuthenticated => Self::NotAuthenticated,
            CoreError::Api { status, body } => Self::Api { status, body },
            other => Self::SessionInitFailed(other.to_string()),
        }
    }
}

/// A failed attempt: the state it stopped in and the reason.
#[derive(Debug, Error)]
#[error("{state}: {error}")]
pub struct AuthFailure {
    /// State reached when the failure occurred.
    pub state: AuthState,
    /// Cause.
    #[source]
    pub error: AuthError,
}

/// Where an accepted token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenSource {
    /// The token cache.
    Cache,
    /// A fresh login.
    Login,
}

/// Outcome of a successful attempt.
#[derive(Debug, Clone)]
pub struct Authenticated {
    /// Bearer token now installed on the client.
    pub token: String,
    /// Where it came from.
    pub source: TokenSource,
}

/// Cache-first authentication state machine.
#[derive(Debug)]
pub struct AuthBridge {
    cache: TokenCache,
    storage_key: String,
    state: AuthState,
}

impl AuthBridge {
    /// Create a bridge reading the token from client-side storage key `storage_key`.
    #[must_use]
    pub fn new(cache: TokenCache, storage_key: impl Into<String>) -> Self {
        Self {
            cache,
            storage_key: storage_key.into(),
            state: AuthState::Unauthenticated,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> AuthState {
        self.state
    }

    /// Token cache in use.
    #[must_use]
    pub const fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// Cache first, login on demand.
    ///
    /// # Errors
    ///
    /// Returns the failure of the login attempt when no cached token is accepted.
    pub async fn authenticate<F: TransportFactory>(
        &mut self,
        client: &mut OfwClient,
        credentials: &Credentials,
        factory: &mut F,
    ) -> Result<Authenticated, AuthFailure> {
        if let Some(authenticated) = self.try_cached(client).await {
            return Ok(authenticated);
        }
        self.login(client, credentials, factory).await
    }

    /// Install the cached token if the server still accepts it.
    ///
    /// Returns `None`, leaving the bridge in `NeedsLogin`, when there is no
    /// cached token or the probe rejects it.
    pub async fn try_cached(&mut self, client: &mut OfwClient) -> Option<Authenticated> {
        self.state = AuthState::CacheCheck;

        let Some(token) = self.cache.load() else {
            log::debug!("no cached token");
            self.state = AuthState::NeedsLogin;
            return None;
        };

        if !self.cache.validate(client, &token).await {
            log::info!("cached token rejected, login required");
            self.state = AuthState::NeedsLogin;
            return None;
        }

        self.state = AuthState::CachedValid;
        log::info!("using cached token");
        client.set_token(token.as_str());
        self.state = AuthState::Authenticated;
        Some(Authenticated {
            token,
            source: TokenSource::Cache,
        })
    }

    /// Log in through a fresh transport, ignoring the cache.
    ///
    /// On success the token is cached and installed on `client`.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthFailure`] naming the state and cause. The cache is
    /// left untouched.
    pub async fn login<F: TransportFactory>(
        &mut self,
        client: &mut OfwClient,
        credentials: &Credentials,
        factory: &mut F,
    ) -> Result<Authenticated, AuthFailure> {
        self.state = AuthState::LoginInProgress;
        log::info!("logging in as {}", credentials.username());

        let mut transport = match factory.open().await {
            Ok(transport) => transport,
            Err(e) => return Err(self.fail(e)),
        };
        let outcome = self.extract_token(&mut transport, client, credentials).await;
        transport.close().await;

        let token = match outcome {
            Ok(token) => token,
            Err(e) => return Err(self.fail(e)),
        };

        if let Err(e) = self.cache.save(&token) {
            log::warn!("caching token at {}: {e}", self.cache.path().display());
        }
        client.set_token(token.as_str());
        self.state = AuthState::Authenticated;
        Ok(Authenticated {
            token,
            source: TokenSource::Login,
        })
    }

    async fn extract_token<T: LoginTransport>(
        &self,
        transport: &mut T,
        client: &OfwClient,
        credentials: &Credentials,
    ) -> Result<String, AuthError> {
        transport.login(credentials).await?;

        let key = self.storage_key.as_str();
        if let Some(token) = transport
            .storage_value(key)
            .await?
            .map(|raw| unwrap_storage_value(&raw))
            .filter(|t| !t.is_empty())
        {
            log::debug!("token read from page storage key '{key}'");
            return Ok(token);
        }

        log::debug!("'{key}' missing from page storage, fetching the storage document");
        let cookies = transport.cookies().await?;
        let document = match client.fetch_storage_document(&cookies).await {
            Ok(document) => document,
            Err(e) => {
                return Err(AuthError::TokenMissing(format!(
                    "'{key}' not in page storage and the storage document failed: {e}"
                )));
            }
        };

        match document.get(key) {
            Some(Value::String(raw)) if !unwrap_storage_value(raw).is_empty() => {
                log::debug!("token read from storage document");
                Ok(unwrap_storage_value(raw))
            }
            Some(Value::Null | Value::String(_)) | None => Err(AuthError::TokenMissing(format!(
                "'{key}' not in page storage or the storage document"
            ))),
            Some(other) => Ok(other.to_string()),
        }
    }

    fn fail(&mut self, error: AuthError) -> AuthFailure {
        let failure = AuthFailure {
            state: self.state,
            error,
        };
        log::warn!("authentication failed: {failure}");
        self.state = AuthState::LoginFailed;
        failure
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::config::ServiceConfig;
    use crate::ofw::models::SessionCookie;

    /// Transport double with a canned outcome.
    #[derive(Debug)]
    struct CannedTransport {
        login: Option<fn() -> AuthError>,
        storage: Option<String>,
        closed: Arc<AtomicUsize>,
    }

    impl LoginTransport for CannedTransport {
        async fn login(&mut self, _credentials: &Credentials) -> Result<(), AuthError> {
            self.login.map_or(Ok(()), |fail| Err(fail()))
        }

        async fn cookies(&mut self) -> Result<Vec<SessionCookie>, AuthError> {
            Ok(Vec::new())
        }

        async fn storage_value(&mut self, _key: &str) -> Result<Option<String>, AuthError> {
            Ok(self.storage.clone())
        }

        async fn close(self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Debug, Default)]
    struct CannedFactory {
        fail_open: bool,
        login: Option<fn() -> AuthError>,
        storage: Option<String>,
        opened: usize,
        closed: Arc<AtomicUsize>,
    }

    impl TransportFactory for CannedFactory {
        type Transport = CannedTransport;

        async fn open(&mut self) -> Result<CannedTransport, AuthError> {
            if self.fail_open {
                return Err(AuthError::SessionInitFailed("no chromedriver".to_string()));
            }
            self.opened += 1;
            Ok(CannedTransport {
                login: self.login,
                storage: self.storage.clone(),
                closed: Arc::clone(&self.closed),
            })
        }
    }

    fn offline_client() -> OfwClient {
        let service = ServiceConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            ..ServiceConfig::default()
        };
        OfwClient::new(&service, Duration::from_millis(200)).expect("client")
    }

    fn bridge(dir: &tempfile::TempDir) -> AuthBridge {
        AuthBridge::new(TokenCache::new(dir.path().join("auth_token.json")), "auth")
    }

    fn creds() -> Credentials {
        Credentials::new("parent@example.com", "pw")
    }

    #[tokio::test]
    async fn empty_cache_needs_login_without_network() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut bridge = bridge(&dir);
        let mut client = offline_client();

        assert!(bridge.try_cached(&mut client).await.is_none());
        assert_eq!(bridge.state(), AuthState::NeedsLogin);
        assert!(!client.has_token());
    }

    #[tokio::test]
    async fn login_caches_and_installs_unwrapped_token() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut bridge = bridge(&dir);
        let mut client = offline_client();
        let mut factory = CannedFactory {
            storage: Some("\"tok-1\"".to_string()),
            ..CannedFactory::default()
        };

        let ok = bridge
            .login(&mut client, &creds(), &mut factory)
            .await
            .expect("login");
        assert_eq!(ok.token, "tok-1");
        assert_eq!(ok.source, TokenSource::Login);
        assert_eq!(bridge.state(), AuthState::Authenticated);
        assert_eq!(client.token(), Some("tok-1"));
        assert_eq!(bridge.cache().load().as_deref(), Some("tok-1"));
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_login_leaves_cache_alone_and_closes_transport() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut bridge = bridge(&dir);
        bridge.cache().save("old").expect("seed cache");
        let mut client = offline_client();
        let mut factory = CannedFactory {
            login: Some(|| AuthError::LoginRejected("Invalid password".to_string())),
            ..CannedFactory::default()
        };

        let failure = bridge
            .login(&mut client, &creds(), &mut factory)
            .await
            .expect_err("rejected");
        assert_eq!(failure.state, AuthState::LoginInProgress);
        assert!(matches!(
            failure.error,
            AuthError::LoginRejected(ref t) if t == "Invalid password"
        ));
        assert_eq!(bridge.state(), AuthState::LoginFailed);
        assert_eq!(bridge.cache().load().as_deref(), Some("old"));
        assert!(!client.has_token());
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_token_everywhere_is_token_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut bridge = bridge(&dir);
        let mut client = offline_client();
        let mut factory = CannedFactory::default();

        let failure = bridge
            .login(&mut client, &creds(), &mut factory)
            .await
            .expect_err("no token");
        assert!(matches!(failure.error, AuthError::TokenMissing(_)));
        assert_eq!(bridge.cache().load(), None);
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_that_never_opens_is_session_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut bridge = bridge(&dir);
        let mut client = offline_client();
        let mut factory = CannedFactory {
            fail_open: true,
            ..CannedFactory::default()
        };

        let failure = bridge
            .login(&mut client, &creds(), &mut factory)
            .await
            .expect_err("open fails");
        assert!(matches!(failure.error, AuthError::SessionInitFailed(_)));
        assert_eq!(factory.opened, 0);
        assert_eq!(factory.closed.load(Ordering::SeqCst), 0);
        assert_eq!(
            failure.to_string(),
            "login in progress: could not start a login session: no chromedriver"
        );
    }

    #[test]
    fn core_errors_map_onto_bridge_taxonomy() {
        assert!(matches!(
            AuthError::from(CoreError::NotAuthenticated),
            AuthError::NotAuthenticated
        ));
        assert!(matches!(
            AuthError::from(CoreError::Api {
                status: 500,
                body: "boom".into()
            }),
            AuthError::Api { status: 500, .. }
        ));
        assert!(matches!(
            AuthError::from(CoreError::Http("refused".into())),
            AuthError::SessionInitFailed(_)
        ));
    }
}
