//! Login transports.
//!
//! A transport drives one login attempt and exposes what the bridge needs
//! afterwards: session cookies and client-side storage. Two implementations
//! exist, a direct HTTP session and a scripted browser; [`TransportKind`]
//! picks one and the bridge only ever sees [`LoginTransport`].

pub mod browser;
pub mod http;

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::{AuthConfig, ServiceConfig};
use crate::ofw::auth::AuthError;
use crate::ofw::credentials::Credentials;
use crate::ofw::debug::DebugArtifacts;
use crate::ofw::models::SessionCookie;
use crate::ofw::webdriver::WebDriverBrowser;

pub use browser::{Browser, BrowserError, BrowserTransport, ElementRef};
pub use http::HttpTransport;

/// One login attempt's worth of session.
pub trait LoginTransport {
    /// Drive the login flow to the authenticated landing page.
    fn login(&mut self, credentials: &Credentials) -> impl Future<Output = Result<(), AuthError>>;

    /// Cookies held by the session.
    fn cookies(&mut self) -> impl Future<Output = Result<Vec<SessionCookie>, AuthError>>;

    /// Raw client-side storage value for `key`, if present.
    fn storage_value(&mut self, key: &str)
    -> impl Future<Output = Result<Option<String>, AuthError>>;

    /// Release everything the transport holds. Never fails.
    fn close(self) -> impl Future<Output = ()>;
}

/// Opens a fresh transport for each login attempt.
pub trait TransportFactory {
    /// Transport produced.
    type Transport: LoginTransport;

    /// Open a transport.
    fn open(&mut self) -> impl Future<Output = Result<Self::Transport, AuthError>>;
}

/// Which transport performs the login.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Scripted headless browser. Handles script-driven redirects.
    #[default]
    Browser,
    /// Direct HTTP form post. No browser needed, but blind to script-driven pages.
    Http,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Browser => write!(f, "browser"),
            Self::Http => write!(f, "http"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "browser" => Ok(Self::Browser),
            "http" => Ok(Self::Http),
            other => Err(format!("unknown transport '{other}' (expected browser or http)")),
        }
    }
}

/// Either transport, chosen at runtime.
#[derive(Debug)]
pub enum OfwTransport {
    /// Direct HTTP session.
    Http(HttpTransport),
    /// WebDriver-controlled Chrome.
    Browser(BrowserTransport<WebDriverBrowser>),
}

impl LoginTransport for OfwTransport {
    async fn login(&mut self, credentials: &Credentials) -> Result<(), AuthError> {
        match self {
            Self::Http(t) => t.login(credentials).await,
            Self::Browser(t) => t.login(credentials).await,
        }
    }

    async fn cookies(&mut self) -> Result<Vec<SessionCookie>, AuthError> {
        match self {
            Self::Http(t) => t.cookies().await,
            Self::Browser(t) => t.cookies().await,
        }
    }

    async fn storage_value(&mut self, key: &str) -> Result<Option<String>, AuthError> {
        match self {
            Self::Http(t) => t.storage_value(key).await,
            Self::Browser(t) => t.storage_value(key).await,
        }
    }

    async fn close(self) {
        match self {
            Self::Http(t) => t.close().await,
            Self::Browser(t) => t.close().await,
        }
    }
}

/// Factory opening the transport named by the configuration.
#[derive(Debug, Clone)]
pub struct DefaultTransportFactory {
    kind: TransportKind,
    service: ServiceConfig,
    auth: AuthConfig,
    timeout: Duration,
    artifacts: Option<DebugArtifacts>,
}

impl DefaultTransportFactory {
    /// Build from config. `timeout` bounds each HTTP request made by the transport.
    #[must_use]
    pub fn new(service: &ServiceConfig, auth: &AuthConfig, timeout: Duration) -> Self {
        Self {
            kind: auth.transport,
            service: service.clone(),
            auth: auth.clone(),
            timeout,
            artifacts: None,
        }
    }

    /// Override the configured transport.
    #[must_use]
    pub const fn with_kind(mut self, kind: TransportKind) -> Self {
        self.kind = kind;
        self
    }

    /// Record the login attempt into `artifacts`.
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: Option<DebugArtifacts>) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Transport this factory opens.
    #[must_use]
    pub const fn kind(&self) -> TransportKind {
        self.kind
    }
}

impl TransportFactory for DefaultTransportFactory {
    type Transport = OfwTransport;

    async fn open(&mut self) -> Result<OfwTransport, AuthError> {
        log::debug!("opening {} transport", self.kind);
        match self.kind {
            TransportKind::Http => {
                let transport = HttpTransport::new(&self.service, &self.auth.login, self.timeout)?;
                Ok(OfwTransport::Http(transport))
            }
            TransportKind::Browser => {
                let browser = WebDriverBrowser::launch(&self.auth.browser, &self.service.user_agent)
                    .await
                    .map_err(|e| AuthError::SessionInitFailed(e.to_string()))?;
                Ok(OfwTransport::Browser(BrowserTransport::new(
                    browser,
                    &self.service,
                    &self.auth.login,
                    self.artifacts.clone(),
                )))
            }
        }
    }
}

/// Undo one level of JSON string encoding.
///
/// Client-side storage holds strings, and the site stores its token
/// JSON-encoded, so `"\"abc\""` comes back as `abc`. Anything that is not a
/// JSON string literal is returned unchanged.
#[must_use]
pub fn unwrap_storage_value(raw: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::String(inner)) => inner,
        _ => raw.to_string(),
    }
}
