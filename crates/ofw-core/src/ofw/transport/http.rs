//! Direct HTTP login without a browser.
//!
//! Replays the form post the login page would make. Works while the landing
//! page is rendered server-side; when the site moves the redirect into
//! script, the markers never show up and the attempt ends as `LoginTimeout`.

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client, Url};
use serde_json::{Map, Value};

use crate::config::{LoginFlowConfig, ServiceConfig};
use crate::ofw::auth::AuthError;
use crate::ofw::credentials::Credentials;
use crate::ofw::html;
use crate::ofw::models::SessionCookie;
use crate::ofw::transport::LoginTransport;

/// Field names the CSRF token is posted under.
const CSRF_FIELDS: [&str; 3] = ["csrf_token", "_csrf", "authenticity_token"];

/// Login over a cookie-carrying HTTP session.
#[derive(Debug)]
pub struct HttpTransport {
    http: Client,
    jar: Arc<Jar>,
    service: ServiceConfig,
    flow: LoginFlowConfig,
}

impl HttpTransport {
    /// Create a session with an empty cookie jar.
    ///
    /// # Errors
    ///
    /// Returns `SessionInitFailed` if the HTTP client cannot be built.
    pub fn new(
        service: &ServiceConfig,
        flow: &LoginFlowConfig,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        let jar = Arc::new(Jar::default());
        let http = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .user_agent(service.user_agent.as_str())
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::SessionInitFailed(format!("creating HTTP client: {e}")))?;

        Ok(Self {
            http,
            jar,
            service: service.clone(),
            flow: flow.clone(),
        })
    }

    async fn get_text(&self, url: &str) -> Result<String, AuthError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| AuthError::SessionInitFailed(format!("GET {url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::SessionInitFailed(format!("GET {url}: {status}")));
        }
        response
            .text()
            .await
            .map_err(|e| AuthError::SessionInitFailed(format!("reading {url}: {e}")))
    }

    async fn storage_document(&self) -> Result<Map<String, Value>, AuthError> {
        let url = self.service.storage_document_url();
        let text = self.get_text(&url).await?;
        serde_json::from_str(&text)
            .map_err(|e| AuthError::SessionInitFailed(format!("parsing {url}: {e}")))
    }
}

impl LoginTransport for HttpTransport {
    async fn login(&mut self, credentials: &Credentials) -> Result<(), AuthError> {
        // the storage document hands out the session cookies the login page expects
        let storage_url = self.service.storage_document_url();
        self.get_text(&storage_url).await?;

        let login_url = self.service.login_url();
        let page = self.get_text(&login_url).await?;
        let form = login_form(&self.flow, credentials, &page);
        log::debug!(
            "posting login form with fields {:?}",
            form.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>()
        );

        let response = self
            .http
            .post(&login_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::SessionInitFailed(format!("POST {login_url}: {e}")))?;
        let status = response.status();
        let final_url = response.url().to_string();
        log::debug!("login POST {status} -> {final_url}");
        if status.is_server_error() {
            return Err(AuthError::SessionInitFailed(format!("POST {login_url}: {status}")));
        }
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::SessionInitFailed(format!("reading login response: {e}")))?;

        if let Some(text) = html::error_text(&body) {
            let text = if text.is_empty() {
                "login page reported an error".to_string()
            } else {
                text
            };
            return Err(AuthError::LoginRejected(text));
        }
        if status.is_client_error() {
            return Err(AuthError::LoginRejected(format!("login rejected with {status}")));
        }

        if self
            .flow
            .success_markers
            .iter()
            .all(|marker| html::has_element_id(&body, marker))
        {
            log::info!("login succeeded");
            return Ok(());
        }

        Err(AuthError::LoginTimeout(format!(
            "landing page markers {:?} not in response from {final_url} (div ids: {:?})",
            self.flow.success_markers,
            html::div_ids(&body, 20)
        )))
    }

    async fn cookies(&mut self) -> Result<Vec<SessionCookie>, AuthError> {
        let url = Url::parse(&self.service.base_url)
            .map_err(|e| AuthError::SessionInitFailed(format!("invalid base URL: {e}")))?;
        let domain = url.host_str().map(str::to_string);
        let Some(header) = self.jar.cookies(&url) else {
            return Ok(Vec::new());
        };
        let header = header.to_str().unwrap_or_default();

        Ok(header
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .map(|(name, value)| SessionCookie {
                name: name.to_string(),
                value: value.to_string(),
                domain: domain.clone(),
                path: Some("/".to_string()),
                secure: url.scheme() == "https",
                expiry: None,
            })
            .collect())
    }

    async fn storage_value(&mut self, key: &str) -> Result<Option<String>, AuthError> {
        let document = self.storage_document().await?;
        Ok(match document.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        })
    }

    async fn close(self) {
        log::debug!("dropping HTTP login session");
    }
}

/// Build the login form: fixed fields, credentials, the page's hidden inputs,
/// then the CSRF token under every name the server might read it from.
/// Later entries replace earlier ones with the same name.
fn login_form(
    flow: &LoginFlowConfig,
    credentials: &Credentials,
    page: &str,
) -> Vec<(String, String)> {
    let mut form: Vec<(String, String)> = Vec::new();
    let mut set = |name: &str, value: &str| {
        if let Some(slot) = form.iter_mut().find(|(k, _)| k == name) {
            slot.1 = value.to_string();
        } else {
            form.push((name.to_string(), value.to_string()));
        }
    };

    set("submit", "Sign-In");
    set("_eventId", "submit");
    set(&flow.username_field, credentials.username());
    set(&flow.password_field, credentials.password());
    for (name, value) in html::hidden_fields(page) {
        set(&name, &value);
    }
    if let Some(token) = html::csrf_token(page) {
        for name in CSRF_FIELDS {
            set(name, &token);
        }
    }
    form
}
