//! Scripted-browser login.
//!
//! The login page only reaches the authenticated landing page through a chain
//! of script-driven redirects, so success is judged by watching the live DOM
//! for marker elements instead of by HTTP status or URL.

use std::future::Future;

use serde_json::{Value, json};
use thiserror::Error;
use tokio::time::sleep;

use crate::config::{LoginFlowConfig, ServiceConfig};
use crate::ofw::auth::AuthError;
use crate::ofw::credentials::Credentials;
use crate::ofw::debug::DebugArtifacts;
use crate::ofw::models::SessionCookie;
use crate::ofw::poll::Poller;
use crate::ofw::transport::LoginTransport;

/// Opaque element handle returned by [`Browser::find_all`].
pub type ElementRef = String;

/// Errors reported by a browser engine.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// The engine could not be started or reached.
    #[error("starting browser: {0}")]
    Launch(String),

    /// The engine stopped answering.
    #[error("browser unreachable: {0}")]
    Transport(String),

    /// The engine rejected a command.
    #[error("{error}: {message}")]
    Command {
        /// Error code, e.g. `no such element`.
        error: String,
        /// Human-readable detail.
        message: String,
    },

    /// The engine answered with something unexpected.
    #[error("unexpected browser response: {0}")]
    Protocol(String),
}

/// The handful of browser operations the login flow needs.
pub trait Browser {
    /// Load `url` and wait for the engine's own page-load strategy.
    fn navigate(&mut self, url: &str) -> impl Future<Output = Result<(), BrowserError>>;

    /// URL of the current page.
    fn current_url(&mut self) -> impl Future<Output = Result<String, BrowserError>>;

    /// Run `script` in the page with `args` and return its result.
    fn execute(
        &mut self,
        script: &str,
        args: Vec<Value>,
    ) -> impl Future<Output = Result<Value, BrowserError>>;

    /// Every element matching a CSS selector. Empty when none match.
    fn find_all(
        &mut self,
        css: &str,
    ) -> impl Future<Output = Result<Vec<ElementRef>, BrowserError>>;

    /// Clear an input.
    fn clear(&mut self, element: &ElementRef) -> impl Future<Output = Result<(), BrowserError>>;

    /// Type into an input.
    fn send_keys(
        &mut self,
        element: &ElementRef,
        text: &str,
    ) -> impl Future<Output = Result<(), BrowserError>>;

    /// Click an element.
    fn click(&mut self, element: &ElementRef) -> impl Future<Output = Result<(), BrowserError>>;

    /// Rendered text of an element.
    fn text(&mut self, element: &ElementRef) -> impl Future<Output = Result<String, BrowserError>>;

    /// Cookies visible to the current page.
    fn cookies(&mut self) -> impl Future<Output = Result<Vec<SessionCookie>, BrowserError>>;

    /// PNG screenshot of the viewport.
    fn screenshot(&mut self) -> impl Future<Output = Result<Vec<u8>, BrowserError>>;

    /// Serialized DOM of the current page.
    fn page_source(&mut self) -> impl Future<Output = Result<String, BrowserError>>;

    /// End the session and stop the engine.
    fn quit(self) -> impl Future<Output = ()>;
}

/// Submit controls tried in order before falling back to text matching.
const SUBMIT_SELECTORS: [&str; 3] = [
    r#"[name="submit"]"#,
    r#"button[type="submit"]"#,
    r#"input[type="submit"]"#,
];

const READY_STATE_SCRIPT: &str = "return document.readyState;";
const FORM_SUBMIT_SCRIPT: &str = "document.querySelector('form').submit();";
const STORAGE_ITEM_SCRIPT: &str = "return window.localStorage.getItem(arguments[0]);";
const STORAGE_DUMP_SCRIPT: &str = "return Object.assign({}, window.localStorage);";
const SESSION_STORAGE_DUMP_SCRIPT: &str = "return Object.assign({}, window.sessionStorage);";
const DIV_IDS_SCRIPT: &str =
    "return Array.from(document.querySelectorAll('div[id]')).slice(0, 20).map(d => d.id);";

/// Consecutive unreachable-browser errors tolerated while waiting for the landing page.
const MAX_UNREACHABLE_CHECKS: u32 = 3;

enum Observation {
    LoggedIn,
    Rejected(String),
    Pending,
}

/// Login through a real browser session.
#[derive(Debug)]
pub struct BrowserTransport<B> {
    browser: B,
    flow: LoginFlowConfig,
    login_url: String,
    logout_url: String,
    artifacts: Option<DebugArtifacts>,
    logged_in: bool,
}

impl<B: Browser> BrowserTransport<B> {
    /// Wrap an open browser.
    #[must_use]
    pub fn new(
        browser: B,
        service: &ServiceConfig,
        flow: &LoginFlowConfig,
        artifacts: Option<DebugArtifacts>,
    ) -> Self {
        Self {
            browser,
            flow: flow.clone(),
            login_url: service.login_url(),
            logout_url: service.logout_url(),
            artifacts,
            logged_in: false,
        }
    }

    async fn wait_for_page_load(&mut self) {
        let mut poller = Poller::new(self.flow.poll_interval(), self.flow.page_load_wait());
        while poller.tick().await {
            match self.browser.execute(READY_STATE_SCRIPT, Vec::new()).await {
                Ok(Value::String(state)) if state == "complete" => return,
                Ok(_) => {}
                Err(e) => log::debug!("reading document.readyState: {e}"),
            }
        }
        log::warn!(
            "page did not finish loading within {:?}",
            self.flow.page_load_wait()
        );
    }

    async fn first_match(&mut self, css: &str) -> Option<ElementRef> {
        match self.browser.find_all(css).await {
            Ok(found) => found.into_iter().next(),
            Err(e) => {
                log::debug!("finding {css}: {e}");
                None
            }
        }
    }

    async fn wait_for_field(&mut self, name: &str) -> Option<ElementRef> {
        let css = by_name(name);
        let mut poller = Poller::new(self.flow.poll_interval(), self.flow.form_timeout());
        while poller.tick().await {
            if let Some(found) = self.first_match(&css).await {
                return Some(found);
            }
        }
        None
    }

    async fn find_submit(&mut self) -> Option<ElementRef> {
        for css in SUBMIT_SELECTORS {
            if let Some(found) = self.first_match(css).await {
                return Some(found);
            }
        }

        let buttons = self.browser.find_all("button").await.unwrap_or_default();
        for button in buttons {
            match self.browser.text(&button).await {
                Ok(text) if text.contains(&self.flow.submit_text_hint) => return Some(button),
                Ok(_) => {}
                Err(e) => log::debug!("reading button text: {e}"),
            }
        }
        None
    }

    async fn fill_and_submit(
        &mut self,
        username: &ElementRef,
        password: &ElementRef,
        submit: Option<&ElementRef>,
        credentials: &Credentials,
    ) -> Result<(), BrowserError> {
        self.browser.clear(username).await?;
        self.browser.send_keys(username, credentials.username()).await?;
        self.browser.clear(password).await?;
        self.browser.send_keys(password, credentials.password()).await?;
        self.snapshot("02_credentials_entered").await;

        match submit {
            Some(button) => self.browser.click(button).await,
            None => {
                log::debug!("no submit control; submitting the form by script");
                self.browser
                    .execute(FORM_SUBMIT_SCRIPT, Vec::new())
                    .await
                    .map(|_| ())
            }
        }
    }

    async fn observe(&mut self, poller: &Poller) -> Result<Observation, BrowserError> {
        let mut all_present = true;
        for marker in self.flow.success_markers.clone() {
            if self.browser.find_all(&by_id(&marker)).await?.is_empty() {
                all_present = false;
                break;
            }
        }
        if all_present {
            return Ok(Observation::LoggedIn);
        }

        let url = self.browser.current_url().await?;
        if url.to_lowercase().contains(&self.flow.login_url_hint)
            && poller.elapsed() >= self.flow.error_min_elapsed()
        {
            let selector = self.flow.error_selector.clone();
            if let Some(element) = self.browser.find_all(&selector).await?.into_iter().next() {
                let text = self.browser.text(&element).await?;
                let text = text.trim();
                if !text.is_empty() {
                    return Ok(Observation::Rejected(text.to_string()));
                }
            }
        }

        log::debug!("waiting for landing page, url={url}");
        Ok(Observation::Pending)
    }

    async fn snapshot(&mut self, name: &str) {
        let Some(artifacts) = self.artifacts.clone() else {
            return;
        };
        match self.browser.screenshot().await {
            Ok(png) => artifacts.save_png(name, &png),
            Err(e) => log::debug!("screenshot {name}: {e}"),
        }
        match self.browser.page_source().await {
            Ok(html) => artifacts.save_text(&format!("{name}.html"), &html),
            Err(e) => log::debug!("page source {name}: {e}"),
        }
    }

    async fn log_div_ids(&mut self) {
        match self.browser.execute(DIV_IDS_SCRIPT, Vec::new()).await {
            Ok(ids) => log::info!("div ids on page: {ids}"),
            Err(e) => log::debug!("listing div ids: {e}"),
        }
    }

    async fn dump_storage(&mut self) {
        let Some(artifacts) = self.artifacts.clone() else {
            return;
        };
        self.dump_storage_area(&artifacts, STORAGE_DUMP_SCRIPT, "localstorage_data").await;
        self.dump_storage_area(&artifacts, SESSION_STORAGE_DUMP_SCRIPT, "sessionstorage_data")
            .await;
        match self.browser.cookies().await {
            Ok(cookies) => artifacts.save_cookies(&cookies),
            Err(e) => log::debug!("reading cookies for artifacts: {e}"),
        }
    }

    async fn dump_storage_area(&mut self, artifacts: &DebugArtifacts, script: &str, name: &str) {
        match self.browser.execute(script, Vec::new()).await {
            Ok(Value::Object(map)) => {
                let cleaned: serde_json::Map<String, Value> = map
                    .into_iter()
                    .map(|(k, v)| {
                        let v = match v {
                            Value::String(s) => {
                                serde_json::from_str(&s).unwrap_or(Value::String(s))
                            }
                            other => other,
                        };
                        (k, v)
                    })
                    .collect();
                artifacts.save_json(name, &Value::Object(cleaned));
            }
            Ok(other) => log::debug!("unexpected {name} dump: {other}"),
            Err(e) => log::debug!("dumping {name}: {e}"),
        }
    }
}

impl<B: Browser> LoginTransport for BrowserTransport<B> {
    async fn login(&mut self, credentials: &Credentials) -> Result<(), AuthError> {
        log::info!("opening login page {}", self.login_url);
        let login_url = self.login_url.clone();
        self.browser
            .navigate(&login_url)
            .await
            .map_err(|e| AuthError::SessionInitFailed(format!("loading {login_url}: {e}")))?;
        self.wait_for_page_load().await;
        sleep(self.flow.script_grace()).await;
        self.snapshot("01_login_page").await;

        let username_field = self.flow.username_field.clone();
        let password_field = self.flow.password_field.clone();
        let Some(username) = self.wait_for_field(&username_field).await else {
            self.snapshot("error_form_not_found").await;
            return Err(AuthError::FormNotFound(format!(
                "no [name=\"{username_field}\"] input within {:?}",
                self.flow.form_timeout()
            )));
        };
        let Some(password) = self.first_match(&by_name(&password_field)).await else {
            self.snapshot("error_form_not_found").await;
            return Err(AuthError::FormNotFound(format!(
                "no [name=\"{password_field}\"] input"
            )));
        };
        let submit = self.find_submit().await;

        self.fill_and_submit(&username, &password, submit.as_ref(), credentials)
            .await
            .map_err(|e| AuthError::SessionInitFailed(format!("submitting login form: {e}")))?;
        log::info!("credentials submitted, waiting for landing page");

        sleep(self.flow.settle_delay()).await;

        let mut poller = Poller::new(self.flow.poll_interval(), self.flow.login_timeout());
        let mut logged_in = false;
        let mut unreachable = 0;
        while poller.tick().await {
            match self.observe(&poller).await {
                Ok(Observation::LoggedIn) => {
                    logged_in = true;
                    break;
                }
                Ok(Observation::Rejected(text)) => {
                    self.snapshot("03_login_error").await;
                    return Err(AuthError::LoginRejected(text));
                }
                Ok(Observation::Pending) => unreachable = 0,
                Err(BrowserError::Transport(e)) => {
                    unreachable += 1;
                    log::debug!("checking landing page: browser unreachable ({unreachable}): {e}");
                    if unreachable >= MAX_UNREACHABLE_CHECKS {
                        return Err(AuthError::SessionInitFailed(format!(
                            "browser stopped responding while waiting for the landing page: {e}"
                        )));
                    }
                }
                Err(e) => {
                    unreachable = 0;
                    log::debug!("checking landing page: {e}");
                }
            }
        }

        self.wait_for_page_load().await;
        self.snapshot("04_after_login").await;

        if !logged_in {
            self.snapshot("05_elements_not_found").await;
            self.log_div_ids().await;
            return Err(AuthError::LoginTimeout(format!(
                "landing page markers {:?} not seen within {:?}",
                self.flow.success_markers,
                self.flow.login_timeout()
            )));
        }

        log::info!("login succeeded");
        self.logged_in = true;
        // the landing page fills client-side storage asynchronously
        sleep(self.flow.post_login_delay()).await;
        Ok(())
    }

    async fn cookies(&mut self) -> Result<Vec<SessionCookie>, AuthError> {
        self.browser
            .cookies()
            .await
            .map_err(|e| AuthError::SessionInitFailed(format!("reading cookies: {e}")))
    }

    async fn storage_value(&mut self, key: &str) -> Result<Option<String>, AuthError> {
        self.dump_storage().await;
        let value = self
            .browser
            .execute(STORAGE_ITEM_SCRIPT, vec![json!(key)])
            .await
            .map_err(|e| AuthError::SessionInitFailed(format!("reading storage: {e}")))?;
        Ok(match value {
            Value::String(s) => Some(s),
            Value::Null => None,
            other => Some(other.to_string()),
        })
    }

    async fn close(mut self) {
        if self.logged_in {
            let logout_url = self.logout_url.clone();
            if let Err(e) = self.browser.navigate(&logout_url).await {
                log::debug!("logging out: {e}");
            }
        }
        self.browser.quit().await;
    }
}

fn by_name(name: &str) -> String {
    format!(r#"[name="{name}"]"#)
}

fn by_id(id: &str) -> String {
    format!(r#"[id="{id}"]"#)
}
