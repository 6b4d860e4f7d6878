//! Chrome driven over the W3C WebDriver protocol.
//!
//! Either connects to an already-running WebDriver server or spawns
//! `chromedriver` on a free local port. The child process is killed when the
//! browser is dropped, even if `quit` is never reached.

use std::net::TcpListener;
use std::process::Stdio;
use std::time::Duration;

use base64::Engine;
use reqwest::{Client, Method};
use serde_json::{Value, json};
use tokio::process::{Child, Command};

use crate::config::BrowserConfig;
use crate::ofw::models::SessionCookie;
use crate::ofw::poll::Poller;
use crate::ofw::transport::{Browser, BrowserError, ElementRef};

/// Key under which WebDriver returns element references.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const STARTUP_POLL: Duration = Duration::from_millis(100);

/// A live WebDriver session.
#[derive(Debug)]
pub struct WebDriverBrowser {
    http: Client,
    session_url: String,
    driver: Option<Child>,
}

impl WebDriverBrowser {
    /// Start a browser session as configured.
    ///
    /// # Errors
    ///
    /// Returns `Launch` if chromedriver cannot be started or never becomes
    /// ready, or the session cannot be created.
    pub async fn launch(cfg: &BrowserConfig, user_agent: &str) -> Result<Self, BrowserError> {
        let http = Client::builder()
            .timeout(cfg.page_load_timeout() + Duration::from_secs(30))
            .build()
            .map_err(|e| BrowserError::Launch(format!("creating HTTP client: {e}")))?;

        let (endpoint, driver) = match cfg.webdriver_url {
            Some(ref url) => (url.trim_end_matches('/').to_string(), None),
            None => {
                let (endpoint, child) = spawn_chromedriver(&cfg.chromedriver)?;
                (endpoint, Some(child))
            }
        };

        wait_until_ready(&http, &endpoint, cfg.startup_timeout()).await?;

        let created = send(
            &http,
            Method::POST,
            &format!("{endpoint}/session"),
            Some(capabilities(cfg, user_agent)),
        )
        .await
        .map_err(|e| BrowserError::Launch(format!("creating session: {e}")))?;
        let session_id = created["sessionId"]
            .as_str()
            .ok_or_else(|| BrowserError::Protocol("new session without sessionId".to_string()))?;
        log::debug!("webdriver session {session_id} on {endpoint}");

        let browser = Self {
            http,
            session_url: format!("{endpoint}/session/{session_id}"),
            driver,
        };
        let page_load_ms = u64::try_from(cfg.page_load_timeout().as_millis()).unwrap_or(u64::MAX);
        browser
            .command(Method::POST, "timeouts", Some(json!({ "pageLoad": page_load_ms })))
            .await?;
        Ok(browser)
    }

    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, BrowserError> {
        let url = if path.is_empty() {
            self.session_url.clone()
        } else {
            format!("{}/{path}", self.session_url)
        };
        send(&self.http, method, &url, body).await
    }

    async fn element_command(
        &self,
        method: Method,
        element: &ElementRef,
        action: &str,
        body: Option<Value>,
    ) -> Result<Value, BrowserError> {
        self.command(method, &format!("element/{element}/{action}"), body)
            .await
    }
}

impl Browser for WebDriverBrowser {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.command(Method::POST, "url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    async fn current_url(&mut self) -> Result<String, BrowserError> {
        let value = self.command(Method::GET, "url", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BrowserError::Protocol(format!("url is not a string: {value}")))
    }

    async fn execute(&mut self, script: &str, args: Vec<Value>) -> Result<Value, BrowserError> {
        self.command(
            Method::POST,
            "execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }

    async fn find_all(&mut self, css: &str) -> Result<Vec<ElementRef>, BrowserError> {
        let value = self
            .command(
                Method::POST,
                "elements",
                Some(json!({ "using": "css selector", "value": css })),
            )
            .await?;
        let Value::Array(items) = value else {
            return Err(BrowserError::Protocol(format!(
                "elements is not an array: {value}"
            )));
        };
        Ok(items
            .iter()
            .filter_map(|item| item[ELEMENT_KEY].as_str().map(str::to_string))
            .collect())
    }

    async fn clear(&mut self, element: &ElementRef) -> Result<(), BrowserError> {
        self.element_command(Method::POST, element, "clear", Some(json!({})))
            .await
            .map(|_| ())
    }

    async fn send_keys(&mut self, element: &ElementRef, text: &str) -> Result<(), BrowserError> {
        self.element_command(Method::POST, element, "value", Some(json!({ "text": text })))
            .await
            .map(|_| ())
    }

    async fn click(&mut self, element: &ElementRef) -> Result<(), BrowserError> {
        self.element_command(Method::POST, element, "click", Some(json!({})))
            .await
            .map(|_| ())
    }

    async fn text(&mut self, element: &ElementRef) -> Result<String, BrowserError> {
        let value = self.element_command(Method::GET, element, "text", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn cookies(&mut self) -> Result<Vec<SessionCookie>, BrowserError> {
        let value = self.command(Method::GET, "cookie", None).await?;
        serde_json::from_value(value)
            .map_err(|e| BrowserError::Protocol(format!("parsing cookies: {e}")))
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError> {
        let value = self.command(Method::GET, "screenshot", None).await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| BrowserError::Protocol("screenshot is not a string".to_string()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| BrowserError::Protocol(format!("decoding screenshot: {e}")))
    }

    async fn page_source(&mut self) -> Result<String, BrowserError> {
        let value = self.command(Method::GET, "source", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn quit(mut self) {
        if let Err(e) = self.command(Method::DELETE, "", None).await {
            log::debug!("ending webdriver session: {e}");
        }
        if let Some(mut child) = self.driver.take()
            && let Err(e) = child.kill().await
        {
            log::debug!("stopping chromedriver: {e}");
        }
    }
}

/// Issue one WebDriver request and unwrap its `value`.
async fn send(
    http: &Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, BrowserError> {
    let mut request = http.request(method.clone(), url);
    if let Some(ref body) = body {
        request = request.json(body);
    }
    let response = request
        .send()
        .await
        .map_err(|e| BrowserError::Transport(format!("{method} {url}: {e}")))?;
    let status = response.status();
    let mut payload: Value = response
        .json()
        .await
        .map_err(|e| BrowserError::Protocol(format!("{method} {url}: {e}")))?;
    let value = payload
        .get_mut("value")
        .map(Value::take)
        .unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(value);
    }
    Err(BrowserError::Command {
        error: value["error"].as_str().unwrap_or("unknown error").to_string(),
        message: value["message"].as_str().unwrap_or_default().to_string(),
    })
}

fn spawn_chromedriver(program: &str) -> Result<(String, Child), BrowserError> {
    let port = free_port()?;
    log::debug!("starting {program} on port {port}");

    let child = Command::new(program)
        .arg(format!("--port={port}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BrowserError::Launch(format!(
                    "{program} not found - install chromedriver or set auth.browser.webdriver_url"
                ))
            } else {
                BrowserError::Launch(format!("running {program}: {e}"))
            }
        })?;

    Ok((format!("http://127.0.0.1:{port}"), child))
}

fn free_port() -> Result<u16, BrowserError> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .map_err(|e| BrowserError::Launch(format!("finding a free port: {e}")))?;
    listener
        .local_addr()
        .map(|addr| addr.port())
        .map_err(|e| BrowserError::Launch(format!("finding a free port: {e}")))
}

async fn wait_until_ready(
    http: &Client,
    endpoint: &str,
    timeout: Duration,
) -> Result<(), BrowserError> {
    let url = format!("{endpoint}/status");
    let mut poller = Poller::new(STARTUP_POLL, timeout);
    while poller.tick().await {
        match send(http, Method::GET, &url, None).await {
            Ok(status) if status["ready"].as_bool().unwrap_or(false) => return Ok(()),
            Ok(status) => log::debug!("webdriver not ready: {status}"),
            Err(e) => log::trace!("webdriver not up yet: {e}"),
        }
    }
    Err(BrowserError::Launch(format!(
        "webdriver at {endpoint} not ready within {timeout:?}"
    )))
}

fn capabilities(cfg: &BrowserConfig, user_agent: &str) -> Value {
    let mut args = Vec::new();
    if cfg.headless {
        args.push("--headless=new".to_string());
    }
    args.extend([
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        format!("--window-size={}", cfg.window_size),
        format!("--user-agent={user_agent}"),
        "--disable-blink-features=AutomationControlled".to_string(),
    ]);

    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "goog:chromeOptions": {
                    "args": args,
                    "excludeSwitches": ["enable-automation"],
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_follow_config() {
        let mut cfg = BrowserConfig::default();
        let caps = capabilities(&cfg, "UA/1.0");
        let args = caps["capabilities"]["alwaysMatch"]["goog:chromeOptions"]["args"]
            .as_array()
            .expect("args")
            .clone();
        assert!(args.contains(&json!("--headless=new")));
        assert!(args.contains(&json!("--window-size=1920,1080")));
        assert!(args.contains(&json!("--user-agent=UA/1.0")));

        cfg.headless = false;
        let caps = capabilities(&cfg, "UA/1.0");
        let args = &caps["capabilities"]["alwaysMatch"]["goog:chromeOptions"]["args"];
        assert!(!args.as_array().expect("args").contains(&json!("--headless=new")));
    }

    #[tokio::test]
    async fn missing_driver_binary_is_a_launch_error() {
        let cfg = BrowserConfig {
            chromedriver: "/nonexistent/chromedriver-for-tests".to_string(),
            ..BrowserConfig::default()
        };
        let err = WebDriverBrowser::launch(&cfg, "UA")
            .await
            .expect_err("launch must fail");
        assert!(matches!(err, BrowserError::Launch(ref m) if m.contains("not found")));
    }
}
