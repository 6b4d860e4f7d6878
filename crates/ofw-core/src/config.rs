//! Configuration types and loading for the application.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use config::{Config, Environment, File, FileFormat};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ofw::transport::TransportKind;
use crate::paths::{expand_str_path, write_default_config};
use crate::{AppPaths, env_prefix};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(
    title = "Application Configuration",
    description = "Main configuration for the application"
)]
pub struct AppConfig {
    /// JSON Schema reference for editor support.
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    #[schemars(skip)]
    pub schema: Option<String>,

    /// Active configuration profile.
    #[schemars(default = "default_profile")]
    pub profile: String,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Runtime behavior configuration.
    pub runtime: RuntimeConfig,

    /// Custom paths for data and state directories.
    pub paths: PathsConfig,

    /// Remote service endpoints.
    pub service: ServiceConfig,

    /// Authentication bridge behavior.
    pub auth: AuthConfig,
}

fn default_profile() -> String {
    "default".to_string()
}

impl AppConfig {
    /// Override the profile if a value is provided.
    #[must_use]
    pub fn with_profile_override(mut self, profile: Option<String>) -> Self {
        if let Some(profile) = profile {
            self.profile = profile;
        }
        self
    }

    /// Load configuration from file and environment, creating defaults if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read, parsed, or written.
    pub fn load(paths: &AppPaths, dry_run: bool) -> Result<Self> {
        if !paths.config_file.exists() {
            if dry_run {
                log::info!(
                    "dry-run: would create default config at {}",
                    paths.config_file.display()
                );
            } else {
                write_default_config(&paths.config_file)?;
            }
        }

        Self::load_from_path(&paths.config_file)
    }

    /// Load configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed.
    pub fn load_from_path(config_file: &Path) -> Result<Self> {
        let env_prefix = env_prefix();
        let built = Config::builder()
            .set_default("profile", "default")?
            .set_default("logging.level", "info")?
            .set_default("runtime.timeout", 60_i64)?
            .add_source(
                File::from(config_file)
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(Environment::with_prefix(env_prefix.as_str()).separator("__"))
            .build()?;

        let mut config: Self = built.try_deserialize()?;

        if let Some(ref file) = config.logging.file {
            let expanded = expand_str_path(file)?;
            config.logging.file = Some(expanded.display().to_string());
        }

        Ok(config)
    }

    /// Resolve the token cache file: explicit override, then config, then the data dir.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured path cannot be expanded.
    pub fn token_cache_path(&self, paths: &AppPaths, explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return crate::paths::expand_path(path);
        }
        match self.auth.token_cache {
            Some(ref configured) => expand_str_path(configured),
            None => Ok(paths.default_token_cache()),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema: None,
            profile: "default".to_string(),
            logging: LoggingConfig::default(),
            runtime: RuntimeConfig::default(),
            paths: PathsConfig::default(),
            service: ServiceConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Logging configuration")]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace).
    #[schemars(default = "default_log_level")]
    pub level: LogLevel,

    /// Optional path for log file output. Supports ~ and environment variables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Log level enumeration for schema validation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only emit error-level messages.
    Error,
    /// Emit warnings and errors.
    Warn,
    /// Emit informational messages and above (default).
    #[default]
    Info,
    /// Emit debug diagnostics and above.
    Debug,
    /// Emit all messages including fine-grained traces.
    Trace,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warn => write!(f, "warn"),
            Self::Info => write!(f, "info"),
            Self::Debug => write!(f, "debug"),
            Self::Trace => write!(f, "trace"),
        }
    }
}

const fn default_log_level() -> LogLevel {
    LogLevel::Info
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file: None,
        }
    }
}

/// Runtime behavior configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Runtime behavior configuration")]
pub struct RuntimeConfig {
    /// Timeout in seconds for a single HTTP request (default: 60).
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 1))]
    pub timeout: Option<u64>,
}

impl RuntimeConfig {
    /// Request timeout as a `Duration`.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(60))
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { timeout: Some(60) }
    }
}

/// Path override configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Custom paths for data and state directories")]
pub struct PathsConfig {
    /// Directory for persistent data. Supports ~ and environment variables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Directory for state files. Supports ~ and environment variables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<String>,
}

/// Remote service configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Our Family Wizard endpoints")]
pub struct ServiceConfig {
    /// Site root, without a trailing slash.
    pub base_url: String,

    /// User-Agent sent by the HTTP transport and the API client.
    pub user_agent: String,
}

impl ServiceConfig {
    /// Login page URL.
    #[must_use]
    pub fn login_url(&self) -> String {
        format!("{}/app/login", self.base_url)
    }

    /// Logout URL.
    #[must_use]
    pub fn logout_url(&self) -> String {
        format!("{}/app/logout", self.base_url)
    }

    /// Client-side storage document that seeds session cookies and carries the token.
    #[must_use]
    pub fn storage_document_url(&self) -> String {
        format!("{}/ofw/appv2/localstorage.json", self.base_url)
    }

    /// Root of the versioned REST API.
    #[must_use]
    pub fn api_base(&self) -> String {
        format!("{}/pub", self.base_url)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://ofw.ourfamilywizard.com".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
        }
    }
}

/// Authentication bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Authentication bridge configuration")]
pub struct AuthConfig {
    /// Login transport: "browser" (default) or "http".
    pub transport: TransportKind,

    /// Token cache file. Defaults to `auth_token.json` in the data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_cache: Option<String>,

    /// Client-side storage key holding the bearer token.
    pub storage_key: String,

    /// Write screenshots and page snapshots during login.
    pub debug_artifacts: bool,

    /// Browser engine settings.
    pub browser: BrowserConfig,

    /// Login flow selectors and timings.
    pub login: LoginFlowConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            token_cache: None,
            storage_key: "auth".to_string(),
            debug_artifacts: false,
            browser: BrowserConfig::default(),
            login: LoginFlowConfig::default(),
        }
    }
}

/// Browser engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Browser engine (WebDriver) configuration")]
pub struct BrowserConfig {
    /// Run Chrome without a window.
    pub headless: bool,

    /// Existing WebDriver server to use instead of spawning chromedriver.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webdriver_url: Option<String>,

    /// chromedriver executable, resolved through PATH when not absolute.
    pub chromedriver: String,

    /// Browser window size as "WIDTH,HEIGHT".
    pub window_size: String,

    /// How long to wait for chromedriver to report ready, in milliseconds.
    #[schemars(range(min = 1))]
    pub startup_timeout_ms: u64,

    /// WebDriver page load timeout, in milliseconds.
    #[schemars(range(min = 1))]
    pub page_load_timeout_ms: u64,
}

impl BrowserConfig {
    /// Driver startup timeout.
    #[must_use]
    pub const fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Page load timeout.
    #[must_use]
    pub const fn page_load_timeout(&self) -> Duration {
        Duration::from_millis(self.page_load_timeout_ms)
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            webdriver_url: None,
            chromedriver: "chromedriver".to_string(),
            window_size: "1920,1080".to_string(),
            startup_timeout_ms: 10_000,
            page_load_timeout_ms: 30_000,
        }
    }
}

/// Login flow selectors and timings.
///
/// The success markers are tied to the site's current markup and change
/// without notice, so they live here rather than in code.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Login page selectors and timings")]
pub struct LoginFlowConfig {
    /// `name` attribute of the username input.
    pub username_field: String,

    /// `name` attribute of the password input.
    pub password_field: String,

    /// Text matched against `<button>` labels when no submit control is found.
    pub submit_text_hint: String,

    /// Element ids that only exist on the authenticated landing page.
    pub success_markers: Vec<String>,

    /// CSS selector for error-styled elements on the login page.
    pub error_selector: String,

    /// URL fragment meaning "still on the login page".
    pub login_url_hint: String,

    /// Bounded wait for the login form, in milliseconds.
    pub form_timeout_ms: u64,

    /// Bounded wait for `document.readyState == "complete"`, in milliseconds.
    pub page_load_wait_ms: u64,

    /// Grace period after page load for asynchronous scripts, in milliseconds.
    pub script_grace_ms: u64,

    /// Delay after submitting before polling starts, in milliseconds.
    pub settle_delay_ms: u64,

    /// Interval between landing-page checks, in milliseconds.
    #[schemars(range(min = 1))]
    pub poll_interval_ms: u64,

    /// Overall wait for the landing page, in milliseconds.
    pub login_timeout_ms: u64,

    /// Error elements are ignored until this much polling time has passed, in milliseconds.
    pub error_min_elapsed_ms: u64,

    /// Delay after success so the page can populate its storage, in milliseconds.
    pub post_login_delay_ms: u64,
}

impl LoginFlowConfig {
    /// Bounded wait for the login form.
    #[must_use]
    pub const fn form_timeout(&self) -> Duration {
        Duration::from_millis(self.form_timeout_ms)
    }

    /// Bounded wait for the document ready state.
    #[must_use]
    pub const fn page_load_wait(&self) -> Duration {
        Duration::from_millis(self.page_load_wait_ms)
    }

    /// Grace period for asynchronous scripts.
    #[must_use]
    pub const fn script_grace(&self) -> Duration {
        Duration::from_millis(self.script_grace_ms)
    }

    /// Delay after submit.
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Landing page timeout.
    #[must_use]
    pub const fn login_timeout(&self) -> Duration {
        Duration::from_millis(self.login_timeout_ms)
    }

    /// Minimum elapsed polling time before error elements count.
    #[must_use]
    pub const fn error_min_elapsed(&self) -> Duration {
        Duration::from_millis(self.error_min_elapsed_ms)
    }

    /// Delay after success.
    #[must_use]
    pub const fn post_login_delay(&self) -> Duration {
        Duration::from_millis(self.post_login_delay_ms)
    }
}

impl Default for LoginFlowConfig {
    fn default() -> Self {
        Self {
            username_field: "username".to_string(),
            password_field: "password".to_string(),
            submit_text_hint: "Sign".to_string(),
            success_markers: vec!["greeting".to_string(), "notificationsSection".to_string()],
            error_selector: ".error, .alert-danger, [class*='error']".to_string(),
            login_url_hint: "login".to_string(),
            form_timeout_ms: 10_000,
            page_load_wait_ms: 10_000,
            script_grace_ms: 1_000,
            settle_delay_ms: 2_000,
            poll_interval_ms: 500,
            login_timeout_ms: 15_000,
            error_min_elapsed_ms: 5_000,
            post_login_delay_ms: 2_000,
        }
    }
}
