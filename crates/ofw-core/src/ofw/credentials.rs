//! Credential sourcing: environment first, then a `KEY=value` file.
//!
//! Interactive prompting lives in the binary; this module never touches a
//! terminal.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::CoreError;

/// Variables holding the account name, in lookup order.
pub const USERNAME_VARS: [&str; 2] = ["OFW_USERNAME", "OFW_EMAIL"];

/// Variable holding the password.
pub const PASSWORD_VAR: &str = "OFW_PASSWORD";

/// Default credentials file, relative to the working directory.
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Account name and password for one login attempt.
///
/// Never persisted. `Debug` output redacts the password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Bundle a username and password.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Account name or email.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Read from `OFW_USERNAME`/`OFW_EMAIL` and `OFW_PASSWORD`.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read from a `KEY=value` file. A missing file yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn from_env_file(path: &Path) -> Result<Option<Self>, CoreError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let vars = parse_env_file(&text);
        Ok(Self::from_lookup(|key| vars.get(key).cloned()))
    }

    /// Try the environment, then `env_file` (default `.env`).
    ///
    /// A source that supplies only one half is skipped.
    #[must_use]
    pub fn resolve(env_file: Option<&Path>) -> Option<Self> {
        if let Some(creds) = Self::from_env() {
            log::debug!("credentials from environment");
            return Some(creds);
        }

        let path = env_file.unwrap_or_else(|| Path::new(DEFAULT_ENV_FILE));
        match Self::from_env_file(path) {
            Ok(Some(creds)) => {
                log::debug!("credentials from {}", path.display());
                Some(creds)
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("reading {}: {e}", path.display());
                None
            }
        }
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let present = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let username = USERNAME_VARS.iter().find_map(|&key| present(key))?;
        let password = present(PASSWORD_VAR)?;
        Some(Self { username, password })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Parse `KEY=value` lines. Blank lines and `#` comments are skipped; keys and
/// values are trimmed and one layer of matching quotes is removed from values.
#[must_use]
pub fn parse_env_file(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let key = key.trim();
            let key = key.strip_prefix("export ").map_or(key, str::trim);
            (key.to_string(), unquote(value.trim()).to_string())
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}
