//! Optional on-disk record of a login attempt.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::CoreError;
use crate::ofw::models::SessionCookie;

/// Directory receiving screenshots, page snapshots and storage dumps.
///
/// Writes are best effort: failures are logged and never returned, so a full
/// disk cannot break a login.
#[derive(Debug, Clone)]
pub struct DebugArtifacts {
    dir: PathBuf,
}

impl DebugArtifacts {
    /// Create a timestamped run directory (`YYYYmmdd-HHMMSS`) under `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn create(root: &Path) -> Result<Self, CoreError> {
        let dir = root.join(Local::now().format("%Y%m%d-%H%M%S").to_string());
        fs::create_dir_all(&dir)?;
        log::info!("debug artifacts: {}", dir.display());
        Ok(Self { dir })
    }

    /// Use an existing directory as-is.
    #[must_use]
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Run directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save text such as a page snapshot.
    pub fn save_text(&self, file_name: &str, content: &str) {
        self.write(file_name, content.as_bytes());
    }

    /// Save a PNG screenshot.
    pub fn save_png(&self, name: &str, png: &[u8]) {
        self.write(&format!("{name}.png"), png);
    }

    /// Save a value as pretty JSON.
    pub fn save_json(&self, name: &str, value: &serde_json::Value) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => self.write(&format!("{name}.json"), json.as_bytes()),
            Err(e) => log::warn!("serializing debug artifact {name}: {e}"),
        }
    }

    /// Save the session cookies as `cookies.json`.
    pub fn save_cookies(&self, cookies: &[SessionCookie]) {
        match serde_json::to_value(cookies) {
            Ok(value) => self.save_json("cookies", &value),
            Err(e) => log::warn!("serializing cookies: {e}"),
        }
    }

    fn write(&self, file_name: &str, bytes: &[u8]) {
        let path = self.dir.join(file_name);
        match fs::write(&path, bytes) {
            Ok(()) => log::debug!("saved {}", path.display()),
            Err(e) => log::warn!("saving debug artifact {}: {e}", path.display()),
        }
    }
}
