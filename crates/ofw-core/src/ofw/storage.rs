//! File-backed bearer token cache.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::CoreError;
use crate::ofw::client::OfwClient;
use crate::paths::write_file_atomic;

#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord {
    token: String,
}

/// Single-file cache holding the last bearer token that authenticated.
///
/// The cache is advisory. A loaded token is only trusted after the server
/// accepts it, see [`TokenCache::validate`].
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    /// Create a cache backed by `path`. Nothing is touched until first use.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached token.
    ///
    /// A missing, unreadable or malformed file, or an empty token, all read as
    /// "no token".
    #[must_use]
    pub fn load(&self) -> Option<String> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("no token cache at {}", self.path.display());
                return None;
            }
            Err(e) => {
                log::debug!("reading token cache {}: {e}", self.path.display());
                return None;
            }
        };

        match serde_json::from_str::<CacheRecord>(&text) {
            Ok(record) if !record.token.is_empty() => Some(record.token),
            Ok(_) => {
                log::debug!("token cache {} holds an empty token", self.path.display());
                None
            }
            Err(e) => {
                log::debug!("malformed token cache {}: {e}", self.path.display());
                None
            }
        }
    }

    /// Overwrite the cache with `token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized or written.
    pub fn save(&self, token: &str) -> Result<(), CoreError> {
        let record = CacheRecord {
            token: token.to_string(),
        };
        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| CoreError::Serialization(format!("serializing token cache: {e}")))?;
        write_file_atomic(&self.path, json.as_bytes(), 0o600)?;
        log::debug!("token cached at {}", self.path.display());
        Ok(())
    }

    /// Ask the server whether `token` is still accepted.
    pub async fn validate(&self, client: &OfwClient, token: &str) -> bool {
        client.probe(token).await
    }

    /// Remove the cache file. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<(), CoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
