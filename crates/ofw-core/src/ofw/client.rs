//! Client for the Our Family Wizard folder and message API.
//!
//! The site's web application talks to a private REST API under `/pub`. Calls
//! carry the same headers the web application sends plus the bearer token
//! taken from the application's client-side storage.

use std::time::Duration;

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, COOKIE, HeaderMap, HeaderValue, REFERER};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::CoreError;
use crate::config::{AppConfig, ServiceConfig};
use crate::ofw::models::{
    FolderList, MessageDetail, MessagePage, MessageQuery, MessageSummary, SessionCookie,
    cookie_header,
};

/// Typed API client.
#[derive(Debug, Clone)]
pub struct OfwClient {
    http: Client,
    service: ServiceConfig,
    api_base: String,
    token: Option<String>,
}

impl OfwClient {
    /// Create a client for `service` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured User-Agent is not a valid header
    /// value or the HTTP client cannot be built.
    pub fn new(service: &ServiceConfig, timeout: Duration) -> Result<Self, CoreError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(service.user_agent.as_str())
            .default_headers(web_app_headers(&service.base_url)?)
            .build()
            .map_err(|e| CoreError::Other(format!("creating HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_base: service.api_base(),
            service: service.clone(),
            token: None,
        })
    }

    /// Create a client from the loaded configuration.
    ///
    /// # Errors
    ///
    /// See [`OfwClient::new`].
    pub fn from_config(cfg: &AppConfig) -> Result<Self, CoreError> {
        Self::new(&cfg.service, cfg.runtime.request_timeout())
    }

    /// Service endpoints this client talks to.
    #[must_use]
    pub const fn service(&self) -> &ServiceConfig {
        &self.service
    }

    /// Install the bearer token used for every subsequent call.
    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
    }

    /// Forget the installed token.
    pub fn clear_token(&mut self) {
        self.token = None;
    }

    /// The installed token, if any.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Whether a token is installed. Says nothing about whether the server accepts it.
    #[must_use]
    pub const fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// List message folders.
    ///
    /// # Errors
    ///
    /// Returns `NotAuthenticated` without a token, `Api` on a non-success
    /// status, or a transport/serialization error.
    pub async fn list_folders(&self, include_counts: bool) -> Result<FolderList, CoreError> {
        let folders: FolderList = self
            .get_json(
                "/v1/messageFolders",
                &[("includeFolderCounts", include_counts.to_string())],
            )
            .await?;
        log::debug!(
            "{} system folders, {} user folders",
            folders.system_folders.len(),
            folders.user_folders.len()
        );
        Ok(folders)
    }

    /// ID of the inbox folder, if the account has one.
    ///
    /// # Errors
    ///
    /// See [`OfwClient::list_folders`].
    pub async fn inbox_id(&self) -> Result<Option<u64>, CoreError> {
        let folders = self.list_folders(false).await?;
        Ok(folders.inbox().map(|f| f.id))
    }

    /// Fetch one page of messages. An absent folder means the inbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the inbox cannot be resolved or the request fails.
    pub async fn list_messages(&self, query: &MessageQuery) -> Result<MessagePage, CoreError> {
        let folder = self.resolve_folder(query.folder).await?;
        self.fetch_page(folder, query).await
    }

    /// Fetch a single message with its body.
    ///
    /// # Errors
    ///
    /// Returns `Api` with status 404 for an unknown ID, or any other request error.
    pub async fn get_message(&self, id: u64) -> Result<MessageDetail, CoreError> {
        self.get_json(&format!("/v3/messages/{id}"), &[]).await
    }

    /// Fetch every page of a folder in order.
    ///
    /// Page size and sort order come from `query`; paging starts at
    /// `query.page`. Stops at the page flagged `last`, after `max_pages`
    /// pages, or at the first empty page, whichever comes first. A limit of
    /// zero means no limit.
    ///
    /// # Errors
    ///
    /// Returns the first request error; pages already fetched are discarded.
    pub async fn list_all_messages(
        &self,
        query: &MessageQuery,
        max_pages: Option<u32>,
    ) -> Result<Vec<MessageSummary>, CoreError> {
        let folder = self.resolve_folder(query.folder).await?;
        let max_pages = max_pages.filter(|&max| max > 0);
        let mut query = MessageQuery {
            folder: Some(folder),
            page: query.page.max(1),
            ..query.clone()
        };
        let mut messages = Vec::new();
        let mut fetched = 0;

        loop {
            if max_pages.is_some_and(|max| fetched >= max) {
                log::debug!("stopping at page limit {fetched}");
                break;
            }

            let page = self.fetch_page(folder, &query).await?;
            fetched += 1;
            let last = page.metadata.last;
            let empty = page.data.is_empty();
            messages.extend(page.data);

            if last || empty {
                break;
            }
            query.page += 1;
        }

        log::debug!("fetched {} messages from folder {folder}", messages.len());
        Ok(messages)
    }

    /// Messages whose subject contains `term`, ignoring case.
    ///
    /// Pages through the folder like [`OfwClient::list_all_messages`] and
    /// keeps the matches in page order.
    ///
    /// # Errors
    ///
    /// See [`OfwClient::list_all_messages`].
    pub async fn search_messages(
        &self,
        query: &MessageQuery,
        term: &str,
        max_pages: Option<u32>,
    ) -> Result<Vec<MessageSummary>, CoreError> {
        let needle = term.to_lowercase();
        let messages = self.list_all_messages(query, max_pages).await?;
        let total = messages.len();
        let matches: Vec<MessageSummary> = messages
            .into_iter()
            .filter(|m| m.subject.to_lowercase().contains(&needle))
            .collect();
        log::debug!("{} of {total} subjects match '{term}'", matches.len());
        Ok(matches)
    }

    /// Check a candidate token with the cheapest authenticated call.
    ///
    /// True only for HTTP 200. Other statuses and transport errors read as invalid.
    pub async fn probe(&self, token: &str) -> bool {
        let url = format!("{}/v1/messageFolders", self.api_base);
        let result = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(&[("includeFolderCounts", "false")])
            .send()
            .await;

        match result {
            Ok(response) if response.status() == StatusCode::OK => true,
            Ok(response) => {
                log::debug!("token probe rejected: {}", response.status());
                false
            }
            Err(e) => {
                log::debug!("token probe failed: {e}");
                false
            }
        }
    }

    /// Fetch the application's client-side storage document using session cookies.
    ///
    /// # Errors
    ///
    /// Returns `Api` on a non-success status, or a transport/serialization error.
    pub async fn fetch_storage_document(
        &self,
        cookies: &[SessionCookie],
    ) -> Result<Map<String, Value>, CoreError> {
        let url = self.service.storage_document_url();
        let mut request = self.http.get(&url);
        if !cookies.is_empty() {
            request = request.header(COOKIE, cookie_header(cookies));
        }
        let response = request
            .send()
            .await
            .map_err(|e| CoreError::Http(format!("GET {url}: {e}")))?;
        decode(response).await
    }

    async fn resolve_folder(&self, folder: Option<u64>) -> Result<u64, CoreError> {
        match folder {
            Some(id) => Ok(id),
            None => {
                let id = self
                    .inbox_id()
                    .await?
                    .ok_or_else(|| CoreError::Other("no INBOX folder found".to_string()))?;
                log::debug!("using inbox folder {id}");
                Ok(id)
            }
        }
    }

    async fn fetch_page(
        &self,
        folder: u64,
        query: &MessageQuery,
    ) -> Result<MessagePage, CoreError> {
        let page: MessagePage = self
            .get_json(
                "/v3/messages",
                &[
                    ("folders", folder.to_string()),
                    ("page", query.page.to_string()),
                    ("size", query.clamped_size().to_string()),
                    ("sort", query.sort.clone()),
                    ("sortDirection", query.direction.as_str().to_string()),
                ],
            )
            .await?;
        log::debug!(
            "folder {folder} page {}: {} messages (last: {})",
            page.metadata.page,
            page.data.len(),
            page.metadata.last
        );
        Ok(page)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, CoreError> {
        let token = self.token.as_deref().ok_or(CoreError::NotAuthenticated)?;
        let url = format!("{}{path}", self.api_base);

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(|e| CoreError::Http(format!("GET {url}: {e}")))?;

        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, CoreError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CoreError::Api {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json()
        .await
        .map_err(|e| CoreError::Serialization(format!("parsing response: {e}")))
}

fn web_app_headers(base_url: &str) -> Result<HeaderMap, CoreError> {
    let referer = HeaderValue::from_str(&format!("{base_url}/"))
        .map_err(|e| CoreError::Config(format!("invalid base URL {base_url}: {e}")))?;

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(REFERER, referer);
    headers.insert("ofw-client", HeaderValue::from_static("WebApplication"));
    headers.insert("ofw-version", HeaderValue::from_static("1.0.0"));
    Ok(headers)
}
