//! End-to-end authentication and API tests against an in-process stub of the site.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Json, Router};
use serde_json::{Value, json};

use ofw_core::config::{AuthConfig, LoginFlowConfig, ServiceConfig};
use ofw_core::ofw::transport::{Browser, BrowserError, BrowserTransport, ElementRef, HttpTransport};
use ofw_core::ofw::{
    AuthBridge, AuthError, AuthState, Credentials, DefaultTransportFactory, LoginTransport,
    MessageQuery, OfwClient, SessionCookie, SortDirection, TokenCache, TokenSource,
    TransportFactory, TransportKind,
};
use ofw_core::CoreError;

// ─── Stub site ──────────────────────────────────────────────────────────────

const VALID_TOKEN: &str = "fresh";

#[derive(Debug, Default)]
struct Hits {
    probes: AtomicUsize,
    pages: Mutex<Vec<u32>>,
    page_params: Mutex<Vec<(String, String)>>,
    storage_docs: AtomicUsize,
    login_posts: AtomicUsize,
}

type Shared = Arc<Hits>;

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn has_cookie(headers: &HeaderMap, pair: &str) -> bool {
    headers
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split("; ").any(|c| c == pair))
}

async fn folders(
    State(hits): State<Shared>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    if q.get("includeFolderCounts").map(String::as_str) == Some("false") {
        hits.probes.fetch_add(1, Ordering::SeqCst);
    }
    if bearer(&headers) != Some(VALID_TOKEN) {
        return (StatusCode::UNAUTHORIZED, "token expired").into_response();
    }
    Json(json!({
        "systemFolders": [
            {"id": 5, "name": "Inbox", "folderType": "INBOX",
             "unreadMessageCount": 1, "isSystem": true},
            {"id": 6, "name": "Sent", "folderType": "SENT_MESSAGES", "isSystem": true}
        ],
        "userFolders": [{"id": 9, "name": "School"}]
    }))
    .into_response()
}

async fn messages(
    State(hits): State<Shared>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    if bearer(&headers) != Some(VALID_TOKEN) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let page: u32 = q.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let folder = q.get("folders").cloned().unwrap_or_default();
    hits.pages.lock().expect("pages lock").push(page);
    hits.page_params.lock().expect("params lock").push((
        q.get("size").cloned().unwrap_or_default(),
        q.get("sortDirection").cloned().unwrap_or_default(),
    ));
    Json(json!({
        "metadata": {"page": page, "first": page == 1, "last": page == 3},
        "data": [{"id": page * 10, "subject": format!("folder {folder} page {page}")}]
    }))
    .into_response()
}

async fn message(headers: HeaderMap, Path(id): Path<u64>) -> Response {
    if bearer(&headers) != Some(VALID_TOKEN) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if id == 404 {
        return (StatusCode::NOT_FOUND, "no such message").into_response();
    }
    Json(json!({"id": id, "subject": "Pickup", "body": "See you at 5"})).into_response()
}

async fn storage_document(State(hits): State<Shared>, headers: HeaderMap) -> Response {
    hits.storage_docs.fetch_add(1, Ordering::SeqCst);
    if has_cookie(&headers, "SESSION=s1") {
        return Json(json!({"auth": VALID_TOKEN, "theme": "light"})).into_response();
    }
    ([(SET_COOKIE, "SESSION=anon; Path=/")], Json(json!({}))).into_response()
}

async fn login_page() -> Html<&'static str> {
    Html(
        r#"<html><body>
        <form id="loginForm" action="/app/login" method="post">
          <input type="hidden" name="execution" value="e1s1">
          <input type="hidden" name="_csrf" value="csrf-123">
          <input type="text" name="username"><input type="password" name="password">
          <button type="submit" name="submit">Sign In</button>
        </form></body></html>"#,
    )
}

async fn login_post(
    State(hits): State<Shared>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    hits.login_posts.fetch_add(1, Ordering::SeqCst);
    if !has_cookie(&headers, "SESSION=anon") {
        return (StatusCode::FORBIDDEN, "no session").into_response();
    }
    let field = |k: &str| form.get(k).map(String::as_str);
    if field("_csrf") != Some("csrf-123") || field("execution") != Some("e1s1") {
        return (StatusCode::FORBIDDEN, "bad form").into_response();
    }
    match field("password") {
        Some("pw") => {}
        Some("boom") => return (StatusCode::BAD_GATEWAY, "upstream down").into_response(),
        Some("locked") => return (StatusCode::TOO_MANY_REQUESTS, "slow down").into_response(),
        _ => {
            return Html(r#"<div class="alert-danger">Invalid username or password</div>"#)
                .into_response();
        }
    }
    (
        [(SET_COOKIE, "SESSION=s1; Path=/")],
        Html(r#"<div id="greeting">Hi</div><div id="notificationsSection"></div>"#),
    )
        .into_response()
}

async fn spawn_site() -> (String, Shared) {
    let hits = Shared::default();
    let app = Router::new()
        .route("/pub/v1/messageFolders", get(folders))
        .route("/pub/v3/messages", get(messages))
        .route("/pub/v3/messages/{id}", get(message))
        .route("/ofw/appv2/localstorage.json", get(storage_document))
        .route("/app/login", get(login_page).post(login_post))
        .with_state(Arc::clone(&hits));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), hits)
}

fn service(base_url: &str) -> ServiceConfig {
    ServiceConfig {
        base_url: base_url.to_string(),
        ..ServiceConfig::default()
    }
}

fn api_client(base_url: &str) -> OfwClient {
    OfwClient::new(&service(base_url), Duration::from_secs(5)).expect("client")
}

fn fast_flow() -> LoginFlowConfig {
    LoginFlowConfig {
        form_timeout_ms: 200,
        page_load_wait_ms: 200,
        script_grace_ms: 0,
        settle_delay_ms: 0,
        poll_interval_ms: 10,
        login_timeout_ms: 300,
        error_min_elapsed_ms: 50,
        post_login_delay_ms: 0,
        ..LoginFlowConfig::default()
    }
}

fn http_transport(base_url: &str) -> HttpTransport {
    HttpTransport::new(&service(base_url), &fast_flow(), Duration::from_secs(5))
        .expect("transport")
}

fn creds() -> Credentials {
    Credentials::new("parent@example.com", "pw")
}

// ─── Browser double ─────────────────────────────────────────────────────────

/// Landing page markers show up after `markers_after` checks; never if `None`.
#[derive(Debug)]
struct FakeBrowser {
    url: String,
    markers_after: Option<u32>,
    checks: u32,
    storage: Option<String>,
    quits: Arc<AtomicUsize>,
}

impl Browser for FakeBrowser {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.url = url.to_string();
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, BrowserError> {
        Ok(self.url.clone())
    }

    async fn execute(&mut self, script: &str, _args: Vec<Value>) -> Result<Value, BrowserError> {
        if script.contains("readyState") {
            return Ok(json!("complete"));
        }
        if script.contains("getItem") {
            return Ok(self.storage.clone().map_or(Value::Null, Value::String));
        }
        Ok(Value::Null)
    }

    async fn find_all(&mut self, css: &str) -> Result<Vec<ElementRef>, BrowserError> {
        let found = match css {
            r#"[name="username"]"# | r#"[name="password"]"# | r#"[name="submit"]"# => {
                vec![css.to_string()]
            }
            r#"[id="greeting"]"# => {
                self.checks += 1;
                if self.markers_after.is_some_and(|n| self.checks >= n) {
                    vec!["greeting".to_string()]
                } else {
                    Vec::new()
                }
            }
            r#"[id="notificationsSection"]"# => vec!["notifications".to_string()],
            _ => Vec::new(),
        };
        Ok(found)
    }

    async fn clear(&mut self, _element: &ElementRef) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn send_keys(&mut self, _element: &ElementRef, _text: &str) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn click(&mut self, _element: &ElementRef) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn text(&mut self, _element: &ElementRef) -> Result<String, BrowserError> {
        Ok(String::new())
    }

    async fn cookies(&mut self) -> Result<Vec<SessionCookie>, BrowserError> {
        Ok(vec![SessionCookie {
            name: "SESSION".to_string(),
            value: "s1".to_string(),
            ..SessionCookie::default()
        }])
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError> {
        Ok(Vec::new())
    }

    async fn page_source(&mut self) -> Result<String, BrowserError> {
        Ok(String::new())
    }

    async fn quit(self) {
        self.quits.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct FakeBrowserFactory {
    service: ServiceConfig,
    markers_after: Option<u32>,
    storage: Option<String>,
    opened: usize,
    quits: Arc<AtomicUsize>,
}

impl FakeBrowserFactory {
    fn new(base_url: &str, markers_after: Option<u32>) -> Self {
        Self {
            service: service(base_url),
            markers_after,
            storage: None,
            opened: 0,
            quits: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl TransportFactory for FakeBrowserFactory {
    type Transport = BrowserTransport<FakeBrowser>;

    async fn open(&mut self) -> Result<Self::Transport, AuthError> {
        self.opened += 1;
        let browser = FakeBrowser {
            url: String::new(),
            markers_after: self.markers_after,
            checks: 0,
            storage: self.storage.clone(),
            quits: Arc::clone(&self.quits),
        };
        Ok(BrowserTransport::new(browser, &self.service, &fast_flow(), None))
    }
}

// ─── Token cache and probe ──────────────────────────────────────────────────

#[tokio::test]
async fn validate_follows_probe_status_not_token_content() {
    let (url, hits) = spawn_site().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = TokenCache::new(dir.path().join("auth_token.json"));
    let client = api_client(&url);

    assert!(!cache.validate(&client, "stale").await);
    assert!(cache.validate(&client, VALID_TOKEN).await);
    assert!(!cache.validate(&client, "").await);
    assert_eq!(hits.probes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn stale_cache_triggers_exactly_one_login() {
    let (url, _hits) = spawn_site().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = TokenCache::new(dir.path().join("auth_token.json"));
    cache.save("stale").expect("seed cache");

    let mut bridge = AuthBridge::new(cache.clone(), "auth");
    let mut client = api_client(&url);
    let mut factory = FakeBrowserFactory::new(&url, Some(3));
    factory.storage = Some(format!("\"{VALID_TOKEN}\""));

    let ok = bridge
        .authenticate(&mut client, &creds(), &mut factory)
        .await
        .expect("authenticate");
    assert_eq!(ok.source, TokenSource::Login);
    assert_eq!(ok.token, VALID_TOKEN);
    assert_eq!(factory.opened, 1);
    assert_eq!(factory.quits.load(Ordering::SeqCst), 1);
    assert_eq!(cache.load().as_deref(), Some(VALID_TOKEN));

    // the next run trusts the cache and never opens a browser
    let mut next = AuthBridge::new(cache.clone(), "auth");
    let mut fresh_client = api_client(&url);
    let again = next
        .authenticate(&mut fresh_client, &creds(), &mut factory)
        .await
        .expect("cached");
    assert_eq!(again.source, TokenSource::Cache);
    assert_eq!(next.state(), AuthState::Authenticated);
    assert_eq!(factory.opened, 1);
}

// ─── End to end through the browser transport ───────────────────────────────

#[tokio::test]
async fn browser_login_falls_back_to_storage_document() {
    let (url, hits) = spawn_site().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = TokenCache::new(dir.path().join("auth_token.json"));
    let mut bridge = AuthBridge::new(cache.clone(), "auth");
    let mut client = api_client(&url);
    // page storage is empty; the token has to come from the storage document
    let mut factory = FakeBrowserFactory::new(&url, Some(5));

    let ok = bridge
        .authenticate(&mut client, &creds(), &mut factory)
        .await
        .expect("authenticate");
    assert_eq!(ok.token, VALID_TOKEN);
    assert_eq!(hits.storage_docs.load(Ordering::SeqCst), 1);
    assert_eq!(cache.load().as_deref(), Some(VALID_TOKEN));

    let folders = client.list_folders(true).await.expect("folders");
    assert_eq!(folders.inbox().map(|f| f.id), Some(5));
    assert_eq!(factory.opened, 1);
}

#[tokio::test]
async fn browser_login_without_markers_times_out() {
    let (url, _hits) = spawn_site().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = TokenCache::new(dir.path().join("auth_token.json"));
    cache.save("previous").expect("seed cache");
    let mut bridge = AuthBridge::new(cache.clone(), "auth");
    let mut client = api_client(&url);
    let mut factory = FakeBrowserFactory::new(&url, None);

    let failure = bridge
        .login(&mut client, &creds(), &mut factory)
        .await
        .expect_err("timeout");
    assert!(matches!(failure.error, AuthError::LoginTimeout(_)));
    assert_eq!(failure.state, AuthState::LoginInProgress);
    assert_eq!(bridge.state(), AuthState::LoginFailed);
    assert_eq!(cache.load().as_deref(), Some("previous"));
    assert_eq!(factory.quits.load(Ordering::SeqCst), 1);
    assert!(!client.has_token());
}

// ─── Direct HTTP transport ──────────────────────────────────────────────────

#[tokio::test]
async fn http_transport_posts_form_and_reads_storage() {
    let (url, hits) = spawn_site().await;
    let mut transport = http_transport(&url);

    transport.login(&creds()).await.expect("login");
    assert_eq!(hits.login_posts.load(Ordering::SeqCst), 1);

    let token = transport.storage_value("auth").await.expect("storage");
    assert_eq!(token.as_deref(), Some(VALID_TOKEN));
    assert_eq!(transport.storage_value("missing").await.expect("storage"), None);

    let cookies = transport.cookies().await.expect("cookies");
    assert!(cookies.iter().any(|c| c.name == "SESSION" && c.value == "s1"));
    transport.close().await;
}

#[tokio::test]
async fn http_transport_reports_rejection_text() {
    let (url, _hits) = spawn_site().await;
    let mut transport = http_transport(&url);

    let err = transport
        .login(&Credentials::new("parent@example.com", "wrong"))
        .await
        .expect_err("rejected");
    assert!(matches!(
        err,
        AuthError::LoginRejected(ref t) if t == "Invalid username or password"
    ));
}

#[tokio::test]
async fn http_transport_maps_post_status() {
    let (url, hits) = spawn_site().await;

    let err = http_transport(&url)
        .login(&Credentials::new("parent@example.com", "boom"))
        .await
        .expect_err("server error");
    assert!(matches!(err, AuthError::SessionInitFailed(ref m) if m.contains("502")));

    let err = http_transport(&url)
        .login(&Credentials::new("parent@example.com", "locked"))
        .await
        .expect_err("client error");
    assert!(matches!(err, AuthError::LoginRejected(ref m) if m.contains("429")));
    assert_eq!(hits.login_posts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn http_strategy_authenticates_end_to_end() {
    let (url, hits) = spawn_site().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = TokenCache::new(dir.path().join("auth_token.json"));
    let auth = AuthConfig {
        login: fast_flow(),
        ..AuthConfig::default()
    };
    let factory = DefaultTransportFactory::new(&service(&url), &auth, Duration::from_secs(5));
    assert_eq!(factory.kind(), TransportKind::Browser);
    let mut factory = factory.with_kind(TransportKind::Http);

    let mut bridge = AuthBridge::new(cache.clone(), "auth");
    let mut client = api_client(&url);
    let ok = bridge
        .authenticate(&mut client, &creds(), &mut factory)
        .await
        .expect("authenticate");

    assert_eq!(ok.source, TokenSource::Login);
    assert_eq!(ok.token, VALID_TOKEN);
    assert_eq!(bridge.state(), AuthState::Authenticated);
    assert_eq!(hits.login_posts.load(Ordering::SeqCst), 1);
    assert_eq!(cache.load().as_deref(), Some(VALID_TOKEN));
    let folders = client.list_folders(false).await.expect("folders");
    assert_eq!(folders.inbox().map(|f| f.id), Some(5));
}

#[tokio::test]
async fn http_transport_needs_a_reachable_site() {
    let mut transport = HttpTransport::new(
        &service("http://127.0.0.1:9"),
        &fast_flow(),
        Duration::from_millis(500),
    )
    .expect("transport");
    let err = transport.login(&creds()).await.expect_err("unreachable");
    assert!(matches!(err, AuthError::SessionInitFailed(_)));
}

// ─── API facade ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn pagination_stops_at_last_page() {
    let (url, hits) = spawn_site().await;
    let mut client = api_client(&url);
    client.set_token(VALID_TOKEN);

    let all = client
        .list_all_messages(&MessageQuery::folder(Some(9)), None)
        .await
        .expect("all pages");
    assert_eq!(all.iter().map(|m| m.id).collect::<Vec<_>>(), vec![10, 20, 30]);
    assert_eq!(*hits.pages.lock().expect("pages lock"), vec![1, 2, 3]);
    assert_eq!(all[0].subject, "folder 9 page 1");
}

#[tokio::test]
async fn pagination_respects_page_limit_and_inbox_default() {
    let (url, hits) = spawn_site().await;
    let mut client = api_client(&url);
    client.set_token(VALID_TOKEN);

    let some = client
        .list_all_messages(&MessageQuery::default(), Some(2))
        .await
        .expect("two pages");
    assert_eq!(some.len(), 2);
    assert_eq!(some[0].subject, "folder 5 page 1");
    assert_eq!(*hits.pages.lock().expect("pages lock"), vec![1, 2]);
}

#[tokio::test]
async fn zero_page_limit_means_every_page() {
    let (url, hits) = spawn_site().await;
    let mut client = api_client(&url);
    client.set_token(VALID_TOKEN);

    let all = client
        .list_all_messages(&MessageQuery::folder(Some(9)), Some(0))
        .await
        .expect("all pages");
    assert_eq!(all.len(), 3);
    assert_eq!(*hits.pages.lock().expect("pages lock"), vec![1, 2, 3]);
}

#[tokio::test]
async fn every_page_carries_size_and_sort_direction() {
    let (url, hits) = spawn_site().await;
    let mut client = api_client(&url);
    client.set_token(VALID_TOKEN);

    let query = MessageQuery {
        folder: Some(9),
        size: 10,
        direction: SortDirection::Asc,
        ..MessageQuery::default()
    };
    client.list_all_messages(&query, None).await.expect("all pages");

    let params = hits.page_params.lock().expect("params lock");
    assert_eq!(params.len(), 3);
    assert!(params.iter().all(|(size, dir)| size == "10" && dir == "asc"));
}

#[tokio::test]
async fn search_filters_subjects_across_pages() {
    let (url, hits) = spawn_site().await;
    let mut client = api_client(&url);
    client.set_token(VALID_TOKEN);

    let found = client
        .search_messages(&MessageQuery::folder(Some(9)), "PAGE 2", None)
        .await
        .expect("search");
    assert_eq!(found.iter().map(|m| m.id).collect::<Vec<_>>(), vec![20]);
    assert_eq!(*hits.pages.lock().expect("pages lock"), vec![1, 2, 3]);

    let none = client
        .search_messages(&MessageQuery::folder(Some(9)), "pickup", Some(1))
        .await
        .expect("search");
    assert!(none.is_empty());
}

#[tokio::test]
async fn non_success_status_surfaces_as_api_error() {
    let (url, _hits) = spawn_site().await;
    let mut client = api_client(&url);
    client.set_token(VALID_TOKEN);

    let detail = client.get_message(7).await.expect("message");
    assert_eq!(detail.body, "See you at 5");

    match client.get_message(404).await {
        Err(CoreError::Api { status, body }) => {
            assert_eq!(status, 404);
            assert_eq!(body, "no such message");
        }
        other => panic!("expected Api error, got {other:?}"),
    }

    client.set_token("stale");
    assert!(matches!(
        client.list_folders(false).await,
        Err(CoreError::Api { status: 401, .. })
    ));
}
