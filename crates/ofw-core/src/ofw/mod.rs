//! Our Family Wizard authentication bridge and API client.
//!
//! This module provides:
//! - A cache-first authentication state machine
//! - Two login transports (scripted browser, direct HTTP)
//! - A file-backed bearer token cache
//! - A typed client for the folder and message endpoints

pub mod auth;
pub mod client;
pub mod credentials;
pub mod debug;
pub mod html;
pub mod models;
pub mod poll;
pub mod storage;
pub mod transport;
pub mod webdriver;

pub use auth::{AuthBridge, AuthError, AuthFailure, AuthState, Authenticated, TokenSource};
pub use client::OfwClient;
pub use credentials::Credentials;
pub use debug::DebugArtifacts;
pub use models::{
    Attachment, Contact, Folder, FolderList, MessageDate, MessageDetail, MessagePage,
    MessageQuery, MessageSummary, PageMetadata, Recipient, SessionCookie, SortDirection,
};
pub use poll::{Poller, await_condition};
pub use storage::TokenCache;
pub use transport::{
    DefaultTransportFactory, LoginTransport, OfwTransport, TransportFactory, TransportKind,
};
pub use webdriver::WebDriverBrowser;
