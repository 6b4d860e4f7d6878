//! Data models for the Our Family Wizard message API.
//!
//! Wire names are camelCase. Every field carries a default so a missing key
//! on a partially-populated record never fails the whole page.

use serde::{Deserialize, Serialize};

/// A message folder (inbox, sent, archive, or user-created).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Folder {
    /// Numeric folder ID.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// Folder type tag (`INBOX`, `SENT_MESSAGES`, ...); absent on user folders.
    pub folder_type: Option<String>,
    /// Unread message count, when counts were requested.
    pub unread_message_count: Option<u64>,
    /// Total message count, when counts were requested.
    pub total_message_count: Option<u64>,
    /// True for built-in folders.
    pub is_system: bool,
}

impl Folder {
    /// Folder type marking the inbox.
    pub const INBOX: &str = "INBOX";

    /// Whether this is the inbox.
    #[must_use]
    pub fn is_inbox(&self) -> bool {
        self.folder_type.as_deref() == Some(Self::INBOX)
    }
}

/// Folder listing, split the way the API returns it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FolderList {
    /// Built-in folders.
    pub system_folders: Vec<Folder>,
    /// Folders created by the user.
    pub user_folders: Vec<Folder>,
}

impl FolderList {
    /// Iterate system folders first, then user folders.
    pub fn iter(&self) -> impl Iterator<Item = &Folder> {
        self.system_folders.iter().chain(self.user_folders.iter())
    }

    /// The inbox, if present among the system folders.
    #[must_use]
    pub fn inbox(&self) -> Option<&Folder> {
        self.system_folders.iter().find(|f| f.is_inbox())
    }

    /// Find a folder by case-insensitive name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&Folder> {
        self.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }
}

/// A person on a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Contact {
    /// User ID.
    pub id: Option<u64>,
    /// Display name.
    pub name: String,
}

/// A message recipient.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Recipient {
    /// The receiving user.
    pub user: Contact,
    /// When the recipient first viewed the message, as displayed by the site.
    pub view_date: Option<MessageDate>,
}

/// Site-formatted timestamps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageDate {
    /// Full display form.
    pub display_date: Option<String>,
    /// Compact form such as `Mon Jan 01 3:04 PM`.
    pub three_char_month_weekday_time_no_year: Option<String>,
}

impl MessageDate {
    /// Best available display string.
    #[must_use]
    pub fn display(&self) -> &str {
        self.display_date
            .as_deref()
            .or(self.three_char_month_weekday_time_no_year.as_deref())
            .unwrap_or("")
    }
}

/// A message as it appears in a folder listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageSummary {
    /// Message ID.
    pub id: u64,
    /// Sender.
    pub author: Contact,
    /// Recipients.
    pub recipients: Vec<Recipient>,
    /// Subject line.
    pub subject: String,
    /// Sent date.
    pub date: MessageDate,
    /// Body preview.
    pub preview: Option<String>,
    /// Whether the current user has read it.
    pub read: bool,
    /// Whether the current user has replied.
    pub replied: bool,
    /// Number of attached files.
    pub files: u32,
}

/// A file attached to a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Attachment {
    /// File name.
    pub name: String,
    /// Size in bytes.
    pub size: Option<u64>,
}

/// A single message with its body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageDetail {
    /// Listing fields.
    #[serde(flatten)]
    pub summary: MessageSummary,
    /// Full message body.
    pub body: String,
    /// Attached files.
    pub attachments: Vec<Attachment>,
}

/// Paging state returned alongside each message page.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageMetadata {
    /// 1-based page number.
    pub page: u32,
    /// Whether this is the first page.
    pub first: bool,
    /// Whether this is the last page.
    pub last: bool,
}

/// One page of messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessagePage {
    /// Paging state.
    pub metadata: PageMetadata,
    /// Messages on this page.
    pub data: Vec<MessageSummary>,
}

/// Sort direction for message listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Oldest first.
    Asc,
    /// Newest first.
    #[default]
    Desc,
}

impl SortDirection {
    /// Query-string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Parameters for a message listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    /// Folder ID; `None` means the inbox.
    pub folder: Option<u64>,
    /// 1-based page number.
    pub page: u32,
    /// Page size, clamped to [`MessageQuery::MAX_SIZE`].
    pub size: u32,
    /// Sort field.
    pub sort: String,
    /// Sort direction.
    pub direction: SortDirection,
}

impl MessageQuery {
    /// Largest page size the API accepts.
    pub const MAX_SIZE: u32 = 50;

    /// Query for the given folder with default paging.
    #[must_use]
    pub fn folder(folder: Option<u64>) -> Self {
        Self {
            folder,
            ..Self::default()
        }
    }

    /// Effective page size.
    #[must_use]
    pub fn clamped_size(&self) -> u32 {
        self.size.clamp(1, Self::MAX_SIZE)
    }
}

impl Default for MessageQuery {
    fn default() -> Self {
        Self {
            folder: None,
            page: 1,
            size: Self::MAX_SIZE,
            sort: "date".to_string(),
            direction: SortDirection::Desc,
        }
    }
}

/// A cookie observed by a login transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionCookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// Domain attribute.
    pub domain: Option<String>,
    /// Path attribute.
    pub path: Option<String>,
    /// Secure flag.
    pub secure: bool,
    /// Expiry as Unix seconds.
    pub expiry: Option<i64>,
}

/// Render cookies as a `Cookie` request header value.
#[must_use]
pub fn cookie_header(cookies: &[SessionCookie]) -> String {
    cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}
