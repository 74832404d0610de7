use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("unknown classification: {0}")]
pub struct ClassificationParseError(pub String);

/// Coarse file class reported by the server's content-type sniffer.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ListingClassification {
    Audio,
    Compress,
    Directory,
    Document,
    Image,
    Pdf,
    Presentation,
    Spreadsheet,
    Text,
    Video,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ListingClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingClassification::Audio => "audio",
            ListingClassification::Compress => "compress",
            ListingClassification::Directory => "directory",
            ListingClassification::Document => "document",
            ListingClassification::Image => "image",
            ListingClassification::Pdf => "pdf",
            ListingClassification::Presentation => "presentation",
            ListingClassification::Spreadsheet => "spreadsheet",
            ListingClassification::Text => "text",
            ListingClassification::Video => "video",
            ListingClassification::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ListingClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingClassification {
    type Err = ClassificationParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "audio" => Ok(ListingClassification::Audio),
            "compress" => Ok(ListingClassification::Compress),
            "directory" => Ok(ListingClassification::Directory),
            "document" => Ok(ListingClassification::Document),
            "image" => Ok(ListingClassification::Image),
            "pdf" => Ok(ListingClassification::Pdf),
            "presentation" => Ok(ListingClassification::Presentation),
            "spreadsheet" => Ok(ListingClassification::Spreadsheet),
            "text" => Ok(ListingClassification::Text),
            "video" => Ok(ListingClassification::Video),
            "unknown" => Ok(ListingClassification::Unknown),
            other => Err(ClassificationParseError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct RemoteLock {
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub owner_display_name: String,
    #[serde(default)]
    pub owner_type: i32,
    #[serde(default)]
    pub editor: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub timeout: Option<i64>,
}

/// One entry of a directory listing, as handed over by the listing client.
///
/// By protocol convention the first entry of a response describes the
/// listed directory itself; the rest are its children.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RemoteListingEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub file_id: String,
    pub server_path: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub directory: bool,
    #[serde(default)]
    pub etag: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub permissions: String,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub has_preview: bool,
    #[serde(default)]
    pub checksums: Vec<String>,
    #[serde(default)]
    pub classification: ListingClassification,
    #[serde(default)]
    pub lock: Option<RemoteLock>,
    /// RFC 3339 last-modified timestamp.
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub creation_date: Option<String>,
    #[serde(default)]
    pub upload_date: Option<String>,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub owner_display_name: String,
    #[serde(default)]
    pub share_permissions: Vec<String>,
    #[serde(default)]
    pub share_types: Vec<i32>,
    #[serde(default)]
    pub quota_used_bytes: i64,
    #[serde(default)]
    pub quota_available_bytes: i64,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub rich_workspace: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ListingPage {
    pub items: Vec<RemoteListingEntry>,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub total: u32,
}

impl ListingPage {
    pub fn is_last(&self) -> bool {
        let seen = self.offset.saturating_add(self.items.len() as u32);
        self.items.is_empty() || seen >= self.total
    }
}
