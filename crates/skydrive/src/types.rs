//! Typed views of common Live Connect responses
//!
//! Only the fields the photo backend reads are named; everything else is
//! kept in `extra` so nothing in the response is lost.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A file, folder, album, or photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveObject {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub object_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Direct download URL (files only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_time: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DriveObject {
    /// Folders and albums can both hold files.
    pub fn is_container(&self) -> bool {
        matches!(self.object_type.as_str(), "folder" | "album")
    }
}

/// A collection response: `{"data": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    #[serde(default)]
    pub data: Vec<DriveObject>,
}

impl Listing {
    /// Find an entry by exact name. With duplicate names the last entry wins.
    pub fn find_by_name(&self, name: &str) -> Option<&DriveObject> {
        self.data.iter().rev().find(|o| o.name == name)
    }
}

/// Storage quota in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub quota: u64,
    pub available: u64,
}

impl Quota {
    pub fn used(&self) -> u64 {
        self.quota.saturating_sub(self.available)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of a download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Download {
    /// Pre-authenticated URL the content can be fetched from
    Link(String),
    /// The file content itself
    Content(Vec<u8>),
}
