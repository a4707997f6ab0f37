//! Drive payloads exchanged with Microsoft Graph.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A file or folder as returned by Graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(default)]
    pub created_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_modified_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parent_reference: Option<ItemReference>,
    #[serde(default)]
    pub folder: Option<FolderFacet>,
    #[serde(default)]
    pub file: Option<FileFacet>,
    /// Present on delta results for removed items.
    #[serde(default)]
    pub deleted: Option<DeletedFacet>,
    /// Present only on the drive root.
    #[serde(default)]
    pub root: Option<serde_json::Value>,
}

impl DriveItem {
    pub fn is_folder(&self) -> bool {
        self.folder.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }

    pub fn is_root(&self) -> bool {
        self.root.is_some()
    }

    pub fn name_or_id(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderFacet {
    #[serde(default)]
    pub child_count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFacet {
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedFacet {
    #[serde(default)]
    pub state: Option<String>,
}

/// Flattened projection of a [`DriveItem`] used in task outputs and trigger
/// payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FileDescriptor {
    pub id: String,
    pub name: String,
    pub size: Option<u64>,
    pub is_folder: bool,
    pub mime_type: Option<String>,
    pub parent_id: Option<String>,
    pub parent_path: Option<String>,
    pub drive_id: Option<String>,
    pub web_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl From<&DriveItem> for FileDescriptor {
    fn from(item: &DriveItem) -> Self {
        let parent = item.parent_reference.as_ref();
        Self {
            id: item.id.clone(),
            name: item.name_or_id().to_string(),
            size: item.size,
            is_folder: item.is_folder(),
            mime_type: item.file.as_ref().and_then(|f| f.mime_type.clone()),
            parent_id: parent.and_then(|p| p.id.clone()),
            parent_path: parent.and_then(|p| p.path.clone()),
            drive_id: parent.and_then(|p| p.drive_id.clone()),
            web_url: item.web_url.clone(),
            created_at: item.created_date_time,
            modified_at: item.last_modified_date_time,
        }
    }
}

impl From<DriveItem> for FileDescriptor {
    fn from(item: DriveItem) -> Self {
        Self::from(&item)
    }
}

/// Response of `createUploadSession`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSessionInfo {
    pub upload_url: String,
    #[serde(default)]
    pub expiration_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_expected_ranges: Vec<String>,
}
