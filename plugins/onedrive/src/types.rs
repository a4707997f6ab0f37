//! Enumerations shared by task inputs.

use graphops::{JsonSchema, schemars};
use serde::{Deserialize, Serialize};

/// What `create` makes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    #[default]
    Folder,
    File,
}

/// Target format of a server-side conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Office documents and most text formats.
    Pdf,
    /// Loop and Fluid files.
    Html,
    /// 3D models.
    Glb,
    /// Images and video thumbnails.
    Jpg,
}

impl ExportFormat {
    /// Value of the `format` query parameter, also used as file extension.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Html => "html",
            Self::Glb => "glb",
            Self::Jpg => "jpg",
        }
    }

    /// `name` with its extension replaced by this format's.
    pub fn rename(self, name: &str) -> String {
        let stem = match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => name,
        };
        format!("{stem}.{}", self.as_str())
    }
}
