//! Drive and item addressing.
//!
//! A drive is the signed-in user's OneDrive by default, another user's
//! OneDrive with `user_id`, a SharePoint document library with `site_id`
//! (plus optional `drive_id`), or any drive by `drive_id` alone.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::GraphError;

/// Which drive a call targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DriveAddress {
    /// SharePoint site id. Addresses the site's default document library
    /// unless `drive_id` is also set.
    #[serde(default)]
    pub site_id: Option<String>,
    /// Drive id. Alone, addresses the drive directly.
    #[serde(default)]
    pub drive_id: Option<String>,
    /// User id or principal name whose OneDrive to use instead of the
    /// signed-in user's.
    #[serde(default)]
    pub user_id: Option<String>,
}

fn non_blank<'a>(field: &str, value: Option<&'a String>) -> Result<Option<&'a str>, GraphError> {
    match value.map(|v| v.trim()) {
        Some("") => Err(GraphError::InvalidInput(format!("{field} must not be empty"))),
        other => Ok(other),
    }
}

impl DriveAddress {
    pub fn me() -> Self {
        Self::default()
    }

    pub fn site(site_id: impl Into<String>) -> Self {
        Self {
            site_id: Some(site_id.into()),
            ..Self::default()
        }
    }

    /// Path segments of the drive resource relative to the Graph endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::InvalidInput`] when `user_id` is combined with
    /// `site_id`, or when a field is blank.
    pub fn segments(&self) -> Result<Vec<String>, GraphError> {
        let site = non_blank("site_id", self.site_id.as_ref())?;
        let drive = non_blank("drive_id", self.drive_id.as_ref())?;
        let user = non_blank("user_id", self.user_id.as_ref())?;

        let owner: Vec<&str> = match (site, user) {
            (Some(_), Some(_)) => {
                return Err(GraphError::InvalidInput(
                    "user_id and site_id are mutually exclusive".to_string(),
                ));
            }
            (Some(site), None) => vec!["sites", site],
            (None, Some(user)) => vec!["users", user],
            (None, None) if drive.is_some() => Vec::new(),
            (None, None) => vec!["me"],
        };

        let mut segments: Vec<String> = owner.into_iter().map(str::to_string).collect();
        match drive {
            Some(drive) => {
                segments.push("drives".to_string());
                segments.push(drive.to_string());
            }
            None => segments.push("drive".to_string()),
        }
        Ok(segments)
    }

    /// Stable key identifying the drive, used to scope delta cursors.
    ///
    /// # Errors
    ///
    /// Same as [`DriveAddress::segments`].
    pub fn key(&self) -> Result<String, GraphError> {
        Ok(self.segments()?.join("/"))
    }
}

/// How a single item is addressed inside a drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemLocator {
    Id(String),
    /// Slash-separated path below the drive root. Empty means the root.
    Path(String),
}

impl ItemLocator {
    /// Picks the addressing mode from an optional id and path. Exactly one
    /// must be set, unless `default_root` allows neither.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::InvalidInput`] if both are set, or neither is
    /// set and `default_root` is false.
    pub fn from_parts(
        id_field: &str,
        id: Option<&str>,
        path_field: &str,
        path: Option<&str>,
        default_root: bool,
    ) -> Result<Self, GraphError> {
        let id = id.map(str::trim).filter(|v| !v.is_empty());
        match (id, path) {
            (Some(_), Some(_)) => Err(GraphError::InvalidInput(format!(
                "{id_field} and {path_field} are mutually exclusive"
            ))),
            (Some(id), None) => Ok(Self::Id(id.to_string())),
            (None, Some(path)) => Ok(Self::Path(path.to_string())),
            (None, None) if default_root => Ok(Self::Path(String::new())),
            (None, None) => Err(GraphError::InvalidInput(format!(
                "either {id_field} or {path_field} is required"
            ))),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Self::Path(p) if path_segments(p).is_empty())
    }

    /// Segments addressing the item in `drive`, followed by `suffix`
    /// (e.g. `["content"]`).
    ///
    /// # Errors
    ///
    /// Returns an error if the drive address is invalid.
    pub fn segments(
        &self,
        drive: &DriveAddress,
        suffix: &[&str],
    ) -> Result<Vec<String>, GraphError> {
        let mut segments = drive.segments()?;
        match self {
            Self::Id(id) => {
                segments.push("items".to_string());
                segments.push(id.clone());
            }
            Self::Path(path) => {
                let parts = path_segments(path);
                if parts.is_empty() {
                    segments.push("root".to_string());
                } else {
                    // root:/a/b:/suffix
                    segments.push("root:".to_string());
                    let last = parts.len() - 1;
                    for (i, part) in parts.into_iter().enumerate() {
                        if i == last && !suffix.is_empty() {
                            segments.push(format!("{part}:"));
                        } else {
                            segments.push(part.to_string());
                        }
                    }
                }
            }
        }
        segments.extend(suffix.iter().map(|s| (*s).to_string()));
        Ok(segments)
    }
}

/// Non-empty segments of a slash-separated path.
pub fn path_segments(path: &str) -> Vec<&str> {
    path.split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// Canonical `/a/b` form of a path, `/` for the root.
pub fn normalize_path(path: &str) -> String {
    format!("/{}", path_segments(path).join("/"))
}

/// Segments addressing `name` as a child of the folder `parent_id`, as used
/// by upload endpoints (`items/{parent}:/{name}:/...`).
///
/// # Errors
///
/// Returns an error if the drive address is invalid or `name` is not a
/// single path segment.
pub fn child_segments(
    drive: &DriveAddress,
    parent_id: &str,
    name: &str,
    suffix: &str,
) -> Result<Vec<String>, GraphError> {
    validate_name(name)?;
    let mut segments = drive.segments()?;
    segments.push("items".to_string());
    segments.push(format!("{parent_id}:"));
    segments.push(format!("{name}:"));
    segments.push(suffix.to_string());
    Ok(segments)
}

/// Rejects empty names and names containing path separators.
///
/// # Errors
///
/// Returns [`GraphError::InvalidInput`] for unusable names.
pub fn validate_name(name: &str) -> Result<(), GraphError> {
    if name.trim().is_empty() {
        return Err(GraphError::InvalidInput("name must not be empty".to_string()));
    }
    if name.contains(['/', '\\']) {
        return Err(GraphError::InvalidInput(format!(
            "name '{name}' must not contain path separators"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(site: Option<&str>, drive: Option<&str>, user: Option<&str>) -> DriveAddress {
        DriveAddress {
            site_id: site.map(str::to_string),
            drive_id: drive.map(str::to_string),
            user_id: user.map(str::to_string),
        }
    }

    #[test]
    fn test_drive_segments_for_each_address_form() {
        assert_eq!(DriveAddress::me().segments().unwrap(), ["me", "drive"]);
        assert_eq!(
            drive(None, None, Some("ada@contoso.com")).segments().unwrap(),
            ["users", "ada@contoso.com", "drive"]
        );
        assert_eq!(
            DriveAddress::site("site-1").segments().unwrap(),
            ["sites", "site-1", "drive"]
        );
        assert_eq!(
            drive(Some("site-1"), Some("lib-2"), None).segments().unwrap(),
            ["sites", "site-1", "drives", "lib-2"]
        );
        assert_eq!(
            drive(None, Some("b!xyz"), None).segments().unwrap(),
            ["drives", "b!xyz"]
        );
    }

    #[test]
    fn test_user_and_site_together_are_rejected() {
        let err = drive(Some("site"), None, Some("user")).segments().unwrap_err();

        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_blank_drive_field_is_rejected() {
        assert!(matches!(
            drive(None, Some("  "), None).segments(),
            Err(GraphError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_item_locator_requires_exactly_one() {
        assert!(ItemLocator::from_parts("item_id", Some("x"), "path", Some("/a"), false).is_err());
        assert!(ItemLocator::from_parts("item_id", None, "path", None, false).is_err());
        assert_eq!(
            ItemLocator::from_parts("item_id", None, "path", None, true).unwrap(),
            ItemLocator::Path(String::new())
        );
        assert_eq!(
            ItemLocator::from_parts("item_id", Some("abc"), "path", None, false).unwrap(),
            ItemLocator::Id("abc".to_string())
        );
    }

    #[test]
    fn test_path_locator_segments() {
        let me = DriveAddress::me();
        let locator = ItemLocator::Path("/Reports//2024/q1.xlsx".to_string());

        assert_eq!(
            locator.segments(&me, &["content"]).unwrap(),
            ["me", "drive", "root:", "Reports", "2024", "q1.xlsx:", "content"]
        );
        assert_eq!(
            locator.segments(&me, &[]).unwrap(),
            ["me", "drive", "root:", "Reports", "2024", "q1.xlsx"]
        );
        assert_eq!(
            ItemLocator::Path("/".to_string())
                .segments(&me, &["children"])
                .unwrap(),
            ["me", "drive", "root", "children"]
        );
        assert!(ItemLocator::Path(" / ".to_string()).is_root());
    }

    #[test]
    fn test_child_segments_and_name_validation() {
        assert_eq!(
            child_segments(&DriveAddress::me(), "PARENT", "a.bin", "content").unwrap(),
            ["me", "drive", "items", "PARENT:", "a.bin:", "content"]
        );
        assert!(child_segments(&DriveAddress::me(), "P", "a/b", "content").is_err());
        assert!(validate_name("  ").is_err());
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("a//b/"), "/a/b");
    }
}
