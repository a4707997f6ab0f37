//! Folder-path resolution.
//!
//! Walks a slash-separated path from the drive root, matching each segment
//! against the children of the current folder (ASCII case-insensitively,
//! like OneDrive itself) and optionally creating what is missing.

use serde_json::json;
use tracing::{debug, info};

use crate::{
    DriveItem, GraphClient, GraphError,
    drive::{DriveAddress, path_segments},
    paging::{self, Page},
};

const CHILDREN_PAGE_SIZE: &str = "200";

/// Resolves `path` to the id of a folder in `drive`. An empty path or `/`
/// resolves to the root folder's id.
///
/// With `create_missing`, absent segments are created with conflict
/// behavior `fail`; a 409 on create means someone else created it first, so
/// the lookup is retried once.
///
/// # Errors
///
/// Returns [`GraphError::NotFound`] for a missing segment when
/// `create_missing` is false, [`GraphError::InvalidInput`] when a segment
/// names an existing file, and any Graph error from listing or creating.
pub async fn resolve_folder(
    client: &GraphClient,
    drive: &DriveAddress,
    path: &str,
    create_missing: bool,
) -> Result<String, GraphError> {
    let drive_segments = drive.segments()?;

    let mut root_segments = drive_segments.clone();
    root_segments.push("root".to_string());
    let root: DriveItem = client
        .get_json(client.url(&root_segments)?, &[("$select", "id".to_string())])
        .await?;

    let mut current = root.id;
    for segment in path_segments(path) {
        current = match find_child(client, &drive_segments, &current, segment).await? {
            Some(child) => folder_id(child, segment)?,
            None if !create_missing => {
                return Err(GraphError::NotFound {
                    code: "itemNotFound".to_string(),
                    message: format!("folder '{segment}' does not exist"),
                });
            }
            None => create_child(client, &drive_segments, &current, segment).await?,
        };
    }

    debug!(path, folder_id = %current, "resolved folder path");
    Ok(current)
}

fn folder_id(item: DriveItem, segment: &str) -> Result<String, GraphError> {
    if item.is_folder() {
        Ok(item.id)
    } else {
        Err(GraphError::InvalidInput(format!(
            "'{segment}' exists but is not a folder"
        )))
    }
}

async fn find_child(
    client: &GraphClient,
    drive_segments: &[String],
    parent_id: &str,
    name: &str,
) -> Result<Option<DriveItem>, GraphError> {
    let mut segments = drive_segments.to_vec();
    segments.extend(["items".to_string(), parent_id.to_string(), "children".to_string()]);

    let query = [
        ("$select", "id,name,folder,file".to_string()),
        ("$top", CHILDREN_PAGE_SIZE.to_string()),
    ];
    let mut page: Page<DriveItem> = client.get_json(client.url(&segments)?, &query).await?;
    loop {
        if let Some(found) = page.value.into_iter().find(|child| {
            child
                .name
                .as_deref()
                .is_some_and(|n| n.eq_ignore_ascii_case(name))
        }) {
            return Ok(Some(found));
        }
        match page.next_link {
            Some(next) => page = client.get_json(client.link(&next)?, &[]).await?,
            None => return Ok(None),
        }
    }
}

async fn create_child(
    client: &GraphClient,
    drive_segments: &[String],
    parent_id: &str,
    name: &str,
) -> Result<String, GraphError> {
    match create_folder(client, drive_segments, parent_id, name, "fail").await {
        Ok(item) => {
            info!(name, parent_id, folder_id = %item.id, "created folder");
            Ok(item.id)
        }
        Err(err @ GraphError::Conflict { .. }) => {
            debug!(name, parent_id, "folder created concurrently, looking it up again");
            match find_child(client, drive_segments, parent_id, name).await? {
                Some(child) => folder_id(child, name),
                None => Err(err),
            }
        }
        Err(err) => Err(err),
    }
}

/// Creates a folder named `name` under `parent_id`.
///
/// # Errors
///
/// Returns [`GraphError::Conflict`] when `conflict_behavior` is `fail` and
/// the name is taken, or any other Graph error.
pub async fn create_folder(
    client: &GraphClient,
    drive_segments: &[String],
    parent_id: &str,
    name: &str,
    conflict_behavior: &str,
) -> Result<DriveItem, GraphError> {
    let mut segments = drive_segments.to_vec();
    segments.extend(["items".to_string(), parent_id.to_string(), "children".to_string()]);

    let body = json!({
        "name": name,
        "folder": {},
        "@microsoft.graph.conflictBehavior": conflict_behavior,
    });
    client.post_json(client.url(&segments)?, &body).await
}

/// Lists every child of a folder.
///
/// # Errors
///
/// Returns any Graph error from listing.
pub async fn list_children(
    client: &GraphClient,
    drive: &DriveAddress,
    folder_id: &str,
    limit: usize,
) -> Result<paging::Collected<DriveItem>, GraphError> {
    let mut segments = drive.segments()?;
    segments.extend(["items".to_string(), folder_id.to_string(), "children".to_string()]);
    paging::collect(
        client,
        client.url(&segments)?,
        &[("$top", CHILDREN_PAGE_SIZE.to_string())],
        limit,
    )
    .await
}
