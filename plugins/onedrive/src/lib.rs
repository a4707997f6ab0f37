//! OneDrive and SharePoint document library tasks for Graphops.
//!
//! Every task addresses a drive through the flattened [`DriveAddress`]
//! fields (`site_id`, `drive_id`, `user_id`) and an item by either id or
//! path. File contents travel through host storage: uploads read a storage
//! URI, downloads and exports hand one back.

use bytes::Bytes;
use graphops::{
    ConflictBehavior, Context, JsonSchema, Result, ensure, info, init, schemars, shutdown, task,
};
use msgraph::{
    DriveAddress, DriveItem, FileDescriptor, GraphClient, GraphError, ItemLocator,
    drive::validate_name,
    folders::{create_folder, resolve_folder},
    paging,
    upload::{UploadTarget, simple_upload},
};
use serde::{Deserialize, Serialize};

mod transfer;
mod trigger;
mod types;

pub use transfer::{
    DownloadInput, DownloadOutput, ExportInput, ExportOutput, UploadInput, UploadOutput, download,
    export, upload,
};
pub use trigger::{NewFilesInput, new_files};
pub use types::{ExportFormat, ItemKind};

const DEFAULT_MAX_ITEMS: usize = 200;
const MAX_ITEMS_LIMIT: usize = 5000;
const CHILDREN_PAGE_SIZE: usize = 200;

#[init]
async fn setup() -> Result<()> {
    info!("OneDrive plugin initialized");
    Ok(())
}

#[shutdown]
fn cleanup() {
    info!("OneDrive plugin shutting down");
}

fn default_true() -> bool {
    true
}

/// Resolves an optional parent given by id or path to a folder id. Neither
/// means the drive root.
pub(crate) async fn resolve_parent(
    client: &GraphClient,
    drive: &DriveAddress,
    parent_id: Option<&str>,
    parent_path: Option<&str>,
    create_parents: bool,
) -> Result<String, GraphError> {
    match ItemLocator::from_parts("parent_id", parent_id, "parent_path", parent_path, true)? {
        ItemLocator::Id(id) => Ok(id),
        ItemLocator::Path(path) => resolve_folder(client, drive, &path, create_parents).await,
    }
}

pub(crate) async fn get_item(
    client: &GraphClient,
    drive: &DriveAddress,
    locator: &ItemLocator,
) -> Result<DriveItem, GraphError> {
    client
        .get_json(client.url(&locator.segments(drive, &[])?)?, &[])
        .await
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateInput {
    #[serde(flatten)]
    pub drive: DriveAddress,
    /// Parent folder id. Mutually exclusive with `parent_path`.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Parent folder path, e.g. "/Projects/2024". Defaults to the root.
    #[serde(default)]
    pub parent_path: Option<String>,
    /// Name of the new folder or file.
    pub name: String,
    #[serde(default)]
    pub kind: ItemKind,
    /// Text content of a new file. Only valid with kind "file".
    #[serde(default)]
    pub content: Option<String>,
    /// Defaults to the configured upload conflict behavior.
    #[serde(default)]
    pub conflict_behavior: Option<ConflictBehavior>,
    /// Create missing folders along `parent_path`. Defaults to true.
    #[serde(default = "default_true")]
    pub create_parents: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct CreateOutput {
    pub item: FileDescriptor,
}

/// # Create Item
///
/// Creates a folder, or a file with optional text content, under a parent
/// folder given by id or path.
///
/// A parent path is resolved segment by segment; missing folders are
/// created unless `create_parents` is false.
///
/// ## Tags
/// - files
/// - onedrive
/// - sharepoint
///
/// # Errors
///
/// Returns an error if the name is invalid, `content` is given for a
/// folder, the parent cannot be resolved or Graph rejects the request.
#[task]
pub async fn create(ctx: Context, input: CreateInput) -> Result<CreateOutput> {
    validate_name(&input.name)?;
    ensure!(
        input.kind == ItemKind::File || input.content.is_none(),
        "content is only allowed when kind is 'file'"
    );

    let client = GraphClient::from_ctx(&ctx).await?;
    let parent_id = resolve_parent(
        &client,
        &input.drive,
        input.parent_id.as_deref(),
        input.parent_path.as_deref(),
        input.create_parents,
    )
    .await?;
    let conflict_behavior = input
        .conflict_behavior
        .unwrap_or(ctx.config().upload.conflict_behavior);

    let item = match input.kind {
        ItemKind::Folder => {
            create_folder(
                &client,
                &input.drive.segments()?,
                &parent_id,
                &input.name,
                conflict_behavior.as_str(),
            )
            .await?
        }
        ItemKind::File => {
            let target = UploadTarget {
                drive: &input.drive,
                parent_id: &parent_id,
                file_name: &input.name,
            };
            let content = Bytes::from(input.content.clone().unwrap_or_default());
            simple_upload(&client, target, content, conflict_behavior).await?
        }
    };

    info!(name = %input.name, id = %item.id, kind = ?input.kind, "created item");
    Ok(CreateOutput { item: item.into() })
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteInput {
    #[serde(flatten)]
    pub drive: DriveAddress,
    /// Item id. Mutually exclusive with `path`.
    #[serde(default)]
    pub item_id: Option<String>,
    /// Item path, e.g. "/Archive/old.docx".
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct DeleteOutput {
    pub deleted_id: String,
}

/// # Delete Item
///
/// Deletes a file or folder by id or path. Deleted items go to the drive's
/// recycle bin.
///
/// ## Tags
/// - files
/// - onedrive
/// - sharepoint
///
/// # Errors
///
/// Returns an error if the item is not addressed by exactly one of id and
/// path, addresses the root, or does not exist.
#[task]
pub async fn delete(ctx: Context, input: DeleteInput) -> Result<DeleteOutput> {
    let locator = ItemLocator::from_parts(
        "item_id",
        input.item_id.as_deref(),
        "path",
        input.path.as_deref(),
        false,
    )?;
    ensure!(!locator.is_root(), "refusing to delete the drive root");

    let client = GraphClient::from_ctx(&ctx).await?;
    let item_id = match locator {
        ItemLocator::Id(id) => id,
        path @ ItemLocator::Path(_) => get_item(&client, &input.drive, &path).await?.id,
    };

    let segments = ItemLocator::Id(item_id.clone()).segments(&input.drive, &[])?;
    client.delete(client.url(&segments)?).await?;

    info!(item_id = %item_id, "deleted item");
    Ok(DeleteOutput {
        deleted_id: item_id,
    })
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListInput {
    #[serde(flatten)]
    pub drive: DriveAddress,
    /// Folder id. Mutually exclusive with `folder_path`.
    #[serde(default)]
    pub folder_id: Option<String>,
    /// Folder path. Defaults to the root.
    #[serde(default)]
    pub folder_path: Option<String>,
    /// Maximum number of children to read (1-5000). Defaults to 200.
    #[serde(default)]
    pub max_items: Option<usize>,
    /// Drop folders from the result.
    #[serde(default)]
    pub files_only: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ListOutput {
    pub items: Vec<FileDescriptor>,
    pub count: usize,
    /// More children exist past `max_items`.
    pub truncated: bool,
}

/// # List Folder
///
/// Lists the children of a folder, following pagination up to `max_items`.
///
/// ## Tags
/// - files
/// - onedrive
/// - sharepoint
///
/// # Errors
///
/// Returns an error if `max_items` is out of range or the folder cannot be
/// listed.
#[task]
pub async fn list(ctx: Context, input: ListInput) -> Result<ListOutput> {
    let max_items = input.max_items.unwrap_or(DEFAULT_MAX_ITEMS);
    ensure!(
        (1..=MAX_ITEMS_LIMIT).contains(&max_items),
        "max_items must be between 1 and {MAX_ITEMS_LIMIT}"
    );
    let folder = ItemLocator::from_parts(
        "folder_id",
        input.folder_id.as_deref(),
        "folder_path",
        input.folder_path.as_deref(),
        true,
    )?;

    let client = GraphClient::from_ctx(&ctx).await?;
    let url = client.url(&folder.segments(&input.drive, &["children"])?)?;
    let page_size = max_items.min(CHILDREN_PAGE_SIZE).to_string();
    let collected: paging::Collected<DriveItem> =
        paging::collect(&client, url, &[("$top", page_size)], max_items).await?;

    let items: Vec<FileDescriptor> = collected
        .items
        .iter()
        .filter(|item| !(input.files_only && item.is_folder()))
        .map(FileDescriptor::from)
        .collect();

    Ok(ListOutput {
        count: items.len(),
        items,
        truncated: collected.truncated,
    })
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MoveInput {
    #[serde(flatten)]
    pub drive: DriveAddress,
    /// Id of the item to move. Mutually exclusive with `path`.
    #[serde(default)]
    pub item_id: Option<String>,
    /// Path of the item to move.
    #[serde(default)]
    pub path: Option<String>,
    /// Destination folder id.
    #[serde(default)]
    pub destination_id: Option<String>,
    /// Destination folder path. Without any destination the item stays in
    /// place and is only renamed.
    #[serde(default)]
    pub destination_path: Option<String>,
    /// New name for the item.
    #[serde(default)]
    pub new_name: Option<String>,
    /// Create missing folders along `destination_path`.
    #[serde(default)]
    pub create_parents: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct MoveOutput {
    pub item: FileDescriptor,
}

/// # Move Item (ID: move)
///
/// Moves a file or folder to another folder of the same drive, optionally
/// renaming it on the way.
///
/// ## Tags
/// - files
/// - onedrive
/// - sharepoint
///
/// # Errors
///
/// Returns an error if neither a destination nor a new name is given, the
/// destination cannot be resolved or Graph rejects the move.
#[task]
pub async fn move_item(ctx: Context, input: MoveInput) -> Result<MoveOutput> {
    let locator = ItemLocator::from_parts(
        "item_id",
        input.item_id.as_deref(),
        "path",
        input.path.as_deref(),
        false,
    )?;
    ensure!(!locator.is_root(), "the drive root cannot be moved");
    if let Some(name) = &input.new_name {
        validate_name(name)?;
    }
    let has_destination = input.destination_id.is_some() || input.destination_path.is_some();
    ensure!(
        has_destination || input.new_name.is_some(),
        "one of destination_id, destination_path or new_name is required"
    );

    let client = GraphClient::from_ctx(&ctx).await?;
    let mut body = serde_json::Map::new();
    if has_destination {
        let destination = resolve_parent(
            &client,
            &input.drive,
            input.destination_id.as_deref(),
            input.destination_path.as_deref(),
            input.create_parents,
        )
        .await?;
        body.insert(
            "parentReference".to_string(),
            serde_json::json!({ "id": destination }),
        );
    }
    if let Some(name) = &input.new_name {
        body.insert("name".to_string(), serde_json::Value::from(name.as_str()));
    }

    let item: DriveItem = client
        .patch_json(client.url(&locator.segments(&input.drive, &[])?)?, &body)
        .await?;

    info!(id = %item.id, name = item.name_or_id(), "moved item");
    Ok(MoveOutput { item: item.into() })
}
