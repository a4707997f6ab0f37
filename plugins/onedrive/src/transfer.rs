//! Tasks moving file contents between a drive and host storage.

use graphops::{ConflictBehavior, Context, JsonSchema, Result, ensure, info, schemars, task};
use msgraph::{
    DriveAddress, FileDescriptor, GraphClient, ItemLocator,
    drive::validate_name,
    upload::{UploadOptions, UploadStrategy, UploadTarget},
};
use serde::{Deserialize, Serialize};

use crate::{ExportFormat, default_true, get_item, resolve_parent};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DownloadInput {
    #[serde(flatten)]
    pub drive: DriveAddress,
    /// File id. Mutually exclusive with `path`.
    #[serde(default)]
    pub item_id: Option<String>,
    /// File path, e.g. "/Documents/report.pdf".
    #[serde(default)]
    pub path: Option<String>,
    /// Name to store the content under. Defaults to the file's name.
    #[serde(default)]
    pub storage_name: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct DownloadOutput {
    /// Host storage URI of the downloaded content.
    pub uri: String,
    pub size: u64,
    pub file: FileDescriptor,
}

/// # Download File
///
/// Downloads a file's content into host storage and returns its storage URI
/// together with the file's metadata.
///
/// ## Tags
/// - files
/// - onedrive
/// - sharepoint
/// - download
///
/// # Errors
///
/// Returns an error if the item does not exist, is a folder, or storage
/// rejects the content.
#[task]
pub async fn download(ctx: Context, input: DownloadInput) -> Result<DownloadOutput> {
    let locator = ItemLocator::from_parts(
        "item_id",
        input.item_id.as_deref(),
        "path",
        input.path.as_deref(),
        false,
    )?;

    let client = GraphClient::from_ctx(&ctx).await?;
    let item = get_item(&client, &input.drive, &locator).await?;
    ensure!(
        !item.is_folder(),
        "'{}' is a folder and cannot be downloaded",
        item.name_or_id()
    );

    let content_url =
        client.url(&ItemLocator::Id(item.id.clone()).segments(&input.drive, &["content"])?)?;
    let content = client.get_bytes(content_url, &[]).await?;
    let size = content.len() as u64;

    let name = input.storage_name.as_deref().unwrap_or(item.name_or_id());
    let uri = ctx.storage().put(name, content).await?;

    info!(id = %item.id, size, uri = %uri, "downloaded file");
    Ok(DownloadOutput {
        uri,
        size,
        file: FileDescriptor::from(&item),
    })
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExportInput {
    #[serde(flatten)]
    pub drive: DriveAddress,
    /// File id. Mutually exclusive with `path`.
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    pub format: ExportFormat,
    /// Name to store the result under. Defaults to the file's name with the
    /// format's extension.
    #[serde(default)]
    pub storage_name: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ExportOutput {
    pub uri: String,
    pub size: u64,
    pub format: ExportFormat,
    pub source: FileDescriptor,
}

/// # Export File
///
/// Converts a file to another format on the server (PDF, HTML, GLB or JPG)
/// and stores the result in host storage.
///
/// Which conversions are available depends on the source type; Graph
/// rejects unsupported combinations.
///
/// ## Tags
/// - files
/// - onedrive
/// - sharepoint
/// - convert
///
/// # Errors
///
/// Returns an error if the item does not exist, is a folder, or the
/// conversion is not supported.
#[task]
pub async fn export(ctx: Context, input: ExportInput) -> Result<ExportOutput> {
    let locator = ItemLocator::from_parts(
        "item_id",
        input.item_id.as_deref(),
        "path",
        input.path.as_deref(),
        false,
    )?;

    let client = GraphClient::from_ctx(&ctx).await?;
    let item = get_item(&client, &input.drive, &locator).await?;
    ensure!(
        !item.is_folder(),
        "'{}' is a folder and cannot be exported",
        item.name_or_id()
    );

    let content_url =
        client.url(&ItemLocator::Id(item.id.clone()).segments(&input.drive, &["content"])?)?;
    let content = client
        .get_bytes(content_url, &[("format", input.format.as_str().to_string())])
        .await?;
    let size = content.len() as u64;

    let name = input
        .storage_name
        .clone()
        .unwrap_or_else(|| input.format.rename(item.name_or_id()));
    let uri = ctx.storage().put(&name, content).await?;

    info!(id = %item.id, format = input.format.as_str(), size, "exported file");
    Ok(ExportOutput {
        uri,
        size,
        format: input.format,
        source: FileDescriptor::from(&item),
    })
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UploadInput {
    #[serde(flatten)]
    pub drive: DriveAddress,
    /// Parent folder id. Mutually exclusive with `parent_path`.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Parent folder path. Defaults to the root.
    #[serde(default)]
    pub parent_path: Option<String>,
    /// Name of the uploaded file.
    pub file_name: String,
    /// Host storage URI of the content.
    pub source_uri: String,
    /// Create missing folders along `parent_path`. Defaults to true.
    #[serde(default = "default_true")]
    pub create_parents: bool,
    #[serde(default)]
    pub conflict_behavior: Option<ConflictBehavior>,
    /// Overrides the configured upload-session threshold.
    #[serde(default)]
    pub threshold_bytes: Option<u64>,
    /// Overrides the configured slice size.
    #[serde(default)]
    pub slice_bytes: Option<u64>,
    /// Overrides the configured retries per slice.
    #[serde(default)]
    pub max_retry_attempts: Option<usize>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct UploadOutput {
    pub file: FileDescriptor,
    pub strategy: UploadStrategy,
    /// Number of content requests sent.
    pub slices: usize,
}

impl UploadInput {
    fn options(&self, ctx: &Context) -> UploadOptions {
        let mut options = UploadOptions::from(&ctx.config().upload);
        if let Some(threshold) = self.threshold_bytes {
            options.threshold_bytes = threshold;
        }
        if let Some(slice) = self.slice_bytes {
            options.slice_bytes = slice;
        }
        if let Some(retries) = self.max_retry_attempts {
            options.max_retry_attempts = retries;
        }
        if let Some(behavior) = self.conflict_behavior {
            options.conflict_behavior = behavior;
        }
        options
    }
}

/// # Upload File
///
/// Uploads content from host storage into a drive folder.
///
/// Content below the threshold (4 MiB by default) is sent in one request;
/// larger content goes through a resumable upload session in fixed-size
/// slices, each retried on transient failures.
///
/// ## Tags
/// - files
/// - onedrive
/// - sharepoint
/// - upload
///
/// # Errors
///
/// Returns an error if the slice settings or file name are invalid, the
/// source URI cannot be read, the parent cannot be resolved, or the upload
/// fails after retries.
#[task]
pub async fn upload(ctx: Context, input: UploadInput) -> Result<UploadOutput> {
    let options = input.options(&ctx);
    options.validate()?;
    validate_name(&input.file_name)?;

    let content = ctx.storage().get(&input.source_uri).await?;

    let client = GraphClient::from_ctx(&ctx).await?;
    let parent_id = resolve_parent(
        &client,
        &input.drive,
        input.parent_id.as_deref(),
        input.parent_path.as_deref(),
        input.create_parents,
    )
    .await?;

    let target = UploadTarget {
        drive: &input.drive,
        parent_id: &parent_id,
        file_name: &input.file_name,
    };
    let outcome = msgraph::upload::upload(&client, target, content, &options).await?;

    Ok(UploadOutput {
        file: outcome.item.into(),
        strategy: outcome.strategy,
        slices: outcome.slices,
    })
}
