//! `new_files`: polls a folder's change feed and starts an execution for
//! each batch of new (or updated) files.
//!
//! The delta cursor lives in the host's trigger state next to the scope it
//! was read for and the time it was recorded. A cursor stored for one folder
//! is never replayed against another.

use chrono::{DateTime, Utc};
use graphops::{
    Context, Evaluation, Execution, JsonSchema, Result, TriggerState, info, schemars, trigger,
};
use msgraph::{
    DriveAddress, FileDescriptor, GraphClient, ItemLocator,
    delta::{self, ChangeKind, DeltaState},
};
use serde::Deserialize;

const SCOPE_KEY: &str = "scope";
const DELTA_LINK_KEY: &str = "delta_link";
const SINCE_KEY: &str = "since";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct NewFilesInput {
    #[serde(flatten)]
    pub drive: DriveAddress,
    /// Folder id to watch. Mutually exclusive with `folder_path`.
    #[serde(default)]
    pub folder_id: Option<String>,
    /// Folder path to watch. Defaults to the whole drive.
    #[serde(default)]
    pub folder_path: Option<String>,
    #[serde(default)]
    pub change_kind: ChangeKind,
    /// Seconds between polls. Read by the host scheduler.
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

fn stored_cursor(state: &TriggerState) -> Option<DeltaState> {
    Some(DeltaState {
        scope: state.get(SCOPE_KEY)?.to_string(),
        delta_link: state.get(DELTA_LINK_KEY)?.to_string(),
        since: state
            .get(SINCE_KEY)
            .and_then(|since| DateTime::parse_from_rfc3339(since).ok())
            .map(|since| since.with_timezone(&Utc)),
    })
}

/// # New Files
///
/// Fires when files are added to (or, with `change_kind`, modified in) a
/// OneDrive or SharePoint folder, including its subfolders.
///
/// The first poll only records where the change feed stands; files that
/// already exist are never reported. Each later poll reports the files
/// changed since the previous one as `{ "files": [...], "count": n }`. A file
/// created after the previous poll counts as new even if it was saved again
/// before this one.
///
/// ## Tags
/// - files
/// - onedrive
/// - sharepoint
///
/// # Errors
///
/// Returns an error if the folder addressing is invalid or the change feed
/// cannot be read; the previous state stays in effect.
#[trigger]
pub async fn new_files(
    ctx: Context,
    input: NewFilesInput,
    state: TriggerState,
) -> Result<Evaluation> {
    let folder = ItemLocator::from_parts(
        "folder_id",
        input.folder_id.as_deref(),
        "folder_path",
        input.folder_path.as_deref(),
        true,
    )?;

    let client = GraphClient::from_ctx(&ctx).await?;
    let previous = stored_cursor(&state);
    let poll = delta::poll(
        &client,
        &input.drive,
        &folder,
        previous.as_ref(),
        input.change_kind,
        Utc::now(),
    )
    .await?;

    let mut state = state
        .with(SCOPE_KEY, poll.state.scope)
        .with(DELTA_LINK_KEY, poll.state.delta_link);
    if let Some(since) = poll.state.since {
        state.set(SINCE_KEY, since.to_rfc3339());
    }
    if poll.files.is_empty() {
        return Ok(Evaluation::idle(state));
    }

    let files: Vec<FileDescriptor> = poll.files.iter().map(FileDescriptor::from).collect();
    let count = files.len();
    info!(count, "detected changed files");

    let variables = serde_json::json!({
        "files": serde_json::to_value(files)?,
        "count": count,
    });
    Ok(Evaluation::fire(Execution::new(variables), state))
}
