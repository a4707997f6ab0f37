//! Change-feed polling over the drive delta API.
//!
//! A poll without a usable cursor establishes a baseline: it walks every
//! page of the delta feed and keeps only the final `@odata.deltaLink`. Later
//! polls start from the stored link and report the files changed since.
//! A cursor the service no longer accepts (410) triggers a fresh baseline.
//!
//! Every stored cursor carries the time it was recorded. A file created at or
//! after that time is new; anything older that shows up in the feed was
//! modified.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    DriveItem, GraphClient, GraphError,
    drive::{DriveAddress, ItemLocator, normalize_path},
    paging::Page,
};

/// Allowed skew between the local clock and the service's timestamps.
const CLOCK_SKEW_SECS: i64 = 5;

/// Without a recorded poll time, created and last-modified timestamps this
/// close together mark a new file.
const CREATE_TOLERANCE_MS: i64 = 1000;

/// Which changes a poll reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Newly created files only.
    #[default]
    Created,
    /// Modified existing files only.
    Updated,
    /// Both.
    Both,
}

impl ChangeKind {
    fn accepts(self, change: ChangeKind) -> bool {
        self == ChangeKind::Both || self == change
    }
}

/// Persisted cursor: the last delta link, the scope it belongs to and when
/// it was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaState {
    pub scope: String,
    pub delta_link: String,
    /// Start of the poll that produced `delta_link`. Absent in cursors
    /// stored before it was tracked.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollKind {
    /// No usable cursor; a baseline was recorded.
    Baseline,
    /// The cursor expired; a new baseline was recorded.
    Resync,
    /// Changes since the stored cursor were read.
    Tracking,
}

#[derive(Debug)]
pub struct DeltaPoll {
    pub kind: PollKind,
    /// Always the state to persist, whatever `kind` is.
    pub state: DeltaState,
    /// Matching files, empty unless `kind` is [`PollKind::Tracking`].
    pub files: Vec<DriveItem>,
}

/// Scope key of a delta cursor: endpoint, drive and folder.
///
/// # Errors
///
/// Returns an error if the drive address is invalid.
pub fn scope_key(
    client: &GraphClient,
    drive: &DriveAddress,
    folder: &ItemLocator,
) -> Result<String, GraphError> {
    let folder = match folder {
        ItemLocator::Id(id) => format!("id:{id}"),
        ItemLocator::Path(path) => format!("path:{}", normalize_path(path).to_ascii_lowercase()),
    };
    Ok(format!(
        "{}|{}|{folder}",
        client.base_url().origin().ascii_serialization(),
        drive.key()?
    ))
}

/// Runs one poll of the change feed for `folder`. `now` is the start of
/// this poll and becomes the new state's `since`.
///
/// # Errors
///
/// Returns any Graph error other than an expired cursor. The caller should
/// keep its previous state in that case.
pub async fn poll(
    client: &GraphClient,
    drive: &DriveAddress,
    folder: &ItemLocator,
    previous: Option<&DeltaState>,
    filter: ChangeKind,
    now: DateTime<Utc>,
) -> Result<DeltaPoll, GraphError> {
    let scope = scope_key(client, drive, folder)?;
    let initial_url = client.url(&folder.segments(drive, &["delta"])?)?;

    let Some(previous) = previous.filter(|state| state.scope == scope) else {
        if previous.is_some() {
            info!(scope, "stored delta cursor belongs to another scope, starting over");
        }
        let (_, delta_link) = fetch_round(client, initial_url).await?;
        info!(scope, "recorded delta baseline");
        return Ok(DeltaPoll {
            kind: PollKind::Baseline,
            state: DeltaState { scope, delta_link, since: Some(now) },
            files: Vec::new(),
        });
    };

    match fetch_round(client, client.link(&previous.delta_link)?).await {
        Ok((items, delta_link)) => {
            let files = select_changes(items, filter, previous.since);
            debug!(scope, changed = files.len(), "read delta changes");
            Ok(DeltaPoll {
                kind: PollKind::Tracking,
                state: DeltaState { scope, delta_link, since: Some(now) },
                files,
            })
        }
        Err(GraphError::ResyncRequired { code, .. }) => {
            warn!(scope, code, "delta cursor expired, resyncing");
            let (_, delta_link) = fetch_round(client, initial_url).await?;
            Ok(DeltaPoll {
                kind: PollKind::Resync,
                state: DeltaState { scope, delta_link, since: Some(now) },
                files: Vec::new(),
            })
        }
        Err(err) => Err(err),
    }
}

/// Follows `@odata.nextLink` pages until a `@odata.deltaLink` appears.
async fn fetch_round(
    client: &GraphClient,
    url: reqwest::Url,
) -> Result<(Vec<DriveItem>, String), GraphError> {
    let mut items = Vec::new();
    let mut page: Page<DriveItem> = client.get_json(url, &[]).await?;
    loop {
        items.append(&mut page.value);
        if let Some(delta_link) = page.delta_link {
            return Ok((items, delta_link));
        }
        let Some(next) = page.next_link else {
            return Err(GraphError::Decode(
                "delta page has neither @odata.nextLink nor @odata.deltaLink".to_string(),
            ));
        };
        page = client.get_json(client.link(&next)?, &[]).await?;
    }
}

/// Create vs update for an item read from a cursor recorded at `since`.
///
/// A file created no earlier than `since` (less the clock skew) is new, no
/// matter how often it was saved afterwards. Without `since`, the item's own
/// timestamps decide. Items without a creation time count as created.
pub fn classify(item: &DriveItem, since: Option<DateTime<Utc>>) -> ChangeKind {
    let Some(created) = item.created_date_time else {
        return ChangeKind::Created;
    };
    if let Some(since) = since {
        return if created >= since - TimeDelta::seconds(CLOCK_SKEW_SECS) {
            ChangeKind::Created
        } else {
            ChangeKind::Updated
        };
    }
    match item.last_modified_date_time {
        Some(modified) if (modified - created).num_milliseconds().abs() > CREATE_TOLERANCE_MS => {
            ChangeKind::Updated
        }
        _ => ChangeKind::Created,
    }
}

/// Keeps the last occurrence of each item id, then only files (no folders,
/// deleted items or the root) whose change kind `filter` accepts.
pub fn select_changes(
    items: Vec<DriveItem>,
    filter: ChangeKind,
    since: Option<DateTime<Utc>>,
) -> Vec<DriveItem> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut latest: Vec<DriveItem> = Vec::with_capacity(items.len());
    for item in items {
        match positions.get(&item.id) {
            Some(&pos) => latest[pos] = item,
            None => {
                positions.insert(item.id.clone(), latest.len());
                latest.push(item);
            }
        }
    }

    latest
        .into_iter()
        .filter(|item| !item.is_folder() && !item.is_deleted() && !item.is_root())
        .filter(|item| filter.accepts(classify(item, since)))
        .collect()
}
