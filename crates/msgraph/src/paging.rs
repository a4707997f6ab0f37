//! OData collection pages.

use reqwest::Url;
use serde::{Deserialize, de::DeserializeOwned};

use crate::{GraphClient, GraphError};

/// One page of a Graph collection.
#[derive(Debug, Deserialize)]
#[serde(bound = "T: DeserializeOwned")]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink", default)]
    pub next_link: Option<String>,
    /// Only on the last page of a delta round.
    #[serde(rename = "@odata.deltaLink", default)]
    pub delta_link: Option<String>,
}

/// Result of [`collect`].
#[derive(Debug)]
pub struct Collected<T> {
    pub items: Vec<T>,
    /// More items were available past the limit.
    pub truncated: bool,
}

/// Fetches `url` and follows `@odata.nextLink` until `limit` items are
/// gathered or the collection ends.
///
/// # Errors
///
/// Returns the first failing request's error.
pub async fn collect<T: DeserializeOwned>(
    client: &GraphClient,
    url: Url,
    query: &[(&str, String)],
    limit: usize,
) -> Result<Collected<T>, GraphError> {
    let mut items = Vec::new();
    let mut page: Page<T> = client.get_json(url, query).await?;

    loop {
        let remaining = limit - items.len();
        let page_len = page.value.len();
        items.extend(page.value.into_iter().take(remaining));

        if items.len() >= limit {
            let truncated = page_len > remaining || page.next_link.is_some();
            return Ok(Collected { items, truncated });
        }

        match page.next_link {
            Some(next) => page = client.get_json(client.link(&next)?, &[]).await?,
            None => {
                return Ok(Collected {
                    items,
                    truncated: false,
                });
            }
        }
    }
}
