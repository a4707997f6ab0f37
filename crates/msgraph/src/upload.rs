//! File upload: a single PUT for small content, a resumable upload session
//! for large content.
//!
//! Session slices are PUT sequentially because every range must start at the
//! offset the session expects next. Transient slice failures are retried
//! with exponential backoff on the same range, waiting at least as long as a
//! throttling response's `Retry-After`. Any final failure cancels the session
//! so the partial bytes are released.

use std::{ops::Range, time::Duration};

use backon::{ExponentialBuilder, Retryable};
use bytes::Bytes;
use graphops::{ConflictBehavior, config::UploadSettings};
use reqwest::{StatusCode, Url, header};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::{
    DriveItem, GraphClient, GraphError,
    client::decode,
    drive::{DriveAddress, child_segments, validate_name},
    types::UploadSessionInfo,
};

/// Graph rejects larger session PUTs.
pub const MAX_SLICE_BYTES: u64 = 60 * 1024 * 1024;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(8);
const CONFLICT_PARAM: &str = "@microsoft.graph.conflictBehavior";

/// Tunables of a single upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    /// Content of at least this many bytes goes through a session.
    pub threshold_bytes: u64,
    pub slice_bytes: u64,
    pub slice_alignment_bytes: u64,
    /// Retries per slice after the first attempt.
    pub max_retry_attempts: usize,
    pub retry_base_delay: Duration,
    pub conflict_behavior: ConflictBehavior,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self::from(&UploadSettings::default())
    }
}

impl From<&UploadSettings> for UploadOptions {
    fn from(settings: &UploadSettings) -> Self {
        Self {
            threshold_bytes: settings.threshold_bytes,
            slice_bytes: settings.slice_bytes,
            slice_alignment_bytes: settings.slice_alignment_bytes,
            max_retry_attempts: settings.max_retry_attempts,
            retry_base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            conflict_behavior: settings.conflict_behavior,
        }
    }
}

impl UploadOptions {
    /// Checks the slice configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::InvalidInput`] describing the first violated
    /// constraint.
    pub fn validate(&self) -> Result<(), GraphError> {
        let invalid = |msg: String| Err(GraphError::InvalidInput(msg));

        if self.threshold_bytes == 0 {
            return invalid("threshold_bytes must be greater than zero".to_string());
        }
        if self.slice_alignment_bytes == 0 {
            return invalid("slice_alignment_bytes must be greater than zero".to_string());
        }
        if self.slice_bytes == 0 {
            return invalid("slice_bytes must be greater than zero".to_string());
        }
        if self.slice_bytes > MAX_SLICE_BYTES {
            return invalid(format!(
                "slice_bytes {} exceeds the {MAX_SLICE_BYTES} byte limit",
                self.slice_bytes
            ));
        }
        if self.slice_bytes % self.slice_alignment_bytes != 0 {
            return invalid(format!(
                "slice_bytes {} must be a multiple of {}",
                self.slice_bytes, self.slice_alignment_bytes
            ));
        }
        Ok(())
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.retry_base_delay)
            .with_max_delay(MAX_RETRY_DELAY.max(self.retry_base_delay))
            .with_max_times(self.max_retry_attempts)
            .with_jitter()
    }
}

/// Where the uploaded file goes.
#[derive(Debug, Clone, Copy)]
pub struct UploadTarget<'a> {
    pub drive: &'a DriveAddress,
    /// Id of the parent folder.
    pub parent_id: &'a str,
    pub file_name: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum UploadStrategy {
    /// One PUT of the whole content.
    Simple,
    /// Resumable upload session.
    Session,
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub item: DriveItem,
    pub strategy: UploadStrategy,
    /// Number of PUT requests that carried content.
    pub slices: usize,
}

/// Uploads `content` to `target`, choosing the strategy by size.
///
/// Empty content always uses the simple PUT.
///
/// # Errors
///
/// Returns [`GraphError::InvalidInput`] before any request if `options` or
/// the file name are invalid, otherwise the error of the failing request.
pub async fn upload(
    client: &GraphClient,
    target: UploadTarget<'_>,
    content: Bytes,
    options: &UploadOptions,
) -> Result<UploadOutcome, GraphError> {
    options.validate()?;
    validate_name(target.file_name)?;

    let total = content.len() as u64;
    if total == 0 || total < options.threshold_bytes {
        let item = simple_upload(client, target, content, options.conflict_behavior).await?;
        info!(name = target.file_name, size = total, "uploaded file");
        return Ok(UploadOutcome {
            item,
            strategy: UploadStrategy::Simple,
            slices: 1,
        });
    }

    let session = UploadSession::open(client, target, content, options).await?;
    let upload_url = session.upload_url.clone();
    match session.run().await {
        Ok((item, slices)) => {
            info!(name = target.file_name, size = total, slices, "uploaded file through session");
            Ok(UploadOutcome {
                item,
                strategy: UploadStrategy::Session,
                slices,
            })
        }
        Err(err) => {
            cancel_session(client, upload_url).await;
            Err(err)
        }
    }
}

/// PUTs the whole content to `items/{parent}:/{name}:/content`.
///
/// # Errors
///
/// Returns an error if the name is invalid or the request fails.
pub async fn simple_upload(
    client: &GraphClient,
    target: UploadTarget<'_>,
    content: Bytes,
    conflict_behavior: ConflictBehavior,
) -> Result<DriveItem, GraphError> {
    let segments = child_segments(target.drive, target.parent_id, target.file_name, "content")?;
    client
        .put_bytes(
            client.url(&segments)?,
            &[(CONFLICT_PARAM, conflict_behavior.as_str().to_string())],
            content,
            "application/octet-stream",
        )
        .await
}

/// Byte ranges of consecutive slices covering `[0, total)`.
pub fn slice_ranges(total: u64, slice_bytes: u64) -> Vec<Range<u64>> {
    if slice_bytes == 0 {
        return Vec::new();
    }
    (0..total)
        .step_by(slice_bytes as usize)
        .map(|start| start..(start + slice_bytes).min(total))
        .collect()
}

enum SliceOutcome {
    /// 202: more bytes expected.
    Accepted,
    /// 200/201: the upload finished.
    Completed(DriveItem),
}

struct UploadSession<'a> {
    client: &'a GraphClient,
    upload_url: Url,
    content: Bytes,
    options: &'a UploadOptions,
}

impl<'a> UploadSession<'a> {
    async fn open(
        client: &'a GraphClient,
        target: UploadTarget<'_>,
        content: Bytes,
        options: &'a UploadOptions,
    ) -> Result<Self, GraphError> {
        let segments = child_segments(
            target.drive,
            target.parent_id,
            target.file_name,
            "createUploadSession",
        )?;
        let body = json!({
            "item": { "@microsoft.graph.conflictBehavior": options.conflict_behavior.as_str() }
        });
        let info: UploadSessionInfo = client.post_json(client.url(&segments)?, &body).await?;
        let upload_url = Url::parse(&info.upload_url)
            .map_err(|e| GraphError::Decode(format!("invalid uploadUrl: {e}")))?;

        debug!(
            name = target.file_name,
            expires = ?info.expiration_date_time,
            "opened upload session"
        );
        Ok(Self {
            client,
            upload_url,
            content,
            options,
        })
    }

    async fn run(&self) -> Result<(DriveItem, usize), GraphError> {
        let total = self.content.len() as u64;
        let ranges = slice_ranges(total, self.options.slice_bytes);
        let count = ranges.len();

        for (index, range) in ranges.into_iter().enumerate() {
            let is_last = index + 1 == count;
            debug!(offset = range.start, len = range.end - range.start, "uploading slice");

            let outcome = (|| self.put_slice(range.clone(), total))
                .retry(self.options.backoff())
                .when(GraphError::is_transient)
                .adjust(|err, delay| match err.retry_after() {
                    Some(wait) => delay.map(|delay| delay.max(wait)),
                    None => delay,
                })
                .notify(|err, delay| {
                    warn!(offset = range.start, ?delay, "retrying slice after error: {err}");
                })
                .await?;

            match (outcome, is_last) {
                (SliceOutcome::Accepted, false) => {}
                (SliceOutcome::Completed(item), true) => {
                    if item.size.is_some_and(|size| size != total) {
                        warn!(expected = total, reported = ?item.size, "uploaded size differs");
                    }
                    return Ok((item, count));
                }
                (SliceOutcome::Accepted, true) => {
                    return Err(GraphError::Decode(
                        "upload session accepted the final slice without returning the item"
                            .to_string(),
                    ));
                }
                (SliceOutcome::Completed(_), false) => {
                    return Err(GraphError::Decode(format!(
                        "upload session completed early at offset {}",
                        range.end
                    )));
                }
            }
        }

        Err(GraphError::InvalidInput(
            "upload session needs non-empty content".to_string(),
        ))
    }

    /// The session URL is pre-authenticated; no bearer token is sent.
    async fn put_slice(&self, range: Range<u64>, total: u64) -> Result<SliceOutcome, GraphError> {
        let content_range = format!("bytes {}-{}/{total}", range.start, range.end - 1);
        let body = self
            .content
            .slice(range.start as usize..range.end as usize);

        let response = self
            .client
            .http()
            .put(self.upload_url.clone())
            .header(header::CONTENT_RANGE, content_range)
            .body(body)
            .send()
            .await?;

        match response.status() {
            StatusCode::ACCEPTED => Ok(SliceOutcome::Accepted),
            StatusCode::OK | StatusCode::CREATED => {
                Ok(SliceOutcome::Completed(decode(response).await?))
            }
            _ => Err(GraphError::from_response(response).await),
        }
    }
}

async fn cancel_session(client: &GraphClient, upload_url: Url) {
    match client.http().delete(upload_url).send().await {
        Ok(response) if response.status().is_success() => debug!("cancelled upload session"),
        Ok(response) => {
            warn!(status = response.status().as_u16(), "failed to cancel upload session");
        }
        Err(err) => warn!("failed to cancel upload session: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, header, method, path, query_param},
    };

    use super::*;
    use crate::client::tests::test_client;

    const MIB: u64 = 1024 * 1024;
    const SESSION_PATH: &str = "/upload/session-1";

    fn fast_options() -> UploadOptions {
        UploadOptions {
            retry_base_delay: Duration::from_millis(1),
            ..UploadOptions::default()
        }
    }

    /// Bytes whose value depends on their offset.
    fn patterned(len: u64) -> Bytes {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn target<'a>(drive: &'a DriveAddress, name: &'a str) -> UploadTarget<'a> {
        UploadTarget {
            drive,
            parent_id: "PARENT",
            file_name: name,
        }
    }

    async fn mount_session(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/v1.0/me/drive/items/PARENT:/big.bin:/createUploadSession"))
            .and(body_partial_json(json!({
                "item": { "@microsoft.graph.conflictBehavior": "rename" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "uploadUrl": format!("{}{SESSION_PATH}", server.uri()),
                "expirationDateTime": "2030-01-01T00:00:00Z",
                "nextExpectedRanges": ["0-"]
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[test]
    fn test_slice_ranges_partition_content() {
        for (total, slice) in [(1, 1), (10, 3), (12, 4), (5 * MIB, 3 * MIB), (3 * MIB, 3 * MIB)] {
            let ranges = slice_ranges(total, slice);

            assert_eq!(ranges.first().map(|r| r.start), Some(0));
            assert_eq!(ranges.last().map(|r| r.end), Some(total));
            for pair in ranges.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
                assert_eq!(pair[0].end - pair[0].start, slice);
            }
        }
        assert!(slice_ranges(0, 4).is_empty());
    }

    #[test]
    fn test_validate_rejects_bad_configuration() {
        let defaults = UploadOptions::default;
        let cases = [
            UploadOptions {
                threshold_bytes: 0,
                ..defaults()
            },
            UploadOptions {
                slice_bytes: 0,
                ..defaults()
            },
            UploadOptions {
                slice_bytes: 100_000,
                ..defaults()
            },
            UploadOptions {
                slice_bytes: 64 * MIB,
                ..defaults()
            },
            UploadOptions {
                slice_alignment_bytes: 0,
                ..defaults()
            },
        ];

        for options in cases {
            assert!(
                matches!(options.validate(), Err(GraphError::InvalidInput(_))),
                "{options:?} should be rejected"
            );
        }
        assert!(UploadOptions::default().validate().is_ok());
    }

    #[tokio::test]
    async fn test_misaligned_slice_is_rejected_before_any_request() {
        let server = MockServer::start().await;
        let client = test_client(&server);
        let drive = DriveAddress::me();
        let options = UploadOptions {
            slice_bytes: 320 * 1024 + 1,
            ..fast_options()
        };

        let result = upload(
            &client,
            target(&drive, "big.bin"),
            Bytes::from(vec![0u8; 5 * MIB as usize]),
            &options,
        )
        .await;

        assert!(matches!(result, Err(GraphError::InvalidInput(msg)) if msg.contains("multiple")));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_five_mib_uploads_as_two_slices() {
        // Arrange
        let server = MockServer::start().await;
        mount_session(&server).await;
        Mock::given(method("PUT"))
            .and(path(SESSION_PATH))
            .and(header("content-range", "bytes 0-3145727/5242880"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "nextExpectedRanges": ["3145728-"]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(SESSION_PATH))
            .and(header("content-range", "bytes 3145728-5242879/5242880"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "ITEM-1",
                "name": "big.bin",
                "size": 5_242_880,
                "file": { "mimeType": "application/octet-stream" }
            })))
            .expect(1)
            .mount(&server)
            .await;
        let client = test_client(&server);
        let drive = DriveAddress::me();
        let payload = patterned(5 * MIB);

        // Act
        let outcome = upload(
            &client,
            target(&drive, "big.bin"),
            payload.clone(),
            &fast_options(),
        )
        .await
        .unwrap();

        // Assert
        assert_eq!(outcome.strategy, UploadStrategy::Session);
        assert_eq!(outcome.slices, 2);
        assert_eq!(outcome.item.size, Some(5 * MIB));
        let requests = server.received_requests().await.unwrap();
        let slice_puts: Vec<_> = requests
            .iter()
            .filter(|r| r.url.path() == SESSION_PATH)
            .collect();
        assert_eq!(slice_puts.len(), 2);
        let split = (3 * MIB) as usize;
        assert!(slice_puts[0].body == payload[..split], "first slice carries bytes 0..3 MiB");
        assert!(slice_puts[1].body == payload[split..], "second slice carries the rest");
        assert!(slice_puts.iter().all(|r| !r.headers.contains_key("authorization")));
    }

    #[tokio::test]
    async fn test_transient_slice_failure_is_retried() {
        // Arrange
        let server = MockServer::start().await;
        mount_session(&server).await;
        Mock::given(method("PUT"))
            .and(path(SESSION_PATH))
            .and(header("content-range", "bytes 0-3145727/4194304"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(SESSION_PATH))
            .and(header("content-range", "bytes 0-3145727/4194304"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(SESSION_PATH))
            .and(header("content-range", "bytes 3145728-4194303/4194304"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "id": "ITEM-2", "size": 4_194_304 })),
            )
            .expect(1)
            .mount(&server)
            .await;
        let client = test_client(&server);
        let drive = DriveAddress::me();

        // Act
        let outcome = upload(
            &client,
            target(&drive, "big.bin"),
            Bytes::from(vec![1u8; 4 * MIB as usize]),
            &fast_options(),
        )
        .await
        .unwrap();

        // Assert
        assert_eq!(outcome.item.id, "ITEM-2");
        assert_eq!(outcome.slices, 2);
    }

    #[tokio::test]
    async fn test_throttled_slice_waits_for_retry_after() {
        // Arrange
        let server = MockServer::start().await;
        mount_session(&server).await;
        Mock::given(method("PUT"))
            .and(path(SESSION_PATH))
            .and(header("content-range", "bytes 0-3145727/4194304"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(SESSION_PATH))
            .and(header("content-range", "bytes 0-3145727/4194304"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(SESSION_PATH))
            .and(header("content-range", "bytes 3145728-4194303/4194304"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "ITEM-3" })))
            .expect(1)
            .mount(&server)
            .await;
        let client = test_client(&server);
        let drive = DriveAddress::me();
        let started = std::time::Instant::now();

        // Act
        let outcome = upload(
            &client,
            target(&drive, "big.bin"),
            patterned(4 * MIB),
            &fast_options(),
        )
        .await
        .unwrap();

        // Assert
        assert_eq!(outcome.item.id, "ITEM-3");
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[test]
    fn test_retry_after_only_comes_from_throttling() {
        let throttled = GraphError::Throttled {
            retry_after_secs: Some(7),
            message: String::new(),
        };
        let server = GraphError::Server {
            status: 503,
            code: String::new(),
            message: String::new(),
        };

        assert_eq!(throttled.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(server.retry_after(), None);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_error_and_cancel_session() {
        // Arrange
        let server = MockServer::start().await;
        mount_session(&server).await;
        Mock::given(method("PUT"))
            .and(path(SESSION_PATH))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(SESSION_PATH))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        let client = test_client(&server);
        let drive = DriveAddress::me();
        let options = UploadOptions {
            max_retry_attempts: 2,
            ..fast_options()
        };

        // Act
        let err = upload(
            &client,
            target(&drive, "big.bin"),
            Bytes::from(vec![0u8; 4 * MIB as usize]),
            &options,
        )
        .await
        .unwrap_err();

        // Assert
        assert!(matches!(err, GraphError::Server { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_non_transient_slice_failure_is_not_retried() {
        let server = MockServer::start().await;
        mount_session(&server).await;
        Mock::given(method("PUT"))
            .and(path(SESSION_PATH))
            .respond_with(ResponseTemplate::new(416).set_body_json(json!({
                "error": { "code": "invalidRange", "message": "range mismatch" }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(SESSION_PATH))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        let client = test_client(&server);
        let drive = DriveAddress::me();

        let err = upload(
            &client,
            target(&drive, "big.bin"),
            Bytes::from(vec![0u8; 4 * MIB as usize]),
            &fast_options(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            GraphError::Request { status: 416, code, .. } if code == "invalidRange"
        ));
    }

    #[tokio::test]
    async fn test_zero_retries_disables_retrying() {
        let server = MockServer::start().await;
        mount_session(&server).await;
        Mock::given(method("PUT"))
            .and(path(SESSION_PATH))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(SESSION_PATH))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        let client = test_client(&server);
        let drive = DriveAddress::me();
        let options = UploadOptions {
            max_retry_attempts: 0,
            ..fast_options()
        };

        let err = upload(
            &client,
            target(&drive, "big.bin"),
            Bytes::from(vec![0u8; 4 * MIB as usize]),
            &options,
        )
        .await
        .unwrap_err();

        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_small_and_empty_content_use_simple_put() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1.0/me/drive/items/PARENT:/empty.txt:/content"))
            .and(query_param("@microsoft.graph.conflictBehavior", "replace"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({ "id": "E", "size": 0 })),
            )
            .expect(1)
            .mount(&server)
            .await;
        let client = test_client(&server);
        let drive = DriveAddress::me();
        let options = UploadOptions {
            conflict_behavior: ConflictBehavior::Replace,
            ..fast_options()
        };

        // Act
        let outcome = upload(&client, target(&drive, "empty.txt"), Bytes::new(), &options)
            .await
            .unwrap();

        // Assert
        assert_eq!(outcome.strategy, UploadStrategy::Simple);
        assert_eq!(outcome.item.size, Some(0));
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].body.is_empty());
    }

    #[tokio::test]
    async fn test_file_name_with_separator_is_rejected() {
        let server = MockServer::start().await;
        let client = test_client(&server);
        let drive = DriveAddress::me();

        let result = upload(
            &client,
            target(&drive, "a/b.txt"),
            Bytes::from_static(b"x"),
            &fast_options(),
        )
        .await;

        assert!(matches!(result, Err(GraphError::InvalidInput(_))));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
