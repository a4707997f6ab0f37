//! Outlook mail tasks for Graphops.
//!
//! Tasks act on the signed-in user's mailbox, or on another mailbox through
//! `user_id` when the credential carries application permissions.

mod types;

use base64::Engine;
use graphops::{Context, JsonSchema, Result, bail, ensure, info, init, schemars, shutdown, task};
use msgraph::{GraphClient, paging};
use serde::{Deserialize, Serialize};
use types::{FileAttachment, OutgoingMessage, SendMailRequest};
pub use types::{
    AttachmentSource, BodyContentType, EmailAddress, Importance, ItemBody, Message, Recipient,
};

const DEFAULT_MAX_MESSAGES: usize = 50;
const MAX_MESSAGES_LIMIT: usize = 1000;
const MESSAGES_PAGE_SIZE: usize = 100;
const DEFAULT_ORDER_BY: &str = "receivedDateTime desc";
/// Graph's limit for attachments sent inline with `sendMail`.
const MAX_INLINE_ATTACHMENT_BYTES: usize = 3 * 1024 * 1024;
const FILE_ATTACHMENT_TYPE: &str = "#microsoft.graph.fileAttachment";

#[init]
async fn setup() -> Result<()> {
    info!("Outlook plugin initialized");
    Ok(())
}

#[shutdown]
fn cleanup() {
    info!("Outlook plugin shutting down");
}

fn default_true() -> bool {
    true
}

/// `me` or `users/{user_id}`.
fn mailbox_segments(user_id: Option<&str>) -> Result<Vec<String>> {
    match user_id.map(str::trim) {
        None => Ok(vec!["me".to_string()]),
        Some("") => bail!("user_id must not be empty"),
        Some(user) => Ok(vec!["users".to_string(), user.to_string()]),
    }
}

fn select_query(select: &[String]) -> Vec<(&'static str, String)> {
    if select.is_empty() {
        Vec::new()
    } else {
        vec![("$select", select.join(","))]
    }
}

// ===== Get Message =====

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetMessageInput {
    /// Mailbox owner (id or principal name). Defaults to the signed-in user.
    #[serde(default)]
    pub user_id: Option<String>,
    pub message_id: String,
    /// Properties to return, e.g. ["subject", "from"]. Defaults to all.
    #[serde(default)]
    pub select: Vec<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct GetMessageOutput {
    pub message: Message,
}

/// # Get Message
///
/// Retrieves a single Outlook message by id, optionally restricted to a set
/// of properties.
///
/// ## Tags
/// - mail
/// - outlook
///
/// # Errors
///
/// Returns an error if `message_id` is empty or the message does not exist.
#[task]
pub async fn get_message(ctx: Context, input: GetMessageInput) -> Result<GetMessageOutput> {
    ensure!(
        !input.message_id.trim().is_empty(),
        "message_id must not be empty"
    );
    let mut segments = mailbox_segments(input.user_id.as_deref())?;
    segments.extend(["messages".to_string(), input.message_id.trim().to_string()]);

    let client = GraphClient::from_ctx(&ctx).await?;
    let message: Message = client
        .get_json(client.url(&segments)?, &select_query(&input.select))
        .await?;

    Ok(GetMessageOutput { message })
}

// ===== List Messages =====

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListMessagesInput {
    #[serde(default)]
    pub user_id: Option<String>,
    /// Mail folder id or well-known name ("inbox", "sentitems", ...).
    /// Defaults to all messages of the mailbox.
    #[serde(default)]
    pub folder: Option<String>,
    /// OData `$filter`, e.g. "isRead eq false".
    #[serde(default)]
    pub filter: Option<String>,
    /// OData `$orderby`. Defaults to "receivedDateTime desc".
    #[serde(default)]
    pub order_by: Option<String>,
    /// Maximum number of messages (1-1000). Defaults to 50.
    #[serde(default)]
    pub max_messages: Option<usize>,
    #[serde(default)]
    pub select: Vec<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ListMessagesOutput {
    pub messages: Vec<Message>,
    pub count: usize,
    /// More messages matched than `max_messages`.
    pub truncated: bool,
}

/// # List Messages
///
/// Lists messages of a mailbox or one of its folders, newest first unless
/// another order is given, following pagination up to `max_messages`.
///
/// ## Tags
/// - mail
/// - outlook
///
/// # Errors
///
/// Returns an error if `max_messages` is out of range, the folder does not
/// exist or Graph rejects the filter.
#[task]
pub async fn list_messages(ctx: Context, input: ListMessagesInput) -> Result<ListMessagesOutput> {
    let max_messages = input.max_messages.unwrap_or(DEFAULT_MAX_MESSAGES);
    ensure!(
        (1..=MAX_MESSAGES_LIMIT).contains(&max_messages),
        "max_messages must be between 1 and {MAX_MESSAGES_LIMIT}"
    );

    let mut segments = mailbox_segments(input.user_id.as_deref())?;
    match input.folder.as_deref().map(str::trim) {
        Some("") => bail!("folder must not be empty"),
        Some(folder) => {
            segments.extend(["mailFolders".to_string(), folder.to_string()]);
        }
        None => {}
    }
    segments.push("messages".to_string());

    let mut query = select_query(&input.select);
    query.push(("$top", max_messages.min(MESSAGES_PAGE_SIZE).to_string()));
    query.push((
        "$orderby",
        input
            .order_by
            .clone()
            .unwrap_or_else(|| DEFAULT_ORDER_BY.to_string()),
    ));
    if let Some(filter) = &input.filter {
        query.push(("$filter", filter.clone()));
    }

    let client = GraphClient::from_ctx(&ctx).await?;
    let collected: paging::Collected<Message> =
        paging::collect(&client, client.url(&segments)?, &query, max_messages).await?;

    Ok(ListMessagesOutput {
        count: collected.items.len(),
        messages: collected.items,
        truncated: collected.truncated,
    })
}

// ===== Send Mail =====

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SendMailInput {
    /// Mailbox to send from. Defaults to the signed-in user.
    #[serde(default)]
    pub user_id: Option<String>,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub body_type: BodyContentType,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub reply_to: Vec<String>,
    #[serde(default)]
    pub importance: Option<Importance>,
    /// Files from host storage, at most 3 MiB in total.
    #[serde(default)]
    pub attachments: Vec<AttachmentSource>,
    /// Keep a copy in Sent Items. Defaults to true.
    #[serde(default = "default_true")]
    pub save_to_sent_items: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct SendMailOutput {
    pub sent: bool,
    pub recipients: usize,
    pub attachments: usize,
}

fn recipients(field: &str, addresses: &[String]) -> Result<Vec<Recipient>> {
    addresses
        .iter()
        .map(|address| {
            let trimmed = address.trim();
            ensure!(
                trimmed.contains('@') && !trimmed.starts_with('@') && !trimmed.ends_with('@'),
                "{field} contains an invalid address: '{address}'"
            );
            Ok(Recipient::address(trimmed))
        })
        .collect()
}

async fn load_attachments(
    ctx: &Context,
    sources: &[AttachmentSource],
) -> Result<Vec<FileAttachment>> {
    let mut total = 0usize;
    let mut attachments = Vec::with_capacity(sources.len());
    for source in sources {
        let content = ctx.storage().get(&source.uri).await?;
        total += content.len();
        ensure!(
            total <= MAX_INLINE_ATTACHMENT_BYTES,
            "attachments exceed {MAX_INLINE_ATTACHMENT_BYTES} bytes in total"
        );

        let name = source.name.clone().unwrap_or_else(|| {
            source
                .uri
                .rsplit('/')
                .next()
                .filter(|segment| !segment.is_empty())
                .unwrap_or("attachment")
                .to_string()
        });
        attachments.push(FileAttachment {
            odata_type: FILE_ATTACHMENT_TYPE,
            name,
            content_type: source
                .content_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            content_bytes: base64::engine::general_purpose::STANDARD.encode(&content),
        });
    }
    Ok(attachments)
}

/// # Send Mail
///
/// Sends an email from an Outlook mailbox, with optional file attachments
/// read from host storage.
///
/// Attachments are sent inline, which Graph limits to 3 MiB in total.
///
/// ## Tags
/// - mail
/// - outlook
///
/// # Errors
///
/// Returns an error if there is no recipient, an address is malformed, an
/// attachment cannot be read or the attachments are too large, or Graph
/// rejects the message.
#[task]
pub async fn send_mail(ctx: Context, input: SendMailInput) -> Result<SendMailOutput> {
    let to = recipients("to", &input.to)?;
    let cc = recipients("cc", &input.cc)?;
    let bcc = recipients("bcc", &input.bcc)?;
    let reply_to = recipients("reply_to", &input.reply_to)?;
    let recipient_count = to.len() + cc.len() + bcc.len();
    ensure!(
        recipient_count > 0,
        "at least one recipient (to, cc or bcc) is required"
    );
    let mut segments = mailbox_segments(input.user_id.as_deref())?;
    segments.push("sendMail".to_string());

    let attachments = load_attachments(&ctx, &input.attachments).await?;
    let attachment_count = attachments.len();
    let request = SendMailRequest {
        message: OutgoingMessage {
            subject: input.subject,
            body: ItemBody {
                content_type: input.body_type,
                content: input.body,
            },
            to_recipients: to,
            cc_recipients: cc,
            bcc_recipients: bcc,
            reply_to,
            importance: input.importance,
            attachments,
        },
        save_to_sent_items: input.save_to_sent_items,
    };

    let client = GraphClient::from_ctx(&ctx).await?;
    client.post_no_content(client.url(&segments)?, &request).await?;

    info!(
        recipients = recipient_count,
        attachments = attachment_count,
        "sent mail"
    );
    Ok(SendMailOutput {
        sent: true,
        recipients: recipient_count,
        attachments: attachment_count,
    })
}
