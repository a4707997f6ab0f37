//! Typed access to the Microsoft Graph endpoints used by the Microsoft 365
//! plugins: OneDrive and SharePoint drives, and Outlook mail.
//!
//! Everything goes through [`GraphClient`], built per invocation from the
//! `microsoft` credential with [`GraphClient::from_ctx`]. The drive modules
//! layer the multi-step flows on top of it:
//!
//! - [`folders::resolve_folder`] turns `/a/b` into a folder id, creating
//!   missing folders on request.
//! - [`upload::upload`] picks a single PUT or a resumable upload session by
//!   size and retries failed slices.
//! - [`delta::poll`] tracks changes through the delta feed.

pub mod auth;
pub mod client;
pub mod delta;
pub mod drive;
pub mod error;
pub mod folders;
pub mod paging;
pub mod types;
pub mod upload;

pub use auth::MicrosoftCredential;
pub use client::GraphClient;
pub use drive::{DriveAddress, ItemLocator};
pub use error::GraphError;
pub use types::{DriveItem, FileDescriptor};
