//! Client SDK for the lakestore hierarchical append-only blob store.
//!
//! The store is reached over an HTTPS REST surface modeled on WebHDFS with
//! vendor extensions. This crate is the user-facing half of the SDK:
//! - [`StoreClient`]: facade over every file, directory and ACL operation
//! - [`FileInputStream`]: buffered reads with shared look-ahead
//! - [`FileOutputStream`]: buffered, lease-bound appends
//! - A process-wide [`readahead::ReadBufferManager`] prefetcher
//!
//! ```no_run
//! use lakestore_client::{IfExists, StoreClient};
//!
//! # async fn demo() -> lakestore_core::Result<()> {
//! let client = StoreClient::with_token("contoso.lakestore.example.net", "TOKEN")?;
//! let mut file = client.create_file("/a/b.txt", IfExists::Overwrite, None, true).await?;
//! file.write(b"hello").await?;
//! file.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod input;
pub mod options;
pub mod output;
pub mod readahead;
pub mod summary;

pub use client::StoreClient;
pub use input::FileInputStream;
pub use options::{SslChannelMode, StoreOptions};
pub use output::FileOutputStream;

// the error and model types of the SDK surface
pub use lakestore_core::{
    AclAction, AclEntry, AclScope, AclStatus, AclType, ChecksumInfo, ContentSummary,
    DirectoryEntry, DirectoryEntryType, ExpiryOption, IfExists, Result, StoreError,
    UserGroupRepresentation,
};
