//! Core request machinery for the lakestore SDK.
//!
//! This crate owns everything between a typed operation call and the wire:
//! - The operation registry and query-string assembly
//! - The request engine: token acquisition, URL building, retry, response
//!   parsing, latency piggybacking
//! - Retry policies (no-retry, exponential backoff, non-idempotent)
//! - The structured error taxonomy
//! - The process-wide latency ledger
//! - The wire data model: directory entries, content summaries, ACLs

pub mod acl;
pub mod error;
pub mod latency;
pub mod models;
pub mod operation;
pub mod protocol;
pub mod query;
pub mod request;
pub mod retry;

pub use acl::{AclAction, AclEntry, AclScope, AclStatus, AclType};
pub use error::{RemoteCallError, RemoteException, Result, StoreError};
pub use latency::LatencyTracker;
pub use models::{
    ChecksumInfo, ContentSummary, DirectoryEntry, DirectoryEntryPage, DirectoryEntryType,
    ExpiryOption, IfExists, SyncFlag, UserGroupRepresentation,
};
pub use operation::Operation;
pub use request::{RequestContext, RequestOptions, Response};
pub use retry::{
    BackoffConfig, ExponentialBackoffPolicy, NoRetryPolicy, NonIdempotentRetryPolicy, RetryPolicy,
};
