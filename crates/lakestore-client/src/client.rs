//! The client facade: one object binding authentication, configuration, and
//! every file and directory operation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::trace;
use uuid::Uuid;

use lakestore_auth::{AccessTokenProvider, OAuthToken, StaticTokenSource};
use lakestore_core::acl::{is_valid_octal, AclEntry, AclStatus};
use lakestore_core::error::{Result, StoreError};
use lakestore_core::latency::LatencyTracker;
use lakestore_core::models::{
    ChecksumInfo, ContentSummary, DirectoryEntry, DirectoryEntryType, ExpiryOption, IfExists,
    SyncFlag, UserGroupRepresentation,
};
use lakestore_core::protocol;
use lakestore_core::request::{default_user_agent, RequestContext, RequestOptions};
use lakestore_core::retry::NonIdempotentRetryPolicy;

use crate::input::FileInputStream;
use crate::options::{normalize_path_prefix, SslChannelMode, StoreOptions};
use crate::output::FileOutputStream;
use crate::summary::ContentSummaryProcessor;

static CLIENT_INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Client-side enumeration page size.
const LIST_PAGE_SIZE: u32 = 4000;
/// Extra timeout granted per source path in a concatenate call.
const CONCAT_TIMEOUT_PER_SOURCE_MS: u64 = 500;

/// A client bound to one store account.
///
/// Cheap to share behind an `Arc`; the streams it hands out each hold their
/// own cursors and are single-caller.
pub struct StoreClient {
    ctx: Arc<RequestContext>,
    read_ahead_queue_depth: Option<usize>,
    /// Flipped for the lifetime of the client when the server rejects
    /// speculative reads.
    read_aheads_disabled: Arc<AtomicBool>,
    ssl_channel_mode: SslChannelMode,
}

impl StoreClient {
    /// Client using a token provider, with default options.
    pub fn new(account_fqdn: impl Into<String>, provider: AccessTokenProvider) -> Result<Self> {
        Self::with_options(account_fqdn, provider, StoreOptions::default())
    }

    /// Client using a raw bearer token obtained out of band.
    pub fn with_token(account_fqdn: impl Into<String>, access_token: &str) -> Result<Self> {
        if access_token.is_empty() {
            return Err(StoreError::InvalidInput("token is required".to_string()));
        }
        Self::new(
            account_fqdn,
            AccessTokenProvider::new(StaticTokenSource::new(access_token)),
        )
    }

    /// Client with explicit options.
    pub fn with_options(
        account_fqdn: impl Into<String>,
        provider: AccessTokenProvider,
        options: StoreOptions,
    ) -> Result<Self> {
        let account_fqdn = account_fqdn.into();
        if account_fqdn.trim().is_empty() {
            return Err(StoreError::InvalidInput(
                "account name is required".to_string(),
            ));
        }
        LatencyTracker::init();

        let mut ctx = RequestContext::new(account_fqdn, Arc::new(provider));
        ctx.client_instance_id = CLIENT_INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
        if options.insecure_transport {
            ctx.scheme = "http".to_string();
        }
        ctx.throw_remote_exceptions = options.throw_remote_exceptions;
        if let Some(prefix) = &options.file_path_prefix {
            ctx.path_prefix = normalize_path_prefix(prefix)?;
        }
        if let Some(timeout) = options.default_timeout {
            ctx.default_timeout = timeout;
        }
        if let Some(backoff) = options.backoff {
            ctx.backoff = backoff;
        }
        if let Some(suffix) = &options.user_agent_suffix {
            if !suffix.trim().is_empty() {
                ctx.user_agent = format!("{}/{}", default_user_agent(), suffix);
            }
        }
        trace!(
            account = %ctx.account_fqdn,
            client_id = ctx.client_instance_id,
            "store client created"
        );
        Ok(Self {
            ctx: Arc::new(ctx),
            read_ahead_queue_depth: options.read_ahead_queue_depth,
            read_aheads_disabled: Arc::new(AtomicBool::new(false)),
            ssl_channel_mode: options.ssl_channel_mode,
        })
    }

    fn default_opts(&self) -> RequestOptions {
        RequestOptions::new(self.ctx.make_exponential_policy())
    }

    /* ------------------------------------------------------------------ */
    /* File operations                                                     */
    /* ------------------------------------------------------------------ */

    /// Creates a file and returns a stream to write it.
    ///
    /// With `IfExists::Overwrite` the call retries under the exponential
    /// policy, and a 403 `FileAlreadyExistsException` from a server-side
    /// race is treated as success. Without overwrite the non-idempotent
    /// policy applies.
    pub async fn create_file(
        &self,
        path: &str,
        mode: IfExists,
        octal_permission: Option<&str>,
        create_parent: bool,
    ) -> Result<FileOutputStream> {
        if let Some(permission) = octal_permission {
            if !is_valid_octal(permission) {
                return Err(StoreError::InvalidInput(format!(
                    "invalid permission specified: {permission}"
                )));
            }
        }
        let overwrite = mode == IfExists::Overwrite;
        let lease_id = Uuid::new_v4().to_string();
        let mut opts = if overwrite {
            self.default_opts()
        } else {
            RequestOptions::new(NonIdempotentRetryPolicy::new())
        };
        let created = protocol::create(
            &self.ctx,
            path,
            overwrite,
            octal_permission,
            Bytes::new(),
            &lease_id,
            &lease_id,
            create_parent,
            SyncFlag::Data,
            &mut opts,
        )
        .await;
        if let Err(err) = created {
            // tolerate losing the create race when overwriting
            let benign = overwrite
                && matches!(&err, StoreError::Remote(e) if e.http_status == 403
                    && e.remote_exception_name()
                        .is_some_and(|name| name.contains("FileAlreadyExistsException")));
            if !benign {
                return Err(err);
            }
        }
        Ok(FileOutputStream::open_create(
            path.to_string(),
            Arc::clone(&self.ctx),
            lease_id,
        ))
    }

    /// Creates an empty file, failing if it exists.
    pub async fn create_empty_file(&self, path: &str) -> Result<()> {
        let mut stream = self
            .create_file(path, IfExists::Fail, None, true)
            .await?;
        stream.close().await
    }

    /// Opens a file for reading.
    pub async fn open(&self, path: &str) -> Result<FileInputStream> {
        let entry = self.get_directory_entry(path).await?;
        if entry.entry_type != DirectoryEntryType::File {
            return Err(StoreError::InvalidInput(format!(
                "path is not a file: {path}"
            )));
        }
        Ok(FileInputStream::new(
            path.to_string(),
            entry,
            Arc::clone(&self.ctx),
            self.read_ahead_queue_depth,
            Arc::clone(&self.read_aheads_disabled),
        ))
    }

    /// Opens an existing file for appending.
    pub async fn append(&self, path: &str) -> Result<FileOutputStream> {
        FileOutputStream::open_append(path.to_string(), Arc::clone(&self.ctx)).await
    }

    /// Appends without a lease: the server picks the offset and multiple
    /// writers may interleave. `auto_create` creates the file if missing.
    pub async fn concurrent_append(
        &self,
        path: &str,
        data: &[u8],
        auto_create: bool,
    ) -> Result<()> {
        let mut opts = RequestOptions::new(NonIdempotentRetryPolicy::new());
        protocol::concurrent_append(
            &self.ctx,
            path,
            Bytes::copy_from_slice(data),
            auto_create,
            &mut opts,
        )
        .await?;
        Ok(())
    }

    /// Concatenates `sources` into `path`; sources are deleted on success.
    pub async fn concatenate_files(&self, path: &str, sources: &[String]) -> Result<()> {
        if sources.is_empty() {
            return Err(StoreError::InvalidInput(
                "source file list cannot be empty".to_string(),
            ));
        }
        let mut opts = self.default_opts().with_timeout(self.concat_timeout(sources.len()));
        protocol::concat(&self.ctx, path, sources, &mut opts).await
    }

    /// Concatenate with the source list in the request body, for lists too
    /// long for a URL. Optionally deletes the (now empty) source directory.
    pub async fn ms_concatenate_files(
        &self,
        path: &str,
        sources: &[String],
        delete_source_directory: bool,
    ) -> Result<()> {
        if sources.is_empty() {
            return Err(StoreError::InvalidInput(
                "source file list cannot be empty".to_string(),
            ));
        }
        let mut opts = self.default_opts().with_timeout(self.concat_timeout(sources.len()));
        protocol::ms_concat(&self.ctx, path, sources, delete_source_directory, &mut opts).await
    }

    fn concat_timeout(&self, source_count: usize) -> std::time::Duration {
        self.ctx.default_timeout
            + std::time::Duration::from_millis(CONCAT_TIMEOUT_PER_SOURCE_MS * source_count as u64)
    }

    /// Sets a file's expiry.
    pub async fn set_expiry_time(
        &self,
        path: &str,
        option: ExpiryOption,
        expiry_time_ms: i64,
    ) -> Result<()> {
        let mut opts = self.default_opts();
        protocol::set_expiry(&self.ctx, path, option, expiry_time_ms, &mut opts).await
    }

    /// Server-computed checksum of a file.
    pub async fn get_file_checksum(&self, path: &str) -> Result<ChecksumInfo> {
        let mut opts = self.default_opts();
        protocol::get_file_checksum(&self.ctx, path, &mut opts).await
    }

    /* ------------------------------------------------------------------ */
    /* Directory operations                                                */
    /* ------------------------------------------------------------------ */

    /// Enumerates a directory completely.
    pub async fn enumerate_directory(&self, path: &str) -> Result<Vec<DirectoryEntry>> {
        self.enumerate_directory_bounded(path, None, None, None, None)
            .await
    }

    /// Enumeration with bounds: an entry cap, start/end names, and the
    /// principal representation. Pages of 4000 are fetched with the last
    /// seen name (or the server's continuation token) as the cursor;
    /// enumeration stops when a page comes back empty or short.
    pub async fn enumerate_directory_bounded(
        &self,
        path: &str,
        max_entries: Option<u32>,
        start_after: Option<&str>,
        end_before: Option<&str>,
        oid_or_upn: Option<UserGroupRepresentation>,
    ) -> Result<Vec<DirectoryEntry>> {
        let mut collected = Vec::new();
        let mut remaining = max_entries.unwrap_or(u32::MAX);
        let mut cursor: Option<String> = start_after.map(str::to_string);

        while remaining > 0 {
            let request_size = remaining.min(LIST_PAGE_SIZE);
            let mut opts = self
                .default_opts()
                .with_timeout(self.ctx.default_timeout * 2);
            let page = protocol::list_status(
                &self.ctx,
                path,
                cursor.as_deref(),
                end_before,
                Some(request_size),
                oid_or_upn,
                &mut opts,
            )
            .await?;
            if page.entries.is_empty() {
                break;
            }
            let page_len = page.entries.len() as u32;
            let has_token = !page.continuation_token.is_empty();
            cursor = if has_token {
                Some(page.continuation_token.clone())
            } else {
                page.entries.last().map(|entry| entry.name.clone())
            };
            collected.extend(page.entries);
            remaining = remaining.saturating_sub(page_len);
            // a short page means the end, unless the server handed us a
            // continuation token for more
            if page_len < request_size && !has_token {
                break;
            }
        }
        Ok(collected)
    }

    /// Creates a directory and any missing parents.
    pub async fn create_directory(
        &self,
        path: &str,
        octal_permission: Option<&str>,
    ) -> Result<bool> {
        if let Some(permission) = octal_permission {
            if !is_valid_octal(permission) {
                return Err(StoreError::InvalidInput(format!(
                    "invalid permission specified: {permission}"
                )));
            }
        }
        let mut opts = self.default_opts();
        protocol::mkdirs(&self.ctx, path, octal_permission, &mut opts).await
    }

    /// Deletes a directory tree recursively. Deleting `/` is rejected.
    pub async fn delete_recursive(&self, path: &str) -> Result<bool> {
        if path == "/" {
            return Err(StoreError::InvalidInput(
                "cannot delete root directory tree".to_string(),
            ));
        }
        let mut opts = self.default_opts();
        protocol::delete(&self.ctx, path, true, &mut opts).await
    }

    /* ------------------------------------------------------------------ */
    /* Operations on both files and directories                            */
    /* ------------------------------------------------------------------ */

    /// Deletes a file or empty directory. Deleting `/` is rejected.
    pub async fn delete(&self, path: &str) -> Result<bool> {
        if path == "/" {
            return Err(StoreError::InvalidInput(
                "cannot delete root directory".to_string(),
            ));
        }
        let mut opts = self.default_opts();
        protocol::delete(&self.ctx, path, false, &mut opts).await
    }

    /// Renames a file or directory. Renaming a path onto itself returns
    /// true for files and false for directories (no server call is made).
    pub async fn rename(&self, path: &str, destination: &str, overwrite: bool) -> Result<bool> {
        if path.is_empty() {
            return Err(StoreError::InvalidInput("path cannot be empty".to_string()));
        }
        if path == "/" {
            return Err(StoreError::InvalidInput(
                "cannot rename root directory".to_string(),
            ));
        }
        if path == destination {
            let entry = self.get_directory_entry(path).await?;
            return Ok(entry.entry_type == DirectoryEntryType::File);
        }
        let mut opts = self.default_opts();
        protocol::rename(&self.ctx, path, destination, overwrite, &mut opts).await
    }

    /// Metadata for a file or directory.
    pub async fn get_directory_entry(&self, path: &str) -> Result<DirectoryEntry> {
        let mut opts = self.default_opts();
        protocol::get_file_status(&self.ctx, path, None, &mut opts).await
    }

    /// Metadata with an explicit principal representation.
    pub async fn get_directory_entry_as(
        &self,
        path: &str,
        oid_or_upn: UserGroupRepresentation,
    ) -> Result<DirectoryEntry> {
        let mut opts = self.default_opts();
        protocol::get_file_status(&self.ctx, path, Some(oid_or_upn), &mut opts).await
    }

    /// Aggregates length, file count and directory count over a tree with a
    /// parallel traversal.
    pub async fn get_content_summary(&self, path: &str) -> Result<ContentSummary> {
        ContentSummaryProcessor::run(Arc::clone(&self.ctx), path).await
    }

    /// Whether a file or directory exists.
    pub async fn check_exists(&self, path: &str) -> Result<bool> {
        match self.get_directory_entry(path).await {
            Ok(_) => Ok(true),
            Err(StoreError::Remote(err)) if err.http_status == 404 => Ok(false),
            Err(StoreError::RemoteIo(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Sets the owning user and/or group. At least one must be given.
    pub async fn set_owner(
        &self,
        path: &str,
        owner: Option<&str>,
        group: Option<&str>,
    ) -> Result<()> {
        if owner.is_none() && group.is_none() {
            return Err(StoreError::InvalidInput(
                "one of owner or group must be specified".to_string(),
            ));
        }
        let mut opts = self.default_opts();
        protocol::set_owner(&self.ctx, path, owner, group, &mut opts).await
    }

    /// Sets access and/or modified times; `None` leaves a time unchanged.
    pub async fn set_times(
        &self,
        path: &str,
        access_time: Option<DateTime<Utc>>,
        modified_time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let atime = access_time.map(|t| t.timestamp_millis()).unwrap_or(-1);
        let mtime = modified_time.map(|t| t.timestamp_millis()).unwrap_or(-1);
        let mut opts = self.default_opts();
        protocol::set_times(&self.ctx, path, atime, mtime, &mut opts).await
    }

    /// Sets the unix permission bits.
    pub async fn set_permission(&self, path: &str, octal_permission: &str) -> Result<()> {
        if !is_valid_octal(octal_permission) {
            return Err(StoreError::InvalidInput(format!(
                "invalid permission specified: {octal_permission}"
            )));
        }
        let mut opts = self.default_opts();
        protocol::set_permission(&self.ctx, path, octal_permission, &mut opts).await
    }

    /// Whether the caller holds all the permissions in `rwx` (for example
    /// `"r-x"`). The server answering 401 or 403 means no.
    pub async fn check_access(&self, path: &str, rwx: &str) -> Result<bool> {
        let mut opts = self.default_opts();
        match protocol::check_access(&self.ctx, path, rwx, &mut opts).await {
            Ok(()) => Ok(true),
            Err(StoreError::Remote(err)) if err.http_status == 401 || err.http_status == 403 => {
                Ok(false)
            }
            Err(StoreError::RemoteIo(err))
                if err.kind() == std::io::ErrorKind::PermissionDenied =>
            {
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /* ------------------------------------------------------------------ */
    /* ACL operations                                                      */
    /* ------------------------------------------------------------------ */

    /// Merges `entries` into the existing ACL; matching entries have their
    /// permissions replaced.
    pub async fn modify_acl_entries(&self, path: &str, entries: &[AclEntry]) -> Result<()> {
        let mut opts = self.default_opts();
        protocol::modify_acl_entries(&self.ctx, path, entries, &mut opts).await
    }

    /// Replaces the whole ACL.
    pub async fn set_acl(&self, path: &str, entries: &[AclEntry]) -> Result<()> {
        let mut opts = self.default_opts();
        protocol::set_acl(&self.ctx, path, entries, &mut opts).await
    }

    /// Removes the given entries (matched by scope, type and name).
    pub async fn remove_acl_entries(&self, path: &str, entries: &[AclEntry]) -> Result<()> {
        let mut opts = self.default_opts();
        protocol::remove_acl_entries(&self.ctx, path, entries, &mut opts).await
    }

    /// Removes all default-scope entries from a directory.
    pub async fn remove_default_acls(&self, path: &str) -> Result<()> {
        let mut opts = self.default_opts();
        protocol::remove_default_acl(&self.ctx, path, &mut opts).await
    }

    /// Removes every ACL entry.
    pub async fn remove_all_acls(&self, path: &str) -> Result<()> {
        let mut opts = self.default_opts();
        protocol::remove_acl(&self.ctx, path, &mut opts).await
    }

    /// The ACL and permission state of a file or directory.
    pub async fn get_acl_status(&self, path: &str) -> Result<AclStatus> {
        let mut opts = self.default_opts();
        protocol::get_acl_status(&self.ctx, path, None, &mut opts).await
    }

    /* ------------------------------------------------------------------ */
    /* Client behavior                                                     */
    /* ------------------------------------------------------------------ */

    /// Replaces the bearer token on a long-lived client.
    pub async fn update_token(&self, access_token: &str) {
        self.ctx
            .token_provider
            .install_token(OAuthToken::new(
                access_token,
                Utc::now() + ChronoDuration::days(365),
            ))
            .await;
    }

    /// The TLS channel mode requested for this client's transport.
    pub fn ssl_channel_mode(&self) -> SslChannelMode {
        self.ssl_channel_mode
    }

    /// Unique number of this client instance within the process.
    pub fn client_instance_id(&self) -> u64 {
        self.ctx.client_instance_id
    }

    pub fn user_agent(&self) -> &str {
        &self.ctx.user_agent
    }
}
