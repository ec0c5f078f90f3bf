//! Typed wrappers over the request engine, one per REST operation.
//!
//! Each function assembles the operation's query parameters, invokes the
//! engine, and parses the typed result. Callers pick the retry policy and
//! timeout through [`RequestOptions`].

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::acl::{AclEntry, AclStatus};
use crate::error::{RemoteCallError, Result, StoreError};
use crate::models::{
    AclStatusEnvelope, BooleanEnvelope, ChecksumInfo, ContentSummary, ContentSummaryEnvelope,
    DirectoryEntry, DirectoryEntryPage, ExpiryOption, FileChecksumEnvelope, FileStatusEnvelope,
    FileStatusesEnvelope, SyncFlag, UserGroupRepresentation,
};
use crate::operation::Operation;
use crate::query::QueryParams;
use crate::request::{execute, RequestContext, RequestOptions, Response};

/// A 2xx response that violates the wire contract (missing or malformed
/// body) is surfaced as a transport-kind failure.
fn protocol_violation(op: Operation, path: &str, detail: String) -> StoreError {
    StoreError::Remote(Box::new(RemoteCallError {
        operation: op.name(),
        path: path.to_string(),
        http_status: 0,
        http_message: None,
        server_request_id: None,
        remote_exception: None,
        transport_error: Some(detail),
        num_retries: 0,
        last_call_latency_ms: 0,
        response_content_length: 0,
        exception_history: None,
    }))
}

fn parse_body<T: DeserializeOwned>(op: Operation, path: &str, resp: &Response) -> Result<T> {
    let body = resp
        .body
        .as_ref()
        .ok_or_else(|| protocol_violation(op, path, "expected a response body".to_string()))?;
    serde_json::from_slice(body)
        .map_err(|e| protocol_violation(op, path, format!("malformed response body: {e}")))
}

fn add_representation(qp: &mut QueryParams, oid_or_upn: Option<UserGroupRepresentation>) {
    if let Some(representation) = oid_or_upn {
        qp.add(
            "tooId",
            match representation {
                UserGroupRepresentation::Oid => "true",
                UserGroupRepresentation::Upn => "false",
            },
        );
    }
}

/// Opens a file for reading. The returned response carries the unconsumed
/// body stream. A speculative open is marked for the server and should be
/// paired with the no-retry policy.
pub async fn open(
    ctx: &RequestContext,
    path: &str,
    offset: u64,
    length: u64,
    session_id: Option<&str>,
    speculative: bool,
    opts: &mut RequestOptions,
) -> Result<Response> {
    let mut qp = QueryParams::new(Operation::Open);
    qp.add("read", "true");
    qp.add("offset", offset.to_string());
    if length > 0 {
        qp.add("length", length.to_string());
    }
    qp.add_opt("filesessionid", session_id);
    if speculative {
        qp.add("speculativeread", "true");
    }
    execute(ctx, Operation::Open, path, &qp, None, opts).await
}

/// Creates a file, optionally with initial contents.
#[allow(clippy::too_many_arguments)]
pub async fn create(
    ctx: &RequestContext,
    path: &str,
    overwrite: bool,
    octal_permission: Option<&str>,
    data: Bytes,
    lease_id: &str,
    session_id: &str,
    create_parent: bool,
    sync_flag: SyncFlag,
    opts: &mut RequestOptions,
) -> Result<Response> {
    let mut qp = QueryParams::new(Operation::Create);
    qp.add("write", "true");
    qp.add("overwrite", if overwrite { "true" } else { "false" });
    qp.add_opt("permission", octal_permission);
    qp.add("createparent", if create_parent { "true" } else { "false" });
    qp.add("leaseid", lease_id);
    qp.add("filesessionid", session_id);
    qp.add("syncFlag", sync_flag.as_str());
    execute(ctx, Operation::Create, path, &qp, Some(data), opts).await
}

/// Appends `data` at the explicit server-side `offset`. Pass a negative
/// offset to let the server use its tracked length (used by the probe append
/// issued when an append stream attaches to an existing file). A zero-length
/// body with [`SyncFlag::Metadata`] probes the current length.
#[allow(clippy::too_many_arguments)]
pub async fn append(
    ctx: &RequestContext,
    path: &str,
    offset: i64,
    data: Bytes,
    lease_id: &str,
    session_id: &str,
    sync_flag: SyncFlag,
    opts: &mut RequestOptions,
) -> Result<Response> {
    let mut qp = QueryParams::new(Operation::Append);
    qp.add("append", "true");
    if offset >= 0 {
        qp.add("offset", offset.to_string());
    }
    qp.add("leaseid", lease_id);
    qp.add("filesessionid", session_id);
    qp.add("syncFlag", sync_flag.as_str());
    execute(ctx, Operation::Append, path, &qp, Some(data), opts).await
}

/// Concurrent append: server picks the offset; multiple writers may append
/// to the same file. `auto_create` creates the file on first append.
pub async fn concurrent_append(
    ctx: &RequestContext,
    path: &str,
    data: Bytes,
    auto_create: bool,
    opts: &mut RequestOptions,
) -> Result<Response> {
    let mut qp = QueryParams::new(Operation::ConcurrentAppend);
    if auto_create {
        qp.add("appendMode", "autocreate");
    }
    execute(ctx, Operation::ConcurrentAppend, path, &qp, Some(data), opts).await
}

pub async fn mkdirs(
    ctx: &RequestContext,
    path: &str,
    octal_permission: Option<&str>,
    opts: &mut RequestOptions,
) -> Result<bool> {
    let mut qp = QueryParams::new(Operation::Mkdirs);
    qp.add_opt("permission", octal_permission);
    let resp = execute(ctx, Operation::Mkdirs, path, &qp, None, opts).await?;
    let parsed: BooleanEnvelope = parse_body(Operation::Mkdirs, path, &resp)?;
    Ok(parsed.boolean)
}

pub async fn rename(
    ctx: &RequestContext,
    path: &str,
    destination: &str,
    overwrite: bool,
    opts: &mut RequestOptions,
) -> Result<bool> {
    let mut qp = QueryParams::new(Operation::Rename);
    qp.add("destination", destination);
    if overwrite {
        qp.add("renameoptions", "OVERWRITE");
    }
    let resp = execute(ctx, Operation::Rename, path, &qp, None, opts).await?;
    let parsed: BooleanEnvelope = parse_body(Operation::Rename, path, &resp)?;
    Ok(parsed.boolean)
}

pub async fn delete(
    ctx: &RequestContext,
    path: &str,
    recursive: bool,
    opts: &mut RequestOptions,
) -> Result<bool> {
    let mut qp = QueryParams::new(Operation::Delete);
    qp.add("recursive", if recursive { "true" } else { "false" });
    let resp = execute(ctx, Operation::Delete, path, &qp, None, opts).await?;
    let parsed: BooleanEnvelope = parse_body(Operation::Delete, path, &resp)?;
    Ok(parsed.boolean)
}

pub async fn get_file_status(
    ctx: &RequestContext,
    path: &str,
    oid_or_upn: Option<UserGroupRepresentation>,
    opts: &mut RequestOptions,
) -> Result<DirectoryEntry> {
    let mut qp = QueryParams::new(Operation::GetFileStatus);
    add_representation(&mut qp, oid_or_upn);
    let resp = execute(ctx, Operation::GetFileStatus, path, &qp, None, opts).await?;
    let parsed: FileStatusEnvelope = parse_body(Operation::GetFileStatus, path, &resp)?;
    Ok(parsed.file_status.into_entry(path))
}

/// One page of a directory listing. The continuation token in the result is
/// empty when the server has nothing further.
#[allow(clippy::too_many_arguments)]
pub async fn list_status(
    ctx: &RequestContext,
    path: &str,
    start_after: Option<&str>,
    end_before: Option<&str>,
    max_entries: Option<u32>,
    oid_or_upn: Option<UserGroupRepresentation>,
    opts: &mut RequestOptions,
) -> Result<DirectoryEntryPage> {
    let mut qp = QueryParams::new(Operation::ListStatus);
    qp.add_opt("listAfter", start_after);
    qp.add_opt("listBefore", end_before);
    qp.add_opt("listSize", max_entries.map(|n| n.to_string()));
    add_representation(&mut qp, oid_or_upn);
    let resp = execute(ctx, Operation::ListStatus, path, &qp, None, opts).await?;
    let parsed: FileStatusesEnvelope = parse_body(Operation::ListStatus, path, &resp)?;
    Ok(DirectoryEntryPage {
        entries: parsed
            .file_statuses
            .file_status
            .into_iter()
            .map(|status| status.into_entry(path))
            .collect(),
        continuation_token: parsed.file_statuses.continuation_token,
    })
}

pub async fn get_content_summary(
    ctx: &RequestContext,
    path: &str,
    opts: &mut RequestOptions,
) -> Result<ContentSummary> {
    let qp = QueryParams::new(Operation::GetContentSummary);
    let resp = execute(ctx, Operation::GetContentSummary, path, &qp, None, opts).await?;
    let parsed: ContentSummaryEnvelope = parse_body(Operation::GetContentSummary, path, &resp)?;
    Ok(ContentSummary {
        length: parsed.content_summary.length,
        file_count: parsed.content_summary.file_count,
        directory_count: parsed.content_summary.directory_count,
        space_consumed: parsed.content_summary.space_consumed,
    })
}

pub async fn get_file_checksum(
    ctx: &RequestContext,
    path: &str,
    opts: &mut RequestOptions,
) -> Result<ChecksumInfo> {
    let qp = QueryParams::new(Operation::GetFileChecksum);
    let resp = execute(ctx, Operation::GetFileChecksum, path, &qp, None, opts).await?;
    let parsed: FileChecksumEnvelope = parse_body(Operation::GetFileChecksum, path, &resp)?;
    Ok(ChecksumInfo {
        algorithm: parsed.file_checksum.algorithm,
        bytes: parsed.file_checksum.bytes,
        length: parsed.file_checksum.length,
    })
}

pub async fn get_acl_status(
    ctx: &RequestContext,
    path: &str,
    oid_or_upn: Option<UserGroupRepresentation>,
    opts: &mut RequestOptions,
) -> Result<AclStatus> {
    let mut qp = QueryParams::new(Operation::GetAclStatus);
    add_representation(&mut qp, oid_or_upn);
    let resp = execute(ctx, Operation::GetAclStatus, path, &qp, None, opts).await?;
    let parsed: AclStatusEnvelope = parse_body(Operation::GetAclStatus, path, &resp)?;
    let entries = parsed
        .acl_status
        .entries
        .iter()
        .map(|s| AclEntry::parse(s))
        .collect::<Result<Vec<_>>>()?;
    Ok(AclStatus {
        entries,
        owner: parsed.acl_status.owner,
        group: parsed.acl_status.group,
        octal_permission: parsed.acl_status.permission,
        sticky_bit: parsed.acl_status.sticky_bit,
    })
}

pub async fn set_acl(
    ctx: &RequestContext,
    path: &str,
    entries: &[AclEntry],
    opts: &mut RequestOptions,
) -> Result<()> {
    let mut qp = QueryParams::new(Operation::SetAcl);
    qp.add("aclspec", AclEntry::spec_to_string(entries));
    execute(ctx, Operation::SetAcl, path, &qp, None, opts).await?;
    Ok(())
}

pub async fn modify_acl_entries(
    ctx: &RequestContext,
    path: &str,
    entries: &[AclEntry],
    opts: &mut RequestOptions,
) -> Result<()> {
    let mut qp = QueryParams::new(Operation::ModifyAclEntries);
    qp.add("aclspec", AclEntry::spec_to_string(entries));
    execute(ctx, Operation::ModifyAclEntries, path, &qp, None, opts).await?;
    Ok(())
}

pub async fn remove_acl_entries(
    ctx: &RequestContext,
    path: &str,
    entries: &[AclEntry],
    opts: &mut RequestOptions,
) -> Result<()> {
    let mut qp = QueryParams::new(Operation::RemoveAclEntries);
    qp.add("aclspec", AclEntry::spec_to_removal_string(entries));
    execute(ctx, Operation::RemoveAclEntries, path, &qp, None, opts).await?;
    Ok(())
}

pub async fn remove_default_acl(
    ctx: &RequestContext,
    path: &str,
    opts: &mut RequestOptions,
) -> Result<()> {
    let qp = QueryParams::new(Operation::RemoveDefaultAcl);
    execute(ctx, Operation::RemoveDefaultAcl, path, &qp, None, opts).await?;
    Ok(())
}

pub async fn remove_acl(ctx: &RequestContext, path: &str, opts: &mut RequestOptions) -> Result<()> {
    let qp = QueryParams::new(Operation::RemoveAcl);
    execute(ctx, Operation::RemoveAcl, path, &qp, None, opts).await?;
    Ok(())
}

pub async fn set_owner(
    ctx: &RequestContext,
    path: &str,
    owner: Option<&str>,
    group: Option<&str>,
    opts: &mut RequestOptions,
) -> Result<()> {
    let mut qp = QueryParams::new(Operation::SetOwner);
    qp.add_opt("owner", owner);
    qp.add_opt("group", group);
    execute(ctx, Operation::SetOwner, path, &qp, None, opts).await?;
    Ok(())
}

/// Sets modification and access times, in Unix milliseconds. A negative
/// value leaves the corresponding time unchanged.
pub async fn set_times(
    ctx: &RequestContext,
    path: &str,
    access_time_ms: i64,
    modification_time_ms: i64,
    opts: &mut RequestOptions,
) -> Result<()> {
    let mut qp = QueryParams::new(Operation::SetTimes);
    qp.add("accesstime", access_time_ms.to_string());
    qp.add("modificationtime", modification_time_ms.to_string());
    execute(ctx, Operation::SetTimes, path, &qp, None, opts).await?;
    Ok(())
}

pub async fn set_permission(
    ctx: &RequestContext,
    path: &str,
    octal_permission: &str,
    opts: &mut RequestOptions,
) -> Result<()> {
    let mut qp = QueryParams::new(Operation::SetPermission);
    qp.add("permission", octal_permission);
    execute(ctx, Operation::SetPermission, path, &qp, None, opts).await?;
    Ok(())
}

/// Checks the caller's access; `rwx` is a unix permission triple such as
/// `"r-x"`. A 401 or 403 response is the server saying no, not an error.
pub async fn check_access(
    ctx: &RequestContext,
    path: &str,
    rwx: &str,
    opts: &mut RequestOptions,
) -> Result<()> {
    let mut qp = QueryParams::new(Operation::CheckAccess);
    qp.add("fsaction", rwx);
    execute(ctx, Operation::CheckAccess, path, &qp, None, opts).await?;
    Ok(())
}

/// Concatenates `sources` into `path`. Sources are deleted on success.
pub async fn concat(
    ctx: &RequestContext,
    path: &str,
    sources: &[String],
    opts: &mut RequestOptions,
) -> Result<()> {
    let mut qp = QueryParams::new(Operation::Concat);
    qp.add("sources", sources.join(","));
    execute(ctx, Operation::Concat, path, &qp, None, opts).await?;
    Ok(())
}

/// Vendor concatenate: ships the source list as a JSON body, so it scales
/// past URL length limits.
pub async fn ms_concat(
    ctx: &RequestContext,
    path: &str,
    sources: &[String],
    delete_source_directory: bool,
    opts: &mut RequestOptions,
) -> Result<()> {
    let mut qp = QueryParams::new(Operation::MsConcat);
    if delete_source_directory {
        qp.add("deleteSourceDirectory", "true");
    }
    let body = serde_json::json!({ "sources": sources }).to_string();
    execute(ctx, Operation::MsConcat, path, &qp, Some(Bytes::from(body)), opts).await?;
    Ok(())
}

pub async fn set_expiry(
    ctx: &RequestContext,
    path: &str,
    option: ExpiryOption,
    expiry_time_ms: i64,
    opts: &mut RequestOptions,
) -> Result<()> {
    let mut qp = QueryParams::new(Operation::SetExpiry);
    qp.add("expiryOption", option.as_str());
    if option != ExpiryOption::NeverExpire {
        qp.add("expireTime", expiry_time_ms.to_string());
    }
    execute(ctx, Operation::SetExpiry, path, &qp, None, opts).await?;
    Ok(())
}

pub async fn get_file_info(
    ctx: &RequestContext,
    path: &str,
    opts: &mut RequestOptions,
) -> Result<Response> {
    let qp = QueryParams::new(Operation::GetFileInfo);
    execute(ctx, Operation::GetFileInfo, path, &qp, None, opts).await
}
