//! Data model of the store's REST surface.
//!
//! The `*Json` types mirror the wire shapes exactly (Unix-millisecond
//! timestamps, PascalCase envelopes) and are converted into the public model
//! types at the protocol layer. Directory entries are immutable once parsed.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Whether a directory entry is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryEntryType {
    File,
    Directory,
}

/// Filesystem metadata of one file or directory.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    /// Name without the path.
    pub name: String,
    /// Full path of the entry.
    pub full_path: String,
    /// Length in bytes; 0 for directories.
    pub length: u64,
    pub entry_type: DirectoryEntryType,
    pub owner: String,
    pub group: String,
    pub last_access_time: DateTime<Utc>,
    pub last_modified_time: DateTime<Utc>,
    /// Unix permission string, three octal digits.
    pub permission: String,
    /// Informational; the store reports 256 MiB for files, 0 for directories.
    pub block_size: u64,
    /// Informational; the store replicates server-side and reports 1 for
    /// files, 0 for directories.
    pub replication_factor: u32,
    /// Whether the entry has ACLs set beyond the permission bits.
    pub acl_bit: bool,
    /// Expiry instant; never set for directories.
    pub expiry_time: Option<DateTime<Utc>>,
}

/// Return values of a content-summary aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentSummary {
    pub length: u64,
    pub file_count: u64,
    pub directory_count: u64,
    pub space_consumed: u64,
}

/// Server-computed checksum of a file.
#[derive(Debug, Clone)]
pub struct ChecksumInfo {
    pub algorithm: String,
    pub bytes: String,
    pub length: u64,
}

/// What to do when creating a file that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfExists {
    Overwrite,
    Fail,
}

/// Marker on an append declaring whether metadata must be updated and
/// whether the lease should be released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncFlag {
    /// Data appended; metadata not synced; lease retained.
    Data,
    /// Data appended; metadata synced; lease retained.
    Metadata,
    /// Data appended; metadata synced; lease released.
    Close,
}

impl SyncFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncFlag::Data => "DATA",
            SyncFlag::Metadata => "METADATA",
            SyncFlag::Close => "CLOSE",
        }
    }
}

/// How to interpret the expiry time in a set-expiry call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryOption {
    /// No expiry; the time value is ignored.
    NeverExpire,
    /// Milliseconds from now.
    RelativeToNow,
    /// Milliseconds from the file's creation time.
    RelativeToCreationDate,
    /// Absolute Unix timestamp in milliseconds.
    Absolute,
}

impl ExpiryOption {
    pub fn as_str(self) -> &'static str {
        match self {
            ExpiryOption::NeverExpire => "NeverExpire",
            ExpiryOption::RelativeToNow => "RelativeToNow",
            ExpiryOption::RelativeToCreationDate => "RelativeToCreationDate",
            ExpiryOption::Absolute => "Absolute",
        }
    }
}

/// How user and group principals are represented in responses: as immutable
/// object ids, or as human-friendly principal names (an extra directory
/// lookup server-side).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserGroupRepresentation {
    Oid,
    Upn,
}

/// One page of a directory enumeration.
#[derive(Debug)]
pub struct DirectoryEntryPage {
    pub entries: Vec<DirectoryEntry>,
    /// Cursor for the next page; empty when the server has no more.
    pub continuation_token: String,
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FileStatusJson {
    #[serde(default)]
    pub length: u64,
    #[serde(default)]
    pub path_suffix: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    #[serde(default)]
    pub block_size: u64,
    #[serde(default)]
    pub access_time: i64,
    #[serde(default)]
    pub modification_time: i64,
    #[serde(default)]
    pub replication: u32,
    #[serde(default)]
    pub permission: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub group: String,
    /// Missing on the wire means false.
    #[serde(default)]
    pub acl_bit: bool,
    #[serde(default)]
    pub expire_time: Option<i64>,
    #[serde(default)]
    pub ms_expiration_time: Option<i64>,
}

impl FileStatusJson {
    /// Builds the immutable entry. `parent_path` is the path the server was
    /// queried with; a status with an empty `pathSuffix` describes that path
    /// itself.
    pub(crate) fn into_entry(self, parent_path: &str) -> DirectoryEntry {
        let entry_type = if self.entry_type == "DIRECTORY" {
            DirectoryEntryType::Directory
        } else {
            DirectoryEntryType::File
        };
        let (name, full_path) = if self.path_suffix.is_empty() {
            let name = parent_path.rsplit('/').next().unwrap_or("").to_string();
            (name, parent_path.to_string())
        } else {
            let full = if parent_path.ends_with('/') {
                format!("{}{}", parent_path, self.path_suffix)
            } else {
                format!("{}/{}", parent_path, self.path_suffix)
            };
            (self.path_suffix.clone(), full)
        };
        let expiry_time = match entry_type {
            DirectoryEntryType::Directory => None,
            DirectoryEntryType::File => self
                .expire_time
                .or(self.ms_expiration_time)
                .map(millis_to_datetime),
        };
        DirectoryEntry {
            name,
            full_path,
            length: self.length,
            entry_type,
            owner: self.owner,
            group: self.group,
            last_access_time: millis_to_datetime(self.access_time),
            last_modified_time: millis_to_datetime(self.modification_time),
            permission: self.permission,
            block_size: self.block_size,
            replication_factor: self.replication,
            acl_bit: self.acl_bit,
            expiry_time,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileStatusEnvelope {
    #[serde(rename = "FileStatus")]
    pub file_status: FileStatusJson,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileStatusesJson {
    #[serde(rename = "FileStatus", default)]
    pub file_status: Vec<FileStatusJson>,
    #[serde(rename = "continuationToken", default)]
    pub continuation_token: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileStatusesEnvelope {
    #[serde(rename = "FileStatuses")]
    pub file_statuses: FileStatusesJson,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BooleanEnvelope {
    pub boolean: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ContentSummaryJson {
    #[serde(default)]
    pub length: u64,
    #[serde(default)]
    pub file_count: u64,
    #[serde(default)]
    pub directory_count: u64,
    #[serde(default)]
    pub space_consumed: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContentSummaryEnvelope {
    #[serde(rename = "ContentSummary")]
    pub content_summary: ContentSummaryJson,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileChecksumJson {
    #[serde(default)]
    pub algorithm: String,
    #[serde(default)]
    pub bytes: String,
    #[serde(default)]
    pub length: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileChecksumEnvelope {
    #[serde(rename = "FileChecksum")]
    pub file_checksum: FileChecksumJson,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AclStatusJson {
    #[serde(default)]
    pub entries: Vec<String>,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub permission: String,
    #[serde(default)]
    pub sticky_bit: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AclStatusEnvelope {
    #[serde(rename = "AclStatus")]
    pub acl_status: AclStatusJson,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RemoteExceptionJson {
    #[serde(default)]
    pub exception: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub java_class_name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RemoteExceptionEnvelope {
    #[serde(rename = "RemoteException")]
    pub remote_exception: RemoteExceptionJson,
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE_STATUS: &str = r#"{
        "length": 1024,
        "pathSuffix": "Test01",
        "type": "FILE",
        "blockSize": 268435456,
        "accessTime": 1506543800000,
        "modificationTime": 1506543900000,
        "replication": 1,
        "permission": "644",
        "owner": "owner-oid",
        "group": "group-oid",
        "aclBit": true,
        "expireTime": 1706543900000
    }"#;

    #[test]
    fn test_file_status_parses_and_joins_path() {
        let parsed: FileStatusJson = serde_json::from_str(FILE_STATUS).unwrap();
        let entry = parsed.into_entry("/TestShare");
        assert_eq!(entry.name, "Test01");
        assert_eq!(entry.full_path, "/TestShare/Test01");
        assert_eq!(entry.length, 1024);
        assert_eq!(entry.entry_type, DirectoryEntryType::File);
        assert!(entry.acl_bit);
        assert!(entry.expiry_time.is_some());
        assert_eq!(entry.last_modified_time.timestamp_millis(), 1506543900000);
    }

    #[test]
    fn test_empty_path_suffix_is_the_queried_path() {
        let parsed: FileStatusJson =
            serde_json::from_str(r#"{"pathSuffix":"","type":"FILE","length":5}"#).unwrap();
        let entry = parsed.into_entry("/dir/file.txt");
        assert_eq!(entry.full_path, "/dir/file.txt");
        assert_eq!(entry.name, "file.txt");
    }

    #[test]
    fn test_missing_acl_bit_is_false() {
        let parsed: FileStatusJson =
            serde_json::from_str(r#"{"pathSuffix":"x","type":"FILE"}"#).unwrap();
        assert!(!parsed.acl_bit);
    }

    #[test]
    fn test_directory_never_has_expiry() {
        let parsed: FileStatusJson = serde_json::from_str(
            r#"{"pathSuffix":"d","type":"DIRECTORY","expireTime":1706543900000}"#,
        )
        .unwrap();
        let entry = parsed.into_entry("/");
        assert_eq!(entry.entry_type, DirectoryEntryType::Directory);
        assert!(entry.expiry_time.is_none());
    }

    #[test]
    fn test_ms_expiration_time_fallback() {
        let parsed: FileStatusJson = serde_json::from_str(
            r#"{"pathSuffix":"f","type":"FILE","msExpirationTime":1706543900000}"#,
        )
        .unwrap();
        let entry = parsed.into_entry("/");
        assert_eq!(entry.expiry_time.unwrap().timestamp_millis(), 1706543900000);
    }

    #[test]
    fn test_unknown_fields_tolerated() {
        // newer servers attach per-entry attribute arrays
        let parsed: FileStatusJson = serde_json::from_str(
            r#"{"pathSuffix":"f","type":"FILE","attributes":["Share","PartOfShare"]}"#,
        )
        .unwrap();
        assert_eq!(parsed.path_suffix, "f");
    }

    #[test]
    fn test_file_statuses_envelope_with_continuation() {
        let body = r#"{"FileStatuses":{"FileStatus":[
            {"pathSuffix":"a","type":"FILE","length":1},
            {"pathSuffix":"b","type":"DIRECTORY"}
        ],"continuationToken":"b"}}"#;
        let parsed: FileStatusesEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.file_statuses.file_status.len(), 2);
        assert_eq!(parsed.file_statuses.continuation_token, "b");
    }

    #[test]
    fn test_remote_exception_envelope() {
        let body = r#"{"RemoteException":{"exception":"BadOffsetException",
            "message":"bad offset","javaClassName":"org.apache.hadoop.fs.adl.BadOffsetException"}}"#;
        let parsed: RemoteExceptionEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.remote_exception.exception, "BadOffsetException");
        assert_eq!(parsed.remote_exception.message, "bad offset");
    }

    #[test]
    fn test_boolean_envelope() {
        let parsed: BooleanEnvelope = serde_json::from_str(r#"{"boolean":true}"#).unwrap();
        assert!(parsed.boolean);
    }

    #[test]
    fn test_content_summary_envelope() {
        let body = r#"{"ContentSummary":{"length":100,"fileCount":2,"directoryCount":1,"spaceConsumed":100}}"#;
        let parsed: ContentSummaryEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.content_summary.length, 100);
        assert_eq!(parsed.content_summary.file_count, 2);
    }
}
