//! The REST operations and their wire properties.

/// Static properties of one REST operation.
#[derive(Debug, Clone, Copy)]
pub struct OperationSpec {
    /// Wire name, sent as the `op=` query parameter.
    pub name: &'static str,
    /// HTTP method.
    pub method: &'static str,
    /// Whether the request ships a body.
    pub requires_body: bool,
    /// Whether a successful response carries a body to parse.
    pub returns_body: bool,
    /// Whether the operation lives under the vendor-extension namespace.
    pub is_ext: bool,
}

/// All operations of the store's REST surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Open,
    GetFileStatus,
    MsGetFileStatus,
    ListStatus,
    MsListStatus,
    GetContentSummary,
    GetFileChecksum,
    GetAclStatus,
    MsGetAclStatus,
    CheckAccess,
    Create,
    Mkdirs,
    Rename,
    SetOwner,
    SetPermission,
    SetTimes,
    ModifyAclEntries,
    RemoveAclEntries,
    RemoveDefaultAcl,
    RemoveAcl,
    SetAcl,
    CreateNonRecursive,
    Append,
    Concat,
    MsConcat,
    Delete,
    ConcurrentAppend,
    SetExpiry,
    GetFileInfo,
}

impl Operation {
    pub fn spec(self) -> OperationSpec {
        use Operation::*;
        let (name, method, requires_body, returns_body, is_ext) = match self {
            Open => ("OPEN", "GET", false, true, false),
            GetFileStatus => ("GETFILESTATUS", "GET", false, true, false),
            MsGetFileStatus => ("MSGETFILESTATUS", "GET", false, true, false),
            ListStatus => ("LISTSTATUS", "GET", false, true, false),
            MsListStatus => ("MSLISTSTATUS", "GET", false, true, false),
            GetContentSummary => ("GETCONTENTSUMMARY", "GET", false, true, false),
            GetFileChecksum => ("GETFILECHECKSUM", "GET", false, true, false),
            GetAclStatus => ("GETACLSTATUS", "GET", false, true, false),
            MsGetAclStatus => ("MSGETACLSTATUS", "GET", false, true, false),
            CheckAccess => ("CHECKACCESS", "GET", false, false, false),
            Create => ("CREATE", "PUT", true, false, false),
            Mkdirs => ("MKDIRS", "PUT", false, true, false),
            Rename => ("RENAME", "PUT", false, true, false),
            SetOwner => ("SETOWNER", "PUT", false, false, false),
            SetPermission => ("SETPERMISSION", "PUT", false, false, false),
            SetTimes => ("SETTIMES", "PUT", false, false, false),
            ModifyAclEntries => ("MODIFYACLENTRIES", "PUT", false, false, false),
            RemoveAclEntries => ("REMOVEACLENTRIES", "PUT", false, false, false),
            RemoveDefaultAcl => ("REMOVEDEFAULTACL", "PUT", false, false, false),
            RemoveAcl => ("REMOVEACL", "PUT", false, false, false),
            SetAcl => ("SETACL", "PUT", false, false, false),
            CreateNonRecursive => ("CREATENONRECURSIVE", "PUT", false, false, false),
            Append => ("APPEND", "POST", true, false, false),
            Concat => ("CONCAT", "POST", false, false, false),
            MsConcat => ("MSCONCAT", "POST", true, false, false),
            Delete => ("DELETE", "DELETE", false, true, false),
            ConcurrentAppend => ("CONCURRENTAPPEND", "POST", true, false, true),
            SetExpiry => ("SETEXPIRY", "PUT", false, false, true),
            GetFileInfo => ("GETFILEINFO", "GET", false, false, true),
        };
        OperationSpec {
            name,
            method,
            requires_body,
            returns_body,
            is_ext,
        }
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    /// URL namespace prefix the operation is served under.
    pub fn namespace(self) -> &'static str {
        if self.spec().is_ext {
            "/WebHdfsExt"
        } else {
            "/webhdfs/v1"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_is_post_with_body() {
        let spec = Operation::Append.spec();
        assert_eq!(spec.name, "APPEND");
        assert_eq!(spec.method, "POST");
        assert!(spec.requires_body);
        assert!(!spec.returns_body);
    }

    #[test]
    fn test_open_returns_body() {
        let spec = Operation::Open.spec();
        assert_eq!(spec.method, "GET");
        assert!(spec.returns_body);
    }

    #[test]
    fn test_delete_returns_json() {
        let spec = Operation::Delete.spec();
        assert_eq!(spec.method, "DELETE");
        assert!(spec.returns_body);
    }

    #[test]
    fn test_ext_operations_use_ext_namespace() {
        assert_eq!(Operation::ConcurrentAppend.namespace(), "/WebHdfsExt");
        assert_eq!(Operation::SetExpiry.namespace(), "/WebHdfsExt");
        assert_eq!(Operation::GetFileInfo.namespace(), "/WebHdfsExt");
        assert_eq!(Operation::Append.namespace(), "/webhdfs/v1");
    }

    #[test]
    fn test_create_requires_body_but_mkdirs_does_not() {
        assert!(Operation::Create.spec().requires_body);
        assert!(!Operation::Mkdirs.spec().requires_body);
        assert!(Operation::Mkdirs.spec().returns_body);
    }
}
