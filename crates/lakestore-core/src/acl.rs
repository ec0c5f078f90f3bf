//! POSIX-style ACL model.
//!
//! An ACL is a list of entries; each entry names a scope (access or
//! default), a principal type, an optional principal, and the permitted
//! rwx action. Entries round-trip through the canonical string form
//! `[default:]type:name:rwx`; the permission field is omitted when the entry
//! is used as a removal template.

use crate::error::{Result, StoreError};

/// Scope of an ACL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclScope {
    /// Applies to the object itself.
    Access,
    /// Inherited by children created under a directory.
    Default,
}

/// Principal type of an ACL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclType {
    User,
    Group,
    Other,
    Mask,
}

impl AclType {
    fn as_str(self) -> &'static str {
        match self {
            AclType::User => "user",
            AclType::Group => "group",
            AclType::Other => "other",
            AclType::Mask => "mask",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(AclType::User),
            "group" => Ok(AclType::Group),
            "other" => Ok(AclType::Other),
            "mask" => Ok(AclType::Mask),
            other => Err(StoreError::InvalidInput(format!(
                "invalid ACL entry type: {other}"
            ))),
        }
    }
}

/// The eight rwx combinations. The discriminant equals the octal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum AclAction {
    None = 0,
    Execute = 1,
    Write = 2,
    WriteExecute = 3,
    Read = 4,
    ReadExecute = 5,
    ReadWrite = 6,
    All = 7,
}

const RWX_FORMS: [(&str, AclAction); 8] = [
    ("---", AclAction::None),
    ("--x", AclAction::Execute),
    ("-w-", AclAction::Write),
    ("-wx", AclAction::WriteExecute),
    ("r--", AclAction::Read),
    ("r-x", AclAction::ReadExecute),
    ("rw-", AclAction::ReadWrite),
    ("rwx", AclAction::All),
];

impl AclAction {
    /// Parses a unix rwx string. Case- and whitespace-insensitive.
    pub fn from_rwx(rwx: &str) -> Result<Self> {
        let normalized = rwx.trim().to_ascii_lowercase();
        RWX_FORMS
            .iter()
            .find(|(form, _)| *form == normalized)
            .map(|(_, action)| *action)
            .ok_or_else(|| {
                StoreError::InvalidInput(format!("{rwx} is not a valid access specifier"))
            })
    }

    pub fn is_valid_rwx(input: &str) -> bool {
        Self::from_rwx(input).is_ok()
    }

    /// The action whose bitwise rwx value equals the octal digit.
    pub fn from_octal(digit: u8) -> Result<Self> {
        RWX_FORMS
            .get(digit as usize)
            .map(|(_, action)| *action)
            .ok_or_else(|| {
                StoreError::InvalidInput(format!("{digit} is not a valid access specifier"))
            })
    }

    pub fn to_octal(self) -> u8 {
        self as u8
    }

    fn rwx(self) -> &'static str {
        RWX_FORMS[self as usize].0
    }
}

impl std::fmt::Display for AclAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.rwx())
    }
}

/// One ACL entry.
///
/// `action` is `None` only for removal templates parsed or serialized
/// without a permission field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclEntry {
    pub scope: AclScope,
    pub entry_type: AclType,
    /// Principal id; empty for the owner/group/other defaults, and required
    /// to be empty for mask and other entries.
    pub name: String,
    pub action: Option<AclAction>,
}

impl AclEntry {
    pub fn new(
        scope: AclScope,
        entry_type: AclType,
        name: impl Into<String>,
        action: AclAction,
    ) -> Result<Self> {
        let name = name.into();
        check_name(entry_type, &name)?;
        Ok(Self {
            scope,
            entry_type,
            name,
            action: Some(action),
        })
    }

    /// Parses an entry from its posix string form, e.g.
    /// `"default:user:bob:r-x"`.
    pub fn parse(entry: &str) -> Result<Self> {
        Self::parse_internal(entry, false)
    }

    /// Parses a removal template; the permission field may be omitted.
    pub fn parse_removal(entry: &str) -> Result<Self> {
        Self::parse_internal(entry, true)
    }

    fn parse_internal(entry: &str, removal: bool) -> Result<Self> {
        let mut rest = entry.trim();
        if rest.is_empty() {
            return Err(StoreError::InvalidInput("empty ACL entry string".to_string()));
        }

        let scope = match rest.split_once(':') {
            Some((first, tail)) if first.trim().eq_ignore_ascii_case("default") => {
                rest = tail;
                AclScope::Default
            }
            _ => AclScope::Access,
        };

        let parts: Vec<&str> = rest.split(':').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(StoreError::InvalidInput(format!(
                "invalid ACL entry string: {entry}"
            )));
        }
        if parts.len() == 2 && !removal {
            return Err(StoreError::InvalidInput(format!(
                "ACL entry is missing the permission field: {entry}"
            )));
        }

        let entry_type = AclType::parse(parts[0])?;
        let name = parts[1].trim().to_string();
        check_name(entry_type, &name)?;

        let action = if parts.len() == 3 && !(removal && parts[2].trim().is_empty()) {
            Some(AclAction::from_rwx(parts[2])?)
        } else {
            None
        };

        Ok(Self {
            scope,
            entry_type,
            name,
            action,
        })
    }

    /// Canonical string form without the permission field.
    pub fn to_removal_string(&self) -> String {
        self.format(true)
    }

    fn format(&self, removal: bool) -> String {
        let mut out = String::new();
        if self.scope == AclScope::Default {
            out.push_str("default:");
        }
        out.push_str(self.entry_type.as_str());
        out.push(':');
        out.push_str(&self.name);
        if !removal {
            if let Some(action) = self.action {
                out.push(':');
                out.push_str(action.rwx());
            }
        }
        out
    }

    /// Parses a comma-separated ACL spec into entries.
    pub fn parse_spec(spec: &str) -> Result<Vec<AclEntry>> {
        Self::parse_spec_internal(spec, false)
    }

    /// Parses a comma-separated removal spec; permissions may be omitted.
    pub fn parse_removal_spec(spec: &str) -> Result<Vec<AclEntry>> {
        Self::parse_spec_internal(spec, true)
    }

    fn parse_spec_internal(spec: &str, removal: bool) -> Result<Vec<AclEntry>> {
        spec.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| Self::parse_internal(part, removal))
            .collect()
    }

    /// Serializes entries to a comma-separated ACL spec.
    pub fn spec_to_string(entries: &[AclEntry]) -> String {
        entries
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Serializes entries to a removal spec (no permission fields).
    pub fn spec_to_removal_string(entries: &[AclEntry]) -> String {
        entries
            .iter()
            .map(|e| e.to_removal_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl std::fmt::Display for AclEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format(false))
    }
}

fn check_name(entry_type: AclType, name: &str) -> Result<()> {
    if matches!(entry_type, AclType::Mask | AclType::Other) && !name.is_empty() {
        return Err(StoreError::InvalidInput(format!(
            "ACL entry of type '{}' must not name a principal",
            entry_type.as_str()
        )));
    }
    Ok(())
}

/// ACL and permission information of one file or directory.
#[derive(Debug, Clone)]
pub struct AclStatus {
    pub entries: Vec<AclEntry>,
    pub owner: String,
    pub group: String,
    /// Unix permission in octal form.
    pub octal_permission: String,
    /// Only meaningful for directories.
    pub sticky_bit: bool,
}

/// Whether `input` is a valid octal permission string (1-4 octal digits,
/// allowing for a leading sticky digit).
pub fn is_valid_octal(input: &str) -> bool {
    !input.is_empty() && input.len() <= 4 && input.bytes().all(|b| (b'0'..=b'7').contains(&b))
}
