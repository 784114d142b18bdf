//! Access control model: permission targets, entries and lists.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

bitflags! {
    /// Permissions granted by an access control entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct PermissionMask: u32 {
        const READ = 0b0000_0001;
        const DEPLOY = 0b0000_0010;
        const ANNOTATE = 0b0000_0100;
        const DELETE = 0b0000_1000;
        const MANAGE = 0b0001_0000;
    }
}

// Manual serde implementation for PermissionMask (bitflags 2.x + serde)
impl Serialize for PermissionMask {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PermissionMask {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u32::deserialize(deserializer)?;
        Self::from_bits(bits).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid PermissionMask bits: {:#06x}", bits))
        })
    }
}

/// A single grant of permissions to a user or group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccessControlEntry {
    /// User name or group name.
    pub principal: String,
    pub is_group: bool,
    pub mask: PermissionMask,
}

impl AccessControlEntry {
    pub fn user(principal: impl Into<String>, mask: PermissionMask) -> Self {
        Self {
            principal: principal.into(),
            is_group: false,
            mask,
        }
    }

    pub fn group(principal: impl Into<String>, mask: PermissionMask) -> Self {
        Self {
            principal: principal.into(),
            is_group: true,
            mask,
        }
    }
}

/// A named set of repositories (and path patterns) that permissions apply to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionTarget {
    pub name: String,
    pub repo_keys: Vec<String>,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
}

impl PermissionTarget {
    /// Matches every repository.
    pub const ANY_REPO: &'static str = "ANY";
    /// Matches every local repository.
    pub const ANY_LOCAL_REPO: &'static str = "ANY LOCAL";
    /// Matches every remote repository.
    pub const ANY_REMOTE_REPO: &'static str = "ANY REMOTE";

    /// A target over `repo_keys` that includes every path.
    pub fn new(name: impl Into<String>, repo_keys: Vec<String>) -> Self {
        Self {
            name: name.into(),
            repo_keys,
            includes: vec!["**".to_string()],
            excludes: Vec::new(),
        }
    }

    pub fn with_includes(mut self, includes: Vec<String>) -> Self {
        self.includes = includes;
        self
    }

    pub fn with_excludes(mut self, excludes: Vec<String>) -> Self {
        self.excludes = excludes;
        self
    }

    /// Comma-joined include patterns.
    pub fn includes_pattern(&self) -> String {
        self.includes.join(",")
    }

    /// Comma-joined exclude patterns.
    pub fn excludes_pattern(&self) -> String {
        self.excludes.join(",")
    }
}

/// A permission target together with the entries granting access to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessControlList {
    pub permission_target: PermissionTarget,
    pub aces: BTreeSet<AccessControlEntry>,
    pub updated_by: String,
}

impl AccessControlList {
    pub fn new(
        permission_target: PermissionTarget,
        aces: impl IntoIterator<Item = AccessControlEntry>,
        updated_by: impl Into<String>,
    ) -> Self {
        Self {
            permission_target,
            aces: aces.into_iter().collect(),
            updated_by: updated_by.into(),
        }
    }

    /// Name of the permission target; unique across all ACLs.
    pub fn name(&self) -> &str {
        &self.permission_target.name
    }

    pub fn repo_keys(&self) -> &[String] {
        &self.permission_target.repo_keys
    }

    /// Copy of this ACL without any entry for the given principal.
    pub fn without_principal(&self, principal: &str, is_group: bool) -> Self {
        let aces = self
            .aces
            .iter()
            .filter(|ace| !(ace.principal == principal && ace.is_group == is_group))
            .cloned()
            .collect();
        Self {
            permission_target: self.permission_target.clone(),
            aces,
            updated_by: self.updated_by.clone(),
        }
    }
}

impl fmt::Display for AccessControlList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ACL '{}' ({} entries, updated by {})",
            self.permission_target.name,
            self.aces.len(),
            self.updated_by
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployers() -> AccessControlList {
        AccessControlList::new(
            PermissionTarget::new("deployT", vec!["repo1".to_string(), "repo2".to_string()])
                .with_excludes(vec!["a/**".to_string()]),
            [
                AccessControlEntry::user("user2", PermissionMask::DEPLOY),
                AccessControlEntry::user("user3", PermissionMask::DEPLOY),
                AccessControlEntry::group("group1", PermissionMask::DEPLOY),
            ],
            "me",
        )
    }

    #[test]
    fn test_permission_mask_serde_roundtrip() {
        let mask = PermissionMask::READ | PermissionMask::DEPLOY;
        let json = serde_json::to_string(&mask).unwrap();
        assert_eq!(json, "3");
        let parsed: PermissionMask = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, mask);
    }

    #[test]
    fn test_permission_mask_rejects_unknown_bits() {
        let parsed: Result<PermissionMask, _> = serde_json::from_str("1024");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_patterns_are_joined() {
        let acl = deployers();
        assert_eq!(acl.permission_target.includes_pattern(), "**");
        assert_eq!(acl.permission_target.excludes_pattern(), "a/**");
    }

    #[test]
    fn test_without_principal_only_drops_matching_kind() {
        let mut acl = deployers();
        acl.aces
            .insert(AccessControlEntry::group("user2", PermissionMask::READ));

        let stripped = acl.without_principal("user2", false);
        assert_eq!(stripped.aces.len(), 3);
        assert!(stripped.aces.iter().all(|a| a.principal != "user2" || a.is_group));
    }

    #[test]
    fn test_acl_json_roundtrip() {
        let acl = deployers();
        let json = serde_json::to_string(&acl).unwrap();
        let parsed: AccessControlList = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, acl);
    }
}
