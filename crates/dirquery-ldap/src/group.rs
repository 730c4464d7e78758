//! Directory group representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::dn::{common_name_of, DistinguishedName};
use crate::entry::DirectoryEntry;
use crate::mapper::{
    self, FromDirectoryEntry, GROUP_TYPE_DOMAIN_LOCAL, GROUP_TYPE_GLOBAL, GROUP_TYPE_UNIVERSAL,
};

/// Attributes requested for group lookups.
pub const GROUP_ATTRIBUTES: &[&str] = &[
    "distinguishedName",
    "cn",
    "sAMAccountName",
    "description",
    "mail",
    "managedBy",
    "groupType",
    "member",
    "memberOf",
    "whenCreated",
    "whenChanged",
];

/// Security groups grant access; distribution groups are mailing lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GroupCategory {
    /// Security-enabled group.
    Security,
    /// Distribution group.
    #[default]
    Distribution,
}

/// Group scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupScope {
    /// Global group.
    Global,
    /// Domain-local group.
    DomainLocal,
    /// Universal group.
    Universal,
}

impl GroupScope {
    /// The `groupType` bit that marks this scope.
    #[must_use]
    pub const fn bit(self) -> u32 {
        match self {
            Self::Global => GROUP_TYPE_GLOBAL,
            Self::DomainLocal => GROUP_TYPE_DOMAIN_LOCAL,
            Self::Universal => GROUP_TYPE_UNIVERSAL,
        }
    }
}

/// Representation of a directory group.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Group {
    /// Distinguished name of the group.
    pub dn: String,
    /// Common name.
    #[serde(default)]
    pub name: Option<String>,
    /// Pre-Windows 2000 name.
    #[serde(default)]
    pub sam_account_name: Option<String>,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
    /// Manager distinguished name.
    #[serde(default)]
    pub managed_by: Option<String>,
    /// Security or distribution.
    pub category: GroupCategory,
    /// Scope, when one of the known scope bits is set.
    #[serde(default)]
    pub scope: Option<GroupScope>,
    /// Distinguished names of direct members.
    #[serde(default)]
    pub members: Vec<String>,
    /// Distinguished names of groups this group is nested in.
    #[serde(default)]
    pub member_of: Vec<String>,
    /// Creation timestamp.
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    /// Last modification timestamp.
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
    /// Values of configured custom attributes.
    #[serde(default)]
    pub custom_attributes: BTreeMap<String, String>,
}

impl Group {
    /// Returns the number of direct members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Checks whether the given distinguished name is a direct member of this group.
    #[must_use]
    pub fn has_member(&self, member_dn: &str) -> bool {
        let Ok(wanted) = DistinguishedName::parse(member_dn) else {
            return false;
        };
        self.members
            .iter()
            .filter_map(|dn| DistinguishedName::parse(dn).ok())
            .any(|dn| dn == wanted)
    }

    /// Returns true for security groups.
    #[must_use]
    pub fn is_security_group(&self) -> bool {
        self.category == GroupCategory::Security
    }

    /// Common names of the groups this group is nested in.
    #[must_use]
    pub fn parent_group_names(&self) -> Vec<String> {
        self.member_of
            .iter()
            .filter_map(|dn| common_name_of(dn))
            .collect()
    }
}

impl FromDirectoryEntry for Group {
    fn attributes() -> &'static [&'static str] {
        GROUP_ATTRIBUTES
    }

    fn from_entry(entry: &DirectoryEntry, custom_attributes: &[String]) -> Self {
        let (category, scope) = mapper::decode_group_type(mapper::flags(entry, "groupType"));
        Self {
            dn: entry.dn.clone(),
            name: entry.first_owned("cn"),
            sam_account_name: entry.first_owned("sAMAccountName"),
            description: entry.first_owned("description"),
            email: entry.first_owned("mail"),
            managed_by: entry.first_owned("managedBy"),
            category,
            scope,
            members: entry.all_owned("member"),
            member_of: entry.all_owned("memberOf"),
            created: mapper::generalized_time(entry, "whenCreated"),
            modified: mapper::generalized_time(entry, "whenChanged"),
            custom_attributes: mapper::collect_custom_attributes(entry, custom_attributes),
        }
    }
}
