//! Directory computer account representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::entry::DirectoryEntry;
use crate::mapper::{self, FromDirectoryEntry};

/// Attributes requested for computer lookups.
pub const COMPUTER_ATTRIBUTES: &[&str] = &[
    "distinguishedName",
    "cn",
    "sAMAccountName",
    "dNSHostName",
    "operatingSystem",
    "operatingSystemVersion",
    "operatingSystemServicePack",
    "description",
    "location",
    "managedBy",
    "userAccountControl",
    "servicePrincipalName",
    "memberOf",
    "whenCreated",
    "whenChanged",
    "lastLogon",
    "lastLogonTimestamp",
    "pwdLastSet",
];

/// Representation of a directory computer account.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Computer {
    /// Distinguished name of the computer entry.
    pub dn: String,
    /// Common name.
    #[serde(default)]
    pub name: Option<String>,
    /// Account name (usually the host name followed by `$`).
    #[serde(default)]
    pub sam_account_name: Option<String>,
    /// Fully qualified host name.
    #[serde(default)]
    pub dns_host_name: Option<String>,
    /// Operating system.
    #[serde(default)]
    pub operating_system: Option<String>,
    /// Operating system version.
    #[serde(default)]
    pub operating_system_version: Option<String>,
    /// Operating system service pack.
    #[serde(default)]
    pub operating_system_service_pack: Option<String>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Physical location.
    #[serde(default)]
    pub location: Option<String>,
    /// Manager distinguished name.
    #[serde(default)]
    pub managed_by: Option<String>,
    /// False when the account-disabled bit is set.
    pub is_enabled: bool,
    /// Most recent logon.
    #[serde(default)]
    pub last_logon: Option<DateTime<Utc>>,
    /// When the machine password was last rotated.
    #[serde(default)]
    pub password_last_set: Option<DateTime<Utc>>,
    /// Creation timestamp.
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    /// Last modification timestamp.
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
    /// Service principal names registered on the account.
    #[serde(default)]
    pub service_principal_names: Vec<String>,
    /// Distinguished names of groups the computer is a direct member of.
    #[serde(default)]
    pub member_of: Vec<String>,
    /// Values of configured custom attributes.
    #[serde(default)]
    pub custom_attributes: BTreeMap<String, String>,
}

impl Computer {
    /// Returns true if a service principal with the given service class is registered
    /// (e.g. `HTTP`, `MSSQLSvc`).
    #[must_use]
    pub fn has_service_class(&self, service_class: &str) -> bool {
        self.service_principal_names.iter().any(|spn| {
            spn.split_once('/')
                .is_some_and(|(class, _)| class.eq_ignore_ascii_case(service_class))
        })
    }
}

impl FromDirectoryEntry for Computer {
    fn attributes() -> &'static [&'static str] {
        COMPUTER_ATTRIBUTES
    }

    fn from_entry(entry: &DirectoryEntry, custom_attributes: &[String]) -> Self {
        Self {
            dn: entry.dn.clone(),
            name: entry.first_owned("cn"),
            sam_account_name: entry.first_owned("sAMAccountName"),
            dns_host_name: entry.first_owned("dNSHostName"),
            operating_system: entry.first_owned("operatingSystem"),
            operating_system_version: entry.first_owned("operatingSystemVersion"),
            operating_system_service_pack: entry.first_owned("operatingSystemServicePack"),
            description: entry.first_owned("description"),
            location: entry.first_owned("location"),
            managed_by: entry.first_owned("managedBy"),
            is_enabled: !mapper::is_account_disabled(mapper::flags(entry, "userAccountControl")),
            last_logon: mapper::last_logon(entry),
            password_last_set: mapper::file_time(entry, "pwdLastSet"),
            created: mapper::generalized_time(entry, "whenCreated"),
            modified: mapper::generalized_time(entry, "whenChanged"),
            service_principal_names: entry.all_owned("servicePrincipalName"),
            member_of: entry.all_owned("memberOf"),
            custom_attributes: mapper::collect_custom_attributes(entry, custom_attributes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_computer_entry() {
        let entry = DirectoryEntry::new("CN=WEB01,OU=Servers,DC=corp,DC=com")
            .with_attribute("cn", ["WEB01"])
            .with_attribute("sAMAccountName", ["WEB01$"])
            .with_attribute("dNSHostName", ["web01.corp.com"])
            .with_attribute("operatingSystem", ["Windows Server 2022 Datacenter"])
            .with_attribute("operatingSystemVersion", ["10.0 (20348)"])
            .with_attribute("userAccountControl", ["4096"])
            .with_attribute(
                "servicePrincipalName",
                ["HOST/web01.corp.com", "HTTP/web01.corp.com"],
            )
            .with_attribute("whenCreated", ["20220101000000.0Z"]);

        let computer = Computer::from_entry(&entry, &[]);
        assert_eq!(computer.name.as_deref(), Some("WEB01"));
        assert_eq!(computer.dns_host_name.as_deref(), Some("web01.corp.com"));
        assert_eq!(computer.operating_system_version.as_deref(), Some("10.0 (20348)"));
        assert!(computer.is_enabled);
        assert_eq!(computer.service_principal_names.len(), 2);
        assert!(computer.has_service_class("http"));
        assert!(!computer.has_service_class("MSSQLSvc"));
        assert!(computer.created.is_some());
        assert_eq!(computer.last_logon, None);
    }

    #[test]
    fn disabled_computer_without_spns() {
        let entry = DirectoryEntry::new("CN=OLD01,OU=Servers,DC=corp,DC=com")
            .with_attribute("userAccountControl", ["4098"]);
        let computer = Computer::from_entry(&entry, &[]);
        assert!(!computer.is_enabled);
        assert!(computer.service_principal_names.is_empty());
        assert_eq!(computer.operating_system, None);
    }
}
