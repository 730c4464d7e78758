//! Directory user representation and helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::dn::common_name_of;
use crate::entry::DirectoryEntry;
use crate::mapper::{self, FromDirectoryEntry};

/// Attributes requested for user lookups.
pub const USER_ATTRIBUTES: &[&str] = &[
    "distinguishedName",
    "sAMAccountName",
    "userPrincipalName",
    "displayName",
    "cn",
    "givenName",
    "sn",
    "mail",
    "telephoneNumber",
    "mobile",
    "department",
    "title",
    "company",
    "physicalDeliveryOfficeName",
    "employeeID",
    "manager",
    "description",
    "userAccountControl",
    "lockoutTime",
    "memberOf",
    "whenCreated",
    "whenChanged",
    "lastLogon",
    "lastLogonTimestamp",
    "pwdLastSet",
    "accountExpires",
];

/// Representation of a directory user.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct User {
    /// Distinguished name of the user entry.
    pub dn: String,
    /// Logon name (`sAMAccountName`).
    #[serde(default)]
    pub username: Option<String>,
    /// User principal name (`user@domain`).
    #[serde(default)]
    pub user_principal_name: Option<String>,
    /// Display name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Common name.
    #[serde(default)]
    pub common_name: Option<String>,
    /// Given name.
    #[serde(default)]
    pub first_name: Option<String>,
    /// Surname.
    #[serde(default)]
    pub last_name: Option<String>,
    /// Primary email address.
    #[serde(default)]
    pub email: Option<String>,
    /// Phone number.
    #[serde(default)]
    pub phone: Option<String>,
    /// Mobile number.
    #[serde(default)]
    pub mobile: Option<String>,
    /// Department.
    #[serde(default)]
    pub department: Option<String>,
    /// Job title.
    #[serde(default)]
    pub title: Option<String>,
    /// Company.
    #[serde(default)]
    pub company: Option<String>,
    /// Office.
    #[serde(default)]
    pub office: Option<String>,
    /// Employee identifier.
    #[serde(default)]
    pub employee_id: Option<String>,
    /// Manager distinguished name.
    #[serde(default)]
    pub manager: Option<String>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// False when the account-disabled bit is set.
    pub is_enabled: bool,
    /// True when `lockoutTime` is non-zero.
    pub is_locked_out: bool,
    /// True when the password-never-expires bit is set.
    pub password_never_expires: bool,
    /// Creation timestamp.
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    /// Last modification timestamp.
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
    /// Most recent logon.
    #[serde(default)]
    pub last_logon: Option<DateTime<Utc>>,
    /// When the password was last set.
    #[serde(default)]
    pub password_last_set: Option<DateTime<Utc>>,
    /// Account expiry, `None` when the account never expires.
    #[serde(default)]
    pub account_expires: Option<DateTime<Utc>>,
    /// Distinguished names of groups the user is a direct member of.
    #[serde(default)]
    pub member_of: Vec<String>,
    /// Values of configured custom attributes.
    #[serde(default)]
    pub custom_attributes: BTreeMap<String, String>,
}

impl User {
    /// Common names of the groups the user is a direct member of.
    #[must_use]
    pub fn group_names(&self) -> Vec<String> {
        self.member_of
            .iter()
            .filter_map(|dn| common_name_of(dn))
            .collect()
    }

    /// Returns true if the user belongs to the provided group (common name, case-insensitive).
    #[must_use]
    pub fn in_group(&self, group: &str) -> bool {
        self.group_names()
            .iter()
            .any(|name| name.eq_ignore_ascii_case(group))
    }

    /// Returns true if the account can sign in (enabled and not locked out).
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.is_enabled && !self.is_locked_out
    }

    /// Returns the preferred human-readable name.
    #[must_use]
    pub fn preferred_name(&self) -> Option<String> {
        if let Some(display) = &self.display_name {
            return Some(display.clone());
        }

        match (&self.first_name, &self.last_name) {
            (Some(given), Some(sn)) => Some(format!("{given} {sn}")),
            (Some(given), None) => Some(given.clone()),
            (None, Some(sn)) => Some(sn.clone()),
            _ => self.common_name.clone().or_else(|| self.username.clone()),
        }
    }
}

impl FromDirectoryEntry for User {
    fn attributes() -> &'static [&'static str] {
        USER_ATTRIBUTES
    }

    fn from_entry(entry: &DirectoryEntry, custom_attributes: &[String]) -> Self {
        let account_control = mapper::flags(entry, "userAccountControl");
        Self {
            dn: entry.dn.clone(),
            username: entry.first_owned("sAMAccountName"),
            user_principal_name: entry.first_owned("userPrincipalName"),
            display_name: entry.first_owned("displayName"),
            common_name: entry.first_owned("cn"),
            first_name: entry.first_owned("givenName"),
            last_name: entry.first_owned("sn"),
            email: entry.first_owned("mail"),
            phone: entry.first_owned("telephoneNumber"),
            mobile: entry.first_owned("mobile"),
            department: entry.first_owned("department"),
            title: entry.first_owned("title"),
            company: entry.first_owned("company"),
            office: entry.first_owned("physicalDeliveryOfficeName"),
            employee_id: entry.first_owned("employeeID"),
            manager: entry.first_owned("manager"),
            description: entry.first_owned("description"),
            is_enabled: !mapper::is_account_disabled(account_control),
            is_locked_out: mapper::is_locked_out(entry.first("lockoutTime")),
            password_never_expires: mapper::is_password_never_expires(account_control),
            created: mapper::generalized_time(entry, "whenCreated"),
            modified: mapper::generalized_time(entry, "whenChanged"),
            last_logon: mapper::last_logon(entry),
            password_last_set: mapper::file_time(entry, "pwdLastSet"),
            account_expires: mapper::file_time(entry, "accountExpires"),
            member_of: entry.all_owned("memberOf"),
            custom_attributes: mapper::collect_custom_attributes(entry, custom_attributes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn jdoe_entry() -> DirectoryEntry {
        DirectoryEntry::new("CN=John Doe,OU=Staff,DC=corp,DC=com")
            .with_attribute("sAMAccountName", ["jdoe"])
            .with_attribute("userPrincipalName", ["jdoe@corp.com"])
            .with_attribute("displayName", ["John Doe"])
            .with_attribute("cn", ["John Doe"])
            .with_attribute("givenName", ["John"])
            .with_attribute("sn", ["Doe"])
            .with_attribute("mail", ["jdoe@corp.com"])
            .with_attribute("telephoneNumber", ["+1-555-0100"])
            .with_attribute("department", ["Engineering"])
            .with_attribute("title", ["Engineer"])
            .with_attribute("company", ["Corp"])
            .with_attribute("physicalDeliveryOfficeName", ["HQ"])
            .with_attribute("employeeID", ["E1234"])
            .with_attribute("manager", ["CN=Boss,OU=Staff,DC=corp,DC=com"])
            .with_attribute("userAccountControl", ["66048"])
            .with_attribute("lockoutTime", ["0"])
            .with_attribute(
                "memberOf",
                ["CN=Admins,OU=Groups,DC=corp,DC=com", "CN=VPN Users,OU=Groups,DC=corp,DC=com"],
            )
            .with_attribute("whenCreated", ["20200102030405.0Z"])
            .with_attribute("whenChanged", ["20240506070809.0Z"])
            .with_attribute("lastLogonTimestamp", ["132539328000000000"])
            .with_attribute("pwdLastSet", ["132539328000000000"])
            .with_attribute("accountExpires", ["9223372036854775807"])
            .with_attribute("extensionAttribute1", ["blue"])
    }

    #[test]
    fn maps_every_populated_field() {
        let user = User::from_entry(&jdoe_entry(), &["extensionAttribute1".to_string()]);
        let jan_2021 = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();

        let expected = User {
            dn: "CN=John Doe,OU=Staff,DC=corp,DC=com".into(),
            username: Some("jdoe".into()),
            user_principal_name: Some("jdoe@corp.com".into()),
            display_name: Some("John Doe".into()),
            common_name: Some("John Doe".into()),
            first_name: Some("John".into()),
            last_name: Some("Doe".into()),
            email: Some("jdoe@corp.com".into()),
            phone: Some("+1-555-0100".into()),
            mobile: None,
            department: Some("Engineering".into()),
            title: Some("Engineer".into()),
            company: Some("Corp".into()),
            office: Some("HQ".into()),
            employee_id: Some("E1234".into()),
            manager: Some("CN=Boss,OU=Staff,DC=corp,DC=com".into()),
            description: None,
            is_enabled: true,
            is_locked_out: false,
            password_never_expires: true,
            created: Some(Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap()),
            modified: Some(Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()),
            last_logon: Some(jan_2021),
            password_last_set: Some(jan_2021),
            account_expires: None,
            member_of: vec![
                "CN=Admins,OU=Groups,DC=corp,DC=com".into(),
                "CN=VPN Users,OU=Groups,DC=corp,DC=com".into(),
            ],
            custom_attributes: BTreeMap::from([(
                "extensionAttribute1".to_string(),
                "blue".to_string(),
            )]),
        };
        assert_eq!(user, expected);
    }

    #[test]
    fn absent_attributes_map_to_none_or_empty() {
        let user = User::from_entry(
            &DirectoryEntry::new("CN=Ghost,DC=corp,DC=com"),
            &["extensionAttribute1".to_string()],
        );
        assert_eq!(user.username, None);
        assert_eq!(user.email, None);
        assert_eq!(user.created, None);
        assert_eq!(user.last_logon, None);
        assert!(user.is_enabled);
        assert!(!user.is_locked_out);
        assert!(user.member_of.is_empty());
        assert!(user.custom_attributes.is_empty());
    }

    #[test]
    fn malformed_values_degrade() {
        let entry = DirectoryEntry::new("CN=Odd,DC=corp,DC=com")
            .with_attribute("userAccountControl", ["not-a-number"])
            .with_attribute("whenCreated", ["sometime"])
            .with_attribute("pwdLastSet", ["-5"]);
        let user = User::from_entry(&entry, &[]);
        assert!(user.is_enabled);
        assert_eq!(user.created, None);
        assert_eq!(user.password_last_set, None);
    }

    #[test]
    fn disabled_and_locked_account() {
        let entry = DirectoryEntry::new("CN=Locked,DC=corp,DC=com")
            .with_attribute("userAccountControl", ["514"])
            .with_attribute("lockoutTime", ["132539328000000000"]);
        let user = User::from_entry(&entry, &[]);
        assert!(!user.is_enabled);
        assert!(user.is_locked_out);
        assert!(!user.is_active());
    }

    #[test]
    fn group_helpers() {
        let user = User::from_entry(&jdoe_entry(), &[]);
        assert_eq!(user.group_names(), vec!["Admins".to_string(), "VPN Users".to_string()]);
        assert!(user.in_group("vpn users"));
        assert!(!user.in_group("Finance"));
    }

    #[test]
    fn preferred_name_falls_back() {
        let user = User {
            first_name: Some("Jane".into()),
            last_name: Some("Roe".into()),
            ..User::default()
        };
        assert_eq!(user.preferred_name().as_deref(), Some("Jane Roe"));

        let user = User {
            username: Some("svc-backup".into()),
            ..User::default()
        };
        assert_eq!(user.preferred_name().as_deref(), Some("svc-backup"));
    }
}
