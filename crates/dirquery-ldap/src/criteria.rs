//! Structured search criteria for users, groups and computers.
//!
//! Every present field contributes exactly one clause to the filter; absent and blank
//! fields contribute nothing. Free-text fields accept `*` wildcards, identifiers are
//! matched exactly.

use crate::filter::FilterBuilder;
use crate::group::{GroupCategory, GroupScope};
use crate::mapper::{GROUP_TYPE_SECURITY_ENABLED, UAC_ACCOUNT_DISABLE, UAC_DONT_EXPIRE_PASSWORD};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Object-class constraint for person accounts.
pub const USER_OBJECT_CLASS: &[&str] = &["(objectClass=user)", "(objectCategory=person)"];
/// Object-class constraint for groups.
pub const GROUP_OBJECT_CLASS: &[&str] = &["(objectClass=group)"];
/// Object-class constraint for computer accounts.
pub const COMPUTER_OBJECT_CLASS: &[&str] = &["(objectClass=computer)"];

/// Criteria for searching user accounts.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSearchCriteria {
    /// Logon name (`sAMAccountName`), wildcards allowed.
    pub username: Option<String>,
    /// User principal name, wildcards allowed.
    pub user_principal_name: Option<String>,
    /// Display name, wildcards allowed.
    pub display_name: Option<String>,
    /// Given name, wildcards allowed.
    pub first_name: Option<String>,
    /// Surname, wildcards allowed.
    pub last_name: Option<String>,
    /// Email address, wildcards allowed.
    pub email: Option<String>,
    /// Department, wildcards allowed.
    pub department: Option<String>,
    /// Job title, wildcards allowed.
    pub title: Option<String>,
    /// Company, wildcards allowed.
    pub company: Option<String>,
    /// Office, wildcards allowed.
    pub office: Option<String>,
    /// Employee identifier, exact match.
    pub employee_id: Option<String>,
    /// Manager distinguished name, exact match.
    pub manager: Option<String>,
    /// Only enabled (`true`) or only disabled (`false`) accounts.
    pub is_enabled: Option<bool>,
    /// Only locked-out (`true`) or only unlocked (`false`) accounts.
    pub is_locked_out: Option<bool>,
    /// Filter on the "password never expires" flag.
    pub password_never_expires: Option<bool>,
    /// Accounts that are direct members of any of these group DNs.
    pub member_of_any: Vec<String>,
    /// Additional exact attribute equalities.
    pub custom_attributes: BTreeMap<String, String>,
    /// Raw filter fragment appended without escaping.
    pub custom_filter: Option<String>,
}

impl UserSearchCriteria {
    /// Compile the criteria into an LDAP filter.
    #[must_use]
    pub fn to_filter(&self) -> String {
        build_user_filter(self)
    }
}

/// Criteria for searching groups.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupSearchCriteria {
    /// Common name, wildcards allowed.
    pub name: Option<String>,
    /// Pre-Windows 2000 name, wildcards allowed.
    pub sam_account_name: Option<String>,
    /// Description, wildcards allowed.
    pub description: Option<String>,
    /// Email address, wildcards allowed.
    pub email: Option<String>,
    /// Manager distinguished name, exact match.
    pub managed_by: Option<String>,
    /// Security or distribution groups only.
    pub category: Option<GroupCategory>,
    /// Groups of this scope only.
    pub scope: Option<GroupScope>,
    /// Groups nested directly in any of these group DNs.
    pub member_of_any: Vec<String>,
    /// Additional exact attribute equalities.
    pub custom_attributes: BTreeMap<String, String>,
    /// Raw filter fragment appended without escaping.
    pub custom_filter: Option<String>,
}

impl GroupSearchCriteria {
    /// Compile the criteria into an LDAP filter.
    #[must_use]
    pub fn to_filter(&self) -> String {
        build_group_filter(self)
    }
}

/// Criteria for searching computer accounts.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputerSearchCriteria {
    /// Common name, wildcards allowed.
    pub name: Option<String>,
    /// DNS host name, wildcards allowed.
    pub dns_host_name: Option<String>,
    /// Operating system, wildcards allowed.
    pub operating_system: Option<String>,
    /// Operating system version, wildcards allowed.
    pub operating_system_version: Option<String>,
    /// Description, wildcards allowed.
    pub description: Option<String>,
    /// Location, wildcards allowed.
    pub location: Option<String>,
    /// Only enabled (`true`) or only disabled (`false`) accounts.
    pub is_enabled: Option<bool>,
    /// Computers that are direct members of any of these group DNs.
    pub member_of_any: Vec<String>,
    /// Additional exact attribute equalities.
    pub custom_attributes: BTreeMap<String, String>,
    /// Raw filter fragment appended without escaping.
    pub custom_filter: Option<String>,
}

impl ComputerSearchCriteria {
    /// Compile the criteria into an LDAP filter.
    #[must_use]
    pub fn to_filter(&self) -> String {
        build_computer_filter(self)
    }
}

/// Build the filter for a user search.
#[must_use]
pub fn build_user_filter(criteria: &UserSearchCriteria) -> String {
    let mut filter = FilterBuilder::new(USER_OBJECT_CLASS);

    filter.push_wildcard("sAMAccountName", criteria.username.as_deref());
    filter.push_wildcard("userPrincipalName", criteria.user_principal_name.as_deref());
    filter.push_wildcard("displayName", criteria.display_name.as_deref());
    filter.push_wildcard("givenName", criteria.first_name.as_deref());
    filter.push_wildcard("sn", criteria.last_name.as_deref());
    filter.push_wildcard("mail", criteria.email.as_deref());
    filter.push_wildcard("department", criteria.department.as_deref());
    filter.push_wildcard("title", criteria.title.as_deref());
    filter.push_wildcard("company", criteria.company.as_deref());
    filter.push_wildcard("physicalDeliveryOfficeName", criteria.office.as_deref());
    filter.push_exact("employeeID", criteria.employee_id.as_deref());
    filter.push_exact("manager", criteria.manager.as_deref());
    // enabled means the disable bit is clear
    filter.push_bit(
        "userAccountControl",
        UAC_ACCOUNT_DISABLE,
        criteria.is_enabled.map(|enabled| !enabled),
    );
    match criteria.is_locked_out {
        Some(true) => filter.push_clause("(lockoutTime>=1)"),
        Some(false) => filter.push_clause("(|(!(lockoutTime=*))(lockoutTime=0))"),
        None => {}
    }
    filter.push_bit(
        "userAccountControl",
        UAC_DONT_EXPIRE_PASSWORD,
        criteria.password_never_expires,
    );
    filter.push_any_of("memberOf", &criteria.member_of_any);
    push_custom_attributes(&mut filter, &criteria.custom_attributes);
    filter.push_raw(criteria.custom_filter.as_deref());

    filter.build()
}

/// Build the filter for a group search.
#[must_use]
pub fn build_group_filter(criteria: &GroupSearchCriteria) -> String {
    let mut filter = FilterBuilder::new(GROUP_OBJECT_CLASS);

    filter.push_wildcard("cn", criteria.name.as_deref());
    filter.push_wildcard("sAMAccountName", criteria.sam_account_name.as_deref());
    filter.push_wildcard("description", criteria.description.as_deref());
    filter.push_wildcard("mail", criteria.email.as_deref());
    filter.push_exact("managedBy", criteria.managed_by.as_deref());
    filter.push_bit(
        "groupType",
        GROUP_TYPE_SECURITY_ENABLED,
        criteria
            .category
            .map(|category| category == GroupCategory::Security),
    );
    if let Some(scope) = criteria.scope {
        filter.push_bit("groupType", scope.bit(), Some(true));
    }
    filter.push_any_of("memberOf", &criteria.member_of_any);
    push_custom_attributes(&mut filter, &criteria.custom_attributes);
    filter.push_raw(criteria.custom_filter.as_deref());

    filter.build()
}

/// Build the filter for a computer search.
#[must_use]
pub fn build_computer_filter(criteria: &ComputerSearchCriteria) -> String {
    let mut filter = FilterBuilder::new(COMPUTER_OBJECT_CLASS);

    filter.push_wildcard("cn", criteria.name.as_deref());
    filter.push_wildcard("dNSHostName", criteria.dns_host_name.as_deref());
    filter.push_wildcard("operatingSystem", criteria.operating_system.as_deref());
    filter.push_wildcard(
        "operatingSystemVersion",
        criteria.operating_system_version.as_deref(),
    );
    filter.push_wildcard("description", criteria.description.as_deref());
    filter.push_wildcard("location", criteria.location.as_deref());
    filter.push_bit(
        "userAccountControl",
        UAC_ACCOUNT_DISABLE,
        criteria.is_enabled.map(|enabled| !enabled),
    );
    filter.push_any_of("memberOf", &criteria.member_of_any);
    push_custom_attributes(&mut filter, &criteria.custom_attributes);
    filter.push_raw(criteria.custom_filter.as_deref());

    filter.build()
}

fn push_custom_attributes(filter: &mut FilterBuilder, attributes: &BTreeMap<String, String>) {
    for (name, value) in attributes {
        if is_valid_attribute_name(name) {
            filter.push_exact(name, Some(value.as_str()));
        } else {
            warn!(attribute = %name, "ignoring custom search attribute with an invalid name");
        }
    }
}

/// Attribute descriptions are a letter followed by letters, digits and hyphens, or a
/// dotted OID.
fn is_valid_attribute_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
        }
        Some(first) if first.is_ascii_digit() => {
            name.split('.').all(|arc| !arc.is_empty() && arc.chars().all(|ch| ch.is_ascii_digit()))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_user_criteria_yield_object_class_constraint() {
        assert_eq!(
            UserSearchCriteria::default().to_filter(),
            "(&(objectClass=user)(objectCategory=person))"
        );
    }

    #[test]
    fn empty_group_and_computer_criteria_are_unwrapped() {
        assert_eq!(GroupSearchCriteria::default().to_filter(), "(objectClass=group)");
        assert_eq!(
            ComputerSearchCriteria::default().to_filter(),
            "(objectClass=computer)"
        );
    }

    #[test]
    fn department_and_enabled_scenario() {
        let criteria = UserSearchCriteria {
            department: Some("Engineering".into()),
            is_enabled: Some(true),
            ..UserSearchCriteria::default()
        };
        assert_eq!(
            criteria.to_filter(),
            "(&(objectClass=user)(objectCategory=person)(department=Engineering)(!(userAccountControl:1.2.840.113556.1.4.803:=2)))"
        );
    }

    #[test]
    fn disabled_and_locked_accounts() {
        let criteria = UserSearchCriteria {
            is_enabled: Some(false),
            is_locked_out: Some(true),
            ..UserSearchCriteria::default()
        };
        assert_eq!(
            criteria.to_filter(),
            "(&(objectClass=user)(objectCategory=person)(userAccountControl:1.2.840.113556.1.4.803:=2)(lockoutTime>=1))"
        );
    }

    #[test]
    fn wildcard_fields_keep_asterisk_and_exact_fields_escape_it() {
        let criteria = UserSearchCriteria {
            display_name: Some("Jo* (Contractor)".into()),
            employee_id: Some("12*".into()),
            ..UserSearchCriteria::default()
        };
        let filter = criteria.to_filter();
        assert!(filter.contains("(displayName=Jo* \\28Contractor\\29)"));
        assert!(filter.contains("(employeeID=12\\2a)"));
    }

    #[test]
    fn member_of_any_is_nested_in_the_conjunction() {
        let criteria = UserSearchCriteria {
            username: Some("j*".into()),
            member_of_any: vec![
                "CN=Admins,OU=Groups,DC=corp,DC=com".into(),
                "CN=Ops,OU=Groups,DC=corp,DC=com".into(),
            ],
            ..UserSearchCriteria::default()
        };
        assert_eq!(
            criteria.to_filter(),
            "(&(objectClass=user)(objectCategory=person)(sAMAccountName=j*)(|(memberOf=CN=Admins,OU=Groups,DC=corp,DC=com)(memberOf=CN=Ops,OU=Groups,DC=corp,DC=com)))"
        );
    }

    #[test]
    fn custom_attributes_render_as_and_clauses() {
        let mut custom_attributes = BTreeMap::new();
        custom_attributes.insert("extensionAttribute1".to_string(), "blue".to_string());
        custom_attributes.insert("costCenter".to_string(), "4*2".to_string());
        custom_attributes.insert("bad)(name".to_string(), "x".to_string());
        let criteria = UserSearchCriteria {
            custom_attributes,
            custom_filter: Some("(title=*Lead*)".into()),
            ..UserSearchCriteria::default()
        };
        assert_eq!(
            criteria.to_filter(),
            "(&(objectClass=user)(objectCategory=person)(costCenter=4\\2a2)(extensionAttribute1=blue)(title=*Lead*))"
        );
    }

    #[test]
    fn group_category_and_scope() {
        let criteria = GroupSearchCriteria {
            name: Some("Sales*".into()),
            category: Some(GroupCategory::Security),
            scope: Some(GroupScope::Universal),
            ..GroupSearchCriteria::default()
        };
        assert_eq!(
            criteria.to_filter(),
            "(&(objectClass=group)(cn=Sales*)(groupType:1.2.840.113556.1.4.803:=2147483648)(groupType:1.2.840.113556.1.4.803:=8))"
        );

        let criteria = GroupSearchCriteria {
            category: Some(GroupCategory::Distribution),
            ..GroupSearchCriteria::default()
        };
        assert_eq!(
            criteria.to_filter(),
            "(&(objectClass=group)(!(groupType:1.2.840.113556.1.4.803:=2147483648)))"
        );
    }

    #[test]
    fn computer_criteria() {
        let criteria = ComputerSearchCriteria {
            operating_system: Some("Windows Server*".into()),
            is_enabled: Some(true),
            ..ComputerSearchCriteria::default()
        };
        assert_eq!(
            criteria.to_filter(),
            "(&(objectClass=computer)(operatingSystem=Windows Server*)(!(userAccountControl:1.2.840.113556.1.4.803:=2)))"
        );
    }

    #[test]
    fn criteria_deserialize_with_defaults() {
        let criteria: UserSearchCriteria =
            serde_json::from_str(r#"{"department": "Engineering"}"#).unwrap();
        assert_eq!(criteria.department.as_deref(), Some("Engineering"));
        assert!(criteria.member_of_any.is_empty());
    }

    #[test]
    fn attribute_name_validation() {
        assert!(is_valid_attribute_name("extensionAttribute1"));
        assert!(is_valid_attribute_name("ms-DS-ConsistencyGuid"));
        assert!(is_valid_attribute_name("1.2.840.113556.1.4.221"));
        assert!(!is_valid_attribute_name(""));
        assert!(!is_valid_attribute_name("cn)(objectClass=*"));
        assert!(!is_valid_attribute_name("1..2"));
    }
}
