//! Normalization of raw directory entries into typed records.
//!
//! Every decoder here is total: malformed attribute data degrades to `None` or the
//! field's default instead of an error.

use crate::computer::Computer;
use crate::entry::DirectoryEntry;
use crate::group::{Group, GroupCategory, GroupScope};
use crate::user::User;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `userAccountControl` bit: account disabled.
pub const UAC_ACCOUNT_DISABLE: u32 = 0x0000_0002;
/// `userAccountControl` bit: password never expires.
pub const UAC_DONT_EXPIRE_PASSWORD: u32 = 0x0001_0000;
/// `groupType` bit: security-enabled group.
pub const GROUP_TYPE_SECURITY_ENABLED: u32 = 0x8000_0000;
/// `groupType` scope bit: global.
pub const GROUP_TYPE_GLOBAL: u32 = 0x0000_0002;
/// `groupType` scope bit: domain local.
pub const GROUP_TYPE_DOMAIN_LOCAL: u32 = 0x0000_0004;
/// `groupType` scope bit: universal.
pub const GROUP_TYPE_UNIVERSAL: u32 = 0x0000_0008;

/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_OFFSET_SECS: i64 = 11_644_473_600;
const FILETIME_TICKS_PER_SEC: i64 = 10_000_000;
/// File time of 9999-12-31T23:59:59.9999999Z.
const FILETIME_MAX: i64 = 2_650_467_743_999_999_999;
const GENERALIZED_TIME_LEN: usize = 14;

/// Record types that can be built from a single directory entry.
pub trait FromDirectoryEntry: Sized {
    /// Attributes to request from the directory for this record type.
    fn attributes() -> &'static [&'static str];

    /// Builds the record. `custom_attributes` names the extra attributes to copy into the
    /// record's custom bag.
    fn from_entry(entry: &DirectoryEntry, custom_attributes: &[String]) -> Self;
}

/// Kind of record an entry should be mapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Person account.
    User,
    /// Group.
    Group,
    /// Computer account.
    Computer,
}

/// A mapped record of any kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DirectoryRecord {
    /// Person account.
    User(User),
    /// Group.
    Group(Group),
    /// Computer account.
    Computer(Computer),
}

/// Maps `entry` into the record type selected by `kind`.
#[must_use]
pub fn map_entry(
    entry: &DirectoryEntry,
    kind: EntityKind,
    custom_attributes: &[String],
) -> DirectoryRecord {
    match kind {
        EntityKind::User => DirectoryRecord::User(User::from_entry(entry, custom_attributes)),
        EntityKind::Group => DirectoryRecord::Group(Group::from_entry(entry, custom_attributes)),
        EntityKind::Computer => {
            DirectoryRecord::Computer(Computer::from_entry(entry, custom_attributes))
        }
    }
}

/// Attribute projection for `T` plus the custom attributes, without duplicates.
#[must_use]
pub fn projection<T: FromDirectoryEntry>(custom_attributes: &[String]) -> Vec<String> {
    let mut attributes: Vec<String> = T::attributes().iter().map(|a| (*a).to_string()).collect();
    for name in custom_attributes {
        if !attributes.iter().any(|a| a.eq_ignore_ascii_case(name)) {
            attributes.push(name.clone());
        }
    }
    attributes
}

/// Parses a generalized-time value (`yyyyMMddHHmmss[.f][Z]`) as UTC.
///
/// Anything from the fractional-seconds marker on is ignored.
#[must_use]
pub fn parse_generalized_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let head = value.split(['.', ',']).next().unwrap_or(value);
    let prefix = head.get(..GENERALIZED_TIME_LEN)?;
    if !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(prefix, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parses a Windows file time (100 ns ticks since 1601-01-01 UTC).
///
/// Zero, negative, unparsable and out-of-range values (including the "never" sentinel)
/// yield `None`.
#[must_use]
pub fn parse_file_time(value: &str) -> Option<DateTime<Utc>> {
    let ticks = value.trim().parse::<i64>().ok()?;
    if ticks <= 0 || ticks > FILETIME_MAX {
        return None;
    }
    let secs = ticks / FILETIME_TICKS_PER_SEC - FILETIME_UNIX_OFFSET_SECS;
    let nanos = u32::try_from((ticks % FILETIME_TICKS_PER_SEC) * 100).ok()?;
    DateTime::from_timestamp(secs, nanos)
}

/// Parses an integer flags attribute.
///
/// The directory stores these as signed 32-bit values (security group types are
/// negative), so the bit pattern is reinterpreted as unsigned.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn parse_flags(value: &str) -> Option<u32> {
    let parsed = value.trim().parse::<i64>().ok()?;
    if parsed < i64::from(i32::MIN) || parsed > i64::from(u32::MAX) {
        return None;
    }
    Some(parsed as u32)
}

/// Returns true if the account-disabled bit is set.
#[must_use]
pub fn is_account_disabled(user_account_control: Option<u32>) -> bool {
    user_account_control.is_some_and(|flags| flags & UAC_ACCOUNT_DISABLE != 0)
}

/// Returns true if the password-never-expires bit is set.
#[must_use]
pub fn is_password_never_expires(user_account_control: Option<u32>) -> bool {
    user_account_control.is_some_and(|flags| flags & UAC_DONT_EXPIRE_PASSWORD != 0)
}

/// Returns true if a `lockoutTime` value is present and non-zero.
#[must_use]
pub fn is_locked_out(lockout_time: Option<&str>) -> bool {
    lockout_time
        .and_then(|value| value.trim().parse::<i64>().ok())
        .is_some_and(|ticks| ticks != 0)
}

/// Decodes group category and scope from a `groupType` value.
#[must_use]
pub fn decode_group_type(group_type: Option<u32>) -> (GroupCategory, Option<GroupScope>) {
    let Some(flags) = group_type else {
        return (GroupCategory::Distribution, None);
    };
    let category = if flags & GROUP_TYPE_SECURITY_ENABLED != 0 {
        GroupCategory::Security
    } else {
        GroupCategory::Distribution
    };
    let scope = [GroupScope::Global, GroupScope::DomainLocal, GroupScope::Universal]
        .into_iter()
        .find(|scope| flags & scope.bit() != 0);
    (category, scope)
}

/// Copies the first value of each allow-listed attribute that is present.
#[must_use]
pub fn collect_custom_attributes(
    entry: &DirectoryEntry,
    names: &[String],
) -> BTreeMap<String, String> {
    names
        .iter()
        .filter_map(|name| entry.first(name).map(|value| (name.clone(), value.to_string())))
        .collect()
}

/// Reads a generalized-time attribute.
#[must_use]
pub fn generalized_time(entry: &DirectoryEntry, attribute: &str) -> Option<DateTime<Utc>> {
    entry.first(attribute).and_then(parse_generalized_time)
}

/// Reads a file-time attribute.
#[must_use]
pub fn file_time(entry: &DirectoryEntry, attribute: &str) -> Option<DateTime<Utc>> {
    entry.first(attribute).and_then(parse_file_time)
}

/// Reads an integer flags attribute.
#[must_use]
pub fn flags(entry: &DirectoryEntry, attribute: &str) -> Option<u32> {
    entry.first(attribute).and_then(parse_flags)
}

/// Most recent logon time: `lastLogonTimestamp` is replicated, `lastLogon` is per
/// controller and may be newer.
#[must_use]
pub fn last_logon(entry: &DirectoryEntry) -> Option<DateTime<Utc>> {
    match (
        file_time(entry, "lastLogonTimestamp"),
        file_time(entry, "lastLogon"),
    ) {
        (Some(replicated), Some(local)) => Some(replicated.max(local)),
        (replicated, local) => replicated.or(local),
    }
}
