//! Distinguished name parsing for directory entries.
//!
//! Used to pull the common name out of membership values (`memberOf`, `member`) and to
//! compare DNs without caring about attribute-type case.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use dirquery_core::Error as CoreError;

/// Errors that can occur when parsing distinguished names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistinguishedNameError {
    /// The distinguished name was empty.
    #[error("distinguished name cannot be empty")]
    Empty,
    /// A component in the distinguished name was invalid.
    #[error("invalid distinguished name component: {0}")]
    InvalidComponent(String),
    /// A component was missing the attribute name to the left of the `=`.
    #[error("distinguished name component missing attribute: {0}")]
    MissingAttribute(String),
    /// The distinguished name ended with an escape character or a truncated hex pair.
    #[error("distinguished name contains an unterminated escape sequence")]
    UnterminatedEscape,
}

impl From<DistinguishedNameError> for CoreError {
    fn from(err: DistinguishedNameError) -> Self {
        CoreError::InvalidRequest(err.to_string())
    }
}

/// Single `attribute=value` pair of a distinguished name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelativeDistinguishedName {
    attribute: String,
    value: String,
}

impl RelativeDistinguishedName {
    /// Create a new relative distinguished name.
    #[must_use]
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Attribute type (e.g. `CN`).
    #[must_use]
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Unescaped attribute value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns true if this RDN has the given attribute type (case-insensitive).
    #[must_use]
    pub fn matches_attribute(&self, attribute: &str) -> bool {
        self.attribute.eq_ignore_ascii_case(attribute)
    }
}

/// Parsed distinguished name.
///
/// Keeps the string exactly as the directory returned it next to the unescaped
/// components, because filters must quote the server's own spelling back to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistinguishedName {
    raw: String,
    rdns: Vec<Vec<RelativeDistinguishedName>>,
}

impl DistinguishedName {
    /// Parses a distinguished name (RFC 4514 string form).
    ///
    /// # Errors
    ///
    /// Returns [`DistinguishedNameError`] if the input is empty or malformed.
    pub fn parse(input: impl AsRef<str>) -> std::result::Result<Self, DistinguishedNameError> {
        let raw = input.as_ref().trim();
        if raw.is_empty() {
            return Err(DistinguishedNameError::Empty);
        }

        let mut rdns = Vec::new();
        for component in split_escaped(raw, ',')? {
            let mut rdn_components = Vec::new();
            for part in split_escaped(&component, '+')? {
                let (attribute, value) = split_attribute_value(&part)?;
                rdn_components.push(RelativeDistinguishedName::new(attribute, value));
            }
            rdns.push(rdn_components);
        }

        Ok(Self {
            raw: raw.to_string(),
            rdns,
        })
    }

    /// Borrows the distinguished name as returned by the directory.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns an iterator over all relative distinguished names, leaf first.
    pub fn components(&self) -> impl Iterator<Item = &RelativeDistinguishedName> + '_ {
        self.rdns.iter().flat_map(|rdn| rdn.iter())
    }

    /// Looks up the value of the first component with the given attribute type.
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.components()
            .find(|rdn| rdn.matches_attribute(attribute))
            .map(RelativeDistinguishedName::value)
    }

    /// Common name of the leaf component, if the leaf is a `CN=` component.
    #[must_use]
    pub fn common_name(&self) -> Option<&str> {
        self.rdns
            .first()
            .and_then(|leaf| leaf.iter().find(|rdn| rdn.matches_attribute("cn")))
            .map(RelativeDistinguishedName::value)
    }
}

impl PartialEq for DistinguishedName {
    fn eq(&self, other: &Self) -> bool {
        self.rdns.len() == other.rdns.len()
            && self
                .rdns
                .iter()
                .zip(&other.rdns)
                .all(|(left, right)| rdn_eq(left, right))
    }
}

impl Eq for DistinguishedName {}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for DistinguishedName {
    type Err = DistinguishedNameError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for DistinguishedName {
    type Error = DistinguishedNameError;

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        Self::parse(value)
    }
}

/// Returns the common name of a DN string, or `None` if it does not parse.
#[must_use]
pub fn common_name_of(dn: &str) -> Option<String> {
    DistinguishedName::parse(dn)
        .ok()
        .and_then(|dn| dn.common_name().map(str::to_owned))
}

fn rdn_eq(left: &[RelativeDistinguishedName], right: &[RelativeDistinguishedName]) -> bool {
    left.len() == right.len()
        && left.iter().all(|l| {
            right.iter().any(|r| {
                l.matches_attribute(&r.attribute) && l.value.eq_ignore_ascii_case(&r.value)
            })
        })
}

fn split_escaped(
    input: &str,
    delimiter: char,
) -> std::result::Result<Vec<String>, DistinguishedNameError> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escape = false;

    for ch in input.chars() {
        if escape {
            current.push(ch);
            escape = false;
            continue;
        }

        if ch == '\\' {
            // escapes stay in place; values are unescaped after splitting
            current.push(ch);
            escape = true;
            continue;
        }

        if ch == delimiter {
            parts.push(current.trim().to_string());
            current.clear();
            continue;
        }

        current.push(ch);
    }

    if escape {
        return Err(DistinguishedNameError::UnterminatedEscape);
    }

    parts.push(current.trim().to_string());
    if parts.iter().any(String::is_empty) {
        return Err(DistinguishedNameError::InvalidComponent(input.to_string()));
    }
    Ok(parts)
}

fn split_attribute_value(
    component: &str,
) -> std::result::Result<(String, String), DistinguishedNameError> {
    let idx = component
        .find('=')
        .ok_or_else(|| DistinguishedNameError::InvalidComponent(component.to_string()))?;
    let attribute = component[..idx].trim();
    let value_part = component[idx + 1..].trim_start();

    if attribute.is_empty() {
        return Err(DistinguishedNameError::MissingAttribute(
            component.to_string(),
        ));
    }

    Ok((attribute.to_string(), unescape(value_part)?))
}

fn unescape(value: &str) -> std::result::Result<String, DistinguishedNameError> {
    let mut bytes = Vec::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            continue;
        }

        let next = chars
            .next()
            .ok_or(DistinguishedNameError::UnterminatedEscape)?;
        if next.is_ascii_hexdigit() {
            // `\XX` hex pair
            let low = chars
                .next()
                .filter(char::is_ascii_hexdigit)
                .ok_or(DistinguishedNameError::UnterminatedEscape)?;
            let pair = [next, low].iter().collect::<String>();
            let byte = u8::from_str_radix(&pair, 16)
                .map_err(|_| DistinguishedNameError::UnterminatedEscape)?;
            bytes.push(byte);
        } else {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(next.encode_utf8(&mut buf).as_bytes());
        }
    }

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_dn() {
        let dn = DistinguishedName::parse("CN=John Doe,OU=Staff,DC=corp,DC=example,DC=com")
            .unwrap();
        assert_eq!(dn.get("cn"), Some("John Doe"));
        assert_eq!(dn.get("ou"), Some("Staff"));
        assert_eq!(dn.common_name(), Some("John Doe"));
        assert_eq!(
            dn.to_string(),
            "CN=John Doe,OU=Staff,DC=corp,DC=example,DC=com"
        );
    }

    #[test]
    fn parse_dn_with_escaped_comma() {
        let dn = DistinguishedName::parse("CN=Smith\\, John,OU=Staff,DC=corp,DC=com").unwrap();
        assert_eq!(dn.common_name(), Some("Smith, John"));
        assert_eq!(dn.get("ou"), Some("Staff"));
    }

    #[test]
    fn parse_dn_with_hex_escape() {
        let dn = DistinguishedName::parse("CN=R\\C3\\A9seau,OU=Groups,DC=corp,DC=com").unwrap();
        assert_eq!(dn.common_name(), Some("Réseau"));

        let dn = DistinguishedName::parse("CN=Sales\\2C EMEA,DC=corp,DC=com").unwrap();
        assert_eq!(dn.common_name(), Some("Sales, EMEA"));
    }

    #[test]
    fn parse_multi_valued_rdn() {
        let dn = DistinguishedName::parse("CN=John+UID=1234,OU=Staff,DC=corp,DC=com").unwrap();
        assert_eq!(dn.common_name(), Some("John"));
        assert_eq!(dn.get("uid"), Some("1234"));
    }

    #[test]
    fn equality_ignores_case() {
        let left = DistinguishedName::parse("CN=Admins,OU=Groups,DC=corp,DC=com").unwrap();
        let right = DistinguishedName::parse("cn=admins, ou=groups, dc=CORP, dc=com").unwrap();
        assert_eq!(left, right);
    }

    #[test]
    fn common_name_of_non_cn_leaf() {
        assert_eq!(common_name_of("OU=Staff,DC=corp,DC=com"), None);
        assert_eq!(common_name_of("not a dn"), None);
        assert_eq!(
            common_name_of("CN=Domain Admins,CN=Users,DC=corp,DC=com").as_deref(),
            Some("Domain Admins")
        );
    }

    #[test]
    fn invalid_trailing_delimiter() {
        let err = DistinguishedName::parse("CN=John,").unwrap_err();
        assert!(matches!(err, DistinguishedNameError::InvalidComponent(_)));
    }

    #[test]
    fn unterminated_escape() {
        let err = DistinguishedName::parse("CN=John\\").unwrap_err();
        assert_eq!(err, DistinguishedNameError::UnterminatedEscape);
    }
}
