//! Raw directory entry as produced by the transport.

use std::collections::HashMap;

/// One matched directory object: a distinguished name and its multi-valued attributes.
///
/// Attribute lookups are case-insensitive; the directory reports names in schema case
/// (`sAMAccountName`) while callers and configuration may spell them differently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Distinguished name of the entry.
    pub dn: String,
    /// Attribute map (values keep the order the server returned them in).
    pub attributes: HashMap<String, Vec<String>>,
}

impl DirectoryEntry {
    /// Creates an entry with no attributes.
    #[must_use]
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: HashMap::new(),
        }
    }

    /// Adds (or replaces) an attribute with the given values.
    #[must_use]
    pub fn with_attribute<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Returns all values for the attribute, if present.
    #[must_use]
    pub fn values(&self, attribute: &str) -> Option<&[String]> {
        self.attributes
            .get(attribute)
            .or_else(|| {
                self.attributes
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
                    .map(|(_, values)| values)
            })
            .map(Vec::as_slice)
    }

    /// Returns the first value of the attribute if present.
    #[must_use]
    pub fn first(&self, attribute: &str) -> Option<&str> {
        self.values(attribute)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Returns the first value as an owned string.
    #[must_use]
    pub fn first_owned(&self, attribute: &str) -> Option<String> {
        self.first(attribute).map(str::to_owned)
    }

    /// Returns all values as an owned list, empty when the attribute is absent.
    #[must_use]
    pub fn all_owned(&self, attribute: &str) -> Vec<String> {
        self.values(attribute)
            .map(<[String]>::to_vec)
            .unwrap_or_default()
    }

    /// Returns true if the attribute is present with at least one value.
    #[must_use]
    pub fn has(&self, attribute: &str) -> bool {
        self.values(attribute)
            .is_some_and(|values| !values.is_empty())
    }
}
