//! LDAP filter assembly and value escaping.
//!
//! [`FilterBuilder`] collects one clause per supplied criterion and renders a single
//! AND-conjunction. Values are escaped per RFC 4515; wildcard-bearing clauses keep `*`
//! so callers can express substring matches.

use dirquery_core::config::TEMPLATE_PLACEHOLDER;

/// OID of the bitwise-AND matching rule (`LDAP_MATCHING_RULE_BIT_AND`).
pub const BIT_AND_RULE: &str = "1.2.840.113556.1.4.803";

/// Escapes a value for an exact-match clause (`*` is escaped too).
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    escape(value, true)
}

/// Escapes a value for a wildcard-bearing clause (literal `*` is preserved).
#[must_use]
pub fn escape_filter_value_wildcard(value: &str) -> String {
    escape(value, false)
}

fn escape(value: &str, escape_asterisk: bool) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\5c"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\0' => escaped.push_str("\\00"),
            '*' if escape_asterisk => escaped.push_str("\\2a"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Substitutes the exact-escaped `value` into every `{0}` placeholder of `template`.
#[must_use]
pub fn apply_template(template: &str, value: &str) -> String {
    template.replace(TEMPLATE_PLACEHOLDER, &escape_filter_value(value))
}

/// Builder for a single AND-conjunction of filter clauses.
#[derive(Debug, Default, Clone)]
pub struct FilterBuilder {
    clauses: Vec<String>,
}

impl FilterBuilder {
    /// Create a builder seeded with the object-class constraint clauses.
    #[must_use]
    pub fn new(object_class: &[&str]) -> Self {
        Self {
            clauses: object_class.iter().map(|clause| (*clause).to_string()).collect(),
        }
    }

    /// Append `(attribute=value)` with wildcard-preserving escaping when the value is
    /// present and non-empty.
    pub fn push_wildcard(&mut self, attribute: &str, value: Option<&str>) {
        if let Some(value) = non_empty(value) {
            self.clauses.push(format!(
                "({attribute}={})",
                escape_filter_value_wildcard(value)
            ));
        }
    }

    /// Append `(attribute=value)` with exact escaping when the value is present and
    /// non-empty.
    pub fn push_exact(&mut self, attribute: &str, value: Option<&str>) {
        if let Some(value) = non_empty(value) {
            self.clauses
                .push(format!("({attribute}={})", escape_filter_value(value)));
        }
    }

    /// Append a bitwise-AND clause testing `bit` in `attribute`.
    ///
    /// `Some(true)` requires the bit set, `Some(false)` requires it clear.
    pub fn push_bit(&mut self, attribute: &str, bit: u32, set: Option<bool>) {
        if let Some(set) = set {
            let clause = format!("({attribute}:{BIT_AND_RULE}:={bit})");
            if set {
                self.clauses.push(clause);
            } else {
                self.clauses.push(format!("(!{clause})"));
            }
        }
    }

    /// Append one OR group of exact `(attribute=value)` clauses; empty values are skipped
    /// and nothing is appended when none remain.
    pub fn push_any_of(&mut self, attribute: &str, values: &[String]) {
        let alternatives = values
            .iter()
            .filter_map(|value| non_empty(Some(value.as_str())))
            .map(|value| format!("({attribute}={})", escape_filter_value(value)))
            .collect::<Vec<_>>();
        if !alternatives.is_empty() {
            self.clauses.push(format!("(|{})", alternatives.concat()));
        }
    }

    /// Append an already-rendered clause as-is.
    pub fn push_clause(&mut self, clause: impl Into<String>) {
        self.clauses.push(clause.into());
    }

    /// Append a caller-supplied raw filter fragment verbatim.
    ///
    /// The fragment is not escaped; it is only wrapped in parentheses when it lacks them.
    pub fn push_raw(&mut self, fragment: Option<&str>) {
        if let Some(fragment) = non_empty(fragment) {
            let fragment = fragment.trim();
            if fragment.starts_with('(') && fragment.ends_with(')') {
                self.clauses.push(fragment.to_string());
            } else {
                self.clauses.push(format!("({fragment})"));
            }
        }
    }

    /// Number of collected clauses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    /// Returns true if no clauses have been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Render the conjunction. A lone clause is returned without an `(&...)` wrapper.
    #[must_use]
    pub fn build(self) -> String {
        match self.clauses.len() {
            0 => "(objectClass=*)".to_string(),
            1 => self.clauses.into_iter().next().unwrap_or_default(),
            _ => format!("(&{})", self.clauses.concat()),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}
