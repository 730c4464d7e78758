//! Configuration structures for directory clients.
//!
//! [`DirectoryConfig`] is the consumed configuration surface: it can be deserialized from
//! any serde format or assembled with the `with_*` builders, and must pass
//! [`DirectoryConfig::validated`] before a client accepts it.

use crate::Error;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::warn;
use url::Url;
use validator::Validate;

/// Default plain LDAP port.
pub const DEFAULT_LDAP_PORT: u16 = 389;
/// Default LDAPS port.
pub const DEFAULT_LDAPS_PORT: u16 = 636;
/// Default per-operation timeout (seconds).
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;
/// Default connection timeout (seconds).
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 10;
/// Default upper bound for a requested page size.
pub const DEFAULT_MAX_PAGE_SIZE: u32 = 1000;
/// Placeholder substituted into lookup filter templates.
pub const TEMPLATE_PLACEHOLDER: &str = "{0}";

/// Configuration for a directory service client.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DirectoryConfig {
    /// DNS domain name of the directory (e.g. `corp.example.com`)
    #[validate(length(min = 1, message = "domain must not be empty"))]
    pub domain: String,

    /// Explicit server address; the domain name is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,

    /// Explicit port; defaults to 389, or 636 when TLS is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Search base distinguished name; derived from the domain when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dn: Option<String>,

    /// LDAP protocol version
    #[validate(range(min = 3, max = 3, message = "only LDAPv3 is supported"))]
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u8,

    /// Whether to connect over TLS (LDAPS)
    #[serde(default)]
    pub use_ssl: bool,

    /// Whether to verify the server certificate
    #[serde(default = "default_validate_certificate")]
    pub validate_certificate: bool,

    /// Whether referrals returned by the server should be followed
    #[serde(default)]
    pub follow_referrals: bool,

    /// Bind the long-lived connection as the process identity
    #[serde(default)]
    pub use_current_identity: bool,

    /// Service account username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Service account password
    #[serde(
        default,
        skip_serializing,
        deserialize_with = "deserialize_optional_secret"
    )]
    pub password: Option<SecretString>,

    /// Per-operation timeout in seconds
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Connection establishment timeout in seconds
    #[validate(range(min = 1, max = 120))]
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,

    /// Extension attribute names copied into each record's custom attribute bag
    #[serde(default)]
    pub custom_attributes: Vec<String>,

    /// Filter template for username lookups (`{0}` is replaced by the escaped username)
    #[serde(default = "default_user_filter_template")]
    pub user_filter_template: String,

    /// Filter template for email lookups (`{0}` is replaced by the escaped address)
    #[serde(default = "default_email_filter_template")]
    pub email_filter_template: String,

    /// Largest page size accepted by paged searches
    #[validate(range(min = 1, max = 100_000))]
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
}

const fn default_protocol_version() -> u8 {
    3
}

const fn default_validate_certificate() -> bool {
    true
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_OPERATION_TIMEOUT_SECS
}

const fn default_connection_timeout_secs() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_SECS
}

const fn default_max_page_size() -> u32 {
    DEFAULT_MAX_PAGE_SIZE
}

fn default_user_filter_template() -> String {
    "(&(objectClass=user)(objectCategory=person)(sAMAccountName={0}))".to_string()
}

fn default_email_filter_template() -> String {
    "(&(objectClass=user)(objectCategory=person)(mail={0}))".to_string()
}

fn deserialize_optional_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

impl DirectoryConfig {
    /// Creates a configuration for `domain` with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the domain is empty.
    pub fn new(domain: impl Into<String>) -> Result<Self, Error> {
        let config = Self {
            domain: domain.into(),
            server: None,
            port: None,
            base_dn: None,
            protocol_version: default_protocol_version(),
            use_ssl: false,
            validate_certificate: default_validate_certificate(),
            follow_referrals: false,
            use_current_identity: false,
            username: None,
            password: None,
            timeout_secs: default_timeout_secs(),
            connection_timeout_secs: default_connection_timeout_secs(),
            custom_attributes: Vec::new(),
            user_filter_template: default_user_filter_template(),
            email_filter_template: default_email_filter_template(),
            max_page_size: default_max_page_size(),
        };

        config.validated()
    }

    /// Runs field validation plus cross-field checks and returns the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] describing the first problem found.
    pub fn validated(self) -> Result<Self, Error> {
        self.validate()
            .map_err(|e| Error::ConfigError(format!("Invalid configuration: {e}")))?;

        if self.domain.trim().is_empty() {
            return Err(Error::ConfigError("domain must not be blank".to_string()));
        }
        if matches!(&self.server, Some(server) if server.trim().is_empty()) {
            return Err(Error::ConfigError(
                "server must not be blank when provided".to_string(),
            ));
        }
        if self.username.is_some() && self.password().map_or(true, str::is_empty) {
            return Err(Error::ConfigError(
                "a service username requires a non-empty password".to_string(),
            ));
        }
        for (name, template) in [
            ("user_filter_template", &self.user_filter_template),
            ("email_filter_template", &self.email_filter_template),
        ] {
            if !template.contains(TEMPLATE_PLACEHOLDER) {
                return Err(Error::ConfigError(format!(
                    "{name} must contain the {TEMPLATE_PLACEHOLDER} placeholder"
                )));
            }
        }
        if self
            .custom_attributes
            .iter()
            .any(|attribute| attribute.trim().is_empty())
        {
            return Err(Error::ConfigError(
                "custom attribute names must not be blank".to_string(),
            ));
        }

        self.ldap_url()?;

        if self.use_ssl && !self.validate_certificate {
            warn!(
                domain = %self.domain,
                "TLS certificate validation disabled for directory connection"
            );
        }

        Ok(self)
    }

    /// Set an explicit server address.
    #[must_use]
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Set an explicit port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the search base distinguished name.
    #[must_use]
    pub fn with_base_dn(mut self, base_dn: impl Into<String>) -> Self {
        self.base_dn = Some(base_dn.into());
        self
    }

    /// Enable or disable LDAPS.
    #[must_use]
    pub const fn with_ssl(mut self, use_ssl: bool) -> Self {
        self.use_ssl = use_ssl;
        self
    }

    /// Enable or disable server certificate validation.
    #[must_use]
    pub const fn with_certificate_validation(mut self, validate: bool) -> Self {
        self.validate_certificate = validate;
        self
    }

    /// Enable or disable referral following.
    #[must_use]
    pub const fn with_referrals(mut self, follow: bool) -> Self {
        self.follow_referrals = follow;
        self
    }

    /// Bind the shared connection as the process identity.
    #[must_use]
    pub const fn with_current_identity(mut self, enabled: bool) -> Self {
        self.use_current_identity = enabled;
        self
    }

    /// Set explicit service account credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Set the per-operation timeout in seconds.
    #[must_use]
    pub const fn with_timeout_secs(mut self, seconds: u64) -> Self {
        self.timeout_secs = seconds;
        self
    }

    /// Set the connection timeout in seconds.
    #[must_use]
    pub const fn with_connection_timeout_secs(mut self, seconds: u64) -> Self {
        self.connection_timeout_secs = seconds;
        self
    }

    /// Set the custom attribute allow-list.
    #[must_use]
    pub fn with_custom_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.custom_attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    /// Override the username lookup template.
    #[must_use]
    pub fn with_user_filter_template(mut self, template: impl Into<String>) -> Self {
        self.user_filter_template = template.into();
        self
    }

    /// Override the email lookup template.
    #[must_use]
    pub fn with_email_filter_template(mut self, template: impl Into<String>) -> Self {
        self.email_filter_template = template.into();
        self
    }

    /// Override the maximum accepted page size.
    #[must_use]
    pub const fn with_max_page_size(mut self, max_page_size: u32) -> Self {
        self.max_page_size = max_page_size;
        self
    }

    /// Host to connect to: the explicit server, else the domain name.
    #[must_use]
    pub fn server_address(&self) -> &str {
        self.server.as_deref().unwrap_or(&self.domain)
    }

    /// Port to connect to.
    #[must_use]
    pub const fn effective_port(&self) -> u16 {
        match self.port {
            Some(port) => port,
            None if self.use_ssl => DEFAULT_LDAPS_PORT,
            None => DEFAULT_LDAP_PORT,
        }
    }

    /// Search base: the configured base DN, else `DC=` components of the domain.
    #[must_use]
    pub fn effective_base_dn(&self) -> String {
        match &self.base_dn {
            Some(base_dn) if !base_dn.trim().is_empty() => base_dn.clone(),
            _ => base_dn_from_domain(&self.domain),
        }
    }

    /// Service password, if configured.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_ref().map(|secret| secret.expose_secret())
    }

    /// Per-operation timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Connection timeout.
    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Build the `ldap://` or `ldaps://` URL for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the server address does not form a valid URL.
    pub fn ldap_url(&self) -> Result<Url, Error> {
        let scheme = if self.use_ssl { "ldaps" } else { "ldap" };
        let url = Url::parse(&format!(
            "{scheme}://{}:{}",
            self.server_address().trim(),
            self.effective_port()
        ))?;
        if url.host_str().is_none() {
            return Err(Error::ConfigError(format!(
                "server address `{}` has no host",
                self.server_address()
            )));
        }
        Ok(url)
    }
}

/// Derive a base distinguished name from a DNS domain (`corp.example.com` →
/// `DC=corp,DC=example,DC=com`).
#[must_use]
pub fn base_dn_from_domain(domain: &str) -> String {
    domain
        .trim()
        .trim_end_matches('.')
        .split('.')
        .filter(|label| !label.is_empty())
        .map(|label| format!("DC={label}"))
        .collect::<Vec<_>>()
        .join(",")
}
