//! Directory transport seam and the production `ldap3` implementation.
//!
//! Everything above this module talks to [`DirectoryConnector`] and
//! [`DirectorySession`]; only [`LdapConnector`] knows about `ldap3`.

use async_trait::async_trait;
use dirquery_core::config::DirectoryConfig;
use dirquery_core::error::{Error, SIZE_LIMIT_EXCEEDED_CODE};
use dirquery_core::Result;
use ldap3::{LdapConnAsync, LdapConnSettings, Scope, SearchEntry, SearchOptions};
use native_tls::TlsConnector;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::entry::DirectoryEntry;

/// The only LDAP protocol version the transport speaks.
pub const SUPPORTED_PROTOCOL_VERSION: u8 = 3;

/// Transport-level authentication type requested for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthType {
    /// Simple bind with a name and password.
    Basic,
    /// Anonymous bind.
    Anonymous,
    /// Kerberos.
    Kerberos,
    /// NTLM (down-level logon names).
    Ntlm,
    /// Negotiate (Kerberos with fallback).
    Negotiate,
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Basic => "basic",
            Self::Anonymous => "anonymous",
            Self::Kerberos => "kerberos",
            Self::Ntlm => "ntlm",
            Self::Negotiate => "negotiate",
        };
        f.write_str(name)
    }
}

/// Represents the search scope for LDAP queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Base object only.
    Base,
    /// One level below the base.
    OneLevel,
    /// Entire subtree.
    Subtree,
}

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

/// Options applied when opening a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// `ldap://host:port` or `ldaps://host:port`.
    pub url: String,
    /// Host part of the URL, used as the Kerberos service host.
    pub host: String,
    /// LDAP protocol version.
    pub protocol_version: u8,
    /// Whether the connection is TLS from the start.
    pub use_tls: bool,
    /// Whether the server certificate is verified.
    pub validate_certificate: bool,
    /// Whether referrals returned by the server should be followed.
    pub follow_referrals: bool,
    /// Authentication type the binds on this connection will use.
    pub auth_type: AuthType,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Per-operation timeout.
    pub operation_timeout: Duration,
}

impl ConnectionSettings {
    /// Derive settings from the directory configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the server URL cannot be built.
    pub fn from_config(config: &DirectoryConfig, auth_type: AuthType) -> Result<Self> {
        let url = config.ldap_url()?;
        let host = url.host_str().unwrap_or_default().to_string();
        Ok(Self {
            url: url.as_str().trim_end_matches('/').to_string(),
            host,
            protocol_version: config.protocol_version,
            use_tls: config.use_ssl,
            validate_certificate: config.validate_certificate,
            follow_referrals: config.follow_referrals,
            auth_type,
            connect_timeout: config.connection_timeout(),
            operation_timeout: config.timeout(),
        })
    }
}

/// Identity presented in a bind.
#[derive(Debug, Clone)]
pub enum BindCredential {
    /// Anonymous bind.
    Anonymous,
    /// Explicit name and password.
    Explicit {
        /// Account name, UPN or DN.
        username: String,
        /// Password.
        password: SecretString,
        /// Domain qualifying a bare account name.
        domain: Option<String>,
    },
    /// Identity of the running process.
    Ambient,
}

impl BindCredential {
    /// Explicit credential from a name and password.
    #[must_use]
    pub fn explicit(
        username: impl Into<String>,
        password: impl Into<String>,
        domain: Option<String>,
    ) -> Self {
        Self::Explicit {
            username: username.into(),
            password: SecretString::from(password.into()),
            domain,
        }
    }

    /// Name used for logging, never the password.
    #[must_use]
    pub fn principal_hint(&self) -> &str {
        match self {
            Self::Anonymous => "<anonymous>",
            Self::Explicit { username, .. } => username,
            Self::Ambient => "<ambient>",
        }
    }
}

/// One search operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Search base.
    pub base_dn: String,
    /// Search scope.
    pub scope: SearchScope,
    /// LDAP filter.
    pub filter: String,
    /// Attributes to return.
    pub attributes: Vec<String>,
    /// Maximum number of entries the server should return.
    pub size_limit: Option<u32>,
}

impl SearchRequest {
    /// Subtree search without a size limit.
    #[must_use]
    pub fn subtree(
        base_dn: impl Into<String>,
        filter: impl Into<String>,
        attributes: Vec<String>,
    ) -> Self {
        Self {
            base_dn: base_dn.into(),
            scope: SearchScope::Subtree,
            filter: filter.into(),
            attributes,
            size_limit: None,
        }
    }

    /// Base-object read of a single entry.
    #[must_use]
    pub fn base(base_dn: impl Into<String>, attributes: Vec<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
            scope: SearchScope::Base,
            filter: "(objectClass=*)".to_string(),
            attributes,
            size_limit: None,
        }
    }

    /// Caps the number of returned entries.
    #[must_use]
    pub const fn with_size_limit(mut self, size_limit: u32) -> Self {
        self.size_limit = Some(size_limit);
        self
    }
}

/// An open directory connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectorySession: Send + Sync {
    /// Authenticates the connection.
    async fn bind(&self, credential: &BindCredential) -> Result<()>;
    /// Runs a search; a size-limit-exceeded result is returned as the truncated entry list.
    async fn search(&self, request: &SearchRequest) -> Result<Vec<DirectoryEntry>>;
    /// Closes the connection.
    async fn unbind(&self) -> Result<()>;
}

/// Opens directory connections.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    /// Opens a new, unauthenticated connection.
    async fn connect(&self, settings: &ConnectionSettings) -> Result<Box<dyn DirectorySession>>;
}

/// Real LDAP connector backed by `ldap3`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LdapConnector;

impl LdapConnector {
    /// Creates a new connector instance.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DirectoryConnector for LdapConnector {
    async fn connect(&self, settings: &ConnectionSettings) -> Result<Box<dyn DirectorySession>> {
        if settings.protocol_version != SUPPORTED_PROTOCOL_VERSION {
            return Err(Error::Unsupported(format!(
                "LDAP protocol version {} (only {SUPPORTED_PROTOCOL_VERSION} is supported)",
                settings.protocol_version
            )));
        }

        let ldap_settings = build_ldap_settings(settings)?;
        let (conn, ldap) = LdapConnAsync::with_settings(ldap_settings, &settings.url)
            .await
            .map_err(map_ldap_error)?;
        ldap3::drive!(conn);
        debug!(url = %settings.url, auth_type = %settings.auth_type, "directory connection opened");

        Ok(Box::new(LdapSession {
            inner: ldap,
            host: settings.host.clone(),
            auth_type: settings.auth_type,
            follow_referrals: settings.follow_referrals,
            operation_timeout: settings.operation_timeout,
        }))
    }
}

struct LdapSession {
    inner: ldap3::Ldap,
    host: String,
    auth_type: AuthType,
    follow_referrals: bool,
    operation_timeout: Duration,
}

impl LdapSession {
    async fn with_timeout<F, T>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = ldap3::result::Result<T>>,
    {
        timeout(self.operation_timeout, fut)
            .await
            .map_err(|_| Error::Timeout(format!("directory {operation} timed out")))?
            .map_err(map_ldap_error)
    }

}

#[async_trait]
impl DirectorySession for LdapSession {
    async fn bind(&self, credential: &BindCredential) -> Result<()> {
        let mut ldap = self.inner.clone();
        let result = match credential {
            BindCredential::Anonymous => {
                self.with_timeout("bind", ldap.simple_bind("", "")).await?
            }
            BindCredential::Explicit {
                username,
                password,
                domain,
            } => {
                let name = bind_name(self.auth_type, username, domain.as_deref());
                self.with_timeout("bind", ldap.simple_bind(&name, password.expose_secret()))
                    .await?
            }
            BindCredential::Ambient => self.ambient_bind(&mut ldap).await?,
        };
        check_result(&result, None)
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<DirectoryEntry>> {
        let mut ldap = self.inner.clone();
        if let Some(limit) = request.size_limit {
            ldap.with_search_options(
                SearchOptions::new().sizelimit(i32::try_from(limit).unwrap_or(i32::MAX)),
            );
        }

        let ldap3::SearchResult(entries, result) = self
            .with_timeout(
                "search",
                ldap.search(
                    &request.base_dn,
                    request.scope.into(),
                    &request.filter,
                    request.attributes.clone(),
                ),
            )
            .await?;
        check_result(&result, request.size_limit)?;
        if result.rc == SIZE_LIMIT_EXCEEDED_CODE {
            debug!(
                filter = %request.filter,
                returned = entries.len(),
                "search truncated at size limit"
            );
        }

        let (references, entries): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(ldap3::ResultEntry::is_ref);
        if !references.is_empty() {
            debug!(
                count = references.len(),
                follow_referrals = self.follow_referrals,
                "skipping search continuation references"
            );
        }

        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(|entry| DirectoryEntry {
                dn: entry.dn,
                attributes: entry.attrs,
            })
            .collect())
    }

    async fn unbind(&self) -> Result<()> {
        let mut ldap = self.inner.clone();
        self.with_timeout("unbind", ldap.unbind()).await
    }
}

impl LdapSession {
    #[cfg(feature = "gssapi")]
    async fn ambient_bind(&self, ldap: &mut ldap3::Ldap) -> Result<ldap3::LdapResult> {
        self.with_timeout("bind", ldap.sasl_gssapi_bind(&self.host))
            .await
    }

    #[cfg(not(feature = "gssapi"))]
    async fn ambient_bind(&self, ldap: &mut ldap3::Ldap) -> Result<ldap3::LdapResult> {
        debug!(host = %self.host, "binding ambient identity with SASL EXTERNAL");
        self.with_timeout("bind", ldap.sasl_external_bind()).await
    }
}

fn build_ldap_settings(settings: &ConnectionSettings) -> Result<LdapConnSettings> {
    let mut ldap_settings = LdapConnSettings::new().set_conn_timeout(settings.connect_timeout);

    if settings.use_tls && !settings.validate_certificate {
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|err| {
                Error::ConfigError(format!("failed to construct TLS connector: {err}"))
            })?;
        ldap_settings = ldap_settings
            .set_connector(connector)
            .set_no_tls_verify(true);
    }

    Ok(ldap_settings)
}

/// Shapes the name sent in a simple bind for the requested mode.
///
/// Names that already carry a realm (`user@domain`, `DOMAIN\\user` or a DN) pass through.
fn bind_name(auth_type: AuthType, username: &str, domain: Option<&str>) -> String {
    if username.contains(['@', '\\', '=']) {
        return username.to_string();
    }
    match (domain, auth_type) {
        (Some(domain), AuthType::Ntlm) => format!("{domain}\\{username}"),
        (Some(domain), _) => format!("{username}@{domain}"),
        (None, _) => username.to_string(),
    }
}

/// Maps an LDAP result code onto the error taxonomy.
///
/// sizeLimitExceeded is only a success when the caller asked for a limit; otherwise the
/// server truncated the result on its own and the entries are incomplete.
fn check_result(result: &ldap3::LdapResult, size_limit: Option<u32>) -> Result<()> {
    match result.rc {
        0 => Ok(()),
        SIZE_LIMIT_EXCEEDED_CODE if size_limit.is_some() => Ok(()),
        SIZE_LIMIT_EXCEEDED_CODE => {
            warn!(message = %result.text, "server truncated an unlimited search");
            Err(Error::Directory {
                code: SIZE_LIMIT_EXCEEDED_CODE,
                message: format!("search truncated by server size limit: {}", result.text),
            })
        }
        code => Err(Error::Directory {
            code,
            message: result.text.clone(),
        }),
    }
}

fn map_ldap_error(err: ldap3::LdapError) -> Error {
    match err {
        ldap3::LdapError::LdapResult { result } => Error::Directory {
            code: result.rc,
            message: result.text,
        },
        expired @ ldap3::LdapError::Timeout { .. } => Error::Timeout(expired.to_string()),
        other => Error::Transport(other.to_string()),
    }
}
