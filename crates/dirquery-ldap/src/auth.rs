//! Multi-mode authentication.
//!
//! Each attempt opens its own short-lived connection, binds according to the selected
//! [`AuthenticationMethod`] and reports the outcome as an [`AuthenticationResult`]. A
//! rejected credential is a result, not an error; anything that prevents the attempt
//! from completing is an error.

use chrono::{DateTime, Utc};
use dirquery_core::config::DirectoryConfig;
use dirquery_core::error::INVALID_CREDENTIALS_CODE;
use dirquery_core::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::run_cancellable;
use crate::dn::common_name_of;
use crate::entry::DirectoryEntry;
use crate::filter::apply_template;
use crate::search::SearchExecutor;
use crate::telemetry::DirectoryTelemetry;
use crate::transport::{AuthType, BindCredential, ConnectionSettings, DirectoryConnector};

/// Error code reported for modes that are recognised but not available.
pub const NOT_IMPLEMENTED_CODE: &str = "NOT_IMPLEMENTED";

const UPN_LOOKUP_TEMPLATE: &str =
    "(&(objectClass=user)(objectCategory=person)(userPrincipalName={0}))";

const ENRICHMENT_ATTRIBUTES: &[&str] = &[
    "distinguishedName",
    "displayName",
    "mail",
    "userPrincipalName",
    "memberOf",
];

/// A name and password.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Account name, UPN, `DOMAIN\name` or DN.
    pub username: String,
    /// Password.
    pub password: SecretString,
    /// Domain qualifying a bare account name; the configured domain when absent.
    pub domain: Option<String>,
}

impl Credentials {
    /// Creates credentials without an explicit domain.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
            domain: None,
        }
    }

    /// Sets the domain.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() {
            return Err(Error::InvalidRequest("username must not be empty".to_string()));
        }
        if self.password.expose_secret().is_empty() {
            return Err(Error::InvalidRequest("password must not be empty".to_string()));
        }
        Ok(())
    }
}

/// How to authenticate; each mode carries only what it needs.
#[derive(Debug, Clone)]
pub enum AuthenticationMethod {
    /// Simple bind with a name and password.
    Simple {
        /// Credentials to bind with.
        credentials: Credentials,
    },
    /// Anonymous bind.
    Anonymous,
    /// Kerberos with explicit credentials, or the ambient identity.
    Kerberos {
        /// Explicit credentials, if any.
        credentials: Option<Credentials>,
    },
    /// NTLM with explicit credentials, or the ambient identity.
    Ntlm {
        /// Explicit credentials, if any.
        credentials: Option<Credentials>,
    },
    /// Negotiate with explicit credentials, or the ambient identity.
    Negotiate {
        /// Explicit credentials, if any.
        credentials: Option<Credentials>,
    },
    /// Always the identity of the running process.
    IntegratedAmbient,
    /// Client certificate. Not available; always reported as a failure.
    Certificate {
        /// DER-encoded client certificate.
        certificate: Vec<u8>,
    },
}

impl AuthenticationMethod {
    /// Mode tag of this method.
    #[must_use]
    pub const fn mode(&self) -> AuthenticationMode {
        match self {
            Self::Simple { .. } => AuthenticationMode::Simple,
            Self::Anonymous => AuthenticationMode::Anonymous,
            Self::Kerberos { .. } => AuthenticationMode::Kerberos,
            Self::Ntlm { .. } => AuthenticationMode::Ntlm,
            Self::Negotiate { .. } => AuthenticationMode::Negotiate,
            Self::IntegratedAmbient => AuthenticationMode::IntegratedAmbient,
            Self::Certificate { .. } => AuthenticationMode::Certificate,
        }
    }
}

/// Authentication mode tag carried by results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationMode {
    /// Simple bind.
    Simple,
    /// Anonymous bind.
    Anonymous,
    /// Kerberos.
    Kerberos,
    /// NTLM.
    Ntlm,
    /// Negotiate.
    Negotiate,
    /// Ambient process identity.
    IntegratedAmbient,
    /// Client certificate.
    Certificate,
}

impl fmt::Display for AuthenticationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Simple => "simple",
            Self::Anonymous => "anonymous",
            Self::Kerberos => "kerberos",
            Self::Ntlm => "ntlm",
            Self::Negotiate => "negotiate",
            Self::IntegratedAmbient => "integrated_ambient",
            Self::Certificate => "certificate",
        };
        f.write_str(name)
    }
}

/// Method plus enrichment switches.
#[derive(Debug, Clone)]
pub struct AuthenticationOptions {
    /// How to authenticate.
    pub method: AuthenticationMethod,
    /// Copy the user's group names into the result.
    pub include_groups: bool,
    /// Extra attributes to copy into the result's claims.
    pub claim_attributes: Vec<String>,
}

impl AuthenticationOptions {
    /// Options for `method` without enrichment.
    #[must_use]
    pub fn new(method: AuthenticationMethod) -> Self {
        Self {
            method,
            include_groups: false,
            claim_attributes: Vec::new(),
        }
    }

    /// Simple bind with a name and password.
    #[must_use]
    pub fn simple(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(AuthenticationMethod::Simple {
            credentials: Credentials::new(username, password),
        })
    }

    /// Requests group enrichment.
    #[must_use]
    pub const fn with_groups(mut self, include_groups: bool) -> Self {
        self.include_groups = include_groups;
        self
    }

    /// Requests claim enrichment for the given attributes.
    #[must_use]
    pub fn with_claim_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.claim_attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    /// Checks the mode-specific fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] for an empty username or password, an empty
    /// certificate, or a blank claim attribute name.
    pub fn validate(&self) -> Result<()> {
        match &self.method {
            AuthenticationMethod::Simple { credentials } => credentials.validate()?,
            AuthenticationMethod::Kerberos { credentials }
            | AuthenticationMethod::Ntlm { credentials }
            | AuthenticationMethod::Negotiate { credentials } => {
                if let Some(credentials) = credentials {
                    credentials.validate()?;
                }
            }
            AuthenticationMethod::Certificate { certificate } => {
                if certificate.is_empty() {
                    return Err(Error::InvalidRequest(
                        "certificate must not be empty".to_string(),
                    ));
                }
            }
            AuthenticationMethod::Anonymous | AuthenticationMethod::IntegratedAmbient => {}
        }
        if self
            .claim_attributes
            .iter()
            .any(|attribute| attribute.trim().is_empty())
        {
            return Err(Error::InvalidRequest(
                "claim attribute names must not be blank".to_string(),
            ));
        }
        Ok(())
    }

    fn wants_enrichment(&self) -> bool {
        self.include_groups || !self.claim_attributes.is_empty()
    }
}

/// Outcome of one authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationResult {
    /// True when the directory accepted the identity.
    pub authenticated: bool,
    /// Mode the attempt used.
    pub mode: AuthenticationMode,
    /// Resolved username.
    pub username: Option<String>,
    /// Distinguished name of the user entry.
    pub distinguished_name: Option<String>,
    /// Display name.
    pub display_name: Option<String>,
    /// Email address.
    pub email: Option<String>,
    /// User principal name.
    pub user_principal_name: Option<String>,
    /// Group common names, when requested.
    pub groups: Option<Vec<String>>,
    /// Requested claim attributes and their values.
    pub claims: Option<BTreeMap<String, Vec<String>>>,
    /// Why authentication failed.
    pub error_message: Option<String>,
    /// Coarse failure code (`"49"`, `"NOT_IMPLEMENTED"`).
    pub error_code: Option<String>,
    /// When the attempt was made.
    pub attempted_at: DateTime<Utc>,
}

impl AuthenticationResult {
    /// A successful attempt without identity details.
    #[must_use]
    pub fn success(mode: AuthenticationMode, username: Option<String>) -> Self {
        Self {
            authenticated: true,
            mode,
            username,
            distinguished_name: None,
            display_name: None,
            email: None,
            user_principal_name: None,
            groups: None,
            claims: None,
            error_message: None,
            error_code: None,
            attempted_at: Utc::now(),
        }
    }

    /// A rejected attempt.
    #[must_use]
    pub fn failure(
        mode: AuthenticationMode,
        username: Option<String>,
        message: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            authenticated: false,
            error_message: Some(message.into()),
            error_code: Some(code.into()),
            ..Self::success(mode, username)
        }
    }

    fn apply_enrichment(
        &mut self,
        entry: &DirectoryEntry,
        include_groups: bool,
        claim_attributes: &[String],
    ) {
        self.distinguished_name = Some(entry.dn.clone());
        self.display_name = entry.first_owned("displayName");
        self.email = entry.first_owned("mail");
        self.user_principal_name = entry.first_owned("userPrincipalName");
        if include_groups {
            self.groups = Some(
                entry
                    .all_owned("memberOf")
                    .iter()
                    .filter_map(|dn| common_name_of(dn))
                    .collect(),
            );
        }
        if !claim_attributes.is_empty() {
            self.claims = Some(
                claim_attributes
                    .iter()
                    .filter(|name| entry.has(name))
                    .map(|name| (name.clone(), entry.all_owned(name)))
                    .collect(),
            );
        }
    }
}

/// Name of the identity the process runs as.
fn ambient_username() -> Option<String> {
    std::env::var("USERNAME")
        .or_else(|_| std::env::var("USER"))
        .ok()
        .filter(|name| !name.trim().is_empty())
}

/// Runs authentication attempts.
pub struct AuthenticationDispatcher {
    config: Arc<DirectoryConfig>,
    connector: Arc<dyn DirectoryConnector>,
    executor: Arc<SearchExecutor>,
    telemetry: Arc<dyn DirectoryTelemetry>,
}

impl AuthenticationDispatcher {
    /// Creates a dispatcher. `executor` serves enrichment lookups.
    #[must_use]
    pub fn new(
        config: Arc<DirectoryConfig>,
        connector: Arc<dyn DirectoryConnector>,
        executor: Arc<SearchExecutor>,
        telemetry: Arc<dyn DirectoryTelemetry>,
    ) -> Self {
        Self {
            config,
            connector,
            executor,
            telemetry,
        }
    }

    /// Authenticates according to `options`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] for malformed options (before any network I/O),
    /// [`Error::Cancelled`] when `cancel` fires during the bind, and transport,
    /// directory or timeout errors for failures other than a rejected credential.
    pub async fn authenticate(
        &self,
        options: &AuthenticationOptions,
        cancel: &CancellationToken,
    ) -> Result<AuthenticationResult> {
        options.validate()?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let started = Instant::now();
        let mode = options.method.mode();
        let (auth_type, credential, username) = match &options.method {
            AuthenticationMethod::Simple { credentials } => (
                AuthType::Basic,
                self.explicit(credentials),
                Some(credentials.username.clone()),
            ),
            AuthenticationMethod::Anonymous => {
                (AuthType::Anonymous, BindCredential::Anonymous, None)
            }
            AuthenticationMethod::Kerberos { credentials } => {
                self.explicit_or_ambient(AuthType::Kerberos, credentials.as_ref())
            }
            AuthenticationMethod::Ntlm { credentials } => {
                self.explicit_or_ambient(AuthType::Ntlm, credentials.as_ref())
            }
            AuthenticationMethod::Negotiate { credentials } => {
                self.explicit_or_ambient(AuthType::Negotiate, credentials.as_ref())
            }
            AuthenticationMethod::IntegratedAmbient => {
                (AuthType::Negotiate, BindCredential::Ambient, ambient_username())
            }
            AuthenticationMethod::Certificate { .. } => {
                let result = AuthenticationResult::failure(
                    mode,
                    None,
                    "certificate authentication is not implemented",
                    NOT_IMPLEMENTED_CODE,
                );
                self.report(&result, started);
                return Ok(result);
            }
        };

        match self.bind(auth_type, &credential, cancel).await {
            Ok(()) => {}
            Err(err) if err.is_invalid_credentials() => {
                debug!(%mode, principal = credential.principal_hint(), "credential rejected");
                let result = AuthenticationResult::failure(
                    mode,
                    username,
                    "invalid credentials",
                    INVALID_CREDENTIALS_CODE.to_string(),
                );
                self.report(&result, started);
                return Ok(result);
            }
            Err(err) => return Err(err),
        }

        let mut result = AuthenticationResult::success(mode, username);
        if options.wants_enrichment() {
            if let Some(username) = result.username.clone() {
                self.enrich(&mut result, &username, options, cancel).await;
            }
        }
        self.report(&result, started);
        Ok(result)
    }

    fn explicit(&self, credentials: &Credentials) -> BindCredential {
        BindCredential::Explicit {
            username: credentials.username.clone(),
            password: credentials.password.clone(),
            domain: credentials
                .domain
                .clone()
                .or_else(|| Some(self.config.domain.clone())),
        }
    }

    fn explicit_or_ambient(
        &self,
        auth_type: AuthType,
        credentials: Option<&Credentials>,
    ) -> (AuthType, BindCredential, Option<String>) {
        match credentials {
            Some(credentials) => (
                auth_type,
                self.explicit(credentials),
                Some(credentials.username.clone()),
            ),
            None => (auth_type, BindCredential::Ambient, ambient_username()),
        }
    }

    async fn bind(
        &self,
        auth_type: AuthType,
        credential: &BindCredential,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let settings = ConnectionSettings::from_config(&self.config, auth_type)?;
        let session = run_cancellable(
            cancel,
            settings.connect_timeout,
            "connect",
            self.connector.connect(&settings),
        )
        .await?;
        let outcome = run_cancellable(
            cancel,
            settings.operation_timeout,
            "bind",
            session.bind(credential),
        )
        .await;
        if !matches!(outcome, Err(Error::Cancelled)) {
            if let Err(err) = session.unbind().await {
                debug!(error = %err, "unbind after authentication failed");
            }
        }
        outcome
    }

    async fn enrich(
        &self,
        result: &mut AuthenticationResult,
        username: &str,
        options: &AuthenticationOptions,
        cancel: &CancellationToken,
    ) {
        let filter = if username.contains('@') {
            apply_template(UPN_LOOKUP_TEMPLATE, username)
        } else {
            let account = username.rsplit('\\').next().unwrap_or(username);
            apply_template(&self.config.user_filter_template, account)
        };
        let mut attributes: Vec<String> = ENRICHMENT_ATTRIBUTES
            .iter()
            .map(|attribute| (*attribute).to_string())
            .collect();
        for name in &options.claim_attributes {
            if !attributes.iter().any(|a| a.eq_ignore_ascii_case(name)) {
                attributes.push(name.clone());
            }
        }

        match self.executor.find_entry(&filter, attributes, cancel).await {
            Ok(Some(entry)) => {
                result.apply_enrichment(&entry, options.include_groups, &options.claim_attributes);
            }
            Ok(None) => debug!(username, "no directory entry found for enrichment"),
            Err(err) => warn!(username, error = %err, "authentication enrichment failed"),
        }
    }

    fn report(&self, result: &AuthenticationResult, started: Instant) {
        self.telemetry.authentication_completed(
            &result.mode.to_string(),
            result.username.as_deref(),
            result.authenticated,
            started.elapsed(),
        );
    }
}
