//! Public operation surface.
//!
//! [`DirectoryService`] ties the pieces together: criteria become filters, filters run
//! through the shared connection, entries become records. Every operation checks
//! disposal and cancellation first and reports protocol-level failures as
//! [`Error::OperationFailed`] naming the operation.

use dirquery_core::config::DirectoryConfig;
use dirquery_core::{Error, Result};
use secrecy::SecretString;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::auth::{
    AuthenticationDispatcher, AuthenticationMethod, AuthenticationOptions, AuthenticationResult,
    Credentials,
};
use crate::computer::Computer;
use crate::connection::ConnectionManager;
use crate::criteria::{
    ComputerSearchCriteria, GroupSearchCriteria, UserSearchCriteria, COMPUTER_OBJECT_CLASS,
    GROUP_OBJECT_CLASS, USER_OBJECT_CLASS,
};
use crate::filter::{apply_template, escape_filter_value, FilterBuilder};
use crate::group::Group;
use crate::paging::PagedResult;
use crate::search::SearchExecutor;
use crate::telemetry::{DirectoryTelemetry, TracingTelemetry};
use crate::transport::{DirectoryConnector, LdapConnector};
use crate::user::User;

/// Number of records an operation produced, for telemetry.
trait Tally {
    fn tally(&self) -> usize;
}

impl<T> Tally for Option<T> {
    fn tally(&self) -> usize {
        usize::from(self.is_some())
    }
}

impl<T> Tally for Vec<T> {
    fn tally(&self) -> usize {
        self.len()
    }
}

impl<T> Tally for PagedResult<T> {
    fn tally(&self) -> usize {
        self.items.len()
    }
}

impl Tally for bool {
    fn tally(&self) -> usize {
        usize::from(*self)
    }
}

/// Directory query and authentication client.
pub struct DirectoryService {
    config: Arc<DirectoryConfig>,
    connector: Arc<dyn DirectoryConnector>,
    telemetry: Arc<dyn DirectoryTelemetry>,
    connection: Arc<ConnectionManager>,
    executor: Arc<SearchExecutor>,
    authenticator: AuthenticationDispatcher,
}

impl DirectoryService {
    /// Creates a service that talks LDAP and reports through `tracing`.
    ///
    /// # Errors
    ///
    /// Returns a configuration or validation error when `config` is invalid.
    pub fn new(config: DirectoryConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(LdapConnector::new()))
    }

    /// Creates a service over a custom transport.
    ///
    /// # Errors
    ///
    /// Returns a configuration or validation error when `config` is invalid.
    pub fn with_connector(
        config: DirectoryConfig,
        connector: Arc<dyn DirectoryConnector>,
    ) -> Result<Self> {
        let config = Arc::new(config.validated()?);
        Ok(Self::assemble(config, connector, Arc::new(TracingTelemetry)))
    }

    /// Replaces the telemetry hooks. Call before issuing operations: the shared
    /// connection is rebuilt.
    #[must_use]
    pub fn with_telemetry(self, telemetry: Arc<dyn DirectoryTelemetry>) -> Self {
        Self::assemble(self.config, self.connector, telemetry)
    }

    fn assemble(
        config: Arc<DirectoryConfig>,
        connector: Arc<dyn DirectoryConnector>,
        telemetry: Arc<dyn DirectoryTelemetry>,
    ) -> Self {
        let connection = Arc::new(ConnectionManager::new(
            Arc::clone(&config),
            Arc::clone(&connector),
            Arc::clone(&telemetry),
        ));
        let executor = Arc::new(SearchExecutor::new(
            Arc::clone(&connection),
            Arc::clone(&telemetry),
        ));
        let authenticator = AuthenticationDispatcher::new(
            Arc::clone(&config),
            Arc::clone(&connector),
            Arc::clone(&executor),
            Arc::clone(&telemetry),
        );
        Self {
            config,
            connector,
            telemetry,
            connection,
            executor,
            authenticator,
        }
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Returns true once [`DirectoryService::dispose`] has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.connection.is_disposed()
    }

    /// Looks a user up by logon name.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] for a blank name, otherwise see [`DirectoryService`].
    pub async fn get_user(
        &self,
        username: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<User>> {
        require("username", username)?;
        let filter = apply_template(&self.config.user_filter_template, username);
        self.observe("get_user", &filter, cancel, self.executor.find_one(&filter, cancel))
            .await
    }

    /// Looks a user up by email address.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] for a blank address, otherwise see [`DirectoryService`].
    pub async fn get_user_by_email(
        &self,
        email: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<User>> {
        require("email", email)?;
        let filter = apply_template(&self.config.email_filter_template, email);
        self.observe(
            "get_user_by_email",
            &filter,
            cancel,
            self.executor.find_one(&filter, cancel),
        )
        .await
    }

    /// Returns one page of users matching `criteria`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] when the page bounds are out of range.
    pub async fn search_users(
        &self,
        criteria: &UserSearchCriteria,
        page: u32,
        page_size: u32,
        cancel: &CancellationToken,
    ) -> Result<PagedResult<User>> {
        self.validate_page(page, page_size)?;
        let filter = criteria.to_filter();
        self.observe(
            "search_users",
            &filter,
            cancel,
            self.executor.search_paged(&filter, page, page_size, cancel),
        )
        .await
    }

    /// Looks a group up by common name or account name.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] for a blank name, otherwise see [`DirectoryService`].
    pub async fn get_group(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Group>> {
        require("group name", name)?;
        let filter = named_filter(GROUP_OBJECT_CLASS, name, &[]);
        self.observe("get_group", &filter, cancel, self.executor.find_one(&filter, cancel))
            .await
    }

    /// Returns one page of groups matching `criteria`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] when the page bounds are out of range.
    pub async fn search_groups(
        &self,
        criteria: &GroupSearchCriteria,
        page: u32,
        page_size: u32,
        cancel: &CancellationToken,
    ) -> Result<PagedResult<Group>> {
        self.validate_page(page, page_size)?;
        let filter = criteria.to_filter();
        self.observe(
            "search_groups",
            &filter,
            cancel,
            self.executor.search_paged(&filter, page, page_size, cancel),
        )
        .await
    }

    /// Direct user members of a group. Empty when the group does not exist.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] for a blank name, otherwise see [`DirectoryService`].
    pub async fn get_group_members(
        &self,
        group_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<User>> {
        require("group name", group_name)?;
        let group_filter = named_filter(GROUP_OBJECT_CLASS, group_name, &[]);
        self.observe("get_group_members", &group_filter, cancel, async {
            let Some(group) = self
                .executor
                .find_entry(&group_filter, vec!["distinguishedName".to_string()], cancel)
                .await?
            else {
                debug!(group = group_name, "group not found");
                return Ok(Vec::new());
            };
            let mut members = FilterBuilder::new(USER_OBJECT_CLASS);
            members.push_exact("memberOf", Some(group.dn.as_str()));
            let users: Vec<User> = self.executor.find_all(&members.build(), None, cancel).await?;
            Ok(users)
        })
        .await
    }

    /// Groups a user is a direct member of. Empty when the user does not exist.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] for a blank name, otherwise see [`DirectoryService`].
    pub async fn get_user_groups(
        &self,
        username: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Group>> {
        require("username", username)?;
        let user_filter = apply_template(&self.config.user_filter_template, username);
        self.observe("get_user_groups", &user_filter, cancel, async {
            let Some(user) = self.executor.find_one::<User>(&user_filter, cancel).await? else {
                debug!(username, "user not found");
                return Ok(Vec::new());
            };
            if user.member_of.is_empty() {
                return Ok(Vec::new());
            }
            let mut groups = FilterBuilder::new(GROUP_OBJECT_CLASS);
            groups.push_any_of("distinguishedName", &user.member_of);
            let found: Vec<Group> = self.executor.find_all(&groups.build(), None, cancel).await?;
            Ok(found)
        })
        .await
    }

    /// Returns true when the user is a direct member of the named group.
    ///
    /// The group name is matched against the common names in `memberOf` first; when none
    /// matches, the group is resolved by `cn` or `sAMAccountName` and compared by DN.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] for blank names, otherwise see [`DirectoryService`].
    pub async fn is_user_in_group(
        &self,
        username: &str,
        group_name: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        require("username", username)?;
        require("group name", group_name)?;
        let filter = apply_template(&self.config.user_filter_template, username);
        self.observe("is_user_in_group", &filter, cancel, async {
            let Some(user) = self.executor.find_one::<User>(&filter, cancel).await? else {
                return Ok(false);
            };
            if user.in_group(group_name) {
                return Ok(true);
            }
            let group_filter = named_filter(GROUP_OBJECT_CLASS, group_name, &[]);
            let group: Option<Group> = self.executor.find_one(&group_filter, cancel).await?;
            Ok(group.is_some_and(|group| {
                user.member_of.iter().any(|dn| dn.eq_ignore_ascii_case(&group.dn))
            }))
        })
        .await
    }

    /// Looks a computer up by name, with or without the trailing `$`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] for a blank name, otherwise see [`DirectoryService`].
    pub async fn get_computer(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Computer>> {
        require("computer name", name)?;
        let account = if name.ends_with('$') {
            name.to_string()
        } else {
            format!("{name}$")
        };
        let filter = named_filter(COMPUTER_OBJECT_CLASS, name, &[account.as_str()]);
        self.observe(
            "get_computer",
            &filter,
            cancel,
            self.executor.find_one(&filter, cancel),
        )
        .await
    }

    /// Returns one page of computers matching `criteria`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] when the page bounds are out of range.
    pub async fn search_computers(
        &self,
        criteria: &ComputerSearchCriteria,
        page: u32,
        page_size: u32,
        cancel: &CancellationToken,
    ) -> Result<PagedResult<Computer>> {
        self.validate_page(page, page_size)?;
        let filter = criteria.to_filter();
        self.observe(
            "search_computers",
            &filter,
            cancel,
            self.executor.search_paged(&filter, page, page_size, cancel),
        )
        .await
    }

    /// Returns true when a simple bind with the given credentials succeeds.
    ///
    /// # Errors
    ///
    /// Errors other than a rejected credential.
    pub async fn validate_credentials(
        &self,
        username: &str,
        password: SecretString,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let options = AuthenticationOptions::new(AuthenticationMethod::Simple {
            credentials: Credentials {
                username: username.to_string(),
                password,
                domain: None,
            },
        });
        Ok(self.authenticate(&options, cancel).await?.authenticated)
    }

    /// Authenticates according to `options`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] for malformed options; protocol failures other than a
    /// rejected credential as [`Error::OperationFailed`].
    pub async fn authenticate(
        &self,
        options: &AuthenticationOptions,
        cancel: &CancellationToken,
    ) -> Result<AuthenticationResult> {
        self.begin(cancel)?;
        self.authenticator
            .authenticate(options, cancel)
            .await
            .map_err(|err| err.into_operation_failure("authenticate"))
    }

    /// Connects if needed and reads the search base. `Ok(false)` when the directory is
    /// unreachable or the base entry cannot be read.
    ///
    /// # Errors
    ///
    /// Only [`Error::Cancelled`] and [`Error::Disposed`].
    pub async fn test_connection(&self, cancel: &CancellationToken) -> Result<bool> {
        self.begin(cancel)?;
        match self.executor.read_base(cancel).await {
            Ok(entry) => Ok(entry.is_some()),
            Err(err @ (Error::Cancelled | Error::Disposed)) => Err(err),
            Err(err) => {
                debug!(error = %err, "connection test failed");
                Ok(false)
            }
        }
    }

    /// Releases the shared connection. Later operations fail with [`Error::Disposed`].
    pub async fn dispose(&self) {
        self.connection.dispose().await;
    }

    fn begin(&self, cancel: &CancellationToken) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn validate_page(&self, page: u32, page_size: u32) -> Result<()> {
        if page == 0 {
            return Err(Error::InvalidRequest("page must be at least 1".to_string()));
        }
        if page_size == 0 || page_size > self.config.max_page_size {
            return Err(Error::InvalidRequest(format!(
                "page size must be between 1 and {}",
                self.config.max_page_size
            )));
        }
        Ok(())
    }

    async fn observe<T, F>(
        &self,
        operation: &str,
        filter: &str,
        cancel: &CancellationToken,
        fut: F,
    ) -> Result<T>
    where
        T: Tally,
        F: Future<Output = Result<T>>,
    {
        self.begin(cancel)?;
        let started = Instant::now();
        match fut.await {
            Ok(value) => {
                self.telemetry
                    .query_completed(operation, filter, value.tally(), started.elapsed());
                Ok(value)
            }
            Err(err) => {
                self.telemetry
                    .query_failed(operation, &err, started.elapsed());
                Err(err.into_operation_failure(operation))
            }
        }
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::InvalidRequest(format!("{field} must not be empty")))
    } else {
        Ok(())
    }
}

/// `(&<class>(|(cn=name)(sAMAccountName=name)...))` with every value exact-escaped.
fn named_filter(object_class: &[&str], name: &str, extra_accounts: &[&str]) -> String {
    let mut alternatives = format!(
        "(cn={value})(sAMAccountName={value})",
        value = escape_filter_value(name)
    );
    for account in extra_accounts {
        alternatives.push_str(&format!("(sAMAccountName={})", escape_filter_value(account)));
    }
    let mut filter = FilterBuilder::new(object_class);
    filter.push_clause(format!("(|{alternatives})"));
    filter.build()
}
