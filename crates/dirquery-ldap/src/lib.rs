//! Directory query and authentication client for Active Directory style LDAP servers.
//!
//! [`DirectoryService`] resolves users, groups and computers into typed records,
//! returns paged search results and validates credentials under several bind modes.
//! The wire protocol sits behind [`DirectoryConnector`]; [`LdapConnector`] is the
//! production implementation over `ldap3`.
//!
//! ```no_run
//! use dirquery_ldap::{CancellationToken, DirectoryConfig, DirectoryService, UserSearchCriteria};
//!
//! # async fn run() -> dirquery_ldap::Result<()> {
//! let config = DirectoryConfig::new("corp.example.com")?
//!     .with_credentials("svc-directory", "secret");
//! let service = DirectoryService::new(config)?;
//! let cancel = CancellationToken::new();
//!
//! let criteria = UserSearchCriteria {
//!     department: Some("Engineering".to_string()),
//!     is_enabled: Some(true),
//!     ..UserSearchCriteria::default()
//! };
//! let page = service.search_users(&criteria, 1, 25, &cancel).await?;
//! for user in &page.items {
//!     println!("{:?}", user.preferred_name());
//! }
//! service.dispose().await;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), deny(missing_docs))]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod auth;
mod computer;
mod connection;
mod criteria;
mod dn;
mod entry;
pub mod filter;
mod group;
pub mod mapper;
mod paging;
mod search;
mod service;
mod telemetry;
mod transport;
mod user;

pub use auth::{
    AuthenticationDispatcher, AuthenticationMethod, AuthenticationMode, AuthenticationOptions,
    AuthenticationResult, Credentials, NOT_IMPLEMENTED_CODE,
};
pub use computer::{Computer, COMPUTER_ATTRIBUTES};
pub use connection::{service_credential, ConnectionManager};
pub use criteria::{
    build_computer_filter, build_group_filter, build_user_filter, ComputerSearchCriteria,
    GroupSearchCriteria, UserSearchCriteria, COMPUTER_OBJECT_CLASS, GROUP_OBJECT_CLASS,
    USER_OBJECT_CLASS,
};
pub use dn::{common_name_of, DistinguishedName, DistinguishedNameError, RelativeDistinguishedName};
pub use entry::DirectoryEntry;
pub use group::{Group, GroupCategory, GroupScope, GROUP_ATTRIBUTES};
pub use mapper::{map_entry, DirectoryRecord, EntityKind, FromDirectoryEntry};
pub use paging::PagedResult;
pub use search::{SearchExecutor, COUNT_ATTRIBUTE};
pub use service::DirectoryService;
pub use telemetry::{DirectoryTelemetry, NoopTelemetry, TracingTelemetry};
pub use transport::{
    AuthType, BindCredential, ConnectionSettings, DirectoryConnector, DirectorySession,
    LdapConnector, SearchRequest, SearchScope, SUPPORTED_PROTOCOL_VERSION,
};
pub use user::{User, USER_ATTRIBUTES};

pub use dirquery_core::{DirectoryConfig, Error};
pub use tokio_util::sync::CancellationToken;

/// Convenient result alias that reuses the core error type.
pub type Result<T> = dirquery_core::Result<T>;
