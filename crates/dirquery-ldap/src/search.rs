//! Page-based retrieval over a transport without a paging cursor.
//!
//! A page is produced by counting all matches with a one-attribute query, then fetching
//! `skip + page_size + 1` full entries and slicing off the leading `skip`. Deep pages on
//! large result sets cost proportionally more.

use dirquery_core::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connection::ConnectionManager;
use crate::entry::DirectoryEntry;
use crate::mapper::{projection, FromDirectoryEntry};
use crate::paging::PagedResult;
use crate::telemetry::DirectoryTelemetry;
use crate::transport::SearchRequest;

/// Attribute requested by count queries.
pub const COUNT_ATTRIBUTE: &str = "distinguishedName";

/// Runs lookups and paged searches on the shared connection.
pub struct SearchExecutor {
    connection: Arc<ConnectionManager>,
    telemetry: Arc<dyn DirectoryTelemetry>,
}

impl SearchExecutor {
    /// Creates an executor over `connection`.
    #[must_use]
    pub fn new(connection: Arc<ConnectionManager>, telemetry: Arc<dyn DirectoryTelemetry>) -> Self {
        Self {
            connection,
            telemetry,
        }
    }

    fn base_dn(&self) -> String {
        self.connection.config().effective_base_dn()
    }

    fn custom_attributes(&self) -> &[String] {
        &self.connection.config().custom_attributes
    }

    /// Counts the entries matching `filter`.
    ///
    /// # Errors
    ///
    /// Propagates connection and search failures.
    pub async fn count(&self, filter: &str, cancel: &CancellationToken) -> Result<usize> {
        let request =
            SearchRequest::subtree(self.base_dn(), filter, vec![COUNT_ATTRIBUTE.to_string()]);
        Ok(self.connection.search(&request, cancel).await?.len())
    }

    /// Returns page `page` (1-based) of `page_size` records matching `filter`.
    ///
    /// Bounds are not validated here; arithmetic saturates.
    ///
    /// # Errors
    ///
    /// Propagates connection and search failures.
    pub async fn search_paged<T: FromDirectoryEntry>(
        &self,
        filter: &str,
        page: u32,
        page_size: u32,
        cancel: &CancellationToken,
    ) -> Result<PagedResult<T>> {
        let total_count = self.count(filter, cancel).await?;

        let page_len = page_size as usize;
        let skip = (page.saturating_sub(1) as usize).saturating_mul(page_len);
        let cap = u32::try_from(skip.saturating_add(page_len).saturating_add(1))
            .unwrap_or(u32::MAX);
        let request = SearchRequest::subtree(
            self.base_dn(),
            filter,
            projection::<T>(self.custom_attributes()),
        )
        .with_size_limit(cap);
        let entries = self.connection.search(&request, cancel).await?;
        debug!(filter, page, page_size, fetched = entries.len(), total_count, "paged search");

        let items: Vec<T> = entries
            .iter()
            .skip(skip)
            .take(page_len)
            .map(|entry| T::from_entry(entry, self.custom_attributes()))
            .collect();
        self.telemetry
            .paged_query(page, page_size, items.len(), total_count);

        Ok(PagedResult::new(items, page, page_size, total_count))
    }

    /// Returns the first record matching `filter`.
    ///
    /// # Errors
    ///
    /// Propagates connection and search failures.
    pub async fn find_one<T: FromDirectoryEntry>(
        &self,
        filter: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<T>> {
        Ok(self.find_all(filter, Some(1), cancel).await?.into_iter().next())
    }

    /// Returns every record matching `filter`, up to `limit` when given.
    ///
    /// # Errors
    ///
    /// Propagates connection and search failures.
    pub async fn find_all<T: FromDirectoryEntry>(
        &self,
        filter: &str,
        limit: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>> {
        let mut request = SearchRequest::subtree(
            self.base_dn(),
            filter,
            projection::<T>(self.custom_attributes()),
        );
        request.size_limit = limit;
        let entries = self.connection.search(&request, cancel).await?;
        Ok(entries
            .iter()
            .map(|entry| T::from_entry(entry, self.custom_attributes()))
            .collect())
    }

    /// Returns the first raw entry matching `filter` with the requested attributes.
    ///
    /// # Errors
    ///
    /// Propagates connection and search failures.
    pub async fn find_entry(
        &self,
        filter: &str,
        attributes: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<Option<DirectoryEntry>> {
        let request =
            SearchRequest::subtree(self.base_dn(), filter, attributes).with_size_limit(1);
        Ok(self
            .connection
            .search(&request, cancel)
            .await?
            .into_iter()
            .next())
    }

    /// Reads the search base entry itself.
    ///
    /// # Errors
    ///
    /// Propagates connection and search failures.
    pub async fn read_base(&self, cancel: &CancellationToken) -> Result<Option<DirectoryEntry>> {
        let request = SearchRequest::base(self.base_dn(), vec!["objectClass".to_string()]);
        Ok(self
            .connection
            .search(&request, cancel)
            .await?
            .into_iter()
            .next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::NoopTelemetry;
    use crate::transport::{MockDirectoryConnector, MockDirectorySession};
    use crate::user::User;
    use dirquery_core::config::DirectoryConfig;

    fn people(count: usize) -> Vec<DirectoryEntry> {
        (1..=count)
            .map(|n| {
                DirectoryEntry::new(format!("CN=User {n:02},OU=Staff,DC=corp,DC=com"))
                    .with_attribute("sAMAccountName", [format!("user{n:02}")])
            })
            .collect()
    }

    /// Executor over a session that honours size limits and serves `count` users.
    fn executor(count: usize, searches: usize) -> SearchExecutor {
        let mut connector = MockDirectoryConnector::new();
        connector.expect_connect().times(1).returning(move |_| {
            let entries = people(count);
            let mut session = MockDirectorySession::new();
            session.expect_bind().returning(|_| Ok(()));
            session
                .expect_search()
                .times(searches)
                .returning(move |request| {
                    assert_eq!(request.base_dn, "DC=corp,DC=com");
                    let limit = request.size_limit.map_or(usize::MAX, |l| l as usize);
                    Ok(entries.iter().take(limit).cloned().collect())
                });
            Ok(Box::new(session))
        });

        let config = DirectoryConfig::new("corp.com")
            .unwrap()
            .with_credentials("svc", "pw");
        let connection = Arc::new(ConnectionManager::new(
            Arc::new(config),
            Arc::new(connector),
            Arc::new(NoopTelemetry),
        ));
        SearchExecutor::new(connection, Arc::new(NoopTelemetry))
    }

    #[tokio::test]
    async fn second_page_slices_the_over_fetch() {
        let executor = executor(25, 3);
        let cancel = CancellationToken::new();

        let all: Vec<User> = executor
            .find_all("(objectClass=user)", None, &cancel)
            .await
            .unwrap();
        let page = executor
            .search_paged::<User>("(objectClass=user)", 2, 10, &cancel)
            .await
            .unwrap();

        assert_eq!(page.total_count, 25);
        assert_eq!(page.items.len(), 10);
        assert_eq!(page.items, all[10..20].to_vec());
        assert_eq!(page.items[0].username.as_deref(), Some("user11"));
        assert!(page.has_next_page());
    }

    #[tokio::test]
    async fn last_page_is_partial() {
        let executor = executor(25, 2);
        let page = executor
            .search_paged::<User>("(objectClass=user)", 3, 10, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(page.items.len(), 5);
        assert!(!page.has_next_page());
        assert!(page.has_previous_page());
    }

    #[tokio::test]
    async fn page_past_the_end_is_empty() {
        let executor = executor(5, 2);
        let page = executor
            .search_paged::<User>("(objectClass=user)", 4, 10, &CancellationToken::new())
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total_count, 5);
    }

    #[tokio::test]
    async fn queries_use_count_projection_and_size_cap() {
        let mut connector = MockDirectoryConnector::new();
        connector.expect_connect().returning(|_| {
            let mut sequence = mockall::Sequence::new();
            let mut session = MockDirectorySession::new();
            session.expect_bind().returning(|_| Ok(()));
            session
                .expect_search()
                .times(1)
                .in_sequence(&mut sequence)
                .withf(|request| {
                    request.attributes == [COUNT_ATTRIBUTE] && request.size_limit.is_none()
                })
                .returning(|_| Ok(people(40)));
            session
                .expect_search()
                .times(1)
                .in_sequence(&mut sequence)
                .withf(|request| {
                    request.size_limit == Some(31)
                        && request.attributes.iter().any(|a| a == "sAMAccountName")
                        && request.attributes.iter().any(|a| a == "costCenter")
                })
                .returning(|_| Ok(people(31)));
            Ok(Box::new(session))
        });

        let config = DirectoryConfig::new("corp.com")
            .unwrap()
            .with_custom_attributes(["costCenter"]);
        let connection = Arc::new(ConnectionManager::new(
            Arc::new(config),
            Arc::new(connector),
            Arc::new(NoopTelemetry),
        ));
        let executor = SearchExecutor::new(connection, Arc::new(NoopTelemetry));
        let page = executor
            .search_paged::<User>("(objectClass=user)", 3, 10, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(page.items.len(), 10);
        assert_eq!(page.items[0].username.as_deref(), Some("user21"));
    }

    #[tokio::test]
    async fn find_one_returns_none_when_nothing_matches() {
        let executor = executor(0, 1);
        let user: Option<User> = executor
            .find_one("(sAMAccountName=ghost)", &CancellationToken::new())
            .await
            .unwrap();
        assert!(user.is_none());
    }

    #[tokio::test]
    async fn extreme_page_numbers_do_not_overflow() {
        let executor = executor(3, 2);
        let page = executor
            .search_paged::<User>(
                "(objectClass=user)",
                u32::MAX,
                u32::MAX,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total_count, 3);
    }
}
