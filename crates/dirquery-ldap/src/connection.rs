//! Lazily established, shared directory connection.
//!
//! Queries reuse one bound session. Establishment is serialized under an async mutex
//! so concurrent callers trigger at most one connect-and-bind; the established session
//! is published through a `parking_lot` slot so the fast path never awaits.

use dirquery_core::config::DirectoryConfig;
use dirquery_core::{Error, Result};
use parking_lot::RwLock;
use secrecy::SecretString;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::entry::DirectoryEntry;
use crate::telemetry::DirectoryTelemetry;
use crate::transport::{
    AuthType, BindCredential, ConnectionSettings, DirectoryConnector, DirectorySession,
    SearchRequest,
};

/// Runs `fut` under `limit`, abandoning it as soon as `cancel` fires.
pub(crate) async fn run_cancellable<F, T>(
    cancel: &CancellationToken,
    limit: Duration,
    operation: &str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        outcome = timeout(limit, fut) => match outcome {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "directory {operation} timed out after {}s",
                limit.as_secs()
            ))),
        },
    }
}

/// Identity the long-lived connection binds with.
///
/// The ambient-identity flag wins, then an explicit service account, then the ambient
/// identity again.
#[must_use]
pub fn service_credential(config: &DirectoryConfig) -> BindCredential {
    if config.use_current_identity {
        return BindCredential::Ambient;
    }
    match &config.username {
        Some(username) => BindCredential::Explicit {
            username: username.clone(),
            password: config
                .password
                .clone()
                .unwrap_or_else(|| SecretString::from(String::new())),
            domain: Some(config.domain.clone()),
        },
        None => BindCredential::Ambient,
    }
}

/// Owner of the long-lived query connection.
pub struct ConnectionManager {
    config: Arc<DirectoryConfig>,
    connector: Arc<dyn DirectoryConnector>,
    telemetry: Arc<dyn DirectoryTelemetry>,
    session: RwLock<Option<Arc<dyn DirectorySession>>>,
    connect_lock: Mutex<()>,
    disposed: AtomicBool,
}

impl ConnectionManager {
    /// Creates a disconnected manager.
    #[must_use]
    pub fn new(
        config: Arc<DirectoryConfig>,
        connector: Arc<dyn DirectoryConnector>,
        telemetry: Arc<dyn DirectoryTelemetry>,
    ) -> Self {
        Self {
            config,
            connector,
            telemetry,
            session: RwLock::new(None),
            connect_lock: Mutex::new(()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Configuration the manager connects with.
    #[must_use]
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Returns true while a session is cached.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.read().is_some()
    }

    /// Returns true once [`ConnectionManager::dispose`] has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Returns the shared session, connecting and binding first if needed.
    ///
    /// # Errors
    ///
    /// [`Error::Disposed`] after disposal, [`Error::Cancelled`] if `cancel` fires, and
    /// [`Error::ConnectionFailed`] for any connect or bind failure.
    pub async fn ensure_connected(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn DirectorySession>> {
        self.check_disposed()?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(session) = self.cached() {
            return Ok(session);
        }

        let _guard = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            guard = self.connect_lock.lock() => guard,
        };

        // another caller may have finished connecting while we waited
        self.check_disposed()?;
        if let Some(session) = self.cached() {
            return Ok(session);
        }

        let started = Instant::now();
        let url = self.config.ldap_url().map(|url| url.to_string()).unwrap_or_default();
        match self.open(cancel).await {
            Ok(session) => {
                *self.session.write() = Some(Arc::clone(&session));
                info!(url = %url, "directory connection ready");
                self.telemetry.connection_established(&url, started.elapsed());
                Ok(session)
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(err) => {
                let err = match err {
                    Error::ConnectionFailed(_) => err,
                    other => Error::ConnectionFailed(other.to_string()),
                };
                self.telemetry.connection_failed(&url, &err);
                Err(err)
            }
        }
    }

    /// Runs a search on the shared session.
    ///
    /// A transport failure drops the cached session so the next call reconnects;
    /// directory result-code failures keep it.
    ///
    /// # Errors
    ///
    /// Propagates connection, transport, directory, timeout and cancellation errors.
    pub async fn search(
        &self,
        request: &SearchRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<DirectoryEntry>> {
        let session = self.ensure_connected(cancel).await?;
        let result =
            run_cancellable(cancel, self.config.timeout(), "search", session.search(request))
                .await;
        if let Err(err) = &result {
            if err.is_connection_loss() {
                warn!(error = %err, "directory connection lost; reconnecting on next use");
                self.invalidate(&session);
            }
        }
        result
    }

    /// Marks the manager disposed and unbinds the cached session. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _guard = self.connect_lock.lock().await;
        let session = self.session.write().take();
        if let Some(session) = session {
            if let Err(err) = session.unbind().await {
                debug!(error = %err, "unbind during dispose failed");
            }
        }
        debug!("directory connection manager disposed");
    }

    fn cached(&self) -> Option<Arc<dyn DirectorySession>> {
        self.session.read().clone()
    }

    fn check_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    fn invalidate(&self, failed: &Arc<dyn DirectorySession>) {
        let mut slot = self.session.write();
        let same = slot.as_ref().is_some_and(|current| {
            Arc::as_ptr(current).cast::<()>() == Arc::as_ptr(failed).cast::<()>()
        });
        if same {
            *slot = None;
        }
    }

    async fn open(&self, cancel: &CancellationToken) -> Result<Arc<dyn DirectorySession>> {
        let credential = service_credential(&self.config);
        let auth_type = match credential {
            BindCredential::Explicit { .. } => AuthType::Basic,
            BindCredential::Anonymous => AuthType::Anonymous,
            BindCredential::Ambient => AuthType::Negotiate,
        };
        let settings = ConnectionSettings::from_config(&self.config, auth_type)?;
        debug!(
            url = %settings.url,
            principal = credential.principal_hint(),
            "opening directory connection"
        );

        let session: Arc<dyn DirectorySession> = Arc::from(
            run_cancellable(
                cancel,
                settings.connect_timeout,
                "connect",
                self.connector.connect(&settings),
            )
            .await?,
        );

        let bound = run_cancellable(
            cancel,
            settings.operation_timeout,
            "bind",
            session.bind(&credential),
        )
        .await;
        if let Err(err) = bound {
            if !matches!(err, Error::Cancelled) {
                if let Err(unbind_err) = session.unbind().await {
                    debug!(error = %unbind_err, "unbind after failed bind failed");
                }
            }
            return Err(err);
        }
        Ok(session)
    }
}
