//! Notification hooks for directory activity.
//!
//! Hooks are fire-and-forget: they cannot fail and must not block.

use dirquery_core::Error;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Observer of directory activity. Every method defaults to a no-op.
pub trait DirectoryTelemetry: Send + Sync {
    /// A lookup or search finished.
    fn query_completed(
        &self,
        _operation: &str,
        _filter: &str,
        _results: usize,
        _elapsed: Duration,
    ) {
    }

    /// A lookup or search failed.
    fn query_failed(&self, _operation: &str, _error: &Error, _elapsed: Duration) {}

    /// A page was produced.
    fn paged_query(&self, _page: u32, _page_size: u32, _returned: usize, _total_count: usize) {}

    /// An authentication attempt finished (successfully or with a rejected credential).
    fn authentication_completed(
        &self,
        _mode: &str,
        _username: Option<&str>,
        _authenticated: bool,
        _elapsed: Duration,
    ) {
    }

    /// The long-lived connection was established.
    fn connection_established(&self, _url: &str, _elapsed: Duration) {}

    /// Establishing the long-lived connection failed.
    fn connection_failed(&self, _url: &str, _error: &Error) {}
}

/// Telemetry that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl DirectoryTelemetry for NoopTelemetry {}

/// Telemetry that emits `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl DirectoryTelemetry for TracingTelemetry {
    fn query_completed(&self, operation: &str, filter: &str, results: usize, elapsed: Duration) {
        debug!(
            operation,
            filter,
            results,
            elapsed_ms = duration_ms(elapsed),
            "directory query completed"
        );
    }

    fn query_failed(&self, operation: &str, error: &Error, elapsed: Duration) {
        if error.should_log() {
            warn!(
                operation,
                error = %error,
                code = error.error_code(),
                elapsed_ms = duration_ms(elapsed),
                "directory query failed"
            );
        } else {
            debug!(operation, error = %error, "directory query failed");
        }
    }

    fn paged_query(&self, page: u32, page_size: u32, returned: usize, total_count: usize) {
        debug!(page, page_size, returned, total_count, "directory page produced");
    }

    fn authentication_completed(
        &self,
        mode: &str,
        username: Option<&str>,
        authenticated: bool,
        elapsed: Duration,
    ) {
        info!(
            mode,
            username = username.unwrap_or("<unknown>"),
            authenticated,
            elapsed_ms = duration_ms(elapsed),
            "authentication attempt finished"
        );
    }

    fn connection_established(&self, url: &str, elapsed: Duration) {
        info!(url, elapsed_ms = duration_ms(elapsed), "directory connection established");
    }

    fn connection_failed(&self, url: &str, error: &Error) {
        warn!(url, error = %error, "directory connection failed");
    }
}

fn duration_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl DirectoryTelemetry for Recorder {
        fn paged_query(&self, page: u32, page_size: u32, returned: usize, total_count: usize) {
            self.events
                .lock()
                .push(format!("page {page}/{page_size} {returned} of {total_count}"));
        }
    }

    #[test]
    fn unimplemented_hooks_are_no_ops() {
        let recorder = Recorder::default();
        recorder.query_completed("get_user", "(cn=x)", 1, Duration::from_millis(3));
        recorder.connection_failed("ldap://dc01:389", &Error::Cancelled);
        recorder.paged_query(2, 10, 10, 42);
        assert_eq!(recorder.events.lock().as_slice(), ["page 2/10 10 of 42"]);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn capture(max_level: tracing::Level, emit: impl FnOnce()) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(max_level)
            .without_time()
            .finish();
        tracing::subscriber::with_default(subscriber, emit);
        captured.text()
    }

    #[test]
    fn tracing_telemetry_emits_structured_events() {
        let output = capture(tracing::Level::DEBUG, || {
            let telemetry = TracingTelemetry;
            telemetry.query_completed("search_users", "(objectClass=user)", 3, Duration::ZERO);
            telemetry.paged_query(2, 10, 10, 42);
            telemetry.authentication_completed("simple", Some("jdoe"), false, Duration::ZERO);
            telemetry.connection_failed("ldap://dc01:389", &Error::Timeout("connect".into()));
        });

        assert!(output.contains("directory query completed"));
        assert!(output.contains("operation=\"search_users\""));
        assert!(output.contains("results=3"));
        assert!(output.contains("total_count=42"));
        assert!(output.contains("authentication attempt finished"));
        assert!(output.contains("authenticated=false"));
        assert!(output.contains("WARN"));
        assert!(output.contains("directory connection failed"));
    }

    #[test]
    fn routine_failures_stay_below_warn() {
        let output = capture(tracing::Level::WARN, || {
            let telemetry = TracingTelemetry;
            telemetry.query_failed("get_user", &Error::Cancelled, Duration::ZERO);
            telemetry.query_completed("get_user", "(cn=x)", 1, Duration::ZERO);
        });
        assert!(output.is_empty(), "unexpected output: {output}");

        let output = capture(tracing::Level::WARN, || {
            TracingTelemetry.query_failed(
                "get_user",
                &Error::ConnectionFailed("refused".into()),
                Duration::ZERO,
            );
        });
        assert!(output.contains("directory query failed"));
        assert!(output.contains("CONNECTION_FAILED"));
    }

    #[test]
    fn noop_telemetry_emits_nothing() {
        let output = capture(tracing::Level::TRACE, || {
            NoopTelemetry.paged_query(1, 1, 1, 1);
            NoopTelemetry.connection_failed("ldap://dc01:389", &Error::Cancelled);
        });
        assert!(output.is_empty());
    }

    #[test]
    fn duration_conversion_saturates() {
        assert_eq!(duration_ms(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }
}
