//! Error types for directory operations.
//!
//! The taxonomy separates failures the caller must handle differently: configuration
//! problems surface at construction, protocol-level failures are folded into
//! [`Error::OperationFailed`] at the service boundary, and cancellation always stays
//! distinct.

use thiserror::Error;

/// LDAP result code returned when a bind is rejected because of invalid credentials.
pub const INVALID_CREDENTIALS_CODE: u32 = 49;

/// LDAP result code returned when a search hit the requested size limit.
pub const SIZE_LIMIT_EXCEEDED_CODE: u32 = 4;

/// Main error type for directory operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// The long-lived directory connection could not be established
    #[error("Directory connection failed: {0}")]
    ConnectionFailed(String),

    /// The directory answered with a non-success result code
    #[error("Directory error {code}: {message}")]
    Directory {
        /// LDAP result code
        code: u32,
        /// Diagnostic text returned by the server
        message: String,
    },

    /// Transport-level failure below the LDAP result layer (I/O, TLS, protocol framing)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation timed out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Requested option is not supported by the transport
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// The service has been disposed
    #[error("Directory service has been disposed")]
    Disposed,

    /// Uniform failure of a public directory operation
    #[error("Directory operation `{operation}` failed: {message}")]
    OperationFailed {
        /// Name of the public operation that failed
        operation: String,
        /// Original error message
        message: String,
    },
}

/// Specialized result type for directory operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::Directory { .. } => "DIRECTORY_ERROR",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Unsupported(_) => "UNSUPPORTED",
            Self::Cancelled => "CANCELLED",
            Self::Disposed => "DISPOSED",
            Self::OperationFailed { .. } => "OPERATION_FAILED",
        }
    }

    /// Returns true if this error should be logged as a serious error.
    #[must_use]
    pub const fn should_log(&self) -> bool {
        matches!(
            self,
            Self::ConfigError(_)
                | Self::ConnectionFailed(_)
                | Self::Transport(_)
                | Self::OperationFailed { .. }
        )
    }

    /// Returns true if the directory rejected the supplied credentials.
    #[must_use]
    pub const fn is_invalid_credentials(&self) -> bool {
        matches!(
            self,
            Self::Directory {
                code: INVALID_CREDENTIALS_CODE,
                ..
            }
        )
    }

    /// Returns true if the failure means the underlying connection is unusable.
    #[must_use]
    pub const fn is_connection_loss(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Folds protocol-level failures into [`Error::OperationFailed`] for `operation`.
    ///
    /// Cancellation, disposal, caller-input, configuration and unsupported-option errors pass
    /// through unchanged so callers can still branch on them.
    #[must_use]
    pub fn into_operation_failure(self, operation: &str) -> Self {
        match self {
            Self::Directory { .. }
            | Self::Transport(_)
            | Self::Timeout(_)
            | Self::ConnectionFailed(_) => Self::OperationFailed {
                operation: operation.to_string(),
                message: self.to_string(),
            },
            other => other,
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::ConfigError(format!("invalid directory URL: {err}"))
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::ValidationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            Error::ConfigError("test".to_string()).error_code(),
            "CONFIG_ERROR"
        );
        assert_eq!(
            Error::ConnectionFailed("test".to_string()).error_code(),
            "CONNECTION_FAILED"
        );
        assert_eq!(
            Error::Directory {
                code: 32,
                message: "no such object".to_string()
            }
            .error_code(),
            "DIRECTORY_ERROR"
        );
        assert_eq!(Error::Timeout("test".to_string()).error_code(), "TIMEOUT");
        assert_eq!(Error::Cancelled.error_code(), "CANCELLED");
        assert_eq!(Error::Disposed.error_code(), "DISPOSED");
        assert_eq!(
            Error::OperationFailed {
                operation: "get_user".to_string(),
                message: "boom".to_string()
            }
            .error_code(),
            "OPERATION_FAILED"
        );
    }

    #[test]
    fn test_error_display() {
        let err = Error::Directory {
            code: 49,
            message: "80090308: LdapErr: DSID-0C09044E".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Directory error 49: 80090308: LdapErr: DSID-0C09044E"
        );

        let err = Error::OperationFailed {
            operation: "search_users".to_string(),
            message: "Timeout: search".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Directory operation `search_users` failed: Timeout: search"
        );
    }

    #[test]
    fn test_invalid_credentials_detection() {
        let rejected = Error::Directory {
            code: INVALID_CREDENTIALS_CODE,
            message: "invalid credentials".to_string(),
        };
        assert!(rejected.is_invalid_credentials());

        let other = Error::Directory {
            code: 52,
            message: "unavailable".to_string(),
        };
        assert!(!other.is_invalid_credentials());
        assert!(!Error::Transport("reset".to_string()).is_invalid_credentials());
    }

    #[test]
    fn test_into_operation_failure_wraps_protocol_errors() {
        let wrapped =
            Error::Transport("connection reset".to_string()).into_operation_failure("get_user");
        assert_eq!(
            wrapped,
            Error::OperationFailed {
                operation: "get_user".to_string(),
                message: "Transport error: connection reset".to_string(),
            }
        );

        let wrapped =
            Error::ConnectionFailed("refused".to_string()).into_operation_failure("get_group");
        assert!(matches!(wrapped, Error::OperationFailed { .. }));

        let wrapped = Error::Timeout("search".to_string()).into_operation_failure("get_group");
        assert!(matches!(wrapped, Error::OperationFailed { .. }));
    }

    #[test]
    fn test_into_operation_failure_keeps_cancellation_distinct() {
        assert_eq!(Error::Cancelled.into_operation_failure("get_user"), Error::Cancelled);
        assert_eq!(Error::Disposed.into_operation_failure("get_user"), Error::Disposed);
        let invalid = Error::InvalidRequest("page must be at least 1".to_string());
        assert_eq!(invalid.clone().into_operation_failure("search_users"), invalid);
    }

    #[test]
    fn test_into_operation_failure_keeps_unsupported() {
        let unsupported = Error::Unsupported("LDAP protocol version 2".to_string());
        assert_eq!(unsupported.clone().into_operation_failure("get_user"), unsupported);
    }

    #[test]
    fn test_should_log() {
        assert!(Error::ConfigError("test".to_string()).should_log());
        assert!(Error::ConnectionFailed("test".to_string()).should_log());
        assert!(!Error::Cancelled.should_log());
        assert!(!Error::InvalidRequest("test".to_string()).should_log());
    }

    #[test]
    fn test_from_url_parse_error() {
        let err = url::Url::parse("not a url").unwrap_err();
        let directory_err: Error = err.into();
        assert!(matches!(directory_err, Error::ConfigError(_)));
    }
}
