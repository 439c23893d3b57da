//! Unified error taxonomy for the vault-unseal operator.
//!
//! Every failure surfaced by the client, strategy, or controller layers is
//! one of the seven kinds below. Each variant that can wrap an underlying
//! failure carries a mandatory `cause` field so the chain can be walked by
//! [`UnsealError::is_retryable`] and [`UnsealError::kind`] without relying
//! on downcasting scattered through control flow.

use std::time::Duration;

/// Type-erased cause for transport/IO-level failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The seven error kinds named by the failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input from the user or an internal contract violation.
    Validation,
    /// Failure emanating from a Vault API call or client state.
    Vault,
    /// Network-level failure (DNS, TCP, TLS).
    Connection,
    /// A configured timeout elapsed.
    Timeout,
    /// The server rejected credentials.
    Authentication,
    /// A specific share submission failed.
    Unseal,
    /// Cooperative cancellation.
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Vault => "vault",
            ErrorKind::Connection => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Unseal => "unseal",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Unified error type traversing strategy → client → reconciler.
#[derive(Debug, thiserror::Error)]
pub enum UnsealError {
    /// Malformed input or a broken internal contract. Non-retryable.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A Vault API call or client-state failure.
    #[error("vault {operation} against {endpoint} failed: {message}")]
    Vault {
        operation: String,
        endpoint: String,
        message: String,
        retryable: bool,
        #[source]
        cause: Option<BoxError>,
    },

    /// DNS/TCP/TLS-level failure reaching the endpoint. Usually retryable.
    #[error("connection to {endpoint} failed: {message}")]
    Connection {
        endpoint: String,
        timeout: Duration,
        message: String,
        #[source]
        cause: Option<BoxError>,
    },

    /// A configured timeout elapsed.
    #[error("{operation} timed out after {elapsed:?} (limit {timeout:?})")]
    Timeout {
        operation: String,
        timeout: Duration,
        elapsed: Duration,
    },

    /// The server rejected credentials. Non-retryable without operator action.
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    /// A single share submission failed during an unseal attempt.
    #[error("unseal failed at {endpoint} for share index {key_index}: {message}")]
    Unseal {
        endpoint: String,
        key_index: usize,
        message: String,
        status_summary: Option<String>,
        #[source]
        cause: Option<Box<UnsealError>>,
    },

    /// Cooperative cancellation. Must never be logged as a failure.
    #[error("cancelled: {message}")]
    Cancelled { message: String },
}

impl UnsealError {
    pub fn validation(message: impl Into<String>) -> Self {
        UnsealError::Validation {
            message: message.into(),
        }
    }

    pub fn vault(
        operation: impl Into<String>,
        endpoint: impl Into<String>,
        message: impl Into<String>,
        retryable: bool,
    ) -> Self {
        UnsealError::Vault {
            operation: operation.into(),
            endpoint: endpoint.into(),
            message: message.into(),
            retryable,
            cause: None,
        }
    }

    pub fn vault_with_cause(
        operation: impl Into<String>,
        endpoint: impl Into<String>,
        message: impl Into<String>,
        retryable: bool,
        cause: BoxError,
    ) -> Self {
        UnsealError::Vault {
            operation: operation.into(),
            endpoint: endpoint.into(),
            message: message.into(),
            retryable,
            cause: Some(cause),
        }
    }

    pub fn connection(
        endpoint: impl Into<String>,
        timeout: Duration,
        message: impl Into<String>,
        cause: Option<BoxError>,
    ) -> Self {
        UnsealError::Connection {
            endpoint: endpoint.into(),
            timeout,
            message: message.into(),
            cause,
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout: Duration, elapsed: Duration) -> Self {
        UnsealError::Timeout {
            operation: operation.into(),
            timeout,
            elapsed,
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        UnsealError::Authentication {
            message: message.into(),
        }
    }

    pub fn unseal(
        endpoint: impl Into<String>,
        key_index: usize,
        cause: UnsealError,
        status_summary: Option<String>,
    ) -> Self {
        let message = cause.to_string();
        UnsealError::Unseal {
            endpoint: endpoint.into(),
            key_index,
            message,
            status_summary,
            cause: Some(Box::new(cause)),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        UnsealError::Cancelled {
            message: message.into(),
        }
    }

    /// The taxonomy kind of this error, without walking the cause chain.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            UnsealError::Validation { .. } => ErrorKind::Validation,
            UnsealError::Vault { .. } => ErrorKind::Vault,
            UnsealError::Connection { .. } => ErrorKind::Connection,
            UnsealError::Timeout { .. } => ErrorKind::Timeout,
            UnsealError::Authentication { .. } => ErrorKind::Authentication,
            UnsealError::Unseal { .. } => ErrorKind::Unseal,
            UnsealError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Whether the operation that produced this error may succeed if retried.
    ///
    /// `Unseal` delegates to its wrapped cause since an unseal failure is
    /// only as retryable as the share-submission error that triggered it.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            UnsealError::Validation { .. }
            | UnsealError::Authentication { .. }
            | UnsealError::Cancelled { .. } => false,
            UnsealError::Vault { retryable, .. } => *retryable,
            UnsealError::Connection { .. } | UnsealError::Timeout { .. } => true,
            UnsealError::Unseal { cause, .. } => {
                cause.as_deref().is_some_and(UnsealError::is_retryable)
            }
        }
    }

    /// Whether this error, or any error in its cause chain, is of `kind`.
    #[must_use]
    pub fn is_of_kind(&self, kind: ErrorKind) -> bool {
        if self.kind() == kind {
            return true;
        }
        if let UnsealError::Unseal { cause, .. } = self {
            return cause.as_deref().is_some_and(|c| c.is_of_kind(kind));
        }
        false
    }

    /// Annotate this error's message to record that a retry budget was
    /// exhausted, preserving kind and retryability.
    #[must_use]
    pub fn annotate_retries_exhausted(self, attempts: u32) -> Self {
        let suffix = format!(" (gave up after {attempts} attempts)");
        match self {
            UnsealError::Validation { message } => UnsealError::Validation {
                message: message + &suffix,
            },
            UnsealError::Vault {
                operation,
                endpoint,
                message,
                retryable,
                cause,
            } => UnsealError::Vault {
                operation,
                endpoint,
                message: message + &suffix,
                retryable,
                cause,
            },
            UnsealError::Connection {
                endpoint,
                timeout,
                message,
                cause,
            } => UnsealError::Connection {
                endpoint,
                timeout,
                message: message + &suffix,
                cause,
            },
            UnsealError::Timeout {
                operation,
                timeout,
                elapsed,
            } => UnsealError::Timeout {
                operation,
                timeout,
                elapsed,
            },
            UnsealError::Authentication { message } => UnsealError::Authentication {
                message: message + &suffix,
            },
            UnsealError::Unseal {
                endpoint,
                key_index,
                message,
                status_summary,
                cause,
            } => UnsealError::Unseal {
                endpoint,
                key_index,
                message: message + &suffix,
                status_summary,
                cause,
            },
            UnsealError::Cancelled { message } => UnsealError::Cancelled { message },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn validation_is_not_retryable() {
        let err = UnsealError::validation("bad input");
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn vault_retryable_flag_is_respected() {
        let retryable = UnsealError::vault("is-sealed", "http://v:8200", "boom", true);
        assert!(retryable.is_retryable());

        let non_retryable = UnsealError::vault("is-sealed", "http://v:8200", "closed", false);
        assert!(!non_retryable.is_retryable());
    }

    #[test]
    fn connection_and_timeout_are_always_retryable() {
        assert!(UnsealError::connection("http://v:8200", Duration::from_secs(1), "refused", None)
            .is_retryable());
        assert!(UnsealError::timeout(
            "unseal",
            Duration::from_secs(1),
            Duration::from_secs(2)
        )
        .is_retryable());
    }

    #[test]
    fn unseal_delegates_retryability_to_cause() {
        let inner = UnsealError::vault("unseal-key-submit", "http://v:8200", "500", true);
        let wrapped = UnsealError::unseal("http://v:8200", 1, inner, None);
        assert!(wrapped.is_retryable());
        assert!(wrapped.is_of_kind(ErrorKind::Vault));
        assert!(wrapped.is_of_kind(ErrorKind::Unseal));
    }

    #[test]
    fn cancelled_and_authentication_are_not_retryable() {
        assert!(!UnsealError::cancelled("stopped").is_retryable());
        assert!(!UnsealError::authentication("bad token").is_retryable());
    }

    #[test]
    fn annotate_retries_exhausted_preserves_kind_and_retryability() {
        let err = UnsealError::vault("is-sealed", "http://v:8200", "boom", true);
        let annotated = err.annotate_retries_exhausted(3);
        assert!(annotated.is_retryable());
        assert_eq!(annotated.kind(), ErrorKind::Vault);
        assert!(annotated.to_string().contains("gave up after 3 attempts"));
    }
}
