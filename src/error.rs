//! Error types for the otp-watch crate.
//!
//! All errors implement [`std::error::Error`] and provide context about what went wrong.
//! Errors are categorized by their retryability - see [`Error::is_retryable`].
//!
//! Nothing on the polling path is fatal: transport and API failures are logged,
//! surfaced as a notification and retried on the next tick. Only configuration
//! errors block authorization outright.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while authorizing, polling or copying codes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration errors (NOT retryable - user must fix configuration)
    // ─────────────────────────────────────────────────────────────────────────
    /// Invalid configuration provided.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// OAuth client id or secret is not configured.
    #[error("OAuth client credentials are not configured ({missing} is empty)")]
    MissingCredentials {
        /// Name of the missing setting.
        missing: &'static str,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Authorization errors (recoverable by the user)
    // ─────────────────────────────────────────────────────────────────────────
    /// An authorization attempt is already listening for its callback.
    #[error("an authorization attempt is already in progress")]
    AuthInProgress,

    /// The operation needs an authenticated session.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The provider rejected the authorization code or refresh token.
    #[error("token exchange rejected: {reason}")]
    Exchange {
        /// Provider-supplied or local reason, truncated.
        reason: String,
    },

    /// No callback arrived within the authorization window.
    #[error("authorization timed out after {timeout:?}")]
    AuthTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Network / API errors (RETRYABLE)
    // ─────────────────────────────────────────────────────────────────────────
    /// HTTP request failed before a response was received.
    #[error("{context} request failed")]
    Transport {
        /// What was being requested.
        context: &'static str,
        /// The underlying HTTP client error.
        #[source]
        source: reqwest::Error,
    },

    /// The mailbox API answered with a non-success status.
    #[error("mailbox API returned HTTP {status}: {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Local listener errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to bind the OAuth callback listener.
    #[error("failed to bind callback listener on {addr}")]
    Bind {
        /// The address that could not be bound.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The callback listener stopped with an error.
    #[error("callback server failed")]
    Server {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Storage / collaborator errors
    // ─────────────────────────────────────────────────────────────────────────
    /// The credential store failed.
    #[error("secret store error: {message}")]
    SecretStore {
        /// Description from the backend.
        message: String,
    },

    /// Writing to the clipboard failed.
    #[error("clipboard error: {message}")]
    Clipboard {
        /// Description from the clipboard backend.
        message: String,
    },

    /// Reading or writing the history file failed.
    #[error("history file error")]
    History {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Decoding errors (NOT retryable - malformed content won't change)
    // ─────────────────────────────────────────────────────────────────────────
    /// A response or payload could not be decoded.
    #[error("failed to decode {what}: {message}")]
    Decode {
        /// What was being decoded.
        what: &'static str,
        /// Decoder message.
        message: String,
    },

    /// Failed to parse an email message.
    #[error("failed to parse email")]
    ParseEmail {
        /// The underlying parse error.
        #[source]
        source: mailparse::MailParseError,
    },
}

impl Error {
    /// Returns `true` if this error represents a transient failure that might succeed on retry.
    ///
    /// The poll loop does not consult this (it always retries on the next tick),
    /// but callers driving [`crate::PollLoop::tick`] manually can.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport { .. } | Error::Server { .. } | Error::Bind { .. } => true,

            // 5xx and rate limiting are transient, 4xx are not
            Error::Api { status, .. } => *status >= 500 || *status == 429,

            Error::InvalidConfig { .. }
            | Error::MissingCredentials { .. }
            | Error::AuthInProgress
            | Error::NotAuthenticated
            | Error::Exchange { .. }
            | Error::AuthTimeout { .. }
            | Error::SecretStore { .. }
            | Error::Clipboard { .. }
            | Error::History { .. }
            | Error::Decode { .. }
            | Error::ParseEmail { .. } => false,
        }
    }

    /// Returns the error category for metrics/logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidConfig { .. } | Error::MissingCredentials { .. } => {
                ErrorCategory::Configuration
            }

            Error::AuthInProgress | Error::NotAuthenticated | Error::Exchange { .. } => {
                ErrorCategory::Authorization
            }

            Error::AuthTimeout { .. } => ErrorCategory::Timeout,

            Error::Transport { .. } | Error::Bind { .. } | Error::Server { .. } => {
                ErrorCategory::Network
            }

            Error::Api { .. } | Error::Decode { .. } | Error::ParseEmail { .. } => {
                ErrorCategory::Protocol
            }

            Error::SecretStore { .. } | Error::Clipboard { .. } | Error::History { .. } => {
                ErrorCategory::Storage
            }
        }
    }
}

/// Error categories for metrics and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Configuration or validation errors.
    Configuration,
    /// OAuth authorization errors.
    Authorization,
    /// Timeout errors.
    Timeout,
    /// Network connectivity errors.
    Network,
    /// Unexpected responses or payloads.
    Protocol,
    /// Local collaborators: keychain, clipboard, files.
    Storage,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Authorization => write!(f, "authorization"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Storage => write!(f, "storage"),
        }
    }
}

/// Maximum length kept from provider error bodies.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Truncates a response body so tokens or large pages never end up in errors or logs.
pub(crate) fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        // Configuration errors are not retryable
        let err = Error::MissingCredentials {
            missing: "client_id",
        };
        assert!(!err.is_retryable());

        // Server-side API failures are retryable, client errors are not
        let err = Error::Api {
            status: 503,
            body: "unavailable".into(),
        };
        assert!(err.is_retryable());
        let err = Error::Api {
            status: 403,
            body: "forbidden".into(),
        };
        assert!(!err.is_retryable());

        // A timed out attempt needs the user to start over
        let err = Error::AuthTimeout {
            timeout: Duration::from_secs(300),
        };
        assert!(!err.is_retryable());

        let err = Error::AuthInProgress;
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_categories() {
        let err = Error::InvalidConfig {
            message: "bad".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Configuration);

        let err = Error::Exchange {
            reason: "invalid_grant".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Authorization);

        let err = Error::AuthTimeout {
            timeout: Duration::from_secs(1),
        };
        assert_eq!(err.category(), ErrorCategory::Timeout);

        let err = Error::Bind {
            addr: "127.0.0.1:0".into(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(err.category(), ErrorCategory::Network);
        assert_eq!(err.category().to_string(), "network");
    }

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("short"), "short");

        let long = "é".repeat(300);
        let truncated = truncate_body(&long);
        assert!(truncated.ends_with("... (truncated)"));
        assert!(truncated.len() < long.len());
    }
}
