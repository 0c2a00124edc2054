//! # otp-watch
//!
//! Async mailbox watcher that extracts one-time passcodes from incoming mail.
//!
//! This crate provides:
//! - OAuth 2.0 authorization code flow with PKCE against Google, completed by a
//!   short-lived loopback listener, with the refresh token kept in a [`SecretStore`]
//! - Periodic polling of recent unread Gmail messages
//! - Ordered, data-driven OTP extraction rules and sender-to-provider resolution
//! - A bounded history of detected codes, optionally persisted as JSON
//! - Clipboard copies that clear themselves after a timeout
//!
//! ## Features
//!
//! - **`keychain`** (default): [`KeyringStore`], backed by the OS credential store.
//!
//! ## Quick Start
//!
//! ```no_run
//! use otp_watch::{MemoryClipboard, MemoryStore, OtpWatcher, WatchConfig, WatchEvent};
//! use std::sync::Arc;
//!
//! # async fn example() -> otp_watch::Result<()> {
//! let config = WatchConfig::from_env()?;
//! let (watcher, mut events) = OtpWatcher::new(
//!     config,
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MemoryClipboard::new()),
//! )?;
//!
//! if !watcher.restore().await {
//!     let attempt = watcher.authorize().await?;
//!     println!("Sign in at {}", attempt.auth_url);
//! }
//!
//! while let Some(event) = events.recv().await {
//!     if let WatchEvent::CodesUpdated { codes } = event {
//!         println!("{} codes", codes.len());
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Extracting Codes
//!
//! ```
//! use otp_watch::matcher::{extract_code, OtpExtractor};
//! use otp_watch::provider::resolve_provider;
//!
//! assert_eq!(extract_code("Your verification code is 482913").as_deref(), Some("482913"));
//! assert_eq!(resolve_provider("Security <no-reply@paypal.com>"), "PayPal");
//!
//! let strict = OtpExtractor::from_rules([("ticket", r"(?i)ticket\s+(\d{4,8})")]).unwrap();
//! assert_eq!(strict.extract("Ticket 5521").as_deref(), Some("5521"));
//! ```
//!
//! ## Error Handling
//!
//! All errors implement `std::error::Error`. Use [`Error::is_retryable`] to tell
//! transient failures from permanent ones:
//!
//! ```
//! use otp_watch::Error;
//!
//! fn handle_error(error: &Error) {
//!     if error.is_retryable() {
//!         println!("Transient error, will retry: {}", error);
//!     } else {
//!         println!("Permanent error: {}", error);
//!     }
//! }
//! ```
//!
//! ## Observability
//!
//! The crate uses `tracing` for instrumentation. Codes and tokens never appear in
//! spans or events; codes are rendered as `******`.
//!
//! ### Span Naming Convention
//!
//! - `AuthSession::begin_authorization` - Authorization URL and listener
//! - `AuthSession::complete_authorization` - Code exchange
//! - `AuthSession::force_refresh` - Refresh grant
//! - `CallbackServer::start` - Callback listener
//! - `GmailClient::list_unread` / `GmailClient::fetch_message` - Mailbox API
//! - `PollLoop::tick` - One poll cycle
//! - `OtpWatcher::restore` / `OtpWatcher::logout` - Session lifecycle

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod auth;
pub mod callback;
pub mod clipboard;
pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod mail;
pub mod matcher;
pub mod poller;
pub mod provider;
pub mod secrets;
pub mod seen;
pub mod watcher;

// Internal modules
mod parser;

// Re-exports for ergonomic API
pub use auth::{AuthSession, AuthState, SharedSession};
pub use callback::{AuthAttempt, AuthOutcome, CallbackServer};
pub use clipboard::{Clipboard, ClipboardExpiryManager, ClipboardState, CopyOutcome, MemoryClipboard};
pub use config::{
    CacheConfig, ClipboardConfig, OAuthConfig, PollingConfig, TimeoutConfig, WatchConfig,
    WatchConfigBuilder,
};
pub use error::{Error, ErrorCategory, Result};
pub use events::{EventReceiver, EventSender, WatchEvent};
pub use history::{CodeEntry, History, HistoryFile};
pub use mail::{GmailClient, MailMessage, MailSource};
pub use matcher::OtpExtractor;
pub use poller::{PollLoop, TickOutcome, TickReport};
pub use provider::ProviderRegistry;
#[cfg(feature = "keychain")]
pub use secrets::KeyringStore;
pub use secrets::{MemoryStore, SecretStore};
pub use watcher::OtpWatcher;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_accessible() {
        // Ensure all public types are accessible
        let _ = WatchConfig::builder();
        let _ = OtpExtractor::new();
        let _ = ProviderRegistry::with_defaults();
        let _ = MemoryStore::new();
        let _ = MemoryClipboard::new();
    }
}
