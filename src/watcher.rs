//! The owned context tying authorization, polling and the clipboard together.

use crate::auth::{AuthSession, AuthState, SharedSession};
use crate::callback::{AuthAttempt, AuthOutcome, CallbackServer};
use crate::clipboard::{Clipboard, ClipboardExpiryManager, CopyOutcome};
use crate::config::WatchConfig;
use crate::error::Result;
use crate::events::{EventReceiver, EventSender, WatchEvent};
use crate::history::CodeEntry;
use crate::mail::{GmailClient, MailSource};
use crate::poller::PollLoop;
use crate::secrets::SecretStore;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Mailbox OTP watcher.
///
/// # Example
///
/// ```no_run
/// use otp_watch::{MemoryClipboard, MemoryStore, OtpWatcher, WatchConfig};
/// use std::sync::Arc;
///
/// # async fn example() -> otp_watch::Result<()> {
/// let config = WatchConfig::builder()
///     .client_id("client-id")
///     .client_secret("client-secret")
///     .build()?;
/// let (watcher, mut events) = OtpWatcher::new(
///     config,
///     Arc::new(MemoryStore::new()),
///     Arc::new(MemoryClipboard::new()),
/// )?;
///
/// if !watcher.restore().await {
///     let attempt = watcher.authorize().await?;
///     println!("Open {}", attempt.auth_url);
/// }
/// while let Some(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct OtpWatcher {
    session: SharedSession,
    callback: CallbackServer,
    poller: Arc<PollLoop>,
    clipboard: ClipboardExpiryManager,
    events: EventSender,
}

impl OtpWatcher {
    /// Creates a watcher reading Gmail through `config`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Transport`] if an HTTP client cannot be built.
    pub fn new(
        config: WatchConfig,
        store: Arc<dyn SecretStore>,
        clipboard: Arc<dyn Clipboard>,
    ) -> Result<(Self, EventReceiver)> {
        let session =
            AuthSession::new(config.oauth.clone(), config.timeouts.request, store)?.shared();
        let source = GmailClient::new(
            session.clone(),
            config.api_base_url.clone(),
            config.timeouts.request,
        )?;
        Ok(Self::with_source(&config, session, Arc::new(source), clipboard))
    }

    /// Creates a watcher over a custom mailbox backend.
    #[must_use]
    pub fn with_source(
        config: &WatchConfig,
        session: SharedSession,
        source: Arc<dyn MailSource>,
        clipboard: Arc<dyn Clipboard>,
    ) -> (Self, EventReceiver) {
        let (events, rx) = EventSender::channel();
        let clipboard = ClipboardExpiryManager::new(clipboard, config.clipboard.timeout);
        let poller = PollLoop::new(
            source,
            session.clone(),
            clipboard.clone(),
            events.clone(),
            config,
        );
        let watcher = Self {
            callback: CallbackServer::new(session.clone(), events.clone(), config.timeouts.auth),
            session,
            poller: Arc::new(poller),
            clipboard,
            events,
        };
        (watcher, rx)
    }

    /// Startup: loads saved history and, if a refresh token is stored,
    /// resumes the session and starts polling.
    ///
    /// Returns `true` if a session was restored.
    #[instrument(name = "OtpWatcher::restore", skip_all)]
    pub async fn restore(&self) -> bool {
        if self.poller.load_history().await > 0 {
            self.events.emit(WatchEvent::CodesUpdated {
                codes: self.poller.codes(),
            });
        }
        let restored = self.session.lock().await.restore().await;
        if restored {
            self.poller.start();
        }
        restored
    }

    /// Starts an authorization attempt. Polling starts once it completes.
    ///
    /// # Errors
    ///
    /// See [`CallbackServer::start`].
    #[instrument(name = "OtpWatcher::authorize", skip_all)]
    pub async fn authorize(&self) -> Result<AuthAttempt> {
        let attempt = self.callback.start().await?;
        let poller = self.poller.clone();
        Ok(attempt.on_outcome(move |outcome| {
            if *outcome == AuthOutcome::Completed {
                poller.start();
            }
        }))
    }

    /// Cancels a listening authorization attempt, if any.
    pub fn cancel_authorization(&self) {
        self.callback.cancel();
    }

    /// Signs out: cancels any attempt, stops polling, forgets every code and
    /// deletes the stored session.
    ///
    /// Local state is cleared even when a step fails; the first error is returned.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::SecretStore`] if the refresh token cannot be deleted.
    /// - [`crate::Error::History`] if the history file cannot be removed.
    #[instrument(name = "OtpWatcher::logout", skip_all)]
    pub async fn logout(&self) -> Result<()> {
        self.callback.cancel();
        self.poller.stop();

        let session = self.session.lock().await.clear().await;
        let history = self.poller.clear().await;
        self.events.emit(WatchEvent::CodesUpdated { codes: Vec::new() });

        if let Err(e) = &session {
            warn!(error = %e, "Failed to delete stored session");
        }
        if let Err(e) = &history {
            warn!(error = %e, "Failed to remove history file");
        }
        info!("Logged out");
        session.and(history)
    }

    /// Copies `code` to the clipboard with automatic expiry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Clipboard`] if the write fails.
    pub async fn copy(&self, code: &str) -> Result<CopyOutcome> {
        self.clipboard.copy(code).await
    }

    /// Recorded codes, newest first.
    #[must_use]
    pub fn codes(&self) -> Vec<CodeEntry> {
        self.poller.codes()
    }

    /// Current authorization state.
    pub async fn auth_state(&self) -> AuthState {
        self.session.lock().await.state().clone()
    }

    /// The poll loop, for runtime preferences and manual ticks.
    #[must_use]
    pub fn poller(&self) -> &Arc<PollLoop> {
        &self.poller
    }

    /// The clipboard countdown, for its remaining-seconds channel and timeout.
    #[must_use]
    pub fn clipboard(&self) -> &ClipboardExpiryManager {
        &self.clipboard
    }

    /// Stops every background task. History and the stored session are kept.
    pub fn shutdown(&self) {
        self.callback.cancel();
        self.poller.stop();
        self.clipboard.shutdown();
        info!("Watcher shut down");
    }
}
