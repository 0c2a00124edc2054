//! Periodic mailbox polling.
//!
//! Each tick lists recent unread messages, skips the ones already evaluated,
//! extracts codes and records new `(message id, code)` pairs in [`History`].
//! Ticks never overlap: one that starts while another is in flight is skipped.

use crate::auth::SharedSession;
use crate::clipboard::ClipboardExpiryManager;
use crate::config::{ClipboardConfig, PollingConfig, WatchConfig};
use crate::error::{Error, Result};
use crate::events::{EventSender, WatchEvent};
use crate::history::{CodeEntry, History, HistoryFile};
use crate::mail::{MailMessage, MailSource};
use crate::matcher::OtpExtractor;
use crate::provider::{display_name, ProviderRegistry};
use crate::seen::SeenMessageCache;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Notification title for an auto-copied code.
pub const COPIED_TITLE: &str = "OTP Copied";
/// Notification title for a code that was not copied.
pub const DETECTED_TITLE: &str = "OTP Detected";
/// Notification title for a failed mailbox check.
pub const FAILURE_TITLE: &str = "Mail check failed";

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick was in flight.
    Skipped,
    /// The session is not authenticated; nothing was queried.
    NotAuthenticated,
    /// The batch was processed.
    Completed(TickReport),
}

/// Counters for a processed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Ids returned by the listing.
    pub listed: usize,
    /// Messages fetched and evaluated.
    pub evaluated: usize,
    /// Codes added to the history.
    pub new_codes: usize,
    /// Fetches that failed and will be retried.
    pub failed: usize,
}

struct PollState {
    seen: SeenMessageCache,
    history: History,
    last_notification: Option<Instant>,
}

/// Clears the in-flight flag when a tick ends, including when it is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The polling loop.
///
/// Configure with the `with_*` methods, then wrap in an [`Arc`] to
/// [`start`](Self::start) the background timer.
pub struct PollLoop {
    source: Arc<dyn MailSource>,
    session: SharedSession,
    clipboard: ClipboardExpiryManager,
    events: EventSender,
    extractor: OtpExtractor,
    providers: ProviderRegistry,
    polling: PollingConfig,
    copy_prefs: StdMutex<ClipboardConfig>,
    notifications_enabled: AtomicBool,
    history_file: Option<HistoryFile>,
    state: StdMutex<PollState>,
    in_flight: AtomicBool,
    running: StdMutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for PollLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollLoop")
            .field("polling", &self.polling)
            .field("history_file", &self.history_file)
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl PollLoop {
    /// Creates a loop reading `source` on behalf of `session`.
    ///
    /// Auto-copied codes go through `clipboard`, so they expire like manual copies.
    #[must_use]
    pub fn new(
        source: Arc<dyn MailSource>,
        session: SharedSession,
        clipboard: ClipboardExpiryManager,
        events: EventSender,
        config: &WatchConfig,
    ) -> Self {
        Self {
            source,
            session,
            clipboard,
            events,
            extractor: OtpExtractor::new(),
            providers: ProviderRegistry::with_defaults(),
            polling: config.polling.clone(),
            copy_prefs: StdMutex::new(config.clipboard.clone()),
            notifications_enabled: AtomicBool::new(config.notifications_enabled),
            history_file: config.history_path.clone().map(HistoryFile::new),
            state: StdMutex::new(PollState {
                seen: SeenMessageCache::new(config.cache.seen_capacity, config.cache.seen_keep),
                history: History::new(config.cache.max_history),
                last_notification: None,
            }),
            in_flight: AtomicBool::new(false),
            running: StdMutex::new(None),
        }
    }

    /// Replaces the code extraction rules.
    #[must_use]
    pub fn with_extractor(mut self, extractor: OtpExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Replaces the provider registry.
    #[must_use]
    pub fn with_providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    /// Starts the background timer. Returns `false` if it was already running.
    ///
    /// The first tick runs immediately.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut running = lock(&self.running);
        if running.is_some() {
            debug!("Polling already running");
            return false;
        }
        let token = CancellationToken::new();
        *running = Some(token.clone());
        drop(running);

        info!(interval = ?self.polling.interval, "Polling started");
        let poller = Arc::clone(self);
        tokio::spawn(async move { poller.run(token).await });
        true
    }

    /// Stops the background timer. An in-flight tick is abandoned.
    pub fn stop(&self) {
        if let Some(token) = lock(&self.running).take() {
            token.cancel();
            info!("Polling stopped");
        }
    }

    /// Whether the background timer is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.running).is_some()
    }

    async fn run(&self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.polling.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                result = self.tick() => {
                    if let Err(e) = result {
                        debug!(error = %e, "Tick failed");
                    }
                }
            }
        }
        debug!("Poll task exited");
    }

    /// Runs one poll cycle.
    ///
    /// Listing failures are reported as a [`WatchEvent::Notification`] and
    /// returned; failed fetches are retried on the next tick.
    ///
    /// # Errors
    ///
    /// Returns the error from listing unread messages.
    #[instrument(name = "PollLoop::tick", skip(self))]
    pub async fn tick(&self) -> Result<TickOutcome> {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            debug!("Tick already in flight, skipping");
            return Ok(TickOutcome::Skipped);
        };

        if !self.session.lock().await.is_authenticated() {
            debug!("Not authenticated, skipping");
            return Ok(TickOutcome::NotAuthenticated);
        }

        let ids = match self
            .source
            .list_unread(self.window_start(), self.polling.max_messages)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                self.report_failure(&e);
                return Err(e);
            }
        };

        let mut report = TickReport {
            listed: ids.len(),
            ..TickReport::default()
        };
        let mut last_error = None;

        for id in &ids {
            if !lock(&self.state).seen.insert(id) {
                continue;
            }

            let message = match self.source.fetch_message(id).await {
                Ok(message) => message,
                Err(e) => {
                    warn!(id = %id, error = %e, "Fetch failed, will retry");
                    lock(&self.state).seen.forget(id);
                    report.failed += 1;
                    last_error = Some(e);
                    continue;
                }
            };
            report.evaluated += 1;

            if let Some(entry) = self.record(&message) {
                report.new_codes += 1;
                self.deliver(&entry);
            }
        }

        let codes = self.codes();
        if report.new_codes > 0 {
            self.persist(&codes).await;
        }
        self.events.emit(WatchEvent::CodesUpdated { codes });
        if let Some(e) = last_error {
            self.report_failure(&e);
        }

        debug!(
            listed = report.listed,
            evaluated = report.evaluated,
            new_codes = report.new_codes,
            failed = report.failed,
            "Tick complete"
        );
        Ok(TickOutcome::Completed(report))
    }

    /// Extracts a code and records it if the `(message id, code)` pair is new.
    fn record(&self, message: &MailMessage) -> Option<CodeEntry> {
        let Some(code) = self.extractor.extract(&message.searchable_text()) else {
            debug!(id = %message.id, "No code found");
            return None;
        };

        let mut state = lock(&self.state);
        if state.history.contains(&message.id, &code) {
            return None;
        }

        let sender = match display_name(&message.from) {
            "" => message.from.clone(),
            name => name.to_string(),
        };
        let entry = CodeEntry {
            code,
            sender,
            provider: self.providers.resolve(&message.from),
            timestamp: Utc::now(),
            message_id: message.id.clone(),
        };
        state.history.record(entry.clone());
        info!(
            provider = %entry.provider,
            message_id = %entry.message_id,
            code = "******",
            "New code"
        );
        Some(entry)
    }

    /// Auto-copies and announces a freshly recorded code.
    fn deliver(&self, entry: &CodeEntry) {
        let copied = self.auto_copy_enabled(&entry.provider)
            && match self.clipboard.replace(&entry.code) {
                Ok(_) => true,
                Err(e) => {
                    warn!(error = %e, "Auto-copy failed");
                    false
                }
            };
        let title = if copied { COPIED_TITLE } else { DETECTED_TITLE };
        self.notify(title, format!("Code from {}", entry.sender));
    }

    fn report_failure(&self, error: &Error) {
        warn!(error = %error, retryable = error.is_retryable(), "Mail check failed");
        self.notify(FAILURE_TITLE, error.to_string());
    }

    /// Emits a notification unless disabled or inside the cooldown window.
    fn notify(&self, title: &str, body: String) {
        if !self.notifications_enabled.load(Ordering::Relaxed) {
            return;
        }
        let now = Instant::now();
        {
            let mut state = lock(&self.state);
            let cooling = state
                .last_notification
                .is_some_and(|last| now.duration_since(last) < self.polling.notification_cooldown);
            if cooling {
                debug!(title, "Notification suppressed by cooldown");
                return;
            }
            state.last_notification = Some(now);
        }
        self.events.emit(WatchEvent::Notification {
            title: title.to_string(),
            body,
        });
    }

    async fn persist(&self, codes: &[CodeEntry]) {
        if let Some(file) = &self.history_file {
            if let Err(e) = file.save(codes).await {
                warn!(error = %e, path = %file.path().display(), "Failed to save history");
            }
        }
    }

    fn window_start(&self) -> DateTime<Utc> {
        let now = Utc::now();
        chrono::Duration::from_std(self.polling.lookback)
            .ok()
            .and_then(|lookback| now.checked_sub_signed(lookback))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn auto_copy_enabled(&self, provider: &str) -> bool {
        lock(&self.copy_prefs).should_auto_copy(provider)
    }

    /// Current history, newest first.
    #[must_use]
    pub fn codes(&self) -> Vec<CodeEntry> {
        lock(&self.state).history.entries().to_vec()
    }

    /// Seeds the history from the configured history file, if any.
    ///
    /// Returns the number of entries loaded.
    pub async fn load_history(&self) -> usize {
        let Some(file) = &self.history_file else {
            return 0;
        };
        let entries = file.load_or_empty().await;
        let mut state = lock(&self.state);
        let capacity = state.history.capacity();
        state.history = History::with_entries(capacity, entries);
        state.history.len()
    }

    /// Forgets every recorded code and evaluated message, and deletes the history file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::History`] if the history file cannot be removed.
    pub async fn clear(&self) -> Result<()> {
        {
            let mut state = lock(&self.state);
            state.history.clear();
            state.seen.clear();
            state.last_notification = None;
        }
        match &self.history_file {
            Some(file) => file.remove().await,
            None => Ok(()),
        }
    }

    /// Turns auto-copy on or off globally.
    pub fn set_auto_copy(&self, enabled: bool) {
        lock(&self.copy_prefs).auto_copy = enabled;
    }

    /// Sets the auto-copy preference for one provider label, or for
    /// [`crate::config::DEFAULT_PROVIDER_KEY`].
    pub fn set_provider_auto_copy(&self, provider: impl Into<String>, enabled: bool) {
        lock(&self.copy_prefs)
            .provider_auto_copy
            .insert(provider.into(), enabled);
    }

    /// Turns notification events on or off.
    pub fn set_notifications_enabled(&self, enabled: bool) {
        self.notifications_enabled.store(enabled, Ordering::Relaxed);
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
