//! Clipboard writes with automatic expiry.
//!
//! [`ClipboardExpiryManager`] holds a single slot. A copy moves it from `Idle`
//! through `Starting` to `Counting`, and a one-second countdown clears the OS
//! clipboard when the configured timeout has elapsed. Remaining seconds are
//! recomputed from the deadline on every tick, so late ticks never stretch the
//! countdown.

use crate::error::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// OS clipboard. Only ever written, never read.
pub trait Clipboard: Send + Sync {
    /// Replaces the clipboard contents with `text`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Clipboard`] if the clipboard is unavailable.
    fn write_text(&self, text: &str) -> Result<()>;
}

/// In-process clipboard, for tests and headless use.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    contents: StdMutex<String>,
}

impl MemoryClipboard {
    /// Creates an empty clipboard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current contents.
    #[must_use]
    pub fn contents(&self) -> String {
        self.contents
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Clipboard for MemoryClipboard {
    fn write_text(&self, text: &str) -> Result<()> {
        *self
            .contents
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = text.to_string();
        Ok(())
    }
}

/// State of the single clipboard slot.
#[derive(Clone, PartialEq, Eq)]
pub enum ClipboardState {
    /// Nothing copied, a copy may start.
    Idle,
    /// A copy is writing to the clipboard.
    Starting,
    /// A code is on the clipboard until `expires_at`.
    Counting {
        /// The copied code.
        code: String,
        /// When the clipboard is cleared.
        expires_at: Instant,
    },
}

impl std::fmt::Debug for ClipboardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClipboardState::Idle => write!(f, "Idle"),
            ClipboardState::Starting => write!(f, "Starting"),
            ClipboardState::Counting { expires_at, .. } => f
                .debug_struct("Counting")
                .field("code", &"******")
                .field("expires_at", expires_at)
                .finish(),
        }
    }
}

/// Result of [`ClipboardExpiryManager::copy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// The code was copied and will be cleared after `expires_in`.
    Started {
        /// Countdown length.
        expires_in: Duration,
    },
    /// A countdown is already running; nothing was copied.
    Ignored,
}

struct Slot {
    state: ClipboardState,
    countdown: Option<CancellationToken>,
}

struct Inner {
    clipboard: Arc<dyn Clipboard>,
    slot: StdMutex<Slot>,
    timeout_secs: AtomicU64,
    remaining: watch::Sender<Option<u64>>,
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Single-slot clipboard countdown.
#[derive(Clone)]
pub struct ClipboardExpiryManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ClipboardExpiryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipboardExpiryManager")
            .field("state", &self.state())
            .field("timeout", &self.timeout())
            .finish_non_exhaustive()
    }
}

impl ClipboardExpiryManager {
    /// Creates an idle manager writing to `clipboard`.
    #[must_use]
    pub fn new(clipboard: Arc<dyn Clipboard>, timeout: Duration) -> Self {
        let (remaining, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                clipboard,
                slot: StdMutex::new(Slot {
                    state: ClipboardState::Idle,
                    countdown: None,
                }),
                timeout_secs: AtomicU64::new(timeout.as_secs().max(1)),
                remaining,
            }),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ClipboardState {
        self.inner.slot().state.clone()
    }

    /// Timeout applied to the next copy.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.inner.timeout_secs.load(Ordering::Relaxed))
    }

    /// Changes the timeout for subsequent copies. Values below one second are raised to one.
    pub fn set_timeout_secs(&self, secs: u64) {
        self.inner.timeout_secs.store(secs.max(1), Ordering::Relaxed);
    }

    /// Seconds left on the running countdown; `None` while idle.
    #[must_use]
    pub fn remaining(&self) -> watch::Receiver<Option<u64>> {
        self.inner.remaining.subscribe()
    }

    /// Copies `code` and starts the expiry countdown.
    ///
    /// Ignored unless the slot is `Idle`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Clipboard`] if the write fails; the slot returns to `Idle`.
    pub async fn copy(&self, code: &str) -> Result<CopyOutcome> {
        {
            let mut slot = self.inner.slot();
            if slot.state != ClipboardState::Idle {
                debug!(state = ?slot.state, "Copy ignored, countdown active");
                return Ok(CopyOutcome::Ignored);
            }
            slot.state = ClipboardState::Starting;
        }

        if let Err(e) = self.inner.clipboard.write_text(code) {
            self.inner.slot().state = ClipboardState::Idle;
            return Err(e);
        }

        let timeout = {
            let mut slot = self.inner.slot();
            match &slot.state {
                ClipboardState::Starting => self.arm(&mut slot, code),
                ClipboardState::Counting { code: newer, .. } => {
                    // Replaced while writing; the newer code wins
                    self.inner.clipboard.write_text(newer)?;
                    return Ok(CopyOutcome::Ignored);
                }
                ClipboardState::Idle => return Ok(CopyOutcome::Ignored),
            }
        };
        info!(timeout_secs = timeout.as_secs(), "Code copied to clipboard");
        Ok(CopyOutcome::Started {
            expires_in: timeout,
        })
    }

    /// Copies `code` whatever the slot state, restarting the countdown for the
    /// new code. A running countdown for an earlier code is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Clipboard`] if the write fails; the slot is left as it was.
    pub fn replace(&self, code: &str) -> Result<Duration> {
        self.inner.clipboard.write_text(code)?;
        let timeout = self.arm(&mut self.inner.slot(), code);
        info!(timeout_secs = timeout.as_secs(), "Code replaced on clipboard");
        Ok(timeout)
    }

    /// Enters `Counting` for `code` and spawns its countdown.
    fn arm(&self, slot: &mut Slot, code: &str) -> Duration {
        let timeout = self.timeout();
        let expires_at = Instant::now() + timeout;
        let token = CancellationToken::new();
        if let Some(previous) = slot.countdown.replace(token.clone()) {
            previous.cancel();
        }
        slot.state = ClipboardState::Counting {
            code: code.to_string(),
            expires_at,
        };
        self.inner.remaining.send_replace(Some(timeout.as_secs()));
        tokio::spawn(countdown(self.inner.clone(), expires_at, token));
        timeout
    }

    /// Stops any countdown and returns to `Idle` without touching the clipboard.
    pub fn shutdown(&self) {
        let mut slot = self.inner.slot();
        if let Some(token) = slot.countdown.take() {
            token.cancel();
        }
        slot.state = ClipboardState::Idle;
        drop(slot);
        self.inner.remaining.send_replace(None);
    }
}

async fn countdown(inner: Arc<Inner>, expires_at: Instant, token: CancellationToken) {
    let period = Duration::from_secs(1);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let remaining = expires_at.saturating_duration_since(Instant::now());
        if !remaining.is_zero() {
            let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            let _slot = inner.slot();
            if token.is_cancelled() {
                return;
            }
            inner.remaining.send_replace(Some(secs));
            continue;
        }

        {
            let mut slot = inner.slot();
            if token.is_cancelled() {
                return;
            }
            slot.state = ClipboardState::Idle;
            slot.countdown = None;
        }
        match inner.clipboard.write_text("") {
            Ok(()) => info!("Clipboard cleared after timeout"),
            Err(e) => warn!(error = %e, "Failed to clear clipboard"),
        }
        inner.remaining.send_replace(None);
        return;
    }
}
