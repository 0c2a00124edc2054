//! Short-lived loopback HTTP listener that completes the OAuth redirect.
//!
//! [`CallbackServer::start`] begins an authorization on the shared session,
//! serves `GET /callback` on the listener the session reserved and supervises
//! the attempt until exactly one [`AuthOutcome`] is reached: a callback arrives,
//! the timeout fires, the listener fails or the attempt is cancelled. The timeout
//! is disarmed once a code with the expected state arrives; from then on only
//! the exchange result, a cancel or a listener failure ends the attempt.
//! Teardown (stop the listener, release the session) runs on every path.

use crate::auth::{SharedSession, CALLBACK_PATH};
use crate::error::{Error, Result};
use crate::events::{EventSender, WatchEvent};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html><head><meta charset="utf-8"><title>Signed in</title>
<style>body{font-family:system-ui;display:flex;align-items:center;justify-content:center;height:100vh;margin:0;background:#111;color:#eee}
.box{text-align:center;padding:40px}.ok{color:#22c55e;font-size:2em;margin-bottom:16px}</style></head>
<body><div class="box"><div class="ok">&#10003;</div><h1>Signed in</h1><p>You can close this tab.</p></div></body></html>"#;

const ERROR_HTML: &str = r#"<!DOCTYPE html>
<html><head><meta charset="utf-8"><title>Sign in failed</title>
<style>body{font-family:system-ui;display:flex;align-items:center;justify-content:center;height:100vh;margin:0;background:#111;color:#eee}
.box{text-align:center;padding:40px}.err{color:#ef4444;font-size:2em;margin-bottom:16px}</style></head>
<body><div class="box"><div class="err">&#10007;</div><h1>Sign in failed</h1><p>Return to the app and try again.</p></div></body></html>"#;

/// Terminal result of one authorization attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Tokens were granted; the session is authenticated.
    Completed,
    /// No callback arrived in time.
    TimedOut,
    /// The provider, the exchange or the listener failed.
    Errored(String),
    /// The attempt was cancelled by the caller.
    Cancelled,
}

impl AuthOutcome {
    fn event(&self, timeout: Duration) -> WatchEvent {
        match self {
            AuthOutcome::Completed => WatchEvent::AuthComplete,
            AuthOutcome::Cancelled => WatchEvent::AuthCancelled,
            AuthOutcome::TimedOut => WatchEvent::AuthError {
                message: Error::AuthTimeout { timeout }.to_string(),
            },
            AuthOutcome::Errored(message) => WatchEvent::AuthError {
                message: message.clone(),
            },
        }
    }
}

/// Handle to a started attempt.
#[derive(Debug)]
pub struct AuthAttempt {
    /// URL to open in the user's browser.
    pub auth_url: String,
    /// Redirect URI the listener answers on.
    pub redirect_uri: String,
    outcome: oneshot::Receiver<AuthOutcome>,
}

impl AuthAttempt {
    /// Waits for the attempt's terminal outcome.
    pub async fn outcome(self) -> AuthOutcome {
        self.outcome
            .await
            .unwrap_or_else(|_| AuthOutcome::Errored("callback supervisor stopped".into()))
    }

    /// Runs `hook` when the outcome arrives, before it is handed to the caller.
    pub(crate) fn on_outcome<F>(self, hook: F) -> Self
    where
        F: FnOnce(&AuthOutcome) + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let upstream = self.outcome;
        tokio::spawn(async move {
            let outcome = upstream
                .await
                .unwrap_or_else(|_| AuthOutcome::Errored("callback supervisor stopped".into()));
            hook(&outcome);
            let _ = tx.send(outcome);
        });
        Self {
            auth_url: self.auth_url,
            redirect_uri: self.redirect_uri,
            outcome: rx,
        }
    }
}

/// What the handler reports to the supervisor.
enum Signal {
    /// A code with the expected state arrived; the exchange result follows.
    Exchanging(oneshot::Receiver<std::result::Result<(), String>>),
    Failed(String),
}

#[derive(Clone)]
struct CallbackContext {
    session: SharedSession,
    signal: Arc<StdMutex<Option<oneshot::Sender<Signal>>>>,
}

impl CallbackContext {
    /// Takes the one-shot signal, or `None` if another request already did.
    fn claim(&self) -> Option<oneshot::Sender<Signal>> {
        self.signal
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Loopback listener for the OAuth redirect.
///
/// At most one attempt listens at a time.
#[derive(Debug, Clone)]
pub struct CallbackServer {
    session: SharedSession,
    events: EventSender,
    timeout: Duration,
    active: Arc<StdMutex<Option<CancellationToken>>>,
}

impl CallbackServer {
    /// Creates an idle server for `session`.
    #[must_use]
    pub fn new(session: SharedSession, events: EventSender, timeout: Duration) -> Self {
        Self {
            session,
            events,
            timeout,
            active: Arc::new(StdMutex::new(None)),
        }
    }

    /// Returns `true` while an attempt is listening.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.active_slot().is_some()
    }

    /// Starts an authorization attempt and begins listening for its callback.
    ///
    /// # Errors
    ///
    /// - [`Error::AuthInProgress`] if an attempt is already listening.
    /// - Any error from [`crate::AuthSession::begin_authorization`].
    #[instrument(name = "CallbackServer::start", skip_all)]
    pub async fn start(&self) -> Result<AuthAttempt> {
        let cancel = CancellationToken::new();
        {
            let mut active = self.active_slot();
            if active.is_some() {
                return Err(Error::AuthInProgress);
            }
            *active = Some(cancel.clone());
        }

        let pending = match self.session.lock().await.begin_authorization().await {
            Ok(pending) => pending,
            Err(e) => {
                *self.active_slot() = None;
                return Err(e);
            }
        };

        let (signal_tx, signal_rx) = oneshot::channel();
        let context = CallbackContext {
            session: self.session.clone(),
            signal: Arc::new(StdMutex::new(Some(signal_tx))),
        };
        let router = Router::new()
            .route(CALLBACK_PATH, get(handle_callback))
            .with_state(context);

        let shutdown = CancellationToken::new();
        let listener = pending.listener;
        let server_shutdown = shutdown.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(server_shutdown.cancelled_owned())
                .await
        });
        info!(redirect_uri = %pending.redirect_uri, timeout = ?self.timeout, "Listening for OAuth callback");

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let supervisor = self.clone();
        tokio::spawn(async move {
            let outcome = supervisor
                .supervise(signal_rx, server, shutdown, cancel)
                .await;
            supervisor.events.emit(outcome.event(supervisor.timeout));
            let _ = outcome_tx.send(outcome);
        });

        Ok(AuthAttempt {
            auth_url: pending.auth_url,
            redirect_uri: pending.redirect_uri,
            outcome: outcome_rx,
        })
    }

    /// Cancels the listening attempt, if any. Its outcome becomes
    /// [`AuthOutcome::Cancelled`] unless another outcome was already reached.
    pub fn cancel(&self) {
        if let Some(cancel) = self.active_slot().as_ref() {
            debug!("Cancelling authorization attempt");
            cancel.cancel();
        }
    }

    async fn supervise(
        &self,
        signal: oneshot::Receiver<Signal>,
        mut server: tokio::task::JoinHandle<std::io::Result<()>>,
        shutdown: CancellationToken,
        cancel: CancellationToken,
    ) -> AuthOutcome {
        let exchange = tokio::select! {
            signal = signal => match signal {
                Ok(Signal::Exchanging(exchange)) => Ok(exchange),
                Ok(Signal::Failed(reason)) => Err(AuthOutcome::Errored(reason)),
                Err(_) => Err(AuthOutcome::Errored("callback handler stopped".into())),
            },
            () = tokio::time::sleep(self.timeout) => Err(AuthOutcome::TimedOut),
            () = cancel.cancelled() => Err(AuthOutcome::Cancelled),
            result = &mut server => Err(listener_failure(result)),
        };

        let outcome = match exchange {
            Err(outcome) => outcome,
            Ok(exchange) => {
                debug!("Authorization code received, timeout disarmed");
                tokio::select! {
                    result = exchange => match result {
                        Ok(Ok(())) => AuthOutcome::Completed,
                        Ok(Err(reason)) => AuthOutcome::Errored(reason),
                        Err(_) => AuthOutcome::Errored("callback handler stopped".into()),
                    },
                    () = cancel.cancelled() => AuthOutcome::Cancelled,
                    result = &mut server => listener_failure(result),
                }
            }
        };

        self.teardown(&outcome, server, &shutdown).await;
        match &outcome {
            AuthOutcome::Completed => info!("Authorization attempt completed"),
            other => warn!(outcome = ?other, "Authorization attempt ended"),
        }
        outcome
    }

    /// Stops the listener and releases the session. Safe to run after the
    /// server has already exited.
    async fn teardown(
        &self,
        outcome: &AuthOutcome,
        server: tokio::task::JoinHandle<std::io::Result<()>>,
        shutdown: &CancellationToken,
    ) {
        shutdown.cancel();
        if !server.is_finished() {
            if let Err(e) = server.await {
                debug!(error = %e, "Callback listener task ended abnormally");
            }
        }
        if *outcome != AuthOutcome::Completed {
            self.session.lock().await.cancel_authorization();
        }
        *self.active_slot() = None;
    }

    fn active_slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn listener_failure(
    result: std::result::Result<std::io::Result<()>, tokio::task::JoinError>,
) -> AuthOutcome {
    let source = match result {
        Ok(Ok(())) => std::io::Error::other("listener closed"),
        Ok(Err(e)) => e,
        Err(e) => std::io::Error::other(e),
    };
    AuthOutcome::Errored(Error::Server { source }.to_string())
}

async fn handle_callback(
    State(context): State<CallbackContext>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, Html<&'static str>) {
    if let Some(error) = params.error {
        let Some(signal) = context.claim() else {
            return (StatusCode::GONE, Html(ERROR_HTML));
        };
        warn!(error = %error, "Provider returned an authorization error");
        let _ = signal.send(Signal::Failed(format!("authorization denied: {error}")));
        return (StatusCode::INTERNAL_SERVER_ERROR, Html(ERROR_HTML));
    }

    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        debug!("Ignoring callback request without code");
        return (StatusCode::BAD_REQUEST, Html(ERROR_HTML));
    };
    let state = params.state.unwrap_or_default();
    if !context.session.lock().await.expects_state(&state) {
        warn!("Ignoring callback request with unexpected state");
        return (StatusCode::BAD_REQUEST, Html(ERROR_HTML));
    }
    let Some(signal) = context.claim() else {
        return (StatusCode::GONE, Html(ERROR_HTML));
    };

    let (done_tx, done_rx) = oneshot::channel();
    let _ = signal.send(Signal::Exchanging(done_rx));
    let result = context
        .session
        .lock()
        .await
        .complete_authorization(&code, &state)
        .await;

    match result {
        Ok(()) => {
            let _ = done_tx.send(Ok(()));
            (StatusCode::OK, Html(SUCCESS_HTML))
        }
        Err(e) => {
            let _ = done_tx.send(Err(e.to_string()));
            (StatusCode::INTERNAL_SERVER_ERROR, Html(ERROR_HTML))
        }
    }
}
