//! End-to-end tests for otp-watch.
//!
//! The mailbox is an in-process fake; the OAuth token endpoint is mocked with
//! wiremock. No real Google account is needed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use otp_watch::secrets::{REFRESH_TOKEN_ACCOUNT, SERVICE_NAME};
use otp_watch::{
    AuthOutcome, AuthSession, AuthState, ClipboardState, CopyOutcome, Error, MailMessage,
    MailSource, MemoryClipboard, MemoryStore, OtpWatcher, SecretStore, TickOutcome, WatchConfig,
    WatchEvent,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeMailbox {
    messages: Mutex<Vec<MailMessage>>,
}

impl FakeMailbox {
    fn deliver(&self, id: &str, from: &str, subject: &str, body: &str) {
        self.messages.lock().unwrap().insert(
            0,
            MailMessage {
                id: id.to_string(),
                from: from.to_string(),
                subject: subject.to_string(),
                snippet: String::new(),
                body: body.to_string(),
            },
        );
    }
}

#[async_trait]
impl MailSource for FakeMailbox {
    async fn list_unread(&self, _after: DateTime<Utc>, max: u32) -> otp_watch::Result<Vec<String>> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .take(max as usize)
            .map(|m| m.id.clone())
            .collect())
    }

    async fn fetch_message(&self, id: &str) -> otp_watch::Result<MailMessage> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or(Error::Api {
                status: 404,
                body: "not found".into(),
            })
    }
}

struct Fixture {
    watcher: OtpWatcher,
    events: UnboundedReceiver<WatchEvent>,
    mailbox: Arc<FakeMailbox>,
    store: Arc<MemoryStore>,
    clipboard: Arc<MemoryClipboard>,
}

fn test_config(token_url: &str) -> WatchConfig {
    WatchConfig::builder()
        .client_id("client-id")
        .client_secret("client-secret")
        .token_url(token_url)
        .poll_interval(Duration::from_secs(3600))
        .auth_timeout(Duration::from_secs(10))
        .build()
        .expect("valid test config")
}

fn fixture(config: &WatchConfig, store: MemoryStore) -> Fixture {
    let store = Arc::new(store);
    let session = AuthSession::new(config.oauth.clone(), config.timeouts.request, store.clone())
        .expect("http client")
        .shared();
    let mailbox = Arc::new(FakeMailbox::default());
    let clipboard = Arc::new(MemoryClipboard::new());
    let (watcher, events) =
        OtpWatcher::with_source(config, session, mailbox.clone(), clipboard.clone());
    Fixture {
        watcher,
        events,
        mailbox,
        store,
        clipboard,
    }
}

async fn next_event<F>(events: &mut UnboundedReceiver<WatchEvent>, wanted: F) -> WatchEvent
where
    F: Fn(&WatchEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel open");
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event within timeout")
}

/// Runs a manual tick, retrying while the background tick is still in flight.
async fn manual_tick(watcher: &OtpWatcher) -> TickOutcome {
    loop {
        match watcher.poller().tick().await.expect("tick") {
            TickOutcome::Skipped => tokio::task::yield_now().await,
            outcome => return outcome,
        }
    }
}

fn state_param(auth_url: &str) -> String {
    url::Url::parse(auth_url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Startup / Polling Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_restored_session_polls_and_deduplicates() {
    let config = test_config("http://127.0.0.1:9/token");
    let mut f = fixture(&config, MemoryStore::with_refresh_token("refresh"));
    f.mailbox.deliver(
        "m1",
        "Security <no-reply@paypal.com>",
        "Your PayPal code",
        "Your verification code is 482913",
    );

    assert!(f.watcher.restore().await);
    assert!(f.watcher.poller().is_running());

    let event = next_event(&mut f.events, |e| matches!(e, WatchEvent::CodesUpdated { .. })).await;
    let WatchEvent::CodesUpdated { codes } = event else {
        unreachable!()
    };
    assert_eq!(codes.len(), 1);
    assert_eq!(codes[0].code, "482913");
    assert_eq!(codes[0].provider, "PayPal");
    assert_eq!(f.clipboard.contents(), "482913");

    // Same message on later ticks adds nothing
    for _ in 0..2 {
        match manual_tick(&f.watcher).await {
            TickOutcome::Completed(report) => assert_eq!(report.new_codes, 0),
            other => panic!("unexpected tick outcome: {other:?}"),
        }
    }
    assert_eq!(f.watcher.codes().len(), 1);

    f.mailbox
        .deliver("m2", "Jane Doe <jane@acmewidgets.io>", "Login", "Enter 7781 to verify");
    match manual_tick(&f.watcher).await {
        TickOutcome::Completed(report) => assert_eq!(report.new_codes, 1),
        other => panic!("unexpected tick outcome: {other:?}"),
    }
    let codes = f.watcher.codes();
    assert_eq!(codes.len(), 2);
    assert_eq!(codes[0].code, "7781");
    assert_eq!(codes[0].provider, "Jane Doe");

    f.watcher.shutdown();
    assert!(!f.watcher.poller().is_running());
}

#[tokio::test]
async fn test_without_stored_token_nothing_polls() {
    let config = test_config("http://127.0.0.1:9/token");
    let f = fixture(&config, MemoryStore::new());
    f.mailbox.deliver("m1", "a@example.com", "Code", "Your code is 1234");

    assert!(!f.watcher.restore().await);
    assert!(!f.watcher.poller().is_running());
    assert_eq!(f.watcher.auth_state().await, AuthState::Unauthenticated);
    assert_eq!(
        f.watcher.poller().tick().await.unwrap(),
        TickOutcome::NotAuthenticated
    );
}

#[tokio::test]
async fn test_history_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = WatchConfig::builder()
        .client_id("client-id")
        .client_secret("client-secret")
        .poll_interval(Duration::from_secs(3600))
        .history_path(dir.path().join("history.json"))
        .build()
        .unwrap();

    let mut first = fixture(&config, MemoryStore::with_refresh_token("refresh"));
    first.mailbox.deliver("m1", "a@example.com", "Code", "Your code is 5150");
    first.watcher.restore().await;
    next_event(&mut first.events, |e| matches!(e, WatchEvent::CodesUpdated { .. })).await;
    // Wait for the tick that emitted the event to finish persisting
    manual_tick(&first.watcher).await;
    first.watcher.shutdown();

    let mut second = fixture(&config, MemoryStore::new());
    assert!(!second.watcher.restore().await);
    assert_eq!(second.watcher.codes().len(), 1);
    let event = next_event(&mut second.events, |e| matches!(e, WatchEvent::CodesUpdated { .. })).await;
    assert!(matches!(event, WatchEvent::CodesUpdated { codes } if codes[0].code == "5150"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_authorization_flow_starts_polling() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "access",
            "refresh_token": "refresh",
            "expires_in": 3600,
            "token_type": "Bearer",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&format!("{}/token", server.uri()));
    let mut f = fixture(&config, MemoryStore::new());
    f.mailbox.deliver("m1", "GitHub <noreply@github.com>", "Sign in", "Code: 90210");

    let attempt = f.watcher.authorize().await.unwrap();
    assert!(matches!(
        f.watcher.auth_state().await,
        AuthState::Authorizing { .. }
    ));

    let callback = format!(
        "{}?code=auth-code&state={}",
        attempt.redirect_uri,
        state_param(&attempt.auth_url)
    );
    let response = reqwest::get(&callback).await.unwrap();
    assert_eq!(response.status(), 200);

    assert_eq!(attempt.outcome().await, AuthOutcome::Completed);
    assert_eq!(f.watcher.auth_state().await, AuthState::Authenticated);
    assert!(f.watcher.poller().is_running());
    assert_eq!(
        f.store
            .get(SERVICE_NAME, REFRESH_TOKEN_ACCOUNT)
            .await
            .unwrap()
            .map(|s| secrecy::ExposeSecret::expose_secret(&s).to_string()),
        Some("refresh".to_string())
    );

    next_event(&mut f.events, |e| *e == WatchEvent::AuthComplete).await;
    next_event(&mut f.events, |e| matches!(e, WatchEvent::CodesUpdated { .. })).await;
    assert_eq!(f.watcher.codes()[0].code, "90210");
    f.watcher.shutdown();
}

#[tokio::test]
async fn test_cancelled_authorization() {
    let config = test_config("http://127.0.0.1:9/token");
    let mut f = fixture(&config, MemoryStore::new());

    let attempt = f.watcher.authorize().await.unwrap();
    assert!(matches!(
        f.watcher.authorize().await,
        Err(Error::AuthInProgress)
    ));

    f.watcher.cancel_authorization();
    assert_eq!(attempt.outcome().await, AuthOutcome::Cancelled);
    next_event(&mut f.events, |e| *e == WatchEvent::AuthCancelled).await;
    assert_eq!(f.watcher.auth_state().await, AuthState::Unauthenticated);
    assert!(!f.watcher.poller().is_running());
}

#[tokio::test]
async fn test_authorize_without_credentials() {
    let config = WatchConfig::builder().build().unwrap();
    let f = fixture(&config, MemoryStore::new());

    let err = f.watcher.authorize().await.unwrap_err();
    assert!(matches!(err, Error::MissingCredentials { .. }));
    assert_eq!(err.category(), otp_watch::ErrorCategory::Configuration);
}

// ─────────────────────────────────────────────────────────────────────────────
// Logout / Clipboard Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_logout_clears_everything() {
    let config = test_config("http://127.0.0.1:9/token");
    let mut f = fixture(&config, MemoryStore::with_refresh_token("refresh"));
    f.mailbox.deliver("m1", "a@example.com", "Code", "Your code is 2468");

    f.watcher.restore().await;
    next_event(&mut f.events, |e| matches!(e, WatchEvent::CodesUpdated { .. })).await;

    f.watcher.logout().await.unwrap();
    assert!(f.watcher.codes().is_empty());
    assert!(!f.watcher.poller().is_running());
    assert_eq!(f.watcher.auth_state().await, AuthState::Unauthenticated);
    assert!(f
        .store
        .get(SERVICE_NAME, REFRESH_TOKEN_ACCOUNT)
        .await
        .unwrap()
        .is_none());
    next_event(&mut f.events, |e| {
        matches!(e, WatchEvent::CodesUpdated { codes } if codes.is_empty())
    })
    .await;
}

#[tokio::test]
async fn test_manual_copy_ignored_while_counting() {
    let config = test_config("http://127.0.0.1:9/token");
    let f = fixture(&config, MemoryStore::new());

    let outcome = f.watcher.copy("135790").await.unwrap();
    assert_eq!(
        outcome,
        CopyOutcome::Started {
            expires_in: Duration::from_secs(30)
        }
    );
    assert_eq!(f.watcher.copy("000000").await.unwrap(), CopyOutcome::Ignored);
    assert_eq!(f.clipboard.contents(), "135790");

    f.watcher.shutdown();
    assert_eq!(f.clipboard.contents(), "135790");
}

#[tokio::test]
async fn test_polled_code_takes_over_manual_copy() {
    let config = test_config("http://127.0.0.1:9/token");
    let mut f = fixture(&config, MemoryStore::with_refresh_token("refresh"));

    assert!(f.watcher.restore().await);
    next_event(&mut f.events, |e| {
        matches!(e, WatchEvent::CodesUpdated { codes } if codes.is_empty())
    })
    .await;

    assert!(matches!(
        f.watcher.copy("111111").await.unwrap(),
        CopyOutcome::Started { .. }
    ));
    let mut remaining = f.watcher.clipboard().remaining();
    assert_eq!(*remaining.borrow_and_update(), Some(30));

    f.mailbox
        .deliver("m1", "a@example.com", "Code", "Your verification code is 482913");
    match manual_tick(&f.watcher).await {
        TickOutcome::Completed(report) => assert_eq!(report.new_codes, 1),
        other => panic!("unexpected tick outcome: {other:?}"),
    }

    assert_eq!(f.clipboard.contents(), "482913");
    match f.watcher.clipboard().state() {
        ClipboardState::Counting { code, .. } => assert_eq!(code, "482913"),
        other => panic!("expected a running countdown, got {other:?}"),
    }
    assert!(remaining.borrow_and_update().is_some());
    assert_eq!(f.watcher.copy("000000").await.unwrap(), CopyOutcome::Ignored);
    assert_eq!(f.clipboard.contents(), "482913");

    f.watcher.shutdown();
    assert_eq!(f.watcher.clipboard().state(), ClipboardState::Idle);
    assert_eq!(*remaining.borrow(), None);
}
