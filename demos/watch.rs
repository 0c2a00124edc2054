//! Example: Watch a Gmail inbox for one-time passcodes.
//!
//! Restores a saved session from the OS keychain, or prints an authorization
//! URL to open in the browser. Detected codes are printed as they arrive and
//! copied to an in-process clipboard.
//!
//! # Usage
//!
//! ```bash
//! # .env or environment
//! export GOOGLE_CLIENT_ID="your-client-id.apps.googleusercontent.com"
//! export GOOGLE_CLIENT_SECRET="your-client-secret"
//! # Optional
//! export OTPWATCH_POLL_INTERVAL_MS=8000
//! export OTPWATCH_HISTORY_PATH="$HOME/.otp-watch/history.json"
//! export RUST_LOG=otp_watch=debug
//!
//! cargo run --example watch
//! ```
//!
//! Pass `--logout` to forget the stored session and history.

use otp_watch::{KeyringStore, MemoryClipboard, OtpWatcher, WatchConfig, WatchEvent};
use std::env;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> otp_watch::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("otp_watch=info")),
        )
        .with_target(true)
        .init();

    let config = WatchConfig::from_env()?;
    tracing::debug!(?config, "Configuration loaded");

    let (watcher, mut events) = OtpWatcher::new(
        config,
        Arc::new(KeyringStore::new()),
        Arc::new(MemoryClipboard::new()),
    )?;

    if env::args().any(|arg| arg == "--logout") {
        watcher.logout().await?;
        println!("Logged out.");
        return Ok(());
    }

    if watcher.restore().await {
        println!("Restored saved session, watching for codes...");
    } else {
        let attempt = watcher.authorize().await?;
        println!("Open this URL to sign in:\n\n  {}\n", attempt.auth_url);
        println!("Waiting for the redirect on {}", attempt.redirect_uri);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(WatchEvent::CodesUpdated { codes }) => {
                    if let Some(latest) = codes.first() {
                        println!(
                            "[{}] {} from {}: {}",
                            latest.timestamp.format("%H:%M:%S"),
                            latest.provider,
                            latest.sender,
                            latest.code
                        );
                    }
                }
                Some(WatchEvent::AuthComplete) => println!("Signed in, watching for codes..."),
                Some(WatchEvent::AuthCancelled) => println!("Sign in cancelled."),
                Some(WatchEvent::AuthError { message }) => {
                    eprintln!("Sign in failed: {message}");
                    break;
                }
                Some(WatchEvent::Notification { title, body }) => println!("{title}: {body}"),
                None => break,
            },
        }
    }

    watcher.shutdown();
    Ok(())
}
