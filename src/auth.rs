//! OAuth session: authorization code flow with PKCE, token refresh and
//! refresh-token persistence.
//!
//! # State machine
//!
//! ```text
//! Unauthenticated ──begin_authorization──▶ Authorizing ──complete_authorization──▶ Authenticated
//!        ▲                                      │                                       │
//!        └────── cancel / failed exchange ──────┘                                       │
//!        └──────────────────────────────── clear ───────────────────────────────────────┘
//! ```
//!
//! [`AuthSession::restore`] jumps straight to `Authenticated` when a refresh token
//! is stored; the first API call then refreshes the access token.

use crate::config::OAuthConfig;
use crate::error::{truncate_body, Error, Result};
use crate::secrets::{SecretStore, REFRESH_TOKEN_ACCOUNT, SERVICE_NAME};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Access tokens this close to expiry are refreshed before use.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Path the provider redirects to.
pub const CALLBACK_PATH: &str = "/callback";

/// An [`AuthSession`] shared between the callback server, mail client and watcher.
pub type SharedSession = Arc<Mutex<AuthSession>>;

/// Authorization state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// No usable credentials.
    Unauthenticated,
    /// Waiting for the provider to redirect back to `redirect_uri`.
    Authorizing {
        /// Redirect URI registered with this attempt.
        redirect_uri: String,
    },
    /// A token pair or refresh token is held.
    Authenticated,
}

/// A started authorization attempt.
///
/// The listener is already bound to the port in `redirect_uri`; hand it to the
/// callback server.
#[derive(Debug)]
pub struct PendingAuthorization {
    /// URL to open in the user's browser.
    pub auth_url: String,
    /// Redirect URI embedded in `auth_url`.
    pub redirect_uri: String,
    /// Listener reserved for the callback.
    pub listener: TcpListener,
}

/// PKCE verifier and CSRF state of the attempt in flight.
struct Grant {
    verifier: String,
    state: String,
    redirect_uri: String,
}

struct AccessToken {
    token: SecretString,
    expires_at: Option<Instant>,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        self.expires_at
            .map_or(true, |at| {
                at.saturating_duration_since(Instant::now()) > REFRESH_MARGIN
            })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// OAuth credentials and state for the mailbox account.
pub struct AuthSession {
    oauth: OAuthConfig,
    http: reqwest::Client,
    store: Arc<dyn SecretStore>,
    state: AuthState,
    grant: Option<Grant>,
    access: Option<AccessToken>,
    refresh_token: Option<SecretString>,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("oauth", &self.oauth)
            .field("state", &self.state)
            .field("has_access_token", &self.access.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

impl AuthSession {
    /// Creates an unauthenticated session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the HTTP client cannot be built.
    pub fn new(
        oauth: OAuthConfig,
        request_timeout: Duration,
        store: Arc<dyn SecretStore>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|source| Error::Transport {
                context: "http client",
                source,
            })?;
        Ok(Self::with_client(oauth, http, store))
    }

    /// Creates an unauthenticated session using an existing HTTP client.
    #[must_use]
    pub fn with_client(
        oauth: OAuthConfig,
        http: reqwest::Client,
        store: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            oauth,
            http,
            store,
            state: AuthState::Unauthenticated,
            grant: None,
            access: None,
            refresh_token: None,
        }
    }

    /// Wraps the session for sharing.
    #[must_use]
    pub fn shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &AuthState {
        &self.state
    }

    /// Returns `true` in the `Authenticated` state.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state == AuthState::Authenticated
    }

    /// Loads a stored refresh token and, if one exists, marks the session
    /// authenticated without contacting the provider.
    ///
    /// Store failures are logged and treated as "no token".
    #[instrument(name = "AuthSession::restore", skip_all)]
    pub async fn restore(&mut self) -> bool {
        match self.store.get(SERVICE_NAME, REFRESH_TOKEN_ACCOUNT).await {
            Ok(Some(token)) if !token.expose_secret().is_empty() => {
                self.refresh_token = Some(token);
                self.access = None;
                self.state = AuthState::Authenticated;
                info!("Restored stored session");
                true
            }
            Ok(_) => {
                debug!("No stored refresh token");
                false
            }
            Err(e) => {
                warn!(error = %e, "Failed to read stored refresh token");
                false
            }
        }
    }

    /// Starts an authorization attempt.
    ///
    /// Binds the callback listener on `127.0.0.1` and the configured port, then
    /// builds the provider URL with offline access, forced consent, PKCE (S256)
    /// and a random `state`.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingCredentials`] if the client id or secret is empty.
    /// - [`Error::AuthInProgress`] if an attempt is already waiting.
    /// - [`Error::Bind`] if the listener cannot be bound.
    #[instrument(name = "AuthSession::begin_authorization", skip_all)]
    pub async fn begin_authorization(&mut self) -> Result<PendingAuthorization> {
        self.oauth.ensure_credentials()?;
        if matches!(self.state, AuthState::Authorizing { .. }) {
            return Err(Error::AuthInProgress);
        }

        let addr = format!("127.0.0.1:{}", self.oauth.redirect_port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| Error::Bind {
                addr: addr.clone(),
                source,
            })?;
        let port = listener
            .local_addr()
            .map_err(|source| Error::Bind { addr, source })?
            .port();
        let redirect_uri = format!("http://127.0.0.1:{port}{CALLBACK_PATH}");

        let (verifier, challenge) = pkce_pair();
        let state = random_state();
        let auth_url = url::Url::parse_with_params(
            &self.oauth.auth_url,
            &[
                ("client_id", self.oauth.client_id.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", self.oauth.scope.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("code_challenge", challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("state", state.as_str()),
            ],
        )
        .map_err(|e| Error::InvalidConfig {
            message: format!("auth_url: {e}"),
        })?
        .to_string();

        self.grant = Some(Grant {
            verifier,
            state,
            redirect_uri: redirect_uri.clone(),
        });
        self.state = AuthState::Authorizing {
            redirect_uri: redirect_uri.clone(),
        };
        info!(port, "Authorization started");

        Ok(PendingAuthorization {
            auth_url,
            redirect_uri,
            listener,
        })
    }

    /// Exchanges the authorization `code` for tokens.
    ///
    /// `state` must match the value sent in the authorization URL. On success the
    /// refresh token (if issued) is persisted and the session becomes
    /// `Authenticated`. On any failure a session that held no refresh token
    /// returns to `Unauthenticated`.
    ///
    /// # Errors
    ///
    /// - [`Error::Exchange`] if no attempt is in progress, the state does not match
    ///   or the provider rejects the code.
    /// - [`Error::Transport`] if the token endpoint cannot be reached.
    /// - [`Error::Decode`] if the token response is malformed.
    #[instrument(name = "AuthSession::complete_authorization", skip_all)]
    pub async fn complete_authorization(&mut self, code: &str, state: &str) -> Result<()> {
        let result = self.exchange_code(code, state).await;
        self.grant = None;
        match result {
            Ok(tokens) => {
                self.accept_tokens(tokens).await;
                self.state = AuthState::Authenticated;
                info!("Authorization complete");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Authorization failed");
                self.state = self.idle_state();
                Err(e)
            }
        }
    }

    /// Whether `state` is the CSRF state of the attempt in flight.
    #[must_use]
    pub fn expects_state(&self, state: &str) -> bool {
        self.grant.as_ref().is_some_and(|grant| grant.state == state)
    }

    async fn exchange_code(&self, code: &str, state: &str) -> Result<TokenResponse> {
        let grant = self.grant.as_ref().ok_or_else(|| Error::Exchange {
            reason: "no authorization in progress".into(),
        })?;
        if grant.state != state {
            return Err(Error::Exchange {
                reason: "state mismatch".into(),
            });
        }

        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.oauth.client_id.as_str()),
            ("client_secret", self.oauth.client_secret()),
            ("redirect_uri", grant.redirect_uri.as_str()),
            ("code_verifier", grant.verifier.as_str()),
        ];
        self.post_token(&form, "token exchange").await
    }

    /// Drops the attempt in flight. No-op unless `Authorizing`.
    ///
    /// A session without a refresh token returns to `Unauthenticated`.
    pub fn cancel_authorization(&mut self) {
        if matches!(self.state, AuthState::Authorizing { .. }) {
            debug!("Authorization cancelled");
            self.grant = None;
            self.state = self.idle_state();
        }
    }

    /// State to fall back to when an attempt ends without new tokens: a session
    /// that was already signed in stays signed in.
    fn idle_state(&self) -> AuthState {
        if self.refresh_token.is_some() {
            AuthState::Authenticated
        } else {
            AuthState::Unauthenticated
        }
    }

    /// Deletes the stored refresh token, forgets in-memory tokens and returns
    /// to `Unauthenticated`.
    ///
    /// Local state is reset even if the store fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SecretStore`] if the stored token cannot be deleted.
    #[instrument(name = "AuthSession::clear", skip_all)]
    pub async fn clear(&mut self) -> Result<()> {
        self.grant = None;
        self.access = None;
        self.refresh_token = None;
        self.state = AuthState::Unauthenticated;
        self.store.delete(SERVICE_NAME, REFRESH_TOKEN_ACCOUNT).await?;
        info!("Session cleared");
        Ok(())
    }

    /// Returns a bearer token, refreshing it when missing or near expiry.
    ///
    /// # Errors
    ///
    /// - [`Error::NotAuthenticated`] outside the `Authenticated` state or without a
    ///   refresh token to fall back on.
    /// - Any error from the refresh request, see [`force_refresh`](Self::force_refresh).
    pub async fn access_token(&mut self) -> Result<SecretString> {
        if !self.is_authenticated() {
            return Err(Error::NotAuthenticated);
        }
        if let Some(access) = self.access.as_ref().filter(|a| a.is_fresh()) {
            return Ok(access.token.clone());
        }
        self.force_refresh().await
    }

    /// Refreshes the access token unconditionally.
    ///
    /// A rotated refresh token is persisted. If the provider reports the refresh
    /// token as revoked (`invalid_grant`) the session is cleared.
    ///
    /// # Errors
    ///
    /// - [`Error::NotAuthenticated`] without a refresh token.
    /// - [`Error::Exchange`] if the provider rejects the refresh token.
    /// - [`Error::Transport`] if the token endpoint cannot be reached.
    #[instrument(name = "AuthSession::force_refresh", skip_all)]
    pub async fn force_refresh(&mut self) -> Result<SecretString> {
        let refresh_token = self
            .refresh_token
            .as_ref()
            .ok_or(Error::NotAuthenticated)?
            .expose_secret()
            .to_string();

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", self.oauth.client_id.as_str()),
            ("client_secret", self.oauth.client_secret()),
        ];
        match self.post_token(&form, "token refresh").await {
            Ok(tokens) => {
                self.accept_tokens(tokens).await;
                debug!("Access token refreshed");
                self.access
                    .as_ref()
                    .map(|a| a.token.clone())
                    .ok_or(Error::NotAuthenticated)
            }
            Err(Error::Exchange { reason }) if reason.starts_with("invalid_grant") => {
                warn!("Refresh token revoked, clearing session");
                if let Err(e) = self.clear().await {
                    warn!(error = %e, "Failed to delete revoked refresh token");
                }
                Err(Error::Exchange { reason })
            }
            Err(e) => Err(e),
        }
    }

    async fn post_token(&self, form: &[(&str, &str)], context: &'static str) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.oauth.token_url)
            .form(form)
            .send()
            .await
            .map_err(|source| Error::Transport { context, source })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| Error::Transport { context, source })?;

        if !status.is_success() {
            let reason = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) => match err.error_description {
                    Some(description) => format!("{}: {}", err.error, truncate_body(&description)),
                    None => err.error,
                },
                Err(_) => format!("HTTP {}: {}", status.as_u16(), truncate_body(&body)),
            };
            return Err(Error::Exchange { reason });
        }

        serde_json::from_str(&body).map_err(|e| Error::Decode {
            what: "token response",
            message: e.to_string(),
        })
    }

    async fn accept_tokens(&mut self, tokens: TokenResponse) {
        self.access = Some(AccessToken {
            token: SecretString::from(tokens.access_token),
            expires_at: tokens
                .expires_in
                .map(|secs| Instant::now() + Duration::from_secs(secs)),
        });

        match tokens.refresh_token {
            Some(refresh) => {
                if let Err(e) = self
                    .store
                    .set(SERVICE_NAME, REFRESH_TOKEN_ACCOUNT, &refresh)
                    .await
                {
                    warn!(error = %e, "Failed to persist refresh token");
                }
                self.refresh_token = Some(SecretString::from(refresh));
            }
            None if self.refresh_token.is_none() => {
                warn!("No refresh token issued, session will not survive a restart");
            }
            None => {}
        }
    }
}

/// Returns `(verifier, challenge)` where challenge is the unpadded base64url SHA-256 of verifier.
fn pkce_pair() -> (String, String) {
    let mut buf = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut buf);
    let verifier = URL_SAFE_NO_PAD.encode(buf);
    let challenge = pkce_challenge(&verifier);
    (verifier, challenge)
}

fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn random_state() -> String {
    let mut buf = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}
