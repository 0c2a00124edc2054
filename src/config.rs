//! Configuration for the OTP watcher.
//!
//! Use [`WatchConfigBuilder`] to create a configuration with sensible defaults:
//!
//! ```
//! use otp_watch::WatchConfig;
//!
//! let config = WatchConfig::builder()
//!     .client_id("1234.apps.googleusercontent.com")
//!     .client_secret("client-secret")
//!     .build()
//!     .expect("valid config");
//! assert_eq!(config.polling.interval.as_millis(), 8000);
//! ```
//!
//! Or from the environment with [`WatchConfig::from_env`].

use crate::error::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Google's OAuth 2.0 authorization endpoint.
pub const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
/// Google's OAuth 2.0 token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Read-only Gmail scope.
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";
/// Gmail REST API root for the signed-in user.
pub const DEFAULT_API_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Key in [`ClipboardConfig::provider_auto_copy`] consulted when a provider has no entry.
pub const DEFAULT_PROVIDER_KEY: &str = "default";

/// Complete watcher configuration.
///
/// Create using [`WatchConfig::builder()`] or [`WatchConfig::from_env()`].
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// OAuth client and endpoints.
    pub oauth: OAuthConfig,
    /// Mailbox API root (overridable for testing).
    pub api_base_url: String,
    /// Poll loop timing and batch size.
    pub polling: PollingConfig,
    /// Seen-message cache and history sizes.
    pub cache: CacheConfig,
    /// Clipboard expiry and auto-copy preferences.
    pub clipboard: ClipboardConfig,
    /// Timeouts.
    pub timeouts: TimeoutConfig,
    /// Whether new codes raise a notification event.
    pub notifications_enabled: bool,
    /// Where history is saved between runs. `None` keeps it in memory only.
    pub history_path: Option<PathBuf>,
}

/// OAuth client configuration.
///
/// Note: The `client_secret` field is stored as a [`SecretString`] to prevent
/// accidental logging.
#[derive(Clone)]
pub struct OAuthConfig {
    /// OAuth client id. Empty means "not configured".
    pub client_id: String,
    client_secret: SecretString,
    /// Authorization endpoint.
    pub auth_url: String,
    /// Token endpoint.
    pub token_url: String,
    /// Requested scope.
    pub scope: String,
    /// Port the callback listener binds on `127.0.0.1`. `0` lets the OS choose.
    pub redirect_port: u16,
}

impl std::fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("scope", &self.scope)
            .field("redirect_port", &self.redirect_port)
            .finish()
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: SecretString::from(String::new()),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            redirect_port: 0,
        }
    }
}

impl OAuthConfig {
    /// Returns the client secret.
    ///
    /// The secret is intentionally not directly accessible to prevent accidental logging.
    #[must_use]
    pub fn client_secret(&self) -> &str {
        self.client_secret.expose_secret()
    }

    /// Fails with [`Error::MissingCredentials`] unless both id and secret are set.
    ///
    /// # Errors
    ///
    /// See above.
    pub fn ensure_credentials(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::MissingCredentials {
                missing: "client_id",
            });
        }
        if self.client_secret().trim().is_empty() {
            return Err(Error::MissingCredentials {
                missing: "client_secret",
            });
        }
        Ok(())
    }
}

/// Poll loop configuration.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Interval between ticks.
    pub interval: Duration,
    /// Only messages received within this trailing window are queried.
    pub lookback: Duration,
    /// Maximum messages listed per tick.
    pub max_messages: u32,
    /// Minimum gap between two notification events.
    pub notification_cooldown: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(8000),
            lookback: Duration::from_millis(300_000), // 5 minutes
            max_messages: 10,
            notification_cooldown: Duration::from_millis(3000),
        }
    }
}

/// Bounded cache sizes.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Seen-message cache cap.
    pub seen_capacity: usize,
    /// Ids kept when the seen-message cache overflows.
    pub seen_keep: usize,
    /// Maximum history entries.
    pub max_history: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            seen_capacity: 50,
            seen_keep: 30,
            max_history: 10,
        }
    }
}

/// Clipboard configuration.
#[derive(Debug, Clone)]
pub struct ClipboardConfig {
    /// How long a copied code stays on the clipboard.
    pub timeout: Duration,
    /// Global auto-copy switch for newly detected codes.
    pub auto_copy: bool,
    /// Per-provider auto-copy overrides, keyed by provider label or [`DEFAULT_PROVIDER_KEY`].
    pub provider_auto_copy: HashMap<String, bool>,
}

impl Default for ClipboardConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            auto_copy: true,
            provider_auto_copy: HashMap::new(),
        }
    }
}

impl ClipboardConfig {
    /// Whether a new code from `provider` should be copied automatically.
    #[must_use]
    pub fn should_auto_copy(&self, provider: &str) -> bool {
        self.auto_copy
            && self
                .provider_auto_copy
                .get(provider)
                .or_else(|| self.provider_auto_copy.get(DEFAULT_PROVIDER_KEY))
                .copied()
                .unwrap_or(true)
    }
}

/// Timeout configuration.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// How long an authorization attempt waits for its callback.
    pub auth: Duration,
    /// Per-request timeout for the token endpoint and mailbox API.
    pub request: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            auth: Duration::from_millis(300_000),
            request: Duration::from_secs(30),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            oauth: OAuthConfig::default(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            polling: PollingConfig::default(),
            cache: CacheConfig::default(),
            clipboard: ClipboardConfig::default(),
            timeouts: TimeoutConfig::default(),
            notifications_enabled: true,
            history_path: None,
        }
    }
}

impl WatchConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> WatchConfigBuilder {
        WatchConfigBuilder::default()
    }

    /// Reads configuration from process environment variables.
    ///
    /// Recognized: `GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET`,
    /// `OTPWATCH_POLL_INTERVAL_MS`, `OTPWATCH_AUTH_TIMEOUT_MS`, `OTPWATCH_LOOKBACK_MS`,
    /// `OTPWATCH_MAX_MESSAGES`, `OTPWATCH_SEEN_CACHE_SIZE`, `OTPWATCH_SEEN_KEEP_SIZE`,
    /// `OTPWATCH_MAX_HISTORY`, `OTPWATCH_CLIPBOARD_TIMEOUT_SECONDS`, `OTPWATCH_AUTH_PORT`,
    /// `OTPWATCH_NOTIFICATIONS_ENABLED`, `OTPWATCH_HISTORY_PATH`. Missing credentials
    /// are not an error here; authorization reports them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a variable is set but cannot be parsed,
    /// or the result fails validation.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut builder = Self::builder();

        if let Some(id) = var("GOOGLE_CLIENT_ID") {
            builder = builder.client_id(id.trim());
        }
        if let Some(secret) = var("GOOGLE_CLIENT_SECRET") {
            builder = builder.client_secret(secret.trim());
        }
        if let Some(ms) = parse_var::<u64>(&var, "OTPWATCH_POLL_INTERVAL_MS")? {
            builder = builder.poll_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_var::<u64>(&var, "OTPWATCH_AUTH_TIMEOUT_MS")? {
            builder = builder.auth_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_var::<u64>(&var, "OTPWATCH_LOOKBACK_MS")? {
            builder = builder.lookback(Duration::from_millis(ms));
        }
        if let Some(n) = parse_var::<u32>(&var, "OTPWATCH_MAX_MESSAGES")? {
            builder = builder.max_messages(n);
        }
        if let Some(n) = parse_var::<usize>(&var, "OTPWATCH_SEEN_CACHE_SIZE")? {
            builder.cache.seen_capacity = n;
        }
        if let Some(n) = parse_var::<usize>(&var, "OTPWATCH_SEEN_KEEP_SIZE")? {
            builder.cache.seen_keep = n;
        }
        if let Some(n) = parse_var::<usize>(&var, "OTPWATCH_MAX_HISTORY")? {
            builder = builder.max_history(n);
        }
        if let Some(secs) = parse_var::<u64>(&var, "OTPWATCH_CLIPBOARD_TIMEOUT_SECONDS")? {
            builder = builder.clipboard_timeout(Duration::from_secs(secs));
        }
        if let Some(port) = parse_var::<u16>(&var, "OTPWATCH_AUTH_PORT")? {
            builder = builder.redirect_port(port);
        }
        if let Some(raw) = var("OTPWATCH_NOTIFICATIONS_ENABLED") {
            builder = builder.notifications_enabled(parse_flag("OTPWATCH_NOTIFICATIONS_ENABLED", &raw)?);
        }
        if let Some(path) = var("OTPWATCH_HISTORY_PATH") {
            builder = builder.history_path(path.trim());
        }

        builder.build()
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| Error::InvalidConfig {
                message: format!("{key}={raw:?}: {e}"),
            })
        })
        .transpose()
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidConfig {
            message: format!("{key}={raw:?}: expected a boolean"),
        }),
    }
}

/// Builder for [`WatchConfig`].
#[derive(Debug, Default)]
pub struct WatchConfigBuilder {
    client_id: Option<String>,
    client_secret: Option<String>,
    token_url: Option<String>,
    redirect_port: Option<u16>,
    api_base_url: Option<String>,
    polling: PollingConfig,
    cache: CacheConfig,
    clipboard: ClipboardConfig,
    timeouts: TimeoutConfig,
    notifications_enabled: Option<bool>,
    history_path: Option<PathBuf>,
}

impl WatchConfigBuilder {
    /// Sets the OAuth client id.
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the OAuth client secret.
    #[must_use]
    pub fn client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    /// Overrides the token endpoint.
    #[must_use]
    pub fn token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = Some(url.into());
        self
    }

    /// Sets the callback listener port. Default is 0 (OS-assigned).
    #[must_use]
    pub fn redirect_port(mut self, port: u16) -> Self {
        self.redirect_port = Some(port);
        self
    }

    /// Overrides the mailbox API root.
    #[must_use]
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.polling.interval = interval;
        self
    }

    /// Sets the lookback window.
    #[must_use]
    pub fn lookback(mut self, lookback: Duration) -> Self {
        self.polling.lookback = lookback;
        self
    }

    /// Sets the maximum messages listed per tick.
    #[must_use]
    pub fn max_messages(mut self, max: u32) -> Self {
        self.polling.max_messages = max;
        self
    }

    /// Sets the seen-message cache cap and the number of ids kept on overflow.
    #[must_use]
    pub fn seen_cache(mut self, capacity: usize, keep: usize) -> Self {
        self.cache.seen_capacity = capacity;
        self.cache.seen_keep = keep;
        self
    }

    /// Sets the maximum history size.
    #[must_use]
    pub fn max_history(mut self, max: usize) -> Self {
        self.cache.max_history = max;
        self
    }

    /// Sets how long a copied code stays on the clipboard.
    #[must_use]
    pub fn clipboard_timeout(mut self, timeout: Duration) -> Self {
        self.clipboard.timeout = timeout;
        self
    }

    /// Enables or disables auto-copy of newly detected codes.
    #[must_use]
    pub fn auto_copy(mut self, enabled: bool) -> Self {
        self.clipboard.auto_copy = enabled;
        self
    }

    /// Overrides auto-copy for one provider label (or [`DEFAULT_PROVIDER_KEY`]).
    #[must_use]
    pub fn provider_auto_copy(mut self, provider: impl Into<String>, enabled: bool) -> Self {
        self.clipboard
            .provider_auto_copy
            .insert(provider.into(), enabled);
        self
    }

    /// Sets the authorization callback timeout.
    #[must_use]
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.auth = timeout;
        self
    }

    /// Enables or disables notification events.
    #[must_use]
    pub fn notifications_enabled(mut self, enabled: bool) -> Self {
        self.notifications_enabled = Some(enabled);
        self
    }

    /// Saves history to `path` between runs.
    #[must_use]
    pub fn history_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.history_path = Some(path.into());
        self
    }

    /// Builds the configuration.
    ///
    /// Credentials are optional here: a watcher without them can still restore a
    /// stored session, and [`crate::AuthSession::begin_authorization`] reports them
    /// as missing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if an endpoint is not a valid URL or a
    /// duration or size is zero.
    pub fn build(self) -> Result<WatchConfig> {
        let defaults = OAuthConfig::default();
        let oauth = OAuthConfig {
            client_id: self.client_id.unwrap_or_default(),
            client_secret: SecretString::from(self.client_secret.unwrap_or_default()),
            auth_url: defaults.auth_url,
            token_url: self.token_url.unwrap_or(defaults.token_url),
            scope: defaults.scope,
            redirect_port: self.redirect_port.unwrap_or(defaults.redirect_port),
        };
        let api_base_url = self
            .api_base_url
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

        for (name, value) in [
            ("auth_url", &oauth.auth_url),
            ("token_url", &oauth.token_url),
            ("api_base_url", &api_base_url),
        ] {
            url::Url::parse(value).map_err(|e| Error::InvalidConfig {
                message: format!("{name} {value:?} is not a valid URL: {e}"),
            })?;
        }

        let polling = self.polling;
        if polling.interval.is_zero() {
            return Err(invalid("poll interval must be greater than zero"));
        }
        if polling.max_messages == 0 {
            return Err(invalid("max messages must be at least 1"));
        }

        let cache = self.cache;
        if cache.seen_capacity == 0 || cache.max_history == 0 {
            return Err(invalid("cache sizes must be at least 1"));
        }
        if cache.seen_keep > cache.seen_capacity {
            return Err(invalid("seen keep size cannot exceed the seen cache size"));
        }

        let clipboard = self.clipboard;
        if clipboard.timeout < Duration::from_secs(1) {
            return Err(invalid("clipboard timeout must be at least one second"));
        }

        let timeouts = self.timeouts;
        if timeouts.auth.is_zero() || timeouts.request.is_zero() {
            return Err(invalid("timeouts must be greater than zero"));
        }

        Ok(WatchConfig {
            oauth,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            polling,
            cache,
            clipboard,
            timeouts,
            notifications_enabled: self.notifications_enabled.unwrap_or(true),
            history_path: self.history_path,
        })
    }
}

fn invalid(message: &str) -> Error {
    Error::InvalidConfig {
        message: message.to_string(),
    }
}
