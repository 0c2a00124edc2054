//! Sender to provider-label resolution.
//!
//! Turns a raw `From` header into a short label for the UI: a known brand when the
//! sender mentions one, otherwise a cleaned-up display name or the sender's domain.
//!
//! # Example
//!
//! ```
//! use otp_watch::provider::{ProviderRegistry, resolve_provider};
//!
//! assert_eq!(resolve_provider("Security <no-reply@paypal.com>"), "PayPal");
//! assert_eq!(resolve_provider("Jane Doe <jane@acmewidgets.io>"), "Jane Doe");
//!
//! // Add brands for your own senders
//! let mut registry = ProviderRegistry::with_defaults();
//! registry.register("acmewidgets", "Acme");
//! assert_eq!(registry.resolve("Jane Doe <jane@acmewidgets.io>"), "Acme");
//! ```

use regex::Regex;
use std::sync::LazyLock;

/// Ordered brand table: `(keyword, label)`.
///
/// Matching is a case-insensitive substring test and the first hit wins, so
/// declaration order matters where one keyword is contained in another sender.
pub const KNOWN_PROVIDERS: &[(&str, &str)] = &[
    // Big platforms
    ("google", "Google"),
    ("gmail", "Google"),
    ("apple", "Apple"),
    ("microsoft", "Microsoft"),
    ("outlook", "Microsoft"),
    ("amazon", "Amazon"),
    ("facebook", "Facebook"),
    ("instagram", "Instagram"),
    ("meta", "Meta"),
    ("twitter", "Twitter"),
    ("x.com", "X"),
    ("github", "GitHub"),
    ("linkedin", "LinkedIn"),
    // Payments and finance
    ("paypal", "PayPal"),
    ("stripe", "Stripe"),
    ("venmo", "Venmo"),
    ("cashapp", "Cash App"),
    ("coinbase", "Coinbase"),
    ("binance", "Binance"),
    ("robinhood", "Robinhood"),
    ("chase", "Chase"),
    ("wellsfargo", "Wells Fargo"),
    ("bankofamerica", "Bank of America"),
    // Cloud and developer tools
    ("aws", "AWS"),
    ("heroku", "Heroku"),
    ("digitalocean", "DigitalOcean"),
    ("cloudflare", "Cloudflare"),
    ("atlassian", "Atlassian"),
    ("jira", "Jira"),
    ("twilio", "Twilio"),
    ("auth0", "Auth0"),
    ("okta", "Okta"),
    // Commerce and services
    ("shopify", "Shopify"),
    ("ebay", "eBay"),
    ("etsy", "Etsy"),
    ("doordash", "DoorDash"),
    ("uber", "Uber"),
    ("lyft", "Lyft"),
    ("airbnb", "Airbnb"),
    ("spotify", "Spotify"),
    ("netflix", "Netflix"),
    // Productivity
    ("notion", "Notion"),
    ("figma", "Figma"),
    ("canva", "Canva"),
    ("zoom", "Zoom"),
    ("slack", "Slack"),
    ("discord", "Discord"),
    ("dropbox", "Dropbox"),
    ("salesforce", "Salesforce"),
    ("adobe", "Adobe"),
    // Domains
    ("namecheap", "Namecheap"),
    ("godaddy", "GoDaddy"),
];

/// Fallback label when nothing usable can be derived from the sender.
pub const UNKNOWN_PROVIDER: &str = "Unknown";

/// Role-account words that say nothing about who sent the message.
static NOISE_TOKENS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:no-?reply|support|security|verify|verification|accounts?|team|notifications?)\b")
        .expect("noise token regex is valid")
});

static DOMAIN_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([^.>]+)").expect("domain label regex is valid"));

/// Accepted label length in characters (inclusive lower, exclusive upper).
const LABEL_LENGTH: std::ops::Range<usize> = 2..30;

/// A customizable registry for provider resolution.
///
/// Custom keywords are checked before the built-in [`KNOWN_PROVIDERS`], in the
/// order they were registered.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    custom: Vec<(String, String)>,
    use_defaults: bool,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ProviderRegistry {
    /// Creates an empty registry without built-in brands.
    #[must_use]
    pub fn new() -> Self {
        Self {
            custom: Vec::new(),
            use_defaults: false,
        }
    }

    /// Creates a registry that includes the built-in brand table.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            custom: Vec::new(),
            use_defaults: true,
        }
    }

    /// Registers a keyword → label mapping, checked before the built-ins.
    ///
    /// Re-registering a keyword replaces its label but keeps its position.
    pub fn register(&mut self, keyword: impl Into<String>, label: impl Into<String>) {
        let keyword = keyword.into().to_lowercase();
        let label = label.into();
        match self.custom.iter_mut().find(|(k, _)| *k == keyword) {
            Some(entry) => entry.1 = label,
            None => self.custom.push((keyword, label)),
        }
    }

    /// Registers multiple mappings at once.
    pub fn register_many<I, K, L>(&mut self, mappings: I)
    where
        I: IntoIterator<Item = (K, L)>,
        K: Into<String>,
        L: Into<String>,
    {
        for (keyword, label) in mappings {
            self.register(keyword, label);
        }
    }

    /// Removes a custom mapping. Built-in brands cannot be removed.
    pub fn unregister(&mut self, keyword: &str) -> Option<String> {
        let keyword = keyword.to_lowercase();
        let pos = self.custom.iter().position(|(k, _)| *k == keyword)?;
        Some(self.custom.remove(pos).1)
    }

    /// Returns the brand label whose keyword occurs in `sender`, if any.
    #[must_use]
    pub fn brand(&self, sender: &str) -> Option<&str> {
        let sender = sender.to_lowercase();

        if let Some((_, label)) = self.custom.iter().find(|(k, _)| sender.contains(k.as_str())) {
            return Some(label.as_str());
        }

        if self.use_defaults {
            return KNOWN_PROVIDERS
                .iter()
                .find(|(k, _)| sender.contains(k))
                .map(|&(_, label)| label);
        }

        None
    }

    /// Resolves a `From` header value to a display label.
    ///
    /// Resolution order:
    /// 1. Brand keyword anywhere in the sender
    /// 2. Display name with role-account words removed
    /// 3. Raw display name
    /// 4. Capitalized first domain label
    /// 5. [`UNKNOWN_PROVIDER`]
    #[must_use]
    pub fn resolve(&self, sender: &str) -> String {
        if let Some(label) = self.brand(sender) {
            return label.to_string();
        }

        let display = display_name(sender);
        let cleaned = strip_noise(display);
        if label_fits(&cleaned) {
            return cleaned;
        }
        if label_fits(display) {
            return display.to_string();
        }

        if let Some(caps) = DOMAIN_LABEL.captures(sender) {
            let mut chars = caps[1].trim().chars();
            if let Some(first) = chars.next() {
                return format!("{}{}", first.to_uppercase(), chars.as_str());
            }
        }

        UNKNOWN_PROVIDER.to_string()
    }

    /// Returns the number of mappings (custom + built-ins if enabled).
    #[must_use]
    pub fn len(&self) -> usize {
        let defaults = if self.use_defaults {
            KNOWN_PROVIDERS.len()
        } else {
            0
        };
        self.custom.len() + defaults
    }

    /// Returns `true` if the registry has no mappings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves a sender with the built-in brand table.
#[must_use]
pub fn resolve_provider(sender: &str) -> String {
    static DEFAULT: LazyLock<ProviderRegistry> = LazyLock::new(ProviderRegistry::with_defaults);
    DEFAULT.resolve(sender)
}

/// Returns the trimmed portion of a `From` value before the first `<` or `@`.
#[must_use]
pub fn display_name(sender: &str) -> &str {
    let end = sender.find(['<', '@']).unwrap_or(sender.len());
    sender[..end].trim().trim_matches('"').trim()
}

fn strip_noise(name: &str) -> String {
    let stripped = NOISE_TOKENS.replace_all(name, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn label_fits(label: &str) -> bool {
    LABEL_LENGTH.contains(&label.chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brand_scenario() {
        assert_eq!(resolve_provider("Security <no-reply@paypal.com>"), "PayPal");
    }

    #[test]
    fn test_display_name_scenario() {
        assert_eq!(resolve_provider("Jane Doe <jane@acmewidgets.io>"), "Jane Doe");
    }

    #[test]
    fn test_brand_case_insensitive() {
        assert_eq!(resolve_provider("GITHUB <noreply@GitHub.com>"), "GitHub");
        assert_eq!(resolve_provider("alerts@mail.Coinbase.com"), "Coinbase");
        assert_eq!(resolve_provider("\"Team\" <hello@notion.so>"), "Notion");
    }

    #[test]
    fn test_brand_first_hit_wins() {
        // "google" is declared before "gmail"; both map to the same label
        assert_eq!(resolve_provider("Gmail Team <no-reply@google.com>"), "Google");
        // "instagram" is declared before "meta"
        assert_eq!(
            resolve_provider("Instagram <security@mail.instagram.com>"),
            "Instagram"
        );
    }

    #[test]
    fn test_noise_tokens_stripped() {
        assert_eq!(resolve_provider("Acme Support <help@acme.test>"), "Acme");
        assert_eq!(
            resolve_provider("Widgets Notifications <n@widgets.test>"),
            "Widgets"
        );
    }

    #[test]
    fn test_only_noise_falls_back_to_raw_name() {
        assert_eq!(
            resolve_provider("Security Team <x@fooco.test>"),
            "Security Team"
        );
    }

    #[test]
    fn test_domain_fallback() {
        assert_eq!(resolve_provider("<no-reply@fooco.test>"), "Fooco");
        assert_eq!(resolve_provider("@bar"), "Bar");
    }

    #[test]
    fn test_long_display_name_uses_domain() {
        let sender = format!("{} <x@longsender.test>", "A".repeat(40));
        assert_eq!(resolve_provider(&sender), "Longsender");
    }

    #[test]
    fn test_unknown() {
        assert_eq!(resolve_provider(""), UNKNOWN_PROVIDER);
        assert_eq!(resolve_provider("x"), UNKNOWN_PROVIDER);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("Jane Doe <jane@x.io>"), "Jane Doe");
        assert_eq!(display_name("jane@x.io"), "jane");
        assert_eq!(display_name("\"Quoted Name\" <q@x.io>"), "Quoted Name");
        assert_eq!(display_name("<q@x.io>"), "");
    }

    // ProviderRegistry tests

    #[test]
    fn test_registry_custom_before_defaults() {
        let mut registry = ProviderRegistry::with_defaults();
        registry.register("PayPal", "PayPal Business");
        assert_eq!(registry.resolve("service@paypal.com"), "PayPal Business");
    }

    #[test]
    fn test_registry_without_defaults() {
        let registry = ProviderRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.resolve("Security <no-reply@paypal.com>"), "Security");
        assert_eq!(registry.resolve("<no-reply@paypal.com>"), "Paypal");
    }

    #[test]
    fn test_registry_register_many_and_unregister() {
        let mut registry = ProviderRegistry::new();
        registry.register_many([("corp", "Corp"), ("vendor", "Vendor")]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.brand("it@corp.example"), Some("Corp"));

        assert_eq!(registry.unregister("CORP"), Some("Corp".to_string()));
        assert_eq!(registry.brand("it@corp.example"), None);
        assert_eq!(registry.unregister("missing"), None);
    }

    #[test]
    fn test_registry_reregister_replaces_label() {
        let mut registry = ProviderRegistry::new();
        registry.register("corp", "Corp");
        registry.register("corp", "Corp Inc");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.brand("a@corp.example"), Some("Corp Inc"));
    }
}
