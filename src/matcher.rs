//! OTP extraction from message text.
//!
//! This module provides the [`Matcher`] trait, a [`RegexMatcher`] building block and
//! the [`OtpExtractor`], an ordered list of rules evaluated first-match-wins.
//!
//! # Example
//!
//! ```
//! use otp_watch::matcher::{Matcher, OtpExtractor, RegexMatcher};
//!
//! let extractor = OtpExtractor::new();
//! assert_eq!(extractor.extract("Your verification code is 482913").as_deref(), Some("482913"));
//! assert_eq!(extractor.extract("Nothing to see here"), None);
//!
//! // Custom single rule
//! let custom = RegexMatcher::new(r"token=([a-f0-9]+)").unwrap();
//! let text = "Click here: https://example.com?token=abc123";
//! assert_eq!(custom.find_match(text).as_deref(), Some("abc123"));
//! ```

use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

/// Trait for matching and extracting content from message text.
///
/// Implement this trait to plug custom extraction logic into the poll loop.
pub trait Matcher: Send + Sync {
    /// Attempts to find and extract matching content from the text.
    ///
    /// Returns `Some(matched_value)` if found, `None` otherwise.
    /// Uses `Cow<str>` to avoid allocations when the match can be borrowed
    /// directly from the input text.
    fn find_match<'a>(&self, text: &'a str) -> Option<Cow<'a, str>>;

    /// Returns a human-readable description of what this matcher looks for.
    ///
    /// Used in logging.
    fn description(&self) -> &str;
}

/// Regex-based matcher that extracts the first capture group.
///
/// # Example
///
/// ```
/// use otp_watch::matcher::{RegexMatcher, Matcher};
///
/// let matcher = RegexMatcher::new(r"code:\s*(\d+)").unwrap();
/// assert_eq!(matcher.find_match("Your code: 42"), Some("42".into()));
/// ```
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    regex: Regex,
    description: String,
}

impl RegexMatcher {
    /// Creates a new regex matcher.
    ///
    /// The regex should contain at least one capture group. The first capture group
    /// will be extracted as the match result.
    ///
    /// # Errors
    ///
    /// Returns an error if the regex pattern is invalid.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(pattern)?;
        Ok(Self {
            description: format!("regex pattern: {pattern}"),
            regex,
        })
    }

    /// Creates a new regex matcher with a custom description.
    ///
    /// # Errors
    ///
    /// Returns an error if the regex pattern is invalid.
    pub fn with_description(
        pattern: &str,
        description: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        let regex = Regex::new(pattern)?;
        Ok(Self {
            description: description.into(),
            regex,
        })
    }
}

impl Matcher for RegexMatcher {
    fn find_match<'a>(&self, text: &'a str) -> Option<Cow<'a, str>> {
        self.regex
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| Cow::Borrowed(m.as_str()))
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Built-in OTP rules, highest confidence first: `(description, pattern)`.
///
/// Every pattern captures digits only. The last rule is a bare six-digit fallback
/// that also fires on dates, amounts and order numbers; it is kept as
/// best-effort behavior.
pub const DEFAULT_RULES: &[(&str, &str)] = &[
    (
        "keyword then code",
        r"(?i)(?:code|verification|otp|pin)[:\s]+(\d{4,8})",
    ),
    (
        "code is your keyword",
        r"(?i)(\d{4,8})\s+(?:is\s+)?your\s+(?:code|otp|verification|pin)",
    ),
    (
        "your keyword is code",
        r"(?i)your\s+(?:code|otp|verification|pin)\s+(?:is[:\s]+)?(\d{4,8})",
    ),
    (
        "enter code to verify",
        r"(?i)enter[:\s]+(\d{4,8})\s+to\s+(?:verify|confirm)",
    ),
    ("standalone 6-digit fallback", r"\b(\d{6})\b"),
];

static DEFAULT_EXTRACTOR: LazyLock<OtpExtractor> = LazyLock::new(|| {
    OtpExtractor::from_rules(DEFAULT_RULES.iter().copied())
        .expect("built-in OTP rules are valid regexes")
});

/// Ordered, first-match-wins OTP extractor.
///
/// # Example
///
/// ```
/// use otp_watch::matcher::OtpExtractor;
///
/// let extractor = OtpExtractor::new();
/// assert_eq!(extractor.extract("123456 is your code").as_deref(), Some("123456"));
/// assert_eq!(extractor.extract("Enter 4821 to verify").as_deref(), Some("4821"));
/// ```
#[derive(Debug, Clone)]
pub struct OtpExtractor {
    rules: Vec<RegexMatcher>,
}

impl Default for OtpExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl OtpExtractor {
    /// Returns the extractor with the built-in [`DEFAULT_RULES`].
    #[must_use]
    pub fn new() -> Self {
        DEFAULT_EXTRACTOR.clone()
    }

    /// Builds an extractor from `(description, pattern)` pairs, evaluated in order.
    ///
    /// # Errors
    ///
    /// Returns an error if any pattern is invalid.
    pub fn from_rules<'r, I>(rules: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = (&'r str, &'r str)>,
    {
        let rules = rules
            .into_iter()
            .map(|(description, pattern)| RegexMatcher::with_description(pattern, description))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Returns a copy of this extractor with `pattern` evaluated before every existing rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is invalid.
    pub fn with_priority_rule(
        mut self,
        pattern: &str,
        description: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        self.rules
            .insert(0, RegexMatcher::with_description(pattern, description)?);
        Ok(self)
    }

    /// Extracts the first code matched by the highest-priority rule.
    #[must_use]
    pub fn extract(&self, text: &str) -> Option<String> {
        self.find_match(text).map(Cow::into_owned)
    }

    /// Extracts a code from the conventional `subject snippet body` concatenation.
    #[must_use]
    pub fn extract_from_parts(&self, subject: &str, snippet: &str, body: &str) -> Option<String> {
        self.extract(&format!("{subject} {snippet} {body}"))
    }

    /// Returns the rules in evaluation order.
    pub fn rules(&self) -> impl Iterator<Item = &RegexMatcher> {
        self.rules.iter()
    }
}

impl Matcher for OtpExtractor {
    fn find_match<'a>(&self, text: &'a str) -> Option<Cow<'a, str>> {
        self.rules.iter().find_map(|rule| rule.find_match(text))
    }

    fn description(&self) -> &str {
        "ordered OTP rules"
    }
}

/// Extracts an OTP with the built-in rules.
#[must_use]
pub fn extract_code(text: &str) -> Option<String> {
    DEFAULT_EXTRACTOR.extract(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regex_matcher() {
        let matcher = RegexMatcher::new(r"code:\s*(\d+)").unwrap();
        assert_eq!(
            matcher.find_match("Your code: 12345").as_deref(),
            Some("12345")
        );
        assert_eq!(matcher.find_match("No code here"), None);
    }

    #[test]
    fn test_regex_matcher_returns_borrowed() {
        let matcher = RegexMatcher::new(r"code:\s*(\d+)").unwrap();
        let result = matcher.find_match("Your code: 12345");
        assert!(matches!(result, Some(Cow::Borrowed(_))));
    }

    #[test]
    fn test_verification_code_scenario() {
        assert_eq!(
            extract_code("Your verification code is 482913").as_deref(),
            Some("482913")
        );
    }

    #[test]
    fn test_keyword_then_code() {
        assert_eq!(extract_code("Code: 1234").as_deref(), Some("1234"));
        assert_eq!(extract_code("OTP 98765432").as_deref(), Some("98765432"));
        assert_eq!(extract_code("pin:5555").as_deref(), Some("5555"));
        assert_eq!(
            extract_code("VERIFICATION: 246810").as_deref(),
            Some("246810")
        );
    }

    #[test]
    fn test_code_is_your_keyword() {
        assert_eq!(extract_code("7788 is your PIN").as_deref(), Some("7788"));
        assert_eq!(extract_code("554433 your otp").as_deref(), Some("554433"));
    }

    #[test]
    fn test_your_keyword_is_code() {
        assert_eq!(extract_code("Your OTP is: 90817").as_deref(), Some("90817"));
    }

    #[test]
    fn test_enter_to_verify() {
        assert_eq!(
            extract_code("Please enter 31337 to confirm your email").as_deref(),
            Some("31337")
        );
    }

    #[test]
    fn test_priority_order() {
        // A keyword match wins over an earlier bare six-digit run
        let text = "Order 123456 shipped. Your code: 4242";
        assert_eq!(extract_code(text).as_deref(), Some("4242"));
    }

    #[test]
    fn test_fallback_six_digit() {
        assert_eq!(
            extract_code("Use 314159 within ten minutes").as_deref(),
            Some("314159")
        );
        // Known false positive: dates-like runs match the fallback
        assert_eq!(extract_code("Invoice 202401").as_deref(), Some("202401"));
        // Five or seven digit runs are not standalone six-digit codes
        assert_eq!(extract_code("Ref 12345 and 1234567"), None);
    }

    #[test]
    fn test_no_match() {
        assert_eq!(extract_code(""), None);
        assert_eq!(extract_code("Welcome to the newsletter"), None);
        assert_eq!(extract_code("code: 123"), None);
    }

    #[test]
    fn test_results_are_digits_only() {
        let samples = [
            "Your code is 123-456",
            "pin 0000",
            "Code:\n\n87654321",
            "1234 is your verification number",
            "abc 999999 xyz",
        ];
        for sample in samples {
            if let Some(code) = extract_code(sample) {
                assert!(code.chars().all(|c| c.is_ascii_digit()), "{sample}");
                assert!((4..=8).contains(&code.len()), "{sample}");
            }
        }
    }

    #[test]
    fn test_extract_from_parts() {
        let extractor = OtpExtractor::new();
        assert_eq!(
            extractor
                .extract_from_parts("Sign in", "", "Your code: 8080")
                .as_deref(),
            Some("8080")
        );
    }

    #[test]
    fn test_priority_rule() {
        let extractor = OtpExtractor::new()
            .with_priority_rule(r"ref-(\d{4})", "reference")
            .unwrap();
        assert_eq!(
            extractor.extract("ref-1111 code: 2222").as_deref(),
            Some("1111")
        );
        assert_eq!(extractor.rules().count(), DEFAULT_RULES.len() + 1);
    }
}
