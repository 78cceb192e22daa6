use chrono::{DateTime, Utc};
use thiserror::Error;

/// Reasons a parsed feed or item is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field '{0}'")]
    Missing(&'static str),

    #[error("invalid value for '{field}': {value:?}")]
    Invalid { field: &'static str, value: String },
}

/// Podcast-level data parsed out of an RSS `<channel>`.
///
/// A `Feed` only lives for the duration of one refresh: the refresher copies
/// the fields it needs into the podcast row and drops it.
#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    pub title: String,
    pub description: String,
    pub owner: String,
    pub link: Option<String>,
    /// Two-letter lowercase code, `en` when absent or unreadable.
    pub language: String,
    pub cover_url: Option<String>,
    pub funding_text: String,
    pub funding_url: Option<String>,
    pub explicit: bool,
    /// The publisher marked the show as finished; no further checks needed.
    pub complete: bool,
    pub categories: Vec<String>,
    pub items: Vec<Item>,
}

impl Feed {
    /// Most recent episode publication time.
    pub fn pub_date(&self) -> Option<DateTime<Utc>> {
        self.items.iter().map(|item| item.pub_date).max()
    }
}

/// One episode entry of a [`Feed`].
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub guid: String,
    pub title: String,
    pub link: Option<String>,
    pub media_url: String,
    pub media_type: String,
    pub length: Option<i64>,
    pub duration: String,
    pub episode: Option<i64>,
    pub season: Option<i64>,
    pub episode_type: String,
    pub explicit: bool,
    pub description: String,
    pub pub_date: DateTime<Utc>,
    pub categories: Vec<String>,
    pub cover_url: Option<String>,
}

impl Item {
    /// Item categories flattened into the episode's free-text keywords.
    pub fn keywords(&self) -> String {
        self.categories.join(" ")
    }
}

// ============================================================================
// Coercion helpers
// ============================================================================

const EXPLICIT_TOKENS: &[&str] = &["yes", "true", "explicit", "clean"];
const COMPLETE_TOKENS: &[&str] = &["yes", "true"];

pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_EPISODE_TYPE: &str = "full";

fn is_token(value: Option<&str>, tokens: &[&str]) -> bool {
    value
        .map(|v| v.trim().to_lowercase())
        .is_some_and(|v| tokens.contains(&v.as_str()))
}

/// `itunes:explicit` style flag. Absent or unrecognised text is `false`.
pub fn parse_explicit(value: Option<&str>) -> bool {
    is_token(value, EXPLICIT_TOKENS)
}

/// `itunes:complete` flag. Absent or unrecognised text is `false`.
pub fn parse_complete(value: Option<&str>) -> bool {
    is_token(value, COMPLETE_TOKENS)
}

/// Lenient integer coercion: surrounding whitespace is ignored, anything
/// else that is not a plain integer gives `None`.
pub fn parse_int(value: Option<&str>) -> Option<i64> {
    value.and_then(|v| v.trim().parse().ok())
}

/// Accepts absolute `http`/`https` URLs only.
pub fn parse_url(value: Option<&str>) -> Option<String> {
    let raw = value?.trim();
    let parsed = url::Url::parse(raw).ok()?;
    matches!(parsed.scheme(), "http" | "https").then(|| raw.to_owned())
}

/// Normalises a language tag (`en-US`, `EN`, `fr_CA`) to its first two
/// lowercase letters.
pub fn parse_language(value: Option<&str>) -> String {
    value
        .map(str::trim)
        .filter(|v| v.len() >= 2 && v.is_char_boundary(2))
        .map(|v| v[..2].to_lowercase())
        .filter(|code| code.chars().all(|c| c.is_ascii_alphabetic()))
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_owned())
}

/// Returns the trimmed value, or a [`ValidationError::Missing`] when it is
/// absent or blank.
pub fn required(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .ok_or(ValidationError::Missing(field))
}
