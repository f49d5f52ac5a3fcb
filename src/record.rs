use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::extract::RawListing;

static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());
// "Serving the Greater Springfield Area" style service-area boilerplate,
// not a street address.
static SERVICE_AREA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Serving the\b").unwrap());

const INFO_SNIPPET_MARKER: &str = "From Business";
const INFO_SNIPPET_PREFIX_LEN: usize = 15; // "From Business: "

const RATING_WORDS: &[&str] = &["one", "two", "three", "four", "five"];

/// One normalized business listing. Absent fields are omitted from the
/// serialized output entirely, never emitted as null.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_ad: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info_snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
}

/// Turn one raw field set into a normalized record.
pub fn normalize(raw: &RawListing) -> ResultRecord {
    let (review_snippet, info_snippet) = classify_snippet(raw.snippet.as_deref());

    ResultRecord {
        is_ad: raw.is_ad.then_some(true),
        url: clean_text(raw.url.as_deref()),
        name: clean_text(raw.name.as_deref()),
        address: clean_text(raw.address.as_deref()).filter(|a| !SERVICE_AREA_RE.is_match(a)),
        email: raw.email_attr.as_deref().and_then(normalize_email),
        phone: clean_text(raw.phone.as_deref()),
        website: clean_text(raw.website.as_deref()),
        rating: raw.rating_class.as_deref().and_then(parse_rating),
        rating_count: raw.rating_count_text.as_deref().and_then(parse_count),
        review_snippet,
        info_snippet,
        image: raw.image.as_deref().and_then(normalize_image),
        categories: if raw.categories.is_empty() {
            None
        } else {
            Some(raw.categories.clone())
        },
    }
}

/// Trim and demote empty strings to absent.
fn clean_text(text: Option<&str>) -> Option<String> {
    let t = text?.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Decode a rating indicator class like "result-rating three half" into a
/// numeric rating. Exactly one of one..five is expected; "half" adds 0.5.
/// No word match → absent.
pub fn parse_rating(class_attr: &str) -> Option<f64> {
    let tokens: Vec<&str> = class_attr.split_whitespace().collect();
    let base = RATING_WORDS
        .iter()
        .position(|w| tokens.contains(w))
        .map(|i| (i + 1) as f64)?;
    let half = if tokens.contains(&"half") { 0.5 } else { 0.0 };
    Some(base + half)
}

/// First integer run in a rating-count text like "(12)".
fn parse_count(text: &str) -> Option<u32> {
    DIGITS_RE.find(text)?.as_str().parse().ok()
}

/// "mailto:info@example.com?subject=..." → "info@example.com".
/// Already-bare addresses pass through unchanged.
fn normalize_email(attr: &str) -> Option<String> {
    let addr = attr.trim().strip_prefix("mailto:").unwrap_or(attr.trim());
    let addr = addr.split('?').next().unwrap_or(addr).trim();
    if addr.is_empty() {
        None
    } else {
        Some(addr.to_string())
    }
}

/// Strip the size-suffix segment from an image URL: split on the first
/// underscore and keep the prefix.
fn normalize_image(src: &str) -> Option<String> {
    let src = src.trim();
    if src.is_empty() {
        return None;
    }
    Some(src.split('_').next().unwrap_or(src).to_string())
}

/// A snippet containing the "From Business" marker is informational and
/// surfaces with the marker prefix removed; otherwise it is a review
/// snippet verbatim. The two are mutually exclusive.
fn classify_snippet(snippet: Option<&str>) -> (Option<String>, Option<String>) {
    let Some(s) = clean_text(snippet) else {
        return (None, None);
    };
    if s.contains(INFO_SNIPPET_MARKER) {
        let stripped: String = s.chars().skip(INFO_SNIPPET_PREFIX_LEN).collect();
        (None, clean_text(Some(&stripped)))
    } else {
        (Some(s), None)
    }
}

// ── Tests ──
