use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Sentinel digest for empty or paywalled bodies. Never matched against,
/// so restricted articles cannot collide with each other.
pub const ZERO_FINGERPRINT: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
// Ad markers that vary between otherwise identical syndicated copies.
static AD_MARKERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(werbung|anzeige|publicité|pubblicità)\b").unwrap());

/// Normalize text for fingerprinting and title comparison: lower-case,
/// punctuation stripped, ad markers removed, whitespace collapsed.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped = NON_WORD.replace_all(&lowered, "");
    let cleaned = AD_MARKERS.replace_all(&stripped, "");
    WHITESPACE.replace_all(&cleaned, " ").trim().to_string()
}

/// Hex SHA-256 over the normalized body. Empty content maps to the zero
/// sentinel instead of the hash of the empty string.
pub fn fingerprint(body: Option<&str>) -> String {
    let body = match body {
        Some(b) if !b.trim().is_empty() => b,
        _ => return ZERO_FINGERPRINT.to_string(),
    };

    let normalized = normalize(body);
    if normalized.is_empty() {
        return ZERO_FINGERPRINT.to_string();
    }

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Normalized title similarity in [0, 1].
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::jaro_winkler(&a, &b)
}

/// Body similarity in [0, 1]: Jaccard over normalized word sets. Word sets
/// keep whole-body comparison cheap where edit distance would not be.
pub fn content_similarity(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    intersection as f64 / union as f64
}
