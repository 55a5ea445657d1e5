//! Error classification for a failed backend run (§4.2).
//!
//! Substring match against stderr, checked in priority order so a message
//! that happens to match more than one pattern still resolves to the most
//! actionable class.

use super::types::{ClassifiedError, ErrorClass};

pub fn classify(stderr: &str) -> ClassifiedError {
    let lower = stderr.to_ascii_lowercase();

    if lower.contains("hit your limit") || lower.contains("rate limit") {
        return ClassifiedError {
            class: ErrorClass::RateLimit,
            message: "upstream rate limit".to_string(),
            stderr: stderr.to_string(),
            rate_limit_reset: extract_reset(stderr),
        };
    }

    if lower.contains("is not available for") || lower.contains("requires --verbose") {
        return ClassifiedError {
            class: ErrorClass::InvalidConfig,
            message: "invalid backend configuration".to_string(),
            stderr: stderr.to_string(),
            rate_limit_reset: None,
        };
    }

    if lower.contains("authentication") || lower.contains("http 401") {
        return ClassifiedError {
            class: ErrorClass::ApiError,
            message: "backend API error".to_string(),
            stderr: stderr.to_string(),
            rate_limit_reset: None,
        };
    }

    if lower.contains("signal: killed") {
        return ClassifiedError {
            class: ErrorClass::Timeout,
            message: "backend process was killed".to_string(),
            stderr: stderr.to_string(),
            rate_limit_reset: None,
        };
    }

    ClassifiedError {
        class: ErrorClass::Unknown,
        message: "unclassified backend error".to_string(),
        stderr: stderr.to_string(),
        rate_limit_reset: None,
    }
}

/// Pull a `resets <time>` fragment out of a rate-limit message, e.g.
/// `"You've hit your limit · resets 06:00 (UTC)"` -> `"06:00 (UTC)"`.
fn extract_reset(stderr: &str) -> Option<String> {
    let idx = stderr.to_ascii_lowercase().find("resets ")?;
    let rest = &stderr[idx + "resets ".len()..];
    let end = rest.find(['\n', '"']).unwrap_or(rest.len());
    let reset = rest[..end].trim();
    if reset.is_empty() {
        None
    } else {
        Some(reset.to_string())
    }
}
