//! URL filter
//!
//! Fail-open everywhere: an empty, blank or invalid pattern compiles to `None`,
//! and `None` matches every URL. A broken filter must never stop rewriting or
//! block a request.

use regex::Regex;

/// Compilation error for a URL filter pattern, shown to the user as a hint.
#[derive(Debug, thiserror::Error)]
#[error("Invalid regex: {message}")]
pub struct FilterError {
    pub message: String,
}

/// Check a pattern for the editor. Blank patterns are valid (match all).
pub fn validate(pattern: &str) -> Result<(), FilterError> {
    if pattern.trim().is_empty() {
        return Ok(());
    }
    Regex::new(pattern).map(|_| ()).map_err(|e| FilterError {
        message: e.to_string(),
    })
}

/// Compile a pattern, or `None` for "match everything".
pub fn compile(pattern: &str) -> Option<Regex> {
    if pattern.trim().is_empty() {
        return None;
    }
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            log::warn!("URL filter {:?} does not compile, matching all URLs: {}", pattern, e);
            None
        }
    }
}

/// Whether the engine applies to `url`.
pub fn matches(filter: Option<&Regex>, url: &str) -> bool {
    match filter {
        Some(re) => re.is_match(url),
        None => true,
    }
}
