//! URL resolution for hyperlinks and image sources.

use url::{ParseError, Url};

/// Resolve a raw attribute value to an absolute URL.
///
/// Protocol-relative references (`//host/path`) become `https`. Returns
/// `None` for blank values, or for relative values when no base is known.
pub fn resolve(raw: &str, base: Option<&Url>) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(rest) = raw.strip_prefix("//") {
        return Url::parse(&format!("https://{rest}")).ok();
    }
    match Url::parse(raw) {
        Ok(url) => Some(url),
        Err(ParseError::RelativeUrlWithoutBase) => base?.join(raw).ok(),
        Err(_) => None,
    }
}

/// Compute the replacement for an `href`, or `None` to leave it untouched.
///
/// Scheme-qualified links (including `mailto:`) and same-document fragments
/// stay as they are, which makes the rewrite idempotent.
pub fn absolutize_href(href: &str, base: Option<&Url>) -> Option<String> {
    let trimmed = href.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    if let Some(rest) = trimmed.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    match Url::parse(trimmed) {
        Ok(_) => None,
        Err(ParseError::RelativeUrlWithoutBase) => {
            base.and_then(|b| b.join(trimmed).ok()).map(String::from)
        }
        Err(_) => None,
    }
}
