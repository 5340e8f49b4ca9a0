//! Image filtering policy and local naming.

use url::Url;

use feeddigest_shared::slugify;

use crate::links;

/// What to do with one `<img>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageDecision {
    /// Remove the element.
    Drop(DropReason),
    /// Keep as-is; the source is already embedded (`data:image/*`).
    KeepInline,
    /// Keep, pointing at a local copy of this URL.
    Fetch(Url),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    MissingSource,
    Unresolvable,
    NotAnImage,
    TooSmall { area: u64 },
}

/// Thresholds for keeping an image.
#[derive(Debug, Clone, Copy)]
pub struct ImagePolicy {
    pub min_area: u64,
    /// Used for a declared dimension that does not parse as a number.
    pub default_dimension: u64,
}

impl ImagePolicy {
    /// Decide on an `<img>` from its raw `src`, `width` and `height` attributes.
    ///
    /// The area filter only applies when both dimensions are declared.
    pub fn evaluate(
        &self,
        src: Option<&str>,
        width: Option<&str>,
        height: Option<&str>,
        base: Option<&Url>,
    ) -> ImageDecision {
        let Some(src) = src.map(str::trim).filter(|s| !s.is_empty()) else {
            return ImageDecision::Drop(DropReason::MissingSource);
        };

        if let (Some(w), Some(h)) = (width, height) {
            let w = parse_dimension(w).unwrap_or(self.default_dimension);
            let h = parse_dimension(h).unwrap_or(self.default_dimension);
            let area = w.saturating_mul(h);
            if area < self.min_area {
                return ImageDecision::Drop(DropReason::TooSmall { area });
            }
        }

        if let Some(rest) = src.strip_prefix("data:") {
            let media_type = rest.split([';', ',']).next().unwrap_or("");
            return if media_type.trim().to_ascii_lowercase().starts_with("image/") {
                ImageDecision::KeepInline
            } else {
                ImageDecision::Drop(DropReason::NotAnImage)
            };
        }

        let Some(url) = links::resolve(src, base) else {
            return ImageDecision::Drop(DropReason::Unresolvable);
        };
        if url.scheme() != "http" && url.scheme() != "https" {
            return ImageDecision::Drop(DropReason::Unresolvable);
        }

        match guess_media_type(url.path()) {
            Some(mime) if mime.starts_with("image/") => ImageDecision::Fetch(url),
            _ => ImageDecision::Drop(DropReason::NotAnImage),
        }
    }
}

/// Parse a `width`/`height` attribute such as `200`, `200px` or `199.5`.
pub fn parse_dimension(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    let number = trimmed.strip_suffix("px").unwrap_or(trimmed).trim();
    let value: f64 = number.parse().ok()?;
    if value.is_finite() && value >= 0.0 {
        Some(value.round() as u64)
    } else {
        None
    }
}

/// Guess a media type from the extension of a URL path.
pub fn guess_media_type(path: &str) -> Option<&'static str> {
    let ext = extension(path)?;
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" | "jpe" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "ico" => "image/x-icon",
        "avif" => "image/avif",
        "tif" | "tiff" => "image/tiff",
        "html" | "htm" => "text/html",
        "js" => "text/javascript",
        "css" => "text/css",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        _ => return None,
    };
    Some(mime)
}

/// Local file name for a remote image: slugified basename plus extension.
///
/// Different URLs with the same basename share a name; they are assumed to
/// be the same asset.
pub fn local_file_name(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    let ext = extension(last)?;
    let stem = match last.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => last,
    };
    let slug = if stem.chars().any(|c| c.is_ascii_alphanumeric()) {
        slugify(stem)
    } else {
        "image".to_string()
    };
    Some(format!("{slug}.{ext}"))
}

fn extension(path: &str) -> Option<String> {
    let last = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = last.rsplit_once('.')?;
    if stem.is_empty() && ext.is_empty() {
        return None;
    }
    let ext = ext.to_ascii_lowercase();
    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext)
}
