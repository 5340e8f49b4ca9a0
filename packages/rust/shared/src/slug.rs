//! Filename- and anchor-safe slugs.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

/// Longest slug produced by [`slugify`].
pub const MAX_SLUG_LEN: usize = 80;

/// Lowercase `text` and join its ASCII alphanumeric runs with `-`.
///
/// Returns `"untitled"` when nothing survives.
pub fn slugify(text: &str) -> String {
    static NON_ALNUM_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));

    let lower = text.to_lowercase();
    let joined = NON_ALNUM_RE.replace_all(&lower, "-");
    let mut slug = joined.trim_matches('-').to_string();

    if slug.len() > MAX_SLUG_LEN {
        slug.truncate(MAX_SLUG_LEN);
        slug = slug.trim_end_matches('-').to_string();
    }

    if slug.is_empty() {
        return "untitled".to_string();
    }
    slug
}

/// Hands out slugs that are unique within one document.
///
/// The first use of a slug is returned as-is; later collisions get `-2`,
/// `-3`, … in the order they are requested.
#[derive(Debug, Default)]
pub struct SlugAllocator {
    seen: HashMap<String, usize>,
}

impl SlugAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slugify `title` and disambiguate it against earlier allocations.
    pub fn allocate(&mut self, title: &str) -> String {
        let base = slugify(title);
        let mut n = match self.seen.get(&base) {
            None => {
                self.seen.insert(base.clone(), 1);
                return base;
            }
            Some(count) => count + 1,
        };

        // A suffixed slug may itself collide with a literal title like "a-2".
        loop {
            let candidate = format!("{base}-{n}");
            if !self.seen.contains_key(&candidate) {
                self.seen.insert(base, n);
                self.seen.insert(candidate.clone(), 1);
                return candidate;
            }
            n += 1;
        }
    }
}
