//! Cross-reference index (table of contents) for a digest.
//!
//! Each row links a chapter anchor to its source entry so that readers and
//! the mark-as-read endpoint can resolve it.

use std::collections::HashMap;
use std::sync::LazyLock;

use scraper::{Html, Selector};
use tracing::{debug, instrument};

use feeddigest_shared::{Chapter, Entry, IndexEntry};

use crate::assembler::escape_html;

/// Maximum excerpt length shown under a table of contents row.
pub const EXCERPT_CHARS: usize = 160;

static BODY_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".chapter-body").expect("valid selector"));

/// Build index rows for `chapters`, in chapter order.
#[instrument(skip_all, fields(chapters = chapters.len()))]
pub fn build_index(chapters: &[Chapter], entries: &[Entry]) -> Vec<IndexEntry> {
    let by_key: HashMap<&str, &Entry> = entries.iter().map(|e| (e.key.as_str(), e)).collect();

    let index: Vec<IndexEntry> = chapters
        .iter()
        .map(|chapter| {
            let entry = by_key.get(chapter.entry_key.as_str());
            IndexEntry {
                entry_key: chapter.entry_key.clone(),
                title: chapter.title.clone(),
                slug: chapter.slug.clone(),
                url: entry.map(|e| e.url.clone()).unwrap_or_default(),
                blog_title: entry.map(|e| e.blog_title.clone()).unwrap_or_default(),
            }
        })
        .collect();

    debug!(rows = index.len(), "index built");
    index
}

/// Render the index as a `<nav>` block with in-document links.
pub fn render_toc(index: &[IndexEntry], chapters: &[Chapter]) -> String {
    let excerpts: HashMap<&str, String> = chapters
        .iter()
        .map(|c| (c.slug.as_str(), excerpt(&c.rendered_content, EXCERPT_CHARS)))
        .collect();

    let mut out = String::from("<nav id=\"toc\" class=\"toc\">\n<h2>Contents</h2>\n<ol>\n");
    for row in index {
        out.push_str(&format!(
            "<li data-entry-key=\"{}\"><a href=\"#{}\">{}</a>",
            escape_html(&row.entry_key),
            escape_html(&row.slug),
            escape_html(&row.title),
        ));
        if !row.blog_title.is_empty() {
            out.push_str(&format!(
                " <span class=\"source\">{}</span>",
                escape_html(&row.blog_title)
            ));
        }
        if let Some(text) = excerpts.get(row.slug.as_str()).filter(|t| !t.is_empty()) {
            out.push_str(&format!("<p class=\"excerpt\">{}</p>", escape_html(text)));
        }
        out.push_str("</li>\n");
    }
    out.push_str("</ol>\n</nav>\n");
    out
}

/// Plain-text start of a chapter body, cut at a word boundary.
pub fn excerpt(chapter_html: &str, max_chars: usize) -> String {
    let doc = Html::parse_fragment(chapter_html);
    let text: String = match doc.select(&BODY_SELECTOR).next() {
        Some(body) => body.text().collect(),
        None => doc.root_element().text().collect(),
    };
    let words: Vec<&str> = text.split_whitespace().collect();
    let joined = words.join(" ");

    if joined.chars().count() <= max_chars {
        return joined;
    }

    let mut cut = String::new();
    for word in words {
        let next_len = cut.chars().count() + word.chars().count() + usize::from(!cut.is_empty());
        if next_len > max_chars {
            break;
        }
        if !cut.is_empty() {
            cut.push(' ');
        }
        cut.push_str(word);
    }
    if cut.is_empty() {
        cut = joined.chars().take(max_chars).collect();
    }
    cut.push('…');
    cut
}
