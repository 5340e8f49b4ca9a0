//! Chapter assembly.
//!
//! Orders the selected entries newest first and renders each into a
//! self-contained `<article>` fragment with localized assets.

use tracing::{debug, info, instrument, warn};
use url::Url;

use feeddigest_rewrite::sanitize::is_script_href;
use feeddigest_rewrite::{AssetRewriter, PLACEHOLDER_HTML, Rewritten};
use feeddigest_shared::{Chapter, Entry, SlugAllocator};

/// Renders entries into chapters.
pub struct ChapterAssembler {
    rewriter: AssetRewriter,
    mark_read_endpoint: Option<Url>,
}

impl ChapterAssembler {
    pub fn new(rewriter: AssetRewriter, mark_read_endpoint: Option<Url>) -> Self {
        Self {
            rewriter,
            mark_read_endpoint,
        }
    }

    /// Render `entries` in document order.
    ///
    /// A chapter whose body cannot be processed is rendered around a
    /// placeholder and flagged `degraded`; it never fails the batch.
    #[instrument(skip_all, fields(entries = entries.len()))]
    pub async fn assemble(&self, entries: &[Entry]) -> Vec<Chapter> {
        let ordered = order_entries(entries);
        let mut slugs = SlugAllocator::new();
        let mut chapters = Vec::with_capacity(ordered.len());

        for entry in ordered {
            let slug = slugs.allocate(&entry.title);
            let mark_read = self
                .mark_read_endpoint
                .as_ref()
                .map(|endpoint| mark_read_href(endpoint, [entry.key.as_str()]));

            let (body, degraded) = match self.rewriter.rewrite(&entry.content, &entry.url).await {
                Rewritten::Clean { html, report } => {
                    debug!(key = %entry.key, %slug, ?report, "chapter rendered");
                    (html, false)
                }
                Rewritten::Placeholder { reason } => {
                    warn!(key = %entry.key, %reason, "chapter body replaced by placeholder");
                    (PLACEHOLDER_HTML.to_string(), true)
                }
            };
            let rendered_content = render_chapter(entry, &slug, mark_read.as_deref(), &body);

            chapters.push(Chapter {
                title: entry.title.clone(),
                slug,
                rendered_content,
                entry_key: entry.key.clone(),
                degraded,
            });
        }

        let degraded = chapters.iter().filter(|c| c.degraded).count();
        info!(chapters = chapters.len(), degraded, "chapters assembled");
        chapters
    }
}

/// Newest `date_published` first. Equal timestamps keep their input order.
pub fn order_entries(entries: &[Entry]) -> Vec<&Entry> {
    let mut ordered: Vec<&Entry> = entries.iter().collect();
    ordered.sort_by(|a, b| b.date_published.cmp(&a.date_published));
    ordered
}

/// Link for an external mark-as-read endpoint: `endpoint?keys=k1,k2`.
pub fn mark_read_href<'k>(endpoint: &Url, keys: impl IntoIterator<Item = &'k str>) -> String {
    let joined = keys.into_iter().collect::<Vec<_>>().join(",");
    let mut url = endpoint.clone();
    url.query_pairs_mut().append_pair("keys", &joined);
    url.to_string()
}

/// Chapter template. `body` must be a balanced fragment and is inserted
/// verbatim.
fn render_chapter(entry: &Entry, slug: &str, mark_read: Option<&str>, body: &str) -> String {
    let mut byline: Vec<String> = Vec::new();
    if !entry.author.is_empty() {
        byline.push(escape_html(&entry.author));
    }
    if !entry.blog_title.is_empty() {
        byline.push(escape_html(&entry.blog_title));
    }
    byline.push(format!(
        "<time datetime=\"{}\">{}</time>",
        entry.date_published.to_rfc3339(),
        entry.date_published.format("%Y-%m-%d %H:%M")
    ));

    let mark_read = mark_read
        .map(|href| {
            format!(
                "<p class=\"mark-read\"><a href=\"{}\">Mark as read</a></p>\n",
                escape_html(href)
            )
        })
        .unwrap_or_default();

    format!(
        "<article id=\"{slug}\" class=\"chapter\" data-entry-key=\"{key}\">\n\
         <header>\n\
         <h1 class=\"chapter-title\"><a href=\"{url}\">{title}</a></h1>\n\
         <p class=\"byline\">{byline}</p>\n\
         {mark_read}\
         </header>\n\
         <div class=\"chapter-body\">\n{body}\n</div>\n\
         </article>\n",
        slug = escape_html(slug),
        key = escape_html(&entry.key),
        url = escape_html(entry_href(&entry.url)),
        title = escape_html(&entry.title),
        byline = byline.join(" | "),
    )
}

fn entry_href(url: &str) -> &str {
    if is_script_href(url) { "#" } else { url }
}

/// Escape text for use in element content and quoted attribute values.
pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::Path;

    use chrono::{DateTime, TimeZone, Utc};
    use scraper::{Html, Selector};

    use feeddigest_shared::RewriteConfig;

    use super::*;

    fn entry(key: &str, title: &str, published: DateTime<Utc>) -> Entry {
        Entry {
            key: key.into(),
            title: title.into(),
            url: format!("https://blog.example.com/posts/{key}"),
            author: "Ada".into(),
            blog_title: "Example Blog".into(),
            content: format!("<p>Body of {key}. <a href=\"/about\">About</a></p>"),
            date_published: published.fixed_offset(),
            date_added: published,
            tags: BTreeSet::new(),
        }
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, d, 9, 0, 0).unwrap()
    }

    fn assembler(dir: &Path, endpoint: Option<&str>) -> ChapterAssembler {
        let mut config = RewriteConfig::for_output_dir(dir);
        config.download = false;
        ChapterAssembler::new(
            AssetRewriter::new(config).unwrap(),
            endpoint.map(|e| Url::parse(e).unwrap()),
        )
    }

    fn temp_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("feeddigest-assembler-{}", uuid::Uuid::now_v7()))
    }

    #[test]
    fn ordering_newest_first_and_stable() {
        let entries = vec![
            entry("a", "A", day(1)),
            entry("b", "B", day(3)),
            entry("c", "C", day(2)),
            entry("d", "D", day(3)),
        ];
        let keys: Vec<&str> = order_entries(&entries).iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "d", "c", "a"]);
    }

    #[test]
    fn ordering_compares_instants_across_offsets() {
        let mut early = entry("early", "Early", day(1));
        // 10:00+02:00 is 08:00 UTC, before 09:00 UTC
        early.date_published = DateTime::parse_from_rfc3339("2024-04-01T10:00:00+02:00").unwrap();
        let later = entry("later", "Later", day(1));
        let entries = vec![early, later];

        let keys: Vec<&str> = order_entries(&entries).iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["later", "early"]);
    }

    #[tokio::test]
    async fn colliding_titles_get_distinct_slugs() {
        let dir = temp_dir();
        let assembler = assembler(&dir, None);
        let entries = vec![
            entry("a", "Hello, World!", day(2)),
            entry("b", "hello world", day(1)),
        ];

        let chapters = assembler.assemble(&entries).await;
        assert_eq!(chapters[0].slug, "hello-world");
        assert_eq!(chapters[1].slug, "hello-world-2");
    }

    #[tokio::test]
    async fn chapter_template_carries_metadata() {
        let dir = temp_dir();
        let assembler = assembler(&dir, Some("https://read.example.com/mark"));
        let mut e = entry("k&1", "Fish <and> Chips", day(1));
        e.content.push_str("<script>alert(1)</script>");

        let chapters = assembler.assemble(&[e]).await;
        let chapter = &chapters[0];
        assert!(!chapter.degraded);
        assert_eq!(chapter.entry_key, "k&1");

        let doc = Html::parse_fragment(&chapter.rendered_content);
        let article = doc
            .select(&Selector::parse("article").unwrap())
            .next()
            .unwrap();
        assert_eq!(article.value().attr("data-entry-key"), Some("k&1"));
        assert_eq!(article.value().attr("id"), Some("fish-and-chips"));

        let title: String = doc
            .select(&Selector::parse("h1").unwrap())
            .next()
            .unwrap()
            .text()
            .collect();
        assert_eq!(title, "Fish <and> Chips");

        let html = &chapter.rendered_content;
        assert!(html.contains("Ada | Example Blog"));
        assert!(html.contains("https://blog.example.com/about"));
        assert!(html.contains("https://read.example.com/mark?keys=k%261"));
        assert!(!html.contains("<script>"));
    }

    #[tokio::test]
    async fn unrenderable_body_degrades_only_its_chapter() {
        let dir = temp_dir();
        let assembler = assembler(&dir, None);
        let mut broken = entry("broken", "Broken", day(2));
        broken.content = "<!-- excerpt truncated".into();
        let entries = vec![broken, entry("fine", "Fine", day(1))];

        let chapters = assembler.assemble(&entries).await;

        assert!(chapters[0].degraded);
        assert!(chapters[0].rendered_content.contains(PLACEHOLDER_HTML));
        assert!(chapters[0].rendered_content.contains("Broken"));
        assert!(!chapters[1].degraded);
        assert!(chapters[1].rendered_content.contains("Body of fine."));
    }

    #[tokio::test]
    async fn malformed_bodies_stay_inside_their_chapter() {
        let dir = temp_dir();
        let assembler = assembler(&dir, Some("https://read.example.com/mark"));
        let bodies = [
            "<p>Intro</p><!-- more",
            "<p>Form</p><textarea>draft",
            "<p>Closing early</p></div></article><p>tail</p>",
            "<div><blockquote>never closed",
        ];
        let entries: Vec<Entry> = bodies
            .iter()
            .enumerate()
            .map(|(i, body)| {
                let mut e = entry(&format!("k{i}"), &format!("Post {i}"), day(10 - i as u32));
                e.content = body.to_string();
                e
            })
            .collect();

        let chapters = assembler.assemble(&entries).await;
        let joined: String = chapters.iter().map(|c| c.rendered_content.as_str()).collect();
        let doc = Html::parse_fragment(&joined);

        let articles: Vec<_> = doc.select(&Selector::parse("article").unwrap()).collect();
        assert_eq!(articles.len(), bodies.len());
        for (i, article) in articles.iter().enumerate() {
            assert_eq!(article.value().attr("data-entry-key"), Some(format!("k{i}").as_str()));
            assert!(
                article
                    .select(&Selector::parse(".mark-read a").unwrap())
                    .next()
                    .is_some(),
                "chapter {i} lost its header"
            );
        }
        assert!(chapters.iter().all(|c| !c.degraded));
    }

    #[tokio::test]
    async fn script_entry_links_neutralized() {
        let dir = temp_dir();
        let assembler = assembler(&dir, None);
        let mut e = entry("js", "Sneaky", day(1));
        e.url = "javascript:alert(1)".into();

        let chapters = assembler.assemble(&[e]).await;
        assert!(!chapters[0].rendered_content.contains("javascript:"));
    }

    #[test]
    fn mark_read_joins_keys() {
        let endpoint = Url::parse("https://read.example.com/mark").unwrap();
        assert_eq!(
            mark_read_href(&endpoint, ["a", "b"]),
            "https://read.example.com/mark?keys=a%2Cb"
        );
    }

    #[test]
    fn escaping() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
    }
}
