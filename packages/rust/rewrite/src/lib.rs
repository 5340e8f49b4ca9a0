//! Entry HTML rewriting for feeddigest.
//!
//! [`AssetRewriter`] turns the stored HTML of one entry into markup that is
//! safe to embed in a digest:
//! 1. The markup is parsed into a tree, balanced and stripped of active
//!    content ([`sanitize`])
//! 2. Images are filtered and localized ([`images`])
//! 3. Relative hyperlinks are made absolute ([`links`])
//!
//! A failure while processing one image never fails the entry. A failure to
//! process the markup itself yields [`Rewritten::Placeholder`].

pub mod images;
pub mod links;
pub mod sanitize;

mod fetch;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use lol_html::{RewriteStrSettings, element, rewrite_str};
use tracing::{debug, instrument, warn};
use url::Url;

use feeddigest_shared::{Result, RewriteConfig};

use crate::fetch::ImageFetcher;
use crate::images::{ImageDecision, ImagePolicy};
use crate::sanitize::{Sanitized, strip_active_content};

/// Markup substituted for an entry whose content could not be processed.
pub const PLACEHOLDER_HTML: &str =
    "<p><em>This entry could not be rendered. Read it online via the link above.</em></p>";

/// Counters collected while rewriting one entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteReport {
    pub images_kept: usize,
    pub images_dropped: usize,
    pub images_failed: usize,
    pub links_rewritten: usize,
}

/// Result of [`AssetRewriter::rewrite`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewritten {
    Clean { html: String, report: RewriteReport },
    Placeholder { reason: String },
}

impl Rewritten {
    pub fn html(&self) -> &str {
        match self {
            Self::Clean { html, .. } => html,
            Self::Placeholder { .. } => PLACEHOLDER_HTML,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder { .. })
    }

    pub fn into_html(self) -> String {
        match self {
            Self::Clean { html, .. } => html,
            Self::Placeholder { .. } => PLACEHOLDER_HTML.to_string(),
        }
    }
}

/// Raw attributes of one `<img>`.
#[derive(Debug, Default)]
struct ImgAttrs {
    src: Option<String>,
    width: Option<String>,
    height: Option<String>,
}

/// Rewrites entry HTML, downloading kept images into the configured directory.
pub struct AssetRewriter {
    config: RewriteConfig,
    policy: ImagePolicy,
    fetcher: ImageFetcher,
}

impl AssetRewriter {
    pub fn new(config: RewriteConfig) -> Result<Self> {
        let fetcher = ImageFetcher::new(&config)?;
        let policy = ImagePolicy {
            min_area: config.min_area,
            default_dimension: config.default_dimension,
        };
        Ok(Self {
            config,
            policy,
            fetcher,
        })
    }

    pub fn config(&self) -> &RewriteConfig {
        &self.config
    }

    /// Rewrite one entry's HTML. Relative references resolve against `base_url`.
    #[instrument(skip_all, fields(base = base_url))]
    pub async fn rewrite(&self, html: &str, base_url: &str) -> Rewritten {
        let base = Url::parse(base_url).ok();

        let clean = match strip_active_content(html) {
            Sanitized::Clean(clean) => clean,
            Sanitized::Failed { reason } => {
                warn!(%reason, "sanitizing failed, using placeholder");
                return Rewritten::Placeholder { reason };
            }
        };

        let imgs = match collect_images(&clean) {
            Ok(imgs) => imgs,
            Err(reason) => {
                warn!(%reason, "image scan failed, using placeholder");
                return Rewritten::Placeholder { reason };
            }
        };

        let mut wanted: Vec<Url> = Vec::new();
        for img in &imgs {
            let decision = self.policy.evaluate(
                img.src.as_deref(),
                img.width.as_deref(),
                img.height.as_deref(),
                base.as_ref(),
            );
            if let ImageDecision::Fetch(url) = decision {
                if !wanted.contains(&url) {
                    wanted.push(url);
                }
            }
        }

        let fetched = if self.config.download {
            self.fetcher.fetch_all(&wanted).await
        } else {
            HashMap::new()
        };

        match self.finish(&clean, base.as_ref(), &fetched) {
            Ok((html, report)) => {
                debug!(
                    kept = report.images_kept,
                    dropped = report.images_dropped,
                    failed = report.images_failed,
                    links = report.links_rewritten,
                    "entry rewritten"
                );
                Rewritten::Clean { html, report }
            }
            Err(reason) => {
                warn!(%reason, "rewrite failed, using placeholder");
                Rewritten::Placeholder { reason }
            }
        }
    }

    /// Apply image decisions and link absolutization in a single pass.
    fn finish(
        &self,
        html: &str,
        base: Option<&Url>,
        fetched: &HashMap<Url, Option<String>>,
    ) -> std::result::Result<(String, RewriteReport), String> {
        let kept = Cell::new(0usize);
        let dropped = Cell::new(0usize);
        let failed = Cell::new(0usize);
        let links = Cell::new(0usize);

        let output = rewrite_str(
            html,
            RewriteStrSettings {
                element_content_handlers: vec![
                    element!("picture source", |el| {
                        el.remove();
                        Ok(())
                    }),
                    element!("img", |el| {
                        let decision = self.policy.evaluate(
                            el.get_attribute("src").as_deref(),
                            el.get_attribute("width").as_deref(),
                            el.get_attribute("height").as_deref(),
                            base,
                        );
                        let new_src = match decision {
                            ImageDecision::Drop(reason) => {
                                debug!(?reason, "dropping image");
                                el.remove();
                                dropped.set(dropped.get() + 1);
                                return Ok(());
                            }
                            ImageDecision::KeepInline => {
                                kept.set(kept.get() + 1);
                                return Ok(());
                            }
                            ImageDecision::Fetch(url) if !self.config.download => {
                                url.to_string()
                            }
                            ImageDecision::Fetch(url) => match fetched.get(&url) {
                                Some(Some(name)) => {
                                    format!("{}/{name}", self.config.images_href_prefix)
                                }
                                _ => {
                                    el.remove();
                                    failed.set(failed.get() + 1);
                                    return Ok(());
                                }
                            },
                        };
                        el.set_attribute("src", &new_src)?;
                        el.remove_attribute("srcset");
                        el.remove_attribute("sizes");
                        kept.set(kept.get() + 1);
                        Ok(())
                    }),
                    element!("a[href]", |el| {
                        let href = el.get_attribute("href").unwrap_or_default();
                        if let Some(absolute) = links::absolutize_href(&href, base) {
                            el.set_attribute("href", &absolute)?;
                            links.set(links.get() + 1);
                        }
                        Ok(())
                    }),
                ],
                ..RewriteStrSettings::default()
            },
        )
        .map_err(|e| e.to_string())?;

        let report = RewriteReport {
            images_kept: kept.get(),
            images_dropped: dropped.get(),
            images_failed: failed.get(),
            links_rewritten: links.get(),
        };
        Ok((output, report))
    }
}

/// Read the `src`, `width` and `height` of every `<img>` in document order.
fn collect_images(html: &str) -> std::result::Result<Vec<ImgAttrs>, String> {
    let found = RefCell::new(Vec::new());
    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("img", |el| {
                found.borrow_mut().push(ImgAttrs {
                    src: el.get_attribute("src"),
                    width: el.get_attribute("width"),
                    height: el.get_attribute("height"),
                });
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|e| e.to_string())?;
    Ok(found.into_inner())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use scraper::{Html, Selector};
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("feeddigest-rewrite-{}", Uuid::now_v7()))
    }

    fn rewriter(output_dir: &std::path::Path) -> AssetRewriter {
        AssetRewriter::new(RewriteConfig::for_output_dir(output_dir)).unwrap()
    }

    fn image_response() -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "image/png")
            .set_body_bytes(vec![0x89, b'P', b'N', b'G'])
    }

    fn img_srcs(html: &str) -> Vec<String> {
        let doc = Html::parse_fragment(html);
        let sel = Selector::parse("img").unwrap();
        doc.select(&sel)
            .filter_map(|el| el.value().attr("src").map(String::from))
            .collect()
    }

    #[tokio::test]
    async fn small_images_dropped_large_images_localized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media/big.png"))
            .respond_with(image_response())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/media/pixel.png"))
            .respond_with(image_response())
            .expect(0)
            .mount(&server)
            .await;

        let dir = temp_dir();
        let rewriter = rewriter(&dir);
        let html = r#"<p>Look</p><img src="/media/pixel.png" width="50" height="50"><img src="/media/big.png" width="200" height="200" srcset="big-2x.png 2x">"#;
        let base = format!("{}/posts/1", server.uri());

        let result = rewriter.rewrite(html, &base).await;
        let Rewritten::Clean { html, report } = result else {
            panic!("expected clean rewrite");
        };

        assert_eq!(img_srcs(&html), vec!["images/big.png".to_string()]);
        assert!(!html.contains("srcset"));
        assert_eq!(report.images_kept, 1);
        assert_eq!(report.images_dropped, 1);
        assert!(dir.join("images").join("big.png").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn failed_download_drops_only_that_image() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ok.png"))
            .respond_with(image_response())
            .mount(&server)
            .await;

        let dir = temp_dir();
        let rewriter = rewriter(&dir);
        let html = format!(
            r#"<img src="{0}/gone.png"><p>Text stays</p><img src="{0}/ok.png">"#,
            server.uri()
        );

        let result = rewriter.rewrite(&html, &server.uri()).await;
        let Rewritten::Clean { html, report } = result else {
            panic!("expected clean rewrite");
        };

        assert_eq!(img_srcs(&html), vec!["images/ok.png".to_string()]);
        assert!(html.contains("<p>Text stays</p>"));
        assert_eq!(report.images_failed, 1);
        assert!(!dir.join("images").join("gone.png").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn non_image_content_type_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fake.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html></html>"),
            )
            .mount(&server)
            .await;

        let dir = temp_dir();
        let rewriter = rewriter(&dir);
        let html = format!(r#"<img src="{}/fake.png">"#, server.uri());

        let result = rewriter.rewrite(&html, &server.uri()).await;
        assert!(img_srcs(result.html()).is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn existing_image_not_downloaded_again() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cached.png"))
            .respond_with(image_response())
            .expect(0)
            .mount(&server)
            .await;

        let dir = temp_dir();
        std::fs::create_dir_all(dir.join("images")).unwrap();
        std::fs::write(dir.join("images").join("cached.png"), b"old").unwrap();

        let rewriter = rewriter(&dir);
        let html = format!(r#"<img src="{}/cached.png">"#, server.uri());
        let result = rewriter.rewrite(&html, &server.uri()).await;

        assert_eq!(img_srcs(result.html()), vec!["images/cached.png".to_string()]);
        assert_eq!(
            std::fs::read(dir.join("images").join("cached.png")).unwrap(),
            b"old"
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn duplicate_sources_fetched_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/twice.png"))
            .respond_with(image_response())
            .expect(1)
            .mount(&server)
            .await;

        let dir = temp_dir();
        let rewriter = rewriter(&dir);
        let html = format!(
            r#"<img src="{0}/twice.png"><img src="{0}/twice.png">"#,
            server.uri()
        );
        let result = rewriter.rewrite(&html, &server.uri()).await;

        assert_eq!(img_srcs(result.html()).len(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn download_disabled_keeps_remote_urls() {
        let dir = temp_dir();
        let mut config = RewriteConfig::for_output_dir(&dir);
        config.download = false;
        let rewriter = AssetRewriter::new(config).unwrap();

        let result = rewriter
            .rewrite(
                r#"<img src="/a/photo.jpg">"#,
                "https://blog.example.com/posts/1",
            )
            .await;

        assert_eq!(
            img_srcs(result.html()),
            vec!["https://blog.example.com/a/photo.jpg".to_string()]
        );
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn links_absolutized_and_idempotent() {
        let dir = temp_dir();
        let rewriter = rewriter(&dir);
        let base = "https://blog.example.com/posts/2024/hello.html";
        let html = r##"<p><a href="/about">About</a> <a href="#top">Top</a> <a href="https://x.org/">X</a></p>"##;

        let first = rewriter.rewrite(html, base).await;
        let Rewritten::Clean { html: once, report } = first else {
            panic!("expected clean rewrite");
        };
        assert!(once.contains(r#"href="https://blog.example.com/about""#));
        assert!(once.contains(r##"href="#top""##));
        assert_eq!(report.links_rewritten, 1);

        let second = rewriter.rewrite(&once, base).await;
        assert_eq!(second.html(), once);
    }

    #[tokio::test]
    async fn scripts_removed_before_rewriting() {
        let dir = temp_dir();
        let rewriter = rewriter(&dir);
        let result = rewriter
            .rewrite(
                "<p>Body</p><script>alert(1)</script>",
                "https://blog.example.com/",
            )
            .await;
        assert_eq!(result.html(), "<p>Body</p>");
        assert!(!result.is_placeholder());
    }

    #[tokio::test]
    async fn unrenderable_body_becomes_placeholder() {
        let dir = temp_dir();
        let rewriter = rewriter(&dir);

        let result = rewriter
            .rewrite("<!-- read more at", "https://blog.example.com/")
            .await;

        assert!(result.is_placeholder());
        assert_eq!(result.html(), PLACEHOLDER_HTML);
        assert_eq!(result.into_html(), PLACEHOLDER_HTML);
    }

    #[tokio::test]
    async fn truncated_markup_yields_balanced_fragment() {
        let dir = temp_dir();
        let rewriter = rewriter(&dir);

        let result = rewriter
            .rewrite(
                r#"<p>Intro <a href="/full">full post</a></p><div><textarea>notes</article><!-- more"#,
                "https://blog.example.com/posts/1",
            )
            .await;
        let Rewritten::Clean { html, .. } = result else {
            panic!("expected clean rewrite");
        };

        assert_eq!(
            html,
            r#"<p>Intro <a href="https://blog.example.com/full">full post</a></p><div><textarea>notes&lt;/article&gt;&lt;!-- more</textarea></div>"#
        );
    }
}
