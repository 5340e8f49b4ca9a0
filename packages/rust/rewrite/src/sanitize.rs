//! Active-content stripping.
//!
//! The fragment is parsed into an HTML tree and serialized back out, so the
//! result is always balanced: open elements are closed, stray end tags are
//! dropped and unterminated comments cannot leak into the surrounding
//! document. Scripts, styles, embedded media and comments are removed from
//! the tree. Event-handler and inline style attributes are removed from the
//! serialized element stream, so attribute order and whitespace do not matter.

use lol_html::{RewriteStrSettings, element, rewrite_str};
use scraper::{Html, Node};

/// Elements removed together with their content. Besides active content this
/// covers raw-text and document-level elements that would change how the
/// enclosing digest parses.
const REMOVED_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "template", "video", "audio", "iframe", "embed", "object",
    "plaintext", "xmp", "noembed", "noframes", "frame", "frameset", "base", "link", "meta",
    "title",
];

/// Outcome of [`strip_active_content`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sanitized {
    Clean(String),
    Failed { reason: String },
}

impl<E: std::fmt::Display> From<Result<String, E>> for Sanitized {
    fn from(result: Result<String, E>) -> Self {
        match result {
            Ok(html) => Self::Clean(html),
            Err(e) => Self::Failed {
                reason: e.to_string(),
            },
        }
    }
}

/// Strip active content from an HTML fragment.
///
/// Input that is not blank but holds neither elements nor text once parsed
/// (a bare or truncated comment, a processing instruction) is reported as
/// [`Sanitized::Failed`].
pub fn strip_active_content(html: &str) -> Sanitized {
    match rebuild_tree(html) {
        Ok(balanced) => strip_attributes(&balanced).into(),
        Err(reason) => Sanitized::Failed { reason },
    }
}

/// `true` for hrefs that would run script when followed.
pub fn is_script_href(href: &str) -> bool {
    href.trim_start().to_ascii_lowercase().starts_with("javascript:")
}

/// Parse `html` as body content, prune removed elements and comments, and
/// serialize the remaining tree.
fn rebuild_tree(html: &str) -> Result<String, String> {
    let mut fragment = Html::parse_fragment(html);

    if !html.trim().is_empty() && !has_content(&fragment) {
        return Err("fragment holds no markup or text".into());
    }

    let doomed: Vec<_> = fragment
        .tree
        .nodes()
        .filter(|node| match node.value() {
            Node::Comment(_) | Node::Doctype(_) | Node::ProcessingInstruction(_) => true,
            Node::Element(el) => REMOVED_ELEMENTS.contains(&el.name()),
            _ => false,
        })
        .map(|node| node.id())
        .collect();

    for id in doomed {
        if let Some(mut node) = fragment.tree.get_mut(id) {
            node.detach();
        }
    }

    Ok(fragment.root_element().inner_html())
}

fn has_content(fragment: &Html) -> bool {
    fragment
        .root_element()
        .descendants()
        .skip(1)
        .any(|node| match node.value() {
            Node::Element(_) => true,
            Node::Text(text) => !text.trim().is_empty(),
            _ => false,
        })
}

fn strip_attributes(html: &str) -> Result<String, lol_html::errors::RewritingError> {
    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("*", |el| {
                    let doomed: Vec<String> = el
                        .attributes()
                        .iter()
                        .map(|attr| attr.name())
                        .filter(|name| name.starts_with("on") || name == "style")
                        .collect();
                    for name in doomed {
                        el.remove_attribute(&name);
                    }
                    Ok(())
                }),
                element!("a[href]", |el| {
                    if el.get_attribute("href").is_some_and(|href| is_script_href(&href)) {
                        el.set_attribute("href", "#")?;
                    }
                    Ok(())
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )
}
