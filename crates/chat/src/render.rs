//! Markdown rendering for assistant messages.
//!
//! Rendering happens in two passes: comrak turns markdown into HTML with raw
//! HTML escaped, then [`sanitize_html`] runs ammonia with a small set of
//! structural and inline tags and no attributes at all.

use std::collections::HashSet;

use ammonia::Builder;
use comrak::{Options, markdown_to_html};

/// Tags that survive sanitizing.
pub const ALLOWED_TAGS: &[&str] = &[
    "p",
    "br",
    "strong",
    "em",
    "ul",
    "ol",
    "li",
    "code",
    "pre",
    "blockquote",
];

/// Tags removed together with everything inside them.
const DROPPED_CONTAINERS: &[&str] = &["script", "style"];

/// Renders assistant content into sanitized HTML.
pub fn render_message(content: &str) -> String {
    if content.is_empty() {
        return String::new();
    }

    sanitize_html(&render_markdown(content))
}

pub fn render_markdown(content: &str) -> String {
    let mut options = Options::default();
    options.extension.strikethrough = true;
    options.extension.table = true;
    options.extension.autolink = true;
    options.extension.tasklist = true;
    options.render.hardbreaks = true;
    options.render.r#unsafe = false;
    options.render.escape = true;

    markdown_to_html(content, &options)
}

/// Keeps allow-listed tags without attributes and drops everything else.
///
/// Text inside removed tags is kept, except for `script` and `style` bodies.
pub fn sanitize_html(html: &str) -> String {
    Builder::empty()
        .tags(ALLOWED_TAGS.iter().copied().collect::<HashSet<_>>())
        .clean_content_tags(DROPPED_CONTAINERS.iter().copied().collect::<HashSet<_>>())
        .strip_comments(true)
        .clean(html)
        .to_string()
}
