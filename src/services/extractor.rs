use std::sync::OnceLock;

use ego_tree::NodeRef;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

use crate::error::{AppError, Result};

/// Subtrees that never contribute readable content.
const NOISE_ELEMENTS: &[&str] = &["script", "style", "nav", "header", "footer", "aside"];

/// Preferred content containers, tried before falling back to `<body>`.
const CONTENT_SELECTORS: &str =
    "article, main, [role=main], .content, #content, .post, .entry-content";

fn title_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("title").expect("valid selector"))
}

fn content_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse(CONTENT_SELECTORS).expect("valid selector"))
}

fn body_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("body").expect("valid selector"))
}

// mdImage matches ![alt](url); images must be replaced before links so the
// image-inside-link pattern [![alt](img)](link) is handled correctly.
fn image_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").expect("valid regex"))
}

// mdLink matches [text](url), allowing one level of nested brackets so a
// link whose text is already an [image: ...] placeholder is still stripped.
fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[((?:[^\[\]]|\[[^\]]*\])*)\]\([^)]*\)").expect("valid regex")
    })
}

fn blank_lines_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\p{Z}*(\n\p{Z}*)+\n").expect("valid regex"))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Extractor;

impl Extractor {
    pub fn new() -> Self {
        Self
    }

    /// Parses HTML and returns the page title and the content as cleaned
    /// Markdown. `page_url` is used to resolve relative links and images.
    pub fn extract_text(&self, html: &str, page_url: &str) -> Result<(String, String)> {
        let doc = Html::parse_document(html);

        let title = doc
            .select(title_selector())
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        let base = Url::parse(page_url).ok();

        // Prefer a focused content area; fall back to the whole body. Noise
        // subtrees are dropped before the candidates are considered, so a
        // noise element matching a content selector never wins.
        let container = doc
            .select(content_selector())
            .find(|el| !in_noise_subtree(*el))
            .or_else(|| doc.select(body_selector()).next());

        let mut markdown = String::new();
        if let Some(el) = container {
            render_children(*el, base.as_ref(), &mut markdown);
        }

        let text = postprocess(&markdown);

        if title.is_empty() && text.is_empty() {
            return Err(AppError::Extract(
                "document contains no readable content".to_string(),
            ));
        }

        Ok((title, text))
    }

    /// Truncates text to `max_length` at a word boundary, appending an
    /// ellipsis. The boundary is only used when it falls past the halfway
    /// point, so truncation never throws away half the budget.
    pub fn truncate_text(&self, text: &str, max_length: usize) -> String {
        if text.len() <= max_length {
            return text.to_string();
        }

        let mut cut = max_length;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }

        let mut truncated = &text[..cut];
        if let Some(last_space) = truncated.rfind(' ') {
            if last_space > max_length / 2 {
                truncated = &truncated[..last_space];
            }
        }

        format!("{}...", truncated)
    }
}

/// Replace images, then strip links, then collapse blank-line runs and trim.
/// The image pass must run first: see `image_re`.
fn postprocess(markdown: &str) -> String {
    let text = image_re().replace_all(markdown, |caps: &regex::Captures| {
        let alt = caps[1].trim();
        if alt.is_empty() {
            "[image]".to_string()
        } else {
            format!("[image: {}]", alt)
        }
    });
    let text = link_re().replace_all(&text, "$1");
    let text = blank_lines_re().replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// True when the element is a noise element or sits inside one.
fn in_noise_subtree(el: ElementRef) -> bool {
    std::iter::successors(Some(*el), |node| node.parent())
        .filter_map(ElementRef::wrap)
        .any(|e| NOISE_ELEMENTS.contains(&e.value().name()))
}

fn render_children(node: NodeRef<Node>, base: Option<&Url>, out: &mut String) {
    for child in node.children() {
        match child.value() {
            Node::Text(text) => append_text(out, text),
            Node::Element(_) => {
                if let Some(el) = ElementRef::wrap(child) {
                    render_element(el, base, out);
                }
            }
            _ => {}
        }
    }
}

fn render_element(el: ElementRef, base: Option<&Url>, out: &mut String) {
    let name = el.value().name();

    if NOISE_ELEMENTS.contains(&name) {
        return;
    }

    match name {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = name[1..].parse::<usize>().unwrap_or(1);
            start_block(out);
            out.push_str(&"#".repeat(level));
            out.push(' ');
            render_children(*el, base, out);
            start_block(out);
        }
        "p" | "div" | "section" | "figure" | "figcaption" | "table" | "tr" => {
            start_block(out);
            render_children(*el, base, out);
            start_block(out);
        }
        "br" => {
            trim_trailing_spaces(out);
            out.push('\n');
        }
        "hr" => {
            start_block(out);
            out.push_str("---");
            start_block(out);
        }
        "strong" | "b" => {
            out.push_str("**");
            render_children(*el, base, out);
            trim_trailing_spaces(out);
            out.push_str("**");
        }
        "em" | "i" => {
            out.push('*');
            render_children(*el, base, out);
            trim_trailing_spaces(out);
            out.push('*');
        }
        "code" => {
            out.push('`');
            out.push_str(el.text().collect::<String>().trim());
            out.push('`');
        }
        "pre" => {
            start_block(out);
            out.push_str("```\n");
            out.push_str(el.text().collect::<String>().trim_end());
            out.push_str("\n```");
            start_block(out);
        }
        "blockquote" => {
            start_block(out);
            out.push_str("> ");
            render_children(*el, base, out);
            start_block(out);
        }
        "ul" | "ol" => {
            start_block(out);
            let ordered = name == "ol";
            let mut index = 1;
            for child in el.children() {
                let Some(item) = ElementRef::wrap(child) else {
                    continue;
                };
                if item.value().name() != "li" {
                    continue;
                }
                if ordered {
                    out.push_str(&format!("{}. ", index));
                    index += 1;
                } else {
                    out.push_str("- ");
                }
                render_children(*item, base, out);
                trim_trailing_spaces(out);
                out.push('\n');
            }
            start_block(out);
        }
        "a" => {
            let mut inner = String::new();
            render_children(*el, base, &mut inner);
            let href = el
                .value()
                .attr("href")
                .map(|h| resolve_url(h, base))
                .unwrap_or_default();
            out.push_str(&format!("[{}]({})", inner.trim(), href));
        }
        "img" => {
            let alt = el.value().attr("alt").unwrap_or_default();
            let src = el
                .value()
                .attr("src")
                .map(|s| resolve_url(s, base))
                .unwrap_or_default();
            out.push_str(&format!("![{}]({})", alt, src));
        }
        _ => render_children(*el, base, out),
    }
}

/// Push text with whitespace runs collapsed, preserving a single boundary
/// space on either side when the source had one.
fn append_text(out: &mut String, text: &str) {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        if !out.is_empty() && !out.ends_with(char::is_whitespace) {
            out.push(' ');
        }
        return;
    }
    if text.starts_with(char::is_whitespace)
        && !out.is_empty()
        && !out.ends_with(char::is_whitespace)
    {
        out.push(' ');
    }
    out.push_str(&collapsed);
    if text.ends_with(char::is_whitespace) {
        out.push(' ');
    }
}

/// Ensure `out` ends with exactly one blank line (unless it is still empty).
fn start_block(out: &mut String) {
    trim_trailing_spaces(out);
    if out.is_empty() {
        return;
    }
    while !out.ends_with("\n\n") {
        out.push('\n');
    }
}

fn trim_trailing_spaces(out: &mut String) {
    while out.ends_with(' ') || out.ends_with('\t') {
        out.pop();
    }
}

fn resolve_url(href: &str, base: Option<&Url>) -> String {
    if let Some(base) = base {
        if let Ok(resolved) = base.join(href) {
            return resolved.to_string();
        }
    }
    href.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_URL: &str = "http://example.com/post/1";

    fn extract(html: &str) -> (String, String) {
        Extractor::new().extract_text(html, PAGE_URL).unwrap()
    }

    #[test]
    fn extracts_title_and_article_content() {
        let (title, text) = extract(
            "<html><head><title> Hello </title></head>\
             <body><article><p>World</p></article></body></html>",
        );
        assert_eq!(title, "Hello");
        assert_eq!(text, "World");
    }

    #[test]
    fn missing_title_is_empty() {
        let (title, text) = extract("<html><body><p>Just a body</p></body></html>");
        assert_eq!(title, "");
        assert_eq!(text, "Just a body");
    }

    #[test]
    fn prefers_first_content_container_over_body() {
        let (_, text) = extract(
            "<body><p>outside</p><div class=\"content\">inside</div><main>second</main></body>",
        );
        assert_eq!(text, "inside");
    }

    #[test]
    fn noise_element_matching_a_content_selector_is_not_chosen() {
        let (_, text) = extract(
            "<body><nav class=\"content\">menu junk</nav>\
             <article><p>Real content</p></article></body>",
        );
        assert_eq!(text, "Real content");
    }

    #[test]
    fn container_inside_a_noise_subtree_is_not_chosen() {
        let (_, text) = extract(
            "<body><aside><div class=\"content\">sidebar junk</div></aside>\
             <main><p>Real content</p></main></body>",
        );
        assert_eq!(text, "Real content");
    }

    #[test]
    fn falls_back_to_body_when_no_container_matches() {
        let (_, text) = extract("<body><p>One</p><p>Two</p></body>");
        assert_eq!(text, "One\n\nTwo");
    }

    #[test]
    fn removes_noise_elements() {
        let (_, text) = extract(
            "<body><nav>menu</nav><script>var x;</script><style>p{}</style>\
             <header>top</header><p>Keep me</p><footer>bottom</footer><aside>side</aside></body>",
        );
        assert_eq!(text, "Keep me");
    }

    #[test]
    fn links_are_stripped_to_visible_text() {
        let (_, text) = extract("<article><p>See <a href=\"/docs\">the docs</a> here</p></article>");
        assert_eq!(text, "See the docs here");
    }

    #[test]
    fn images_become_placeholders() {
        let (_, text) = extract(
            "<article><p><img src=\"a.png\" alt=\"Diagram\"> and <img src=\"b.png\"></p></article>",
        );
        assert_eq!(text, "[image: Diagram] and [image]");
    }

    #[test]
    fn image_inside_link_collapses_to_image_placeholder() {
        let (_, text) = extract(
            "<article><a href=\"/home\"><img src=\"logo.png\" alt=\"Logo\"></a></article>",
        );
        assert_eq!(text, "[image: Logo]");
    }

    #[test]
    fn collapses_runs_of_blank_lines() {
        let (_, text) = extract(
            "<body><p>One</p><div></div><div></div><div></div><p>Two</p></body>",
        );
        assert_eq!(text, "One\n\nTwo");
        assert!(!text.starts_with(char::is_whitespace));
        assert!(!text.ends_with(char::is_whitespace));
    }

    #[test]
    fn postprocess_collapses_blank_line_runs() {
        assert_eq!(postprocess("One\n\n\n\n\nTwo"), "One\n\nTwo");
        assert_eq!(postprocess("  \nOne\n \n \n\nTwo\n  "), "One\n\nTwo");
    }

    #[test]
    fn headings_and_lists_render_as_markdown() {
        let (_, text) = extract(
            "<article><h2>Section</h2><ul><li>first</li><li>second</li></ul></article>",
        );
        assert_eq!(text, "## Section\n\n- first\n- second");
    }

    #[test]
    fn empty_document_is_an_error() {
        let err = Extractor::new().extract_text("", PAGE_URL).unwrap_err();
        assert!(matches!(err, AppError::Extract(_)));
    }

    #[test]
    fn truncate_returns_short_text_unchanged() {
        let e = Extractor::new();
        assert_eq!(e.truncate_text("short", 100), "short");
    }

    #[test]
    fn truncate_cuts_at_word_boundary() {
        let e = Extractor::new();
        let result = e.truncate_text("hello brave new world", 12);
        assert_eq!(result, "hello brave...");
        assert!(result.len() <= 12 + 3);
    }

    #[test]
    fn truncate_ignores_space_before_midpoint() {
        let e = Extractor::new();
        // Only space is at index 1, well before max/2: hard cut instead.
        let result = e.truncate_text("a bcdefghijklmnop", 10);
        assert_eq!(result, "a bcdefghi...");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let e = Extractor::new();
        let text = "héllo wörld and more text beyond";
        let result = e.truncate_text(text, 10);
        assert!(result.ends_with("..."));
        assert!(result.len() <= 13);
    }
}
