//! Markup rendering.
//!
//! [`Renderer`] is the seam the orchestrator renders through; it must be pure
//! (same document in, same markup out). [`StaticHtmlRenderer`] is a minimal
//! implementation that lays blocks out absolutely on a fixed canvas.

use std::fmt::Write;

use pagedrop_core::{Background, BlockKind, PageDocument};

/// Renders a validated document into a standalone HTML page.
pub trait Renderer: Send + Sync {
    fn render(&self, slug: &str, document: &PageDocument) -> String;
}

/// Self-contained HTML renderer with inline styles and no scripts.
#[derive(Debug, Clone, Default)]
pub struct StaticHtmlRenderer;

impl Renderer for StaticHtmlRenderer {
    fn render(&self, slug: &str, document: &PageDocument) -> String {
        let mut html = String::with_capacity(1024 + document.blocks.len() * 256);
        html.push_str("<!doctype html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
        html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
        let _ = writeln!(html, "<title>{}</title>", escape(slug));
        html.push_str("</head>\n");
        let _ = writeln!(
            html,
            "<body style=\"margin:0;min-height:100vh;{}\">",
            background_style(&document.background)
        );
        html.push_str("<main style=\"position:relative\">\n");

        for block in &document.blocks {
            let _ = write!(
                html,
                "<div data-block=\"{}\" style=\"position:absolute;left:{}px;top:{}px;width:{}px;height:{}px\">",
                escape(&block.id),
                block.x,
                block.y,
                block.w,
                block.h
            );
            match &block.content {
                BlockKind::Text { text } => {
                    let _ = write!(html, "<p>{}</p>", escape(text));
                }
                BlockKind::Link { url, label } => {
                    let _ = write!(
                        html,
                        "<a href=\"{}\" rel=\"noopener nofollow\">{}</a>",
                        escape(url),
                        escape(label)
                    );
                }
                BlockKind::Image { src, alt } => {
                    let _ = write!(
                        html,
                        "<img src=\"{}\" alt=\"{}\" style=\"width:100%;height:100%;object-fit:cover\">",
                        escape(src),
                        escape(alt)
                    );
                }
                BlockKind::Audio { src } => {
                    let _ = write!(html, "<audio controls src=\"{}\"></audio>", escape(src));
                }
            }
            html.push_str("</div>\n");
        }

        html.push_str("</main>\n</body>\n</html>\n");
        html
    }
}

fn background_style(background: &Background) -> String {
    match background {
        Background::Solid { color } => format!("background:{}", escape(color)),
        Background::Gradient { from, to, angle } => format!(
            "background:linear-gradient({angle}deg, {}, {})",
            escape(from),
            escape(to)
        ),
        Background::Image { src } => {
            format!("background:url(&quot;{}&quot;) center/cover", escape(&css_url(src)))
        }
    }
}

/// Percent-encodes the characters that could close a CSS `url("...")`.
fn css_url(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    for ch in src.chars() {
        match ch {
            '"' => out.push_str("%22"),
            '\'' => out.push_str("%27"),
            '(' => out.push_str("%28"),
            ')' => out.push_str("%29"),
            '\\' => out.push_str("%5C"),
            _ => out.push(ch),
        }
    }
    out
}

/// Escapes text for use in element content and double-quoted attributes.
#[must_use]
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use pagedrop_core::Block;

    use super::*;

    fn text_block(id: &str, text: &str) -> Block {
        Block {
            id: id.to_string(),
            x: 10,
            y: 20,
            w: 100,
            h: 40,
            content: BlockKind::Text {
                text: text.to_string(),
            },
        }
    }

    #[test]
    fn escapes_markup_in_text() {
        assert_eq!(
            escape(r#"<script>alert("x")</script>"#),
            "&lt;script&gt;alert(&quot;x&quot;)&lt;/script&gt;"
        );
    }

    #[test]
    fn renders_blocks_with_geometry() {
        let document = PageDocument {
            blocks: vec![text_block("b1", "hello <world>")],
            background: Background::default(),
        };
        let html = StaticHtmlRenderer.render("my-page", &document);

        assert!(html.starts_with("<!doctype html>"));
        assert!(html.contains("<title>my-page</title>"));
        assert!(html.contains("left:10px;top:20px;width:100px;height:40px"));
        assert!(html.contains("<p>hello &lt;world&gt;</p>"));
        assert!(!html.contains("<world>"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let document = PageDocument {
            blocks: vec![text_block("a", "one"), text_block("b", "two")],
            background: Background::Gradient {
                from: "#000".to_string(),
                to: "#fff".to_string(),
                angle: 90,
            },
        };
        let first = StaticHtmlRenderer.render("s", &document);
        let second = StaticHtmlRenderer.render("s", &document);
        assert_eq!(first, second);
        assert!(first.contains("linear-gradient(90deg, #000, #fff)"));
    }

    #[test]
    fn background_url_cannot_close_css_token() {
        let style = background_style(&Background::Image {
            src: r#"https://cdn.example/a.png");color:red;x:url("#.to_string(),
        });
        assert_eq!(
            style,
            "background:url(&quot;https://cdn.example/a.png%22%29;color:red;x:url%28%22&quot;) center/cover"
        );
    }
}
