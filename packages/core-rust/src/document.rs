//! Typed page document and its validation contract.
//!
//! Documents arrive as JSON from the editor. [`DocumentLimits::parse`] is the
//! single place where that JSON is checked; everything downstream (store,
//! renderer, orchestrator) only ever sees a [`PageDocument`].

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

static COLOR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6})$").expect("color pattern is a valid regex")
});

/// A complete canvas: positioned blocks plus a page background.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PageDocument {
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub background: Background,
}

/// One positioned content block on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Block {
    /// Editor-assigned identifier, unique within the document.
    pub id: String,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub content: BlockKind,
}

/// Block payload, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BlockKind {
    Text { text: String },
    Link { url: String, label: String },
    Image { src: String, alt: String },
    Audio { src: String },
}

/// Page background.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Background {
    Solid { color: String },
    Gradient { from: String, to: String, angle: u16 },
    Image { src: String },
}

impl Default for Background {
    fn default() -> Self {
        Self::Solid {
            color: "#ffffff".to_string(),
        }
    }
}

/// Size and count limits applied at the validation boundary.
#[derive(Debug, Clone)]
pub struct DocumentLimits {
    /// Maximum number of blocks per document.
    pub max_blocks: usize,
    /// Maximum size of the raw JSON document in bytes.
    pub max_document_bytes: usize,
    /// Maximum characters in any single text or label field.
    pub max_text_chars: usize,
}

impl Default for DocumentLimits {
    fn default() -> Self {
        Self {
            max_blocks: 100,
            max_document_bytes: 256 * 1024,
            max_text_chars: 10_000,
        }
    }
}

impl DocumentLimits {
    /// Parses and validates a raw JSON document.
    ///
    /// Checks run in a fixed order: byte size, JSON shape, block count, then
    /// per-block contents and the background.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] encountered.
    pub fn parse(&self, raw: &[u8]) -> Result<PageDocument, ValidationError> {
        if raw.len() > self.max_document_bytes {
            return Err(ValidationError::TooLarge {
                actual: raw.len(),
                limit: self.max_document_bytes,
            });
        }

        let document: PageDocument =
            serde_json::from_slice(raw).map_err(|e| ValidationError::Malformed {
                reason: e.to_string(),
            })?;

        self.check(&document)?;
        Ok(document)
    }

    /// Validates an already-typed document against these limits.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] encountered.
    pub fn check(&self, document: &PageDocument) -> Result<(), ValidationError> {
        if document.blocks.len() > self.max_blocks {
            return Err(ValidationError::TooManyBlocks {
                actual: document.blocks.len(),
                limit: self.max_blocks,
            });
        }

        let mut seen = HashSet::with_capacity(document.blocks.len());
        for block in &document.blocks {
            if block.id.is_empty() {
                return Err(ValidationError::InvalidBlock {
                    id: String::new(),
                    reason: "empty id".to_string(),
                });
            }
            if !seen.insert(block.id.as_str()) {
                return Err(ValidationError::DuplicateBlockId {
                    id: block.id.clone(),
                });
            }
            self.check_block(block)?;
        }

        check_background(&document.background)
    }

    fn check_block(&self, block: &Block) -> Result<(), ValidationError> {
        if block.w == 0 || block.h == 0 {
            return Err(ValidationError::InvalidBlock {
                id: block.id.clone(),
                reason: "zero-sized block".to_string(),
            });
        }

        match &block.content {
            BlockKind::Text { text } => self.check_text(&block.id, text),
            BlockKind::Link { url, label } => {
                check_url("link.url", url, false)?;
                self.check_text(&block.id, label)
            }
            BlockKind::Image { src, alt } => {
                check_url("image.src", src, true)?;
                self.check_text(&block.id, alt)
            }
            BlockKind::Audio { src } => check_url("audio.src", src, true),
        }
    }

    fn check_text(&self, id: &str, text: &str) -> Result<(), ValidationError> {
        let chars = text.chars().count();
        if chars > self.max_text_chars {
            return Err(ValidationError::InvalidBlock {
                id: id.to_string(),
                reason: format!("text is {chars} characters, limit is {}", self.max_text_chars),
            });
        }
        Ok(())
    }
}

fn check_background(background: &Background) -> Result<(), ValidationError> {
    match background {
        Background::Solid { color } => check_color(color),
        Background::Gradient { from, to, angle } => {
            check_color(from)?;
            check_color(to)?;
            if *angle >= 360 {
                return Err(ValidationError::Malformed {
                    reason: format!("gradient angle {angle} out of range"),
                });
            }
            Ok(())
        }
        Background::Image { src } => check_css_url("background.src", src),
    }
}

fn check_color(value: &str) -> Result<(), ValidationError> {
    if COLOR_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidColor {
            value: value.to_string(),
        })
    }
}

/// Accepts absolute `http(s)` URLs, and for media also site-relative asset
/// paths such as `/assets/abc.png`.
fn check_url(field: &'static str, value: &str, allow_relative: bool) -> Result<(), ValidationError> {
    let has_scheme_and_host = ["https://", "http://"]
        .iter()
        .any(|scheme| value.strip_prefix(scheme).is_some_and(|rest| !rest.is_empty()));
    let is_site_relative = allow_relative && value.starts_with('/') && !value.starts_with("//");

    if (has_scheme_and_host || is_site_relative) && !value.chars().any(char::is_whitespace) {
        Ok(())
    } else {
        Err(ValidationError::InvalidUrl {
            field,
            value: value.to_string(),
        })
    }
}

/// Characters that would end or escape a CSS `url("...")` token.
const CSS_URL_DELIMITERS: &[char] = &['"', '\'', '(', ')', '\\'];

/// [`check_url`] for values rendered inside a CSS `url()`.
fn check_css_url(field: &'static str, value: &str) -> Result<(), ValidationError> {
    check_url(field, value, true)?;
    if value.contains(CSS_URL_DELIMITERS) {
        return Err(ValidationError::InvalidUrl {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}
