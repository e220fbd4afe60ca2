//! Slug alphabet rules.
//!
//! A slug is the public address of a published page. Slugs use lowercase ASCII
//! letters, digits and single interior hyphens, and are between
//! [`MIN_SLUG_LEN`] and [`MAX_SLUG_LEN`] characters long. Allocation (collision
//! handling, random padding) lives in the server crate; this module only knows
//! what a slug may look like.

use std::sync::LazyLock;

use regex::Regex;

/// Shortest slug that will be handed out.
pub const MIN_SLUG_LEN: usize = 3;

/// Longest slug that will be handed out, suffix included.
pub const MAX_SLUG_LEN: usize = 48;

/// Path segments used by the server itself. Never issued as a bare slug.
pub const RESERVED_SLUGS: &[&str] = &["admin", "api", "assets", "health", "p", "static"];

static SLUG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("slug pattern is a valid regex")
});

/// Maps an arbitrary seed string onto the slug alphabet.
///
/// Letters are lowercased, every run of characters outside `[a-z0-9]` becomes
/// a single hyphen, and leading/trailing hyphens are dropped. The result is
/// truncated to [`MAX_SLUG_LEN`] but may be shorter than [`MIN_SLUG_LEN`]
/// (including empty); callers pad short bases themselves.
///
/// ```
/// use pagedrop_core::slug::sanitize;
///
/// assert_eq!(sanitize("  Hello, World!! "), "hello-world");
/// assert_eq!(sanitize("___"), "");
/// ```
#[must_use]
pub fn sanitize(seed: &str) -> String {
    let mut out = String::with_capacity(seed.len().min(MAX_SLUG_LEN * 2));
    // Starts true so leading separators never produce a hyphen.
    let mut last_was_hyphen = true;

    for ch in seed.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            out.push(ch);
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            out.push('-');
            last_was_hyphen = true;
        }
    }

    truncate_base(&out, MAX_SLUG_LEN)
}

/// Truncates an already-sanitized base to at most `max_len` characters and
/// strips any hyphens left dangling at the cut.
#[must_use]
pub fn truncate_base(base: &str, max_len: usize) -> String {
    // Sanitized bases are pure ASCII, so byte and char offsets coincide.
    let cut = base.len().min(max_len);
    base[..cut].trim_end_matches('-').to_string()
}

/// Joins `base` and `suffix` with a hyphen, truncating the base (never the
/// suffix) so the result fits in [`MAX_SLUG_LEN`].
///
/// ```
/// use pagedrop_core::slug::{with_suffix, MAX_SLUG_LEN};
///
/// assert_eq!(with_suffix("alice", "2"), "alice-2");
/// let long = "a".repeat(60);
/// let joined = with_suffix(&long, "17");
/// assert_eq!(joined.len(), MAX_SLUG_LEN);
/// assert!(joined.ends_with("-17"));
/// ```
#[must_use]
pub fn with_suffix(base: &str, suffix: &str) -> String {
    let room = MAX_SLUG_LEN.saturating_sub(suffix.len() + 1);
    let head = truncate_base(base, room);
    if head.is_empty() {
        suffix.to_string()
    } else {
        format!("{head}-{suffix}")
    }
}

/// Returns `true` if `candidate` is one of the [`RESERVED_SLUGS`].
#[must_use]
pub fn is_reserved(candidate: &str) -> bool {
    RESERVED_SLUGS.contains(&candidate)
}

/// Returns `true` if `candidate` is a slug that could have been issued:
/// canonical alphabet, length bounds respected, not reserved.
#[must_use]
pub fn is_valid_slug(candidate: &str) -> bool {
    (MIN_SLUG_LEN..=MAX_SLUG_LEN).contains(&candidate.len())
        && SLUG_PATTERN.is_match(candidate)
        && !is_reserved(candidate)
}
