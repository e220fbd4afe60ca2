//! Slug allocation.
//!
//! Turns a seed into a slug no other page holds. The uniqueness check is an
//! injected async predicate, so the allocator works against any revision
//! store and can be driven by a scripted predicate in tests.
//!
//! Candidates are tried in order: the sanitized base, then `base-2`,
//! `base-3`, ... for a bounded number of attempts, then `base-<random>`, which
//! is accepted without another check. The last step is what guarantees the
//! loop ends.

use std::future::Future;

use pagedrop_core::slug::{is_valid_slug, sanitize, with_suffix, MIN_SLUG_LEN};
use pagedrop_core::User;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Length of the random suffix used after numeric suffixes are exhausted.
pub const RANDOM_SUFFIX_LEN: usize = 8;

/// Length of the random padding appended to bases shorter than
/// [`MIN_SLUG_LEN`].
const PAD_LEN: usize = 4;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Random string over `[a-z0-9]`.
#[must_use]
pub fn random_suffix(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| char::from(ALPHABET[rng.random_range(0..ALPHABET.len())]))
        .collect()
}

/// Deterministic seed for a page's first slug.
///
/// The owner's username when it sanitizes to something non-empty, otherwise
/// `user-` followed by the first 8 hex digits of the owner token's SHA-256.
#[must_use]
pub fn slug_seed(user: Option<&User>, owner_token: &str) -> String {
    if let Some(username) = user.and_then(|u| u.username.as_deref()) {
        if !sanitize(username).is_empty() {
            return username.to_string();
        }
    }
    let digest = hex::encode(Sha256::digest(owner_token.as_bytes()));
    format!("user-{}", &digest[..8])
}

/// Returns the page's current slug if it can be reused as is.
#[must_use]
pub fn reusable_slug(existing: Option<&str>) -> Option<&str> {
    existing.filter(|s| is_valid_slug(s))
}

/// Bounded-attempt slug allocator.
#[derive(Debug, Clone)]
pub struct SlugAllocator {
    max_suffix_attempts: u32,
}

impl SlugAllocator {
    #[must_use]
    pub fn new(max_suffix_attempts: u32) -> Self {
        Self {
            max_suffix_attempts,
        }
    }

    /// Allocates a slug for `seed`.
    ///
    /// `exists(candidate)` reports whether a candidate is already taken. It is
    /// called at most `max_suffix_attempts + 1` times.
    ///
    /// # Errors
    ///
    /// Only errors returned by `exists` itself; the allocation always
    /// produces a valid slug otherwise.
    pub async fn allocate<F, Fut, E>(&self, seed: &str, mut exists: F) -> Result<String, E>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<bool, E>>,
    {
        let base = padded_base(seed);

        if is_valid_slug(&base) && !exists(base.clone()).await? {
            return Ok(base);
        }

        for n in 2..self.max_suffix_attempts.saturating_add(2) {
            let candidate = with_suffix(&base, &n.to_string());
            if is_valid_slug(&candidate) && !exists(candidate.clone()).await? {
                return Ok(candidate);
            }
        }

        let fallback = with_suffix(&base, &random_suffix(RANDOM_SUFFIX_LEN));
        tracing::debug!(
            base = %base,
            slug = %fallback,
            attempts = self.max_suffix_attempts,
            "numeric slug suffixes exhausted, using random suffix"
        );
        Ok(fallback)
    }
}

impl Default for SlugAllocator {
    fn default() -> Self {
        Self::new(20)
    }
}

/// Sanitizes `seed` and pads it with random characters when it is too short
/// to be a slug on its own.
fn padded_base(seed: &str) -> String {
    let base = sanitize(seed);
    if base.len() >= MIN_SLUG_LEN {
        base
    } else {
        with_suffix(&base, &random_suffix(PAD_LEN))
    }
}
