use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::{tokens_match, CallerIdentity};
use crate::document::{Background, Block, PageDocument};

/// Opaque, stable page identifier. Assigned at creation, never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(String);

impl PageId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The central entity: a draft canvas plus its last published snapshot.
///
/// `server_revision` is the only concurrency token. It starts at 1 and every
/// accepted draft save or publish advances it by exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    /// Anonymous session token or authenticated user id. Never empty.
    pub owner_token: String,
    /// Set once, by the ownership claim (or at creation by a logged-in user).
    pub user_id: Option<String>,
    /// Public address; globally unique when present.
    pub slug: Option<String>,
    pub draft_content: Vec<Block>,
    pub draft_background: Background,
    /// Snapshot taken by the last successful publish.
    pub published_content: Option<Vec<Block>>,
    pub published_background: Option<Background>,
    pub server_revision: u64,
    /// `server_revision` as of the last successful publish.
    pub published_revision: Option<u64>,
    pub is_published: bool,
    pub published_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Page {
    /// A fresh, empty draft at revision 1.
    #[must_use]
    pub fn new_draft(id: PageId, owner_token: String, user_id: Option<String>, now: i64) -> Self {
        Self {
            id,
            owner_token,
            user_id,
            slug: None,
            draft_content: Vec::new(),
            draft_background: Background::default(),
            published_content: None,
            published_background: None,
            server_revision: 1,
            published_revision: None,
            is_published: false,
            published_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `caller` may read or mutate this page.
    ///
    /// A logged-in owner matches on user id. Until the page is claimed, the
    /// anonymous token it was created under also matches.
    #[must_use]
    pub fn is_owned_by(&self, caller: &CallerIdentity) -> bool {
        if let Some(user_id) = caller.user_id.as_deref() {
            if tokens_match(&self.owner_token, user_id) {
                return true;
            }
        }
        match (self.user_id.as_deref(), caller.anonymous_token.as_deref()) {
            (None, Some(token)) => tokens_match(&self.owner_token, token),
            _ => false,
        }
    }

    /// `true` if the page is owned by an anonymous token (never claimed).
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }

    /// Whether the draft has diverged from what is live.
    #[must_use]
    pub fn has_unpublished_changes(&self) -> bool {
        self.published_revision != Some(self.server_revision)
    }

    /// The draft as a document value.
    #[must_use]
    pub fn draft_document(&self) -> PageDocument {
        PageDocument {
            blocks: self.draft_content.clone(),
            background: self.draft_background.clone(),
        }
    }

    /// The published snapshot as a document value, if any.
    #[must_use]
    pub fn published_document(&self) -> Option<PageDocument> {
        Some(PageDocument {
            blocks: self.published_content.clone()?,
            background: self.published_background.clone().unwrap_or_default(),
        })
    }

    #[must_use]
    pub fn summary(&self) -> PageSummary {
        PageSummary {
            id: self.id.clone(),
            slug: self.slug.clone(),
            server_revision: self.server_revision,
            published_revision: self.published_revision,
            is_published: self.is_published,
            updated_at: self.updated_at,
        }
    }
}

/// Lightweight listing view of a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSummary {
    pub id: PageId,
    pub slug: Option<String>,
    pub server_revision: u64,
    pub published_revision: Option<u64>,
    pub is_published: bool,
    pub updated_at: i64,
}

/// Authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Globally unique when present; seeds the user's page slugs.
    pub username: Option<String>,
    /// Stable subject identifier from the external auth provider.
    pub auth_subject: String,
}
