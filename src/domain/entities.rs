//! Domain entities mirrored from persistent storage.

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::error::DomainError;
use crate::domain::visibility::PolicyTag;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagRecord {
    pub id: Uuid,
    pub name: String,
    pub is_master: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl PolicyTag for TagRecord {
    fn tag_id(&self) -> Uuid {
        self.id
    }

    fn is_master(&self) -> bool {
        self.is_master
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub is_admin: bool,
    pub created_at: OffsetDateTime,
}

/// Persisted render output paired with the fingerprint of the body it was rendered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderCacheEntry {
    pub fingerprint: String,
    pub html: String,
}

impl RenderCacheEntry {
    /// Rebuild an entry from the two nullable cache columns.
    ///
    /// Both columns are written together; a row holding only one of them is corrupt.
    pub fn from_columns(
        fingerprint: Option<String>,
        html: Option<String>,
    ) -> Result<Option<Self>, DomainError> {
        match (fingerprint, html) {
            (Some(fingerprint), Some(html)) => Ok(Some(Self { fingerprint, html })),
            (None, None) => Ok(None),
            (Some(_), None) => Err(DomainError::invariant(
                "body fingerprint stored without rendered html",
            )),
            (None, Some(_)) => Err(DomainError::invariant(
                "rendered html stored without body fingerprint",
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostRecord {
    pub id: Uuid,
    pub title: String,
    pub body_markdown: String,
    pub render_cache: Option<RenderCacheEntry>,
    pub is_draft: bool,
    pub comments_enabled: bool,
    pub author_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentRecord {
    pub id: Uuid,
    pub post_id: Uuid,
    pub author_id: Option<Uuid>,
    pub author_name: Option<String>,
    pub body_markdown: String,
    pub render_cache: Option<RenderCacheEntry>,
    pub created_at: OffsetDateTime,
}

impl CommentRecord {
    pub fn author_display_name(&self) -> &str {
        match (self.author_name.as_deref(), self.author_id) {
            (Some(name), _) if !name.trim().is_empty() => name,
            (_, Some(_)) => "Unknown User",
            _ => "Anonymous",
        }
    }
}

/// One row of the post/tag join, with the tag resolved when it still exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostTagEdge {
    pub post_id: Uuid,
    pub tag_id: Uuid,
    pub tag: Option<TagRecord>,
}
