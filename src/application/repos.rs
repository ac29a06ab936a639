//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::application::pagination::{PaginationError, PostCursor};
use crate::domain::entities::{
    CommentRecord, PostRecord, PostTagEdge, RenderCacheEntry, TagRecord, UserRecord,
};
use crate::domain::error::DomainError;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
    #[error(transparent)]
    Pagination(#[from] PaginationError),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<DomainError> for RepoError {
    fn from(err: DomainError) -> Self {
        Self::Integrity {
            message: err.to_string(),
        }
    }
}

/// Which posts a candidate listing may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostListScope {
    /// Published posts only; drafts never leave the database.
    Public,
    /// Everything, drafts included.
    Admin,
}

#[derive(Debug, Clone)]
pub struct CreatePostParams {
    pub title: String,
    pub body_markdown: String,
    pub is_draft: bool,
    pub comments_enabled: bool,
    pub author_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct CreateTagParams {
    pub name: String,
    pub is_master: bool,
}

#[derive(Debug, Clone)]
pub struct CreateUserParams {
    pub username: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone)]
pub struct CreateCommentParams {
    pub post_id: Uuid,
    pub author_id: Option<Uuid>,
    pub author_name: Option<String>,
    pub body_markdown: String,
}

#[async_trait]
pub trait PostsRepo: Send + Sync {
    /// Posts in `created_at DESC, id DESC` order, strictly after `after`, at most `limit` rows.
    async fn list_candidates(
        &self,
        scope: PostListScope,
        after: Option<PostCursor>,
        limit: u32,
    ) -> Result<Vec<PostRecord>, RepoError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PostRecord>, RepoError>;
}

#[async_trait]
pub trait PostsWriteRepo: Send + Sync {
    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError>;

    /// Replace the body. The stored render cache is cleared in the same write.
    async fn update_post_body(
        &self,
        id: Uuid,
        body_markdown: &str,
    ) -> Result<PostRecord, RepoError>;

    async fn delete_post(&self, id: Uuid) -> Result<(), RepoError>;

    async fn replace_post_tags(&self, post_id: Uuid, tag_ids: &[Uuid]) -> Result<(), RepoError>;
}

#[async_trait]
pub trait TagsRepo: Send + Sync {
    async fn list_all(&self) -> Result<Vec<TagRecord>, RepoError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TagRecord>, RepoError>;

    /// Every post/tag edge for the given posts, in one round trip.
    async fn list_for_posts(&self, post_ids: &[Uuid]) -> Result<Vec<PostTagEdge>, RepoError>;

    /// Tag ids granted to a user.
    async fn list_grants(&self, user_id: Uuid) -> Result<Vec<Uuid>, RepoError>;
}

#[async_trait]
pub trait TagsWriteRepo: Send + Sync {
    async fn create_tag(&self, params: CreateTagParams) -> Result<TagRecord, RepoError>;

    async fn set_master(&self, id: Uuid, is_master: bool) -> Result<TagRecord, RepoError>;

    /// Remove the tag and detach it from posts and users. Neither side is deleted.
    async fn delete_tag(&self, id: Uuid) -> Result<(), RepoError>;

    async fn replace_user_grants(&self, user_id: Uuid, tag_ids: &[Uuid])
    -> Result<(), RepoError>;
}

#[async_trait]
pub trait UsersRepo: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, RepoError>;
}

#[async_trait]
pub trait UsersWriteRepo: Send + Sync {
    async fn create_user(&self, params: CreateUserParams) -> Result<UserRecord, RepoError>;
}

#[async_trait]
pub trait CommentsRepo: Send + Sync {
    /// Comments on a post, oldest first.
    async fn list_for_post(&self, post_id: Uuid) -> Result<Vec<CommentRecord>, RepoError>;
}

#[async_trait]
pub trait CommentsWriteRepo: Send + Sync {
    async fn create_comment(&self, params: CreateCommentParams)
    -> Result<CommentRecord, RepoError>;

    async fn update_comment_body(
        &self,
        id: Uuid,
        body_markdown: &str,
    ) -> Result<CommentRecord, RepoError>;
}

/// Write-back target for rendered HTML.
///
/// Implementations store the entry only while the row still holds
/// `body_markdown`; a concurrent edit wins. Returns whether a row was updated.
#[async_trait]
pub trait RenderCacheRepo: Send + Sync {
    async fn store_post_render(
        &self,
        post_id: Uuid,
        body_markdown: &str,
        entry: &RenderCacheEntry,
    ) -> Result<bool, RepoError>;

    async fn store_comment_render(
        &self,
        comment_id: Uuid,
        body_markdown: &str,
        entry: &RenderCacheEntry,
    ) -> Result<bool, RepoError>;
}
