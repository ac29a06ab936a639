//! Reader-facing post listing and detail views.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::pagination::{CursorPage, PageRequest, PaginationError, PostCursor};
use crate::application::render::{RenderCache, RenderOutcome};
use crate::application::repos::{CommentsRepo, RepoError};
use crate::application::visibility::{VisibilityError, VisibilityFilter, VisiblePost};
use crate::domain::entities::{CommentRecord, TagRecord};
use crate::domain::visibility::{PostAccess, VisibilityContext};

#[derive(Debug, Error)]
pub enum PostViewError {
    #[error("post not found")]
    NotFound,
    #[error("login required")]
    Unauthenticated,
    #[error("viewer lacks the tags required for this post")]
    Forbidden,
    #[error(transparent)]
    Pagination(#[from] PaginationError),
    #[error(transparent)]
    Visibility(#[from] VisibilityError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagView {
    pub id: Uuid,
    pub name: String,
    pub is_master: bool,
}

impl From<&TagRecord> for TagView {
    fn from(tag: &TagRecord) -> Self {
        Self {
            id: tag.id,
            name: tag.name.clone(),
            is_master: tag.is_master,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostSummary {
    pub id: Uuid,
    pub title: String,
    pub html: String,
    pub is_draft: bool,
    pub comments_enabled: bool,
    pub tags: Vec<TagView>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub render: RenderOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentView {
    pub id: Uuid,
    pub author: String,
    pub html: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostDetail {
    #[serde(flatten)]
    pub post: PostSummary,
    pub comments: Vec<CommentView>,
}

/// Assembles filtered, rendered pages for readers.
#[derive(Clone)]
pub struct PostViewService {
    filter: VisibilityFilter,
    comments: Arc<dyn CommentsRepo>,
    cache: RenderCache,
}

impl PostViewService {
    pub fn new(filter: VisibilityFilter, comments: Arc<dyn CommentsRepo>, cache: RenderCache) -> Self {
        Self {
            filter,
            comments,
            cache,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.filter.settings().page_size
    }

    pub async fn list_page(
        &self,
        context: &VisibilityContext,
        cursor: Option<&str>,
    ) -> Result<CursorPage<PostSummary>, PostViewError> {
        if context.login_required() {
            return Err(PostViewError::Unauthenticated);
        }

        let cursor = cursor
            .filter(|raw| !raw.trim().is_empty())
            .map(PostCursor::decode)
            .transpose()?;
        let page = self
            .filter
            .visible_page(context, PageRequest::new(self.page_size(), cursor))
            .await?;

        let summaries = join_all(page.items.iter().map(|item| self.summarize(item))).await;
        Ok(CursorPage::new(summaries, page.next_cursor))
    }

    pub async fn post_detail(
        &self,
        context: &VisibilityContext,
        post_id: Uuid,
    ) -> Result<PostDetail, PostViewError> {
        if context.login_required() {
            return Err(PostViewError::Unauthenticated);
        }

        let verdict = self
            .filter
            .post_access(context, post_id)
            .await?
            .ok_or(PostViewError::NotFound)?;

        match verdict.access {
            PostAccess::Visible => {}
            PostAccess::Hidden => return Err(PostViewError::NotFound),
            PostAccess::Unauthenticated => return Err(PostViewError::Unauthenticated),
            PostAccess::Forbidden => return Err(PostViewError::Forbidden),
        }

        let summary = self.summarize(&verdict.post).await;
        let comments = self.comments.list_for_post(post_id).await?;
        let comments = join_all(comments.iter().map(|comment| self.comment_view(comment))).await;

        Ok(PostDetail {
            post: summary,
            comments,
        })
    }

    async fn summarize(&self, item: &VisiblePost) -> PostSummary {
        let rendered = self.cache.post_html(&item.post).await;
        PostSummary {
            id: item.post.id,
            title: item.post.title.clone(),
            html: rendered.html,
            is_draft: item.post.is_draft,
            comments_enabled: item.post.comments_enabled,
            tags: item.tags.iter().map(TagView::from).collect(),
            created_at: item.post.created_at,
            render: rendered.outcome,
        }
    }

    async fn comment_view(&self, comment: &CommentRecord) -> CommentView {
        let rendered = self.cache.comment_html(comment).await;
        CommentView {
            id: comment.id,
            author: comment.author_display_name().to_string(),
            html: rendered.html,
            created_at: comment.created_at,
        }
    }
}
