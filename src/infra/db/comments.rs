use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{
    CommentsRepo, CommentsWriteRepo, CreateCommentParams, RepoError,
};
use crate::domain::entities::{CommentRecord, RenderCacheEntry};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: Uuid,
    post_id: Uuid,
    author_id: Option<Uuid>,
    author_name: Option<String>,
    body_markdown: String,
    rendered_html: Option<String>,
    body_fingerprint: Option<String>,
    created_at: OffsetDateTime,
}

impl TryFrom<CommentRow> for CommentRecord {
    type Error = RepoError;

    fn try_from(row: CommentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            post_id: row.post_id,
            author_id: row.author_id,
            author_name: row.author_name,
            body_markdown: row.body_markdown,
            render_cache: RenderCacheEntry::from_columns(row.body_fingerprint, row.rendered_html)?,
            created_at: row.created_at,
        })
    }
}

impl PostgresRepositories {
    pub fn stream_all_comments(&self) -> BoxStream<'_, Result<CommentRecord, RepoError>> {
        let stream = sqlx::query_as::<_, CommentRow>(
            r#"
            SELECT id, post_id, author_id, author_name, body_markdown,
                   rendered_html, body_fingerprint, created_at
            FROM comments
            ORDER BY created_at, id
            "#,
        )
        .fetch(self.pool())
        .map(|row| match row {
            Ok(row) => CommentRecord::try_from(row),
            Err(err) => Err(map_sqlx_error(err)),
        });

        Box::pin(stream)
    }
}

#[async_trait]
impl CommentsRepo for PostgresRepositories {
    async fn list_for_post(&self, post_id: Uuid) -> Result<Vec<CommentRecord>, RepoError> {
        let rows = sqlx::query_as::<_, CommentRow>(
            r#"
            SELECT id, post_id, author_id, author_name, body_markdown,
                   rendered_html, body_fingerprint, created_at
            FROM comments
            WHERE post_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(post_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(CommentRecord::try_from).collect()
    }
}

#[async_trait]
impl CommentsWriteRepo for PostgresRepositories {
    async fn create_comment(
        &self,
        params: CreateCommentParams,
    ) -> Result<CommentRecord, RepoError> {
        let id = Uuid::new_v4();
        let row = sqlx::query_as::<_, CommentRow>(
            r#"
            INSERT INTO comments (id, post_id, author_id, author_name, body_markdown)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, post_id, author_id, author_name, body_markdown,
                      rendered_html, body_fingerprint, created_at
            "#,
        )
        .bind(id)
        .bind(params.post_id)
        .bind(params.author_id)
        .bind(params.author_name)
        .bind(params.body_markdown)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        CommentRecord::try_from(row)
    }

    async fn update_comment_body(
        &self,
        id: Uuid,
        body_markdown: &str,
    ) -> Result<CommentRecord, RepoError> {
        let row = sqlx::query_as::<_, CommentRow>(
            r#"
            UPDATE comments
            SET body_markdown = $2,
                rendered_html = NULL,
                body_fingerprint = NULL
            WHERE id = $1
            RETURNING id, post_id, author_id, author_name, body_markdown,
                      rendered_html, body_fingerprint, created_at
            "#,
        )
        .bind(id)
        .bind(body_markdown)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepoError::NotFound)?;

        CommentRecord::try_from(row)
    }
}
