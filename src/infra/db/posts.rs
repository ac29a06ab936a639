use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::pagination::PostCursor;
use crate::application::repos::{
    CreatePostParams, PostListScope, PostsRepo, PostsWriteRepo, RepoError,
};
use crate::domain::entities::{PostRecord, RenderCacheEntry};

use super::{PostgresRepositories, map_sqlx_error};

const POST_COLUMNS: &str = "p.id, p.title, p.body_markdown, p.rendered_html, p.body_fingerprint, \
     p.is_draft, p.comments_enabled, p.author_id, p.created_at, p.updated_at";

#[derive(sqlx::FromRow)]
struct PostRow {
    id: Uuid,
    title: String,
    body_markdown: String,
    rendered_html: Option<String>,
    body_fingerprint: Option<String>,
    is_draft: bool,
    comments_enabled: bool,
    author_id: Option<Uuid>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<PostRow> for PostRecord {
    type Error = RepoError;

    fn try_from(row: PostRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            title: row.title,
            body_markdown: row.body_markdown,
            render_cache: RenderCacheEntry::from_columns(row.body_fingerprint, row.rendered_html)?,
            is_draft: row.is_draft,
            comments_enabled: row.comments_enabled,
            author_id: row.author_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn select_posts<'q>() -> QueryBuilder<'q, Postgres> {
    let mut qb = QueryBuilder::new("SELECT ");
    qb.push(POST_COLUMNS);
    qb.push(" FROM posts p WHERE 1=1 ");
    qb
}

impl PostgresRepositories {
    /// Every post, oldest first. Used by the bulk re-render command.
    pub fn stream_all_posts(&self) -> BoxStream<'_, Result<PostRecord, RepoError>> {
        let stream = sqlx::query_as::<_, PostRow>(
            "SELECT p.id, p.title, p.body_markdown, p.rendered_html, p.body_fingerprint, \
             p.is_draft, p.comments_enabled, p.author_id, p.created_at, p.updated_at \
             FROM posts p ORDER BY p.created_at, p.id",
        )
        .fetch(self.pool())
        .map(|row| match row {
            Ok(row) => PostRecord::try_from(row),
            Err(err) => Err(map_sqlx_error(err)),
        });

        Box::pin(stream)
    }
}

#[async_trait]
impl PostsRepo for PostgresRepositories {
    async fn list_candidates(
        &self,
        scope: PostListScope,
        after: Option<PostCursor>,
        limit: u32,
    ) -> Result<Vec<PostRecord>, RepoError> {
        let mut qb = select_posts();

        if scope == PostListScope::Public {
            qb.push(" AND NOT p.is_draft ");
        }

        if let Some(cursor) = after {
            qb.push(" AND (p.created_at, p.id) < (");
            qb.push_bind(cursor.created_at());
            qb.push(", ");
            qb.push_bind(cursor.id());
            qb.push(")");
        }

        qb.push(" ORDER BY p.created_at DESC, p.id DESC LIMIT ");
        qb.push_bind(i64::from(limit.max(1)));

        let rows = qb
            .build_query_as::<PostRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(PostRecord::try_from).collect()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PostRecord>, RepoError> {
        let mut qb = select_posts();
        qb.push(" AND p.id = ");
        qb.push_bind(id);

        let row = qb
            .build_query_as::<PostRow>()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        row.map(PostRecord::try_from).transpose()
    }
}

#[async_trait]
impl PostsWriteRepo for PostgresRepositories {
    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError> {
        let id = Uuid::new_v4();
        let row = sqlx::query_as::<_, PostRow>(
            r#"
            INSERT INTO posts (id, title, body_markdown, is_draft, comments_enabled, author_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, title, body_markdown, rendered_html, body_fingerprint,
                      is_draft, comments_enabled, author_id, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(params.title)
        .bind(params.body_markdown)
        .bind(params.is_draft)
        .bind(params.comments_enabled)
        .bind(params.author_id)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        PostRecord::try_from(row)
    }

    async fn update_post_body(
        &self,
        id: Uuid,
        body_markdown: &str,
    ) -> Result<PostRecord, RepoError> {
        let row = sqlx::query_as::<_, PostRow>(
            r#"
            UPDATE posts
            SET body_markdown = $2,
                rendered_html = NULL,
                body_fingerprint = NULL,
                updated_at = now()
            WHERE id = $1
            RETURNING id, title, body_markdown, rendered_html, body_fingerprint,
                      is_draft, comments_enabled, author_id, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(body_markdown)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepoError::NotFound)?;

        PostRecord::try_from(row)
    }

    async fn delete_post(&self, id: Uuid) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn replace_post_tags(&self, post_id: Uuid, tag_ids: &[Uuid]) -> Result<(), RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        sqlx::query("DELETE FROM post_tags WHERE post_id = $1")
            .bind(post_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        if !tag_ids.is_empty() {
            let mut qb = QueryBuilder::<Postgres>::new("INSERT INTO post_tags (post_id, tag_id) ");
            qb.push_values(tag_ids, |mut row, tag_id| {
                row.push_bind(post_id).push_bind(*tag_id);
            });
            qb.push(" ON CONFLICT DO NOTHING");
            qb.build()
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)
    }
}
