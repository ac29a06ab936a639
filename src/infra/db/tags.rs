use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{CreateTagParams, RepoError, TagsRepo, TagsWriteRepo},
    domain::entities::{PostTagEdge, TagRecord},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct TagRow {
    id: Uuid,
    name: String,
    is_master: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<TagRow> for TagRecord {
    fn from(row: TagRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            is_master: row.is_master,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Join row; the tag columns are null when the edge outlived its tag.
#[derive(sqlx::FromRow)]
struct EdgeRow {
    post_id: Uuid,
    tag_id: Uuid,
    name: Option<String>,
    is_master: Option<bool>,
    created_at: Option<OffsetDateTime>,
    updated_at: Option<OffsetDateTime>,
}

impl From<EdgeRow> for PostTagEdge {
    fn from(row: EdgeRow) -> Self {
        let tag = match (row.name, row.is_master, row.created_at, row.updated_at) {
            (Some(name), Some(is_master), Some(created_at), Some(updated_at)) => Some(TagRecord {
                id: row.tag_id,
                name,
                is_master,
                created_at,
                updated_at,
            }),
            _ => None,
        };

        Self {
            post_id: row.post_id,
            tag_id: row.tag_id,
            tag,
        }
    }
}

#[async_trait]
impl TagsRepo for PostgresRepositories {
    async fn list_all(&self) -> Result<Vec<TagRecord>, RepoError> {
        let rows = sqlx::query_as::<_, TagRow>(
            r#"
            SELECT id, name, is_master, created_at, updated_at
            FROM tags
            ORDER BY LOWER(name), id
            "#,
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(TagRecord::from).collect())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TagRecord>, RepoError> {
        let row = sqlx::query_as::<_, TagRow>(
            r#"
            SELECT id, name, is_master, created_at, updated_at
            FROM tags
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(TagRecord::from))
    }

    async fn list_for_posts(&self, post_ids: &[Uuid]) -> Result<Vec<PostTagEdge>, RepoError> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, EdgeRow>(
            r#"
            SELECT pt.post_id, pt.tag_id, t.name, t.is_master, t.created_at, t.updated_at
            FROM post_tags pt
            LEFT JOIN tags t ON t.id = pt.tag_id
            WHERE pt.post_id = ANY($1)
            ORDER BY pt.post_id, LOWER(t.name) NULLS LAST, pt.tag_id
            "#,
        )
        .bind(post_ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(PostTagEdge::from).collect())
    }

    async fn list_grants(&self, user_id: Uuid) -> Result<Vec<Uuid>, RepoError> {
        sqlx::query_scalar::<_, Uuid>("SELECT tag_id FROM user_tags WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)
    }
}

#[async_trait]
impl TagsWriteRepo for PostgresRepositories {
    async fn create_tag(&self, params: CreateTagParams) -> Result<TagRecord, RepoError> {
        let id = Uuid::new_v4();
        let row = sqlx::query_as::<_, TagRow>(
            r#"
            INSERT INTO tags (id, name, is_master)
            VALUES ($1, $2, $3)
            RETURNING id, name, is_master, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(params.name)
        .bind(params.is_master)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(TagRecord::from(row))
    }

    async fn set_master(&self, id: Uuid, is_master: bool) -> Result<TagRecord, RepoError> {
        let row = sqlx::query_as::<_, TagRow>(
            r#"
            UPDATE tags
            SET is_master = $2, updated_at = now()
            WHERE id = $1
            RETURNING id, name, is_master, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(is_master)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepoError::NotFound)?;

        Ok(TagRecord::from(row))
    }

    async fn delete_tag(&self, id: Uuid) -> Result<(), RepoError> {
        // post_tags and user_tags rows go with it via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM tags WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn replace_user_grants(
        &self,
        user_id: Uuid,
        tag_ids: &[Uuid],
    ) -> Result<(), RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        sqlx::query("DELETE FROM user_tags WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        if !tag_ids.is_empty() {
            let mut qb = QueryBuilder::<Postgres>::new("INSERT INTO user_tags (user_id, tag_id) ");
            qb.push_values(tag_ids, |mut row, tag_id| {
                row.push_bind(user_id).push_bind(*tag_id);
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
