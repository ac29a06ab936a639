use async_trait::async_trait;
use uuid::Uuid;

use crate::application::repos::{RenderCacheRepo, RepoError};
use crate::domain::entities::RenderCacheEntry;

use super::{PostgresRepositories, map_sqlx_error};

// Both writes are conditional on the body they were rendered from, so a slow
// render never overwrites the cache of a newer body.

#[async_trait]
impl RenderCacheRepo for PostgresRepositories {
    async fn store_post_render(
        &self,
        post_id: Uuid,
        body_markdown: &str,
        entry: &RenderCacheEntry,
    ) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET rendered_html = $3, body_fingerprint = $4
            WHERE id = $1 AND body_markdown = $2
            "#,
        )
        .bind(post_id)
        .bind(body_markdown)
        .bind(&entry.html)
        .bind(&entry.fingerprint)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn store_comment_render(
        &self,
        comment_id: Uuid,
        body_markdown: &str,
        entry: &RenderCacheEntry,
    ) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE comments
            SET rendered_html = $3, body_fingerprint = $4
            WHERE id = $1 AND body_markdown = $2
            "#,
        )
        .bind(comment_id)
        .bind(body_markdown)
        .bind(&entry.html)
        .bind(&entry.fingerprint)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }
}
