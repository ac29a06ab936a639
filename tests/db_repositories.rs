use gatepost::application::pagination::PostCursor;
use gatepost::application::render::{RenderCache, fingerprint, render_service};
use gatepost::application::repos::{
    CommentsRepo, CommentsWriteRepo, CreateCommentParams, CreatePostParams, CreateTagParams,
    CreateUserParams, PostListScope, PostsRepo, PostsWriteRepo, RenderCacheRepo, TagsRepo,
    TagsWriteRepo, UsersRepo, UsersWriteRepo,
};
use gatepost::application::visibility::{FilterSettings, VisibilityFilter};
use gatepost::domain::entities::RenderCacheEntry;
use gatepost::domain::visibility::{PostAccess, VisibilityContext};
use gatepost::infra::db::PostgresRepositories;
use sqlx::PgPool;
use std::sync::Arc;

async fn seed_post(repos: &PostgresRepositories, title: &str, is_draft: bool) -> uuid::Uuid {
    repos
        .create_post(CreatePostParams {
            title: title.to_string(),
            body_markdown: format!("body of {title}"),
            is_draft,
            comments_enabled: true,
            author_id: None,
        })
        .await
        .expect("create post")
        .id
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL pointing at a disposable Postgres"]
async fn candidates_follow_keyset_order_and_scope(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);

    let first = seed_post(&repos, "first", false).await;
    let second = seed_post(&repos, "second", true).await;
    let third = seed_post(&repos, "third", false).await;

    let public = repos
        .list_candidates(PostListScope::Public, None, 10)
        .await
        .expect("public candidates");
    assert!(public.iter().all(|post| !post.is_draft));
    assert!(public.iter().all(|post| post.id != second));
    assert_eq!(public.len(), 2);

    let admin = repos
        .list_candidates(PostListScope::Admin, None, 10)
        .await
        .expect("admin candidates");
    assert_eq!(admin.len(), 3);
    for pair in admin.windows(2) {
        assert!((pair[0].created_at, pair[0].id) > (pair[1].created_at, pair[1].id));
    }

    let cursor = PostCursor::after(&admin[0]);
    let rest = repos
        .list_candidates(PostListScope::Admin, Some(cursor), 10)
        .await
        .expect("after cursor");
    assert_eq!(rest.len(), 2);
    assert!(rest.iter().all(|post| post.id != admin[0].id));

    let ids: Vec<_> = admin.iter().map(|post| post.id).collect();
    assert!(ids.contains(&first) && ids.contains(&third));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL pointing at a disposable Postgres"]
async fn tag_edges_grants_and_deletion(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);

    let master = repos
        .create_tag(CreateTagParams {
            name: "members".into(),
            is_master: true,
        })
        .await
        .expect("create master");
    let regular = repos
        .create_tag(CreateTagParams {
            name: "news".into(),
            is_master: false,
        })
        .await
        .expect("create regular");

    let post = seed_post(&repos, "tagged", false).await;
    repos
        .replace_post_tags(post, &[master.id, regular.id])
        .await
        .expect("attach");

    let edges = repos.list_for_posts(&[post]).await.expect("edges");
    assert_eq!(edges.len(), 2);
    assert!(edges.iter().all(|edge| edge.tag.is_some()));

    let user = repos
        .create_user(CreateUserParams {
            username: "reader".into(),
            is_admin: false,
        })
        .await
        .expect("create user");
    repos
        .replace_user_grants(user.id, &[regular.id])
        .await
        .expect("grant");
    assert_eq!(
        repos.list_grants(user.id).await.expect("grants"),
        vec![regular.id]
    );
    assert!(
        UsersRepo::find_by_id(&repos, user.id)
            .await
            .expect("lookup")
            .is_some()
    );

    let toggled = repos.set_master(master.id, false).await.expect("toggle");
    assert!(!toggled.is_master);

    repos.delete_tag(master.id).await.expect("delete");
    let edges = repos.list_for_posts(&[post]).await.expect("edges");
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].tag_id, regular.id);
    assert!(
        TagsRepo::find_by_id(&repos, master.id)
            .await
            .expect("lookup")
            .is_none()
    );
    assert_eq!(repos.list_all().await.expect("all tags").len(), 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL pointing at a disposable Postgres"]
async fn render_cache_writes_are_conditional_on_the_body(pool: PgPool) {
    let repos = Arc::new(PostgresRepositories::new(pool));
    let post = seed_post(&repos, "cached", false).await;

    let entry = RenderCacheEntry {
        fingerprint: fingerprint("stale body"),
        html: "<p>stale body</p>".into(),
    };
    let stored = repos
        .store_post_render(post, "stale body", &entry)
        .await
        .expect("store");
    assert!(!stored, "write computed from another body must not land");

    let store: Arc<dyn RenderCacheRepo> = repos.clone();
    let cache = RenderCache::new(render_service(), store);
    let record = PostsRepo::find_by_id(repos.as_ref(), post)
        .await
        .expect("lookup")
        .expect("exists");
    cache.post_html(&record).await;

    let record = PostsRepo::find_by_id(repos.as_ref(), post)
        .await
        .expect("lookup")
        .expect("exists");
    let entry = record.render_cache.expect("cache stored");
    assert_eq!(entry.fingerprint, fingerprint(&record.body_markdown));

    let edited = repos
        .update_post_body(post, "new body")
        .await
        .expect("edit");
    assert!(edited.render_cache.is_none());

    let comment = repos
        .create_comment(CreateCommentParams {
            post_id: post,
            author_id: None,
            author_name: None,
            body_markdown: "hello".into(),
        })
        .await
        .expect("comment");
    cache.comment_html(&comment).await;
    let comments = repos.list_for_post(post).await.expect("comments");
    assert!(comments[0].render_cache.is_some());

    let edited = repos
        .update_comment_body(comment.id, "bye")
        .await
        .expect("edit comment");
    assert!(edited.render_cache.is_none());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL pointing at a disposable Postgres"]
async fn filter_runs_against_postgres(pool: PgPool) {
    let repos = Arc::new(PostgresRepositories::new(pool));
    let tag = repos
        .create_tag(CreateTagParams {
            name: "vip".into(),
            is_master: true,
        })
        .await
        .expect("tag");
    let gated = seed_post(&repos, "gated", false).await;
    repos
        .replace_post_tags(gated, &[tag.id])
        .await
        .expect("attach");
    seed_post(&repos, "open", false).await;

    let posts: Arc<dyn PostsRepo> = repos.clone();
    let tags: Arc<dyn TagsRepo> = repos.clone();
    let filter = VisibilityFilter::new(posts, tags, FilterSettings::default());

    let ctx = VisibilityContext::member(Vec::<uuid::Uuid>::new(), true);
    let verdict = filter
        .post_access(&ctx, gated)
        .await
        .expect("lookup")
        .expect("exists");
    assert_eq!(verdict.access, PostAccess::Forbidden);

    repos.delete_post(gated).await.expect("delete");
    assert!(
        filter
            .post_access(&ctx, gated)
            .await
            .expect("lookup")
            .is_none()
    );
}
