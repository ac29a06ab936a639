mod support;

use std::sync::Arc;

use gatepost::application::render::{RenderOutcome, RenderService, fingerprint, render_service};
use gatepost::application::repos::{CommentsWriteRepo, PostsWriteRepo};

use support::{CountingRenderer, FailingRenderer, InMemoryStore, render_cache};

#[tokio::test]
async fn second_read_is_a_hit_without_rendering() {
    let store = InMemoryStore::new();
    let renderer = CountingRenderer::new();
    let cache = render_cache(&store, renderer.clone());

    let post = store
        .post_with("hello", "# Hello\n\nSome *text*.", false, &[])
        .await;

    let first = cache.post_html(&post).await;
    assert_eq!(first.outcome, RenderOutcome::Rendered);
    assert!(first.html.contains("<em>text</em>"));
    assert_eq!(renderer.calls(), 1);

    let stored = store.stored_post(post.id).await;
    let entry = stored.render_cache.clone().expect("cache written back");
    assert_eq!(entry.fingerprint, fingerprint(&post.body_markdown));
    assert_eq!(entry.html, first.html);

    let second = cache.post_html(&stored).await;
    assert_eq!(second.outcome, RenderOutcome::Hit);
    assert_eq!(second.html, first.html);
    assert_eq!(renderer.calls(), 1);
    assert_eq!(store.render_stores(), 1);
}

#[tokio::test]
async fn editing_the_body_invalidates_the_entry() {
    let store = InMemoryStore::new();
    let renderer = CountingRenderer::new();
    let cache = render_cache(&store, renderer.clone());

    let post = store.post_with("edit", "before", false, &[]).await;
    cache.post_html(&post).await;

    let edited = store
        .update_post_body(post.id, "after")
        .await
        .expect("edit");
    assert!(edited.render_cache.is_none());

    let rendered = cache.post_html(&edited).await;
    assert_eq!(rendered.outcome, RenderOutcome::Rendered);
    assert!(rendered.html.contains("after"));
    assert!(!rendered.html.contains("before"));
    assert_eq!(renderer.calls(), 2);
}

#[test]
fn stale_html_is_never_served() {
    let store = InMemoryStore::new();
    let cache = render_cache(&store, render_service());

    let old_fp = fingerprint("old body");
    let rendered = cache.get_rendered_html("new body", Some(&old_fp), Some("<p>old body</p>"));

    assert_eq!(rendered.outcome, RenderOutcome::Rendered);
    assert_eq!(rendered.fingerprint, fingerprint("new body"));
    assert!(rendered.html.contains("new body"));
}

#[test]
fn reverting_a_body_matches_its_earlier_fingerprint() {
    let store = InMemoryStore::new();
    let cache = render_cache(&store, render_service());

    let original = cache.get_rendered_html("first draft", None, None);
    let edited = cache.get_rendered_html(
        "second draft",
        Some(&original.fingerprint),
        Some(&original.html),
    );
    assert_eq!(edited.outcome, RenderOutcome::Rendered);

    let reverted = cache.get_rendered_html(
        "first draft",
        Some(&original.fingerprint),
        Some(&original.html),
    );
    assert_eq!(reverted.outcome, RenderOutcome::Hit);
    assert_eq!(reverted.html, original.html);
}

#[test]
fn half_a_stored_pair_is_a_miss() {
    let store = InMemoryStore::new();
    let cache = render_cache(&store, render_service());
    let fp = fingerprint("body");

    let rendered = cache.get_rendered_html("body", Some(&fp), None);
    assert_eq!(rendered.outcome, RenderOutcome::Rendered);

    let rendered = cache.get_rendered_html("body", None, Some("<p>body</p>"));
    assert_eq!(rendered.outcome, RenderOutcome::Rendered);
}

#[tokio::test]
async fn store_failures_still_return_fresh_html() {
    let store = InMemoryStore::new();
    let renderer = CountingRenderer::new();
    let cache = render_cache(&store, renderer.clone());
    let post = store.post_with("flaky", "**bold**", false, &[]).await;

    store.fail_render_store(true);
    let rendered = cache.post_html(&post).await;
    assert_eq!(rendered.outcome, RenderOutcome::Rendered);
    assert!(rendered.html.contains("<strong>bold</strong>"));
    assert!(store.stored_post(post.id).await.render_cache.is_none());

    // Still a miss until storage recovers.
    let again = cache.post_html(&store.stored_post(post.id).await).await;
    assert_eq!(again.outcome, RenderOutcome::Rendered);
    assert_eq!(renderer.calls(), 2);

    store.fail_render_store(false);
    cache.post_html(&store.stored_post(post.id).await).await;
    let healed = cache.post_html(&store.stored_post(post.id).await).await;
    assert_eq!(healed.outcome, RenderOutcome::Hit);
}

#[tokio::test]
async fn write_back_skips_rows_whose_body_moved_on() {
    let store = InMemoryStore::new();
    let cache = render_cache(&store, render_service());
    let post = store.post_with("race", "v1", false, &[]).await;

    store.update_post_body(post.id, "v2").await.expect("edit");

    // Rendering the snapshot read before the edit must not land on the new body.
    let rendered = cache.post_html(&post).await;
    assert_eq!(rendered.outcome, RenderOutcome::Rendered);
    assert!(store.stored_post(post.id).await.render_cache.is_none());
}

#[tokio::test]
async fn render_failures_fall_back_to_escaped_text() {
    let store = InMemoryStore::new();
    let cache = render_cache(&store, Arc::new(FailingRenderer));
    let post = store
        .post_with("broken", "<script>alert(1)</script>", false, &[])
        .await;

    let rendered = cache.post_html(&post).await;
    assert_eq!(rendered.outcome, RenderOutcome::Fallback);
    assert!(rendered.html.starts_with("<p>"));
    assert!(rendered.html.contains("&lt;script&gt;"));
    assert!(!rendered.html.contains("<script>"));

    let entry = store
        .stored_post(post.id)
        .await
        .render_cache
        .expect("fallback is cached");
    assert_eq!(entry.html, rendered.html);
}

#[tokio::test]
async fn comments_use_the_same_cache() {
    let store = InMemoryStore::new();
    let renderer = CountingRenderer::new();
    let cache = render_cache(&store, renderer.clone());
    let post = store.post("parent", &[]).await;
    let comment = store.comment(post.id, "nice `code`").await;

    let first = cache.comment_html(&comment).await;
    assert_eq!(first.outcome, RenderOutcome::Rendered);
    assert!(first.html.contains("<code>code</code>"));

    let stored = store.stored_comment(comment.id).await;
    let second = cache.comment_html(&stored).await;
    assert_eq!(second.outcome, RenderOutcome::Hit);

    let edited = store
        .update_comment_body(comment.id, "changed")
        .await
        .expect("edit");
    let third = cache.comment_html(&edited).await;
    assert_eq!(third.outcome, RenderOutcome::Rendered);
    assert_eq!(renderer.calls(), 2);
}

#[test]
fn rendered_html_is_sanitized() {
    let markdown = concat!(
        "<img src=x onerror=alert(1)> ",
        "[link](javascript:alert(1)) ",
        "<span style=\"color:red\">x</span>",
    );
    let html = render_service().render(markdown).expect("render");

    assert!(!html.contains("onerror"));
    assert!(!html.contains("javascript:"));
    assert!(!html.contains("style="));
}
