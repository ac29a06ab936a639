//! In-memory repositories shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use uuid::Uuid;

use gatepost::application::pagination::PostCursor;
use gatepost::application::render::{RenderCache, RenderError, RenderService, render_service};
use gatepost::application::repos::{
    CommentsRepo, CommentsWriteRepo, CreateCommentParams, CreatePostParams, CreateTagParams,
    PostListScope, PostsRepo, PostsWriteRepo, RenderCacheRepo, RepoError, TagsRepo,
    TagsWriteRepo, UsersRepo,
};
use gatepost::application::visibility::{
    FilterSettings, VisibilityContextFactory, VisibilityFilter,
};
use gatepost::domain::entities::{
    CommentRecord, PostRecord, PostTagEdge, RenderCacheEntry, TagRecord, UserRecord,
};

#[derive(Default)]
struct State {
    posts: Vec<PostRecord>,
    tags: HashMap<Uuid, TagRecord>,
    post_tags: Vec<(Uuid, Uuid)>,
    users: HashMap<Uuid, UserRecord>,
    grants: Vec<(Uuid, Uuid)>,
    comments: Vec<CommentRecord>,
    clock: i64,
}

impl State {
    fn tick(&mut self) -> OffsetDateTime {
        self.clock += 1;
        OffsetDateTime::UNIX_EPOCH + Duration::days(19_000) + Duration::minutes(self.clock)
    }
}

/// Backs every repository trait with one mutex-guarded state. Each post
/// created gets a strictly later `created_at`, so listings come back in
/// reverse insertion order.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    candidate_queries: AtomicUsize,
    edge_queries: AtomicUsize,
    render_stores: AtomicUsize,
    fail_render_store: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn tag(&self, name: &str, is_master: bool) -> TagRecord {
        self.create_tag(CreateTagParams {
            name: name.to_string(),
            is_master,
        })
        .await
        .expect("create tag")
    }

    pub async fn post(&self, title: &str, tags: &[Uuid]) -> PostRecord {
        self.post_with(title, &format!("# {title}\n\nbody of {title}"), false, tags)
            .await
    }

    pub async fn draft(&self, title: &str, tags: &[Uuid]) -> PostRecord {
        self.post_with(title, &format!("draft {title}"), true, tags)
            .await
    }

    pub async fn post_with(
        &self,
        title: &str,
        body: &str,
        is_draft: bool,
        tags: &[Uuid],
    ) -> PostRecord {
        let post = self
            .create_post(CreatePostParams {
                title: title.to_string(),
                body_markdown: body.to_string(),
                is_draft,
                comments_enabled: true,
                author_id: None,
            })
            .await
            .expect("create post");
        self.replace_post_tags(post.id, tags)
            .await
            .expect("attach tags");
        post
    }

    pub async fn user(&self, name: &str, is_admin: bool, grants: &[Uuid]) -> UserRecord {
        let mut state = self.state.lock().await;
        let created_at = state.tick();
        let user = UserRecord {
            id: Uuid::new_v4(),
            username: name.to_string(),
            is_admin,
            created_at,
        };
        state.users.insert(user.id, user.clone());
        state
            .grants
            .extend(grants.iter().map(|tag_id| (user.id, *tag_id)));
        user
    }

    pub async fn comment(&self, post_id: Uuid, body: &str) -> CommentRecord {
        self.create_comment(CreateCommentParams {
            post_id,
            author_id: None,
            author_name: Some("reader".to_string()),
            body_markdown: body.to_string(),
        })
        .await
        .expect("create comment")
    }

    /// Attach an edge whose tag row does not exist.
    pub async fn dangling_edge(&self, post_id: Uuid) -> Uuid {
        let missing = Uuid::new_v4();
        self.state.lock().await.post_tags.push((post_id, missing));
        missing
    }

    pub async fn stored_post(&self, id: Uuid) -> PostRecord {
        PostsRepo::find_by_id(self, id)
            .await
            .expect("lookup")
            .expect("post exists")
    }

    pub async fn stored_comment(&self, id: Uuid) -> CommentRecord {
        self.state
            .lock()
            .await
            .comments
            .iter()
            .find(|comment| comment.id == id)
            .cloned()
            .expect("comment exists")
    }

    pub fn candidate_queries(&self) -> usize {
        self.candidate_queries.load(Ordering::SeqCst)
    }

    pub fn edge_queries(&self) -> usize {
        self.edge_queries.load(Ordering::SeqCst)
    }

    pub fn render_stores(&self) -> usize {
        self.render_stores.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.candidate_queries.store(0, Ordering::SeqCst);
        self.edge_queries.store(0, Ordering::SeqCst);
        self.render_stores.store(0, Ordering::SeqCst);
    }

    pub fn fail_render_store(&self, fail: bool) {
        self.fail_render_store.store(fail, Ordering::SeqCst);
    }
}

fn sort_key(post: &PostRecord) -> (OffsetDateTime, Uuid) {
    (post.created_at, post.id)
}

#[async_trait]
impl PostsRepo for InMemoryStore {
    async fn list_candidates(
        &self,
        scope: PostListScope,
        after: Option<PostCursor>,
        limit: u32,
    ) -> Result<Vec<PostRecord>, RepoError> {
        self.candidate_queries.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().await;

        let mut posts: Vec<PostRecord> = state
            .posts
            .iter()
            .filter(|post| scope == PostListScope::Admin || !post.is_draft)
            .filter(|post| match after {
                Some(cursor) => cursor.precedes(post),
                None => true,
            })
            .cloned()
            .collect();
        posts.sort_by_key(|post| std::cmp::Reverse(sort_key(post)));
        posts.truncate(limit.max(1) as usize);
        Ok(posts)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PostRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state.posts.iter().find(|post| post.id == id).cloned())
    }
}

#[async_trait]
impl PostsWriteRepo for InMemoryStore {
    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError> {
        let mut state = self.state.lock().await;
        let now = state.tick();
        let post = PostRecord {
            id: Uuid::new_v4(),
            title: params.title,
            body_markdown: params.body_markdown,
            render_cache: None,
            is_draft: params.is_draft,
            comments_enabled: params.comments_enabled,
            author_id: params.author_id,
            created_at: now,
            updated_at: now,
        };
        state.posts.push(post.clone());
        Ok(post)
    }

    async fn update_post_body(
        &self,
        id: Uuid,
        body_markdown: &str,
    ) -> Result<PostRecord, RepoError> {
        let mut state = self.state.lock().await;
        let now = state.tick();
        let post = state
            .posts
            .iter_mut()
            .find(|post| post.id == id)
            .ok_or(RepoError::NotFound)?;
        post.body_markdown = body_markdown.to_string();
        post.render_cache = None;
        post.updated_at = now;
        Ok(post.clone())
    }

    async fn delete_post(&self, id: Uuid) -> Result<(), RepoError> {
        let mut state = self.state.lock().await;
        let before = state.posts.len();
        state.posts.retain(|post| post.id != id);
        if state.posts.len() == before {
            return Err(RepoError::NotFound);
        }
        state.post_tags.retain(|(post_id, _)| *post_id != id);
        state.comments.retain(|comment| comment.post_id != id);
        Ok(())
    }

    async fn replace_post_tags(&self, post_id: Uuid, tag_ids: &[Uuid]) -> Result<(), RepoError> {
        let mut state = self.state.lock().await;
        state.post_tags.retain(|(id, _)| *id != post_id);
        for tag_id in tag_ids {
            if !state.post_tags.contains(&(post_id, *tag_id)) {
                state.post_tags.push((post_id, *tag_id));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TagsRepo for InMemoryStore {
    async fn list_all(&self) -> Result<Vec<TagRecord>, RepoError> {
        let state = self.state.lock().await;
        let mut tags: Vec<TagRecord> = state.tags.values().cloned().collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TagRecord>, RepoError> {
        Ok(self.state.lock().await.tags.get(&id).cloned())
    }

    async fn list_for_posts(&self, post_ids: &[Uuid]) -> Result<Vec<PostTagEdge>, RepoError> {
        self.edge_queries.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().await;
        Ok(state
            .post_tags
            .iter()
            .filter(|(post_id, _)| post_ids.contains(post_id))
            .map(|(post_id, tag_id)| PostTagEdge {
                post_id: *post_id,
                tag_id: *tag_id,
                tag: state.tags.get(tag_id).cloned(),
            })
            .collect())
    }

    async fn list_grants(&self, user_id: Uuid) -> Result<Vec<Uuid>, RepoError> {
        let state = self.state.lock().await;
        Ok(state
            .grants
            .iter()
            .filter(|(id, _)| *id == user_id)
            .map(|(_, tag_id)| *tag_id)
            .collect())
    }
}

#[async_trait]
impl TagsWriteRepo for InMemoryStore {
    async fn create_tag(&self, params: CreateTagParams) -> Result<TagRecord, RepoError> {
        let mut state = self.state.lock().await;
        let now = state.tick();
        let tag = TagRecord {
            id: Uuid::new_v4(),
            name: params.name,
            is_master: params.is_master,
            created_at: now,
            updated_at: now,
        };
        state.tags.insert(tag.id, tag.clone());
        Ok(tag)
    }

    async fn set_master(&self, id: Uuid, is_master: bool) -> Result<TagRecord, RepoError> {
        let mut state = self.state.lock().await;
        let now = state.tick();
        let tag = state.tags.get_mut(&id).ok_or(RepoError::NotFound)?;
        tag.is_master = is_master;
        tag.updated_at = now;
        Ok(tag.clone())
    }

    async fn delete_tag(&self, id: Uuid) -> Result<(), RepoError> {
        let mut state = self.state.lock().await;
        state.tags.remove(&id).ok_or(RepoError::NotFound)?;
        state.post_tags.retain(|(_, tag_id)| *tag_id != id);
        state.grants.retain(|(_, tag_id)| *tag_id != id);
        Ok(())
    }

    async fn replace_user_grants(
        &self,
        user_id: Uuid,
        tag_ids: &[Uuid],
    ) -> Result<(), RepoError> {
        let mut state = self.state.lock().await;
        state.grants.retain(|(id, _)| *id != user_id);
        state
            .grants
            .extend(tag_ids.iter().map(|tag_id| (user_id, *tag_id)));
        Ok(())
    }
}

#[async_trait]
impl UsersRepo for InMemoryStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, RepoError> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }
}

#[async_trait]
impl CommentsRepo for InMemoryStore {
    async fn list_for_post(&self, post_id: Uuid) -> Result<Vec<CommentRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state
            .comments
            .iter()
            .filter(|comment| comment.post_id == post_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CommentsWriteRepo for InMemoryStore {
    async fn create_comment(
        &self,
        params: CreateCommentParams,
    ) -> Result<CommentRecord, RepoError> {
        let mut state = self.state.lock().await;
        let created_at = state.tick();
        let comment = CommentRecord {
            id: Uuid::new_v4(),
            post_id: params.post_id,
            author_id: params.author_id,
            author_name: params.author_name,
            body_markdown: params.body_markdown,
            render_cache: None,
            created_at,
        };
        state.comments.push(comment.clone());
        Ok(comment)
    }

    async fn update_comment_body(
        &self,
        id: Uuid,
        body_markdown: &str,
    ) -> Result<CommentRecord, RepoError> {
        let mut state = self.state.lock().await;
        let comment = state
            .comments
            .iter_mut()
            .find(|comment| comment.id == id)
            .ok_or(RepoError::NotFound)?;
        comment.body_markdown = body_markdown.to_string();
        comment.render_cache = None;
        Ok(comment.clone())
    }
}

#[async_trait]
impl RenderCacheRepo for InMemoryStore {
    async fn store_post_render(
        &self,
        post_id: Uuid,
        body_markdown: &str,
        entry: &RenderCacheEntry,
    ) -> Result<bool, RepoError> {
        if self.fail_render_store.load(Ordering::SeqCst) {
            return Err(RepoError::Timeout);
        }
        self.render_stores.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        match state
            .posts
            .iter_mut()
            .find(|post| post.id == post_id && post.body_markdown == body_markdown)
        {
            Some(post) => {
                post.render_cache = Some(entry.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn store_comment_render(
        &self,
        comment_id: Uuid,
        body_markdown: &str,
        entry: &RenderCacheEntry,
    ) -> Result<bool, RepoError> {
        if self.fail_render_store.load(Ordering::SeqCst) {
            return Err(RepoError::Timeout);
        }
        self.render_stores.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        match state
            .comments
            .iter_mut()
            .find(|comment| comment.id == comment_id && comment.body_markdown == body_markdown)
        {
            Some(comment) => {
                comment.render_cache = Some(entry.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Delegates to the real pipeline and counts invocations.
#[derive(Default)]
pub struct CountingRenderer {
    calls: AtomicUsize,
}

impl CountingRenderer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RenderService for CountingRenderer {
    fn render(&self, markdown: &str) -> Result<String, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        render_service().render(markdown)
    }
}

/// Always fails, forcing the escaped-text fallback.
pub struct FailingRenderer;

impl RenderService for FailingRenderer {
    fn render(&self, _markdown: &str) -> Result<String, RenderError> {
        Err(RenderError::Markdown {
            message: "renderer unavailable".to_string(),
        })
    }
}

pub fn filter(store: &Arc<InMemoryStore>, settings: FilterSettings) -> VisibilityFilter {
    let posts: Arc<dyn PostsRepo> = store.clone();
    let tags: Arc<dyn TagsRepo> = store.clone();
    VisibilityFilter::new(posts, tags, settings)
}

pub fn contexts(store: &Arc<InMemoryStore>, require_login: bool) -> VisibilityContextFactory {
    let users: Arc<dyn UsersRepo> = store.clone();
    let tags: Arc<dyn TagsRepo> = store.clone();
    VisibilityContextFactory::new(users, tags, require_login)
}

pub fn render_cache(store: &Arc<InMemoryStore>, renderer: Arc<dyn RenderService>) -> RenderCache {
    let repo: Arc<dyn RenderCacheRepo> = store.clone();
    RenderCache::new(renderer, repo)
}

pub fn settings(page_size: u32, scan_batch: u32) -> FilterSettings {
    FilterSettings {
        page_size,
        scan_batch,
        max_scan_rows: None,
    }
}
