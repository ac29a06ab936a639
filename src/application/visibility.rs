//! Batched visibility filtering over persisted posts.
//!
//! Tag and grant data are bulk-loaded per request and fed to the pure policy in
//! [`crate::domain::visibility`]. Nothing here issues a query per post.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::pagination::{CursorPage, PageRequest, PostCursor};
use crate::application::repos::{PostListScope, PostsRepo, RepoError, TagsRepo, UsersRepo};
use crate::domain::entities::{PostRecord, PostTagEdge, TagRecord};
use crate::domain::visibility::{PostAccess, VisibilityContext, can_view_post};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;
pub const DEFAULT_SCAN_BATCH: u32 = 50;

#[derive(Debug, Error)]
pub enum VisibilityError {
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// `post_id -> tags` lookup built from one batched edge query.
#[derive(Debug, Default, Clone)]
pub struct TagIndex {
    by_post: HashMap<Uuid, Vec<TagRecord>>,
}

impl TagIndex {
    /// Build the index, dropping edges whose tag row no longer exists.
    pub fn from_edges(edges: Vec<PostTagEdge>) -> Self {
        let mut by_post: HashMap<Uuid, Vec<TagRecord>> = HashMap::new();
        for edge in edges {
            match edge.tag {
                Some(tag) => by_post.entry(edge.post_id).or_default().push(tag),
                None => warn!(
                    target = "application::visibility",
                    post_id = %edge.post_id,
                    tag_id = %edge.tag_id,
                    "ignoring post tag edge that references a missing tag"
                ),
            }
        }
        Self { by_post }
    }

    pub fn tags_for(&self, post_id: Uuid) -> &[TagRecord] {
        self.by_post.get(&post_id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn take(&mut self, post_id: Uuid) -> Vec<TagRecord> {
        self.by_post.remove(&post_id).unwrap_or_default()
    }
}

/// A post the viewer may see, with the tags it was judged on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisiblePost {
    pub post: PostRecord,
    pub tags: Vec<TagRecord>,
}

/// Keep the visible candidates, in their original order.
pub fn filter_visible(
    context: &VisibilityContext,
    candidates: Vec<PostRecord>,
    index: &TagIndex,
) -> Vec<VisiblePost> {
    candidates
        .into_iter()
        .filter_map(|post| {
            let tags = index.tags_for(post.id);
            can_view_post(context, post.is_draft, tags)
                .is_visible()
                .then(|| VisiblePost {
                    tags: tags.to_vec(),
                    post,
                })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSettings {
    pub page_size: u32,
    pub scan_batch: u32,
    /// Optional cap on candidate rows read per page. `None` scans until the
    /// page fills or candidates run out.
    pub max_scan_rows: Option<u32>,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            scan_batch: DEFAULT_SCAN_BATCH,
            max_scan_rows: None,
        }
    }
}

impl FilterSettings {
    /// Clamp into a usable range: page size within `1..=MAX_PAGE_SIZE`, a
    /// non-empty batch, and a scan cap (when set) of at least one batch.
    pub fn normalized(self) -> Self {
        let page_size = self.page_size.clamp(1, MAX_PAGE_SIZE);
        let scan_batch = self.scan_batch.max(1);
        let max_scan_rows = self.max_scan_rows.map(|rows| rows.max(scan_batch));
        Self {
            page_size,
            scan_batch,
            max_scan_rows,
        }
    }
}

/// Detail lookup result: the post plus the verdict for this viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostVerdict {
    pub access: PostAccess,
    pub post: VisiblePost,
}

#[derive(Clone)]
pub struct VisibilityFilter {
    posts: Arc<dyn PostsRepo>,
    tags: Arc<dyn TagsRepo>,
    settings: FilterSettings,
}

impl VisibilityFilter {
    pub fn new(posts: Arc<dyn PostsRepo>, tags: Arc<dyn TagsRepo>, settings: FilterSettings) -> Self {
        Self {
            posts,
            tags,
            settings: settings.normalized(),
        }
    }

    pub fn settings(&self) -> FilterSettings {
        self.settings
    }

    /// One page of visible posts in `created_at DESC, id DESC` order.
    ///
    /// Filtering happens before pagination: candidates are scanned chunk by
    /// chunk until `limit + 1` visible posts are found or the candidates run
    /// out, so every page but the last is full. Each chunk costs one
    /// candidate query and one edge query.
    ///
    /// With `max_scan_rows` configured the scan also stops once that many
    /// rows were read; the page may then come back short with a cursor that
    /// resumes the scan.
    pub async fn visible_page(
        &self,
        context: &VisibilityContext,
        request: PageRequest<PostCursor>,
    ) -> Result<CursorPage<VisiblePost>, VisibilityError> {
        let limit = request.limit.clamp(1, MAX_PAGE_SIZE) as usize;
        let scope = if context.is_admin() {
            PostListScope::Admin
        } else {
            PostListScope::Public
        };

        let mut after = request.cursor;
        let mut visible: Vec<VisiblePost> = Vec::with_capacity(limit + 1);
        let mut scanned: u32 = 0;
        let mut exhausted = false;

        'scan: while visible.len() <= limit {
            let batch = match self.settings.max_scan_rows {
                Some(cap) => match cap.saturating_sub(scanned) {
                    0 => break,
                    budget => self.settings.scan_batch.min(budget),
                },
                None => self.settings.scan_batch,
            };

            let candidates = self.posts.list_candidates(scope, after, batch).await?;
            if candidates.is_empty() {
                exhausted = true;
                break;
            }
            let short_chunk = candidates.len() < batch as usize;
            scanned = scanned.saturating_add(candidates.len() as u32);

            let ids: Vec<Uuid> = candidates.iter().map(|post| post.id).collect();
            let mut index = TagIndex::from_edges(self.tags.list_for_posts(&ids).await?);

            for post in candidates {
                after = Some(PostCursor::after(&post));
                let tags = index.take(post.id);
                if can_view_post(context, post.is_draft, &tags).is_visible() {
                    visible.push(VisiblePost { post, tags });
                    if visible.len() > limit {
                        break 'scan;
                    }
                }
            }

            if short_chunk {
                exhausted = true;
                break;
            }
        }

        if visible.len() > limit {
            visible.truncate(limit);
            let next = visible.last().map(|item| PostCursor::after(&item.post).encode());
            return Ok(CursorPage::new(visible, next));
        }

        if exhausted {
            return Ok(CursorPage::new(visible, None));
        }

        debug!(
            target = "application::visibility",
            scanned,
            returned = visible.len(),
            max_scan_rows = ?self.settings.max_scan_rows,
            "visible page truncated by scan cap"
        );
        let next = after.map(|cursor| cursor.encode());
        Ok(CursorPage::new(visible, next))
    }

    /// Verdict for a single post, or `None` when no such post exists.
    pub async fn post_access(
        &self,
        context: &VisibilityContext,
        post_id: Uuid,
    ) -> Result<Option<PostVerdict>, VisibilityError> {
        let Some(post) = self.posts.find_by_id(post_id).await? else {
            return Ok(None);
        };

        let mut index = TagIndex::from_edges(self.tags.list_for_posts(&[post.id]).await?);
        let tags = index.take(post.id);
        let access = can_view_post(context, post.is_draft, &tags);

        Ok(Some(PostVerdict {
            access,
            post: VisiblePost { post, tags },
        }))
    }
}

/// Builds the per-request [`VisibilityContext`], loading grants exactly once.
#[derive(Clone)]
pub struct VisibilityContextFactory {
    users: Arc<dyn UsersRepo>,
    tags: Arc<dyn TagsRepo>,
    require_login: bool,
}

impl VisibilityContextFactory {
    pub fn new(users: Arc<dyn UsersRepo>, tags: Arc<dyn TagsRepo>, require_login: bool) -> Self {
        Self {
            users,
            tags,
            require_login,
        }
    }

    pub fn require_login(&self) -> bool {
        self.require_login
    }

    pub async fn for_viewer(
        &self,
        viewer: Option<Uuid>,
    ) -> Result<VisibilityContext, VisibilityError> {
        let Some(user_id) = viewer else {
            return Ok(VisibilityContext::anonymous(self.require_login));
        };

        let Some(user) = self.users.find_by_id(user_id).await? else {
            debug!(
                target = "application::visibility",
                user_id = %user_id,
                "viewer id does not match a user; treating as anonymous"
            );
            return Ok(VisibilityContext::anonymous(self.require_login));
        };

        if user.is_admin {
            return Ok(VisibilityContext::admin(self.require_login));
        }

        let grants = self.tags.list_grants(user.id).await?;
        Ok(VisibilityContext::member(grants, self.require_login))
    }
}
