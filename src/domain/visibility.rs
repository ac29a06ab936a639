//! Tag-based visibility policy.
//!
//! Posts carry zero or more tags. Master tags form a conjunctive gate (the
//! viewer must hold every one of them); regular tags form a disjunctive gate
//! (the viewer must hold at least one). Untagged posts are the public tier,
//! governed only by the global `require_login` toggle. Admins bypass all of it.
//!
//! Everything here is pure: callers load tags and grants up front and pass
//! them in. Decisions depend on the viewer and must not be cached across
//! viewers.

use std::collections::HashSet;

use serde::Serialize;
use uuid::Uuid;

/// Minimal view of a tag needed to evaluate policy.
pub trait PolicyTag {
    fn tag_id(&self) -> Uuid;
    fn is_master(&self) -> bool;
}

/// A tag identity with its master bit, detached from any display data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagRef {
    pub id: Uuid,
    pub is_master: bool,
}

impl TagRef {
    pub fn master(id: Uuid) -> Self {
        Self {
            id,
            is_master: true,
        }
    }

    pub fn regular(id: Uuid) -> Self {
        Self {
            id,
            is_master: false,
        }
    }
}

impl PolicyTag for TagRef {
    fn tag_id(&self) -> Uuid {
        self.id
    }

    fn is_master(&self) -> bool {
        self.is_master
    }
}

/// Per-request summary of who is looking.
///
/// Built once per request and passed by reference into every evaluation.
/// There are no setters: a context never changes after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityContext {
    is_admin: bool,
    is_authenticated: bool,
    allowed_tag_ids: HashSet<Uuid>,
    require_login: bool,
}

impl VisibilityContext {
    /// Viewer without a session.
    pub fn anonymous(require_login: bool) -> Self {
        Self {
            is_admin: false,
            is_authenticated: false,
            allowed_tag_ids: HashSet::new(),
            require_login,
        }
    }

    /// Signed-in, non-admin viewer holding the given grants.
    pub fn member(allowed_tag_ids: impl IntoIterator<Item = Uuid>, require_login: bool) -> Self {
        Self {
            is_admin: false,
            is_authenticated: true,
            allowed_tag_ids: allowed_tag_ids.into_iter().collect(),
            require_login,
        }
    }

    pub fn admin(require_login: bool) -> Self {
        Self {
            is_admin: true,
            is_authenticated: true,
            allowed_tag_ids: HashSet::new(),
            require_login,
        }
    }

    /// Assemble a context from loosely-typed collaborator data.
    ///
    /// Missing grant data is read as "no grants", which denies every tagged
    /// post while leaving untagged content alone.
    pub fn from_parts(
        is_admin: bool,
        is_authenticated: bool,
        allowed_tag_ids: Option<HashSet<Uuid>>,
        require_login: bool,
    ) -> Self {
        Self {
            is_admin,
            is_authenticated,
            allowed_tag_ids: allowed_tag_ids.unwrap_or_default(),
            require_login,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated
    }

    pub fn require_login(&self) -> bool {
        self.require_login
    }

    pub fn allowed_tag_ids(&self) -> &HashSet<Uuid> {
        &self.allowed_tag_ids
    }

    pub fn is_granted(&self, tag_id: Uuid) -> bool {
        self.allowed_tag_ids.contains(&tag_id)
    }

    /// Whether the viewer is turned away from every surface before any post is considered.
    pub fn login_required(&self) -> bool {
        self.require_login && !self.is_authenticated && !self.is_admin
    }
}

/// Decide whether a viewer may see content carrying `tags`.
pub fn is_visible<T: PolicyTag>(context: &VisibilityContext, tags: &[T]) -> bool {
    if context.is_admin {
        return true;
    }

    if tags.is_empty() {
        return context.is_authenticated || !context.require_login;
    }

    if !context.is_authenticated {
        return false;
    }

    let mut has_regular = false;
    let mut regular_hit = false;

    for tag in tags {
        let granted = context.is_granted(tag.tag_id());
        if tag.is_master() {
            if !granted {
                return false;
            }
        } else {
            has_regular = true;
            regular_hit |= granted;
        }
    }

    !has_regular || regular_hit
}

/// Verdict for a single post, distinguishing the reasons a viewer is turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PostAccess {
    Visible,
    /// Draft seen by a non-admin; callers should not reveal that it exists.
    Hidden,
    /// Denied to an anonymous viewer; signing in may help.
    Unauthenticated,
    /// Denied to a signed-in viewer lacking the required grants.
    Forbidden,
}

impl PostAccess {
    pub fn is_visible(self) -> bool {
        matches!(self, PostAccess::Visible)
    }
}

/// Tag policy plus the draft rule: drafts are for admins only.
pub fn can_view_post<T: PolicyTag>(
    context: &VisibilityContext,
    is_draft: bool,
    tags: &[T],
) -> PostAccess {
    if context.is_admin {
        return PostAccess::Visible;
    }

    if is_draft {
        return PostAccess::Hidden;
    }

    if is_visible(context, tags) {
        PostAccess::Visible
    } else if context.is_authenticated {
        PostAccess::Forbidden
    } else {
        PostAccess::Unauthenticated
    }
}
