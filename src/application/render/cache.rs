//! Fingerprint-keyed memoization of rendered Markdown.
//!
//! A stored `(fingerprint, html)` pair is trusted only while the fingerprint
//! matches the current body. Any mismatch re-renders, re-sanitizes and writes
//! the fresh pair back through [`RenderCacheRepo`].

use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::repos::{RenderCacheRepo, RepoError};
use crate::domain::entities::{CommentRecord, PostRecord, RenderCacheEntry};

use super::types::{RenderError, RenderService};

/// Salt mixed into every fingerprint. Changing the pipeline output means bumping this.
pub const RENDER_PIPELINE_VERSION: &str = "gatepost-render-v2";

pub const METRIC_RENDER_CACHE_HIT: &str = "gatepost_render_cache_hit_total";
pub const METRIC_RENDER_CACHE_MISS: &str = "gatepost_render_cache_miss_total";
pub const METRIC_RENDER_FALLBACK: &str = "gatepost_render_fallback_total";
pub const METRIC_RENDER_STORE_ERROR: &str = "gatepost_render_store_error_total";

/// Hex SHA-256 of the pipeline version and the raw body bytes. No normalization.
pub fn fingerprint(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(RENDER_PIPELINE_VERSION.as_bytes());
    hasher.update([0u8]);
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderOutcome {
    /// Stored html matched the current body.
    Hit,
    /// Freshly rendered and sanitized.
    Rendered,
    /// Rendering failed; the body was escaped as plain text instead.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedHtml {
    pub html: String,
    pub fingerprint: String,
    pub outcome: RenderOutcome,
}

impl RenderedHtml {
    fn needs_store(&self) -> bool {
        !matches!(self.outcome, RenderOutcome::Hit)
    }

    fn entry(&self) -> RenderCacheEntry {
        RenderCacheEntry {
            fingerprint: self.fingerprint.clone(),
            html: self.html.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RenderCache {
    renderer: Arc<dyn RenderService>,
    store: Arc<dyn RenderCacheRepo>,
}

impl RenderCache {
    pub fn new(renderer: Arc<dyn RenderService>, store: Arc<dyn RenderCacheRepo>) -> Self {
        Self { renderer, store }
    }

    /// Resolve html for `body` against a stored pair without touching storage.
    pub fn get_rendered_html(
        &self,
        body: &str,
        stored_fingerprint: Option<&str>,
        stored_html: Option<&str>,
    ) -> RenderedHtml {
        let current = fingerprint(body);

        if let (Some(stored_fp), Some(html)) = (stored_fingerprint, stored_html)
            && stored_fp == current
        {
            counter!(METRIC_RENDER_CACHE_HIT).increment(1);
            return RenderedHtml {
                html: html.to_string(),
                fingerprint: current,
                outcome: RenderOutcome::Hit,
            };
        }

        counter!(METRIC_RENDER_CACHE_MISS).increment(1);
        match self.renderer.render(body) {
            Ok(html) => RenderedHtml {
                html,
                fingerprint: current,
                outcome: RenderOutcome::Rendered,
            },
            Err(err) => {
                log_render_failure(&current, &err);
                counter!(METRIC_RENDER_FALLBACK).increment(1);
                RenderedHtml {
                    html: escaped_fallback(body),
                    fingerprint: current,
                    outcome: RenderOutcome::Fallback,
                }
            }
        }
    }

    pub async fn post_html(&self, post: &PostRecord) -> RenderedHtml {
        let rendered = self.resolve(&post.body_markdown, post.render_cache.as_ref());
        if rendered.needs_store() {
            let result = self
                .store
                .store_post_render(post.id, &post.body_markdown, &rendered.entry())
                .await;
            self.after_store("post", post.id, result);
        }
        rendered
    }

    pub async fn comment_html(&self, comment: &CommentRecord) -> RenderedHtml {
        let rendered = self.resolve(&comment.body_markdown, comment.render_cache.as_ref());
        if rendered.needs_store() {
            let result = self
                .store
                .store_comment_render(comment.id, &comment.body_markdown, &rendered.entry())
                .await;
            self.after_store("comment", comment.id, result);
        }
        rendered
    }

    fn resolve(&self, body: &str, stored: Option<&RenderCacheEntry>) -> RenderedHtml {
        self.get_rendered_html(
            body,
            stored.map(|entry| entry.fingerprint.as_str()),
            stored.map(|entry| entry.html.as_str()),
        )
    }

    fn after_store(&self, kind: &'static str, id: Uuid, result: Result<bool, RepoError>) {
        match result {
            Ok(true) => {}
            Ok(false) => debug!(
                target = "application::render::cache",
                kind,
                id = %id,
                "render cache write skipped; body changed or row removed"
            ),
            Err(err) => {
                counter!(METRIC_RENDER_STORE_ERROR).increment(1);
                warn!(
                    target = "application::render::cache",
                    kind,
                    id = %id,
                    error = %err,
                    "failed to persist rendered html"
                );
            }
        }
    }
}

fn escaped_fallback(body: &str) -> String {
    format!("<p>{}</p>", ammonia::clean_text(body))
}

fn log_render_failure(fingerprint: &str, error: &RenderError) {
    warn!(
        target = "application::render::cache",
        fingerprint,
        error = %error,
        "markdown render failed; serving escaped text"
    );
}
