//! Markdown rendering and the fingerprinted render cache.
//!
//! The pipeline itself is pure: markdown in, sanitized HTML out. Persisting
//! results is the cache's job, and the cache never trusts stored HTML whose
//! fingerprint does not match the current body.

mod cache;
mod service;
mod types;

pub use cache::{
    METRIC_RENDER_CACHE_HIT, METRIC_RENDER_CACHE_MISS, METRIC_RENDER_FALLBACK,
    METRIC_RENDER_STORE_ERROR, RENDER_PIPELINE_VERSION, RenderCache, RenderOutcome, RenderedHtml,
    fingerprint,
};
pub use service::{ComrakRenderService, render_service};
pub use types::{RenderError, RenderService};
