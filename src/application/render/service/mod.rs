mod config;
mod highlight;
mod rewrite;

use std::sync::Arc;

use comrak::{Arena, format_html, nodes::AstNode, parse_document};
use once_cell::sync::Lazy;
use syntect::{dumps::from_uncompressed_data, html::ClassStyle, parsing::SyntaxSet};
use tracing::trace;

use crate::application::render::types::{RenderError, RenderService};

use config::{build_sanitizer, default_options};
use rewrite::highlight_code_blocks;

/// Default Comrak-based rendering pipeline with Syntect highlighting and Ammonia sanitisation.
pub struct ComrakRenderService {
    options: comrak::options::Options<'static>,
    syntax_set: SyntaxSet,
    class_style: ClassStyle,
    sanitizer: ammonia::Builder<'static>,
}

impl ComrakRenderService {
    fn new() -> Self {
        let syntax_bytes = include_bytes!(env!("SYNTAX_PACK_FILE"));
        let syntax_set: SyntaxSet =
            from_uncompressed_data(syntax_bytes).expect("syntax pack must be valid");

        Self {
            options: default_options(),
            syntax_set,
            class_style: ClassStyle::SpacedPrefixed { prefix: "syntax-" },
            sanitizer: build_sanitizer(),
        }
    }
}

static RENDER_SERVICE: Lazy<Arc<ComrakRenderService>> =
    Lazy::new(|| Arc::new(ComrakRenderService::new()));

/// Access the shared render service instance, initialised on first use.
pub fn render_service() -> Arc<ComrakRenderService> {
    Arc::clone(&RENDER_SERVICE)
}

impl Default for ComrakRenderService {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderService for ComrakRenderService {
    fn render(&self, markdown: &str) -> Result<String, RenderError> {
        let arena = Arena::new();
        let root = parse_document(&arena, markdown, &self.options);

        let code_blocks = highlight_code_blocks(root, &self.syntax_set, &self.class_style)?;
        let rendered_html = render_html_stage(root, &self.options)?;
        let sanitized = self.sanitizer.clean(&rendered_html).to_string();

        trace!(
            target = "application::render",
            code_blocks,
            input_bytes = markdown.len(),
            output_bytes = sanitized.len(),
            "markdown rendered"
        );

        Ok(sanitized)
    }
}

fn render_html_stage<'a>(
    root: &'a AstNode<'a>,
    options: &comrak::options::Options<'static>,
) -> Result<String, RenderError> {
    let mut html = String::new();
    format_html(root, options, &mut html).map_err(|err| RenderError::Markdown {
        message: err.to_string(),
    })?;
    Ok(html)
}
