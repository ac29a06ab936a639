use thiserror::Error;

/// Structured errors surfaced by the rendering pipeline. Callers never show
/// these to readers; they fall back to escaped text instead.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("markdown formatting failed: {message}")]
    Markdown { message: String },
    #[error("syntax highlighting failed: {language}: {message}")]
    Highlighting { language: String, message: String },
}

/// Trait exposed by the rendering pipeline. Implementations must be pure and
/// deterministic: given the same input, they return identical outputs or errors.
///
/// The returned HTML is already sanitized.
pub trait RenderService: Send + Sync {
    fn render(&self, markdown: &str) -> Result<String, RenderError>;
}
