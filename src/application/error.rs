use std::error::Error as StdError;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::{application::posts::PostViewError, infra::error::InfraError};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message,
            report,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.public_message }));
        let mut response = (self.status, body).into_response();
        self.report.attach(&mut response);
        response
    }
}

impl From<PostViewError> for HttpError {
    fn from(error: PostViewError) -> Self {
        const SOURCE: &str = "application::error::post_view_error_to_http_error";
        match error {
            PostViewError::NotFound => HttpError::new(
                SOURCE,
                StatusCode::NOT_FOUND,
                "Post not found",
                "Post does not exist or is not published",
            ),
            PostViewError::Unauthenticated => HttpError::new(
                SOURCE,
                StatusCode::UNAUTHORIZED,
                "Login required",
                "Anonymous viewer was denied",
            ),
            PostViewError::Forbidden => HttpError::new(
                SOURCE,
                StatusCode::FORBIDDEN,
                "Access denied",
                "Viewer lacks the tags required for this post",
            ),
            PostViewError::Pagination(err) => HttpError::from_error(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Invalid cursor",
                &err,
            ),
            PostViewError::Visibility(err) => HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                &err,
            ),
            PostViewError::Repo(err) => HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                &err,
            ),
        }
    }
}

/// Failure that ends the process; reported once by `main`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
