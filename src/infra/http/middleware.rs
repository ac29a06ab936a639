use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::application::{error::ErrorReport, error::HttpError, posts::PostViewError};

use super::public::HttpState;

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

/// Raw viewer identity as read from the auth header, before user lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewerIdentity(pub Option<Uuid>);

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let ctx = RequestContext {
        request_id: request_id.clone(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(ctx);
    response
}

/// Read the viewer header and attach the per-request visibility context.
///
/// A missing or malformed header yields an anonymous viewer, as does an id
/// that does not resolve to a user.
pub async fn resolve_viewer(
    State(state): State<HttpState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let identity = viewer_identity(request.headers(), &state.viewer_header);

    let context = match state.contexts.for_viewer(identity.0).await {
        Ok(context) => context,
        Err(err) => return HttpError::from(PostViewError::from(err)).into_response(),
    };

    request.extensions_mut().insert(context);
    let mut response = next.run(request).await;
    response.extensions_mut().insert(identity);
    response
}

pub(crate) fn viewer_identity(headers: &HeaderMap, header: &HeaderName) -> ViewerIdentity {
    let Some(value) = headers.get(header) else {
        return ViewerIdentity(None);
    };

    let parsed = value
        .to_str()
        .ok()
        .and_then(|raw| Uuid::parse_str(raw.trim()).ok());

    if parsed.is_none() {
        debug!(
            target = "infra::http::viewer",
            header = %header,
            "viewer header is not a user id; treating as anonymous"
        );
    }

    ViewerIdentity(parsed)
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();
    let viewer = response
        .extensions()
        .get::<ViewerIdentity>()
        .and_then(|identity| identity.0)
        .map(|id| id.to_string());

    if status.is_client_error() || status.is_server_error() {
        let elapsed_ms = start.elapsed().as_millis();
        let report = response.extensions_mut().remove::<ErrorReport>();
        let (source, messages) = match report {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        let detail = messages
            .first()
            .cloned()
            .unwrap_or_else(|| "no diagnostic available".to_string());

        if status.is_server_error() {
            error!(
                target = "infra::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                viewer = viewer.as_deref().unwrap_or(""),
                "request failed",
            );
        } else {
            warn!(
                target = "infra::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                viewer = viewer.as_deref().unwrap_or(""),
                "client request error",
            );
        }
    }

    response
}
