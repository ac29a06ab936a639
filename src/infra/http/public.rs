use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::{HeaderName, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    application::{
        error::HttpError,
        posts::{PostViewError, PostViewService},
        visibility::VisibilityContextFactory,
    },
    domain::visibility::VisibilityContext,
    infra::db::PostgresRepositories,
};

use super::{
    db_health_response,
    middleware::{log_responses, resolve_viewer, set_request_context},
};

#[derive(Clone)]
pub struct HttpState {
    pub posts: Arc<PostViewService>,
    pub contexts: Arc<VisibilityContextFactory>,
    pub db: Arc<PostgresRepositories>,
    pub viewer_header: HeaderName,
}

pub fn build_router(state: HttpState) -> Router {
    let content_routes = Router::new()
        .route("/posts", get(list_posts))
        .route("/posts/{id}", get(post_detail))
        .route_layer(middleware::from_fn_with_state(state.clone(), resolve_viewer));

    let static_routes = Router::new().route("/_health/db", get(public_health));

    content_routes
        .merge(static_routes)
        .fallback(fallback)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CursorQuery {
    cursor: Option<String>,
}

async fn list_posts(
    State(state): State<HttpState>,
    Extension(context): Extension<VisibilityContext>,
    Query(query): Query<CursorQuery>,
) -> Response {
    match state
        .posts
        .list_page(&context, query.cursor.as_deref())
        .await
    {
        Ok(page) => Json(page).into_response(),
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn post_detail(
    State(state): State<HttpState>,
    Extension(context): Extension<VisibilityContext>,
    Path(id): Path<String>,
) -> Response {
    // A malformed id cannot name a post, so it is a plain 404.
    let Ok(id) = Uuid::parse_str(&id) else {
        return HttpError::from(PostViewError::NotFound).into_response();
    };

    match state.posts.post_detail(&context, id).await {
        Ok(detail) => Json(detail).into_response(),
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn public_health(State(state): State<HttpState>) -> Response {
    db_health_response(state.db.health_check().await)
}

async fn fallback() -> Response {
    HttpError::new(
        "infra::http::public::fallback",
        StatusCode::NOT_FOUND,
        "Not found",
        "no route matches the request",
    )
    .into_response()
}
