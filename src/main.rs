use std::{
    process,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::stream::TryStreamExt;
use gatepost::{
    application::{
        error::AppError,
        posts::PostViewService,
        render::{RenderCache, RenderOutcome, RenderService, render_service},
        repos::{CommentsRepo, PostsRepo, RenderCacheRepo, TagsRepo, UsersRepo},
        visibility::{FilterSettings, VisibilityContextFactory, VisibilityFilter},
    },
    config,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tokio::signal;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match cli_args.command_or_default() {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::RenderAll(args) => run_renderall(settings, args).await,
    }
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::Database(err)))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::Migration(err)))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

fn build_render_cache(repositories: &Arc<PostgresRepositories>) -> RenderCache {
    let renderer: Arc<dyn RenderService> = render_service();
    let store: Arc<dyn RenderCacheRepo> = repositories.clone();
    RenderCache::new(renderer, store)
}

fn build_http_state(
    repositories: Arc<PostgresRepositories>,
    settings: &config::Settings,
) -> HttpState {
    let posts_repo: Arc<dyn PostsRepo> = repositories.clone();
    let tags_repo: Arc<dyn TagsRepo> = repositories.clone();
    let users_repo: Arc<dyn UsersRepo> = repositories.clone();
    let comments_repo: Arc<dyn CommentsRepo> = repositories.clone();

    let filter = VisibilityFilter::new(
        posts_repo,
        tags_repo.clone(),
        FilterSettings::from(&settings.visibility),
    );
    let posts = PostViewService::new(filter, comments_repo, build_render_cache(&repositories));
    let contexts =
        VisibilityContextFactory::new(users_repo, tags_repo, settings.visibility.require_login);

    HttpState {
        posts: Arc::new(posts),
        contexts: Arc::new(contexts),
        db: repositories,
        viewer_header: settings.auth.viewer_header.clone(),
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let state = build_http_state(repositories, &settings);
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::bind(settings.server.addr, err)))?;

    info!(
        target = "gatepost::serve",
        addr = %settings.server.addr,
        require_login = settings.visibility.require_login,
        page_size = settings.visibility.page_size,
        "Listening"
    );

    let grace = settings.server.graceful_shutdown;
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(grace))
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    info!(target = "gatepost::serve", "Server stopped");
    Ok(())
}

/// Resolves on ctrl-c. Once triggered, a watchdog exits the process if
/// in-flight requests outlive `grace`.
async fn shutdown_signal(grace: Duration) {
    if let Err(err) = signal::ctrl_c().await {
        warn!(
            target = "gatepost::serve",
            error = %err,
            "failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }

    info!(
        target = "gatepost::serve",
        grace_seconds = grace.as_secs(),
        "Shutdown requested; draining connections"
    );

    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        warn!(
            target = "gatepost::serve",
            "Graceful shutdown timed out; exiting"
        );
        process::exit(1);
    });
}

async fn run_renderall(
    settings: config::Settings,
    args: config::RenderAllArgs,
) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let cache = build_render_cache(&repositories);
    let concurrency = args.effective_concurrency();

    info!(
        target = "gatepost::renderall",
        concurrency, "Starting renderall"
    );

    render_all_posts(&repositories, &cache, concurrency).await?;
    render_all_comments(&repositories, &cache, concurrency).await?;

    Ok(())
}

#[derive(Default)]
struct RenderTally {
    total: AtomicUsize,
    rendered: AtomicUsize,
    fallback: AtomicUsize,
}

impl RenderTally {
    fn record(&self, outcome: RenderOutcome) {
        self.total.fetch_add(1, Ordering::Relaxed);
        match outcome {
            RenderOutcome::Hit => {}
            RenderOutcome::Rendered => {
                self.rendered.fetch_add(1, Ordering::Relaxed);
            }
            RenderOutcome::Fallback => {
                self.fallback.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

async fn render_all_posts(
    repositories: &PostgresRepositories,
    cache: &RenderCache,
    concurrency: usize,
) -> Result<(), AppError> {
    let tally = RenderTally::default();
    let counter = &tally;

    repositories
        .stream_all_posts()
        .map_err(|err| AppError::unexpected(err.to_string()))
        .try_for_each_concurrent(Some(concurrency), move |post| async move {
            let rendered = cache.post_html(&post).await;
            counter.record(rendered.outcome);
            Ok(())
        })
        .await?;

    info!(
        target = "gatepost::renderall",
        posts = tally.total.load(Ordering::Relaxed),
        rendered = tally.rendered.load(Ordering::Relaxed),
        fallback = tally.fallback.load(Ordering::Relaxed),
        "Rendered all posts"
    );
    Ok(())
}

async fn render_all_comments(
    repositories: &PostgresRepositories,
    cache: &RenderCache,
    concurrency: usize,
) -> Result<(), AppError> {
    let tally = RenderTally::default();
    let counter = &tally;

    repositories
        .stream_all_comments()
        .map_err(|err| AppError::unexpected(err.to_string()))
        .try_for_each_concurrent(Some(concurrency), move |comment| async move {
            let rendered = cache.comment_html(&comment).await;
            counter.record(rendered.outcome);
            Ok(())
        })
        .await?;

    info!(
        target = "gatepost::renderall",
        comments = tally.total.load(Ordering::Relaxed),
        rendered = tally.rendered.load(Ordering::Relaxed),
        fallback = tally.fallback.load(Ordering::Relaxed),
        "Rendered all comments"
    );
    Ok(())
}
