use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

pub(crate) const MAX_RENDER_CONCURRENCY: usize = 32;

/// Command-line arguments for the gatepost binary.
#[derive(Debug, Parser)]
#[command(name = "gatepost", version, about = "Tag-gated blog content server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "GATEPOST_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl CliArgs {
    /// The selected subcommand, falling back to `serve` with no overrides.
    pub fn command_or_default(&self) -> Command {
        self.command
            .clone()
            .unwrap_or_else(|| Command::Serve(Box::<ServeArgs>::default()))
    }
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the public HTTP service.
    Serve(Box<ServeArgs>),
    /// Re-render every stored post and comment body into the render cache.
    #[command(name = "renderall")]
    RenderAll(RenderAllArgs),
}

#[derive(Debug, Args, Clone)]
pub struct RenderAllArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Maximum number of bodies rendered at once (1..=32).
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(usize))]
    pub concurrency: usize,
}

impl RenderAllArgs {
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, MAX_RENDER_CONCURRENCY)
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Hide untagged posts from anonymous viewers and gate listings on login.
    #[arg(
        long = "require-login",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub require_login: Option<bool>,

    #[arg(long = "page-size", value_name = "COUNT")]
    pub page_size: Option<u32>,

    /// Request header carrying the authenticated user id.
    #[arg(long = "viewer-header", value_name = "NAME")]
    pub viewer_header: Option<String>,
}
