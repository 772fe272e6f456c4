use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the Canopy binary.
#[derive(Debug, Parser)]
#[command(
    name = "canopy",
    version,
    about = "Hierarchical path resolver and caching proxy"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "CANOPY_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP proxy.
    Serve(Box<ServeArgs>),
    /// Rebuild the path maps once and persist the snapshot.
    Rebuild(RebuildArgs),
    /// Look a slug up, rebuilding the maps once on a miss.
    Resolve(ResolveArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct UpstreamOverrides {
    /// Override the content store API base URL.
    #[arg(long = "upstream-api-base", value_name = "URL")]
    pub api_base: Option<String>,

    /// Override the content store API token.
    #[arg(long = "upstream-api-token", env = "CANOPY_UPSTREAM_TOKEN", value_name = "TOKEN")]
    pub api_token: Option<String>,

    /// Override the directory holding the durable map snapshot.
    #[arg(long = "cache-snapshot-dir", value_name = "PATH")]
    pub snapshot_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub upstream: UpstreamOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the proxied site origin.
    #[arg(long = "site-origin", value_name = "URL")]
    pub site_origin: Option<String>,

    /// Override the public URL used in redirects and rewritten sitemaps.
    #[arg(long = "site-public-url", value_name = "URL")]
    pub site_public_url: Option<String>,

    /// Override the in-process map memo lifetime.
    #[arg(long = "cache-memo-ttl-seconds", value_name = "SECONDS")]
    pub cache_memo_ttl_seconds: Option<u64>,

    /// Override the edge response store capacity.
    #[arg(long = "cache-edge-response-limit", value_name = "COUNT")]
    pub cache_edge_response_limit: Option<usize>,

    /// Override the scheduled rebuild cron expression.
    #[arg(long = "scheduler-rebuild-cron", value_name = "CRON")]
    pub scheduler_rebuild_cron: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct RebuildArgs {
    #[command(flatten)]
    pub upstream: UpstreamOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct ResolveArgs {
    #[command(flatten)]
    pub upstream: UpstreamOverrides,

    /// Slug to look up.
    #[arg(value_name = "SLUG")]
    pub slug: String,
}
