//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use apalis_cron::Schedule;
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

mod cli;

pub use cli::{
    CliArgs, Command, RebuildArgs, ResolveArgs, ServeArgs, ServeOverrides, UpstreamOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "canopy";
const ENV_PREFIX: &str = "CANOPY";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_API_BASE: &str = "https://api.webflow.com/v2";
const DEFAULT_ACCEPT_VERSION: &str = "1.0.0";
const DEFAULT_PAGE_SIZE: u64 = 100;
const DEFAULT_BASE_PATH: &str = "/products";
const DEFAULT_USER_AGENT: &str = "Googlebot";
const DEFAULT_MEMO_TTL_SECS: u64 = 300;
const DEFAULT_SNAPSHOT_TTL_SECS: u64 = 86_400;
const DEFAULT_EDGE_RESPONSE_LIMIT: usize = 500;
const DEFAULT_PROXY_S_MAXAGE_SECS: u64 = 86_400;
const DEFAULT_PROXY_STALE_WHILE_REVALIDATE_SECS: u64 = 31_536_000;
const DEFAULT_SITEMAP_MAX_AGE_SECS: u64 = 120;
const DEFAULT_HOOK_TOLERANCE_SECS: u64 = 300;
const DEFAULT_REBUILD_CRON: &str = "0 0 0 * * *";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub upstream: UpstreamSettings,
    pub site: SiteSettings,
    pub cache: CacheSettings,
    pub hooks: HookSettings,
    pub scheduler: SchedulerSettings,
    pub purge: Option<PurgeSettings>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// API root without a trailing slash.
    pub api_base: String,
    pub api_token: String,
    pub accept_version: String,
    pub page_size: NonZeroU32,
    pub overview_collection: String,
    pub family_collection: String,
    pub detail_collection: String,
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    /// Proxied origin without a trailing slash.
    pub origin: String,
    /// Public site URL without a trailing slash.
    pub public_url: String,
    pub base_path: String,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub memo_ttl: Duration,
    pub snapshot_ttl: Duration,
    pub snapshot_dir: Option<PathBuf>,
    pub edge_response_limit: NonZeroUsize,
    pub proxy_s_maxage_seconds: u64,
    pub proxy_stale_while_revalidate_seconds: u64,
    pub sitemap_max_age_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct HookSettings {
    pub secret: Option<String>,
    pub tolerance: Duration,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub rebuild_schedule: Schedule,
}

#[derive(Debug, Clone)]
pub struct PurgeSettings {
    pub endpoint: String,
    pub api_token: String,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Rebuild(args)) => raw.apply_upstream_overrides(&args.upstream),
        Some(Command::Resolve(args)) => raw.apply_upstream_overrides(&args.upstream),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    upstream: RawUpstreamSettings,
    site: RawSiteSettings,
    cache: RawCacheSettings,
    hooks: RawHookSettings,
    scheduler: RawSchedulerSettings,
    purge: RawPurgeSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(origin) = overrides.site_origin.as_ref() {
            self.site.origin = Some(origin.clone());
        }
        if let Some(public_url) = overrides.site_public_url.as_ref() {
            self.site.public_url = Some(public_url.clone());
        }
        if let Some(ttl) = overrides.cache_memo_ttl_seconds {
            self.cache.memo_ttl_seconds = Some(ttl);
        }
        if let Some(limit) = overrides.cache_edge_response_limit {
            self.cache.edge_response_limit = Some(limit);
        }
        if let Some(cron) = overrides.scheduler_rebuild_cron.as_ref() {
            self.scheduler.rebuild_cron = Some(cron.clone());
        }

        self.apply_upstream_overrides(&overrides.upstream);
    }

    fn apply_upstream_overrides(&mut self, overrides: &UpstreamOverrides) {
        if let Some(base) = overrides.api_base.as_ref() {
            self.upstream.api_base = Some(base.clone());
        }
        if let Some(token) = overrides.api_token.as_ref() {
            self.upstream.api_token = Some(token.clone());
        }
        if let Some(dir) = overrides.snapshot_dir.as_ref() {
            self.cache.snapshot_dir = Some(dir.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            upstream,
            site,
            cache,
            hooks,
            scheduler,
            purge,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let upstream = build_upstream_settings(upstream)?;
        let site = build_site_settings(site)?;
        let cache = build_cache_settings(cache)?;
        let hooks = build_hook_settings(hooks)?;
        let scheduler = build_scheduler_settings(scheduler)?;
        let purge = build_purge_settings(purge)?;

        Ok(Self {
            server,
            logging,
            upstream,
            site,
            cache,
            hooks,
            scheduler,
            purge,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    Ok(ServerSettings { addr })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_upstream_settings(upstream: RawUpstreamSettings) -> Result<UpstreamSettings, LoadError> {
    let api_base = absolute_url(
        upstream
            .api_base
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        "upstream.api_base",
    )?;
    let api_token = required(upstream.api_token, "upstream.api_token")?;
    let accept_version = non_blank(upstream.accept_version)
        .unwrap_or_else(|| DEFAULT_ACCEPT_VERSION.to_string());
    let page_size = non_zero_u32(
        upstream.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        "upstream.page_size",
    )?;

    Ok(UpstreamSettings {
        api_base,
        api_token,
        accept_version,
        page_size,
        overview_collection: required(
            upstream.overview_collection,
            "upstream.overview_collection",
        )?,
        family_collection: required(upstream.family_collection, "upstream.family_collection")?,
        detail_collection: required(upstream.detail_collection, "upstream.detail_collection")?,
    })
}

fn build_site_settings(site: RawSiteSettings) -> Result<SiteSettings, LoadError> {
    let origin = absolute_url(required(site.origin, "site.origin")?, "site.origin")?;
    let public_url = match non_blank(site.public_url) {
        Some(url) => absolute_url(url, "site.public_url")?,
        None => origin.clone(),
    };

    let base_path = non_blank(site.base_path).unwrap_or_else(|| DEFAULT_BASE_PATH.to_string());
    if !base_path.starts_with('/') {
        return Err(LoadError::invalid(
            "site.base_path",
            "must start with `/`",
        ));
    }
    let base_path = match base_path.trim_end_matches('/') {
        "" => "/".to_string(),
        trimmed => trimmed.to_string(),
    };

    let user_agent =
        non_blank(site.user_agent).unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

    Ok(SiteSettings {
        origin,
        public_url,
        base_path,
        user_agent,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let memo_ttl = Duration::from_secs(cache.memo_ttl_seconds.unwrap_or(DEFAULT_MEMO_TTL_SECS));

    let snapshot_ttl_secs = cache
        .snapshot_ttl_seconds
        .unwrap_or(DEFAULT_SNAPSHOT_TTL_SECS);
    if snapshot_ttl_secs == 0 {
        return Err(LoadError::invalid(
            "cache.snapshot_ttl_seconds",
            "must be greater than zero",
        ));
    }

    let edge_response_limit =
        NonZeroUsize::new(cache.edge_response_limit.unwrap_or(DEFAULT_EDGE_RESPONSE_LIMIT))
            .ok_or_else(|| {
                LoadError::invalid("cache.edge_response_limit", "must be greater than zero")
            })?;

    Ok(CacheSettings {
        memo_ttl,
        snapshot_ttl: Duration::from_secs(snapshot_ttl_secs),
        snapshot_dir: cache.snapshot_dir,
        edge_response_limit,
        proxy_s_maxage_seconds: cache
            .proxy_s_maxage_seconds
            .unwrap_or(DEFAULT_PROXY_S_MAXAGE_SECS),
        proxy_stale_while_revalidate_seconds: cache
            .proxy_stale_while_revalidate_seconds
            .unwrap_or(DEFAULT_PROXY_STALE_WHILE_REVALIDATE_SECS),
        sitemap_max_age_seconds: cache
            .sitemap_max_age_seconds
            .unwrap_or(DEFAULT_SITEMAP_MAX_AGE_SECS),
    })
}

fn build_hook_settings(hooks: RawHookSettings) -> Result<HookSettings, LoadError> {
    let tolerance_secs = hooks
        .tolerance_seconds
        .unwrap_or(DEFAULT_HOOK_TOLERANCE_SECS);
    if tolerance_secs == 0 {
        return Err(LoadError::invalid(
            "hooks.tolerance_seconds",
            "must be greater than zero",
        ));
    }

    Ok(HookSettings {
        secret: non_blank(hooks.secret),
        tolerance: Duration::from_secs(tolerance_secs),
    })
}

fn build_scheduler_settings(
    scheduler: RawSchedulerSettings,
) -> Result<SchedulerSettings, LoadError> {
    let expression =
        non_blank(scheduler.rebuild_cron).unwrap_or_else(|| DEFAULT_REBUILD_CRON.to_string());
    let rebuild_schedule = Schedule::from_str(&expression).map_err(|err| {
        LoadError::invalid(
            "scheduler.rebuild_cron",
            format!("invalid cron expression `{expression}`: {err}"),
        )
    })?;

    Ok(SchedulerSettings { rebuild_schedule })
}

fn build_purge_settings(purge: RawPurgeSettings) -> Result<Option<PurgeSettings>, LoadError> {
    match (non_blank(purge.endpoint), non_blank(purge.api_token)) {
        (Some(endpoint), Some(api_token)) => Ok(Some(PurgeSettings {
            endpoint: absolute_url(endpoint, "purge.endpoint")?,
            api_token,
        })),
        _ => Ok(None),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUpstreamSettings {
    api_base: Option<String>,
    api_token: Option<String>,
    accept_version: Option<String>,
    page_size: Option<u64>,
    overview_collection: Option<String>,
    family_collection: Option<String>,
    detail_collection: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    origin: Option<String>,
    public_url: Option<String>,
    base_path: Option<String>,
    user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    memo_ttl_seconds: Option<u64>,
    snapshot_ttl_seconds: Option<u64>,
    snapshot_dir: Option<PathBuf>,
    edge_response_limit: Option<usize>,
    proxy_s_maxage_seconds: Option<u64>,
    proxy_stale_while_revalidate_seconds: Option<u64>,
    sitemap_max_age_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHookSettings {
    secret: Option<String>,
    tolerance_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSchedulerSettings {
    rebuild_cron: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPurgeSettings {
    endpoint: Option<String>,
    api_token: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn required(value: Option<String>, key: &'static str) -> Result<String, LoadError> {
    non_blank(value).ok_or_else(|| LoadError::invalid(key, "must be set"))
}

/// Validate an absolute http(s) URL and drop any trailing slash.
fn absolute_url(value: String, key: &'static str) -> Result<String, LoadError> {
    let parsed =
        Url::parse(&value).map_err(|err| LoadError::invalid(key, format!("invalid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(LoadError::invalid(key, "scheme must be http or https"));
    }
    Ok(value.trim_end_matches('/').to_string())
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
