use std::{process, sync::Arc};

use apalis::prelude::{Monitor, WorkerBuilder, WorkerFactoryFn};
use apalis_cron::CronStream;
use canopy::{
    application::{
        error::AppError,
        ports::{EdgeCache, KeyValueStore, OriginClient, Purger},
        proxy::ProxyService,
        rebuild::{RebuildService, process_scheduled_rebuild},
        sitemap::SitemapService,
    },
    cache::{CacheConfig, CollectionIds, EdgeStore, MapCache},
    config,
    infra::{
        content::HttpContentSource,
        error::InfraError,
        http::{self, HttpState, WebhookVerifier},
        kv::{FileKvStore, MemoryKvStore},
        origin::HttpOriginClient,
        purge::HttpPurger,
        telemetry,
    },
};
use reqwest::Client;
use tokio::{net::TcpListener, task::JoinHandle};
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

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;
    telemetry::describe_metrics();

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Rebuild(_) => run_rebuild(settings).await,
        config::Command::Resolve(args) => run_resolve(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings)?;

    let monitor_handle = spawn_rebuild_monitor(app.rebuild.clone(), &settings.scheduler);

    let result = serve_http(&settings, app.http_state).await;

    monitor_handle.abort();
    let _ = monitor_handle.await;

    result
}

async fn run_rebuild(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings)?;
    let maps = app.rebuild.rebuild("cli").await?;
    if maps.is_empty() {
        warn!(
            target = "canopy::rebuild",
            "Rebuild produced no entries; check the collection ids"
        );
    }

    info!(
        target = "canopy::rebuild",
        families = maps.family.len(),
        details = maps.detail.len(),
        "Rebuild completed"
    );
    println!(
        "families: {}\ndetails: {}",
        maps.family.len(),
        maps.detail.len()
    );
    Ok(())
}

async fn run_resolve(
    settings: config::Settings,
    args: config::ResolveArgs,
) -> Result<(), AppError> {
    let app = build_application_context(&settings)?;
    let Some(entry) = app.maps.find_hit(&args.slug).await? else {
        return Err(AppError::NotFound);
    };

    let rendered = serde_json::to_string_pretty(&entry)
        .map_err(|err| AppError::unexpected(format!("failed to render entry: {err}")))?;
    println!("{rendered}");
    Ok(())
}

struct ApplicationContext {
    http_state: HttpState,
    maps: MapCache,
    rebuild: Arc<RebuildService>,
}

fn build_application_context(settings: &config::Settings) -> Result<ApplicationContext, AppError> {
    let cache_config = CacheConfig::from(&settings.cache);

    let client = Client::builder()
        .build()
        .map_err(|err| InfraError::http_client(format!("failed to build HTTP client: {err}")))?;

    let store: Arc<dyn KeyValueStore> = match &settings.cache.snapshot_dir {
        Some(dir) => Arc::new(FileKvStore::new(dir.clone())),
        None => {
            warn!(
                target = "canopy::bootstrap",
                "no snapshot directory configured; snapshots live in memory only"
            );
            Arc::new(MemoryKvStore::new())
        }
    };

    let collections = CollectionIds {
        overview: settings.upstream.overview_collection.clone(),
        family: settings.upstream.family_collection.clone(),
        detail: settings.upstream.detail_collection.clone(),
    };
    let source = Arc::new(HttpContentSource::new(client.clone(), &settings.upstream));
    let maps = MapCache::new(
        cache_config.clone(),
        settings.site.base_path.clone(),
        collections,
        source,
        store,
    );

    let origin: Arc<dyn OriginClient> = Arc::new(HttpOriginClient::new(
        client.clone(),
        settings.site.user_agent.clone(),
    ));
    let edge: Arc<dyn EdgeCache> = Arc::new(EdgeStore::new(&cache_config));
    let purger = settings
        .purge
        .as_ref()
        .map(|purge| Arc::new(HttpPurger::new(client.clone(), purge)) as Arc<dyn Purger>);

    let proxy = Arc::new(ProxyService::new(
        origin.clone(),
        edge.clone(),
        &cache_config,
    )?);
    let sitemap = Arc::new(SitemapService::new(
        maps.clone(),
        origin,
        edge.clone(),
        settings.site.public_url.clone(),
        &cache_config,
    )?);
    let rebuild = Arc::new(RebuildService::new(
        maps.clone(),
        edge,
        purger,
        settings.site.public_url.clone(),
    ));

    let http_state = HttpState {
        maps: maps.clone(),
        proxy,
        sitemap,
        rebuild: rebuild.clone(),
        webhook: WebhookVerifier::from_settings(&settings.hooks),
        site: Arc::new(settings.site.clone()),
    };

    Ok(ApplicationContext {
        http_state,
        maps,
        rebuild,
    })
}

fn spawn_rebuild_monitor(
    rebuild: Arc<RebuildService>,
    scheduler: &config::SchedulerSettings,
) -> JoinHandle<()> {
    let rebuild_worker = WorkerBuilder::new("rebuild-maps-worker")
        .data(rebuild)
        .backend(CronStream::new(scheduler.rebuild_schedule.clone()))
        .build_fn(process_scheduled_rebuild);

    let monitor = Monitor::new().register(rebuild_worker);

    tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(error = %err, "job monitor stopped");
        }
    })
}

async fn serve_http(settings: &config::Settings, http_state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(http_state);

    let listener = TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "canopy::serve",
        addr = %settings.server.addr,
        origin = %settings.site.origin,
        "Listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(target = "canopy::serve", "Shutting down");
}
