//! Outreach server: email send pipeline, tracking webhooks and campaign
//! analytics behind one HTTP API.
//!
//! Main entry point that wires the subsystems and starts the server.

use clap::Parser;
use outreach_analytics::{ClickHouseEmailIndex, IndexWriter};
use outreach_api::{ApiServer, AppState};
use outreach_cache::RedisCampaignCache;
use outreach_core::cache::{CampaignCache, MemoryCampaignCache};
use outreach_core::config::{AppConfig, IndexBackend};
use outreach_core::event_bus::{noop_notifier, Notifier};
use outreach_core::provider::DryRunGateway;
use outreach_core::search::{PageRequest, SearchIndex};
use outreach_core::sender::{SenderDirectory, SenderProfile};
use outreach_core::store::RecordStore;
use outreach_delivery::{
    CampaignAggregator, ChunkPolicy, Dispatcher, MemoryEmailStore, MemorySenderDirectory,
    ProviderLimits, SchedulingService, SendPipeline, WebhookReconciler,
};
use outreach_sync::{InProcessNotifier, NatsNotifier, SyncHandler, SyncWorker};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "outreach-server")]
#[command(about = "Email delivery and tracking service")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "OUTREACH__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "OUTREACH__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Search index backend: memory or clickhouse (overrides config)
    #[arg(long, env = "OUTREACH__INDEX__BACKEND")]
    index_backend: Option<IndexBackend>,

    /// Disable the periodic release sweep
    #[arg(long, default_value_t = false)]
    no_sweep: bool,

    /// Skip Redis and keep campaign stats in process memory
    #[arg(long, default_value_t = false)]
    no_redis: bool,

    /// JSON array of sender profiles to load into the sender directory
    #[arg(long, env = "OUTREACH__SENDERS_FILE")]
    senders_file: Option<PathBuf>,
}

fn load_senders(path: &Path) -> anyhow::Result<MemorySenderDirectory> {
    let raw = std::fs::read_to_string(path)?;
    let profiles: Vec<SenderProfile> = serde_json::from_str(&raw)?;
    let directory = MemorySenderDirectory::new();
    for profile in profiles {
        directory.upsert(profile);
    }
    Ok(directory)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "outreach_server=info,outreach=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Outreach server starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(backend) = cli.index_backend {
        config.index.backend = backend;
    }
    if cli.no_sweep {
        config.delivery.sweep_interval_secs = 0;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        index_backend = ?config.index.backend,
        "Configuration loaded"
    );

    let store = Arc::new(MemoryEmailStore::new());
    let policy = ChunkPolicy::new(
        config.delivery.chunk_size,
        Duration::from_secs(config.delivery.chunk_timeout_secs),
    );
    let gateway = Arc::new(DryRunGateway);

    // Campaign stats cache: Redis when reachable, process memory otherwise.
    let cache: Arc<dyn CampaignCache> = if cli.no_redis {
        Arc::new(MemoryCampaignCache::new())
    } else {
        match RedisCampaignCache::new(&config.redis).await {
            Ok(redis) => {
                let redis = Arc::new(redis);
                let for_maintenance = redis.clone();
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(Duration::from_secs(60));
                    loop {
                        interval.tick().await;
                        for_maintenance.maintenance().await;
                    }
                });
                redis
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to Redis, caching campaign stats in memory");
                Arc::new(MemoryCampaignCache::new())
            }
        }
    };

    // Index and notification fabric.
    let (index, notifier, mut worker) = match config.index.backend {
        IndexBackend::Memory => {
            // The store answers index queries itself; notifications only
            // drive provider dispatch.
            let dispatcher = Arc::new(Dispatcher::new(
                store.clone(),
                gateway.clone(),
                noop_notifier(),
                policy,
            ));
            let handler = Arc::new(SyncHandler::new(store.clone()).with_dispatcher(dispatcher));
            let (notifier, _handle) = InProcessNotifier::spawn(handler);
            let index: Arc<dyn SearchIndex> = store.clone();
            let notifier: Arc<dyn Notifier> = Arc::new(notifier);
            (index, notifier, None)
        }
        IndexBackend::ClickHouse => {
            let clickhouse = ClickHouseEmailIndex::new(&config.clickhouse).await?;
            let writer = Arc::new(IndexWriter::spawn(clickhouse.clone(), &config.clickhouse));
            let client = outreach_sync::connect(&config.nats).await?;
            let notifier: Arc<dyn Notifier> = Arc::new(NatsNotifier::new(
                client.clone(),
                config.nats.subject_prefix.clone(),
            ));
            let dispatcher = Arc::new(Dispatcher::new(
                store.clone(),
                gateway.clone(),
                notifier.clone(),
                policy,
            ));
            let handler = Arc::new(
                SyncHandler::new(store.clone())
                    .with_dispatcher(dispatcher)
                    .with_index(writer),
            );
            let mut worker = SyncWorker::new(config.nats.clone(), handler);
            worker.start(client).await?;
            let index: Arc<dyn SearchIndex> = Arc::new(clickhouse);
            (index, notifier, Some(worker))
        }
    };

    let record_store: Arc<dyn RecordStore> = store.clone();
    let directory = match &cli.senders_file {
        Some(path) => load_senders(path)?,
        None => {
            warn!("No senders file given, every caller will be rejected");
            MemorySenderDirectory::new()
        }
    };
    info!(senders = directory.len(), "Sender directory loaded");
    let senders: Arc<dyn SenderDirectory> = Arc::new(directory);

    let scheduling = Arc::new(SchedulingService::new(
        record_store.clone(),
        index.clone(),
        notifier.clone(),
        cache.clone(),
        policy,
    ));

    let state = AppState {
        pipeline: Arc::new(SendPipeline::new(
            record_store.clone(),
            notifier.clone(),
            cache.clone(),
            &config.delivery,
        )),
        scheduling: scheduling.clone(),
        webhooks: Arc::new(WebhookReconciler::new(
            record_store.clone(),
            notifier.clone(),
            cache.clone(),
            policy,
        )),
        campaigns: Arc::new(CampaignAggregator::new(
            index.clone(),
            cache.clone(),
            config.delivery.campaign_page_size,
        )),
        limits: Arc::new(ProviderLimits::new(index.clone(), config.limits.clone())),
        senders,
        sweep_page_size: config.delivery.chunk_size,
        node_id: config.node_id.clone(),
        start_time: Instant::now(),
    };

    // Periodic release of due scheduled sends.
    if config.delivery.sweep_interval_secs > 0 {
        let page_size = config.delivery.chunk_size;
        let every = Duration::from_secs(config.delivery.sweep_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                match scheduling.release_due(PageRequest::first(page_size)).await {
                    Ok(report) if report.processed > 0 => info!(
                        candidates = report.total_candidates,
                        processed = report.processed,
                        still_scheduled = report.still_scheduled,
                        "Release sweep complete"
                    ),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Release sweep failed"),
                }
            }
        });
    } else {
        info!("Release sweep disabled");
    }

    let api_server = ApiServer::new(config.clone(), state);

    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Outreach server is ready to serve traffic");

    api_server.start_http().await?;

    if let Some(worker) = worker.as_mut() {
        worker.wait().await;
    }

    Ok(())
}
