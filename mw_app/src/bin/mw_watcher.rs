use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;
use tracing::warn;

use mw_app::config_loader;
use mw_app::tracing_setup;
use mw_http::FetchClient;
use mw_orchestrator::BurstQueue;
use mw_orchestrator::Orchestrator;
use mw_orchestrator::OrchestratorConfig;
use mw_quota::ACCOUNT_SCOPE;
use mw_quota::QuotaGuard;
use mw_types::FetchedListing;
use mw_types::unix_now;
use mw_ws::ConnectionGate;
use mw_ws::FetchPipeline;
use mw_ws::SessionProvider;
use mw_ws::StaticSession;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Guard flushes buffered log lines; keep it alive until exit.
    let _guard = tracing_setup::init("mw_watcher", "./logs", tracing::Level::INFO);

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "watcher.toml".to_string());
    let config = config_loader::load_watcher_config_or_default(&config_path);
    if config.ws_base.is_empty() || config.fetch_base.is_empty() {
        warn!("ws_base/fetch_base not configured, listeners will not connect");
    }

    let quota = Arc::new(QuotaGuard::new(config.safety_threshold_pct));
    let client = FetchClient::new(&config.fetch_base, Arc::clone(&quota))?;
    let session: Arc<dyn SessionProvider> = Arc::new(StaticSession(config.session.clone()));

    let (listing_tx, mut listing_rx) = mpsc::channel::<FetchedListing>(256);
    let pipeline = Arc::new(FetchPipeline::new(client, Arc::clone(&quota), Arc::clone(&session), listing_tx));

    let burst = config
        .burst
        .enabled
        .then(|| Arc::new(BurstQueue::new(config.burst.capacity, config.burst.max_items_per_second)));
    if burst.is_some() {
        info!(
            capacity = config.burst.capacity,
            per_second = config.burst.max_items_per_second,
            "burst queue enabled"
        );
    }

    let gate = Arc::new(ConnectionGate::new(Duration::from_millis(config.search_queue_delay_ms)));
    let mut orchestrator = Orchestrator::new(
        OrchestratorConfig {
            ws_base: config.ws_base.clone(),
            max_global_attempts: config.emergency.max_global_attempts,
            emergency_cooldown: Duration::from_secs(config.emergency.cooldown_secs),
        },
        gate,
        session,
        pipeline,
        burst,
    );

    // Consumer: surface fetched listings in the log.
    tokio::spawn(async move {
        while let Some(listing) = listing_rx.recv().await {
            let price = listing
                .price
                .as_ref()
                .map(|p| format!("{} {}", p.amount, p.currency))
                .unwrap_or_else(|| "unpriced".to_string());
            info!(
                id = %listing.id,
                %price,
                seller = %listing.seller.account,
                x = listing.location.x,
                y = listing.location.y,
                token_valid = listing.token_valid(unix_now()),
                "listing fetched"
            );
        }
    });

    info!(subscriptions = config.subscriptions.len(), "watcher started");
    let mut ticker = tokio::time::interval(Duration::from_millis(config.tick_interval_ms.max(50)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                orchestrator.tick(&config.subscriptions);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                orchestrator.shutdown();
                break;
            }
        }
    }

    if let Some(snapshot) = quota.snapshot(ACCOUNT_SCOPE) {
        info!(
            max = snapshot.max,
            remaining = snapshot.remaining,
            period_secs = snapshot.period_secs,
            "final quota state"
        );
    }

    Ok(())
}
