//! Tether gateway entry point.
//!
//! Wires the durable registries, the policy layer, the session orchestrator,
//! and the bot surface together, then runs until interrupted.

use std::{sync::Arc, time::Duration};

use {
    clap::Parser,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    tether_policy::{
        CooldownConfig, CooldownRegistry, HttpFetcher, LocalMaintenance, MaintenanceFlag,
        RemoteConfigCache, remote::ConfigFetcher,
    },
    tether_sessions::{MessengerClient, SessionOrchestrator, SidecarClient},
    tether_store::{AdminStore, ErrorLog, HistoryStore, StoreWatcher, TierStore, json},
    tether_telegram::{
        BroadcastEngine, HandlerContext, ProgressReporter, TelegramSink, bot,
        broadcast::BroadcastSink, config, progress::EditSink,
    },
};

#[derive(Parser)]
#[command(name = "tether", about = "Tether — multi-tenant messenger gateway")]
struct Cli {
    /// Path to the config file (overrides discovery).
    #[arg(long, env = "TETHER_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    let cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => config::discover_and_load(),
    };
    info!(?cfg, "configuration loaded");

    // Durable registries.
    let history = Arc::new(HistoryStore::load(cfg.history_path()).await?);
    let tiers = Arc::new(TierStore::load(cfg.premium_path()).await?);
    let admins = Arc::new(AdminStore::load(cfg.admins_path()).await?);
    let error_log = Arc::new(ErrorLog::load(cfg.error_log_path()).await?);
    let cooldown_config: CooldownConfig = json::load_or_default(&cfg.cooldown_path()).await?;
    let cooldowns = Arc::new(CooldownRegistry::new(cooldown_config));
    let local_maintenance: LocalMaintenance =
        json::load_or_default(&cfg.maintenance_path()).await?;
    let maintenance = Arc::new(MaintenanceFlag::new(local_maintenance));

    info!(
        actors = history.len(),
        premium = tiers.list().len(),
        admins = admins.len(),
        local_maintenance = maintenance.is_enabled(),
        "registries loaded"
    );

    // Remote kill-switch, when a source is configured.
    let remote = match &cfg.remote_config_url {
        Some(url) => {
            let fetcher = Arc::new(HttpFetcher::new(url)?) as Arc<dyn ConfigFetcher>;
            let cache = Arc::new(RemoteConfigCache::new(fetcher));
            if let Err(e) = cache.refresh().await {
                warn!(error = %e, "initial remote maintenance fetch failed");
            }
            Some(cache)
        },
        None => None,
    };
    let remote_refresh = remote
        .as_ref()
        .map(|cache| Arc::clone(cache).spawn_refresh(Duration::from_secs(cfg.remote_refresh_secs)));

    // Sessions.
    let client = Arc::new(SidecarClient::new(cfg.sidecar_url.clone())) as Arc<dyn MessengerClient>;
    let orchestrator =
        SessionOrchestrator::load(client, cfg.sessions_dir(), cfg.session_index_path()).await?;
    orchestrator.resume_persisted().await;

    // Bot surface.
    let tg_bot = bot::build_bot(&cfg)?;
    let sink = Arc::new(TelegramSink::new(tg_bot.clone()));
    let progress = Arc::new(ProgressReporter::with_min_interval(
        Arc::clone(&sink) as Arc<dyn EditSink>,
        Duration::from_millis(cfg.edit_throttle_ms),
    ));
    let broadcast = Arc::new(BroadcastEngine::new(
        Arc::clone(&sink) as Arc<dyn BroadcastSink>,
        Arc::clone(&progress),
        Arc::clone(&error_log),
    ));

    let ctx = Arc::new(HandlerContext {
        bot: tg_bot,
        config: cfg.clone(),
        sink,
        history,
        tiers: Arc::clone(&tiers),
        admins: Arc::clone(&admins),
        cooldowns,
        remote,
        maintenance,
        orchestrator,
        progress,
        broadcast,
        error_log,
        started_at: std::time::Instant::now(),
        pending_broadcasts: std::sync::Mutex::new(std::collections::HashMap::new()),
    });

    // Hot reload for the externally-editable lists.
    let watcher = StoreWatcher::start(vec![cfg.premium_path(), cfg.admins_path()]);
    let _watcher_guard = match watcher {
        Ok((guard, mut events)) => {
            let premium_path = cfg.premium_path();
            let admins_path = cfg.admins_path();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if event.path == premium_path {
                        match json::load_or_default_sync(&event.path) {
                            Ok(entries) => tiers.replace_all(entries),
                            Err(e) => warn!(error = %e, "failed to reload premium list"),
                        }
                    } else if event.path == admins_path {
                        match json::load_or_default_sync(&event.path) {
                            Ok(ids) => admins.replace_all(ids),
                            Err(e) => warn!(error = %e, "failed to reload admin list"),
                        }
                    }
                }
            });
            Some(guard)
        },
        Err(e) => {
            warn!(error = %e, "registry watcher unavailable");
            None
        },
    };

    // Expired cooldown entries are only a memory concern; sweep them lazily.
    {
        let cooldowns = Arc::clone(&ctx.cooldowns);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(600));
            loop {
                tick.tick().await;
                cooldowns.evict_expired();
            }
        });
    }

    let polling = bot::start_polling(ctx).await?;

    info!("gateway running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    polling.cancel();
    if let Some(token) = remote_refresh {
        token.cancel();
    }
    Ok(())
}
