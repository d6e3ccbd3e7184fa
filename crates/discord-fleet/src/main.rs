//! Discord fleet runtime
//!
//! Runs one cluster of a sharded Discord bot: its shard range, the
//! reconciliation loops, the cross-cluster guild-count responder and, on the
//! leader cluster, the stats reporter.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serenity::all::{Client, GatewayIntents, Http};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use discord_fleet::cluster::{NatsClusterBroadcast, serve_guild_count};
use discord_fleet::clock::SystemClock;
use discord_fleet::config::{Config, SystemEnv};
use discord_fleet::events::EventClassifier;
use discord_fleet::guilds::{DiscordGuildLeaver, GuildMembership};
use discord_fleet::handler::{DispatchCounter, FleetHandler};
use discord_fleet::health::{self, AppState};
use discord_fleet::http_trace::RequestTracer;
use discord_fleet::leader::{IsLeader, LeaderDesignation};
use discord_fleet::metrics::OtelMetricsSink;
use discord_fleet::notify::DiscordNotifier;
use discord_fleet::reconcile::{BanReconciler, CategoryReconciler};
use discord_fleet::signal::shutdown_signal;
use discord_fleet::sinks::{build_http_client, build_http_sinks};
use discord_fleet::snapshot::FleetCaches;
use discord_fleet::stats::StatsReporter;
use discord_fleet::store::PgStore;
use discord_fleet::telemetry;

/// Discord fleet CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/discord-fleet.toml")]
    config: String,

    /// NATS URL (overrides config file)
    #[arg(long, env = "NATS_URL")]
    nats_url: Option<String>,

    /// Discord bot token (overrides config file)
    #[arg(long, env = "DISCORD_BOT_TOKEN")]
    bot_token: Option<String>,

    /// 1-based cluster index (overrides config file)
    #[arg(long, env = "CLUSTER_ID")]
    cluster_id: Option<u32>,

    /// Health check server port
    #[arg(long, env = "HEALTH_CHECK_PORT", default_value = "3001")]
    health_port: u16,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = if std::path::Path::new(&args.config).exists() {
        info!("Loading config from file: {}", args.config);
        Config::from_file(&args.config)?
    } else {
        info!("Config file not found, loading from environment");
        Config::from_env(&SystemEnv)?
    };

    if let Some(ref nats_url) = args.nats_url {
        config.nats.servers = nats_url
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Some(ref bot_token) = args.bot_token {
        config.discord.bot_token = bot_token.clone();
    }
    if let Some(cluster_id) = args.cluster_id {
        config.cluster.id = cluster_id;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_logger();

    let args = Args::parse();
    let config = load_config(&args)?;
    let cluster_id = config.cluster.id;
    let leader = LeaderDesignation::from(&config.cluster);
    let shard_range = config.cluster.shard_range();

    info!(
        cluster_id,
        cluster_count = config.cluster.count,
        leader = leader.is_leader(),
        prefix = %config.nats.prefix,
        shards = ?shard_range,
        "Starting discord-fleet"
    );
    if shard_range.is_empty() {
        warn!(cluster_id, "Cluster has no shards assigned");
    }

    let meter = telemetry::init_meter(&SystemEnv, cluster_id, &config.nats.prefix);
    let metrics = Arc::new(OtelMetricsSink::new(meter));
    let clock = Arc::new(SystemClock);
    let caches = FleetCaches::new();

    let store = Arc::new(
        PgStore::connect(&config.store)
            .await
            .context("Failed to connect to the store")?,
    );
    let broadcast = NatsClusterBroadcast::connect(&config.nats, cluster_id, config.cluster.broadcast_timeout()).await?;
    let nats_client = broadcast.client().clone();

    let http = Arc::new(Http::new(&config.discord.bot_token));
    let tracer = RequestTracer::new(metrics.clone(), clock.clone());
    let notifier = Arc::new(DiscordNotifier::new(
        http.clone(),
        tracer.clone(),
        config.discord.event_channel_id,
        config.discord.join_channel_id,
    ));
    let classifier = Arc::new(EventClassifier::new(
        metrics.clone(),
        notifier.clone(),
        cluster_id,
        config.discord.primary_colour,
    ));
    let guilds = Arc::new(GuildMembership::new(
        store.clone(),
        broadcast.clone(),
        caches.bans.clone(),
        metrics.clone(),
        notifier.clone(),
        DiscordGuildLeaver::new(http.clone(), tracer.clone()),
        config.cluster.count as usize,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();

    tasks.spawn(
        BanReconciler::new(
            store.clone(),
            caches.bans.clone(),
            leader,
            clock.clone(),
            config.reconcile.ban_interval(),
        )
        .run(shutdown_rx.clone()),
    );
    tasks.spawn(
        CategoryReconciler::new(
            store.clone(),
            caches.categories.clone(),
            clock.clone(),
            config.reconcile.category_interval(),
        )
        .run(shutdown_rx.clone()),
    );

    if leader.is_leader() && !config.stats.testing {
        let ctx = tracer.start();
        let bot = http.get_current_user().await;
        tracer.end_discord(ctx, "GET", "/users/@me", 200, &bot);
        let bot = bot.context("Failed to fetch the bot user")?;
        let sinks = build_http_sinks(
            &config.sinks,
            bot.id.get(),
            build_http_client(config.stats.sink_timeout())?,
            metrics.clone(),
            clock.clone(),
        );
        let reporter = StatsReporter::new(broadcast.clone(), sinks, clock.clone(), &config.cluster, &config.stats);
        tasks.spawn(reporter.run(shutdown_rx.clone()));
    } else {
        info!(
            leader = leader.is_leader(),
            testing = config.stats.testing,
            "Stats reporter disabled on this cluster"
        );
    }

    let intents = GatewayIntents::GUILDS;
    let mut client = Client::builder(&config.discord.bot_token, intents)
        .event_handler(FleetHandler::new(classifier.clone(), guilds))
        .raw_event_handler(DispatchCounter::new(classifier))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Discord client: {}", e))?;

    let responder_rx = shutdown_rx.clone();
    let responder_cache = client.cache.clone();
    let prefix = config.nats.prefix.clone();
    tasks.spawn(async move {
        if let Err(e) = serve_guild_count(nats_client, prefix, cluster_id, responder_cache, responder_rx).await {
            error!("Guild-count responder error: {}", e);
        }
    });

    let health_state = AppState::new(cluster_id, leader.is_leader(), caches.clone());
    let health_port = args.health_port;
    tokio::spawn(async move {
        if let Err(e) = health::start_health_server(health_state, health_port).await {
            error!("Health server error: {}", e);
        }
    });

    let shard_manager = client.shard_manager.clone();
    tokio::select! {
        result = client.start_shard_range(shard_range, config.cluster.shard_count) => {
            if let Err(e) = result {
                error!("Discord client error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, closing shards");
        }
    }

    shard_manager.shutdown_all().await;
    let _ = shutdown_tx.send(true);
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            warn!("Background task ended abnormally: {}", e);
        }
    }

    telemetry::shutdown_meter();
    info!("discord-fleet stopped");
    Ok(())
}
