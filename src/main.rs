//! VoiceRank - voice presence ranking service
//!
//! Main entry point: loads configuration, opens the database, starts the enabled
//! platform adapters with their rank workers and command responders, then runs the
//! orchestrator until Ctrl-C.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use voicerank::adapters::discord::DiscordAdapter;
use voicerank::adapters::teamspeak::{ReputationChecker, TeamspeakAdapter};
use voicerank::adapters::{RankWorker, WorkQueue};
use voicerank::bus::{BusMedium, CommandResponder, MemoryMedium, MqttMedium};
use voicerank::storage::config::{load_config, resolve_secret};
use voicerank::storage::{AccrualStore, BusBackend, Database};
use voicerank::{Orchestrator, RankEngine, RankThresholds};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting VoiceRank v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config().context("loading configuration")?;
    let db = Database::open(&config.database_path()).context("opening database")?;
    let store = AccrualStore::new(Arc::new(db));

    let thresholds = RankThresholds::new(
        config.ranks.level_thresholds.clone(),
        config.ranks.division_thresholds.clone(),
    )
    .context("rank thresholds")?;
    let engine = RankEngine::new(thresholds, config.ranks.top_division_size);

    let mut mqtt = None;
    let medium: Arc<dyn BusMedium> = match config.bus.backend {
        BusBackend::Memory => Arc::new(MemoryMedium::new()),
        BusBackend::Mqtt => {
            let password = config.bus.username.as_ref().and_then(|user| {
                resolve_secret(None, "VOICERANK_BROKER_PASSWORD", &format!("broker:{}", user))
                    .map_err(|e| tracing::warn!("Connecting to broker without password: {}", e))
                    .ok()
            });
            let medium = MqttMedium::connect(&config.bus, password);
            mqtt = Some(Arc::clone(&medium));
            medium
        }
    };
    let reply_ttl = Duration::from_secs(config.bus.reply_ttl_secs);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runtime = tokio::runtime::Handle::current();
    let mut queues = Vec::new();
    let mut workers = Vec::new();
    let mut tasks = Vec::new();
    let mut orchestrator: Orchestrator<DiscordAdapter, TeamspeakAdapter> = Orchestrator::new(
        store.clone(),
        engine,
        Arc::clone(&medium),
        config.orchestrator.clone(),
    );

    if config.discord.enabled {
        let token = resolve_secret(
            config.discord.token.as_deref(),
            "VOICERANK_DISCORD_TOKEN",
            "discord-token",
        )?;
        let (queue, rx) = WorkQueue::new();
        let adapter = Arc::new(DiscordAdapter::new(
            config.discord.clone(),
            token,
            queue.clone(),
        )?);

        workers.push(RankWorker::spawn(
            Arc::clone(&adapter),
            store.clone(),
            rx,
            runtime.clone(),
        )?);
        queues.push(queue);

        let responder = Arc::new(CommandResponder::new(
            Arc::clone(&adapter),
            store.clone(),
            Arc::clone(&medium),
            reply_ttl,
        ));
        tasks.push(tokio::spawn(responder.run(shutdown_rx.clone())));
        tasks.push(tokio::spawn(Arc::clone(&adapter).run(shutdown_rx.clone())));
        orchestrator = orchestrator.with_discord(adapter);
    }

    if config.teamspeak.enabled {
        let password = resolve_secret(
            config.teamspeak.password.as_deref(),
            "VOICERANK_TEAMSPEAK_PASSWORD",
            "teamspeak-query",
        )?;

        let reputation = if config.teamspeak.reputation.enabled {
            let api_key = resolve_secret(
                config.teamspeak.reputation.api_key.as_deref(),
                "VOICERANK_REPUTATION_KEY",
                "reputation-key",
            )
            .ok();
            Some(ReputationChecker::new(
                config.teamspeak.reputation.clone(),
                api_key,
            )?)
        } else {
            None
        };

        let (queue, rx) = WorkQueue::new();
        let adapter = Arc::new(TeamspeakAdapter::new(
            config.teamspeak.clone(),
            password,
            store.clone(),
            queue.clone(),
            reputation,
        ));

        workers.push(RankWorker::spawn(
            Arc::clone(&adapter),
            store.clone(),
            rx,
            runtime.clone(),
        )?);
        queues.push(queue);

        let responder = Arc::new(CommandResponder::new(
            Arc::clone(&adapter),
            store.clone(),
            Arc::clone(&medium),
            reply_ttl,
        ));
        tasks.push(tokio::spawn(responder.run(shutdown_rx.clone())));
        tasks.push(tokio::spawn(Arc::clone(&adapter).run(shutdown_rx.clone())));
        orchestrator = orchestrator.with_teamspeak(adapter);
    }

    if queues.is_empty() {
        tracing::warn!("No platform enabled; only the command bus and resets will run");
    }

    let main_loop = tokio::spawn(orchestrator.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    tracing::info!("Shutting down");
    let _ = shutdown_tx.send(true);

    let _ = main_loop.await;
    for task in tasks {
        let _ = task.await;
    }

    for queue in &queues {
        queue.close();
    }
    tokio::task::spawn_blocking(move || {
        for worker in workers {
            worker.join();
        }
    })
    .await?;

    if let Some(mqtt) = mqtt {
        mqtt.shutdown().await;
    }

    tracing::info!("VoiceRank stopped");
    Ok(())
}
