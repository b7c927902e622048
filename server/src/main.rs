mod config;
mod db_migrations;
mod db_sqlx;
mod discord;
mod error;
mod fetch;
mod metrics;
mod ports;
mod services;
mod store;
#[cfg(test)]
mod testsupport;

extern crate self as sqlx;
pub use crate::db_sqlx::{PgPool, Postgres, postgres, query, query_as};

use std::sync::Arc;

use serenity::all::{GatewayIntents, Http};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::discord::commands::Handler;
use crate::discord::notifier::DiscordNotifier;
use crate::fetch::TibiaClient;
use crate::metrics::Metrics;
use crate::ports::{Notifier, Store};
use crate::services::death_log::DeathLog;
use crate::services::membership::MembershipCache;
use crate::services::tracker::{Engine, Tracker};
use crate::store::PgStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(problems) => {
            for problem in &problems {
                tracing::error!("configuration: {problem}");
            }
            tracing::error!(
                "refusing to start with {} configuration problem(s)",
                problems.len()
            );
            return;
        }
    };

    tracing::info!(
        db_max_connections = config.db_max_connections,
        "Connecting to PostgreSQL..."
    );
    let db = match PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to PostgreSQL");
            return;
        }
    };
    if let Err(e) = db_migrations::run(&db).await {
        tracing::error!(error = %e, "failed to run migrations");
        return;
    }
    tracing::info!("Database connected and migrations applied");

    let metrics = match Metrics::new() {
        Ok(metrics) => Arc::new(metrics),
        Err(e) => {
            tracing::error!(error = %e, "failed to build metrics registry");
            return;
        }
    };
    let store: Arc<PgStore> = Arc::new(PgStore::new(db));
    let fetcher = match TibiaClient::new(Arc::clone(&metrics)) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!(error = %e, "failed to build upstream clients");
            return;
        }
    };

    // The notifier talks to Discord over its own REST client, so it can be
    // handed to the command surface before the gateway client is built.
    let notifier = Arc::new(DiscordNotifier::new(
        Arc::new(Http::new(&config.discord_token)),
        config.channel_name_deaths.clone(),
        config.channel_name_levels.clone(),
    ));
    let handler = Handler::new(
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        Arc::clone(&config),
    );
    let mut client = match serenity::Client::builder(&config.discord_token, GatewayIntents::GUILDS)
        .event_handler(handler)
        .await
    {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "failed to build discord client");
            return;
        }
    };

    let tracker = Arc::new(Tracker::new(
        Engine {
            store: Arc::clone(&store) as Arc<dyn Store>,
            fetcher,
            notifier,
            metrics: Arc::clone(&metrics),
            death_log: DeathLog::new(),
            memberships: MembershipCache::new(),
            min_level_track: config.min_level_track,
            pool_size: config.pool_size,
            use_scrape_for_levels: config.use_scrape_for_levels,
        },
        config.tick_interval,
    ));

    let cancel = CancellationToken::new();
    let metrics_task = tokio::spawn(metrics::serve(Arc::clone(&metrics), cancel.clone()));
    let tracker_task = tokio::spawn(Arc::clone(&tracker).run(cancel.clone()));

    let shard_manager = client.shard_manager.clone();
    let gateway_task = tokio::spawn(async move {
        if let Err(e) = client.start().await {
            tracing::error!(error = %e, "discord client stopped");
        }
    });

    shutdown_signal().await;
    cancel.cancel();

    // Releases in reverse acquisition order; every release runs even if an
    // earlier one failed.
    shard_manager.shutdown_all().await;
    let _ = gateway_task.await;
    let _ = tracker_task.await;
    let _ = metrics_task.await;
    store.close().await;

    tracing::info!("Shut down gracefully");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
