use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use deathwatch_shared::Subscription;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PortError, Result};
use crate::metrics::Metrics;
use crate::ports::{Fetcher, Notifier, Store};
use crate::services::death_log::DeathLog;
use crate::services::membership::MembershipCache;
use crate::services::world;

/// Everything a world tick needs. The caches outlive any single tick, so
/// the scheduler owns one `Engine` for the process lifetime and hands out
/// references.
pub struct Engine {
    pub store: Arc<dyn Store>,
    pub fetcher: Arc<dyn Fetcher>,
    pub notifier: Arc<dyn Notifier>,
    pub metrics: Arc<Metrics>,
    pub death_log: DeathLog,
    pub memberships: MembershipCache,
    pub min_level_track: u32,
    pub pool_size: usize,
    pub use_scrape_for_levels: bool,
}

/// Periodic driver: one tick immediately on start, then one per interval
/// until cancelled.
pub struct Tracker {
    engine: Arc<Engine>,
    tick_interval: Duration,
    world_locks: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Tracker {
    pub fn new(engine: Engine, tick_interval: Duration) -> Self {
        Self {
            engine: Arc::new(engine),
            tick_interval,
            world_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            interval_secs = self.tick_interval.as_secs(),
            "tracker started"
        );
        let mut interval = tokio::time::interval(self.tick_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.tick(&cancel).await;
        }

        info!("tracker stopped");
    }

    async fn tick(&self, cancel: &CancellationToken) {
        let subs = match race_cancel(cancel, self.engine.store.subscriptions()).await {
            Ok(subs) => subs,
            Err(e) => {
                if !e.is_cancelled() {
                    warn!(error = %e, "skipping tick: subscriptions unavailable");
                }
                return;
            }
        };

        for (world, world_subs) in partition_by_world(subs) {
            let lock = self.world_lock(&world);
            let engine = Arc::clone(&self.engine);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                // Per-world queue of depth one: when the previous tick for
                // this world is still running, the newer duplicate is dropped
                // and the next interval picks the world up again.
                let Ok(_guard) = lock.try_lock() else {
                    debug!(world = %world, "previous tick still running; dropping this one");
                    return;
                };
                world::run_world_tick(&engine, &world, &world_subs, &cancel).await;
            });
        }
    }

    fn world_lock(&self, world: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .world_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(world.to_string()).or_default().clone()
    }
}

/// Group subscriptions by the world they watch; subscriptions without a
/// world are dropped.
pub(crate) fn partition_by_world(subs: Vec<Subscription>) -> HashMap<String, Vec<Subscription>> {
    let mut by_world: HashMap<String, Vec<Subscription>> = HashMap::new();
    for sub in subs {
        let world = sub.world.trim();
        if world.is_empty() {
            continue;
        }
        by_world.entry(world.to_string()).or_default().push(sub);
    }
    by_world
}

/// Race a port call against process cancellation, so every tick task exits
/// at its next suspension point once the token fires.
pub(crate) async fn race_cancel<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(PortError::Cancelled),
        result = call => result,
    }
}
