use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{Duration, Utc};
use deathwatch_shared::{Subscription, TrackEvent};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::OFFLINE_STALE_SECS;
use crate::services::dispatch::{self, MembershipSnapshot};
use crate::services::levels;
use crate::services::pool;
use crate::services::source::{self, SourceKind};
use crate::services::tracker::{Engine, race_cancel};

/// One tick for one world. Aborts only when the baseline load fails;
/// every later failure is logged and the remaining steps continue.
pub(crate) async fn run_world_tick(
    engine: &Engine,
    world: &str,
    subs: &[Subscription],
    cancel: &CancellationToken,
) {
    let baselines = match race_cancel(cancel, engine.store.levels_by_world(world)).await {
        Ok(baselines) => baselines,
        Err(e) => {
            if !e.is_cancelled() {
                warn!(world, error = %e, "aborting tick: level baselines unavailable");
            }
            return;
        }
    };

    let tick = WorldTick {
        engine,
        world,
        subs,
        memberships: membership_snapshot(engine, subs, cancel).await,
        cancel,
    };
    tick.run(baselines).await;
}

struct WorldTick<'a> {
    engine: &'a Engine,
    world: &'a str,
    subs: &'a [Subscription],
    memberships: MembershipSnapshot,
    cancel: &'a CancellationToken,
}

impl WorldTick<'_> {
    async fn run(&self, baselines: HashMap<String, u32>) {
        let engine = self.engine;

        let (online, observed_via) = tokio::select! {
            _ = self.cancel.cancelled() => return,
            observed = source::fetch_online(
                engine.fetcher.as_ref(),
                self.world,
                engine.use_scrape_for_levels,
            ) => observed,
        };
        debug!(
            world = self.world,
            online = online.len(),
            source = ?observed_via,
            "online roster observed"
        );

        let tracked: Vec<String> = online
            .iter()
            .filter(|(_, level)| **level >= engine.min_level_track)
            .map(|(name, _)| name.clone())
            .collect();

        // Scrape levels are authoritative and drive level logic directly;
        // the API path defers to the enriched per-character response, whose
        // level is fresher than the roster's.
        if observed_via == SourceKind::Scrape {
            for name in &tracked {
                if self.cancel.is_cancelled() {
                    return;
                }
                let Some(observed) = online.get(name).copied() else {
                    continue;
                };
                self.apply_level(baselines.get(name).copied(), name, observed)
                    .await;
            }
        }

        self.enrich(&baselines, tracked, observed_via == SourceKind::Api)
            .await;

        // Maintenance: keep online names alive, drop what has been offline
        // past the stale threshold.
        let online_names: Vec<String> = online.keys().cloned().collect();
        if let Err(e) = race_cancel(
            self.cancel,
            engine.store.touch_levels(self.world, &online_names),
        )
        .await
        {
            if e.is_cancelled() {
                return;
            }
            warn!(world = self.world, error = %e, "failed to touch observed baselines");
        }

        let cutoff = Utc::now() - Duration::seconds(OFFLINE_STALE_SECS);
        match race_cancel(
            self.cancel,
            engine.store.delete_stale_levels(self.world, cutoff),
        )
        .await
        {
            Ok(0) => {}
            Ok(pruned) => info!(world = self.world, pruned, "pruned stale baselines"),
            Err(e) => {
                if e.is_cancelled() {
                    return;
                }
                warn!(world = self.world, error = %e, "failed to prune stale baselines");
            }
        }

        // Offline follow-up: deaths and level-ups that happened while a
        // character slipped offline between ticks must still be observed.
        let offline = match race_cancel(
            self.cancel,
            engine.store.offline_levels(self.world, &online_names),
        )
        .await
        {
            Ok(offline) => offline,
            Err(e) => {
                if !e.is_cancelled() {
                    warn!(world = self.world, error = %e, "failed to load offline baselines");
                }
                return;
            }
        };
        let offline_names: Vec<String> = offline.keys().cloned().collect();
        self.enrich(&offline, offline_names, true).await;
    }

    /// Drive the worker pool over `names`; feed every detail into the death
    /// log, and into level logic when `drive_levels` is set.
    async fn enrich(&self, baselines: &HashMap<String, u32>, names: Vec<String>, drive_levels: bool) {
        if names.is_empty() {
            return;
        }
        let engine = self.engine;
        let mut details = pool::fetch_characters(
            Arc::clone(&engine.fetcher),
            names,
            engine.pool_size,
            self.cancel.clone(),
        );

        while let Some(info) = details.next().await {
            if self.cancel.is_cancelled() {
                return;
            }
            if drive_levels && info.level >= engine.min_level_track {
                self.apply_level(baselines.get(&info.name).copied(), &info.name, info.level)
                    .await;
            }
            for death in engine.death_log.consider(&info.name, &info.deaths) {
                engine.metrics.tracked_deaths.inc();
                let event = TrackEvent::Death {
                    name: info.name.clone(),
                    death,
                };
                self.dispatch(&event).await;
            }
        }
    }

    async fn apply_level(&self, baseline: Option<u32>, name: &str, observed: u32) {
        let decision = levels::assess(name, self.world, baseline, observed);
        if let Some(level) = decision.store_level {
            if let Err(e) = race_cancel(
                self.cancel,
                self.engine.store.upsert_level(name, level, self.world),
            )
            .await
            {
                if !e.is_cancelled() {
                    warn!(world = self.world, character = name, error = %e, "failed to store baseline");
                }
                return;
            }
        }
        if let Some(event) = decision.event {
            self.engine.metrics.tracked_level_ups.inc();
            self.dispatch(&TrackEvent::LevelUp(event)).await;
        }
    }

    async fn dispatch(&self, event: &TrackEvent) {
        dispatch::dispatch(
            event,
            self.subs,
            &self.memberships,
            self.engine.notifier.as_ref(),
            &self.engine.metrics,
        )
        .await;
    }
}

/// Resolve the union of the subscriptions' allow-lists into one snapshot
/// for the tick. Rosters that cannot be resolved stay absent.
async fn membership_snapshot(
    engine: &Engine,
    subs: &[Subscription],
    cancel: &CancellationToken,
) -> MembershipSnapshot {
    let wanted: BTreeSet<&str> = subs
        .iter()
        .flat_map(|sub| sub.watched_guilds.iter())
        .map(String::as_str)
        .collect();

    let mut snapshot = MembershipSnapshot::new();
    for guild in wanted {
        if cancel.is_cancelled() {
            break;
        }
        if let Some(members) = engine
            .memberships
            .get(guild, engine.fetcher.as_ref())
            .await
        {
            snapshot.insert(guild.to_string(), members);
        }
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use chrono::{Duration, Utc};
    use deathwatch_shared::Death;
    use tokio_util::sync::CancellationToken;

    use super::run_world_tick;
    use crate::testsupport::{
        MockFetcher, MockNotifier, MockStore, character, engine, subscription,
    };

    fn recent_death() -> Death {
        Death {
            time: Utc::now() - Duration::minutes(30),
            level: 520,
            reason: "a dragon lord".to_string(),
        }
    }

    #[tokio::test]
    async fn first_observation_establishes_baseline_without_notification() {
        let store = Arc::new(MockStore::default());
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.set_scrape(&[("Kharsek", 150)]);
        let notifier = Arc::new(MockNotifier::default());
        let engine = engine(
            Arc::clone(&store),
            Arc::clone(&fetcher),
            Arc::clone(&notifier),
            100,
        );
        let subs = [subscription(1, "Antica", &[])];

        run_world_tick(&engine, "Antica", &subs, &CancellationToken::new()).await;

        assert_eq!(store.level_of("Kharsek"), Some(150));
        assert!(notifier.sent_to(1).is_empty());
    }

    #[tokio::test]
    async fn level_up_updates_baseline_and_notifies_matching_subscriptions() {
        let store = Arc::new(MockStore::default().with_level("Kharsek", 150, "Antica"));
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.set_scrape(&[("Kharsek", 151)]);
        let notifier = Arc::new(MockNotifier::default());
        let engine = engine(
            Arc::clone(&store),
            Arc::clone(&fetcher),
            Arc::clone(&notifier),
            100,
        );
        let subs = [subscription(1, "Antica", &[]), subscription(2, "Antica", &[])];

        run_world_tick(&engine, "Antica", &subs, &CancellationToken::new()).await;

        assert_eq!(store.level_of("Kharsek"), Some(151));
        assert_eq!(notifier.sent_to(1), vec![("level_up", "Kharsek".to_string())]);
        assert_eq!(notifier.sent_to(2), vec![("level_up", "Kharsek".to_string())]);
    }

    #[tokio::test]
    async fn downward_observation_is_ignored() {
        let store = Arc::new(MockStore::default().with_level("Kharsek", 200, "Antica"));
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.set_scrape(&[("Kharsek", 180)]);
        let notifier = Arc::new(MockNotifier::default());
        let engine = engine(
            Arc::clone(&store),
            Arc::clone(&fetcher),
            Arc::clone(&notifier),
            100,
        );
        let subs = [subscription(1, "Antica", &[])];

        run_world_tick(&engine, "Antica", &subs, &CancellationToken::new()).await;

        assert_eq!(store.level_of("Kharsek"), Some(200));
        assert!(store.upserts.lock().expect("test lock").is_empty());
        assert!(notifier.sent_to(1).is_empty());
    }

    #[tokio::test]
    async fn characters_below_the_threshold_are_neither_stored_nor_enriched() {
        let store = Arc::new(MockStore::default());
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.set_scrape(&[("Bubble Gum", 400)]);
        let notifier = Arc::new(MockNotifier::default());
        let engine = engine(
            Arc::clone(&store),
            Arc::clone(&fetcher),
            Arc::clone(&notifier),
            500,
        );
        let subs = [subscription(1, "Antica", &[])];

        run_world_tick(&engine, "Antica", &subs, &CancellationToken::new()).await;

        assert!(store.upserts.lock().expect("test lock").is_empty());
        assert_eq!(fetcher.character_calls.load(Ordering::SeqCst), 0);
        assert!(notifier.sent_to(1).is_empty());
    }

    #[tokio::test]
    async fn a_death_is_announced_once_across_ticks() {
        let store = Arc::new(MockStore::default().with_level("Kharsek", 150, "Antica"));
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.set_scrape(&[("Kharsek", 150)]);
        fetcher.set_character(character("Kharsek", 150, "Antica", vec![recent_death()]));
        let notifier = Arc::new(MockNotifier::default());
        let engine = engine(
            Arc::clone(&store),
            Arc::clone(&fetcher),
            Arc::clone(&notifier),
            100,
        );
        let subs = [subscription(1, "Antica", &[])];
        let cancel = CancellationToken::new();

        run_world_tick(&engine, "Antica", &subs, &cancel).await;
        run_world_tick(&engine, "Antica", &subs, &cancel).await;

        assert_eq!(notifier.sent_to(1), vec![("death", "Kharsek".to_string())]);
    }

    #[tokio::test]
    async fn stale_membership_roster_still_filters_after_a_failed_refresh() {
        let store = Arc::new(MockStore::default().with_level("Kharsek", 600, "Antica"));
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.set_scrape(&[("Kharsek", 600)]);
        fetcher.set_character(character("Kharsek", 600, "Antica", vec![recent_death()]));
        fetcher.fail_guild_fetch.store(true, Ordering::SeqCst);
        let notifier = Arc::new(MockNotifier::default());
        let engine = engine(
            Arc::clone(&store),
            Arc::clone(&fetcher),
            Arc::clone(&notifier),
            100,
        );
        engine
            .memberships
            .seed("Red Rose", &["Kharsek"], Utc::now() - Duration::minutes(1))
            .await;
        let subs = [
            subscription(1, "Antica", &["Red Rose"]),
            subscription(2, "Antica", &["Eternal Oblivion"]),
        ];

        run_world_tick(&engine, "Antica", &subs, &CancellationToken::new()).await;

        assert_eq!(notifier.sent_to(1), vec![("death", "Kharsek".to_string())]);
        assert!(
            notifier.sent_to(2).is_empty(),
            "an unresolvable roster must contribute nothing"
        );
    }

    #[tokio::test]
    async fn api_path_drives_level_logic_from_the_enriched_response() {
        let store = Arc::new(MockStore::default().with_level("Kharsek", 150, "Antica"));
        let fetcher = Arc::new(MockFetcher::default());
        // No scrape roster: the selector falls back to the JSON API, whose
        // roster level is stale relative to the per-character endpoint.
        fetcher.set_api_world("Antica", &[("Kharsek", 150)]);
        fetcher.set_character(character("Kharsek", 155, "Antica", Vec::new()));
        let notifier = Arc::new(MockNotifier::default());
        let engine = engine(
            Arc::clone(&store),
            Arc::clone(&fetcher),
            Arc::clone(&notifier),
            100,
        );
        let subs = [subscription(1, "Antica", &[])];

        run_world_tick(&engine, "Antica", &subs, &CancellationToken::new()).await;

        assert_eq!(store.level_of("Kharsek"), Some(155));
        assert_eq!(notifier.sent_to(1), vec![("level_up", "Kharsek".to_string())]);
    }

    #[tokio::test]
    async fn scrape_path_ignores_the_enriched_level() {
        let store = Arc::new(MockStore::default());
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.set_scrape(&[("Kharsek", 150)]);
        fetcher.set_character(character("Kharsek", 9999, "Antica", Vec::new()));
        let notifier = Arc::new(MockNotifier::default());
        let engine = engine(
            Arc::clone(&store),
            Arc::clone(&fetcher),
            Arc::clone(&notifier),
            100,
        );
        let subs = [subscription(1, "Antica", &[])];

        run_world_tick(&engine, "Antica", &subs, &CancellationToken::new()).await;

        assert_eq!(store.level_of("Kharsek"), Some(150));
        assert!(notifier.sent_to(1).is_empty());
    }

    #[tokio::test]
    async fn offline_follow_up_observes_level_ups_of_recently_offline_characters() {
        let store = Arc::new(MockStore::default().with_level("Arieswar", 600, "Antica"));
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.set_scrape(&[]);
        fetcher.set_character(character("Arieswar", 601, "Antica", Vec::new()));
        let notifier = Arc::new(MockNotifier::default());
        let engine = engine(
            Arc::clone(&store),
            Arc::clone(&fetcher),
            Arc::clone(&notifier),
            100,
        );
        let subs = [subscription(1, "Antica", &[])];

        run_world_tick(&engine, "Antica", &subs, &CancellationToken::new()).await;

        assert_eq!(store.level_of("Arieswar"), Some(601));
        assert_eq!(notifier.sent_to(1), vec![("level_up", "Arieswar".to_string())]);
        assert_eq!(store.prune_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn baseline_load_failure_aborts_the_tick_before_any_observation() {
        let store = Arc::new(MockStore::default());
        store.fail_levels.store(true, Ordering::SeqCst);
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.set_scrape(&[("Kharsek", 600)]);
        let notifier = Arc::new(MockNotifier::default());
        let engine = engine(
            Arc::clone(&store),
            Arc::clone(&fetcher),
            Arc::clone(&notifier),
            100,
        );
        let subs = [subscription(1, "Antica", &[])];

        run_world_tick(&engine, "Antica", &subs, &CancellationToken::new()).await;

        assert_eq!(fetcher.scrape_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.prune_calls.load(Ordering::SeqCst), 0);
    }
}
