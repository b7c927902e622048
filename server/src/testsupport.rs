//! Recording mock ports shared by the service tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deathwatch_shared::{CharacterInfo, Death, LevelUp, OnlineMap, OnlinePlayer, Subscription};

use crate::error::{PortError, Result};
use crate::ports::{Fetcher, Notifier, Store};

fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct MockStore {
    pub subs: Mutex<Vec<Subscription>>,
    /// name -> (world, level)
    pub levels: Mutex<HashMap<String, (String, u32)>>,
    pub upserts: Mutex<Vec<(String, u32, String)>>,
    pub touched: Mutex<Vec<(String, Vec<String>)>>,
    pub saved_subs: Mutex<Vec<Subscription>>,
    pub deleted_subs: Mutex<Vec<u64>>,
    pub fail_subscriptions: AtomicBool,
    pub fail_levels: AtomicBool,
    pub levels_calls: AtomicUsize,
    pub prune_calls: AtomicUsize,
    /// Hold `levels_by_world` open for this long, to probe tick overlap.
    pub levels_delay: Mutex<Option<Duration>>,
}

impl MockStore {
    pub fn with_level(self, name: &str, level: u32, world: &str) -> Self {
        lock(&self.levels).insert(name.to_string(), (world.to_string(), level));
        self
    }

    pub fn with_subscription(self, sub: Subscription) -> Self {
        lock(&self.subs).push(sub);
        self
    }

    pub fn level_of(&self, name: &str) -> Option<u32> {
        lock(&self.levels).get(name).map(|(_, level)| *level)
    }
}

#[async_trait]
impl Store for MockStore {
    async fn subscriptions(&self) -> Result<Vec<Subscription>> {
        if self.fail_subscriptions.load(Ordering::SeqCst) {
            return Err(PortError::Store("subscriptions unavailable".to_string()));
        }
        Ok(lock(&self.subs).clone())
    }

    async fn subscription(&self, chat_guild_id: u64) -> Result<Option<Subscription>> {
        Ok(lock(&self.subs)
            .iter()
            .find(|sub| sub.chat_guild_id == chat_guild_id)
            .cloned())
    }

    async fn save_subscription(&self, sub: &Subscription) -> Result<()> {
        lock(&self.saved_subs).push(sub.clone());
        Ok(())
    }

    async fn delete_subscription(&self, chat_guild_id: u64) -> Result<()> {
        lock(&self.deleted_subs).push(chat_guild_id);
        Ok(())
    }

    async fn add_watched_guild(&self, _chat_guild_id: u64, _guild: &str) -> Result<()> {
        Ok(())
    }

    async fn remove_watched_guild(&self, _chat_guild_id: u64, _guild: &str) -> Result<()> {
        Ok(())
    }

    async fn levels_by_world(&self, world: &str) -> Result<HashMap<String, u32>> {
        self.levels_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.levels_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_levels.load(Ordering::SeqCst) {
            return Err(PortError::Store("levels unavailable".to_string()));
        }
        Ok(lock(&self.levels)
            .iter()
            .filter(|(_, (w, _))| w == world)
            .map(|(name, (_, level))| (name.clone(), *level))
            .collect())
    }

    async fn upsert_level(&self, name: &str, level: u32, world: &str) -> Result<()> {
        lock(&self.upserts).push((name.to_string(), level, world.to_string()));
        lock(&self.levels).insert(name.to_string(), (world.to_string(), level));
        Ok(())
    }

    async fn touch_levels(&self, world: &str, names: &[String]) -> Result<()> {
        lock(&self.touched).push((world.to_string(), names.to_vec()));
        Ok(())
    }

    async fn delete_stale_levels(&self, _world: &str, _cutoff: DateTime<Utc>) -> Result<u64> {
        self.prune_calls.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    async fn offline_levels(&self, world: &str, online: &[String]) -> Result<HashMap<String, u32>> {
        Ok(lock(&self.levels)
            .iter()
            .filter(|(name, (w, _))| w == world && !online.contains(name))
            .map(|(name, (_, level))| (name.clone(), *level))
            .collect())
    }

    async fn close(&self) {}
}

#[derive(Default)]
pub struct MockFetcher {
    pub scrape: Mutex<Option<OnlineMap>>,
    pub api_world: Mutex<Option<Vec<OnlinePlayer>>>,
    pub characters: Mutex<HashMap<String, CharacterInfo>>,
    pub guild_members: Mutex<HashMap<String, Vec<String>>>,
    pub fail_guild_fetch: AtomicBool,
    pub scrape_calls: AtomicUsize,
    pub world_calls: AtomicUsize,
    pub character_calls: AtomicUsize,
    pub guild_calls: AtomicUsize,
}

impl MockFetcher {
    pub fn set_scrape(&self, roster: &[(&str, u32)]) {
        *lock(&self.scrape) = Some(
            roster
                .iter()
                .map(|(name, level)| (name.to_string(), *level))
                .collect(),
        );
    }

    pub fn set_api_world(&self, world: &str, roster: &[(&str, u32)]) {
        *lock(&self.api_world) = Some(
            roster
                .iter()
                .map(|(name, level)| OnlinePlayer {
                    name: name.to_string(),
                    level: *level,
                    vocation: None,
                    world: world.to_string(),
                })
                .collect(),
        );
    }

    pub fn set_character(&self, info: CharacterInfo) {
        lock(&self.characters).insert(info.name.clone(), info);
    }

    pub fn set_guild_members(&self, guild: &str, members: &[&str]) {
        lock(&self.guild_members).insert(
            guild.to_string(),
            members.iter().map(|m| m.to_string()).collect(),
        );
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch_world(&self, _world: &str) -> Result<Vec<OnlinePlayer>> {
        self.world_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.api_world)
            .clone()
            .ok_or_else(|| PortError::Upstream("api world unavailable".to_string()))
    }

    async fn fetch_world_via_scrape(&self, _world: &str) -> Result<OnlineMap> {
        self.scrape_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.scrape)
            .clone()
            .ok_or_else(|| PortError::Upstream("world page unavailable".to_string()))
    }

    async fn fetch_character(&self, name: &str) -> Result<CharacterInfo> {
        self.character_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.characters)
            .get(name)
            .cloned()
            .ok_or(PortError::Status {
                status: 404,
                preview: "character not found".to_string(),
            })
    }

    async fn fetch_guild_members(&self, guild: &str) -> Result<Vec<String>> {
        self.guild_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_guild_fetch.load(Ordering::SeqCst) {
            return Err(PortError::Upstream("guild endpoint unavailable".to_string()));
        }
        lock(&self.guild_members)
            .get(guild)
            .cloned()
            .ok_or(PortError::Status {
                status: 404,
                preview: "guild not found".to_string(),
            })
    }
}

#[derive(Default)]
pub struct MockNotifier {
    /// (chat_guild_id, kind, character)
    pub sent: Mutex<Vec<(u64, &'static str, String)>>,
    pub fail_for: Mutex<HashSet<u64>>,
}

impl MockNotifier {
    pub fn sent_to(&self, chat_guild_id: u64) -> Vec<(&'static str, String)> {
        lock(&self.sent)
            .iter()
            .filter(|(id, _, _)| *id == chat_guild_id)
            .map(|(_, kind, character)| (*kind, character.clone()))
            .collect()
    }

    fn deliver(&self, chat_guild_id: u64, kind: &'static str, character: &str) -> Result<()> {
        if lock(&self.fail_for).contains(&chat_guild_id) {
            return Err(PortError::Notify("channel missing".to_string()));
        }
        lock(&self.sent).push((chat_guild_id, kind, character.to_string()));
        Ok(())
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify_level_up(&self, chat_guild_id: u64, event: &LevelUp) -> Result<()> {
        self.deliver(chat_guild_id, "level_up", &event.name)
    }

    async fn notify_death(&self, chat_guild_id: u64, name: &str, _death: &Death) -> Result<()> {
        self.deliver(chat_guild_id, "death", name)
    }

    async fn send_generic(&self, chat_guild_id: u64, _channel: &str, text: &str) -> Result<()> {
        self.deliver(chat_guild_id, "generic", text)
    }
}

/// Engine over mock ports. The death log starts in the past so test deaths
/// inside the freshness window are not mistaken for pre-start backlog.
pub fn engine(
    store: std::sync::Arc<MockStore>,
    fetcher: std::sync::Arc<MockFetcher>,
    notifier: std::sync::Arc<MockNotifier>,
    min_level_track: u32,
) -> crate::services::tracker::Engine {
    crate::services::tracker::Engine {
        store,
        fetcher,
        notifier,
        metrics: std::sync::Arc::new(crate::metrics::Metrics::new().expect("test registry")),
        death_log: crate::services::death_log::DeathLog::starting_at(
            Utc::now() - chrono::Duration::hours(6),
        ),
        memberships: crate::services::membership::MembershipCache::new(),
        min_level_track,
        pool_size: 4,
        use_scrape_for_levels: true,
    }
}

pub fn subscription(chat_guild_id: u64, world: &str, watched: &[&str]) -> Subscription {
    Subscription {
        chat_guild_id,
        world: world.to_string(),
        watched_guilds: watched.iter().map(|g| g.to_string()).collect(),
    }
}

pub fn character(name: &str, level: u32, world: &str, deaths: Vec<Death>) -> CharacterInfo {
    CharacterInfo {
        name: name.to_string(),
        level,
        vocation: None,
        world: world.to_string(),
        deaths,
    }
}
