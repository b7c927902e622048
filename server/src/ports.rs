//! Contracts with the external collaborators of the tracking engine.
//!
//! The engine only ever talks to the store, the upstream data sources, and
//! the chat platform through these traits; concrete implementations live in
//! `store`, `fetch`, and `discord` and are swapped for recording mocks in
//! tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deathwatch_shared::{CharacterInfo, Death, LevelUp, OnlineMap, OnlinePlayer, Subscription};

use crate::error::Result;

/// Persistence port: subscriptions and level baselines.
#[async_trait]
pub trait Store: Send + Sync {
    async fn subscriptions(&self) -> Result<Vec<Subscription>>;
    async fn subscription(&self, chat_guild_id: u64) -> Result<Option<Subscription>>;
    async fn save_subscription(&self, sub: &Subscription) -> Result<()>;
    async fn delete_subscription(&self, chat_guild_id: u64) -> Result<()>;
    async fn add_watched_guild(&self, chat_guild_id: u64, guild: &str) -> Result<()>;
    async fn remove_watched_guild(&self, chat_guild_id: u64, guild: &str) -> Result<()>;

    /// Level baselines for one world: name -> last stored level.
    async fn levels_by_world(&self, world: &str) -> Result<HashMap<String, u32>>;
    async fn upsert_level(&self, name: &str, level: u32, world: &str) -> Result<()>;
    /// Refresh `updated_at` for the given names, marking them observed.
    async fn touch_levels(&self, world: &str, names: &[String]) -> Result<()>;
    /// Remove baselines in `world` untouched since `cutoff`; returns how many.
    async fn delete_stale_levels(&self, world: &str, cutoff: DateTime<Utc>) -> Result<u64>;
    /// Baselines in `world` whose names are not in the online set.
    async fn offline_levels(&self, world: &str, online: &[String]) -> Result<HashMap<String, u32>>;

    async fn close(&self);
}

/// Upstream data-source port.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Online roster via the JSON API.
    async fn fetch_world(&self, world: &str) -> Result<Vec<OnlinePlayer>>;
    /// Online roster via the HTML world page; levels here are authoritative.
    async fn fetch_world_via_scrape(&self, world: &str) -> Result<OnlineMap>;
    async fn fetch_character(&self, name: &str) -> Result<CharacterInfo>;
    async fn fetch_guild_members(&self, guild: &str) -> Result<Vec<String>>;
}

/// Chat-platform delivery port.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_level_up(&self, chat_guild_id: u64, event: &LevelUp) -> Result<()>;
    async fn notify_death(&self, chat_guild_id: u64, name: &str, death: &Death) -> Result<()>;
    async fn send_generic(&self, chat_guild_id: u64, channel: &str, text: &str) -> Result<()>;
}
