use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use crate::config::MEMBERSHIP_CACHE_TTL_SECS;
use crate::ports::Fetcher;

#[derive(Clone)]
struct CachedRoster {
    members: HashSet<String>,
    expires_at: DateTime<Utc>,
}

/// TTL cache of game-guild rosters with stale fallback.
///
/// Rosters change slowly relative to the tick interval; a quarter hour of
/// staleness is acceptable, an empty allow-list because the guild endpoint
/// hiccupped is not.
pub struct MembershipCache {
    entries: RwLock<HashMap<String, CachedRoster>>,
    fetch_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl MembershipCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            fetch_locks: DashMap::new(),
        }
    }

    /// Current member set of `guild`, fetching on miss with the map lock
    /// released. A failed refresh falls back to the stale entry when one
    /// exists; with nothing cached the roster is reported absent.
    pub async fn get(&self, guild: &str, fetcher: &dyn Fetcher) -> Option<HashSet<String>> {
        if let Some(members) = self.fresh(guild).await {
            return Some(members);
        }

        // One in-flight fetch per guild; latecomers wait, then re-check.
        let lock = self
            .fetch_locks
            .entry(guild.to_string())
            .or_default()
            .clone();
        let _guard = lock.lock().await;
        if let Some(members) = self.fresh(guild).await {
            return Some(members);
        }

        match fetcher.fetch_guild_members(guild).await {
            Ok(members) => {
                let members: HashSet<String> = members.into_iter().collect();
                self.entries.write().await.insert(
                    guild.to_string(),
                    CachedRoster {
                        members: members.clone(),
                        expires_at: Utc::now() + Duration::seconds(MEMBERSHIP_CACHE_TTL_SECS),
                    },
                );
                Some(members)
            }
            Err(e) if e.is_cancelled() => None,
            Err(e) => {
                let entries = self.entries.read().await;
                match entries.get(guild) {
                    Some(stale) => {
                        warn!(guild, error = %e, "membership refresh failed; serving stale roster");
                        Some(stale.members.clone())
                    }
                    None => {
                        warn!(guild, error = %e, "membership fetch failed with nothing cached");
                        None
                    }
                }
            }
        }
    }

    async fn fresh(&self, guild: &str) -> Option<HashSet<String>> {
        let entries = self.entries.read().await;
        entries
            .get(guild)
            .filter(|cached| cached.expires_at > Utc::now())
            .map(|cached| cached.members.clone())
    }

    #[cfg(test)]
    pub(crate) async fn seed(&self, guild: &str, members: &[&str], expires_at: DateTime<Utc>) {
        self.entries.write().await.insert(
            guild.to_string(),
            CachedRoster {
                members: members.iter().map(|m| m.to_string()).collect(),
                expires_at,
            },
        );
    }
}

impl Default for MembershipCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use chrono::{Duration, Utc};

    use super::MembershipCache;
    use crate::testsupport::MockFetcher;

    #[tokio::test]
    async fn fresh_entry_is_served_without_a_fetch() {
        let cache = MembershipCache::new();
        cache
            .seed("Red Rose", &["Kharsek"], Utc::now() + Duration::minutes(10))
            .await;
        let fetcher = MockFetcher::default();

        let members = cache
            .get("Red Rose", &fetcher)
            .await
            .expect("seeded roster should be served");
        assert!(members.contains("Kharsek"));
        assert_eq!(fetcher.guild_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn miss_fetches_once_and_caches_the_roster() {
        let cache = MembershipCache::new();
        let fetcher = MockFetcher::default();
        fetcher.set_guild_members("Red Rose", &["Kharsek", "Arieswar"]);

        let first = cache
            .get("Red Rose", &fetcher)
            .await
            .expect("fetch should succeed");
        assert_eq!(first.len(), 2);

        let second = cache
            .get("Red Rose", &fetcher)
            .await
            .expect("cached roster should be served");
        assert_eq!(second, first);
        assert_eq!(fetcher.guild_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_refresh_falls_back_to_the_stale_entry() {
        let cache = MembershipCache::new();
        cache
            .seed(
                "Red Rose",
                &["Kharsek", "Arieswar"],
                Utc::now() - Duration::minutes(1),
            )
            .await;
        let fetcher = MockFetcher::default();
        fetcher.fail_guild_fetch.store(true, Ordering::SeqCst);

        let members = cache
            .get("Red Rose", &fetcher)
            .await
            .expect("stale roster should be served on fetch failure");
        assert!(members.contains("Kharsek"));
        assert!(members.contains("Arieswar"));
        assert_eq!(fetcher.guild_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_with_nothing_cached_reports_the_roster_absent() {
        let cache = MembershipCache::new();
        let fetcher = MockFetcher::default();
        fetcher.fail_guild_fetch.store(true, Ordering::SeqCst);

        assert!(cache.get("Red Rose", &fetcher).await.is_none());
    }
}
