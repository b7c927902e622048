use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use deathwatch_shared::Death;

use crate::config::{DEATH_FRESHNESS_WINDOW_SECS, DEATH_LOG_TTL_SECS};

/// Identity of a death for deduplication: who, and when to the second.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DeathKey {
    name: String,
    occurred_at: i64,
}

/// Bounded set of already-announced deaths.
///
/// The upstream returns multi-day death history per character; without the
/// freshness window a restart would replay all of it. The process-start gate
/// additionally suppresses backlog on the very first tick.
pub struct DeathLog {
    started_at: DateTime<Utc>,
    entries: Mutex<HashMap<DeathKey, DateTime<Utc>>>,
}

impl DeathLog {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh, previously unseen deaths for `name`. Everything returned has
    /// been recorded and will not be returned again within the TTL.
    pub fn consider(&self, name: &str, deaths: &[Death]) -> Vec<Death> {
        self.consider_at(name, deaths, Utc::now())
    }

    fn consider_at(&self, name: &str, deaths: &[Death], now: DateTime<Utc>) -> Vec<Death> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // Eviction always precedes the duplicate check.
        let ttl_floor = now - Duration::seconds(DEATH_LOG_TTL_SECS);
        entries.retain(|_, added_at| *added_at > ttl_floor);

        let freshness_floor = self
            .started_at
            .max(now - Duration::seconds(DEATH_FRESHNESS_WINDOW_SECS));

        let mut emitted = Vec::new();
        for death in deaths {
            if death.time < freshness_floor {
                continue;
            }
            let key = DeathKey {
                name: name.to_string(),
                occurred_at: death.occurred_at_second(),
            };
            if entries.contains_key(&key) {
                continue;
            }
            entries.insert(key, now);
            emitted.push(death.clone());
        }
        emitted
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
