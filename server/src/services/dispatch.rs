use std::collections::{HashMap, HashSet};

use deathwatch_shared::{Subscription, TrackEvent};
use tracing::warn;

use crate::metrics::Metrics;
use crate::ports::Notifier;

/// Membership snapshot for one world tick: game-guild name -> member set.
/// Guilds whose roster could not be resolved are simply absent.
pub type MembershipSnapshot = HashMap<String, HashSet<String>>;

/// Allow-list rule: an empty list watches the whole world; a non-empty list
/// matches when the character appears in any of the listed guilds' rosters.
pub fn should_notify(
    sub: &Subscription,
    character: &str,
    memberships: &MembershipSnapshot,
) -> bool {
    if sub.watches_whole_world() {
        return true;
    }
    sub.watched_guilds.iter().any(|guild| {
        memberships
            .get(guild)
            .is_some_and(|members| members.contains(character))
    })
}

/// Deliver one event to every matching subscription. A failed delivery is
/// logged and counted; it never blocks the remaining chat-guilds.
pub async fn dispatch(
    event: &TrackEvent,
    subs: &[Subscription],
    memberships: &MembershipSnapshot,
    notifier: &dyn Notifier,
    metrics: &Metrics,
) {
    for sub in subs {
        if !should_notify(sub, event.character(), memberships) {
            continue;
        }

        let (kind, delivered) = match event {
            TrackEvent::Death { name, death } => (
                "death",
                notifier.notify_death(sub.chat_guild_id, name, death).await,
            ),
            TrackEvent::LevelUp(level_up) => (
                "level_up",
                notifier.notify_level_up(sub.chat_guild_id, level_up).await,
            ),
        };

        match delivered {
            Ok(()) => metrics.record_notification(kind, true),
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                metrics.record_notification(kind, false);
                warn!(
                    chat_guild_id = sub.chat_guild_id,
                    error = %e,
                    "notification delivery failed"
                );
            }
        }
    }
}
