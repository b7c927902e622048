use serde::{Deserialize, Serialize};

/// One chat-guild's tracking configuration.
///
/// An empty `watched_guilds` list means the subscription watches every
/// character in its world; a non-empty list restricts notifications to
/// members of the listed in-game guilds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub chat_guild_id: u64,
    pub world: String,
    #[serde(default)]
    pub watched_guilds: Vec<String>,
}

impl Subscription {
    pub fn watches_whole_world(&self) -> bool {
        self.watched_guilds.is_empty()
    }
}
