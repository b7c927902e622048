use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use deathwatch_shared::{Death, LevelUp};
use serenity::all::{
    ChannelId, ChannelType, CreateChannel, CreateEmbed, CreateMessage, GuildId, Http, Timestamp,
};

use crate::error::{PortError, Result};
use crate::ports::Notifier;

const DEATH_COLOUR: u32 = 0x99_2D22;
const LEVEL_COLOUR: u32 = 0x1F_8B4C;

/// Notifier implementation over the Discord REST API.
///
/// Channels are resolved by name within each chat-guild and created as text
/// channels when absent; resolved ids are cached per (guild, name).
pub struct DiscordNotifier {
    http: Arc<Http>,
    channel_name_deaths: String,
    channel_name_levels: String,
    channels: DashMap<(u64, String), ChannelId>,
}

impl DiscordNotifier {
    pub fn new(http: Arc<Http>, channel_name_deaths: String, channel_name_levels: String) -> Self {
        Self {
            http,
            channel_name_deaths,
            channel_name_levels,
            channels: DashMap::new(),
        }
    }

    async fn channel_for(&self, chat_guild_id: u64, name: &str) -> Result<ChannelId> {
        if let Some(id) = self.channels.get(&(chat_guild_id, name.to_string())) {
            return Ok(*id);
        }

        let guild = GuildId::new(chat_guild_id);
        let channels = guild
            .channels(&self.http)
            .await
            .map_err(|e| PortError::Notify(format!("list channels of {chat_guild_id}: {e}")))?;

        let id = match channels.values().find(|channel| channel.name == name) {
            Some(channel) => channel.id,
            None => {
                guild
                    .create_channel(
                        &self.http,
                        CreateChannel::new(name).kind(ChannelType::Text),
                    )
                    .await
                    .map_err(|e| PortError::Notify(format!("create channel {name:?}: {e}")))?
                    .id
            }
        };

        self.channels.insert((chat_guild_id, name.to_string()), id);
        Ok(id)
    }

    async fn send(&self, chat_guild_id: u64, channel_name: &str, message: CreateMessage) -> Result<()> {
        let channel = self.channel_for(chat_guild_id, channel_name).await?;
        if let Err(e) = channel.send_message(&self.http, message).await {
            // The cached channel may have been deleted out from under us;
            // forget it so the next attempt re-resolves.
            self.channels
                .remove(&(chat_guild_id, channel_name.to_string()));
            return Err(PortError::Notify(format!(
                "send to {channel_name:?} in {chat_guild_id}: {e}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify_level_up(&self, chat_guild_id: u64, event: &LevelUp) -> Result<()> {
        let embed = CreateEmbed::new()
            .title(format!("{} advanced to level {}", event.name, event.new_level))
            .description(format!(
                "**{}** advanced from level {} to **{}** on {}.",
                event.name, event.old_level, event.new_level, event.world
            ))
            .colour(LEVEL_COLOUR);
        self.send(
            chat_guild_id,
            &self.channel_name_levels,
            CreateMessage::new().embed(embed),
        )
        .await
    }

    async fn notify_death(&self, chat_guild_id: u64, name: &str, death: &Death) -> Result<()> {
        let embed = CreateEmbed::new()
            .title(format!("{name} died"))
            .description(format!(
                "**{name}** died at level {} to {}.",
                death.level, death.reason
            ))
            .timestamp(Timestamp::from_unix_timestamp(death.time.timestamp()).unwrap())
            .colour(DEATH_COLOUR);
        self.send(
            chat_guild_id,
            &self.channel_name_deaths,
            CreateMessage::new().embed(embed),
        )
        .await
    }

    async fn send_generic(&self, chat_guild_id: u64, channel: &str, text: &str) -> Result<()> {
        self.send(chat_guild_id, channel, CreateMessage::new().content(text))
            .await
    }
}
