//! Slash-command surface for configuring subscriptions.
//!
//! Command failures only ever produce an ephemeral reply; the tracking
//! engine is never blocked by anything that happens here.

use std::sync::Arc;

use deathwatch_shared::Subscription;
use serenity::all::{
    Command, CommandInteraction, CommandOptionType, Context, CreateCommand, CreateCommandOption,
    CreateInteractionResponse, CreateInteractionResponseMessage, EventHandler, GuildId,
    Interaction, Ready, ResolvedOption, ResolvedValue,
};
use serenity::async_trait;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::ports::{Notifier, Store};

pub struct Handler {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    config: Arc<Config>,
}

impl Handler {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, config: Arc<Config>) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, "discord gateway connected");

        let definitions = command_definitions();
        let registered = match self.config.discord_guild_id {
            Some(guild_id) => {
                GuildId::new(guild_id)
                    .set_commands(&ctx.http, definitions)
                    .await
            }
            None => Command::set_global_commands(&ctx.http, definitions).await,
        };
        match registered {
            Ok(commands) => info!(count = commands.len(), "slash commands registered"),
            Err(e) => error!(error = %e, "failed to register slash commands"),
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };

        let content = match self.answer(&command).await {
            Ok(content) => content,
            Err(e) => {
                warn!(command = %command.data.name, error = %e, "command failed");
                "Something went wrong while saving your configuration. Try again in a moment."
                    .to_string()
            }
        };

        let response = CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new()
                .content(content)
                .ephemeral(true),
        );
        if let Err(e) = command.create_response(&ctx.http, response).await {
            warn!(error = %e, "failed to answer interaction");
        }
    }
}

impl Handler {
    async fn answer(&self, command: &CommandInteraction) -> Result<String> {
        let Some(guild_id) = command.guild_id else {
            return Ok("These commands only work inside a server.".to_string());
        };
        if let Some(scope) = self.config.discord_guild_id
            && scope != guild_id.get()
        {
            return Ok("This bot is configured for a different server.".to_string());
        }

        let Some(request) = parse(command) else {
            return Ok(format!("Unknown command `{}`.", command.data.name));
        };
        execute(
            self.store.as_ref(),
            self.notifier.as_ref(),
            &self.config,
            guild_id.get(),
            request,
        )
        .await
    }
}

/// A parsed configuration request, separated from the interaction plumbing
/// so the behavior is testable against the store alone.
#[derive(Debug, PartialEq)]
pub(crate) enum Request<'a> {
    Track { world: &'a str },
    Untrack,
    GuildsAdd { name: &'a str },
    GuildsRemove { name: &'a str },
    GuildsList,
    Status,
}

fn parse(command: &CommandInteraction) -> Option<Request<'_>> {
    let options = command.data.options();
    match command.data.name.as_str() {
        "track" => string_option(&options, "world").map(|world| Request::Track { world }),
        "untrack" => Some(Request::Untrack),
        "guilds" => {
            let (name, inner) = subcommand(&options)?;
            match name {
                "add" => string_option(&inner, "name").map(|name| Request::GuildsAdd { name }),
                "remove" => {
                    string_option(&inner, "name").map(|name| Request::GuildsRemove { name })
                }
                "list" => Some(Request::GuildsList),
                _ => None,
            }
        }
        "status" => Some(Request::Status),
        _ => None,
    }
}

pub(crate) async fn execute(
    store: &dyn Store,
    notifier: &dyn Notifier,
    config: &Config,
    chat_guild_id: u64,
    request: Request<'_>,
) -> Result<String> {
    match request {
        Request::Track { world } => {
            let world = world.trim();
            if world.is_empty() {
                return Ok("The world name cannot be empty.".to_string());
            }
            // Re-pointing a subscription keeps its allow-list.
            let watched_guilds = store
                .subscription(chat_guild_id)
                .await?
                .map(|sub| sub.watched_guilds)
                .unwrap_or_default();
            store
                .save_subscription(&Subscription {
                    chat_guild_id,
                    world: world.to_string(),
                    watched_guilds,
                })
                .await?;
            // Announcing into the deaths channel also provisions it before
            // the first event; a failed post must not fail the command.
            if let Err(e) = notifier
                .send_generic(
                    chat_guild_id,
                    &config.channel_name_deaths,
                    &format!("Deathwatch is now tracking **{world}**."),
                )
                .await
            {
                warn!(chat_guild_id, error = %e, "failed to announce tracking start");
            }
            Ok(format!(
                "Tracking **{world}**. Deaths go to `#{}`, level-ups to `#{}`.",
                config.channel_name_deaths, config.channel_name_levels
            ))
        }
        Request::Untrack => {
            store.delete_subscription(chat_guild_id).await?;
            Ok("No longer tracking any world.".to_string())
        }
        Request::GuildsAdd { name } => match store.subscription(chat_guild_id).await? {
            Some(_) => {
                store.add_watched_guild(chat_guild_id, name).await?;
                Ok(format!("Only members of listed guilds are announced; added **{name}**."))
            }
            None => Ok("Track a world first with `/track`.".to_string()),
        },
        Request::GuildsRemove { name } => {
            store.remove_watched_guild(chat_guild_id, name).await?;
            Ok(format!("Removed **{name}** from the guild list."))
        }
        Request::GuildsList => match store.subscription(chat_guild_id).await? {
            Some(sub) if !sub.watched_guilds.is_empty() => Ok(format!(
                "Announcing members of: {}.",
                sub.watched_guilds.join(", ")
            )),
            Some(_) => Ok("No guild filter configured; every character in the world is announced.".to_string()),
            None => Ok("Nothing is tracked here yet. Start with `/track`.".to_string()),
        },
        Request::Status => match store.subscription(chat_guild_id).await? {
            Some(sub) => {
                let filter = if sub.watched_guilds.is_empty() {
                    "everyone".to_string()
                } else {
                    sub.watched_guilds.join(", ")
                };
                Ok(format!(
                    "Tracking **{}** (filter: {filter}). Deaths: `#{}`, level-ups: `#{}`.",
                    sub.world, config.channel_name_deaths, config.channel_name_levels
                ))
            }
            None => Ok("Nothing is tracked here yet. Start with `/track`.".to_string()),
        },
    }
}

fn string_option<'a>(options: &[ResolvedOption<'a>], name: &str) -> Option<&'a str> {
    options.iter().find_map(|option| match option.value {
        ResolvedValue::String(value) if option.name == name => Some(value),
        _ => None,
    })
}

fn subcommand<'a, 'b>(
    options: &'b [ResolvedOption<'a>],
) -> Option<(&'a str, Vec<ResolvedOption<'a>>)> {
    options.iter().find_map(|option| match &option.value {
        ResolvedValue::SubCommand(inner) => Some((option.name, inner.clone())),
        _ => None,
    })
}

fn command_definitions() -> Vec<CreateCommand> {
    vec![
        CreateCommand::new("track")
            .description("Track a game world in this server")
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "world", "World to watch")
                    .required(true),
            ),
        CreateCommand::new("untrack").description("Stop tracking the current world"),
        CreateCommand::new("guilds")
            .description("Manage which in-game guilds are announced")
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "add",
                    "Announce members of this guild",
                )
                .add_sub_option(
                    CreateCommandOption::new(CommandOptionType::String, "name", "Guild name")
                        .required(true),
                ),
            )
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "remove",
                    "Stop announcing members of this guild",
                )
                .add_sub_option(
                    CreateCommandOption::new(CommandOptionType::String, "name", "Guild name")
                        .required(true),
                ),
            )
            .add_option(CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "list",
                "Show the guild filter",
            )),
        CreateCommand::new("status").description("Show the tracking configuration"),
    ]
}
