use std::time::Duration;

pub const TIBIADATA_WORLD_URL: &str = "https://api.tibiadata.com/v4/world";
pub const TIBIADATA_CHARACTER_URL: &str = "https://api.tibiadata.com/v4/character";
pub const TIBIADATA_GUILD_URL: &str = "https://api.tibiadata.com/v4/guild";
pub const TIBIA_WORLD_PAGE_URL: &str = "https://www.tibia.com/community/";

pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 300;
pub const MIN_TICK_INTERVAL_SECS: u64 = 60;
pub const MAX_TICK_INTERVAL_SECS: u64 = 86_400;
pub const DEFAULT_MIN_LEVEL_TRACK: u32 = 500;
pub const DEFAULT_CHANNEL_NAME_DEATHS: &str = "death-tracker";
pub const DEFAULT_CHANNEL_NAME_LEVELS: &str = "level-tracker";
pub const MAX_CHANNEL_NAME_LEN: usize = 100;
pub const DEFAULT_POOL_SIZE: usize = 10;
pub const MAX_POOL_SIZE: usize = 100;
pub const MIN_TOKEN_LEN: usize = 50;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

pub const API_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
pub const SCRAPE_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

pub const MEMBERSHIP_CACHE_TTL_SECS: i64 = 15 * 60;
pub const DEATH_LOG_TTL_SECS: i64 = 25 * 3600;
pub const DEATH_FRESHNESS_WINDOW_SECS: i64 = 2 * 3600;
pub const OFFLINE_STALE_SECS: i64 = 30 * 60;

pub const METRICS_PORT: u16 = 2112;

#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub database_url: String,
    pub tick_interval: Duration,
    pub min_level_track: u32,
    pub channel_name_deaths: String,
    pub channel_name_levels: String,
    pub pool_size: usize,
    pub use_scrape_for_levels: bool,
    pub discord_guild_id: Option<u64>,
    pub db_max_connections: u32,
}

impl Config {
    /// Load and validate every option from the environment. Problems are
    /// collected so a broken deployment reports all of them at once.
    pub fn from_env() -> Result<Config, Vec<String>> {
        let mut problems = Vec::new();

        let discord_token = match std::env::var("DISCORD_TOKEN") {
            Ok(token) if token.len() >= MIN_TOKEN_LEN => token,
            Ok(_) => {
                problems.push(format!(
                    "DISCORD_TOKEN is too short (expected at least {MIN_TOKEN_LEN} characters)"
                ));
                String::new()
            }
            Err(_) => {
                problems.push("DISCORD_TOKEN is required".to_string());
                String::new()
            }
        };

        let database_url = match std::env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => url,
            _ => {
                problems.push("DATABASE_URL is required".to_string());
                String::new()
            }
        };

        let tick_interval_secs = parse_bounded(
            "TICK_INTERVAL_SECS",
            DEFAULT_TICK_INTERVAL_SECS,
            MIN_TICK_INTERVAL_SECS..=MAX_TICK_INTERVAL_SECS,
            &mut problems,
        );

        let min_level_track = parse_bounded(
            "MIN_LEVEL_TRACK",
            u64::from(DEFAULT_MIN_LEVEL_TRACK),
            1..=u64::from(u32::MAX),
            &mut problems,
        ) as u32;

        let channel_name_deaths =
            channel_name("CHANNEL_NAME_DEATHS", DEFAULT_CHANNEL_NAME_DEATHS, &mut problems);
        let channel_name_levels =
            channel_name("CHANNEL_NAME_LEVELS", DEFAULT_CHANNEL_NAME_LEVELS, &mut problems);

        let pool_size = parse_bounded(
            "POOL_SIZE",
            DEFAULT_POOL_SIZE as u64,
            1..=MAX_POOL_SIZE as u64,
            &mut problems,
        ) as usize;

        let use_scrape_for_levels = match std::env::var("USE_SCRAPE_FOR_LEVELS") {
            Ok(value) => match parse_bool(&value) {
                Some(flag) => flag,
                None => {
                    problems.push(format!(
                        "USE_SCRAPE_FOR_LEVELS must be a boolean, got {value:?}"
                    ));
                    true
                }
            },
            Err(_) => true,
        };

        let discord_guild_id = match std::env::var("DISCORD_GUILD_ID") {
            Ok(value) => match value.parse::<u64>() {
                Ok(id) if id > 0 => Some(id),
                _ => {
                    problems.push(format!(
                        "DISCORD_GUILD_ID must be a positive integer, got {value:?}"
                    ));
                    None
                }
            },
            Err(_) => None,
        };

        let db_max_connections = parse_bounded(
            "DB_MAX_CONNECTIONS",
            u64::from(DEFAULT_DB_MAX_CONNECTIONS),
            1..=u64::from(u32::MAX),
            &mut problems,
        ) as u32;

        if !problems.is_empty() {
            return Err(problems);
        }

        Ok(Config {
            discord_token,
            database_url,
            tick_interval: Duration::from_secs(tick_interval_secs),
            min_level_track,
            channel_name_deaths,
            channel_name_levels,
            pool_size,
            use_scrape_for_levels,
            discord_guild_id,
            db_max_connections,
        })
    }
}

fn parse_bounded(
    key: &str,
    default: u64,
    bounds: std::ops::RangeInclusive<u64>,
    problems: &mut Vec<String>,
) -> u64 {
    match std::env::var(key) {
        Ok(value) => match value.parse::<u64>() {
            Ok(parsed) if bounds.contains(&parsed) => parsed,
            _ => {
                problems.push(format!(
                    "{key} must be an integer in [{}, {}], got {value:?}",
                    bounds.start(),
                    bounds.end()
                ));
                default
            }
        },
        Err(_) => default,
    }
}

fn channel_name(key: &str, default: &str, problems: &mut Vec<String>) -> String {
    match std::env::var(key) {
        Ok(name) => {
            let trimmed = name.trim();
            if trimmed.is_empty() || trimmed.len() > MAX_CHANNEL_NAME_LEN {
                problems.push(format!(
                    "{key} must be non-empty and at most {MAX_CHANNEL_NAME_LEN} characters"
                ));
                default.to_string()
            } else {
                trimmed.to_string()
            }
        }
        Err(_) => default.to_string(),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
