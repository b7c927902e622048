//! Upstream clients: the TibiaData JSON API and the tibia.com world page.

pub mod scrape;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deathwatch_shared::{CharacterInfo, Death, OnlineMap, OnlinePlayer};
use serde::Deserialize;

use crate::config::{
    API_HTTP_TIMEOUT, SCRAPE_HTTP_TIMEOUT, TIBIADATA_CHARACTER_URL, TIBIADATA_GUILD_URL,
    TIBIADATA_WORLD_URL, TIBIA_WORLD_PAGE_URL, UPSTREAM_CONNECT_TIMEOUT,
};
use crate::error::{PortError, Result};
use crate::metrics::Metrics;
use crate::ports::Fetcher;

const USER_AGENT: &str = "deathwatch/0.1";

pub struct TibiaClient {
    api: reqwest::Client,
    scrape: reqwest::Client,
    metrics: Arc<Metrics>,
}

impl TibiaClient {
    pub fn new(metrics: Arc<Metrics>) -> Result<Self, String> {
        let api = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(API_HTTP_TIMEOUT)
            .connect_timeout(UPSTREAM_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| format!("failed to build JSON API client: {e}"))?;
        // The world page renders slowly under load; give the scrape path a
        // longer budget than the JSON API.
        let scrape = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(SCRAPE_HTTP_TIMEOUT)
            .connect_timeout(UPSTREAM_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| format!("failed to build scrape client: {e}"))?;

        Ok(Self {
            api,
            scrape,
            metrics,
        })
    }

    async fn get_api(&self, endpoint: &'static str, url: reqwest::Url) -> Result<Vec<u8>> {
        let started = Instant::now();
        let resp = match self.api.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                self.metrics
                    .record_upstream_request(endpoint, "error", started.elapsed());
                return Err(PortError::Upstream(format!("request failed: {e}")));
            }
        };

        let status = resp.status();
        let bytes = match resp.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.metrics
                    .record_upstream_request(endpoint, "error", started.elapsed());
                return Err(PortError::Upstream(format!(
                    "failed to read response body: {e}"
                )));
            }
        };
        self.metrics
            .record_upstream_request(endpoint, status.as_str(), started.elapsed());

        if !status.is_success() {
            return Err(PortError::Status {
                status: status.as_u16(),
                preview: body_preview(&bytes),
            });
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Fetcher for TibiaClient {
    async fn fetch_world(&self, world: &str) -> Result<Vec<OnlinePlayer>> {
        let url = endpoint_url(TIBIADATA_WORLD_URL, world)?;
        let bytes = self.get_api("world", url).await?;
        parse_world_payload(&bytes, world).map_err(|e| {
            PortError::Decode(format!(
                "world payload: {e}; body preview: {}",
                body_preview(&bytes)
            ))
        })
    }

    async fn fetch_world_via_scrape(&self, world: &str) -> Result<OnlineMap> {
        let started = Instant::now();
        let request = self
            .scrape
            .get(TIBIA_WORLD_PAGE_URL)
            .query(&[("subtopic", "worlds"), ("world", world)]);

        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                self.metrics
                    .record_scrape_request("error", started.elapsed());
                return Err(PortError::Upstream(format!("scrape request failed: {e}")));
            }
        };

        let status = resp.status();
        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => {
                self.metrics
                    .record_scrape_request("error", started.elapsed());
                return Err(PortError::Upstream(format!(
                    "failed to read world page body: {e}"
                )));
            }
        };
        self.metrics
            .record_scrape_request(status.as_str(), started.elapsed());

        if !status.is_success() {
            return Err(PortError::Status {
                status: status.as_u16(),
                preview: body_preview(body.as_bytes()),
            });
        }
        Ok(scrape::parse_world_page(&body))
    }

    async fn fetch_character(&self, name: &str) -> Result<CharacterInfo> {
        let url = endpoint_url(TIBIADATA_CHARACTER_URL, name)?;
        let bytes = self.get_api("character", url).await?;
        parse_character_payload(&bytes).map_err(|e| {
            PortError::Decode(format!(
                "character payload: {e}; body preview: {}",
                body_preview(&bytes)
            ))
        })
    }

    async fn fetch_guild_members(&self, guild: &str) -> Result<Vec<String>> {
        let url = endpoint_url(TIBIADATA_GUILD_URL, guild)?;
        let bytes = self.get_api("guild", url).await?;
        parse_guild_payload(&bytes).map_err(|e| {
            PortError::Decode(format!(
                "guild payload: {e}; body preview: {}",
                body_preview(&bytes)
            ))
        })
    }
}

fn endpoint_url(base: &str, segment: &str) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|e| PortError::Upstream(format!("invalid endpoint base {base:?}: {e}")))?;
    {
        let Ok(mut segments) = url.path_segments_mut() else {
            return Err(PortError::Upstream(format!(
                "endpoint base {base:?} cannot take a path segment"
            )));
        };
        segments.push(segment);
    }
    Ok(url)
}

fn body_preview(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).chars().take(200).collect()
}

#[derive(Deserialize)]
struct RawWorldResponse {
    #[serde(default)]
    world: Option<RawWorld>,
}

#[derive(Deserialize)]
struct RawWorld {
    #[serde(default)]
    online_players: Vec<RawOnlinePlayer>,
}

#[derive(Deserialize)]
struct RawOnlinePlayer {
    #[serde(default)]
    name: String,
    #[serde(default)]
    level: i64,
    #[serde(default)]
    vocation: Option<String>,
}

fn parse_world_payload(bytes: &[u8], world: &str) -> Result<Vec<OnlinePlayer>, serde_json::Error> {
    let raw: RawWorldResponse = serde_json::from_slice(bytes)?;
    let players = raw
        .world
        .map(|w| w.online_players)
        .unwrap_or_default()
        .into_iter()
        .filter(|p| !p.name.trim().is_empty() && p.level >= 1)
        .map(|p| OnlinePlayer {
            name: p.name,
            level: p.level as u32,
            vocation: p.vocation.filter(|v| !v.is_empty()),
            world: world.to_string(),
        })
        .collect();
    Ok(players)
}

#[derive(Deserialize)]
struct RawCharacterResponse {
    #[serde(default)]
    character: Option<RawCharacterEnvelope>,
}

#[derive(Deserialize)]
struct RawCharacterEnvelope {
    #[serde(default)]
    character: Option<RawCharacter>,
    #[serde(default)]
    deaths: Vec<RawDeath>,
}

#[derive(Deserialize)]
struct RawCharacter {
    #[serde(default)]
    name: String,
    #[serde(default)]
    level: i64,
    #[serde(default)]
    vocation: Option<String>,
    #[serde(default)]
    world: String,
}

#[derive(Deserialize)]
struct RawDeath {
    #[serde(default)]
    time: String,
    #[serde(default)]
    level: i64,
    #[serde(default)]
    reason: String,
}

fn parse_character_payload(bytes: &[u8]) -> Result<CharacterInfo, String> {
    let raw: RawCharacterResponse =
        serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
    let Some(envelope) = raw.character else {
        return Err("character envelope missing from payload".to_string());
    };
    let Some(character) = envelope.character else {
        return Err("character record missing from payload".to_string());
    };
    if character.name.trim().is_empty() {
        return Err("character record carries no name".to_string());
    }

    // Individual malformed death records are dropped; the rest of the
    // history is still usable.
    let deaths = envelope
        .deaths
        .into_iter()
        .filter_map(|death| {
            let time = parse_death_time(&death.time)?;
            if death.level < 1 {
                return None;
            }
            Some(Death {
                time,
                level: death.level as u32,
                reason: death.reason,
            })
        })
        .collect();

    Ok(CharacterInfo {
        name: character.name,
        level: character.level.max(0) as u32,
        vocation: character.vocation.filter(|v| !v.is_empty()),
        world: character.world,
        deaths,
    })
}

fn parse_death_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Deserialize)]
struct RawGuildResponse {
    #[serde(default)]
    guild: Option<RawGuild>,
}

#[derive(Deserialize)]
struct RawGuild {
    #[serde(default)]
    members: Vec<RawGuildMember>,
}

#[derive(Deserialize)]
struct RawGuildMember {
    #[serde(default)]
    name: String,
}

fn parse_guild_payload(bytes: &[u8]) -> Result<Vec<String>, serde_json::Error> {
    let raw: RawGuildResponse = serde_json::from_slice(bytes)?;
    Ok(raw
        .guild
        .map(|g| g.members)
        .unwrap_or_default()
        .into_iter()
        .map(|member| member.name)
        .filter(|name| !name.trim().is_empty())
        .collect())
}
