use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Online roster of one world: character name -> last reported level.
pub type OnlineMap = HashMap<String, u32>;

/// One entry of a world's online roster as reported by the JSON API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlinePlayer {
    pub name: String,
    pub level: u32,
    #[serde(default)]
    pub vocation: Option<String>,
    pub world: String,
}

/// A character enriched through the per-character endpoint.
///
/// The death list is reported newest-first by the upstream, but nothing
/// downstream may rely on that order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterInfo {
    pub name: String,
    pub level: u32,
    #[serde(default)]
    pub vocation: Option<String>,
    pub world: String,
    #[serde(default)]
    pub deaths: Vec<Death>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Death {
    pub time: DateTime<Utc>,
    pub level: u32,
    pub reason: String,
}

impl Death {
    /// Death timestamp at second granularity, the identity component used
    /// for deduplication.
    pub fn occurred_at_second(&self) -> i64 {
        self.time.timestamp()
    }
}
