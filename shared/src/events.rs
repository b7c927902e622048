use serde::{Deserialize, Serialize};

use crate::player::Death;

/// A character crossed its stored baseline upward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelUp {
    pub name: String,
    pub world: String,
    pub old_level: u32,
    pub new_level: u32,
}

/// An event produced by one world tick, ready for per-subscription dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TrackEvent {
    Death { name: String, death: Death },
    LevelUp(LevelUp),
}

impl TrackEvent {
    /// Character the event is about, used for allow-list filtering.
    pub fn character(&self) -> &str {
        match self {
            TrackEvent::Death { name, .. } => name,
            TrackEvent::LevelUp(event) => &event.name,
        }
    }
}
