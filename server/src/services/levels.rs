use deathwatch_shared::LevelUp;

/// Outcome of comparing one observation against the stored baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelDecision {
    /// Level to persist, when the observation should move the baseline.
    pub store_level: Option<u32>,
    pub event: Option<LevelUp>,
}

/// Decide what an observed level means relative to the baseline.
///
/// The baseline only ever moves upward: the upstream transiently reports
/// stale cached levels, so a downward observation is noise, not a change.
/// A first-ever observation establishes the baseline silently.
pub fn assess(name: &str, world: &str, baseline: Option<u32>, observed: u32) -> LevelDecision {
    match baseline {
        None => LevelDecision {
            store_level: Some(observed),
            event: None,
        },
        Some(stored) if observed > stored => LevelDecision {
            store_level: Some(observed),
            event: Some(LevelUp {
                name: name.to_string(),
                world: world.to_string(),
                old_level: stored,
                new_level: observed,
            }),
        },
        Some(_) => LevelDecision {
            store_level: None,
            event: None,
        },
    }
}
