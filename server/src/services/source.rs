use deathwatch_shared::OnlineMap;
use tracing::warn;

use crate::ports::Fetcher;

/// Which source produced the online roster. The paths differ downstream:
/// scrape levels are authoritative, API roster levels are re-checked during
/// enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Scrape,
    Api,
}

/// Fetch the online roster for `world`, preferring the world-page scrape
/// when configured and falling back to the JSON API. Total failure yields an
/// empty roster; the tick continues with maintenance only.
pub async fn fetch_online(
    fetcher: &dyn Fetcher,
    world: &str,
    use_scrape: bool,
) -> (OnlineMap, SourceKind) {
    if use_scrape {
        match fetcher.fetch_world_via_scrape(world).await {
            Ok(online) => return (online, SourceKind::Scrape),
            Err(e) => {
                warn!(world, error = %e, "world page scrape failed; falling back to JSON API");
            }
        }
    }

    match fetcher.fetch_world(world).await {
        Ok(players) => {
            let online = players
                .into_iter()
                .map(|player| (player.name, player.level))
                .collect();
            (online, SourceKind::Api)
        }
        Err(e) => {
            warn!(world, error = %e, "online roster unavailable from every source");
            (OnlineMap::new(), SourceKind::Api)
        }
    }
}
