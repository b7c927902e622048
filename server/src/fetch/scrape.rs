//! Parser for the tibia.com world page.
//!
//! Roster rows are `<tr>` elements whose class is exactly `Odd` or `Even`.
//! The first cell links to the character page and carries the name in the
//! `name=` query parameter; the second cell is the level. Anything that
//! deviates from that shape is skipped without comment — the page carries
//! plenty of unrelated rows.

use std::sync::LazyLock;

use deathwatch_shared::OnlineMap;
use scraper::{Html, Selector};

static TR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr").expect("static selector"));
static TD_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td").expect("static selector"));
static A_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a").expect("static selector"));

pub fn parse_world_page(html: &str) -> OnlineMap {
    let document = Html::parse_document(html);
    let mut online = OnlineMap::new();

    for row in document.select(&TR_SELECTOR) {
        if !matches!(row.value().attr("class"), Some("Odd") | Some("Even")) {
            continue;
        }

        let mut cells = row.select(&TD_SELECTOR);
        let (Some(name_cell), Some(level_cell)) = (cells.next(), cells.next()) else {
            continue;
        };

        let Some(name) = name_cell
            .select(&A_SELECTOR)
            .filter_map(|anchor| anchor.value().attr("href"))
            .find_map(name_query_param)
        else {
            continue;
        };

        let level_text = level_cell.text().collect::<String>();
        let Ok(level) = level_text.trim().parse::<u32>() else {
            continue;
        };

        online.insert(name, level);
    }

    online
}

/// Decoded value of the `name=` query parameter, if the href carries one.
fn name_query_param(href: &str) -> Option<String> {
    let (_, query) = href.split_once('?').unwrap_or(("", href));
    for pair in query.split('&') {
        if let Some(raw) = pair.strip_prefix("name=") {
            // Query components encode spaces as '+' before percent-escapes.
            let raw = raw.replace('+', " ");
            return urlencoding::decode(&raw).ok().map(|name| name.into_owned());
        }
    }
    None
}
