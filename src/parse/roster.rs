//! Roster extraction chain. Strategies run in order of fidelity and the
//! first one producing at least one usable name wins; every page layout in
//! the wild falls into one of these buckets.

use std::sync::LazyLock;

use compact_str::ToCompactString;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

use super::normalize::{
    normalize_class_year, parse_bats_throws, parse_height_inches, parse_weight_lbs, position_set,
};
use super::{flatten_table, payload, visible_text, RosterRecord, Table};

/// A roster should have 15-55 players; past that we likely swept up staff
/// or a combined page.
const SUSPICIOUS_ROSTER_SIZE: usize = 60;

pub const STRATEGIES: &[(&str, fn(&str, &Html) -> Vec<RosterRecord>)] = &[
    ("payload", |html, _| payload::roster(html)),
    ("labeled-table", |_, doc| labeled_table(doc)),
    ("generic-table", |_, doc| generic_table(doc)),
    ("player-cards", |_, doc| player_cards(doc)),
    ("json-ld", |_, doc| json_ld(doc)),
];

/// Runs the chain; returns the records plus the name of the strategy that
/// produced them.
#[must_use]
pub fn parse(html: &str) -> Option<(Vec<RosterRecord>, &'static str)> {
    let doc = Html::parse_document(html);
    for &(strategy, run) in STRATEGIES {
        let records = run(html, &doc);
        if records.is_empty() {
            continue;
        }
        if records.len() > SUSPICIOUS_ROSTER_SIZE {
            tracing::warn!(
                target: "parse",
                "roster has {} entries via {strategy}, may include non-players",
                records.len(),
            );
        }
        tracing::debug!(target: "parse", "{} roster entries via {strategy}", records.len());
        return Some((records, strategy));
    }
    None
}

fn sel(s: &str) -> Selector {
    Selector::parse(s).expect("static selector")
}

// ── table strategies ─────────────────────────────────────────────────

fn class_matches(class: &str, needles: &[&str]) -> bool {
    let lower = class.to_ascii_lowercase();
    needles.iter().any(|n| lower.contains(n))
}

/// Tables whose class says they are the roster.
fn labeled_table(doc: &Html) -> Vec<RosterRecord> {
    let table_sel = sel("table");
    for el in doc.select(&table_sel) {
        let class = el.attr("class").unwrap_or_default();
        if !class_matches(class, &["roster", "sidearm-table"]) {
            continue;
        }
        let records = records_from_table(&flatten_table(el));
        if !records.is_empty() {
            return records;
        }
    }
    Vec::new()
}

/// Any table with player-like headers and enough rows to be a real roster.
fn generic_table(doc: &Html) -> Vec<RosterRecord> {
    let table_sel = sel("table");
    for el in doc.select(&table_sel) {
        let table = flatten_table(el);
        let player_like = table
            .headers
            .iter()
            .any(|h| matches!(h.as_str(), "name" | "player" | "no" | "#"));
        if !player_like || table.rows.len() < 5 {
            continue;
        }
        let records = records_from_table(&table);
        if !records.is_empty() {
            return records;
        }
    }
    Vec::new()
}

#[derive(Debug, Default)]
struct ColumnMap {
    name: Option<usize>,
    jersey: Option<usize>,
    position: Option<usize>,
    class_year: Option<usize>,
    bats_throws: Option<usize>,
    height: Option<usize>,
    weight: Option<usize>,
    hometown: Option<usize>,
    high_school: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &[String]) -> Self {
        let mut map = Self::default();
        for (i, h) in headers.iter().enumerate() {
            let h = h.replace('#', "no");
            let h = h.trim();
            if h == "name" || h == "player" || (h.contains("name") && !h.contains("team")) {
                map.name.get_or_insert(i);
            } else if matches!(h, "no" | "number" | "num") {
                map.jersey.get_or_insert(i);
            } else if h.contains("pos") && !h.contains("previous") {
                map.position.get_or_insert(i);
            } else if matches!(h, "yr" | "cl" | "class" | "elig" | "eligibility")
                || h.contains("year")
            {
                map.class_year.get_or_insert(i);
            } else if matches!(h, "bt" | "b/t" | "b-t") {
                map.bats_throws.get_or_insert(i);
            } else if matches!(h, "ht" | "height") {
                map.height.get_or_insert(i);
            } else if matches!(h, "wt" | "weight") {
                map.weight.get_or_insert(i);
            } else if h.contains("hometown") {
                map.hometown.get_or_insert(i);
            } else if h.contains("high school") || h == "hs" || h.contains("previous") {
                map.high_school.get_or_insert(i);
            }
        }
        map
    }
}

fn records_from_table(table: &Table) -> Vec<RosterRecord> {
    let map = ColumnMap::from_headers(&table.headers);
    let Some(name_idx) = map.name else {
        return Vec::new();
    };

    let mut records = Vec::new();
    for row in &table.rows {
        if row.len() < 2 {
            continue;
        }
        let Some(name_cell) = row.get(name_idx) else {
            continue;
        };
        let Some(mut record) = RosterRecord::from_name(&name_cell.name()) else {
            continue;
        };
        record.profile_url = name_cell.href.clone();

        let text = |idx: Option<usize>| {
            idx.and_then(|i| row.get(i))
                .map(|c| c.text.as_str())
                .filter(|t| !t.is_empty() && *t != "-")
        };
        if let Some(v) = text(map.jersey) {
            record.jersey_number = Some(v.to_compact_string());
        }
        if let Some(v) = text(map.position) {
            record.positions = position_set(v);
        }
        if let Some(v) = text(map.class_year) {
            record.class_year = normalize_class_year(v);
        }
        if let Some((b, t)) = text(map.bats_throws).and_then(parse_bats_throws) {
            record.bats = Some(b);
            record.throws = Some(t);
        }
        record.height_inches = text(map.height).and_then(parse_height_inches);
        record.weight_lbs = text(map.weight).and_then(parse_weight_lbs);
        record.hometown = text(map.hometown).map(str::to_owned);
        record.high_school = text(map.high_school).map(str::to_owned);

        records.push(record);
    }
    records
}

// ── card strategy ────────────────────────────────────────────────────

static CLASS_YEAR_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(Fr\.|So\.|Jr\.|Sr\.|Gr\.|Freshman|Sophomore|Junior|Senior|Graduate)")
        .unwrap()
});
static HEIGHT_TEXT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d-\d{1,2}$").unwrap());
static WEIGHT_TEXT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{3}$").unwrap());
static BT_TEXT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^[RLS]/[RLS]$").unwrap());

const CARD_CLASSES: &[&str] = &["sidearm-roster-player", "roster-player", "s-person-card"];

fn is_player_card(el: ElementRef<'_>) -> bool {
    el.attr("class").is_some_and(|c| {
        c.split_ascii_whitespace()
            .any(|c| CARD_CLASSES.contains(&c))
    })
}

/// Card/list roster layouts. Exact class-token match so share widgets and
/// header blocks do not get swept in.
fn player_cards(doc: &Html) -> Vec<RosterRecord> {
    let card_sel = sel("li, div");
    let heading_sel = sel("h3, h4, a");
    let any_heading_sel = sel("h3, h4");
    let detail_sel = sel("span, div");

    let mut records = Vec::new();
    for card in doc.select(&card_sel).filter(|el| is_player_card(*el)) {
        let name_el = card
            .select(&heading_sel)
            .find(|el| {
                el.attr("class")
                    .is_some_and(|c| class_matches(c, &["name", "title"]))
            })
            .or_else(|| card.select(&any_heading_sel).next());
        let Some(name_el) = name_el else { continue };
        let Some(mut record) = RosterRecord::from_name(&visible_text(name_el)) else {
            continue;
        };
        if name_el.value().name() == "a" {
            record.profile_url = name_el.attr("href").map(str::to_owned);
        }

        let classed = |needles: &[&str]| {
            card.select(&detail_sel).find(|el| {
                el.attr("class").is_some_and(|c| class_matches(c, needles))
            })
        };
        if let Some(el) = classed(&["number", "jersey"]) {
            let num = visible_text(el).replace('#', "");
            if !num.is_empty() {
                record.jersey_number = Some(num.to_compact_string());
            }
        }
        if let Some(el) = classed(&["position"]) {
            record.positions = position_set(&visible_text(el));
        }

        for detail in card.select(&detail_sel).filter(|el| {
            el.attr("class")
                .is_some_and(|c| class_matches(c, &["detail", "info", "meta"]))
        }) {
            let text = visible_text(detail);
            if CLASS_YEAR_TEXT.is_match(&text) {
                record.class_year = normalize_class_year(&text);
            } else if HEIGHT_TEXT.is_match(&text) {
                record.height_inches = parse_height_inches(&text);
            } else if WEIGHT_TEXT.is_match(&text) {
                record.weight_lbs = parse_weight_lbs(&text);
            } else if BT_TEXT.is_match(&text) {
                if let Some((b, t)) = parse_bats_throws(&text) {
                    record.bats = Some(b);
                    record.throws = Some(t);
                }
            }
        }

        records.push(record);
    }
    records
}

// ── embedded metadata strategy ───────────────────────────────────────

/// Schema.org Person entries in ld+json scripts; names only, but enough to
/// seed a roster on pages with no markup at all.
fn json_ld(doc: &Html) -> Vec<RosterRecord> {
    let script_sel = sel("script[type=\"application/ld+json\"]");
    let mut records = Vec::new();
    for script in doc.select(&script_sel) {
        let body: String = script.text().collect();
        let Ok(data) = serde_json::from_str::<Value>(&body) else {
            continue;
        };

        let items: Vec<Value> = match data {
            Value::Array(items) => items,
            Value::Object(ref obj) if obj.get("@type").and_then(Value::as_str) == Some("ItemList") => {
                obj.get("itemListElement")
                    .and_then(Value::as_array)
                    .map(|els| {
                        els.iter()
                            .map(|el| el.get("item").unwrap_or(el).clone())
                            .collect()
                    })
                    .unwrap_or_default()
            }
            obj @ Value::Object(_) => vec![obj],
            _ => continue,
        };

        for item in items {
            let Some(obj) = item.as_object() else { continue };
            if obj.get("@type").and_then(Value::as_str) != Some("Person") {
                continue;
            }
            let Some(name) = obj.get("name").and_then(Value::as_str) else {
                continue;
            };
            if let Some(record) = RosterRecord::from_name(name) {
                records.push(record);
            }
        }
    }
    records
}
