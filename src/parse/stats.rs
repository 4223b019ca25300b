//! Season-stats extraction chain: hydration payload, then tables labeled by
//! id/class/heading, then a scored sweep over every table on the page.
//!
//! The scored sweep has to separate stat tables from the roster table that
//! usually sits on the same page: a table only classifies as batting or
//! pitching when it clears a minimum indicator count AND carries more stat
//! headers than roster headers. A roster with an AVG column stays a roster.

use scraper::{ElementRef, Html, Node, Selector};

use super::normalize::{
    looks_like_stat_value, parse_count, parse_innings, parse_rate, split_composite,
};
use super::{flatten_table, payload, visible_text, BattingLine, PitchingLine, Table, TeamStats};

const BATTING_INDICATORS: &[&str] = &["avg", "ab", "rbi", "slg", "obp", "ops"];
const PITCHING_INDICATORS: &[&str] = &["era", "ip", "whip", "sv", "gs"];
const ROSTER_INDICATORS: &[&str] = &[
    "ht", "wt", "height", "weight", "hometown", "class", "yr", "cl", "b/t", "high school", "pos",
];

/// A table must show at least this many category headers to classify.
const MIN_INDICATORS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Batting,
    Pitching,
}

/// Runs the chain; the payload strategy fills both categories at once, the
/// table strategies locate each category independently.
#[must_use]
pub fn parse(html: &str) -> Option<(TeamStats, &'static str)> {
    let from_payload = payload::stats(html);
    if !from_payload.is_empty() {
        return Some((from_payload, "payload"));
    }

    // Each category falls back independently; a page may label its batting
    // table and leave pitching to the scorer.
    let doc = Html::parse_document(html);
    let tables = super::page_tables(&doc);
    let mut out = TeamStats::default();
    let mut used_scorer = false;

    if let Some(table) = labeled_table(&doc, Category::Batting) {
        out.batting = batting_rows(&table);
    } else if let Some(table) = best_scored(&tables, Category::Batting) {
        out.batting = batting_rows(table);
        used_scorer = true;
    }
    if let Some(table) = labeled_table(&doc, Category::Pitching) {
        out.pitching = pitching_rows(&table);
    } else if let Some(table) = best_scored(&tables, Category::Pitching) {
        out.pitching = pitching_rows(table);
        used_scorer = true;
    }

    if out.is_empty() {
        return None;
    }
    let strategy = if used_scorer { "scored-table" } else { "labeled-table" };
    tracing::debug!(
        target: "parse",
        "{strategy} stats: {} batting, {} pitching",
        out.batting.len(),
        out.pitching.len(),
    );
    Some((out, strategy))
}

fn sel(s: &str) -> Selector {
    Selector::parse(s).expect("static selector")
}

// ── table location ───────────────────────────────────────────────────

const fn category_needles(category: Category) -> &'static [&'static str] {
    match category {
        Category::Batting => &["batting", "hitting", "offensive"],
        Category::Pitching => &["pitching"],
    }
}

fn attr_matches(el: ElementRef<'_>, attr: &str, needles: &[&str]) -> bool {
    el.attr(attr).is_some_and(|v| {
        let lower = v.to_ascii_lowercase();
        needles.iter().any(|n| lower.contains(n))
    })
}

/// Table labeled by its own id/class, by an enclosing labeled section, or by
/// the nearest heading before it in document order.
fn labeled_table(doc: &Html, category: Category) -> Option<Table> {
    let needles = category_needles(category);
    let table_sel = sel("table");
    let section_sel = sel("section");

    for el in doc.select(&table_sel) {
        if attr_matches(el, "id", needles) || attr_matches(el, "class", needles) {
            return Some(flatten_table(el));
        }
    }
    for section in doc.select(&section_sel) {
        if attr_matches(section, "id", needles) {
            if let Some(el) = section.select(&table_sel).next() {
                return Some(flatten_table(el));
            }
        }
    }

    // Heading followed (in document order) by a table.
    let mut after_heading = false;
    for node in doc.root_element().descendants() {
        let Node::Element(e) = node.value() else {
            continue;
        };
        let Some(el) = ElementRef::wrap(node) else {
            continue;
        };
        match e.name() {
            "h2" | "h3" | "h4" => {
                let text = visible_text(el).to_ascii_lowercase();
                after_heading = needles.iter().any(|n| text.contains(n));
            }
            "table" if after_heading => return Some(flatten_table(el)),
            _ => {}
        }
    }
    None
}

fn indicator_count(table: &Table, indicators: &[&str]) -> usize {
    table
        .headers
        .iter()
        .filter(|h| indicators.contains(&h.as_str()))
        .count()
}

/// Best table on the page for a category, if any qualifies.
fn best_scored<'t>(tables: &'t [Table], category: Category) -> Option<&'t Table> {
    let indicators = match category {
        Category::Batting => BATTING_INDICATORS,
        Category::Pitching => PITCHING_INDICATORS,
    };
    tables
        .iter()
        .map(|t| {
            let score = indicator_count(t, indicators);
            let roster_score = indicator_count(t, ROSTER_INDICATORS);
            (t, score, roster_score)
        })
        .filter(|&(_, score, roster_score)| score >= MIN_INDICATORS && score > roster_score)
        .max_by_key(|&(_, score, _)| score)
        .map(|(t, _, _)| t)
}

// ── row extraction ───────────────────────────────────────────────────

fn name_column(table: &Table) -> Option<usize> {
    table.header_index(&["name", "player", "athlete"])
}

/// Team/summary rows that must not become player lines.
fn is_aggregate_row(row: &[super::Cell]) -> bool {
    row.iter().any(|c| {
        let lower = c.text.to_ascii_lowercase();
        lower.contains("total") || lower.contains("team") || lower.contains("opponent")
    })
}

fn row_name(table: &Table, row: &[super::Cell], name_idx: Option<usize>) -> Option<String> {
    let idx = name_idx?;
    let name = row.get(idx)?.name();
    if looks_like_stat_value(&name) {
        return None;
    }
    Some(name)
}

fn batting_rows(table: &Table) -> Vec<BattingLine> {
    let name_idx = name_column(table);
    let mut lines = Vec::new();
    for row in &table.rows {
        if row.len() < 3 || is_aggregate_row(row) {
            continue;
        }
        let Some(name) = row_name(table, row, name_idx) else {
            continue;
        };
        let mut line = BattingLine {
            name,
            ..BattingLine::default()
        };
        let mut any = false;
        for (header, cell) in table.headers.iter().zip(row) {
            let count = || parse_count(&cell.text);
            let rate = || parse_rate(&cell.text);
            let field = match header.as_str() {
                "g" | "gp" | "gp-gs" => &mut line.games,
                "ab" => &mut line.at_bats,
                "r" => &mut line.runs,
                "h" => &mut line.hits,
                "2b" => &mut line.doubles,
                "3b" => &mut line.triples,
                "hr" => &mut line.home_runs,
                "rbi" => &mut line.rbi,
                "bb" => &mut line.walks,
                "so" | "k" => &mut line.strikeouts,
                "sb" => &mut line.stolen_bases,
                "cs" => &mut line.caught_stealing,
                // "5-2" means 5 steals in 7 attempts.
                "sb-att" => {
                    if let Some((sb, att)) = split_composite(&cell.text) {
                        line.stolen_bases = Some(sb);
                        line.caught_stealing = Some(att - sb);
                        any = true;
                    } else if let Some(v) = count() {
                        line.stolen_bases = Some(v);
                        any = true;
                    }
                    continue;
                }
                "hbp" => &mut line.hit_by_pitch,
                "sf" => &mut line.sacrifice_flies,
                "sh" => &mut line.sacrifice_hits,
                "tb" => &mut line.total_bases,
                "avg" | "ba" => {
                    if let Some(v) = rate() {
                        line.batting_average = Some(v);
                        any = true;
                    }
                    continue;
                }
                "obp" | "ob" => {
                    if let Some(v) = rate() {
                        line.on_base_percentage = Some(v);
                        any = true;
                    }
                    continue;
                }
                "slg" => {
                    if let Some(v) = rate() {
                        line.slugging_percentage = Some(v);
                        any = true;
                    }
                    continue;
                }
                "ops" => {
                    if let Some(v) = rate() {
                        line.ops = Some(v);
                        any = true;
                    }
                    continue;
                }
                _ => continue,
            };
            if let Some(v) = count() {
                *field = Some(v);
                any = true;
            }
        }
        if any {
            line.fill_derived();
            lines.push(line);
        }
    }
    lines
}

fn pitching_rows(table: &Table) -> Vec<PitchingLine> {
    let name_idx = name_column(table);
    let mut lines = Vec::new();
    for row in &table.rows {
        if row.len() < 3 || is_aggregate_row(row) {
            continue;
        }
        let Some(name) = row_name(table, row, name_idx) else {
            continue;
        };
        let mut line = PitchingLine {
            name,
            ..PitchingLine::default()
        };
        let mut any = false;
        for (header, cell) in table.headers.iter().zip(row) {
            let count = || parse_count(&cell.text);
            let field = match header.as_str() {
                "app" | "g" => &mut line.appearances,
                "gs" => &mut line.games_started,
                "w" => &mut line.wins,
                "l" => &mut line.losses,
                "app-gs" => {
                    if let Some((app, gs)) = split_composite(&cell.text) {
                        line.appearances = Some(app);
                        line.games_started = Some(gs);
                        any = true;
                    } else if let Some(v) = count() {
                        line.appearances = Some(v);
                        any = true;
                    }
                    continue;
                }
                "w-l" => {
                    if let Some((w, l)) = split_composite(&cell.text) {
                        line.wins = Some(w);
                        line.losses = Some(l);
                        any = true;
                    }
                    continue;
                }
                "sv" => &mut line.saves,
                "cg" => &mut line.complete_games,
                "sho" => &mut line.shutouts,
                "h" => &mut line.hits_allowed,
                "r" => &mut line.runs_allowed,
                "er" => &mut line.earned_runs,
                "bb" => &mut line.walks,
                "so" | "k" => &mut line.strikeouts,
                "hr" => &mut line.home_runs_allowed,
                "hbp" => &mut line.hit_batters,
                "wp" => &mut line.wild_pitches,
                "bk" => &mut line.balks,
                "ip" => {
                    if let Some(v) = parse_innings(&cell.text) {
                        line.innings_pitched = Some(v);
                        any = true;
                    }
                    continue;
                }
                "era" => {
                    if let Some(v) = parse_rate(&cell.text) {
                        line.era = Some(v);
                        any = true;
                    }
                    continue;
                }
                "whip" => {
                    if let Some(v) = parse_rate(&cell.text) {
                        line.whip = Some(v);
                        any = true;
                    }
                    continue;
                }
                _ => continue,
            };
            if let Some(v) = count() {
                *field = Some(v);
                any = true;
            }
        }
        if any {
            line.fill_derived();
            lines.push(line);
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    const BATTING_TABLE: &str = r#"
        <table id="individual-overall-batting">
          <thead><tr><th>No.</th><th>Player</th><th>AVG</th><th>GP-GS</th><th>AB</th><th>R</th><th>H</th><th>2B</th><th>3B</th><th>HR</th><th>RBI</th><th>BB</th><th>SO</th><th>SB-ATT</th><th>OBP</th><th>SLG%</th></tr></thead>
          <tbody>
            <tr><td>7</td><td>Ellis, Briggs</td><td>.342</td><td>30 - 28</td><td>120</td><td>25</td><td>41</td><td>10</td><td>1</td><td>4</td><td>31</td><td>18</td><td>25</td><td>5 - 7</td><td>.410</td><td>.520</td></tr>
            <tr><td></td><td>Totals</td><td>.301</td><td>30</td><td>980</td><td>190</td><td>295</td><td>60</td><td>8</td><td>30</td><td>180</td><td>110</td><td>210</td><td>40 - 55</td><td>.390</td><td>.470</td></tr>
          </tbody>
        </table>"#;

    #[test]
    fn labeled_batting_table_by_id() {
        let html = format!("<html><body>{BATTING_TABLE}</body></html>");
        let (stats, strategy) = parse(&html).unwrap();
        assert_eq!(strategy, "labeled-table");
        assert_eq!(stats.batting.len(), 1);
        assert!(stats.pitching.is_empty());

        let b = &stats.batting[0];
        assert_eq!(b.name, "Briggs Ellis");
        assert_eq!(b.games, Some(30));
        assert_eq!(b.at_bats, Some(120));
        assert_eq!(b.stolen_bases, Some(5));
        assert_eq!(b.caught_stealing, Some(2));
        assert_eq!(b.batting_average, Some(0.342));
        assert_eq!(b.extra_base_hits, Some(15));
        assert_eq!(b.ops, Some(0.93));
    }

    #[test]
    fn heading_locates_pitching_table() {
        let html = r#"<html><body>
          <h3>Pitching Statistics</h3>
          <table>
            <thead><tr><th>Player</th><th>ERA</th><th>W</th><th>L</th><th>IP</th><th>H</th><th>ER</th><th>BB</th><th>SO</th></tr></thead>
            <tbody><tr><td>Smith, John</td><td>2.98</td><td>6</td><td>2</td><td>45.1</td><td>38</td><td>15</td><td>12</td><td>50</td></tr></tbody>
          </table></body></html>"#;
        let (stats, strategy) = parse(html).unwrap();
        assert_eq!(strategy, "labeled-table");
        assert_eq!(stats.pitching.len(), 1);

        let p = &stats.pitching[0];
        assert_eq!(p.name, "John Smith");
        assert_eq!(p.wins, Some(6));
        assert!((p.innings_pitched.unwrap() - (45.0 + 1.0 / 3.0)).abs() < 1e-9);
        assert_eq!(p.k_per_9, Some(9.93));
        assert_eq!(p.bb_per_9, Some(2.38));
        assert_eq!(p.k_to_bb, Some(4.17));
    }

    // A roster table with headers Name/Position/Year plus an AVG and AB
    // column must not classify as batting; a real stat line-up must.
    #[test]
    fn scorer_prefers_stats_over_roster_shape() {
        let roster = Table {
            headers: ["name", "pos", "yr", "ht", "wt", "avg", "ab"]
                .map(str::to_owned)
                .to_vec(),
            ..Table::default()
        };
        let batting = Table {
            headers: ["player", "avg", "ab", "rbi", "hr", "obp"]
                .map(str::to_owned)
                .to_vec(),
            ..Table::default()
        };
        let tables = vec![roster, batting];

        let best = best_scored(&tables, Category::Batting).unwrap();
        assert_eq!(best.headers[0], "player");
        assert!(best_scored(&tables, Category::Pitching).is_none());
    }

    #[test]
    fn aggregate_rows_and_stat_value_names_are_dropped() {
        let html = r#"<html><body>
          <table class="pitching-stats">
            <thead><tr><th>Player</th><th>ERA</th><th>IP</th><th>SO</th></tr></thead>
            <tbody>
              <tr><td>4-2</td><td>3.10</td><td>20.0</td><td>18</td></tr>
              <tr><td>Opponent</td><td>5.10</td><td>250.0</td><td>200</td></tr>
              <tr><td>Lee, Ann</td><td>1.98</td><td>32.2</td><td>40</td></tr>
            </tbody>
          </table></body></html>"#;
        let (stats, _) = parse(html).unwrap();
        assert_eq!(stats.pitching.len(), 1);
        assert_eq!(stats.pitching[0].name, "Ann Lee");
    }

    #[test]
    fn no_stats_found_is_none() {
        assert!(parse("<html><body><p>Game recap</p></body></html>").is_none());
    }
}
