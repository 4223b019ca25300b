pub mod normalize;
pub mod payload;
pub mod roster;
pub mod stats;

use compact_str::CompactString;
use ego_tree::NodeRef;
use scraper::{ElementRef, Html, Node, Selector};

use self::normalize::{clean_name, collapse_ws, split_name};

/// One roster entry as parsed off a page; fields absent on the page stay None.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RosterRecord {
    pub name: String,
    pub first_name: String,
    pub last_name: String,
    pub jersey_number: Option<CompactString>,
    pub positions: Vec<CompactString>,
    pub class_year: Option<CompactString>,
    pub height_inches: Option<i32>,
    pub weight_lbs: Option<i32>,
    pub bats: Option<char>,
    pub throws: Option<char>,
    pub hometown: Option<String>,
    pub high_school: Option<String>,
    pub profile_url: Option<String>,
}

impl RosterRecord {
    /// Builds a record from a raw display name, normalizing order and
    /// stripping jersey digits. Returns None for empty or stat-shaped names.
    #[must_use]
    pub fn from_name(raw: &str) -> Option<Self> {
        let name = clean_name(raw);
        if normalize::looks_like_stat_value(&name) {
            return None;
        }
        let (first_name, last_name) = split_name(&name);
        Some(Self {
            name,
            first_name,
            last_name,
            ..Self::default()
        })
    }

    #[must_use]
    pub fn key(&self) -> String {
        normalize::name_key(&self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BattingLine {
    pub name: String,
    pub games: Option<i64>,
    pub at_bats: Option<i64>,
    pub runs: Option<i64>,
    pub hits: Option<i64>,
    pub doubles: Option<i64>,
    pub triples: Option<i64>,
    pub home_runs: Option<i64>,
    pub rbi: Option<i64>,
    pub walks: Option<i64>,
    pub strikeouts: Option<i64>,
    pub stolen_bases: Option<i64>,
    pub caught_stealing: Option<i64>,
    pub hit_by_pitch: Option<i64>,
    pub sacrifice_flies: Option<i64>,
    pub sacrifice_hits: Option<i64>,
    pub total_bases: Option<i64>,
    pub grounded_into_dp: Option<i64>,
    pub batting_average: Option<f64>,
    pub on_base_percentage: Option<f64>,
    pub slugging_percentage: Option<f64>,
    pub ops: Option<f64>,
    pub extra_base_hits: Option<i64>,
    pub xbh_to_k: Option<f64>,
}

impl BattingLine {
    /// XBH, XBH:K and OPS (when OBP+SLG are present but OPS is not).
    pub fn fill_derived(&mut self) {
        let xbh = self.doubles.unwrap_or(0) + self.triples.unwrap_or(0)
            + self.home_runs.unwrap_or(0);
        self.extra_base_hits = Some(xbh);

        self.xbh_to_k = match self.strikeouts {
            Some(k) if k > 0 => Some(round3(xbh as f64 / k as f64)),
            _ => None,
        };

        if self.ops.is_none() {
            if let (Some(obp), Some(slg)) = (self.on_base_percentage, self.slugging_percentage) {
                self.ops = Some(round3(obp + slg));
            }
        }
    }

    #[must_use]
    pub fn key(&self) -> String {
        normalize::name_key(&self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PitchingLine {
    pub name: String,
    pub appearances: Option<i64>,
    pub games_started: Option<i64>,
    pub wins: Option<i64>,
    pub losses: Option<i64>,
    pub saves: Option<i64>,
    pub complete_games: Option<i64>,
    pub shutouts: Option<i64>,
    pub innings_pitched: Option<f64>,
    pub hits_allowed: Option<i64>,
    pub runs_allowed: Option<i64>,
    pub earned_runs: Option<i64>,
    pub walks: Option<i64>,
    pub strikeouts: Option<i64>,
    pub home_runs_allowed: Option<i64>,
    pub hit_batters: Option<i64>,
    pub wild_pitches: Option<i64>,
    pub balks: Option<i64>,
    pub era: Option<f64>,
    pub whip: Option<f64>,
    pub k_per_9: Option<f64>,
    pub bb_per_9: Option<f64>,
    pub k_to_bb: Option<f64>,
}

impl PitchingLine {
    /// K/9, BB/9 and K:BB; left None when the denominators are zero.
    pub fn fill_derived(&mut self) {
        let ip = self.innings_pitched.unwrap_or(0.0);
        let k = self.strikeouts.unwrap_or(0) as f64;
        let bb = self.walks.unwrap_or(0) as f64;

        if ip > 0.0 {
            self.k_per_9 = Some(round2(k / ip * 9.0));
            self.bb_per_9 = Some(round2(bb / ip * 9.0));
        }
        if bb > 0.0 {
            self.k_to_bb = Some(round2(k / bb));
        }
    }

    #[must_use]
    pub fn key(&self) -> String {
        normalize::name_key(&self.name)
    }
}

/// Season stats for one team, both categories in one bundle so the payload
/// strategy can fill both from a single pass.
#[derive(Debug, Clone, Default)]
pub struct TeamStats {
    pub batting: Vec<BattingLine>,
    pub pitching: Vec<PitchingLine>,
}

impl TeamStats {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batting.is_empty() && self.pitching.is_empty()
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

// ── flattened table model ────────────────────────────────────────────

/// One `<td>`/`<th>` with the bits every strategy wants: visible text (mobile
/// duplicate labels excluded), the sort attribute sites put the clean
/// "Last, First" name in, and the first link target.
#[derive(Debug, Clone, Default)]
pub(crate) struct Cell {
    pub text: String,
    pub data_sort: Option<String>,
    pub href: Option<String>,
}

impl Cell {
    /// Player name in "First Last" order, preferring `data-sort`.
    pub fn name(&self) -> String {
        if let Some(sort) = &self.data_sort {
            if sort.contains(',') {
                let name = clean_name(sort);
                if !name.is_empty() {
                    return name;
                }
            }
        }
        clean_name(&self.text)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Table {
    /// Lowercased headers with '.' and '%' stripped, as the alias maps expect.
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    /// Raw class attribute of the `<table>` element.
    pub class: String,
    pub id: String,
}

impl Table {
    pub fn header_index(&self, names: &[&str]) -> Option<usize> {
        self.headers.iter().position(|h| names.contains(&h.as_str()))
    }
}

fn selector(s: &str) -> Selector {
    Selector::parse(s).expect("static selector")
}

/// Classes that mark duplicated or screen-reader-only text inside cells.
fn is_hidden_element(class: Option<&str>) -> bool {
    class.is_some_and(|c| {
        c.split_ascii_whitespace().any(|c| {
            matches!(
                c,
                "d-md-none" | "d-print-none" | "label" | "sr-only" | "visually-hidden"
            )
        })
    })
}

fn push_visible_text(node: NodeRef<'_, Node>, out: &mut String) {
    for child in node.children() {
        match child.value() {
            Node::Text(t) => {
                out.push_str(&t.text);
                out.push(' ');
            }
            Node::Element(e) => {
                if !is_hidden_element(e.attr("class")) {
                    push_visible_text(child, out);
                }
            }
            _ => {}
        }
    }
}

/// Cell text with mobile-label/sr-only spans dropped, whitespace collapsed.
pub(crate) fn visible_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    push_visible_text(*el, &mut out);
    collapse_ws(&out)
}

fn cell_of(el: ElementRef<'_>) -> Cell {
    let link_sel = selector("a");
    Cell {
        text: visible_text(el),
        data_sort: el.attr("data-sort").map(str::to_owned),
        href: el
            .select(&link_sel)
            .find_map(|a| a.attr("href"))
            .map(str::to_owned),
    }
}

/// Flattens one `<table>` element. Headers come from the first `<thead>` row
/// when present, otherwise the first row; data rows from `<tbody>` or the
/// remainder.
pub(crate) fn flatten_table(table: ElementRef<'_>) -> Table {
    let thead_row = selector("thead > tr");
    let any_row = selector("tr");
    let head_cells = selector("th, td");
    let body_row = selector("tbody > tr");

    let from_thead = table.select(&thead_row).next().is_some();
    let header_row = table
        .select(&thead_row)
        .next()
        .or_else(|| table.select(&any_row).next());
    let headers: Vec<String> = header_row
        .map(|row| {
            row.select(&head_cells)
                .map(|c| {
                    visible_text(c)
                        .to_ascii_lowercase()
                        .replace(['.', '%'], "")
                })
                .collect()
        })
        .unwrap_or_default();

    // Without a thead the HTML parser wraps every row in an implicit tbody,
    // so the row the headers came from shows up as the first body row too.
    let skip = usize::from(!from_thead && !headers.is_empty());
    let mut rows: Vec<Vec<Cell>> = Vec::new();
    let body_rows: Vec<_> = table.select(&body_row).collect();
    if body_rows.is_empty() {
        for row in table.select(&any_row).skip(skip) {
            rows.push(row.select(&head_cells).map(cell_of).collect());
        }
    } else {
        for row in body_rows.into_iter().skip(skip) {
            rows.push(row.select(&head_cells).map(cell_of).collect());
        }
    }

    Table {
        headers,
        rows,
        class: table.attr("class").unwrap_or_default().to_owned(),
        id: table.attr("id").unwrap_or_default().to_owned(),
    }
}

/// All tables on the page, flattened, in document order.
pub(crate) fn page_tables(doc: &Html) -> Vec<Table> {
    let table_sel = selector("table");
    doc.select(&table_sel).map(flatten_table).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_label_spans_are_excluded_from_cell_text() {
        let html = Html::parse_fragment(
            "<table><tr><th>Name</th></tr>\
             <tr><td><span class=\"label d-md-none\">Pos.:</span> <a href=\"/p/1\">Briggs\r\n\t\tEllis</a></td></tr></table>",
        );
        let sel = Selector::parse("table").unwrap();
        let table = flatten_table(html.select(&sel).next().unwrap());
        assert_eq!(table.headers, vec!["name"]);
        assert_eq!(table.rows[0][0].text, "Briggs Ellis");
        assert_eq!(table.rows[0][0].href.as_deref(), Some("/p/1"));
    }

    #[test]
    fn theadless_table_does_not_emit_its_header_row_as_data() {
        let html = Html::parse_fragment(
            "<table class=\"roster\">\
             <tr><th>No.</th><th>Name</th><th>Pos.</th></tr>\
             <tr><td>7</td><td>Briggs Ellis</td><td>OF</td></tr>\
             <tr><td>12</td><td>John Smith</td><td>P</td></tr>\
             </table>",
        );
        let sel = Selector::parse("table").unwrap();
        let table = flatten_table(html.select(&sel).next().unwrap());
        assert_eq!(table.headers, vec!["no", "name", "pos"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0][1].text, "Briggs Ellis");
        assert_eq!(table.rows[1][1].text, "John Smith");
    }

    #[test]
    fn data_sort_wins_over_cell_text() {
        let cell = Cell {
            text: "Ellis Briggs 0".into(),
            data_sort: Some("Ellis, Briggs".into()),
            href: None,
        };
        assert_eq!(cell.name(), "Briggs Ellis");
    }

    #[test]
    fn batting_derived_fields() {
        let mut line = BattingLine {
            name: "John Smith".into(),
            doubles: Some(10),
            triples: Some(2),
            home_runs: Some(8),
            strikeouts: Some(40),
            on_base_percentage: Some(0.410),
            slugging_percentage: Some(0.520),
            ..BattingLine::default()
        };
        line.fill_derived();
        assert_eq!(line.extra_base_hits, Some(20));
        assert_eq!(line.xbh_to_k, Some(0.5));
        assert_eq!(line.ops, Some(0.93));
    }

    #[test]
    fn pitching_derived_fields_guard_zero_denominators() {
        let mut line = PitchingLine {
            name: "John Smith".into(),
            innings_pitched: Some(45.0 + 1.0 / 3.0),
            strikeouts: Some(50),
            walks: Some(0),
            ..PitchingLine::default()
        };
        line.fill_derived();
        assert_eq!(line.k_per_9, Some(9.93));
        assert_eq!(line.bb_per_9, Some(0.0));
        assert_eq!(line.k_to_bb, None);

        let mut none = PitchingLine::default();
        none.fill_derived();
        assert_eq!(none.k_per_9, None);
    }
}
