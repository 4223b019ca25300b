//! Hydration-payload strategy. SIDEARM v3 sites render entirely client-side
//! and ship the roster/stats state as a devalue-serialized array inside a
//! script tag; entry 1 is the root object and every nested value is an index
//! back into the array, possibly wrapped in a reactivity marker.

use std::sync::LazyLock;

use compact_str::ToCompactString;
use regex::Regex;
use serde_json::Value;

use super::{BattingLine, PitchingLine, RosterRecord, TeamStats};
use crate::parse::normalize::{clean_name, normalize_class_year, position_set};

static SCRIPT_BODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<script[^>]*>(.*?)</script>").unwrap());

const MAX_RESOLVE_DEPTH: usize = 20;

/// Pulls the devalue array out of the page, if there is one.
#[must_use]
pub fn extract(html: &str) -> Option<Vec<Value>> {
    for caps in SCRIPT_BODY.captures_iter(html) {
        let body = caps[1].trim();
        if !(body.starts_with("[[\"ShallowReactive\"") || body.starts_with("[[\"Reactive\"")) {
            continue;
        }
        if let Ok(Value::Array(arr)) = serde_json::from_str(body) {
            return Some(arr);
        }
    }
    None
}

fn as_index(v: &Value) -> Option<usize> {
    v.as_u64().and_then(|n| usize::try_from(n).ok())
}

fn is_wrapper(tag: &str) -> bool {
    matches!(tag, "ShallowReactive" | "Reactive" | "ShallowRef" | "Ref")
}

/// Follows an index through the payload, materializing the value it points
/// at. Wrappers are unwrapped; containers are resolved element by element.
/// Depth-bounded: the payload is index-linked and can alias itself.
#[must_use]
pub fn resolve(payload: &[Value], idx: usize, depth: usize) -> Value {
    if depth > MAX_RESOLVE_DEPTH || idx >= payload.len() {
        return Value::Null;
    }
    match &payload[idx] {
        Value::Array(arr)
            if arr.len() == 2 && arr[0].as_str().is_some_and(is_wrapper) =>
        {
            match as_index(&arr[1]) {
                Some(inner) => resolve(payload, inner, depth + 1),
                None => Value::Null,
            }
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(payload, v, depth + 1)))
                .collect(),
        ),
        Value::Array(arr) => Value::Array(
            arr.iter()
                .map(|v| resolve_value(payload, v, depth + 1))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Inside a resolved container every number is an index, not a literal.
fn resolve_value(payload: &[Value], v: &Value, depth: usize) -> Value {
    match as_index(v) {
        Some(idx) => resolve(payload, idx, depth),
        None => v.clone(),
    }
}

/// Dereferences one level without materializing children.
fn deref<'a>(payload: &'a [Value], v: &Value) -> Option<&'a Value> {
    let mut idx = as_index(v)?;
    for _ in 0..MAX_RESOLVE_DEPTH {
        match payload.get(idx)? {
            Value::Array(arr)
                if arr.len() == 2 && arr[0].as_str().is_some_and(is_wrapper) =>
            {
                idx = as_index(&arr[1])?;
            }
            other => return Some(other),
        }
    }
    None
}

// ── roster ───────────────────────────────────────────────────────────

/// Roster out of the payload: root.data → "roster-…-players-list-…" →
/// players list of per-player references.
#[must_use]
pub fn roster(html: &str) -> Vec<RosterRecord> {
    let Some(payload) = extract(html) else {
        return Vec::new();
    };
    let Some(root) = payload.get(1).and_then(Value::as_object) else {
        return Vec::new();
    };
    let Some(data) = root.get("data").and_then(|v| deref(&payload, v)) else {
        return Vec::new();
    };
    let Some(data) = data.as_object() else {
        return Vec::new();
    };
    let Some(roster_ref) = data
        .iter()
        .find(|(k, _)| k.contains("roster") && k.contains("players-list"))
        .map(|(_, v)| v)
    else {
        return Vec::new();
    };
    let Some(player_refs) = deref(&payload, roster_ref)
        .and_then(|c| c.as_object())
        .and_then(|c| c.get("players"))
        .and_then(|v| deref(&payload, v))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    let mut players = Vec::new();
    for r in player_refs {
        let Some(idx) = as_index(r) else { continue };
        let entry = resolve(&payload, idx, 0);
        let Some(entry) = entry.as_object() else {
            continue;
        };
        let Some(record) = player_record(entry) else {
            tracing::debug!(target: "parse", "payload player entry without a name, skipping");
            continue;
        };
        players.push(record);
    }
    players
}

fn player_record(entry: &serde_json::Map<String, Value>) -> Option<RosterRecord> {
    let name = entry
        .get("player")
        .and_then(Value::as_object)
        .and_then(|p| p.get("full_name"))
        .and_then(Value::as_str)?;
    let mut record = RosterRecord::from_name(name)?;

    if let Some(jn) = entry.get("jersey_number").filter(|v| !v.is_null()) {
        record.jersey_number = Some(match jn {
            Value::String(s) => s.to_compact_string(),
            other => other.to_compact_string(),
        });
    }
    if let Some(pos) = entry.get("player_position").and_then(Value::as_object) {
        let label = pos
            .get("abbreviation")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .or_else(|| pos.get("name").and_then(Value::as_str));
        if let Some(label) = label {
            record.positions = position_set(label);
        }
    }
    if let Some(class) = entry
        .get("class_level")
        .and_then(Value::as_object)
        .and_then(|c| c.get("name"))
        .and_then(Value::as_str)
    {
        record.class_year = normalize_class_year(class);
    }
    if let (Some(ft), Some(inches)) = (
        entry.get("height_feet").and_then(Value::as_i64),
        entry.get("height_inches").and_then(Value::as_i64),
    ) {
        record.height_inches = i32::try_from(ft * 12 + inches).ok();
    }
    if let Some(wt) = entry.get("weight").and_then(Value::as_i64) {
        record.weight_lbs = i32::try_from(wt).ok();
    }
    if let Some(fields) = entry.get("profile_field_values").and_then(Value::as_array) {
        for pfv in fields.iter().filter_map(Value::as_object) {
            let field_name = pfv
                .get("profileField")
                .or_else(|| pfv.get("profile_field"))
                .and_then(Value::as_object)
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str);
            if field_name == Some("B/T") {
                if let Some((b, t)) = pfv
                    .get("value")
                    .and_then(Value::as_str)
                    .and_then(crate::parse::normalize::parse_bats_throws)
                {
                    record.bats = Some(b);
                    record.throws = Some(t);
                }
            }
        }
    }
    Some(record)
}

// ── season stats ─────────────────────────────────────────────────────

/// Season stats out of the payload: root.pinia → statsSeason →
/// cumulativeStats → first season → overallIndividualStats.
#[must_use]
pub fn stats(html: &str) -> TeamStats {
    let mut out = TeamStats::default();
    let Some(payload) = extract(html) else {
        return out;
    };
    let Some(root) = payload.get(1).and_then(Value::as_object) else {
        return out;
    };
    let Some(pinia) = root.get("pinia").and_then(|v| deref(&payload, v)) else {
        return out;
    };
    let Some(season_ref) = pinia.as_object().and_then(|p| p.get("statsSeason")) else {
        return out;
    };
    let Some(idx) = as_index(season_ref) else {
        return out;
    };
    let season = resolve(&payload, idx, 0);

    // Early season the cumulativeStats map exists but its value is null.
    let Some(individual) = season
        .get("cumulativeStats")
        .and_then(Value::as_object)
        .and_then(|c| c.values().find(|v| !v.is_null()))
        .and_then(|s| s.get("overallIndividualStats"))
        .and_then(|s| s.get("individualStats"))
    else {
        return out;
    };

    if let Some(list) = individual
        .get("individualHittingStats")
        .and_then(Value::as_array)
    {
        for p in list.iter().filter_map(Value::as_object) {
            if let Some(line) = hitting_line(p) {
                out.batting.push(line);
            }
        }
    }
    if let Some(list) = individual
        .get("individualPitchingStats")
        .and_then(Value::as_array)
    {
        for p in list.iter().filter_map(Value::as_object) {
            if let Some(line) = pitching_line(p) {
                out.pitching.push(line);
            }
        }
    }
    if !out.is_empty() {
        tracing::debug!(
            target: "parse",
            "payload stats: {} batting, {} pitching",
            out.batting.len(),
            out.pitching.len(),
        );
    }
    out
}

fn line_name(p: &serde_json::Map<String, Value>) -> Option<String> {
    if p.get("isAFooterStat").and_then(Value::as_bool) == Some(true) {
        return None;
    }
    let name = p.get("playerName").and_then(Value::as_str)?;
    let name = clean_name(name);
    (!name.is_empty()).then_some(name)
}

fn int(p: &serde_json::Map<String, Value>, key: &str) -> Option<i64> {
    match p.get(key)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s
            .parse::<i64>()
            .ok()
            .or_else(|| s.parse::<f64>().ok().map(|f| f as i64)),
        _ => None,
    }
}

fn float(p: &serde_json::Map<String, Value>, key: &str) -> Option<f64> {
    match p.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn hitting_line(p: &serde_json::Map<String, Value>) -> Option<BattingLine> {
    let mut line = BattingLine {
        name: line_name(p)?,
        games: int(p, "gamesPlayed"),
        at_bats: int(p, "atBats"),
        runs: int(p, "runs"),
        hits: int(p, "hits"),
        doubles: int(p, "doubles"),
        triples: int(p, "triples"),
        home_runs: int(p, "homeRuns"),
        rbi: int(p, "runsBattedIn"),
        walks: int(p, "walks"),
        strikeouts: int(p, "strikeouts"),
        stolen_bases: int(p, "stolenBases"),
        caught_stealing: int(p, "caughtStealing"),
        hit_by_pitch: int(p, "hitByPitch"),
        sacrifice_flies: int(p, "sacrificeFlies"),
        sacrifice_hits: int(p, "sacrificeHits"),
        total_bases: int(p, "totalBases"),
        grounded_into_dp: int(p, "groundedIntoDoublePlay"),
        batting_average: float(p, "battingAverage"),
        on_base_percentage: float(p, "onBasePercentage"),
        slugging_percentage: float(p, "sluggingPercentage"),
        ops: float(p, "ops"),
        ..BattingLine::default()
    };
    line.fill_derived();
    Some(line)
}

fn pitching_line(p: &serde_json::Map<String, Value>) -> Option<PitchingLine> {
    let innings = match p.get("inningsPitched") {
        Some(Value::String(s)) => crate::parse::normalize::parse_innings(s),
        Some(Value::Number(n)) => n.as_f64(),
        _ => None,
    };
    let mut line = PitchingLine {
        name: line_name(p)?,
        appearances: int(p, "appearances"),
        games_started: int(p, "gamesStarted"),
        wins: int(p, "wins"),
        losses: int(p, "losses"),
        saves: int(p, "saves"),
        shutouts: int(p, "combinedShutouts"),
        innings_pitched: innings,
        hits_allowed: int(p, "hitsAllowed"),
        runs_allowed: int(p, "runsAllowed"),
        earned_runs: int(p, "earnedRunsAllowed"),
        walks: int(p, "walksAllowed"),
        strikeouts: int(p, "strikeouts"),
        home_runs_allowed: int(p, "homeRunsAllowed"),
        hit_batters: int(p, "hitBatters"),
        wild_pitches: int(p, "wildPitches"),
        balks: int(p, "balks"),
        era: float(p, "earnedRunAverage"),
        whip: float(p, "whip"),
        ..PitchingLine::default()
    };
    line.fill_derived();
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Real payloads are compact; the fixtures here are indented for
    // readability and re-serialized before embedding.
    fn page(payload: &str) -> String {
        let payload = serde_json::to_string(&serde_json::from_str::<Value>(payload).unwrap())
            .unwrap();
        format!(
            "<html><body><div id=\"app\"></div>\
             <script type=\"application/json\" id=\"__NUXT_DATA__\">{payload}</script>\
             </body></html>"
        )
    }

    #[test]
    fn extract_ignores_ordinary_scripts() {
        let html = "<script>var x = 1;</script><script>[[\"nope\"]]</script>";
        assert!(extract(html).is_none());
    }

    #[test]
    fn resolves_wrappers_and_nested_references() {
        // 0: root wrapper, 1: root object, 2: {"a": ref 3}, 3: ["Ref", 4], 4: 7
        let payload: Vec<Value> = serde_json::from_str(
            r#"[["ShallowReactive",1],{"data":2},{"a":3},["Ref",4],7]"#,
        )
        .unwrap();
        let resolved = resolve(&payload, 2, 0);
        assert_eq!(resolved["a"], Value::from(7));
    }

    #[test]
    fn roster_from_payload() {
        // Layout: 1 root, 2 data object, 3 roster container, 4 players list,
        // 5 player entry, 6 player identity, then scalar slots.
        let payload = r#"[
            ["ShallowReactive",1],
            {"data":2},
            ["ShallowReactive",7],
            {"players":4,"meta":12},
            [5],
            {"player":6,"jersey_number":8,"player_position":9,"class_level":10,"height_feet":13,"height_inches":14,"weight":15,"profile_field_values":11},
            {"full_name":16,"first_name":17,"last_name":18},
            {"roster-123-players-list-page-1":3},
            "12",
            {"abbreviation":19},
            {"name":20},
            [],
            {"total":21},
            6, 2, 195,
            "Briggs Ellis", "Briggs", "Ellis",
            "INF", "Redshirt Junior", 1
        ]"#;
        let players = roster(&page(payload));
        assert_eq!(players.len(), 1);
        let p = &players[0];
        assert_eq!(p.name, "Briggs Ellis");
        assert_eq!(p.jersey_number.as_deref(), Some("12"));
        assert_eq!(p.positions, vec!["INF"]);
        assert_eq!(p.height_inches, Some(74));
        assert_eq!(p.weight_lbs, Some(195));
    }

    #[test]
    fn stats_from_payload_skip_footer_rows() {
        let payload = r#"[
            ["ShallowReactive",1],
            {"pinia":2},
            ["Reactive",3],
            {"statsSeason":4},
            {"cumulativeStats":5},
            {"55":6},
            {"overallIndividualStats":7},
            {"individualStats":8},
            {"individualHittingStats":9,"individualPitchingStats":10},
            [11,12],
            [13],
            {"playerName":14,"atBats":16,"runsBattedIn":17,"battingAverage":18,"doubles":19,"strikeouts":20},
            {"playerName":15,"isAFooterStat":true,"atBats":16},
            {"playerName":21,"appearances":22,"inningsPitched":23,"earnedRunAverage":24,"strikeoutsPerNineInnings":24},
            "Ellis, Briggs", "Totals",
            120, 31, 0.342, 10, 25,
            "John Smith", 14, "45.1", 2.98
        ]"#;
        let stats = stats(&page(payload));
        assert_eq!(stats.batting.len(), 1);
        assert_eq!(stats.pitching.len(), 1);

        let b = &stats.batting[0];
        assert_eq!(b.name, "Briggs Ellis");
        assert_eq!(b.at_bats, Some(120));
        assert_eq!(b.extra_base_hits, Some(10));
        assert_eq!(b.xbh_to_k, Some(0.4));

        let p = &stats.pitching[0];
        assert!((p.innings_pitched.unwrap() - (45.0 + 1.0 / 3.0)).abs() < 1e-9);
        assert_eq!(p.era, Some(2.98));
        // No strikeouts recorded: rate is zero, not absent.
        assert_eq!(p.k_per_9, Some(0.0));
    }
}
