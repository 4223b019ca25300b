use std::sync::LazyLock;

use compact_str::CompactString;
use regex::Regex;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static TRAILING_JERSEY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+\d{1,2}$").unwrap());
static STAT_VALUE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\d.\-/]+$").unwrap());

/// Collapses runs of whitespace; roster cells love `\r\n\t` between words.
#[must_use]
pub fn collapse_ws(s: &str) -> String {
    WHITESPACE.replace_all(s.trim(), " ").into_owned()
}

/// Splits a display name into (first, last), flipping "Last, First" order.
/// Single-token names land in first with an empty last.
#[must_use]
pub fn split_name(full: &str) -> (String, String) {
    let name = collapse_ws(full);
    if let Some((last, first)) = name.split_once(',') {
        return (first.trim().to_owned(), last.trim().to_owned());
    }
    match name.split_once(' ') {
        Some((first, last)) => (first.to_owned(), last.to_owned()),
        None => (name, String::new()),
    }
}

/// Cleans a raw name cell: collapse whitespace, strip a trailing jersey
/// number ("Briggs Ellis 0"), flip "Last, First".
#[must_use]
pub fn clean_name(raw: &str) -> String {
    let collapsed = collapse_ws(raw);
    let stripped = TRAILING_JERSEY.replace(&collapsed, "");
    let (first, last) = split_name(&stripped);
    if last.is_empty() {
        first
    } else {
        format!("{first} {last}")
    }
}

/// Key used to link stat lines to roster records.
#[must_use]
pub fn name_key(name: &str) -> String {
    clean_name(name).to_ascii_lowercase()
}

/// Stat tables sometimes shift columns and a ".500" or "4-2" lands where a
/// name belongs; those rows are garbage.
#[must_use]
pub fn looks_like_stat_value(name: &str) -> bool {
    name.is_empty() || STAT_VALUE.is_match(name)
}

/// Maps a position label onto the canonical abbreviation set.
#[must_use]
pub fn canonical_position(raw: &str) -> CompactString {
    let pos = collapse_ws(raw).to_ascii_uppercase();
    let mapped = match pos.as_str() {
        "PITCHER" | "RHP" | "LHP" => "P",
        "CATCHER" => "C",
        "FIRST BASE" | "FIRST BASEMAN" => "1B",
        "SECOND BASE" | "SECOND BASEMAN" => "2B",
        "THIRD BASE" | "THIRD BASEMAN" => "3B",
        "SHORTSTOP" => "SS",
        "LEFT FIELD" | "LEFT FIELDER" => "LF",
        "CENTER FIELD" | "CENTER FIELDER" => "CF",
        "RIGHT FIELD" | "RIGHT FIELDER" => "RF",
        "DESIGNATED HITTER" => "DH",
        "OUTFIELD" | "OUTFIELDER" => "OF",
        "INFIELD" | "INFIELDER" => "INF",
        "UTILITY" => "UT",
        other => other,
    };
    CompactString::from(mapped)
}

/// Splits a multi-position cell ("INF/OF", "C, 1B") into canonical parts.
#[must_use]
pub fn position_set(raw: &str) -> Vec<CompactString> {
    raw.split(['/', ','])
        .map(canonical_position)
        .filter(|p| !p.is_empty())
        .collect()
}

#[must_use]
pub fn normalize_class_year(raw: &str) -> Option<CompactString> {
    let y = collapse_ws(raw).to_ascii_lowercase();
    let y = y.trim_end_matches('.');
    let out = match y {
        "fr" | "freshman" | "r-fr" | "rs-fr" => "Fr.",
        "so" | "sophomore" | "r-so" | "rs-so" => "So.",
        "jr" | "junior" | "r-jr" | "rs-jr" => "Jr.",
        "sr" | "senior" | "r-sr" | "rs-sr" => "Sr.",
        "gr" | "graduate" | "grad" => "Gr.",
        "" => return None,
        _ => return Some(CompactString::from(collapse_ws(raw))),
    };
    Some(CompactString::from(out))
}

/// "6-2", "6'2\"" or plain inches. Anything implausible is dropped.
#[must_use]
pub fn parse_height_inches(raw: &str) -> Option<i32> {
    static FEET_DASH: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(\d)\s*[-']\s*(\d{1,2})").unwrap());
    let s = collapse_ws(raw);
    if let Some(caps) = FEET_DASH.captures(&s) {
        let feet: i32 = caps[1].parse().ok()?;
        let inches: i32 = caps[2].parse().ok()?;
        return Some(feet * 12 + inches);
    }
    let val: i32 = s.parse().ok()?;
    (60..=84).contains(&val).then_some(val)
}

#[must_use]
pub fn parse_weight_lbs(raw: &str) -> Option<i32> {
    let s = collapse_ws(raw);
    let s = s.trim_end_matches("lbs").trim_end_matches("lb").trim();
    let val: i32 = s.parse().ok()?;
    (100..=350).contains(&val).then_some(val)
}

/// "R/R", "L/S" → (bats, throws).
#[must_use]
pub fn parse_bats_throws(raw: &str) -> Option<(char, char)> {
    let s = collapse_ws(raw).to_ascii_uppercase();
    let (b, t) = s.split_once('/')?;
    let bats = b.trim().chars().next()?;
    let throws = t.trim().chars().next()?;
    (matches!(bats, 'R' | 'L' | 'S') && matches!(throws, 'R' | 'L' | 'S'))
        .then_some((bats, throws))
}

/// Composite counting cells: "10-8" for GP-GS, "5-2" for SB-ATT. Returns the
/// two halves, or None when the cell is not of that shape.
#[must_use]
pub fn split_composite(raw: &str) -> Option<(i64, i64)> {
    let s = collapse_ws(raw);
    let (a, b) = s.split_once('-')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

/// Innings pitched uses baseball notation: 45.1 means 45⅓, 45.2 means 45⅔.
#[must_use]
pub fn parse_innings(raw: &str) -> Option<f64> {
    let s = collapse_ws(raw);
    if let Some((whole, partial)) = s.split_once('.') {
        let whole: f64 = whole.parse().ok()?;
        let thirds: f64 = partial.parse().ok()?;
        return Some(whole + thirds / 3.0);
    }
    s.parse().ok()
}

/// Placeholder-aware numeric cell parse; takes the first half of " - "
/// separated composites, as the original tables print GP - GS that way too.
#[must_use]
pub fn parse_count(raw: &str) -> Option<i64> {
    let s = collapse_ws(raw);
    if matches!(s.as_str(), "" | "-" | "--" | "." | "N/A") {
        return None;
    }
    let s = s.split(" - ").next().unwrap_or(&s);
    s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
}

#[must_use]
pub fn parse_rate(raw: &str) -> Option<f64> {
    let s = collapse_ws(raw);
    if matches!(s.as_str(), "" | "-" | "--" | "." | "N/A") {
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_first_and_first_last_normalize_identically() {
        assert_eq!(split_name("Smith, John"), ("John".into(), "Smith".into()));
        assert_eq!(split_name("John Smith"), ("John".into(), "Smith".into()));
        assert_eq!(clean_name("Smith, John"), clean_name("John Smith"));
        assert_eq!(name_key("Smith,  John"), name_key("john smith"));
    }

    #[test]
    fn trailing_jersey_number_is_stripped() {
        assert_eq!(clean_name("Briggs Ellis 0"), "Briggs Ellis");
        assert_eq!(clean_name("Briggs\r\n\t\tEllis"), "Briggs Ellis");
    }

    #[test]
    fn stat_values_are_not_names() {
        assert!(looks_like_stat_value(".500"));
        assert!(looks_like_stat_value("4-2"));
        assert!(looks_like_stat_value("1.000"));
        assert!(!looks_like_stat_value("John Smith"));
    }

    #[test]
    fn positions_canonicalize() {
        assert_eq!(canonical_position("Right Field"), "RF");
        assert_eq!(canonical_position("RHP"), "P");
        assert_eq!(position_set("INF/OF"), vec!["INF", "OF"]);
        assert_eq!(position_set("C, 1B"), vec!["C", "1B"]);
    }

    #[test]
    fn class_years() {
        assert_eq!(normalize_class_year("Freshman").as_deref(), Some("Fr."));
        assert_eq!(normalize_class_year("r-so").as_deref(), Some("So."));
        assert_eq!(normalize_class_year("Gr.").as_deref(), Some("Gr."));
        assert_eq!(normalize_class_year(""), None);
    }

    #[test]
    fn heights_and_weights() {
        assert_eq!(parse_height_inches("6-2"), Some(74));
        assert_eq!(parse_height_inches("5'11\""), Some(71));
        assert_eq!(parse_height_inches("74"), Some(74));
        assert_eq!(parse_height_inches("9"), None);
        assert_eq!(parse_weight_lbs("205 lbs"), Some(205));
        assert_eq!(parse_weight_lbs("950"), None);
    }

    #[test]
    fn composite_cells_split() {
        assert_eq!(split_composite("10-8"), Some((10, 8)));
        assert_eq!(split_composite("5-2"), Some((5, 2)));
        assert_eq!(split_composite(".500"), None);
    }

    #[test]
    fn innings_thirds() {
        assert!((parse_innings("45.1").unwrap() - (45.0 + 1.0 / 3.0)).abs() < 1e-9);
        assert!((parse_innings("45.2").unwrap() - (45.0 + 2.0 / 3.0)).abs() < 1e-9);
        assert_eq!(parse_innings("45"), Some(45.0));
    }

    #[test]
    fn bats_throws() {
        assert_eq!(parse_bats_throws("R/R"), Some(('R', 'R')));
        assert_eq!(parse_bats_throws("s/l"), Some(('S', 'L')));
        assert_eq!(parse_bats_throws("??"), None);
    }
}
