//! Failure triage and registry repair. Classification is computed from the
//! failure kinds the run already recorded, no re-fetching. For sources whose
//! domain is gone or only redirects away, the conference's own website is
//! the best directory of current athletics URLs: fetch its member listing,
//! harvest external links, and fuzzy-match institution names back to ours.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;
use scraper::{Html, Selector};
use serde_json::Value;

use crate::error::{FailureKind, FetchErrorKind};
use crate::fetch::RequestHandler;
use crate::registry::{Division, FailureClass, SourceEntry};

/// Conference website directory. Conferences sharing an abbreviation across
/// divisions get division-qualified keys; lookup tries the qualified key
/// first.
const CONFERENCE_URLS: &[(&str, &str)] = &[
    // D2
    ("SIAC", "https://thesiac.com"),
    ("PSAC", "https://psacsports.org"),
    ("CACC", "https://caccathletics.com"),
    ("CIAA", "https://theciaa.com"),
    ("MIAA_D2", "https://themiaa.com"),
    ("MEC", "https://mountaineast.org"),
    ("RMAC", "https://rmacsports.org"),
    ("GAC", "https://thegac.com"),
    ("LSC", "https://lonestarconference.org"),
    ("GNAC_D2", "https://gnacsports.com"),
    ("GLVC", "https://glvcsports.com"),
    ("CCAA", "https://goccaa.org"),
    ("G-MAC", "https://gmacsports.com"),
    ("NSIC", "https://nsicsports.org"),
    ("NE10", "https://northeast10.org"),
    ("ECC", "https://eccsports.org"),
    ("PacWest", "https://pacwest.org"),
    ("SSC", "https://sunshinestateconference.com"),
    ("GSC", "https://gscsports.org"),
    ("PBC", "https://peachbeltconference.org"),
    ("Conference Carolinas", "https://conferencecarolinas.com"),
    ("SAC", "https://thesac.com"),
    ("GLIAC", "https://gliac.org"),
    // D3
    ("SUNYAC", "https://sunyacsports.com"),
    ("CUNYAC", "https://cunyathletics.com"),
    ("NAC", "https://nacathletics.com"),
    ("Empire 8", "https://empire8.com"),
    ("Skyline", "https://skylineconference.org"),
    ("AMCC", "https://amccsports.org"),
    ("SLIAC", "https://sliac.org"),
    ("UMAC", "https://umacathletics.com"),
    ("MASCAC", "https://mascac.com"),
    ("GNAC_D3", "https://thegnac.com"),
    ("USA South", "https://usasouth.net"),
    ("ASC", "https://ascsports.org"),
    ("Midwest", "https://midwestconference.org"),
    ("SCAC", "https://scacsports.com"),
    ("CAC", "https://cacsports.com"),
    ("Little East", "https://littleeast.com"),
    ("OAC", "https://oac.org"),
    ("WIAC", "https://wiacsports.com"),
    ("CCIW", "https://cciw.org"),
    ("Centennial", "https://centennial.org"),
    ("NCAC", "https://northcoast.org"),
    ("Landmark", "https://landmarkconference.org"),
    ("NJAC", "https://njacsports.com"),
    ("Heartland", "https://heartlandconf.org"),
    ("MIAA_D3", "https://miaa.org"),
    ("NACC", "https://naccsports.org"),
    ("Atlantic East", "https://atlanticeast.com"),
    ("MAC", "https://gomacsports.com"),
    ("MIAC", "https://miacathletics.com"),
    ("American Rivers", "https://rollrivers.com"),
    ("SCIAC", "https://thesciac.org"),
];

/// Paths worth trying on a conference site for a member listing.
const MEMBER_PATHS: &[&str] = &[
    "",
    "/index.aspx?path=baseball",
    "/sports/baseball",
    "/sports/bsb/index",
    "/member-institutions",
    "/about/member-institutions",
    "/standings.aspx?path=baseball",
];

/// Social/CDN/vendor domains that show up on every conference page and are
/// never a member school.
const IGNORE_DOMAINS: &[&str] = &[
    "twitter.com",
    "x.com",
    "facebook.com",
    "instagram.com",
    "youtube.com",
    "tiktok.com",
    "linkedin.com",
    "ncaa.org",
    "ncaa.com",
    "google.com",
    "apple.com",
    "spotify.com",
    "amazon.com",
    "sidearmstats.com",
    "sidearmsports.com",
    "prestosports.com",
    "hudl.com",
    "nfhsnetwork.com",
    "hugedomains.com",
    "sedo.com",
    "godaddy.com",
];

/// Link text that marks navigation chrome rather than a member school.
const IGNORE_LINK_TEXT: &[&str] = &[
    "ticket", "shop", "store", "donate", "stream", "watch", "follow", "app", "privacy", "terms",
    "copyright", "service", "sidearm", "powered",
];

/// Enough harvested members to stop trying further paths.
const ENOUGH_MEMBERS: usize = 8;

/// Folds the failure kinds recorded for one source into its stored class.
#[must_use]
pub const fn classify(kind: &FailureKind) -> FailureClass {
    match kind {
        FailureKind::Fetch(
            FetchErrorKind::DnsFailure
            | FetchErrorKind::ConnectionRefused
            | FetchErrorKind::TlsCertificate,
        ) => FailureClass::DnsDead,
        FailureKind::Fetch(FetchErrorKind::DeadEndRedirect) => FailureClass::RedirectOnly,
        FailureKind::NeedsRendering => FailureClass::NeedsRendering,
        FailureKind::ParseEmpty | FailureKind::NotDiscoverable => FailureClass::ReachableNoData,
        FailureKind::Fetch(_) => FailureClass::Unclassified,
    }
}

/// Whether the conference directory can plausibly fix this class.
#[must_use]
pub const fn is_repairable(class: FailureClass) -> bool {
    matches!(class, FailureClass::DnsDead | FailureClass::RedirectOnly)
}

#[must_use]
pub fn conference_url(conference: &str, division: Division) -> Option<&'static str> {
    let qualified = format!("{conference}_{}", division.as_str());
    CONFERENCE_URLS
        .iter()
        .find(|(k, _)| *k == qualified)
        .or_else(|| CONFERENCE_URLS.iter().find(|(k, _)| *k == conference))
        .map(|(_, v)| *v)
}

/// Institution name reduced for fuzzy matching: suffixes dropped, St./Mt.
/// expanded, parentheticals removed, punctuation stripped.
#[must_use]
pub fn normalize_institution(name: &str) -> String {
    static PAREN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\([^)]*\)").unwrap());
    static PUNCT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9\s]").unwrap());
    static WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

    let mut n = name.to_ascii_lowercase().trim().to_owned();
    for suffix in [" university", " college", " institute of technology"] {
        n = n.replace(suffix, "");
    }
    n = n.replace("st.", "state").replace("mt.", "mount");
    n = PAREN.replace_all(&n, "").into_owned();
    n = PUNCT.replace_all(&n, "").into_owned();
    WS.replace_all(&n, " ").trim().to_owned()
}

/// A harvested (institution name, athletics base URL) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberLink {
    pub name: String,
    pub base_url: String,
}

fn registrable_host(host: &str) -> String {
    let parts: Vec<&str> = host.rsplitn(3, '.').collect();
    if parts.len() >= 2 {
        format!("{}.{}", parts[1], parts[0])
    } else {
        host.to_owned()
    }
}

/// External school links on a conference page: embedded JSON first (SIDEARM
/// conference sites ship member objects in "data":[…] arrays), anchors
/// second.
#[must_use]
pub fn harvest_members(html: &str, conference_host: &str) -> Vec<MemberLink> {
    let mut members = embedded_json_members(html);
    let mut seen_urls: Vec<String> = members.iter().map(|m| m.base_url.clone()).collect();

    static LINK_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));
    static IMG_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("img[alt]").expect("static selector"));

    let conf_host = conference_host.trim_start_matches("www.");
    let doc = Html::parse_document(html);
    for a in doc.select(&LINK_SEL) {
        let href = a.attr("href").unwrap_or_default().trim();
        if href.is_empty() || href.starts_with('#') || href.starts_with("javascript") {
            continue;
        }
        let Ok(url) = Url::parse(href) else { continue };
        let Some(host) = url.host_str() else { continue };
        if host.trim_start_matches("www.") == conf_host {
            continue;
        }
        if IGNORE_DOMAINS.contains(&registrable_host(host).as_str()) {
            continue;
        }

        let base_url = format!("{}://{host}", url.scheme());
        let mut name: String = a.text().collect::<String>().trim().to_owned();
        if name.len() < 3 || name.len() > 80 {
            let Some(alt) = a.select(&IMG_SEL).find_map(|img| img.attr("alt")) else {
                continue;
            };
            name = alt.trim().to_owned();
        }
        let lower = name.to_ascii_lowercase();
        if IGNORE_LINK_TEXT.iter().any(|w| lower.contains(w)) {
            continue;
        }
        if !seen_urls.contains(&base_url) {
            seen_urls.push(base_url.clone());
            members.push(MemberLink { name, base_url });
        }
    }
    members
}

/// Pulls member objects out of embedded `"data":[…]` arrays, found by
/// bracket counting since the page is not valid JSON around them.
fn embedded_json_members(html: &str) -> Vec<MemberLink> {
    static DATA_ARRAY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""data"\s*:\s*\["#).unwrap());
    const SCAN_LIMIT: usize = 100_000;

    for m in DATA_ARRAY.find_iter(html) {
        let start = m.end() - 1;
        let bytes = html.as_bytes();
        let mut depth = 0usize;
        let mut end = start;
        for (off, &b) in bytes[start..bytes.len().min(start + SCAN_LIMIT)].iter().enumerate() {
            match b {
                b'[' => depth += 1,
                b']' => {
                    depth -= 1;
                    if depth == 0 {
                        end = start + off + 1;
                        break;
                    }
                }
                _ => {}
            }
        }
        if end <= start {
            continue;
        }
        let Ok(Value::Array(arr)) = serde_json::from_str(&html[start..end]) else {
            continue;
        };
        let members: Vec<MemberLink> = arr
            .iter()
            .filter_map(Value::as_object)
            .filter_map(|obj| {
                let url = obj.get("athletics_website").and_then(Value::as_str)?;
                if !url.starts_with("http") {
                    return None;
                }
                let name = obj
                    .get("title")
                    .or_else(|| obj.get("short_display"))
                    .or_else(|| obj.get("school_name"))
                    .and_then(Value::as_str)?;
                if name.is_empty() || name.contains("Logo") {
                    return None;
                }
                Some(MemberLink {
                    name: name.to_owned(),
                    base_url: url.trim_end_matches('/').to_owned(),
                })
            })
            .collect();
        if !members.is_empty() {
            return members;
        }
    }
    Vec::new()
}

/// Matches a harvested name/URL to one of the broken institutions. Exact
/// name, then normalized, then containment or leading-word, then slug in
/// hostname.
#[must_use]
pub fn match_institution(member: &MemberLink, targets: &[&str]) -> Option<usize> {
    if let Some(i) = targets.iter().position(|t| *t == member.name) {
        return Some(i);
    }
    let norm = normalize_institution(&member.name);
    if norm.is_empty() {
        return None;
    }
    let normalized: Vec<String> = targets.iter().map(|t| normalize_institution(t)).collect();
    if let Some(i) = normalized.iter().position(|t| *t == norm) {
        return Some(i);
    }
    for (i, t) in normalized.iter().enumerate() {
        if t.contains(&norm) || norm.contains(t.as_str()) {
            return Some(i);
        }
        let (Some(first_t), Some(first_n)) =
            (t.split(' ').next(), norm.split(' ').next())
        else {
            continue;
        };
        if first_t == first_n && first_t.len() > 3 {
            return Some(i);
        }
    }
    let member_host = Url::parse(&member.base_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.replace('.', "")))?;
    for (i, t) in normalized.iter().enumerate() {
        let slug: String = t.chars().filter(char::is_ascii_lowercase).collect();
        if slug.len() > 4 && member_host.contains(&slug) {
            return Some(i);
        }
    }
    None
}

/// One applied (or previewed) registry correction.
#[derive(Debug)]
pub struct Repair {
    pub source_id: i64,
    pub institution: String,
    pub old_base: String,
    pub new_base: String,
}

/// Repairs repairable sources via their conference directories. With
/// `dry_run` the corrections are computed and logged but nothing changes.
pub async fn repair_sources(
    handler: &RequestHandler,
    sources: &mut [SourceEntry],
    dry_run: bool,
) -> Vec<Repair> {
    // Group broken sources by conference directory.
    let mut groups: HashMap<&'static str, Vec<usize>> = HashMap::new();
    for (i, s) in sources.iter().enumerate() {
        if !is_repairable(s.failure_class) {
            continue;
        }
        match conference_url(&s.conference, s.division) {
            Some(url) => groups.entry(url).or_default().push(i),
            None => {
                tracing::debug!(
                    target: "recover",
                    "[#{}] no directory for conference {:?}",
                    s.id,
                    s.conference,
                );
            }
        }
    }

    let mut repairs = Vec::new();
    for (conf_url, indices) in groups {
        let conf_host = Url::parse(conf_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned))
            .unwrap_or_default();

        let mut members: Vec<MemberLink> = Vec::new();
        for path in MEMBER_PATHS {
            let url = format!("{conf_url}{path}");
            let Ok(page) = handler.fetch(&url).await else {
                continue;
            };
            for member in harvest_members(&page.body, &conf_host) {
                if !members.iter().any(|m| m.base_url == member.base_url) {
                    members.push(member);
                }
            }
            if members.len() >= ENOUGH_MEMBERS {
                break;
            }
        }
        if members.is_empty() {
            tracing::info!(target: "recover", "no members harvested from {conf_url}");
            continue;
        }

        let names: Vec<&str> = indices.iter().map(|&i| sources[i].institution.as_str()).collect();
        let mut matched: Vec<Option<MemberLink>> = vec![None; indices.len()];
        for member in members {
            if let Some(pos) = match_institution(&member, &names) {
                matched[pos].get_or_insert(member);
            }
        }

        for (pos, member) in matched.into_iter().enumerate() {
            let Some(member) = member else { continue };
            let idx = indices[pos];
            let s = &mut sources[idx];
            if member.base_url == s.base_url {
                continue;
            }
            tracing::info!(
                target: "recover",
                "\x1b[32m[#{}] {} moves {} -> {}{}\x1b[0m",
                s.id,
                s.institution,
                s.base_url,
                member.base_url,
                if dry_run { " (dry run)" } else { "" },
            );
            repairs.push(Repair {
                source_id: s.id,
                institution: s.institution.clone(),
                old_base: s.base_url.clone(),
                new_base: member.base_url.clone(),
            });
            if !dry_run {
                s.base_url = member.base_url;
                s.roster_url = None;
                s.stats_url = None;
                s.consecutive_failures = 0;
                s.failure_class = FailureClass::Unclassified;
            }
        }
    }
    repairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_from_failure_kinds() {
        assert_eq!(
            classify(&FailureKind::Fetch(FetchErrorKind::DnsFailure)),
            FailureClass::DnsDead
        );
        assert_eq!(
            classify(&FailureKind::Fetch(FetchErrorKind::DeadEndRedirect)),
            FailureClass::RedirectOnly
        );
        assert_eq!(classify(&FailureKind::ParseEmpty), FailureClass::ReachableNoData);
        assert_eq!(classify(&FailureKind::NeedsRendering), FailureClass::NeedsRendering);
        assert_eq!(
            classify(&FailureKind::Fetch(FetchErrorKind::Timeout)),
            FailureClass::Unclassified
        );
        assert!(is_repairable(FailureClass::DnsDead));
        assert!(!is_repairable(FailureClass::ReachableNoData));
    }

    #[test]
    fn division_qualified_conference_lookup() {
        assert_eq!(conference_url("MIAA", Division::D2), Some("https://themiaa.com"));
        assert_eq!(conference_url("MIAA", Division::D3), Some("https://miaa.org"));
        assert_eq!(conference_url("RMAC", Division::D2), Some("https://rmacsports.org"));
        assert_eq!(conference_url("Nonexistent", Division::D1), None);
    }

    #[test]
    fn institution_normalization() {
        assert_eq!(normalize_institution("St. Mary's University"), "state marys");
        assert_eq!(normalize_institution("Mt. Olive College"), "mount olive");
        assert_eq!(normalize_institution("Indiana (PA)"), "indiana");
        assert_eq!(
            normalize_institution("Fort   Valley State University"),
            "fort valley state"
        );
    }

    #[test]
    fn harvest_skips_social_and_vendor_links() {
        let html = r#"
            <a href="https://twitter.com/theconf">Follow us</a>
            <a href="https://www.gostate.edu/">State University</a>
            <a href="https://theconf.org/about">About</a>
            <a href="https://tickets.example.com/">Buy Tickets</a>
            <a href="https://gotech.edu/"><img alt="Tech University" src="/t.png"></a>
        "#;
        let members = harvest_members(html, "theconf.org");
        assert_eq!(
            members,
            vec![
                MemberLink {
                    name: "State University".into(),
                    base_url: "https://www.gostate.edu".into()
                },
                MemberLink {
                    name: "Tech University".into(),
                    base_url: "https://gotech.edu".into()
                },
            ]
        );
    }

    #[test]
    fn embedded_json_members_win_over_anchors() {
        let html = r#"<script>window.conf = {"data":[
            {"title":"Fort Valley State University","athletics_website":"https://fvsuathletics.com/"},
            {"title":"Team Logo","athletics_website":"https://cdn.example.com/logo"}
        ]};</script>"#;
        let members = harvest_members(html, "thesiac.com");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].base_url, "https://fvsuathletics.com");
    }

    #[test]
    fn fuzzy_matching_strategies() {
        let targets = ["Fort Valley State University", "Indiana (PA)"];
        let exact = MemberLink {
            name: "Fort Valley State".into(),
            base_url: "https://fvsu.example".into(),
        };
        assert_eq!(match_institution(&exact, &targets), Some(0));

        let leading = MemberLink {
            name: "Indiana University of Pennsylvania".into(),
            base_url: "https://iupathletics.example".into(),
        };
        assert_eq!(match_institution(&leading, &targets), Some(1));

        let none = MemberLink {
            name: "Completely Different".into(),
            base_url: "https://elsewhere.example".into(),
        };
        assert_eq!(match_institution(&none, &targets), None);
    }
}
