//! Crawl-based URL discovery, the fallback when every candidate path 404s.
//! Three steps, cheapest first: scan the homepage for direct roster/stats
//! links, hop through the sport landing page, then sweep `/sitemap.xml`.
//! Only same-domain links count.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;
use scraper::{Html, Selector};

use crate::fetch::RequestHandler;
use crate::registry::SourceEntry;

static ROSTER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)baseball.*roster",
        r"(?i)roster.*baseball",
        r"(?i)/roster\.aspx\?.*baseball",
        r"(?i)/sport/m-basebl/roster",
        r"(?i)/sports/bsb/.*roster",
        r"(?i)/sports/m-baseb[al]*/.*roster",
        r"(?i)/teams/baseball/roster",
        r"(?i)/athletics/baseball/roster",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static STATS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Boundary before "stat" so hosts like gostate.com do not match.
        r"(?i)baseball.*\bstat",
        r"(?i)\bstat.*baseball",
        r"(?i)/teamstats\.aspx\?.*baseball",
        r"(?i)/sport/m-basebl/stat",
        r"(?i)/sports/bsb/.*stat",
        r"(?i)/sports/m-baseb[al]*/.*stat",
        r"(?i)/teams/baseball/stat",
        r"(?i)/athletics/baseball/stat",
        r"(?i)teamcume\.htm",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static LANDING_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)/sports?/baseball\b",
        r"(?i)/sport/m-basebl\b",
        r"(?i)/sports?/bsb\b",
        r"(?i)/sports?/m-baseb",
        r"(?i)/teams/baseball\b",
        r"(?i)\bbaseball\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static NOT_LANDING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)roster|stats|schedule|recruit").unwrap());
static ROSTER_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\broster\b").unwrap());
static STAT_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bstat").unwrap());
static SITEMAP_LOC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<loc>\s*(.*?)\s*</loc>").unwrap());

/// Crawl result: a roster URL at minimum, a stats URL when one showed up on
/// the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredUrls {
    pub roster: String,
    pub stats: Option<String>,
}

fn any_match(patterns: &[Regex], s: &str) -> bool {
    patterns.iter().any(|p| p.is_match(s))
}

/// (absolute url, href, link text) for every same-domain anchor on the page.
fn same_domain_links(page_url: &str, html: &Html, domain: &str) -> Vec<(String, String, String)> {
    static LINK_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));
    let Ok(base) = Url::parse(page_url) else {
        return Vec::new();
    };
    let mut links = Vec::new();
    for a in html.select(&LINK_SEL) {
        let Some(href) = a.attr("href") else { continue };
        let Ok(url) = base.join(href) else { continue };
        if url.host_str() != Some(domain) {
            continue;
        }
        let text: String = a.text().collect::<String>().trim().to_owned();
        links.push((url.to_string(), href.to_owned(), text));
    }
    links
}

/// First-link-wins scan with the full pattern sets. Used for the homepage
/// and the sitemap alike.
fn scan_for_resources(page_url: &str, html: &Html, domain: &str) -> Option<DiscoveredUrls> {
    let mut roster = None;
    let mut stats = None;
    for (url, href, text) in same_domain_links(page_url, html, domain) {
        if roster.is_none() && (any_match(&ROSTER_PATTERNS, &href) || any_match(&ROSTER_PATTERNS, &text)) {
            roster = Some(url.clone());
        }
        if stats.is_none() && (any_match(&STATS_PATTERNS, &href) || any_match(&STATS_PATTERNS, &text)) {
            stats = Some(url);
        }
        if roster.is_some() && stats.is_some() {
            break;
        }
    }
    roster.map(|roster| DiscoveredUrls { roster, stats })
}

/// Highest-scoring sport landing link on the homepage. Href matches weigh
/// double text matches; links that are already roster/stats/schedule pages
/// are penalized since we want the hub.
fn find_landing(page_url: &str, html: &Html, domain: &str) -> Option<String> {
    let mut best: Option<(i32, String)> = None;
    for (url, href, text) in same_domain_links(page_url, html, domain) {
        let text = text.to_ascii_lowercase();
        let mut score = 0;
        for p in LANDING_PATTERNS.iter() {
            if p.is_match(&href) {
                score += 2;
            }
            if p.is_match(&text) {
                score += 1;
            }
        }
        if NOT_LANDING.is_match(&href) {
            score -= 1;
        }
        if score >= 2 && best.as_ref().is_none_or(|(s, _)| score > *s) {
            best = Some((score, url));
        }
    }
    best.map(|(_, url)| url)
}

/// Scan a landing page where a bare "Roster" / "Stats" link is enough.
fn scan_landing(page_url: &str, html: &Html, domain: &str) -> Option<DiscoveredUrls> {
    let mut roster = None;
    let mut stats = None;
    for (url, href, text) in same_domain_links(page_url, html, domain) {
        if roster.is_none() && (ROSTER_WORD.is_match(&href) || ROSTER_WORD.is_match(&text)) {
            roster = Some(url.clone());
        }
        if stats.is_none() && (STAT_WORD.is_match(&href) || STAT_WORD.is_match(&text)) {
            stats = Some(url);
        }
        if roster.is_some() && stats.is_some() {
            break;
        }
    }
    roster.map(|roster| DiscoveredUrls { roster, stats })
}

/// `<loc>` entries matched against the full pattern sets; sitemaps are XML
/// so this skips the DOM entirely.
fn scan_sitemap(xml: &str) -> Option<DiscoveredUrls> {
    let mut roster = None;
    let mut stats = None;
    for caps in SITEMAP_LOC.captures_iter(xml) {
        let url = caps[1].trim();
        if url.is_empty() {
            continue;
        }
        if roster.is_none() && any_match(&ROSTER_PATTERNS, url) {
            roster = Some(url.to_owned());
        }
        if stats.is_none() && any_match(&STATS_PATTERNS, url) {
            stats = Some(url.to_owned());
        }
        if roster.is_some() && stats.is_some() {
            break;
        }
    }
    roster.map(|roster| DiscoveredUrls { roster, stats })
}

/// Runs the three-step crawl. Fetch failures at any step simply end
/// discovery; the caller records `NotDiscoverable`.
pub async fn discover(handler: &RequestHandler, entry: &SourceEntry) -> Option<DiscoveredUrls> {
    let domain = entry.domain()?;
    tracing::info!(target: "discover", "[#{}] crawling {}", entry.id, entry.base_url);

    let homepage = handler.fetch(&entry.base_url).await.ok()?;
    let doc = Html::parse_document(&homepage.body);

    if let Some(found) = scan_for_resources(&homepage.final_url, &doc, &domain) {
        tracing::info!(target: "discover", "[#{}] roster link on homepage: {}", entry.id, found.roster);
        return Some(found);
    }

    if let Some(landing_url) = find_landing(&homepage.final_url, &doc, &domain) {
        tracing::debug!(target: "discover", "[#{}] landing page {landing_url}", entry.id);
        if let Ok(landing) = handler.fetch(&landing_url).await {
            let landing_doc = Html::parse_document(&landing.body);
            if let Some(found) = scan_landing(&landing.final_url, &landing_doc, &domain) {
                tracing::info!(
                    target: "discover",
                    "[#{}] roster link via landing page: {}",
                    entry.id,
                    found.roster,
                );
                return Some(found);
            }
        }
    }

    let sitemap_url = format!("{}/sitemap.xml", entry.base_url);
    if let Ok(sitemap) = handler.fetch(&sitemap_url).await {
        if let Some(found) = scan_sitemap(&sitemap.body) {
            tracing::info!(target: "discover", "[#{}] roster link via sitemap: {}", entry.id, found.roster);
            return Some(found);
        }
    }

    tracing::info!(target: "discover", "[#{}] nothing discoverable", entry.id);
    None
}
