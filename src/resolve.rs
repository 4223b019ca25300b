//! Candidate-URL resolution. Most athletics sites expose the roster and
//! season stats under one of a handful of well-known paths; the template
//! family narrows which ones to try first, and the cross-CMS list covers
//! everything else before we fall back to crawling.

use crate::error::FetchErrorKind;
use crate::fetch::RequestHandler;
use crate::registry::{ResourceKind, SourceEntry, TemplateFamily};

/// Cross-CMS candidate paths, in observed hit-rate order.
const GENERIC_ROSTER_PATHS: &[&str] = &[
    "/sports/baseball/roster",
    "/sport/m-basebl/roster",
    "/sports/bsb/roster",
    "/sports/mens-baseball/roster",
    "/teams/baseball/roster",
    "/roster.aspx?path=baseball",
    "/athletics/baseball/roster",
    "/baseball/roster/",
];

const GENERIC_STATS_PATHS: &[&str] = &[
    "/sports/baseball/stats",
    "/sport/m-basebl/stats",
    "/sports/bsb/stats",
    "/sports/mens-baseball/stats",
    "/teams/baseball/stats",
    "/teamstats.aspx?path=baseball",
    "/athletics/baseball/stats",
    "/baseball/stats/",
];

const PRESTO_ROSTER_PATHS: &[&str] = &[
    "/sport/m-basebl/roster",
    "/sports/bsb/roster",
    "/sports/mens-baseball/roster",
];

const PRESTO_STATS_PATHS: &[&str] = &[
    "/sport/m-basebl/stats",
    "/sports/bsb/stats",
    "/sports/mens-baseball/stats",
];

/// Ordered candidate URLs for one resource of one source. The cached
/// known-good URL always probes first; family-preferred paths (including the
/// season-qualified variant) come next, then the full cross-CMS list.
/// Order-preserving dedup.
#[must_use]
pub fn candidate_urls(entry: &SourceEntry, kind: ResourceKind, season_year: i32) -> Vec<String> {
    let (leaf, generic) = match kind {
        ResourceKind::Roster => ("roster", GENERIC_ROSTER_PATHS),
        ResourceKind::Stats => ("stats", GENERIC_STATS_PATHS),
    };

    let mut urls: Vec<String> = Vec::new();
    let mut push = |url: String| {
        if !urls.contains(&url) {
            urls.push(url);
        }
    };

    if let Some(cached) = entry.cached_url(kind) {
        push(cached.to_owned());
    }

    let absolute = |path: &str| {
        if path.starts_with("http") {
            path.to_owned()
        } else {
            format!("{}{path}", entry.base_url)
        }
    };

    match entry.family {
        TemplateFamily::Sidearm | TemplateFamily::SidearmNext => {
            push(absolute(&format!("/sports/baseball/{leaf}")));
            push(absolute(&format!("/sports/baseball/{leaf}/{season_year}")));
        }
        TemplateFamily::PrestoSports => {
            let preferred = match kind {
                ResourceKind::Roster => PRESTO_ROSTER_PATHS,
                ResourceKind::Stats => PRESTO_STATS_PATHS,
            };
            for path in preferred {
                push(absolute(path));
            }
        }
        TemplateFamily::Generic => {
            push(absolute(&format!("/sports/baseball/{leaf}")));
            push(absolute(&format!("/sports/baseball/{leaf}/{season_year}")));
        }
    }
    for path in generic {
        push(absolute(path));
    }

    urls
}

/// Outcome of probing one resource across its candidates.
#[derive(Debug)]
pub enum Resolution<T> {
    /// A candidate fetched and parsed; `url` is the winner to cache.
    Parsed {
        url: String,
        records: T,
        strategy: &'static str,
    },
    /// A candidate fetched but no strategy produced records; the body is
    /// kept for the render-fallback marker check.
    Empty { url: String, body: String },
    /// No candidate fetched. Carries the most telling error seen.
    Failed(FetchErrorKind),
}

/// Probes candidates in order until one yields records. Hard domain errors
/// (dead DNS, refused, bad certificate, open breaker, timeouts) abort the
/// remaining candidates; plain 404s just advance.
pub async fn resolve_resource<T>(
    handler: &RequestHandler,
    entry: &SourceEntry,
    kind: ResourceKind,
    season_year: i32,
    extract: impl Fn(&str) -> Option<(T, &'static str)>,
) -> Resolution<T> {
    let mut last_error = FetchErrorKind::NotFound;
    let mut empty: Option<(String, String)> = None;

    for url in candidate_urls(entry, kind, season_year) {
        tracing::debug!(target: "resolve", "[#{}] trying {} {url}", entry.id, kind.as_str());
        match handler.fetch(&url).await {
            Ok(page) => {
                if let Some((records, strategy)) = extract(&page.body) {
                    return Resolution::Parsed {
                        url: page.final_url,
                        records,
                        strategy,
                    };
                }
                if empty.is_none() {
                    empty = Some((page.final_url, page.body));
                }
            }
            Err(e) if e.is_terminal() || matches!(e, FetchErrorKind::CircuitOpen | FetchErrorKind::Timeout) => {
                tracing::info!(
                    target: "resolve",
                    "[#{}] domain unusable ({e}), skipping remaining {} candidates",
                    entry.id,
                    kind.as_str(),
                );
                return match empty {
                    Some((url, body)) => Resolution::Empty { url, body },
                    None => Resolution::Failed(e),
                };
            }
            Err(e) => {
                if !e.is_not_found() {
                    last_error = e;
                }
            }
        }
    }

    match empty {
        Some((url, body)) => Resolution::Empty { url, body },
        None => Resolution::Failed(last_error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Division, FailureClass};

    fn entry(family: TemplateFamily) -> SourceEntry {
        let mut e = SourceEntry::new(
            7,
            "State University".to_owned(),
            Division::D1,
            "Big Conference".to_owned(),
            "https://gostate.com/".to_owned(),
        );
        e.family = family;
        e.failure_class = FailureClass::Unclassified;
        e
    }

    #[test]
    fn cached_url_probes_first_and_is_not_duplicated() {
        let mut e = entry(TemplateFamily::Sidearm);
        e.cache_url(ResourceKind::Roster, "https://gostate.com/sports/baseball/roster".to_owned());

        let urls = candidate_urls(&e, ResourceKind::Roster, 2026);
        assert_eq!(urls[0], "https://gostate.com/sports/baseball/roster");
        assert_eq!(urls[1], "https://gostate.com/sports/baseball/roster/2026");
        assert_eq!(
            urls.iter()
                .filter(|u| *u == "https://gostate.com/sports/baseball/roster")
                .count(),
            1
        );
    }

    #[test]
    fn presto_prefers_its_own_paths_then_falls_back() {
        let e = entry(TemplateFamily::PrestoSports);
        let urls = candidate_urls(&e, ResourceKind::Stats, 2026);
        assert_eq!(urls[0], "https://gostate.com/sport/m-basebl/stats");
        assert!(urls.contains(&"https://gostate.com/teamstats.aspx?path=baseball".to_owned()));
        assert!(urls.contains(&"https://gostate.com/sports/baseball/stats".to_owned()));
    }

    #[test]
    fn generic_covers_the_full_cross_cms_list() {
        let e = entry(TemplateFamily::Generic);
        let urls = candidate_urls(&e, ResourceKind::Roster, 2026);
        assert_eq!(urls[0], "https://gostate.com/sports/baseball/roster");
        assert!(urls.contains(&"https://gostate.com/roster.aspx?path=baseball".to_owned()));
        assert!(urls.contains(&"https://gostate.com/baseball/roster/".to_owned()));
        // Season-qualified variant present exactly once.
        assert_eq!(
            urls.iter().filter(|u| u.ends_with("/2026")).count(),
            1
        );
    }
}
