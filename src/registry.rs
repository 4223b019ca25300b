use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Division {
    D1,
    D2,
    D3,
}

impl Division {
    /// Scheduling priority, lower scrapes first.
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            Self::D1 => 0,
            Self::D2 => 1,
            Self::D3 => 2,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::D1 => "D1",
            Self::D2 => "D2",
            Self::D3 => "D3",
        }
    }

    pub const ALL: [Self; 3] = [Self::D1, Self::D2, Self::D3];
}

impl core::str::FromStr for Division {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "D1" | "d1" => Ok(Self::D1),
            "D2" | "d2" => Ok(Self::D2),
            "D3" | "d3" => Ok(Self::D3),
            _ => Err(()),
        }
    }
}

/// Which content-management convention the site follows. Each variant has its
/// own candidate-URL generator in `resolve`; `Generic` covers everything we
/// have no positive identification for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TemplateFamily {
    Sidearm,
    /// Sidearm's nextgen sites, client-hydrated; stats often live only in
    /// the embedded payload.
    SidearmNext,
    PrestoSports,
    #[default]
    Generic,
}

impl TemplateFamily {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sidearm => "sidearm",
            Self::SidearmNext => "sidearm-next",
            Self::PrestoSports => "presto",
            Self::Generic => "generic",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "sidearm" => Self::Sidearm,
            "sidearm-next" => Self::SidearmNext,
            "presto" => Self::PrestoSports,
            _ => Self::Generic,
        }
    }
}

/// Why a source has been failing, as far as we could tell without a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailureClass {
    #[default]
    Unclassified,
    /// Site answers but no strategy extracts records.
    ReachableNoData,
    DnsDead,
    /// Every path redirects to a homepage, here or elsewhere.
    RedirectOnly,
    /// Roster only materializes after client-side rendering.
    NeedsRendering,
}

impl FailureClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unclassified => "unclassified",
            Self::ReachableNoData => "reachable-no-data",
            Self::DnsDead => "dns-dead",
            Self::RedirectOnly => "redirect-only",
            Self::NeedsRendering => "needs-rendering",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "reachable-no-data" => Self::ReachableNoData,
            "dns-dead" => Self::DnsDead,
            "redirect-only" => Self::RedirectOnly,
            "needs-rendering" => Self::NeedsRendering,
            _ => Self::Unclassified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Roster,
    Stats,
}

impl ResourceKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Roster => "roster",
            Self::Stats => "stats",
        }
    }
}

/// One institution in the source registry. Exactly one entry per institution;
/// the id is the stable external identifier the persistence layer keys teams
/// by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    pub id: i64,
    pub institution: String,
    pub division: Division,
    pub conference: String,
    /// Athletics site base, scheme included, no trailing slash.
    pub base_url: String,
    pub family: TemplateFamily,
    /// Known-good URLs cached from a previous successful resolution.
    pub roster_url: Option<String>,
    pub stats_url: Option<String>,
    pub last_success: Option<OffsetDateTime>,
    pub consecutive_failures: i32,
    pub failure_class: FailureClass,
}

impl SourceEntry {
    #[must_use]
    pub fn new(
        id: i64,
        institution: impl Into<String>,
        division: Division,
        conference: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            id,
            institution: institution.into(),
            division,
            conference: conference.into(),
            base_url,
            family: TemplateFamily::Generic,
            roster_url: None,
            stats_url: None,
            last_success: None,
            consecutive_failures: 0,
            failure_class: FailureClass::Unclassified,
        }
    }

    /// Host part of the base URL, the key the breaker and limiter use.
    #[must_use]
    pub fn domain(&self) -> Option<CompactString> {
        let url = reqwest::Url::parse(&self.base_url).ok()?;
        url.host_str().map(CompactString::from)
    }

    #[must_use]
    pub fn cached_url(&self, kind: ResourceKind) -> Option<&str> {
        match kind {
            ResourceKind::Roster => self.roster_url.as_deref(),
            ResourceKind::Stats => self.stats_url.as_deref(),
        }
    }

    pub fn cache_url(&mut self, kind: ResourceKind, url: String) {
        match kind {
            ResourceKind::Roster => self.roster_url = Some(url),
            ResourceKind::Stats => self.stats_url = Some(url),
        }
    }

    /// Any successfully persisted record resets the failure streak.
    pub fn record_success(&mut self, now: OffsetDateTime) {
        self.last_success = Some(now);
        self.consecutive_failures = 0;
        self.failure_class = FailureClass::Unclassified;
    }

    pub fn record_failure(&mut self, class: FailureClass) {
        self.consecutive_failures += 1;
        if class != FailureClass::Unclassified || self.failure_class == FailureClass::Unclassified {
            self.failure_class = class;
        }
    }

    /// True when the source already produced records within the current
    /// season epoch and does not need another visit.
    #[must_use]
    pub fn scraped_in_epoch(&self, epoch_start: OffsetDateTime) -> bool {
        self.last_success.is_some_and(|t| t >= epoch_start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn domain_extraction() {
        let entry = SourceEntry::new(1, "Louisville", Division::D1, "ACC", "https://gocards.com/");
        assert_eq!(entry.base_url, "https://gocards.com");
        assert_eq!(entry.domain().as_deref(), Some("gocards.com"));
    }

    #[test]
    fn success_resets_failure_streak_and_class() {
        let mut entry = SourceEntry::new(1, "X", Division::D2, "SIAC", "https://x.edu");
        entry.record_failure(FailureClass::ReachableNoData);
        entry.record_failure(FailureClass::Unclassified);
        assert_eq!(entry.consecutive_failures, 2);
        assert_eq!(entry.failure_class, FailureClass::ReachableNoData);

        entry.record_success(datetime!(2026-03-01 12:00 UTC));
        assert_eq!(entry.consecutive_failures, 0);
        assert_eq!(entry.failure_class, FailureClass::Unclassified);
    }

    #[test]
    fn epoch_gate() {
        let mut entry = SourceEntry::new(1, "X", Division::D3, "SCIAC", "https://x.edu");
        let epoch = datetime!(2026-02-14 0:00 UTC);
        assert!(!entry.scraped_in_epoch(epoch));
        entry.record_success(datetime!(2026-02-13 12:00 UTC));
        assert!(!entry.scraped_in_epoch(epoch));
        entry.record_success(datetime!(2026-02-20 12:00 UTC));
        assert!(entry.scraped_in_epoch(epoch));
    }
}
