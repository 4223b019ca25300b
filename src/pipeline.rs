//! Run orchestration. One `Pipeline` owns the transport, the renderer and
//! the database pool; sources are scraped concurrently with
//! `buffer_unordered`, but within a single source everything is strictly
//! sequential so per-domain pacing holds. A source that fails is recorded
//! and classified; it never aborts the run.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::{stream, StreamExt};
use time::OffsetDateTime;

use crate::config::Config;
use crate::db::Db;
use crate::discover::{self, DiscoveredUrls};
use crate::error::{FailureKind, FailureRecord, FetchErrorKind};
use crate::fetch::{FetchConfig, RequestHandler};
use crate::parse::{self, BattingLine, PitchingLine, RosterRecord, TeamStats};
use crate::recover;
use crate::registry::{FailureClass, ResourceKind, SourceEntry};
use crate::render::{self, Renderer};
use crate::resolve::{self, Resolution};
use crate::schedule::{self, CoverageReport, PlanOptions};

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub force: bool,
    /// Plan and print, fetch nothing, persist nothing.
    pub dry_run: bool,
    /// Cap the plan at this many sources (diagnostic sample runs).
    pub limit: Option<usize>,
}

/// Everything one source produced this run. The updated entry goes back to
/// the registry whether the scrape worked or not.
pub struct SourceOutcome {
    pub entry: SourceEntry,
    pub players: usize,
    pub failures: Vec<FailureRecord>,
    pub db_error: Option<String>,
}

/// Extends a roster with minimal records for names that only appear in the
/// stat tables, so every stat line ends up linked to a player row.
#[must_use]
pub fn merge_rosters(mut roster: Vec<RosterRecord>, stats: &TeamStats) -> Vec<RosterRecord> {
    // Parsers can emit the same player twice (ld+json pages repeat entries);
    // duplicate keys would make the bulk player upsert reject the batch.
    let mut known: HashSet<String> = HashSet::new();
    roster.retain(|r| known.insert(r.key()));
    let stat_names = stats
        .batting
        .iter()
        .map(|l| l.name.as_str())
        .chain(stats.pitching.iter().map(|l| l.name.as_str()));
    for name in stat_names {
        let Some(record) = RosterRecord::from_name(name) else {
            continue;
        };
        if known.insert(record.key()) {
            roster.push(record);
        }
    }
    roster
}

enum Attempt<T> {
    Got(String, T, &'static str),
    Empty { url: String, body: String },
    Failed(FetchErrorKind),
}

enum Rendered<T> {
    Got(T, &'static str),
    StillEmpty,
    Unavailable,
}

/// Site crawl memo: at most one discovery crawl per source per run, shared
/// between the roster and stats passes.
#[derive(Default)]
struct DiscoveryCache(Option<Option<DiscoveredUrls>>);

impl DiscoveryCache {
    async fn get(
        &mut self,
        handler: &RequestHandler,
        entry: &SourceEntry,
    ) -> Option<&DiscoveredUrls> {
        if self.0.is_none() {
            self.0 = Some(discover::discover(handler, entry).await);
        }
        self.0.as_ref().and_then(Option::as_ref)
    }
}

pub struct Pipeline {
    cfg: Config,
    handler: RequestHandler,
    renderer: Arc<Renderer>,
    db: Db,
}

impl Pipeline {
    pub fn new(cfg: Config, db: Db) -> anyhow::Result<Self> {
        let handler = RequestHandler::new(FetchConfig::from(&cfg))?;
        let renderer = Renderer::new(cfg.render_enabled);
        Ok(Self {
            cfg,
            handler,
            renderer,
            db,
        })
    }

    pub async fn run(&self, opts: RunOptions) -> anyhow::Result<()> {
        self.db.init_schema().await?;
        let mut sources = self.db.load_registry().await?;
        anyhow::ensure!(
            !sources.is_empty(),
            "source registry is empty; seed the sources table first"
        );

        let now = OffsetDateTime::now_utc();
        let mut planned =
            schedule::plan(&sources, &self.cfg, now, PlanOptions { force: opts.force });
        if let Some(limit) = opts.limit {
            planned.truncate(limit);
        }
        tracing::info!(
            target: "run",
            "{} of {} sources due",
            planned.len(),
            sources.len(),
        );

        if opts.dry_run {
            for &i in &planned {
                let s = &sources[i];
                println!(
                    "#{} {} [{}] {}",
                    s.id,
                    s.institution,
                    s.division.as_str(),
                    s.base_url
                );
            }
            return Ok(());
        }
        if planned.is_empty() {
            return Ok(());
        }

        let log_id = self.db.log_run_start().await?;
        let jobs: Vec<(usize, SourceEntry)> =
            planned.iter().map(|&i| (i, sources[i].clone())).collect();
        let mut results = stream::iter(jobs)
            .map(|(i, entry)| async move { (i, self.scrape_source(entry).await) })
            .buffer_unordered(self.cfg.global_concurrency);

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let mut scraped = 0_i32;
        let mut total_players = 0_usize;
        let mut errors: Vec<String> = Vec::new();
        let mut interrupted = false;

        loop {
            tokio::select! {
                next = results.next() => {
                    let Some((i, outcome)) = next else { break };
                    if outcome.players > 0 {
                        scraped += 1;
                        total_players += outcome.players;
                    }
                    errors.extend(outcome.failures.iter().map(ToString::to_string));
                    if let Some(e) = outcome.db_error {
                        errors.push(e);
                    }
                    sources[i] = outcome.entry;
                    if let Err(e) = self.db.save_source(&sources[i]).await {
                        tracing::warn!(target: "db", "failed to save source #{}: {e}", sources[i].id);
                    }
                }
                _ = &mut ctrl_c => {
                    tracing::warn!(target: "run", "interrupt received, abandoning remaining sources");
                    interrupted = true;
                    break;
                }
            }
        }
        drop(results);

        self.db
            .log_run_end(log_id, scraped, total_players as i32, &errors, !interrupted)
            .await?;

        tracing::info!(
            target: "run",
            "\x1b[32m{scraped} sources, {total_players} players\x1b[0m, {} errors",
            errors.len(),
        );
        println!("{}", CoverageReport::build(&sources, &self.cfg, now));
        anyhow::ensure!(!interrupted, "run interrupted");
        Ok(())
    }

    /// Roster first, then stats, then one persistence pass. Sequential by
    /// design: both resources usually live on the same domain.
    async fn scrape_source(&self, mut entry: SourceEntry) -> SourceOutcome {
        let mut failures = Vec::new();
        let mut discovery = DiscoveryCache::default();

        let roster = match self
            .acquire(&entry, ResourceKind::Roster, &mut discovery, parse::roster::parse)
            .await
        {
            Ok((url, records, strategy)) => {
                tracing::info!(
                    target: "scrape",
                    "[#{}] {}: \x1b[32m{} players\x1b[0m via {strategy}",
                    entry.id,
                    entry.institution,
                    records.len(),
                );
                entry.cache_url(ResourceKind::Roster, url);
                records
            }
            Err(kind) => {
                failures.push(FailureRecord {
                    source_id: entry.id,
                    institution: entry.institution.clone(),
                    resource: ResourceKind::Roster,
                    strategy: None,
                    kind,
                });
                entry.record_failure(recover::classify(&kind));
                if domain_unusable(kind) {
                    // Stats live on the same domain; no point probing it.
                    return SourceOutcome {
                        entry,
                        players: 0,
                        failures,
                        db_error: None,
                    };
                }
                Vec::new()
            }
        };

        let stats = match self
            .acquire(&entry, ResourceKind::Stats, &mut discovery, parse::stats::parse)
            .await
        {
            Ok((url, records, strategy)) => {
                tracing::info!(
                    target: "scrape",
                    "[#{}] {}: \x1b[32m{} batting, {} pitching\x1b[0m via {strategy}",
                    entry.id,
                    entry.institution,
                    records.batting.len(),
                    records.pitching.len(),
                );
                entry.cache_url(ResourceKind::Stats, url);
                records
            }
            Err(kind) => {
                failures.push(FailureRecord {
                    source_id: entry.id,
                    institution: entry.institution.clone(),
                    resource: ResourceKind::Stats,
                    strategy: None,
                    kind,
                });
                // A roster alone still counts; only classify the source by
                // the stats failure when the roster also came up empty.
                if roster.is_empty() {
                    entry.record_failure(recover::classify(&kind));
                }
                TeamStats::default()
            }
        };

        let merged = merge_rosters(roster, &stats);
        if merged.is_empty() {
            return SourceOutcome {
                entry,
                players: 0,
                failures,
                db_error: None,
            };
        }

        match self.persist(&entry, &merged, &stats).await {
            Ok(()) => {
                entry.record_success(OffsetDateTime::now_utc());
                SourceOutcome {
                    entry,
                    players: merged.len(),
                    failures,
                    db_error: None,
                }
            }
            Err(e) => {
                tracing::error!(
                    target: "db",
                    "[#{}] {}: persist failed: {e:#}",
                    entry.id,
                    entry.institution,
                );
                let db_error = Some(format!("{}: persist failed: {e:#}", entry.institution));
                SourceOutcome {
                    entry,
                    players: 0,
                    failures,
                    db_error,
                }
            }
        }
    }

    /// One resource end to end: candidate URLs, render fallback for app
    /// shells, then a site crawl as the last escalation.
    async fn acquire<T>(
        &self,
        entry: &SourceEntry,
        kind: ResourceKind,
        discovery: &mut DiscoveryCache,
        extract: impl Fn(&str) -> Option<(T, &'static str)>,
    ) -> Result<(String, T, &'static str), FailureKind> {
        let mut needs_render = false;

        let failed = match resolve::resolve_resource(
            &self.handler,
            entry,
            kind,
            self.cfg.season_year,
            &extract,
        )
        .await
        {
            Resolution::Parsed {
                url,
                records,
                strategy,
            } => return Ok((url, records, strategy)),
            Resolution::Empty { url, body } => {
                if render::wants_rendering(&body)
                    || entry.failure_class == FailureClass::NeedsRendering
                {
                    match self.render_pass(&url, &extract).await {
                        Rendered::Got(records, strategy) => return Ok((url, records, strategy)),
                        Rendered::StillEmpty => {}
                        Rendered::Unavailable => needs_render = true,
                    }
                }
                None
            }
            Resolution::Failed(e) => Some(e),
        };

        // Hard transport failures: crawling the same domain cannot help.
        if let Some(e) = failed {
            if !e.is_not_found() {
                return Err(e.into());
            }
        }

        if let Some(found) = discovery.get(&self.handler, entry).await {
            let url = match kind {
                ResourceKind::Roster => Some(found.roster.as_str()),
                ResourceKind::Stats => found.stats.as_deref(),
            };
            if let Some(url) = url {
                match self.try_url(url, &extract).await {
                    Attempt::Got(url, records, strategy) => return Ok((url, records, strategy)),
                    Attempt::Empty { url, body } => {
                        if render::wants_rendering(&body) {
                            match self.render_pass(&url, &extract).await {
                                Rendered::Got(records, strategy) => {
                                    return Ok((url, records, strategy));
                                }
                                Rendered::StillEmpty => {}
                                Rendered::Unavailable => needs_render = true,
                            }
                        }
                    }
                    Attempt::Failed(_) => {}
                }
            }
        }

        Err(if needs_render {
            FailureKind::NeedsRendering
        } else if matches!(failed, Some(e) if e.is_not_found()) {
            FailureKind::NotDiscoverable
        } else {
            FailureKind::ParseEmpty
        })
    }

    async fn try_url<T>(
        &self,
        url: &str,
        extract: &impl Fn(&str) -> Option<(T, &'static str)>,
    ) -> Attempt<T> {
        match self.handler.fetch(url).await {
            Ok(page) => match extract(&page.body) {
                Some((records, strategy)) => Attempt::Got(page.final_url, records, strategy),
                None => Attempt::Empty {
                    url: page.final_url,
                    body: page.body,
                },
            },
            Err(e) => Attempt::Failed(e),
        }
    }

    async fn render_pass<T>(
        &self,
        url: &str,
        extract: &impl Fn(&str) -> Option<(T, &'static str)>,
    ) -> Rendered<T> {
        match Arc::clone(&self.renderer).render(url).await {
            Some(html) => match extract(&html) {
                Some((records, strategy)) => Rendered::Got(records, strategy),
                None => Rendered::StillEmpty,
            },
            None => Rendered::Unavailable,
        }
    }

    async fn persist(
        &self,
        entry: &SourceEntry,
        roster: &[RosterRecord],
        stats: &TeamStats,
    ) -> anyhow::Result<()> {
        let team_id = self
            .db
            .upsert_team(&entry.institution, entry.division, &entry.conference)
            .await?;
        let player_ids = self.db.upsert_players(team_id, roster).await?;

        let hitting: Vec<(i64, &BattingLine)> = stats
            .batting
            .iter()
            .filter_map(|l| player_ids.get(&l.key()).map(|&id| (id, l)))
            .collect();
        let pitching: Vec<(i64, &PitchingLine)> = stats
            .pitching
            .iter()
            .filter_map(|l| player_ids.get(&l.key()).map(|&id| (id, l)))
            .collect();

        self.db.upsert_hitting(self.cfg.season_year, &hitting).await?;
        self.db.upsert_pitching(self.cfg.season_year, &pitching).await?;
        Ok(())
    }

    /// Coverage against the full registry plus recent activity.
    pub async fn status(&self) -> anyhow::Result<()> {
        self.db.init_schema().await?;
        let sources = self.db.load_registry().await?;
        let now = OffsetDateTime::now_utc();
        println!("{}", CoverageReport::build(&sources, &self.cfg, now));

        let since = now - time::Duration::hours(24);
        let recent = self.db.sources_scraped_since(since).await?;
        println!("  scraped in last 24h: {recent}");
        Ok(())
    }

    /// Repairs dead or redirecting sources via their conference directories
    /// and saves the corrected entries.
    pub async fn recover(&self, dry_run: bool) -> anyhow::Result<()> {
        self.db.init_schema().await?;
        let mut sources = self.db.load_registry().await?;
        let repairs = recover::repair_sources(&self.handler, &mut sources, dry_run).await;
        if repairs.is_empty() {
            tracing::info!(target: "recover", "nothing to repair");
            return Ok(());
        }
        if dry_run {
            tracing::info!(target: "recover", "{} repairs found (dry run, not saved)", repairs.len());
            return Ok(());
        }
        for repair in &repairs {
            if let Some(entry) = sources.iter().find(|s| s.id == repair.source_id) {
                self.db.save_source(entry).await?;
            }
        }
        tracing::info!(target: "recover", "\x1b[32m{} sources repaired\x1b[0m", repairs.len());
        Ok(())
    }
}

const fn domain_unusable(kind: FailureKind) -> bool {
    matches!(
        kind,
        FailureKind::Fetch(
            FetchErrorKind::DnsFailure
                | FetchErrorKind::ConnectionRefused
                | FetchErrorKind::TlsCertificate
                | FetchErrorKind::Blocked(_)
                | FetchErrorKind::CircuitOpen
                | FetchErrorKind::Timeout,
        )
    )
}

/// One-shot fetch-and-parse of a single URL, both parsers, results to
/// stdout. No database, no registry.
pub async fn probe(cfg: &Config, url: &str) -> anyhow::Result<()> {
    let handler = RequestHandler::new(FetchConfig::from(cfg))?;
    let page = handler
        .fetch(url)
        .await
        .map_err(|e| anyhow::anyhow!("fetch failed: {e}"))?;
    println!("{} {} ({} bytes)", page.status, page.final_url, page.body.len());

    match parse::roster::parse(&page.body) {
        Some((records, strategy)) => {
            println!("roster: {} players via {strategy}", records.len());
            for r in &records {
                println!(
                    "  {} {} [{}]",
                    r.jersey_number.as_deref().unwrap_or("-"),
                    r.name,
                    r.positions.join("/"),
                );
            }
        }
        None => println!("roster: no strategy matched"),
    }

    match parse::stats::parse(&page.body) {
        Some((stats, strategy)) => {
            println!(
                "stats: {} batting, {} pitching via {strategy}",
                stats.batting.len(),
                stats.pitching.len(),
            );
        }
        None => println!("stats: no strategy matched"),
    }

    if render::wants_rendering(&page.body) {
        println!("page looks client-rendered; a run would use the browser fallback");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batting(name: &str) -> BattingLine {
        BattingLine {
            name: name.to_owned(),
            ..BattingLine::default()
        }
    }

    fn pitching(name: &str) -> PitchingLine {
        PitchingLine {
            name: name.to_owned(),
            ..PitchingLine::default()
        }
    }

    #[test]
    fn merge_adds_stats_only_names_once() {
        let roster = vec![RosterRecord::from_name("John Smith").unwrap()];
        let stats = TeamStats {
            batting: vec![batting("Smith, John"), batting("Webb, Carter")],
            pitching: vec![pitching("Webb, Carter"), pitching("Lee, Daniel")],
        };

        let merged = merge_rosters(roster, &stats);
        assert_eq!(merged.len(), 3);
        // "Smith, John" flips to the roster spelling and dedups.
        assert_eq!(merged[0].name, "John Smith");
        assert_eq!(merged[1].name, "Carter Webb");
        assert_eq!(merged[2].name, "Daniel Lee");
    }

    #[test]
    fn merge_dedupes_duplicate_roster_entries() {
        let roster = vec![
            RosterRecord::from_name("Jane Doe").unwrap(),
            RosterRecord::from_name("Doe, Jane").unwrap(),
            RosterRecord::from_name("Ann Lee").unwrap(),
        ];
        let merged = merge_rosters(roster, &TeamStats::default());
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name, "Jane Doe");
    }

    #[test]
    fn merge_drops_stat_shaped_names() {
        let stats = TeamStats {
            batting: vec![batting(".333"), batting("Ortiz, David")],
            pitching: Vec::new(),
        };
        let merged = merge_rosters(Vec::new(), &stats);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "David Ortiz");
    }

    #[test]
    fn domain_unusable_skips_only_hard_failures() {
        assert!(domain_unusable(FailureKind::Fetch(FetchErrorKind::DnsFailure)));
        assert!(domain_unusable(FailureKind::Fetch(FetchErrorKind::CircuitOpen)));
        assert!(!domain_unusable(FailureKind::Fetch(FetchErrorKind::NotFound)));
        assert!(!domain_unusable(FailureKind::ParseEmpty));
        assert!(!domain_unusable(FailureKind::NeedsRendering));
    }
}
