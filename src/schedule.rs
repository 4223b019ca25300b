//! Run planning. A source is due when the season has started and it has not
//! already been scraped successfully this season; `--force` bypasses both
//! gates. Never-scraped sources go first, then the stalest, with division
//! priority breaking ties so the top flight stays freshest.

use time::OffsetDateTime;

use crate::config::Config;
use crate::registry::{Division, SourceEntry};

#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions {
    /// Ignore the season gate and the scraped-this-epoch skip.
    pub force: bool,
}

/// Picks and orders the sources for one run, capped at
/// `max_sources_per_run`. Indices into the caller's registry slice.
#[must_use]
pub fn plan(
    sources: &[SourceEntry],
    cfg: &Config,
    now: OffsetDateTime,
    opts: PlanOptions,
) -> Vec<usize> {
    let epoch_start = cfg.epoch_start();
    if !opts.force && now < epoch_start {
        tracing::info!(
            target: "schedule",
            "season starts {}, nothing due",
            cfg.season_start,
        );
        return Vec::new();
    }

    let mut due: Vec<usize> = sources
        .iter()
        .enumerate()
        .filter(|(_, s)| opts.force || !s.scraped_in_epoch(epoch_start))
        .map(|(i, _)| i)
        .collect();

    // Never-scraped first (last_success None sorts ahead), then stalest,
    // division priority as tiebreak, id for stable output.
    due.sort_by_key(|&i| {
        let s = &sources[i];
        (s.last_success, s.division.priority(), s.id)
    });
    due.truncate(cfg.max_sources_per_run);
    due
}

/// Per-division progress against the full registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct DivisionCoverage {
    pub total: usize,
    pub scraped: usize,
}

#[derive(Debug)]
pub struct CoverageReport {
    pub divisions: [(Division, DivisionCoverage); 3],
    pub due_now: usize,
}

impl CoverageReport {
    #[must_use]
    pub fn build(sources: &[SourceEntry], cfg: &Config, now: OffsetDateTime) -> Self {
        let epoch_start = cfg.epoch_start();
        let mut divisions = [
            (Division::D1, DivisionCoverage::default()),
            (Division::D2, DivisionCoverage::default()),
            (Division::D3, DivisionCoverage::default()),
        ];
        for s in sources {
            let slot = &mut divisions[s.division.priority() as usize].1;
            slot.total += 1;
            if s.scraped_in_epoch(epoch_start) {
                slot.scraped += 1;
            }
        }
        let due_now = plan(sources, cfg, now, PlanOptions::default()).len();
        Self { divisions, due_now }
    }
}

impl core::fmt::Display for CoverageReport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let total: usize = self.divisions.iter().map(|(_, c)| c.total).sum();
        let scraped: usize = self.divisions.iter().map(|(_, c)| c.scraped).sum();
        let pct = |n: usize, d: usize| if d == 0 { 0.0 } else { 100.0 * n as f64 / d as f64 };

        writeln!(f, "coverage: {scraped}/{total} sources this season ({:.1}%)", pct(scraped, total))?;
        for (division, c) in &self.divisions {
            writeln!(
                f,
                "  {}: {}/{} ({:.1}%)",
                division.as_str(),
                c.scraped,
                c.total,
                pct(c.scraped, c.total),
            )?;
        }
        write!(f, "  due now: {}", self.due_now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Division;
    use time::macros::datetime;

    fn source(id: i64, division: Division, last_success: Option<OffsetDateTime>) -> SourceEntry {
        let mut s = SourceEntry::new(
            id,
            format!("School {id}"),
            division,
            "Conf",
            format!("https://s{id}.edu"),
        );
        s.last_success = last_success;
        s
    }

    const NOW: OffsetDateTime = datetime!(2026-03-01 12:00 UTC);

    #[test]
    fn season_gate_blocks_until_forced() {
        let cfg = Config::default();
        let sources = vec![source(1, Division::D1, None)];
        let before = datetime!(2026-01-10 0:00 UTC);

        assert!(plan(&sources, &cfg, before, PlanOptions::default()).is_empty());
        assert_eq!(
            plan(&sources, &cfg, before, PlanOptions { force: true }),
            vec![0]
        );
    }

    #[test]
    fn scraped_this_epoch_is_skipped_unless_forced() {
        let cfg = Config::default();
        let sources = vec![
            source(1, Division::D1, Some(datetime!(2026-02-20 0:00 UTC))),
            source(2, Division::D1, None),
            // Last season's success does not count.
            source(3, Division::D1, Some(datetime!(2025-05-01 0:00 UTC))),
        ];

        assert_eq!(plan(&sources, &cfg, NOW, PlanOptions::default()), vec![1, 2]);
        assert_eq!(
            plan(&sources, &cfg, NOW, PlanOptions { force: true }).len(),
            3
        );
    }

    #[test]
    fn never_scraped_sorts_before_stale_and_d1_breaks_ties() {
        let cfg = Config::default();
        let old = Some(datetime!(2025-04-01 0:00 UTC));
        let older = Some(datetime!(2025-03-01 0:00 UTC));
        let sources = vec![
            source(1, Division::D1, old),
            source(2, Division::D3, None),
            source(3, Division::D1, None),
            source(4, Division::D2, older),
        ];

        // Never-scraped (D1 before D3), then stalest first.
        assert_eq!(
            plan(&sources, &cfg, NOW, PlanOptions::default()),
            vec![2, 1, 3, 0]
        );
    }

    #[test]
    fn cap_applies_after_ordering() {
        let mut cfg = Config::default();
        cfg.max_sources_per_run = 2;
        let sources = vec![
            source(1, Division::D3, None),
            source(2, Division::D1, None),
            source(3, Division::D2, None),
        ];
        assert_eq!(plan(&sources, &cfg, NOW, PlanOptions::default()), vec![1, 2]);
    }

    #[test]
    fn coverage_counts_by_division() {
        let cfg = Config::default();
        let sources = vec![
            source(1, Division::D1, Some(datetime!(2026-02-20 0:00 UTC))),
            source(2, Division::D1, None),
            source(3, Division::D2, None),
        ];
        let report = CoverageReport::build(&sources, &cfg, NOW);
        assert_eq!(report.divisions[0].1.total, 2);
        assert_eq!(report.divisions[0].1.scraped, 1);
        assert_eq!(report.due_now, 2);
    }
}
