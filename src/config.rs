use core::time::Duration;

use time::{macros::format_description, Date};

/// Everything tunable about a run. Loaded once at startup from environment
/// variables with defaults matching the production deployment; a bad value
/// is the one fatal condition in the system.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Sources are not scraped before this date unless forced; it also marks
    /// the start of the current season epoch.
    pub season_start: Date,
    /// Season label attached to persisted stat rows.
    pub season_year: i32,
    pub max_sources_per_run: usize,
    /// Concurrent sources in flight across different domains.
    pub global_concurrency: usize,
    /// Minimum spacing between two requests to the same domain.
    pub per_domain_interval: Duration,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub breaker_threshold: u32,
    pub breaker_cooldown: Duration,
    pub render_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            season_start: Date::from_calendar_date(2026, time::Month::February, 14)
                .expect("valid built-in date"),
            season_year: 2026,
            max_sources_per_run: 500,
            global_concurrency: 8,
            per_domain_interval: Duration::from_secs(4),
            request_timeout: Duration::from_secs(30),
            max_retries: 2,
            retry_base: Duration::from_secs(10),
            retry_max: Duration::from_secs(30),
            breaker_threshold: 10,
            // Was 30 minutes; dead domains no longer trip the breaker so the
            // window only has to outlast genuine throttling.
            breaker_cooldown: Duration::from_secs(600),
            render_enabled: true,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut cfg = Self::default();

        // Commands that touch the database check for this at connect time.
        cfg.database_url = std::env::var("DATABASE_URL").unwrap_or_default();

        if let Ok(s) = std::env::var("SEASON_START") {
            let fmt = format_description!("[year]-[month]-[day]");
            cfg.season_start = Date::parse(&s, &fmt)
                .map_err(|e| anyhow::anyhow!("bad SEASON_START {s:?}: {e}"))?;
            cfg.season_year = cfg.season_start.year();
        }

        if let Some(n) = env_parse("MAX_SOURCES_PER_RUN")? {
            cfg.max_sources_per_run = n;
        }
        if let Some(n) = env_parse("GLOBAL_CONCURRENCY")? {
            cfg.global_concurrency = usize::max(n, 1);
        }
        if let Some(n) = env_parse::<u64>("PER_DOMAIN_INTERVAL_SECS")? {
            cfg.per_domain_interval = Duration::from_secs(n);
        }
        if let Some(n) = env_parse::<u64>("REQUEST_TIMEOUT_SECS")? {
            cfg.request_timeout = Duration::from_secs(n);
        }
        if let Some(n) = env_parse("MAX_RETRIES")? {
            cfg.max_retries = n;
        }
        if let Some(n) = env_parse::<u64>("RETRY_BASE_SECS")? {
            cfg.retry_base = Duration::from_secs(n);
        }
        if let Some(n) = env_parse::<u64>("RETRY_MAX_SECS")? {
            cfg.retry_max = Duration::from_secs(n);
        }
        if let Some(n) = env_parse("BREAKER_THRESHOLD")? {
            cfg.breaker_threshold = n;
        }
        if let Some(n) = env_parse::<u64>("BREAKER_COOLDOWN_SECS")? {
            cfg.breaker_cooldown = Duration::from_secs(n);
        }
        if let Ok(s) = std::env::var("RENDER_ENABLED") {
            cfg.render_enabled = !matches!(s.as_str(), "0" | "false" | "no");
        }

        Ok(cfg)
    }

    /// Start of the current season epoch as a point in time.
    #[must_use]
    pub fn epoch_start(&self) -> time::OffsetDateTime {
        self.season_start.midnight().assume_utc()
    }
}

fn env_parse<T: core::str::FromStr>(name: &str) -> anyhow::Result<Option<T>>
where
    T::Err: core::fmt::Display,
{
    match std::env::var(name) {
        Ok(s) => s
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("bad {name} {s:?}: {e}")),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.season_year, 2026);
        assert!(cfg.breaker_threshold > 0);
        assert!(cfg.retry_base <= cfg.retry_max);
        assert_eq!(
            cfg.epoch_start(),
            time::macros::datetime!(2026-02-14 0:00 UTC)
        );
    }
}
