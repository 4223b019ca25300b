use core::time::Duration;
use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Instant,
};

use compact_str::CompactString;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, RETRY_AFTER, USER_AGENT},
    Client, StatusCode, Url,
};
use tokio::time::sleep;

use crate::{config::Config, error::FetchErrorKind};

pub mod breaker;
pub mod limiter;

use breaker::CircuitBreaker;
use limiter::TokenBucket;

const USER_AGENTS: [&str; 6] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:123.0) Gecko/20100101 Firefox/123.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.3 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36 Edg/121.0.0.0",
];

/// A fresh user agent every 15-25 requests; the window itself is re-drawn at
/// each rotation so the cadence never settles into a fixed period.
const UA_ROTATE_MIN: u64 = 15;
const UA_ROTATE_MAX: u64 = 25;

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub url: String,
    /// Where redirects actually landed.
    pub final_url: String,
    pub status: u16,
    pub body: String,
    pub content_type: Option<CompactString>,
    pub elapsed: Duration,
}

impl FetchResult {
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|c| c.contains("json") || c.contains("javascript"))
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub per_domain_interval: Duration,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub breaker_threshold: u32,
    pub breaker_cooldown: Duration,
}

impl From<&Config> for FetchConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            per_domain_interval: cfg.per_domain_interval,
            request_timeout: cfg.request_timeout,
            max_retries: cfg.max_retries,
            retry_base: cfg.retry_base,
            retry_max: cfg.retry_max,
            breaker_threshold: cfg.breaker_threshold,
            breaker_cooldown: cfg.breaker_cooldown,
        }
    }
}

struct DomainState {
    /// At most one in-flight request per domain, held across the whole
    /// request including retries.
    gate: tokio::sync::Mutex<()>,
    bucket: Mutex<TokenBucket>,
    breaker: Mutex<CircuitBreaker>,
}

/// Rate-limited, retried, circuit-broken HTTP transport. One instance is
/// shared by every worker in a run; all per-domain state lives in the
/// `domains` table keyed by host.
pub struct RequestHandler {
    client: Client,
    cfg: FetchConfig,
    domains: DashMap<CompactString, Arc<DomainState>>,
    request_count: AtomicU64,
    ua_index: AtomicUsize,
    /// Request count at which the user agent rotates next.
    next_ua_rotation: AtomicU64,
}

impl RequestHandler {
    pub fn new(cfg: FetchConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(cfg.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::limited(10))
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            cfg,
            domains: DashMap::new(),
            request_count: AtomicU64::new(0),
            ua_index: AtomicUsize::new(0),
            next_ua_rotation: AtomicU64::new(0),
        })
    }

    fn domain_state(&self, domain: &str) -> Arc<DomainState> {
        self.domains
            .entry(CompactString::from(domain))
            .or_insert_with(|| {
                Arc::new(DomainState {
                    gate: tokio::sync::Mutex::new(()),
                    bucket: Mutex::new(TokenBucket::new(self.cfg.per_domain_interval)),
                    breaker: Mutex::new(CircuitBreaker::new(
                        self.cfg.breaker_threshold,
                        self.cfg.breaker_cooldown,
                    )),
                })
            })
            .clone()
    }

    fn headers(&self) -> HeaderMap {
        let count = self.request_count.fetch_add(1, Ordering::Relaxed);
        if count >= self.next_ua_rotation.load(Ordering::Relaxed) {
            let mut rng = rand::rng();
            self.ua_index
                .store(rng.random_range(0..USER_AGENTS.len()), Ordering::Relaxed);
            self.next_ua_rotation.store(
                count + rng.random_range(UA_ROTATE_MIN..=UA_ROTATE_MAX),
                Ordering::Relaxed,
            );
        }
        let agent = USER_AGENTS[self.ua_index.load(Ordering::Relaxed) % USER_AGENTS.len()];

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(agent));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
        headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
        headers.insert("sec-fetch-site", HeaderValue::from_static("none"));
        headers.insert("sec-fetch-user", HeaderValue::from_static("?1"));
        headers
    }

    /// Fetches one URL through the full pipeline: breaker check, per-domain
    /// gate, token wait, retries with backoff. Terminal kinds come back
    /// untouched by the breaker.
    pub async fn fetch(&self, url: &str) -> Result<FetchResult, FetchErrorKind> {
        let parsed = Url::parse(url).map_err(|_| FetchErrorKind::Other)?;
        let Some(domain) = parsed.host_str().map(CompactString::from) else {
            return Err(FetchErrorKind::Other);
        };
        let state = self.domain_state(&domain);

        if !state.breaker.lock().allow(Instant::now()) {
            tracing::debug!(target: "fetch", "{domain}: circuit open, skipping {url}");
            return Err(FetchErrorKind::CircuitOpen);
        }

        let _gate = state.gate.lock().await;

        loop {
            let wait = match state.bucket.lock().poll(Instant::now()) {
                Ok(()) => break,
                Err(wait) => wait,
            };
            sleep(wait).await;
        }

        let mut attempt = 0u32;
        loop {
            let started = Instant::now();
            let outcome = self.attempt(&parsed, url, started).await;

            let (kind, retry_after) = match outcome {
                Ok(result) => {
                    state.breaker.lock().on_success();
                    return Ok(result);
                }
                Err(e) => e,
            };

            if kind.is_terminal() || kind.is_not_found() {
                // No retry, and by invariant no breaker mutation either.
                return Err(kind);
            }

            state.breaker.lock().on_transient_failure(Instant::now());

            if attempt >= self.cfg.max_retries {
                tracing::warn!(target: "fetch", "{url}: giving up after {} attempts: {kind}", attempt + 1);
                return Err(kind);
            }

            let delay = retry_after
                .unwrap_or_else(|| backoff_delay(attempt, self.cfg.retry_base, self.cfg.retry_max));
            tracing::debug!(target: "fetch", "{url}: {kind}, retrying in {delay:?}");
            sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt(
        &self,
        parsed: &Url,
        url: &str,
        started: Instant,
    ) -> Result<FetchResult, (FetchErrorKind, Option<Duration>)> {
        let response = self
            .client
            .get(parsed.clone())
            .headers(self.headers())
            .send()
            .await
            .map_err(|e| (classify_reqwest_error(&e), None))?;

        let status = response.status();

        if status.is_success() {
            let final_url = response.url().clone();
            if is_dead_end(parsed, &final_url) {
                tracing::debug!(target: "fetch", "{url}: redirected to homepage {final_url}");
                return Err((FetchErrorKind::DeadEndRedirect, None));
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(CompactString::from);

            let body = response
                .text()
                .await
                .map_err(|_| (FetchErrorKind::Other, None))?;

            return Ok(FetchResult {
                url: url.to_owned(),
                final_url: final_url.to_string(),
                status: status.as_u16(),
                body,
                content_type,
                elapsed: started.elapsed(),
            });
        }

        match status {
            StatusCode::NOT_FOUND | StatusCode::GONE | StatusCode::METHOD_NOT_ALLOWED => {
                Err((FetchErrorKind::NotFound, None))
            }
            StatusCode::FORBIDDEN => Err((FetchErrorKind::Blocked(status.as_u16()), None)),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(|secs| Duration::from_secs(secs).min(self.cfg.retry_max));
                Err((FetchErrorKind::ServerError(429), retry_after))
            }
            s if s.is_client_error() => Err((FetchErrorKind::NotFound, None)),
            s => Err((FetchErrorKind::ServerError(s.as_u16()), None)),
        }
    }

    /// Breaker snapshot for one domain, used by status reporting.
    #[must_use]
    pub fn breaker_state(&self, domain: &str) -> Option<breaker::CircuitState> {
        self.domains.get(domain).map(|s| s.breaker.lock().state())
    }
}

/// A 2xx whose final URL is the site homepage means the path does not exist
/// and the CMS "helpfully" redirected; the content is not the resource we
/// asked for.
#[must_use]
pub fn is_dead_end(requested: &Url, final_url: &Url) -> bool {
    // Requesting the homepage itself is always legitimate.
    if requested.path().trim_matches('/').len() < 5 {
        return false;
    }
    if final_url.host_str() != requested.host_str() {
        return false;
    }
    final_url.path().trim_matches('/').len() < 5 && final_url.query().is_none()
}

fn classify_reqwest_error(e: &reqwest::Error) -> FetchErrorKind {
    if e.is_timeout() {
        return FetchErrorKind::Timeout;
    }

    let mut text = e.to_string().to_ascii_lowercase();
    let mut source = std::error::Error::source(e);
    while let Some(s) = source {
        text.push(' ');
        text.push_str(&s.to_string().to_ascii_lowercase());
        source = std::error::Error::source(s);
    }

    classify_failure_text(&text).unwrap_or(if e.is_connect() {
        FetchErrorKind::ConnectionRefused
    } else {
        FetchErrorKind::Other
    })
}

/// Maps transport-layer error text onto the taxonomy. reqwest does not expose
/// a structured cause, so this goes by the strings native-tls and the
/// resolver actually produce.
#[must_use]
pub fn classify_failure_text(text: &str) -> Option<FetchErrorKind> {
    if text.contains("certificate") || text.contains("ssl") || text.contains("tls handshake") {
        Some(FetchErrorKind::TlsCertificate)
    } else if text.contains("dns")
        || text.contains("failed to lookup")
        || text.contains("name or service not known")
        || text.contains("no such host")
    {
        Some(FetchErrorKind::DnsFailure)
    } else if text.contains("connection refused") || text.contains("connection reset") {
        Some(FetchErrorKind::ConnectionRefused)
    } else {
        None
    }
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exp = base.saturating_mul(1 << attempt.min(6));
    let capped = exp.min(max);
    let jitter_ms = rand::rng().random_range(0..=capped.as_millis().max(1) as u64 / 4);
    (capped + Duration::from_millis(jitter_ms)).min(max + base / 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn test_cfg() -> FetchConfig {
        FetchConfig {
            per_domain_interval: Duration::from_millis(0),
            request_timeout: Duration::from_secs(10),
            max_retries: 0,
            retry_base: Duration::from_millis(100),
            retry_max: Duration::from_secs(1),
            breaker_threshold: 3,
            breaker_cooldown: Duration::from_secs(60),
        }
    }

    #[test]
    fn ua_rotation_window_stays_within_bounds() {
        let handler = RequestHandler::new(test_cfg()).unwrap();
        handler.headers();
        let first = handler.next_ua_rotation.load(Ordering::Relaxed);
        assert!((UA_ROTATE_MIN..=UA_ROTATE_MAX).contains(&first));

        for _ in 0..first {
            handler.headers();
        }
        let second = handler.next_ua_rotation.load(Ordering::Relaxed);
        assert!((UA_ROTATE_MIN..=UA_ROTATE_MAX).contains(&(second - first)));
    }

    #[test]
    fn request_headers_carry_browser_fingerprint() {
        let handler = RequestHandler::new(test_cfg()).unwrap();
        let headers = handler.headers();
        let agent = headers.get(USER_AGENT).unwrap().to_str().unwrap();
        assert!(USER_AGENTS.contains(&agent));
        let value = |name: &str| headers.get(name).unwrap().to_str().unwrap().to_owned();
        assert_eq!(value("sec-fetch-dest"), "document");
        assert_eq!(value("sec-fetch-mode"), "navigate");
        assert_eq!(value("sec-fetch-site"), "none");
    }

    #[test]
    fn redirect_to_own_homepage_is_dead_end() {
        let requested = url("https://gocards.com/sports/baseball/roster");
        assert!(is_dead_end(&requested, &url("https://gocards.com/")));
        assert!(is_dead_end(&requested, &url("https://gocards.com")));
    }

    #[test]
    fn genuine_content_is_not_dead_end() {
        let requested = url("https://gocards.com/sports/baseball/roster");
        assert!(!is_dead_end(
            &requested,
            &url("https://gocards.com/sports/baseball/roster/2026")
        ));
        // A different host's page is a generic redirect, not a dead end.
        assert!(!is_dead_end(&requested, &url("https://other.edu/")));
        // Asking for the homepage and getting it back is fine.
        assert!(!is_dead_end(&url("https://gocards.com/"), &url("https://gocards.com/")));
    }

    #[test]
    fn failure_text_classification() {
        assert_eq!(
            classify_failure_text("the certificate was not trusted"),
            Some(FetchErrorKind::TlsCertificate)
        );
        assert_eq!(
            classify_failure_text("dns error: failed to lookup address"),
            Some(FetchErrorKind::DnsFailure)
        );
        assert_eq!(
            classify_failure_text("tcp connect error: connection refused"),
            Some(FetchErrorKind::ConnectionRefused)
        );
        assert_eq!(classify_failure_text("broken pipe"), None);
    }

    /// Regression: a certificate failure must never feed the breaker. The
    /// fetch loop only calls `on_transient_failure` for transient kinds, so
    /// the invariant reduces to the taxonomy itself.
    #[test]
    fn tls_error_never_reaches_breaker() {
        let kind = classify_failure_text("invalid peer certificate").unwrap();
        assert!(kind.is_terminal());
        assert!(!kind.is_transient());

        let mut b = CircuitBreaker::new(1, Duration::from_secs(600));
        let now = Instant::now();
        if kind.is_transient() {
            b.on_transient_failure(now);
        }
        assert_eq!(b.consecutive_failures(), 0);
        assert_eq!(b.state(), breaker::CircuitState::Closed);
    }

    #[test]
    fn backoff_grows_and_respects_cap() {
        let base = Duration::from_secs(10);
        let max = Duration::from_secs(30);
        for attempt in 0..5 {
            let d = backoff_delay(attempt, base, max);
            assert!(d >= base.min(max), "attempt {attempt}: {d:?}");
            assert!(d <= max + base / 2, "attempt {attempt}: {d:?}");
        }
    }
}
