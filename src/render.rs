//! Headless-browser fallback for client-rendered pages. A single browser
//! instance is launched lazily and reused for the whole run; any launch or
//! navigation failure degrades to "mark the source and move on", it never
//! aborts the run.

use std::{ffi::OsStr, sync::Arc, time::Duration};

use headless_chrome::{Browser, LaunchOptions};
use parking_lot::Mutex;
use tokio::task::spawn_blocking;

const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(15);
/// Hydration markers a server-rendered roster/stats page would carry.
const DOM_MARKERS: &[&str] = &["<table", "sidearm-roster-player", "s-person-card"];

/// True when the fetched HTML looks like an app shell: no tables, no player
/// cards, but a script-driven mount point. Those pages only fill in under a
/// real browser.
#[must_use]
pub fn wants_rendering(html: &str) -> bool {
    if DOM_MARKERS.iter().any(|m| html.contains(m)) {
        return false;
    }
    html.contains("__NUXT_DATA__")
        || html.contains("id=\"app\"")
        || html.contains("id=\"root\"")
        || html.contains("window.__INITIAL_STATE__")
}

pub struct Renderer {
    enabled: bool,
    browser: Mutex<Option<Browser>>,
}

impl Renderer {
    #[must_use]
    pub fn new(enabled: bool) -> Arc<Self> {
        Arc::new(Self {
            enabled,
            browser: Mutex::new(None),
        })
    }

    /// Existing browser handle, or a fresh launch.
    fn ensure(&self) -> anyhow::Result<Browser> {
        let mut guard = self.browser.lock();
        if let Some(browser) = &*guard {
            return Ok(browser.clone());
        }
        let browser = Browser::new(LaunchOptions {
            args: vec![OsStr::new("--disable-blink-features=AutomationControlled")],
            headless: true,
            idle_browser_timeout: Duration::from_secs(600),
            ..LaunchOptions::default()
        })?;
        tracing::info!(target: "render", "browser launched");
        *guard = Some(browser.clone());
        Ok(browser)
    }

    /// Loads the page in the browser and returns the rendered HTML, or None
    /// when rendering is disabled or fails. Chrome's API is synchronous, so
    /// the whole interaction runs on the blocking pool.
    pub async fn render(self: Arc<Self>, url: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let url = url.to_owned();
        let log_url = url.clone();

        let result = spawn_blocking(move || -> anyhow::Result<String> {
            let browser = self.ensure()?;
            let tab = browser.new_tab()?;
            tab.set_default_timeout(PAGE_LOAD_TIMEOUT);
            tab.navigate_to(&url)?;
            tab.wait_until_navigated()?;
            // Hydration lags navigation; wait for content, tolerate absence.
            let _ = tab.wait_for_element("table, .sidearm-roster-player, .s-person-card");
            let html = tab.get_content()?;
            let _ = tab.close(true);
            Ok(html)
        })
        .await;

        match result {
            Ok(Ok(html)) => Some(html),
            Ok(Err(e)) => {
                tracing::warn!(target: "render", "render failed for {log_url}: {e:#}");
                None
            }
            Err(e) => {
                tracing::warn!(target: "render", "render task panicked for {log_url}: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_shell_wants_rendering() {
        let shell = r#"<html><body><div id="app"></div><script src="/entry.js"></script></body></html>"#;
        assert!(wants_rendering(shell));
    }

    #[test]
    fn server_rendered_table_does_not() {
        let page = r#"<html><body><div id="app"><table><tr><td>x</td></tr></table></div></body></html>"#;
        assert!(!wants_rendering(page));
    }

    #[test]
    fn plain_error_page_does_not() {
        assert!(!wants_rendering("<html><body><h1>Not Found</h1></body></html>"));
    }
}
