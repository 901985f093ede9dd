//! Headless browser sessions for UI checks.
//!
//! A [`BrowserSession`] owns one Chromium instance and one page for the
//! duration of a single test. Element lookups go through [`Locator`], which
//! compiles to a small DOM query evaluated in the page.

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::error::CdpError;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::eventual::{wait_until, WaitCategory};
use crate::probe::ProbeError;

/// Default viewport, matching a typical laptop browser window.
pub const DEFAULT_VIEWPORT: (u32, u32) = (1280, 720);

/// Viewport used for the full-stack screenshots.
pub const FULL_HD_VIEWPORT: (u32, u32) = (1920, 1080);

/// No new resource loads for this long counts as network idle.
const NETWORK_IDLE_QUIET: Duration = Duration::from_millis(500);

/// Upper bound on waiting for network idle after a navigation.
const NETWORK_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

const NETWORK_IDLE_POLL: Duration = Duration::from_millis(100);

/// Resource count once the document has loaded, -1 before.
const RESOURCE_COUNT_JS: &str = r#"
(() => document.readyState === 'complete'
    ? performance.getEntriesByType('resource').length
    : -1)()
"#;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("Browser protocol error: {0}")]
    Cdp(#[from] CdpError),

    #[error("Unexpected script result: {0}")]
    Script(#[from] serde_json::Error),

    #[error("Element not found: {0}")]
    NotFound(String),

    #[error("Failed to write screenshot {path}: {source}")]
    Screenshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// How to find an element on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// First element matching a CSS selector.
    Css(String),

    /// Innermost rendered element whose text contains the string
    /// (case-insensitive).
    Text(String),

    /// First element matching a CSS selector whose text contains the string.
    CssWithText { css: String, text: String },
}

impl Locator {
    pub fn css(css: impl Into<String>) -> Self {
        Locator::Css(css.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Locator::Text(text.into())
    }

    pub fn css_with_text(css: impl Into<String>, text: impl Into<String>) -> Self {
        Locator::CssWithText {
            css: css.into(),
            text: text.into(),
        }
    }

    /// JS expression evaluating to the element or `null`.
    fn find_js(&self) -> String {
        match self {
            Locator::Css(css) => format!("document.querySelector({})", js_string(css)),
            Locator::Text(text) => format!(
                r#"(() => {{
    if (!document.body) return null;
    const needle = {}.toLowerCase();
    const walker = document.createTreeWalker(document.body, NodeFilter.SHOW_TEXT);
    while (walker.nextNode()) {{
        const el = walker.currentNode.parentElement;
        // Script and style text renders no client rects
        if (!el || el.getClientRects().length === 0) continue;
        if (walker.currentNode.textContent.toLowerCase().includes(needle)) return el;
    }}
    return null;
}})()"#,
                js_string(text)
            ),
            Locator::CssWithText { css, text } => format!(
                "Array.from(document.querySelectorAll({})).find(el => el.textContent.includes({})) || null",
                js_string(css),
                js_string(text)
            ),
        }
    }

    /// JS expression: is the element present, displayed and non-empty.
    fn visible_js(&self) -> String {
        format!(
            r#"(() => {{
    const el = {};
    if (!el) return false;
    const style = window.getComputedStyle(el);
    if (style.visibility === 'hidden' || style.display === 'none') return false;
    const rect = el.getBoundingClientRect();
    return rect.width > 0 && rect.height > 0;
}})()"#,
            self.find_js()
        )
    }

    /// JS expression: click the element, returning whether it was found.
    fn click_js(&self) -> String {
        format!(
            "(() => {{ const el = {}; if (!el) return false; el.click(); return true; }})()",
            self.find_js()
        )
    }

    /// JS expression: the element's text, or `null`.
    fn text_js(&self) -> String {
        format!(
            "(() => {{ const el = {}; return el ? el.textContent : null; }})()",
            self.find_js()
        )
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::Css(css) => write!(f, "{}", css),
            Locator::Text(text) => write!(f, "text={}", text),
            Locator::CssWithText { css, text } => write!(f, "{}:has-text(\"{}\")", css, text),
        }
    }
}

/// Quote a Rust string as a JS string literal.
fn js_string(value: &str) -> String {
    // JSON strings are valid JS string literals
    serde_json::Value::String(value.to_string()).to_string()
}

/// One headless Chromium with a single page.
pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    page: Page,
    screenshot_dir: PathBuf,
}

impl BrowserSession {
    /// Launch with the default viewport.
    pub async fn launch(screenshot_dir: impl Into<PathBuf>) -> Result<Self, BrowserError> {
        Self::launch_with_viewport(screenshot_dir, DEFAULT_VIEWPORT).await
    }

    pub async fn launch_with_viewport(
        screenshot_dir: impl Into<PathBuf>,
        (width, height): (u32, u32),
    ) -> Result<Self, BrowserError> {
        let config = BrowserConfig::builder()
            .no_sandbox()
            .window_size(width, height)
            .viewport(Viewport {
                width,
                height,
                ..Viewport::default()
            })
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .build()
            .map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(_event) = handler.next().await {
                // Drive the CDP connection
            }
        });

        let page = browser.new_page("about:blank").await?;
        info!(width, height, "Browser launched");

        Ok(Self {
            browser,
            handler,
            page,
            screenshot_dir: screenshot_dir.into(),
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Navigate and wait for the load event.
    pub async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        debug!(url, "Navigating");
        self.page.goto(url).await?;
        Ok(())
    }

    /// Navigate, wait for network idle, and return the elapsed time.
    pub async fn load(&self, url: &str) -> Result<Duration, BrowserError> {
        let start = Instant::now();
        self.goto(url).await?;
        self.wait_for_network_idle().await?;
        let elapsed = start.elapsed();
        info!(url, elapsed_ms = elapsed.as_millis() as u64, "Page loaded");
        Ok(elapsed)
    }

    /// Wait until no new resources have loaded for 500ms.
    pub async fn wait_for_network_idle(&self) -> Result<(), BrowserError> {
        let start = Instant::now();
        let mut last_count: i64 = -1;
        let mut quiet_since = Instant::now();

        loop {
            // Navigations can tear down the execution context mid-poll
            let count = self.evaluate::<i64>(RESOURCE_COUNT_JS).await.unwrap_or(-1);

            if count < 0 || count != last_count {
                last_count = count;
                quiet_since = Instant::now();
            } else if quiet_since.elapsed() >= NETWORK_IDLE_QUIET {
                return Ok(());
            }

            if start.elapsed() >= NETWORK_IDLE_TIMEOUT {
                return Err(ProbeError::Timeout {
                    what: "network idle".to_string(),
                    timeout: NETWORK_IDLE_TIMEOUT,
                }
                .into());
            }
            tokio::time::sleep(NETWORK_IDLE_POLL).await;
        }
    }

    async fn evaluate<T: DeserializeOwned>(&self, js: &str) -> Result<T, BrowserError> {
        let result = self.page.evaluate(js).await?;
        Ok(result.into_value::<T>()?)
    }

    /// Evaluate an expression that may yield `null` or `undefined`.
    async fn evaluate_optional<T: DeserializeOwned>(
        &self,
        js: &str,
    ) -> Result<Option<T>, BrowserError> {
        let result = self.page.evaluate(js).await?;
        Ok(optional_value(result.value())?)
    }

    pub async fn title(&self) -> Result<String, BrowserError> {
        Ok(self.page.get_title().await?.unwrap_or_default())
    }

    pub async fn is_visible(&self, locator: &Locator) -> Result<bool, BrowserError> {
        self.evaluate::<bool>(&locator.visible_js()).await
    }

    /// Poll for visibility; `false` once the category timeout passes.
    pub async fn visible_within(&self, locator: &Locator, category: WaitCategory) -> bool {
        let session = self;
        wait_until(category, move || async move {
            session.is_visible(locator).await.unwrap_or(false)
        })
        .await
    }

    /// Poll for visibility; a timeout is an error.
    pub async fn expect_visible(
        &self,
        locator: &Locator,
        category: WaitCategory,
    ) -> Result<(), BrowserError> {
        if self.visible_within(locator, category).await {
            Ok(())
        } else {
            Err(ProbeError::Timeout {
                what: format!("{} to be visible", locator),
                timeout: category.timeout(),
            }
            .into())
        }
    }

    /// Click the element via the DOM.
    pub async fn click(&self, locator: &Locator) -> Result<(), BrowserError> {
        if self.evaluate::<bool>(&locator.click_js()).await? {
            debug!(%locator, "Clicked");
            Ok(())
        } else {
            Err(BrowserError::NotFound(locator.to_string()))
        }
    }

    /// Focus the element matching `css` and type `text` with real key events.
    pub async fn type_into(&self, css: &str, text: &str) -> Result<(), BrowserError> {
        self.page
            .find_element(css)
            .await
            .map_err(|_| BrowserError::NotFound(css.to_string()))?
            .click()
            .await?
            .type_str(text)
            .await?;
        Ok(())
    }

    /// Text content of the element, if present.
    pub async fn text_content(&self, locator: &Locator) -> Result<Option<String>, BrowserError> {
        self.evaluate_optional::<String>(&locator.text_js()).await
    }

    /// Number of elements matching `css`.
    pub async fn count(&self, css: &str) -> Result<usize, BrowserError> {
        let js = format!("document.querySelectorAll({}).length", js_string(css));
        self.evaluate::<usize>(&js).await
    }

    /// Write a PNG of the page to `<screenshot_dir>/<name>`.
    pub async fn screenshot(&self, name: &str, full_page: bool) -> Result<PathBuf, BrowserError> {
        let path = self.screenshot_dir.join(name);
        ensure_dir(&self.screenshot_dir).await?;

        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(full_page)
            .build();
        self.page.save_screenshot(params, &path).await?;

        info!(path = %path.display(), "Screenshot saved");
        Ok(path)
    }

    /// Close the browser.
    pub async fn close(mut self) {
        let _ = self.browser.close().await;
        self.handler.abort();
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        // Can't await in drop; the child process is killed with the Browser
        self.handler.abort();
    }
}

/// `None` for a missing or `null` script result, the decoded value otherwise.
fn optional_value<T: DeserializeOwned>(
    value: Option<&serde_json::Value>,
) -> Result<Option<T>, serde_json::Error> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone()).map(Some),
    }
}

async fn ensure_dir(dir: &Path) -> Result<(), BrowserError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| BrowserError::Screenshot {
            path: dir.to_path_buf(),
            source,
        })
}

/// Log in to Grafana through its login form.
///
/// A fresh install asks to change the default password once; the `Skip`
/// button is clicked when it shows up within 3s and ignored otherwise.
pub async fn grafana_login(
    session: &BrowserSession,
    base_url: &str,
    user: &str,
    password: &SecretString,
) -> Result<(), BrowserError> {
    session.goto(base_url).await?;
    session
        .expect_visible(&Locator::css(r#"input[name="user"]"#), WaitCategory::ElementVisible)
        .await?;

    session.type_into(r#"input[name="user"]"#, user).await?;
    session
        .type_into(r#"input[name="password"]"#, password.expose_secret())
        .await?;
    session
        .click(&Locator::css_with_text("button", "Log in"))
        .await?;

    let skip = Locator::css_with_text("button", "Skip");
    if session
        .visible_within(&skip, WaitCategory::OptionalPrompt)
        .await
    {
        session.click(&skip).await?;
        info!("Skipped password change prompt");
    } else {
        debug!("No password change prompt");
    }

    Ok(())
}
