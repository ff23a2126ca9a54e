//! Headless Chrome over the DevTools protocol.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    ClearBrowserCookiesParams, CookieParam, CookieSameSite, TimeSinceEpoch,
};
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use rand::seq::SliceRandom;
use tempfile::TempDir;
use tokio::task::JoinHandle;

use super::{Locator, PortalPage};
use crate::config::ChromeConfig;
use crate::session::SessionCookie;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/127.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
];

const CLICK_JS: &str = "function() { this.click(); }";

const CLICK_IF_VISIBLE_JS: &str = "function() {
    if (this.offsetParent === null || this.disabled) { return false; }
    this.scrollIntoView({ block: 'center' });
    this.click();
    return true;
}";

const CLEAR_VALUE_JS: &str = "function() { this.value = ''; }";

/// One headless browser with a single tab.
///
/// Call [`ChromeSession::close`] when done; the throwaway profile directory
/// is removed when the session is dropped.
pub struct ChromeSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    _profile_dir: TempDir,
}

impl ChromeSession {
    pub async fn launch(config: &ChromeConfig) -> Result<Self> {
        let profile_dir = tempfile::Builder::new()
            .prefix("moneydigest-chrome-")
            .tempdir()
            .context("Failed to create browser profile dir")?;

        let (browser, mut handler) = launch_browser(config, profile_dir.path()).await?;
        let handler_task = tokio::spawn(async move { while (handler.next().await).is_some() {} });

        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to open browser tab")?;

        Ok(Self {
            browser,
            page,
            handler_task,
            _profile_dir: profile_dir,
        })
    }

    pub async fn close(mut self) -> Result<()> {
        let closed = self.browser.close().await;
        let _ = self.browser.wait().await;
        self.handler_task.abort();
        closed.context("Failed to close browser")?;
        Ok(())
    }

    async fn elements(&self, locator: &Locator) -> Result<Vec<Element>> {
        match locator {
            Locator::Css(selector) => Ok(self.page.find_elements(selector.as_str()).await?),
            Locator::XPath(expr) => Ok(search_results(self.page.find_xpaths(expr.as_str()).await)?),
        }
    }

    async fn first(&self, locator: &Locator) -> Result<Element> {
        self.elements(locator)
            .await?
            .into_iter()
            .next()
            .with_context(|| format!("No element matches {locator}"))
    }
}

/// DOM.performSearch answers an empty search with a protocol error; only
/// that case means "no match".
fn search_results<T>(result: Result<Vec<T>, CdpError>) -> Result<Vec<T>, CdpError> {
    match result {
        Err(CdpError::Chrome(_) | CdpError::NotFound) => Ok(Vec::new()),
        other => other,
    }
}

#[async_trait]
impl PortalPage for ChromeSession {
    async fn goto(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .with_context(|| format!("Failed to navigate to {url}"))?;
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        self.page.reload().await.context("Failed to reload page")?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn is_present(&self, locator: &Locator) -> Result<bool> {
        Ok(!self.elements(locator).await?.is_empty())
    }

    async fn fill(&self, locator: &Locator, text: &str) -> Result<()> {
        let element = self.first(locator).await?;
        element.call_js_fn(CLEAR_VALUE_JS, false).await?;
        element.focus().await?;
        element.type_str(text).await?;
        Ok(())
    }

    async fn click(&self, locator: &Locator) -> Result<()> {
        let element = self.first(locator).await?;
        element
            .call_js_fn(CLICK_JS, false)
            .await
            .with_context(|| format!("Failed to click {locator}"))?;
        Ok(())
    }

    async fn click_all(&self, locator: &Locator) -> Result<usize> {
        let mut clicked = 0;
        for element in self.elements(locator).await? {
            match element.call_js_fn(CLICK_IF_VISIBLE_JS, false).await {
                Ok(ret) => {
                    if ret.result.value.as_ref().and_then(|v| v.as_bool()) == Some(true) {
                        clicked += 1;
                    }
                }
                Err(err) => tracing::warn!(locator = %locator, error = %err, "Click failed"),
            }
        }
        Ok(clicked)
    }

    async fn content(&self) -> Result<String> {
        Ok(self.page.content().await?)
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let params = ScreenshotParams::builder().full_page(true).build();
        Ok(self.page.screenshot(params).await?)
    }

    async fn cookies(&self) -> Result<Vec<SessionCookie>> {
        let cookies = self.page.get_cookies().await?;
        Ok(cookies
            .into_iter()
            .map(|c| SessionCookie {
                name: c.name,
                value: c.value,
                domain: Some(c.domain),
                path: Some(c.path),
                expires: (!c.session).then_some(c.expires),
                http_only: c.http_only,
                secure: c.secure,
                same_site: c.same_site.map(|s| s.as_ref().to_string()),
            })
            .collect())
    }

    async fn set_cookies(&self, url: &str, cookies: &[SessionCookie]) -> Result<()> {
        let params: Vec<CookieParam> = cookies
            .iter()
            .map(|c| {
                let mut param = CookieParam::new(c.name.clone(), c.value.clone());
                param.url = Some(url.to_string());
                param.domain = c.domain.clone();
                param.path = c.path.clone();
                param.secure = Some(c.secure);
                param.http_only = Some(c.http_only);
                param.expires = c.expires.map(TimeSinceEpoch::new);
                param.same_site = c
                    .same_site
                    .as_deref()
                    .and_then(|s| s.parse::<CookieSameSite>().ok());
                param
            })
            .collect();

        if !params.is_empty() {
            self.page.set_cookies(params).await?;
        }
        Ok(())
    }

    async fn clear_cookies(&self) -> Result<()> {
        self.page.execute(ClearBrowserCookiesParams::default()).await?;
        Ok(())
    }
}

async fn launch_browser(
    config: &ChromeConfig,
    profile_dir: &Path,
) -> Result<(Browser, chromiumoxide::handler::Handler)> {
    let chrome_path = match &config.chrome_path {
        Some(path) => path.display().to_string(),
        None => find_chrome().context(
            "Chrome/Chromium not found. Install it or set browser.chrome_path in the config.",
        )?,
    };

    let user_agent = USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0]);

    let mut builder = BrowserConfig::builder()
        .chrome_executable(chrome_path)
        .user_data_dir(profile_dir)
        .request_timeout(config.request_timeout)
        .window_size(1920, 1080)
        .arg(format!("--user-agent={user_agent}"))
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--no-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--no-first-run")
        .arg("--no-default-browser-check");
    if !config.headless {
        builder = builder.with_head();
    }

    let browser_config = builder
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to configure browser: {e}"))?;

    let (browser, handler) = Browser::launch(browser_config)
        .await
        .context("Failed to launch browser")?;

    Ok((browser, handler))
}

/// Find Chrome/Chromium executable.
fn find_chrome() -> Option<String> {
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(output) = std::process::Command::new("which").arg(name).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Some(path);
                }
            }
        }
    }

    let candidates = [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/run/current-system/sw/bin/google-chrome",
        "/run/current-system/sw/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    candidates
        .into_iter()
        .find(|candidate| Path::new(candidate).exists())
        .map(str::to_string)
}
