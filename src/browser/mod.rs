//! Browser abstraction.
//!
//! Everything above this module talks to a [`PortalPage`], never to Chrome
//! directly. The real implementation lives in [`chrome`]; tests drive the
//! same code paths with a scripted fake.

#[cfg(feature = "chrome")]
pub mod chrome;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;

use crate::session::SessionCookie;

/// How to find an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Css(String),
    XPath(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    pub fn xpath(expr: impl Into<String>) -> Self {
        Self::XPath(expr.into())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "css:{s}"),
            Locator::XPath(s) => write!(f, "xpath:{s}"),
        }
    }
}

/// Ordered fallback strategies for one logical element.
///
/// Lookups try each strategy in turn and report which one matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorChain {
    label: String,
    strategies: Vec<Locator>,
}

impl LocatorChain {
    pub fn new(label: impl Into<String>, strategies: impl IntoIterator<Item = Locator>) -> Self {
        Self {
            label: label.into(),
            strategies: strategies.into_iter().collect(),
        }
    }

    pub fn single(label: impl Into<String>, locator: Locator) -> Self {
        Self::new(label, [locator])
    }

    /// Human-readable name, also used for snapshot file names.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn strategies(&self) -> &[Locator] {
        &self.strategies
    }
}

/// One browser tab pointed at the portal.
///
/// Lookups that find nothing return `Ok(false)` / `Ok(0)`; `Err` is reserved
/// for the browser itself failing.
#[async_trait]
pub trait PortalPage: Send + Sync {
    /// Navigate and wait for the load event.
    async fn goto(&self, url: &str) -> Result<()>;

    async fn reload(&self) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    async fn is_present(&self, locator: &Locator) -> Result<bool>;

    /// Replace the value of the first matching input.
    async fn fill(&self, locator: &Locator, text: &str) -> Result<()>;

    /// Activate the first matching element.
    async fn click(&self, locator: &Locator) -> Result<()>;

    /// Activate every visible, enabled match. Returns how many were clicked.
    async fn click_all(&self, locator: &Locator) -> Result<usize>;

    /// Serialized DOM of the current document.
    async fn content(&self) -> Result<String>;

    /// PNG of the full page.
    async fn screenshot(&self) -> Result<Vec<u8>>;

    async fn cookies(&self) -> Result<Vec<SessionCookie>>;

    /// Set cookies scoped to `url` (used when a cookie carries no domain).
    async fn set_cookies(&self, url: &str, cookies: &[SessionCookie]) -> Result<()>;

    async fn clear_cookies(&self) -> Result<()>;
}

/// First strategy of `chain` that currently matches, if any.
pub async fn first_present<P>(page: &P, chain: &LocatorChain) -> Result<Option<Locator>>
where
    P: PortalPage + ?Sized,
{
    for locator in chain.strategies() {
        if page.is_present(locator).await? {
            return Ok(Some(locator.clone()));
        }
    }
    Ok(None)
}
