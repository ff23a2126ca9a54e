//! Bounded waits for asynchronously rendered pages.
//!
//! Every page transition goes through [`ReadinessGuard::await_marker`]:
//! navigate, wait for a marker element, and on timeout snapshot the page,
//! back off and navigate again. Exhaustion surfaces as [`ReadinessTimeout`].

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::browser::{first_present, Locator, LocatorChain, PortalPage};
use crate::config::ReadinessConfig;
use crate::debug::DebugSnapshotter;
use crate::portal::{PortalMarkers, ACCOUNT_SELECTOR_PATH};

/// A marker never appeared within the attempt budget.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{marker} did not appear on {url} after {attempts} attempts of {timeout:?} (last url: {last_url})")]
pub struct ReadinessTimeout {
    pub marker: String,
    pub url: String,
    pub attempts: u32,
    pub timeout: Duration,
    pub last_url: String,
}

/// What ended a [`ReadinessGuard::wait_for_url_or_any`] wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arrival {
    Url(String),
    Marker(Locator),
}

/// An intermediate page that has to be clicked through before the
/// requested page renders.
#[derive(Debug, Clone)]
struct Interstitial {
    url_marker: String,
    escape: LocatorChain,
}

#[derive(Debug, Clone)]
pub struct ReadinessGuard {
    policy: ReadinessConfig,
    snapshotter: DebugSnapshotter,
    interstitial: Option<Interstitial>,
}

impl ReadinessGuard {
    pub fn new(policy: ReadinessConfig, snapshotter: DebugSnapshotter) -> Self {
        Self {
            policy,
            snapshotter,
            interstitial: None,
        }
    }

    /// Click through the account selector whenever a navigation lands on it.
    pub fn with_account_selector_escape(mut self, markers: &PortalMarkers) -> Self {
        self.interstitial = Some(Interstitial {
            url_marker: ACCOUNT_SELECTOR_PATH.to_string(),
            escape: markers.account_choice(),
        });
        self
    }

    pub fn policy(&self) -> &ReadinessConfig {
        &self.policy
    }

    pub fn snapshotter(&self) -> &DebugSnapshotter {
        &self.snapshotter
    }

    /// [`Self::await_marker`] with the configured timeout and attempt ceiling.
    pub async fn open<P>(
        &self,
        page: &P,
        url: &str,
        marker: &LocatorChain,
    ) -> Result<Locator, ReadinessTimeout>
    where
        P: PortalPage + ?Sized,
    {
        self.await_marker(
            page,
            url,
            marker,
            self.policy.attempt_timeout,
            self.policy.max_attempts,
        )
        .await
    }

    /// Navigate to `url` and wait for any strategy of `marker`.
    ///
    /// Returns the strategy that matched. Each failed attempt leaves a
    /// snapshot behind and re-navigates after `retry_delay`.
    pub async fn await_marker<P>(
        &self,
        page: &P,
        url: &str,
        marker: &LocatorChain,
        timeout: Duration,
        max_attempts: u32,
    ) -> Result<Locator, ReadinessTimeout>
    where
        P: PortalPage + ?Sized,
    {
        let max_attempts = max_attempts.max(1);

        for attempt in 1..=max_attempts {
            debug!(url, marker = marker.label(), attempt, "Opening page");
            if let Err(err) = page.goto(url).await {
                warn!(url, attempt, error = %format!("{err:#}"), "Navigation failed");
            }

            self.escape_interstitial(page).await;

            if let Some(found) = self.wait_for_any(page, marker, timeout).await {
                debug!(marker = marker.label(), locator = %found, attempt, "Page ready");
                return Ok(found);
            }

            self.snapshotter
                .capture(page, &format!("{}_attempt{attempt}", marker.label()))
                .await;

            let current = page.current_url().await.unwrap_or_default();
            if current.starts_with("chrome-error://") || current == "about:blank" || current.is_empty() {
                warn!(url = %current, "Browser is showing an error or blank page");
            }

            if attempt < max_attempts {
                warn!(
                    marker = marker.label(),
                    attempt,
                    max_attempts,
                    current_url = %current,
                    "Marker not found; retrying"
                );
                sleep(self.policy.retry_delay).await;
            }
        }

        let last_url = page.current_url().await.unwrap_or_default();
        Err(ReadinessTimeout {
            marker: marker.label().to_string(),
            url: url.to_string(),
            attempts: max_attempts,
            timeout,
            last_url,
        })
    }

    /// Poll the current document for `chain` without navigating.
    ///
    /// Lookup errors count as "not yet": they are what a half-replaced
    /// document looks like from the outside.
    pub async fn wait_for_any<P>(
        &self,
        page: &P,
        chain: &LocatorChain,
        timeout: Duration,
    ) -> Option<Locator>
    where
        P: PortalPage + ?Sized,
    {
        let deadline = Instant::now() + timeout;
        loop {
            match first_present(page, chain).await {
                Ok(Some(found)) => return Some(found),
                Ok(None) => {}
                Err(err) => debug!(marker = chain.label(), error = %err, "Lookup failed"),
            }
            if !self.pause_until(deadline).await {
                return None;
            }
        }
    }

    /// Poll the current URL until `predicate` holds. Returns the matching URL.
    pub async fn wait_for_url<P, F>(&self, page: &P, timeout: Duration, predicate: F) -> Option<String>
    where
        P: PortalPage + ?Sized,
        F: Fn(&str) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(url) = page.current_url().await {
                if predicate(&url) {
                    return Some(url);
                }
            }
            if !self.pause_until(deadline).await {
                return None;
            }
        }
    }

    /// Whichever comes first: a URL satisfying `predicate`, or `chain`
    /// appearing. The URL wins when both hold.
    pub async fn wait_for_url_or_any<P, F>(
        &self,
        page: &P,
        timeout: Duration,
        predicate: F,
        chain: &LocatorChain,
    ) -> Option<Arrival>
    where
        P: PortalPage + ?Sized,
        F: Fn(&str) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(url) = page.current_url().await {
                if predicate(&url) {
                    return Some(Arrival::Url(url));
                }
            }
            if let Ok(Some(found)) = first_present(page, chain).await {
                return Some(Arrival::Marker(found));
            }
            if !self.pause_until(deadline).await {
                return None;
            }
        }
    }

    /// If the page sits on the interstitial, click the first escape link
    /// and wait for the URL to move on. Best-effort.
    pub async fn escape_interstitial<P>(&self, page: &P) -> bool
    where
        P: PortalPage + ?Sized,
    {
        let Some(interstitial) = &self.interstitial else {
            return false;
        };

        let Ok(url) = page.current_url().await else {
            return false;
        };
        if !url.contains(&interstitial.url_marker) {
            return false;
        }

        info!(url = %url, "Interstitial detected; choosing the first account");
        let choice = match first_present(page, &interstitial.escape).await {
            Ok(Some(choice)) => choice,
            Ok(None) => {
                warn!("No account link on the interstitial");
                return false;
            }
            Err(err) => {
                warn!(error = %err, "Failed to look up account links");
                return false;
            }
        };

        if let Err(err) = page.click(&choice).await {
            warn!(error = %err, "Failed to click account link");
            return false;
        }

        let marker = interstitial.url_marker.as_str();
        let left = self
            .wait_for_url(page, self.policy.attempt_timeout, |u| !u.contains(marker))
            .await;
        if left.is_none() {
            warn!("Still on the interstitial after choosing an account");
        }
        left.is_some()
    }

    /// Sleep one poll interval, clamped to the deadline. False once the
    /// deadline has passed.
    async fn pause_until(&self, deadline: Instant) -> bool {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        sleep(self.policy.poll_interval.min(deadline - now)).await;
        true
    }
}
