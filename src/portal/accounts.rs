//! The portal's home page: refreshing linked accounts and reading the
//! registered-accounts list.

use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;
use tracing::{info, warn};

use super::PortalMarkers;
use crate::browser::{first_present, PortalPage};
use crate::config::PortalConfig;
use crate::extract::{extract_accounts, AccountExtraction, ExtractWarning};
use crate::readiness::ReadinessGuard;

/// Pause after clicking update controls so the portal can queue the work.
const REFRESH_SETTLE: Duration = Duration::from_secs(2);

/// Clicks every per-account "update" control on the home page.
pub struct AccountRefresher<'a, P: PortalPage + ?Sized> {
    page: &'a P,
    guard: &'a ReadinessGuard,
    portal: &'a PortalConfig,
    markers: PortalMarkers,
}

impl<'a, P: PortalPage + ?Sized> AccountRefresher<'a, P> {
    pub fn new(page: &'a P, guard: &'a ReadinessGuard, portal: &'a PortalConfig) -> Self {
        Self {
            page,
            guard,
            portal,
            markers: PortalMarkers::new(portal),
        }
    }

    /// Best-effort: returns how many controls were clicked, and never fails.
    pub async fn refresh(&self) -> usize {
        match self.try_refresh().await {
            Ok(clicked) => clicked,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "Account refresh failed; continuing with cached balances");
                0
            }
        }
    }

    async fn try_refresh(&self) -> Result<usize> {
        self.guard
            .open(self.page, &self.portal.root_url(), &self.markers.account_list())
            .await?;

        let mut clicked = 0;
        for locator in self.markers.refresh_controls().strategies() {
            let count = self.page.click_all(locator).await?;
            if count > 0 {
                info!(locator = %locator, count, "Clicked update controls");
            }
            clicked += count;
        }

        if clicked == 0 {
            info!("No update controls found");
        } else {
            sleep(REFRESH_SETTLE).await;
        }
        Ok(clicked)
    }
}

/// Open the home page and extract the account tree.
///
/// A logged-out home page gets one reload. When the account container is
/// missing the page is snapshotted and an empty tree is returned.
pub async fn read_account_tree<P>(
    page: &P,
    guard: &ReadinessGuard,
    portal: &PortalConfig,
) -> Result<AccountExtraction>
where
    P: PortalPage + ?Sized,
{
    let markers = PortalMarkers::new(portal);
    let root = portal.root_url();

    if let Err(err) = guard.open(page, &root, &markers.account_list()).await {
        warn!(error = %err, "Account list did not render; extracting whatever is there");
    }

    if first_present(page, &markers.logged_out_home()).await?.is_some() {
        warn!("Portal shows the logged-out home page; reloading once");
        page.reload().await?;
        guard
            .wait_for_any(page, &markers.account_list(), guard.policy().attempt_timeout)
            .await;
    }

    let extraction = extract_accounts(&page.content().await?)?;

    for warning in &extraction.warnings {
        match warning {
            ExtractWarning::ContainerMissing => {
                warn!("Account list container missing; treating as no accounts");
                guard.snapshotter().capture(page, "accounts_missing").await;
            }
            ExtractWarning::OrphanAccount { bank_name } => {
                warn!(bank_name = %bank_name, "Account listed before any category; skipped");
            }
            ExtractWarning::MissingName { heading } => {
                warn!(heading = %heading, "Account without a name; skipped");
            }
        }
    }

    info!(
        categories = extraction.tree.headings().count(),
        accounts = extraction.tree.account_count(),
        "Extracted accounts"
    );
    Ok(extraction)
}
