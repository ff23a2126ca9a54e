//! The cash-flow summary page.

use anyhow::{Context, Result};
use tracing::info;

use super::PortalMarkers;
use crate::browser::PortalPage;
use crate::config::PortalConfig;
use crate::extract::extract_expense;
use crate::readiness::ReadinessGuard;

/// Open the summary page and read month-to-date spending.
///
/// Any failure here is fatal for the run; the page is snapshotted first.
pub async fn read_month_expense<P>(
    page: &P,
    guard: &ReadinessGuard,
    portal: &PortalConfig,
) -> Result<i64>
where
    P: PortalPage + ?Sized,
{
    let markers = PortalMarkers::new(portal);
    let url = portal.summary_url();

    if let Err(err) = guard.open(page, &url, &markers.expense_summary()).await {
        guard.snapshotter().capture(page, "summary_not_ready").await;
        return Err(err).context("Cash-flow summary page did not render");
    }

    let markup = page.content().await?;
    match extract_expense(&markup) {
        Ok(expense) => {
            info!(expense, "Extracted month-to-date expense");
            Ok(expense)
        }
        Err(err) => {
            guard.snapshotter().capture(page, "summary_missing").await;
            Err(err).context("Failed to read month-to-date expense")
        }
    }
}
