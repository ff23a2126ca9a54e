//! One end-to-end run: log in, scrape, reconcile, notify.

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::auth::{AuthState, AuthenticationFlow};
use crate::baseline::{Baseline, BaselineLedger};
use crate::browser::PortalPage;
use crate::clock::{Clock, SystemClock};
use crate::config::ResolvedConfig;
use crate::credentials::Credentials;
use crate::debug::DebugSnapshotter;
use crate::extract::AccountTree;
use crate::notes::NotesService;
use crate::notify::Notifier;
use crate::portal::accounts::{read_account_tree, AccountRefresher};
use crate::portal::summary::read_month_expense;
use crate::portal::PortalMarkers;
use crate::readiness::ReadinessGuard;
use crate::reconcile::{reconcile, ReportSummary};
use crate::session::CookieJarFile;

static SYSTEM_CLOCK: SystemClock = SystemClock;

/// Everything a successful run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub tree: AccountTree,
    pub baseline: Baseline,
    pub expense: i64,
    pub summary: ReportSummary,
    pub message: String,
}

pub struct Runner<'a> {
    config: &'a ResolvedConfig,
    credentials: &'a Credentials,
    notes: &'a dyn NotesService,
    notifier: &'a dyn Notifier,
    clock: &'a dyn Clock,
}

impl<'a> Runner<'a> {
    pub fn new(
        config: &'a ResolvedConfig,
        credentials: &'a Credentials,
        notes: &'a dyn NotesService,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self {
            config,
            credentials,
            notes,
            notifier,
            clock: &SYSTEM_CLOCK,
        }
    }

    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Authenticate only, refreshing the saved cookie jar.
    pub async fn login<P>(&self, page: &P, guard: &ReadinessGuard) -> Result<AuthState>
    where
        P: PortalPage + ?Sized,
    {
        login(page, guard, self.config, self.credentials, self.clock).await
    }

    /// The whole workflow against an already open page. Sends the report
    /// on success; the caller owns the page and closes it.
    pub async fn run_on<P>(&self, page: &P) -> Result<RunReport>
    where
        P: PortalPage + ?Sized,
    {
        let guard = readiness_guard(self.config);
        let portal = &self.config.portal;

        self.login(page, &guard).await?;

        if self.config.report.refresh_accounts {
            let clicked = AccountRefresher::new(page, &guard, portal).refresh().await;
            info!(clicked, "Requested account refresh");
        }

        let extraction = read_account_tree(page, &guard, portal).await?;
        let tree = extraction.tree;

        let baseline = BaselineLedger::new(self.notes, &self.config.baseline, self.clock)
            .current(&tree)
            .await
            .context("Failed to determine the period baseline")?;
        info!(baseline = baseline.total(), "Baseline");

        let expense = read_month_expense(page, &guard, portal).await?;

        let summary = reconcile(
            &tree,
            &self.config.report.securities_category,
            baseline.total(),
            expense,
        )?;
        let message = summary.render(expense);
        info!(net_balance = summary.net_balance, "Report ready");

        self.notifier
            .send(&message)
            .await
            .context("Failed to send report")?;

        Ok(RunReport {
            tree,
            baseline,
            expense,
            summary,
            message,
        })
    }

    /// Log a failed run and tell the user about it.
    pub async fn report_failure(&self, err: &anyhow::Error) {
        error!(error = %format!("{err:#}"), "Run failed");
        notify_failure(self.notifier, err).await;
    }

    /// Launch Chrome, run, and close Chrome whatever happened.
    #[cfg(feature = "chrome")]
    pub async fn run_with_chrome(&self) -> Result<RunReport> {
        let session = crate::browser::chrome::ChromeSession::launch(&self.config.browser).await?;
        let result = self.run_on(&session).await;
        close_quietly(session).await;
        result
    }
}

/// Guard configured from `config`, escaping the account selector.
pub fn readiness_guard(config: &ResolvedConfig) -> ReadinessGuard {
    ReadinessGuard::new(
        config.readiness.clone(),
        DebugSnapshotter::new(&config.debug_dir),
    )
    .with_account_selector_escape(&PortalMarkers::new(&config.portal))
}

/// Run the login state machine on `page` against the configured cookie jar.
pub async fn login<P>(
    page: &P,
    guard: &ReadinessGuard,
    config: &ResolvedConfig,
    credentials: &Credentials,
    clock: &dyn Clock,
) -> Result<AuthState>
where
    P: PortalPage + ?Sized,
{
    let jar = CookieJarFile::new(&config.cookie_file);
    let mut flow = AuthenticationFlow::new(page, credentials, &jar, guard, &config.portal, &config.auth)
        .with_clock(clock);

    flow.authenticate().await.context("Login failed")?;
    info!(history = ?flow.history(), "Authenticated");
    Ok(flow.state())
}

/// Launch Chrome, log in, close Chrome.
#[cfg(feature = "chrome")]
pub async fn login_with_chrome(config: &ResolvedConfig, credentials: &Credentials) -> Result<AuthState> {
    let session = crate::browser::chrome::ChromeSession::launch(&config.browser).await?;
    let guard = readiness_guard(config);
    let result = login(&session, &guard, config, credentials, &SYSTEM_CLOCK).await;
    close_quietly(session).await;
    result
}

/// Send a failure message; a failure to send is only logged.
pub async fn notify_failure(notifier: &dyn Notifier, err: &anyhow::Error) {
    let text = format!("moneydigest でエラーが発生しました:\n{err:#}");
    if let Err(send_err) = notifier.send(&text).await {
        warn!(error = %format!("{send_err:#}"), "Failed to send failure notification");
    }
}

#[cfg(feature = "chrome")]
async fn close_quietly(session: crate::browser::chrome::ChromeSession) {
    if let Err(err) = session.close().await {
        warn!(error = %format!("{err:#}"), "Failed to close browser");
    }
}
