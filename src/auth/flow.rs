use secrecy::ExposeSecret;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::totp::{seed_fingerprint, Totp, TotpError};
use super::{AuthError, AuthState};
use crate::browser::{first_present, Locator, LocatorChain, PortalPage};
use crate::clock::{Clock, SystemClock};
use crate::config::{AuthConfig, PortalConfig};
use crate::credentials::Credentials;
use crate::portal::{
    classify_post_submit, has_landed, is_second_factor_url, probe_indicates_session,
    PortalMarkers, PostSubmit, ACCOUNT_SELECTOR_PATH,
};
use crate::readiness::{Arrival, ReadinessGuard};
use crate::session::{CookieJar, CookieJarFile};

static SYSTEM_CLOCK: SystemClock = SystemClock;

/// Drives one page from anonymous to authenticated.
///
/// The flow borrows everything it needs; the caller keeps ownership of the
/// browser and closes it afterwards whatever the outcome.
pub struct AuthenticationFlow<'a, P: PortalPage + ?Sized> {
    page: &'a P,
    credentials: &'a Credentials,
    jar: &'a CookieJarFile,
    guard: &'a ReadinessGuard,
    portal: &'a PortalConfig,
    settings: &'a AuthConfig,
    clock: &'a dyn Clock,
    markers: PortalMarkers,
    state: AuthState,
    history: Vec<AuthState>,
    rejected_code: Option<String>,
}

impl<'a, P: PortalPage + ?Sized> AuthenticationFlow<'a, P> {
    pub fn new(
        page: &'a P,
        credentials: &'a Credentials,
        jar: &'a CookieJarFile,
        guard: &'a ReadinessGuard,
        portal: &'a PortalConfig,
        settings: &'a AuthConfig,
    ) -> Self {
        Self {
            page,
            credentials,
            jar,
            guard,
            portal,
            settings,
            clock: &SYSTEM_CLOCK,
            markers: PortalMarkers::new(portal),
            state: AuthState::Anonymous,
            history: vec![AuthState::Anonymous],
            rejected_code: None,
        }
    }

    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Every state entered so far, starting with `Anonymous`.
    pub fn history(&self) -> &[AuthState] {
        &self.history
    }

    /// Log in, preferring the saved cookie jar.
    pub async fn authenticate(&mut self) -> Result<(), AuthError> {
        match self.restore_session().await {
            Ok(true) => {
                self.transition(AuthState::Authenticated)?;
                self.persist_cookies().await;
                info!("Logged in with saved cookies");
                return Ok(());
            }
            Ok(false) => {}
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => warn!(error = %err, "Cookie login failed; falling back to credentials"),
        }

        self.login_with_restarts().await
    }

    fn transition(&mut self, next: AuthState) -> Result<(), AuthError> {
        if !self.state.can_transition_to(next) {
            return Err(AuthError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(from = ?self.state, to = ?next, "Login state");
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Apply the saved jar and check whether the portal still honours it.
    async fn restore_session(&mut self) -> Result<bool, AuthError> {
        let jar = match self.jar.load() {
            Ok(Some(jar)) if !jar.is_empty() => jar,
            Ok(_) => {
                info!(path = %self.jar.path().display(), "No saved cookies");
                return Ok(false);
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "Ignoring unreadable cookie file");
                return Ok(false);
            }
        };

        let root = self.portal.root_url();
        self.page.goto(&root).await?;
        self.page.clear_cookies().await?;
        self.page.set_cookies(&root, &jar.restorable()).await?;
        self.page.goto(&root).await?;
        self.transition(AuthState::CookieRestored)?;
        info!(cookies = jar.len(), "Restored saved cookies");

        sleep(self.settings.settle_delay).await;
        self.page.goto(&self.portal.probe_url()).await?;
        sleep(self.settings.settle_delay).await;

        let url = self.page.current_url().await?;
        let valid = probe_indicates_session(self.portal, &url);
        if !valid {
            info!(url = %url, "Saved cookies no longer accepted");
        }
        Ok(valid)
    }

    async fn login_with_restarts(&mut self) -> Result<(), AuthError> {
        let attempts = self.settings.login_attempts.max(1);
        let mut attempt = 1;

        loop {
            info!(attempt, attempts, "Logging in with credentials");
            let err = match self.login_once().await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            self.transition(AuthState::LoginFailed)?;
            if err.is_fatal() {
                error!(error = %err, "Login cannot succeed without a configuration change");
                return Err(err);
            }
            if attempt >= attempts {
                return Err(AuthError::AttemptsExhausted {
                    attempts,
                    last: Box::new(err),
                });
            }

            warn!(attempt, error = %err, "Login attempt failed; clearing cookies and restarting");
            if let Err(clear_err) = self.page.clear_cookies().await {
                warn!(error = %clear_err, "Failed to clear cookies");
            }
            sleep(self.settings.restart_delay).await;
            attempt += 1;
        }
    }

    async fn login_once(&mut self) -> Result<(), AuthError> {
        self.transition(AuthState::CredentialSubmitted)?;
        let url = self.submit_credentials().await?;

        match classify_post_submit(&url) {
            PostSubmit::EmailVerification => return Err(AuthError::EmailVerificationRequired),
            PostSubmit::Totp => {
                self.transition(AuthState::SecondFactorPending)?;
                self.second_factor().await?;
            }
            PostSubmit::Direct => debug!(url = %url, "No second factor requested"),
        }

        self.transition(AuthState::AccountSelectionPending)?;
        self.resolve_landing().await?;

        self.transition(AuthState::Authenticated)?;
        sleep(self.settings.settle_delay).await;
        self.persist_cookies().await;
        info!("Logged in with credentials");
        Ok(())
    }

    /// Email, proceed, password, proceed. Returns where the form sent us.
    async fn submit_credentials(&mut self) -> Result<String, AuthError> {
        let email = self
            .guard
            .open(self.page, &self.portal.sign_in_url, &self.markers.email_field())
            .await?;
        self.page.fill(&email, self.credentials.email()).await?;
        self.click_when_present(&self.markers.proceed_button()).await?;

        let password = self.wait_required(&self.markers.password_field()).await?;
        self.page
            .fill(&password, self.credentials.password().expose_secret())
            .await?;
        self.click_when_present(&self.markers.proceed_button()).await?;

        sleep(self.settings.settle_delay).await;
        let url = self.page.current_url().await?;
        info!(url = %url, "Credentials submitted");
        Ok(url)
    }

    async fn second_factor(&mut self) -> Result<(), AuthError> {
        let seed = self.credentials.totp_seed().ok_or(TotpError::MissingSeed)?;
        let totp = Totp::from_seed(seed.expose_secret())?;
        info!(
            seed_len = seed.expose_secret().len(),
            seed_checksum = %seed_fingerprint(seed.expose_secret()),
            "Answering TOTP challenge"
        );

        let ceiling = self.settings.totp_attempts.max(1);
        let mut rejections = 0;

        for attempt in 1..=ceiling {
            let code = totp
                .next_code(
                    self.clock,
                    self.settings.totp_margin,
                    self.rejected_code.as_deref(),
                )
                .await;
            info!(attempt, remaining_secs = code.remaining_secs, "Submitting TOTP code");

            let input = self.wait_required(&self.markers.totp_input()).await?;
            self.page.fill(&input, &code.code).await?;
            self.click_when_present(&self.markers.totp_submit()).await?;

            let left = self
                .guard
                .wait_for_url(self.page, self.settings.second_factor_timeout, |u| {
                    !is_second_factor_url(u)
                })
                .await;
            if let Some(url) = left {
                info!(url = %url, "TOTP accepted");
                return Ok(());
            }

            if first_present(self.page, &self.markers.totp_rejected())
                .await?
                .is_none()
            {
                let url = self.page.current_url().await?;
                self.guard.snapshotter().capture(self.page, "totp_stalled").await;
                return Err(AuthError::SecondFactorStalled { url });
            }

            rejections += 1;
            self.rejected_code = Some(code.code);
            self.transition(AuthState::SecondFactorFailed(rejections))?;
            warn!(attempt, ceiling, "TOTP code rejected");

            if attempt < ceiling {
                sleep(self.settings.settle_delay).await;
                self.transition(AuthState::SecondFactorPending)?;
            }
        }

        Err(AuthError::SecondFactorRejected { rejections })
    }

    /// Follow the post-login redirect chain onto a portal page.
    async fn resolve_landing(&mut self) -> Result<(), AuthError> {
        let timeout = self.settings.landing_timeout;
        let portal = self.portal;

        let arrival = self
            .guard
            .wait_for_url_or_any(
                self.page,
                timeout,
                |u| has_landed(portal, u),
                &self.markers.portal_link(),
            )
            .await;

        match arrival {
            Some(Arrival::Url(url)) => debug!(url = %url, "Landed on the portal"),
            Some(Arrival::Marker(link)) => {
                info!(link = %link, "Following link back to the portal");
                self.page.click(&link).await?;
                if self
                    .guard
                    .wait_for_url(self.page, timeout, |u| {
                        has_landed(portal, u) || u.contains(ACCOUNT_SELECTOR_PATH)
                    })
                    .await
                    .is_none()
                {
                    return Err(self.landing_timeout().await);
                }
            }
            None => return Err(self.landing_timeout().await),
        }

        if self.page.current_url().await?.contains(ACCOUNT_SELECTOR_PATH) {
            self.choose_account().await?;
        }

        let url = self.page.current_url().await?;
        if !url.contains(&portal.probe_path) && !url.contains("ptn=") {
            debug!(url = %url, "Landing page is neither accounts nor home; opening the root");
            self.page.goto(&portal.root_url()).await?;
            sleep(self.settings.settle_delay).await;
        }

        if self.page.current_url().await?.contains(ACCOUNT_SELECTOR_PATH) {
            self.guard
                .snapshotter()
                .capture(self.page, "account_selector_stuck")
                .await;
            return Err(AuthError::AccountSelectionStuck);
        }
        Ok(())
    }

    async fn choose_account(&mut self) -> Result<(), AuthError> {
        info!("Account selector shown; choosing the first account");
        let Some(choice) = first_present(self.page, &self.markers.account_choice()).await? else {
            warn!("No account link on the selector");
            return Ok(());
        };
        self.page.click(&choice).await?;
        sleep(self.settings.settle_delay).await;

        let left = self
            .guard
            .wait_for_url(self.page, self.settings.landing_timeout, |u| {
                !u.contains(ACCOUNT_SELECTOR_PATH)
            })
            .await;
        if left.is_none() {
            warn!("Account selector did not go away");
        }
        Ok(())
    }

    async fn landing_timeout(&self) -> AuthError {
        self.guard.snapshotter().capture(self.page, "login_timeout").await;
        AuthError::LandingTimeout {
            url: self.page.current_url().await.unwrap_or_default(),
            timeout: self.settings.landing_timeout,
        }
    }

    async fn wait_required(&self, chain: &LocatorChain) -> Result<Locator, AuthError> {
        match self
            .guard
            .wait_for_any(self.page, chain, self.settings.field_timeout)
            .await
        {
            Some(found) => Ok(found),
            None => {
                self.guard.snapshotter().capture(self.page, chain.label()).await;
                Err(AuthError::MissingElement(chain.label().to_string()))
            }
        }
    }

    async fn click_when_present(&self, chain: &LocatorChain) -> Result<(), AuthError> {
        let target = self.wait_required(chain).await?;
        self.page.click(&target).await?;
        Ok(())
    }

    /// Save the browser's cookies. A failure here does not undo the login.
    async fn persist_cookies(&self) {
        let cookies = match self.page.cookies().await {
            Ok(cookies) => cookies,
            Err(err) => {
                warn!(error = %err, "Failed to read cookies from the browser");
                return;
            }
        };
        let jar = CookieJar::new(cookies);
        match self.jar.save(&jar) {
            Ok(()) => info!(cookies = jar.len(), path = %self.jar.path().display(), "Saved cookies"),
            Err(err) => warn!(error = %format!("{err:#}"), "Failed to save cookies"),
        }
    }
}
