#![allow(dead_code)]

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use moneydigest::auth::AuthState;
use moneydigest::browser::{Locator, PortalPage};
use moneydigest::config::{
    AuthConfig, BaselineConfig, PortalConfig, ReadinessConfig, ResolvedConfig,
};
use moneydigest::credentials::Credentials;
use moneydigest::debug::DebugSnapshotter;
use moneydigest::readiness::ReadinessGuard;
use moneydigest::session::SessionCookie;
use secrecy::SecretString;

pub const BASE_URL: &str = "https://portal.test";
pub const SIGN_IN_URL: &str = "https://id.portal.test/sign_in";
pub const TOTP_URL: &str = "https://id.portal.test/two_factor_auth/totp";
pub const EMAIL_OTP_URL: &str = "https://id.portal.test/email_otp";
pub const SELECTOR_URL: &str = "https://id.portal.test/account_selector";
pub const LANDING_URL: &str = "https://portal.test/?ptn=1";

pub const EMAIL: &str = "me@example.com";
pub const PASSWORD: &str = "correct horse";

/// base32("12345678901234567890").
pub const TOTP_SEED: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

pub const ACCOUNTS_HTML: &str = r#"<html><body>
<section id="registered-accounts">
  <ul class="accounts">
    <li class="heading-category-name">銀行</li>
    <li class="account">
      <a href="/accounts/show/1">X銀行</a>
      <ul class="amount"><li class="number">1,000円</li><li class="balance">2,000円</li></ul>
    </li>
    <li class="heading-category-name">証券</li>
    <li class="account">
      <a href="/accounts/show/2">Yファンド</a>
      <ul class="amount"><li class="number">500円</li><li class="balance">500円</li></ul>
    </li>
  </ul>
</section>
</body></html>"#;

pub const SUMMARY_HTML: &str = r#"<html><body>
<section id="monthly-total">
  <table>
    <tbody>
      <tr><th>収入</th><td>0円</td></tr>
      <tr><th>支出</th><td>
        -200円
      </td></tr>
    </tbody>
  </table>
</section>
</body></html>"#;

pub fn portal_config() -> PortalConfig {
    PortalConfig {
        base_url: BASE_URL.to_string(),
        sign_in_url: SIGN_IN_URL.to_string(),
        identity_host: "id.portal.test".to_string(),
        probe_path: "/accounts".to_string(),
        summary_path: "/cf/summary".to_string(),
    }
}

pub fn auth_config() -> AuthConfig {
    AuthConfig {
        login_attempts: 3,
        totp_attempts: 3,
        totp_margin: Duration::from_secs(5),
        field_timeout: Duration::from_secs(2),
        landing_timeout: Duration::from_secs(3),
        second_factor_timeout: Duration::from_secs(2),
        settle_delay: Duration::from_millis(100),
        restart_delay: Duration::from_millis(100),
    }
}

pub fn readiness_config() -> ReadinessConfig {
    ReadinessConfig {
        attempt_timeout: Duration::from_secs(2),
        max_attempts: 3,
        retry_delay: Duration::from_millis(100),
        poll_interval: Duration::from_millis(50),
    }
}

pub fn guard(debug_dir: &Path) -> ReadinessGuard {
    ReadinessGuard::new(readiness_config(), DebugSnapshotter::new(debug_dir))
}

/// Config rooted in `data_dir`, with fast timings and no real portal.
pub fn resolved_config(data_dir: &Path) -> ResolvedConfig {
    ResolvedConfig {
        data_dir: data_dir.to_path_buf(),
        cookie_file: data_dir.join("cookies.json"),
        debug_dir: data_dir.join("debug"),
        portal: portal_config(),
        auth: auth_config(),
        readiness: readiness_config(),
        browser: Default::default(),
        report: Default::default(),
        baseline: BaselineConfig {
            pointer_file: data_dir.join("month-page-id.json"),
            ..Default::default()
        },
    }
}

pub fn credentials(password: &str, totp_seed: Option<&str>) -> Credentials {
    Credentials::new(
        EMAIL,
        SecretString::from(password.to_string()),
        totp_seed.map(|seed| SecretString::from(seed.to_string())),
    )
}

pub fn session_cookie(value: &str) -> SessionCookie {
    SessionCookie::new("session", value).with_domain("portal.test")
}

/// Which page the fake is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Blank,
    EmailStep,
    PasswordStep,
    SignInRejected,
    EmailOtp,
    Totp,
    AccountSelector,
    Portal,
}

/// How the fake portal behaves. Defaults: no second factor, no selector.
#[derive(Debug, Clone, Default)]
pub struct PortalBehavior {
    pub requires_totp: bool,
    /// Codes rejected before one is accepted.
    pub rejections_before_accept: u32,
    pub email_otp: bool,
    pub account_selector: bool,
    /// Sign-in page loads that render without the e-mail field.
    pub email_field_missing_loads: u32,
    /// Update controls on the logged-in home page.
    pub refresh_controls: usize,
}

#[derive(Debug)]
struct State {
    behavior: PortalBehavior,
    url: String,
    stage: Stage,
    cookies: Vec<SessionCookie>,
    email_visible: bool,
    typed_email: String,
    typed_password: String,
    typed_code: String,
    totp_error_shown: bool,
    credential_submissions: u32,
    submitted_codes: Vec<String>,
    sign_in_loads: u32,
    refresh_clicks: usize,
}

/// Scripted stand-in for the portal and its identity provider.
///
/// Locators are matched by the distinctive fragment each one carries, so
/// the fake stays independent of how the production chains are ordered.
#[derive(Debug)]
pub struct FakePortal {
    state: Mutex<State>,
}

impl FakePortal {
    pub fn new(behavior: PortalBehavior) -> Self {
        Self {
            state: Mutex::new(State {
                behavior,
                url: "about:blank".to_string(),
                stage: Stage::Blank,
                cookies: Vec::new(),
                email_visible: true,
                typed_email: String::new(),
                typed_password: String::new(),
                typed_code: String::new(),
                totp_error_shown: false,
                credential_submissions: 0,
                submitted_codes: Vec::new(),
                sign_in_loads: 0,
                refresh_clicks: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn credential_submissions(&self) -> u32 {
        self.lock().credential_submissions
    }

    pub fn submitted_codes(&self) -> Vec<String> {
        self.lock().submitted_codes.clone()
    }

    pub fn sign_in_loads(&self) -> u32 {
        self.lock().sign_in_loads
    }

    pub fn refresh_clicks(&self) -> usize {
        self.lock().refresh_clicks
    }

    pub fn stage(&self) -> Stage {
        self.lock().stage
    }

    pub fn is_logged_in(&self) -> bool {
        logged_in(&self.lock())
    }
}

fn logged_in(state: &State) -> bool {
    state
        .cookies
        .iter()
        .any(|c| c.name == "session" && c.value == "good")
}

fn navigate(state: &mut State, url: &str) {
    state.totp_error_shown = false;

    if url.starts_with(SIGN_IN_URL) {
        show_sign_in(state);
        return;
    }

    if url.starts_with(BASE_URL) {
        let path = &url[BASE_URL.len()..];
        let protected = path.starts_with("/accounts") || path.starts_with("/cf");
        if protected && !logged_in(state) {
            show_sign_in(state);
            return;
        }
        state.url = url.to_string();
        state.stage = Stage::Portal;
        return;
    }

    state.url = url.to_string();
    state.stage = Stage::Blank;
}

fn show_sign_in(state: &mut State) {
    state.sign_in_loads += 1;
    state.url = SIGN_IN_URL.to_string();
    state.stage = Stage::EmailStep;
    state.typed_email.clear();
    state.typed_password.clear();
    state.email_visible = if state.behavior.email_field_missing_loads > 0 {
        state.behavior.email_field_missing_loads -= 1;
        false
    } else {
        true
    };
}

fn complete_login(state: &mut State) {
    state.cookies.retain(|c| c.name != "session");
    state.cookies.push(session_cookie("good"));
    state.totp_error_shown = false;
    if state.behavior.account_selector {
        state.url = SELECTOR_URL.to_string();
        state.stage = Stage::AccountSelector;
    } else {
        state.url = LANDING_URL.to_string();
        state.stage = Stage::Portal;
    }
}

fn on_home(state: &State) -> bool {
    state.stage == Stage::Portal && {
        let path = state.url.strip_prefix(BASE_URL).unwrap_or_default();
        path.is_empty() || path.starts_with("/?") || path == "/"
    }
}

fn on_summary(state: &State) -> bool {
    state.stage == Stage::Portal && state.url.starts_with(&format!("{BASE_URL}/cf"))
}

#[async_trait]
impl PortalPage for FakePortal {
    async fn goto(&self, url: &str) -> Result<()> {
        navigate(&mut self.lock(), url);
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        let mut state = self.lock();
        let url = state.url.clone();
        navigate(&mut state, &url);
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.lock().url.clone())
    }

    async fn is_present(&self, locator: &Locator) -> Result<bool> {
        let state = self.lock();
        let key = locator.to_string();
        let present = match state.stage {
            Stage::EmailStep => {
                (key.contains("type='email'") && state.email_visible) || key.contains("#submitto")
            }
            Stage::PasswordStep => key.contains("type='password'") || key.contains("#submitto"),
            Stage::Totp => {
                key.contains("inputmode='numeric'")
                    || key.contains("button[type='submit']")
                    || (key.contains("コードが間違っています") && state.totp_error_shown)
            }
            Stage::AccountSelector => key.contains("@href"),
            Stage::Portal if logged_in(&state) => {
                (key.contains("#registered-accounts") && on_home(&state))
                    || (key.contains("#monthly-total") && on_summary(&state))
            }
            Stage::Portal => key.contains(".before-login-home-content") && on_home(&state),
            Stage::Blank | Stage::SignInRejected | Stage::EmailOtp => false,
        };
        Ok(present)
    }

    async fn fill(&self, locator: &Locator, text: &str) -> Result<()> {
        let mut state = self.lock();
        let key = locator.to_string();
        match state.stage {
            Stage::EmailStep if key.contains("type='email'") && state.email_visible => {
                state.typed_email = text.to_string();
            }
            Stage::PasswordStep if key.contains("type='password'") => {
                state.typed_password = text.to_string();
            }
            Stage::Totp if key.contains("inputmode='numeric'") => {
                state.typed_code = text.to_string();
            }
            stage => bail!("No field {key} on {stage:?}"),
        }
        Ok(())
    }

    async fn click(&self, locator: &Locator) -> Result<()> {
        let mut state = self.lock();
        let key = locator.to_string();
        match state.stage {
            Stage::EmailStep if key.contains("#submitto") => {
                state.stage = Stage::PasswordStep;
            }
            Stage::PasswordStep if key.contains("#submitto") => {
                state.credential_submissions += 1;
                if state.typed_email != EMAIL || state.typed_password != PASSWORD {
                    state.stage = Stage::SignInRejected;
                } else if state.behavior.email_otp {
                    state.url = EMAIL_OTP_URL.to_string();
                    state.stage = Stage::EmailOtp;
                } else if state.behavior.requires_totp {
                    state.url = TOTP_URL.to_string();
                    state.stage = Stage::Totp;
                } else {
                    complete_login(&mut state);
                }
            }
            Stage::Totp if key.contains("button[type='submit']") => {
                let code = std::mem::take(&mut state.typed_code);
                state.submitted_codes.push(code);
                if state.behavior.rejections_before_accept > 0 {
                    state.behavior.rejections_before_accept -= 1;
                    state.totp_error_shown = true;
                } else {
                    complete_login(&mut state);
                }
            }
            Stage::AccountSelector if key.contains("@href") => {
                state.url = LANDING_URL.to_string();
                state.stage = Stage::Portal;
            }
            stage => bail!("Nothing to click for {key} on {stage:?}"),
        }
        Ok(())
    }

    async fn click_all(&self, locator: &Locator) -> Result<usize> {
        let mut state = self.lock();
        let key = locator.to_string();
        if logged_in(&state) && on_home(&state) && key.contains("aggregation_queue") {
            let count = state.behavior.refresh_controls;
            state.refresh_clicks += count;
            return Ok(count);
        }
        Ok(0)
    }

    async fn content(&self) -> Result<String> {
        let state = self.lock();
        let html = if logged_in(&state) && on_home(&state) {
            ACCOUNTS_HTML.to_string()
        } else if logged_in(&state) && on_summary(&state) {
            SUMMARY_HTML.to_string()
        } else if state.stage == Stage::Portal {
            r#"<html><body><div class="before-login-home-content"></div></body></html>"#
                .to_string()
        } else {
            format!("<html><body><p>{:?}</p></body></html>", state.stage)
        };
        Ok(html)
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Ok(b"\x89PNG fake".to_vec())
    }

    async fn cookies(&self) -> Result<Vec<SessionCookie>> {
        Ok(self.lock().cookies.clone())
    }

    async fn set_cookies(&self, _url: &str, cookies: &[SessionCookie]) -> Result<()> {
        self.lock().cookies.extend(cookies.iter().cloned());
        Ok(())
    }

    async fn clear_cookies(&self) -> Result<()> {
        self.lock().cookies.clear();
        Ok(())
    }
}

/// States the flow went through, for readable assertions.
pub fn names(history: &[AuthState]) -> Vec<String> {
    history.iter().map(|s| format!("{s:?}")).collect()
}

/// Files in `dir` whose name starts with `prefix`.
pub fn files_with_prefix(dir: &Path, prefix: &str) -> Vec<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|name| name.starts_with(prefix))
                .collect()
        })
        .unwrap_or_default()
}
