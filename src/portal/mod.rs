//! Knowledge about the portal's pages: where things are and what URLs mean.

pub mod accounts;
pub mod summary;

use crate::browser::{Locator, LocatorChain};
use crate::config::PortalConfig;

pub const ACCOUNT_SELECTOR_PATH: &str = "/account_selector";
pub const EMAIL_OTP_PATH: &str = "/email_otp";
pub const SIGN_IN_PATH: &str = "/sign_in";
const SECOND_FACTOR_PATHS: &[&str] = &["/two_factor_auth", "/totp"];

/// Where the browser ended up after submitting the password.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostSubmit {
    /// The portal wants a code sent by e-mail. Cannot be automated.
    EmailVerification,
    /// Authenticator-app code requested.
    Totp,
    /// No second factor; continue to the landing step.
    Direct,
}

pub fn classify_post_submit(url: &str) -> PostSubmit {
    if url.contains(EMAIL_OTP_PATH) {
        PostSubmit::EmailVerification
    } else if is_second_factor_url(url) {
        PostSubmit::Totp
    } else {
        PostSubmit::Direct
    }
}

pub fn is_second_factor_url(url: &str) -> bool {
    SECOND_FACTOR_PATHS.iter().any(|p| url.contains(p))
}

pub fn is_login_url(url: &str) -> bool {
    url.contains(SIGN_IN_PATH) || url.contains(EMAIL_OTP_PATH) || is_second_factor_url(url)
}

/// Did navigating to the probe page keep us inside an authenticated session?
pub fn probe_indicates_session(portal: &PortalConfig, url: &str) -> bool {
    if is_login_url(url) {
        return false;
    }
    url.contains(&portal.probe_path) || portal.is_portal_url(url)
}

/// The redirect chain after login has reached a portal page.
pub fn has_landed(portal: &PortalConfig, url: &str) -> bool {
    portal.is_portal_url(url) && !is_login_url(url)
}

/// Host part of the portal base URL, used to spot links back into it.
fn portal_host(portal: &PortalConfig) -> &str {
    let rest = portal
        .base_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(&portal.base_url);
    rest.split('/').next().unwrap_or(rest)
}

/// Element locators, derived once from the portal config.
#[derive(Debug, Clone)]
pub struct PortalMarkers {
    host: String,
}

impl PortalMarkers {
    pub fn new(portal: &PortalConfig) -> Self {
        Self {
            host: portal_host(portal).to_string(),
        }
    }

    pub fn email_field(&self) -> LocatorChain {
        LocatorChain::new(
            "email_field",
            [
                Locator::xpath("//input[@type='email']"),
                Locator::css("input[name='mfid_user[email]']"),
            ],
        )
    }

    /// The sign-in form's "next"/"sign in" button. Same id on both steps.
    pub fn proceed_button(&self) -> LocatorChain {
        LocatorChain::new(
            "proceed_button",
            [
                Locator::css("#submitto"),
                Locator::xpath("//button[@type='submit']"),
            ],
        )
    }

    pub fn password_field(&self) -> LocatorChain {
        LocatorChain::single("password_field", Locator::xpath("//input[@type='password']"))
    }

    pub fn totp_input(&self) -> LocatorChain {
        LocatorChain::new(
            "totp_input",
            [
                Locator::css("input[inputmode='numeric']"),
                Locator::css("input[type='tel']"),
            ],
        )
    }

    pub fn totp_submit(&self) -> LocatorChain {
        LocatorChain::new(
            "totp_submit",
            [
                Locator::css("button[type='submit']"),
                Locator::xpath("//button"),
            ],
        )
    }

    pub fn totp_rejected(&self) -> LocatorChain {
        LocatorChain::single(
            "totp_rejected",
            Locator::xpath("//p[contains(text(),'コードが間違っています')]"),
        )
    }

    /// Links back into the portal, callback links first.
    pub fn portal_link(&self) -> LocatorChain {
        let host = &self.host;
        LocatorChain::new(
            "portal_link",
            [
                Locator::xpath(format!(
                    "//a[contains(@href,'{host}') and (contains(@href,'auth') or contains(@href,'callback'))]"
                )),
                Locator::xpath(format!("//a[contains(@href,'{host}')]")),
            ],
        )
    }

    /// Account entries on the account-selector interstitial.
    pub fn account_choice(&self) -> LocatorChain {
        LocatorChain::single(
            "account_choice",
            Locator::xpath(format!("//a[contains(@href,'{}')]", self.host)),
        )
    }

    /// Container of the registered-accounts list.
    pub fn account_list(&self) -> LocatorChain {
        LocatorChain::single("account_list", Locator::css("#registered-accounts"))
    }

    /// Content the portal root shows to a logged-out visitor.
    pub fn logged_out_home(&self) -> LocatorChain {
        LocatorChain::single("logged_out_home", Locator::css(".before-login-home-content"))
    }

    /// Month-to-date expense table on the summary page.
    pub fn expense_summary(&self) -> LocatorChain {
        LocatorChain::single("expense_summary", Locator::css("#monthly-total"))
    }

    /// Per-account "update" controls, in click order.
    pub fn refresh_controls(&self) -> LocatorChain {
        LocatorChain::new(
            "refresh_controls",
            [
                Locator::xpath(
                    "//a[contains(@href,'/aggregation_queue') and contains(normalize-space(.),'更新')]",
                ),
                Locator::xpath("//button[contains(normalize-space(.),'更新')]"),
                Locator::xpath("//input[@value='更新' or @data-disable-with='更新']"),
            ],
        )
    }
}
