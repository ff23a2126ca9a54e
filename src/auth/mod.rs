//! Portal login.
//!
//! [`AuthenticationFlow`] walks [`AuthState`] from `Anonymous` to
//! `Authenticated`, reusing the saved cookie jar when the portal still
//! accepts it and falling back to a full credential login otherwise.

mod flow;
pub mod totp;

pub use flow::AuthenticationFlow;
pub use totp::{Totp, TotpCode, TotpError};

use std::time::Duration;

use crate::readiness::ReadinessTimeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    CookieRestored,
    CredentialSubmitted,
    SecondFactorPending,
    /// The portal rejected a TOTP code; carries the rejection count so far.
    SecondFactorFailed(u32),
    AccountSelectionPending,
    Authenticated,
    LoginFailed,
}

impl AuthState {
    pub fn can_transition_to(self, next: AuthState) -> bool {
        use AuthState::*;
        matches!(
            (self, next),
            (Anonymous, CookieRestored)
                | (Anonymous, CredentialSubmitted)
                | (CookieRestored, Authenticated)
                | (CookieRestored, CredentialSubmitted)
                | (CredentialSubmitted, SecondFactorPending)
                | (CredentialSubmitted, AccountSelectionPending)
                | (CredentialSubmitted, LoginFailed)
                | (SecondFactorPending, SecondFactorFailed(_))
                | (SecondFactorPending, AccountSelectionPending)
                | (SecondFactorPending, LoginFailed)
                | (SecondFactorFailed(_), SecondFactorPending)
                | (SecondFactorFailed(_), LoginFailed)
                | (AccountSelectionPending, Authenticated)
                | (AccountSelectionPending, LoginFailed)
                | (LoginFailed, CredentialSubmitted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AuthState::Authenticated | AuthState::LoginFailed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(
        "The portal asked for an e-mail verification code. Enable authenticator-app \
         two-step verification on the account and set TOTP_SECRET."
    )]
    EmailVerificationRequired,

    #[error(transparent)]
    Totp(#[from] TotpError),

    #[error(transparent)]
    NotReady(#[from] ReadinessTimeout),

    #[error("{0} not found")]
    MissingElement(String),

    #[error("TOTP code rejected {rejections} time(s)")]
    SecondFactorRejected { rejections: u32 },

    #[error("Second-factor page did not advance after submitting a code (url: {url})")]
    SecondFactorStalled { url: String },

    #[error("Post-login redirects did not reach the portal within {timeout:?} (url: {url})")]
    LandingTimeout { url: String, timeout: Duration },

    #[error("Still on the account selector after choosing an account")]
    AccountSelectionStuck,

    #[error("Illegal login transition {from:?} -> {to:?}")]
    InvalidTransition { from: AuthState, to: AuthState },

    #[error("Login failed after {attempts} attempt(s)")]
    AttemptsExhausted {
        attempts: u32,
        #[source]
        last: Box<AuthError>,
    },

    #[error("Browser error: {0:#}")]
    Browser(#[from] anyhow::Error),
}

impl AuthError {
    /// Errors a restart cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AuthError::EmailVerificationRequired
                | AuthError::Totp(_)
                | AuthError::InvalidTransition { .. }
        )
    }
}
