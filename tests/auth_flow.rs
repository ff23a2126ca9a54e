mod support;

use std::path::Path;

use anyhow::Result;
use moneydigest::auth::{AuthError, AuthState, AuthenticationFlow, Totp, TotpError};
use moneydigest::clock::FixedClock;
use moneydigest::credentials::Credentials;
use moneydigest::session::{CookieJar, CookieJarFile};
use support::{
    auth_config, credentials, files_with_prefix, portal_config, session_cookie, FakePortal,
    PortalBehavior, PASSWORD, TOTP_SEED,
};
use tempfile::TempDir;

/// Twenty seconds into a TOTP window.
const NOW: i64 = 1_700_000_000;

async fn authenticate(
    page: &FakePortal,
    credentials: &Credentials,
    dir: &Path,
) -> (Result<(), AuthError>, Vec<AuthState>) {
    let portal = portal_config();
    let settings = auth_config();
    let readiness = support::guard(&dir.join("debug"));
    let jar = CookieJarFile::new(dir.join("cookies.json"));
    let clock = FixedClock::from_timestamp(NOW);

    let mut flow = AuthenticationFlow::new(page, credentials, &jar, &readiness, &portal, &settings)
        .with_clock(&clock);
    let result = flow.authenticate().await;
    (result, flow.history().to_vec())
}

fn save_jar(dir: &Path, value: &str) -> Result<()> {
    CookieJarFile::new(dir.join("cookies.json")).save(&CookieJar::new(vec![session_cookie(value)]))
}

fn saved_session(dir: &Path) -> Result<Option<String>> {
    Ok(CookieJarFile::new(dir.join("cookies.json"))
        .load()?
        .and_then(|jar| {
            jar.cookies()
                .iter()
                .find(|c| c.name == "session")
                .map(|c| c.value.clone())
        }))
}

#[tokio::test(start_paused = true)]
async fn accepted_cookies_skip_the_credential_form() -> Result<()> {
    let dir = TempDir::new()?;
    save_jar(dir.path(), "good")?;
    let page = FakePortal::new(PortalBehavior::default());

    let (result, history) = authenticate(&page, &credentials(PASSWORD, None), dir.path()).await;

    result?;
    assert_eq!(
        history,
        [AuthState::Anonymous, AuthState::CookieRestored, AuthState::Authenticated]
    );
    assert_eq!(page.credential_submissions(), 0);
    assert_eq!(saved_session(dir.path())?.as_deref(), Some("good"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stale_cookies_fall_back_to_credentials_and_are_replaced() -> Result<()> {
    let dir = TempDir::new()?;
    save_jar(dir.path(), "stale")?;
    let page = FakePortal::new(PortalBehavior::default());

    let (result, history) = authenticate(&page, &credentials(PASSWORD, None), dir.path()).await;

    result?;
    assert_eq!(
        history,
        [
            AuthState::Anonymous,
            AuthState::CookieRestored,
            AuthState::CredentialSubmitted,
            AuthState::AccountSelectionPending,
            AuthState::Authenticated,
        ]
    );
    assert_eq!(page.credential_submissions(), 1);
    assert_eq!(saved_session(dir.path())?.as_deref(), Some("good"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn missing_or_corrupt_jar_means_credential_login() -> Result<()> {
    let dir = TempDir::new()?;
    let page = FakePortal::new(PortalBehavior::default());
    let (result, history) = authenticate(&page, &credentials(PASSWORD, None), dir.path()).await;
    result?;
    assert_eq!(history[1], AuthState::CredentialSubmitted);
    assert_eq!(saved_session(dir.path())?.as_deref(), Some("good"));

    let dir = TempDir::new()?;
    std::fs::write(dir.path().join("cookies.json"), "{ not json")?;
    let page = FakePortal::new(PortalBehavior::default());
    let (result, history) = authenticate(&page, &credentials(PASSWORD, None), dir.path()).await;
    result?;
    assert_eq!(history[1], AuthState::CredentialSubmitted);
    assert_eq!(page.credential_submissions(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn rejected_totp_code_is_never_resubmitted() -> Result<()> {
    let dir = TempDir::new()?;
    let page = FakePortal::new(PortalBehavior {
        requires_totp: true,
        rejections_before_accept: 1,
        ..Default::default()
    });

    let (result, history) =
        authenticate(&page, &credentials(PASSWORD, Some(TOTP_SEED)), dir.path()).await;

    result?;
    let codes = page.submitted_codes();
    assert_eq!(codes.len(), 2);
    assert_ne!(codes[0], codes[1]);

    let totp = Totp::from_seed(TOTP_SEED)?;
    assert_eq!(codes[0], totp.code_at(NOW as u64));
    assert_eq!(codes[1], totp.code_at(NOW as u64 + totp.step()));

    assert_eq!(
        history,
        [
            AuthState::Anonymous,
            AuthState::CredentialSubmitted,
            AuthState::SecondFactorPending,
            AuthState::SecondFactorFailed(1),
            AuthState::SecondFactorPending,
            AuthState::AccountSelectionPending,
            AuthState::Authenticated,
        ]
    );
    assert_eq!(page.credential_submissions(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn persistent_totp_rejection_exhausts_restarts() -> Result<()> {
    let dir = TempDir::new()?;
    let page = FakePortal::new(PortalBehavior {
        requires_totp: true,
        rejections_before_accept: u32::MAX,
        ..Default::default()
    });

    let (result, history) =
        authenticate(&page, &credentials(PASSWORD, Some(TOTP_SEED)), dir.path()).await;

    match result {
        Err(AuthError::AttemptsExhausted { attempts, last }) => {
            assert_eq!(attempts, 3);
            assert!(matches!(
                *last,
                AuthError::SecondFactorRejected { rejections: 3 }
            ));
        }
        other => panic!("expected exhausted attempts, got {other:?}"),
    }

    let codes = page.submitted_codes();
    assert_eq!(codes.len(), 9);
    assert!(codes.windows(2).all(|pair| pair[0] != pair[1]));
    assert_eq!(page.credential_submissions(), 3);
    assert_eq!(history.last(), Some(&AuthState::LoginFailed));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn totp_challenge_without_seed_is_fatal() -> Result<()> {
    let dir = TempDir::new()?;
    let page = FakePortal::new(PortalBehavior {
        requires_totp: true,
        ..Default::default()
    });

    let (result, history) = authenticate(&page, &credentials(PASSWORD, None), dir.path()).await;

    assert!(matches!(result, Err(AuthError::Totp(TotpError::MissingSeed))));
    assert_eq!(page.credential_submissions(), 1);
    assert_eq!(history.last(), Some(&AuthState::LoginFailed));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn email_verification_stops_without_retrying() -> Result<()> {
    let dir = TempDir::new()?;
    let page = FakePortal::new(PortalBehavior {
        email_otp: true,
        ..Default::default()
    });

    let (result, history) =
        authenticate(&page, &credentials(PASSWORD, Some(TOTP_SEED)), dir.path()).await;

    let err = match result {
        Err(err) => err,
        Ok(()) => panic!("login should not succeed"),
    };
    assert!(matches!(err, AuthError::EmailVerificationRequired));
    assert!(err.to_string().contains("TOTP_SECRET"));
    assert_eq!(page.credential_submissions(), 1);
    assert_eq!(
        history,
        [
            AuthState::Anonymous,
            AuthState::CredentialSubmitted,
            AuthState::LoginFailed,
        ]
    );
    assert!(saved_session(dir.path())?.is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn account_selector_is_clicked_through() -> Result<()> {
    let dir = TempDir::new()?;
    let page = FakePortal::new(PortalBehavior {
        account_selector: true,
        ..Default::default()
    });

    let (result, history) = authenticate(&page, &credentials(PASSWORD, None), dir.path()).await;

    result?;
    assert_eq!(history.last(), Some(&AuthState::Authenticated));
    assert!(page.is_logged_in());
    assert_eq!(page.stage(), support::Stage::Portal);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn slow_sign_in_page_is_retried_with_a_snapshot() -> Result<()> {
    let dir = TempDir::new()?;
    let page = FakePortal::new(PortalBehavior {
        email_field_missing_loads: 1,
        ..Default::default()
    });

    let (result, _) = authenticate(&page, &credentials(PASSWORD, None), dir.path()).await;

    result?;
    assert_eq!(page.sign_in_loads(), 2);
    assert_eq!(page.credential_submissions(), 1);

    let snapshots = files_with_prefix(&dir.path().join("debug"), "email_field_attempt1_");
    assert!(snapshots.iter().any(|name| name.ends_with(".png")));
    assert!(snapshots.iter().any(|name| name.ends_with(".html")));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn wrong_password_restarts_up_to_the_attempt_ceiling() -> Result<()> {
    let dir = TempDir::new()?;
    let page = FakePortal::new(PortalBehavior::default());

    let (result, history) =
        authenticate(&page, &credentials("hunter2", None), dir.path()).await;

    match result {
        Err(AuthError::AttemptsExhausted { attempts, last }) => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, AuthError::LandingTimeout { .. }));
        }
        other => panic!("expected exhausted attempts, got {other:?}"),
    }
    assert_eq!(page.credential_submissions(), 3);
    assert_eq!(
        history
            .iter()
            .filter(|s| **s == AuthState::CredentialSubmitted)
            .count(),
        3
    );
    assert!(!files_with_prefix(&dir.path().join("debug"), "login_timeout_").is_empty());
    assert!(saved_session(dir.path())?.is_none());
    Ok(())
}
