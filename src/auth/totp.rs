//! RFC 6238 time-based one-time passwords (HMAC-SHA1).

use std::time::Duration;

use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::clock::Clock;

type HmacSha1 = Hmac<Sha1>;

pub const DEFAULT_STEP: u64 = 30;
pub const DEFAULT_DIGITS: u32 = 6;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TotpError {
    #[error("The portal asked for a TOTP code but TOTP_SECRET is not set")]
    MissingSeed,

    #[error("TOTP_SECRET is not a valid base32 seed: {0}")]
    MalformedSeed(String),
}

/// A code together with how long it stays valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TotpCode {
    pub code: String,
    pub remaining_secs: u64,
}

#[derive(Clone)]
pub struct Totp {
    mac: HmacSha1,
    step: u64,
    digits: u32,
}

impl std::fmt::Debug for Totp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Totp")
            .field("step", &self.step)
            .field("digits", &self.digits)
            .finish_non_exhaustive()
    }
}

impl Totp {
    /// Parse a base32 seed. Case-insensitive; padding is optional.
    pub fn from_seed(seed: &str) -> Result<Self, TotpError> {
        let cleaned = seed.trim().trim_end_matches('=').to_ascii_uppercase();
        let key = BASE32_NOPAD
            .decode(cleaned.as_bytes())
            .map_err(|e| TotpError::MalformedSeed(e.to_string()))?;
        if key.is_empty() {
            return Err(TotpError::MalformedSeed("seed decodes to zero bytes".to_string()));
        }
        let mac = HmacSha1::new_from_slice(&key)
            .map_err(|e| TotpError::MalformedSeed(e.to_string()))?;

        Ok(Self {
            mac,
            step: DEFAULT_STEP,
            digits: DEFAULT_DIGITS,
        })
    }

    pub fn with_digits(mut self, digits: u32) -> Self {
        self.digits = digits;
        self
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    /// Code for the window containing `unix_secs`.
    pub fn code_at(&self, unix_secs: u64) -> String {
        self.hotp(unix_secs / self.step)
    }

    /// Seconds until the window containing `unix_secs` ends.
    pub fn seconds_remaining(&self, unix_secs: u64) -> u64 {
        self.step - unix_secs % self.step
    }

    fn hotp(&self, counter: u64) -> String {
        let mut mac = self.mac.clone();
        mac.update(&counter.to_be_bytes());
        let hash = mac.finalize().into_bytes();

        let offset = (hash[hash.len() - 1] & 0x0f) as usize;
        let binary = u32::from_be_bytes([
            hash[offset] & 0x7f,
            hash[offset + 1],
            hash[offset + 2],
            hash[offset + 3],
        ]);
        let modulus = 10u32.pow(self.digits);
        format!("{:0width$}", binary % modulus, width = self.digits as usize)
    }

    /// A code that is safe to type in.
    ///
    /// Waits for the next window when less than `margin` remains in the
    /// current one, and also when the current code equals `rejected`.
    pub async fn next_code(
        &self,
        clock: &dyn Clock,
        margin: Duration,
        rejected: Option<&str>,
    ) -> TotpCode {
        let mut now = unix_now(clock);

        let remaining = self.seconds_remaining(now);
        if remaining < margin.as_secs() {
            info!(remaining, "TOTP window about to expire; waiting for the next one");
            now = self.roll_over(clock, now).await;
        }

        let mut code = self.code_at(now);
        if rejected == Some(code.as_str()) {
            info!("Current TOTP code was already rejected; waiting for the next window");
            now = self.roll_over(clock, now).await;
            code = self.code_at(now);
        }

        TotpCode {
            code,
            remaining_secs: self.seconds_remaining(now),
        }
    }

    /// Sleep into the next window. The returned time is never earlier than
    /// that window's start, whatever the clock says.
    async fn roll_over(&self, clock: &dyn Clock, now: u64) -> u64 {
        let wait = self.seconds_remaining(now) + 1;
        tokio::time::sleep(Duration::from_secs(wait)).await;
        unix_now(clock).max(now + wait)
    }
}

fn unix_now(clock: &dyn Clock) -> u64 {
    u64::try_from(clock.now().timestamp()).unwrap_or(0)
}

/// Short, non-reversible identifier for a seed, safe to log.
pub fn seed_fingerprint(seed: &str) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    hex::encode(digest)[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    // base32("12345678901234567890"), the RFC 6238 SHA-1 test key.
    const RFC_SEED: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn rfc6238_sha1_vectors() -> Result<(), TotpError> {
        let totp = Totp::from_seed(RFC_SEED)?.with_digits(8);
        assert_eq!(totp.code_at(59), "94287082");
        assert_eq!(totp.code_at(1_111_111_109), "07081804");
        assert_eq!(totp.code_at(1_111_111_111), "14050471");
        assert_eq!(totp.code_at(1_234_567_890), "89005924");
        assert_eq!(totp.code_at(2_000_000_000), "69279037");
        assert_eq!(totp.code_at(20_000_000_000), "65353130");
        Ok(())
    }

    #[test]
    fn six_digit_codes_are_the_low_digits() -> Result<(), TotpError> {
        let totp = Totp::from_seed(RFC_SEED)?;
        assert_eq!(totp.code_at(59), "287082");
        assert_eq!(totp.code_at(1_111_111_109), "081804");
        Ok(())
    }

    #[test]
    fn codes_are_stable_within_a_window_and_change_across_it() -> Result<(), TotpError> {
        let totp = Totp::from_seed(RFC_SEED)?;
        assert_eq!(totp.code_at(1_111_111_110), totp.code_at(1_111_111_119));
        assert_ne!(totp.code_at(1_111_111_109), totp.code_at(1_111_111_110));
        Ok(())
    }

    #[test]
    fn seed_parsing_is_lenient_about_case_and_padding() -> Result<(), TotpError> {
        let upper = Totp::from_seed("JBSWY3DPEHPK3PXP")?;
        let lower = Totp::from_seed("jbswy3dpehpk3pxp")?;
        let padded = Totp::from_seed("JBSWY3DPEHPK3PXP====")?;
        assert_eq!(upper.code_at(1_700_000_000), lower.code_at(1_700_000_000));
        assert_eq!(upper.code_at(1_700_000_000), padded.code_at(1_700_000_000));
        Ok(())
    }

    #[test]
    fn malformed_seed_is_rejected() {
        assert!(matches!(
            Totp::from_seed("not base32!"),
            Err(TotpError::MalformedSeed(_))
        ));
        assert!(matches!(Totp::from_seed(""), Err(TotpError::MalformedSeed(_))));
    }

    #[test]
    fn remaining_seconds() -> Result<(), TotpError> {
        let totp = Totp::from_seed(RFC_SEED)?;
        assert_eq!(totp.seconds_remaining(60), 30);
        assert_eq!(totp.seconds_remaining(89), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn next_code_skips_a_nearly_expired_window() -> Result<(), TotpError> {
        let totp = Totp::from_seed(RFC_SEED)?;
        // 2 seconds left in the window starting at 1_111_111_080.
        let clock = FixedClock::from_timestamp(1_111_111_108);

        let code = totp.next_code(&clock, Duration::from_secs(5), None).await;
        assert_eq!(code.code, totp.code_at(1_111_111_110));
        assert!(code.remaining_secs >= 5);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn next_code_never_repeats_a_rejected_code() -> Result<(), TotpError> {
        let totp = Totp::from_seed(RFC_SEED)?;
        let clock = FixedClock::from_timestamp(1_111_111_090);
        let first = totp.next_code(&clock, Duration::from_secs(5), None).await;

        let second = totp
            .next_code(&clock, Duration::from_secs(5), Some(&first.code))
            .await;
        assert_ne!(first.code, second.code);
        assert_eq!(second.code, totp.code_at(1_111_111_110));
        Ok(())
    }

    #[test]
    fn fingerprint_is_short_and_stable() {
        let a = seed_fingerprint("JBSWY3DPEHPK3PXP");
        assert_eq!(a.len(), 12);
        assert_eq!(a, seed_fingerprint("JBSWY3DPEHPK3PXP"));
        assert_ne!(a, seed_fingerprint("GEZDGNBVGY3TQOJQ"));
    }
}
