use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::baseline::SeedEntry;
use crate::duration::{deserialize_duration, serialize_duration};

/// Portal endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Root of the authenticated portal.
    pub base_url: String,

    /// Credential sign-in page.
    pub sign_in_url: String,

    /// Host of the identity provider that serves the login and second-factor
    /// pages. Being on this host means the session is not established yet.
    pub identity_host: String,

    /// Path that only renders for an authenticated session.
    pub probe_path: String,

    /// Month-to-date cash-flow summary.
    pub summary_path: String,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: "https://moneyforward.com".to_string(),
            sign_in_url: "https://moneyforward.com/users/sign_in".to_string(),
            identity_host: "id.moneyforward.com".to_string(),
            probe_path: "/accounts".to_string(),
            summary_path: "/cf/summary".to_string(),
        }
    }
}

impl PortalConfig {
    /// Join a portal-relative path onto the base URL.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub fn root_url(&self) -> String {
        self.base_url.trim_end_matches('/').to_string()
    }

    pub fn probe_url(&self) -> String {
        self.url(&self.probe_path)
    }

    pub fn summary_url(&self) -> String {
        self.url(&self.summary_path)
    }

    /// True when `url` is served by the portal itself rather than the identity host.
    pub fn is_portal_url(&self, url: &str) -> bool {
        url.starts_with(&self.root_url()) && !url.contains(&self.identity_host)
    }
}

fn default_login_attempts() -> u32 {
    3
}

fn default_totp_attempts() -> u32 {
    3
}

fn default_totp_margin() -> Duration {
    Duration::from_secs(5)
}

fn default_field_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_landing_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_second_factor_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_settle_delay() -> Duration {
    Duration::from_secs(3)
}

fn default_restart_delay() -> Duration {
    Duration::from_secs(5)
}

/// Login state machine budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Full login restarts before giving up.
    pub login_attempts: u32,

    /// TOTP submissions per login attempt.
    pub totp_attempts: u32,

    /// A TOTP code with less validity left than this is not submitted; the
    /// flow waits for the next window instead.
    #[serde(
        default = "default_totp_margin",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub totp_margin: Duration,

    /// Wait for the password, TOTP input and submit controls.
    #[serde(
        default = "default_field_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub field_timeout: Duration,

    /// Wait for the post-login redirect chain to reach the portal.
    #[serde(
        default = "default_landing_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub landing_timeout: Duration,

    /// Wait for the URL to leave the second-factor page after submitting a code.
    #[serde(
        default = "default_second_factor_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub second_factor_timeout: Duration,

    /// Pause after form submissions and redirects before reading the URL.
    #[serde(
        default = "default_settle_delay",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub settle_delay: Duration,

    /// Pause between full login restarts.
    #[serde(
        default = "default_restart_delay",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub restart_delay: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            login_attempts: default_login_attempts(),
            totp_attempts: default_totp_attempts(),
            totp_margin: default_totp_margin(),
            field_timeout: default_field_timeout(),
            landing_timeout: default_landing_timeout(),
            second_factor_timeout: default_second_factor_timeout(),
            settle_delay: default_settle_delay(),
            restart_delay: default_restart_delay(),
        }
    }
}

fn default_attempt_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(250)
}

/// Page readiness retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// How long one attempt waits for its marker.
    #[serde(
        default = "default_attempt_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub attempt_timeout: Duration,

    /// Navigate-and-wait attempts before raising a readiness timeout.
    pub max_attempts: u32,

    /// Pause between attempts.
    #[serde(
        default = "default_retry_delay",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub retry_delay: Duration,

    /// DOM polling granularity.
    #[serde(
        default = "default_poll_interval",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub poll_interval: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: default_attempt_timeout(),
            max_attempts: 3,
            retry_delay: default_retry_delay(),
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

/// Headless Chrome settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChromeConfig {
    /// Explicit Chrome/Chromium binary. Searched on PATH when unset.
    pub chrome_path: Option<PathBuf>,

    pub headless: bool,

    /// CDP request timeout (navigation included).
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub request_timeout: Duration,
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            request_timeout: default_request_timeout(),
        }
    }
}

/// Report contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Category heading whose accounts make up the securities section.
    pub securities_category: String,

    /// Click the portal's per-account update controls before extracting.
    pub refresh_accounts: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            securities_category: "証券".to_string(),
            refresh_accounts: true,
        }
    }
}

/// Monthly baseline bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Nominal payday (day of month). Moved earlier over weekends and holidays.
    pub payday: u32,

    /// IANA zone whose calendar decides "today".
    pub timezone: String,

    /// Non-working days besides weekends and Japanese national holidays.
    pub holidays: Vec<NaiveDate>,

    /// File holding the id of the current period's notes collection.
    pub pointer_file: PathBuf,

    /// Line items written into a freshly opened period.
    pub seed: Vec<SeedEntry>,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            payday: 25,
            timezone: "Asia/Tokyo".to_string(),
            holidays: Vec::new(),
            pointer_file: PathBuf::from("month-page-id.json"),
            seed: Vec::new(),
        }
    }
}

impl BaselineConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("Unknown time zone {:?}: {e}", self.timezone))
    }
}

/// Local files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Cookie jar. Defaults to the user cache directory.
    pub cookie_file: Option<PathBuf>,

    /// Where screenshots and markup dumps go. Defaults to `<data_dir>/debug`.
    pub debug_dir: Option<PathBuf>,
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory for the baseline pointer and debug output. If relative,
    /// resolved from the config file location.
    pub data_dir: Option<PathBuf>,

    pub portal: PortalConfig,
    pub auth: AuthConfig,
    pub readiness: ReadinessConfig,
    pub browser: ChromeConfig,
    pub report: ReportConfig,
    pub baseline: BaselineConfig,
    pub paths: PathsConfig,
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load config from a file, or return default config if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve the data directory path.
    ///
    /// If `data_dir` is set and relative, it's resolved relative to `config_dir`.
    /// If `data_dir` is not set, returns `config_dir`.
    pub fn resolve_data_dir(&self, config_dir: &Path) -> PathBuf {
        match &self.data_dir {
            Some(data_dir) if data_dir.is_absolute() => data_dir.clone(),
            Some(data_dir) => config_dir.join(data_dir),
            None => config_dir.to_path_buf(),
        }
    }

    fn resolve(self, config_dir: &Path) -> ResolvedConfig {
        let data_dir = self.resolve_data_dir(config_dir);

        let cookie_file = match self.paths.cookie_file {
            Some(path) => resolve_against(&data_dir, &path),
            None => default_cookie_file().unwrap_or_else(|| data_dir.join("cookies.json")),
        };
        let debug_dir = match self.paths.debug_dir {
            Some(path) => resolve_against(&data_dir, &path),
            None => data_dir.join("debug"),
        };

        let mut baseline = self.baseline;
        baseline.pointer_file = resolve_against(&data_dir, &baseline.pointer_file);

        ResolvedConfig {
            data_dir,
            cookie_file,
            debug_dir,
            portal: self.portal,
            auth: self.auth,
            readiness: self.readiness,
            browser: self.browser,
            report: self.report,
            baseline,
        }
    }
}

fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn default_cookie_file() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("moneydigest").join("cookies.json"))
}

/// Loaded configuration with resolved paths.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub data_dir: PathBuf,
    pub cookie_file: PathBuf,
    pub debug_dir: PathBuf,
    pub portal: PortalConfig,
    pub auth: AuthConfig,
    pub readiness: ReadinessConfig,
    pub browser: ChromeConfig,
    pub report: ReportConfig,
    /// `pointer_file` is already resolved against `data_dir`.
    pub baseline: BaselineConfig,
}

/// Returns the default config file path.
///
/// Resolution order:
/// 1. `./moneydigest.toml` if it exists in current directory
/// 2. `~/.local/share/moneydigest/moneydigest.toml` (XDG data directory)
pub fn default_config_path() -> PathBuf {
    let local_config = PathBuf::from("moneydigest.toml");
    if local_config.exists() {
        return local_config;
    }

    if let Some(data_dir) = dirs::data_dir() {
        return data_dir.join("moneydigest").join("moneydigest.toml");
    }

    local_config
}

impl ResolvedConfig {
    /// Load and resolve config from a file path.
    ///
    /// Relative paths are resolved against the config file's parent directory.
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_path = config_path
            .canonicalize()
            .with_context(|| format!("Config file not found: {}", config_path.display()))?;

        let config_dir = config_path
            .parent()
            .context("Config file has no parent directory")?;

        Ok(Config::load(&config_path)?.resolve(config_dir))
    }

    /// Load config, falling back to defaults if the file doesn't exist.
    ///
    /// Without a file, the file's intended parent directory is the data directory.
    pub fn load_or_default(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            return Self::load(config_path);
        }

        let config_path = if config_path.is_relative() {
            std::env::current_dir()
                .context("Failed to get current directory")?
                .join(config_path)
        } else {
            config_path.to_path_buf()
        };

        let config_dir = config_path
            .parent()
            .context("Config path has no parent directory")?;

        Ok(Config::default().resolve(config_dir))
    }
}
