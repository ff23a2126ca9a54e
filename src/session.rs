//! Cookie jar persistence.
//!
//! The jar is the only piece of browser state that outlives a run. It is
//! written after the portal confirms an authenticated session and read back
//! at the start of the next run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One cookie as captured from the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Expiry as seconds since the Unix epoch; `None` for session cookies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,

    #[serde(default)]
    pub http_only: bool,

    #[serde(default)]
    pub secure: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

impl SessionCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            expires: None,
            http_only: false,
            secure: false,
            same_site: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

/// Ordered cookies of one browser session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CookieJar {
    cookies: Vec<SessionCookie>,
}

impl CookieJar {
    pub fn new(cookies: Vec<SessionCookie>) -> Self {
        Self { cookies }
    }

    pub fn cookies(&self) -> &[SessionCookie] {
        &self.cookies
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Cookies ready to be applied to a fresh browser.
    ///
    /// The domain attribute is dropped so the browser scopes each cookie to
    /// the page it is set on; cookies captured on the identity subdomain
    /// then also apply to the portal host.
    pub fn restorable(&self) -> Vec<SessionCookie> {
        self.cookies
            .iter()
            .cloned()
            .map(|mut cookie| {
                cookie.domain = None;
                cookie
            })
            .collect()
    }
}

/// On-disk location of the cookie jar.
#[derive(Debug, Clone)]
pub struct CookieJarFile {
    path: PathBuf,
}

impl CookieJarFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the jar. A missing file means "no prior session", not an error.
    pub fn load(&self) -> Result<Option<CookieJar>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read cookie file: {}", self.path.display()))?;

        let jar: CookieJar = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse cookie file: {}", self.path.display()))?;

        Ok(Some(jar))
    }

    /// Replace the stored jar.
    ///
    /// Written through a temporary file in the same directory so an
    /// interrupted run never leaves a truncated jar behind.
    pub fn save(&self, jar: &CookieJar) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create cookie dir: {}", dir.display()))?;

        let content = serde_json::to_string_pretty(jar).context("Failed to serialize cookies")?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        std::io::Write::write_all(&mut tmp, content.as_bytes())
            .context("Failed to write cookies")?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to write cookie file: {}", self.path.display()))?;

        Ok(())
    }

    pub fn delete(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("Failed to delete cookie file: {}", self.path.display()))?;
        }
        Ok(())
    }
}
