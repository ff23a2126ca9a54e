//! Failure snapshots: a screenshot and the page markup, written side by side.

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{info, warn};

use crate::browser::PortalPage;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub screenshot: Option<PathBuf>,
    pub markup: Option<PathBuf>,
}

/// Writes `{label}_{timestamp}.png` and `.html` into one directory.
///
/// Capturing is best-effort: every failure is logged and swallowed so a
/// broken page never masks the error that triggered the snapshot.
#[derive(Debug, Clone)]
pub struct DebugSnapshotter {
    dir: Option<PathBuf>,
}

impl DebugSnapshotter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub async fn capture<P>(&self, page: &P, label: &str) -> Snapshot
    where
        P: PortalPage + ?Sized,
    {
        let Some(dir) = &self.dir else {
            return Snapshot::default();
        };

        if let Err(err) = std::fs::create_dir_all(dir) {
            warn!(dir = %dir.display(), error = %err, "Failed to create debug dir");
            return Snapshot::default();
        }

        let stem = format!(
            "{}_{}",
            sanitize_label(label),
            Local::now().format("%Y%m%d_%H%M%S_%3f")
        );

        let screenshot = match page.screenshot().await {
            Ok(png) => write_file(&dir.join(format!("{stem}.png")), &png),
            Err(err) => {
                warn!(label, error = %err, "Failed to take screenshot");
                None
            }
        };

        let markup = match page.content().await {
            Ok(html) => write_file(&dir.join(format!("{stem}.html")), html.as_bytes()),
            Err(err) => {
                warn!(label, error = %err, "Failed to read page markup");
                None
            }
        };

        if screenshot.is_some() || markup.is_some() {
            info!(label, dir = %dir.display(), "Saved debug snapshot");
        }

        Snapshot { screenshot, markup }
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Option<PathBuf> {
    match std::fs::write(path, bytes) {
        Ok(()) => Some(path.to_path_buf()),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Failed to write debug file");
            None
        }
    }
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "snapshot".to_string()
    } else {
        cleaned
    }
}
