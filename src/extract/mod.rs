//! Turning rendered portal markup into numbers.
//!
//! Extraction is pure: it takes the page source as a string, so fixtures
//! saved by the debug snapshotter can be replayed without a browser.

pub mod accounts;
pub mod expense;

pub use accounts::{extract_accounts, AccountExtraction, AccountRecord, AccountTree, ExtractWarning};
pub use expense::extract_expense;

use std::sync::LazyLock;

use regex::Regex;
use scraper::Selector;

static NUMBER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"-?\d[\d,]*").ok());

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("Expense summary section ({0}) not found")]
    SectionMissing(String),

    #[error("Expense summary has no table body")]
    BodyMissing,

    #[error("Expense summary table has no cells")]
    NoCells,

    #[error("Invalid selector {selector:?}: {message}")]
    Selector { selector: String, message: String },
}

/// First signed integer in `text`, thousands separators ignored.
///
/// Total: text without digits, or a value outside `i64`, yields 0.
pub fn extract_number(text: &str) -> i64 {
    let Some(re) = NUMBER.as_ref() else {
        return 0;
    };
    let Some(found) = re.find(text) else {
        return 0;
    };
    let digits: String = found.as_str().chars().filter(|c| *c != ',').collect();
    digits.parse().unwrap_or(0)
}

pub(crate) fn selector(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|e| ExtractError::Selector {
        selector: css.to_string(),
        message: e.to_string(),
    })
}
