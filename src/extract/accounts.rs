use std::collections::BTreeMap;

use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};

use super::{extract_number, selector, ExtractError};

const CONTAINER: &str = "section#registered-accounts";
const HEADING_CLASS: &str = "heading-category-name";
const ACCOUNT_CLASS: &str = "account";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub bank_name: String,
    pub number: i64,
    pub balance: i64,
}

impl AccountRecord {
    pub fn new(bank_name: impl Into<String>, number: i64, balance: i64) -> Self {
        Self {
            bank_name: bank_name.into(),
            number,
            balance,
        }
    }
}

/// Category heading → accounts under it, in page order.
///
/// Headings iterate sorted so two extractions of the same page serialize
/// identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountTree {
    buckets: BTreeMap<String, Vec<AccountRecord>>,
}

impl AccountTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or reuse) the bucket for `heading`.
    pub fn open_bucket(&mut self, heading: impl Into<String>) {
        self.buckets.entry(heading.into()).or_default();
    }

    pub fn push(&mut self, heading: &str, record: AccountRecord) {
        self.buckets
            .entry(heading.to_string())
            .or_default()
            .push(record);
    }

    pub fn bucket(&self, heading: &str) -> Option<&[AccountRecord]> {
        self.buckets.get(heading).map(Vec::as_slice)
    }

    pub fn headings(&self) -> impl Iterator<Item = &str> {
        self.buckets.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[AccountRecord])> {
        self.buckets.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// First account named `bank_name` under `heading`.
    pub fn find(&self, heading: &str, bank_name: &str) -> Option<&AccountRecord> {
        self.bucket(heading)?
            .iter()
            .find(|record| record.bank_name == bank_name)
    }

    /// Number of accounts across all buckets.
    pub fn account_count(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Something odd about the page that did not stop extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractWarning {
    /// No account-list container; usually a page that has not finished loading.
    ContainerMissing,
    /// An account item appeared before any category heading.
    OrphanAccount { bank_name: String },
    /// An account item had no name link.
    MissingName { heading: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountExtraction {
    pub tree: AccountTree,
    pub warnings: Vec<ExtractWarning>,
}

impl AccountExtraction {
    pub fn container_missing(&self) -> bool {
        self.warnings.contains(&ExtractWarning::ContainerMissing)
    }
}

/// Parse the registered-accounts list out of the portal's home page.
///
/// Only selector construction can fail; everything the page itself might
/// be missing is reported through [`AccountExtraction::warnings`].
pub fn extract_accounts(markup: &str) -> Result<AccountExtraction, ExtractError> {
    let document = Html::parse_document(markup);
    let container_sel = selector(CONTAINER)?;
    let items_sel = selector(&format!("li.{HEADING_CLASS}, li.{ACCOUNT_CLASS}"))?;
    let name_sel = selector("a")?;
    let number_sel = selector("ul.amount li.number")?;
    let balance_sel = selector("ul.amount li.balance")?;

    let mut extraction = AccountExtraction::default();

    let Some(container) = document.select(&container_sel).next() else {
        extraction.warnings.push(ExtractWarning::ContainerMissing);
        return Ok(extraction);
    };

    let mut current: Option<String> = None;
    for item in container.select(&items_sel) {
        if has_class(&item, HEADING_CLASS) {
            let heading = text_of(&item);
            extraction.tree.open_bucket(heading.clone());
            current = Some(heading);
            continue;
        }

        let Some(name) = item.select(&name_sel).next().map(|a| text_of(&a)) else {
            extraction.warnings.push(ExtractWarning::MissingName {
                heading: current.clone().unwrap_or_default(),
            });
            continue;
        };

        let Some(heading) = &current else {
            extraction
                .warnings
                .push(ExtractWarning::OrphanAccount { bank_name: name });
            continue;
        };

        let number = first_number(&item, &number_sel);
        let balance = first_number(&item, &balance_sel);
        extraction
            .tree
            .push(heading, AccountRecord::new(name, number, balance));
    }

    Ok(extraction)
}

fn has_class(element: &ElementRef<'_>, class: &str) -> bool {
    element.value().classes().any(|c| c == class)
}

fn text_of(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn first_number(item: &ElementRef<'_>, sel: &scraper::Selector) -> i64 {
    item.select(sel)
        .next()
        .map(|cell| extract_number(&cell.text().collect::<String>()))
        .unwrap_or(0)
}
