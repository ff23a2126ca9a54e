//! Monthly baseline bookkeeping.
//!
//! The baseline is the amount of money available for the current pay
//! period. It lives in the notes service as one collection per period; a
//! small pointer file remembers which collection is current. On payday a
//! new collection is opened and seeded from configuration and the freshly
//! scraped balances.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{Datelike, Months, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::calendar::is_national_holiday;
use crate::clock::Clock;
use crate::config::BaselineConfig;
use crate::extract::AccountTree;
use crate::notes::{NewRecord, NotesService};

/// Which figure of an account a seed entry takes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountField {
    #[default]
    Number,
    Balance,
    /// `balance - number`, e.g. the unused part of a card limit.
    Remaining,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRef {
    pub category: String,
    pub name: String,
    #[serde(default)]
    pub field: AccountField,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmountSource {
    Fixed(i64),
    Account(AccountRef),
}

/// A line item written into every newly opened period.
///
/// Exactly one of `amount` and `account` must be set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedEntry {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(default)]
    pub categories: Vec<String>,

    #[serde(default)]
    pub note: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountRef>,
}

impl SeedEntry {
    pub fn source(&self) -> Result<AmountSource> {
        match (self.amount, &self.account) {
            (Some(amount), None) => Ok(AmountSource::Fixed(amount)),
            (None, Some(account)) => Ok(AmountSource::Account(account.clone())),
            (Some(_), Some(_)) => bail!("Seed entry {:?} sets both amount and account", self.name),
            (None, None) => bail!("Seed entry {:?} sets neither amount nor account", self.name),
        }
    }

    /// The entry's amount against `tree`; `None` when the account is missing.
    pub fn resolve(&self, tree: &AccountTree) -> Result<Option<i64>> {
        Ok(match self.source()? {
            AmountSource::Fixed(amount) => Some(amount),
            AmountSource::Account(account) => {
                tree.find(&account.category, &account.name)
                    .map(|record| match account.field {
                        AccountField::Number => Some(record.number),
                        AccountField::Balance => Some(record.balance),
                        AccountField::Remaining => record.balance.checked_sub(record.number),
                    })
                    .map(|amount| {
                        amount.with_context(|| {
                            format!("Seed entry {:?} overflows balance - number", self.name)
                        })
                    })
                    .transpose()?
            }
        })
    }
}

/// Payday of the given month: `nominal_day` (clamped to the month length),
/// moved back over weekends, national holidays and the extra `holidays`.
pub fn payday(year: i32, month: u32, nominal_day: u32, holidays: &[NaiveDate]) -> Option<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let last = first.checked_add_months(Months::new(1))?.pred_opt()?;
    let mut day = first.with_day(nominal_day.clamp(1, last.day()))?;

    while matches!(day.weekday(), Weekday::Sat | Weekday::Sun)
        || is_national_holiday(day)
        || holidays.contains(&day)
    {
        day = day.pred_opt()?;
    }
    Some(day)
}

pub fn is_payday(today: NaiveDate, nominal_day: u32, holidays: &[NaiveDate]) -> bool {
    payday(today.year(), today.month(), nominal_day, holidays) == Some(today)
}

/// Title of the collection opened on `today`'s payday; periods are named
/// after the month they mostly cover.
pub fn period_title(today: NaiveDate) -> String {
    format!("{}月度のお金", today.month() % 12 + 1)
}

/// Sum of baseline amounts, failing instead of wrapping.
pub fn checked_total(amounts: impl IntoIterator<Item = i64>) -> Result<i64> {
    amounts
        .into_iter()
        .try_fold(0i64, |total, amount| total.checked_add(amount))
        .context("Baseline total overflows")
}

/// `{"page_id": "...", "opened_on": "YYYY-MM-DD"}` file naming the current
/// period's collection and the day it was opened.
#[derive(Debug, Clone)]
pub struct BaselinePointer {
    path: PathBuf,
}

impl BaselinePointer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let object = self.read_object()?;
        Ok(object
            .get("page_id")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string))
    }

    /// Day the current collection was opened, when recorded.
    pub fn opened_on(&self) -> Result<Option<NaiveDate>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let object = self.read_object()?;
        Ok(object
            .get("opened_on")
            .and_then(|v| v.as_str())
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()))
    }

    /// Point at `collection_id` opened on `opened_on`, keeping any other
    /// keys in the file.
    pub fn save(&self, collection_id: &str, opened_on: NaiveDate) -> Result<()> {
        let mut object = if self.path.exists() {
            self.read_object()?
        } else {
            serde_json::Map::new()
        };
        object.insert(
            "page_id".to_string(),
            serde_json::Value::String(collection_id.to_string()),
        );
        object.insert(
            "opened_on".to_string(),
            serde_json::Value::String(opened_on.format("%Y-%m-%d").to_string()),
        );

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

        let content = serde_json::to_string_pretty(&object)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        std::io::Write::write_all(&mut tmp, content.as_bytes())
            .context("Failed to write baseline pointer")?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to write baseline pointer: {}", self.path.display()))?;
        Ok(())
    }

    fn read_object(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read baseline pointer: {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse baseline pointer: {}", self.path.display()))
    }
}

/// How the baseline total was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Baseline {
    /// Summed from the current period's collection.
    Existing { collection_id: String, total: i64 },
    /// Payday: a new collection was opened and seeded.
    Opened {
        collection_id: String,
        total: i64,
        records: usize,
    },
    /// No pointer yet; counted as zero.
    Missing,
}

impl Baseline {
    pub fn total(&self) -> i64 {
        match self {
            Baseline::Existing { total, .. } | Baseline::Opened { total, .. } => *total,
            Baseline::Missing => 0,
        }
    }
}

pub struct BaselineLedger<'a> {
    notes: &'a dyn NotesService,
    config: &'a BaselineConfig,
    clock: &'a dyn Clock,
    pointer: BaselinePointer,
}

impl<'a> BaselineLedger<'a> {
    pub fn new(notes: &'a dyn NotesService, config: &'a BaselineConfig, clock: &'a dyn Clock) -> Self {
        Self {
            notes,
            config,
            clock,
            pointer: BaselinePointer::new(&config.pointer_file),
        }
    }

    fn today(&self) -> Result<NaiveDate> {
        Ok(self.clock.today_in(self.config.tz()?))
    }

    pub fn is_payday(&self) -> Result<bool> {
        Ok(is_payday(self.today()?, self.config.payday, &self.config.holidays))
    }

    /// Current baseline total, opening a new period first on payday.
    ///
    /// A period already opened today is reused, so reruns on payday do not
    /// seed a second collection.
    pub async fn current(&self, tree: &AccountTree) -> Result<Baseline> {
        let today = self.today()?;
        if is_payday(today, self.config.payday, &self.config.holidays) {
            if self.pointer.opened_on()? == Some(today) && self.pointer.load()?.is_some() {
                info!(%today, "Baseline period already opened today; reusing it");
            } else {
                return self.open_period(tree, today).await;
            }
        }

        let Some(collection_id) = self.pointer.load()? else {
            warn!(
                path = %self.pointer.path().display(),
                "No baseline pointer; using a baseline of 0"
            );
            return Ok(Baseline::Missing);
        };

        let records = self.notes.query_records(&collection_id).await?;
        let total = checked_total(records.iter().map(|r| r.price))
            .with_context(|| format!("Failed to sum baseline collection {collection_id}"))?;
        info!(collection_id = %collection_id, records = records.len(), total, "Read baseline");
        Ok(Baseline::Existing {
            collection_id,
            total,
        })
    }

    async fn open_period(&self, tree: &AccountTree, today: NaiveDate) -> Result<Baseline> {
        let title = period_title(today);
        info!(title = %title, "Payday; opening a new baseline period");

        let collection_id = self.notes.create_collection(&title).await?;
        self.pointer.save(&collection_id, today)?;

        let mut amounts = Vec::new();
        for entry in &self.config.seed {
            let Some(amount) = entry.resolve(tree)? else {
                warn!(entry = %entry.name, "Seed account not found on the portal; skipping");
                continue;
            };
            let record = NewRecord {
                name: entry.name.clone(),
                amount,
                categories: entry.categories.clone(),
                note: entry.note.clone(),
                icon: entry.icon.clone(),
            };
            self.notes.create_record(&collection_id, &record).await?;
            amounts.push(amount);
        }
        let records = amounts.len();
        let total = checked_total(amounts)
            .with_context(|| format!("Failed to sum seed records of {title}"))?;

        info!(collection_id = %collection_id, records, total, "Opened baseline period");
        Ok(Baseline::Opened {
            collection_id,
            total,
            records,
        })
    }
}
