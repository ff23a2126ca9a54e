//! Structured-notes service holding the monthly baseline.
//!
//! A period is one collection (a Notion database); each line item of the
//! baseline is one record in it.

mod memory;
mod notion;

pub use memory::MemoryNotes;
pub use notion::NotionNotes;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One existing line item, as read back from the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineRecord {
    pub name: String,
    pub price: i64,
}

/// A line item to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub name: String,
    pub amount: i64,
    pub categories: Vec<String>,
    pub note: String,
    pub icon: Option<String>,
}

#[async_trait]
pub trait NotesService: Send + Sync {
    async fn query_records(&self, collection_id: &str) -> Result<Vec<BaselineRecord>>;

    /// Create an empty collection and return its id.
    async fn create_collection(&self, title: &str) -> Result<String>;

    /// Create a record and return its id.
    async fn create_record(&self, collection_id: &str, record: &NewRecord) -> Result<String>;
}
