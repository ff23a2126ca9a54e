//! In-memory notes service for testing.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{BaselineRecord, NewRecord, NotesService};

#[derive(Debug, Default)]
struct Inner {
    titles: HashMap<String, String>,
    records: HashMap<String, Vec<NewRecord>>,
    next_id: u64,
}

/// Collections and records kept in a map, ids handed out sequentially.
#[derive(Debug, Default)]
pub struct MemoryNotes {
    inner: Mutex<Inner>,
}

impl MemoryNotes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a collection with existing records.
    pub async fn insert_collection(&self, id: &str, title: &str, records: Vec<NewRecord>) {
        let mut inner = self.inner.lock().await;
        inner.titles.insert(id.to_string(), title.to_string());
        inner.records.insert(id.to_string(), records);
    }

    pub async fn title(&self, collection_id: &str) -> Option<String> {
        self.inner.lock().await.titles.get(collection_id).cloned()
    }

    pub async fn records(&self, collection_id: &str) -> Vec<NewRecord> {
        self.inner
            .lock()
            .await
            .records
            .get(collection_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn collection_count(&self) -> usize {
        self.inner.lock().await.titles.len()
    }
}

#[async_trait]
impl NotesService for MemoryNotes {
    async fn query_records(&self, collection_id: &str) -> Result<Vec<BaselineRecord>> {
        let inner = self.inner.lock().await;
        let records = inner
            .records
            .get(collection_id)
            .with_context(|| format!("Unknown collection: {collection_id}"))?;
        Ok(records
            .iter()
            .map(|r| BaselineRecord {
                name: r.name.clone(),
                price: r.amount,
            })
            .collect())
    }

    async fn create_collection(&self, title: &str) -> Result<String> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = format!("collection-{}", inner.next_id);
        inner.titles.insert(id.clone(), title.to_string());
        inner.records.insert(id.clone(), Vec::new());
        Ok(id)
    }

    async fn create_record(&self, collection_id: &str, record: &NewRecord) -> Result<String> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = format!("record-{}", inner.next_id);
        inner
            .records
            .get_mut(collection_id)
            .with_context(|| format!("Unknown collection: {collection_id}"))?
            .push(record.clone());
        Ok(id)
    }
}
