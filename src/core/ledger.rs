use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::core::error::StorageError;

pub const DEFAULT_CATEGORY: &str = "General";

/// One stored expense record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub item_name: String,
    pub category: String,
    pub quantity: u32,
    pub price_per_unit: f64,
    pub total_price: f64,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn recompute_total(&mut self) {
        self.total_price = f64::from(self.quantity) * self.price_per_unit;
    }
}

/// A validated entry that has not been stored yet. The store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    pub item_name: String,
    pub category: String,
    pub quantity: u32,
    pub price_per_unit: f64,
    pub total_price: f64,
}

impl NewEntry {
    pub fn new(item_name: String, category: String, quantity: u32, price_per_unit: f64) -> Self {
        Self {
            item_name,
            category,
            quantity,
            price_per_unit,
            total_price: f64::from(quantity) * price_per_unit,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryFilter {
    All,
    Category(String),
    /// Entries whose total price is at least this amount.
    AbovePrice(f64),
    NameContains(String),
}

/// Persistent ledger storage. Implementations synchronize themselves; callers
/// never hold a lock across calls.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert(&self, entry: NewEntry) -> Result<LedgerEntry, StorageError>;

    /// Persists changed fields of an existing entry, recomputing its total.
    async fn update(&self, entry: &LedgerEntry) -> Result<LedgerEntry, StorageError>;

    async fn get(&self, id: &str) -> Result<LedgerEntry, StorageError>;

    /// Newest first.
    async fn list(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>, StorageError>;

    /// Revision counter bumped after every successful mutation.
    fn subscribe(&self) -> watch::Receiver<u64>;
}
