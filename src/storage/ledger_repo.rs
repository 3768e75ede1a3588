use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::atomic::AtomicI64;
use std::sync::Arc;
use tokio::sync::watch;

use crate::core::error::StorageError;
use crate::core::ledger::{EntryFilter, LedgerEntry, LedgerStore, NewEntry};

type EntryRow = (String, String, String, i64, f64, f64, i64);

const SELECT_COLUMNS: &str = "SELECT id, item_name, category, quantity, price_per_unit, \
     total_price, created_at FROM ledger_entries";

const ORDER_NEWEST_FIRST: &str = "ORDER BY created_at DESC, rowid DESC";

pub struct LedgerRepo {
    pool: SqlitePool,
    revision: Arc<watch::Sender<u64>>,
    clock: Arc<AtomicI64>,
}

impl LedgerRepo {
    pub fn new(pool: SqlitePool, revision: Arc<watch::Sender<u64>>, clock: Arc<AtomicI64>) -> Self {
        Self {
            pool,
            revision,
            clock,
        }
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

#[async_trait]
impl LedgerStore for LedgerRepo {
    async fn insert(&self, entry: NewEntry) -> Result<LedgerEntry, StorageError> {
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = super::database::next_timestamp(&self.clock);

        sqlx::query(
            "INSERT INTO ledger_entries (id, item_name, category, quantity, \
             price_per_unit, total_price, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&entry.item_name)
        .bind(&entry.category)
        .bind(i64::from(entry.quantity))
        .bind(entry.price_per_unit)
        .bind(entry.total_price)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        self.bump_revision();

        Ok(LedgerEntry {
            id,
            item_name: entry.item_name,
            category: entry.category,
            quantity: entry.quantity,
            price_per_unit: entry.price_per_unit,
            total_price: entry.total_price,
            created_at: millis_to_datetime(created_at),
        })
    }

    async fn update(&self, entry: &LedgerEntry) -> Result<LedgerEntry, StorageError> {
        let mut updated = entry.clone();
        updated.recompute_total();

        let result = sqlx::query(
            "UPDATE ledger_entries SET item_name = ?, category = ?, quantity = ?, \
             price_per_unit = ?, total_price = ? WHERE id = ?",
        )
        .bind(&updated.item_name)
        .bind(&updated.category)
        .bind(i64::from(updated.quantity))
        .bind(updated.price_per_unit)
        .bind(updated.total_price)
        .bind(&updated.id)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("ledger entry {}", entry.id)));
        }

        self.bump_revision();
        Ok(updated)
    }

    async fn get(&self, id: &str) -> Result<LedgerEntry, StorageError> {
        let row: EntryRow = sqlx::query_as::<_, EntryRow>(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?
            .ok_or_else(|| StorageError::NotFound(format!("ledger entry {id}")))?;

        row_to_entry(row)
    }

    async fn list(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>, StorageError> {
        let rows: Vec<EntryRow> = match filter {
            EntryFilter::All => {
                sqlx::query_as::<_, EntryRow>(&format!("{SELECT_COLUMNS} {ORDER_NEWEST_FIRST}"))
                    .fetch_all(&self.pool)
                    .await
            }
            EntryFilter::Category(category) => {
                sqlx::query_as::<_, EntryRow>(&format!(
                    "{SELECT_COLUMNS} WHERE category = ? {ORDER_NEWEST_FIRST}"
                ))
                .bind(category)
                .fetch_all(&self.pool)
                .await
            }
            EntryFilter::AbovePrice(min_price) => {
                sqlx::query_as::<_, EntryRow>(&format!(
                    "{SELECT_COLUMNS} WHERE total_price >= ? {ORDER_NEWEST_FIRST}"
                ))
                .bind(*min_price)
                .fetch_all(&self.pool)
                .await
            }
            EntryFilter::NameContains(query) => {
                sqlx::query_as::<_, EntryRow>(&format!(
                    "{SELECT_COLUMNS} WHERE item_name LIKE '%' || ? || '%' {ORDER_NEWEST_FIRST}"
                ))
                .bind(query)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| StorageError::Database(e.to_string()))?;

        rows.into_iter().map(row_to_entry).collect()
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

fn row_to_entry(row: EntryRow) -> Result<LedgerEntry, StorageError> {
    let quantity = u32::try_from(row.3)
        .map_err(|_| StorageError::Serialization(format!("invalid quantity {}", row.3)))?;

    Ok(LedgerEntry {
        id: row.0,
        item_name: row.1,
        category: row.2,
        quantity,
        price_per_unit: row.4,
        total_price: row.5,
        created_at: millis_to_datetime(row.6),
    })
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
