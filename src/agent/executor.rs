use serde::Serialize;
use std::sync::Arc;

use crate::core::command::{Command, ItemFields};
use crate::core::ledger::{LedgerStore, NewEntry, DEFAULT_CATEGORY};

/// Longest status line produced for a batch insert, before the `...` marker.
pub const MAX_STATUS_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Work finished; the status returns to idle.
    Done,
    /// A reply for the user that stays visible until the next request.
    Reply,
    /// Stays visible as an error until the next request.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub outcome: Outcome,
    /// Short status line.
    pub message: String,
    /// Full text for the running output area.
    pub detail: String,
    pub inserted: Vec<String>,
    pub failed: Vec<String>,
}

impl ExecutionResult {
    fn new(outcome: Outcome, message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            outcome,
            message: message.into(),
            detail: detail.into(),
            inserted: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.outcome == Outcome::Failed
    }
}

/// Validates commands and applies them to the ledger.
pub struct IntentExecutor {
    store: Arc<dyn LedgerStore>,
}

impl IntentExecutor {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn execute(&self, command: Command) -> ExecutionResult {
        tracing::debug!(command = command.name(), "executing command");
        match command {
            Command::InsertOne(fields) => self.insert_one(fields).await,
            Command::InsertMany { items } => self.insert_many(items).await,
            Command::GetAll => ExecutionResult::new(Outcome::Done, "", "Showing all expenses."),
            Command::GetByCategory { category } => ExecutionResult::new(
                Outcome::Done,
                format!("Filtering by category: {category}"),
                format!("To see items in category '{category}', check the main list (it is not filtered)."),
            ),
            Command::GetAbovePrice { min_price } => ExecutionResult::new(
                Outcome::Done,
                format!("Filtering for expenses above {min_price}"),
                format!("To see items above {min_price}, check the main list (it is not filtered)."),
            ),
            Command::SearchByName { query } => ExecutionResult::new(
                Outcome::Done,
                format!("Searching for: {query}"),
                format!("To see items matching '{query}', check the main list (it is not filtered)."),
            ),
            Command::OtherQuestion { raw_model_text, .. } => ExecutionResult::new(
                Outcome::Reply,
                format!("Model: {raw_model_text}"),
                raw_model_text,
            ),
            Command::Unrecognized { raw_model_text } => ExecutionResult::new(
                Outcome::Failed,
                cap(&format!(
                    "Could not understand the request. Raw model output: {raw_model_text}"
                )),
                raw_model_text,
            ),
        }
    }

    async fn insert_one(&self, fields: ItemFields) -> ExecutionResult {
        let Some(entry) = validate(&fields) else {
            tracing::warn!(item = ?fields.item_name, price = ?fields.price_per_unit, "insert rejected");
            let mut result = ExecutionResult::new(
                Outcome::Failed,
                "Could not insert expense: Missing name or price.",
                "Failed to insert: Invalid data received from the model.",
            );
            result.failed.push(display_name(&fields));
            return result;
        };

        let summary = format!(
            "{} ({} x {} = {}, Category: {})",
            entry.item_name, entry.quantity, entry.price_per_unit, entry.total_price, entry.category
        );
        match self.store.insert(entry).await {
            Ok(stored) => {
                let mut result = ExecutionResult::new(
                    Outcome::Done,
                    format!("Expense inserted: {}", stored.item_name),
                    format!("Inserted: {summary}"),
                );
                result.inserted.push(summary);
                result
            }
            Err(e) => {
                tracing::error!(error = %e, "store insert failed");
                let mut result = ExecutionResult::new(
                    Outcome::Failed,
                    format!("Error inserting: {e}"),
                    "Error processing insert request.",
                );
                result.failed.push(display_name(&fields));
                result
            }
        }
    }

    /// Items are inserted one by one; a failure never undoes earlier items.
    async fn insert_many(&self, items: Vec<ItemFields>) -> ExecutionResult {
        if items.is_empty() {
            return ExecutionResult::new(
                Outcome::Failed,
                "No items provided for multiple insertion.",
                "Failed to insert multiple: No item data from the model.",
            );
        }

        let mut inserted = Vec::new();
        let mut failed = Vec::new();
        for fields in &items {
            let Some(entry) = validate(fields) else {
                tracing::warn!(item = ?fields.item_name, price = ?fields.price_per_unit, "batch item rejected");
                failed.push(display_name(fields));
                continue;
            };
            let summary = format!("{} ({} x {})", entry.item_name, entry.quantity, entry.price_per_unit);
            match self.store.insert(entry).await {
                Ok(_) => inserted.push(summary),
                Err(e) => {
                    tracing::error!(error = %e, item = %display_name(fields), "store insert failed");
                    failed.push(display_name(fields));
                }
            }
        }

        let mut detail = format!("Inserted: {}. ", inserted.join(", "));
        if !failed.is_empty() {
            detail.push_str(&format!("Failed for: {}.", failed.join(", ")));
        }
        let detail = detail.trim_end().to_string();
        let outcome = if inserted.is_empty() {
            Outcome::Failed
        } else {
            Outcome::Done
        };

        ExecutionResult {
            outcome,
            message: cap(&detail),
            detail,
            inserted,
            failed,
        }
    }
}

/// Applies defaults and the acceptance rule: a name and a positive price.
fn validate(fields: &ItemFields) -> Option<NewEntry> {
    let name = fields.item_name.as_deref()?.trim();
    let price = fields.price_per_unit?;
    if name.is_empty() || price.is_nan() || price <= 0.0 {
        return None;
    }
    let quantity = fields
        .quantity
        .filter(|q| *q >= 1)
        .map(|q| u32::try_from(q).unwrap_or(u32::MAX))
        .unwrap_or(1);
    let category = fields
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CATEGORY);

    Some(NewEntry::new(
        name.to_string(),
        category.to_string(),
        quantity,
        price,
    ))
}

fn display_name(fields: &ItemFields) -> String {
    fields
        .item_name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "Unnamed Item".to_string())
}

fn cap(message: &str) -> String {
    if message.chars().count() <= MAX_STATUS_LEN {
        return message.to_string();
    }
    let mut capped: String = message.chars().take(MAX_STATUS_LEN).collect();
    capped.push_str("...");
    capped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: Option<&str>, quantity: Option<i64>, price: Option<f64>) -> ItemFields {
        ItemFields {
            item_name: name.map(String::from),
            category: None,
            quantity,
            price_per_unit: price,
        }
    }

    #[test]
    fn validate_applies_defaults() {
        let entry = validate(&item(Some("mango"), None, Some(20.0))).unwrap();
        assert_eq!(entry.category, "General");
        assert_eq!(entry.quantity, 1);
        assert_eq!(entry.total_price, 20.0);

        let entry = validate(&item(Some("mango"), Some(-3), Some(2.5))).unwrap();
        assert_eq!(entry.quantity, 1);
    }

    #[test]
    fn validate_rejects_missing_name_or_price() {
        assert!(validate(&item(None, Some(1), Some(3.0))).is_none());
        assert!(validate(&item(Some("  "), Some(1), Some(3.0))).is_none());
        assert!(validate(&item(Some("tea"), Some(1), Some(0.0))).is_none());
        assert!(validate(&item(Some("tea"), Some(1), Some(-1.0))).is_none());
        assert!(validate(&item(Some("tea"), Some(1), None)).is_none());
    }

    #[test]
    fn total_is_quantity_times_price() {
        let entry = validate(&item(Some("pen"), Some(3), Some(1.25))).unwrap();
        assert_eq!(entry.total_price, 3.0 * 1.25);
    }

    #[test]
    fn cap_marks_truncation() {
        let short = "a".repeat(MAX_STATUS_LEN);
        assert_eq!(cap(&short), short);
        let long = "é".repeat(MAX_STATUS_LEN + 5);
        let capped = cap(&long);
        assert!(capped.ends_with("..."));
        assert_eq!(capped.chars().count(), MAX_STATUS_LEN + 3);
    }
}
