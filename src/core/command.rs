use serde::{Deserialize, Serialize};

/// Per-item fields of an insert, as the model supplied them. Absent or
/// unusable values are `None`; defaults are applied by the executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemFields {
    pub item_name: Option<String>,
    pub category: Option<String>,
    pub quantity: Option<i64>,
    pub price_per_unit: Option<f64>,
}

/// A structured request derived from model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    InsertOne(ItemFields),
    InsertMany {
        items: Vec<ItemFields>,
    },
    GetAll,
    GetByCategory {
        category: String,
    },
    GetAbovePrice {
        min_price: f64,
    },
    SearchByName {
        query: String,
    },
    OtherQuestion {
        original_question: String,
        raw_model_text: String,
    },
    Unrecognized {
        raw_model_text: String,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InsertOne(_) => "insert_one",
            Self::InsertMany { .. } => "insert_many",
            Self::GetAll => "get_all",
            Self::GetByCategory { .. } => "get_by_category",
            Self::GetAbovePrice { .. } => "get_above_price",
            Self::SearchByName { .. } => "search_by_name",
            Self::OtherQuestion { .. } => "other_question",
            Self::Unrecognized { .. } => "unrecognized",
        }
    }
}
