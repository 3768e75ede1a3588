use serde_json::{Map, Value};

use crate::core::command::{Command, ItemFields};

/// Turns the model's final text into a [`Command`]. Never fails: anything that
/// cannot be decoded becomes [`Command::OtherQuestion`] carrying the raw text.
pub fn interpret(raw_text: &str, original_user_text: &str) -> Command {
    let fallback = || Command::OtherQuestion {
        original_question: original_user_text.to_string(),
        raw_model_text: raw_text.to_string(),
    };

    let Some(object) = extract_object(raw_text) else {
        tracing::warn!("no JSON object in model output, treating as other question");
        return fallback();
    };

    let action = object
        .get("action")
        .and_then(Value::as_str)
        .map(|a| a.trim().to_lowercase())
        .unwrap_or_default();
    let data = object
        .get("data")
        .and_then(Value::as_object)
        .map(flatten)
        .unwrap_or_default();

    match decode(&action, &data, original_user_text, raw_text) {
        Some(command) => {
            tracing::debug!(command = command.name(), "interpreted model output");
            command
        }
        None => {
            tracing::warn!(%action, "missing or mistyped field, treating as other question");
            fallback()
        }
    }
}

/// First `{` through last `}`, parsed as a JSON object.
fn extract_object(raw_text: &str) -> Option<Map<String, Value>> {
    let start = raw_text.find('{')?;
    let end = raw_text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&raw_text[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "candidate JSON did not parse");
            None
        }
    }
}

/// Drops nulls and keeps only object elements of arrays, all the way down.
fn flatten(object: &Map<String, Value>) -> Map<String, Value> {
    object
        .iter()
        .filter_map(|(key, value)| flatten_value(value).map(|v| (key.clone(), v)))
        .collect()
}

fn flatten_value(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(inner) => Some(Value::Object(flatten(inner))),
        Value::Array(elements) => Some(Value::Array(
            elements
                .iter()
                .filter_map(Value::as_object)
                .map(|o| Value::Object(flatten(o)))
                .collect(),
        )),
        scalar => Some(scalar.clone()),
    }
}

/// `None` means a required field is missing or has the wrong type.
fn decode(
    action: &str,
    data: &Map<String, Value>,
    original_user_text: &str,
    raw_text: &str,
) -> Option<Command> {
    let command = match action {
        "insert_expense" => Command::InsertOne(item_fields(data)),
        "insert_multiple_expenses" => Command::InsertMany {
            items: data
                .get("items")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_object)
                        .map(item_fields)
                        .collect()
                })
                .unwrap_or_default(),
        },
        "get_all_expenses" => Command::GetAll,
        "get_expenses_by_category" => Command::GetByCategory {
            category: non_blank(data.get("category")?)?,
        },
        "get_expenses_above_price" => Command::GetAbovePrice {
            min_price: number(data.get("minPrice")?)?,
        },
        "search_expenses_by_name" => Command::SearchByName {
            query: non_blank(data.get("nameQuery")?)?,
        },
        "other_question" => Command::OtherQuestion {
            original_question: data
                .get("original_question")
                .and_then(non_blank)
                .unwrap_or_else(|| original_user_text.to_string()),
            raw_model_text: raw_text.to_string(),
        },
        _ => Command::Unrecognized {
            raw_model_text: raw_text.to_string(),
        },
    };
    Some(command)
}

fn item_fields(data: &Map<String, Value>) -> ItemFields {
    ItemFields {
        item_name: data.get("itemName").and_then(non_blank),
        category: data.get("category").and_then(non_blank),
        quantity: data.get("quantity").and_then(quantity),
        price_per_unit: data.get("pricePerUnit").and_then(number),
    }
}

fn non_blank(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Numbers, or strings holding a number.
fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite())
}

fn quantity(value: &Value) -> Option<i64> {
    number(value).map(|n| n.trunc() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_insert_with_surrounding_prose() {
        let raw = r#"Sure! {"action":"insert_expense","data":{"itemName":"mango","quantity":4,"pricePerUnit":20}} done"#;
        assert_eq!(
            interpret(raw, "add 4kg mango of 20"),
            Command::InsertOne(ItemFields {
                item_name: Some("mango".into()),
                category: None,
                quantity: Some(4),
                price_per_unit: Some(20.0),
            })
        );
    }

    #[test]
    fn action_is_case_insensitive() {
        let raw = r#"{"action":" GET_ALL_EXPENSES ","data":{}}"#;
        assert_eq!(interpret(raw, "show"), Command::GetAll);
    }

    #[test]
    fn no_json_span_falls_back_verbatim() {
        for raw in ["I have no idea", "} backwards {", ""] {
            assert_eq!(
                interpret(raw, "what?"),
                Command::OtherQuestion {
                    original_question: "what?".into(),
                    raw_model_text: raw.into(),
                }
            );
        }
    }

    #[test]
    fn broken_json_falls_back() {
        let raw = r#"{"action": "insert_expense", "data": {"itemName": }"#;
        assert!(matches!(interpret(raw, "x"), Command::OtherQuestion { .. }));
        assert!(matches!(interpret("{ [1, 2] }", "x"), Command::OtherQuestion { .. }));
    }

    #[test]
    fn unknown_or_blank_action_is_unrecognized() {
        for raw in [
            r#"{"action":"delete_everything","data":{}}"#,
            r#"{"action":"","data":{}}"#,
            r#"{"data":{}}"#,
        ] {
            assert_eq!(
                interpret(raw, "x"),
                Command::Unrecognized {
                    raw_model_text: raw.into()
                }
            );
        }
    }

    #[test]
    fn decodes_batch_and_skips_non_objects() {
        let raw = r#"{"action":"insert_multiple_expenses","data":{"items":[
            {"itemName":"tea","quantity":2,"pricePerUnit":5.5,"category":"Beverages"},
            "junk",
            {"itemName":"rice","pricePerUnit":"60","quantity":null}
        ]}}"#;
        let Command::InsertMany { items } = interpret(raw, "x") else {
            panic!("expected InsertMany");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].category.as_deref(), Some("Beverages"));
        assert_eq!(items[0].price_per_unit, Some(5.5));
        assert_eq!(items[1].price_per_unit, Some(60.0));
        assert_eq!(items[1].quantity, None);
    }

    #[test]
    fn batch_without_items_is_empty() {
        let raw = r#"{"action":"insert_multiple_expenses","data":{}}"#;
        assert_eq!(interpret(raw, "x"), Command::InsertMany { items: vec![] });
    }

    #[test]
    fn fractional_quantity_truncates() {
        let raw = r#"{"action":"insert_expense","data":{"itemName":"milk","quantity":2.7,"pricePerUnit":3}}"#;
        let Command::InsertOne(fields) = interpret(raw, "x") else {
            panic!("expected InsertOne");
        };
        assert_eq!(fields.quantity, Some(2));
    }

    #[test]
    fn decodes_read_intents() {
        assert_eq!(
            interpret(r#"{"action":"get_expenses_by_category","data":{"category":"Food"}}"#, "x"),
            Command::GetByCategory { category: "Food".into() }
        );
        assert_eq!(
            interpret(r#"{"action":"get_expenses_above_price","data":{"minPrice":100}}"#, "x"),
            Command::GetAbovePrice { min_price: 100.0 }
        );
        assert_eq!(
            interpret(r#"{"action":"search_expenses_by_name","data":{"nameQuery":"cof"}}"#, "x"),
            Command::SearchByName { query: "cof".into() }
        );
    }

    #[test]
    fn read_intent_missing_field_falls_back() {
        let raw = r#"{"action":"get_expenses_above_price","data":{"minPrice":"lots"}}"#;
        assert_eq!(
            interpret(raw, "expensive stuff"),
            Command::OtherQuestion {
                original_question: "expensive stuff".into(),
                raw_model_text: raw.into(),
            }
        );
    }

    #[test]
    fn other_question_prefers_model_copy() {
        let raw = r#"{"action":"other_question","data":{"original_question":"how much?"}}"#;
        assert_eq!(
            interpret(raw, "typed text"),
            Command::OtherQuestion {
                original_question: "how much?".into(),
                raw_model_text: raw.into(),
            }
        );
    }
}
