//! Tabular JSON parsing.
//!
//! Accepted shapes:
//! - `[{...}, {...}]`
//! - `{"key": [{...}, ...], ...}`; the first array-of-records value wins
//!   and rows gain a `__json_key` column holding its key.

use serde_json::{Map, Value};

use super::{clean_headers, NormalizedTable, EMPTY_CELL, JSON_KEY_COLUMN};
use crate::error::AppError;
use crate::validation::{strip_bom, TableFormat};

pub(super) fn parse(bytes: &[u8]) -> Result<NormalizedTable, AppError> {
    let value: Value = serde_json::from_slice(strip_bom(bytes))
        .map_err(|e| AppError::MalformedInput(format!("invalid JSON: {}", e)))?;

    match value {
        Value::Array(items) if is_record_array(&items) => records_to_table(items),
        Value::Object(map) => {
            for (key, value) in map {
                if let Value::Array(items) = value {
                    if is_record_array(&items) {
                        let mut table = records_to_table(items)?;
                        table.set_constant_column(JSON_KEY_COLUMN, &key);
                        return Ok(table);
                    }
                }
            }
            Err(AppError::MalformedInput(
                "JSON object holds no array of records".into(),
            ))
        }
        _ => Err(AppError::MalformedInput(
            "JSON document is not an array of records".into(),
        )),
    }
}

/// An empty array counts as a (zero-row) record array.
fn is_record_array(items: &[Value]) -> bool {
    items.first().map_or(true, Value::is_object)
}

fn records_to_table(items: Vec<Value>) -> Result<NormalizedTable, AppError> {
    let mut records: Vec<Map<String, Value>> = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        match item {
            Value::Object(map) => records.push(map),
            other => {
                return Err(AppError::MalformedInput(format!(
                    "record {} is {} instead of an object",
                    idx,
                    kind_name(&other)
                )))
            }
        }
    }

    // Keys in first-appearance order
    let mut raw_keys: Vec<String> = Vec::new();
    for record in &records {
        for key in record.keys() {
            if !raw_keys.iter().any(|k| k == key) {
                raw_keys.push(key.clone());
            }
        }
    }

    let mut table = NormalizedTable::new(TableFormat::Json);
    if raw_keys.is_empty() {
        // Zero-width rows cannot be represented in the merged CSV
        if !records.is_empty() {
            table
                .notes
                .push(format!("ignored {} records without fields", records.len()));
        }
        return Ok(table);
    }
    table.columns = clean_headers(raw_keys.iter().cloned());
    table.rows = records
        .iter()
        .map(|record| {
            raw_keys
                .iter()
                .map(|key| record.get(key).map(render).unwrap_or_default())
                .collect()
        })
        .collect();

    Ok(table)
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => EMPTY_CELL.to_string(),
        Value::String(s) => s.clone(),
        // Numbers, booleans, and nested values as compact JSON
        _ => value.to_string(),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_of_records() {
        let table = parse(br#"[{"plant":"A","kwh":10},{"kwh":12.5,"plant":"B","ok":true}]"#)
            .expect("should parse");
        assert_eq!(table.columns, vec!["plant", "kwh", "ok"]);
        assert_eq!(
            table.rows,
            vec![vec!["A", "10", ""], vec!["B", "12.5", "true"]]
        );
    }

    #[test]
    fn object_uses_first_record_array() {
        let table = parse(
            br#"{"meta": {"v": 1}, "tags": ["x"], "rows": [{"a": 1}], "more": [{"b": 2}]}"#,
        )
        .expect("should parse");
        assert_eq!(table.columns, vec!["a", JSON_KEY_COLUMN]);
        assert_eq!(table.rows, vec![vec!["1", "rows"]]);
    }

    #[test]
    fn nulls_and_nested_values() {
        let table = parse(br#"[{"a": null, "b": {"c": [1, 2]}}]"#).expect("should parse");
        assert_eq!(table.rows, vec![vec!["", r#"{"c":[1,2]}"#]]);
    }

    #[test]
    fn empty_array_is_a_zero_row_table() {
        let table = parse(b"[]").expect("should parse");
        assert!(table.columns.is_empty());
        assert!(table.rows.is_empty());
    }

    #[test]
    fn non_tabular_documents_are_malformed() {
        assert!(matches!(parse(b"42"), Err(AppError::MalformedInput(_))));
        assert!(matches!(parse(b"[1, 2]"), Err(AppError::MalformedInput(_))));
        assert!(matches!(
            parse(br#"{"a": 1}"#),
            Err(AppError::MalformedInput(_))
        ));
        assert!(matches!(
            parse(br#"[{"a": 1}, 2]"#),
            Err(AppError::MalformedInput(msg)) if msg.contains("record 1")
        ));
        assert!(matches!(parse(b"{not json"), Err(AppError::MalformedInput(_))));
    }
}
