//! Helpers for turning nested documents into flat rows.
//!
//! Most protocol collections store one document per mission with a `data`
//! array of sub-records. [`explode`] yields one [`SubRecord`] per array
//! element, each still carrying its parent so the mission identifier is
//! never lost.

use serde_json::{Map, Value};

use crate::models::Document;

/// One element of a document's nested array, together with its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct SubRecord {
    pub parent: Map<String, Value>,
    /// `None` when the parent had no (or an empty) array.
    pub item: Option<Map<String, Value>>,
}

impl SubRecord {
    /// Non-null field of the sub-record, falling back to the parent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.item
            .as_ref()
            .and_then(|item| item.get(key))
            .filter(|v| !v.is_null())
            .or_else(|| self.parent.get(key).filter(|v| !v.is_null()))
    }

    /// Non-null field of the array item itself, ignoring the parent.
    pub fn own(&self, key: &str) -> Option<&Value> {
        self.item
            .as_ref()
            .and_then(|item| item.get(key))
            .filter(|v| !v.is_null())
    }

    /// Like [`own`](Self::own), cloned, `Null` when absent.
    pub fn own_value(&self, key: &str) -> Value {
        self.own(key).cloned().unwrap_or(Value::Null)
    }

    /// Like [`get`](Self::get), cloned, `Null` when absent.
    pub fn value(&self, key: &str) -> Value {
        self.get(key).cloned().unwrap_or(Value::Null)
    }

    /// Field rendered as text. Numbers are formatted; other types are `None`.
    pub fn text(&self, key: &str) -> Option<String> {
        self.get(key).and_then(value_text)
    }

    /// Whether the array item's `key` equals the string `expected`.
    /// Parent fields never satisfy a tag check.
    pub fn is(&self, key: &str, expected: &str) -> bool {
        self.own(key).and_then(value_text).as_deref() == Some(expected)
    }

    /// The parent's identifier. Sub-record fields never override it.
    pub fn protocol_id(&self) -> Value {
        self.parent.get("protocolId").cloned().unwrap_or(Value::Null)
    }
}

/// Explode the array at `field` of every document.
///
/// A document whose array is missing or empty still yields one sub-record
/// with `item == None`, so its parent fields stay visible.
pub fn explode(docs: impl IntoIterator<Item = Document>, field: &str) -> Vec<SubRecord> {
    let mut out = Vec::new();
    for doc in docs {
        let Value::Object(mut parent) = doc else {
            continue;
        };
        let items = match parent.remove(field) {
            Some(Value::Array(items)) if !items.is_empty() => items,
            _ => {
                out.push(SubRecord { parent, item: None });
                continue;
            }
        };
        for item in items {
            let item = match item {
                Value::Object(map) => Some(map),
                _ => None,
            };
            out.push(SubRecord {
                parent: parent.clone(),
                item,
            });
        }
    }
    out
}

/// Render strings and numbers as text.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Coerce a value to a number; anything unparseable becomes `Null`.
///
/// Accepts a decimal comma (`"0,5"`) when no decimal point is present.
pub fn to_number(value: Option<&Value>) -> Value {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => {
            let s = s.trim();
            let s = if s.contains('.') {
                s.to_string()
            } else {
                s.replace(',', ".")
            };
            s.parse::<f64>().ok().filter(|f| f.is_finite())
        }
        _ => None,
    };
    parsed
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Interpret `ja`/`nein` (and `yes`/`no`) as booleans.
///
/// Other strings become `Null`. Non-string values pass through unchanged.
pub fn ja_nein_to_bool(value: &Value) -> Value {
    match value {
        Value::String(s) => match s.to_lowercase().as_str() {
            "ja" | "yes" => Value::Bool(true),
            "nein" | "no" => Value::Bool(false),
            _ => Value::Null,
        },
        other => other.clone(),
    }
}

/// Flatten nested objects into one level, joining keys with `sep`.
///
/// `{"content": {"callSign": "x"}}` becomes `{"content_callSign": "x"}`.
/// Arrays are kept as values.
pub fn flatten_object(value: &Value, sep: &str) -> Map<String, Value> {
    let mut out = Map::new();
    if let Value::Object(map) = value {
        flatten_into(&mut out, None, map, sep);
    }
    out
}

fn flatten_into(out: &mut Map<String, Value>, prefix: Option<&str>, map: &Map<String, Value>, sep: &str) {
    for (key, value) in map {
        let name = match prefix {
            Some(p) => format!("{p}{sep}{key}"),
            None => key.clone(),
        };
        match value {
            // Extended-JSON wrappers are scalar values, not nesting.
            Value::Object(inner) if !is_extended_json(inner) => {
                flatten_into(out, Some(&name), inner, sep)
            }
            other => {
                out.insert(name, other.clone());
            }
        }
    }
}

fn is_extended_json(map: &Map<String, Value>) -> bool {
    map.len() == 1 && map.keys().next().is_some_and(|k| k.starts_with('$'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_explode_keeps_parent_id() {
        let docs = vec![
            json!({"protocolId": "p1", "data": [{"description": "GCS"}, {"description": "Schmerzen"}]}),
            json!({"protocolId": "p2", "data": [{"description": "GCS", "protocolId": "wrong"}]}),
        ];
        let rows = explode(docs, "data");
        assert_eq!(rows.len(), 3);
        let ids: Vec<_> = rows.iter().map(SubRecord::protocol_id).collect();
        assert_eq!(ids, vec![json!("p1"), json!("p1"), json!("p2")]);
        assert!(rows[1].is("description", "Schmerzen"));
    }

    #[test]
    fn test_explode_missing_or_empty_array() {
        let rows = explode(
            vec![json!({"protocolId": "p1"}), json!({"protocolId": "p2", "data": []})],
            "data",
        );
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.item.is_none()));
        assert_eq!(rows[1].protocol_id(), json!("p2"));
    }

    #[test]
    fn test_item_fields_shadow_parent() {
        let rows = explode(
            vec![json!({"protocolId": "p", "source": "doc", "data": [{"source": "item"}, {"source": null}]})],
            "data",
        );
        assert_eq!(rows[0].text("source").as_deref(), Some("item"));
        assert_eq!(rows[1].text("source").as_deref(), Some("doc"));
    }

    #[test]
    fn test_tag_checks_ignore_parent() {
        let rows = explode(
            vec![json!({"protocolId": "p", "description": "GCS", "source": "doc", "data": [
                {"value": 1},
                {"description": "GCS"}
            ]})],
            "data",
        );
        assert!(!rows[0].is("description", "GCS"));
        assert!(rows[1].is("description", "GCS"));
        assert_eq!(rows[0].own_value("source"), Value::Null);
        assert_eq!(rows[0].value("source"), json!("doc"));
    }

    #[test]
    fn test_to_number() {
        assert_eq!(to_number(Some(&json!("15"))), json!(15.0));
        assert_eq!(to_number(Some(&json!("0,5"))), json!(0.5));
        assert_eq!(to_number(Some(&json!(3))), json!(3.0));
        assert_eq!(to_number(Some(&json!("viel"))), Value::Null);
        assert_eq!(to_number(None), Value::Null);
    }

    #[test]
    fn test_ja_nein() {
        assert_eq!(ja_nein_to_bool(&json!("Ja")), json!(true));
        assert_eq!(ja_nein_to_bool(&json!("nein")), json!(false));
        assert_eq!(ja_nein_to_bool(&json!("vielleicht")), Value::Null);
        assert_eq!(ja_nein_to_bool(&json!(true)), json!(true));
    }

    #[test]
    fn test_flatten_object() {
        let flat = flatten_object(
            &json!({"protocolId": "p", "_id": {"$oid": "x"}, "content": {"callSign": "RTW", "nested": {"a": 1}}}),
            "_",
        );
        assert_eq!(flat["content_callSign"], json!("RTW"));
        assert_eq!(flat["content_nested_a"], json!(1));
        assert_eq!(flat["_id"], json!({"$oid": "x"}));
    }
}
