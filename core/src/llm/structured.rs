//! Pull a JSON object out of free-form model output.

use serde_json::{Map, Value};

/// Parse the span between the first `{` and the last `}` as a JSON object.
///
/// Handles code fences and chatty preambles. Returns `None` when there is
/// no such span or it does not parse as an object.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// String field, treating null, blank and the literal "null" as absent
pub fn str_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_json() {
        let text = "Sure! Here it is:\n```json\n{\"intent\": \"market_info\", \"n\": {\"a\": 1}}\n```";
        let map = extract_json_object(text).unwrap();
        assert_eq!(map["intent"], "market_info");
    }

    #[test]
    fn test_no_object() {
        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_object("} backwards {").is_none());
        assert!(extract_json_object("{not: valid}").is_none());
    }

    #[test]
    fn test_str_field_nullish() {
        let map = extract_json_object(r#"{"a": "null", "b": " ", "c": null, "d": "maize"}"#).unwrap();
        assert!(str_field(&map, "a").is_none());
        assert!(str_field(&map, "b").is_none());
        assert!(str_field(&map, "c").is_none());
        assert_eq!(str_field(&map, "d").as_deref(), Some("maize"));
    }
}
