//! Form-encoded request bodies ⇄ structured values.
//!
//! The server accepts `application/x-www-form-urlencoded` bodies in which
//! some values are JSON documents. [`encode_body`] turns the raw body into
//! an ordered field list, parsing every value that starts with `[` or `{`.
//! [`decode_body`] is the inverse: non-string values are serialized back to
//! JSON, everything is form-encoded with `+` for spaces, and fields keep
//! their original order.

use serde_json::Value;
use tracing::debug;
use url::form_urlencoded;

/// An ordered list of form fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormBody {
    fields: Vec<(String, Value)>,
}

impl FormBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Replace the value of `key`, or append the field if it is new.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.get_mut(&key) {
            Some(slot) => *slot = value,
            None => self.fields.push((key, value)),
        }
    }

    /// Take a field's value out, leaving `null` in its place so the field
    /// order survives a later [`insert`](Self::insert).
    pub fn take(&mut self, key: &str) -> Option<Value> {
        self.get_mut(key).map(Value::take)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Parse a raw form body. Values beginning with `[` or `{` are parsed as
/// JSON; a value that only looks like JSON stays a string.
pub fn encode_body(raw: &str) -> FormBody {
    let fields = form_urlencoded::parse(raw.as_bytes())
        .map(|(key, value)| {
            let value = if value.starts_with('[') || value.starts_with('{') {
                serde_json::from_str(&value).unwrap_or_else(|e| {
                    debug!(key = %key, error = %e, "form value is not JSON; keeping text");
                    Value::String(value.clone().into_owned())
                })
            } else {
                Value::String(value.into_owned())
            };
            (key.into_owned(), value)
        })
        .collect();
    FormBody { fields }
}

/// Serialize a [`FormBody`] back into a raw form body.
pub fn decode_body(body: &FormBody) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in &body.fields {
        match value {
            Value::String(text) => serializer.append_pair(key, text),
            other => serializer.append_pair(key, &other.to_string()),
        };
    }
    serializer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_json_values() {
        let raw = "client_id=2024-01-01+10%3A00&push_poll_data=%5B%7B%22operations%22%3A%5B%5D%7D%5D";
        let body = encode_body(raw);
        assert_eq!(body.get_str("client_id"), Some("2024-01-01 10:00"));
        assert_eq!(body.get("push_poll_data"), Some(&json!([{"operations": []}])));
    }

    #[test]
    fn test_spaces_encode_as_plus() {
        let mut body = FormBody::new();
        body.insert("name", json!("a b"));
        assert_eq!(decode_body(&body), "name=a+b");
    }

    #[test]
    fn test_field_order_is_preserved() {
        let raw = "z=1&a=2&m=3";
        let body = encode_body(raw);
        let keys: Vec<_> = body.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["z", "a", "m"]);
        assert_eq!(decode_body(&body), raw);
    }

    #[test]
    fn test_broken_json_stays_text() {
        let body = encode_body("x=%5Bnot+json");
        assert_eq!(body.get_str("x"), Some("[not json"));
        assert_eq!(decode_body(&body), "x=%5Bnot+json");
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut body = encode_body("a=1&b=2");
        let taken = body.take("a").unwrap();
        assert_eq!(taken, json!("1"));
        body.insert("a", json!({"k": "v"}));
        body.insert("c", json!("3"));
        let keys: Vec<_> = body.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["a", "b", "c"]);
        assert_eq!(encode_body(&decode_body(&body)), body);
    }

    #[test]
    fn test_empty_body() {
        assert!(encode_body("").is_empty());
        assert_eq!(decode_body(&FormBody::new()), "");
    }
}
