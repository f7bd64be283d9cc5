//! Parameter Bags
//!
//! Caller-supplied parameters, merged from the URL query string and (for POST)
//! a JSON object body. Keys are unique; later sources override earlier ones.
//! Values are bound by the engines, never rendered into SQL text.

use std::collections::BTreeMap;

use serde_json::Value;

/// Scalar value supplied by a caller
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ParamValue {
    /// Convert a JSON value into a bindable scalar
    ///
    /// Arrays and objects become their compact JSON text. Unsigned integers
    /// beyond `i64` are bound as floats.
    #[must_use]
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => Self::String(s),
            nested @ (Value::Array(_) | Value::Object(_)) => Self::String(nested.to_string()),
        }
    }

    /// JSON type name, for diagnostics
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) | Self::Float(_) => "number",
            Self::String(_) => "string",
        }
    }

    /// Text rendering used when an engine needs a string form
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(b) => Some(b.to_string()),
            Self::Int(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::String(s) => Some(s.clone()),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Named parameters for one invocation
///
/// Iteration is in key order, which fixes bind order for named-argument
/// dialects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterBag {
    values: BTreeMap<String, ParamValue>,
}

impl ParameterBag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a bag from URL query pairs; a repeated key keeps its last value
    #[must_use]
    pub fn from_query<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut bag = Self::new();
        for (key, value) in pairs {
            bag.insert(key, ParamValue::String(value.into()));
        }
        bag
    }

    /// Merge the members of a JSON object body; body keys win
    pub fn merge_json_object(&mut self, body: serde_json::Map<String, Value>) {
        for (key, value) in body {
            self.insert(key, ParamValue::from_json(value));
        }
    }

    /// Merge a raw request body
    ///
    /// Anything other than a JSON object (empty, malformed, array, scalar)
    /// contributes nothing. Returns whether the body was used.
    pub fn merge_body(&mut self, body: &[u8]) -> bool {
        if body.iter().all(u8::is_ascii_whitespace) {
            return false;
        }
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(map)) => {
                self.merge_json_object(map);
                true
            }
            _ => false,
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ParamValue) {
        self.values.insert(key.into(), value);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    /// Case-insensitive lookup, returning the stored key as well
    #[must_use]
    pub fn get_ignore_case(&self, key: &str) -> Option<(&str, &ParamValue)> {
        self.values
            .get_key_value(key)
            .or_else(|| self.values.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)))
            .map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, ParamValue)> for ParameterBag {
    fn from_iter<T: IntoIterator<Item = (K, ParamValue)>>(iter: T) -> Self {
        let mut bag = Self::new();
        for (key, value) in iter {
            bag.insert(key, value);
        }
        bag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_query_values_are_strings() {
        let bag = ParameterBag::from_query([("databaseName", "msdb"), ("top", "10")]);
        assert_eq!(bag.get("databaseName"), Some(&ParamValue::String("msdb".into())));
        assert_eq!(bag.get("top"), Some(&ParamValue::String("10".into())));
    }

    #[test]
    fn test_repeated_query_key_last_wins() {
        let bag = ParameterBag::from_query([("a", "1"), ("b", "x"), ("a", "2")]);
        assert_eq!(bag.len(), 2);
        assert_eq!(bag.get("a"), Some(&ParamValue::String("2".into())));
    }

    #[test]
    fn test_empty_string_stays_empty() {
        let bag = ParameterBag::from_query([("name", "")]);
        assert_eq!(bag.get("name"), Some(&ParamValue::String(String::new())));
    }

    #[test]
    fn test_body_overrides_and_extends_query() {
        let mut bag = ParameterBag::from_query([("name", "query"), ("keep", "q")]);
        assert!(bag.merge_body(br#"{"name": "dbo.Orders", "extra": 5}"#));

        assert_eq!(bag.get("name"), Some(&ParamValue::String("dbo.Orders".into())));
        assert_eq!(bag.get("keep"), Some(&ParamValue::String("q".into())));
        assert_eq!(bag.get("extra"), Some(&ParamValue::Int(5)));
    }

    #[test]
    fn test_non_object_bodies_are_ignored() {
        let bodies: [&[u8]; 7] =
            [b"", b"   ", b"not json", b"[1,2]", b"42", b"\"text\"", b"{\"a\":"];
        for body in bodies {
            let mut bag = ParameterBag::from_query([("a", "1")]);
            assert!(!bag.merge_body(body), "{:?}", String::from_utf8_lossy(body));
            assert_eq!(bag.len(), 1);
        }
    }

    #[test]
    fn test_json_scalars_keep_their_type() {
        assert_eq!(ParamValue::from_json(json!(null)), ParamValue::Null);
        assert_eq!(ParamValue::from_json(json!(true)), ParamValue::Bool(true));
        assert_eq!(ParamValue::from_json(json!(-7)), ParamValue::Int(-7));
        assert_eq!(ParamValue::from_json(json!(2.5)), ParamValue::Float(2.5));
        assert_eq!(ParamValue::from_json(json!(u64::MAX)), ParamValue::Float(u64::MAX as f64));
    }

    #[test]
    fn test_nested_json_becomes_compact_text() {
        assert_eq!(
            ParamValue::from_json(json!({"cols": ["a", "b"]})),
            ParamValue::String(r#"{"cols":["a","b"]}"#.into())
        );
        assert_eq!(ParamValue::from_json(json!([1, 2])), ParamValue::String("[1,2]".into()));
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let bag = ParameterBag::from_query([("DatabaseName", "msdb")]);
        let (key, value) = bag.get_ignore_case("databasename").unwrap();
        assert_eq!(key, "DatabaseName");
        assert_eq!(value, &ParamValue::String("msdb".into()));
        assert!(bag.get_ignore_case("DATABASENAME").is_some());
        assert!(bag.get_ignore_case("other").is_none());
    }

    #[test]
    fn test_iteration_is_key_ordered() {
        let bag = ParameterBag::from_query([("zeta", "1"), ("alpha", "2"), ("mid", "3")]);
        let names: Vec<&str> = bag.names().collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }
}
