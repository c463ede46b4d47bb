use std::collections::BTreeMap;

use ffmpeg_next::Dictionary;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A value forwarded to the container/codec option layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Int(i64),
    Str(String),
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Str(value.to_string())
    }
}

/// Options passed to `Muxer::write_header`, e.g. `movflags=faststart`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderOptions(BTreeMap<String, OptionValue>);

impl HeaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<OptionValue>) -> &mut Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Accepts integers and strings; any other JSON value is an
    /// `UnsupportedOption`.
    pub fn from_json(map: &serde_json::Map<String, serde_json::Value>) -> Result<Self> {
        let mut options = Self::new();
        for (key, value) in map {
            let value = match value {
                serde_json::Value::String(s) => OptionValue::Str(s.clone()),
                serde_json::Value::Number(n) => match n.as_i64() {
                    Some(i) => OptionValue::Int(i),
                    None => {
                        return Err(Error::UnsupportedOption {
                            key: key.clone(),
                            reason: format!("{} is not a 64-bit integer", n),
                        });
                    }
                },
                other => {
                    return Err(Error::UnsupportedOption {
                        key: key.clone(),
                        reason: format!("unsupported value type: {}", json_type(other)),
                    });
                }
            };
            options.0.insert(key.clone(), value);
        }
        Ok(options)
    }

    pub fn to_dictionary(&self) -> Dictionary<'static> {
        let mut dict = Dictionary::new();
        for (key, value) in &self.0 {
            match value {
                OptionValue::Int(i) => dict.set(key, &i.to_string()),
                OptionValue::Str(s) => dict.set(key, s),
            }
        }
        dict
    }
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_from_json_accepts_ints_and_strings() {
        let map = object(serde_json::json!({
            "movflags": "faststart",
            "packetsize": 1316,
        }));
        let options = HeaderOptions::from_json(&map).unwrap();
        assert_eq!(options.len(), 2);
        assert_eq!(options.get("movflags"), Some(&OptionValue::Str("faststart".into())));
        assert_eq!(options.get("packetsize"), Some(&OptionValue::Int(1316)));
    }

    #[test]
    fn test_from_json_rejects_other_types() {
        for bad in [
            serde_json::json!({ "flag": true }),
            serde_json::json!({ "ratio": 0.5 }),
            serde_json::json!({ "list": [1, 2] }),
            serde_json::json!({ "nothing": null }),
        ] {
            let err = HeaderOptions::from_json(&object(bad)).unwrap_err();
            assert!(matches!(err, Error::UnsupportedOption { .. }), "{:?}", err);
        }
    }

    #[test]
    fn test_to_dictionary() {
        let mut options = HeaderOptions::new();
        options.set("movflags", "faststart").set("muxdelay", 0i64);
        let dict = options.to_dictionary();
        assert_eq!(dict.get("movflags"), Some("faststart"));
        assert_eq!(dict.get("muxdelay"), Some("0"));
    }

    #[test]
    fn test_serde_round_trips_untagged_values() {
        let options: HeaderOptions =
            serde_json::from_str(r#"{"a": 1, "b": "two"}"#).unwrap();
        assert_eq!(options.get("a"), Some(&OptionValue::Int(1)));
        assert_eq!(options.get("b"), Some(&OptionValue::Str("two".into())));
    }
}
