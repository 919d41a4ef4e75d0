// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

use crate::number::Number;
use crate::syntax::Range;

/// The concrete representation of a [`Value`].
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Data {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Data {
    pub fn is_null(&self) -> bool {
        matches!(self, Data::Null)
    }
}

impl Serialize for Data {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Data::Null => serializer.serialize_none(),
            Data::Bool(b) => serializer.serialize_bool(*b),
            Data::Number(n) => n.serialize(serializer),
            Data::String(s) => serializer.serialize_str(s),
            Data::Array(a) => {
                let mut seq = serializer.serialize_seq(Some(a.len()))?;
                for e in a {
                    seq.serialize_element(e)?;
                }
                seq.end()
            }
            Data::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (k, v) in fields {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

struct DataVisitor;

impl<'de> Visitor<'de> for DataVisitor {
    type Value = Data;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(Data::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(Data::Null)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
        Ok(Data::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Data::Number(Number::from(v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Data::Number(Number::from(v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Number::from_f64(v)
            .map(Data::Number)
            .ok_or_else(|| E::custom(format!("{v} is not a finite number")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(Data::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
        Ok(Data::String(v))
    }

    fn visit_seq<V>(self, mut visitor: V) -> Result<Self::Value, V::Error>
    where
        V: SeqAccess<'de>,
    {
        let mut arr = vec![];
        while let Some(v) = visitor.next_element()? {
            arr.push(v);
        }
        Ok(Data::Array(arr))
    }

    fn visit_map<V>(self, mut visitor: V) -> Result<Self::Value, V::Error>
    where
        V: MapAccess<'de>,
    {
        let mut map = BTreeMap::new();
        while let Some(key) = visitor.next_key::<String>()? {
            if key == "$serde_json::private::Number" {
                let v: String = visitor.next_value()?;
                let n = Number::from_str(&v).map_err(de::Error::custom)?;
                return Ok(Data::Number(n));
            }
            map.insert(key, visitor.next_value()?);
        }
        Ok(Data::Object(map))
    }
}

impl<'de> Deserialize<'de> for Data {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(DataVisitor)
    }
}

/// Where a value was defined, and the value it overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    #[serde(default)]
    pub def: Range,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<Box<Value>>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// An evaluated environment value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Value {
    #[serde(default, skip_serializing_if = "Data::is_null")]
    pub value: Data,
    #[serde(default, skip_serializing_if = "is_false")]
    pub secret: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub unknown: bool,
    #[serde(default)]
    pub trace: Trace,
}

impl Value {
    pub fn new(value: Data) -> Value {
        Value {
            value,
            ..Value::default()
        }
    }

    pub fn new_secret(value: Data) -> Value {
        Value {
            value,
            secret: true,
            ..Value::default()
        }
    }

    pub fn unknown() -> Value {
        Value {
            unknown: true,
            ..Value::default()
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Data::String(s) if !self.unknown => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match &self.value {
            Data::Object(m) if !self.unknown => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match &self.value {
            Data::Array(a) if !self.unknown => Some(a),
            _ => None,
        }
    }

    /// Converts the value to plain JSON. Unknown values become
    /// `"[unknown]"`, and secrets become `"[secret]"` when `redact` is set.
    pub fn to_json(&self, redact: bool) -> serde_json::Value {
        if self.unknown {
            return serde_json::Value::String("[unknown]".to_string());
        }
        if self.secret && redact {
            return serde_json::Value::String("[secret]".to_string());
        }
        match &self.value {
            Data::Null => serde_json::Value::Null,
            Data::Bool(b) => serde_json::Value::Bool(*b),
            Data::Number(n) => n.to_json(),
            Data::String(s) => serde_json::Value::String(s.clone()),
            Data::Array(a) => serde_json::Value::Array(a.iter().map(|v| v.to_json(redact)).collect()),
            Data::Object(m) => serde_json::Value::Object(
                m.iter()
                    .map(|(k, v)| (k.clone(), v.to_json(redact)))
                    .collect(),
            ),
        }
    }

    /// Converts plain JSON into a value, marking every node secret if
    /// requested.
    pub fn from_json(json: &serde_json::Value, secret: bool) -> Value {
        let value = match json {
            serde_json::Value::Null => Data::Null,
            serde_json::Value::Bool(b) => Data::Bool(*b),
            serde_json::Value::Number(n) => match Number::from_str(&n.to_string()) {
                Ok(n) => Data::Number(n),
                Err(_) => Data::String(n.to_string()),
            },
            serde_json::Value::String(s) => Data::String(s.clone()),
            serde_json::Value::Array(a) => {
                Data::Array(a.iter().map(|v| Value::from_json(v, secret)).collect())
            }
            serde_json::Value::Object(m) => Data::Object(
                m.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v, secret)))
                    .collect(),
            ),
        };
        Value {
            value,
            secret,
            ..Value::default()
        }
    }

    /// Stringifies the value. Strings print as themselves; array elements
    /// and object entries are quoted and comma-separated.
    pub fn to_string(&self, redact: bool) -> String {
        if self.unknown {
            return "[unknown]".to_string();
        }
        if self.secret && redact {
            return "[secret]".to_string();
        }
        match &self.value {
            Data::Null => String::new(),
            Data::Bool(b) => b.to_string(),
            Data::Number(n) => n.to_string(),
            Data::String(s) => s.clone(),
            Data::Array(a) => a
                .iter()
                .map(|v| format!("{:?}", v.to_string(redact)))
                .collect::<Vec<_>>()
                .join(","),
            Data::Object(m) => m
                .iter()
                .map(|(k, v)| format!("{k:?}={:?}", v.to_string(redact)))
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::new(Data::Bool(b))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::new(Data::String(s.to_string()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::new(Data::String(s))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::new(Data::Number(Number::from(n)))
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        Value::new(Data::Number(n))
    }
}

impl From<Vec<Value>> for Value {
    fn from(a: Vec<Value>) -> Self {
        Value::new(Data::Array(a))
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Value::new(Data::Object(m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_conversion() {
        let json = json!({"a": [1, "two", null], "b": {"c": true}, "d": 1.50});
        let v = Value::from_json(&json, false);
        assert_eq!(v.to_json(false), json);

        let s = Value::from_json(&json, true);
        assert_eq!(s.to_json(true), json!("[secret]"));
        assert_eq!(Value::unknown().to_json(false), json!("[unknown]"));
    }

    #[test]
    fn stringify() {
        let v = Value::from_json(&json!({"b": [1, "x\"y"], "a": true}), false);
        assert_eq!(v.to_string(false), r#""a"="true","b"="\"1\",\"x\\\"y\"""#);
        assert_eq!(Value::from("plain").to_string(false), "plain");
        assert_eq!(Value::unknown().to_string(true), "[unknown]");
    }

    #[test]
    fn serialized_shape() {
        let v = Value::new_secret(Data::String("s".into()));
        assert_eq!(
            serde_json::to_value(&v).unwrap(),
            json!({"value": "s", "secret": true, "trace": {"def": {"begin": {"line": 0, "column": 0, "byte": 0}, "end": {"line": 0, "column": 0, "byte": 0}}}})
        );
        let back: Value = serde_json::from_value(serde_json::to_value(&v).unwrap()).unwrap();
        assert_eq!(back, v);
    }
}
