// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Schemas describe the shape of environment values.
//!
//! The schema language is a small subset of JSON Schema (draft 2020-12):
//!
//!   - `true` accepts every value and `false` accepts none. These are
//!     represented by `Schema::always()` and `Schema::never()`.
//!   - `type` is one of `null`, `boolean`, `number`, `string`, `array` or
//!     `object`. Integers are numbers with a `multipleOf` of 1.
//!   - `const` and `enum` restrict a schema to specific JSON values. Numbers
//!     compare numerically.
//!   - `anyOf` and `oneOf` combine schemas. When typing one schema against
//!     another, `oneOf` is treated like `anyOf`: a concrete value can only
//!     take one branch at runtime.
//!   - `$ref` may only point into the root schema's `$defs`, e.g.
//!     `{"$ref": "#/$defs/name"}`.
//!   - arrays use `prefixItems` for positional elements and `items` for the
//!     rest, plus `minItems`/`maxItems`.
//!   - objects use `properties`, `additionalProperties`, `required`,
//!     `dependentRequired` and `minProperties`/`maxProperties`.
//!   - numbers use `multipleOf`, `minimum`, `exclusiveMinimum`, `maximum`
//!     and `exclusiveMaximum`, all with arbitrary precision.
//!   - strings use `minLength`, `maxLength` (in bytes) and `pattern`.
//!
//! Evaluated values carry precise schemas: a literal `1` has the schema
//! `{"type": "number", "const": 1}`, an object literal has a record schema
//! listing each of its properties as required, and so on. These schemas are
//! what builtins and providers are typed against when their inputs are not
//! yet known.
//!
//! A schema must be compiled before it is used for validation. Compilation
//! resolves references and precompiles patterns. Compiled state is cached
//! inside the schema, which is otherwise immutable.

use std::cell::{Cell, OnceCell};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::number::Number;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Null,
    Boolean,
    Number,
    String,
    Array,
    Object,
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SchemaType::Null => "null",
            SchemaType::Boolean => "boolean",
            SchemaType::Number => "number",
            SchemaType::String => "string",
            SchemaType::Array => "array",
            SchemaType::Object => "object",
        })
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaError {
    #[error("only fragment references of the form #/$defs/ref are supported")]
    UnsupportedRef,
    #[error("unknown subschema {0}")]
    UnknownSubschema(String),
    #[error("invalid pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

fn deserialize_some<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDef {
    #[serde(skip)]
    pub always: bool,
    #[serde(skip)]
    pub never: bool,

    #[serde(rename = "$defs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub defs: BTreeMap<String, Schema>,
    #[serde(rename = "$ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any_of: Vec<Schema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub one_of: Vec<Schema>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prefix_items: Vec<Schema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Schema>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<Schema>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Schema>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<SchemaType>,
    #[serde(
        rename = "const",
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub constant: Option<serde_json::Value>,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enumeration: Vec<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiple_of: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive_maximum: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive_minimum: Option<Number>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<u64>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub unique_items: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_properties: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_properties: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependent_required: BTreeMap<String, Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some", skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deprecated: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub secret: bool,

    #[serde(skip)]
    compiled: Cell<bool>,
    #[serde(skip)]
    resolved: OnceCell<Schema>,
    #[serde(skip)]
    regex: OnceCell<Regex>,
}

impl SchemaDef {
    fn compile_in(&self, root: &SchemaDef) -> Result<(), SchemaError> {
        if self.compiled.replace(true) {
            return Ok(());
        }

        if let Some(r) = &self.reference {
            let name = r
                .strip_prefix("#/$defs/")
                .ok_or(SchemaError::UnsupportedRef)?;
            let target = root
                .defs
                .get(name)
                .ok_or_else(|| SchemaError::UnknownSubschema(r.clone()))?;
            let _ = self.resolved.set(target.clone());
        }

        if let Some(p) = &self.pattern {
            let re = Regex::new(p).map_err(|source| SchemaError::Pattern {
                pattern: p.clone(),
                source,
            })?;
            let _ = self.regex.set(re);
        }

        let children = self
            .defs
            .values()
            .chain(&self.any_of)
            .chain(&self.one_of)
            .chain(&self.prefix_items)
            .chain(&self.items)
            .chain(&self.additional_properties)
            .chain(self.properties.values());
        for child in children {
            child.compile_in(root)?;
        }
        Ok(())
    }

    /// The schema named by `$ref`, once compiled.
    pub fn resolved_ref(&self) -> Option<&Schema> {
        self.resolved.get()
    }

    /// The compiled `pattern`.
    pub fn regex(&self) -> Option<&Regex> {
        self.regex.get()
    }
}

/// A shared, immutable schema.
#[derive(Debug, Clone)]
pub struct Schema(Rc<SchemaDef>);

impl Deref for Schema {
    type Target = SchemaDef;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<SchemaDef> for Schema {
    fn from(def: SchemaDef) -> Self {
        Schema(Rc::new(def))
    }
}

impl Serialize for Schema {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if self.always {
            serializer.serialize_bool(true)
        } else if self.never {
            serializer.serialize_bool(false)
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bool(bool),
            Def(Box<SchemaDef>),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Bool(true) => Schema::always(),
            Repr::Bool(false) => Schema::never(),
            Repr::Def(def) => Schema::from(*def),
        })
    }
}

impl Schema {
    fn with(mut self, f: impl FnOnce(&mut SchemaDef)) -> Schema {
        let def = Rc::make_mut(&mut self.0);
        // Builder changes invalidate any compiled state.
        def.compiled = Cell::new(false);
        def.resolved = OnceCell::new();
        def.regex = OnceCell::new();
        f(def);
        self
    }

    fn typed(t: SchemaType) -> Schema {
        Schema::from(SchemaDef {
            schema_type: Some(t),
            ..SchemaDef::default()
        })
    }

    pub fn always() -> Schema {
        Schema::from(SchemaDef {
            always: true,
            ..SchemaDef::default()
        })
    }

    pub fn never() -> Schema {
        Schema::from(SchemaDef {
            never: true,
            ..SchemaDef::default()
        })
    }

    pub fn null() -> Schema {
        Schema::typed(SchemaType::Null)
    }

    pub fn boolean() -> Schema {
        Schema::typed(SchemaType::Boolean)
    }

    pub fn number() -> Schema {
        Schema::typed(SchemaType::Number)
    }

    pub fn string() -> Schema {
        Schema::typed(SchemaType::String)
    }

    pub fn array() -> Schema {
        Schema::typed(SchemaType::Array)
    }

    pub fn object() -> Schema {
        Schema::typed(SchemaType::Object)
    }

    /// A fixed-length array with one schema per element.
    pub fn tuple(items: Vec<Schema>) -> Schema {
        Schema::array()
            .prefix_items(items)
            .items(Schema::never())
    }

    /// An object with exactly the given (required) properties.
    pub fn record(properties: BTreeMap<String, Schema>) -> Schema {
        let required = properties.keys().cloned().collect();
        Schema::object().properties(properties).required(required)
    }

    pub fn reference(r: &str) -> Schema {
        Schema::from(SchemaDef {
            reference: Some(r.to_string()),
            ..SchemaDef::default()
        })
    }

    pub fn any_of(schemas: Vec<Schema>) -> Schema {
        Schema::from(SchemaDef {
            any_of: schemas,
            ..SchemaDef::default()
        })
    }

    pub fn one_of(schemas: Vec<Schema>) -> Schema {
        Schema::from(SchemaDef {
            one_of: schemas,
            ..SchemaDef::default()
        })
    }

    pub fn constant(self, v: serde_json::Value) -> Schema {
        self.with(|d| d.constant = Some(v))
    }

    pub fn enumeration(self, values: Vec<serde_json::Value>) -> Schema {
        self.with(|d| d.enumeration = values)
    }

    pub fn defs(self, defs: BTreeMap<String, Schema>) -> Schema {
        self.with(|d| d.defs = defs)
    }

    pub fn items(self, items: Schema) -> Schema {
        self.with(|d| d.items = Some(items))
    }

    pub fn prefix_items(self, items: Vec<Schema>) -> Schema {
        self.with(|d| d.prefix_items = items)
    }

    pub fn min_items(self, n: u64) -> Schema {
        self.with(|d| d.min_items = Some(n))
    }

    pub fn max_items(self, n: u64) -> Schema {
        self.with(|d| d.max_items = Some(n))
    }

    pub fn properties(self, properties: BTreeMap<String, Schema>) -> Schema {
        self.with(|d| d.properties = properties)
    }

    pub fn additional_properties(self, s: Option<Schema>) -> Schema {
        self.with(|d| d.additional_properties = s)
    }

    pub fn required(self, keys: Vec<String>) -> Schema {
        self.with(|d| d.required = keys)
    }

    pub fn dependent_required(self, deps: BTreeMap<String, Vec<String>>) -> Schema {
        self.with(|d| d.dependent_required = deps)
    }

    pub fn min_properties(self, n: u64) -> Schema {
        self.with(|d| d.min_properties = Some(n))
    }

    pub fn max_properties(self, n: u64) -> Schema {
        self.with(|d| d.max_properties = Some(n))
    }

    pub fn multiple_of(self, n: Number) -> Schema {
        self.with(|d| d.multiple_of = Some(n))
    }

    pub fn minimum(self, n: Number) -> Schema {
        self.with(|d| d.minimum = Some(n))
    }

    pub fn exclusive_minimum(self, n: Number) -> Schema {
        self.with(|d| d.exclusive_minimum = Some(n))
    }

    pub fn maximum(self, n: Number) -> Schema {
        self.with(|d| d.maximum = Some(n))
    }

    pub fn exclusive_maximum(self, n: Number) -> Schema {
        self.with(|d| d.exclusive_maximum = Some(n))
    }

    pub fn min_length(self, n: u64) -> Schema {
        self.with(|d| d.min_length = Some(n))
    }

    pub fn max_length(self, n: u64) -> Schema {
        self.with(|d| d.max_length = Some(n))
    }

    pub fn pattern(self, p: &str) -> Schema {
        self.with(|d| d.pattern = Some(p.to_string()))
    }

    pub fn description(self, s: &str) -> Schema {
        self.with(|d| d.description = Some(s.to_string()))
    }

    pub fn secret(self) -> Schema {
        self.with(|d| d.secret = true)
    }

    pub fn is_always(&self) -> bool {
        self.always
    }

    pub fn is_never(&self) -> bool {
        self.never
    }

    pub fn is_type(&self, t: SchemaType) -> bool {
        self.schema_type == Some(t)
    }

    /// Resolves references and compiles patterns throughout the schema.
    pub fn compile(&self) -> Result<(), SchemaError> {
        self.0.compile_in(&self.0)
    }

    fn branches(&self) -> impl Iterator<Item = &Schema> {
        self.any_of
            .iter()
            .chain(&self.one_of)
            .chain(self.resolved_ref())
    }

    /// The schema of the element at `index` of an array accepted by this
    /// schema.
    pub fn item(&self, index: usize) -> Schema {
        if self.always {
            return Schema::always();
        }
        if self.never {
            return Schema::never();
        }

        let mut schemas: Vec<Schema> = self.branches().map(|s| s.item(index)).collect();
        if self.is_type(SchemaType::Array) {
            match self.prefix_items.get(index) {
                Some(s) => schemas.push(s.clone()),
                None => schemas.push(self.items.clone().unwrap_or_else(Schema::always)),
            }
        }
        union(schemas)
    }

    /// The schema of property `key` of an object accepted by this schema.
    pub fn property(&self, key: &str) -> Schema {
        if self.always {
            return Schema::always();
        }
        if self.never {
            return Schema::never();
        }

        let mut schemas: Vec<Schema> = self.branches().map(|s| s.property(key)).collect();
        if self.is_type(SchemaType::Object) {
            match self.properties.get(key) {
                Some(s) => schemas.push(s.clone()),
                None => schemas.push(
                    self.additional_properties
                        .clone()
                        .unwrap_or_else(Schema::always),
                ),
            }
        }
        union(schemas)
    }
}

/// Combines schemas into one that accepts any of them.
pub fn union(schemas: Vec<Schema>) -> Schema {
    let mut schemas: Vec<Schema> = schemas.into_iter().filter(|s| !s.never).collect();
    if schemas.iter().any(|s| s.always) {
        return Schema::always();
    }
    match schemas.len() {
        0 => Schema::never(),
        1 => schemas.remove(0),
        _ => Schema::one_of(schemas),
    }
}

/// The schema of an object value `top` that overrides `base` as a merge
/// patch.
pub fn merged_schema(base: Option<&Schema>, top: &Schema) -> Schema {
    let Some(base) = base else {
        return top.clone();
    };
    if !top.is_type(SchemaType::Object) || !base.is_type(SchemaType::Object) {
        return top.clone();
    }

    let mut record = base.properties.clone();
    for (k, v) in &top.properties {
        let merged = match record.get(k) {
            Some(b) => merged_schema(Some(b), v),
            None => v.clone(),
        };
        record.insert(k.clone(), merged);
    }

    let additional = match (&top.additional_properties, &base.additional_properties) {
        (top, None) => top.clone(),
        (None, Some(base)) => Some(base.clone()),
        (Some(_), Some(_)) => Some(Schema::always()),
    };
    Schema::record(record).additional_properties(additional)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bool_schemas() {
        let s: Schema = serde_json::from_value(json!(true)).unwrap();
        assert!(s.is_always());
        let s: Schema = serde_json::from_value(json!(false)).unwrap();
        assert!(s.is_never());
        assert_eq!(serde_json::to_value(Schema::never()).unwrap(), json!(false));
    }

    #[test]
    fn round_trip() {
        let text = json!({
            "type": "object",
            "properties": {
                "n": {"type": "number", "minimum": 1.5, "multipleOf": 0.5},
                "c": {"const": null}
            },
            "required": ["n"]
        });
        let s: Schema = serde_json::from_value(text.clone()).unwrap();
        assert_eq!(s.properties["n"].minimum.as_ref().unwrap().as_str(), "1.5");
        assert_eq!(s.properties["c"].constant, Some(serde_json::Value::Null));
        assert_eq!(serde_json::to_value(&s).unwrap(), text);
    }

    #[test]
    fn references() {
        let s: Schema = serde_json::from_value(json!({
            "$defs": {"name": {"type": "string"}},
            "properties": {"a": {"$ref": "#/$defs/name"}},
            "type": "object"
        }))
        .unwrap();
        s.compile().unwrap();
        let a = s.property("a");
        assert!(a.resolved_ref().unwrap().is_type(SchemaType::String));

        let bad = Schema::reference("http://example.com/schema");
        assert_eq!(
            bad.compile().unwrap_err().to_string(),
            "only fragment references of the form #/$defs/ref are supported"
        );
        let missing = Schema::reference("#/$defs/nope");
        assert_eq!(missing.compile().unwrap_err().to_string(), "unknown subschema #/$defs/nope");
    }

    #[test]
    fn items_and_properties() {
        let t = Schema::tuple(vec![Schema::number(), Schema::string()]);
        assert!(t.item(1).is_type(SchemaType::String));
        assert!(t.item(2).is_never());
        assert!(Schema::array().item(7).is_always());
        assert!(Schema::string().item(0).is_never());

        let r = Schema::record(BTreeMap::from([("a".to_string(), Schema::boolean())]));
        assert!(r.property("a").is_type(SchemaType::Boolean));
        assert!(r.property("b").is_always());
        let closed = r.additional_properties(Some(Schema::never()));
        assert!(closed.property("b").is_never());

        let u = Schema::one_of(vec![Schema::tuple(vec![Schema::null()]), Schema::array().items(Schema::string())]);
        assert_eq!(u.item(0).one_of.len(), 2);
        assert!(u.item(1).is_type(SchemaType::String));
    }

    #[test]
    fn merging() {
        let base = Schema::record(BTreeMap::from([
            ("host".to_string(), Schema::string()),
            ("port".to_string(), Schema::number()),
        ]));
        let top = Schema::record(BTreeMap::from([("port".to_string(), Schema::string())]));
        let m = merged_schema(Some(&base), &top);
        assert_eq!(m.required, vec!["host", "port"]);
        assert!(m.properties["port"].is_type(SchemaType::String));
        assert!(m.additional_properties.is_none());

        let both = merged_schema(
            Some(&base.clone().additional_properties(Some(Schema::string()))),
            &top.clone().additional_properties(Some(Schema::number())),
        );
        assert!(both.additional_properties.as_ref().unwrap().is_always());

        assert!(merged_schema(Some(&base), &Schema::string()).is_type(SchemaType::String));
    }
}
