// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::schema::Schema;
use crate::syntax::Range;
use crate::value::{Data, Value};

/// An accessor in an exported property access.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accessor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// An accessor together with the range of the value it resolved to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyAccessor {
    #[serde(flatten)]
    pub accessor: Accessor,
    pub value: Range,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interpolation {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value: Vec<PropertyAccessor>,
}

/// An access into a value that was not known when it was made.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessExpr {
    pub receiver: Range,
    pub accessors: Vec<Accessor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuiltinExpr {
    pub name: String,
    pub name_range: Range,
    pub arg_schema: Schema,
    pub arg: Expr,
}

/// An evaluated expression, with its schema and the ranges of everything it
/// refers to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expr {
    pub range: Range,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<Box<Expr>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub key_ranges: BTreeMap<String, Range>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub literal: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interpolate: Vec<Interpolation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbol: Vec<PropertyAccessor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessExpr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub list: Vec<Expr>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub object: BTreeMap<String, Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builtin: Option<Box<BuiltinExpr>>,
}

/// The evaluated `context` of an environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatedExecutionContext {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
    pub schema: Schema,
}

/// A fully evaluated environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exprs: BTreeMap<String, Expr>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_context: Option<EvaluatedExecutionContext>,
}

impl Environment {
    fn scalar_strings(&self, key: &str) -> BTreeMap<String, Value> {
        let Some(fields) = self.properties.get(key).and_then(Value::as_object) else {
            return BTreeMap::new();
        };

        fields
            .iter()
            .filter_map(|(k, v)| {
                let s = match &v.value {
                    _ if v.unknown => return None,
                    Data::String(s) => s.clone(),
                    Data::Number(n) => n.to_string(),
                    Data::Bool(b) => b.to_string(),
                    _ => return None,
                };
                Some((
                    k.clone(),
                    Value {
                        value: Data::String(s),
                        secret: v.secret,
                        unknown: false,
                        trace: v.trace.clone(),
                    },
                ))
            })
            .collect()
    }

    /// The scalar entries of the top-level `environmentVariables` object, as
    /// strings.
    pub fn environment_variables(&self) -> BTreeMap<String, Value> {
        self.scalar_strings("environmentVariables")
    }

    /// The scalar entries of the top-level `files` object, as strings.
    pub fn temporary_files(&self) -> BTreeMap<String, Value> {
        self.scalar_strings("files")
    }
}
