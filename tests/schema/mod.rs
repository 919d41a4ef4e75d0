// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use ecl::unstable::load_yaml;
use ecl::*;
use serde_json::json;

// Opens connections to a database. The schemas are written as JSON to check
// that deserialized schemas drive validation.
struct Database;

impl Provider for Database {
    fn schema(&self) -> (Schema, Schema) {
        let inputs = json!({
            "type": "object",
            "properties": {
                "host": {"type": "string", "pattern": "^[a-z.]+$"},
                "port": {"type": "number", "minimum": 1, "maximum": 65535},
                "mode": {"enum": ["ro", "rw"]},
                "tags": {"type": "array", "items": {"type": "string"}, "maxItems": 2}
            },
            "required": ["host"],
            "additionalProperties": false
        });
        let outputs = json!({
            "$defs": {"url": {"type": "string"}},
            "type": "object",
            "properties": {"url": {"$ref": "#/$defs/url"}},
            "required": ["url"]
        });
        match (serde_json::from_value(inputs), serde_json::from_value(outputs)) {
            (Ok(inputs), Ok(outputs)) => (inputs, outputs),
            _ => (Schema::never(), Schema::never()),
        }
    }

    fn open(&self, _ctx: &Context, inputs: &BTreeMap<String, Value>) -> Result<Value> {
        let host = inputs["host"].to_string(false);
        let port = inputs.get("port").map(|p| p.to_string(false)).unwrap_or_else(|| "5432".to_string());
        Ok(Value::from(BTreeMap::from([(
            "url".to_string(),
            Value::from(format!("db://{host}:{port}")),
        )])))
    }
}

struct Loader;

impl ProviderLoader for Loader {
    fn load_provider(&self, _ctx: &Context, name: &str) -> Result<Box<dyn Provider>> {
        match name {
            "db" => Ok(Box::new(Database)),
            _ => bail!("unknown provider {name}"),
        }
    }
}

impl EnvironmentLoader for Loader {
    fn load_environment(&self, _ctx: &Context, name: &str) -> Result<(Vec<u8>, Box<dyn Decrypter>)> {
        bail!("unknown environment {name}")
    }
}

struct NoSecrets;

impl Decrypter for NoSecrets {
    fn decrypt(&self, _ctx: &Context, _ciphertext: &[u8]) -> Result<Vec<u8>> {
        bail!("no secrets here")
    }
}

fn open_db(inputs: &str, check: bool) -> Result<(Environment, Vec<String>)> {
    let source = format!("values:\n  db:\n    fn::open::db:\n{inputs}  url: ${{db.url}}\n");
    let (decl, diags) = load_yaml("test", &source);
    let Some(decl) = decl else {
        bail!("{diags}");
    };

    let engine = Engine::new(Box::new(Loader), Box::new(Loader));
    let (env, diags) = match check {
        true => engine.check_environment(&Context::new(), "test", &decl, &NoSecrets),
        false => engine.eval_environment(&Context::new(), "test", &decl, &NoSecrets),
    };
    let summaries = diags.iter().map(|d| d.summary.clone()).collect();
    Ok((env.unwrap_or_default(), summaries))
}

#[test]
fn valid_inputs() -> Result<()> {
    let (env, diags) = open_db(
        "      host: db.local\n      port: 5432\n      mode: rw\n      tags: [a]\n",
        false,
    )?;
    assert!(diags.is_empty(), "{diags:?}");
    assert_eq!(env.properties["url"].as_str(), Some("db://db.local:5432"));

    let schema = env.schema.unwrap();
    assert!(schema.property("url").is_type(SchemaType::String));
    Ok(())
}

#[test]
fn invalid_inputs() -> Result<()> {
    let cases = [
        ("      host: db\n      port: 0\n", "expected a number greater than or equal to 1"),
        ("      host: db\n      port: 70000\n", "expected a number less than or equal to 65535"),
        ("      host: DB!\n", "string must match the pattern \"^[a-z.]+$\""),
        ("      host: db\n      mode: x\n", "expected one of [\"ro\",\"rw\"]"),
        ("      host: db\n      extra: 1\n", "unexpected value"),
        ("      port: 1\n", "inputs.host: missing required property"),
        ("      host: db\n      tags: [a, b, c]\n", "expected an array with at most 2 items"),
        ("      host: db\n      tags: [1]\n", "expected string, got number"),
        ("      host: 1\n", "expected string, got number"),
    ];

    for (inputs, want) in cases {
        let (env, diags) = open_db(inputs, false)?;
        assert_eq!(diags, vec![want.to_string()], "{inputs}");
        assert!(env.properties["db"].unknown, "{inputs}");
        assert!(env.properties["url"].unknown, "{inputs}");
    }
    Ok(())
}

#[test]
fn checking_uses_the_output_schema() -> Result<()> {
    let (env, diags) = open_db("      host: db.local\n", true)?;
    assert!(diags.is_empty(), "{diags:?}");
    assert!(env.properties["url"].unknown);

    let schema = env.schema.unwrap();
    let db = schema.property("db");
    assert_eq!(db.required, vec!["url"]);
    assert!(db.property("url").resolved_ref().is_some());
    Ok(())
}

#[test]
fn schema_json() -> Result<()> {
    let s = Schema::record(BTreeMap::from([
        ("a".to_string(), Schema::string().constant(json!("x"))),
        ("b".to_string(), Schema::tuple(vec![Schema::number()])),
    ]));
    let json = serde_json::to_value(&s)?;
    assert_eq!(
        json,
        json!({
            "type": "object",
            "properties": {
                "a": {"type": "string", "const": "x"},
                "b": {"type": "array", "prefixItems": [{"type": "number"}], "items": false}
            },
            "required": ["a", "b"]
        })
    );

    let back: Schema = serde_json::from_value(json.clone())?;
    assert_eq!(serde_json::to_value(&back)?, json);
    Ok(())
}
