// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::Result;
use ecl::*;
use serde_json::json;

#[test]
fn numbers_keep_their_text() -> Result<()> {
    let n = Number::from_str("1.50")?;
    assert_eq!(n.as_str(), "1.50");
    assert_eq!(n, Number::from_str("15e-1")?);
    assert!(Number::from_str("10")?.is_multiple_of(&Number::from_str("2.5")?));
    assert!(Number::from_str("0.3")? < Number::from_str("0.30000000000000001")?);
    assert!(Number::from_str("abc").is_err());
    Ok(())
}

#[test]
fn json_round_trip() -> Result<()> {
    let json = json!({"a": [1, "two", null], "b": {"c": true}});
    let v = Value::from_json(&json, false);
    assert_eq!(v.to_json(false), json);
    assert_eq!(v.as_object().unwrap()["a"].as_array().unwrap().len(), 3);

    let serialized = serde_json::to_string(&v)?;
    let back: Value = serde_json::from_str(&serialized)?;
    assert_eq!(back, v);
    Ok(())
}

#[test]
fn redaction() -> Result<()> {
    let mut fields = BTreeMap::new();
    fields.insert("user".to_string(), Value::from("admin"));
    fields.insert(
        "password".to_string(),
        Value::new_secret(Data::String("hunter2".to_string())),
    );
    fields.insert("later".to_string(), Value::unknown());
    let v = Value::from(fields);

    assert_eq!(
        v.to_json(true),
        json!({"user": "admin", "password": "[secret]", "later": "[unknown]"})
    );
    assert_eq!(
        v.to_json(false),
        json!({"user": "admin", "password": "hunter2", "later": "[unknown]"})
    );
    assert_eq!(
        v.to_string(true),
        r#""later"="[unknown]","password"="[secret]","user"="admin""#
    );
    Ok(())
}

#[test]
fn environment_variables_and_files() -> Result<()> {
    let json = json!({
        "environmentVariables": {"A": "a", "N": 1, "B": true, "O": {"x": 1}, "L": [1]},
        "files": {"KEY": "contents"},
    });
    let Data::Object(properties) = Value::from_json(&json, false).value else {
        panic!("expected an object");
    };
    let mut env = Environment {
        properties,
        ..Environment::default()
    };

    let vars = env.environment_variables();
    let keys: Vec<_> = vars.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["A", "B", "N"]);
    assert_eq!(vars["N"].as_str(), Some("1"));
    assert_eq!(vars["B"].as_str(), Some("true"));
    assert_eq!(env.temporary_files()["KEY"].as_str(), Some("contents"));

    env.properties.remove("files");
    assert!(env.temporary_files().is_empty());
    Ok(())
}

#[test]
fn traces_serialize_their_bases() -> Result<()> {
    let base = Value {
        trace: Trace {
            def: Range::environment("base"),
            base: None,
        },
        ..Value::from("old")
    };
    let v = Value {
        trace: Trace {
            def: Range::environment("top"),
            base: Some(Box::new(base)),
        },
        ..Value::from("new")
    };

    let json = serde_json::to_value(&v)?;
    assert_eq!(json["value"], json!("new"));
    assert_eq!(json["trace"]["def"]["environment"], json!("top"));
    assert_eq!(json["trace"]["base"]["value"], json!("old"));
    assert_eq!(json["trace"]["base"]["trace"]["def"]["environment"], json!("base"));
    Ok(())
}
