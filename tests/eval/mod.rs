// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use std::collections::BTreeMap;
use std::env;

use anyhow::{bail, Result};
use ecl::unstable::load_yaml;
use ecl::*;
use serde::{Deserialize, Serialize};
use test_generator::test_resources;

// Flips the high bit of every byte.
pub struct Xor;

impl Encrypter for Xor {
    fn encrypt(&self, _ctx: &Context, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.iter().map(|b| b ^ 0x80).collect())
    }
}

impl Decrypter for Xor {
    fn decrypt(&self, _ctx: &Context, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(ciphertext.iter().map(|b| b ^ 0x80).collect())
    }
}

/// Environments keyed by name.
pub struct Environments(pub BTreeMap<String, String>);

impl EnvironmentLoader for Environments {
    fn load_environment(&self, _ctx: &Context, name: &str) -> Result<(Vec<u8>, Box<dyn Decrypter>)> {
        match self.0.get(name) {
            Some(source) => Ok((source.as_bytes().to_vec(), Box::new(Xor))),
            None => bail!("unknown environment {name}"),
        }
    }
}

// Exchanges a role for a pair of credentials.
struct Login;

impl Provider for Login {
    fn schema(&self) -> (Schema, Schema) {
        let inputs = Schema::record(BTreeMap::from([
            ("roleArn".to_string(), Schema::string()),
            ("sessionName".to_string(), Schema::string()),
        ]));
        let outputs = Schema::record(BTreeMap::from([
            ("accessKeyId".to_string(), Schema::string()),
            ("secretAccessKey".to_string(), Schema::string().secret()),
        ]));
        (inputs, outputs)
    }

    fn open(&self, _ctx: &Context, inputs: &BTreeMap<String, Value>) -> Result<Value> {
        let session = inputs["sessionName"].to_string(false);
        Ok(Value::from(BTreeMap::from([
            ("accessKeyId".to_string(), Value::from(format!("AKIA-{session}"))),
            (
                "secretAccessKey".to_string(),
                Value::new_secret(Data::String(format!("{session}-key"))),
            ),
        ])))
    }
}

pub struct Providers;

impl ProviderLoader for Providers {
    fn load_provider(&self, _ctx: &Context, name: &str) -> Result<Box<dyn Provider>> {
        match name {
            "login" => Ok(Box::new(Login)),
            _ => bail!("unknown provider {name}"),
        }
    }
}

#[derive(Serialize, Deserialize, PartialEq, Debug)]
struct TestCase {
    note: String,
    // Imported environments, by name.
    #[serde(default)]
    environments: BTreeMap<String, String>,
    environment: String,
    #[serde(default)]
    context: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    check: bool,
    #[serde(default)]
    show_secrets: bool,
    // Encrypt the environment's plaintext secrets before evaluating it.
    #[serde(default)]
    encrypt: bool,
    want: Option<serde_json::Value>,
    want_redacted: Option<serde_json::Value>,
    want_schema: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    want_diagnostics: Vec<String>,
    // Properties that must be secret, known or not.
    #[serde(default)]
    want_secret: Vec<String>,
    skip: Option<bool>,
}

#[derive(Serialize, Deserialize, PartialEq, Debug)]
struct YamlTest {
    cases: Vec<TestCase>,
}

fn display_values(c: &serde_json::Value, e: &serde_json::Value) -> Result<String> {
    Ok(format!(
        "\nleft  = {}\nright = {}\n",
        serde_json::to_string_pretty(c)?,
        serde_json::to_string_pretty(e)?
    ))
}

fn match_values(what: &str, computed: &serde_json::Value, expected: &serde_json::Value) -> Result<()> {
    if computed != expected {
        bail!("{what} mismatch{}", display_values(computed, expected)?);
    }
    Ok(())
}

fn properties_json(env: &Environment, redact: bool) -> serde_json::Value {
    serde_json::Value::Object(
        env.properties
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json(redact)))
            .collect(),
    )
}

fn eval_case(case: &TestCase) -> Result<(Option<Environment>, Diagnostics)> {
    let ctx = Context::new();

    let mut source = case.environment.clone();
    if case.encrypt {
        source = encrypt_secrets(&ctx, "test", &source, &Xor)?;
        let decrypted = decrypt_secrets(&ctx, "test", &source, &Xor)?;
        let (plain, _) = load_yaml("test", &decrypted);
        if plain.is_none() {
            bail!("decrypted environment does not parse:\n{decrypted}");
        }
    }

    let (decl, diags) = load_yaml("test", &source);
    let Some(decl) = decl else {
        return Ok((None, diags));
    };

    let mut engine = Engine::new(Box::new(Providers), Box::new(Environments(case.environments.clone())));
    engine.set_show_secrets(case.show_secrets);
    let values = case
        .context
        .iter()
        .map(|(k, v)| (k.clone(), Value::from_json(v, false)))
        .collect();
    engine.set_exec_context(ExecContext::new(values)?);

    let (env, evaluated) = match case.check {
        true => engine.check_environment(&ctx, "test", &decl, &Xor),
        false => engine.eval_environment(&ctx, "test", &decl, &Xor),
    };
    let mut diags = diags;
    diags.extend(evaluated);
    Ok((env, diags))
}

fn yaml_test_impl(file: &str) -> Result<()> {
    let yaml_str = std::fs::read_to_string(file)?;
    let test: YamlTest = serde_yaml::from_str(&yaml_str)?;

    println!("running {file}");

    for case in test.cases {
        print!("case {} ", case.note);
        if case.skip == Some(true) {
            println!("skipped");
            continue;
        }

        let (env, diags) = eval_case(&case)?;

        let summaries: Vec<String> = diags.iter().map(|d| d.summary.clone()).collect();
        if summaries != case.want_diagnostics {
            bail!(
                "diagnostics mismatch\nleft  = {:#?}\nright = {:#?}\n",
                summaries,
                case.want_diagnostics
            );
        }

        let env = env.unwrap_or_default();
        if let Some(want) = &case.want {
            match_values("properties", &properties_json(&env, false), want)?;
        }
        if let Some(want) = &case.want_redacted {
            match_values("redacted properties", &properties_json(&env, true), want)?;
        }
        for k in &case.want_secret {
            if !env.properties.get(k).is_some_and(|v| v.secret) {
                bail!("{k} is not secret");
            }
        }
        if let Some(want) = &case.want_schema {
            let Some(schema) = &env.schema else {
                bail!("environment has no schema");
            };
            for (k, expected) in want {
                let computed = serde_json::to_value(schema.property(k))?;
                match_values(&format!("schema of {k}"), &computed, expected)?;
            }
        }

        println!("passed");
    }

    Ok(())
}

fn yaml_test(file: &str) -> Result<()> {
    match yaml_test_impl(file) {
        Ok(_) => Ok(()),
        Err(e) => {
            // If Err is returned, it doesn't always get printed by cargo test.
            // Therefore, panic with the error.
            panic!("{}", e);
        }
    }
}

#[test]
fn yaml_test_basic() -> Result<()> {
    yaml_test("tests/eval/cases/basic.yaml")
}

#[test]
#[ignore = "evaluates the environment named on the command line"]
fn one_environment() -> Result<()> {
    env_logger::init();

    let Some(file) = env::args().find(|a| a.ends_with(".yaml")) else {
        bail!("missing <environment.yaml>");
    };
    let source = std::fs::read_to_string(&file)?;

    let engine = Engine::new(Box::new(Providers), Box::new(Environments(BTreeMap::new())));
    let env = engine.open_environment(&Context::new(), &file, &source, &Xor)?;
    println!("{}", serde_json::to_string_pretty(&properties_json(&env, true))?);
    Ok(())
}

#[test]
fn open_loads_through_the_environment_loader() -> Result<()> {
    let environments = BTreeMap::from([
        ("proj/base".to_string(), "values:\n  db:\n    host: a\n    port: 1\n".to_string()),
        (
            "proj/dev".to_string(),
            "imports: [proj/base]\nvalues:\n  db:\n    port: 2\n".to_string(),
        ),
    ]);
    let engine = Engine::new(Box::new(Providers), Box::new(Environments(environments)));

    let env = engine.open(&Context::new(), "proj/dev")?;
    assert_eq!(
        properties_json(&env, false),
        serde_json::json!({"db": {"host": "a", "port": 2}})
    );

    let port = &env.properties["db"].as_object().unwrap()["port"];
    assert_eq!(port.trace.def.environment, "proj/dev");
    let base = port.trace.base.as_ref().unwrap();
    assert_eq!(base.to_json(false), serde_json::json!(1));

    let err = engine.open(&Context::new(), "proj/missing").unwrap_err();
    assert_eq!(err.to_string(), "unknown environment proj/missing");
    Ok(())
}

#[test]
fn open_fails_on_errors() -> Result<()> {
    let engine = Engine::new(Box::new(Providers), Box::new(Environments(BTreeMap::new())));
    let ctx = Context::new();

    let err = engine
        .open_environment(&ctx, "test", "values:\n  a: ${b}\n  b: ${a}\n", &Xor)
        .unwrap_err();
    assert!(err.to_string().contains("cyclic reference to a"), "{err}");

    let err = engine.open_environment(&ctx, "test", "values: [", &Xor).unwrap_err();
    assert!(err.to_string().starts_with("error"), "{err}");

    let env = engine.open_environment(&ctx, "test", "", &Xor)?;
    assert!(env.properties.is_empty());
    Ok(())
}

#[test]
fn cancelled_contexts_stop_evaluation() -> Result<()> {
    let engine = Engine::new(Box::new(Providers), Box::new(Environments(BTreeMap::new())));
    let ctx = Context::new();
    ctx.cancel();

    let err = engine.open(&ctx, "anything").unwrap_err();
    assert_eq!(err.to_string(), "context canceled");

    let (decl, _) = load_yaml("test", "values:\n  c:\n    fn::open::login: { roleArn: r, sessionName: s }\n");
    let (env, diags) = engine.eval_environment(&ctx, "test", &decl.unwrap(), &Xor);
    let summaries: Vec<_> = diags.iter().map(|d| d.summary.as_str()).collect();
    assert!(summaries.contains(&"context canceled"), "{summaries:?}");
    assert!(env.unwrap().properties["c"].unknown);
    Ok(())
}

#[test]
fn numbers_keep_their_source_text() -> Result<()> {
    let source = "values:
  big: 123456789012345678901234567890
  mixed: 12345678901234567890123.5
  frac: 0.10000000000000000001
  trail: 1.50
  text: n=${frac}
";
    let (decl, diags) = load_yaml("test", source);
    assert!(diags.is_empty(), "{diags}");
    let engine = Engine::new(Box::new(Providers), Box::new(Environments(BTreeMap::new())));
    let (env, diags) = engine.eval_environment(&Context::new(), "test", &decl.unwrap(), &Xor);
    assert!(diags.is_empty(), "{diags}");
    let env = env.unwrap();

    assert_eq!(
        serde_json::to_string(&properties_json(&env, false))?,
        r#"{"big":123456789012345678901234567890,"frac":0.10000000000000000001,"mixed":12345678901234567890123.5,"text":"n=0.10000000000000000001","trail":1.50}"#
    );

    let Some(schema) = &env.schema else {
        bail!("environment has no schema");
    };
    let constant = |k: &str| schema.property(k).constant.as_ref().map(|c| c.to_string());
    assert_eq!(constant("big").as_deref(), Some("123456789012345678901234567890"));
    assert_eq!(constant("frac").as_deref(), Some("0.10000000000000000001"));
    Ok(())
}

#[test]
fn exported_expressions() -> Result<()> {
    let source = "values:\n  a: 1\n  b: x-${a}\n  c: ${a}\n  d:\n    fn::toJSON: [1]\n";
    let (decl, _) = load_yaml("test", source);
    let engine = Engine::new(Box::new(Providers), Box::new(Environments(BTreeMap::new())));
    let (env, diags) = engine.eval_environment(&Context::new(), "test", &decl.unwrap(), &Xor);
    assert!(diags.is_empty(), "{diags}");
    let env = env.unwrap();

    assert_eq!(env.exprs["a"].literal, Some(serde_json::json!(1)));
    let range = &env.exprs["a"].range;
    assert_eq!((range.begin.line, range.begin.column), (2, 6));
    assert_eq!((range.end.line, range.end.column), (2, 7));
    assert_eq!(&source[range.begin.byte..range.end.byte], "1");
    assert_eq!(env.exprs["b"].range.begin.line, 3);

    let parts = &env.exprs["b"].interpolate;
    assert_eq!(parts[0].text, "x-");
    assert_eq!(parts[0].value[0].accessor.key.as_deref(), Some("a"));
    assert_eq!(parts[0].value[0].value, env.exprs["a"].range);

    assert_eq!(env.exprs["c"].symbol.len(), 1);
    assert_eq!(env.exprs["c"].range.environment, "test");

    let builtin = env.exprs["d"].builtin.as_ref().unwrap();
    assert_eq!(builtin.name, "fn::toJSON");
    assert!(builtin.arg_schema.is_always());
    assert_eq!(builtin.arg.list.len(), 1);
    Ok(())
}

#[test]
fn demo_environments() -> Result<()> {
    let mut environments = BTreeMap::new();
    for name in ["shared/base", "project/dev"] {
        let source = std::fs::read_to_string(format!("tests/eval/environments/{name}.yaml"))?;
        environments.insert(name.to_string(), source);
    }
    let engine = Engine::new(Box::new(Providers), Box::new(Environments(environments)));

    let env = engine.open(&Context::new(), "project/dev")?;
    assert_eq!(env.properties["region"].as_str(), Some("us-west-2"));

    let vars = env.environment_variables();
    assert_eq!(vars["APP_URL"].as_str(), Some("https://localhost:8443/"));
    assert_eq!(vars["APP_TOKEN"].as_str(), Some("s3cr3t-t0ken"));
    assert!(vars["APP_TOKEN"].secret);
    Ok(())
}

#[test_resources("tests/eval/cases/*.yaml")]
fn run(path: &str) {
    yaml_test(path).unwrap()
}
