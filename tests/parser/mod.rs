// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Result};
use ecl::unstable::*;
use ecl::*;
use serde::{Deserialize, Serialize};
use test_generator::test_resources;

macro_rules! my_assert_eq {
    ($left:expr, $right:expr, $($arg:tt)+) => {
        match (&($left), &($right)) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    return Err(anyhow!("mismatch:\nleft  = {:?}\nright = {:?}\n{}",
                                       &$left, &$right, format_args!($($arg)+)));
                }
            }
        }
    }
}

// A one-line rendering of an expression's shape.
fn describe(x: &Option<ExprRef>) -> String {
    let Some(x) = x else {
        return "missing".to_string();
    };
    match &x.kind {
        ExprKind::Null => "null".to_string(),
        ExprKind::Boolean(b) => b.to_string(),
        ExprKind::Number(n) => n.to_string(),
        ExprKind::String(s) => format!("{s:?}"),
        ExprKind::Interpolate(parts) => {
            let parts: Vec<String> = parts
                .iter()
                .map(|p| match &p.value {
                    Some(access) => format!("{:?}+${{{access}}}", p.text),
                    None => format!("{:?}", p.text),
                })
                .collect();
            format!("interpolate({})", parts.join(", "))
        }
        ExprKind::Symbol(access) => format!("${{{access}}}"),
        ExprKind::Array(items) => {
            let items: Vec<String> = items.iter().map(describe).collect();
            format!("[{}]", items.join(", "))
        }
        ExprKind::Object(entries) => {
            let entries: Vec<String> = entries
                .iter()
                .map(|e| format!("{}: {}", e.key.value, describe(&e.value)))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
        ExprKind::Builtin(b) => match &b.call {
            BuiltinCall::Open { provider, short, .. } => {
                format!("{}({}, short: {short})", b.name.value, provider.value)
            }
            BuiltinCall::Secret(SecretArg::Ciphertext(_)) => format!("{}(ciphertext)", b.name.value),
            BuiltinCall::Secret(SecretArg::Plaintext(_)) => format!("{}(plaintext)", b.name.value),
            _ => format!("{}({})", b.name.value, describe(&b.args)),
        },
    }
}

#[derive(Serialize, Deserialize, PartialEq, Debug)]
struct Import {
    name: String,
    merge: bool,
}

#[derive(Serialize, Deserialize, PartialEq, Debug)]
struct TestCase {
    note: String,
    source: String,
    description: Option<String>,
    #[serde(default)]
    imports: Vec<Import>,
    #[serde(default)]
    values: BTreeMap<String, String>,
    // "error: ..." or "warning: ..." per diagnostic.
    #[serde(default)]
    want_diagnostics: Vec<String>,
    // The document does not parse.
    #[serde(default)]
    rejected: bool,
}

#[derive(Serialize, Deserialize, PartialEq, Debug)]
struct YamlTest {
    cases: Vec<TestCase>,
}

fn check_case(case: &TestCase) -> Result<()> {
    let (env, diags) = load_yaml("test", &case.source);

    let summaries: Vec<String> = diags
        .iter()
        .map(|d| match d.severity {
            Severity::Error => format!("error: {}", d.summary),
            Severity::Warning => format!("warning: {}", d.summary),
        })
        .collect();
    my_assert_eq!(summaries, case.want_diagnostics, "diagnostics of {}", case.note);

    let Some(env) = env else {
        if !case.rejected {
            bail!("{} did not parse", case.note);
        }
        return Ok(());
    };
    if case.rejected {
        bail!("{} parsed", case.note);
    }

    let description = env.description.as_ref().map(|d| d.value.to_string());
    my_assert_eq!(description, case.description, "description of {}", case.note);

    let imports: Vec<Import> = env
        .imports
        .iter()
        .map(|i| Import {
            name: i.environment.value.to_string(),
            merge: i.merge(),
        })
        .collect();
    my_assert_eq!(imports, case.imports, "imports of {}", case.note);

    let values: BTreeMap<String, String> = env
        .values
        .iter()
        .map(|e| (e.key.value.to_string(), describe(&e.value)))
        .collect();
    my_assert_eq!(values, case.values, "values of {}", case.note);
    Ok(())
}

fn yaml_test_impl(file: &str) -> Result<()> {
    let yaml_str = std::fs::read_to_string(file)?;
    let test: YamlTest = serde_yaml::from_str(&yaml_str)?;

    println!("running {file}");

    for case in &test.cases {
        print!("case {} ", case.note);
        check_case(case)?;
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
fn property_access_printing() -> Result<()> {
    for text in ["a", "a.b", "a[0][1].c", "[\"x y\"].z", "a[\"\\\"\"]"] {
        let (_, access, diags) = parse_property_access(None, &format!("{text}}}"));
        assert!(diags.is_empty(), "{text}: {diags}");
        assert_eq!(access.to_string(), text);
    }
    Ok(())
}

#[test]
fn diagnostics_display_their_position() -> Result<()> {
    let (_, diags) = load_yaml("proj/env", "values:\n  a: ${b\n");
    assert_eq!(
        diags.to_string(),
        "error: proj/env:2:6: missing closing brace '}' in interpolation"
    );
    let d = diags.iter().next().unwrap();
    assert_eq!(d.path, "values.a");
    let range = d.range.clone().unwrap();
    assert_eq!((range.begin.byte, range.end.byte), (13, 16));
    Ok(())
}

#[test_resources("tests/parser/cases/*.yaml")]
fn run(path: &str) {
    yaml_test(path).unwrap()
}
