// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

pub mod interpolation;
pub mod property;

use std::rc::Rc;

pub use interpolation::*;
pub use property::*;

use crate::diagnostics::{non_existent_field_message, Diagnostic, Diagnostics};
use crate::number::Number;
use crate::syntax::yaml::decode_yaml;
use crate::syntax::{NodeKind, NodeRef, ObjectProperty};

pub type ExprRef = Rc<Expr>;

/// A string that must be written literally, such as an object key or a
/// provider name.
#[derive(Debug, Clone)]
pub struct StringLit {
    pub syntax: Option<NodeRef>,
    pub value: Rc<str>,
}

impl StringLit {
    pub fn new(value: &str) -> StringLit {
        StringLit {
            syntax: None,
            value: value.into(),
        }
    }

    fn from_node(node: &NodeRef, value: &str) -> StringLit {
        StringLit {
            syntax: Some(node.clone()),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObjectEntry {
    pub key: StringLit,
    pub value: Option<ExprRef>,
}

#[derive(Debug, Clone)]
pub enum SecretArg {
    /// A plaintext string literal.
    Plaintext(ExprRef),
    /// The string literal inside `{ciphertext: ...}`.
    Ciphertext(ExprRef),
}

#[derive(Debug, Clone)]
pub enum BuiltinCall {
    FromBase64(Option<ExprRef>),
    FromJson(Option<ExprRef>),
    Join {
        delimiter: Option<ExprRef>,
        values: Option<ExprRef>,
    },
    Open {
        provider: StringLit,
        inputs: Option<ExprRef>,
        /// Written as `fn::open::<provider>: inputs`.
        short: bool,
    },
    Secret(SecretArg),
    ToBase64(Option<ExprRef>),
    ToJson(Option<ExprRef>),
    ToString(Option<ExprRef>),
}

#[derive(Debug, Clone)]
pub struct Builtin {
    pub name: StringLit,
    pub args: Option<ExprRef>,
    pub call: BuiltinCall,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Null,
    Boolean(bool),
    Number(Number),
    String(Rc<str>),
    Interpolate(Vec<Interpolation>),
    Symbol(PropertyAccess),
    Array(Vec<Option<ExprRef>>),
    Object(Vec<ObjectEntry>),
    Builtin(Builtin),
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub syntax: Option<NodeRef>,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(syntax: Option<NodeRef>, kind: ExprKind) -> ExprRef {
        Rc::new(Expr { syntax, kind })
    }
}

fn string_expr(mut parts: Vec<Interpolation>) -> ExprKind {
    if parts.len() == 1 {
        if parts[0].value.is_none() {
            return ExprKind::String(parts[0].text.as_str().into());
        }
        if parts[0].text.is_empty() {
            if let Some(access) = parts.pop().and_then(|p| p.value) {
                return ExprKind::Symbol(access);
            }
        }
    }
    ExprKind::Interpolate(parts)
}

fn object_key(node: &NodeRef, diags: &mut Diagnostics) -> StringLit {
    let raw = node.as_str().unwrap_or_default();
    let (parts, _) = parse_interpolation(Some(node), raw);
    match parts.as_slice() {
        [Interpolation { text, value: None }] => StringLit::from_node(node, text),
        _ => {
            diags.push(Diagnostic::node_error(Some(node), "object keys must be strings"));
            StringLit::from_node(node, raw)
        }
    }
}

fn is_string_literal(x: &Option<ExprRef>) -> bool {
    matches!(x.as_deref(), Some(Expr { kind: ExprKind::String(_), .. }))
}

fn parse_open(node: &NodeRef, args: &Option<ExprRef>, diags: &mut Diagnostics) -> Option<BuiltinCall> {
    let Some(ExprKind::Object(entries)) = args.as_deref().map(|a| &a.kind) else {
        diags.push(Diagnostic::node_error(
            Some(node),
            "the argument to fn::open must be an object containing 'provider' and 'inputs'",
        ));
        return None;
    };

    let field = |name: &str| entries.iter().find(|e| &*e.key.value == name);

    let provider = match field("provider") {
        None => {
            diags.push(Diagnostic::node_error(Some(node), "missing provider name ('provider')"));
            None
        }
        Some(e) => match e.value.as_deref() {
            Some(Expr {
                kind: ExprKind::String(name),
                syntax,
            }) => Some(StringLit {
                syntax: syntax.clone(),
                value: name.clone(),
            }),
            _ => {
                diags.push(Diagnostic::node_error(
                    e.key.syntax.as_ref(),
                    "provider name must be a string literal",
                ));
                None
            }
        },
    };

    let inputs = match field("inputs") {
        Some(e) if e.value.is_some() => e.value.clone(),
        _ => {
            diags.push(Diagnostic::node_error(Some(node), "missing provider inputs ('inputs')"));
            None
        }
    };

    Some(BuiltinCall::Open {
        provider: provider?,
        inputs: Some(inputs?),
        short: false,
    })
}

fn parse_secret(node: &NodeRef, args: &Option<ExprRef>, diags: &mut Diagnostics) -> Option<BuiltinCall> {
    if let Some(ExprKind::Object(entries)) = args.as_deref().map(|a| &a.kind) {
        if let [entry] = entries.as_slice() {
            if &*entry.key.value == "ciphertext" && is_string_literal(&entry.value) {
                return entry.value.clone().map(|c| BuiltinCall::Secret(SecretArg::Ciphertext(c)));
            }
        }
    } else if is_string_literal(args) {
        return args.clone().map(|p| BuiltinCall::Secret(SecretArg::Plaintext(p)));
    }
    diags.push(Diagnostic::node_error(Some(node), "secret values must be string literals"));
    None
}

// Recognizes a single-key object as a builtin call. Returns None when the key
// does not name a builtin.
fn parse_builtin(node: &NodeRef, prop: &ObjectProperty, diags: &mut Diagnostics) -> Option<ExprKind> {
    let name = prop.key.as_str()?;

    let known = matches!(
        name,
        "fn::fromBase64"
            | "fn::fromJSON"
            | "fn::join"
            | "fn::open"
            | "fn::secret"
            | "fn::toBase64"
            | "fn::toJSON"
            | "fn::toString"
    ) || name.starts_with("fn::open::");
    if !known {
        return None;
    }

    let (args, d) = parse_expr(&prop.value);
    diags.extend(d);

    let call = match name {
        "fn::fromBase64" => Some(BuiltinCall::FromBase64(args.clone())),
        "fn::fromJSON" => Some(BuiltinCall::FromJson(args.clone())),
        "fn::toBase64" => Some(BuiltinCall::ToBase64(args.clone())),
        "fn::toJSON" => Some(BuiltinCall::ToJson(args.clone())),
        "fn::toString" => Some(BuiltinCall::ToString(args.clone())),
        "fn::join" => match args.as_deref().map(|a| &a.kind) {
            Some(ExprKind::Array(items)) if items.len() == 2 => Some(BuiltinCall::Join {
                delimiter: items[0].clone(),
                values: items[1].clone(),
            }),
            _ => {
                diags.push(Diagnostic::node_error(
                    Some(node),
                    "the argument to fn::join must be a two-valued list",
                ));
                None
            }
        },
        "fn::open" => parse_open(node, &args, diags),
        "fn::secret" => parse_secret(node, &args, diags),
        _ => {
            if args.is_none() {
                diags.push(Diagnostic::node_error(Some(node), "missing provider inputs"));
            }
            args.as_ref().map(|inputs| BuiltinCall::Open {
                provider: StringLit::from_node(&prop.key, &name["fn::open::".len()..]),
                inputs: Some(inputs.clone()),
                short: true,
            })
        }
    };

    let name = StringLit::from_node(&prop.key, name);
    Some(match call {
        Some(call) => ExprKind::Builtin(Builtin { name, args, call }),
        // Keep malformed calls as plain objects so the rest of the document
        // still evaluates.
        None => ExprKind::Object(vec![ObjectEntry { key: name, value: args }]),
    })
}

fn parse_object(props: &[ObjectProperty], diags: &mut Diagnostics) -> ExprKind {
    let mut entries = Vec::with_capacity(props.len());
    for p in props {
        let key = object_key(&p.key, diags);
        if key.value.to_ascii_lowercase().starts_with("fn::") {
            diags.push(Diagnostic::node_error(Some(&p.key), "'fn::' is a reserved prefix"));
        }
        let (value, d) = parse_expr(&p.value);
        diags.extend(d);
        entries.push(ObjectEntry { key, value });
    }
    ExprKind::Object(entries)
}

/// Parses a syntax node into an expression. Returns None (with errors) for
/// strings whose interpolations do not parse.
pub fn parse_expr(node: &NodeRef) -> (Option<ExprRef>, Diagnostics) {
    let mut diags = Diagnostics::new();
    let kind = match &node.kind {
        NodeKind::Null => ExprKind::Null,
        NodeKind::Boolean(b) => ExprKind::Boolean(*b),
        NodeKind::Number(n) => ExprKind::Number(n.clone()),
        NodeKind::String(s) => {
            let (parts, d) = parse_interpolation(Some(node), s);
            diags.extend(d);
            if diags.has_errors() {
                return (None, diags);
            }
            string_expr(parts)
        }
        NodeKind::Array(items) => ExprKind::Array(
            items
                .iter()
                .map(|item| {
                    let (x, d) = parse_expr(item);
                    diags.extend(d);
                    x
                })
                .collect(),
        ),
        NodeKind::Object(props) => {
            let builtin = match props.as_slice() {
                [prop] => parse_builtin(node, prop, &mut diags),
                _ => None,
            };
            match builtin {
                Some(b) => b,
                None => parse_object(props, &mut diags),
            }
        }
    };
    (Some(Expr::new(Some(node.clone()), kind)), diags)
}

/// An entry of an environment's `imports` list.
#[derive(Debug, Clone)]
pub struct ImportDecl {
    pub syntax: Option<NodeRef>,
    pub environment: StringLit,
    pub merge: Option<bool>,
}

impl ImportDecl {
    pub fn merge(&self) -> bool {
        self.merge.unwrap_or(true)
    }
}

/// A parsed environment document.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentDecl {
    pub syntax: Option<NodeRef>,
    pub description: Option<StringLit>,
    pub imports: Vec<ImportDecl>,
    pub values: Vec<ObjectEntry>,
}

const ENVIRONMENT_FIELDS: [&str; 3] = ["description", "imports", "values"];
const IMPORT_FIELDS: [&str; 1] = ["merge"];

fn parse_import(node: &NodeRef, diags: &mut Diagnostics) -> Option<ImportDecl> {
    match &node.kind {
        NodeKind::String(name) => Some(ImportDecl {
            syntax: Some(node.clone()),
            environment: StringLit::from_node(node, name),
            merge: None,
        }),
        NodeKind::Object(props) => {
            let [prop] = props.as_slice() else {
                diags.push(Diagnostic::node_error(Some(node), "import must have a single key"));
                return None;
            };
            let name = prop.key.as_str().unwrap_or_default();
            let mut decl = ImportDecl {
                syntax: Some(node.clone()),
                environment: StringLit::from_node(&prop.key, name),
                merge: None,
            };
            match &prop.value.kind {
                NodeKind::Null => {}
                NodeKind::Object(options) => {
                    for o in options {
                        let key = o.key.as_str().unwrap_or_default();
                        if !key.eq_ignore_ascii_case("merge") {
                            diags.push(Diagnostic::node_warning(
                                Some(&o.key),
                                non_existent_field_message("Object 'import'", &IMPORT_FIELDS, key, "Field"),
                            ));
                            continue;
                        }
                        match o.value.kind {
                            NodeKind::Boolean(b) => decl.merge = Some(b),
                            _ => diags.push(Diagnostic::node_error(
                                Some(&o.value),
                                "merge must be a boolean value",
                            )),
                        }
                    }
                }
                _ => {
                    diags.push(Diagnostic::node_error(Some(&prop.value), "import must be an object"));
                    return None;
                }
            }
            Some(decl)
        }
        _ => {
            diags.push(Diagnostic::node_error(
                Some(node),
                "import must be a string or an object",
            ));
            None
        }
    }
}

/// Parses the top-level record of an environment document.
pub fn parse_environment(node: &NodeRef) -> (Option<EnvironmentDecl>, Diagnostics) {
    let mut diags = Diagnostics::new();
    let NodeKind::Object(fields) = &node.kind else {
        diags.push(Diagnostic::node_error(Some(node), "environment must be an object"));
        return (None, diags);
    };

    let mut env = EnvironmentDecl {
        syntax: Some(node.clone()),
        ..EnvironmentDecl::default()
    };

    for field in fields {
        let name = field.key.as_str().unwrap_or_default();
        match name.to_ascii_lowercase().as_str() {
            "description" => match field.value.as_str() {
                Some(s) => env.description = Some(StringLit::from_node(&field.value, s)),
                None => diags.push(Diagnostic::node_error(
                    Some(&field.value),
                    "description must be a string",
                )),
            },
            "imports" => match &field.value.kind {
                NodeKind::Array(items) => {
                    env.imports = items.iter().filter_map(|i| parse_import(i, &mut diags)).collect()
                }
                NodeKind::Null => {}
                _ => diags.push(Diagnostic::node_error(Some(&field.value), "imports must be a list")),
            },
            "values" => match &field.value.kind {
                NodeKind::Object(props) => {
                    for p in props {
                        let (value, d) = parse_expr(&p.value);
                        diags.extend(d);
                        env.values.push(ObjectEntry {
                            key: StringLit::from_node(&p.key, p.key.as_str().unwrap_or_default()),
                            value,
                        });
                    }
                }
                NodeKind::Null => {}
                _ => diags.push(Diagnostic::node_error(Some(&field.value), "values must be an object")),
            },
            _ => diags.push(Diagnostic::node_warning(
                Some(&field.key),
                non_existent_field_message("Object 'environment'", &ENVIRONMENT_FIELDS, name, "Field"),
            )),
        }
    }

    (Some(env), diags)
}

/// Decodes and parses an environment document. Returns None if either step
/// produced errors.
pub fn load_yaml(filename: &str, source: &str) -> (Option<EnvironmentDecl>, Diagnostics) {
    let (node, mut diags) = decode_yaml(filename, source);
    let Some(node) = node else {
        return (None, diags);
    };

    let (env, d) = parse_environment(&node);
    diags.extend(d);
    if diags.has_errors() {
        return (None, diags);
    }
    (env, diags)
}
