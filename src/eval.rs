// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

mod access;
mod builtins;
mod export;
mod graph;
mod validate;

use std::collections::BTreeMap;

use log::debug;

use crate::ast::{load_yaml, BuiltinCall, EnvironmentDecl, ExprKind, ExprRef, SecretArg};
use crate::crypt::Decrypter;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::environment::{EvaluatedExecutionContext, Environment};
use crate::provider::{Context, EnvironmentLoader, ExecContext, ProviderLoader};
use crate::schema::{merged_schema, Schema};
use crate::syntax::NodeRef;
use crate::utils::join_key;
use crate::value::{Data, Value};

use graph::*;

/// An environment in the import closure.
struct Imported {
    evaluating: bool,
    value: Option<ValueId>,
}

/// Evaluates a parsed environment.
///
/// Evaluation never fails outright. Problems are reported as diagnostics and
/// the values they affect become unknown. Returns None without diagnostics
/// for an environment that has neither values nor imports.
#[allow(clippy::too_many_arguments)]
pub(crate) fn evaluate_environment(
    ctx: &Context,
    validating: bool,
    show_secrets: bool,
    name: &str,
    env: &EnvironmentDecl,
    decrypter: &dyn Decrypter,
    providers: &dyn ProviderLoader,
    environments: &dyn EnvironmentLoader,
    exec_context: &ExecContext,
) -> (Option<Environment>, Diagnostics) {
    if env.values.is_empty() && env.imports.is_empty() {
        return (None, Diagnostics::new());
    }

    debug!("evaluating environment {name} (validating: {validating})");

    let mut graph = Graph::default();
    let mut imports = BTreeMap::new();
    let mut ec = EvalContext::new(
        ctx,
        validating,
        show_secrets,
        name,
        env,
        decrypter,
        providers,
        environments,
        &mut graph,
        &mut imports,
        exec_context,
    );
    let v = ec.evaluate();
    let EvalContext {
        root,
        my_context,
        diags,
        ..
    } = ec;

    let node = graph.value(v);
    let schema = match node.base {
        Some(b) => merged_schema(Some(&graph.value(b).schema), &node.schema),
        None => node.schema.clone(),
    };

    let execution_context = my_context.map(|c| EvaluatedExecutionContext {
        properties: object_fields(graph.export_value(c, name)),
        schema: graph.value(c).schema.clone(),
    });

    let exprs = match root {
        Some(root) => graph.export_expr(root, name).object,
        None => BTreeMap::new(),
    };

    debug!("evaluated environment {name} with {} diagnostics", diags.len());
    (
        Some(Environment {
            exprs,
            properties: object_fields(graph.export_value(v, name)),
            schema: Some(schema),
            execution_context,
        }),
        diags,
    )
}

fn object_fields(v: Value) -> BTreeMap<String, Value> {
    match v.value {
        Data::Object(fields) => fields,
        _ => BTreeMap::new(),
    }
}

fn is_reserved_top_level_key(k: &str) -> bool {
    matches!(k, "imports" | "context" | "environments")
}

/// The state needed to evaluate one environment of an import closure. The
/// graph and the import table are shared by the whole closure.
pub(crate) struct EvalContext<'a> {
    ctx: &'a Context,
    validating: bool,
    show_secrets: bool,
    name: &'a str,
    env: &'a EnvironmentDecl,
    decrypter: &'a dyn Decrypter,
    providers: &'a dyn ProviderLoader,
    environments: &'a dyn EnvironmentLoader,
    graph: &'a mut Graph,
    imports: &'a mut BTreeMap<String, Imported>,
    exec_context: ExecContext,

    my_context: Option<ValueId>,
    my_imports: Option<ValueId>,
    root: Option<ExprId>,
    base: Option<ValueId>,

    diags: Diagnostics,
}

impl<'a> EvalContext<'a> {
    #[allow(clippy::too_many_arguments)]
    fn new(
        ctx: &'a Context,
        validating: bool,
        show_secrets: bool,
        name: &'a str,
        env: &'a EnvironmentDecl,
        decrypter: &'a dyn Decrypter,
        providers: &'a dyn ProviderLoader,
        environments: &'a dyn EnvironmentLoader,
        graph: &'a mut Graph,
        imports: &'a mut BTreeMap<String, Imported>,
        exec_context: &ExecContext,
    ) -> EvalContext<'a> {
        EvalContext {
            ctx,
            validating,
            show_secrets,
            name,
            env,
            decrypter,
            providers,
            environments,
            graph,
            imports,
            exec_context: exec_context.for_environment(name),
            my_context: None,
            my_imports: None,
            root: None,
            base: None,
            diags: Diagnostics::new(),
        }
    }

    /// Whether static ciphertexts are decrypted.
    fn decrypt_secrets(&self) -> bool {
        !self.validating || self.show_secrets
    }

    fn error(&mut self, x: ExprId, summary: impl Into<String>) {
        let node = self.graph.syntax_node(x);
        self.diags.push(Diagnostic::node_error(node.as_ref(), summary));
    }

    fn unknown(&mut self, x: ExprId, schema: Schema) -> ValueId {
        self.graph.add_value(ValueNode::unknown(x, schema))
    }

    /// Lowers an AST expression into the graph. Object properties are
    /// attached to the matching properties of `base`.
    fn declare(&mut self, path: String, x: Option<&ExprRef>, base: Option<ValueId>) -> ExprId {
        let Some(x) = x else {
            let id = self.graph.add_expr(ExprNode::new(path, None, ExprRepr::Missing, Schema::always()));
            self.graph.expr_mut(id).base = base;
            return id;
        };

        let (repr, schema) = match &x.kind {
            ExprKind::Null => (ExprRepr::Literal, Schema::null()),
            ExprKind::Boolean(b) => (ExprRepr::Literal, Schema::boolean().constant((*b).into())),
            ExprKind::Number(n) => (ExprRepr::Literal, Schema::number().constant(n.to_json())),
            ExprKind::String(s) => (ExprRepr::Literal, Schema::string().constant(s.to_string().into())),
            ExprKind::Interpolate(parts) => {
                let parts = parts
                    .iter()
                    .map(|p| InterpolationPart {
                        text: p.text.clone(),
                        access: p.value.as_ref().map(|a| self.graph.add_access(&a.accessors)),
                    })
                    .collect();
                (ExprRepr::Interpolate(parts), Schema::string())
            }
            ExprKind::Symbol(access) => {
                let access = self.graph.add_access(&access.accessors);
                (ExprRepr::Symbol(access), Schema::always())
            }
            ExprKind::Builtin(builtin) => match &builtin.call {
                BuiltinCall::FromBase64(s) => (
                    ExprRepr::FromBase64(self.declare(String::new(), s.as_ref(), None)),
                    Schema::string(),
                ),
                BuiltinCall::FromJson(s) => (
                    ExprRepr::FromJson(self.declare(String::new(), s.as_ref(), None)),
                    Schema::always(),
                ),
                BuiltinCall::Join { delimiter, values } => (
                    ExprRepr::Join {
                        delimiter: self.declare(String::new(), delimiter.as_ref(), None),
                        values: self.declare(String::new(), values.as_ref(), None),
                    },
                    Schema::string(),
                ),
                BuiltinCall::Open { provider, inputs, .. } => (
                    ExprRepr::Open {
                        provider: provider.value.clone(),
                        inputs: self.declare(String::new(), inputs.as_ref(), None),
                        input_schema: Schema::always(),
                    },
                    Schema::always(),
                ),
                BuiltinCall::Secret(SecretArg::Plaintext(p)) => {
                    let plaintext = self.declare(String::new(), Some(p), None);
                    self.graph.expr_mut(plaintext).secret = true;
                    (ExprRepr::Secret(SecretRepr::Plaintext(plaintext)), Schema::string())
                }
                BuiltinCall::Secret(SecretArg::Ciphertext(c)) => {
                    let ciphertext = self.declare(String::new(), Some(c), None);
                    self.graph.expr_mut(ciphertext).secret = true;
                    let text = match &c.kind {
                        ExprKind::String(s) => s.clone(),
                        _ => "".into(),
                    };
                    (
                        ExprRepr::Secret(SecretRepr::Ciphertext {
                            expr: ciphertext,
                            text,
                        }),
                        Schema::string(),
                    )
                }
                BuiltinCall::ToBase64(v) => (
                    ExprRepr::ToBase64(self.declare(String::new(), v.as_ref(), None)),
                    Schema::string(),
                ),
                BuiltinCall::ToJson(v) => (
                    ExprRepr::ToJson(self.declare(String::new(), v.as_ref(), None)),
                    Schema::string(),
                ),
                BuiltinCall::ToString(v) => (
                    ExprRepr::ToString(self.declare(String::new(), v.as_ref(), None)),
                    Schema::string(),
                ),
            },
            ExprKind::Array(items) => {
                let elements = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.declare(format!("{path}[{i}]"), item.as_ref(), None))
                    .collect();
                (
                    ExprRepr::Array(elements),
                    Schema::array().items(Schema::always()),
                )
            }
            ExprKind::Object(entries) => {
                let mut properties = BTreeMap::new();
                for entry in entries {
                    let k = &*entry.key.value;
                    if properties.contains_key(k) {
                        self.diags.push(Diagnostic::node_error(
                            entry.key.syntax.as_ref(),
                            format!("duplicate key {k:?}"),
                        ));
                        continue;
                    }
                    let child_base = self.graph.property(base, entry.value.as_ref(), k);
                    let child = self.declare(join_key(&path, k), entry.value.as_ref(), child_base);
                    properties.insert(k.to_string(), child);
                }
                (
                    ExprRepr::Object(properties),
                    Schema::object().additional_properties(Some(Schema::always())),
                )
            }
        };

        let id = self.graph.add_expr(ExprNode::new(path, Some(x.clone()), repr, schema));
        self.graph.expr_mut(id).base = base;
        id
    }

    /// Evaluates the context, the imports and then the values of the
    /// environment, returning the root value.
    fn evaluate(&mut self) -> ValueId {
        self.imports.insert(
            self.name.to_string(),
            Imported {
                evaluating: true,
                value: None,
            },
        );

        self.evaluate_context();
        // Imports come first so that declarations can be attached to their bases.
        self.evaluate_imports();

        let env = self.env;
        let mut properties = BTreeMap::new();
        for entry in &env.values {
            let key = &*entry.key.value;
            if is_reserved_top_level_key(key) {
                self.diags.push(Diagnostic::node_error(
                    entry.key.syntax.as_ref(),
                    format!("{key:?} is a reserved key"),
                ));
            } else if properties.contains_key(key) {
                self.diags.push(Diagnostic::node_error(
                    entry.key.syntax.as_ref(),
                    format!("duplicate key {key:?}"),
                ));
            } else {
                let base = self.graph.property(self.base, entry.value.as_ref(), key);
                let x = self.declare(key.to_string(), entry.value.as_ref(), base);
                properties.insert(key.to_string(), x);
            }
        }

        let root = self.graph.add_expr(ExprNode::new(
            format!("<{}>", self.name),
            None,
            ExprRepr::Object(properties),
            Schema::object(),
        ));
        self.graph.expr_mut(root).base = self.base;
        self.root = Some(root);

        let v = self.evaluate_expr(root);
        if let Some(imported) = self.imports.get_mut(self.name) {
            imported.evaluating = false;
            imported.value = Some(v);
        }
        v
    }

    fn evaluate_context(&mut self) {
        let def = self.graph.placeholder(None, Schema::always());
        let values = Value::from(self.exec_context.values());
        self.my_context = Some(self.graph.unexport(&values, def));
    }

    fn evaluate_imports(&mut self) {
        let env = self.env;
        let mut my_imports = BTreeMap::new();
        for decl in &env.imports {
            let name = &*decl.environment.value;
            let Some(v) = self.evaluate_import(decl.environment.syntax.as_ref(), name) else {
                continue;
            };

            my_imports.insert(name.to_string(), v);
            if decl.merge() {
                let copy = self.graph.copy(v);
                self.graph.merge(copy, self.base);
                self.base = Some(copy);
            }
        }

        let properties = my_imports
            .iter()
            .map(|(k, v)| (k.clone(), self.graph.value(*v).schema.clone()))
            .collect();
        let schema = Schema::record(properties);

        let def = self.graph.placeholder(None, schema.clone());
        let v = self
            .graph
            .add_value(ValueNode::new(def, schema, Repr::Object(my_imports)));
        self.graph.expr_mut(def).value = Some(v);
        self.my_imports = Some(v);
    }

    /// Evaluates an imported environment. Each environment in the import
    /// closure is evaluated at most once.
    fn evaluate_import(&mut self, node: Option<&NodeRef>, name: &str) -> Option<ValueId> {
        if let Some(imported) = self.imports.get(name) {
            if imported.evaluating {
                self.diags
                    .push(Diagnostic::node_error(node, format!("cyclic import of {name}")));
                return None;
            }
            return imported.value;
        }

        if let Err(e) = self.ctx.check() {
            self.diags.push(Diagnostic::node_error(node, e.to_string()));
            return None;
        }

        debug!("loading environment {name}");
        let (bytes, decrypter) = match self.environments.load_environment(self.ctx, name) {
            Ok(loaded) => loaded,
            Err(e) => {
                self.diags.push(Diagnostic::node_error(node, e.to_string()));
                return None;
            }
        };
        let source = match String::from_utf8(bytes) {
            Ok(source) => source,
            Err(e) => {
                self.diags.push(Diagnostic::node_error(node, e.to_string()));
                return None;
            }
        };

        let (decl, diags) = load_yaml(name, &source);
        self.diags.extend(diags);
        let decl = decl?;

        let mut imported = EvalContext::new(
            self.ctx,
            self.validating,
            self.show_secrets,
            name,
            &decl,
            decrypter.as_ref(),
            self.providers,
            self.environments,
            &mut *self.graph,
            &mut *self.imports,
            &self.exec_context,
        );
        let v = imported.evaluate();
        let diags = std::mem::take(&mut imported.diags);
        self.diags.extend(diags);
        Some(v)
    }

    /// Evaluates an expression, memoizing its value. The expression's schema
    /// becomes the schema of its final, merged value.
    fn evaluate_expr(&mut self, x: ExprId) -> ValueId {
        match self.graph.expr(x).state {
            ExprState::Done => {
                if let Some(v) = self.graph.expr(x).value {
                    return v;
                }
                let schema = self.graph.expr(x).schema.clone();
                return self.unknown(x, schema);
            }
            ExprState::Evaluating => {
                let path = self.graph.expr(x).path.clone();
                self.error(x, format!("cyclic reference to {path}"));
                return self.unknown(x, Schema::always());
            }
            ExprState::Declared => self.graph.expr_mut(x).state = ExprState::Evaluating,
        }

        let repr = self.graph.expr(x).repr.clone();
        let v = match repr {
            ExprRepr::Missing | ExprRepr::Access { .. } => {
                let schema = self.graph.expr(x).schema.clone();
                self.unknown(x, schema)
            }
            ExprRepr::Literal => self.evaluate_literal(x),
            ExprRepr::Interpolate(parts) => self.evaluate_interpolate(x, &parts),
            ExprRepr::Symbol(access) => self.evaluate_property_access(x, access),
            ExprRepr::Array(elements) => self.evaluate_array(x, &elements),
            ExprRepr::Object(properties) => self.evaluate_object(x, &properties),
            ExprRepr::FromBase64(s) => self.evaluate_from_base64(x, s),
            ExprRepr::FromJson(s) => self.evaluate_from_json(x, s),
            ExprRepr::Join { delimiter, values } => self.evaluate_join(x, delimiter, values),
            ExprRepr::Open {
                provider, inputs, ..
            } => self.evaluate_open(x, &provider, inputs),
            ExprRepr::Secret(secret) => self.evaluate_secret(x, &secret),
            ExprRepr::ToBase64(v) => self.evaluate_to_base64(x, v),
            ExprRepr::ToJson(v) => self.evaluate_to_json(x, v),
            ExprRepr::ToString(v) => self.evaluate_to_string(x, v),
        };

        if self.graph.expr(x).secret {
            self.graph.value_mut(v).secret = true;
        }
        let base = self.graph.expr(x).base;
        self.graph.merge(v, base);

        let schema = self.graph.value(v).schema.clone();
        let node = self.graph.expr_mut(x);
        node.schema = schema;
        node.value = Some(v);
        node.state = ExprState::Done;
        v
    }

    fn evaluate_literal(&mut self, x: ExprId) -> ValueId {
        let node = self.graph.expr(x);
        let repr = match node.syntax.as_deref().map(|s| &s.kind) {
            Some(ExprKind::Boolean(b)) => Repr::Bool(*b),
            Some(ExprKind::Number(n)) => Repr::Number(n.clone()),
            Some(ExprKind::String(s)) => Repr::String(s.to_string()),
            _ => Repr::Null,
        };
        let schema = node.schema.clone();
        self.graph.add_value(ValueNode::new(x, schema, repr))
    }

    fn evaluate_array(&mut self, x: ExprId, elements: &[ExprId]) -> ValueId {
        let mut items = Vec::with_capacity(elements.len());
        let mut schemas = Vec::with_capacity(elements.len());
        for e in elements {
            let v = self.evaluate_expr(*e);
            items.push(v);
            schemas.push(self.graph.value(v).schema.clone());
        }
        self.graph
            .add_value(ValueNode::new(x, Schema::tuple(schemas), Repr::Array(items)))
    }

    // Properties are evaluated in key order so that cycles are always
    // reported at the same place.
    fn evaluate_object(&mut self, x: ExprId, properties: &BTreeMap<String, ExprId>) -> ValueId {
        let mut fields = BTreeMap::new();
        let mut schemas = BTreeMap::new();
        for (k, e) in properties {
            let v = self.evaluate_expr(*e);
            fields.insert(k.clone(), v);
            schemas.insert(k.clone(), self.graph.value(v).schema.clone());
        }
        self.graph
            .add_value(ValueNode::new(x, Schema::record(schemas), Repr::Object(fields)))
    }

    fn evaluate_interpolate(&mut self, x: ExprId, parts: &[InterpolationPart]) -> ValueId {
        let mut s = String::new();
        let (mut unknown, mut secret) = (false, false);
        for part in parts {
            s.push_str(&part.text);
            if let Some(access) = part.access {
                let v = self.evaluate_property_access(x, access);
                let (text, u, sec) = self.graph.to_string(v);
                unknown |= u;
                secret |= sec;
                if !u {
                    s.push_str(&text);
                }
            }
        }

        let schema = self.graph.expr(x).schema.clone();
        let repr = if unknown { "[unknown]".to_string() } else { s };
        self.graph.add_value(ValueNode {
            unknown,
            secret,
            ..ValueNode::new(x, schema, Repr::String(repr))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};

    struct NoEnvironments;

    impl EnvironmentLoader for NoEnvironments {
        fn load_environment(&self, _ctx: &Context, name: &str) -> Result<(Vec<u8>, Box<dyn Decrypter>)> {
            bail!("unknown environment {name}")
        }
    }

    struct NoProviders;

    impl ProviderLoader for NoProviders {
        fn load_provider(&self, _ctx: &Context, name: &str) -> Result<Box<dyn crate::provider::Provider>> {
            bail!("unknown provider {name}")
        }
    }

    struct Plain;

    impl Decrypter for Plain {
        fn decrypt(&self, _ctx: &Context, ciphertext: &[u8]) -> Result<Vec<u8>> {
            Ok(ciphertext.to_vec())
        }
    }

    fn eval(source: &str) -> (Option<Environment>, Diagnostics) {
        let (decl, diags) = load_yaml("test", source);
        assert!(!diags.has_errors(), "{diags}");
        let decl = decl.unwrap();
        evaluate_environment(
            &Context::new(),
            false,
            false,
            "test",
            &decl,
            &Plain,
            &NoProviders,
            &NoEnvironments,
            &ExecContext::default(),
        )
    }

    #[test]
    fn empty_environment() {
        let (env, diags) = eval("values: {}");
        assert!(env.is_none());
        assert!(diags.is_empty());
    }

    #[test]
    fn references_and_interpolation() {
        let (env, diags) = eval("values:\n  a: { b: [1, two] }\n  c: ${a.b[1]}\n  d: x-${a.b}\n");
        assert!(diags.is_empty(), "{diags}");
        let env = env.unwrap();
        assert_eq!(env.properties["c"].as_str(), Some("two"));
        assert_eq!(env.properties["d"].as_str(), Some("x-\"1\",\"two\""));
    }

    #[test]
    fn reserved_keys() {
        let (env, diags) = eval("values:\n  imports: 1\n  a: { b: 1, c: 2 }\n");
        let summaries: Vec<_> = diags.iter().map(|d| d.summary.as_str()).collect();
        assert_eq!(summaries, vec!["\"imports\" is a reserved key"]);
        assert!(!env.unwrap().properties.contains_key("imports"));
    }

    #[test]
    fn cycles_are_reported_once() {
        let (env, diags) = eval("values:\n  a: ${b}\n  b: ${a}\n");
        let summaries: Vec<_> = diags.iter().map(|d| d.summary.as_str()).collect();
        assert_eq!(summaries, vec!["cyclic reference to a"]);
        let env = env.unwrap();
        assert!(env.properties["a"].unknown);
        assert!(env.properties["b"].unknown);
    }

    #[test]
    fn missing_imports_are_errors() {
        let (_, diags) = eval("imports: [nope]\nvalues: { a: 1 }\n");
        assert_eq!(diags.iter().next().unwrap().summary, "unknown environment nope");
    }
}
