// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;

use crate::ast::{self, BuiltinCall, ExprKind};
use crate::environment::{AccessExpr, Accessor, BuiltinExpr, Expr, Interpolation, PropertyAccessor};
use crate::schema::Schema;
use crate::syntax::{NodeRef, Range};
use crate::value::{Data, Trace, Value};

use super::graph::*;

fn range_of(node: Option<&NodeRef>, env: &str) -> Range {
    let range = node.and_then(|n| n.range.clone()).unwrap_or_default();
    Range {
        environment: env.to_string(),
        ..range
    }
}

fn export_accessor(accessor: &ast::PropertyAccessor) -> Accessor {
    match accessor {
        ast::PropertyAccessor::Name(k) | ast::PropertyAccessor::Key(k) => Accessor {
            key: Some(k.clone()),
            index: None,
        },
        ast::PropertyAccessor::Index(i) => Accessor {
            key: None,
            index: Some(*i),
        },
    }
}

impl Graph {
    /// The source range of an expression, or a range naming only `env` if
    /// the expression has no syntax.
    pub fn def_range(&self, x: ExprId, env: &str) -> Range {
        range_of(self.syntax_node(x).as_ref(), env)
    }

    /// Converts a value into its public form. Bases are exported as part of
    /// the value's trace.
    pub fn export_value(&self, v: ValueId, env: &str) -> Value {
        let node = self.value(v);
        let value = match &node.repr {
            Repr::Null => Data::Null,
            Repr::Bool(b) => Data::Bool(*b),
            Repr::Number(n) => Data::Number(n.clone()),
            Repr::String(s) => Data::String(s.clone()),
            Repr::Array(items) => Data::Array(items.iter().map(|i| self.export_value(*i, env)).collect()),
            Repr::Object(_) => Data::Object(
                self.keys(v)
                    .into_iter()
                    .filter_map(|k| {
                        let f = self.lookup(v, &k)?;
                        Some((k, self.export_value(f, env)))
                    })
                    .collect(),
            ),
        };

        Value {
            value,
            secret: node.secret,
            unknown: node.unknown,
            trace: Trace {
                def: self.def_range(node.def, env),
                base: node.base.map(|b| Box::new(self.export_value(b, "<import>"))),
            },
        }
    }

    /// Converts a public value into graph values defined by `def`, typed by
    /// constant schemas.
    pub fn unexport(&mut self, value: &Value, def: ExprId) -> ValueId {
        let secret = value.secret || self.expr(def).secret;

        let (repr, schema) = match &value.value {
            _ if value.unknown => (Repr::Null, Schema::always()),
            Data::Null => (Repr::Null, Schema::null()),
            Data::Bool(b) => (Repr::Bool(*b), Schema::boolean().constant((*b).into())),
            Data::Number(n) => (Repr::Number(n.clone()), Schema::number().constant(n.to_json())),
            Data::String(s) => (Repr::String(s.clone()), Schema::string().constant(s.clone().into())),
            Data::Array(items) => {
                let items: Vec<ValueId> = items.iter().map(|i| self.unexport(i, def)).collect();
                let schemas = items.iter().map(|i| self.value(*i).schema.clone()).collect();
                (Repr::Array(items), Schema::tuple(schemas))
            }
            Data::Object(fields) => {
                let fields: BTreeMap<String, ValueId> =
                    fields.iter().map(|(k, f)| (k.clone(), self.unexport(f, def))).collect();
                let schemas = fields
                    .iter()
                    .map(|(k, f)| (k.clone(), self.value(*f).schema.clone()))
                    .collect();
                (Repr::Object(fields), Schema::record(schemas))
            }
        };

        self.add_value(ValueNode {
            unknown: value.unknown,
            secret,
            ..ValueNode::new(def, schema, repr)
        })
    }

    fn export_accessors(&self, access: AccessId, env: &str) -> Vec<PropertyAccessor> {
        self.access(access)
            .iter()
            .map(|slot| PropertyAccessor {
                accessor: export_accessor(&slot.accessor),
                value: match slot.value {
                    Some(v) => self.def_range(self.value(v).def, env),
                    None => Range::environment(env),
                },
            })
            .collect()
    }

    /// Converts an expression into its public form.
    pub fn export_expr(&self, x: ExprId, env: &str) -> Expr {
        let node = self.expr(x);
        let mut ex = Expr {
            range: self.def_range(x, env),
            schema: Some(node.schema.clone()),
            base: node
                .base
                .map(|b| Box::new(self.export_expr(self.value(b).def, env))),
            ..Expr::default()
        };

        match &node.repr {
            ExprRepr::Missing => {}
            ExprRepr::Literal => {
                ex.literal = match node.syntax.as_deref().map(|s| &s.kind) {
                    Some(ExprKind::Boolean(b)) => Some((*b).into()),
                    Some(ExprKind::Number(n)) => Some(n.to_json()),
                    Some(ExprKind::String(s)) => Some(s.to_string().into()),
                    _ => None,
                };
            }
            ExprRepr::Interpolate(parts) => {
                ex.interpolate = parts
                    .iter()
                    .map(|p| Interpolation {
                        text: p.text.clone(),
                        value: p
                            .access
                            .map(|a| self.export_accessors(a, env))
                            .unwrap_or_default(),
                    })
                    .collect();
            }
            ExprRepr::Symbol(access) => ex.symbol = self.export_accessors(*access, env),
            ExprRepr::Access { receiver, accessor } => {
                let accessor = export_accessor(accessor);
                let receiver = self.value(*receiver).def;
                if matches!(self.expr(receiver).repr, ExprRepr::Access { .. }) {
                    ex = self.export_expr(receiver, env);
                    if let Some(access) = &mut ex.access {
                        access.accessors.push(accessor);
                    }
                } else {
                    ex.access = Some(AccessExpr {
                        receiver: self.def_range(receiver, env),
                        accessors: vec![accessor],
                    });
                }
            }
            ExprRepr::Array(elements) => {
                ex.list = elements.iter().map(|e| self.export_expr(*e, env)).collect();
            }
            ExprRepr::Object(properties) => {
                if let Some(ExprKind::Object(entries)) = node.syntax.as_deref().map(|s| &s.kind) {
                    ex.key_ranges = entries
                        .iter()
                        .map(|e| (e.key.value.to_string(), range_of(e.key.syntax.as_ref(), env)))
                        .collect();
                }
                ex.object = properties
                    .iter()
                    .map(|(k, e)| (k.clone(), self.export_expr(*e, env)))
                    .collect();
            }
            _ => ex.builtin = self.export_builtin(x, env).map(Box::new),
        }
        ex
    }

    fn export_builtin(&self, x: ExprId, env: &str) -> Option<BuiltinExpr> {
        let node = self.expr(x);
        let ExprKind::Builtin(builtin) = &node.syntax.as_deref()?.kind else {
            return None;
        };
        let args_range = range_of(builtin.args.as_ref().and_then(|a| a.syntax.as_ref()), env);

        let (arg_schema, arg) = match (&node.repr, &builtin.call) {
            (ExprRepr::FromBase64(s) | ExprRepr::ToBase64(s), _) => (Schema::string(), self.export_expr(*s, env)),
            (ExprRepr::FromJson(v) | ExprRepr::ToJson(v) | ExprRepr::ToString(v), _) => {
                (Schema::always(), self.export_expr(*v, env))
            }
            (ExprRepr::Join { delimiter, values }, _) => (
                Schema::tuple(vec![Schema::string(), Schema::array().items(Schema::string())]),
                Expr {
                    range: args_range,
                    list: vec![self.export_expr(*delimiter, env), self.export_expr(*values, env)],
                    ..Expr::default()
                },
            ),
            (
                ExprRepr::Open {
                    inputs,
                    input_schema,
                    ..
                },
                BuiltinCall::Open { provider, short, .. },
            ) => {
                if *short {
                    (input_schema.clone(), self.export_expr(*inputs, env))
                } else {
                    let schema = Schema::record(BTreeMap::from([
                        ("provider".to_string(), Schema::string()),
                        ("inputs".to_string(), input_schema.clone()),
                    ]));
                    let provider = Expr {
                        range: range_of(provider.syntax.as_ref(), env),
                        schema: Some(Schema::string().constant(provider.value.to_string().into())),
                        literal: Some(provider.value.to_string().into()),
                        ..Expr::default()
                    };
                    let object = BTreeMap::from([
                        ("provider".to_string(), provider),
                        ("inputs".to_string(), self.export_expr(*inputs, env)),
                    ]);
                    (
                        schema,
                        Expr {
                            range: args_range,
                            object,
                            ..Expr::default()
                        },
                    )
                }
            }
            (ExprRepr::Secret(SecretRepr::Plaintext(p)), _) => (Schema::always(), self.export_expr(*p, env)),
            (ExprRepr::Secret(SecretRepr::Ciphertext { expr, .. }), _) => (
                Schema::always(),
                Expr {
                    range: args_range,
                    object: BTreeMap::from([("ciphertext".to_string(), self.export_expr(*expr, env))]),
                    ..Expr::default()
                },
            ),
            _ => return None,
        };

        Some(BuiltinExpr {
            name: builtin.name.value.to_string(),
            name_range: range_of(builtin.name.syntax.as_ref(), env),
            arg_schema,
            arg,
        })
    }
}
