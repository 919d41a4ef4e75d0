// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;

use crate::ast::PropertyAccessor;
use crate::schema::{Schema, SchemaType};

use super::graph::*;
use super::EvalContext;

impl EvalContext<'_> {
    /// Resolves the access of a symbol or interpolation.
    ///
    /// The result is a copy of the target, owned by `x`, so that merging it
    /// with `x`'s base does not disturb the target.
    pub(super) fn evaluate_property_access(&mut self, x: ExprId, access: AccessId) -> ValueId {
        let v = self.evaluate_expr_access(x, access);
        let copy = self.graph.copy(v);
        self.graph.value_mut(copy).def = x;
        copy
    }

    fn accessors(&self, access: AccessId) -> Vec<PropertyAccessor> {
        self.graph
            .access(access)
            .iter()
            .map(|slot| slot.accessor.clone())
            .collect()
    }

    // Walks the accessors through declared expressions first. Array, object
    // and plaintext secret expressions are traversed without being evaluated,
    // so that a value may refer to a sibling of one of its ancestors.
    fn evaluate_expr_access(&mut self, x: ExprId, access: AccessId) -> ValueId {
        let accessors = self.accessors(access);
        let Some(first) = accessors.first() else {
            return self.unknown(x, Schema::always());
        };

        match self.object_key(x, first, false).as_deref() {
            Some("imports") => {
                if let Some(imports) = self.my_imports {
                    self.graph.set_access_value(access, 0, imports);
                    return self.evaluate_value_access(x, imports, access, 1);
                }
            }
            Some("context") => {
                if let Some(context) = self.my_context {
                    self.graph.set_access_value(access, 0, context);
                    return self.evaluate_value_access(x, context, access, 1);
                }
            }
            Some("environments") => return self.evaluate_environment_reference_access(x, access),
            _ => {}
        }

        let Some(mut receiver) = self.root else {
            self.error(x, "internal error: no receiver");
            return self.invalid_property_access(x, access, 0);
        };

        let mut i = 0;
        while i < accessors.len() {
            let accessor = &accessors[i];
            let next = match self.graph.expr(receiver).repr.clone() {
                ExprRepr::Array(elements) => match self.array_index(x, accessor, Some(elements.len())) {
                    Some(index) => elements[index],
                    None => return self.invalid_property_access(x, access, i),
                },
                ExprRepr::Object(properties) => {
                    let Some(key) = self.object_key(x, accessor, true) else {
                        return self.invalid_property_access(x, access, i);
                    };
                    match properties.get(&key) {
                        Some(p) => *p,
                        None => {
                            // Defer to the base per merge-patch semantics.
                            let base = self.graph.expr(receiver).base;
                            if let (true, Some(base)) = (self.graph.is_object(base), base) {
                                return self.evaluate_value_access(x, base, access, i);
                            }
                            self.error(x, format!("unknown property {key:?}"));
                            return self.invalid_property_access(x, access, i);
                        }
                    }
                }
                ExprRepr::Secret(SecretRepr::Plaintext(plaintext)) => {
                    receiver = plaintext;
                    continue;
                }
                _ => {
                    let v = self.evaluate_expr(receiver);
                    return self.evaluate_value_access(x, v, access, i);
                }
            };

            // The accessor resolves to the (possibly unevaluated) expression.
            let node = self.graph.expr(next);
            let resolved = ValueNode {
                base: node.base,
                ..ValueNode::new(next, node.schema.clone(), Repr::Null)
            };
            let resolved = self.graph.add_value(resolved);
            self.graph.set_access_value(access, i, resolved);

            receiver = next;
            i += 1;
        }

        self.evaluate_expr(receiver)
    }

    /// Resolves `${environments.<project>.<environment>...}` by importing
    /// `<project>/<environment>` inline.
    fn evaluate_environment_reference_access(&mut self, x: ExprId, access: AccessId) -> ValueId {
        let accessors = self.accessors(access);
        if accessors.len() < 3 {
            return self.invalid_property_access(x, access, 0);
        }

        let project = self.object_key(x, &accessors[1], true);
        let environment = self.object_key(x, &accessors[2], true);
        let (Some(project), Some(environment)) = (project, environment) else {
            return self.invalid_property_access(x, access, 0);
        };

        let node = self.graph.syntax_node(x);
        let imported = match self.evaluate_import(node.as_ref(), &format!("{project}/{environment}")) {
            Some(v) => v,
            None => {
                let def = self.graph.placeholder(None, Schema::always());
                self.unknown(def, Schema::always())
            }
        };

        // A synthetic object that the accessors can walk.
        let mut v = imported;
        for key in [environment.as_str(), project.as_str(), "environments"] {
            let schema = Schema::record(BTreeMap::from([(key.to_string(), self.graph.value(v).schema.clone())]));
            let fields = BTreeMap::from([(key.to_string(), v)]);
            v = self
                .graph
                .add_value(ValueNode::new(x, schema, Repr::Object(fields)));
        }
        self.evaluate_value_access(x, v, access, 0)
    }

    /// Resolves the accessors of `access` from `start` on against a value.
    pub(super) fn evaluate_value_access(
        &mut self,
        x: ExprId,
        receiver: ValueId,
        access: AccessId,
        start: usize,
    ) -> ValueId {
        let accessors = self.accessors(access);

        let mut receiver = receiver;
        for (i, accessor) in accessors.iter().enumerate().skip(start) {
            let node = self.graph.value(receiver);
            if node.unknown {
                let schema = node.schema.clone();
                return self.evaluate_unknown_access(x, schema, access, i);
            }

            receiver = match node.repr.clone() {
                Repr::Array(items) => match self.array_index(x, accessor, Some(items.len())) {
                    Some(index) => items[index],
                    None => return self.invalid_property_access(x, access, i),
                },
                Repr::Object(fields) => {
                    let Some(key) = self.object_key(x, accessor, true) else {
                        return self.invalid_property_access(x, access, i);
                    };
                    match fields.get(&key) {
                        Some(f) => *f,
                        None => {
                            let base = self.graph.value(receiver).base;
                            if let (true, Some(base)) = (self.graph.is_object(base), base) {
                                return self.evaluate_value_access(x, base, access, i);
                            }
                            self.error(x, format!("unknown property {key:?}"));
                            return self.invalid_property_access(x, access, i);
                        }
                    }
                }
                _ => {
                    self.error(x, "receiver must be an array or an object");
                    return self.invalid_property_access(x, access, i);
                }
            };
            self.graph.set_access_value(access, i, receiver);
        }
        receiver
    }

    // Narrows the schema of an unknown receiver along the accessors. Every
    // step yields an unknown value of the narrowed schema.
    fn evaluate_unknown_access(&mut self, x: ExprId, schema: Schema, access: AccessId, start: usize) -> ValueId {
        let accessors = self.accessors(access);
        let syntax = self.graph.expr(x).syntax.clone();

        let mut receiver = schema;
        let mut resolved = None;
        for (i, accessor) in accessors.iter().enumerate().skip(start) {
            if !receiver.is_always() {
                let branches = !receiver.any_of.is_empty()
                    || !receiver.one_of.is_empty()
                    || receiver.resolved_ref().is_some();
                receiver = match receiver.schema_type {
                    Some(SchemaType::Array) => {
                        let len = match &receiver.items {
                            Some(items) if items.is_never() => Some(receiver.prefix_items.len()),
                            _ => None,
                        };
                        match self.array_index(x, accessor, len) {
                            Some(index) => receiver.item(index),
                            None => return self.invalid_property_access(x, access, i),
                        }
                    }
                    Some(SchemaType::Object) => match self.object_key(x, accessor, true) {
                        Some(key) => receiver.property(&key),
                        None => return self.invalid_property_access(x, access, i),
                    },
                    None if branches => match accessor {
                        PropertyAccessor::Index(index) if *index >= 0 => receiver.item(*index as usize),
                        PropertyAccessor::Index(_) => {
                            self.error(x, "array indices must not be negative");
                            return self.invalid_property_access(x, access, i);
                        }
                        PropertyAccessor::Name(key) | PropertyAccessor::Key(key) => receiver.property(key),
                    },
                    _ => {
                        self.error(x, "receiver must be an array or an object");
                        return self.invalid_property_access(x, access, i);
                    }
                };
            }

            let def = self.graph.placeholder(syntax.clone(), receiver.clone());
            let v = self.unknown(def, receiver.clone());
            self.graph.set_access_value(access, i, v);
            resolved = Some(v);
        }

        match resolved {
            Some(v) => v,
            None => self.unknown(x, receiver),
        }
    }

    // Resolves the accessors from `start` on to unknown values.
    fn invalid_property_access(&mut self, x: ExprId, access: AccessId, start: usize) -> ValueId {
        let syntax = self.graph.expr(x).syntax.clone();
        let mut last = None;
        for i in start..self.graph.access(access).len() {
            let def = self.graph.placeholder(syntax.clone(), Schema::always());
            let v = self.unknown(def, Schema::always());
            self.graph.set_access_value(access, i, v);
            last = Some(v);
        }
        match last {
            Some(v) => v,
            None => self.unknown(x, Schema::always()),
        }
    }

    /// The index named by `accessor`, bounds-checked against `len` if known.
    fn array_index(&mut self, x: ExprId, accessor: &PropertyAccessor, len: Option<usize>) -> Option<usize> {
        let PropertyAccessor::Index(index) = accessor else {
            self.error(x, "cannot access an array element using a property name");
            return None;
        };
        let Ok(index) = usize::try_from(*index) else {
            self.error(x, "array indices must not be negative");
            return None;
        };
        if let Some(len) = len {
            if index >= len {
                self.error(x, format!("array index {index} out-of-bounds for array of length {len}"));
                return None;
            }
        }
        Some(index)
    }

    /// The key named by `accessor`. Integer subscripts are errors if `must`
    /// is set.
    fn object_key(&mut self, x: ExprId, accessor: &PropertyAccessor, must: bool) -> Option<String> {
        match accessor.key() {
            Some(key) => Some(key.to_string()),
            None => {
                if must {
                    self.error(x, "cannot access an object property using an integer index");
                }
                None
            }
        }
    }
}
