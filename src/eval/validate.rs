// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Checks values, and the schemas of unknown values, against the schemas
//! builtins and providers accept.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::str::FromStr;

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::number::Number;
use crate::schema::{Schema, SchemaType};
use crate::utils::join_key;

use super::graph::*;

/// The expression to blame for a validation failure.
///
/// While the value being validated is defined by array and object literals,
/// errors are attributed to the innermost literal element. Past that point,
/// errors are attributed to the defining expression and prefixed with the
/// path of the offending element relative to it.
#[derive(Debug, Clone)]
pub(crate) struct Loc {
    x: ExprId,
    path: String,
    prefix: bool,
}

impl Loc {
    pub fn new(x: ExprId, path: &str) -> Loc {
        Loc {
            x,
            path: path.to_string(),
            prefix: false,
        }
    }
}

pub(crate) struct Validator<'g> {
    graph: &'g Graph,
    diags: Diagnostics,
}

impl<'g> Validator<'g> {
    pub fn new(graph: &'g Graph) -> Validator<'g> {
        Validator {
            graph,
            diags: Diagnostics::new(),
        }
    }

    pub fn finish(self) -> Diagnostics {
        self.diags
    }

    fn index(&self, loc: &Loc, i: usize) -> Loc {
        if let ExprRepr::Array(elements) = &self.graph.expr(loc.x).repr {
            if let Some(e) = elements.get(i) {
                return Loc {
                    x: *e,
                    path: format!("[{i}]"),
                    prefix: false,
                };
            }
        }
        Loc {
            x: loc.x,
            path: format!("{}[{i}]", loc.path),
            prefix: true,
        }
    }

    fn property(&self, loc: &Loc, key: &str) -> Loc {
        if let ExprRepr::Object(properties) = &self.graph.expr(loc.x).repr {
            if let Some(p) = properties.get(key) {
                return Loc {
                    x: *p,
                    path: join_key("", key),
                    prefix: false,
                };
            }
        }
        Loc {
            x: loc.x,
            path: join_key(&loc.path, key),
            prefix: true,
        }
    }

    fn error(&mut self, loc: &Loc, summary: impl Display) -> bool {
        let summary = match loc.prefix {
            true => format!("{}: {summary}", loc.path),
            false => summary.to_string(),
        };
        let node = self.graph.syntax_node(loc.x);
        self.diags.push(Diagnostic::node_error(node.as_ref(), summary));
        false
    }

    // Runs `f` against each branch in a scratch validator. The branch
    // diagnostics are only kept if no branch matches.
    fn matches<F>(&mut self, branches: &[Schema], f: F) -> (usize, Diagnostics)
    where
        F: Fn(&mut Validator<'g>, &Schema) -> bool,
    {
        let mut matched = 0;
        let mut diags = Diagnostics::new();
        for branch in branches {
            let mut sub = Validator::new(self.graph);
            if f(&mut sub, branch) {
                matched += 1;
            }
            diags.extend(sub.diags);
        }
        (matched, diags)
    }

    fn any_of<F>(&mut self, branches: &[Schema], loc: &Loc, f: F) -> bool
    where
        F: Fn(&mut Validator<'g>, &Schema) -> bool,
    {
        if branches.is_empty() {
            return true;
        }
        let (matched, diags) = self.matches(branches, f);
        if matched == 0 {
            self.diags.extend(diags);
            return self.error(loc, "at least one subschema must match");
        }
        true
    }

    fn one_of<F>(&mut self, branches: &[Schema], loc: &Loc, f: F) -> bool
    where
        F: Fn(&mut Validator<'g>, &Schema) -> bool,
    {
        if branches.is_empty() {
            return true;
        }
        match self.matches(branches, f) {
            (1, _) => true,
            (0, diags) => {
                self.diags.extend(diags);
                self.error(loc, "exactly one subschema must match")
            }
            _ => self.error(loc, "exactly one subschema must match"),
        }
    }

    fn check_type(&mut self, actual: SchemaType, accept: &Schema, loc: &Loc) -> bool {
        match accept.schema_type {
            Some(expected) if expected != actual => self.error(loc, format!("expected {expected}, got {actual}")),
            _ => true,
        }
    }

    /// Checks that `accept` accepts `v`. Unknown values are checked by their
    /// schema.
    pub fn validate_value(&mut self, v: ValueId, accept: &Schema, loc: &Loc) -> bool {
        if let Err(e) = accept.compile() {
            return self.error(loc, format!("internal error: invalid schema: {e}"));
        }
        if accept.is_always() {
            return true;
        }
        if accept.is_never() {
            return self.error(loc, "unexpected value");
        }

        let graph = self.graph;
        let node = graph.value(v);
        if node.unknown {
            return self.validate_schema_type(&node.schema, accept, loc);
        }

        let ref_ok = match accept.resolved_ref() {
            Some(r) => self.validate_value(v, r, loc),
            None => true,
        };
        let any_ok = self.any_of(&accept.any_of, loc, |sub, s| sub.validate_value(v, s, loc));
        let one_ok = self.one_of(&accept.one_of, loc, |sub, s| sub.validate_value(v, s, loc));
        let const_ok = self.validate_const(v, accept, loc);
        let enum_ok = self.validate_enum(v, accept, loc);
        let type_ok = self.validate_type(v, accept, loc);
        ref_ok && any_ok && one_ok && const_ok && enum_ok && type_ok
    }

    fn validate_const(&mut self, v: ValueId, accept: &Schema, loc: &Loc) -> bool {
        match &accept.constant {
            Some(c) if !self.equals_const(v, c) => self.error(loc, format!("expected {c}")),
            _ => true,
        }
    }

    fn validate_enum(&mut self, v: ValueId, accept: &Schema, loc: &Loc) -> bool {
        let values = &accept.enumeration;
        if values.is_empty() || values.iter().any(|c| self.equals_const(v, c)) {
            return true;
        }
        match values.as_slice() {
            [c] => self.error(loc, format!("expected {c}")),
            _ => self.error(loc, format!("expected one of {}", serde_json::Value::Array(values.clone()))),
        }
    }

    fn equals_const(&self, v: ValueId, c: &serde_json::Value) -> bool {
        use serde_json::Value as Json;

        match (c, &self.graph.value(v).repr) {
            (Json::Null, Repr::Null) => true,
            (Json::Bool(c), Repr::Bool(b)) => c == b,
            (Json::Number(c), Repr::Number(n)) => Number::from_str(&c.to_string()).is_ok_and(|c| &c == n),
            (Json::String(c), Repr::String(s)) => c == s,
            (Json::Array(c), Repr::Array(items)) => {
                c.len() == items.len() && items.iter().zip(c).all(|(i, c)| self.equals_const(*i, c))
            }
            (Json::Object(c), Repr::Object(_)) => {
                self.graph.keys(v).len() == c.len()
                    && c.iter().all(|(k, c)| {
                        self.graph
                            .lookup(v, k)
                            .is_some_and(|f| self.equals_const(f, c))
                    })
            }
            _ => false,
        }
    }

    fn validate_type(&mut self, v: ValueId, accept: &Schema, loc: &Loc) -> bool {
        let graph = self.graph;
        match &graph.value(v).repr {
            Repr::Null => self.check_type(SchemaType::Null, accept, loc),
            Repr::Bool(_) => self.check_type(SchemaType::Boolean, accept, loc),
            Repr::Number(n) => self.check_type(SchemaType::Number, accept, loc) && self.validate_number(n, accept, loc),
            Repr::String(s) => self.check_type(SchemaType::String, accept, loc) && self.validate_string(s, accept, loc),
            Repr::Array(items) => {
                self.check_type(SchemaType::Array, accept, loc) && self.validate_array(items, accept, loc)
            }
            Repr::Object(_) => self.check_type(SchemaType::Object, accept, loc) && self.validate_object(v, accept, loc),
        }
    }

    fn validate_number(&mut self, n: &Number, accept: &Schema, loc: &Loc) -> bool {
        let mut ok = true;
        if let Some(m) = &accept.multiple_of {
            if !n.is_multiple_of(m) {
                ok = self.error(loc, format!("expected a multiple of {m}"));
            }
        }
        if let Some(m) = &accept.minimum {
            if n < m {
                ok = self.error(loc, format!("expected a number greater than or equal to {m}"));
            }
        }
        if let Some(m) = &accept.exclusive_minimum {
            if n <= m {
                ok = self.error(loc, format!("expected a number greater than {m}"));
            }
        }
        if let Some(m) = &accept.maximum {
            if n > m {
                ok = self.error(loc, format!("expected a number less than or equal to {m}"));
            }
        }
        if let Some(m) = &accept.exclusive_maximum {
            if n >= m {
                ok = self.error(loc, format!("expected a number less than {m}"));
            }
        }
        ok
    }

    fn validate_string(&mut self, s: &str, accept: &Schema, loc: &Loc) -> bool {
        let len = s.len() as u64;
        let mut ok = true;
        if let Some(n) = accept.min_length {
            if len < n {
                ok = self.error(loc, format!("expected a string of at least length {n}"));
            }
        }
        if let Some(n) = accept.max_length {
            if len > n {
                ok = self.error(loc, format!("expected a string of at most length {n}"));
            }
        }
        if let (Some(p), Some(re)) = (&accept.pattern, accept.regex()) {
            if !re.is_match(s) {
                ok = self.error(loc, format!("string must match the pattern {p:?}"));
            }
        }
        ok
    }

    fn validate_array(&mut self, items: &[ValueId], accept: &Schema, loc: &Loc) -> bool {
        let len = items.len() as u64;
        let mut ok = true;
        if let Some(n) = accept.min_items {
            if len < n {
                ok = self.error(loc, format!("expected an array with at least {n} items"));
            }
        }
        if let Some(n) = accept.max_items {
            if len > n {
                ok = self.error(loc, format!("expected an array with at most {n} items"));
            }
        }

        let always = Schema::always();
        for (i, item) in items.iter().enumerate() {
            let schema = accept
                .prefix_items
                .get(i)
                .or(accept.items.as_ref())
                .unwrap_or(&always);
            let item_loc = self.index(loc, i);
            if !self.validate_value(*item, schema, &item_loc) {
                ok = false;
            }
        }
        ok
    }

    fn validate_object(&mut self, v: ValueId, accept: &Schema, loc: &Loc) -> bool {
        let keys = self.graph.keys(v);
        let len = keys.len() as u64;
        let mut ok = true;
        if let Some(n) = accept.min_properties {
            if len < n {
                ok = self.error(loc, format!("expected an object with at least {n} properties"));
            }
        }
        if let Some(n) = accept.max_properties {
            if len > n {
                ok = self.error(loc, format!("expected an object with at most {n} properties"));
            }
        }

        let always = Schema::always();
        for k in &keys {
            let Some(kv) = self.graph.lookup(v, k) else {
                continue;
            };
            let schema = accept
                .properties
                .get(k)
                .or(accept.additional_properties.as_ref())
                .unwrap_or(&always);
            let property_loc = self.property(loc, k);
            if !self.validate_value(kv, schema, &property_loc) {
                ok = false;
            }
        }

        let present: BTreeSet<&str> = keys.iter().map(|k| k.as_str()).collect();
        self.check_required(&present, accept, loc) && ok
    }

    // Reports each required (or dependent-required) key that is absent.
    fn check_required(&mut self, present: &BTreeSet<&str>, accept: &Schema, loc: &Loc) -> bool {
        let mut missing: Vec<&str> = accept
            .required
            .iter()
            .map(|k| k.as_str())
            .filter(|k| !present.contains(k))
            .collect();
        for (k, deps) in &accept.dependent_required {
            if present.contains(k.as_str()) {
                missing.extend(deps.iter().map(|d| d.as_str()).filter(|d| !present.contains(d)));
            }
        }

        let mut seen = BTreeSet::new();
        let mut ok = true;
        for k in missing {
            if seen.insert(k) {
                let key_loc = self.property(loc, k);
                ok = self.error(&key_loc, "missing required property");
            }
        }
        ok
    }

    /// Checks that every value `x` describes is accepted by `accept`.
    fn validate_schema_type(&mut self, x: &Schema, accept: &Schema, loc: &Loc) -> bool {
        if accept.is_always() {
            return true;
        }
        if accept.is_never() {
            return self.error(loc, "unexpected value");
        }
        if x.is_always() {
            return true;
        }
        if x.is_never() {
            return false;
        }

        let ref_ok = match accept.resolved_ref() {
            Some(r) => self.validate_schema_type(x, r, loc),
            None => true,
        };
        let x_ref_ok = match x.resolved_ref() {
            Some(r) => self.validate_schema_type(r, accept, loc),
            None => true,
        };
        let x_any_ok = self.any_of(&x.any_of, loc, |sub, s| sub.validate_schema_type(s, accept, loc));
        // A concrete value takes exactly one branch, so oneOf is typed like anyOf.
        let x_one_ok = self.any_of(&x.one_of, loc, |sub, s| sub.validate_schema_type(s, accept, loc));
        let type_ok = match x.schema_type {
            Some(t) => self.check_type(t, accept, loc),
            None => true,
        };
        let any_ok = self.any_of(&accept.any_of, loc, |sub, s| sub.validate_schema_type(x, s, loc));
        let one_ok = self.any_of(&accept.one_of, loc, |sub, s| sub.validate_schema_type(x, s, loc));

        let complex_ok = match x.schema_type {
            Some(SchemaType::Array) => self.validate_schema_array(x, accept, loc),
            Some(SchemaType::Object) => self.validate_schema_object(x, accept, loc),
            _ => true,
        };
        ref_ok && x_ref_ok && x_any_ok && x_one_ok && type_ok && any_ok && one_ok && complex_ok
    }

    fn validate_schema_array(&mut self, x: &Schema, accept: &Schema, loc: &Loc) -> bool {
        let always = Schema::always();
        let x_items = x.items.as_ref().unwrap_or(&always);
        let accept_items = accept.items.as_ref().unwrap_or(&always);

        let mut ok = true;
        let n = x.prefix_items.len().max(accept.prefix_items.len());
        for i in 0..n {
            let xp = x.prefix_items.get(i).unwrap_or(x_items);
            let ap = accept.prefix_items.get(i).unwrap_or(accept_items);
            let item_loc = self.index(loc, i);
            if !self.validate_schema_type(xp, ap, &item_loc) {
                ok = false;
            }
        }

        if !x_items.is_never() && !self.validate_schema_type(x_items, accept_items, loc) {
            ok = false;
        }
        ok
    }

    fn validate_schema_object(&mut self, x: &Schema, accept: &Schema, loc: &Loc) -> bool {
        let always = Schema::always();
        let accept_additional = accept.additional_properties.as_ref().unwrap_or(&always);

        let mut ok = true;
        for (k, px) in &x.properties {
            let pa = accept.properties.get(k).unwrap_or(accept_additional);
            let property_loc = self.property(loc, k);
            if !self.validate_schema_type(px, pa, &property_loc) {
                ok = false;
            }
        }

        match &x.additional_properties {
            None => {
                let required: BTreeSet<&str> = x.required.iter().map(|k| k.as_str()).collect();
                if !self.check_required(&required, accept, loc) {
                    ok = false;
                }
            }
            Some(additional) if !additional.is_never() => {
                if !self.validate_schema_type(additional, accept_additional, loc) {
                    ok = false;
                }
            }
            Some(_) => {}
        }
        ok
    }
}
