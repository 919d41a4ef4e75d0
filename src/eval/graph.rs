// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use crate::ast::{ExprRef, PropertyAccessor};
use crate::number::Number;
use crate::schema::{merged_schema, Schema, SchemaType};
use crate::syntax::NodeRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct ExprId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct ValueId(usize);

/// Identifies the accessor list of a symbol or interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct AccessId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExprState {
    Declared,
    Evaluating,
    Done,
}

/// An accessor and the value it resolved to.
#[derive(Debug, Clone)]
pub(crate) struct AccessorSlot {
    pub accessor: PropertyAccessor,
    pub value: Option<ValueId>,
}

#[derive(Debug, Clone)]
pub(crate) struct InterpolationPart {
    pub text: String,
    pub access: Option<AccessId>,
}

#[derive(Debug, Clone)]
pub(crate) enum SecretRepr {
    Plaintext(ExprId),
    Ciphertext { expr: ExprId, text: Rc<str> },
}

#[derive(Debug, Clone)]
pub(crate) enum ExprRepr {
    /// No expression, or a placeholder standing in for one.
    Missing,
    Literal,
    Interpolate(Vec<InterpolationPart>),
    Symbol(AccessId),
    /// A late-bound access into an unknown value.
    Access {
        receiver: ValueId,
        accessor: PropertyAccessor,
    },
    Array(Vec<ExprId>),
    Object(BTreeMap<String, ExprId>),
    FromBase64(ExprId),
    FromJson(ExprId),
    Join {
        delimiter: ExprId,
        values: ExprId,
    },
    Open {
        provider: Rc<str>,
        inputs: ExprId,
        input_schema: Schema,
    },
    Secret(SecretRepr),
    ToBase64(ExprId),
    ToJson(ExprId),
    ToString(ExprId),
}

#[derive(Debug, Clone)]
pub(crate) struct ExprNode {
    pub path: String,
    pub syntax: Option<ExprRef>,
    pub repr: ExprRepr,
    pub base: Option<ValueId>,
    pub schema: Schema,
    pub state: ExprState,
    pub secret: bool,
    pub value: Option<ValueId>,
}

impl ExprNode {
    pub fn new(path: impl Into<String>, syntax: Option<ExprRef>, repr: ExprRepr, schema: Schema) -> ExprNode {
        ExprNode {
            path: path.into(),
            syntax,
            repr,
            base: None,
            schema,
            state: ExprState::Declared,
            secret: false,
            value: None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Repr {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<ValueId>),
    Object(BTreeMap<String, ValueId>),
}

#[derive(Debug, Clone)]
pub(crate) struct ValueNode {
    pub def: ExprId,
    pub base: Option<ValueId>,
    pub schema: Schema,
    pub unknown: bool,
    pub secret: bool,
    pub repr: Repr,
}

impl ValueNode {
    pub fn new(def: ExprId, schema: Schema, repr: Repr) -> ValueNode {
        ValueNode {
            def,
            base: None,
            schema,
            unknown: false,
            secret: false,
            repr,
        }
    }

    pub fn unknown(def: ExprId, schema: Schema) -> ValueNode {
        ValueNode {
            unknown: true,
            ..ValueNode::new(def, schema, Repr::Null)
        }
    }
}

/// Arena holding every expression and value of an evaluation, including
/// those of imported environments.
#[derive(Debug, Default)]
pub(crate) struct Graph {
    exprs: Vec<ExprNode>,
    values: Vec<ValueNode>,
    accesses: Vec<Vec<AccessorSlot>>,
}

impl Graph {
    pub fn add_expr(&mut self, node: ExprNode) -> ExprId {
        self.exprs.push(node);
        ExprId(self.exprs.len() - 1)
    }

    pub fn add_value(&mut self, node: ValueNode) -> ValueId {
        self.values.push(node);
        ValueId(self.values.len() - 1)
    }

    pub fn add_access(&mut self, accessors: &[PropertyAccessor]) -> AccessId {
        self.accesses.push(
            accessors
                .iter()
                .map(|a| AccessorSlot {
                    accessor: a.clone(),
                    value: None,
                })
                .collect(),
        );
        AccessId(self.accesses.len() - 1)
    }

    pub fn expr(&self, id: ExprId) -> &ExprNode {
        &self.exprs[id.0]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut ExprNode {
        &mut self.exprs[id.0]
    }

    pub fn value(&self, id: ValueId) -> &ValueNode {
        &self.values[id.0]
    }

    pub fn value_mut(&mut self, id: ValueId) -> &mut ValueNode {
        &mut self.values[id.0]
    }

    pub fn access(&self, id: AccessId) -> &[AccessorSlot] {
        &self.accesses[id.0]
    }

    pub fn set_access_value(&mut self, id: AccessId, index: usize, value: ValueId) {
        self.accesses[id.0][index].value = Some(value);
    }

    /// The syntax node of an expression, if it has one.
    pub fn syntax_node(&self, x: ExprId) -> Option<NodeRef> {
        self.expr(x).syntax.as_ref().and_then(|s| s.syntax.clone())
    }

    pub fn as_str(&self, v: ValueId) -> Option<&str> {
        match &self.value(v).repr {
            Repr::String(s) => Some(s),
            _ => None,
        }
    }

    /// Placeholder expression standing in for `syntax`, already evaluated.
    pub fn placeholder(&mut self, syntax: Option<ExprRef>, schema: Schema) -> ExprId {
        self.add_expr(ExprNode {
            state: ExprState::Done,
            ..ExprNode::new("", syntax, ExprRepr::Missing, schema)
        })
    }

    pub fn contains_unknowns(&self, v: ValueId) -> bool {
        let node = self.value(v);
        if node.unknown {
            return true;
        }
        match &node.repr {
            Repr::Array(items) => items.iter().any(|i| self.contains_unknowns(*i)),
            Repr::Object(fields) => fields.values().any(|f| self.contains_unknowns(*f)),
            _ => false,
        }
    }

    pub fn contains_secrets(&self, v: ValueId) -> bool {
        let node = self.value(v);
        if node.secret {
            return true;
        }
        match &node.repr {
            Repr::Array(items) => items.iter().any(|i| self.contains_secrets(*i)),
            Repr::Object(fields) => fields.values().any(|f| self.contains_secrets(*f)),
            _ => false,
        }
    }

    /// Whether `v` is, or may be, an object.
    pub fn is_object(&self, v: Option<ValueId>) -> bool {
        let Some(v) = v else {
            return false;
        };
        let node = self.value(v);
        if node.unknown {
            return node.schema.is_always() || node.schema.is_type(SchemaType::Object);
        }
        matches!(node.repr, Repr::Object(_))
    }

    /// Folds the unknown and secret taints of `others` into `v`.
    pub fn combine(&mut self, v: ValueId, others: &[ValueId]) {
        let mut unknown = self.contains_unknowns(v);
        let mut secret = self.contains_secrets(v);
        for o in others {
            unknown |= self.contains_unknowns(*o);
            secret |= self.contains_secrets(*o);
        }
        let node = self.value_mut(v);
        node.unknown = unknown;
        node.secret = secret;
    }

    /// The keys of an object, including those inherited through its bases.
    pub fn keys(&self, v: ValueId) -> Vec<String> {
        let mut keys = BTreeSet::new();
        let mut cur = Some(v);
        while let Some(id) = cur {
            let node = self.value(id);
            let Repr::Object(fields) = &node.repr else {
                break;
            };
            keys.extend(fields.keys().cloned());
            cur = node.base;
        }
        keys.into_iter().collect()
    }

    /// Looks up a property along the base chain without synthesizing
    /// anything for unknown receivers.
    pub fn lookup(&self, v: ValueId, key: &str) -> Option<ValueId> {
        let mut cur = Some(v);
        while let Some(id) = cur {
            let node = self.value(id);
            let Repr::Object(fields) = &node.repr else {
                return None;
            };
            if let Some(f) = fields.get(key) {
                return Some(*f);
            }
            cur = node.base;
        }
        None
    }

    /// The value of property `key` of `v` per merge-patch semantics. Unknown
    /// receivers produce a late-bound access typed by the receiver's schema.
    pub fn property(&mut self, v: Option<ValueId>, syntax: Option<&ExprRef>, key: &str) -> Option<ValueId> {
        let v = v?;
        let node = self.value(v);
        if let Repr::Object(fields) = &node.repr {
            return match fields.get(key) {
                Some(f) => Some(*f),
                None => {
                    let base = node.base;
                    self.property(base, syntax, key)
                }
            };
        }
        if !node.unknown {
            return None;
        }

        let schema = node.schema.property(key);
        let receiver_base = node.base;
        let base = self.property(receiver_base, syntax, key);
        let def = self.add_expr(ExprNode {
            base,
            state: ExprState::Done,
            ..ExprNode::new(
                "",
                syntax.cloned(),
                ExprRepr::Access {
                    receiver: v,
                    accessor: PropertyAccessor::Name(key.to_string()),
                },
                schema.clone(),
            )
        });
        let value = self.add_value(ValueNode {
            base,
            ..ValueNode::unknown(def, schema)
        });
        self.expr_mut(def).value = Some(value);
        Some(value)
    }

    /// Deep copy of `v` and its bases.
    pub fn copy(&mut self, v: ValueId) -> ValueId {
        let node = self.value(v).clone();
        let base = node.base.map(|b| self.copy(b));
        let repr = match node.repr {
            Repr::Array(items) => Repr::Array(items.into_iter().map(|i| self.copy(i)).collect()),
            Repr::Object(fields) => Repr::Object(fields.into_iter().map(|(k, f)| (k, self.copy(f))).collect()),
            r => r,
        };
        self.add_value(ValueNode { base, repr, ..node })
    }

    /// Makes `v` override `base` as a JSON merge patch.
    pub fn merge(&mut self, v: ValueId, base: Option<ValueId>) {
        let Some(base) = base else {
            return;
        };
        if v == base {
            return;
        }

        match self.value(v).base {
            Some(existing) => self.merge(existing, Some(base)),
            None => {
                self.value_mut(v).base = Some(base);
                if let Repr::Object(fields) = &self.value(v).repr {
                    let fields: Vec<(String, ValueId)> =
                        fields.iter().map(|(k, f)| (k.clone(), *f)).collect();
                    for (k, f) in fields {
                        let syntax = self.expr(self.value(f).def).syntax.clone();
                        let b = self.property(Some(base), syntax.as_ref(), &k);
                        self.merge(f, b);
                    }
                }
            }
        }

        if let Some(b) = self.value(v).base {
            let schema = merged_schema(Some(&self.value(b).schema), &self.value(v).schema);
            self.value_mut(v).schema = schema;
        }
    }

    /// Stringifies a value, returning the string and its unknown and secret
    /// taints.
    pub fn to_string(&self, v: ValueId) -> (String, bool, bool) {
        let node = self.value(v);
        if node.unknown {
            return ("[unknown]".to_string(), true, node.secret);
        }

        let (mut unknown, mut secret) = (false, node.secret);
        let s = match &node.repr {
            Repr::Null => String::new(),
            Repr::Bool(b) => b.to_string(),
            Repr::Number(n) => n.to_string(),
            Repr::String(s) => s.clone(),
            Repr::Array(items) => items
                .iter()
                .map(|i| {
                    let (s, u, sec) = self.to_string(*i);
                    unknown |= u;
                    secret |= sec;
                    quote(&s)
                })
                .collect::<Vec<_>>()
                .join(","),
            Repr::Object(fields) => fields
                .iter()
                .map(|(k, f)| {
                    let (s, u, sec) = self.to_string(*f);
                    unknown |= u;
                    secret |= sec;
                    format!("{}={}", quote(k), quote(&s))
                })
                .collect::<Vec<_>>()
                .join(","),
        };
        (s, unknown, secret)
    }
}

// Characters written as-is by `quote`. Unassigned code points count as
// printable.
fn is_printable(c: char) -> bool {
    if c == ' ' {
        return true;
    }
    if c.is_control() || c.is_whitespace() {
        return false;
    }
    // Format and private-use characters.
    !matches!(c,
        '\u{ad}'
        | '\u{600}'..='\u{605}'
        | '\u{61c}'
        | '\u{6dd}'
        | '\u{70f}'
        | '\u{180e}'
        | '\u{200b}'..='\u{200f}'
        | '\u{202a}'..='\u{202e}'
        | '\u{2060}'..='\u{2064}'
        | '\u{2066}'..='\u{206f}'
        | '\u{e000}'..='\u{f8ff}'
        | '\u{feff}'
        | '\u{fff9}'..='\u{fffb}'
        | '\u{e0001}'
        | '\u{e0020}'..='\u{e007f}'
        | '\u{f0000}'..='\u{10ffff}')
}

/// Double-quotes `s`. Printable characters, combining marks included, are
/// kept; everything else uses `\n`-style, `\xhh`, `\uhhhh` or `\Uhhhhhhhh`
/// escapes.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{7}' => out.push_str("\\a"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{b}' => out.push_str("\\v"),
            c if is_printable(c) => out.push(c),
            c if c < ' ' || c == '\u{7f}' => out.push_str(&format!("\\x{:02x}", u32::from(c))),
            c if u32::from(c) < 0x10000 => out.push_str(&format!("\\u{:04x}", u32::from(c))),
            c => out.push_str(&format!("\\U{:08x}", u32::from(c))),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(g: &mut Graph, def: ExprId, fields: &[(&str, ValueId)]) -> ValueId {
        let fields = fields.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        g.add_value(ValueNode::new(def, Schema::object(), Repr::Object(fields)))
    }

    fn string(g: &mut Graph, def: ExprId, s: &str) -> ValueId {
        g.add_value(ValueNode::new(def, Schema::string(), Repr::String(s.to_string())))
    }

    #[test]
    fn merge_patch_reads() {
        let mut g = Graph::default();
        let def = g.placeholder(None, Schema::always());

        let host = string(&mut g, def, "a");
        let port1 = string(&mut g, def, "1");
        let base_db = object(&mut g, def, &[("host", host), ("port", port1)]);
        let base = object(&mut g, def, &[("db", base_db)]);

        let port2 = string(&mut g, def, "2");
        let top_db = object(&mut g, def, &[("port", port2)]);
        let top = object(&mut g, def, &[("db", top_db)]);

        g.merge(top, Some(base));
        assert_eq!(g.keys(top_db), vec!["host", "port"]);
        assert_eq!(g.lookup(top_db, "host"), Some(host));
        assert_eq!(g.lookup(top_db, "port"), Some(port2));
        assert_eq!(g.value(top_db).base, Some(base_db));
    }

    #[test]
    fn unknown_properties_are_typed() {
        let mut g = Graph::default();
        let def = g.placeholder(None, Schema::always());
        let schema = Schema::record(BTreeMap::from([("a".to_string(), Schema::string())]));
        let v = g.add_value(ValueNode::unknown(def, schema));

        let a = g.property(Some(v), None, "a").unwrap();
        assert!(g.value(a).unknown);
        assert!(g.value(a).schema.is_type(SchemaType::String));
        assert!(matches!(g.expr(g.value(a).def).repr, ExprRepr::Access { receiver, .. } if receiver == v));
    }

    #[test]
    fn copies_are_deep() {
        let mut g = Graph::default();
        let def = g.placeholder(None, Schema::always());
        let s = string(&mut g, def, "x");
        let arr = g.add_value(ValueNode::new(def, Schema::array(), Repr::Array(vec![s, s])));

        let c = g.copy(arr);
        assert_ne!(c, arr);
        let Repr::Array(items) = &g.value(c).repr else {
            panic!("expected an array");
        };
        assert_ne!(items[0], items[1]);
        assert_ne!(items[0], s);
        assert!(matches!(&g.value(items[1]).repr, Repr::String(x) if x == "x"));
    }

    #[test]
    fn stringify_taints() {
        let mut g = Graph::default();
        let def = g.placeholder(None, Schema::always());
        let a = string(&mut g, def, "a");
        let b = g.add_value(ValueNode {
            secret: true,
            ..ValueNode::new(def, Schema::string(), Repr::String("b".into()))
        });
        let arr = g.add_value(ValueNode::new(def, Schema::array(), Repr::Array(vec![a, b])));
        assert_eq!(g.to_string(arr), ("\"a\",\"b\"".to_string(), false, true));
    }

    #[test]
    fn quoting() {
        assert_eq!(quote("plain é"), "\"plain é\"");
        assert_eq!(quote("a\"b\\c"), "\"a\\\"b\\\\c\"");
        assert_eq!(quote("\n\t\u{7}"), "\"\\n\\t\\a\"");
        assert_eq!(quote("\u{1b}[0m\u{7f}"), "\"\\x1b[0m\\x7f\"");
        // Combining marks are printable.
        assert_eq!(quote("e\u{301}"), "\"e\u{301}\"");
        assert_eq!(quote("\u{a0}\u{200b}\u{feff}"), "\"\\u00a0\\u200b\\ufeff\"");
        assert_eq!(quote("\u{e0001}"), "\"\\U000e0001\"");
    }
}
