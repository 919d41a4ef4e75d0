// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::syntax::NodeRef;

/// One step of a property access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyAccessor {
    /// `.name` (or the leading name).
    Name(String),
    /// `["key"]`
    Key(String),
    /// `[0]`
    Index(i64),
}

impl PropertyAccessor {
    /// The object key this accessor names, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            PropertyAccessor::Name(k) | PropertyAccessor::Key(k) => Some(k),
            PropertyAccessor::Index(_) => None,
        }
    }
}

/// A parsed access path such as `a.b["c d"][0]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyAccess {
    pub accessors: Vec<PropertyAccessor>,
}

impl PropertyAccess {
    pub fn root_name(&self) -> Option<&str> {
        self.accessors.first().and_then(PropertyAccessor::key)
    }
}

impl fmt::Display for PropertyAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, a) in self.accessors.iter().enumerate() {
            match a {
                PropertyAccessor::Name(n) => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(n)?;
                }
                PropertyAccessor::Key(k) => write!(f, "[\"{}\"]", k.replace('"', "\\\""))?,
                PropertyAccessor::Index(n) => write!(f, "[{n}]")?,
            }
        }
        Ok(())
    }
}

struct Parser<'a> {
    node: Option<&'a NodeRef>,
    text: &'a str,
    pos: usize,
    accessors: Vec<PropertyAccessor>,
    diags: Diagnostics,
}

impl<'a> Parser<'a> {
    fn error(&mut self, summary: &str) {
        self.diags.push(Diagnostic::node_error(self.node, summary));
    }

    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn finish(mut self) -> (usize, PropertyAccess, Diagnostics) {
        if self.accessors.is_empty() {
            self.accessors.push(PropertyAccessor::Name(String::new()));
        }
        (
            self.pos,
            PropertyAccess {
                accessors: self.accessors,
            },
            self.diags,
        )
    }

    fn parse(mut self) -> (usize, PropertyAccess, Diagnostics) {
        loop {
            match self.peek() {
                None => {
                    self.error("missing closing brace '}' in interpolation");
                    return self.finish();
                }
                Some(b'}') => {
                    self.pos += 1;
                    return self.finish();
                }
                Some(b'[') => {
                    self.pos += 1;
                    self.parse_subscript();
                }
                Some(c) if c.is_ascii_whitespace() => {
                    self.error("missing closing brace '}' in interpolation");
                    return self.finish();
                }
                Some(c) => {
                    if c == b'.' {
                        self.pos += 1;
                    }
                    self.parse_name();
                }
            }
        }
    }

    fn parse_name(&mut self) {
        let text = self.text;
        let rest = &text[self.pos..];
        let end = rest
            .find(|c: char| c == '.' || c == '[' || c == '}' || c.is_ascii_whitespace())
            .unwrap_or(rest.len());
        if end == 0 {
            self.error("property name must not be empty");
        }
        self.accessors.push(PropertyAccessor::Name(rest[..end].to_string()));
        self.pos += end;
    }

    fn parse_subscript(&mut self) {
        let text = self.text;
        let accessor = if self.peek() == Some(b'"') {
            self.pos += 1;
            let mut key = String::new();
            let mut closed = false;
            let mut chars = text[self.pos..].char_indices();
            while let Some((i, c)) = chars.next() {
                match c {
                    '\\' => {
                        if let Some((_, n)) = chars.next() {
                            if n != '"' {
                                key.push('\\');
                            }
                            key.push(n);
                        } else {
                            key.push('\\');
                        }
                    }
                    '"' => {
                        self.pos += i + 1;
                        closed = true;
                        break;
                    }
                    _ => key.push(c),
                }
            }
            if !closed {
                self.pos = text.len();
                self.error("key subscript is missing closing quote '\"'");
                return;
            }
            if key.is_empty() {
                self.error("key subscript must not be empty");
            }
            PropertyAccessor::Key(key)
        } else {
            let rest = &text[self.pos..];
            let end = rest
                .find(|c: char| c == ']' || c == '}' || c.is_ascii_whitespace())
                .unwrap_or(rest.len());
            let raw = &rest[..end];
            self.pos += end;
            match raw.parse::<i64>() {
                Ok(n) => {
                    if self.accessors.is_empty() {
                        self.error(
                            "the first accessor must be a property name or key subscript, not a numeric subscript",
                        );
                    }
                    PropertyAccessor::Index(n)
                }
                Err(_) => {
                    self.error("numeric subscript must be a positive base-10 integer");
                    PropertyAccessor::Key(raw.to_string())
                }
            }
        };

        if self.peek() == Some(b']') {
            self.pos += 1;
        } else {
            self.error("subscript is missing closing bracket ']'");
        }
        self.accessors.push(accessor);
    }
}

/// Parses the access that follows `${` in `text`. Returns the number of bytes
/// consumed (including the closing brace) along with the access.
pub fn parse_property_access(
    node: Option<&NodeRef>,
    text: &str,
) -> (usize, PropertyAccess, Diagnostics) {
    Parser {
        node,
        text,
        pos: 0,
        accessors: vec![],
        diags: Diagnostics::new(),
    }
    .parse()
}
